//! Placement of synthesized clips on the source timeline.
//!
//! Every clip starts exactly at its segment's start time, so the dubbed track
//! never drifts from the picture. A clip may play until the next segment
//! starts; whatever runs past that point is cut. The last clip plays to its end
//! and gaps between clips are silence.

use std::path::PathBuf;

use crate::domain::Segment;
use crate::providers::AlignedClip;

/// A synthesized clip for the segment at `index`.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedClip {
    pub index: usize,
    pub path: PathBuf,
}

/// Lay clips out against `segments`, which must be in chronological order.
///
/// Segments without a clip (blank text) still bound the clip before them.
/// When two segments start at the same instant the earlier one keeps its own
/// duration instead of being cut to nothing.
pub fn plan_track(segments: &[Segment], clips: &[SynthesizedClip]) -> Vec<AlignedClip> {
    clips
        .iter()
        .filter_map(|clip| {
            let segment = segments.get(clip.index)?;
            let max_duration = segments
                .iter()
                .skip(clip.index + 1)
                .map(|next| next.start - segment.start)
                .next()
                .map(|window| {
                    if window > 0.0 {
                        window
                    } else {
                        segment.duration()
                    }
                });
            Some(AlignedClip {
                path: clip.path.clone(),
                start: segment.start,
                max_duration,
            })
        })
        .collect()
}
