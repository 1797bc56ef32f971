//! Pipeline stages and their progress checkpoints.

use serde::{Deserialize, Serialize};

/// A stage of the dubbing pipeline, in execution order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initializing,
    ExtractAudio,
    Transcribe,
    Translate,
    GenerateSpeech,
    MixAudio,
    Upload,
    Lipsync,
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Progress percentage reached once this stage has finished.
    pub fn checkpoint(&self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::ExtractAudio => 10,
            Self::Transcribe => 40,
            Self::Translate => 60,
            Self::GenerateSpeech => 85,
            Self::MixAudio => 90,
            Self::Upload => 95,
            Self::Lipsync => 99,
            Self::Complete => 100,
        }
    }

    /// Progress percentage at which this stage starts (the previous checkpoint).
    pub fn start_percent(&self) -> u8 {
        match self {
            Self::Initializing | Self::ExtractAudio => 0,
            Self::Transcribe => Self::ExtractAudio.checkpoint(),
            Self::Translate => Self::Transcribe.checkpoint(),
            Self::GenerateSpeech => Self::Translate.checkpoint(),
            Self::MixAudio => Self::GenerateSpeech.checkpoint(),
            Self::Upload => Self::MixAudio.checkpoint(),
            Self::Lipsync => Self::Upload.checkpoint(),
            Self::Complete => Self::Lipsync.checkpoint(),
        }
    }

    /// Interpolate progress inside this stage for `done` of `total` work items.
    pub fn interpolate(&self, done: usize, total: usize) -> u8 {
        let start = self.start_percent() as usize;
        let end = self.checkpoint() as usize;
        if total == 0 || done >= total {
            return end as u8;
        }
        (start + (end - start) * done / total) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_checkpoints_are_non_decreasing() {
        let stages = [
            Stage::Initializing,
            Stage::ExtractAudio,
            Stage::Transcribe,
            Stage::Translate,
            Stage::GenerateSpeech,
            Stage::MixAudio,
            Stage::Upload,
            Stage::Lipsync,
            Stage::Complete,
        ];
        for pair in stages.windows(2) {
            assert!(pair[0].checkpoint() <= pair[1].checkpoint());
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(Stage::Complete.checkpoint(), 100);
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::GenerateSpeech.as_str(), "generate_speech");
        assert_eq!(Stage::from_str("mix_audio").unwrap(), Stage::MixAudio);
    }

    #[test]
    fn test_interpolate_generate_speech() {
        let stage = Stage::GenerateSpeech;
        assert_eq!(stage.interpolate(0, 4), 60);
        assert_eq!(stage.interpolate(2, 4), 72);
        assert_eq!(stage.interpolate(4, 4), 85);
        assert_eq!(stage.interpolate(0, 0), 85);
    }
}
