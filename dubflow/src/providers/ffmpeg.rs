//! ffmpeg-backed [`MediaToolkit`].

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{AlignedClip, MediaToolkit};
use crate::{Error, Result};

/// Lines of ffmpeg stderr kept in error messages.
const STDERR_TAIL_LINES: usize = 8;

/// Runs the ffmpeg binary; `ffmpeg` on the `PATH` unless configured otherwise.
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    ffmpeg_path: String,
}

impl FfmpegToolkit {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    async fn run(&self, operation: &str, args: &[String]) -> Result<()> {
        debug!(operation, "FFmpeg args: {:?}", args);
        let started = Instant::now();

        let output = Command::new(&self.ffmpeg_path)
            .args(args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::provider("ffmpeg", format!("failed to spawn {}: {}", self.ffmpeg_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::provider(
                "ffmpeg",
                format!(
                    "{} exited with code {}: {}",
                    operation,
                    output.status.code().unwrap_or(-1),
                    stderr_tail(&stderr)
                ),
            ));
        }

        info!(
            operation,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ffmpeg finished"
        );
        Ok(())
    }
}

impl Default for FfmpegToolkit {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<()> {
        self.run("extract_audio", &extract_audio_args(video, output))
            .await
    }

    async fn assemble_track(&self, clips: &[AlignedClip], output: &Path) -> Result<()> {
        if clips.is_empty() {
            return Err(Error::validation("cannot assemble a track without clips"));
        }
        self.run("assemble_track", &assemble_track_args(clips, output))
            .await
    }

    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        self.run("mux", &mux_args(video, audio, output)).await
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn extract_audio_args(video: &Path, output: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-y".into(),
        "-i".into(),
        path_arg(video),
        "-vn".into(),
        "-acodec".into(),
        "libmp3lame".into(),
        "-q:a".into(),
        "2".into(),
        path_arg(output),
    ]
}

/// Each clip is optionally cut with `atrim`, shifted with `adelay` and the
/// results are summed with `amix`. `normalize=0` keeps clip levels unchanged.
fn assemble_track_args(clips: &[AlignedClip], output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-nostdin".into(), "-y".into()];
    for clip in clips {
        args.push("-i".into());
        args.push(path_arg(&clip.path));
    }

    let mut filters = Vec::with_capacity(clips.len() + 1);
    let mut labels = String::new();
    for (i, clip) in clips.iter().enumerate() {
        let delay_ms = (clip.start.max(0.0) * 1000.0).round() as u64;
        let trim = clip
            .max_duration
            .map(|d| format!("atrim=0:{:.3},", d.max(0.0)))
            .unwrap_or_default();
        filters.push(format!(
            "[{i}:a]{trim}adelay={delay_ms}:all=1[a{i}]"
        ));
        labels.push_str(&format!("[a{i}]"));
    }
    filters.push(format!(
        "{labels}amix=inputs={}:duration=longest:dropout_transition=0:normalize=0[out]",
        clips.len()
    ));

    args.extend([
        "-filter_complex".into(),
        filters.join(";"),
        "-map".into(),
        "[out]".into(),
        "-acodec".into(),
        "libmp3lame".into(),
        "-q:a".into(),
        "2".into(),
        path_arg(output),
    ]);
    args
}

fn mux_args(video: &Path, audio: &Path, output: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-y".into(),
        "-i".into(),
        path_arg(video),
        "-i".into(),
        path_arg(audio),
        "-map".into(),
        "0:v:0".into(),
        "-map".into(),
        "1:a:0".into(),
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        "aac".into(),
        "-shortest".into(),
        "-movflags".into(),
        "+faststart".into(),
        path_arg(output),
    ]
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}
