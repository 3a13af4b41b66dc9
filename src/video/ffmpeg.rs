//! FFmpeg CLI video backend.
//!
//! Frame counts come from `ffprobe -count_packets`; single frames are decoded
//! by selecting the frame number and piping it out as raw RGB24.

use image::RgbImage;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::{VideoBackend, VideoSource};
use crate::error::{DetectError, Result};

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
    nb_read_packets: Option<String>,
    nb_frames: Option<String>,
}

/// Locates `ffmpeg`/`ffprobe` once and opens videos through them.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegBackend {
    pub fn new() -> Result<Self> {
        let ffmpeg = which::which("ffmpeg")
            .map_err(|_| DetectError::Config("ffmpeg not found in PATH".to_string()))?;
        let ffprobe = which::which("ffprobe")
            .map_err(|_| DetectError::Config("ffprobe not found in PATH".to_string()))?;
        Ok(Self { ffmpeg, ffprobe })
    }

    fn probe(&self, path: &Path) -> Result<(u32, u32, usize)> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-count_packets",
                "-show_entries",
                "stream=width,height,nb_read_packets,nb_frames",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| DetectError::video_open(path, format!("failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(DetectError::video_open(
                path,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        parse_probe(&output.stdout).map_err(|reason| DetectError::video_open(path, reason))
    }
}

/// Extract (width, height, frame count) from ffprobe JSON.
fn parse_probe(stdout: &[u8]) -> std::result::Result<(u32, u32, usize), String> {
    let probe: FfprobeOutput =
        serde_json::from_slice(stdout).map_err(|e| format!("bad ffprobe output: {}", e))?;

    let stream = probe
        .streams
        .first()
        .ok_or_else(|| "no video stream found".to_string())?;

    let width = stream.width.unwrap_or(0);
    let height = stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err("video stream has no dimensions".to_string());
    }

    let frames = stream
        .nb_read_packets
        .as_deref()
        .or(stream.nb_frames.as_deref())
        .and_then(|n| n.parse::<usize>().ok())
        .unwrap_or(0);

    Ok((width, height, frames))
}

impl VideoBackend for FfmpegBackend {
    type Video = FfmpegVideo;

    fn open(&self, path: &Path) -> Result<FfmpegVideo> {
        if !path.exists() {
            return Err(DetectError::video_open(path, "file not found"));
        }

        let (width, height, frame_count) = self.probe(path)?;
        tracing::debug!(video = %path.display(), width, height, frame_count, "Opened video");

        Ok(FfmpegVideo {
            ffmpeg: self.ffmpeg.clone(),
            path: path.to_path_buf(),
            width,
            height,
            frame_count,
        })
    }
}

/// A probed video file.
#[derive(Debug, Clone)]
pub struct FfmpegVideo {
    ffmpeg: PathBuf,
    path: PathBuf,
    width: u32,
    height: u32,
    frame_count: usize,
}

impl VideoSource for FfmpegVideo {
    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn read_frame(&mut self, index: usize) -> Result<RgbImage> {
        let filter = format!("select=eq(n\\,{})", index);
        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(&self.path)
            .args([
                "-vf",
                filter.as_str(),
                "-vsync",
                "0",
                "-frames:v",
                "1",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| DetectError::frame_decode(index, format!("failed to run ffmpeg: {}", e)))?;

        if !output.status.success() {
            return Err(DetectError::frame_decode(
                index,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let expected = (self.width * self.height * 3) as usize;
        if output.stdout.len() < expected {
            return Err(DetectError::frame_decode(
                index,
                format!("expected {} bytes, got {}", expected, output.stdout.len()),
            ));
        }

        let mut raw = output.stdout;
        raw.truncate(expected);
        RgbImage::from_raw(self.width, self.height, raw)
            .ok_or_else(|| DetectError::frame_decode(index, "buffer does not match frame size"))
    }
}
