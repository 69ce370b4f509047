//! Video frame extraction through the system `ffmpeg` binary.
//!
//! The dust overlays are single frames sampled out of short source clips;
//! this is the only video touchpoint in the engine, so it shells out rather
//! than linking a decoder. Requires `ffmpeg`/`ffprobe` on `PATH` and the
//! `media-ffmpeg` feature.

use std::path::{Path, PathBuf};

use crate::error::{HalationError, HalationResult};

#[derive(Clone, Debug)]
pub struct VideoSourceInfo {
    pub source_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub duration_sec: f64,
}

#[cfg(feature = "media-ffmpeg")]
pub fn probe_video(source_path: &Path) -> HalationResult<VideoSourceInfo> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        streams: Vec<ProbeStream>,
        format: Option<ProbeFormat>,
    }

    let out = std::process::Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(source_path)
        .output()
        .map_err(|e| HalationError::resource(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(HalationError::resource(format!(
            "ffprobe failed for '{}': {}",
            source_path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| HalationError::resource(format!("ffprobe json parse failed: {e}")))?;
    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| HalationError::resource("no video stream found"))?;
    let width = video
        .width
        .ok_or_else(|| HalationError::resource("missing video width from ffprobe"))?;
    let height = video
        .height
        .ok_or_else(|| HalationError::resource("missing video height from ffprobe"))?;
    let duration_sec = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(VideoSourceInfo {
        source_path: source_path.to_path_buf(),
        width,
        height,
        duration_sec,
    })
}

#[cfg(feature = "media-ffmpeg")]
pub fn decode_video_frame_rgba8(
    source: &VideoSourceInfo,
    source_time_sec: f64,
) -> HalationResult<Vec<u8>> {
    let out = std::process::Command::new("ffmpeg")
        .args(["-v", "error", "-ss", &format!("{source_time_sec:.9}")])
        .arg("-i")
        .arg(&source.source_path)
        .args([
            "-frames:v",
            "1",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "pipe:1",
        ])
        .output()
        .map_err(|e| HalationError::resource(format!("failed to run ffmpeg for video decode: {e}")))?;

    if !out.status.success() {
        return Err(HalationError::resource(format!(
            "ffmpeg video decode failed for '{}': {}",
            source.source_path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let expected_len = source.width as usize * source.height as usize * 4;
    if expected_len == 0 || out.stdout.len() < expected_len {
        return Err(HalationError::resource(format!(
            "decoded video frame has invalid size: got {} bytes, expected {expected_len}",
            out.stdout.len()
        )));
    }
    Ok(out.stdout[..expected_len].to_vec())
}

#[cfg(not(feature = "media-ffmpeg"))]
pub fn probe_video(_source_path: &Path) -> HalationResult<VideoSourceInfo> {
    Err(HalationError::resource(
        "video-derived resources require the 'media-ffmpeg' feature",
    ))
}

#[cfg(not(feature = "media-ffmpeg"))]
pub fn decode_video_frame_rgba8(
    _source: &VideoSourceInfo,
    _source_time_sec: f64,
) -> HalationResult<Vec<u8>> {
    Err(HalationError::resource(
        "video-derived resources require the 'media-ffmpeg' feature",
    ))
}
