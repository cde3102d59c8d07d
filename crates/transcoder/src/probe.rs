use std::path::Path;
use log::{debug, info};
use crate::error::TranscodeError;
use crate::tools::run_tool;

/// Frame sizes treated as HD; anything else is non-HD
const HD_RESOLUTIONS: &[&str] = &["1280x720", "1920x1080", "2560x1440", "3840x2160"];

/// Resolution class of the primary video stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTag {
    Hd,
    NonHd,
    Unknown,
}

/// What the inspection tool told us about a file
#[derive(Debug, Clone, PartialEq)]
pub struct MediaProbe {
    pub duration_seconds: f64,
    pub frame_rate: f64,
    pub resolution: ResolutionTag,
    /// Frame size as reported, e.g. (1920, 1080)
    pub dimensions: Option<(u32, u32)>,
    pub raw_diagnostic_text: String,
}

/// Probe a media file with `<ffmpeg> -i <path>`.
///
/// The inspection tool always exits non-zero when given no output file, so the exit
/// status only matters when the diagnostic text cannot be parsed.
pub async fn probe(ffmpeg_bin: &Path, path: &Path) -> Result<MediaProbe, TranscodeError> {
    let output = run_tool(ffmpeg_bin, &inspect_args(path)).await?;

    match parse_diagnostics(&output.stderr) {
        Ok(probe) => {
            info!(
                "Probed {}: duration {:.2}s, {:.2} fps, resolution {:?} {:?}",
                path.display(),
                probe.duration_seconds,
                probe.frame_rate,
                probe.resolution,
                probe.dimensions
            );
            Ok(probe)
        }
        Err(e) => Err(classify_failure(e, output.tool, output.exit_code)),
    }
}

/// Probe only the duration of a file (used on the finished output)
pub async fn probe_duration(ffmpeg_bin: &Path, path: &Path) -> Result<f64, TranscodeError> {
    let output = run_tool(ffmpeg_bin, &inspect_args(path)).await?;
    parse_duration(&output.stderr)
        .ok_or(TranscodeError::ParseFailure {
            tool: output.tool.clone(),
            what: "duration",
        })
        .map_err(|e| classify_failure(e, output.tool, output.exit_code))
}

fn inspect_args(path: &Path) -> Vec<String> {
    vec!["-i".to_string(), path.to_string_lossy().to_string()]
}

/// Exit codes 0 and 1 are normal for inspection-only runs; anything else means the
/// tool itself failed rather than the text being unexpected.
fn classify_failure(err: TranscodeError, tool: String, exit_code: Option<i32>) -> TranscodeError {
    match exit_code {
        Some(0) | Some(1) => err,
        Some(code) => TranscodeError::ToolExit { tool, code },
        None => TranscodeError::ToolExit { tool, code: -1 },
    }
}

/// Extract duration, frame rate and resolution from the tool's diagnostic text
pub fn parse_diagnostics(text: &str) -> Result<MediaProbe, TranscodeError> {
    let duration_seconds = parse_duration(text).ok_or(TranscodeError::ParseFailure {
        tool: "ffmpeg".to_string(),
        what: "duration",
    })?;

    let stream = parse_video_stream(text).ok_or(TranscodeError::ParseFailure {
        tool: "ffmpeg".to_string(),
        what: "frame rate",
    })?;

    debug!("Video stream report: {}", stream.report);

    Ok(MediaProbe {
        duration_seconds,
        frame_rate: stream.frame_rate,
        resolution: stream.resolution,
        dimensions: stream.dimensions,
        raw_diagnostic_text: text.to_string(),
    })
}

/// `Duration: H:MM:SS.ss, start` → seconds
pub fn parse_duration(text: &str) -> Option<f64> {
    let start = text.find("Duration: ")? + "Duration: ".len();
    let rest = &text[start..];
    let end = rest.find(", start")?;
    parse_hms(rest[..end].trim())
}

fn parse_hms(value: &str) -> Option<f64> {
    let mut parts = value.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    let whole = hours.checked_mul(60)?.checked_add(minutes)?.checked_mul(60)?;
    Some(whole as f64 + seconds)
}

struct VideoStreamReport<'a> {
    report: &'a str,
    frame_rate: f64,
    resolution: ResolutionTag,
    dimensions: Option<(u32, u32)>,
}

/// Find the first `Video:` stream line carrying `<fps> fps,`
fn parse_video_stream(text: &str) -> Option<VideoStreamReport<'_>> {
    text.lines()
        .filter(|line| line.contains("Video:"))
        .find_map(|line| {
            let fps_at = line.find(" fps,")?;
            let video_at = line.find("Video:")? + "Video:".len();
            if video_at > fps_at {
                return None;
            }
            let report = &line[video_at..fps_at];
            let frame_rate: f64 = report.split_whitespace().last()?.parse().ok()?;
            if !(frame_rate > 0.0 && frame_rate.is_finite()) {
                return None;
            }

            let dimensions = report
                .split_whitespace()
                .map(|token| token.trim_end_matches(','))
                .find_map(parse_dimensions);

            let resolution = match dimensions {
                Some((w, h)) if HD_RESOLUTIONS.contains(&format!("{}x{}", w, h).as_str()) => ResolutionTag::Hd,
                Some(_) => ResolutionTag::NonHd,
                None => ResolutionTag::Unknown,
            };

            Some(VideoStreamReport {
                report: report.trim(),
                frame_rate,
                resolution,
                dimensions,
            })
        })
}

fn parse_dimensions(token: &str) -> Option<(u32, u32)> {
    let (w, h) = token.split_once('x')?;
    // hex codec tags like 0x0002 are not frame sizes
    if w.is_empty() || h.is_empty() || w.starts_with('0') || !w.bytes().chain(h.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((w.parse().ok()?, h.parse().ok()?))
}
