use std::path::Path;
use crate::planner::{AudioMode, EncodePlan, RateClamps, SubtitleMode, VideoRateMode};

/// Command builder for generating encoder command lines
#[derive(Debug, Default)]
pub struct CommandBuilder;

impl CommandBuilder {
    pub fn new() -> Self {
        CommandBuilder
    }

    /// Build the full H.264/MP4 encode command.
    ///
    /// Generates:
    /// - input and overwrite flag
    /// - de-interlacing filter and fast-start container flag
    /// - timestamp passthrough for sources that repeat timestamps
    /// - codec, preset and rate control from the plan
    /// - audio and subtitle handling
    /// - bounded thread count
    pub fn build_encode_command(&self, input: &Path, output: &Path, plan: &EncodePlan, threads: u32) -> Vec<String> {
        let mut args = Vec::new();

        args.push("-i".to_string());
        args.push(input.to_string_lossy().to_string());
        args.push("-y".to_string());

        args.push("-filter:v".to_string());
        args.push("yadif=0:-1:1".to_string());

        args.push("-movflags".to_string());
        args.push("faststart".to_string());

        args.push("-vsync".to_string());
        args.push("passthrough".to_string());

        args.push("-c:v".to_string());
        args.push("libx264".to_string());
        args.push("-preset:v".to_string());
        args.push(plan.preset.clone());

        args.extend(video_rate_args(&plan.video));
        args.extend(audio_args(&plan.audio));

        match plan.subtitles {
            SubtitleMode::Copy => {
                args.push("-c:s".to_string());
                args.push("copy".to_string());
            }
        }

        args.push("-threads".to_string());
        args.push(threads.to_string());

        args.push(output.to_string_lossy().to_string());

        args
    }
}

fn video_rate_args(mode: &VideoRateMode) -> Vec<String> {
    let mut args = match mode {
        VideoRateMode::Crf { value, .. } => vec!["-crf:v".to_string(), value.to_string()],
        VideoRateMode::TargetBitrate { kbps, .. } => vec!["-b:v".to_string(), format!("{}k", kbps)],
    };
    args.extend(clamp_args(mode.clamps()));
    args
}

fn clamp_args(clamps: &RateClamps) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(min) = clamps.min_kbps {
        args.push("-minrate".to_string());
        args.push(format!("{}k", min));
    }
    if let Some(max) = clamps.max_kbps {
        args.push("-maxrate".to_string());
        args.push(format!("{}k", max));
    }
    if let Some(buffer) = clamps.buffer_kbps {
        args.push("-bufsize".to_string());
        args.push(format!("{}k", buffer));
    }
    args
}

fn audio_args(mode: &AudioMode) -> Vec<String> {
    match mode {
        AudioMode::Copy => vec!["-c:a".to_string(), "copy".to_string()],
        AudioMode::Reencode { codec, bitrate_kbps } => vec![
            "-c:a".to_string(),
            codec.clone(),
            "-b:a".to_string(),
            format!("{}k", bitrate_kbps),
        ],
    }
}
