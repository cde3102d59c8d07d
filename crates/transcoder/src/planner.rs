use log::info;
use crate::config::EncodingConfig;
use crate::probe::{MediaProbe, ResolutionTag};

/// Encoder-side floor/ceiling parameters, applied in either rate mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateClamps {
    pub min_kbps: Option<u32>,
    pub max_kbps: Option<u32>,
    /// Playback buffer size, only emitted alongside a clamp
    pub buffer_kbps: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoRateMode {
    Crf { value: u8, clamps: RateClamps },
    TargetBitrate { kbps: u32, clamps: RateClamps },
}

impl VideoRateMode {
    pub fn clamps(&self) -> &RateClamps {
        match self {
            VideoRateMode::Crf { clamps, .. } | VideoRateMode::TargetBitrate { clamps, .. } => clamps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioMode {
    Copy,
    Reencode { codec: String, bitrate_kbps: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleMode {
    Copy,
}

/// Source timing the progress monitor needs to compute percent complete
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceTiming {
    pub duration_seconds: f64,
    pub frame_rate: f64,
}

impl SourceTiming {
    pub fn total_frames(&self) -> f64 {
        self.duration_seconds * self.frame_rate
    }
}

/// Fully-determined encoder parameters for one run
#[derive(Debug, Clone, PartialEq)]
pub struct EncodePlan {
    pub preset: String,
    pub video: VideoRateMode,
    pub audio: AudioMode,
    pub subtitles: SubtitleMode,
    /// None when the source could not be probed
    pub timing: Option<SourceTiming>,
    /// True when the plan was derived from an estimated source bitrate
    pub adaptive: bool,
}

/// `size * 8 / (1024 * duration)`, truncated to whole kbps
pub fn estimate_bitrate_kbps(size_bytes: u64, duration_seconds: f64) -> u32 {
    if !(duration_seconds > 0.0 && duration_seconds.is_finite()) {
        return 0;
    }
    let kbps = size_bytes as f64 * 8.0 / (1024.0 * duration_seconds);
    kbps.min(u32::MAX as f64) as u32
}

/// Derive encoder parameters from the clipped file size and its probe.
///
/// Never fails: a missing probe, zero duration or a zero bitrate estimate all fall
/// back to constant-rate-factor encoding with the default preset.
pub fn plan(clipped_size_bytes: u64, probe: Option<&MediaProbe>, cfg: &EncodingConfig) -> EncodePlan {
    let timing = probe
        .filter(|p| p.duration_seconds > 0.0 && p.frame_rate > 0.0)
        .map(|p| SourceTiming {
            duration_seconds: p.duration_seconds,
            frame_rate: p.frame_rate,
        });
    let resolution = probe.map(|p| p.resolution).unwrap_or(ResolutionTag::Unknown);
    let clamps = rate_clamps(cfg);

    let input_kbps = match (cfg.estimate_bitrate, timing) {
        (true, Some(t)) => estimate_bitrate_kbps(clipped_size_bytes, t.duration_seconds),
        _ => 0,
    };

    let plan = if input_kbps == 0 {
        info!("Bitrate estimate unavailable, falling back to constant rate factor encoding");
        EncodePlan {
            preset: cfg.preset_non_hd.clone(),
            video: VideoRateMode::Crf { value: cfg.crf, clamps },
            audio: audio_mode(resolution, cfg),
            subtitles: SubtitleMode::Copy,
            timing,
            adaptive: false,
        }
    } else if resolution == ResolutionTag::Hd {
        let target_kbps = (input_kbps as f64 * cfg.compression_ratio) as u32;
        info!(
            "Estimated input bitrate {} kbps, target {} kbps at compression ratio {}",
            input_kbps, target_kbps, cfg.compression_ratio
        );

        let video = if cfg.hd_target_bitrate_kbps > 0 && target_kbps > cfg.hd_target_bitrate_kbps {
            VideoRateMode::TargetBitrate {
                kbps: cfg.hd_target_bitrate_kbps,
                clamps,
            }
        } else {
            VideoRateMode::Crf { value: cfg.crf, clamps }
        };

        EncodePlan {
            preset: cfg.preset_hd.clone(),
            video,
            audio: AudioMode::Copy,
            subtitles: SubtitleMode::Copy,
            timing,
            adaptive: true,
        }
    } else {
        info!("Estimated input bitrate {} kbps, non-HD source uses constant rate factor", input_kbps);
        EncodePlan {
            preset: cfg.preset_non_hd.clone(),
            video: VideoRateMode::Crf { value: cfg.crf, clamps },
            audio: audio_mode(resolution, cfg),
            subtitles: SubtitleMode::Copy,
            timing,
            adaptive: true,
        }
    };

    info!(
        "🎯 Encode plan: preset {}, video {:?}, audio {:?}",
        plan.preset, plan.video, plan.audio
    );
    plan
}

fn rate_clamps(cfg: &EncodingConfig) -> RateClamps {
    let nonzero = |v: u32| (v > 0).then_some(v);
    let max_kbps = nonzero(cfg.hd_max_bitrate_kbps);
    RateClamps {
        min_kbps: nonzero(cfg.hd_min_bitrate_kbps),
        max_kbps,
        buffer_kbps: max_kbps.map(|max| cfg.video_buffer_secs.saturating_mul(max)),
    }
}

/// HD keeps the original channel layout. Anything not recognised as HD is
/// treated as non-HD and re-encoded.
fn audio_mode(resolution: ResolutionTag, cfg: &EncodingConfig) -> AudioMode {
    match resolution {
        ResolutionTag::Hd => AudioMode::Copy,
        ResolutionTag::NonHd | ResolutionTag::Unknown => AudioMode::Reencode {
            codec: cfg.audio_codec_non_hd.clone(),
            bitrate_kbps: cfg.audio_bitrate_non_hd_kbps,
        },
    }
}
