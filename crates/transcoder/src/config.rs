use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the recording transcoder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Encoder binary, also used in inspection-only mode for probing
    pub ffmpeg_bin: PathBuf,
    /// Commercial flagging tool
    pub commflag_bin: PathBuf,
    /// Cutlist generator / skip-list clearer
    pub util_bin: PathBuf,
    /// Lossless clipper honoring the cutlist
    pub clipper_bin: PathBuf,
    /// Directory where job state JSON files are stored
    pub job_state_dir: PathBuf,
    /// Directory where recording records are stored
    pub recording_dir: PathBuf,
    /// Where encoder status side-channel files are created (system temp dir if unset)
    pub status_dir: Option<PathBuf>,
    /// Clear skip/cut lists and commercial markup once the transcode is done
    pub flush_commskip: bool,
    /// Run commercial flagging first if the recording was never flagged
    pub require_commflagged: bool,
    /// Generate a cutlist from flagged commercials and clip them out
    pub generate_cutlist: bool,
    /// Rebuild the seek table after the transcode
    pub build_seektable: bool,
    /// Interval between side-channel reads and comm-flag job checks
    pub poll_interval_ms: u64,
    /// Consecutive silent polls before a stall warning is reported
    pub stall_polls: u32,
    /// Encoder worker thread count
    pub encoder_threads: u32,
    pub encoding: EncodingConfig,
}

/// Rate-control settings consumed by the planner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncodingConfig {
    /// Estimate the source bitrate from size and duration
    pub estimate_bitrate: bool,
    /// Output bitrate as a fraction of the estimated input bitrate
    pub compression_ratio: f64,
    /// Encoder ceiling for HD video in kbps (0 = disabled)
    pub hd_max_bitrate_kbps: u32,
    /// Encoder floor for HD video in kbps (0 = disabled)
    pub hd_min_bitrate_kbps: u32,
    /// Hard target bitrate for HD video in kbps (0 = disabled)
    pub hd_target_bitrate_kbps: u32,
    /// Seconds of video a playback device buffers
    pub video_buffer_secs: u32,
    pub preset_hd: String,
    pub preset_non_hd: String,
    /// Constant rate factor, sane values 18-28
    pub crf: u8,
    pub audio_codec_non_hd: String,
    pub audio_bitrate_non_hd_kbps: u32,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            estimate_bitrate: true,
            compression_ratio: 0.65,
            hd_max_bitrate_kbps: 5500,
            hd_min_bitrate_kbps: 0,
            hd_target_bitrate_kbps: 0,
            video_buffer_secs: 3,
            preset_hd: "fast".to_string(),
            preset_non_hd: "slow".to_string(),
            crf: 21,
            audio_codec_non_hd: "libfdk_aac".to_string(),
            audio_bitrate_non_hd_kbps: 128,
        }
    }
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl TranscodeConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("/usr/bin/ffmpeg"),
            commflag_bin: PathBuf::from("mythcommflag"),
            util_bin: PathBuf::from("mythutil"),
            clipper_bin: PathBuf::from("mythtranscode"),
            job_state_dir: PathBuf::from("/var/lib/transcode-h264/jobs"),
            recording_dir: PathBuf::from("/var/lib/transcode-h264/recordings"),
            status_dir: None,
            flush_commskip: true,
            require_commflagged: false,
            generate_cutlist: true,
            build_seektable: false,
            poll_interval_ms: 10_000,
            stall_polls: 3,
            encoder_threads: 4,
            encoding: EncodingConfig::default(),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let enc = &self.encoding;
        if !(enc.compression_ratio > 0.0 && enc.compression_ratio <= 2.0) {
            bail!("compression_ratio must be in (0, 2], got {}", enc.compression_ratio);
        }
        if enc.crf > 51 {
            bail!("crf must be at most 51, got {}", enc.crf);
        }
        if enc.preset_hd.trim().is_empty() || enc.preset_non_hd.trim().is_empty() {
            bail!("encoder presets must not be empty");
        }
        if enc.hd_min_bitrate_kbps > 0
            && enc.hd_max_bitrate_kbps > 0
            && enc.hd_min_bitrate_kbps > enc.hd_max_bitrate_kbps
        {
            bail!(
                "hd_min_bitrate_kbps ({}) exceeds hd_max_bitrate_kbps ({})",
                enc.hd_min_bitrate_kbps,
                enc.hd_max_bitrate_kbps
            );
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be greater than zero");
        }
        if self.encoder_threads == 0 {
            bail!("encoder_threads must be greater than zero");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
