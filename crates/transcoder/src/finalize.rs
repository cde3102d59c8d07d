use std::fs;
use anyhow::{Context, Result};
use humansize::{format_size, DECIMAL};
use log::{info, warn};
use crate::config::TranscodeConfig;
use crate::encode::EncodeResult;
use crate::error::{remove_if_exists, TranscodeError};
use crate::job::{Phase, StatusReporter};
use crate::planner::estimate_bitrate_kbps;
use crate::probe::probe_duration;
use crate::recording::{Recording, RecordingStore};
use crate::session::TranscodeSession;
use crate::tools::{recording_args, run_tool};

/// Summary figures for a finished transcode, for reporting only
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinalStats {
    pub input_bytes: u64,
    pub working_bytes: u64,
    pub output_bytes: u64,
    /// None when the source duration was never known
    pub output_kbps: Option<u32>,
    /// Output size saved relative to the original input
    pub compressed_pct: f64,
    /// Input removed by clipping
    pub clip_pct: f64,
    /// Working file size saved by the encoder
    pub encoder_pct: f64,
}

impl FinalStats {
    pub fn compute(session: &TranscodeSession, duration_seconds: Option<f64>) -> Self {
        let saved = |from: u64, to: u64| {
            if from == 0 {
                0.0
            } else {
                100.0 * (from as f64 - to as f64) / from as f64
            }
        };
        let output_kbps = duration_seconds
            .map(|d| estimate_bitrate_kbps(session.output_bytes, d))
            .filter(|kbps| *kbps > 0);

        Self {
            input_bytes: session.input_bytes,
            working_bytes: session.working_bytes,
            output_bytes: session.output_bytes,
            output_kbps,
            compressed_pct: saved(session.input_bytes, session.output_bytes),
            clip_pct: session.clip_percent(),
            encoder_pct: saved(session.working_bytes, session.output_bytes),
        }
    }

    /// Final job comment; percentages are truncated toward zero
    pub fn comment(&self) -> String {
        match self.output_kbps {
            Some(kbps) => format!(
                "Transcode Completed @ {}kbps, compressed file by {}% (clipped {}%, transcoder compressed {}%)",
                kbps, self.compressed_pct as i64, self.clip_pct as i64, self.encoder_pct as i64
            ),
            None => "Transcode Completed".to_string(),
        }
    }
}

/// Switches the recording over to the encoded file and tidies up after it
pub struct Finalizer<'a> {
    cfg: &'a TranscodeConfig,
    recordings: &'a RecordingStore,
    reporter: &'a StatusReporter,
}

impl<'a> Finalizer<'a> {
    pub fn new(cfg: &'a TranscodeConfig, recordings: &'a RecordingStore, reporter: &'a StatusReporter) -> Self {
        Self {
            cfg,
            recordings,
            reporter,
        }
    }

    pub async fn finalize(
        &self,
        recording: &mut Recording,
        session: &mut TranscodeSession,
        encoded: &EncodeResult,
    ) -> Result<FinalStats> {
        self.reporter.report(Phase::Finalizing, "Finalizing transcoded recording");

        session.output_bytes = confirmed_output_size(encoded)?;
        info!(
            "📦 Output {} is {}",
            encoded.output_path.display(),
            format_size(session.output_bytes, DECIMAL)
        );

        if self.cfg.flush_commskip {
            self.clear_marker_lists(recording).await;
            let removed = recording.remove_commercial_marks();
            info!("Removed {} commercial marks", removed);
        }

        let basename = encoded
            .output_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .context("Output path has no file name")?;
        recording.basename = basename;
        recording.filesize = session.output_bytes;
        recording.transcoded = true;
        recording.seek.clear();
        self.recordings
            .save(recording)
            .context("Failed to point the recording at the transcoded file")?;
        session.commit();

        self.remove_source(session, encoded);

        if self.cfg.build_seektable {
            self.rebuild_seektable(recording).await;
        }

        self.correct_duration(recording, encoded).await;

        let duration = session.plan.as_ref().and_then(|p| p.timing).map(|t| t.duration_seconds);
        let stats = FinalStats::compute(session, duration);
        info!(
            "✅ Transcode complete: {} → {} (clipped {}), {:.1}% smaller overall, clip {:.1}%, encoder {:.1}%, {}",
            format_size(stats.input_bytes, DECIMAL),
            format_size(stats.output_bytes, DECIMAL),
            format_size(session.clipped_bytes, DECIMAL),
            stats.compressed_pct,
            stats.clip_pct,
            stats.encoder_pct,
            stats
                .output_kbps
                .map(|k| format!("{} kbps", k))
                .unwrap_or_else(|| "bitrate unknown".to_string())
        );
        self.reporter.report(Phase::Completed, &stats.comment());
        Ok(stats)
    }

    async fn clear_marker_lists(&self, recording: &Recording) {
        for flag in ["--clearcutlist", "--clearskiplist"] {
            let mut args = recording_args(recording.chanid, &recording.starttime);
            args.push(flag.to_string());
            match run_tool(&self.cfg.util_bin, &args).await {
                Ok(output) if output.success() => {}
                Ok(output) => warn!("{} {} exited with {:?}, ignoring", output.tool, flag, output.exit_code),
                Err(e) => warn!("Could not run {}: {}", flag, e),
            }
        }
    }

    /// Delete the original and its leftovers. Only reached once the output is
    /// confirmed and the record points at it, so failures here are not fatal.
    fn remove_source(&self, session: &TranscodeSession, encoded: &EncodeResult) {
        let paths = &session.paths;
        match fs::metadata(&encoded.output_path) {
            Ok(meta) if meta.len() > 0 => match fs::remove_file(&paths.source) {
                Ok(()) => info!("🗑️  Removed original {}", paths.source.display()),
                Err(e) => warn!("Could not remove original {}: {}", paths.source.display(), e),
            },
            _ => warn!("Output vanished before the original was removed, keeping {}", paths.source.display()),
        }

        for thumbnail in paths.thumbnails() {
            if let Err(e) = remove_if_exists(&thumbnail) {
                warn!("Could not remove thumbnail: {}", e);
            }
        }
        if let Err(e) = paths.remove_working() {
            warn!("Could not remove working file: {}", e);
        }
    }

    async fn rebuild_seektable(&self, recording: &Recording) {
        self.reporter.report(Phase::RebuildingSeektable, "Rebuilding seektable");
        let mut args = recording_args(recording.chanid, &recording.starttime);
        args.push("--rebuild".to_string());
        match run_tool(&self.cfg.commflag_bin, &args).await {
            Ok(output) if output.success() => info!("Seek table rebuilt"),
            Ok(output) => warn!("{} --rebuild exited with {:?}, ignoring", output.tool, output.exit_code),
            Err(e) => warn!("Could not rebuild seek table: {}", e),
        }
    }

    /// Clipping shifts the real duration; stale duration marks must not survive
    async fn correct_duration(&self, recording: &mut Recording, encoded: &EncodeResult) {
        let seconds = match probe_duration(&self.cfg.ffmpeg_bin, &encoded.output_path).await {
            Ok(seconds) => seconds,
            Err(e) => {
                warn!("Could not probe final duration, leaving duration marks alone: {}", e);
                return;
            }
        };

        let duration_ms = (seconds * 1000.0).round() as u64;
        let corrected = recording.correct_duration_marks(duration_ms);
        if corrected > 0 {
            info!("Corrected {} duration mark(s) to {} ms", corrected, duration_ms);
            if let Err(e) = self.recordings.save(recording) {
                warn!("Could not save corrected duration marks: {:#}", e);
            }
        }
    }
}

fn confirmed_output_size(encoded: &EncodeResult) -> Result<u64, TranscodeError> {
    match fs::metadata(&encoded.output_path) {
        Ok(meta) if meta.len() > 0 => Ok(meta.len()),
        _ => Err(TranscodeError::MissingOutput(encoded.output_path.clone())),
    }
}
