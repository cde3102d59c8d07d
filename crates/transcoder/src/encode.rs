//! Encoder supervision.
//!
//! The encoder writes all of its diagnostic output into a temporary side-channel
//! file. A separate monitor task reads whatever was appended since the last poll,
//! so the encoder never blocks on a reader that is busy or asleep. The control
//! flow waits on the process and tells the monitor to stop through a oneshot
//! channel as soon as it exits.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use log::{debug, error, info, warn};
use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::time::sleep;
use crate::command::CommandBuilder;
use crate::config::TranscodeConfig;
use crate::error::TranscodeError;
use crate::job::{Phase, StatusReporter};
use crate::planner::EncodePlan;
use crate::progress::{latest_complete_record, EncodeProgress, ProgressTracker, StallDetector};
use crate::session::ArtifactPaths;
use crate::tools::tool_name;

/// Outcome of a successful encode
#[derive(Debug, Clone)]
pub struct EncodeResult {
    pub output_path: PathBuf,
    /// Last status text the encoder wrote
    pub final_status_text: String,
    pub last_progress: Option<EncodeProgress>,
}

/// What the monitor saw by the time it stopped
#[derive(Debug, Default)]
struct MonitorReport {
    last_progress: Option<EncodeProgress>,
    last_text: String,
}

pub struct EncodeSupervisor<'a> {
    cfg: &'a TranscodeConfig,
    reporter: StatusReporter,
}

impl<'a> EncodeSupervisor<'a> {
    pub fn new(cfg: &'a TranscodeConfig, reporter: StatusReporter) -> Self {
        Self { cfg, reporter }
    }

    /// Encode the working file into the output file following `plan`.
    ///
    /// On a failed encode the working file and its sidecar index are removed
    /// before the error is returned.
    pub async fn encode(&self, paths: &ArtifactPaths, plan: &EncodePlan) -> Result<EncodeResult, TranscodeError> {
        let args = CommandBuilder::new().build_encode_command(&paths.working, &paths.output, plan, self.cfg.encoder_threads);
        let tool = tool_name(&self.cfg.ffmpeg_bin);

        let side_channel = self.create_side_channel()?;
        debug!("Encoder status side channel: {}", side_channel.path().display());
        let (stdout, stderr) = side_channel_stdio(&side_channel)?;

        info!("🎬 Starting encode: {} -> {}", paths.working.display(), paths.output.display());
        debug!("Executing {}: {} {}", tool, self.cfg.ffmpeg_bin.display(), args.join(" "));
        self.reporter.report(Phase::Encoding, "Transcoding to mp4");

        // nothing may fail between spawn and wait, or the encoder would outlive the session
        let reader = File::open(side_channel.path())
            .await
            .map_err(|e| TranscodeError::filesystem("open status side channel", side_channel.path(), e))?;

        let mut child = Command::new(&self.cfg.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::ToolUnavailable {
                tool: tool.clone(),
                source,
            })?;
        let (done_tx, done_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor_progress(
            reader,
            done_rx,
            ProgressTracker::new(plan.timing),
            StallDetector::new(self.cfg.stall_polls),
            self.reporter.clone(),
            self.cfg.poll_interval(),
        ));

        let status = child.wait().await;
        // the monitor may already be gone if it panicked
        let _ = done_tx.send(());
        let report = match monitor.await {
            Ok(report) => report,
            Err(e) => {
                warn!("Progress monitor ended abnormally: {}", e);
                MonitorReport::default()
            }
        };

        let status = status.map_err(|source| TranscodeError::ToolUnavailable {
            tool: tool.clone(),
            source,
        })?;

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            error!("❌ Encoder exited with code {}: {}", code, report.last_text);
            if let Err(e) = paths.remove_working() {
                warn!("Could not clean up after failed encode: {}", e);
            }
            return Err(TranscodeError::ToolExit { tool, code });
        }

        if let Some(p) = report.last_progress {
            info!(
                "✅ Encode finished at frame {} ({:.1} fps, {:.2}x realtime)",
                p.frame_number, p.encoder_fps, p.realtime_factor
            );
        } else {
            info!("✅ Encode finished");
        }

        Ok(EncodeResult {
            output_path: paths.output.clone(),
            final_status_text: report.last_text,
            last_progress: report.last_progress,
        })
    }

    fn create_side_channel(&self) -> Result<NamedTempFile, TranscodeError> {
        let dir = self.cfg.status_dir.clone().unwrap_or_else(std::env::temp_dir);
        tempfile::Builder::new()
            .prefix("transcode-status-")
            .suffix(".log")
            .tempfile_in(&dir)
            .map_err(|e| TranscodeError::filesystem("create status side channel in", dir, e))
    }
}

/// Two handles on the side channel for the encoder's stdout and stderr
fn side_channel_stdio(side_channel: &NamedTempFile) -> Result<(Stdio, Stdio), TranscodeError> {
    let clone = |path: &Path| {
        side_channel
            .as_file()
            .try_clone()
            .map_err(|e| TranscodeError::filesystem("duplicate status side channel", path, e))
    };
    let stdout = clone(side_channel.path())?;
    let stderr = clone(side_channel.path())?;
    Ok((Stdio::from(stdout), Stdio::from(stderr)))
}

/// Poll the side channel until told to stop, then drain it one last time
async fn monitor_progress(
    mut reader: File,
    mut done: oneshot::Receiver<()>,
    mut tracker: ProgressTracker,
    mut stall: StallDetector,
    reporter: StatusReporter,
    poll: Duration,
) -> MonitorReport {
    let mut pending = String::new();
    let mut last_record = String::new();
    let mut last_text = String::new();
    let mut stopping = false;

    loop {
        if !stopping {
            tokio::select! {
                _ = &mut done => stopping = true,
                _ = sleep(poll) => {}
            }
        }

        let mut chunk = Vec::new();
        if let Err(e) = reader.read_to_end(&mut chunk).await {
            warn!("Failed to read encoder side channel: {}", e);
        }

        if chunk.is_empty() {
            if !stopping {
                if let Some(idle) = stall.idle() {
                    let silent_secs = poll.as_secs_f64() * f64::from(idle);
                    warn!("⚠️  No encoder output for {:.0} secs. Possible hang?", silent_secs);
                    reporter.report(
                        Phase::Encoding,
                        &format!("Read no lines of encoder output for {:.0} secs. Possible hang?", silent_secs),
                    );
                }
            }
        } else {
            stall.activity();
            pending.push_str(&String::from_utf8_lossy(&chunk));
            if let Some(segment) = last_segment(&pending) {
                last_text = segment.to_string();
            }
            let (record, tail) = latest_complete_record(&pending);
            if let Some(record) = record {
                last_record = record.to_string();
                observe(&mut tracker, &reporter, record);
            }
            pending = tail.to_string();
        }

        if stopping {
            break;
        }
    }

    // the encoder ends its final status line with a newline rather than a carriage return
    if !last_text.is_empty() && last_text != last_record {
        observe(&mut tracker, &reporter, &last_text);
    }

    MonitorReport {
        last_progress: tracker.current(),
        last_text,
    }
}

fn observe(tracker: &mut ProgressTracker, reporter: &StatusReporter, record: &str) {
    if let Some(p) = tracker.observe_record(record) {
        info!(
            "📊 {}% complete, frame {}, {:.1} fps ({:.2}x realtime), ETA {}s",
            p.percent_complete, p.frame_number, p.encoder_fps, p.realtime_factor, p.eta_seconds
        );
        reporter.report(Phase::Encoding, &p.comment());
    }
}

/// Last non-empty line or record in the text, terminated or not
fn last_segment(text: &str) -> Option<&str> {
    text.split(|c: char| c == '\r' || c == '\n')
        .map(str::trim)
        .rev()
        .find(|s| !s.is_empty())
}
