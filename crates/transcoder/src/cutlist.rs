//! Commercial removal ahead of the encode.
//!
//! `AwaitingCommFlag → GeneratingCutlist → Clipping → {Clipped | CopiedThrough}`.
//! A failed cutlist generation ends the run; a failed clip falls back to a plain
//! copy of the source so the recording still gets transcoded.

use std::path::Path;
use std::time::Duration;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio::time::sleep;
use crate::config::TranscodeConfig;
use crate::error::{remove_if_exists, TranscodeError};
use crate::job::{JobStatus, JobStore, Phase, StatusReporter};
use crate::recording::Recording;
use crate::session::TranscodeSession;
use crate::tools::{recording_args, run_tool};

/// Stages of commercial removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutlistState {
    AwaitingCommFlag,
    GeneratingCutlist,
    Clipping,
    Clipped,
    CopiedThrough,
}

/// How the working file was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutlistOutcome {
    Clipped { clipped_size: u64 },
    CopiedThrough,
}

impl CutlistOutcome {
    pub fn state(&self) -> CutlistState {
        match self {
            CutlistOutcome::Clipped { .. } => CutlistState::Clipped,
            CutlistOutcome::CopiedThrough => CutlistState::CopiedThrough,
        }
    }
}

/// Runs the commercial removal stages for one recording
pub struct CutlistStage<'a> {
    cfg: &'a TranscodeConfig,
    jobs: &'a JobStore,
    reporter: &'a StatusReporter,
    state: CutlistState,
}

impl<'a> CutlistStage<'a> {
    pub fn new(cfg: &'a TranscodeConfig, jobs: &'a JobStore, reporter: &'a StatusReporter) -> Self {
        Self {
            cfg,
            jobs,
            reporter,
            state: CutlistState::AwaitingCommFlag,
        }
    }

    pub fn state(&self) -> CutlistState {
        self.state
    }

    /// Produce the session's working file, clipping commercials where possible
    pub async fn run(&mut self, recording: &mut Recording, session: &mut TranscodeSession) -> Result<CutlistOutcome> {
        self.await_commflag(recording).await?;

        if self.cfg.generate_cutlist {
            self.state = CutlistState::GeneratingCutlist;
            self.generate_cutlist(recording).await?;
        }

        let outcome = if self.cfg.generate_cutlist || recording.cutlist {
            self.state = CutlistState::Clipping;
            self.clip(recording, session).await?
        } else {
            info!("No cutlist to apply, copying source to working file");
            self.reporter.report(Phase::CopyingThrough, "Creating temporary file for transcoding.");
            copy_through(session).await?
        };

        self.state = outcome.state();
        session.record_cutlist(outcome);
        info!(
            "✂️  Working file ready: {} bytes ({:.1}% clipped)",
            session.working_bytes,
            session.clip_percent()
        );
        Ok(outcome)
    }

    async fn await_commflag(&self, recording: &Recording) -> Result<()> {
        let poll = self.cfg.poll_interval();

        if recording.commflagged {
            debug!("Recording already scanned for commercials");
            let mut waited = Duration::ZERO;
            while self.flagging_running(recording)? {
                waited += poll;
                let comment = format!(
                    "Waited {} secs for the commercial flagging job currently running on this recording to complete.",
                    waited.as_secs()
                );
                info!("⏳ {}", comment);
                self.reporter.report(Phase::AwaitingCommFlag, &comment);
                sleep(poll).await;
            }
            return Ok(());
        }

        if !self.cfg.require_commflagged {
            debug!("Recording not scanned for commercials, flagging not required");
            return Ok(());
        }

        self.reporter.report(
            Phase::CommFlagging,
            "Required commercial flagging for this file is not found. Flagging commercials and cancelling any queued commercial flagging.",
        );
        for mut job in self.jobs.flagging_jobs(recording.chanid, &recording.starttime)? {
            if job.status.is_terminal() {
                continue;
            }
            self.jobs.cancel_job(
                &mut job,
                "A user transcode job ran commercial flagging for this recording and cancelled this job.",
            )?;
        }

        info!("🔍 Flagging commercials for chanid {}", recording.chanid);
        let output = run_tool(&self.cfg.commflag_bin, &recording_args(recording.chanid, &recording.starttime)).await?;
        // the flagger is known to exit non-zero after a successful scan
        if !output.success() {
            warn!("{} exited with {:?}, continuing", output.tool, output.exit_code);
        }
        Ok(())
    }

    fn flagging_running(&self, recording: &Recording) -> Result<bool> {
        Ok(self
            .jobs
            .flagging_jobs(recording.chanid, &recording.starttime)?
            .iter()
            .any(|j| j.status == JobStatus::Running))
    }

    async fn generate_cutlist(&self, recording: &Recording) -> Result<()> {
        self.reporter.report(Phase::GeneratingCutlist, "Generating Cutlist for commercial removal");

        let mut args = vec!["--gencutlist".to_string()];
        args.extend(recording_args(recording.chanid, &recording.starttime));

        let output = run_tool(&self.cfg.util_bin, &args)
            .await
            .context("Generation of commercial Cutlist failed")?;
        if !output.success() {
            warn!("{} --gencutlist failed:\n{}", output.tool, output.stderr);
        }
        output.check().context("Generation of commercial Cutlist failed")?;
        Ok(())
    }

    async fn clip(&self, recording: &mut Recording, session: &TranscodeSession) -> Result<CutlistOutcome> {
        self.reporter.report(Phase::Clipping, "Removing Cutlist");

        let working = &session.paths.working;
        let mut args = recording_args(recording.chanid, &recording.starttime);
        args.extend([
            "--mpeg2".to_string(),
            "--honorcutlist".to_string(),
            "-o".to_string(),
            working.to_string_lossy().to_string(),
        ]);

        let output = run_tool(&self.cfg.clipper_bin, &args).await?;
        let clipped = match output.check() {
            Ok(_) => clipped_size(working),
            Err(e) => Err(e),
        };

        match clipped {
            Ok(clipped_size) => {
                recording.commflagged = false;
                Ok(CutlistOutcome::Clipped { clipped_size })
            }
            Err(e) => {
                warn!("⚠️  Clipping failed ({}), copying source instead", e);
                self.reporter.report(Phase::CopyingThrough, "Removing Cutlist failed. Copying file instead.");
                copy_through(session).await
            }
        }
    }
}

fn clipped_size(working: &Path) -> Result<u64, TranscodeError> {
    match std::fs::metadata(working) {
        Ok(meta) if meta.len() > 0 => Ok(meta.len()),
        Ok(_) => Err(TranscodeError::MissingOutput(working.to_path_buf())),
        Err(e) => Err(TranscodeError::filesystem("stat clipped file", working, e)),
    }
}

/// Verbatim copy of the source into the working file
async fn copy_through(session: &TranscodeSession) -> Result<CutlistOutcome> {
    let paths = &session.paths;
    remove_if_exists(&paths.sidecar_index)?;
    tokio::fs::copy(&paths.source, &paths.working)
        .await
        .map_err(|e| TranscodeError::filesystem("copy source to working file", &paths.source, e))?;
    Ok(CutlistOutcome::CopiedThrough)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use crate::job::{Job, JobKind};
    use crate::testutil::{collecting_reporter, recording_on_disk, test_config, write_script};

    const CLIP_TO_WORKING: &str =
        "while [ $# -gt 0 ]; do if [ \"$1\" = \"-o\" ]; then shift; printf 'clipped' > \"$1\"; fi; shift; done";

    #[tokio::test]
    async fn test_clipper_failure_copies_through() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.clipper_bin = write_script(dir.path(), "clipper-fails", "echo 'cutlist error' >&2; exit 3");
        let jobs = JobStore::new(&cfg.job_state_dir);
        let (sink, reporter) = collecting_reporter();
        let mut rec = recording_on_disk(dir.path(), b"original mpeg2 payload");
        let mut session = TranscodeSession::new(&rec.source_path()).unwrap();

        let mut stage = CutlistStage::new(&cfg, &jobs, &reporter);
        let outcome = stage.run(&mut rec, &mut session).await.unwrap();

        assert_eq!(outcome, CutlistOutcome::CopiedThrough);
        assert_eq!(stage.state(), CutlistState::CopiedThrough);
        assert_eq!(fs::read(&session.paths.working).unwrap(), b"original mpeg2 payload");
        assert_eq!(session.clipped_bytes, 0);
        assert_eq!(session.clip_percent(), 0.0);
        assert!(sink.has_comment("Removing Cutlist failed. Copying file instead."));
        assert!(sink.updates().iter().all(|(s, _)| *s == JobStatus::Running));
    }

    #[tokio::test]
    async fn test_successful_clip() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.clipper_bin = write_script(dir.path(), "clipper", CLIP_TO_WORKING);
        let jobs = JobStore::new(&cfg.job_state_dir);
        let (sink, reporter) = collecting_reporter();
        let mut rec = recording_on_disk(dir.path(), &[7u8; 100]);
        rec.commflagged = true;
        let mut session = TranscodeSession::new(&rec.source_path()).unwrap();

        let outcome = CutlistStage::new(&cfg, &jobs, &reporter)
            .run(&mut rec, &mut session)
            .await
            .unwrap();

        assert_eq!(outcome, CutlistOutcome::Clipped { clipped_size: 7 });
        assert_eq!(session.clipped_bytes, 93);
        assert!(!rec.commflagged);
        assert!(sink.has_comment("Generating Cutlist for commercial removal"));
        assert!(sink.has_comment("Removing Cutlist"));
    }

    #[tokio::test]
    async fn test_cutlist_generation_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.util_bin = write_script(dir.path(), "mythutil-fails", "exit 2");
        let jobs = JobStore::new(&cfg.job_state_dir);
        let (_sink, reporter) = collecting_reporter();
        let mut rec = recording_on_disk(dir.path(), b"payload");
        let mut session = TranscodeSession::new(&rec.source_path()).unwrap();

        let err = CutlistStage::new(&cfg, &jobs, &reporter)
            .run(&mut rec, &mut session)
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("Generation of commercial Cutlist failed"));
        assert!(matches!(
            err.downcast_ref::<TranscodeError>(),
            Some(TranscodeError::ToolExit { code: 2, .. })
        ));
        assert!(!session.paths.working.exists());
    }

    #[tokio::test]
    async fn test_missing_clipper_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.clipper_bin = dir.path().join("no-such-clipper");
        let jobs = JobStore::new(&cfg.job_state_dir);
        let (_sink, reporter) = collecting_reporter();
        let mut rec = recording_on_disk(dir.path(), b"payload");
        let mut session = TranscodeSession::new(&rec.source_path()).unwrap();

        let err = CutlistStage::new(&cfg, &jobs, &reporter)
            .run(&mut rec, &mut session)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TranscodeError>(),
            Some(TranscodeError::ToolUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_cutlist_creates_working_copy() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.generate_cutlist = false;
        let jobs = JobStore::new(&cfg.job_state_dir);
        let (sink, reporter) = collecting_reporter();
        let mut rec = recording_on_disk(dir.path(), b"payload");
        let mut session = TranscodeSession::new(&rec.source_path()).unwrap();

        let outcome = CutlistStage::new(&cfg, &jobs, &reporter)
            .run(&mut rec, &mut session)
            .await
            .unwrap();
        assert_eq!(outcome, CutlistOutcome::CopiedThrough);
        assert!(sink.has_comment("Creating temporary file for transcoding."));
        assert_eq!(fs::read(&session.paths.working).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_required_flagging_cancels_queued_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.require_commflagged = true;
        cfg.generate_cutlist = false;
        let marker = dir.path().join("flagged");
        cfg.commflag_bin = write_script(
            dir.path(),
            "flagger",
            &format!("touch {}; exit 141", marker.display()),
        );
        let jobs = JobStore::new(&cfg.job_state_dir);
        let (_sink, reporter) = collecting_reporter();
        let mut rec = recording_on_disk(dir.path(), b"payload");
        let queued = Job::new(JobKind::CommFlag, rec.chanid, rec.starttime);
        jobs.save(&queued).unwrap();
        let mut session = TranscodeSession::new(&rec.source_path()).unwrap();

        CutlistStage::new(&cfg, &jobs, &reporter)
            .run(&mut rec, &mut session)
            .await
            .unwrap();

        assert!(marker.exists());
        assert_eq!(jobs.load(&queued.id).unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_waits_for_running_flag_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.generate_cutlist = false;
        let jobs = JobStore::new(&cfg.job_state_dir);
        let (sink, reporter) = collecting_reporter();
        let mut rec = recording_on_disk(dir.path(), b"payload");
        rec.commflagged = true;

        let mut flagging = Job::new(JobKind::CommFlag, rec.chanid, rec.starttime);
        flagging.set_status(JobStatus::Running, "flagging");
        jobs.save(&flagging).unwrap();

        let finisher = {
            let jobs = jobs.clone();
            let mut flagging = flagging.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                flagging.set_status(JobStatus::Finished, "done");
                jobs.save(&flagging).unwrap();
            })
        };

        let mut session = TranscodeSession::new(&rec.source_path()).unwrap();
        CutlistStage::new(&cfg, &jobs, &reporter)
            .run(&mut rec, &mut session)
            .await
            .unwrap();
        finisher.await.unwrap();

        let updates = sink.updates();
        assert!(updates.iter().any(|(s, c)| *s == JobStatus::Paused && c.starts_with("Waited ")));
    }

    #[tokio::test]
    async fn test_wait_comment_accumulates_sub_second_polls() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.generate_cutlist = false;
        cfg.poll_interval_ms = 400;
        let jobs = JobStore::new(&cfg.job_state_dir);
        let (sink, reporter) = collecting_reporter();
        let mut rec = recording_on_disk(dir.path(), b"payload");
        rec.commflagged = true;

        let mut flagging = Job::new(JobKind::CommFlag, rec.chanid, rec.starttime);
        flagging.set_status(JobStatus::Running, "flagging");
        jobs.save(&flagging).unwrap();

        let finisher = {
            let jobs = jobs.clone();
            let mut flagging = flagging.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1100)).await;
                flagging.set_status(JobStatus::Finished, "done");
                jobs.save(&flagging).unwrap();
            })
        };

        let mut session = TranscodeSession::new(&rec.source_path()).unwrap();
        CutlistStage::new(&cfg, &jobs, &reporter)
            .run(&mut rec, &mut session)
            .await
            .unwrap();
        finisher.await.unwrap();

        // 400ms polls: 0.4s and 0.8s round down, the third poll reaches 1.2s
        assert!(sink.has_comment("Waited 0 secs"));
        assert!(sink.has_comment("Waited 1 secs"));
    }
}
