use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use crate::config::TranscodeConfig;
use crate::cutlist::CutlistStage;
use crate::encode::EncodeSupervisor;
use crate::error::TranscodeError;
use crate::finalize::{FinalStats, Finalizer};
use crate::job::{JobStore, Phase, StatusReporter};
use crate::planner;
use crate::probe::{self, MediaProbe};
use crate::recording::{RecordingRef, RecordingStore};
use crate::session::TranscodeSession;
use crate::tools::format_starttime;

/// Runs the phases for one recording in order: cutlist, probe, plan, encode, finalize
pub struct Pipeline<'a> {
    cfg: &'a TranscodeConfig,
    jobs: JobStore,
    recordings: RecordingStore,
    reporter: StatusReporter,
}

impl<'a> Pipeline<'a> {
    pub fn new(cfg: &'a TranscodeConfig, reporter: StatusReporter) -> Self {
        Self {
            cfg,
            jobs: JobStore::new(&cfg.job_state_dir),
            recordings: RecordingStore::new(&cfg.recording_dir),
            reporter,
        }
    }

    /// Channel and UTC start time of the referenced recording
    pub fn resolve(&self, recording: &RecordingRef) -> Result<(u32, DateTime<Utc>)> {
        match recording {
            RecordingRef::Job(job_id) => {
                let job = self.jobs.load(job_id)?;
                Ok((job.chanid, job.starttime))
            }
            RecordingRef::Channel { chanid, starttime } => Ok((*chanid, *starttime)),
        }
    }

    /// Transcode the recording. Any failure is reported to the status sink before
    /// it is returned, after the session has cleaned up its temporary files.
    pub async fn run(&self, recording: &RecordingRef) -> Result<FinalStats> {
        let result = self.run_inner(recording).await;
        if let Err(e) = &result {
            error!("❌ Transcode failed: {:#}", e);
            self.reporter.report(Phase::Failed, &format!("{:#}", e));
        }
        result
    }

    async fn run_inner(&self, recording_ref: &RecordingRef) -> Result<FinalStats> {
        let (chanid, starttime) = self.resolve(recording_ref)?;
        info!("🚀 Transcoding chanid {} starttime {}", chanid, format_starttime(&starttime));

        let mut recording = self.recordings.load(chanid, &starttime)?;
        let mut session = TranscodeSession::new(&recording.source_path())?;

        CutlistStage::new(self.cfg, &self.jobs, &self.reporter)
            .run(&mut recording, &mut session)
            .await?;

        let probe = self.probe_working(&session).await?;
        let plan = planner::plan(session.working_bytes, probe.as_ref(), &self.cfg.encoding);
        session.plan = Some(plan.clone());

        let encoded = EncodeSupervisor::new(self.cfg, self.reporter.clone())
            .encode(&session.paths, &plan)
            .await
            .context("Transcoding to mp4 failed")?;

        Finalizer::new(self.cfg, &self.recordings, &self.reporter)
            .finalize(&mut recording, &mut session, &encoded)
            .await
    }

    /// Probe the working file. Only a missing tool is fatal; anything else means
    /// the plan falls back to constant rate factor encoding.
    async fn probe_working(&self, session: &TranscodeSession) -> Result<Option<MediaProbe>> {
        self.reporter.report(
            Phase::Probing,
            "Estimating bitrate; detecting frames per second, and resolution.",
        );
        match probe::probe(&self.cfg.ffmpeg_bin, &session.paths.working).await {
            Ok(probe) => Ok(Some(probe)),
            Err(e @ TranscodeError::ToolUnavailable { .. }) => Err(e.into()),
            Err(e) => {
                warn!("⚠️  Probe of {} failed, bitrate estimation unavailable: {}", session.paths.working.display(), e);
                Ok(None)
            }
        }
    }
}

