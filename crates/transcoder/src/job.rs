use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::recording::{load_json, save_json};

/// Job state as the external tracker understands it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Pending,
    Running,
    Stopping,
    Paused,
    Finished,
    Errored,
    Cancelled,
}

impl JobStatus {
    /// Numeric status code used by the job tracker
    pub fn code(self) -> u32 {
        match self {
            JobStatus::Queued => 1,
            JobStatus::Pending => 2,
            JobStatus::Running => 4,
            JobStatus::Stopping => 5,
            JobStatus::Paused => 6,
            JobStatus::Finished => 272,
            JobStatus::Errored => 304,
            JobStatus::Cancelled => 320,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Errored | JobStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    Transcode,
    CommFlag,
    UserJob,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub chanid: u32,
    pub starttime: DateTime<Utc>,
    pub status: JobStatus,
    #[serde(default)]
    pub comment: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(kind: JobKind, chanid: u32, starttime: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            chanid,
            starttime,
            status: JobStatus::Queued,
            comment: String::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_for(&self, chanid: u32, starttime: &DateTime<Utc>) -> bool {
        self.chanid == chanid && self.starttime == *starttime
    }

    /// Apply a status change, stamping start/finish times on the way
    pub fn set_status(&mut self, status: JobStatus, comment: impl Into<String>) {
        let now = Utc::now();
        if status == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if status.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = status;
        self.comment = comment.into();
    }
}

fn job_path(job_id: &str, state_dir: &Path) -> PathBuf {
    state_dir.join(format!("{}.json", job_id))
}

/// Load every job file in the state directory, skipping unreadable ones
pub fn load_all_jobs(state_dir: &Path) -> Result<Vec<Job>> {
    let mut jobs = Vec::new();
    if !state_dir.exists() {
        return Ok(jobs);
    }

    let entries = fs::read_dir(state_dir)
        .with_context(|| format!("Failed to read job state directory: {}", state_dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match load_json::<Job>(&path) {
            Ok(job) => jobs.push(job),
            Err(e) => warn!("Skipping unreadable job file {}: {:#}", path.display(), e),
        }
    }

    jobs.sort_by_key(|j| j.created_at);
    Ok(jobs)
}

pub fn load_job(job_id: &str, state_dir: &Path) -> Result<Job> {
    let path = job_path(job_id, state_dir);
    load_json(&path).with_context(|| format!("Failed to load job {}", job_id))
}

pub fn save_job(job: &Job, state_dir: &Path) -> Result<()> {
    fs::create_dir_all(state_dir)
        .with_context(|| format!("Failed to create job state directory: {}", state_dir.display()))?;
    save_json(job, &job_path(&job.id, state_dir))
}

/// Job queries and updates needed by the pipeline, backed by the job state directory
#[derive(Debug, Clone)]
pub struct JobStore {
    state_dir: PathBuf,
}

impl JobStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self { state_dir: state_dir.into() }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn load(&self, job_id: &str) -> Result<Job> {
        load_job(job_id, &self.state_dir)
    }

    pub fn save(&self, job: &Job) -> Result<()> {
        save_job(job, &self.state_dir)
    }

    /// Commercial flagging jobs for a recording, oldest first
    pub fn flagging_jobs(&self, chanid: u32, starttime: &DateTime<Utc>) -> Result<Vec<Job>> {
        Ok(load_all_jobs(&self.state_dir)?
            .into_iter()
            .filter(|j| j.kind == JobKind::CommFlag && j.is_for(chanid, starttime))
            .collect())
    }

    /// Ask a running job to stop, or cancel one that has not started
    pub fn cancel_job(&self, job: &mut Job, comment: &str) -> Result<()> {
        let status = if job.status == JobStatus::Running {
            JobStatus::Stopping
        } else {
            JobStatus::Cancelled
        };
        info!("Job {}: {:?} -> {:?}", job.id, job.status, status);
        job.set_status(status, comment);
        self.save(job)
    }

    pub fn sink_for(&self, job_id: &str) -> JobSink {
        JobSink {
            store: self.clone(),
            job_id: job_id.to_string(),
        }
    }
}

/// Receiver of status updates for the running transcode
pub trait StatusSink: Send + Sync {
    fn update(&self, status: JobStatus, comment: &str) -> Result<()>;
}

/// Persists status into the transcode job's state file
#[derive(Debug, Clone)]
pub struct JobSink {
    store: JobStore,
    job_id: String,
}

impl StatusSink for JobSink {
    fn update(&self, status: JobStatus, comment: &str) -> Result<()> {
        let mut job = self.store.load(&self.job_id)?;
        job.set_status(status, comment);
        self.store.save(&job)
    }
}

/// Used for manual runs that have no job to update
#[derive(Debug, Clone, Default)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn update(&self, status: JobStatus, comment: &str) -> Result<()> {
        info!("[{:?}] {}", status, comment);
        Ok(())
    }
}

/// Where the pipeline currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingCommFlag,
    CommFlagging,
    GeneratingCutlist,
    Clipping,
    CopyingThrough,
    Probing,
    Encoding,
    Finalizing,
    RebuildingSeektable,
    Completed,
    Failed,
}

impl Phase {
    pub fn status(self) -> JobStatus {
        match self {
            Phase::AwaitingCommFlag => JobStatus::Paused,
            Phase::Completed => JobStatus::Finished,
            Phase::Failed => JobStatus::Errored,
            _ => JobStatus::Running,
        }
    }
}

/// Shared handle for reporting progress; sink failures are logged, never propagated
#[derive(Clone)]
pub struct StatusReporter {
    sink: Arc<dyn StatusSink>,
}

impl StatusReporter {
    pub fn new(sink: Arc<dyn StatusSink>) -> Self {
        Self { sink }
    }

    pub fn log_only() -> Self {
        Self::new(Arc::new(LogSink))
    }

    pub fn report(&self, phase: Phase, comment: &str) {
        let status = phase.status();
        debug!("Status {:?} ({}) for {:?}: {}", status, status.code(), phase, comment);
        if let Err(e) = self.sink.update(status, comment) {
            warn!("⚠️  Failed to update job status to {:?}: {:#}", status, e);
        }
    }
}

impl std::fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReporter").finish_non_exhaustive()
    }
}
