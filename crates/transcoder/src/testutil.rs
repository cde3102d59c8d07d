//! Fixtures shared by unit tests: stand-in tool scripts and a recording on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use anyhow::Result;
use chrono::{TimeZone, Utc};
use crate::config::TranscodeConfig;
use crate::job::{JobStatus, StatusReporter, StatusSink};
use crate::recording::Recording;

/// Write an executable `/bin/sh` script into `dir`
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Configuration pointing every tool at a script that succeeds silently
#[cfg(unix)]
pub fn test_config(dir: &Path) -> TranscodeConfig {
    let bin = dir.join("bin");
    fs::create_dir_all(&bin).unwrap();
    let mut cfg = TranscodeConfig::default_config();
    cfg.ffmpeg_bin = write_script(&bin, "ffmpeg", "exit 0");
    cfg.commflag_bin = write_script(&bin, "mythcommflag", "exit 0");
    cfg.util_bin = write_script(&bin, "mythutil", "exit 0");
    cfg.clipper_bin = write_script(&bin, "mythtranscode", "exit 0");
    cfg.job_state_dir = dir.join("jobs");
    cfg.recording_dir = dir.join("recordings");
    cfg.status_dir = Some(dir.to_path_buf());
    cfg.poll_interval_ms = 20;
    cfg
}

/// Recording whose media file exists in `dir` with `content`
pub fn recording_on_disk(dir: &Path, content: &[u8]) -> Recording {
    let basename = "1051_20160125200000.ts".to_string();
    fs::write(dir.join(&basename), content).unwrap();
    Recording {
        chanid: 1051,
        starttime: Utc.with_ymd_and_hms(2016, 1, 25, 20, 0, 0).unwrap(),
        dirname: dir.to_path_buf(),
        basename,
        filesize: content.len() as u64,
        commflagged: false,
        cutlist: false,
        bookmark: false,
        transcoded: false,
        markup: Vec::new(),
        seek: Vec::new(),
    }
}

/// Sink that keeps every update for assertions
#[derive(Default)]
pub struct CollectingSink {
    updates: Mutex<Vec<(JobStatus, String)>>,
}

impl CollectingSink {
    pub fn updates(&self) -> Vec<(JobStatus, String)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn has_comment(&self, needle: &str) -> bool {
        self.updates().iter().any(|(_, c)| c.contains(needle))
    }
}

impl StatusSink for CollectingSink {
    fn update(&self, status: JobStatus, comment: &str) -> Result<()> {
        self.updates.lock().unwrap().push((status, comment.to_string()));
        Ok(())
    }
}

pub fn collecting_reporter() -> (Arc<CollectingSink>, StatusReporter) {
    let sink = Arc::new(CollectingSink::default());
    (sink.clone(), StatusReporter::new(sink))
}
