use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use crate::tools::format_starttime;

/// How the caller identified the recording to transcode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingRef {
    /// Job tracker entry carrying the channel and start time
    Job(String),
    Channel { chanid: u32, starttime: DateTime<Utc> },
}

/// Parse a start time given on the command line and move it to UTC by adding
/// `tzoffset_hours`.
///
/// Accepts `YYYYMMDDHHMMSS`, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` or RFC 3339.
/// An RFC 3339 value already carries its zone, the offset is still applied on top.
pub fn parse_starttime(text: &str, tzoffset_hours: i32) -> Result<DateTime<Utc>> {
    let text = text.trim();
    let parsed = if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        dt.with_timezone(&Utc)
    } else {
        let naive = ["%Y%m%d%H%M%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
            .with_context(|| format!("Unrecognised start time: {}", text))?;
        naive.and_utc()
    };
    Ok(parsed + Duration::hours(i64::from(tzoffset_hours)))
}

/// Markup entry types, stored with the tracker's numeric codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum MarkupKind {
    CutEnd,
    CutStart,
    Bookmark,
    BlankFrame,
    CommStart,
    CommEnd,
    GopStart,
    KeyFrame,
    SceneChange,
    GopByFrame,
    VideoWidth,
    VideoHeight,
    VideoRate,
    DurationMs,
    TotalFrames,
}

impl MarkupKind {
    pub fn code(self) -> i32 {
        match self {
            MarkupKind::CutEnd => 0,
            MarkupKind::CutStart => 1,
            MarkupKind::Bookmark => 2,
            MarkupKind::BlankFrame => 3,
            MarkupKind::CommStart => 4,
            MarkupKind::CommEnd => 5,
            MarkupKind::GopStart => 6,
            MarkupKind::KeyFrame => 7,
            MarkupKind::SceneChange => 8,
            MarkupKind::GopByFrame => 9,
            MarkupKind::VideoWidth => 30,
            MarkupKind::VideoHeight => 31,
            MarkupKind::VideoRate => 32,
            MarkupKind::DurationMs => 33,
            MarkupKind::TotalFrames => 34,
        }
    }

    pub fn is_commercial(self) -> bool {
        matches!(self, MarkupKind::CommStart | MarkupKind::CommEnd)
    }
}

impl TryFrom<i32> for MarkupKind {
    type Error = String;

    fn try_from(code: i32) -> std::result::Result<Self, Self::Error> {
        Ok(match code {
            0 => MarkupKind::CutEnd,
            1 => MarkupKind::CutStart,
            2 => MarkupKind::Bookmark,
            3 => MarkupKind::BlankFrame,
            4 => MarkupKind::CommStart,
            5 => MarkupKind::CommEnd,
            6 => MarkupKind::GopStart,
            7 => MarkupKind::KeyFrame,
            8 => MarkupKind::SceneChange,
            9 => MarkupKind::GopByFrame,
            30 => MarkupKind::VideoWidth,
            31 => MarkupKind::VideoHeight,
            32 => MarkupKind::VideoRate,
            33 => MarkupKind::DurationMs,
            34 => MarkupKind::TotalFrames,
            other => return Err(format!("unknown markup type {}", other)),
        })
    }
}

impl From<MarkupKind> for i32 {
    fn from(kind: MarkupKind) -> i32 {
        kind.code()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Markup {
    pub kind: MarkupKind,
    /// Frame number the mark applies to
    pub mark: u64,
    /// Payload, e.g. milliseconds for a duration mark
    #[serde(default)]
    pub data: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekEntry {
    pub mark: u64,
    pub offset: u64,
    #[serde(rename = "type")]
    pub kind: i32,
}

/// A recorded programme and the metadata the transcode touches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub chanid: u32,
    pub starttime: DateTime<Utc>,
    /// Directory the media file lives in
    pub dirname: PathBuf,
    pub basename: String,
    pub filesize: u64,
    #[serde(default)]
    pub commflagged: bool,
    #[serde(default)]
    pub cutlist: bool,
    #[serde(default)]
    pub bookmark: bool,
    #[serde(default)]
    pub transcoded: bool,
    #[serde(default)]
    pub markup: Vec<Markup>,
    #[serde(default)]
    pub seek: Vec<SeekEntry>,
}

impl Recording {
    pub fn source_path(&self) -> PathBuf {
        self.dirname.join(&self.basename)
    }

    /// Drop commercial start/end marks and reset the bookmark and cutlist flags.
    /// Returns how many marks were removed.
    pub fn remove_commercial_marks(&mut self) -> usize {
        let before = self.markup.len();
        self.markup.retain(|m| !m.kind.is_commercial());
        self.bookmark = false;
        self.cutlist = false;
        before - self.markup.len()
    }

    /// Overwrite every duration mark that disagrees with `duration_ms`.
    /// Returns the number of marks corrected.
    pub fn correct_duration_marks(&mut self, duration_ms: u64) -> usize {
        let mut corrected = 0;
        for mark in self.markup.iter_mut().filter(|m| m.kind == MarkupKind::DurationMs) {
            if mark.data != Some(duration_ms) {
                info!("Correcting duration mark from {:?} ms to {} ms", mark.data, duration_ms);
                mark.data = Some(duration_ms);
                corrected += 1;
            }
        }
        corrected
    }
}

/// Recording records kept as one JSON file per recording
#[derive(Debug, Clone)]
pub struct RecordingStore {
    dir: PathBuf,
}

impl RecordingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn record_path(&self, chanid: u32, starttime: &DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("{}_{}.json", chanid, format_starttime(starttime)))
    }

    pub fn load(&self, chanid: u32, starttime: &DateTime<Utc>) -> Result<Recording> {
        let path = self.record_path(chanid, starttime);
        if !path.exists() {
            bail!("No recording found for chanid {} at {}", chanid, format_starttime(starttime));
        }
        load_json(&path)
    }

    pub fn save(&self, recording: &Recording) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create recording directory: {}", self.dir.display()))?;
        let path = self.record_path(recording.chanid, &recording.starttime);
        save_json(recording, &path)
    }
}

pub(crate) fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Write through a temporary file and rename so readers never see a half-written record
pub(crate) fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(value).context("Failed to serialize record")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(dir: &Path) -> Recording {
        Recording {
            chanid: 1051,
            starttime: Utc.with_ymd_and_hms(2016, 1, 25, 20, 0, 0).unwrap(),
            dirname: dir.to_path_buf(),
            basename: "1051_20160125200000.ts".to_string(),
            filesize: 4_000_000_000,
            commflagged: true,
            cutlist: true,
            bookmark: true,
            transcoded: false,
            markup: vec![
                Markup { kind: MarkupKind::CommStart, mark: 100, data: None },
                Markup { kind: MarkupKind::CommEnd, mark: 900, data: None },
                Markup { kind: MarkupKind::DurationMs, mark: 0, data: Some(1_800_040) },
                Markup { kind: MarkupKind::CutStart, mark: 100, data: None },
            ],
            seek: vec![SeekEntry { mark: 0, offset: 0, kind: 9 }],
        }
    }

    #[test]
    fn test_parse_starttime_formats() {
        let expected = Utc.with_ymd_and_hms(2016, 1, 25, 20, 0, 0).unwrap();
        assert_eq!(parse_starttime("20160125200000", 0).unwrap(), expected);
        assert_eq!(parse_starttime("2016-01-25 15:00:00", 5).unwrap(), expected);
        assert_eq!(parse_starttime("2016-01-25T20:00:00Z", 0).unwrap(), expected);
        assert!(parse_starttime("yesterday", 0).is_err());
    }

    #[test]
    fn test_remove_commercial_marks() {
        let mut rec = sample(Path::new("/rec"));
        assert_eq!(rec.remove_commercial_marks(), 2);
        assert!(rec.markup.iter().all(|m| !m.kind.is_commercial()));
        assert!(!rec.bookmark && !rec.cutlist);
        assert_eq!(rec.markup.len(), 2);
    }

    #[test]
    fn test_correct_duration_marks() {
        let mut rec = sample(Path::new("/rec"));
        assert_eq!(rec.correct_duration_marks(1_500_000), 1);
        assert_eq!(rec.correct_duration_marks(1_500_000), 0);
        let duration = rec.markup.iter().find(|m| m.kind == MarkupKind::DurationMs).unwrap();
        assert_eq!(duration.data, Some(1_500_000));
    }

    #[test]
    fn test_markup_codes_serialize_as_numbers() {
        let mark = Markup { kind: MarkupKind::DurationMs, mark: 0, data: Some(5) };
        let json = serde_json::to_string(&mark).unwrap();
        assert!(json.contains("\"kind\":33"));
        let back: Markup = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mark);
        assert!(serde_json::from_str::<Markup>(r#"{"kind":99,"mark":0}"#).is_err());
    }

    #[test]
    fn test_store_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordingStore::new(dir.path().join("recordings"));
        let rec = sample(dir.path());
        store.save(&rec).unwrap();

        let loaded = store.load(rec.chanid, &rec.starttime).unwrap();
        assert_eq!(loaded, rec);
        assert_eq!(loaded.source_path(), dir.path().join("1051_20160125200000.ts"));
        assert!(store.load(9999, &rec.starttime).is_err());
    }
}
