//! Encoder status-line parsing and percent/ETA bookkeeping.
//!
//! The encoder writes one status record per update, terminated by a carriage
//! return. Only the newest complete record seen in each poll matters; older
//! ones are superseded before they are ever parsed.

use log::{debug, warn};
use crate::planner::SourceTiming;

/// The two leading fields of an encoder status line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressRecord {
    pub frame: u64,
    pub fps: f64,
}

/// Outcome of looking at one status record
#[derive(Debug, Clone, PartialEq)]
pub enum RecordParse {
    Progress(ProgressRecord),
    /// Looked like a status line but a numeric field did not parse
    Malformed(String),
    /// Not a status line at all
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeProgress {
    pub frame_number: u64,
    pub encoder_fps: f64,
    pub percent_complete: u8,
    pub eta_seconds: u64,
    pub realtime_factor: f64,
}

impl EncodeProgress {
    /// Status comment for the job tracker
    pub fn comment(&self) -> String {
        format!(
            "Transcoding to mp4 {}% complete ETA {} mins fps={:.1}.",
            self.percent_complete,
            self.eta_seconds / 60,
            self.encoder_fps
        )
    }
}

/// Collapse whitespace runs and drop spaces around `=`.
///
/// `frame=  120 fps= 29.5 q=28.0` becomes `frame=120 fps=29.5 q=28.0`.
pub fn normalize_record(record: &str) -> String {
    let collapsed = record.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.replace(" =", "=").replace("= ", "=")
}

pub fn parse_record(record: &str) -> RecordParse {
    let normalized = normalize_record(record);
    let mut fields = normalized.split(' ');

    let (frame_field, fps_field) = match (fields.next(), fields.next()) {
        (Some(f), Some(r)) if f.starts_with("frame=") && r.starts_with("fps=") => (f, r),
        _ => return RecordParse::Other,
    };

    let frame = frame_field["frame=".len()..].parse::<u64>();
    let fps = fps_field["fps=".len()..].parse::<f64>();

    match (frame, fps) {
        (Ok(frame), Ok(fps)) if fps.is_finite() && fps >= 0.0 => RecordParse::Progress(ProgressRecord { frame, fps }),
        _ => RecordParse::Malformed(normalized),
    }
}

/// Split accumulated side-channel text into the newest complete record and the
/// unterminated tail to carry into the next poll.
pub fn latest_complete_record(buffer: &str) -> (Option<&str>, &str) {
    let Some(last_cr) = buffer.rfind('\r') else {
        return (None, tail_after_newline(buffer));
    };
    let complete = &buffer[..last_cr];
    let start = complete.rfind(|c: char| c == '\r' || c == '\n').map(|i| i + 1).unwrap_or(0);
    let record = complete[start..].trim();
    let record = (!record.is_empty()).then_some(record);
    (record, tail_after_newline(&buffer[last_cr + 1..]))
}

/// Lines ending in `\n` are never status records, so only keep what follows the last one
fn tail_after_newline(text: &str) -> &str {
    match text.rfind('\n') {
        Some(i) => &text[i + 1..],
        None => text,
    }
}

/// Turns status records into progress values, enforcing monotonic percent and
/// deciding when an update is worth reporting.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    timing: Option<SourceTiming>,
    current: Option<EncodeProgress>,
    last_emitted: Option<EncodeProgress>,
}

impl ProgressTracker {
    pub fn new(timing: Option<SourceTiming>) -> Self {
        Self {
            timing,
            current: None,
            last_emitted: None,
        }
    }

    pub fn current(&self) -> Option<EncodeProgress> {
        self.current
    }

    /// Feed one raw record. Returns the new progress if it should be reported.
    pub fn observe_record(&mut self, record: &str) -> Option<EncodeProgress> {
        match parse_record(record) {
            RecordParse::Progress(r) => self.observe(r),
            RecordParse::Malformed(text) => {
                warn!("Encoder status parse failure, keeping last values: \"{}\"", text);
                None
            }
            RecordParse::Other => {
                debug!("Ignoring non-status encoder output: {}", record);
                None
            }
        }
    }

    pub fn observe(&mut self, record: ProgressRecord) -> Option<EncodeProgress> {
        let progress = self.compute(record);

        if let Some(current) = self.current {
            if progress.frame_number < current.frame_number || progress.percent_complete < current.percent_complete {
                debug!(
                    "Dropping out-of-order status: frame {} after frame {}",
                    progress.frame_number, current.frame_number
                );
                return None;
            }
        }
        self.current = Some(progress);

        let changed = match (self.last_emitted, self.timing) {
            (None, _) => true,
            (Some(last), Some(_)) => last.percent_complete != progress.percent_complete,
            // without a known length the percentage never moves, so report on frame movement
            (Some(last), None) => last.frame_number != progress.frame_number,
        };
        if changed {
            self.last_emitted = Some(progress);
            Some(progress)
        } else {
            None
        }
    }

    fn compute(&self, record: ProgressRecord) -> EncodeProgress {
        let frame = record.frame as f64;
        let (percent, eta, realtime) = match self.timing {
            Some(t) if t.total_frames() > 0.0 => {
                let total = t.total_frames();
                let percent = (100.0 * frame / total).clamp(0.0, 100.0) as u8;
                let eta = if record.fps > 0.0 {
                    ((total - frame).max(0.0) / record.fps) as u64
                } else {
                    0
                };
                (percent, eta, record.fps / t.frame_rate)
            }
            _ => (0, 0, 0.0),
        };

        EncodeProgress {
            frame_number: record.frame,
            encoder_fps: record.fps,
            percent_complete: percent,
            eta_seconds: eta,
            realtime_factor: realtime,
        }
    }
}

/// Counts consecutive polls that produced no encoder output
#[derive(Debug, Clone)]
pub struct StallDetector {
    threshold: u32,
    idle_polls: u32,
}

impl StallDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            idle_polls: 0,
        }
    }

    pub fn activity(&mut self) {
        self.idle_polls = 0;
    }

    /// Record a silent poll; returns the silent poll count once the threshold is reached
    pub fn idle(&mut self) -> Option<u32> {
        self.idle_polls += 1;
        (self.idle_polls >= self.threshold).then_some(self.idle_polls)
    }
}
