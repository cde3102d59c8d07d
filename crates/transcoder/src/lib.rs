pub mod config;
pub mod error;
pub mod tools;
pub mod probe;
pub mod planner;
pub mod progress;
pub mod command;
pub mod recording;
pub mod job;
pub mod session;
pub mod cutlist;
pub mod encode;
pub mod finalize;
pub mod pipeline;

#[cfg(test)]
mod testutil;

pub use config::{EncodingConfig, TranscodeConfig};
pub use error::TranscodeError;
pub use job::{Job, JobStatus, JobStore, Phase, StatusReporter, StatusSink};
pub use pipeline::Pipeline;
pub use recording::{Recording, RecordingRef, RecordingStore};
