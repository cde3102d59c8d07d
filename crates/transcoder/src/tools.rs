use std::path::Path;
use std::process::Stdio;
use chrono::{DateTime, Utc};
use log::debug;
use tokio::process::Command;
use crate::error::TranscodeError;

/// Captured result of a short-lived external tool
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub tool: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into `ToolExit`
    pub fn check(self) -> Result<Self, TranscodeError> {
        if self.success() {
            Ok(self)
        } else {
            Err(TranscodeError::ToolExit {
                tool: self.tool,
                code: self.exit_code.unwrap_or(-1),
            })
        }
    }
}

/// Short display name for a tool binary
pub fn tool_name(bin: &Path) -> String {
    bin.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| bin.display().to_string())
}

/// Run an external tool to completion and capture both streams.
///
/// A non-zero exit is not an error here; callers decide with [`ToolOutput::check`].
pub async fn run_tool(bin: &Path, args: &[String]) -> Result<ToolOutput, TranscodeError> {
    let tool = tool_name(bin);
    debug!("Executing {}: {} {}", tool, bin.display(), args.join(" "));

    let output = Command::new(bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| TranscodeError::ToolUnavailable {
            tool: tool.clone(),
            source,
        })?;

    let result = ToolOutput {
        tool,
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };
    debug!(
        "{} exit code: {:?}, stdout length: {}, stderr length: {}",
        result.tool,
        result.exit_code,
        result.stdout.len(),
        result.stderr.len()
    );
    Ok(result)
}

/// Start time in the compact UTC form the recording tools expect
pub fn format_starttime(starttime: &DateTime<Utc>) -> String {
    starttime.format("%Y%m%d%H%M%S").to_string()
}

/// `--chanid <id> --starttime <YYYYMMDDHHMMSS>`
pub fn recording_args(chanid: u32, starttime: &DateTime<Utc>) -> Vec<String> {
    vec![
        "--chanid".to_string(),
        chanid.to_string(),
        "--starttime".to_string(),
        format_starttime(starttime),
    ]
}
