use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure taxonomy shared by every pipeline phase
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The external tool could not be launched at all
    #[error("failed to launch {tool}: {source}")]
    ToolUnavailable {
        tool: String,
        #[source]
        source: io::Error,
    },

    /// The tool ran but its diagnostic output lacked an expected field
    #[error("could not parse {what} from {tool} output")]
    ParseFailure { tool: String, what: &'static str },

    /// The tool ran and reported failure
    #[error("{tool} exited with code {code}")]
    ToolExit { tool: String, code: i32 },

    #[error("failed to {action} {}: {source}", .path.display())]
    Filesystem {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("output file {} is missing or empty", .0.display())]
    MissingOutput(PathBuf),
}

impl TranscodeError {
    pub fn filesystem(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        TranscodeError::Filesystem {
            action,
            path: path.into(),
            source,
        }
    }

    /// Process exit code to surface for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            TranscodeError::ToolExit { code, .. } if *code != 0 => *code,
            _ => 1,
        }
    }
}

/// Remove a file, treating "not found" as success.
///
/// Returns `Ok(true)` when something was actually deleted.
pub fn remove_if_exists(path: &std::path::Path) -> Result<bool, TranscodeError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(TranscodeError::filesystem("remove", path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_uses_tool_code() {
        let err = TranscodeError::ToolExit {
            tool: "ffmpeg".to_string(),
            code: 187,
        };
        assert_eq!(err.exit_code(), 187);

        let err = TranscodeError::MissingOutput(PathBuf::from("/tmp/x.mp4"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_remove_if_exists_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.map");
        assert!(!remove_if_exists(&path).unwrap());

        std::fs::write(&path, b"x").unwrap();
        assert!(remove_if_exists(&path).unwrap());
        assert!(!path.exists());
    }
}
