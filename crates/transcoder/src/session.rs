use std::fs;
use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use walkdir::WalkDir;
use crate::cutlist::CutlistOutcome;
use crate::error::{remove_if_exists, TranscodeError};
use crate::planner::EncodePlan;

/// Files derived from a recording's media file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub source: PathBuf,
    /// Clipped (or copied) input for the encoder, `<base>.tmp`
    pub working: PathBuf,
    /// Encoder output, `<base>.mp4`
    pub output: PathBuf,
    /// Index the clipper may leave next to the working file, `<base>.tmp.map`
    pub sidecar_index: PathBuf,
}

impl ArtifactPaths {
    pub fn for_source(source: &Path) -> Self {
        let working = source.with_extension("tmp");
        let mut sidecar_index = working.clone().into_os_string();
        sidecar_index.push(".map");

        Self {
            source: source.to_path_buf(),
            working,
            output: source.with_extension("mp4"),
            sidecar_index: PathBuf::from(sidecar_index),
        }
    }

    /// Preview thumbnails named `<source>*.png` in the source's directory
    pub fn thumbnails(&self) -> Vec<PathBuf> {
        let Some(prefix) = self.source.file_name().and_then(|n| n.to_str()) else {
            return Vec::new();
        };
        let dir = match self.source.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| name.starts_with(prefix) && name.ends_with(".png"))
                    .unwrap_or(false)
            })
            .map(|entry| entry.into_path())
            .collect()
    }

    /// Remove the working file and its index, ignoring files that are already gone
    pub fn remove_working(&self) -> Result<(), TranscodeError> {
        if remove_if_exists(&self.working)? {
            debug!("Removed working file {}", self.working.display());
        }
        if let Err(e) = remove_if_exists(&self.sidecar_index) {
            warn!("Could not remove sidecar index: {}", e);
        }
        Ok(())
    }
}

/// State of one transcode run.
///
/// Dropping the session cleans up the working file and sidecar index. An output
/// is only removed while the source still exists and the recording has not been
/// switched over to it, so the last copy of the recording is never lost to cleanup.
#[derive(Debug)]
pub struct TranscodeSession {
    pub paths: ArtifactPaths,
    pub input_bytes: u64,
    /// Size of the working file handed to the encoder
    pub working_bytes: u64,
    /// Bytes removed by clipping, zero when copied through
    pub clipped_bytes: u64,
    pub output_bytes: u64,
    pub cutlist: Option<CutlistOutcome>,
    pub plan: Option<EncodePlan>,
    committed: bool,
}

impl TranscodeSession {
    /// Start a session for an existing source file
    pub fn new(source: &Path) -> Result<Self, TranscodeError> {
        let input_bytes = fs::metadata(source)
            .map_err(|e| TranscodeError::filesystem("stat source", source, e))?
            .len();
        let paths = ArtifactPaths::for_source(source);
        if paths.working == paths.source || paths.output == paths.source {
            return Err(TranscodeError::filesystem(
                "derive artifact paths from",
                source,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "source already has a .tmp or .mp4 extension"),
            ));
        }

        info!("📁 Session for {} ({} bytes)", source.display(), input_bytes);
        Ok(Self {
            paths,
            input_bytes,
            working_bytes: 0,
            clipped_bytes: 0,
            output_bytes: 0,
            cutlist: None,
            plan: None,
            committed: false,
        })
    }

    pub fn record_cutlist(&mut self, outcome: CutlistOutcome) {
        match outcome {
            CutlistOutcome::Clipped { clipped_size } => {
                self.working_bytes = clipped_size;
                self.clipped_bytes = self.input_bytes.saturating_sub(clipped_size);
            }
            CutlistOutcome::CopiedThrough => {
                self.working_bytes = self.input_bytes;
                self.clipped_bytes = 0;
            }
        }
        self.cutlist = Some(outcome);
    }

    /// The recording now points at the output; cleanup must leave it alone
    pub fn commit(&mut self) {
        self.committed = true;
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Share of the input removed by clipping, 0.0 to 100.0
    pub fn clip_percent(&self) -> f64 {
        if self.input_bytes == 0 {
            return 0.0;
        }
        100.0 * self.clipped_bytes as f64 / self.input_bytes as f64
    }
}

impl Drop for TranscodeSession {
    fn drop(&mut self) {
        if let Err(e) = self.paths.remove_working() {
            warn!("Session cleanup: {}", e);
        }
        if !self.committed && self.paths.source.exists() {
            match remove_if_exists(&self.paths.output) {
                Ok(true) => info!("🗑️  Removed partial output {}", self.paths.output.display()),
                Ok(false) => {}
                Err(e) => warn!("Session cleanup: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_paths() {
        let paths = ArtifactPaths::for_source(Path::new("/rec/1051_20160125200000.ts"));
        assert_eq!(paths.working, PathBuf::from("/rec/1051_20160125200000.tmp"));
        assert_eq!(paths.output, PathBuf::from("/rec/1051_20160125200000.mp4"));
        assert_eq!(paths.sidecar_index, PathBuf::from("/rec/1051_20160125200000.tmp.map"));
    }

    #[test]
    fn test_thumbnails_match_source_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("1051_20160125200000.ts");
        for name in [
            "1051_20160125200000.ts",
            "1051_20160125200000.ts.png",
            "1051_20160125200000.ts.-1.100x75.png",
            "1021_20160125190000.ts.png",
            "1051_20160125200000.ts.txt",
        ] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let mut thumbs = ArtifactPaths::for_source(&source).thumbnails();
        thumbs.sort();
        assert_eq!(
            thumbs,
            vec![
                dir.path().join("1051_20160125200000.ts.-1.100x75.png"),
                dir.path().join("1051_20160125200000.ts.png"),
            ]
        );
    }

    #[test]
    fn test_missing_source_is_filesystem_error() {
        let err = TranscodeSession::new(Path::new("/nonexistent/1.ts")).unwrap_err();
        assert!(matches!(err, TranscodeError::Filesystem { .. }));
    }

    #[test]
    fn test_source_aliasing_output_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("rec.mp4");
        fs::write(&source, b"x").unwrap();
        assert!(TranscodeSession::new(&source).is_err());
        assert!(source.exists());
    }

    #[test]
    fn test_clip_accounting() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("rec.ts");
        fs::write(&source, vec![0u8; 1000]).unwrap();

        let mut session = TranscodeSession::new(&source).unwrap();
        session.record_cutlist(CutlistOutcome::Clipped { clipped_size: 750 });
        assert_eq!(session.clipped_bytes, 250);
        assert_eq!(session.clip_percent(), 25.0);

        session.record_cutlist(CutlistOutcome::CopiedThrough);
        assert_eq!(session.clipped_bytes, 0);
        assert_eq!(session.working_bytes, 1000);
        assert_eq!(session.clip_percent(), 0.0);
    }

    #[test]
    fn test_drop_keeps_source_and_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("rec.ts");
        fs::write(&source, b"source").unwrap();

        let session = TranscodeSession::new(&source).unwrap();
        fs::write(&session.paths.working, b"working").unwrap();
        fs::write(&session.paths.output, b"partial").unwrap();
        let paths = session.paths.clone();
        drop(session);

        assert!(source.exists());
        assert!(!paths.working.exists());
        assert!(!paths.output.exists());
    }

    #[test]
    fn test_drop_keeps_committed_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("rec.ts");
        fs::write(&source, b"source").unwrap();

        let mut session = TranscodeSession::new(&source).unwrap();
        fs::write(&session.paths.output, b"final").unwrap();
        session.commit();
        let output = session.paths.output.clone();
        drop(session);

        assert!(output.exists());
        assert!(source.exists());
    }

    #[test]
    fn test_drop_keeps_output_once_source_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("rec.ts");
        fs::write(&source, b"source").unwrap();

        let session = TranscodeSession::new(&source).unwrap();
        fs::write(&session.paths.output, b"final").unwrap();
        fs::remove_file(&source).unwrap();
        let output = session.paths.output.clone();
        drop(session);

        assert!(output.exists());
    }
}
