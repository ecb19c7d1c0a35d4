/// Archive post-processing.
///
/// Unpacks a downloaded archive with the external extraction tool and then
/// removes the archive, leaving only its contents in the category directory.
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

use storegame_shared::errors::ExtractError;

/// Runs the archive extraction tool (`7z` by default).
#[derive(Debug, Clone)]
pub struct Extractor {
    program: String,
}

impl Extractor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for a multithreaded, non-interactive, overwriting extract.
    pub fn args(archive: &Path, dest_dir: &Path) -> Vec<String> {
        vec![
            "x".to_string(),
            archive.to_string_lossy().to_string(),
            format!("-o{}", dest_dir.to_string_lossy()),
            "-mmt=on".to_string(),
            "-y".to_string(),
        ]
    }

    /// Extract `archive` into `dest_dir`, deleting the archive on success.
    ///
    /// On failure the archive is left where it is.
    pub async fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<(), ExtractError> {
        info!("Extracting {:?} into {:?}", archive, dest_dir);

        let output = Command::new(&self.program)
            .args(Self::args(archive, dest_dir))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExtractError::SpawnFailed {
                program: self.program.clone(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "Extraction of {:?} failed ({}): {}",
                archive,
                output.status,
                stderr.trim()
            );
            return Err(ExtractError::Exited(output.status.code()));
        }
        debug!(target: "transfer_tool", "{}", String::from_utf8_lossy(&output.stdout).trim());

        // Removal failure does not fail the extraction.
        if let Err(e) = tokio::fs::remove_file(archive).await {
            warn!("Extracted {:?} but could not remove it: {}", archive, e);
        }

        info!("Extracted {:?}", archive);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_args() {
        let args = Extractor::args(
            &PathBuf::from("/roms/NES/Game (USA).zip"),
            &PathBuf::from("/roms/NES"),
        );
        assert_eq!(args, vec!["x", "/roms/NES/Game (USA).zip", "-o/roms/NES", "-mmt=on", "-y"]);
    }

    #[tokio::test]
    async fn test_missing_tool_keeps_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Game.zip");
        std::fs::write(&archive, b"zip").unwrap();

        let extractor = Extractor::new("storegame-no-such-7z");
        let err = extractor.extract(&archive, dir.path()).await.unwrap_err();
        assert!(matches!(err, ExtractError::SpawnFailed { .. }));
        assert!(archive.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_decides_removal() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Game.zip");

        std::fs::write(&archive, b"zip").unwrap();
        let err = Extractor::new("false").extract(&archive, dir.path()).await.unwrap_err();
        assert!(matches!(err, ExtractError::Exited(Some(1))));
        assert!(archive.exists());

        Extractor::new("true").extract(&archive, dir.path()).await.unwrap();
        assert!(!archive.exists());
    }
}
