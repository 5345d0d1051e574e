use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::FinalizeError;

const SCOPE_PREFIX: &str = "geoguard-finalize-";

/// Directory holding the transient files of one finalize run.
///
/// [`ArtifactScope::close`] removes it; a scope dropped without being closed
/// is removed as well.
#[derive(Debug)]
pub struct ArtifactScope {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ArtifactScope {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the scope. Failures are logged, never returned.
    pub fn close(mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!(path = %path.display(), "artifact scope removed"),
                Err(err) => warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to remove artifact scope"
                ),
            }
        }
    }
}

impl Drop for ArtifactScope {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take()
            && let Err(err) = dir.close()
        {
            warn!(
                path = %self.path.display(),
                error = %err,
                "failed to remove dropped artifact scope"
            );
        }
    }
}

/// Hands out artifact scopes under an optional work directory (the system
/// temp directory otherwise).
#[derive(Debug, Clone, Default)]
pub struct CleanupManager {
    work_dir: Option<PathBuf>,
}

impl CleanupManager {
    pub fn new(work_dir: Option<PathBuf>) -> Self {
        Self { work_dir }
    }

    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    pub fn open_scope(&self) -> Result<ArtifactScope, FinalizeError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCOPE_PREFIX);

        let dir = match &self.work_dir {
            Some(base) => {
                std::fs::create_dir_all(base).map_err(|err| {
                    FinalizeError::Generation(format!(
                        "cannot create work dir {}: {err}",
                        base.display()
                    ))
                })?;
                builder.tempdir_in(base)
            }
            None => builder.tempdir(),
        }
        .map_err(|err| {
            FinalizeError::Generation(format!(
                "cannot create artifact scope: {err}"
            ))
        })?;

        let path = dir.path().to_path_buf();
        Ok(ArtifactScope {
            dir: Some(dir),
            path,
        })
    }

    pub fn release(&self, scope: ArtifactScope) {
        scope.close();
    }
}
