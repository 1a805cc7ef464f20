//! Writing artifacts to the destination folder.

use crate::models::OutputArtifact;
use crate::utils::ensure_writable_dir;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, instrument};

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("destination {path} is not a writable directory: {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Create `dest` if needed and check it can be written to.
pub async fn prepare_destination(dest: &Path) -> Result<(), WriteError> {
    ensure_writable_dir(dest).await.map_err(|source| {
        error!(path = %dest.display(), error = %source, "Destination folder is not usable");
        WriteError::Destination {
            path: dest.to_path_buf(),
            source,
        }
    })
}

/// Write `artifact`, replacing any existing file at its path.
#[instrument(level = "debug", skip_all, fields(path = %artifact.path.display()))]
pub async fn write_artifact(artifact: &OutputArtifact) -> Result<PathBuf, WriteError> {
    fs::write(&artifact.path, artifact.contents.as_bytes())
        .await
        .map_err(|source| WriteError::Io {
            path: artifact.path.clone(),
            source,
        })?;
    debug!(bytes = artifact.contents.len(), "Wrote artifact");
    Ok(artifact.path.clone())
}
