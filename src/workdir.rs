//! Per-request scratch directory and output-path generation.

use crate::error::ConvertError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;

/// Hands out fresh, unique file paths for intermediate and final outputs.
pub trait PathGenerator: Send + Sync {
    /// A path that does not exist yet, ending in `extension` (e.g. `.pdf`).
    fn generate_path(&self, extension: &str) -> PathBuf;
}

/// A temporary directory owned by one request; removed with everything in
/// it when dropped.
#[derive(Debug)]
pub struct WorkDir {
    dir: TempDir,
}

impl WorkDir {
    /// Create a work directory under the system temp dir.
    pub fn new() -> Result<Self, ConvertError> {
        Self::create(tempfile::Builder::new().prefix("office2pdf-").tempdir(), std::env::temp_dir())
    }

    /// Create a work directory under `parent`.
    pub fn new_in(parent: impl AsRef<Path>) -> Result<Self, ConvertError> {
        let parent = parent.as_ref();
        Self::create(
            tempfile::Builder::new().prefix("office2pdf-").tempdir_in(parent),
            parent.to_path_buf(),
        )
    }

    fn create(dir: std::io::Result<TempDir>, parent: PathBuf) -> Result<Self, ConvertError> {
        dir.map(|dir| Self { dir })
            .map_err(|source| ConvertError::Io {
                path: parent,
                source,
            })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl PathGenerator for WorkDir {
    fn generate_path(&self, extension: &str) -> PathBuf {
        self.dir
            .path()
            .join(format!("{}{}", Uuid::new_v4(), extension))
    }
}
