use std::path::{Path, PathBuf};

use super::verify::Verified;

/// A temp file that is removed on drop unless it was kept.
///
/// Drop also runs when the writing future is cancelled mid-stream.
#[derive(Debug)]
pub(crate) struct TempPath {
    path: PathBuf,
    kept: bool,
}

impl TempPath {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path, kept: false }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        if !self.kept {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Verified content that is written but not addressable yet.
///
/// Hand it to [`BlobStore::persist`](super::BlobStore::persist) to place it
/// under a key. Dropping it discards the bytes.
#[derive(Debug)]
pub struct StagedBlob {
    pub verified: Verified,
    pub(crate) temp: TempPath,
}
