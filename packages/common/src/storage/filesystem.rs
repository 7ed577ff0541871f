use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncRead, BufReader};
use tracing::{info, warn};

use super::error::StorageError;
use super::key::BlobKey;
use super::staged::{StagedBlob, TempPath};
use super::traits::{BlobStore, BoxReader};
use super::verify::copy_verified;

const TEMP_DIR: &str = ".tmp";

/// Filesystem-backed blob store.
///
/// Blobs live at `{base_path}/{shard}/{id}.{ext}`. Content is staged in
/// `{base_path}/.tmp` and renamed into place when persisted.
pub struct FilesystemBlobStore {
    base_path: PathBuf,
}

impl FilesystemBlobStore {
    /// Create the store, its directories, and clear temp files left behind
    /// by interrupted writes.
    pub async fn new(base_path: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(&base_path).await?;
        let temp_dir = base_path.join(TEMP_DIR);
        fs::create_dir_all(&temp_dir).await?;

        let mut stale = 0usize;
        let mut entries = fs::read_dir(&temp_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            match fs::remove_file(entry.path()).await {
                Ok(()) => stale += 1,
                Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to remove stale temp file"),
            }
        }
        if stale > 0 {
            info!(stale, "Removed temp files from interrupted uploads");
        }

        Ok(Self { base_path })
    }

    fn blob_path(&self, key: &BlobKey) -> PathBuf {
        self.base_path.join(key.shard()).join(key.file_name())
    }

    fn temp_path(&self) -> PathBuf {
        self.base_path
            .join(TEMP_DIR)
            .join(uuid::Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn stage(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        limit: u64,
    ) -> Result<StagedBlob, StorageError> {
        let temp = TempPath::new(self.temp_path());

        let mut temp_file = fs::File::create(temp.path()).await?;
        let verified = copy_verified(reader, &mut temp_file, limit).await?;
        drop(temp_file);

        Ok(StagedBlob { verified, temp })
    }

    async fn persist(&self, staged: StagedBlob, key: &BlobKey) -> Result<(), StorageError> {
        let blob_path = self.blob_path(key);
        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::rename(staged.temp.path(), &blob_path).await?;
        staged.temp.keep();
        Ok(())
    }

    async fn get_stream(&self, key: &BlobKey) -> Result<BoxReader, StorageError> {
        let blob_path = self.blob_path(key);
        match fs::File::open(&blob_path).await {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &BlobKey) -> Result<bool, StorageError> {
        let blob_path = self.blob_path(key);
        match fs::remove_file(&blob_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
