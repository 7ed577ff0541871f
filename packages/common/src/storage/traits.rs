use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::error::StorageError;
use super::key::BlobKey;
use super::staged::StagedBlob;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Physical byte storage addressed by [`BlobKey`].
///
/// Deduplication lives above this layer: a store holds whatever it is told
/// to hold under a key and reports the digest of what it wrote.
///
/// Writes happen in two steps. [`stage`](BlobStore::stage) streams and
/// hashes the content before its key is known; [`persist`](BlobStore::persist)
/// then makes it visible under a key in one atomic step.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stream `reader` into a temp location, hashing it on the way.
    ///
    /// At most `limit` bytes are accepted. On error nothing is left behind.
    async fn stage(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        limit: u64,
    ) -> Result<StagedBlob, StorageError>;

    /// Move staged content under `key`, replacing any blob already there.
    ///
    /// On error the staged content is discarded.
    async fn persist(&self, staged: StagedBlob, key: &BlobKey) -> Result<(), StorageError>;

    /// Open the blob at `key` for streaming.
    async fn get_stream(&self, key: &BlobKey) -> Result<BoxReader, StorageError>;

    /// Remove the blob at `key`.
    ///
    /// Returns `true` if the blob was deleted, `false` if it did not exist.
    async fn delete(&self, key: &BlobKey) -> Result<bool, StorageError>;
}
