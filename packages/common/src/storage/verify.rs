use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::StorageError;
use super::hash::ContentHash;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Outcome of a completed [`copy_verified`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verified {
    /// SHA-256 of every byte that reached the sink.
    pub digest: ContentHash,
    /// Number of bytes copied.
    pub bytes: u64,
}

impl Verified {
    pub fn matches(&self, declared: &ContentHash) -> bool {
        self.digest == *declared
    }
}

/// Copy `reader` into `writer`, hashing each chunk on the way through.
///
/// The copy stops with [`StorageError::SizeLimitExceeded`] as soon as more
/// than `limit` bytes have been read; the offending chunk is not written.
/// Any read or write failure aborts with [`StorageError::Io`]. The writer is
/// flushed before returning.
pub async fn copy_verified<R, W>(
    reader: &mut R,
    writer: &mut W,
    limit: u64,
) -> Result<Verified, StorageError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut hasher = Sha256::new();
    let mut total_bytes: u64 = 0;
    let mut buf = vec![0u8; COPY_BUF_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }

        total_bytes += n as u64;
        if total_bytes > limit {
            return Err(StorageError::SizeLimitExceeded {
                actual: total_bytes,
                limit,
            });
        }

        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n]).await?;
    }

    writer.flush().await?;

    Ok(Verified {
        digest: ContentHash::from_bytes(hasher.finalize().into()),
        bytes: total_bytes,
    })
}
