use std::fmt;

use super::error::StorageError;

const MAX_EXTENSION_LEN: usize = 16;

/// Location of a physical blob, derived from the owning record.
///
/// The file name is `{id}.{extension}` (or just `{id}` without an extension),
/// placed in a shard directory named after the low byte of the id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobKey {
    id: i64,
    extension: String,
}

impl BlobKey {
    /// Build a key for record `id`.
    ///
    /// The extension ends up in a file name, so only ASCII alphanumerics are
    /// accepted; it is stored lowercase.
    pub fn new(id: i64, extension: &str) -> Result<Self, StorageError> {
        if id <= 0 {
            return Err(StorageError::InvalidKey(format!(
                "record id must be positive, got {id}"
            )));
        }

        let extension = extension.trim_start_matches('.');
        if extension.len() > MAX_EXTENSION_LEN
            || !extension.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(StorageError::InvalidKey(format!(
                "unsupported extension {extension:?}"
            )));
        }

        Ok(Self {
            id,
            extension: extension.to_ascii_lowercase(),
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn file_name(&self) -> String {
        if self.extension.is_empty() {
            self.id.to_string()
        } else {
            format!("{}.{}", self.id, self.extension)
        }
    }

    /// Two hex characters taken from the low byte of the id.
    pub fn shard(&self) -> String {
        format!("{:02x}", self.id & 0xff)
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.shard(), self.file_name())
    }
}
