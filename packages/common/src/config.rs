use std::path::PathBuf;

use serde::Deserialize;

/// Storage policy shared by the blob store and the upload pipeline.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding the physical blobs. Default: "./data/files".
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Largest accepted upload in bytes. Default: 32 MiB.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    /// Accepted file extensions, compared case-insensitively.
    /// A leading dot is tolerated (`".png"` and `"png"` are equivalent).
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/files")
}
fn default_max_upload_size() -> u64 {
    32 * 1024 * 1024
}
fn default_allowed_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp", "pdf", "txt", "md", "zip"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            max_upload_size: default_max_upload_size(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl StorageConfig {
    /// Whether `extension` (without the dot) is on the allow-list.
    pub fn allows_extension(&self, extension: &str) -> bool {
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(extension))
    }
}
