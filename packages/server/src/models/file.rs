use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entity::file_record;

/// Response DTO for a single file record.
#[derive(Serialize, utoipa::ToSchema)]
pub struct FileResponse {
    /// Record ID. Use it to download or delete the file.
    #[schema(example = 17)]
    pub id: i64,
    /// Filename as uploaded.
    #[schema(example = "figure1.png")]
    pub name: String,
    /// Lowercase extension, without the dot.
    #[schema(example = "png")]
    pub extension: String,
    /// Content size in bytes.
    #[schema(example = 142857)]
    pub size: i64,
    /// SHA-256 content hash (lowercase hex).
    #[schema(example = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")]
    pub content_hash: String,
    /// Uploading user; `null` once the uploader released a record others still share.
    pub uploader_id: Option<i64>,
    /// Whether the upload matched existing content and shares its storage.
    pub deduplicated: bool,
    pub created_at: DateTime<Utc>,
}

impl From<file_record::Model> for FileResponse {
    fn from(model: file_record::Model) -> Self {
        Self {
            deduplicated: !model.is_owner(),
            id: model.id,
            name: model.name,
            extension: model.extension,
            size: model.size,
            content_hash: model.content_hash,
            uploader_id: model.uploader_id,
            created_at: model.created_at,
        }
    }
}
