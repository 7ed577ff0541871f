use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file_record")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Original upload filename, as declared by the uploader.
    pub name: String,

    /// Lowercase extension of `name`, without the dot.
    pub extension: String,

    /// Size of the content in bytes.
    pub size: i64,

    /// Lowercase hex SHA-256 of the content. Unique among owner records
    /// (partial index, see `database::ensure_indexes`).
    pub content_hash: String,

    /// Uploading user. Cleared when an owner is released while linked
    /// records still depend on its bytes.
    pub uploader_id: Option<i64>,

    /// `0` for an owner record, otherwise the id of the owner whose bytes
    /// this record shares.
    pub link_target: i64,

    /// Owners only: number of linked records pointing here.
    pub ref_count: i32,

    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_owner(&self) -> bool {
        self.link_target == 0
    }
}
