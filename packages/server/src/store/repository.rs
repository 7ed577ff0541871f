use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QuerySelect, Set, SqlErr, sea_query::LockType,
};
use thiserror::Error;

use crate::entity::file_record;

#[derive(Debug, Error)]
pub enum RepoError {
    /// Another owner record already claims this content hash.
    #[error("an owner record already exists for content hash {0}")]
    UniqueViolation(String),

    #[error(transparent)]
    Db(#[from] DbErr),
}

/// Fields of a record that is about to be inserted.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub name: String,
    pub extension: String,
    pub size: i64,
    pub content_hash: String,
    pub uploader_id: Option<i64>,
    pub link_target: i64,
}

/// Metadata access for `file_record`.
///
/// Works on a plain connection or inside a transaction; the `*_for_update`
/// lookups only lock when `C` is a transaction on a backend with row locks.
pub struct FileRepository<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> FileRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Insert a record in a single statement.
    ///
    /// For owner records (`link_target == 0`) the partial unique index on
    /// `content_hash` makes this the atomic duplicate check.
    pub async fn insert_unique(
        &self,
        record: NewFileRecord,
    ) -> Result<file_record::Model, RepoError> {
        let content_hash = record.content_hash.clone();
        let model = file_record::ActiveModel {
            name: Set(record.name),
            extension: Set(record.extension),
            size: Set(record.size),
            content_hash: Set(record.content_hash),
            uploader_id: Set(record.uploader_id),
            link_target: Set(record.link_target),
            ref_count: Set(0),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        match model.insert(self.conn).await {
            Ok(inserted) => Ok(inserted),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Err(RepoError::UniqueViolation(content_hash))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<file_record::Model>, DbErr> {
        file_record::Entity::find_by_id(id).one(self.conn).await
    }

    /// Get a record by ID with FOR UPDATE lock.
    pub async fn find_by_id_for_update(
        &self,
        id: i64,
    ) -> Result<Option<file_record::Model>, DbErr> {
        file_record::Entity::find_by_id(id)
            .lock(LockType::Update)
            .one(self.conn)
            .await
    }

    /// Find the owner record of a content hash with FOR UPDATE lock.
    pub async fn find_owner_by_digest_for_update(
        &self,
        content_hash: &str,
    ) -> Result<Option<file_record::Model>, DbErr> {
        file_record::Entity::find()
            .filter(file_record::Column::ContentHash.eq(content_hash))
            .filter(file_record::Column::LinkTarget.eq(0i64))
            .lock(LockType::Update)
            .one(self.conn)
            .await
    }

    /// Persist the changed columns of `model`.
    pub async fn update(
        &self,
        model: file_record::ActiveModel,
    ) -> Result<file_record::Model, DbErr> {
        model.update(self.conn).await
    }

    /// Add `delta` to an owner's reference counter.
    ///
    /// Callers must hold the owner's row lock; the new value is computed from
    /// the locked snapshot.
    pub async fn adjust_ref_count(
        &self,
        owner: file_record::Model,
        delta: i32,
    ) -> Result<file_record::Model, DbErr> {
        let ref_count = owner.ref_count + delta;
        let mut active = owner.into_active_model();
        active.ref_count = Set(ref_count);
        self.update(active).await
    }

    /// Clear or replace the uploader of a record.
    pub async fn set_uploader(
        &self,
        record: file_record::Model,
        uploader_id: Option<i64>,
    ) -> Result<file_record::Model, DbErr> {
        let mut active = record.into_active_model();
        active.uploader_id = Set(uploader_id);
        self.update(active).await
    }

    /// Delete a record. Returns `false` if it did not exist.
    pub async fn delete(&self, id: i64) -> Result<bool, DbErr> {
        let result = file_record::Entity::delete_by_id(id).exec(self.conn).await?;
        Ok(result.rows_affected > 0)
    }

    /// Number of linked records pointing at `owner_id`.
    pub async fn count_links(&self, owner_id: i64) -> Result<u64, DbErr> {
        file_record::Entity::find()
            .filter(file_record::Column::LinkTarget.eq(owner_id))
            .count(self.conn)
            .await
    }
}
