//! Deduplicating file store.
//!
//! Every upload produces one `file_record`. The first record seen for a
//! content hash is the *owner* and holds the physical bytes; later uploads of
//! the same content become *linked* records that point at the owner and bump
//! its `ref_count`. Owners are unique per hash through a partial unique
//! index, so duplicate detection is a single INSERT.

mod error;
pub mod repository;

use std::sync::Arc;

use filestore_common::StorageConfig;
use filestore_common::storage::{
    BlobKey, BlobStore, BoxReader, ContentHash, StagedBlob, StorageError, Verified,
};
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use tokio::io::AsyncRead;
use tracing::{error, info, warn};

use crate::entity::file_record;
use crate::utils::filename::{file_extension, validate_flat_filename};

pub use error::StoreError;
pub use repository::{FileRepository, NewFileRecord, RepoError};

/// Insert attempts before giving up when owners keep disappearing between
/// the failed insert and the link.
const MAX_INGEST_ATTEMPTS: usize = 3;

/// An upload as declared by the client.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub uploader_id: i64,
    pub name: String,
    /// Hex SHA-256 the client claims the body hashes to.
    pub content_hash: String,
    /// Byte length the client claims the body has.
    pub size: u64,
}

/// Content resolved for a download.
pub struct Download {
    pub reader: BoxReader,
    /// Name of the requested record, which may differ from the owner's.
    pub filename: String,
    pub size: i64,
    pub content_hash: String,
}

/// Which release branch ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// A linked record was removed and its owner's counter decremented.
    /// `owner_reclaimed` is set when that left a disassociated owner with no
    /// dependents, so the owner and its bytes went too.
    Linked { owner_id: i64, owner_reclaimed: bool },
    /// An owner without dependents was removed together with its bytes.
    Reclaimed,
    /// An owner with dependents lost its uploader; bytes and record stay.
    Disassociated,
}

enum RecordKind {
    Owner,
    Linked(i64),
}

/// A validated upload.
struct Ingest {
    uploader_id: i64,
    name: String,
    extension: String,
    hash: ContentHash,
    size: u64,
}

impl Ingest {
    fn record(&self, link_target: i64) -> NewFileRecord {
        NewFileRecord {
            name: self.name.clone(),
            extension: self.extension.clone(),
            size: i64::try_from(self.size).unwrap_or(i64::MAX),
            content_hash: self.hash.to_hex(),
            uploader_id: Some(self.uploader_id),
            link_target,
        }
    }

    /// Why `verified` does not match the declaration, if it doesn't.
    fn mismatch(&self, verified: &Verified) -> Option<String> {
        if !verified.matches(&self.hash) {
            Some(format!(
                "declared digest {} but the content hashes to {}",
                self.hash, verified.digest
            ))
        } else if verified.bytes != self.size {
            Some(format!(
                "declared {} bytes but received {}",
                self.size, verified.bytes
            ))
        } else {
            None
        }
    }
}

/// Outcome of trying to insert an upload as the owner of its digest.
enum Claim {
    Owner(file_record::Model),
    /// The digest already has an owner; the staged bytes come back unused.
    Taken(StagedBlob),
}

pub struct FileStore {
    db: DatabaseConnection,
    blobs: Arc<dyn BlobStore>,
    policy: StorageConfig,
}

impl FileStore {
    pub fn new(db: DatabaseConnection, blobs: Arc<dyn BlobStore>, policy: StorageConfig) -> Self {
        Self { db, blobs, policy }
    }

    /// Ingest an upload.
    ///
    /// Returns the new owner record when the content is new, or a linked
    /// record when an owner for the same digest already exists. Either way
    /// the body is verified against the declared digest and size; on failure
    /// nothing of the upload survives.
    ///
    /// The body is staged and verified before any database work, so a slow
    /// client holds neither a connection nor a row lock.
    pub async fn upload<R>(
        &self,
        request: UploadRequest,
        mut body: R,
    ) -> Result<file_record::Model, StoreError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let ingest = self.validate(request)?;

        let mut staged = self
            .blobs
            .stage(&mut body, self.policy.max_upload_size)
            .await
            .inspect_err(|e| {
                warn!(content_hash = %ingest.hash, error = %e, "Failed to receive upload");
            })?;
        if let Some(reason) = ingest.mismatch(&staged.verified) {
            warn!(content_hash = %ingest.hash, %reason, "Upload failed verification");
            return Err(StoreError::IntegrityMismatch(reason));
        }

        for attempt in 1..=MAX_INGEST_ATTEMPTS {
            staged = match self.claim_owner(&ingest, staged).await? {
                Claim::Owner(owner) => return Ok(owner),
                Claim::Taken(staged) => staged,
            };

            if let Some(linked) = self.link_to_owner(&ingest).await? {
                return Ok(linked);
            }
            warn!(
                attempt,
                content_hash = %ingest.hash,
                "Owner was released before the upload could link to it, retrying"
            );
        }

        Err(StoreError::Internal(format!(
            "no stable owner for {} after {MAX_INGEST_ATTEMPTS} attempts",
            ingest.hash
        )))
    }

    fn validate(&self, request: UploadRequest) -> Result<Ingest, StoreError> {
        let name = validate_flat_filename(&request.name)
            .map_err(|e| StoreError::BadRequest(e.message().into()))?
            .to_string();

        if request.content_hash.trim().is_empty() {
            return Err(StoreError::BadRequest("Content hash is required".into()));
        }
        let hash = ContentHash::from_hex(&request.content_hash)
            .map_err(|e| StoreError::BadRequest(e.to_string()))?;

        if request.size > self.policy.max_upload_size {
            return Err(StoreError::TooLarge {
                size: request.size,
                limit: self.policy.max_upload_size,
            });
        }

        let extension = file_extension(&name).ok_or_else(|| {
            StoreError::DisallowedType("files without an extension are not accepted".into())
        })?;
        if !self.policy.allows_extension(&extension) {
            return Err(StoreError::DisallowedType(format!(".{extension}")));
        }

        Ok(Ingest {
            uploader_id: request.uploader_id,
            name,
            extension,
            hash,
            size: request.size,
        })
    }

    /// Insert the upload as the owner of its digest.
    ///
    /// Runs on its own task so that dropping the upload cannot split the
    /// commit from placing or discarding the bytes.
    async fn claim_owner(
        &self,
        ingest: &Ingest,
        staged: StagedBlob,
    ) -> Result<Claim, StoreError> {
        let task = tokio::spawn(insert_owner(
            self.db.clone(),
            Arc::clone(&self.blobs),
            ingest.record(0),
            staged,
        ));
        task.await
            .map_err(|e| StoreError::Internal(format!("owner insert task failed: {e}")))?
    }

    /// Create a linked record for content that already has an owner.
    ///
    /// Returns `None` when no owner exists any more, so the caller can retry
    /// the owner insert.
    async fn link_to_owner(
        &self,
        ingest: &Ingest,
    ) -> Result<Option<file_record::Model>, StoreError> {
        let txn = self.db.begin().await?;
        let repo = FileRepository::new(&txn);

        let Some(owner) = repo
            .find_owner_by_digest_for_update(&ingest.hash.to_hex())
            .await?
        else {
            txn.rollback().await?;
            return Ok(None);
        };

        let linked = repo
            .insert_unique(ingest.record(owner.id))
            .await
            .map_err(|e| match e {
                RepoError::UniqueViolation(hash) => invariant_violation(format!(
                    "linked record for {hash} tripped the owner uniqueness constraint"
                )),
                RepoError::Db(e) => e.into(),
            })?;
        let owner = repo.adjust_ref_count(owner, 1).await?;
        txn.commit().await?;

        info!(
            file_id = linked.id,
            owner_id = owner.id,
            ref_count = owner.ref_count,
            "Linked duplicate upload to existing content"
        );
        Ok(Some(linked))
    }

    /// Look up a record.
    pub async fn record(&self, id: i64) -> Result<file_record::Model, StoreError> {
        FileRepository::new(&self.db)
            .find_by_id(id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    /// Open the content of record `id`, following a link to its owner.
    pub async fn download(&self, id: i64) -> Result<Download, StoreError> {
        let repo = FileRepository::new(&self.db);
        let record = repo.find_by_id(id).await?.ok_or_else(|| not_found(id))?;

        let owner = match classify(&record)? {
            RecordKind::Owner => record.clone(),
            RecordKind::Linked(owner_id) => {
                let owner = repo.find_by_id(owner_id).await?.ok_or_else(|| {
                    invariant_violation(format!(
                        "record {} links to missing owner {owner_id}",
                        record.id
                    ))
                })?;
                if !owner.is_owner() {
                    return Err(invariant_violation(format!(
                        "record {} links to {owner_id}, which is not an owner",
                        record.id
                    )));
                }
                owner
            }
        };

        let key = BlobKey::new(owner.id, &owner.extension)?;
        let reader = self.blobs.get_stream(&key).await.map_err(|e| {
            if matches!(e, StorageError::NotFound(_)) {
                error!(file_id = owner.id, %key, "Owner record has no content on disk");
            }
            StoreError::from(e)
        })?;

        Ok(Download {
            reader,
            filename: record.name,
            size: owner.size,
            content_hash: owner.content_hash,
        })
    }

    /// Release record `id`.
    ///
    /// Authorization is the caller's job. Bytes are removed before the
    /// metadata that references them, inside the transaction holding the
    /// owner's row lock.
    pub async fn release(&self, id: i64) -> Result<Released, StoreError> {
        let txn = self.db.begin().await?;
        let repo = FileRepository::new(&txn);

        let record = repo
            .find_by_id_for_update(id)
            .await?
            .ok_or_else(|| not_found(id))?;

        let released = match classify(&record)? {
            RecordKind::Linked(owner_id) => {
                let owner = repo.find_by_id_for_update(owner_id).await?.ok_or_else(|| {
                    invariant_violation(format!(
                        "record {} links to missing owner {owner_id}",
                        record.id
                    ))
                })?;
                if !owner.is_owner() || owner.ref_count <= 0 {
                    return Err(invariant_violation(format!(
                        "owner {owner_id} has ref_count {} while record {} links to it",
                        owner.ref_count, record.id
                    )));
                }

                let owner = repo.adjust_ref_count(owner, -1).await?;
                repo.delete(record.id).await?;

                // A disassociated owner has nobody left who could release it.
                let owner_reclaimed = owner.ref_count == 0 && owner.uploader_id.is_none();
                if owner_reclaimed {
                    self.remove_bytes(&owner).await?;
                    repo.delete(owner.id).await?;
                }
                Released::Linked {
                    owner_id,
                    owner_reclaimed,
                }
            }
            RecordKind::Owner if record.ref_count == 0 => {
                self.remove_bytes(&record).await?;
                repo.delete(record.id).await?;
                Released::Reclaimed
            }
            RecordKind::Owner => {
                repo.set_uploader(record, None).await?;
                Released::Disassociated
            }
        };

        txn.commit().await?;
        info!(file_id = id, ?released, "Released file record");
        Ok(released)
    }

    async fn remove_bytes(&self, owner: &file_record::Model) -> Result<(), StoreError> {
        let key = BlobKey::new(owner.id, &owner.extension)?;
        if !self.blobs.delete(&key).await? {
            error!(file_id = owner.id, %key, "Owner record had no content on disk");
        }
        Ok(())
    }
}

fn classify(record: &file_record::Model) -> Result<RecordKind, StoreError> {
    match record.link_target {
        0 if record.ref_count >= 0 => Ok(RecordKind::Owner),
        target if target > 0 && target != record.id && record.ref_count == 0 => {
            Ok(RecordKind::Linked(target))
        }
        target => Err(invariant_violation(format!(
            "record {} has link_target {target} and ref_count {}",
            record.id, record.ref_count
        ))),
    }
}

fn not_found(id: i64) -> StoreError {
    StoreError::NotFound(format!("File {id} not found"))
}

fn invariant_violation(detail: String) -> StoreError {
    error!(%detail, "File store invariant violated");
    StoreError::Internal(detail)
}

/// Insert `record` as an owner, move `staged` under its key, then commit.
///
/// The row only becomes visible once its bytes are in place. A failed
/// commit removes the bytes again.
async fn insert_owner(
    db: DatabaseConnection,
    blobs: Arc<dyn BlobStore>,
    record: NewFileRecord,
    staged: StagedBlob,
) -> Result<Claim, StoreError> {
    let size = staged.verified.bytes;
    let txn = db.begin().await?;
    let inserted = FileRepository::new(&txn).insert_unique(record).await;
    let owner = match inserted {
        Ok(owner) => owner,
        Err(RepoError::UniqueViolation(_)) => {
            txn.rollback().await?;
            return Ok(Claim::Taken(staged));
        }
        Err(RepoError::Db(e)) => return Err(e.into()),
    };

    let persisted = match BlobKey::new(owner.id, &owner.extension) {
        Ok(key) => blobs.persist(staged, &key).await.map(|()| key),
        Err(e) => Err(e),
    };
    let key = match persisted {
        Ok(key) => key,
        Err(e) => {
            warn!(file_id = owner.id, error = %e, "Failed to store upload, rolling back");
            rollback(txn, owner.id).await;
            return Err(e.into());
        }
    };

    if let Err(e) = txn.commit().await {
        error!(file_id = owner.id, error = %e, "Failed to commit new content, removing it");
        if let Err(cleanup) = blobs.delete(&key).await {
            error!(%key, error = %cleanup, "Failed to remove content of uncommitted owner");
        }
        return Err(e.into());
    }

    info!(
        file_id = owner.id,
        content_hash = %owner.content_hash,
        size,
        "Stored new content"
    );
    Ok(Claim::Owner(owner))
}

async fn rollback(txn: DatabaseTransaction, file_id: i64) {
    if let Err(e) = txn.rollback().await {
        error!(file_id, error = %e, "Failed to roll back upload");
    }
}
