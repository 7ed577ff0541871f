use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, body::Body};
use futures::TryStreamExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::instrument;

use crate::entity::file_record;
use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::AuthUser;
use crate::models::file::FileResponse;
use crate::state::AppState;
use crate::store::{Released, UploadRequest};

/// Headroom for multipart framing and the text fields on top of the file.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

pub fn upload_body_limit(max_upload_size: u64) -> DefaultBodyLimit {
    let limit = max_upload_size.saturating_add(MULTIPART_OVERHEAD);
    DefaultBodyLimit::max(usize::try_from(limit).unwrap_or(usize::MAX))
}

#[utoipa::path(
    post,
    path = "/",
    tag = "Files",
    operation_id = "uploadFile",
    summary = "Upload a file",
    description = "Uploads a file together with its declared SHA-256 and size. The `filehash` and \
        `filesize` fields must precede the `file` part; `filename` is optional and defaults to the \
        part's filename. Content already stored is not written again: the new record links to \
        the existing copy and `deduplicated` is set.",
    request_body(content_type = "multipart/form-data", description = "filename, filehash, filesize, then file"),
    responses(
        (status = 201, description = "File stored", body = FileResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 413, description = "File too large (PAYLOAD_TOO_LARGE)", body = ErrorBody),
        (status = 415, description = "Extension not allowed (UNSUPPORTED_FILE_TYPE)", body = ErrorBody),
        (status = 422, description = "Content does not match the declared hash or size (HASH_MISMATCH)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(
    skip(state, auth_user, multipart),
    fields(user_id = auth_user.user_id, username = %auth_user.username)
)]
pub async fn upload_file(
    auth_user: AuthUser,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut filename: Option<String> = None;
    let mut filehash: Option<String> = None;
    let mut filesize: Option<u64> = None;
    let mut stored: Option<file_record::Model> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("file") => {
                if stored.is_some() {
                    return Err(AppError::Validation(
                        "Only one 'file' field is allowed".into(),
                    ));
                }

                let name = filename
                    .take()
                    .or_else(|| field.file_name().map(str::to_owned))
                    .ok_or_else(|| AppError::Validation("Missing 'filename' field".into()))?;
                let content_hash = filehash.take().ok_or_else(|| {
                    AppError::Validation("Missing 'filehash' field before 'file'".into())
                })?;
                let size = filesize.ok_or_else(|| {
                    AppError::Validation("Missing 'filesize' field before 'file'".into())
                })?;

                let request = UploadRequest {
                    uploader_id: auth_user.user_id,
                    name,
                    content_hash,
                    size,
                };
                let body = StreamReader::new(Box::pin(field.map_err(std::io::Error::other)));
                stored = Some(state.store.upload(request, body).await?);
            }
            Some("filename") => filename = Some(read_text(field, "filename").await?),
            Some("filehash") => filehash = Some(read_text(field, "filehash").await?),
            Some("filesize") => {
                let text = read_text(field, "filesize").await?;
                let size = text.trim().parse().map_err(|_| {
                    AppError::Validation("'filesize' must be a non-negative integer".into())
                })?;
                filesize = Some(size);
            }
            _ => {} // Ignore unknown fields.
        }
    }

    let record = stored.ok_or_else(|| AppError::Validation("Missing 'file' field".into()))?;
    Ok((StatusCode::CREATED, Json(FileResponse::from(record))))
}

#[utoipa::path(
    get,
    path = "/{id}",
    tag = "Files",
    operation_id = "downloadFile",
    summary = "Download a file",
    description = "Streams the content of a file record under the record's own filename. \
        Supports ETag-based caching via If-None-Match.",
    params(("id" = i64, Path, description = "File record ID")),
    responses(
        (status = 200, description = "File content"),
        (status = 304, description = "Not Modified (ETag match)"),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "File not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, _auth_user, headers))]
pub async fn download_file(
    _auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let download = state.store.download(id).await?;

    let etag_value = format!("\"{}\"", download.content_hash);
    if let Some(if_none_match) = headers.get(header::IF_NONE_MATCH)
        && let Ok(val) = if_none_match.to_str()
        && (val == etag_value || val == "*")
    {
        return Ok(StatusCode::NOT_MODIFIED.into_response());
    }

    let content_type = mime_guess::from_path(&download.filename)
        .first_or_octet_stream()
        .to_string();
    let body = Body::from_stream(ReaderStream::new(download.reader));

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, download.size.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition_value(&download.filename),
        )
        .header(header::ETAG, &etag_value)
        .header(header::CACHE_CONTROL, "private, max-age=3600")
        .body(body)
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))?;

    Ok(response)
}

#[utoipa::path(
    get,
    path = "/{id}/info",
    tag = "Files",
    operation_id = "getFileInfo",
    summary = "Get file metadata",
    params(("id" = i64, Path, description = "File record ID")),
    responses(
        (status = 200, description = "File metadata", body = FileResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "File not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, _auth_user))]
pub async fn get_file_info(
    _auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<FileResponse>, AppError> {
    let record = state.store.record(id).await?;
    Ok(Json(FileResponse::from(record)))
}

#[utoipa::path(
    delete,
    path = "/{id}",
    tag = "Files",
    operation_id = "deleteFile",
    summary = "Delete a file",
    description = "Removes the caller's file record. Stored content is freed once no other \
        record shares it; otherwise only the caller's ownership is dropped.",
    params(("id" = i64, Path, description = "File record ID")),
    responses(
        (status = 204, description = "File deleted"),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Not the uploader (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "File not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(
    skip(state, auth_user),
    fields(user_id = auth_user.user_id, username = %auth_user.username)
)]
pub async fn delete_file(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let record = state.store.record(id).await?;
    auth_user.require_uploader(record.uploader_id)?;

    match state.store.release(id).await? {
        Released::Linked {
            owner_id,
            owner_reclaimed: true,
        } => tracing::info!(owner_id, "Last reference released, content freed"),
        Released::Reclaimed => tracing::info!("Content freed"),
        Released::Linked { .. } | Released::Disassociated => {}
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn read_text(field: Field<'_>, name: &str) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read '{name}': {e}")))
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::Validation(format!("Multipart error: {e}"))
    }
}

/// Build a safe `Content-Disposition` header value.
fn content_disposition_value(filename: &str) -> String {
    let ascii_safe: String = filename
        .chars()
        .filter(|c| (c.is_ascii_graphic() || *c == ' ') && !matches!(c, '"' | ';' | '\\'))
        .collect();
    let ascii_name = if ascii_safe.trim().is_empty() {
        "download".to_string()
    } else {
        ascii_safe
    };

    // RFC 5987 percent-encoding for filename*.
    let encoded: String = filename
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'!' | b'#' | b'$' | b'&' | b'+' | b'-'
            | b'.' | b'^' | b'_' | b'`' | b'|' | b'~' => String::from(b as char),
            _ => format!("%{b:02X}"),
        })
        .collect();

    format!("attachment; filename=\"{ascii_name}\"; filename*=UTF-8''{encoded}")
}
