//! HTTP handlers for the upload lifecycle.
//!
//! Chunk bodies are streamed straight through to `UploadService` rather than
//! buffered here; every size decision belongs to the service. Responses
//! carry a `code` field mirroring the HTTP status, which clients of the
//! original wire format expect.

use crate::{errors::AppError, services::upload_service::UploadService};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io;

/// Query params accepted by `POST /api/upload/start`.
#[derive(Debug, Deserialize)]
pub struct StartUploadQuery {
    pub filename: String,
    /// Optional client-side encryption declaration (`<iv>.<salt>`).
    pub header: Option<String>,
}

/// `POST /api/upload/start?filename=&header=` — allocate a session.
pub async fn start_upload(
    State(service): State<UploadService>,
    Query(query): Query<StartUploadQuery>,
) -> Result<Json<Value>, AppError> {
    let id = service
        .create_session(&query.filename, query.header.as_deref())
        .await?;
    Ok(Json(json!({ "code": 200, "id": id })))
}

/// `POST /api/upload/{id}` — append one chunk; the request body is the raw
/// chunk bytes.
pub async fn upload_chunk(
    State(service): State<UploadService>,
    Path(id): Path<String>,
    body: Body,
) -> Result<Json<Value>, AppError> {
    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)));

    service.append_chunk(&id, stream).await?;
    Ok(Json(json!({ "code": 200 })))
}

/// `POST /api/upload/{id}/finalize` — close the session and mint the access
/// token.
pub async fn finalize_upload(
    State(service): State<UploadService>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let (file, token) = service.finalize_session(&id).await?;
    Ok(Json(json!({ "code": 200, "file": file, "token": token })))
}

/// Response body for `GET /api/find/{id}`. The encryption fields are
/// omitted entirely (not null) for unencrypted uploads.
#[derive(Debug, Serialize)]
pub struct FindResponse {
    pub code: u16,
    pub file: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

/// `GET /api/find/{id}` — metadata plus current on-disk size.
pub async fn find_file(
    State(service): State<UploadService>,
    Path(id): Path<String>,
) -> Result<Json<FindResponse>, AppError> {
    let info = service.lookup(&id).await?;
    Ok(Json(FindResponse {
        code: 200,
        file: info.filename,
        size: info.size,
        iv: info.iv,
        salt: info.salt,
    }))
}

/// `DELETE /api/delete/{token}` — delete the file the token points at.
pub async fn delete_file(
    State(service): State<UploadService>,
    Path(token): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = service.delete_by_token(&token).await?;
    Ok(Json(json!({ "code": 200, "id": id })))
}
