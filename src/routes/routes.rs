//! Defines routes for the upload relay API.
//!
//! ## Structure
//! - **Upload lifecycle**
//!   - `POST   /api/upload/start?filename=&header=` — create a session
//!   - `POST   /api/upload/{id}` — append a chunk (raw body bytes)
//!   - `POST   /api/upload/{id}/finalize` — finalize, mint access token
//!
//! - **Retrieval & deletion**
//!   - `GET    /api/find/{id}` — metadata + current size
//!   - `DELETE /api/delete/{token}` — delete by access token
//!
//! The body limit is lifted on the chunk route only: the service enforces
//! the per-chunk cap itself and stops reading oversized bodies, so it can
//! answer with the proper 400 instead of a generic 413.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{delete_file, finalize_upload, find_file, start_upload, upload_chunk},
    },
    services::upload_service::UploadService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

/// Build and return the router for all upload-relay routes.
///
/// The router carries shared state (`UploadService`) to all handlers.
pub fn routes() -> Router<UploadService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // upload lifecycle
        .route("/api/upload/start", post(start_upload))
        .route(
            "/api/upload/{id}",
            post(upload_chunk).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/upload/{id}/finalize", post(finalize_upload))
        // retrieval & deletion
        .route("/api/find/{id}", get(find_file))
        .route("/api/delete/{token}", delete(delete_file))
}
