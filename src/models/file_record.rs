//! Durable metadata for one uploaded file, keyed by its session id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One row in the `files` table.
///
/// The row exists from session creation until deletion. Finalizing a session
/// keeps the row around so the assembled file stays resolvable; only a delete
/// (client-initiated or janitor) removes it.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    /// Opaque session id; also the name of the on-disk session directory.
    pub id: String,

    /// Normalized target filename inside the session directory.
    pub filename: String,

    /// Client-side encryption IV in decimal-per-byte CSV form. Opaque
    /// pass-through, never interpreted by the server.
    pub iv: Option<String>,

    /// Client-side encryption salt, same form as `iv`.
    pub salt: Option<String>,

    /// When the session was created.
    pub created_at: DateTime<Utc>,
}
