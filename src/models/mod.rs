//! Data models for the upload relay.
//!
//! `FileRecord` maps to the SQLite `files` table via `sqlx::FromRow`;
//! `EncryptionHeader` is the parsed form of the opaque client-side
//! encryption declaration.

pub mod encryption;
pub mod file_record;
