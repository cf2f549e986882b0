//! Chunked file-upload relay.
//!
//! Clients upload a file in pieces over multiple HTTP calls identified by an
//! opaque upload id. The server assembles the chunks on disk, and a finalize
//! call mints a single-use access token for later retrieval or deletion.
//! Sessions that go idle are reclaimed by a periodic janitor task.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
