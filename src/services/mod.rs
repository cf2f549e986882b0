//! Service layer.
//!
//! `upload_service` is the core of the relay: it composes the SQLite-backed
//! key-value adapter (`kv_store`), the in-memory session tracker
//! (`session_store`), and the filename normalizer into the upload session
//! lifecycle. The janitor task lives next to the service it sweeps.

pub mod filename;
pub mod kv_store;
pub mod session_store;
pub mod upload_service;
