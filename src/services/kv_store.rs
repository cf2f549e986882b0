//! SQLite-backed key-value adapter.
//!
//! The relay needs two durable mappings: session id to file metadata, and
//! access token to session id. Each lives in its own table so the namespaces
//! stay disjoint. Only single-statement atomicity is relied upon; there are
//! no multi-key transactions anywhere in the relay.

use crate::models::file_record::FileRecord;
use sqlx::SqlitePool;
use std::sync::Arc;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Clone)]
pub struct KvStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl KvStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Every statement is `IF NOT EXISTS`, so
    /// this is safe to run on every startup.
    pub async fn migrate(&self) -> sqlx::Result<()> {
        for stmt in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    pub async fn put_file(&self, record: &FileRecord) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO files (id, filename, iv, salt, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.filename)
        .bind(&record.iv)
        .bind(&record.salt)
        .bind(record.created_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    pub async fn get_file(&self, id: &str) -> sqlx::Result<Option<FileRecord>> {
        sqlx::query_as::<_, FileRecord>(
            "SELECT id, filename, iv, salt, created_at FROM files WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await
    }

    /// Remove a metadata record. Returns false when no row existed.
    pub async fn delete_file(&self, id: &str) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn put_token(&self, token: &str, file_id: &str) -> sqlx::Result<()> {
        sqlx::query("INSERT INTO access_tokens (token, file_id) VALUES (?, ?)")
            .bind(token)
            .bind(file_id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn get_token(&self, token: &str) -> sqlx::Result<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT file_id FROM access_tokens WHERE token = ?")
            .bind(token)
            .fetch_optional(&*self.db)
            .await
    }

    /// Remove a token mapping. Returns false when no row existed.
    pub async fn delete_token(&self, token: &str) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM access_tokens WHERE token = ?")
            .bind(token)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
