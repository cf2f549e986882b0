//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks DB connectivity and disk I/O

use crate::services::upload_service::UploadService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, path::Path};
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Liveness probe — always 200, never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe: a `SELECT 1` against SQLite plus a best-effort
/// write/read/delete under the upload directory. 200 when both pass,
/// 503 otherwise.
pub async fn readyz(State(service): State<UploadService>) -> impl IntoResponse {
    let sqlite = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*service.kv.db)
        .await
    {
        Ok(1) => CheckStatus { ok: true, error: None },
        Ok(other) => CheckStatus {
            ok: false,
            error: Some(format!("unexpected result: {}", other)),
        },
        Err(err) => CheckStatus {
            ok: false,
            error: Some(format!("error: {}", err)),
        },
    };

    let disk = disk_probe(&service.base_path).await;

    let overall_ok = sqlite.ok && disk.ok;
    let mut checks = HashMap::new();
    checks.insert("sqlite", sqlite);
    checks.insert("disk", disk);

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if overall_ok { "ok".into() } else { "error".into() },
        checks,
    };
    (status, Json(body))
}

/// Write, read back, and remove a probe file under `base`.
async fn disk_probe(base: &Path) -> CheckStatus {
    let probe_path = base.join(format!(".readyz-{}", Uuid::new_v4()));

    let outcome = async {
        fs::write(&probe_path, b"readyz")
            .await
            .map_err(|e| format!("could not write probe file: {}", e))?;
        let bytes = fs::read(&probe_path)
            .await
            .map_err(|e| format!("could not read probe file: {}", e))?;
        if bytes != b"readyz" {
            return Err("probe file content mismatch".to_string());
        }
        Ok(())
    }
    .await;

    // Best-effort cleanup regardless of what the probe found.
    let _ = fs::remove_file(&probe_path).await;

    match outcome {
        Ok(()) => CheckStatus { ok: true, error: None },
        Err(error) => CheckStatus {
            ok: false,
            error: Some(error),
        },
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
