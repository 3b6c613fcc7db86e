//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the ledger database and disk I/O

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness probe. Always 200, never performs I/O.
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
/// Readiness probe that:
/// 1. Runs `SELECT 1` against the rate-limit ledger.
/// 2. Writes, reads back and removes a probe file under the storage root.
///
/// HTTP 200 when both pass, 503 otherwise. Probe files start with a dot and
/// are plain files, so the reaper never treats them as uploads.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let sqlite_check = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(state.limiter.pool())
        .await
    {
        Ok(1) => (true, None::<String>),
        Ok(v) => (false, Some(format!("unexpected result: {}", v))),
        Err(e) => {
            tracing::warn!(error = %e, "readiness: sqlite check failed");
            (false, Some("database unavailable".to_string()))
        }
    };

    let probe = state.store.root().join(format!(".readyz-{}", Uuid::new_v4()));
    let disk_check = match fs::write(&probe, b"readyz").await {
        Ok(()) => {
            let read_back = fs::read(&probe).await;
            let _ = fs::remove_file(&probe).await;
            match read_back {
                Ok(bytes) if bytes == b"readyz" => (true, None),
                Ok(_) => (false, Some("file content mismatch".to_string())),
                Err(e) => {
                    tracing::warn!(error = %e, "readiness: probe read failed");
                    (false, Some("could not read probe file".to_string()))
                }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "readiness: probe write failed");
            (false, Some("could not write probe file".to_string()))
        }
    };

    let overall_ok = sqlite_check.0 && disk_check.0;

    let mut checks = HashMap::new();
    checks.insert(
        "sqlite",
        CheckStatus {
            ok: sqlite_check.0,
            error: sqlite_check.1,
        },
    );
    checks.insert(
        "disk",
        CheckStatus {
            ok: disk_check.0,
            error: disk_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
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
