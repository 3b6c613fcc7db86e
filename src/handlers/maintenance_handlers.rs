//! `/cron`: HTTP trigger for the maintenance sweep.
//!
//! Guarded by the `CRON_KEY` shared secret. An unset secret and a wrong key
//! produce the same 403 so the endpoint cannot be probed for configuration.

use crate::{errors::AppError, models::sweep::SweepReport, state::AppState};
use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use subtle::ConstantTimeEq;

#[derive(Debug, Deserialize)]
pub struct CronQuery {
    pub key: Option<String>,
}

/// `GET|POST /cron?key=...`
pub async fn run_sweep(
    State(state): State<AppState>,
    Query(q): Query<CronQuery>,
) -> Result<Json<SweepReport>, AppError> {
    if !key_matches(state.config.cron_key.as_deref(), q.key.as_deref()) {
        tracing::warn!("rejected maintenance trigger");
        return Err(AppError::forbidden());
    }
    Ok(Json(state.reaper.sweep().await))
}

fn key_matches(configured: Option<&str>, presented: Option<&str>) -> bool {
    match (configured, presented) {
        (Some(expected), Some(given)) if !expected.is_empty() => {
            expected.as_bytes().ct_eq(given.as_bytes()).into()
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_comparison() {
        assert!(key_matches(Some("s3cret"), Some("s3cret")));
        assert!(!key_matches(Some("s3cret"), Some("s3cre")));
        assert!(!key_matches(Some("s3cret"), Some("S3CRET")));
        assert!(!key_matches(Some("s3cret"), None));
        assert!(!key_matches(None, Some("anything")));
        assert!(!key_matches(Some(""), Some("")));
    }
}
