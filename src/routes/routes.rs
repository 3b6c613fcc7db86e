//! Defines routes for the file-sharing gateway.
//!
//! ## Structure
//! - **Upload**
//!   - `GET    /`        upload form
//!   - `POST   /`        multipart upload (`file` field)
//!
//! - **Per-file endpoints**
//!   - `GET    /f/{id}`  file page with remaining lifetime
//!   - `POST   /f/{id}`  soft delete from the page form (`delete=1`)
//!   - `DELETE /f/{id}`  soft delete for API clients
//!   - `GET    /d/{id}`  download
//!
//! - **Operations**
//!   - `GET|POST /cron`  maintenance sweep, guarded by `CRON_KEY`
//!   - `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        file_handlers::{
            delete_file, delete_file_form, download_file, upload_file, upload_page, view_file,
        },
        health_handlers::{healthz, readyz},
        maintenance_handlers::run_sweep,
    },
    state::AppState,
};
use axum::{Router, extract::DefaultBodyLimit, routing::get};

/// Headroom for multipart boundaries and part headers on top of the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build and return the router for all gateway routes.
///
/// `max_upload_bytes` caps request bodies; larger uploads get 413.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/cron", get(run_sweep).post(run_sweep))
        .route("/", get(upload_page).post(upload_file))
        .route(
            "/f/{id}",
            get(view_file).post(delete_file_form).delete(delete_file),
        )
        .route("/d/{id}", get(download_file))
        .layer(DefaultBodyLimit::max(
            max_upload_bytes.saturating_add(MULTIPART_OVERHEAD),
        ))
}
