//! HTTP handlers for the upload / view / download / delete flow.
//! Upload bodies are streamed straight into the object store and downloads
//! are streamed back out, so no file is buffered in memory.

use crate::{
    errors::{AppError, ErrorFormat},
    handlers::pages,
    models::object::StoredObject,
    services::{
        object_store::{StoreError, ValidationError},
        rate_limiter::Admission,
        sanitize::{extension_allowed, sanitize_filename, sanitize_header_value},
    },
    state::AppState,
};
use axum::{
    Form,
    body::Body,
    extract::{ConnectInfo, Multipart, Path, State, multipart::MultipartError},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use futures::{StreamExt, TryStreamExt, future, pin_mut, stream};
use serde::Deserialize;
use std::{io, net::SocketAddr};
use tokio_util::io::ReaderStream;

/// Form posted by the delete button on the file page.
#[derive(Debug, Deserialize)]
pub struct DeleteForm {
    pub delete: Option<String>,
}

/// `GET /`: the upload form.
pub async fn upload_page(State(state): State<AppState>) -> Html<String> {
    Html(pages::upload_page(
        state.config.retention_minutes,
        state.config.max_upload_bytes,
    ))
}

/// `POST /`: multipart upload with the file in the `file` field.
///
/// Order of checks: filename extension, a non-empty body, then rate-limit
/// admission, then the streamed write. A slot taken by admission is handed
/// back if the write fails or the request is dropped, so only published
/// uploads count against the client.
pub async fn upload_file(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let format = error_format(&headers);
    let client = client_id(&headers, peer);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err).with_format(format))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let declared = field.file_name().unwrap_or_default().to_string();
        if !extension_allowed(&sanitize_filename(&declared)) {
            return Err(AppError::bad_request("File type not allowed").with_format(format));
        }

        // An empty file is refused before it can take a rate-limit slot.
        pin_mut!(field);
        let first = loop {
            match field
                .try_next()
                .await
                .map_err(|err| multipart_error(err).with_format(format))?
            {
                Some(chunk) if chunk.is_empty() => continue,
                Some(chunk) => break chunk,
                None => {
                    let message = ValidationError::EmptyFile.to_string();
                    return Err(AppError::bad_request(message).with_format(format));
                }
            }
        };

        let reservation = match state.limiter.try_admit(&client).await {
            Ok(Admission::Admitted(ticket)) => state.limiter.reserve(ticket),
            Ok(Admission::Limited) => {
                return Err(AppError::rate_limited(
                    state.limiter.max_uploads(),
                    state.limiter.window_secs(),
                )
                .with_format(format));
            }
            Err(err) => return Err(AppError::from(err).with_format(format)),
        };

        let body = stream::once(future::ready(Ok(first)))
            .chain(field.map_err(io::Error::other));
        let object = match state.store.create_stream(&declared, body).await {
            Ok(object) => object,
            Err(err) => {
                if let Err(release_err) = reservation.release().await {
                    tracing::warn!(
                        client = %client,
                        error = %release_err,
                        "failed to release rate-limit slot"
                    );
                }
                return Err(upload_error(err).with_format(format));
            }
        };
        reservation.keep();

        tracing::info!(id = %object.id, client = %client, "upload accepted");
        return Ok(upload_response(&headers, &object));
    }

    Err(AppError::bad_request("No file uploaded").with_format(format))
}

/// `GET /f/{id}`: file page with a countdown, or an error page.
pub async fn view_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let object = state
        .store
        .get_metadata(&id)
        .await
        .map_err(|err| AppError::from(err).with_format(ErrorFormat::Html))?;

    if object.expired {
        return Err(
            AppError::new(StatusCode::GONE, "File has expired").with_format(ErrorFormat::Html),
        );
    }

    let retention_secs = state.store.retention().num_seconds();
    let share_url = format!("{}/f/{}", base_url(&headers), object.id);
    Ok(Html(pages::file_page(&object, &share_url, retention_secs)).into_response())
}

/// `POST /f/{id}` with `delete=1`: soft delete from the file page.
pub async fn delete_file_form(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<DeleteForm>,
) -> Result<Response, AppError> {
    if form.delete.is_none() {
        return Err(AppError::bad_request("Unsupported action").with_format(ErrorFormat::Html));
    }
    let deleted = state
        .store
        .soft_delete(&id)
        .await
        .map_err(|err| AppError::from(err).with_format(ErrorFormat::Html))?;
    if deleted {
        Ok(Redirect::to("/").into_response())
    } else {
        Err(AppError::not_found().with_format(ErrorFormat::Html))
    }
}

/// `DELETE /f/{id}`: soft delete for API clients.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.store.soft_delete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found())
    }
}

/// `GET /d/{id}`: stream the content as an attachment.
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let format = error_format(&headers);
    let (object, file) = state
        .store
        .read_content(&id)
        .await
        .map_err(|err| AppError::from(err).with_format(format))?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    set_download_headers(response.headers_mut(), &object);
    Ok(response)
}

fn set_download_headers(headers: &mut HeaderMap, object: &StoredObject) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&object.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(object.size_bytes));

    let disposition = format!(
        "attachment; filename=\"{}\"",
        sanitize_header_value(&object.filename)
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
}

fn upload_response(headers: &HeaderMap, object: &StoredObject) -> Response {
    let path = format!("/f/{}", object.id);
    if is_cli_client(headers) {
        let body = format!("{}{}\n", base_url(headers), path);
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    } else {
        Redirect::to(&path).into_response()
    }
}

fn upload_error(err: StoreError) -> AppError {
    if let StoreError::Io(io_err) = &err {
        if let Some(multipart) = io_err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<MultipartError>())
        {
            return AppError::new(multipart.status(), multipart.body_text());
        }
    }
    AppError::from(err)
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::new(StatusCode::PAYLOAD_TOO_LARGE, "File too large")
    } else {
        AppError::bad_request("Invalid upload")
    }
}

/// Identify the uploading client: first `X-Forwarded-For` entry when
/// present, otherwise the peer address.
pub fn client_id(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

fn is_cli_client(headers: &HeaderMap) -> bool {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ua| ua.to_ascii_lowercase().contains("curl"))
}

fn error_format(headers: &HeaderMap) -> ErrorFormat {
    if is_cli_client(headers) {
        ErrorFormat::Text
    } else {
        ErrorFormat::Html
    }
}

fn base_url(headers: &HeaderMap) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .filter(|v| *v == "https")
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{}://{}", scheme, host)
}
