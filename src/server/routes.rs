use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::info;
use tokio_util::io::ReaderStream;

use super::store::ReleaseStore;
use super::{ServerError, ServerResult};

/// Largest accepted request body (uploads included).
pub const MAX_BODY_BYTES: usize = 512 * 1024 * 1024;

pub fn router(store: ReleaseStore) -> Router {
    Router::new()
        .route("/check/{platform}/{arch}/{current_version}", get(check))
        .route("/download/{platform}/{arch}/{version}", get(download))
        .route("/upload", post(upload))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(store)
}

/// Reject values that could escape the releases directory.
fn path_component<'a>(name: &str, value: &'a str) -> ServerResult<&'a str> {
    if value.is_empty()
        || value.contains('/')
        || value.contains('\\')
        || value.contains("..")
        || value.contains('\0')
    {
        return Err(ServerError::BadRequest(format!("Invalid {}", name)));
    }
    Ok(value)
}

async fn check(
    State(store): State<ReleaseStore>,
    Path((platform, arch, current_version)): Path<(String, String, String)>,
) -> ServerResult<Response> {
    path_component("platform", &platform)?;
    path_component("arch", &arch)?;

    let found = tokio::task::spawn_blocking(move || store.check(&platform, &arch, &current_version)).await??;
    match found {
        Some(info) => Ok(Json(info).into_response()),
        None => Err(ServerError::NotFound),
    }
}

async fn download(
    State(store): State<ReleaseStore>,
    Path((platform, arch, version)): Path<(String, String, String)>,
) -> ServerResult<Response> {
    path_component("platform", &platform)?;
    path_component("arch", &arch)?;
    path_component("version", &version)?;

    let path = store.binary_path(&platform, &arch, &version);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ServerError::NotFound),
        Err(e) => return Err(e.into()),
    };
    let len = file.metadata().await?.len();

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

async fn upload(State(store): State<ReleaseStore>, mut multipart: Multipart) -> ServerResult<Response> {
    let mut platform = None;
    let mut arch = None;
    let mut version = None;
    let mut binary = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("platform") => platform = Some(field.text().await?),
            Some("arch") => arch = Some(field.text().await?),
            Some("version") => version = Some(field.text().await?),
            Some("binary") => binary = Some(field.bytes().await?),
            _ => {}
        }
    }

    let (Some(platform), Some(arch), Some(version)) = (platform, arch, version) else {
        return Err(ServerError::BadRequest("Missing required fields".to_string()));
    };
    let Some(binary) = binary else {
        return Err(ServerError::BadRequest("Missing binary file".to_string()));
    };
    path_component("platform", &platform)?;
    path_component("arch", &arch)?;
    path_component("version", &version)?;

    let size = binary.len();
    let saved = tokio::task::spawn_blocking(move || store.save(&platform, &arch, &version, &binary)).await??;
    info!(
        "Uploaded {} ({} bytes, sha256 {})",
        saved.download_url, size, saved.checksum
    );

    Ok((
        StatusCode::CREATED,
        format!("Version {} uploaded successfully", saved.version),
    )
        .into_response())
}
