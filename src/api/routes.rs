use crate::AppState;
use crate::error::StreamError;
use axum::body::{Body, Bytes};
use axum::extract::{Extension, Path as AxumPath};
use axum::http::{HeaderValue, Request, Response, StatusCode, header};
use axum::response::{IntoResponse, Json};
use mime_guess::from_path;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

#[derive(Deserialize)]
pub struct StartRequest {
    pub rtsp_url: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct StartResponse {
    pub message: String,
    pub stream_id: String,
    pub hls_url: String,
}

#[derive(Serialize, Deserialize)]
pub struct StopResponse {
    pub message: String,
}

/// `POST /start` with `{"rtsp_url": "..."}`.
///
/// A body that is not JSON is treated the same as a missing `rtsp_url`.
pub async fn start_stream(
    Extension(state): Extension<AppState>,
    body: Bytes,
) -> Result<Json<StartResponse>, StreamError> {
    let rtsp_url = serde_json::from_slice::<StartRequest>(&body)
        .ok()
        .and_then(|request| request.rtsp_url)
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| StreamError::InvalidRequest("Missing RTSP URL".into()))?;

    let started = state.supervisor.start(&rtsp_url).await?;
    let hls_url = state.hls_url(&started.id);
    info!(stream_id = %started.id, %hls_url, "Stream started");

    Ok(Json(StartResponse {
        message: "Stream started".into(),
        stream_id: started.id,
        hls_url,
    }))
}

/// `POST /stop/{id}`
pub async fn stop_stream(
    Extension(state): Extension<AppState>,
    AxumPath(stream_id): AxumPath<String>,
) -> Result<Json<StopResponse>, StreamError> {
    state.supervisor.stop(&stream_id).await?;

    Ok(Json(StopResponse {
        message: format!("Stream {stream_id} stopped"),
    }))
}

/// `GET /streams/{id}/{*filename}`, raw bytes from the stream directory.
pub async fn serve_stream(
    Extension(state): Extension<AppState>,
    AxumPath((stream_id, filename)): AxumPath<(String, String)>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let Some(path) = state.supervisor.store().resolve(&stream_id, &filename) else {
        debug!(%stream_id, %filename, "Rejected stream file path");
        return Ok(file_not_found());
    };
    debug!(%stream_id, %filename, ?path, "Request stream file");

    let Ok(mut fh) = tokio::fs::File::open(&path).await else {
        return Ok(file_not_found());
    };
    let Ok(metadata) = fh.metadata().await else {
        return Ok(file_not_found());
    };
    if !metadata.is_file() {
        return Ok(file_not_found());
    }

    let size = metadata.len();
    let (status, start, len) = match parse_range(&req, size) {
        Some((start, end)) => (StatusCode::PARTIAL_CONTENT, start, end - start + 1),
        None => (StatusCode::OK, 0, size),
    };

    if start > 0 && fh.seek(std::io::SeekFrom::Start(start)).await.is_err() {
        return Ok(file_not_found());
    }

    let stream = ReaderStream::new(fh.take(len));
    let mut res = Response::new(Body::from_stream(stream));
    *res.status_mut() = status;

    let headers = res.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type(&path));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CACHE_CONTROL, cache_control(&path));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    if status == StatusCode::PARTIAL_CONTENT
        && let Ok(value) = HeaderValue::from_str(&format!(
            "bytes {start}-{}/{size}",
            start + len - 1
        ))
    {
        headers.insert(header::CONTENT_RANGE, value);
    }

    Ok(res)
}

fn file_not_found() -> Response<Body> {
    (StatusCode::NOT_FOUND, "File not found").into_response()
}

fn content_type(path: &Path) -> HeaderValue {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("m3u8") => HeaderValue::from_static("application/vnd.apple.mpegurl"),
        Some("ts") => HeaderValue::from_static("video/mp2t"),
        _ => HeaderValue::from_str(from_path(path).first_or_octet_stream().as_ref())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    }
}

fn cache_control(path: &Path) -> HeaderValue {
    // the playlist is rewritten every segment, segments never change
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("m3u8") | Some("log") => HeaderValue::from_static("no-cache"),
        _ => HeaderValue::from_static("public,max-age=60"),
    }
}

/// Single `bytes=start-end` range, clamped to the file. `None` serves the whole file.
fn parse_range(req: &Request<Body>, file_size: u64) -> Option<(u64, u64)> {
    if file_size == 0 {
        return None;
    }

    let value = req.headers().get(header::RANGE)?.to_str().ok()?;
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let start = start.trim().parse::<u64>().ok()?;
    let end = end
        .trim()
        .parse::<u64>()
        .unwrap_or(file_size - 1)
        .min(file_size - 1);

    (start <= end).then_some((start, end))
}
