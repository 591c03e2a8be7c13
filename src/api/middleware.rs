use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{debug, error, warn};

pub async fn log_request_errors(req: Request<Body>, next: Next) -> Response {
    let uri = req.uri().clone();
    let method = req.method().clone();
    let begin = Instant::now();

    let response = next.run(req).await;
    let status = response.status();
    let elapsed_ms = begin.elapsed().as_millis() as u64;

    if is_rotated_segment(&method, uri.path(), status) {
        // players routinely ask for segments the transcoder already deleted
        debug!(%uri, %status, elapsed_ms, "Segment not found");
    } else if status.is_client_error() {
        warn!(%method, %uri, %status, elapsed_ms, "Client error");
    } else if status.is_server_error() {
        error!(%method, %uri, %status, elapsed_ms, "Server error");
    }

    response
}

fn is_rotated_segment(method: &Method, path: &str, status: StatusCode) -> bool {
    *method == Method::GET && status == StatusCode::NOT_FOUND && path.starts_with("/streams/")
}
