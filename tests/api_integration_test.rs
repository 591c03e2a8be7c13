#![cfg(unix)]

use reqwest::StatusCode;
use rtsp_hls_gateway::{AppState, CommandTemplate, Config, StartResponse, TranscodeCommand};
use serde_json::{Value as JsonValue, json};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Stand-in transcoder: a shell snippet instead of ffmpeg.
struct Script(&'static str);

impl CommandTemplate for Script {
    fn build(&self, _source_url: &str, _output_dir: &Path) -> TranscodeCommand {
        TranscodeCommand::new("sh").args(["-c", self.0])
    }
}

/// Test harness running the HTTP API on an ephemeral port
struct TestServer {
    base_url: String,
    state: AppState,
    client: reqwest::Client,
    _workspace: TempDir,
}

impl TestServer {
    async fn start(script: &'static str) -> Self {
        let workspace = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let config = Config {
            workspace: workspace.path().display().to_string(),
            public_base_url: base_url.clone(),
            stop_grace_secs: 1,
            ..Default::default()
        };
        let state = AppState::with_template(&config, Script(script)).unwrap();

        let app = rtsp_hls_gateway::router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        Self {
            base_url,
            state,
            client,
            _workspace: workspace,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn stream_dir(&self, id: &str) -> PathBuf {
        self.state.supervisor.store().stream_dir(id)
    }

    async fn start_stream(&self) -> StartResponse {
        let response = self
            .client
            .post(self.url("/start"))
            .json(&json!({ "rtsp_url": "rtsp://example/test" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response.json().await.unwrap()
    }

    async fn stop_stream(&self, id: &str) -> (StatusCode, JsonValue) {
        let response = self
            .client
            .post(self.url(&format!("/stop/{id}")))
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }
}

#[tokio::test]
async fn test_start_stop_scenario() {
    let server = TestServer::start("exec sleep 30").await;

    let started = server.start_stream().await;
    assert_eq!(started.message, "Stream started");
    assert_eq!(
        started.hls_url,
        format!("{}/streams/{}/index.m3u8", server.base_url, started.stream_id)
    );
    assert!(server.stream_dir(&started.stream_id).is_dir());
    assert!(server.state.supervisor.contains(&started.stream_id));

    let (status, body) = server.stop_stream(&started.stream_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "message": format!("Stream {} stopped", started.stream_id) })
    );

    let (status, body) = server.stop_stream(&started.stream_id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "Stream not found" }));
}

#[tokio::test]
async fn test_start_requires_rtsp_url() {
    let server = TestServer::start("exec sleep 30").await;

    for body in [json!({}), json!({ "rtsp_url": "" }), json!({ "url": "rtsp://x" })] {
        let response = server
            .client
            .post(server.url("/start"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: JsonValue = response.json().await.unwrap();
        assert_eq!(body, json!({ "error": "Missing RTSP URL" }));
    }

    let response = server
        .client
        .post(server.url("/start"))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(server.state.supervisor.is_empty());
}

#[tokio::test]
async fn test_stop_unknown_stream() {
    let server = TestServer::start("exec sleep 30").await;

    let (status, body) = server.stop_stream("does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "Stream not found" }));
}

#[tokio::test]
async fn test_natural_exit_deregisters_stream() {
    let server = TestServer::start("exit 0").await;

    let started = server.start_stream().await;

    let mut gone = false;
    for _ in 0..100 {
        if !server.state.supervisor.contains(&started.stream_id) {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(gone, "stream was not removed after its process exited");

    let (status, _) = server.stop_stream(&started.stream_id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let log = tokio::fs::read_to_string(server.stream_dir(&started.stream_id).join("ffmpeg.log"))
        .await
        .unwrap();
    assert!(log.contains("Transcoder exited with return code 0"), "{log}");
}

#[tokio::test]
async fn test_serve_stream_files() {
    let server = TestServer::start("exec sleep 30").await;
    let started = server.start_stream().await;
    let dir = server.stream_dir(&started.stream_id);

    let playlist = b"#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXTINF:2.0,\nindex0.ts\n";
    let segment = (0..=255u8).cycle().take(4096).collect::<Vec<_>>();
    tokio::fs::write(dir.join("index.m3u8"), playlist).await.unwrap();
    tokio::fs::write(dir.join("index0.ts"), &segment).await.unwrap();

    let response = server.client.get(&started.hls_url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/vnd.apple.mpegurl"
    );
    assert_eq!(response.bytes().await.unwrap().as_ref(), playlist);

    let segment_url = server.url(&format!("/streams/{}/index0.ts", started.stream_id));
    let response = server.client.get(&segment_url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().as_ref(), segment.as_slice());

    let response = server
        .client
        .get(&segment_url)
        .header("Range", "bytes=100-199")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()["content-range"], "bytes 100-199/4096");
    assert_eq!(response.bytes().await.unwrap().as_ref(), &segment[100..200]);

    // files stay readable after the stream is stopped
    let (status, _) = server.stop_stream(&started.stream_id).await;
    assert_eq!(status, StatusCode::OK);
    let response = server.client.get(&started.hls_url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_serve_missing_files() {
    let server = TestServer::start("exec sleep 30").await;
    let started = server.start_stream().await;

    for path in [
        "/streams/unknown/index.m3u8".to_string(),
        format!("/streams/{}/index.m3u8", started.stream_id),
        format!("/streams/{}/index9.ts", started.stream_id),
        format!("/streams/{}/%2E%2E/%2E%2E/Cargo.toml", started.stream_id),
    ] {
        let response = server.client.get(server.url(&path)).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
    }

    server.state.supervisor.shutdown().await;
    assert!(server.state.supervisor.is_empty());
}
