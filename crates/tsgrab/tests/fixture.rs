#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::http::header::{CONTENT_RANGE, RANGE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::net::TcpListener;

use tsgrab_engine::{ClientConfig, DownloadConfig, HttpClient};

pub const SEGMENT_LEN: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
}

pub struct TestServer {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl TestServer {
    pub async fn start(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://127.0.0.1:{}", addr.port());

        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorder = requests.clone();
        let app = router.layer(axum::middleware::from_fn(
            move |req: axum::extract::Request, next: axum::middleware::Next| {
                let recorder = recorder.clone();
                async move {
                    recorder.lock().unwrap().push(RecordedRequest {
                        method: req.method().to_string(),
                        path: req.uri().path().to_string(),
                        query: req.uri().query().map(str::to_string),
                        headers: req.headers().clone(),
                    });
                    next.run(req).await
                }
            },
        ));

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests_to(path).len()
    }

    pub fn total(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

pub fn client() -> HttpClient {
    HttpClient::new(&ClientConfig {
        use_system_proxy: false,
        ..ClientConfig::default()
    })
    .unwrap()
}

pub fn fast_config() -> DownloadConfig {
    DownloadConfig {
        max_threads: 4,
        timeout_secs: 5,
        retry_delay_ms: 10,
        max_retries: 3,
        ..DownloadConfig::default()
    }
}

/// Deterministic, segment-specific payload.
pub fn segment_body(index: usize) -> Vec<u8> {
    (0..SEGMENT_LEN)
        .map(|i| ((i * 31 + index * 7) % 251) as u8)
        .collect()
}

pub fn playlist(names: &[String]) -> String {
    let mut text = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n");
    for name in names {
        text.push_str("#EXTINF:4.0,\n");
        text.push_str(name);
        text.push('\n');
    }
    text.push_str("#EXT-X-ENDLIST\n");
    text
}

pub fn segment_names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("seg-{i}.ts")).collect()
}

/// Serves `body`, honoring an open-ended `Range: bytes=N-` with `206`.
pub fn ranged(headers: &HeaderMap, body: Vec<u8>) -> Response {
    let start = headers
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.strip_suffix('-'))
        .and_then(|v| v.parse::<usize>().ok());

    match start {
        Some(start) if start < body.len() => {
            let content_range = format!("bytes {start}-{}/{}", body.len() - 1, body.len());
            (
                StatusCode::PARTIAL_CONTENT,
                [(CONTENT_RANGE, content_range)],
                body[start..].to_vec(),
            )
                .into_response()
        }
        _ => body.into_response(),
    }
}
