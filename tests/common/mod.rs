#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use http::HeaderMap;
use http::header::HeaderValue;
use sitefetch_rs::{
    CookieFileStore, Fetcher, FetcherBuilder, HttpTransport, ResponseCache, TransportError,
    TransportRequest, TransportResponse,
};
use url::Url;

pub const BASE: &str = "https://example.com";

/// Replays canned replies in order and records what was sent.
pub struct StubTransport {
    replies: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl StubTransport {
    pub fn new(replies: Vec<TransportResponse>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn cookie_header(&self, index: usize) -> Option<String> {
        self.requests()[index]
            .headers
            .get("cookie")
            .map(|value| value.to_str().unwrap().to_string())
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn execute(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Transport("connection refused".into())))
    }
}

pub fn reply(status: u16, url: &str, body: impl Into<Vec<u8>>) -> TransportResponse {
    TransportResponse {
        status,
        url: Url::parse(url).unwrap(),
        headers: HeaderMap::new(),
        body: body.into(),
        truncated: false,
    }
}

pub fn with_header(mut response: TransportResponse, name: &'static str, value: &str) -> TransportResponse {
    response
        .headers
        .append(name, HeaderValue::from_str(value).unwrap());
    response
}

/// Builder wired to an in-memory cache and a cookie directory under `dir`.
pub fn builder(dir: &Path, cache: &ResponseCache) -> FetcherBuilder {
    let _ = env_logger::builder().is_test(true).try_init();
    Fetcher::builder("testsite", BASE)
        .with_cache(cache.clone())
        .with_cookie_store(CookieFileStore::new(dir.join("cookies")).unwrap())
}

pub fn stub_fetcher(dir: &Path, cache: &ResponseCache, stub: &Arc<StubTransport>) -> Fetcher {
    builder(dir, cache)
        .with_transport(stub.clone())
        .build()
        .unwrap()
}
