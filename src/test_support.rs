//! Shared fixtures for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use http::HeaderMap;
use url::Url;

use crate::challenges::core::{HttpTransport, TransportError, TransportRequest, TransportResponse};

/// Transport replaying canned replies in order and recording every request.
pub struct StubTransport {
    replies: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl StubTransport {
    pub fn new(replies: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
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
            .unwrap_or_else(|| Err(TransportError::Transport("no stubbed reply left".into())))
    }
}

pub fn response(status: u16, url: &str, body: &str) -> TransportResponse {
    TransportResponse {
        status,
        url: Url::parse(url).unwrap(),
        headers: HeaderMap::new(),
        body: body.as_bytes().to_vec(),
        truncated: false,
    }
}
