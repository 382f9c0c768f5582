//! HTTP transport abstraction shared by the fetcher and challenge resolvers.
//!
//! Every network exchange in the crate goes through [`HttpTransport`], which
//! keeps the orchestration logic testable against stub transports and lets
//! resolvers reuse the fetcher's timeout, size limit and cookie jar.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, COOKIE, HeaderValue, LOCATION};
use http::{HeaderMap, Method};
use thiserror::Error;
use url::Url;

use crate::modules::cookies::CookieJar;
use crate::modules::redirect::{RedirectPolicy, is_redirect_status};

/// Contract that abstracts the underlying HTTP client.
///
/// Implementations must read at most `size_limit` body bytes and must not
/// decompress the body themselves; [`TransportResponse::decode_body`] does
/// that once the bounded read is complete.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: TransportRequest)
    -> Result<TransportResponse, TransportError>;
}

/// Fully built outgoing request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub redirect: RedirectPolicy,
    pub timeout: Option<Duration>,
    pub size_limit: usize,
}

impl TransportRequest {
    pub fn new(method: Method, url: Url, size_limit: usize) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            redirect: RedirectPolicy::Follow,
            timeout: None,
            size_limit,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Option<Vec<u8>>) -> Self {
        self.body = body;
        self
    }

    pub fn with_redirect(mut self, redirect: RedirectPolicy) -> Self {
        self.redirect = redirect;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Minimal response representation returned by the transport abstraction.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub url: Url,
    pub headers: HeaderMap,
    /// Raw body, still content-encoded, at most `size_limit` bytes.
    pub body: Vec<u8>,
    /// Set when the body was cut at the size limit.
    pub truncated: bool,
}

impl TransportResponse {
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
    }

    /// `Content-Length` as announced by the server.
    pub fn declared_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    }

    pub fn is_gzip(&self) -> bool {
        self.headers
            .get(CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("gzip"))
    }

    /// Body with gzip content-encoding removed, at most `limit` bytes.
    ///
    /// The flag is set when the decoded body ran past `limit` and was cut. A
    /// body already cut on the wire yields whatever decompressed cleanly.
    pub fn decode_body(&self, limit: usize) -> (Vec<u8>, bool) {
        let mut decoded = if self.is_gzip() {
            let ceiling = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
            let mut decoded = Vec::new();
            let mut reader = GzDecoder::new(self.body.as_slice()).take(ceiling);
            if let Err(err) = reader.read_to_end(&mut decoded) {
                log::warn!("partial gzip body from {}: {err}", self.url);
            }
            decoded
        } else {
            self.body.clone()
        };

        let cut = decoded.len() > limit;
        decoded.truncate(limit);
        (decoded, cut)
    }

    pub fn decoded_body(&self, limit: usize) -> Vec<u8> {
        self.decode_body(limit).0
    }

    pub fn text_lossy(&self, limit: usize) -> String {
        String::from_utf8_lossy(&self.decoded_body(limit)).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("too many redirects (limit {0})")]
    TooManyRedirects(usize),
    #[error("invalid header '{0}'")]
    InvalidHeader(String),
}

/// Send `request` with cookies from `jar`, then record the response cookies.
///
/// `ReqwestTransport` drops the explicit `Cookie` header when it follows
/// redirects, so its cookie provider fills each hop from the same jar,
/// including cookies set by earlier hops. Storing the final hop's cookies
/// again is idempotent.
pub async fn send_with_jar(
    transport: &Arc<dyn HttpTransport>,
    jar: &CookieJar,
    mut request: TransportRequest,
) -> Result<TransportResponse, TransportError> {
    if !request.headers.contains_key(COOKIE)
        && let Some(cookies) = jar.header_value(&request.url)
    {
        let value = HeaderValue::from_str(&cookies)
            .map_err(|_| TransportError::InvalidHeader("cookie".into()))?;
        request.headers.insert(COOKIE, value);
    }

    let response = transport.execute(request).await?;
    jar.store_response_cookies(&response.headers, &response.url);
    Ok(response)
}

/// Follow redirects by hand, routing every hop's cookies through `jar`.
///
/// Redirect hops are replayed as bodiless GETs with the original headers.
pub async fn follow_redirects(
    transport: &Arc<dyn HttpTransport>,
    jar: &CookieJar,
    mut request: TransportRequest,
    max_hops: usize,
) -> Result<TransportResponse, TransportError> {
    request.redirect = RedirectPolicy::Intercept;

    for _ in 0..=max_hops {
        let mut hop = request.clone();
        hop.headers.remove(COOKIE);
        let response = send_with_jar(transport, jar, hop).await?;

        if !is_redirect_status(response.status) {
            return Ok(response);
        }
        let Some(next) = resolve_redirect(&response) else {
            return Ok(response);
        };

        request.url = next;
        request.method = Method::GET;
        request.body = None;
    }

    Err(TransportError::TooManyRedirects(max_hops))
}

/// Absolute target of a redirect response, relative locations included.
pub fn resolve_redirect(response: &TransportResponse) -> Option<Url> {
    let location = response.location()?;
    let location = location.strip_prefix('=').unwrap_or(location);

    if let Ok(absolute) = Url::parse(location)
        && absolute.has_host()
    {
        return Some(absolute);
    }

    response.url.join(location).ok()
}
