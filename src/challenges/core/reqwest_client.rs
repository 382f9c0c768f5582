//! Reqwest-based implementation of the [`HttpTransport`] trait.
//!
//! Holds two clients sharing one cookie jar: one follows redirects (every hop
//! reads and writes the jar), the other returns redirect responses untouched.
//! Content decoding is disabled so the body can be bounded on the wire and
//! decoded afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use http::header::{COOKIE, HOST};
use reqwest::{Client, redirect::Policy};

use super::transport::{HttpTransport, TransportError, TransportRequest, TransportResponse};
use crate::modules::cookies::CookieJar;
use crate::modules::redirect::RedirectPolicy;

/// Reqwest-backed transport used by the fetcher and the resolvers.
pub struct ReqwestTransport {
    follow: Client,
    intercept: Client,
}

impl ReqwestTransport {
    /// Build both clients around `jar`.
    pub fn new(jar: Arc<CookieJar>) -> Result<Self, TransportError> {
        Ok(Self {
            follow: build_client(jar.clone(), RedirectPolicy::Follow.to_reqwest())?,
            intercept: build_client(jar, RedirectPolicy::Intercept.to_reqwest())?,
        })
    }

    /// Wrap existing clients. Both should have content decoding disabled; the
    /// intercepting client must not follow redirects.
    pub fn from_clients(follow: Client, intercept: Client) -> Self {
        Self { follow, intercept }
    }

    fn client(&self, policy: RedirectPolicy) -> &Client {
        match policy {
            RedirectPolicy::Follow => &self.follow,
            RedirectPolicy::Intercept => &self.intercept,
        }
    }
}

fn build_client(jar: Arc<CookieJar>, policy: Policy) -> Result<Client, TransportError> {
    Client::builder()
        .cookie_provider(jar)
        .redirect(policy)
        .no_gzip()
        .no_brotli()
        .build()
        .map_err(|err| TransportError::Transport(err.to_string()))
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let mut headers = request.headers;
        if request.redirect == RedirectPolicy::Follow {
            // hyper derives Host per hop and the cookie provider adds the jar's
            // cookies per hop. Fixed values would go stale after the first redirect.
            headers.remove(HOST);
            headers.remove(COOKIE);
        }

        let mut builder = self
            .client(request.redirect)
            .request(request.method, request.url.clone())
            .headers(headers);

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let mut response = builder.send().await.map_err(map_error)?;

        let status = response.status().as_u16();
        let url = response.url().clone();
        let headers = response.headers().clone();

        let mut body = BytesMut::new();
        let mut truncated = false;
        while let Some(chunk) = response.chunk().await.map_err(map_error)? {
            let room = request.size_limit.saturating_sub(body.len());
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(TransportResponse {
            status,
            url,
            headers,
            body: body.to_vec(),
            truncated,
        })
    }
}

fn map_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_redirect() {
        TransportError::TooManyRedirects(crate::modules::redirect::MAX_REDIRECTS)
    } else {
        TransportError::Transport(err.to_string())
    }
}
