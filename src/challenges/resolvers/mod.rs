//! Challenge resolver registry.
//!
//! A resolver turns a blocked response into a usable page body, or reports
//! that it could not. Resolvers are constructed by the caller and injected
//! into each fetcher through a [`ResolverSet`].

mod captcha;
mod flaresolverr;

pub use captcha::CaptchaResolver;
pub use flaresolverr::FlareSolverrResolver;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use thiserror::Error;
use url::Url;

use crate::challenges::core::{HttpTransport, TransportError, TransportResponse};
use crate::challenges::detectors::ChallengeKind;
use crate::external_deps::captcha::CaptchaError;
use crate::modules::cookies::CookieJar;

/// Everything a resolver may use while handling one blocked response.
pub struct ResolveContext<'a> {
    pub identity: &'a str,
    pub url: &'a Url,
    pub kind: ChallengeKind,
    pub blocked: &'a TransportResponse,
    pub jar: &'a Arc<CookieJar>,
    pub user_agent: &'a str,
    /// Caller headers of the original request, forwarded on resolver submissions.
    pub extra_headers: &'a HeaderMap,
    pub transport: &'a Arc<dyn HttpTransport>,
    pub timeout: Option<Duration>,
    pub size_limit: usize,
    /// Retry ceiling for interactive challenges.
    pub max_attempts: u32,
}

/// Failure states that can occur while resolving a challenge.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// An interactive challenge needs an answer nobody supplied.
    #[error("user input required: {0}")]
    InputRequired(String),
    #[error("resolver transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("captcha provider error: {0}")]
    Captcha(#[from] CaptchaError),
    #[error("resolver protocol error: {0}")]
    Protocol(String),
}

/// Capability shared by every resolver.
#[async_trait]
pub trait ChallengeResolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn handles(&self, kind: ChallengeKind) -> bool;

    /// `Ok(None)` means the resolver ran but the wall stayed up.
    async fn resolve(&self, context: &ResolveContext<'_>) -> Result<Option<Bytes>, ResolveError>;
}

/// Ordered set of resolvers; the first one handling a kind wins.
#[derive(Clone, Default)]
pub struct ResolverSet {
    resolvers: Vec<Arc<dyn ChallengeResolver>>,
}

impl ResolverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resolver: Arc<dyn ChallengeResolver>) -> Self {
        self.push(resolver);
        self
    }

    pub fn push(&mut self, resolver: Arc<dyn ChallengeResolver>) {
        self.resolvers.push(resolver);
    }

    pub fn find(&self, kind: ChallengeKind) -> Option<&Arc<dyn ChallengeResolver>> {
        self.resolvers.iter().find(|resolver| resolver.handles(kind))
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }
}
