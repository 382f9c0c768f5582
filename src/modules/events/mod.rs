//! Event system for the fetch engine.
//!
//! Provides hooks for logging and custom reactions around cache, network and
//! challenge activity.

use chrono::{DateTime, Utc};
use http::{HeaderMap, Method};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Structured pre-request event.
#[derive(Debug, Clone)]
pub struct PreRequestEvent {
    pub identity: String,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub timestamp: DateTime<Utc>,
}

/// Structured post-response event.
#[derive(Debug, Clone)]
pub struct PostResponseEvent {
    pub identity: String,
    pub url: Url,
    pub method: Method,
    pub status: u16,
    pub bytes: usize,
    pub truncated: bool,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CacheHitEvent {
    pub identity: String,
    pub url: String,
    pub age_hours: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChallengeEvent {
    pub identity: String,
    pub domain: String,
    pub challenge_type: String,
    pub resolver: Option<String>,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub identity: String,
    pub domain: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub identity: String,
    pub domain: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum FetchEvent {
    PreRequest(PreRequestEvent),
    PostResponse(PostResponseEvent),
    CacheHit(CacheHitEvent),
    Challenge(ChallengeEvent),
    Error(ErrorEvent),
    Retry(RetryEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &FetchEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: FetchEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &FetchEvent) {
        match event {
            FetchEvent::PreRequest(pre) => {
                log::debug!("[{}] -> {} {}", pre.identity, pre.method, pre.url);
            }
            FetchEvent::PostResponse(post) => {
                log::debug!(
                    "[{}] <- {} {} -> {} ({} bytes{}, {:.2}s)",
                    post.identity,
                    post.method,
                    post.url,
                    post.status,
                    post.bytes,
                    if post.truncated { ", truncated" } else { "" },
                    post.latency.as_secs_f64()
                );
            }
            FetchEvent::CacheHit(hit) => {
                log::debug!(
                    "[{}] returning cached result for {} (age {:.2}h)",
                    hit.identity,
                    hit.url,
                    hit.age_hours
                );
            }
            FetchEvent::Challenge(challenge) => {
                log::info!(
                    "[{}] challenge {} ({}) resolver={} success={}",
                    challenge.identity,
                    challenge.domain,
                    challenge.challenge_type,
                    challenge.resolver.as_deref().unwrap_or("none"),
                    challenge.success
                );
            }
            FetchEvent::Error(error) => {
                log::warn!("[{}] error {} -> {}", error.identity, error.domain, error.error);
            }
            FetchEvent::Retry(retry) => {
                log::info!("[{}] retry {} ({})", retry.identity, retry.domain, retry.reason);
            }
        }
    }
}
