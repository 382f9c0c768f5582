//! Captcha provider integrations.
//!
//! Adapters for third-party captcha solving services. The captcha resolver
//! stays agnostic of vendor details and only asks for an answer token.

mod twocaptcha;

pub use twocaptcha::TwoCaptchaProvider;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// High-level configuration that controls captcha solving behaviour.
#[derive(Debug, Clone)]
pub struct CaptchaConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Details describing the captcha the site issued.
#[derive(Debug, Clone)]
pub struct CaptchaTask {
    pub site_key: String,
    pub page_url: Url,
    pub data: HashMap<String, String>,
}

impl CaptchaTask {
    pub fn new(site_key: impl Into<String>, page_url: Url) -> Self {
        Self {
            site_key: site_key.into(),
            page_url,
            data: HashMap::new(),
        }
    }

    pub fn insert_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Resolved captcha token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaSolution {
    pub token: String,
}

impl CaptchaSolution {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

/// Common result type returned by captcha providers.
pub type CaptchaResult = Result<CaptchaSolution, CaptchaError>;

/// Shared interface implemented by captcha vendors.
#[async_trait]
pub trait CaptchaProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn solve(&self, task: &CaptchaTask) -> CaptchaResult;
}

/// Errors surfaced by captcha providers.
#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("captcha provider misconfigured: {0}")]
    Configuration(String),
    #[error("captcha provider request failed: {0}")]
    Provider(String),
    #[error("captcha solving timed out after {0:?}")]
    Timeout(Duration),
    #[error("captcha provider rejected the task: {0}")]
    Rejected(String),
}
