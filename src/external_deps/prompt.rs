//! Interface to the user-facing collaborator that collects captcha answers.
//!
//! Rendering the challenge and reading input is the host application's job;
//! the engine only describes what it needs answered.

use async_trait::async_trait;
use url::Url;

/// What the user is being asked to solve.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub heading: String,
    pub page_url: Url,
    pub site_key: String,
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Source of human-supplied captcha answers.
#[async_trait]
pub trait AnswerPrompt: Send + Sync {
    /// `None` means the user declined or supplied nothing.
    async fn ask(&self, request: &PromptRequest) -> Option<String>;
}
