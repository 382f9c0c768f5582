//! Challenge detection module.
//!
//! Identifies bot-verification walls, interactive captcha walls and
//! soft-block cookie pages from the status code and body markers.

use std::fmt;

/// Body marker of a bot-verification wall (served with 503).
pub const BOT_VERIFICATION_MARKER: &str = "cf-browser-verification";
/// Body marker of an interactive captcha wall (served with 403).
pub const CAPTCHA_MARKER: &str = "cf-captcha-bookmark";
/// Body marker of a soft-block cookie page (any status).
pub const SOFT_BLOCK_MARKER: &str = "sucuri_cloudproxy_js";

/// High level challenge categories supported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeKind {
    BotVerification,
    InteractiveCaptcha,
}

impl ChallengeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeKind::BotVerification => "bot_verification",
            ChallengeKind::InteractiveCaptcha => "interactive_captcha",
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies responses into challenge kinds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChallengeDetector {
    interactive_enabled: bool,
}

impl ChallengeDetector {
    pub fn new(interactive_enabled: bool) -> Self {
        Self {
            interactive_enabled,
        }
    }

    /// Captcha walls are only reported when interactive handling is enabled.
    pub fn detect(&self, status: u16, body: &str) -> Option<ChallengeKind> {
        match status {
            503 if body.contains(BOT_VERIFICATION_MARKER) => Some(ChallengeKind::BotVerification),
            403 if self.interactive_enabled && body.contains(CAPTCHA_MARKER) => {
                Some(ChallengeKind::InteractiveCaptcha)
            }
            _ => None,
        }
    }
}

pub fn has_soft_block_marker(body: &str) -> bool {
    body.contains(SOFT_BLOCK_MARKER)
}
