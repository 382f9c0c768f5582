//! Redirect policy.
//!
//! Either the transport follows redirects itself (cookies still flow through
//! the shared jar on every hop), or redirects are intercepted and the
//! destination is handed back to the caller as a plain string.

use http::HeaderMap;
use http::header::{LOCATION, REFRESH};

/// Hop limit applied when the transport follows redirects.
pub const MAX_REDIRECTS: usize = 10;

const REDIRECT_STATUSES: [u16; 4] = [301, 302, 303, 307];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectPolicy {
    #[default]
    Follow,
    Intercept,
}

impl RedirectPolicy {
    pub fn from_follow(follow: bool) -> Self {
        if follow {
            RedirectPolicy::Follow
        } else {
            RedirectPolicy::Intercept
        }
    }

    pub fn to_reqwest(self) -> reqwest::redirect::Policy {
        match self {
            RedirectPolicy::Follow => reqwest::redirect::Policy::limited(MAX_REDIRECTS),
            RedirectPolicy::Intercept => reqwest::redirect::Policy::none(),
        }
    }

    /// Destination to hand back instead of a body, in intercept mode only.
    ///
    /// A `Refresh` header wins over `Location`; a leading `=` that some
    /// origins emit in `Location` is stripped.
    pub fn intercepted_location(self, status: u16, headers: &HeaderMap) -> Option<String> {
        if self == RedirectPolicy::Follow {
            return None;
        }

        if let Some(refresh) = headers.get(REFRESH).and_then(|v| v.to_str().ok()) {
            return Some(refresh_target(refresh));
        }

        if !REDIRECT_STATUSES.contains(&status) {
            return None;
        }

        headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(|location| location.strip_prefix('=').unwrap_or(location).to_string())
    }
}

pub fn is_redirect_status(status: u16) -> bool {
    REDIRECT_STATUSES.contains(&status) || status == 308
}

/// Target of a `Refresh: 5; url=/next` style header.
pub fn refresh_target(value: &str) -> String {
    let last = value.rsplit(';').next().unwrap_or(value).trim();
    let lower = last.to_ascii_lowercase();
    match lower.rfind("url=") {
        Some(idx) => last[idx + 4..].trim().to_string(),
        None => last.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn location(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn intercepts_location_on_redirect_status() {
        let policy = RedirectPolicy::Intercept;
        assert_eq!(
            policy.intercepted_location(302, &location("/next")).as_deref(),
            Some("/next")
        );
        assert_eq!(
            policy.intercepted_location(301, &location("=https://example.com/x")).as_deref(),
            Some("https://example.com/x")
        );
        assert!(policy.intercepted_location(200, &location("/ignored")).is_none());
    }

    #[test]
    fn follow_mode_never_intercepts() {
        assert!(RedirectPolicy::Follow
            .intercepted_location(302, &location("/next"))
            .is_none());
    }

    #[test]
    fn refresh_header_wins() {
        let mut headers = location("/from-location");
        headers.insert(REFRESH, HeaderValue::from_static("0; URL=/from-refresh"));
        assert_eq!(
            RedirectPolicy::Intercept
                .intercepted_location(200, &headers)
                .as_deref(),
            Some("/from-refresh")
        );
    }

    #[test]
    fn parses_refresh_variants() {
        assert_eq!(refresh_target("5;url=http://example.com/a"), "http://example.com/a");
        assert_eq!(refresh_target("/plain"), "/plain");
    }
}
