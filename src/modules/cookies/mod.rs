//! Cookie persistence for scraper identities.
//!
//! [`CookieJar`] is the in-memory jar used while a fetch is in flight. It
//! implements [`reqwest::cookie::CookieStore`], so the transport injects and
//! extracts cookies on every redirect hop through the same jar.
//! [`CookieFileStore`] persists one jar per identity between fetches and
//! process lifetimes.

mod store;

pub use store::{CookieError, CookieFileStore};

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use http::HeaderMap;
use http::header::{HeaderValue, SET_COOKIE};
use serde::{Deserialize, Serialize};
use url::Url;

/// One stored cookie. Unique by `(name, domain, path)` within a jar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CookieRecord {
    /// Session cookie (no expiry) scoped to `domain` and `/`.
    pub fn session(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: normalize_domain(&domain.into()),
            path: "/".into(),
            secure: false,
            expires_at: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether this cookie should be sent to `url`.
    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let domain_ok = host == self.domain || host.ends_with(&format!(".{}", self.domain));
        let path_ok = path_matches(url.path(), &self.path);
        let scheme_ok = !self.secure || url.scheme() == "https";
        domain_ok && path_ok && scheme_ok
    }

    fn key(&self) -> CookieKey {
        (self.domain.clone(), self.path.clone(), self.name.clone())
    }
}

type CookieKey = (String, String, String);

/// Thread-safe in-memory cookie jar.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: RwLock<BTreeMap<CookieKey, CookieRecord>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = CookieRecord>) -> Self {
        let jar = Self::new();
        jar.replace_all(records);
        jar
    }

    /// Swap the whole jar content, e.g. after loading from disk.
    pub fn replace_all(&self, records: impl IntoIterator<Item = CookieRecord>) {
        if let Ok(mut guard) = self.cookies.write() {
            guard.clear();
            for record in records {
                guard.insert(record.key(), record);
            }
        }
    }

    /// Insert or overwrite the cookie with the same name, domain and path.
    pub fn set(&self, record: CookieRecord) {
        if let Ok(mut guard) = self.cookies.write() {
            guard.insert(record.key(), record);
        }
    }

    pub fn remove(&self, domain: &str, path: &str, name: &str) -> Option<CookieRecord> {
        let key = (normalize_domain(domain), path.to_string(), name.to_string());
        self.cookies.write().ok().and_then(|mut guard| guard.remove(&key))
    }

    /// Live (non-expired) cookies, ordered by domain, path, name.
    pub fn records(&self) -> Vec<CookieRecord> {
        let now = Utc::now();
        self.cookies
            .read()
            .map(|guard| {
                guard
                    .values()
                    .filter(|record| !record.is_expired(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Live cookies that would be sent to `url`.
    pub fn matching(&self, url: &Url) -> Vec<CookieRecord> {
        self.records()
            .into_iter()
            .filter(|record| record.matches(url))
            .collect()
    }

    /// `Cookie` header value for `url`, longest paths first.
    pub fn header_value(&self, url: &Url) -> Option<String> {
        let mut matching = self.matching(url);
        if matching.is_empty() {
            return None;
        }
        matching.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        Some(
            matching
                .iter()
                .map(|record| format!("{}={}", record.name, record.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Apply one raw `Set-Cookie` value received from `url`.
    pub fn store_set_cookie(&self, raw: &str, url: &Url) {
        let Some(parsed) = parse_set_cookie(raw, url, Utc::now()) else {
            log::debug!("ignoring malformed set-cookie from {url}: {raw}");
            return;
        };

        if parsed.is_expired(Utc::now()) {
            self.remove(&parsed.domain, &parsed.path, &parsed.name);
        } else {
            self.set(parsed);
        }
    }

    /// Apply every `Set-Cookie` header of a response.
    pub fn store_response_cookies(&self, headers: &HeaderMap, url: &Url) {
        for value in headers.get_all(SET_COOKIE) {
            if let Ok(raw) = value.to_str() {
                self.store_set_cookie(raw, url);
            }
        }
    }

    /// Debug rendering grouped the way cookie dumps are usually read.
    pub fn describe(&self) -> String {
        self.records()
            .iter()
            .map(|record| {
                format!(
                    "{{{}: {{{}: {{{}={}}}}}}}",
                    record.domain, record.path, record.name, record.value
                )
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl reqwest::cookie::CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        for value in cookie_headers {
            if let Ok(raw) = value.to_str() {
                self.store_set_cookie(raw, url);
            }
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.header_value(url)
            .and_then(|value| HeaderValue::from_str(&value).ok())
    }
}

/// Parse a `Set-Cookie` header value in the context of the response URL.
///
/// `Max-Age` takes precedence over `Expires`; far-future dates saturate.
pub fn parse_set_cookie(raw: &str, url: &Url, now: DateTime<Utc>) -> Option<CookieRecord> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut record = CookieRecord {
        name: name.to_string(),
        value: value.trim().trim_matches('"').to_string(),
        domain: normalize_domain(url.host_str()?),
        path: default_path(url),
        secure: false,
        expires_at: None,
    };
    let mut max_age: Option<i64> = None;

    for attribute in parts {
        let (key, val) = match attribute.split_once('=') {
            Some((key, val)) => (key.trim(), val.trim()),
            None => (attribute.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "domain" if !val.is_empty() => record.domain = normalize_domain(val),
            "path" if val.starts_with('/') => record.path = val.to_string(),
            "secure" => record.secure = true,
            "expires" => record.expires_at = parse_cookie_date(val),
            "max-age" => max_age = val.parse().ok(),
            _ => {}
        }
    }

    if let Some(seconds) = max_age {
        record.expires_at = Some(
            chrono::Duration::try_seconds(seconds)
                .and_then(|delta| now.checked_add_signed(delta))
                .unwrap_or(if seconds <= 0 {
                    DateTime::<Utc>::MIN_UTC
                } else {
                    DateTime::<Utc>::MAX_UTC
                }),
        );
    }

    Some(record)
}

fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc2822(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%a, %d-%b-%Y %H:%M:%S GMT", "%A, %d-%b-%y %H:%M:%S GMT", "%a, %d %b %Y %H:%M:%S GMT"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if cookie_path == "/" || request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/')
            || request_path[cookie_path.len()..].starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::cookie::CookieStore;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn parses_attributes() {
        let now = Utc::now();
        let record = parse_set_cookie(
            "sid=abc123; Domain=.Example.com; Path=/app; Secure; Max-Age=60",
            &url("https://www.example.com/app/login"),
            now,
        )
        .unwrap();

        assert_eq!(record.name, "sid");
        assert_eq!(record.value, "abc123");
        assert_eq!(record.domain, "example.com");
        assert_eq!(record.path, "/app");
        assert!(record.secure);
        assert_eq!(record.expires_at, Some(now + chrono::Duration::seconds(60)));
    }

    #[test]
    fn defaults_domain_and_path_from_url() {
        let record =
            parse_set_cookie("a=1", &url("http://example.com/dir/page.html"), Utc::now()).unwrap();
        assert_eq!(record.domain, "example.com");
        assert_eq!(record.path, "/dir");
        assert!(record.expires_at.is_none());
    }

    #[test]
    fn parses_expires_formats() {
        let now = Utc::now();
        let record = parse_set_cookie(
            "a=1; Expires=Wed, 21 Oct 2037 07:28:00 GMT",
            &url("http://example.com/"),
            now,
        )
        .unwrap();
        assert_eq!(record.expires_at.unwrap().to_rfc3339(), "2037-10-21T07:28:00+00:00");

        let record = parse_set_cookie(
            "a=1; expires=Wed, 21-Oct-2037 07:28:00 GMT",
            &url("http://example.com/"),
            now,
        )
        .unwrap();
        assert!(record.expires_at.is_some());
    }

    #[test]
    fn huge_max_age_saturates() {
        let record = parse_set_cookie(
            "a=1; Max-Age=99999999999999999",
            &url("http://example.com/"),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(record.expires_at, Some(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn later_set_overwrites_same_key() {
        let jar = CookieJar::new();
        jar.set(CookieRecord::session("sid", "first", "example.com"));
        jar.set(CookieRecord::session("sid", "second", "example.com"));
        jar.set(CookieRecord::session("sid", "other-path", "example.com").with_path("/x"));

        let records = jar.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.path == "/" && r.value == "second"));
    }

    #[test]
    fn header_only_includes_matching_cookies() {
        let jar = CookieJar::new();
        jar.set(CookieRecord::session("a", "1", "example.com"));
        jar.set(CookieRecord::session("b", "2", "other.com"));
        let mut secure = CookieRecord::session("c", "3", "example.com");
        secure.secure = true;
        jar.set(secure);
        jar.set(CookieRecord::session("d", "4", "example.com").with_path("/deep"));

        assert_eq!(
            jar.header_value(&url("http://sub.example.com/page")).as_deref(),
            Some("a=1")
        );
        assert_eq!(
            jar.header_value(&url("https://example.com/deep/x")).as_deref(),
            Some("d=4; a=1; c=3")
        );
        assert!(jar.header_value(&url("http://unrelated.org/")).is_none());
        assert!(!CookieRecord::session("e", "5", "example.com")
            .with_path("/deep")
            .matches(&url("http://example.com/deeper")));
    }

    #[test]
    fn expired_set_cookie_deletes() {
        let jar = CookieJar::new();
        let origin = url("http://example.com/");
        jar.store_set_cookie("sid=live", &origin);
        assert_eq!(jar.records().len(), 1);

        jar.store_set_cookie("sid=gone; Max-Age=0", &origin);
        assert!(jar.records().is_empty());
    }

    #[test]
    fn reqwest_cookie_store_round_trip() {
        let jar = CookieJar::new();
        let origin = url("https://example.com/");
        let headers = [
            HeaderValue::from_static("a=1; Path=/"),
            HeaderValue::from_static("b=2; Path=/"),
        ];
        jar.set_cookies(&mut headers.iter(), &origin);

        let header = jar.cookies(&origin).unwrap();
        assert_eq!(header.to_str().unwrap(), "a=1; b=2");
    }
}
