//! Bot-verification resolver delegating to a FlareSolverr instance.
//!
//! The verification wall is solved in a real browser by the service; the
//! resolver copies the clearance cookies back into the jar and returns the
//! page the browser ended up on.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{ChallengeResolver, ResolveContext, ResolveError};
use crate::challenges::core::{TransportRequest, send_with_jar};
use crate::challenges::detectors::ChallengeKind;
use crate::modules::cookies::CookieRecord;

const DEFAULT_MAX_TIMEOUT: Duration = Duration::from_secs(60);
/// Extra time the `/v1` call gets on top of the solver's own deadline.
const SOLVE_HEADROOM: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct FlareSolverrResolver {
    endpoint: Url,
    max_timeout: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SolveCommand<'a> {
    cmd: &'static str,
    url: &'a str,
    max_timeout: u64,
    user_agent: &'a str,
    cookies: Vec<CommandCookie<'a>>,
}

#[derive(Debug, Serialize)]
struct CommandCookie<'a> {
    name: &'a str,
    value: &'a str,
}

#[derive(Debug, Deserialize)]
struct SolveReply {
    status: String,
    #[serde(default)]
    message: String,
    solution: Option<Solution>,
}

#[derive(Debug, Deserialize)]
struct Solution {
    #[serde(default)]
    response: String,
    #[serde(default)]
    cookies: Vec<SolutionCookie>,
}

#[derive(Debug, Deserialize)]
struct SolutionCookie {
    name: String,
    value: String,
    domain: String,
    #[serde(default = "root_path")]
    path: String,
    #[serde(default)]
    expires: Option<f64>,
    #[serde(default)]
    secure: bool,
}

fn root_path() -> String {
    "/".to_string()
}

impl SolutionCookie {
    fn into_record(self) -> CookieRecord {
        let mut record = CookieRecord::session(self.name, self.value, self.domain).with_path(self.path);
        record.secure = self.secure;
        if let Some(at) = self
            .expires
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
        {
            record = record.with_expiry(at);
        }
        record
    }
}

impl FlareSolverrResolver {
    /// `endpoint` is the service root, e.g. `http://localhost:8191`.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            max_timeout: DEFAULT_MAX_TIMEOUT,
        }
    }

    pub fn with_max_timeout(mut self, max_timeout: Duration) -> Self {
        self.max_timeout = max_timeout;
        self
    }

    fn command_url(&self) -> Result<Url, ResolveError> {
        let mut base = self.endpoint.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join("v1")
            .map_err(|err| ResolveError::Protocol(format!("invalid endpoint: {err}")))
    }
}

#[async_trait]
impl ChallengeResolver for FlareSolverrResolver {
    fn name(&self) -> &'static str {
        "flaresolverr"
    }

    fn handles(&self, kind: ChallengeKind) -> bool {
        kind == ChallengeKind::BotVerification
    }

    async fn resolve(&self, context: &ResolveContext<'_>) -> Result<Option<Bytes>, ResolveError> {
        let max_timeout = context
            .timeout
            .map_or(self.max_timeout, |timeout| timeout.min(self.max_timeout));
        let existing = context.jar.matching(context.url);
        let command = SolveCommand {
            cmd: "request.get",
            url: context.url.as_str(),
            max_timeout: u64::try_from(max_timeout.as_millis()).unwrap_or(u64::MAX),
            user_agent: context.user_agent,
            cookies: existing
                .iter()
                .map(|record| CommandCookie {
                    name: &record.name,
                    value: &record.value,
                })
                .collect(),
        };
        let payload =
            serde_json::to_vec(&command).map_err(|err| ResolveError::Protocol(err.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        // JSON-escaped markup runs larger than the page itself.
        let request = TransportRequest::new(
            Method::POST,
            self.command_url()?,
            context.size_limit.saturating_mul(2),
        )
        .with_headers(headers)
        .with_body(Some(payload))
        .with_timeout(Some(max_timeout + SOLVE_HEADROOM));

        let response = send_with_jar(context.transport, context.jar, request).await?;
        if response.status != 200 {
            log::warn!(
                "flaresolverr returned http {} for {}",
                response.status,
                context.url
            );
            return Ok(None);
        }

        let raw = response.decoded_body(context.size_limit.saturating_mul(2));
        let reply: SolveReply = serde_json::from_slice(&raw)
            .map_err(|err| ResolveError::Protocol(err.to_string()))?;
        let solution = match (reply.status.as_str(), reply.solution) {
            ("ok", Some(solution)) => solution,
            (status, _) => {
                log::warn!(
                    "flaresolverr failed for {} ({status}): {}",
                    context.url,
                    reply.message
                );
                return Ok(None);
            }
        };

        for cookie in solution.cookies {
            context.jar.set(cookie.into_record());
        }

        let mut body = solution.response.into_bytes();
        body.truncate(context.size_limit);
        Ok(Some(Bytes::from(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenges::core::HttpTransport;
    use crate::modules::cookies::CookieJar;
    use crate::test_support::{StubTransport, response};
    use std::sync::Arc;

    fn blocked() -> crate::challenges::core::TransportResponse {
        response(503, "https://example.com/page", "<div class=\"cf-browser-verification\"></div>")
    }

    #[tokio::test]
    async fn posts_command_and_imports_cookies() {
        let reply = r#"{"status":"ok","message":"","solution":{
            "url":"https://example.com/page","status":200,
            "response":"<html>real page</html>",
            "cookies":[{"name":"cf_clearance","value":"xyz","domain":".example.com","path":"/","expires":4102444800.0,"secure":true}]
        }}"#;
        let stub = StubTransport::new(vec![Ok(response(200, "http://localhost:8191/v1", reply))]);
        let transport: Arc<dyn HttpTransport> = stub.clone();
        let jar = Arc::new(CookieJar::new());
        jar.set(CookieRecord::session("sid", "1", "example.com"));
        let url = Url::parse("https://example.com/page").unwrap();
        let blocked = blocked();
        let headers = HeaderMap::new();
        let context = ResolveContext {
            identity: "site",
            url: &url,
            kind: ChallengeKind::BotVerification,
            blocked: &blocked,
            jar: &jar,
            user_agent: "agent/1.0",
            extra_headers: &headers,
            transport: &transport,
            timeout: Some(Duration::from_secs(20)),
            size_limit: 1024,
            max_attempts: 3,
        };

        let resolver = FlareSolverrResolver::new(Url::parse("http://localhost:8191").unwrap());
        let body = resolver.resolve(&context).await.unwrap().unwrap();
        assert_eq!(&body[..], b"<html>real page</html>");

        let sent = stub.requests();
        assert_eq!(sent[0].url.as_str(), "http://localhost:8191/v1");
        assert_eq!(sent[0].timeout, Some(Duration::from_secs(30)));
        let command: serde_json::Value = serde_json::from_slice(sent[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(command["cmd"], "request.get");
        assert_eq!(command["maxTimeout"], 20000);
        assert_eq!(command["userAgent"], "agent/1.0");
        assert_eq!(command["cookies"][0]["name"], "sid");

        let clearance = jar
            .records()
            .into_iter()
            .find(|record| record.name == "cf_clearance")
            .unwrap();
        assert_eq!(clearance.domain, "example.com");
        assert!(clearance.secure);
        assert!(clearance.expires_at.is_some());
    }

    #[tokio::test]
    async fn failed_solve_is_not_an_error() {
        let reply = r#"{"status":"error","message":"Challenge not solved"}"#;
        let stub = StubTransport::new(vec![Ok(response(200, "http://localhost:8191/v1", reply))]);
        let transport: Arc<dyn HttpTransport> = stub;
        let jar = Arc::new(CookieJar::new());
        let url = Url::parse("https://example.com/page").unwrap();
        let blocked = blocked();
        let headers = HeaderMap::new();
        let context = ResolveContext {
            identity: "site",
            url: &url,
            kind: ChallengeKind::BotVerification,
            blocked: &blocked,
            jar: &jar,
            user_agent: "agent/1.0",
            extra_headers: &headers,
            transport: &transport,
            timeout: None,
            size_limit: 1024,
            max_attempts: 3,
        };

        let resolver = FlareSolverrResolver::new(Url::parse("http://localhost:8191/").unwrap());
        assert!(resolver.resolve(&context).await.unwrap().is_none());
    }
}
