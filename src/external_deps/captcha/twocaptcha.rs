use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::{CaptchaConfig, CaptchaError, CaptchaProvider, CaptchaResult, CaptchaSolution, CaptchaTask};

const DEFAULT_ENDPOINT: &str = "https://2captcha.com/";
const NOT_READY: &str = "CAPCHA_NOT_READY";

/// Adapter for the 2captcha recaptcha service (`in.php` submit, `res.php` poll).
#[derive(Debug, Clone)]
pub struct TwoCaptchaProvider {
    pub api_key: String,
    pub config: CaptchaConfig,
    endpoint: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    status: i64,
    request: String,
}

impl TwoCaptchaProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_config(api_key, CaptchaConfig::default())
    }

    pub fn with_config(api_key: impl Into<String>, config: CaptchaConfig) -> Self {
        Self {
            api_key: api_key.into(),
            config,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            client: Client::new(),
        }
    }

    /// Point the provider at a compatible API host.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn api_url(&self, script: &str) -> Result<Url, CaptchaError> {
        Url::parse(&self.endpoint)
            .and_then(|base| base.join(script))
            .map_err(|err| CaptchaError::Configuration(err.to_string()))
    }

    async fn call(&self, url: Url, params: &[(&str, &str)]) -> Result<ApiReply, CaptchaError> {
        self.client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|err| CaptchaError::Provider(err.to_string()))?
            .json::<ApiReply>()
            .await
            .map_err(|err| CaptchaError::Provider(err.to_string()))
    }
}

#[async_trait]
impl CaptchaProvider for TwoCaptchaProvider {
    fn name(&self) -> &'static str {
        "twocaptcha"
    }

    async fn solve(&self, task: &CaptchaTask) -> CaptchaResult {
        if self.api_key.is_empty() {
            return Err(CaptchaError::Configuration("missing api key".into()));
        }

        let submitted = self
            .call(
                self.api_url("in.php")?,
                &[
                    ("key", self.api_key.as_str()),
                    ("method", "userrecaptcha"),
                    ("googlekey", task.site_key.as_str()),
                    ("pageurl", task.page_url.as_str()),
                    ("json", "1"),
                ],
            )
            .await?;
        if submitted.status != 1 {
            return Err(CaptchaError::Rejected(submitted.request));
        }
        let task_id = submitted.request;
        log::debug!("2captcha task {task_id} submitted for {}", task.page_url);

        let started = Instant::now();
        loop {
            tokio::time::sleep(self.config.poll_interval).await;
            if started.elapsed() > self.config.timeout {
                return Err(CaptchaError::Timeout(self.config.timeout));
            }

            let reply = self
                .call(
                    self.api_url("res.php")?,
                    &[
                        ("key", self.api_key.as_str()),
                        ("action", "get"),
                        ("id", task_id.as_str()),
                        ("json", "1"),
                    ],
                )
                .await?;

            match (reply.status, reply.request.as_str()) {
                (1, _) => return Ok(CaptchaSolution::new(reply.request)),
                (_, NOT_READY) => continue,
                _ => return Err(CaptchaError::Rejected(reply.request)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_key_is_a_configuration_error() {
        let provider = TwoCaptchaProvider::new("");
        let task = CaptchaTask::new("site-key", Url::parse("https://example.com/").unwrap());
        let err = provider.solve(&task).await.unwrap_err();
        assert!(matches!(err, CaptchaError::Configuration(_)));
    }

    #[test]
    fn builds_api_urls_from_endpoint() {
        let provider = TwoCaptchaProvider::new("key")
            .with_endpoint("http://127.0.0.1:9000/api/");
        assert_eq!(
            provider.api_url("res.php").unwrap().as_str(),
            "http://127.0.0.1:9000/api/res.php"
        );
    }
}
