//! Interactive captcha resolver.
//!
//! Reads the widget attributes off the captcha wall, obtains an answer from a
//! solving service or from the user, and submits it to the site's
//! verification endpoint. Redirects after submission are followed by hand so
//! the clearance cookies set on each hop land in the jar.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{
    CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST, HeaderValue, REFERER, USER_AGENT,
};
use http::{HeaderMap, Method};
use url::Url;

use super::{ChallengeResolver, ResolveContext, ResolveError};
use crate::challenges::core::{
    CaptchaPageParams, ChallengeParseError, TransportRequest, follow_redirects,
    parse_captcha_page,
};
use crate::challenges::detectors::{CAPTCHA_MARKER, ChallengeKind};
use crate::external_deps::captcha::{CaptchaProvider, CaptchaTask};
use crate::external_deps::prompt::{AnswerPrompt, PromptRequest};
use crate::modules::redirect::MAX_REDIRECTS;

#[derive(Clone, Default)]
pub struct CaptchaResolver {
    provider: Option<Arc<dyn CaptchaProvider>>,
    prompt: Option<Arc<dyn AnswerPrompt>>,
}

impl CaptchaResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Solving service consulted before the prompt.
    pub fn with_provider(mut self, provider: Arc<dyn CaptchaProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn AnswerPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Original request headers minus the per-hop ones, pointed at the wall.
    fn headers(context: &ResolveContext<'_>) -> Result<HeaderMap, ResolveError> {
        let mut headers = context.extra_headers.clone();
        for per_hop in [HOST, COOKIE, CONTENT_TYPE, CONTENT_LENGTH] {
            headers.remove(per_hop);
        }
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(context.user_agent)
                .map_err(|_| ResolveError::Protocol("invalid user agent".into()))?,
        );
        headers.insert(
            REFERER,
            HeaderValue::from_str(context.url.as_str())
                .map_err(|_| ResolveError::Protocol("invalid referer".into()))?,
        );
        Ok(headers)
    }

    async fn load_params(
        &self,
        context: &ResolveContext<'_>,
        page: &str,
    ) -> Result<Option<CaptchaPageParams>, ResolveError> {
        match parse_captcha_page(page) {
            Ok(params) => return Ok(Some(params)),
            Err(err) => log::debug!("captcha wall at {} incomplete ({err}), refetching", context.url),
        }

        let request = TransportRequest::new(Method::GET, context.url.clone(), context.size_limit)
            .with_headers(Self::headers(context)?)
            .with_timeout(context.timeout);
        let response =
            follow_redirects(context.transport, context.jar, request, MAX_REDIRECTS).await?;

        match parse_captcha_page(&response.text_lossy(context.size_limit)) {
            Ok(params) => Ok(Some(params)),
            Err(ChallengeParseError::MissingAttribute(attribute)) => {
                log::warn!("captcha wall at {} without {attribute}", context.url);
                Ok(None)
            }
            Err(err) => Err(ResolveError::Protocol(err.to_string())),
        }
    }

    async fn answer(
        &self,
        context: &ResolveContext<'_>,
        params: &CaptchaPageParams,
        attempt: u32,
    ) -> Result<String, ResolveError> {
        if let Some(provider) = &self.provider {
            let task = CaptchaTask::new(params.site_key.clone(), context.url.clone())
                .insert_metadata("ray", params.ray_id.clone());
            match provider.solve(&task).await {
                Ok(solution) if !solution.token.is_empty() => return Ok(solution.token),
                Ok(_) => log::warn!("{} returned an empty captcha token", provider.name()),
                Err(err) if self.prompt.is_none() => return Err(err.into()),
                Err(err) => log::warn!("{} failed: {err}; asking the user", provider.name()),
            }
        }

        if let Some(prompt) = &self.prompt {
            let request = PromptRequest {
                heading: format!("Captcha for {}", context.identity),
                page_url: context.url.clone(),
                site_key: params.site_key.clone(),
                attempt,
                max_attempts: context.max_attempts,
            };
            if let Some(answer) = prompt.ask(&request).await.filter(|a| !a.trim().is_empty()) {
                return Ok(answer);
            }
        }

        Err(ResolveError::InputRequired(format!(
            "captcha answer required for {}",
            context.url
        )))
    }
}

#[async_trait]
impl ChallengeResolver for CaptchaResolver {
    fn name(&self) -> &'static str {
        "captcha"
    }

    fn handles(&self, kind: ChallengeKind) -> bool {
        kind == ChallengeKind::InteractiveCaptcha
    }

    async fn resolve(&self, context: &ResolveContext<'_>) -> Result<Option<Bytes>, ResolveError> {
        let mut page = context.blocked.text_lossy(context.size_limit);

        for attempt in 1..=context.max_attempts.max(1) {
            let Some(params) = self.load_params(context, &page).await? else {
                return Ok(None);
            };
            let answer = self.answer(context, &params, attempt).await?;
            let submit = params
                .submission_url(context.url, &answer)
                .map_err(|err| ResolveError::Protocol(err.to_string()))?;

            let request = TransportRequest::new(Method::GET, submit, context.size_limit)
                .with_headers(Self::headers(context)?)
                .with_timeout(context.timeout);
            let response =
                follow_redirects(context.transport, context.jar, request, MAX_REDIRECTS).await?;

            let body = response.decoded_body(context.size_limit);
            let text = String::from_utf8_lossy(&body).into_owned();
            if text.contains(CAPTCHA_MARKER) {
                log::info!(
                    "captcha answer rejected for {} (attempt {attempt}/{})",
                    context.url,
                    context.max_attempts
                );
                page = text;
                continue;
            }
            if response.status >= 400 {
                log::warn!("captcha submission for {} returned http {}", context.url, response.status);
                return Ok(None);
            }
            return Ok(Some(Bytes::from(body)));
        }

        Ok(None)
    }
}
