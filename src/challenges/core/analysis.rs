//! Challenge page parsing helpers and utilities.
//!
//! Extracts the parameters the resolvers need from blocked pages: the
//! captcha widget attributes and the soft-block cookie script.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

/// Widget attributes of an interactive captcha wall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaPageParams {
    pub site_key: String,
    pub ray_id: String,
}

impl CaptchaPageParams {
    /// Verification endpoint the answer is submitted to.
    pub fn submission_url(&self, page_url: &Url, answer: &str) -> Result<Url, ChallengeParseError> {
        let mut url = Url::parse(&origin_from_url(page_url))
            .and_then(|origin| origin.join("/cdn-cgi/l/chk_captcha"))
            .map_err(ChallengeParseError::InvalidUrl)?;
        url.query_pairs_mut()
            .append_pair("g-recaptcha-response", answer)
            .append_pair("id", &self.ray_id);
        Ok(url)
    }
}

/// Outcomes when parsing a challenge page fails.
#[derive(Debug, Error)]
pub enum ChallengeParseError {
    #[error("missing captcha attribute: {0}")]
    MissingAttribute(&'static str),
    #[error("soft-block script not found")]
    ScriptNotFound,
    #[error("soft-block script is not valid base64: {0}")]
    InvalidScript(#[from] base64::DecodeError),
    #[error("invalid challenge url: {0}")]
    InvalidUrl(url::ParseError),
}

/// Extract `data-sitekey` and `data-ray` from a captcha wall.
pub fn parse_captcha_page(html: &str) -> Result<CaptchaPageParams, ChallengeParseError> {
    static SITE_KEY: Lazy<Selector> =
        Lazy::new(|| Selector::parse("[data-sitekey]").expect("valid selector"));
    static RAY: Lazy<Selector> =
        Lazy::new(|| Selector::parse("[data-ray]").expect("valid selector"));

    let document = Html::parse_document(html);
    let site_key = document
        .select(&SITE_KEY)
        .find_map(|element| element.value().attr("data-sitekey"))
        .filter(|value| !value.is_empty())
        .ok_or(ChallengeParseError::MissingAttribute("data-sitekey"))?;
    let ray_id = document
        .select(&RAY)
        .find_map(|element| element.value().attr("data-ray"))
        .filter(|value| !value.is_empty())
        .ok_or(ChallengeParseError::MissingAttribute("data-ray"))?;

    Ok(CaptchaPageParams {
        site_key: site_key.to_string(),
        ray_id: ray_id.to_string(),
    })
}

/// Decode the `S='<base64>'` payload of a soft-block page.
pub fn extract_soft_block_script(html: &str) -> Result<String, ChallengeParseError> {
    static PAYLOAD_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"S\s*=\s*'([^']+)").expect("valid regex"));

    let encoded = PAYLOAD_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .ok_or(ChallengeParseError::ScriptNotFound)?;
    let decoded = STANDARD.decode(encoded.as_str().trim())?;
    Ok(String::from_utf8_lossy(&decoded).into_owned())
}

/// First `name=value` pair of a `document.cookie` assignment.
pub fn cookie_pair(assignment: &str) -> Option<(String, String)> {
    let first = assignment.split(';').next()?.trim();
    let (name, value) = first.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

/// Build origin header value from URL (`scheme://host[:port]`).
pub fn origin_from_url(url: &Url) -> String {
    let mut origin = format!("{}://{}", url.scheme(), url.host_str().unwrap_or(""));
    if let Some(port) = url.port() {
        origin.push(':');
        origin.push_str(&port.to_string());
    }
    origin
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_captcha_attributes() {
        let html = r#"<html><body>
            <div class="cf-captcha-bookmark">
              <div class="g-recaptcha" data-sitekey="6LfBixYUAAAAABhdHynFUIMA_sa4s-XsJvnjtgB0"></div>
              <span data-ray="4a1b2c3d4e5f6789"></span>
            </div></body></html>"#;
        let params = parse_captcha_page(html).unwrap();
        assert_eq!(params.site_key, "6LfBixYUAAAAABhdHynFUIMA_sa4s-XsJvnjtgB0");
        assert_eq!(params.ray_id, "4a1b2c3d4e5f6789");

        let url = params
            .submission_url(&Url::parse("https://example.com:8443/movie/1").unwrap(), "tok en")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.com:8443/cdn-cgi/l/chk_captcha?g-recaptcha-response=tok+en&id=4a1b2c3d4e5f6789"
        );
    }

    #[test]
    fn missing_ray_is_reported() {
        let err = parse_captcha_page(r#"<div data-sitekey="abc"></div>"#).unwrap_err();
        assert!(matches!(err, ChallengeParseError::MissingAttribute("data-ray")));
    }

    #[test]
    fn decodes_soft_block_payload() {
        let encoded = STANDARD.encode("document.cookie='a=b';");
        let html = format!("<script>var S = '{encoded}'; L=S.length;</script>sucuri_cloudproxy_js");
        assert_eq!(extract_soft_block_script(&html).unwrap(), "document.cookie='a=b';");
        assert!(matches!(
            extract_soft_block_script("sucuri_cloudproxy_js"),
            Err(ChallengeParseError::ScriptNotFound)
        ));
    }

    #[test]
    fn splits_cookie_assignment() {
        assert_eq!(
            cookie_pair("sucuri_cloudproxy_uuid_x=abc=1;path=/;max-age=86400"),
            Some(("sucuri_cloudproxy_uuid_x".into(), "abc=1".into()))
        );
        assert_eq!(cookie_pair(""), None);
    }
}
