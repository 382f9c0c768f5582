//! Core utilities shared by the fetcher, detectors and resolvers.

pub mod analysis;
pub mod reqwest_client;
pub mod transport;

pub use analysis::{
    CaptchaPageParams, ChallengeParseError, cookie_pair, extract_soft_block_script,
    origin_from_url, parse_captcha_page,
};
pub use reqwest_client::ReqwestTransport;
pub use transport::{
    HttpTransport, TransportError, TransportRequest, TransportResponse, follow_redirects,
    resolve_redirect, send_with_jar,
};
