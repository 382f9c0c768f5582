//! # sitefetch-rs
//!
//! Content-acquisition engine for site scrapers: one fetch operation that
//! hides response caching, cookie persistence, redirect handling and the
//! bot walls some sites put in front of their pages.
//!
//! ## Features
//!
//! - Persistent response cache keyed by URL and request body, with a TTL
//! - Per-identity cookie jars that survive process restarts
//! - Followed or intercepted redirects
//! - Pluggable resolvers for bot-verification and captcha walls
//! - Automatic retry past soft-block cookie pages
//! - Related-URL cache with a negative-result sentinel
//!
//! ## Example
//!
//! ```no_run
//! use sitefetch_rs::{CookieFileStore, FetchRequest, Fetcher, ResponseCache};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fetcher = Fetcher::builder("example", "https://example.com")
//!         .with_cache(ResponseCache::open("cache.redb")?)
//!         .with_cookie_store(CookieFileStore::new("cookies")?)
//!         .build()?;
//!
//!     let outcome = fetcher
//!         .fetch(FetchRequest::new("/search").with_param("q", "dune"))
//!         .await?;
//!     println!("{}", outcome.text());
//!     Ok(())
//! }
//! ```

mod fetcher;

pub mod challenges;
pub mod external_deps;
pub mod modules;

#[cfg(test)]
mod test_support;

pub use crate::fetcher::{
    BlockReason,
    FetchError,
    FetchOutcome,
    FetchRequest,
    FetchResult,
    Fetcher,
    FetcherBuilder,
    FetcherConfig,
    MULTIPART_BOUNDARY,
    Page,
    RequestBody,
    normalize_url,
};

pub use crate::challenges::core::{
    HttpTransport,
    ReqwestTransport,
    TransportError,
    TransportRequest,
    TransportResponse,
};

pub use crate::challenges::detectors::{
    ChallengeDetector,
    ChallengeKind,
};

pub use crate::challenges::resolvers::{
    CaptchaResolver,
    ChallengeResolver,
    FlareSolverrResolver,
    ResolveContext,
    ResolveError,
    ResolverSet,
};

pub use crate::external_deps::captcha::{
    CaptchaConfig,
    CaptchaError,
    CaptchaProvider,
    CaptchaResult,
    CaptchaSolution,
    CaptchaTask,
    TwoCaptchaProvider,
};

pub use crate::external_deps::interpreters::{
    BoaJavascriptInterpreter,
    InterpreterError,
    InterpreterResult,
    JavascriptInterpreter,
};

pub use crate::external_deps::prompt::{
    AnswerPrompt,
    PromptRequest,
};

pub use crate::modules::{
    CacheEntry,
    CacheError,
    CacheHitEvent,
    CacheKey,
    ChallengeEvent,
    CookieError,
    CookieFileStore,
    CookieJar,
    CookieRecord,
    EntityKind,
    ErrorEvent,
    EventDispatcher,
    EventHandler,
    FORCE_NO_MATCH,
    FetchEvent,
    LoggingHandler,
    PostResponseEvent,
    PreRequestEvent,
    RedirectPolicy,
    RelatedUrlCache,
    RelatedUrlKey,
    ResponseCache,
    RetryEvent,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
