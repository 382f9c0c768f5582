//! Storage and cross-cutting services used by the fetcher.
//!
//! Response caching, cookie persistence, redirect handling and the event
//! hooks that report on all of them.

pub mod cache;
pub mod cookies;
pub mod events;
pub mod redirect;

pub use cache::{
    CacheEntry, CacheError, CacheKey, EntityKind, FORCE_NO_MATCH, RelatedUrlCache,
    RelatedUrlKey, ResponseCache,
};
pub use cookies::{CookieError, CookieFileStore, CookieJar, CookieRecord};
pub use events::{
    CacheHitEvent, ChallengeEvent, ErrorEvent, EventDispatcher, EventHandler, FetchEvent,
    LoggingHandler, PostResponseEvent, PreRequestEvent, RetryEvent,
};
pub use redirect::{MAX_REDIRECTS, RedirectPolicy};
