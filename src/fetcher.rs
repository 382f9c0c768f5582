//! High level fetch orchestration.
//!
//! Wires the response cache, the cookie store, the redirect policy and the
//! challenge resolvers into a single "get a usable page for this URL"
//! operation. Everything short of a missing captcha answer is reported
//! through [`FetchOutcome`] rather than as an error, so a caller iterating
//! over many sites keeps making progress when one of them is down.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{
	ACCEPT, ACCEPT_ENCODING, CONTENT_TYPE, HOST, HeaderName, HeaderValue, REFERER, USER_AGENT,
};
use http::{HeaderMap, Method};
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

use crate::challenges::core::{
	HttpTransport, ReqwestTransport, TransportRequest, TransportResponse, cookie_pair,
	extract_soft_block_script, send_with_jar,
};
use crate::challenges::detectors::{ChallengeDetector, ChallengeKind, has_soft_block_marker};
use crate::challenges::resolvers::{ChallengeResolver, ResolveContext, ResolveError, ResolverSet};
use crate::external_deps::interpreters::{BoaJavascriptInterpreter, JavascriptInterpreter};
use crate::modules::cache::{CacheEntry, CacheError, CacheKey, ResponseCache};
use crate::modules::cookies::{CookieError, CookieFileStore, CookieJar, CookieRecord};
use crate::modules::events::{
	CacheHitEvent, ChallengeEvent, ErrorEvent, EventDispatcher, EventHandler, FetchEvent,
	LoggingHandler, PostResponseEvent, PreRequestEvent, RetryEvent,
};
use crate::modules::redirect::RedirectPolicy;

/// Boundary used for multipart bodies. Fixed so equal bodies give equal cache keys.
pub const MULTIPART_BOUNDARY: &str = "X-X-X";

const DEFAULT_MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_CACHE_TTL_HOURS: f64 = 8.0;

/// Result alias used across the orchestration layer.
pub type FetchResult<T> = Result<T, FetchError>;

/// Hard failures surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum FetchError {
	/// An interactive challenge cannot proceed without a human answer.
	#[error("user input required: {0}")]
	InputRequired(String),
	#[error("fetcher misconfigured: {0}")]
	Build(String),
	#[error("cache error: {0}")]
	Cache(#[from] CacheError),
	#[error("cookie store error: {0}")]
	Cookies(#[from] CookieError),
}

/// A usable response body with its metadata.
#[derive(Debug, Clone)]
pub struct Page {
	pub status: u16,
	pub url: Url,
	pub headers: HeaderMap,
	pub body: Bytes,
	/// Set when the body was cut at the size limit.
	pub truncated: bool,
}

impl Page {
	/// Body as UTF-8 text, invalid sequences replaced.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}
}

/// Why a fetch ended on a challenge wall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
	/// No resolver is registered for the challenge.
	NoResolver,
	/// The resolver ran but the wall stayed up.
	Unresolved(ChallengeKind),
}

impl fmt::Display for BlockReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			BlockReason::NoResolver => f.write_str("no resolver available"),
			BlockReason::Unresolved(kind) => write!(f, "{kind} not resolved"),
		}
	}
}

/// Every way a fetch can end without a hard error.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
	/// Fresh network response.
	Page(Page),
	/// Served from the response cache without network I/O.
	Cached { page: Page, created_at: DateTime<Utc> },
	/// Body produced by a challenge resolver.
	Resolved { page: Page, resolver: &'static str },
	/// Intercepted redirect destination.
	Redirect(String),
	Blocked(BlockReason),
	/// Transport failure, invalid URL or HTTP error status.
	Failed(String),
}

impl FetchOutcome {
	pub fn page(&self) -> Option<&Page> {
		match self {
			FetchOutcome::Page(page)
			| FetchOutcome::Cached { page, .. }
			| FetchOutcome::Resolved { page, .. } => Some(page),
			_ => None,
		}
	}

	pub fn redirect_location(&self) -> Option<&str> {
		match self {
			FetchOutcome::Redirect(location) => Some(location),
			_ => None,
		}
	}

	/// Page body, or empty for every non-page outcome.
	pub fn body(&self) -> &[u8] {
		self.page().map(|page| page.body.as_ref()).unwrap_or_default()
	}

	/// Page text, the redirect destination, or an empty string.
	pub fn text(&self) -> String {
		match self {
			FetchOutcome::Redirect(location) => location.clone(),
			other => other.page().map(Page::text).unwrap_or_default(),
		}
	}

	pub fn is_empty(&self) -> bool {
		match self {
			FetchOutcome::Redirect(location) => location.is_empty(),
			other => other.body().is_empty(),
		}
	}

	pub fn is_blocked(&self) -> bool {
		matches!(self, FetchOutcome::Blocked(_))
	}
}

/// Request body kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
	/// `application/x-www-form-urlencoded` pairs.
	Form(Vec<(String, String)>),
	/// Pre-encoded body sent verbatim.
	Raw(String),
	/// `multipart/form-data` fields.
	Multipart(Vec<(String, String)>),
}

impl RequestBody {
	/// Encoded bytes and the content type the engine sets for them.
	pub fn encode(&self) -> (Vec<u8>, &'static str) {
		match self {
			RequestBody::Form(pairs) => {
				let encoded = url::form_urlencoded::Serializer::new(String::new())
					.extend_pairs(pairs)
					.finish();
				(encoded.into_bytes(), "application/x-www-form-urlencoded")
			}
			RequestBody::Raw(raw) => (raw.clone().into_bytes(), "application/x-www-form-urlencoded"),
			RequestBody::Multipart(fields) => {
				let mut encoded = String::new();
				for (name, value) in fields {
					encoded.push_str(&format!(
						"--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
					));
				}
				encoded.push_str(&format!("--{MULTIPART_BOUNDARY}--\r\n"));
				(encoded.into_bytes(), "multipart/form-data; boundary=X-X-X")
			}
		}
	}
}

/// One call to [`Fetcher::fetch`].
#[derive(Debug, Clone)]
pub struct FetchRequest {
	pub url: String,
	/// Defaults to GET, or POST when a body is present.
	pub method: Option<Method>,
	pub params: Vec<(String, String)>,
	pub headers: Vec<(String, String)>,
	/// Cookie overrides for the base host; they win over stored cookies.
	pub cookies: Vec<(String, String)>,
	pub body: Option<RequestBody>,
	pub follow_redirects: bool,
	pub require_challenge_awareness: bool,
	/// Return (and cache) bodies of HTTP error responses.
	pub read_error_body: bool,
	/// Zero forces a live fetch; the result is still written to the cache.
	pub cache_ttl_hours: f64,
	/// Overrides [`FetcherConfig::max_response_bytes`].
	pub size_limit: Option<usize>,
}

impl FetchRequest {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			method: None,
			params: Vec::new(),
			headers: Vec::new(),
			cookies: Vec::new(),
			body: None,
			follow_redirects: true,
			require_challenge_awareness: false,
			read_error_body: false,
			cache_ttl_hours: DEFAULT_CACHE_TTL_HOURS,
			size_limit: None,
		}
	}

	pub fn with_method(mut self, method: Method) -> Self {
		self.method = Some(method);
		self
	}

	pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.params.push((name.into(), value.into()));
		self
	}

	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));
		self
	}

	/// Later overrides of the same name win.
	pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.cookies.push((name.into(), value.into()));
		self
	}

	pub fn with_body(mut self, body: RequestBody) -> Self {
		self.body = Some(body);
		self
	}

	pub fn with_form<I, K, V>(self, pairs: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		let pairs = pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
		self.with_body(RequestBody::Form(pairs))
	}

	pub fn follow_redirects(mut self, follow: bool) -> Self {
		self.follow_redirects = follow;
		self
	}

	pub fn require_challenge_awareness(mut self) -> Self {
		self.require_challenge_awareness = true;
		self
	}

	pub fn read_error_body(mut self) -> Self {
		self.read_error_body = true;
		self
	}

	pub fn cache_ttl_hours(mut self, hours: f64) -> Self {
		self.cache_ttl_hours = hours;
		self
	}

	pub fn size_limit(mut self, bytes: usize) -> Self {
		self.size_limit = Some(bytes);
		self
	}
}

/// Immutable fetcher configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
	/// Fixed product user agent sent with every request.
	pub user_agent: String,
	/// Hand captcha walls (403) to a resolver.
	pub interactive_challenges: bool,
	/// Log the cookie jar before and after each fetch.
	pub cookie_debug: bool,
	pub max_response_bytes: usize,
	/// Per-request timeout in seconds when deserialized; zero disables it.
	#[serde(deserialize_with = "duration_from_secs")]
	pub timeout: Duration,
	/// Retry ceiling for interactive challenges.
	pub max_challenge_attempts: u32,
}

impl Default for FetcherConfig {
	fn default() -> Self {
		Self {
			user_agent: format!("sitefetch-rs/{}", crate::VERSION),
			interactive_challenges: false,
			cookie_debug: false,
			max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
			timeout: DEFAULT_TIMEOUT,
			max_challenge_attempts: 3,
		}
	}
}

impl FetcherConfig {
	/// `None` when the configured timeout is zero.
	pub fn request_timeout(&self) -> Option<Duration> {
		(!self.timeout.is_zero()).then_some(self.timeout)
	}
}

fn duration_from_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
	D: Deserializer<'de>,
{
	let secs = f64::deserialize(deserializer)?;
	Duration::try_from_secs_f64(secs.max(0.0)).map_err(serde::de::Error::custom)
}

/// Fluent builder for [`Fetcher`].
pub struct FetcherBuilder {
	identity: String,
	base_url: String,
	config: FetcherConfig,
	cache: Option<ResponseCache>,
	cookie_store: Option<CookieFileStore>,
	transport: Option<Arc<dyn HttpTransport>>,
	resolvers: ResolverSet,
	interpreter: Option<Arc<dyn JavascriptInterpreter>>,
	handlers: Vec<Arc<dyn EventHandler>>,
}

impl FetcherBuilder {
	pub fn new(identity: impl Into<String>, base_url: impl Into<String>) -> Self {
		Self {
			identity: identity.into(),
			base_url: base_url.into(),
			config: FetcherConfig::default(),
			cache: None,
			cookie_store: None,
			transport: None,
			resolvers: ResolverSet::new(),
			interpreter: None,
			handlers: Vec::new(),
		}
	}

	pub fn with_config(mut self, config: FetcherConfig) -> Self {
		self.config = config;
		self
	}

	pub fn with_cache(mut self, cache: ResponseCache) -> Self {
		self.cache = Some(cache);
		self
	}

	pub fn with_cookie_store(mut self, store: CookieFileStore) -> Self {
		self.cookie_store = Some(store);
		self
	}

	/// Replace the default reqwest transport.
	pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
		self.transport = Some(transport);
		self
	}

	pub fn with_resolver(mut self, resolver: Arc<dyn ChallengeResolver>) -> Self {
		self.resolvers.push(resolver);
		self
	}

	pub fn with_resolvers(mut self, resolvers: ResolverSet) -> Self {
		self.resolvers = resolvers;
		self
	}

	pub fn with_interpreter(mut self, interpreter: Arc<dyn JavascriptInterpreter>) -> Self {
		self.interpreter = Some(interpreter);
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn build(self) -> FetchResult<Fetcher> {
		let base_url = Url::parse(&self.base_url)
			.map_err(|err| FetchError::Build(format!("invalid base url '{}': {err}", self.base_url)))?;
		let cache = self
			.cache
			.ok_or_else(|| FetchError::Build("response cache not configured".into()))?;
		let cookie_store = self
			.cookie_store
			.ok_or_else(|| FetchError::Build("cookie store not configured".into()))?;

		let jar = Arc::new(CookieJar::new());
		let transport: Arc<dyn HttpTransport> = match self.transport {
			Some(transport) => transport,
			None => Arc::new(
				ReqwestTransport::new(jar.clone()).map_err(|err| FetchError::Build(err.to_string()))?,
			),
		};

		let mut events = EventDispatcher::new();
		events.register_handler(Arc::new(LoggingHandler));
		for handler in self.handlers {
			events.register_handler(handler);
		}

		Ok(Fetcher {
			detector: ChallengeDetector::new(self.config.interactive_challenges),
			identity: self.identity,
			base_url,
			config: self.config,
			cache,
			cookie_store,
			jar,
			transport,
			resolvers: self.resolvers,
			interpreter: self
				.interpreter
				.unwrap_or_else(|| Arc::new(BoaJavascriptInterpreter::new())),
			events: Arc::new(events),
			in_flight: Mutex::new(()),
		})
	}
}

/// Fetch engine bound to one scraper identity.
pub struct Fetcher {
	identity: String,
	base_url: Url,
	config: FetcherConfig,
	cache: ResponseCache,
	cookie_store: CookieFileStore,
	jar: Arc<CookieJar>,
	transport: Arc<dyn HttpTransport>,
	resolvers: ResolverSet,
	interpreter: Arc<dyn JavascriptInterpreter>,
	detector: ChallengeDetector,
	events: Arc<EventDispatcher>,
	in_flight: Mutex<()>,
}

impl Fetcher {
	pub fn builder(identity: impl Into<String>, base_url: impl Into<String>) -> FetcherBuilder {
		FetcherBuilder::new(identity, base_url)
	}

	pub fn identity(&self) -> &str {
		&self.identity
	}

	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	pub fn config(&self) -> &FetcherConfig {
		&self.config
	}

	pub fn cache(&self) -> &ResponseCache {
		&self.cache
	}

	pub fn cookie_jar(&self) -> &Arc<CookieJar> {
		&self.jar
	}

	/// Persisted cookies of this identity that apply to the base URL.
	pub fn cookie_map(&self) -> FetchResult<BTreeMap<String, String>> {
		Ok(self
			.cookie_store
			.load(&self.identity)?
			.into_iter()
			.filter(|record| record.matches(&self.base_url))
			.map(|record| (record.name, record.value))
			.collect())
	}

	/// GET `url` with default request options.
	pub async fn get(&self, url: &str) -> FetchResult<FetchOutcome> {
		self.fetch(FetchRequest::new(url)).await
	}

	/// Fetch one page. Calls on the same fetcher run one at a time.
	pub async fn fetch(&self, request: FetchRequest) -> FetchResult<FetchOutcome> {
		let _guard = self.in_flight.lock().await;

		let outcome = self.fetch_once(&request).await?;
		let Some((name, value)) = self.soft_block_cookie(&outcome).await else {
			return Ok(outcome);
		};

		log::debug!("[{}] setting soft-block cookie {name}={value}", self.identity);
		self.events.dispatch(FetchEvent::Retry(RetryEvent {
			identity: self.identity.clone(),
			domain: self.base_url.host_str().unwrap_or_default().to_string(),
			reason: "soft_block_cookie".into(),
			timestamp: Utc::now(),
		}));

		// The retry's own marker is ignored: one retry per call.
		let retry = request.clone().with_cookie(name, value).cache_ttl_hours(0.0);
		self.fetch_once(&retry).await
	}

	async fn fetch_once(&self, request: &FetchRequest) -> FetchResult<FetchOutcome> {
		if request.require_challenge_awareness && self.resolvers.is_empty() {
			log::debug!(
				"[{}] {} needs challenge handling but no resolver is registered",
				self.identity,
				request.url
			);
			return Ok(FetchOutcome::Blocked(BlockReason::NoResolver));
		}

		let url = match normalize_url(&request.url, &self.base_url, &request.params) {
			Ok(url) => url,
			Err(err) => {
				log::warn!("[{}] invalid url '{}': {err}", self.identity, request.url);
				return Ok(FetchOutcome::Failed(format!("invalid url: {err}")));
			}
		};

		let encoded = request.body.as_ref().map(RequestBody::encode);
		let key = CacheKey::new(
			url.as_str(),
			encoded.as_ref().map(|(bytes, _)| bytes.clone()).unwrap_or_default(),
		);

		if let Some(entry) = self.cached(&key, request.cache_ttl_hours).await {
			let age_hours = entry.age_hours(Utc::now());
			self.events.dispatch(FetchEvent::CacheHit(CacheHitEvent {
				identity: self.identity.clone(),
				url: key.url.clone(),
				age_hours,
				timestamp: Utc::now(),
			}));
			return Ok(FetchOutcome::Cached {
				page: Page {
					status: 200,
					url,
					headers: entry.headers,
					body: entry.body,
					truncated: false,
				},
				created_at: entry.created_at,
			});
		}

		self.load_cookies(&request.cookies).await;
		let result = self.fetch_live(request, url, &key, encoded).await;
		self.persist_cookies().await;
		result
	}

	async fn fetch_live(
		&self,
		request: &FetchRequest,
		url: Url,
		key: &CacheKey,
		encoded: Option<(Vec<u8>, &'static str)>,
	) -> FetchResult<FetchOutcome> {
		let method = request.method.clone().unwrap_or(if encoded.is_some() {
			Method::POST
		} else {
			Method::GET
		});
		let headers = match self.build_headers(request, &url, encoded.as_ref().map(|(_, ct)| *ct)) {
			Ok(headers) => headers,
			Err(err) => {
				log::warn!("[{}] {err} for {url}", self.identity);
				return Ok(FetchOutcome::Failed(err));
			}
		};
		let size_limit = request.size_limit.unwrap_or(self.config.max_response_bytes);
		let policy = RedirectPolicy::from_follow(request.follow_redirects);

		let outgoing = TransportRequest::new(method.clone(), url.clone(), size_limit)
			.with_headers(headers.clone())
			.with_body(encoded.map(|(bytes, _)| bytes))
			.with_redirect(policy)
			.with_timeout(self.config.request_timeout());

		self.events.dispatch(FetchEvent::PreRequest(PreRequestEvent {
			identity: self.identity.clone(),
			url: url.clone(),
			method: method.clone(),
			headers: headers.clone(),
			timestamp: Utc::now(),
		}));

		let started = Instant::now();
		let response = match send_with_jar(&self.transport, &self.jar, outgoing).await {
			Ok(response) => response,
			Err(err) => {
				self.events.dispatch(FetchEvent::Error(ErrorEvent {
					identity: self.identity.clone(),
					domain: url.host_str().unwrap_or_default().to_string(),
					error: err.to_string(),
					timestamp: Utc::now(),
				}));
				log::warn!("[{}] error during http get {url}: {err}", self.identity);
				return Ok(FetchOutcome::Failed(err.to_string()));
			}
		};

		self.events.dispatch(FetchEvent::PostResponse(PostResponseEvent {
			identity: self.identity.clone(),
			url: response.url.clone(),
			method: method.clone(),
			status: response.status,
			bytes: response.body.len(),
			truncated: response.truncated,
			latency: started.elapsed(),
			timestamp: Utc::now(),
		}));

		if let Some(location) = policy.intercepted_location(response.status, &response.headers) {
			log::debug!("[{}] redirect intercepted: {url} -> {location}", self.identity);
			return Ok(FetchOutcome::Redirect(location));
		}

		if response.truncated
			|| response
				.declared_length()
				.is_some_and(|length| length > size_limit as u64)
		{
			log::warn!(
				"[{}] response exceeded allowed size: {url} => {:?} / {size_limit}",
				self.identity,
				response.declared_length()
			);
		}

		if method == Method::HEAD {
			return Ok(FetchOutcome::Page(Page {
				status: response.status,
				url: response.url,
				headers: response.headers,
				body: Bytes::new(),
				truncated: false,
			}));
		}

		let (decoded, inflated) = response.decode_body(size_limit);
		if inflated {
			log::warn!("[{}] decoded response exceeded allowed size: {url} / {size_limit}", self.identity);
		}
		let body = Bytes::from(decoded);
		let challenge = self
			.detector
			.detect(response.status, &String::from_utf8_lossy(&body));
		if let Some(kind) = challenge {
			return self.resolve_challenge(kind, &url, &headers, key, &response, size_limit).await;
		}

		if response.status >= 400 && !request.read_error_body {
			log::warn!("[{}] error (http {}) during http get: {url}", self.identity, response.status);
			return Ok(FetchOutcome::Failed(format!("http {}", response.status)));
		}

		let page = Page {
			status: response.status,
			url: response.url,
			headers: response.headers,
			body,
			truncated: response.truncated || inflated,
		};
		self.store(key, &page).await;
		Ok(FetchOutcome::Page(page))
	}

	async fn resolve_challenge(
		&self,
		kind: ChallengeKind,
		url: &Url,
		headers: &HeaderMap,
		key: &CacheKey,
		blocked: &TransportResponse,
		size_limit: usize,
	) -> FetchResult<FetchOutcome> {
		let domain = url.host_str().unwrap_or_default().to_string();
		let Some(resolver) = self.resolvers.find(kind) else {
			log::warn!("[{}] {kind} at {url} and no resolver registered", self.identity);
			self.dispatch_challenge(&domain, kind, None, false);
			return Ok(FetchOutcome::Blocked(BlockReason::NoResolver));
		};

		let context = ResolveContext {
			identity: &self.identity,
			url,
			kind,
			blocked,
			jar: &self.jar,
			user_agent: &self.config.user_agent,
			extra_headers: headers,
			transport: &self.transport,
			timeout: self.config.request_timeout(),
			size_limit,
			max_attempts: self.config.max_challenge_attempts,
		};

		match resolver.resolve(&context).await {
			Ok(Some(body)) => {
				self.dispatch_challenge(&domain, kind, Some(resolver.name()), true);
				let page = Page {
					status: 200,
					url: url.clone(),
					headers: HeaderMap::new(),
					body,
					truncated: false,
				};
				self.store(key, &page).await;
				Ok(FetchOutcome::Resolved {
					page,
					resolver: resolver.name(),
				})
			}
			Ok(None) => {
				self.dispatch_challenge(&domain, kind, Some(resolver.name()), false);
				Ok(FetchOutcome::Blocked(BlockReason::Unresolved(kind)))
			}
			Err(ResolveError::InputRequired(message)) => {
				self.dispatch_challenge(&domain, kind, Some(resolver.name()), false);
				Err(FetchError::InputRequired(message))
			}
			Err(err) => {
				self.dispatch_challenge(&domain, kind, Some(resolver.name()), false);
				self.events.dispatch(FetchEvent::Error(ErrorEvent {
					identity: self.identity.clone(),
					domain,
					error: err.to_string(),
					timestamp: Utc::now(),
				}));
				Ok(FetchOutcome::Blocked(BlockReason::Unresolved(kind)))
			}
		}
	}

	fn dispatch_challenge(
		&self,
		domain: &str,
		kind: ChallengeKind,
		resolver: Option<&str>,
		success: bool,
	) {
		self.events.dispatch(FetchEvent::Challenge(ChallengeEvent {
			identity: self.identity.clone(),
			domain: domain.to_string(),
			challenge_type: kind.to_string(),
			resolver: resolver.map(str::to_string),
			success,
			timestamp: Utc::now(),
		}));
	}

	fn build_headers(
		&self,
		request: &FetchRequest,
		url: &Url,
		content_type: Option<&'static str>,
	) -> Result<HeaderMap, String> {
		let mut headers = HeaderMap::new();
		headers.insert(
			USER_AGENT,
			HeaderValue::from_str(&self.config.user_agent)
				.map_err(|_| "invalid user agent".to_string())?,
		);
		headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
		headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
		if let Some(host) = host_header(url) {
			headers.insert(
				HOST,
				HeaderValue::from_str(&host).map_err(|_| format!("invalid host '{host}'"))?,
			);
		}
		if let Some(content_type) = content_type {
			headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
		}

		let mut referer = self.base_url.as_str().to_string();
		for (name, value) in &request.headers {
			let header = HeaderName::from_bytes(name.as_bytes())
				.map_err(|_| format!("invalid header name '{name}'"))?;
			if header == REFERER {
				referer = value.clone();
				continue;
			}
			if header == HOST {
				continue;
			}
			let value = HeaderValue::from_str(value)
				.map_err(|_| format!("invalid value for header '{name}'"))?;
			headers.insert(header, value);
		}

		if matches!(request.body, Some(RequestBody::Multipart(_))) {
			headers.insert(
				CONTENT_TYPE,
				HeaderValue::from_static("multipart/form-data; boundary=X-X-X"),
			);
		}
		if !referer.is_empty() {
			headers.insert(
				REFERER,
				HeaderValue::from_str(&referer).map_err(|_| "invalid referer".to_string())?,
			);
		}
		Ok(headers)
	}

	/// Cache read off the runtime threads. Read errors count as a miss.
	async fn cached(&self, key: &CacheKey, max_age_hours: f64) -> Option<CacheEntry> {
		let cache = self.cache.clone();
		let owned = key.clone();
		match tokio::task::spawn_blocking(move || cache.get(&owned, max_age_hours)).await {
			Ok(Ok(entry)) => entry,
			Ok(Err(err)) => {
				log::warn!("[{}] cache read failed for {}: {err}", self.identity, key.url);
				None
			}
			Err(err) => {
				log::warn!("[{}] cache read task failed for {}: {err}", self.identity, key.url);
				None
			}
		}
	}

	async fn load_cookies(&self, overrides: &[(String, String)]) {
		let store = self.cookie_store.clone();
		let identity = self.identity.clone();
		let stored = match tokio::task::spawn_blocking(move || store.load(&identity)).await {
			Ok(Ok(records)) => records,
			Ok(Err(err)) => {
				log::warn!("[{}] unable to load cookies: {err}", self.identity);
				Vec::new()
			}
			Err(err) => {
				log::warn!("[{}] cookie load task failed: {err}", self.identity);
				Vec::new()
			}
		};
		self.jar.replace_all(stored);

		let domain = self.base_url.host_str().unwrap_or_default();
		for (name, value) in overrides {
			self.jar.set(CookieRecord::session(name.as_str(), value.as_str(), domain));
		}

		if self.config.cookie_debug {
			log::debug!("[{}] request cookies: {}", self.identity, self.jar.describe());
		}
	}

	async fn persist_cookies(&self) {
		if self.config.cookie_debug {
			log::debug!("[{}] response cookies: {}", self.identity, self.jar.describe());
		}
		let store = self.cookie_store.clone();
		let identity = self.identity.clone();
		let records = self.jar.records();
		match tokio::task::spawn_blocking(move || store.save(&identity, &records)).await {
			Ok(Ok(())) => {}
			Ok(Err(err)) => log::warn!("[{}] unable to save cookies: {err}", self.identity),
			Err(err) => log::warn!("[{}] cookie save task failed: {err}", self.identity),
		}
	}

	async fn store(&self, key: &CacheKey, page: &Page) {
		let cache = self.cache.clone();
		let owned = key.clone();
		let headers = page.headers.clone();
		let body = page.body.clone();
		match tokio::task::spawn_blocking(move || cache.put(&owned, &headers, &body)).await {
			Ok(Ok(())) => {}
			Ok(Err(err)) => log::warn!("[{}] cache write failed for {}: {err}", self.identity, key.url),
			Err(err) => log::warn!("[{}] cache write task failed for {}: {err}", self.identity, key.url),
		}
	}

	async fn soft_block_cookie(&self, outcome: &FetchOutcome) -> Option<(String, String)> {
		let text = outcome.page()?.text();
		if !has_soft_block_marker(&text) {
			return None;
		}

		let script = extract_soft_block_script(&text)
			.map_err(|err| log::warn!("[{}] soft-block page without script: {err}", self.identity))
			.ok()?;
		let interpreter = self.interpreter.clone();
		let host = self.base_url.host_str().unwrap_or_default().to_string();
		let evaluated =
			tokio::task::spawn_blocking(move || interpreter.document_cookie(&script, &host)).await;
		let assignment = match evaluated {
			Ok(Ok(assignment)) => assignment,
			Ok(Err(err)) => {
				log::warn!("[{}] exception during soft-block js: {err}", self.identity);
				return None;
			}
			Err(err) => {
				log::warn!("[{}] soft-block js task failed: {err}", self.identity);
				return None;
			}
		};
		cookie_pair(&assignment)
	}
}

/// Resolve `raw` against `base` and merge `params` into its query.
///
/// Protocol-relative URLs take the base scheme. A key already present in the
/// URL's own query wins over `params`.
pub fn normalize_url(
	raw: &str,
	base: &Url,
	params: &[(String, String)],
) -> Result<Url, url::ParseError> {
	let raw = raw.trim();
	let mut url = if let Some(rest) = raw.strip_prefix("//") {
		Url::parse(&format!("{}://{rest}", base.scheme()))?
	} else {
		match Url::parse(raw) {
			Ok(url) => url,
			Err(url::ParseError::RelativeUrlWithoutBase) => base.join(raw)?,
			Err(err) => return Err(err),
		}
	};

	if params.is_empty() {
		return Ok(url);
	}

	if url.host_str() == base.host_str() && url.path() == base.path() && !url.path().ends_with('/') {
		let path = format!("{}/", url.path());
		url.set_path(&path);
	}

	let existing: Vec<(String, String)> = url.query_pairs().into_owned().collect();
	let mut merged: Vec<(String, String)> = Vec::with_capacity(params.len() + existing.len());
	for (name, value) in params {
		if merged.iter().any(|(seen, _)| seen == name) {
			continue;
		}
		let value = existing
			.iter()
			.find(|(key, _)| key == name)
			.map_or(value, |(_, own)| own);
		merged.push((name.clone(), value.clone()));
	}
	for (name, value) in existing {
		if !merged.iter().any(|(seen, _)| *seen == name) {
			merged.push((name, value));
		}
	}

	url.set_query(None);
	url.query_pairs_mut().extend_pairs(merged);
	Ok(url)
}

fn host_header(url: &Url) -> Option<String> {
	let host = url.host_str()?;
	Some(match url.port() {
		Some(port) => format!("{host}:{port}"),
		None => host.to_string(),
	})
}
