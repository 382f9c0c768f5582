//! Durable response cache.
//!
//! Maps a normalised request (URL plus the exact request body) to the last
//! body fetched for it, together with the response headers and the capture
//! time. Entries are never expired proactively: a stale entry stays on disk
//! until the next successful fetch overwrites it or [`ResponseCache::prune`]
//! removes it.
//!
//! The store is a single `redb` database shared by every scraper identity.
//! `redb` gives concurrent readers and serialised writers, so one identity
//! writing never corrupts another identity's read.

mod related;

pub use related::{EntityKind, FORCE_NO_MATCH, RelatedUrlCache, RelatedUrlKey};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use http::{HeaderMap, HeaderName, HeaderValue};
use redb::backends::InMemoryBackend;
use redb::{Database, ReadableTableMetadata, TableDefinition};
use thiserror::Error;

const RESPONSES: TableDefinition<(&str, &[u8]), (i64, &str, &[u8])> =
    TableDefinition::new("responses");

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Failures raised by the cache layer.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache storage error: {0}")]
    Storage(#[from] redb::Error),
    #[error("cached headers are not valid json: {0}")]
    Headers(#[from] serde_json::Error),
}

macro_rules! storage_error_from {
    ($($source:ty),+ $(,)?) => {
        $(
            impl From<$source> for CacheError {
                fn from(err: $source) -> Self {
                    CacheError::Storage(err.into())
                }
            }
        )+
    };
}

storage_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

/// Identity of a cached request: normalised URL plus raw request body.
///
/// Two POSTs to the same URL with different bodies are different keys.
/// Request headers are deliberately not part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub url: String,
    pub body: Vec<u8>,
}

impl CacheKey {
    pub fn new(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
        }
    }

    /// Key for a request without a body.
    pub fn url(url: impl Into<String>) -> Self {
        Self::new(url, Vec::new())
    }
}

/// A previously fetched response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub created_at: DateTime<Utc>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CacheEntry {
    /// Wall-clock age of the entry in hours.
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_milliseconds() as f64 / MILLIS_PER_HOUR
    }
}

/// Shared handle over the cache database. Cloning is cheap.
#[derive(Clone)]
pub struct ResponseCache {
    db: Arc<Database>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache").finish_non_exhaustive()
    }
}

impl ResponseCache {
    /// Open (or create) the cache file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let db = Database::create(path)?;
        Self::from_database(db)
    }

    /// Volatile cache, mostly useful for tests and one-shot tools.
    pub fn in_memory() -> Result<Self, CacheError> {
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::from_database(db)
    }

    fn from_database(db: Database) -> Result<Self, CacheError> {
        let txn = db.begin_write()?;
        {
            txn.open_table(RESPONSES)?;
            related::create_table(&txn)?;
        }
        txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// URL resolution cache living in the same database.
    pub fn related_urls(&self) -> RelatedUrlCache {
        RelatedUrlCache::new(self.db.clone())
    }

    /// Look up `key`, returning it only when younger than `max_age_hours`.
    ///
    /// A non-positive `max_age_hours` never hits.
    pub fn get(&self, key: &CacheKey, max_age_hours: f64) -> Result<Option<CacheEntry>, CacheError> {
        if max_age_hours <= 0.0 {
            return Ok(None);
        }

        let Some(entry) = self.lookup(key)? else {
            log::debug!("cache miss: {}", key.url);
            return Ok(None);
        };

        let age = entry.age_hours(Utc::now());
        if age < max_age_hours {
            log::debug!(
                "cache hit: {} (age {:.2}h, limit {:.2}h)",
                key.url,
                age,
                max_age_hours
            );
            Ok(Some(entry))
        } else {
            log::debug!(
                "cache stale: {} (age {:.2}h, limit {:.2}h)",
                key.url,
                age,
                max_age_hours
            );
            Ok(None)
        }
    }

    /// Read an entry regardless of its age.
    pub fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(RESPONSES)?;
        let Some(guard) = table.get((key.url.as_str(), key.body.as_slice()))? else {
            return Ok(None);
        };

        let (created_millis, raw_headers, body) = guard.value();
        let created_at = Utc
            .timestamp_millis_opt(created_millis)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        Ok(Some(CacheEntry {
            key: key.clone(),
            created_at,
            headers: decode_headers(raw_headers)?,
            body: Bytes::copy_from_slice(body),
        }))
    }

    /// Upsert `body` for `key`, stamped with the current time.
    pub fn put(&self, key: &CacheKey, headers: &HeaderMap, body: &[u8]) -> Result<(), CacheError> {
        self.put_at(key, headers, body, Utc::now())
    }

    pub(crate) fn put_at(
        &self,
        key: &CacheKey,
        headers: &HeaderMap,
        body: &[u8],
        created_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let encoded = encode_headers(headers)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(RESPONSES)?;
            table.insert(
                (key.url.as_str(), key.body.as_slice()),
                (created_at.timestamp_millis(), encoded.as_str(), body),
            )?;
        }
        txn.commit()?;
        log::debug!("cached {} ({} bytes)", key.url, body.len());
        Ok(())
    }

    /// Remove a single entry. Returns whether it existed.
    pub fn delete(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(RESPONSES)?;
            let existed = table
                .remove((key.url.as_str(), key.body.as_slice()))?
                .is_some();
            existed
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Drop every entry captured more than `older_than` ago.
    pub fn prune(&self, older_than: Duration) -> Result<usize, CacheError> {
        let horizon = chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(horizon)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
            .timestamp_millis();

        let txn = self.db.begin_write()?;
        let mut removed = 0usize;
        {
            let mut table = txn.open_table(RESPONSES)?;
            table.retain(|_key, (created_millis, _headers, _body)| {
                let keep = created_millis >= cutoff;
                if !keep {
                    removed += 1;
                }
                keep
            })?;
        }
        txn.commit()?;

        if removed > 0 {
            log::debug!("pruned {removed} cached responses");
        }
        Ok(removed)
    }

    /// Number of cached responses.
    pub fn len(&self) -> Result<u64, CacheError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(RESPONSES)?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }
}

fn encode_headers(headers: &HeaderMap) -> Result<String, CacheError> {
    let pairs: Vec<(&str, &str)> = headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect();
    Ok(serde_json::to_string(&pairs)?)
}

fn decode_headers(raw: &str) -> Result<HeaderMap, CacheError> {
    let pairs: Vec<(String, String)> = serde_json::from_str(raw)?;
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.append(name, value);
        }
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        headers
    }

    #[test]
    fn returns_fresh_entry_within_ttl() {
        let cache = ResponseCache::in_memory().unwrap();
        let key = CacheKey::url("https://example.com/");
        cache.put(&key, &headers(), b"<html>hi</html>").unwrap();

        let entry = cache.get(&key, 1.0).unwrap().expect("cache hit");
        assert_eq!(entry.body.as_ref(), b"<html>hi</html>");
        assert_eq!(entry.headers.get("Content-Type").unwrap(), "text/html");
    }

    #[test]
    fn non_positive_ttl_never_hits() {
        let cache = ResponseCache::in_memory().unwrap();
        let key = CacheKey::url("https://example.com/");
        cache.put(&key, &HeaderMap::new(), b"body").unwrap();

        assert!(cache.get(&key, 0.0).unwrap().is_none());
        assert!(cache.get(&key, -1.0).unwrap().is_none());
        assert!(cache.lookup(&key).unwrap().is_some());
    }

    #[test]
    fn stale_entry_is_kept_but_not_served() {
        let cache = ResponseCache::in_memory().unwrap();
        let key = CacheKey::url("https://example.com/old");
        let created = Utc::now() - chrono::Duration::hours(3);
        cache.put_at(&key, &HeaderMap::new(), b"old", created).unwrap();

        assert!(cache.get(&key, 2.0).unwrap().is_none());
        assert!(cache.get(&key, 4.0).unwrap().is_some());
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn latest_write_wins() {
        let cache = ResponseCache::in_memory().unwrap();
        let key = CacheKey::url("https://example.com/");
        cache.put(&key, &HeaderMap::new(), b"first").unwrap();
        cache.put(&key, &HeaderMap::new(), b"second").unwrap();

        let entry = cache.get(&key, 8.0).unwrap().unwrap();
        assert_eq!(entry.body.as_ref(), b"second");
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn request_body_is_part_of_the_key() {
        let cache = ResponseCache::in_memory().unwrap();
        let first = CacheKey::new("https://example.com/search", b"q=one".to_vec());
        let second = CacheKey::new("https://example.com/search", b"q=two".to_vec());
        cache.put(&first, &HeaderMap::new(), b"one").unwrap();

        assert!(cache.get(&second, 8.0).unwrap().is_none());
        cache.put(&second, &HeaderMap::new(), b"two").unwrap();
        assert_eq!(cache.get(&first, 8.0).unwrap().unwrap().body.as_ref(), b"one");
        assert_eq!(cache.get(&second, 8.0).unwrap().unwrap().body.as_ref(), b"two");
    }

    #[test]
    fn prune_and_delete() {
        let cache = ResponseCache::in_memory().unwrap();
        let old = CacheKey::url("https://example.com/old");
        let new = CacheKey::url("https://example.com/new");
        cache
            .put_at(&old, &HeaderMap::new(), b"old", Utc::now() - chrono::Duration::days(40))
            .unwrap();
        cache.put(&new, &HeaderMap::new(), b"new").unwrap();

        let removed = cache.prune(Duration::from_secs(31 * 24 * 3600)).unwrap();
        assert_eq!(removed, 1);
        assert!(cache.lookup(&old).unwrap().is_none());

        assert!(cache.delete(&new).unwrap());
        assert!(!cache.delete(&new).unwrap());
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("responses.redb");
        let key = CacheKey::url("https://example.com/");
        {
            let cache = ResponseCache::open(&path).unwrap();
            cache.put(&key, &headers(), b"persisted").unwrap();
        }
        let cache = ResponseCache::open(&path).unwrap();
        assert_eq!(cache.get(&key, 1.0).unwrap().unwrap().body.as_ref(), b"persisted");
    }
}
