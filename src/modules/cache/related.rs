//! Memoised "where does this title live on that site" lookups.
//!
//! Shares the response cache database but is keyed on semantic identity
//! (entity kind, title, year, season, episode, source site) rather than on
//! request bytes. A search that found nothing is remembered with the
//! [`FORCE_NO_MATCH`] sentinel so it is not repeated.

use std::future::Future;
use std::sync::Arc;

use redb::{Database, TableDefinition, WriteTransaction};

use super::CacheError;

type RelatedKey<'a> = (&'a str, &'a str, &'a str, &'a str, &'a str, &'a str);

const RELATED_URLS: TableDefinition<RelatedKey<'static>, &str> =
    TableDefinition::new("related_urls");

/// Stored in place of a URL when a site search came back empty.
pub const FORCE_NO_MATCH: &str = "***FORCE_NO_MATCH***";

pub(super) fn create_table(txn: &WriteTransaction) -> Result<(), CacheError> {
    txn.open_table(RELATED_URLS)?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Movie,
    TvShow,
    Season,
    Episode,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Movie => "movie",
            EntityKind::TvShow => "tvshow",
            EntityKind::Season => "season",
            EntityKind::Episode => "episode",
        }
    }
}

/// Semantic identity of a lookup. Empty strings stand for "not applicable".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelatedUrlKey {
    pub kind: EntityKind,
    pub title: String,
    pub year: String,
    pub season: String,
    pub episode: String,
    pub source: String,
}

impl RelatedUrlKey {
    pub fn new(
        kind: EntityKind,
        title: impl Into<String>,
        year: Option<u16>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            title: title.into(),
            year: year.map(|y| y.to_string()).unwrap_or_default(),
            season: String::new(),
            episode: String::new(),
            source: source.into(),
        }
    }

    pub fn with_season(mut self, season: u32) -> Self {
        self.season = season.to_string();
        self
    }

    pub fn with_episode(mut self, episode: u32) -> Self {
        self.episode = episode.to_string();
        self
    }

    fn as_tuple(&self) -> RelatedKey<'_> {
        (
            self.kind.as_str(),
            self.title.as_str(),
            self.year.as_str(),
            self.season.as_str(),
            self.episode.as_str(),
            self.source.as_str(),
        )
    }
}

/// Handle over the `related_urls` table.
#[derive(Clone)]
pub struct RelatedUrlCache {
    db: Arc<Database>,
}

impl RelatedUrlCache {
    pub(super) fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Raw stored value, sentinel included.
    pub fn get(&self, key: &RelatedUrlKey) -> Result<Option<String>, CacheError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(RELATED_URLS)?;
        Ok(table.get(key.as_tuple())?.map(|guard| guard.value().to_string()))
    }

    pub fn set(&self, key: &RelatedUrlKey, url: &str) -> Result<(), CacheError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(RELATED_URLS)?;
            table.insert(key.as_tuple(), url)?;
        }
        txn.commit()?;
        log::debug!(
            "related url set: |{}|{}|{}|{}|{}|{}| -> {url}",
            key.kind.as_str(),
            key.title,
            key.year,
            key.season,
            key.episode,
            key.source
        );
        Ok(())
    }

    pub fn clear(&self, key: &RelatedUrlKey) -> Result<(), CacheError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(RELATED_URLS)?;
            table.remove(key.as_tuple())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Forget everything recorded for one source site.
    pub fn clear_source(&self, source: &str) -> Result<usize, CacheError> {
        let txn = self.db.begin_write()?;
        let mut removed = 0usize;
        {
            let mut table = txn.open_table(RELATED_URLS)?;
            table.retain(|(_, _, _, _, _, stored_source), _url| {
                let keep = stored_source != source;
                if !keep {
                    removed += 1;
                }
                keep
            })?;
        }
        txn.commit()?;
        Ok(removed)
    }

    /// Return the memoised URL for `key`, running `search` only on first use.
    ///
    /// `Ok(None)` means "searched before (or now) and found nothing".
    pub async fn resolve_with<F, Fut>(
        &self,
        key: &RelatedUrlKey,
        search: F,
    ) -> Result<Option<String>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<String>>,
    {
        if let Some(stored) = self.get(key)? {
            log::debug!("related url hit: {} -> {stored}", key.title);
            return Ok((stored != FORCE_NO_MATCH).then_some(stored));
        }

        match search().await {
            Some(url) => {
                self.set(key, &url)?;
                Ok(Some(url))
            }
            None => {
                self.set(key, FORCE_NO_MATCH)?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::cache::ResponseCache;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn show_key() -> RelatedUrlKey {
        RelatedUrlKey::new(EntityKind::TvShow, "The Expanse", Some(2015), "SiteA")
    }

    #[tokio::test]
    async fn memoises_search_result() {
        let cache = ResponseCache::in_memory().unwrap().related_urls();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let url = cache
                .resolve_with(&show_key(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Some("/shows/the-expanse".to_string())
                })
                .await
                .unwrap();
            assert_eq!(url.as_deref(), Some("/shows/the-expanse"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remembers_empty_search_with_sentinel() {
        let cache = ResponseCache::in_memory().unwrap().related_urls();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let url = cache
                .resolve_with(&show_key(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    None
                })
                .await
                .unwrap();
            assert!(url.is_none());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&show_key()).unwrap().as_deref(), Some(FORCE_NO_MATCH));
    }

    #[test]
    fn episodes_are_distinct_from_shows() {
        let cache = ResponseCache::in_memory().unwrap().related_urls();
        let episode = show_key().with_season(1).with_episode(2);
        cache.set(&show_key(), "/show").unwrap();
        cache.set(&episode, "/show/s01e02").unwrap();

        assert_eq!(cache.get(&show_key()).unwrap().as_deref(), Some("/show"));
        assert_eq!(cache.get(&episode).unwrap().as_deref(), Some("/show/s01e02"));

        cache.clear(&episode).unwrap();
        assert!(cache.get(&episode).unwrap().is_none());
    }

    #[test]
    fn clear_source_only_touches_that_site() {
        let cache = ResponseCache::in_memory().unwrap().related_urls();
        let other = RelatedUrlKey::new(EntityKind::Movie, "Heat", Some(1995), "SiteB");
        cache.set(&show_key(), "/a").unwrap();
        cache.set(&other, "/b").unwrap();

        assert_eq!(cache.clear_source("SiteA").unwrap(), 1);
        assert!(cache.get(&show_key()).unwrap().is_none());
        assert_eq!(cache.get(&other).unwrap().as_deref(), Some("/b"));
    }
}
