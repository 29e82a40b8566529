//! Shared helpers for feedkeeper integration tests.
//!
//! Provides a scripted fetcher, a fixed clock and an in-memory database.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use feedkeeper::config::PollConfig;
use feedkeeper::feed::{
    EntryFilter, EntryRepository, FeedFetcher, FeedMeta, FeedRepository, FetchResult, ParsedFeed,
    RawEntry, Sanitizer,
};
use feedkeeper::{Database, Entry, Feed, FixedClock, NewFeed, PollEngine};

/// Start of every test timeline.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

pub fn at(hours: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::hours(hours)
}

/// Fetcher that replays scripted results per URL.
///
/// Each URL has a queue; the last result is repeated once the queue is down
/// to one. Unknown URLs get a temporary error.
#[derive(Clone, Default)]
pub struct StubFetcher {
    scripts: Arc<Mutex<HashMap<String, Vec<FetchResult>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, url: &str, results: Vec<FetchResult>) {
        let mut queue = results;
        queue.reverse();
        self.scripts.lock().unwrap().insert(url.to_string(), queue);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl FeedFetcher for StubFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> FetchResult {
        self.calls.lock().unwrap().push(url.to_string());
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => FetchResult::error("Temporary error 503"),
        }
    }
}

/// A well-formed feed document.
pub fn document(updated: Option<DateTime<Utc>>, entries: Vec<RawEntry>) -> ParsedFeed {
    ParsedFeed {
        meta: FeedMeta {
            title: Some("Example Feed".to_string()),
            link: Some("https://example.com/".to_string()),
            updated,
            published: None,
        },
        entries,
    }
}

pub fn entry(guid: &str, date: DateTime<Utc>) -> RawEntry {
    RawEntry::new()
        .with_guid(guid)
        .with_title(format!("Entry {guid}"))
        .with_url(format!("https://example.com/{guid}"))
        .with_content(format!("<p>Body of {guid}</p>"))
        .with_published(date)
}

pub struct Harness {
    pub db: Database,
    pub fetcher: StubFetcher,
    pub clock: Arc<FixedClock>,
    pub engine: PollEngine<StubFetcher>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(PollConfig::default()).await
    }

    pub async fn with_config(config: PollConfig) -> Self {
        let db = Database::open_in_memory().await.unwrap();
        Self::with_database(db, config)
    }

    /// Harness over an existing database, e.g. a file in a temp dir.
    pub fn with_database(db: Database, config: PollConfig) -> Self {
        let fetcher = StubFetcher::new();
        let clock = Arc::new(FixedClock::new(t0()));
        let engine = PollEngine::new(db.clone(), fetcher.clone(), config, Sanitizer::default())
            .with_clock(clock.clone());
        Self {
            db,
            fetcher,
            clock,
            engine,
        }
    }

    pub async fn add_feed(&self, url: &str) -> Feed {
        let mut conn = self.db.pool().acquire().await.unwrap();
        FeedRepository::new(&mut conn)
            .create(&NewFeed::new(1, url), t0())
            .await
            .unwrap()
    }

    pub async fn feed(&self, id: i64) -> Feed {
        let mut conn = self.db.pool().acquire().await.unwrap();
        FeedRepository::new(&mut conn)
            .get_by_id(id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn entries(&self, feed_id: i64) -> Vec<Entry> {
        let mut conn = self.db.pool().acquire().await.unwrap();
        EntryRepository::new(&mut conn)
            .list(&EntryFilter::new().feeds([feed_id]))
            .await
            .unwrap()
    }

    pub async fn entry_by_guid(&self, feed_id: i64, guid: &str) -> Option<Entry> {
        let mut conn = self.db.pool().acquire().await.unwrap();
        EntryRepository::new(&mut conn)
            .find_by_guid(feed_id, guid)
            .await
            .unwrap()
    }

    /// Unread and total counts recounted from the entry table.
    pub async fn actual_counts(&self, feed_id: i64) -> (i64, i64) {
        let mut conn = self.db.pool().acquire().await.unwrap();
        let mut repo = EntryRepository::new(&mut conn);
        let unread = repo
            .count(&EntryFilter::new().feeds([feed_id]).unread())
            .await
            .unwrap();
        let total = repo
            .count(&EntryFilter::new().feeds([feed_id]))
            .await
            .unwrap();
        (unread, total)
    }

    /// Cached counts must match a fresh recount.
    pub async fn assert_counts_consistent(&self, feed_id: i64) {
        let feed = self.feed(feed_id).await;
        assert_eq!(
            (feed.unread_count, feed.total_count),
            self.actual_counts(feed_id).await,
            "cached counts of feed {feed_id} are stale"
        );
        assert!(feed.unread_count >= 0 && feed.unread_count <= feed.total_count);
    }
}
