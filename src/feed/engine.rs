//! Feed poll engine.
//!
//! Decides whether a feed is due, fetches it, turns the fetch outcome into
//! feed state and runs the reconciler. Each feed check is one transaction;
//! the network fetch happens before it is opened.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::counts::CountCache;
use super::fetcher::{FeedFetcher, FetchOutcome};
use super::reconciler::Reconciler;
use super::repository::{EntryFilter, EntryRepository, FeedFilter, FeedRepository};
use super::sanitizer::Sanitizer;
use super::types::{Feed, ParsedFeed};
use crate::config::PollConfig;
use crate::datetime::{Clock, SystemClock};
use crate::db::Database;
use crate::{FeedkeeperError, Result};

/// Flags for one poll run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckOptions {
    /// Check even if not due, and reconcile even if the feed claims no change.
    pub force: bool,
    /// Store new entries as read.
    pub mark_read: bool,
    /// Log every feed's result at info level.
    pub verbose: bool,
}

/// Which feeds a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSelection {
    All,
    /// Feeds with exactly this URL. It is an error if there are none.
    Url(String),
}

/// What happened to one feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    NotDue,
    /// Fetched, but the feed says nothing changed since the last check.
    Unchanged,
    Updated,
    /// Transient failure recorded on the feed.
    Failed,
    /// Permanent failure; the feed was deactivated.
    Deactivated,
    /// The feed was deleted while it was being fetched. Nothing was written.
    Gone,
}

/// Result of checking one feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub feed_id: i64,
    pub feed_url: String,
    pub status: CheckStatus,
    pub error: String,
    pub created: usize,
    pub updated: usize,
    pub expiring: u64,
    /// Expired entries removed after the check.
    pub deleted: u64,
}

impl CheckResult {
    fn new(feed: &Feed, status: CheckStatus) -> Self {
        Self {
            feed_id: feed.id,
            feed_url: feed.feed_url.clone(),
            status,
            error: feed.error.clone(),
            created: 0,
            updated: 0,
            expiring: 0,
            deleted: 0,
        }
    }
}

/// Summary of a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollReport {
    pub checked: usize,
    pub not_due: usize,
    pub failed: usize,
    pub deactivated: usize,
    /// Feeds deleted during the run.
    pub gone: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: u64,
    /// Entries deleted by a purge before the checks.
    pub purged: u64,
    pub results: Vec<CheckResult>,
}

impl PollReport {
    fn from_results(mut results: Vec<CheckResult>) -> Self {
        results.sort_by_key(|r| r.feed_id);
        let mut report = PollReport::default();
        for result in &results {
            match result.status {
                CheckStatus::NotDue => report.not_due += 1,
                CheckStatus::Failed => report.failed += 1,
                CheckStatus::Deactivated => report.deactivated += 1,
                CheckStatus::Gone => report.gone += 1,
                CheckStatus::Unchanged | CheckStatus::Updated => {}
            }
            if !matches!(result.status, CheckStatus::NotDue | CheckStatus::Gone) {
                report.checked += 1;
            }
            report.created += result.created;
            report.updated += result.updated;
            report.deleted += result.deleted;
        }
        report.results = results;
        report
    }
}

/// Polls feeds and keeps their entries reconciled.
pub struct PollEngine<F> {
    db: Database,
    fetcher: F,
    clock: Arc<dyn Clock>,
    config: PollConfig,
    sanitizer: Sanitizer,
    /// Serialises database writes; fetches still run in parallel.
    write_lock: Mutex<()>,
}

impl<F: FeedFetcher> PollEngine<F> {
    /// Create an engine using the system clock.
    pub fn new(db: Database, fetcher: F, config: PollConfig, sanitizer: Sanitizer) -> Self {
        Self {
            db,
            fetcher,
            clock: Arc::new(SystemClock),
            config,
            sanitizer,
            write_lock: Mutex::new(()),
        }
    }

    /// Use a different clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Select feeds, optionally purge them, and check the active ones.
    pub async fn run(
        &self,
        selection: &FeedSelection,
        options: &CheckOptions,
        purge: bool,
    ) -> Result<PollReport> {
        let feeds = {
            let mut conn = self.db.pool().acquire().await?;
            let filter = match selection {
                FeedSelection::All => FeedFilter::new(),
                FeedSelection::Url(url) => FeedFilter::new().feed_url(url.as_str()),
            };
            FeedRepository::new(&mut conn).list(&filter).await?
        };
        if let FeedSelection::Url(url) = selection {
            if feeds.is_empty() {
                return Err(FeedkeeperError::NotFound(format!("feed with URL {url}")));
            }
        }

        let ids: Vec<i64> = feeds.iter().map(|f| f.id).collect();
        let purged = if purge { self.purge(&ids).await? } else { 0 };

        let active: Vec<Feed> = if purge {
            // Reload so the cleared check times are seen.
            let mut conn = self.db.pool().acquire().await?;
            FeedRepository::new(&mut conn)
                .list(&FeedFilter::new().ids(ids.iter().copied()).active())
                .await?
        } else {
            feeds.into_iter().filter(|f| f.is_active).collect()
        };

        let mut report = self.check_feeds_counting(active, options, &ids).await?;
        report.purged = purged;
        Ok(report)
    }

    /// Check a batch of feeds, then recompute their counts once.
    pub async fn check_feeds(&self, feeds: Vec<Feed>, options: &CheckOptions) -> Result<PollReport> {
        let ids: Vec<i64> = feeds.iter().map(|f| f.id).collect();
        self.check_feeds_counting(feeds, options, &ids).await
    }

    async fn check_feeds_counting(
        &self,
        feeds: Vec<Feed>,
        options: &CheckOptions,
        count_ids: &[i64],
    ) -> Result<PollReport> {
        let concurrency = self.config.max_concurrent_fetches.max(1);
        let outcomes: Vec<Result<CheckResult>> = stream::iter(feeds)
            .map(|feed| self.check_feed(feed, options))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        // Recount before surfacing any storage error.
        {
            let _guard = self.write_lock.lock().await;
            let mut conn = self.db.pool().acquire().await?;
            CountCache::new(&mut conn).recompute(count_ids).await?;
        }

        let results = outcomes.into_iter().collect::<Result<Vec<_>>>()?;
        let report = PollReport::from_results(results);
        info!(
            "Poll finished: {} checked, {} not due, {} failed, {} deactivated, {} new entries",
            report.checked, report.not_due, report.failed, report.deactivated, report.created
        );
        Ok(report)
    }

    /// Check one feed if it is due.
    ///
    /// Fetch, parse and reconciliation failures end up in the feed's error
    /// field; only storage errors are returned.
    pub async fn check_feed(&self, mut feed: Feed, options: &CheckOptions) -> Result<CheckResult> {
        let now = self.clock.now();
        let window = Duration::minutes(self.config.due_window_minutes);
        if !options.force && !feed.is_due(now, window) {
            return Ok(CheckResult::new(&feed, CheckStatus::NotDue));
        }

        // From here on the feed record is written whatever happens.
        feed.last_checked = Some(now);
        feed.next_check = Some(
            now + Duration::minutes(feed.frequency_minutes(self.config.default_frequency_minutes)),
        );

        let timeout = StdDuration::from_secs(self.config.request_timeout_secs);
        let fetched = self.fetcher.fetch(&feed.feed_url, timeout).await;
        if let Some(moved_to) = fetched.moved_to {
            info!("Feed {} moved from {} to {}", feed.id, feed.feed_url, moved_to);
            feed.feed_url = moved_to;
        }

        let was_active = feed.is_active;
        let parsed: Option<ParsedFeed> = match fetched.outcome {
            FetchOutcome::Success(parsed) => {
                feed.error.clear();
                Some(parsed)
            }
            FetchOutcome::Error { message, partial } => {
                feed.error = message;
                partial
            }
            FetchOutcome::Inactive { message } => {
                feed.is_active = false;
                feed.error = message;
                None
            }
        };

        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.pool().begin().await?;
        if !FeedRepository::new(&mut tx).mark_checked(feed.id, now).await? {
            tx.rollback().await?;
            debug!("Feed {} was deleted during the check", feed.id);
            return Ok(CheckResult::new(&feed, CheckStatus::Gone));
        }
        let mut result = CheckResult::new(&feed, CheckStatus::Unchanged);
        let mut reconciled = false;

        if let Some(parsed) = parsed {
            let updated = parsed.meta.updated_at();
            let unchanged = matches!(
                (updated, feed.last_updated),
                (Some(new), Some(previous)) if new <= previous
            );

            if unchanged && !options.force {
                debug!("Feed {} has not changed since {:?}", feed.id, feed.last_updated);
            } else {
                let reconciler = Reconciler::new(
                    &self.sanitizer,
                    self.config.unmatchable_entries,
                    self.config.item_expiry_days,
                    now,
                );
                let mut savepoint = sqlx::Connection::begin(&mut *tx).await?;
                match reconciler
                    .reconcile(&mut savepoint, &feed, &parsed.entries, options.mark_read)
                    .await
                {
                    Ok(outcome) => {
                        savepoint.commit().await?;
                        reconciled = true;
                        result.created = outcome.created;
                        result.updated = outcome.updated;
                        result.expiring = outcome.expiring;

                        if let Some(title) = parsed.meta.title.filter(|t| !t.is_empty()) {
                            feed.title = title;
                        }
                        if let Some(link) = parsed.meta.link.filter(|l| !l.is_empty()) {
                            feed.site_url = link;
                        }
                        if let Some(last_updated) = updated.or(outcome.latest) {
                            feed.last_updated = Some(last_updated);
                        }
                    }
                    Err(FeedkeeperError::Reconcile(message)) => {
                        savepoint.rollback().await?;
                        feed.append_error(&format!("Entry error: {message}"));
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        FeedRepository::new(&mut tx).save_check_state(&feed).await?;
        result.deleted = EntryRepository::new(&mut tx)
            .delete_expired(Some(feed.id), now)
            .await?;
        CountCache::new(&mut tx).recompute(&[feed.id]).await?;
        tx.commit().await?;

        result.feed_url = feed.feed_url.clone();
        result.error = feed.error.clone();
        result.status = if was_active && !feed.is_active {
            CheckStatus::Deactivated
        } else if !feed.error.is_empty() {
            CheckStatus::Failed
        } else if reconciled {
            CheckStatus::Updated
        } else {
            CheckStatus::Unchanged
        };

        self.log_result(&feed, &result, options.verbose);
        Ok(result)
    }

    /// Delete the feeds' entries and forget their check times.
    async fn purge(&self, feed_ids: &[i64]) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.pool().begin().await?;
        let deleted = EntryRepository::new(&mut tx)
            .delete(&EntryFilter::new().feeds(feed_ids.iter().copied()))
            .await?;
        FeedRepository::new(&mut tx)
            .reset_check_times(feed_ids)
            .await?;
        tx.commit().await?;
        info!("Purged {} entries from {} feeds", deleted, feed_ids.len());
        Ok(deleted)
    }

    fn log_result(&self, feed: &Feed, result: &CheckResult, verbose: bool) {
        match result.status {
            CheckStatus::Deactivated => {
                warn!("Feed {} ({}) deactivated: {}", feed.id, feed.feed_url, feed.error)
            }
            CheckStatus::Failed => {
                warn!("Feed {} ({}) failed: {}", feed.id, feed.feed_url, feed.error)
            }
            _ if verbose => info!(
                "Feed {} ({}): {:?}, {} new, {} updated",
                feed.id,
                feed.display_title(),
                result.status,
                result.created,
                result.updated
            ),
            _ => debug!(
                "Feed {} ({}): {:?}, {} new, {} updated",
                feed.id,
                feed.display_title(),
                result.status,
                result.created,
                result.updated
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datetime::FixedClock;
    use crate::feed::fetcher::FetchResult;
    use crate::feed::types::{FeedMeta, NewFeed, RawEntry};
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Mutex;

    /// Returns queued results in order, then a temporary error.
    struct QueueFetcher {
        results: Mutex<Vec<FetchResult>>,
        calls: Mutex<Vec<String>>,
    }

    impl QueueFetcher {
        fn new(results: Vec<FetchResult>) -> Self {
            Self {
                results: Mutex::new(results.into_iter().rev().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl FeedFetcher for QueueFetcher {
        async fn fetch(&self, url: &str, _timeout: StdDuration) -> FetchResult {
            self.calls.lock().unwrap().push(url.to_string());
            self.results
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| FetchResult::error("Temporary error 503"))
        }
    }

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn feed_doc(updated: Option<DateTime<Utc>>, entries: Vec<RawEntry>) -> ParsedFeed {
        ParsedFeed {
            meta: FeedMeta {
                title: Some("Remote title".to_string()),
                link: Some("https://example.com/".to_string()),
                updated,
                published: None,
            },
            entries,
        }
    }

    async fn engine(results: Vec<FetchResult>) -> (PollEngine<QueueFetcher>, Feed, Arc<FixedClock>) {
        let db = Database::open_in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let feed = FeedRepository::new(&mut conn)
            .create(&NewFeed::new(1, "https://example.com/feed"), t(0))
            .await
            .unwrap();
        drop(conn);

        let clock = Arc::new(FixedClock::new(t(10)));
        let engine = PollEngine::new(
            db,
            QueueFetcher::new(results),
            PollConfig::default(),
            Sanitizer::default(),
        )
        .with_clock(clock.clone());
        (engine, feed, clock)
    }

    async fn reload(engine: &PollEngine<QueueFetcher>, id: i64) -> Feed {
        let mut conn = engine.database().pool().acquire().await.unwrap();
        FeedRepository::new(&mut conn)
            .get_by_id(id)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_check_sets_schedule_and_metadata() {
        let doc = feed_doc(Some(t(9)), vec![RawEntry::new().with_guid("a")]);
        let (engine, feed, _clock) = engine(vec![FetchResult::success(doc)]).await;

        let result = engine
            .check_feed(feed.clone(), &CheckOptions::default())
            .await
            .unwrap();
        assert_eq!(result.status, CheckStatus::Updated);
        assert_eq!(result.created, 1);

        let feed = reload(&engine, feed.id).await;
        assert_eq!(feed.last_checked, Some(t(10)));
        assert_eq!(feed.next_check, Some(t(10) + Duration::minutes(1440)));
        assert_eq!(feed.title, "Remote title");
        assert_eq!(feed.site_url, "https://example.com/");
        assert_eq!(feed.last_updated, Some(t(9)));
    }

    #[tokio::test]
    async fn test_not_due_is_not_fetched() {
        let (engine, mut feed, _clock) = engine(vec![]).await;
        feed.next_check = Some(t(11));

        let result = engine
            .check_feed(feed.clone(), &CheckOptions::default())
            .await
            .unwrap();
        assert_eq!(result.status, CheckStatus::NotDue);
        assert!(engine.fetcher.calls.lock().unwrap().is_empty());

        let forced = CheckOptions {
            force: true,
            ..Default::default()
        };
        let result = engine.check_feed(feed, &forced).await.unwrap();
        assert_eq!(result.status, CheckStatus::Failed);
        assert_eq!(engine.fetcher.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_due_window() {
        let (mut engine, mut feed, _clock) = engine(vec![]).await;
        engine.config.due_window_minutes = 60;
        feed.next_check = Some(t(10) + Duration::minutes(59));

        let result = engine
            .check_feed(feed, &CheckOptions::default())
            .await
            .unwrap();
        assert_ne!(result.status, CheckStatus::NotDue);
    }

    #[tokio::test]
    async fn test_unchanged_feed_skips_reconcile() {
        let doc = feed_doc(Some(t(9)), vec![RawEntry::new().with_guid("a")]);
        let (engine, feed, clock) = engine(vec![
            FetchResult::success(doc.clone()),
            FetchResult::success(feed_doc(
                Some(t(9)),
                vec![RawEntry::new().with_guid("b")],
            )),
        ])
        .await;

        engine
            .check_feed(feed.clone(), &CheckOptions::default())
            .await
            .unwrap();
        clock.advance(Duration::days(2));
        let feed = reload(&engine, feed.id).await;
        let result = engine
            .check_feed(feed.clone(), &CheckOptions::default())
            .await
            .unwrap();

        assert_eq!(result.status, CheckStatus::Unchanged);
        assert_eq!(result.created, 0);
        let feed = reload(&engine, feed.id).await;
        assert_eq!(feed.last_checked, Some(t(10) + Duration::days(2)));
    }

    #[tokio::test]
    async fn test_error_keeps_feed_active() {
        let (engine, feed, _clock) = engine(vec![FetchResult::error("Temporary error 404")]).await;

        let result = engine
            .check_feed(feed.clone(), &CheckOptions::default())
            .await
            .unwrap();
        assert_eq!(result.status, CheckStatus::Failed);

        let feed = reload(&engine, feed.id).await;
        assert!(feed.is_active);
        assert_eq!(feed.error, "Temporary error 404");
        assert_eq!(feed.last_checked, Some(t(10)));
    }

    #[tokio::test]
    async fn test_success_clears_previous_error() {
        let doc = feed_doc(None, vec![]);
        let (engine, feed, clock) = engine(vec![
            FetchResult::error("Temporary error 500"),
            FetchResult::success(doc),
        ])
        .await;

        engine
            .check_feed(feed.clone(), &CheckOptions::default())
            .await
            .unwrap();
        clock.advance(Duration::days(1));
        let feed = reload(&engine, feed.id).await;
        engine
            .check_feed(feed.clone(), &CheckOptions::default())
            .await
            .unwrap();

        assert_eq!(reload(&engine, feed.id).await.error, "");
    }

    #[tokio::test]
    async fn test_partial_data_is_reconciled() {
        let partial = feed_doc(None, vec![RawEntry::new().with_guid("a")]);
        let (engine, feed, _clock) = engine(vec![FetchOutcome::Error {
            message: "Feed error: Truncated - unexpected end".to_string(),
            partial: Some(partial),
        }
        .into()])
        .await;

        let result = engine
            .check_feed(feed.clone(), &CheckOptions::default())
            .await
            .unwrap();
        assert_eq!(result.status, CheckStatus::Failed);
        assert_eq!(result.created, 1);
    }

    #[tokio::test]
    async fn test_moved_feed_url_is_rewritten() {
        let doc = feed_doc(None, vec![]);
        let (engine, feed, _clock) = engine(vec![FetchResult::success(doc)
            .with_moved_to(Some("https://example.com/new".to_string()))])
        .await;

        engine
            .check_feed(feed.clone(), &CheckOptions::default())
            .await
            .unwrap();
        assert_eq!(
            reload(&engine, feed.id).await.feed_url,
            "https://example.com/new"
        );
    }

    #[tokio::test]
    async fn test_reconcile_error_is_appended_and_rolled_back() {
        let doc = feed_doc(
            None,
            vec![
                RawEntry::new().with_guid("a"),
                RawEntry::new().with_title("unmatchable"),
            ],
        );
        let partial: FetchResult = FetchOutcome::Error {
            message: "Feed error: X - y".to_string(),
            partial: Some(doc),
        }
        .into();
        let (engine, feed, _clock) = engine(vec![partial]).await;

        engine
            .check_feed(feed.clone(), &CheckOptions::default())
            .await
            .unwrap();

        let reloaded = reload(&engine, feed.id).await;
        assert!(reloaded
            .error
            .starts_with("Feed error: X - y; Entry error: cannot import entry 2"));
        assert_eq!(reloaded.last_checked, Some(t(10)));

        let mut conn = engine.database().pool().acquire().await.unwrap();
        let count = EntryRepository::new(&mut conn)
            .count(&EntryFilter::new())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_check_feeds_recomputes_counts() {
        let doc = feed_doc(
            None,
            vec![
                RawEntry::new().with_guid("a"),
                RawEntry::new().with_guid("b"),
            ],
        );
        let (engine, feed, _clock) = engine(vec![FetchResult::success(doc)]).await;

        let report = engine
            .check_feeds(vec![feed.clone()], &CheckOptions::default())
            .await
            .unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.created, 2);

        let feed = reload(&engine, feed.id).await;
        assert_eq!((feed.unread_count, feed.total_count), (2, 2));
    }

    #[tokio::test]
    async fn test_check_feed_keeps_counts_current() {
        let doc = feed_doc(None, vec![RawEntry::new().with_guid("a")]);
        let (engine, feed, _clock) = engine(vec![FetchResult::success(doc)]).await;

        engine
            .check_feed(feed.clone(), &CheckOptions::default())
            .await
            .unwrap();

        let feed = reload(&engine, feed.id).await;
        assert_eq!((feed.unread_count, feed.total_count), (1, 1));
    }

    #[tokio::test]
    async fn test_feed_deleted_mid_batch() {
        let doc = feed_doc(None, vec![RawEntry::new().with_guid("a")]);
        let (engine, a, _clock) = engine(vec![
            FetchResult::success(doc.clone()),
            FetchResult::success(doc),
        ])
        .await;
        let b = {
            let mut conn = engine.database().pool().acquire().await.unwrap();
            let mut repo = FeedRepository::new(&mut conn);
            let b = repo
                .create(&NewFeed::new(1, "https://example.com/other"), t(0))
                .await
                .unwrap();
            repo.delete(b.id).await.unwrap();
            b
        };

        let report = engine
            .check_feeds(vec![a.clone(), b.clone()], &CheckOptions::default())
            .await
            .unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.gone, 1);
        let gone = report.results.iter().find(|r| r.feed_id == b.id).unwrap();
        assert_eq!(gone.status, CheckStatus::Gone);

        let a = reload(&engine, a.id).await;
        assert_eq!((a.unread_count, a.total_count), (1, 1));
        let mut conn = engine.database().pool().acquire().await.unwrap();
        let orphans = EntryRepository::new(&mut conn)
            .count(&EntryFilter::new().feeds([b.id]))
            .await
            .unwrap();
        assert_eq!(orphans, 0);
    }

    /// Edits the feed's user settings while the fetch is in flight.
    struct EditingFetcher {
        db: Database,
        feed_id: i64,
    }

    impl FeedFetcher for EditingFetcher {
        async fn fetch(&self, _url: &str, _timeout: StdDuration) -> FetchResult {
            let mut conn = self.db.pool().acquire().await.unwrap();
            let mut repo = FeedRepository::new(&mut conn);
            let mut feed = repo.get_by_id(self.feed_id).await.unwrap().unwrap();
            feed.custom_title = Some("My name for it".to_string());
            feed.check_frequency = Some(30);
            repo.save(&feed).await.unwrap();
            FetchResult::success(feed_doc(None, vec![RawEntry::new().with_guid("a")]))
        }
    }

    #[tokio::test]
    async fn test_user_edits_during_fetch_survive() {
        let db = Database::open_in_memory().await.unwrap();
        let feed = {
            let mut conn = db.pool().acquire().await.unwrap();
            FeedRepository::new(&mut conn)
                .create(&NewFeed::new(1, "https://example.com/feed"), t(0))
                .await
                .unwrap()
        };
        let engine = PollEngine::new(
            db.clone(),
            EditingFetcher {
                db: db.clone(),
                feed_id: feed.id,
            },
            PollConfig::default(),
            Sanitizer::default(),
        )
        .with_clock(Arc::new(FixedClock::new(t(10))));

        let result = engine
            .check_feed(feed.clone(), &CheckOptions::default())
            .await
            .unwrap();
        assert_eq!(result.status, CheckStatus::Updated);

        let mut conn = db.pool().acquire().await.unwrap();
        let stored = FeedRepository::new(&mut conn)
            .get_by_id(feed.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.custom_title.as_deref(), Some("My name for it"));
        assert_eq!(stored.check_frequency, Some(30));
        assert_eq!(stored.title, "Remote title");
        assert_eq!(stored.last_checked, Some(t(10)));
    }

    #[tokio::test]
    async fn test_run_unknown_url() {
        let (engine, _feed, _clock) = engine(vec![]).await;
        let result = engine
            .run(
                &FeedSelection::Url("https://nowhere.example/".to_string()),
                &CheckOptions::default(),
                false,
            )
            .await;
        assert!(matches!(result, Err(FeedkeeperError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_run_skips_inactive_feeds() {
        let (engine, mut feed, _clock) = engine(vec![]).await;
        feed.is_active = false;
        {
            let mut conn = engine.database().pool().acquire().await.unwrap();
            FeedRepository::new(&mut conn).save(&feed).await.unwrap();
        }

        let report = engine
            .run(&FeedSelection::All, &CheckOptions::default(), false)
            .await
            .unwrap();
        assert_eq!(report.checked, 0);
        assert!(engine.fetcher.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_with_purge() {
        let doc = feed_doc(Some(t(9)), vec![RawEntry::new().with_guid("a")]);
        let (engine, feed, _clock) = engine(vec![
            FetchResult::success(doc.clone()),
            FetchResult::success(doc),
        ])
        .await;

        engine
            .run(&FeedSelection::All, &CheckOptions::default(), false)
            .await
            .unwrap();
        // Not due any more, but the purge resets the schedule.
        let report = engine
            .run(
                &FeedSelection::Url(feed.feed_url.clone()),
                &CheckOptions::default(),
                true,
            )
            .await
            .unwrap();

        assert_eq!(report.purged, 1);
        assert_eq!(report.checked, 1);
        assert_eq!(report.created, 1);
        let feed = reload(&engine, feed.id).await;
        assert_eq!((feed.unread_count, feed.total_count), (1, 1));
    }

    #[test]
    fn test_report_serializes() {
        let report = PollReport::default();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["checked"], 0);
        let status = serde_json::to_value(CheckStatus::NotDue).unwrap();
        assert_eq!(status, "not_due");
    }
}
