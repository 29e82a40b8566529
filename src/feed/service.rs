//! Feed service: subscription management and maintenance tasks.
//!
//! This is the surface the management commands (and an API layer) use to
//! create, import, reactivate and delete feeds and to clean old entries.

use std::sync::Arc;

use tracing::info;

use super::counts::CountCache;
use super::fetcher::validate_url;
use super::repository::{EntryFilter, EntryRepository, FeedFilter, FeedRepository};
use super::types::{Feed, NewFeed};
use crate::datetime::{Clock, SystemClock};
use crate::db::Database;
use crate::{FeedkeeperError, Result};

/// One feed from a subscription list (e.g. an OPML outline).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedImport {
    pub title: String,
    pub feed_url: String,
    pub site_url: String,
}

impl FeedImport {
    pub fn new(
        title: impl Into<String>,
        feed_url: impl Into<String>,
        site_url: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            feed_url: feed_url.into(),
            site_url: site_url.into(),
        }
    }
}

/// Result of an import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub created: usize,
    /// Already subscribed with the same title and URLs.
    pub existing: usize,
    /// Feeds removed first because a purge was requested.
    pub purged: usize,
}

/// Service for feed subscriptions and maintenance.
pub struct FeedService<'a> {
    db: &'a Database,
    clock: Arc<dyn Clock>,
}

impl<'a> FeedService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Subscribe to a feed.
    ///
    /// The feed is not fetched here; the next poll picks it up since it has
    /// never been scheduled.
    pub async fn add_feed(&self, new_feed: &NewFeed) -> Result<Feed> {
        validate_url(&new_feed.feed_url)?;
        if new_feed.check_frequency.is_some_and(|minutes| minutes <= 0) {
            return Err(FeedkeeperError::Validation(
                "check frequency must be positive".to_string(),
            ));
        }

        let mut conn = self.db.pool().acquire().await?;
        let feed = FeedRepository::new(&mut conn)
            .create(new_feed, self.clock.now())
            .await?;
        info!("Added feed {} ({}) for owner {}", feed.id, feed.feed_url, feed.owner_id);
        Ok(feed)
    }

    /// Create feeds from a subscription list.
    ///
    /// Entries whose title, feed URL and site URL match one of the owner's
    /// feeds are skipped. An empty title becomes the feed URL. With `purge`,
    /// the owner's existing feeds are deleted first.
    pub async fn import_feeds(
        &self,
        owner_id: i64,
        feeds: &[FeedImport],
        purge: bool,
    ) -> Result<ImportSummary> {
        for feed in feeds {
            validate_url(&feed.feed_url)?;
        }

        let now = self.clock.now();
        let mut summary = ImportSummary::default();
        let mut tx = self.db.pool().begin().await?;
        let mut repo = FeedRepository::new(&mut tx);

        if purge {
            for feed in repo.list(&FeedFilter::new().owner(owner_id)).await? {
                repo.delete(feed.id).await?;
                summary.purged += 1;
            }
        }

        for feed in feeds {
            let new_feed = NewFeed::new(owner_id, feed.feed_url.as_str())
                .with_title(feed.title.as_str())
                .with_site_url(feed.site_url.as_str());
            if repo
                .exists(owner_id, &new_feed.title, &new_feed.feed_url, &new_feed.site_url)
                .await?
            {
                summary.existing += 1;
                continue;
            }
            repo.create(&new_feed, now).await?;
            summary.created += 1;
        }
        tx.commit().await?;

        info!(
            "Imported feeds for owner {}: {} new, {} existing, {} purged",
            owner_id, summary.created, summary.existing, summary.purged
        );
        Ok(summary)
    }

    pub async fn get_feed(&self, id: i64) -> Result<Feed> {
        let mut conn = self.db.pool().acquire().await?;
        FeedRepository::new(&mut conn)
            .get_by_id(id)
            .await?
            .ok_or_else(|| FeedkeeperError::NotFound(format!("feed {id}")))
    }

    pub async fn list_feeds(&self, filter: &FeedFilter) -> Result<Vec<Feed>> {
        let mut conn = self.db.pool().acquire().await?;
        FeedRepository::new(&mut conn).list(filter).await
    }

    /// Re-enable a feed the engine deactivated.
    ///
    /// The error is cleared and the feed becomes due immediately.
    pub async fn reactivate_feed(&self, id: i64) -> Result<Feed> {
        let mut feed = self.get_feed(id).await?;
        feed.is_active = true;
        feed.error.clear();
        feed.next_check = None;

        let mut conn = self.db.pool().acquire().await?;
        FeedRepository::new(&mut conn).save(&feed).await?;
        info!("Reactivated feed {} ({})", feed.id, feed.feed_url);
        Ok(feed)
    }

    /// Delete a feed and all its entries.
    pub async fn delete_feed(&self, id: i64) -> Result<()> {
        let mut conn = self.db.pool().acquire().await?;
        if !FeedRepository::new(&mut conn).delete(id).await? {
            return Err(FeedkeeperError::NotFound(format!("feed {id}")));
        }
        info!("Deleted feed {}", id);
        Ok(())
    }

    /// Delete read entries of inactive feeds and refresh their counts.
    pub async fn delete_read_entries_of_inactive_feeds(&self) -> Result<u64> {
        let mut tx = self.db.pool().begin().await?;
        let deleted = EntryRepository::new(&mut tx)
            .delete_read_of_inactive_feeds()
            .await?;
        let inactive: Vec<i64> = FeedRepository::new(&mut tx)
            .list(&FeedFilter::new().inactive())
            .await?
            .into_iter()
            .map(|f| f.id)
            .collect();
        CountCache::new(&mut tx).recompute(&inactive).await?;
        tx.commit().await?;

        info!("Deleted {} read entries of inactive feeds", deleted);
        Ok(deleted)
    }

    /// Delete every entry whose expiry has passed, across all feeds.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let now = self.clock.now();
        let mut tx = self.db.pool().begin().await?;
        let deleted = EntryRepository::new(&mut tx)
            .delete_expired(None, now)
            .await?;
        if deleted > 0 {
            CountCache::new(&mut tx).recompute_all().await?;
        }
        tx.commit().await?;

        info!("Swept {} expired entries", deleted);
        Ok(deleted)
    }

    /// Recount unread and total entries for every feed.
    pub async fn update_cache(&self) -> Result<u64> {
        let mut conn = self.db.pool().acquire().await?;
        let updated = CountCache::new(&mut conn).recompute_all().await?;
        info!("Recomputed counts for {} feeds", updated);
        Ok(updated)
    }

    /// Number of entries matching a filter.
    pub async fn count_entries(&self, filter: &EntryFilter) -> Result<i64> {
        let mut conn = self.db.pool().acquire().await?;
        EntryRepository::new(&mut conn).count(filter).await
    }
}
