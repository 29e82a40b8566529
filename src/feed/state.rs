//! Bulk entry state changes.

use std::collections::BTreeMap;

use tracing::debug;

use super::counts::CountCache;
use super::repository::{EntryFilter, EntryRepository};
use super::types::EntryState;
use crate::db::Database;
use crate::Result;

/// Applies read/unread/saved transitions to sets of entries.
#[derive(Debug, Clone)]
pub struct StateMutator {
    db: Database,
}

impl StateMutator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Set the state of every entry matching `filter`.
    ///
    /// Leaving the read state clears any pending expiry. Returns the new
    /// unread count of every feed that owned a matching entry.
    pub async fn set_state(
        &self,
        filter: &EntryFilter,
        state: EntryState,
    ) -> Result<BTreeMap<i64, i64>> {
        let mut tx = self.db.pool().begin().await?;

        // Collect the feeds before the update changes what the filter matches.
        let mut entries = EntryRepository::new(&mut tx);
        let feed_ids = entries.feed_ids(filter).await?;
        let changed = entries.set_state(filter, state).await?;

        let mut counts = CountCache::new(&mut tx);
        counts.recompute(&feed_ids).await?;
        let unread = counts.unread_counts(&feed_ids).await?;
        tx.commit().await?;

        debug!(
            "Set {} entries to {:?} across {} feeds",
            changed,
            state,
            feed_ids.len()
        );
        Ok(unread)
    }

    /// Mark the owner's unread entries as read, optionally for one feed.
    ///
    /// Saved entries stay saved.
    pub async fn mark_all_read(&self, owner_id: i64, feed_id: Option<i64>) -> Result<BTreeMap<i64, i64>> {
        let mut filter = EntryFilter::new().owner(owner_id).unread();
        if let Some(feed_id) = feed_id {
            filter = filter.feeds([feed_id]);
        }
        self.set_state(&filter, EntryState::Read).await
    }
}
