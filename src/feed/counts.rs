//! Cached unread and total entry counts per feed.
//!
//! The counts on a feed are derived data. They are rebuilt from the entry
//! table with one aggregate statement, never incremented in place, so a
//! concurrent state change can at worst leave a count stale until the next
//! recompute, never out of range.

use std::collections::BTreeMap;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::types::EntryState;
use crate::Result;

const RECOMPUTE: &str = "UPDATE feeds SET \
     unread_count = (SELECT COUNT(*) FROM entries WHERE entries.feed_id = feeds.id AND entries.state = ";

const TOTAL: &str = "), \
     total_count = (SELECT COUNT(*) FROM entries WHERE entries.feed_id = feeds.id)";

/// Count cache operations over one connection.
pub struct CountCache<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> CountCache<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Recount the given feeds. Returns the number of feeds updated.
    pub async fn recompute(&mut self, feed_ids: &[i64]) -> Result<u64> {
        if feed_ids.is_empty() {
            return Ok(0);
        }
        let mut qb = QueryBuilder::<Sqlite>::new(RECOMPUTE);
        qb.push_bind(EntryState::Unread.as_i64())
            .push(TOTAL)
            .push(" WHERE id IN (");
        let mut ids = qb.separated(", ");
        for id in feed_ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated(")");

        let result = qb.build().execute(&mut *self.conn).await?;
        Ok(result.rows_affected())
    }

    /// Recount every feed.
    pub async fn recompute_all(&mut self) -> Result<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new(RECOMPUTE);
        qb.push_bind(EntryState::Unread.as_i64()).push(TOTAL);
        let result = qb.build().execute(&mut *self.conn).await?;
        Ok(result.rows_affected())
    }

    /// Cached unread count per feed. Unknown ids are left out.
    pub async fn unread_counts(&mut self, feed_ids: &[i64]) -> Result<BTreeMap<i64, i64>> {
        if feed_ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT id, unread_count FROM feeds WHERE id IN (");
        let mut ids = qb.separated(", ");
        for id in feed_ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated(")");

        let rows = qb
            .build_query_as::<(i64, i64)>()
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(rows.into_iter().collect())
    }
}
