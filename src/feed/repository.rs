//! Feed and entry repositories.
//!
//! Repositories borrow a connection rather than the pool, so the same code
//! runs on a pooled connection or inside a transaction:
//!
//! ```ignore
//! let mut tx = db.pool().begin().await?;
//! let feed = FeedRepository::new(&mut tx).get_by_id(id).await?;
//! ```

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::types::{Entry, EntryState, Feed, NewFeed};
use crate::datetime::{opt_to_db, parse_datetime, to_db};
use crate::{FeedkeeperError, Result};

const FEED_COLUMNS: &str = "id, owner_id, title, custom_title, feed_url, site_url, is_active, \
     check_frequency, last_updated, last_checked, next_check, error, unread_count, total_count, added_at";

const ENTRY_COLUMNS: &str = "id, feed_id, state, title, content, published_at, author, url, \
     comments_url, guid, expires_at";

/// Row type for a feed.
#[derive(Debug, Clone, sqlx::FromRow)]
struct FeedRow {
    id: i64,
    owner_id: i64,
    title: String,
    custom_title: Option<String>,
    feed_url: String,
    site_url: String,
    is_active: bool,
    check_frequency: Option<i64>,
    last_updated: Option<String>,
    last_checked: Option<String>,
    next_check: Option<String>,
    error: String,
    unread_count: i64,
    total_count: i64,
    added_at: String,
}

impl From<FeedRow> for Feed {
    fn from(row: FeedRow) -> Self {
        Feed {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            custom_title: row.custom_title,
            feed_url: row.feed_url,
            site_url: row.site_url,
            is_active: row.is_active,
            check_frequency: row.check_frequency,
            last_updated: row.last_updated.and_then(|s| parse_datetime(&s)),
            last_checked: row.last_checked.and_then(|s| parse_datetime(&s)),
            next_check: row.next_check.and_then(|s| parse_datetime(&s)),
            error: row.error,
            unread_count: row.unread_count,
            total_count: row.total_count,
            added_at: parse_datetime(&row.added_at).unwrap_or_default(),
        }
    }
}

/// Row type for an entry.
#[derive(Debug, Clone, sqlx::FromRow)]
struct EntryRow {
    id: i64,
    feed_id: i64,
    state: i64,
    title: String,
    content: String,
    published_at: String,
    author: String,
    url: String,
    comments_url: String,
    guid: String,
    expires_at: Option<String>,
}

impl TryFrom<EntryRow> for Entry {
    type Error = FeedkeeperError;

    fn try_from(row: EntryRow) -> Result<Self> {
        let state = EntryState::from_i64(row.state).ok_or_else(|| {
            FeedkeeperError::Database(format!("entry {} has invalid state {}", row.id, row.state))
        })?;
        let published_at = parse_datetime(&row.published_at).ok_or_else(|| {
            FeedkeeperError::Database(format!(
                "entry {} has invalid date {}",
                row.id, row.published_at
            ))
        })?;
        Ok(Entry {
            id: row.id,
            feed_id: row.feed_id,
            state,
            title: row.title,
            content: row.content,
            published_at,
            author: row.author,
            url: row.url,
            comments_url: row.comments_url,
            guid: row.guid,
            expires_at: row.expires_at.and_then(|s| parse_datetime(&s)),
        })
    }
}

fn entries_from_rows(rows: Vec<EntryRow>) -> Result<Vec<Entry>> {
    rows.into_iter().map(Entry::try_from).collect()
}

/// Push ` AND <column> IN (...)`; an empty list matches nothing.
fn push_in(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, ids: &[i64]) {
    if ids.is_empty() {
        qb.push(" AND 0 = 1");
        return;
    }
    qb.push(" AND ").push(column).push(" IN (");
    let mut list = qb.separated(", ");
    for id in ids {
        list.push_bind(*id);
    }
    list.push_unseparated(")");
}

/// Composable predicate over entries.
///
/// Every criterion that is set must hold; an empty filter matches all
/// entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryFilter {
    ids: Option<Vec<i64>>,
    feeds: Option<Vec<i64>>,
    owner: Option<i64>,
    state: Option<EntryState>,
}

impl EntryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only these entries.
    pub fn ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    /// Only entries of these feeds.
    pub fn feeds(mut self, feed_ids: impl IntoIterator<Item = i64>) -> Self {
        self.feeds = Some(feed_ids.into_iter().collect());
        self
    }

    /// Only entries of feeds owned by this user.
    pub fn owner(mut self, owner_id: i64) -> Self {
        self.owner = Some(owner_id);
        self
    }

    pub fn state(mut self, state: EntryState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn unread(self) -> Self {
        self.state(EntryState::Unread)
    }

    pub fn read(self) -> Self {
        self.state(EntryState::Read)
    }

    pub fn saved(self) -> Self {
        self.state(EntryState::Saved)
    }

    pub(crate) fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE 1 = 1");
        if let Some(ids) = &self.ids {
            push_in(qb, "id", ids);
        }
        if let Some(feeds) = &self.feeds {
            push_in(qb, "feed_id", feeds);
        }
        if let Some(owner) = self.owner {
            qb.push(" AND feed_id IN (SELECT id FROM feeds WHERE owner_id = ")
                .push_bind(owner)
                .push(")");
        }
        if let Some(state) = self.state {
            qb.push(" AND state = ").push_bind(state.as_i64());
        }
    }
}

/// Composable predicate over feeds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedFilter {
    ids: Option<Vec<i64>>,
    owner: Option<i64>,
    active: Option<bool>,
    feed_url: Option<String>,
}

impl FeedFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    pub fn owner(mut self, owner_id: i64) -> Self {
        self.owner = Some(owner_id);
        self
    }

    pub fn active(mut self) -> Self {
        self.active = Some(true);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = Some(false);
        self
    }

    pub fn feed_url(mut self, url: impl Into<String>) -> Self {
        self.feed_url = Some(url.into());
        self
    }

    fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE 1 = 1");
        if let Some(ids) = &self.ids {
            push_in(qb, "id", ids);
        }
        if let Some(owner) = self.owner {
            qb.push(" AND owner_id = ").push_bind(owner);
        }
        if let Some(active) = self.active {
            qb.push(" AND is_active = ").push_bind(active);
        }
        if let Some(url) = &self.feed_url {
            qb.push(" AND feed_url = ").push_bind(url.clone());
        }
    }
}

/// Repository for feed records.
pub struct FeedRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> FeedRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Create a feed. New feeds are active, healthy and have zero counts.
    pub async fn create(&mut self, new_feed: &NewFeed, added_at: DateTime<Utc>) -> Result<Feed> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO feeds (owner_id, title, feed_url, site_url, check_frequency, added_at)
             VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(new_feed.owner_id)
        .bind(&new_feed.title)
        .bind(&new_feed.feed_url)
        .bind(&new_feed.site_url)
        .bind(new_feed.check_frequency)
        .bind(to_db(&added_at))
        .fetch_one(&mut *self.conn)
        .await?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| FeedkeeperError::NotFound("feed".to_string()))
    }

    pub async fn get_by_id(&mut self, id: i64) -> Result<Option<Feed>> {
        let sql = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?");
        let row = sqlx::query_as::<_, FeedRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(row.map(Feed::from))
    }

    /// List feeds matching the filter, ordered by id.
    pub async fn list(&mut self, filter: &FeedFilter) -> Result<Vec<Feed>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {FEED_COLUMNS} FROM feeds"));
        filter.push_where(&mut qb);
        qb.push(" ORDER BY id");
        let rows = qb
            .build_query_as::<FeedRow>()
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// Whether the owner already has a feed with exactly these fields.
    pub async fn exists(
        &mut self,
        owner_id: i64,
        title: &str,
        feed_url: &str,
        site_url: &str,
    ) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM feeds
             WHERE owner_id = ? AND title = ? AND feed_url = ? AND site_url = ?
             LIMIT 1",
        )
        .bind(owner_id)
        .bind(title)
        .bind(feed_url)
        .bind(site_url)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(found.is_some())
    }

    /// Persist the fields the poll engine and operators change.
    ///
    /// Counts are left alone; they belong to the count cache.
    pub async fn save(&mut self, feed: &Feed) -> Result<()> {
        let result = sqlx::query(
            "UPDATE feeds SET title = ?, custom_title = ?, feed_url = ?, site_url = ?,
                 is_active = ?, check_frequency = ?, last_updated = ?, last_checked = ?,
                 next_check = ?, error = ?
             WHERE id = ?",
        )
        .bind(&feed.title)
        .bind(&feed.custom_title)
        .bind(&feed.feed_url)
        .bind(&feed.site_url)
        .bind(feed.is_active)
        .bind(feed.check_frequency)
        .bind(opt_to_db(feed.last_updated.as_ref()))
        .bind(opt_to_db(feed.last_checked.as_ref()))
        .bind(opt_to_db(feed.next_check.as_ref()))
        .bind(&feed.error)
        .bind(feed.id)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(FeedkeeperError::NotFound(format!("feed {}", feed.id)));
        }
        Ok(())
    }

    /// Write the fields a poll is allowed to change.
    ///
    /// User settings (`custom_title`, `check_frequency`) and counts are left
    /// alone. Returns false if the feed no longer exists.
    pub async fn save_check_state(&mut self, feed: &Feed) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE feeds SET title = ?, feed_url = ?, site_url = ?, is_active = ?,
                 last_updated = ?, last_checked = ?, next_check = ?, error = ?
             WHERE id = ?",
        )
        .bind(&feed.title)
        .bind(&feed.feed_url)
        .bind(&feed.site_url)
        .bind(feed.is_active)
        .bind(opt_to_db(feed.last_updated.as_ref()))
        .bind(opt_to_db(feed.last_checked.as_ref()))
        .bind(opt_to_db(feed.next_check.as_ref()))
        .bind(&feed.error)
        .bind(feed.id)
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a check time. Returns false if the feed no longer exists.
    ///
    /// As the first statement of a transaction this takes the write lock.
    pub async fn mark_checked(&mut self, id: i64, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE feeds SET last_checked = ? WHERE id = ?")
            .bind(to_db(&at))
            .bind(id)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Forget when the feeds were updated and checked.
    pub async fn reset_check_times(&mut self, ids: &[i64]) -> Result<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "UPDATE feeds SET last_updated = NULL, last_checked = NULL, next_check = NULL WHERE 1 = 1",
        );
        push_in(&mut qb, "id", ids);
        let result = qb.build().execute(&mut *self.conn).await?;
        Ok(result.rows_affected())
    }

    /// Delete a feed and, by cascade, its entries.
    pub async fn delete(&mut self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(id)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Values written when inserting or refreshing an entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryFields {
    pub title: String,
    pub content: String,
    pub published_at: DateTime<Utc>,
    pub author: String,
    pub url: String,
    pub comments_url: String,
    pub guid: String,
}

/// Repository for entry records.
pub struct EntryRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> EntryRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Insert a new entry and return its id.
    pub async fn insert(
        &mut self,
        feed_id: i64,
        fields: &EntryFields,
        state: EntryState,
    ) -> Result<i64> {
        let id = sqlx::query_scalar(
            "INSERT INTO entries
                 (feed_id, state, title, content, published_at, author, url, comments_url, guid)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(feed_id)
        .bind(state.as_i64())
        .bind(&fields.title)
        .bind(&fields.content)
        .bind(to_db(&fields.published_at))
        .bind(&fields.author)
        .bind(&fields.url)
        .bind(&fields.comments_url)
        .bind(&fields.guid)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(id)
    }

    /// Overwrite an entry's content fields. State and expiry are kept.
    pub async fn update_fields(&mut self, id: i64, fields: &EntryFields) -> Result<()> {
        sqlx::query(
            "UPDATE entries SET title = ?, content = ?, published_at = ?, author = ?, url = ?,
                 comments_url = ?, guid = ?
             WHERE id = ?",
        )
        .bind(&fields.title)
        .bind(&fields.content)
        .bind(to_db(&fields.published_at))
        .bind(&fields.author)
        .bind(&fields.url)
        .bind(&fields.comments_url)
        .bind(&fields.guid)
        .bind(id)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    pub async fn get_by_id(&mut self, id: i64) -> Result<Option<Entry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?");
        let row = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;
        row.map(Entry::try_from).transpose()
    }

    /// Oldest entry of the feed with this guid.
    pub async fn find_by_guid(&mut self, feed_id: i64, guid: &str) -> Result<Option<Entry>> {
        self.find_one("guid = ?", feed_id, guid, None).await
    }

    /// Oldest entry of the feed with this url.
    pub async fn find_by_url(&mut self, feed_id: i64, url: &str) -> Result<Option<Entry>> {
        self.find_one("url = ?", feed_id, url, None).await
    }

    /// Oldest entry of the feed with this title and publication date.
    pub async fn find_by_title_and_date(
        &mut self,
        feed_id: i64,
        title: &str,
        published_at: &DateTime<Utc>,
    ) -> Result<Option<Entry>> {
        self.find_one("title = ? AND published_at = ?", feed_id, title, Some(to_db(published_at)))
            .await
    }

    async fn find_one(
        &mut self,
        condition: &str,
        feed_id: i64,
        value: &str,
        extra: Option<String>,
    ) -> Result<Option<Entry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE feed_id = ? AND {condition} ORDER BY id LIMIT 1"
        );
        let mut query = sqlx::query_as::<_, EntryRow>(&sql).bind(feed_id).bind(value);
        if let Some(extra) = extra {
            query = query.bind(extra);
        }
        let row = query.fetch_optional(&mut *self.conn).await?;
        row.map(Entry::try_from).transpose()
    }

    /// List entries matching the filter, newest first.
    pub async fn list(&mut self, filter: &EntryFilter) -> Result<Vec<Entry>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {ENTRY_COLUMNS} FROM entries"));
        filter.push_where(&mut qb);
        qb.push(" ORDER BY published_at DESC, id DESC");
        let rows = qb
            .build_query_as::<EntryRow>()
            .fetch_all(&mut *self.conn)
            .await?;
        entries_from_rows(rows)
    }

    pub async fn count(&mut self, filter: &EntryFilter) -> Result<i64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM entries");
        filter.push_where(&mut qb);
        let count = qb
            .build_query_scalar::<i64>()
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(count)
    }

    /// Distinct feeds owning the matching entries.
    pub async fn feed_ids(&mut self, filter: &EntryFilter) -> Result<Vec<i64>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT DISTINCT feed_id FROM entries");
        filter.push_where(&mut qb);
        qb.push(" ORDER BY feed_id");
        let ids = qb
            .build_query_scalar::<i64>()
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(ids)
    }

    /// Set the state of matching entries.
    ///
    /// Moving an entry out of Read clears its pending expiry.
    pub async fn set_state(&mut self, filter: &EntryFilter, state: EntryState) -> Result<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE entries SET state = ");
        qb.push_bind(state.as_i64());
        if !state.keeps_expiry() {
            qb.push(", expires_at = NULL");
        }
        filter.push_where(&mut qb);
        let result = qb.build().execute(&mut *self.conn).await?;
        Ok(result.rows_affected())
    }

    /// Schedule expiry for the feed's read entries not in `keep`.
    ///
    /// Entries that already have an expiry keep it.
    pub async fn schedule_expiry(
        &mut self,
        feed_id: i64,
        keep: &[i64],
        expires_at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE entries SET expires_at = ");
        qb.push_bind(to_db(&expires_at))
            .push(" WHERE feed_id = ")
            .push_bind(feed_id)
            .push(" AND state = ")
            .push_bind(EntryState::Read.as_i64())
            .push(" AND expires_at IS NULL");
        if !keep.is_empty() {
            qb.push(" AND id NOT IN (");
            let mut list = qb.separated(", ");
            for id in keep {
                list.push_bind(*id);
            }
            list.push_unseparated(")");
        }
        let result = qb.build().execute(&mut *self.conn).await?;
        Ok(result.rows_affected())
    }

    /// Delete entries whose expiry has passed, for one feed or all feeds.
    pub async fn delete_expired(&mut self, feed_id: Option<i64>, now: DateTime<Utc>) -> Result<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "DELETE FROM entries WHERE expires_at IS NOT NULL AND expires_at <= ",
        );
        qb.push_bind(to_db(&now));
        if let Some(feed_id) = feed_id {
            qb.push(" AND feed_id = ").push_bind(feed_id);
        }
        let result = qb.build().execute(&mut *self.conn).await?;
        Ok(result.rows_affected())
    }

    /// Delete matching entries.
    pub async fn delete(&mut self, filter: &EntryFilter) -> Result<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM entries");
        filter.push_where(&mut qb);
        let result = qb.build().execute(&mut *self.conn).await?;
        Ok(result.rows_affected())
    }

    /// Delete read entries belonging to inactive feeds.
    pub async fn delete_read_of_inactive_feeds(&mut self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM entries WHERE state = ?
             AND feed_id IN (SELECT id FROM feeds WHERE is_active = 0)",
        )
        .bind(EntryState::Read.as_i64())
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected())
    }
}
