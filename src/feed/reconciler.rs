//! Entry reconciliation.
//!
//! Matches freshly fetched entries against the ones already stored for a
//! feed, inserting new entries, refreshing ones the feed republished, and
//! scheduling expiry for read entries that have left the feed.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, trace};

use super::repository::{EntryFields, EntryRepository};
use super::sanitizer::Sanitizer;
use super::types::{Entry, EntryState, Feed, RawEntry, UnmatchablePolicy};
use crate::{FeedkeeperError, Result};

/// A fetched entry normalised for storage.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryCandidate {
    pub title: String,
    /// Sanitised HTML.
    pub content: String,
    /// `None` when the feed gave no date; stored as the insert time.
    pub published_at: Option<DateTime<Utc>>,
    pub author: String,
    pub url: String,
    pub comments_url: String,
    pub guid: String,
}

/// How a candidate is looked up among the stored entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKey<'a> {
    Guid(&'a str),
    Url(&'a str),
    TitleAndDate(&'a str, DateTime<Utc>),
}

impl EntryCandidate {
    /// Normalise a parsed entry.
    ///
    /// Content falls back to the description; the date is the updated time,
    /// else published, else created; the guid defaults to the url.
    pub fn from_raw(raw: &RawEntry, sanitizer: &Sanitizer) -> Self {
        let content = raw
            .content
            .as_deref()
            .filter(|c| !c.is_empty())
            .or(raw.description.as_deref())
            .unwrap_or_default();
        let url = raw.url.clone().unwrap_or_default();
        let guid = raw
            .guid
            .clone()
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| url.clone());

        Self {
            title: raw.title.clone().unwrap_or_default(),
            content: sanitizer.clean(content),
            published_at: raw.updated.or(raw.published).or(raw.created),
            author: raw.author.clone().unwrap_or_default(),
            url,
            comments_url: raw.comments_url.clone().unwrap_or_default(),
            guid,
        }
    }

    /// Key used to find the stored copy of this entry, if any key applies.
    pub fn match_key(&self) -> Option<MatchKey<'_>> {
        if !self.guid.is_empty() {
            Some(MatchKey::Guid(&self.guid))
        } else if !self.url.is_empty() {
            Some(MatchKey::Url(&self.url))
        } else if !self.title.is_empty() {
            self.published_at
                .map(|date| MatchKey::TitleAndDate(&self.title, date))
        } else {
            None
        }
    }

    /// Whether this candidate should overwrite the stored entry.
    pub fn is_newer_than(&self, existing: &Entry) -> bool {
        self.published_at
            .is_some_and(|date| date > existing.published_at)
    }

    fn fields(&self, now: DateTime<Utc>) -> EntryFields {
        EntryFields {
            title: self.title.clone(),
            content: self.content.clone(),
            published_at: self.published_at.unwrap_or(now),
            author: self.author.clone(),
            url: self.url.clone(),
            comments_url: self.comments_url.clone(),
            guid: self.guid.clone(),
        }
    }
}

/// Result of reconciling one feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Newest date among the fetched entries.
    pub latest: Option<DateTime<Utc>>,
    pub created: usize,
    pub updated: usize,
    /// Read entries newly scheduled to expire.
    pub expiring: u64,
    /// Unmatchable entries ignored under the skip policy.
    pub skipped: usize,
}

/// Reconciles fetched entries for one feed.
#[derive(Debug, Clone)]
pub struct Reconciler<'a> {
    sanitizer: &'a Sanitizer,
    policy: UnmatchablePolicy,
    /// Negative disables expiry.
    item_expiry_days: i64,
    now: DateTime<Utc>,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        sanitizer: &'a Sanitizer,
        policy: UnmatchablePolicy,
        item_expiry_days: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            sanitizer,
            policy,
            item_expiry_days,
            now,
        }
    }

    /// Reconcile `raw_entries` into the feed's stored entries.
    ///
    /// Entries are processed in feed order. Under the raise policy, any
    /// unmatchable entry fails the whole call with
    /// [`FeedkeeperError::Reconcile`] after the pass; the caller is expected
    /// to roll back its transaction.
    pub async fn reconcile(
        &self,
        conn: &mut SqliteConnection,
        feed: &Feed,
        raw_entries: &[RawEntry],
        mark_as_read: bool,
    ) -> Result<Reconciliation> {
        let initial_state = if mark_as_read {
            EntryState::Read
        } else {
            EntryState::Unread
        };
        let mut repo = EntryRepository::new(conn);
        let mut outcome = Reconciliation::default();
        let mut found: Vec<i64> = Vec::with_capacity(raw_entries.len());
        let mut unmatchable: Vec<String> = Vec::new();

        for (index, raw) in raw_entries.iter().enumerate() {
            let candidate = EntryCandidate::from_raw(raw, self.sanitizer);

            let Some(key) = candidate.match_key() else {
                match self.policy {
                    UnmatchablePolicy::Raise => unmatchable.push(format!(
                        "cannot import entry {}: no guid, url, or title and date",
                        index + 1
                    )),
                    UnmatchablePolicy::Skip => {
                        trace!("Skipping unmatchable entry {} of feed {}", index + 1, feed.id);
                        outcome.skipped += 1;
                    }
                }
                continue;
            };

            let existing = match key {
                MatchKey::Guid(guid) => repo.find_by_guid(feed.id, guid).await?,
                MatchKey::Url(url) => repo.find_by_url(feed.id, url).await?,
                MatchKey::TitleAndDate(title, date) => {
                    repo.find_by_title_and_date(feed.id, title, &date).await?
                }
            };

            let id = match existing {
                None => {
                    outcome.created += 1;
                    repo.insert(feed.id, &candidate.fields(self.now), initial_state)
                        .await?
                }
                Some(existing) => {
                    if candidate.is_newer_than(&existing) {
                        repo.update_fields(existing.id, &candidate.fields(self.now))
                            .await?;
                        outcome.updated += 1;
                    }
                    existing.id
                }
            };
            found.push(id);

            if let Some(date) = candidate.published_at {
                if outcome.latest.map_or(true, |latest| date > latest) {
                    outcome.latest = Some(date);
                }
            }
        }

        if !unmatchable.is_empty() {
            return Err(FeedkeeperError::Reconcile(unmatchable.join("; ")));
        }

        if self.item_expiry_days >= 0 {
            let expires_at = self.now + Duration::days(self.item_expiry_days);
            outcome.expiring = repo.schedule_expiry(feed.id, &found, expires_at).await?;
        }

        debug!(
            "Reconciled feed {}: {} new, {} updated, {} expiring",
            feed.id, outcome.created, outcome.updated, outcome.expiring
        );
        Ok(outcome)
    }
}
