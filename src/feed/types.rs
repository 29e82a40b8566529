//! Feed and entry types for feedkeeper.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Triage state of an entry.
///
/// Stored as an integer: unread = 0, read = 1, saved = 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Unread,
    Read,
    Saved,
}

impl EntryState {
    /// Database representation.
    pub fn as_i64(self) -> i64 {
        match self {
            EntryState::Unread => 0,
            EntryState::Read => 1,
            EntryState::Saved => 2,
        }
    }

    /// Parse the database representation.
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(EntryState::Unread),
            1 => Some(EntryState::Read),
            2 => Some(EntryState::Saved),
            _ => None,
        }
    }

    /// Only read entries may carry a pending expiry.
    pub fn keeps_expiry(self) -> bool {
        self == EntryState::Read
    }
}

/// What to do with a fetched entry that has no guid, no url, and lacks
/// either a title or a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchablePolicy {
    /// Fail the feed's reconciliation for this check.
    #[default]
    Raise,
    /// Ignore the entry.
    Skip,
}

/// A subscribed feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feed {
    pub id: i64,
    pub owner_id: i64,
    /// Title supplied by the feed itself.
    pub title: String,
    /// User override; takes priority over `title` for display.
    pub custom_title: Option<String>,
    pub feed_url: String,
    pub site_url: String,
    pub is_active: bool,
    /// Minutes between checks; `None` uses the configured default.
    pub check_frequency: Option<i64>,
    /// Last time the feed says it changed.
    pub last_updated: Option<DateTime<Utc>>,
    pub last_checked: Option<DateTime<Utc>>,
    pub next_check: Option<DateTime<Utc>>,
    /// Empty when the feed is healthy.
    pub error: String,
    pub unread_count: i64,
    pub total_count: i64,
    pub added_at: DateTime<Utc>,
}

impl Feed {
    /// Title to show to users.
    pub fn display_title(&self) -> &str {
        match self.custom_title.as_deref() {
            Some(custom) if !custom.is_empty() => custom,
            _ => &self.title,
        }
    }

    /// Whether a check should run at `now`.
    ///
    /// A feed is due when it was never scheduled or its next check falls at
    /// or before `now + window`.
    pub fn is_due(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.next_check {
            None => true,
            Some(next) => next <= now + window,
        }
    }

    /// Minutes until the next check after one starts now.
    pub fn frequency_minutes(&self, default_minutes: i64) -> i64 {
        match self.check_frequency {
            Some(minutes) if minutes > 0 => minutes,
            _ => default_minutes,
        }
    }

    /// Record a new error, keeping any error already present.
    pub fn append_error(&mut self, message: &str) {
        if self.error.is_empty() {
            self.error = message.to_string();
        } else {
            self.error = format!("{}; {}", self.error, message);
        }
    }
}

/// New feed for creation.
#[derive(Debug, Clone)]
pub struct NewFeed {
    pub owner_id: i64,
    pub feed_url: String,
    pub title: String,
    pub site_url: String,
    pub check_frequency: Option<i64>,
}

impl NewFeed {
    /// Create a new feed subscription. The title defaults to the URL.
    pub fn new(owner_id: i64, feed_url: impl Into<String>) -> Self {
        let feed_url = feed_url.into();
        Self {
            owner_id,
            title: feed_url.clone(),
            feed_url,
            site_url: String::new(),
            check_frequency: None,
        }
    }

    /// Set the title. An empty title keeps the URL.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        if !title.is_empty() {
            self.title = title;
        }
        self
    }

    /// Set the site URL.
    pub fn with_site_url(mut self, site_url: impl Into<String>) -> Self {
        self.site_url = site_url.into();
        self
    }

    /// Set the check frequency in minutes.
    pub fn with_check_frequency(mut self, minutes: i64) -> Self {
        self.check_frequency = Some(minutes);
        self
    }
}

/// A stored entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    pub id: i64,
    pub feed_id: i64,
    pub state: EntryState,
    pub title: String,
    /// Sanitised HTML.
    pub content: String,
    pub published_at: DateTime<Utc>,
    pub author: String,
    pub url: String,
    pub comments_url: String,
    pub guid: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Feed-level metadata from a parsed document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedMeta {
    pub title: Option<String>,
    /// The feed's `link`, i.e. the site it belongs to.
    pub link: Option<String>,
    pub updated: Option<DateTime<Utc>>,
    pub published: Option<DateTime<Utc>>,
}

impl FeedMeta {
    /// When the feed claims it last changed.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated.or(self.published)
    }

    /// A usable feed has both a title and a link.
    pub fn is_complete(&self) -> bool {
        self.title.is_some() && self.link.is_some()
    }
}

/// One entry as the parser produced it, before normalisation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    pub title: Option<String>,
    pub content: Option<String>,
    pub description: Option<String>,
    pub updated: Option<DateTime<Utc>>,
    pub published: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub url: Option<String>,
    pub guid: Option<String>,
    pub author: Option<String>,
    pub comments_url: Option<String>,
}

impl RawEntry {
    /// Create an empty raw entry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_updated(mut self, updated: DateTime<Utc>) -> Self {
        self.updated = Some(updated);
        self
    }

    pub fn with_published(mut self, published: DateTime<Utc>) -> Self {
        self.published = Some(published);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = Some(guid.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

/// A parsed feed document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    pub meta: FeedMeta,
    pub entries: Vec<RawEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn feed() -> Feed {
        Feed {
            id: 1,
            owner_id: 1,
            title: "Example".to_string(),
            custom_title: None,
            feed_url: "https://example.com/feed".to_string(),
            site_url: String::new(),
            is_active: true,
            check_frequency: None,
            last_updated: None,
            last_checked: None,
            next_check: None,
            error: String::new(),
            unread_count: 0,
            total_count: 0,
            added_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_entry_state_roundtrip() {
        for state in [EntryState::Unread, EntryState::Read, EntryState::Saved] {
            assert_eq!(EntryState::from_i64(state.as_i64()), Some(state));
        }
        assert_eq!(EntryState::from_i64(3), None);
    }

    #[test]
    fn test_only_read_keeps_expiry() {
        assert!(EntryState::Read.keeps_expiry());
        assert!(!EntryState::Unread.keeps_expiry());
        assert!(!EntryState::Saved.keeps_expiry());
    }

    #[test]
    fn test_display_title_prefers_custom() {
        let mut f = feed();
        assert_eq!(f.display_title(), "Example");
        f.custom_title = Some(String::new());
        assert_eq!(f.display_title(), "Example");
        f.custom_title = Some("Mine".to_string());
        assert_eq!(f.display_title(), "Mine");
    }

    #[test]
    fn test_is_due() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut f = feed();
        assert!(f.is_due(now, Duration::zero()));

        f.next_check = Some(now);
        assert!(f.is_due(now, Duration::zero()));

        f.next_check = Some(now + Duration::minutes(30));
        assert!(!f.is_due(now, Duration::zero()));
        assert!(f.is_due(now, Duration::minutes(30)));
        assert!(!f.is_due(now, Duration::minutes(29)));
    }

    #[test]
    fn test_frequency_minutes() {
        let mut f = feed();
        assert_eq!(f.frequency_minutes(1440), 1440);
        f.check_frequency = Some(30);
        assert_eq!(f.frequency_minutes(1440), 30);
        f.check_frequency = Some(0);
        assert_eq!(f.frequency_minutes(1440), 1440);
    }

    #[test]
    fn test_append_error() {
        let mut f = feed();
        f.append_error("Entry error: boom");
        assert_eq!(f.error, "Entry error: boom");

        f.error = "Temporary error 503".to_string();
        f.append_error("Entry error: boom");
        assert_eq!(f.error, "Temporary error 503; Entry error: boom");
    }

    #[test]
    fn test_new_feed_title_defaults_to_url() {
        let f = NewFeed::new(7, "https://example.com/rss").with_title("");
        assert_eq!(f.title, "https://example.com/rss");
        assert_eq!(f.owner_id, 7);

        let f = NewFeed::new(7, "https://example.com/rss")
            .with_title("Example")
            .with_site_url("https://example.com/")
            .with_check_frequency(60);
        assert_eq!(f.title, "Example");
        assert_eq!(f.site_url, "https://example.com/");
        assert_eq!(f.check_frequency, Some(60));
    }

    #[test]
    fn test_feed_meta_updated_at() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let meta = FeedMeta {
            published: Some(t1),
            ..Default::default()
        };
        assert_eq!(meta.updated_at(), Some(t1));

        let meta = FeedMeta {
            updated: Some(t2),
            published: Some(t1),
            ..Default::default()
        };
        assert_eq!(meta.updated_at(), Some(t2));
        assert!(!meta.is_complete());
    }
}
