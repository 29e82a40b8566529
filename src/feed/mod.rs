//! Feed polling and reconciliation.
//!
//! Feeds are fetched on a per-feed schedule, their entries matched against
//! what is already stored, and per-feed unread/total counts kept current.

pub mod counts;
pub mod engine;
pub mod fetcher;
pub mod reconciler;
pub mod repository;
pub mod sanitizer;
pub mod service;
pub mod state;
pub mod types;
pub mod updater;

pub use counts::CountCache;
pub use engine::{CheckOptions, CheckResult, CheckStatus, FeedSelection, PollEngine, PollReport};
pub use fetcher::{parse_feed, validate_url, FeedFetcher, FetchOutcome, FetchResult, HttpFetcher};
pub use reconciler::{EntryCandidate, MatchKey, Reconciler, Reconciliation};
pub use repository::{EntryFields, EntryFilter, EntryRepository, FeedFilter, FeedRepository};
pub use sanitizer::{AllowList, Sanitizer};
pub use service::{FeedImport, FeedService, ImportSummary};
pub use state::StateMutator;
pub use types::{
    Entry, EntryState, Feed, FeedMeta, NewFeed, ParsedFeed, RawEntry, UnmatchablePolicy,
};
pub use updater::FeedUpdater;
