//! feedkeeper - feed reader back end
//!
//! Polls RSS/Atom feeds on a schedule, reconciles their entries into a
//! SQLite store and tracks per-entry read state.

pub mod config;
pub mod datetime;
pub mod db;
pub mod error;
pub mod feed;
pub mod logging;

pub use config::Config;
pub use datetime::{Clock, FixedClock, SystemClock};
pub use db::Database;
pub use error::{FeedkeeperError, Result};
pub use feed::{
    CheckOptions, Entry, EntryState, Feed, FeedSelection, FeedService, FeedUpdater, HttpFetcher,
    NewFeed, PollEngine, PollReport, StateMutator,
};
