//! Configuration module for feedkeeper.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::feed::UnmatchablePolicy;
use crate::{FeedkeeperError, Result};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/feedkeeper.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/feedkeeper.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Feed polling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// How often the `watch` runner starts a batch, in seconds.
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,
    /// Check frequency for feeds without their own, in minutes.
    #[serde(default = "default_frequency")]
    pub default_frequency_minutes: i64,
    /// Feeds whose next check falls within this many minutes are due now.
    #[serde(default)]
    pub due_window_minutes: i64,
    /// Days to keep a read entry that left its feed (0 = next sweep, -1 = never).
    #[serde(default = "default_item_expiry_days")]
    pub item_expiry_days: i64,
    /// Total timeout for one feed request, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Connection timeout, in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Maximum feed body size in bytes.
    #[serde(default = "default_max_feed_size")]
    pub max_feed_size_bytes: u64,
    /// Maximum number of redirects followed for one feed.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Number of feeds checked concurrently within a batch.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    /// What to do with entries that have no guid, url, or title and date.
    #[serde(default)]
    pub unmatchable_entries: UnmatchablePolicy,
    /// User agent sent with feed requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Refuse feed URLs that point at loopback or private networks.
    #[serde(default = "default_block_private_hosts")]
    pub block_private_hosts: bool,
}

fn default_update_interval() -> u64 {
    300 // 5 minutes
}

fn default_frequency() -> i64 {
    24 * 60
}

fn default_item_expiry_days() -> i64 {
    1
}

fn default_request_timeout() -> u64 {
    15
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_feed_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_max_redirects() -> usize {
    5
}

fn default_max_concurrent_fetches() -> usize {
    4
}

fn default_user_agent() -> String {
    concat!("feedkeeper/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_block_private_hosts() -> bool {
    true
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: default_update_interval(),
            default_frequency_minutes: default_frequency(),
            due_window_minutes: 0,
            item_expiry_days: default_item_expiry_days(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_feed_size_bytes: default_max_feed_size(),
            max_redirects: default_max_redirects(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            unmatchable_entries: UnmatchablePolicy::default(),
            user_agent: default_user_agent(),
            block_private_hosts: default_block_private_hosts(),
        }
    }
}

/// HTML allow-lists applied to entry content.
#[derive(Debug, Clone, Deserialize)]
pub struct SanitizerConfig {
    /// Tags kept in entry content.
    #[serde(default = "default_allowed_tags")]
    pub allowed_tags: Vec<String>,
    /// Attributes kept per tag; the `*` key applies to every tag.
    #[serde(default = "default_allowed_attributes")]
    pub allowed_attributes: BTreeMap<String, Vec<String>>,
    /// CSS properties kept in `style` attributes.
    #[serde(default = "default_allowed_styles")]
    pub allowed_styles: Vec<String>,
    /// URL schemes allowed in `href` and `src`.
    #[serde(default = "default_allowed_protocols")]
    pub allowed_protocols: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_allowed_tags() -> Vec<String> {
    strings(&[
        "a", "abbr", "acronym", "aside", "b", "bdi", "bdo", "blockquote", "br", "code", "data",
        "dd", "del", "dfn", "div", "dl", "dt", "em", "h1", "h2", "h3", "h4", "h5", "h6", "hr", "i",
        "img", "ins", "kbd", "li", "ol", "p", "pre", "q", "s", "samp", "small", "span", "strike",
        "strong", "sub", "sup", "table", "tbody", "td", "tfoot", "th", "thead", "tr", "time", "tt",
        "u", "var", "wbr", "ul",
    ])
}

fn default_allowed_attributes() -> BTreeMap<String, Vec<String>> {
    let cells = &["align", "valign", "width", "colspan", "rowspan"];
    BTreeMap::from([
        ("*".to_string(), strings(&["lang", "dir"])),
        ("a".to_string(), strings(&["href", "title"])),
        ("abbr".to_string(), strings(&["title"])),
        ("acronym".to_string(), strings(&["title"])),
        ("data".to_string(), strings(&["value"])),
        ("dfn".to_string(), strings(&["title"])),
        (
            "img".to_string(),
            strings(&["src", "alt", "width", "height", "title"]),
        ),
        ("li".to_string(), strings(&["value"])),
        ("ol".to_string(), strings(&["reversed", "start", "type"])),
        ("td".to_string(), strings(cells)),
        ("th".to_string(), strings(cells)),
        ("time".to_string(), strings(&["datetime"])),
    ])
}

fn default_allowed_styles() -> Vec<String> {
    strings(&[
        "background-color", "border", "border-bottom", "border-collapse", "border-color",
        "border-left", "border-right", "border-style", "border-top", "border-width", "clear",
        "color", "float", "font", "font-family", "font-size", "font-style", "font-weight",
        "height", "letter-spacing", "line-height", "margin", "margin-bottom", "margin-left",
        "margin-right", "margin-top", "overflow", "padding", "padding-bottom", "padding-left",
        "padding-right", "padding-top", "text-align", "text-decoration", "text-indent",
        "vertical-align", "white-space", "width",
    ])
}

fn default_allowed_protocols() -> Vec<String> {
    strings(&["http", "https", "mailto"])
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            allowed_tags: default_allowed_tags(),
            allowed_attributes: default_allowed_attributes(),
            allowed_styles: default_allowed_styles(),
            allowed_protocols: default_allowed_protocols(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Feed polling configuration.
    #[serde(default)]
    pub poll: PollConfig,
    /// Content sanitizer allow-lists.
    #[serde(default)]
    pub sanitizer: SanitizerConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(FeedkeeperError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| FeedkeeperError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FEEDKEEPER_DATABASE`: Override the database path
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("FEEDKEEPER_DATABASE") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Every network call must be bounded, so zero timeouts are rejected.
    pub fn validate(&self) -> Result<()> {
        let poll = &self.poll;
        if poll.request_timeout_secs == 0 || poll.connect_timeout_secs == 0 {
            return Err(FeedkeeperError::Config(
                "poll timeouts must be greater than zero".to_string(),
            ));
        }
        if poll.default_frequency_minutes <= 0 {
            return Err(FeedkeeperError::Config(
                "poll.default_frequency_minutes must be positive".to_string(),
            ));
        }
        if poll.due_window_minutes < 0 {
            return Err(FeedkeeperError::Config(
                "poll.due_window_minutes cannot be negative".to_string(),
            ));
        }
        if poll.max_concurrent_fetches == 0 {
            return Err(FeedkeeperError::Config(
                "poll.max_concurrent_fetches must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
