//! Feed fetch adapter.
//!
//! Fetches a feed over HTTP and parses it, classifying every failure into a
//! [`FetchOutcome`] instead of an error. Redirects are followed by hand so
//! that permanent moves can be reported back and redirect loops detected.

use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use chrono::SubsecRound;
use feed_rs::model::Link;
use feed_rs::parser;
use reqwest::header::LOCATION;
use reqwest::{redirect, Client, StatusCode};
use tracing::{debug, trace};
use url::Url;

use super::types::{FeedMeta, ParsedFeed, RawEntry};
use crate::config::PollConfig;
use crate::{FeedkeeperError, Result};

/// Classified result of fetching one feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The feed was fetched and parsed and has a title and a link.
    Success(ParsedFeed),
    /// Transient failure. `partial` holds whatever the parser recovered.
    Error {
        message: String,
        partial: Option<ParsedFeed>,
    },
    /// Permanent failure; the feed should be deactivated.
    Inactive { message: String },
}

/// Outcome plus the URL the feed permanently moved to, if it did.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub outcome: FetchOutcome,
    pub moved_to: Option<String>,
}

impl FetchResult {
    pub fn success(feed: ParsedFeed) -> Self {
        FetchOutcome::Success(feed).into()
    }

    pub fn error(message: impl Into<String>) -> Self {
        FetchOutcome::Error {
            message: message.into(),
            partial: None,
        }
        .into()
    }

    pub fn inactive(message: impl Into<String>) -> Self {
        FetchOutcome::Inactive {
            message: message.into(),
        }
        .into()
    }

    pub fn with_moved_to(mut self, moved_to: Option<String>) -> Self {
        self.moved_to = moved_to;
        self
    }
}

impl From<FetchOutcome> for FetchResult {
    fn from(outcome: FetchOutcome) -> Self {
        Self {
            outcome,
            moved_to: None,
        }
    }
}

/// Something that can fetch a feed.
///
/// The timeout is passed on every call; implementations must not wait
/// longer than it.
pub trait FeedFetcher: Send + Sync {
    fn fetch(&self, url: &str, timeout: Duration) -> impl Future<Output = FetchResult> + Send;
}

/// HTTP implementation backed by reqwest and feed-rs.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_feed_size: u64,
    max_redirects: usize,
    block_private_hosts: bool,
}

impl HttpFetcher {
    /// Create a fetcher from the poll configuration.
    pub fn new(config: &PollConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .redirect(redirect::Policy::none())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| FeedkeeperError::Fetch(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_feed_size: config.max_feed_size_bytes,
            max_redirects: config.max_redirects,
            block_private_hosts: config.block_private_hosts,
        })
    }

    async fn fetch_following(&self, url: &str) -> FetchResult {
        let mut current = url.to_string();
        // URLs left behind by permanent redirects.
        let mut history: Vec<String> = Vec::new();
        let mut moved_to: Option<String> = None;
        let mut hops = 0;

        loop {
            if self.block_private_hosts {
                if let Err(e) = check_public_url(&current) {
                    return FetchResult::error(format!("URL error: {e}")).with_moved_to(moved_to);
                }
            }

            trace!("GET {}", current);
            let response = match self.client.get(&current).send().await {
                Ok(response) => response,
                Err(e) => {
                    return FetchResult::error(format!("URL error: {e}")).with_moved_to(moved_to)
                }
            };
            let status = response.status();

            if matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308) {
                let target = match redirect_target(&current, response.headers().get(LOCATION)) {
                    Ok(target) => target,
                    Err(e) => {
                        return FetchResult::error(format!("URL error: {e}"))
                            .with_moved_to(moved_to)
                    }
                };

                if matches!(
                    status,
                    StatusCode::MOVED_PERMANENTLY | StatusCode::PERMANENT_REDIRECT
                ) {
                    history.push(current.clone());
                    if history.contains(&target) {
                        return FetchResult::inactive("Circular redirection found")
                            .with_moved_to(moved_to);
                    }
                    debug!("Feed {} moved permanently to {}", current, target);
                    moved_to = Some(target.clone());
                }

                hops += 1;
                if hops > self.max_redirects {
                    return FetchResult::error("URL error: too many redirects")
                        .with_moved_to(moved_to);
                }
                current = target;
                continue;
            }

            let result = match status.as_u16() {
                200 | 304 => match self.read_body(response).await {
                    Ok(body) => classify_parse(&body),
                    Err(message) => FetchResult::error(message),
                },
                404 | 500 | 502 | 503 | 504 => {
                    FetchResult::error(format!("Temporary error {}", status.as_u16()))
                }
                410 => FetchResult::inactive("Feed has gone"),
                code => FetchResult::error(format!("Unrecognised HTTP status {code}")),
            };
            return result.with_moved_to(moved_to);
        }
    }

    /// Read the body, refusing anything over the size limit.
    async fn read_body(&self, mut response: reqwest::Response) -> std::result::Result<Vec<u8>, String> {
        let too_large = || format!("Feed too large (max {} bytes)", self.max_feed_size);

        if response
            .content_length()
            .is_some_and(|len| len > self.max_feed_size)
        {
            return Err(too_large());
        }

        let mut body = Vec::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    if (body.len() + chunk.len()) as u64 > self.max_feed_size {
                        return Err(too_large());
                    }
                    body.extend_from_slice(&chunk);
                }
                Ok(None) => return Ok(body),
                Err(e) => return Err(format!("URL error: {e}")),
            }
        }
    }
}

impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> FetchResult {
        match tokio::time::timeout(timeout, self.fetch_following(url)).await {
            Ok(result) => result,
            Err(_) => FetchResult::error(format!(
                "URL error: timed out after {}s",
                timeout.as_secs()
            )),
        }
    }
}

/// Resolve a `Location` header against the current URL.
///
/// A missing header means the resource redirected to itself.
fn redirect_target(
    current: &str,
    location: Option<&reqwest::header::HeaderValue>,
) -> std::result::Result<String, String> {
    let Some(location) = location else {
        return Ok(current.to_string());
    };
    let location = location
        .to_str()
        .map_err(|_| "invalid Location header".to_string())?;
    let base = Url::parse(current).map_err(|e| e.to_string())?;
    base.join(location)
        .map(String::from)
        .map_err(|e| format!("invalid redirect target {location}: {e}"))
}

/// Parse a body fetched with an accepted status.
fn classify_parse(body: &[u8]) -> FetchResult {
    match parse_feed(body) {
        Ok(feed) if feed.meta.is_complete() => FetchResult::success(feed),
        Ok(_) => FetchResult::error("Feed parsed but with invalid contents"),
        Err(message) => FetchResult::error(message),
    }
}

/// Parse feed bytes into a [`ParsedFeed`].
///
/// Errors are already formatted as `Feed error: <kind> - <message>`.
pub fn parse_feed(bytes: &[u8]) -> std::result::Result<ParsedFeed, String> {
    // An empty id marks an entry without a guid of its own.
    let parser = parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build();

    let feed = parser.parse(bytes).map_err(|e| {
        let debug = format!("{e:?}");
        let kind = debug.split('(').next().unwrap_or("ParseFeedError").trim();
        format!("Feed error: {kind} - {e}")
    })?;

    let meta = FeedMeta {
        title: feed.title.map(|t| t.content).filter(|t| !t.is_empty()),
        link: site_link(&feed.links),
        updated: feed.updated.map(|d| d.trunc_subsecs(0)),
        published: feed.published.map(|d| d.trunc_subsecs(0)),
    };

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| RawEntry {
            title: entry.title.map(|t| t.content),
            content: entry.content.and_then(|c| c.body),
            description: entry.summary.map(|s| s.content),
            updated: entry.updated.map(|d| d.trunc_subsecs(0)),
            published: entry.published.map(|d| d.trunc_subsecs(0)),
            created: None,
            url: site_link(&entry.links),
            guid: Some(entry.id).filter(|id| !id.is_empty()),
            author: entry.authors.first().map(|a| a.name.clone()),
            comments_url: None,
        })
        .collect();

    Ok(ParsedFeed { meta, entries })
}

/// The `alternate` link, falling back to the first non-self link.
fn site_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .or_else(|| links.iter().find(|l| l.rel.as_deref() != Some("self")))
        .map(|l| l.href.clone())
        .filter(|href| !href.is_empty())
}

/// Parse a feed URL and check its scheme.
pub fn validate_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url)
        .map_err(|e| FeedkeeperError::Validation(format!("invalid URL {url}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(FeedkeeperError::Validation(format!(
                "unsupported URL scheme: {scheme}"
            )))
        }
    }
    if parsed.host().is_none() {
        return Err(FeedkeeperError::Validation("URL has no host".to_string()));
    }
    Ok(parsed)
}

/// Refuse URLs that resolve by name or literal to internal networks.
fn check_public_url(url: &str) -> Result<()> {
    let parsed = validate_url(url)?;
    let rejected = match parsed.host() {
        Some(url::Host::Domain(domain)) => is_internal_hostname(domain),
        Some(url::Host::Ipv4(ip)) => is_private_ip(&IpAddr::V4(ip)),
        Some(url::Host::Ipv6(ip)) => is_private_ip(&IpAddr::V6(ip)),
        None => true,
    };
    if rejected {
        return Err(FeedkeeperError::Validation(format!(
            "refusing to fetch from internal host {}",
            parsed.host_str().unwrap_or_default()
        )));
    }
    Ok(())
}

fn is_internal_hostname(host: &str) -> bool {
    const INTERNAL_SUFFIXES: &[&str] = &[
        ".local",
        ".localhost",
        ".internal",
        ".intranet",
        ".corp",
        ".home",
        ".lan",
    ];
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    host == "localhost" || INTERNAL_SUFFIXES.iter().any(|s| host.ends_with(s))
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.is_documentation()
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local, fe80::/10 link local
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
                || v6.to_ipv4_mapped().is_some_and(|v4| is_private_ip(&IpAddr::V4(v4)))
        }
    }
}
