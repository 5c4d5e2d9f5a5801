//! National procurement platform: monthly syndication archives
//!
//! Archives are discovered on the syndication server (falling back to the
//! open-data listing), downloaded by the outer worker pool, and the chain of
//! feed documents inside each one is walked newest to oldest. Entries are
//! handed on in archive order, oldest archive first.

use super::{Fetched, RawItem, Source};
use crate::archive::{ArchiveFetcher, FeedArchive};
use crate::config::{IngestConfig, PoolSettings};
use crate::discovery::{ArchiveDescriptor, ArchiveDiscovery, Discovered};
use crate::error::{IngestError, Result};
use crate::extract::FieldExtractor;
use crate::feed::chain::resolve_link;
use crate::feed::{parse_feed, ChainFollower, FeedEntry, FeedEnvelope};
use crate::framework::{ConcurrentProcessor, HttpClient, RateLimiter};
use crate::normalize::SourceRecord;
use async_trait::async_trait;
use chrono::NaiveDate;
use licita_common::ContractStatus;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const NAME: &str = "placsp";
pub const PLATFORM: &str = "PLACSP";

/// Feed documents read from one archive, oldest first
#[derive(Debug)]
struct ArchiveFeeds {
    descriptor: ArchiveDescriptor,
    feeds: Vec<FeedEnvelope>,
}

/// Result of walking the chain inside a container
#[derive(Debug)]
pub struct ArchiveWalk {
    /// Documents, oldest first
    pub feeds: Vec<FeedEnvelope>,
    /// Previous-archive link pointing outside the container
    pub exit_link: Option<String>,
}

impl ArchiveWalk {
    pub fn entries(self) -> Vec<FeedEntry> {
        self.feeds.into_iter().flat_map(|feed| feed.entries).collect()
    }
}

/// Walk previous-archive links between documents of the same container
///
/// Starts at `base`; a link to a document that is not in the container ends
/// the walk and is reported as the exit link. A broken base document fails
/// the archive, a broken older document only ends the walk.
pub fn walk_archive(archive: &FeedArchive, base: &str) -> Result<ArchiveWalk> {
    let names: HashSet<String> = archive.feed_names()?.into_iter().collect();
    let mut feeds = Vec::new();
    let mut seen = HashSet::new();
    let mut current = Some(base.to_string());
    let mut exit_link = None;

    while let Some(name) = current.take() {
        if !seen.insert(name.clone()) {
            warn!(archive = %archive.name(), feed = %name, "Cycle inside archive");
            break;
        }

        let envelope = match archive
            .read_feed(&name)
            .and_then(|bytes| parse_feed(&bytes, Some(archive.name())))
        {
            Ok(envelope) => envelope,
            Err(e) if feeds.is_empty() => return Err(e),
            Err(e) => {
                warn!(archive = %archive.name(), feed = %name, error = %e, "Stopping walk at unreadable feed");
                break;
            },
        };

        if let Some(link) = envelope.next_archive_link.as_deref() {
            let file = link_file_name(link);
            if names.contains(file) {
                current = Some(file.to_string());
            } else {
                exit_link = Some(link.to_string());
            }
        }
        feeds.push(envelope);
    }

    feeds.reverse();
    debug!(
        archive = %archive.name(),
        documents = feeds.len(),
        exit = ?exit_link,
        "Walked archive"
    );
    Ok(ArchiveWalk { feeds, exit_link })
}

fn link_file_name(link: &str) -> &str {
    let path = link.split(['?', '#']).next().unwrap_or(link);
    path.rsplit('/').next().unwrap_or(path)
}

pub struct PlacspSource {
    discovery: ArchiveDiscovery,
    limiter: Arc<RateLimiter>,
    fetcher: ArchiveFetcher,
    chain: ChainFollower,
    extractor: FieldExtractor,
    archive_pool: PoolSettings,
    syndication_url: String,
    listing_url: String,
    chain_max_iterations: usize,
}

impl PlacspSource {
    /// Discovery, archive downloads and chain walks share one rate limiter
    pub fn new(config: &IngestConfig, http: Arc<HttpClient>) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::new(config.archive_pool.requests_per_second));
        Self::with_limiter(config, http, limiter)
    }

    pub fn with_limiter(
        config: &IngestConfig,
        http: Arc<HttpClient>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        Ok(Self {
            discovery: ArchiveDiscovery::new(
                Arc::clone(&http),
                Arc::clone(&limiter),
                config.months_to_check,
            )?,
            fetcher: ArchiveFetcher::new(Arc::clone(&http)),
            chain: ChainFollower::new(http, Arc::clone(&limiter)),
            limiter,
            extractor: FieldExtractor::new(),
            archive_pool: config.archive_pool,
            syndication_url: config.syndication_url.clone(),
            listing_url: config.listing_url.clone(),
            chain_max_iterations: config.chain_max_iterations,
        })
    }

    /// Pin the date discovery counts months back from
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.discovery = self.discovery.with_today(today);
        self
    }

    /// Discover archives on the syndication server, then on the listing
    ///
    /// The listing is only consulted when the syndication server yields
    /// nothing. A URL with no matching strategy is fatal.
    pub async fn discover(&self, since: Option<NaiveDate>) -> Result<Discovered> {
        match self.discovery.discover(&self.syndication_url, since).await {
            Ok(found) if !found.archives.is_empty() => return Ok(found),
            Ok(_) => info!(
                url = %self.syndication_url,
                fallback = %self.listing_url,
                "No archives on syndication server, trying listing"
            ),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(
                url = %self.syndication_url,
                error = %e,
                "Syndication discovery failed, trying listing"
            ),
        }
        self.discovery.discover(&self.listing_url, since).await
    }

    async fn process_archive(&self, descriptor: ArchiveDescriptor) -> Result<ArchiveFeeds> {
        let fetched = self.fetcher.fetch_and_locate_base_feed(&descriptor).await?;
        let Some(base) = fetched.base_feed.as_deref() else {
            return Ok(ArchiveFeeds {
                descriptor,
                feeds: Vec::new(),
            });
        };

        let walk = walk_archive(&fetched.archive, base)?;
        let mut feeds = walk.feeds;

        // Dated archives are ordered by discovery; only an undated entry
        // point continues its chain over the network.
        match walk.exit_link {
            Some(link) if descriptor.date.is_none() && feeds.len() < self.chain_max_iterations => {
                let start = match resolve_link(&descriptor.url, &link) {
                    Ok(start) => start,
                    Err(e) => {
                        warn!(archive = %descriptor.filename, link = %link, error = %e, "Unresolvable previous-archive link");
                        return Ok(ArchiveFeeds { descriptor, feeds });
                    },
                };
                let remaining = self.chain_max_iterations - feeds.len();
                let chain = self.chain.follow_chain(&start, remaining).await;
                info!(
                    archive = %descriptor.filename,
                    documents = chain.feeds.len(),
                    end = ?chain.end,
                    "Followed remote chain"
                );
                let mut older = chain.feeds;
                older.append(&mut feeds);
                feeds = older;
            },
            Some(link) => {
                debug!(archive = %descriptor.filename, link = %link, "Chain continues in an earlier archive")
            },
            None => {},
        }

        Ok(ArchiveFeeds { descriptor, feeds })
    }
}

#[async_trait]
impl Source for PlacspSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn default_status(&self) -> ContractStatus {
        ContractStatus::Published
    }

    async fn fetch(&self, since: NaiveDate) -> Result<Fetched> {
        let discovered = self.discover(Some(since)).await?;
        let processor = ConcurrentProcessor::with_limiter(
            "archives",
            self.archive_pool.workers,
            Arc::clone(&self.limiter),
        );

        let (mut per_archive, stats) = processor
            .process_all(discovered.archives, |descriptor| self.process_archive(descriptor))
            .await;

        // The pool completes out of order; restore chronological order
        per_archive.sort_by(|a, b| a.descriptor.cmp(&b.descriptor));

        let items: Vec<RawItem> = per_archive
            .into_iter()
            .flat_map(|archive| archive.feeds)
            .flat_map(|feed| feed.entries)
            .map(RawItem::Entry)
            .collect();

        info!(
            source = NAME,
            archives = stats.total_items,
            failed = stats.failed,
            entries = items.len(),
            "Fetched archives"
        );

        Ok(Fetched {
            items,
            stats,
            mixed_groups: discovered.mixed_groups,
        })
    }

    fn parse(&self, item: &RawItem) -> Result<Option<SourceRecord>> {
        match item {
            RawItem::Entry(entry) => Ok(self.extractor.extract(entry)?.map(SourceRecord::Licitacion)),
            RawItem::Bulletin(item) => Err(IngestError::Parse(format!(
                "{} cannot parse bulletin item {}",
                NAME, item.identifier
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    fn feed(id: &str, previous: Option<&str>, entry: &str) -> String {
        let link = previous
            .map(|p| format!(r#"<link rel="previous-archive" href="{}"/>"#, p))
            .unwrap_or_default();
        format!(
            r#"<feed xmlns="http://www.w3.org/2005/Atom"><id>{id}</id>{link}
<entry><id>{entry}</id><title>{entry}</title></entry></feed>"#
        )
    }

    fn zip_of(files: &[(&str, String)]) -> FeedArchive {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in files {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        FeedArchive::open("a_202503.zip", writer.finish().unwrap().into_inner()).unwrap()
    }

    #[test]
    fn test_walk_inside_archive_is_oldest_first() {
        let archive = zip_of(&[
            ("c.atom", feed("c", Some("https://host/sind/c_20250302.atom"), "newest")),
            ("c_20250302.atom", feed("b", Some("c_20250301.atom"), "middle")),
            ("c_20250301.atom", feed("a", Some("https://host/sind/c_20250201.atom"), "oldest")),
        ]);

        let walk = walk_archive(&archive, "c.atom").unwrap();
        assert_eq!(walk.exit_link.as_deref(), Some("https://host/sind/c_20250201.atom"));
        let ids: Vec<_> = walk.entries().into_iter().map(|e| e.entry_id).collect();
        assert_eq!(ids, vec!["oldest", "middle", "newest"]);
    }

    #[test]
    fn test_walk_stops_on_cycle_and_bad_older_feed() {
        let archive = zip_of(&[
            ("c.atom", feed("c", Some("c_1.atom"), "one")),
            ("c_1.atom", feed("b", Some("c.atom"), "two")),
        ]);
        let walk = walk_archive(&archive, "c.atom").unwrap();
        assert_eq!(walk.feeds.len(), 2);
        assert_eq!(walk.exit_link, None);

        let archive = zip_of(&[
            ("c.atom", feed("c", Some("c_1.atom"), "one")),
            ("c_1.atom", "<feed".to_string()),
        ]);
        let walk = walk_archive(&archive, "c.atom").unwrap();
        assert_eq!(walk.feeds.len(), 1);
    }

    #[test]
    fn test_broken_base_feed_fails_archive() {
        let archive = zip_of(&[("c.atom", "not xml at all <".to_string())]);
        assert!(walk_archive(&archive, "c.atom").is_err());
    }

    #[test]
    fn test_link_file_name() {
        assert_eq!(link_file_name("https://h/x/y_1.atom?x=1"), "y_1.atom");
        assert_eq!(link_file_name("y_1.atom"), "y_1.atom");
    }
}
