//! Archive discovery
//!
//! Enumerates the syndication archives published for a source and returns
//! them oldest first. Two strategies exist, picked from the shape of the base
//! URL:
//!
//! - [`PatternProbeStrategy`] for syndication folders without an index: it
//!   synthesizes monthly file names and keeps those answering a HEAD probe.
//! - [`ListingStrategy`] for browsable open-data indexes: it scrapes the
//!   archive links from the HTML page.
//!
//! Chronological order is what lets incremental runs resume: a run started
//! with `since` only sees archives from that month onwards.

pub mod listing;
pub mod probe;

pub use listing::ListingStrategy;
pub use probe::PatternProbeStrategy;

use crate::error::{IngestError, Result};
use crate::framework::{HttpClient, ItemId, RateLimiter};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// One archive file published by a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveDescriptor {
    pub filename: String,
    pub url: String,
    /// Period covered by the archive, when the file name encodes it
    pub date: Option<NaiveDate>,
    /// Syndication group, e.g. "3" for `...Completo3_202501.zip`
    pub group_id: Option<String>,
}

impl PartialOrd for ArchiveDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Dated archives first by date, undated ones after them by file name
impl Ord for ArchiveDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_date = match (self.date, other.date) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };

        by_date
            .then_with(|| self.filename.cmp(&other.filename))
            .then_with(|| self.url.cmp(&other.url))
    }
}

impl ItemId for ArchiveDescriptor {
    fn item_id(&self) -> String {
        self.filename.clone()
    }
}

/// File-name rules shared by the discovery strategies
#[derive(Debug, Clone)]
pub struct ArchiveNaming {
    year_month: Regex,
    year_only: Regex,
    group: Regex,
}

impl ArchiveNaming {
    pub fn new() -> Result<Self> {
        Ok(Self {
            year_month: Regex::new(r"(\d{4})(\d{2})")?,
            year_only: Regex::new(r"(?i)_(\d{4})\.zip$")?,
            group: Regex::new(r"Completo(\d+)")?,
        })
    }

    /// `YYYYMM` anywhere in the name maps to the first of that month; a bare
    /// `_YYYY.zip` suffix maps to January 1st.
    pub fn archive_date(&self, filename: &str) -> Option<NaiveDate> {
        let monthly = self.year_month.captures_iter(filename).find_map(|caps| {
            let year: i32 = caps[1].parse().ok()?;
            let month: u32 = caps[2].parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, 1)
        });

        monthly.or_else(|| {
            let caps = self.year_only.captures(filename)?;
            let year: i32 = caps[1].parse().ok()?;
            NaiveDate::from_ymd_opt(year, 1, 1)
        })
    }

    pub fn group_id(&self, filename: &str) -> Option<String> {
        self.group
            .captures(filename)
            .map(|caps| caps[1].to_string())
    }

    pub fn describe(&self, filename: impl Into<String>, url: impl Into<String>) -> ArchiveDescriptor {
        let filename = filename.into();
        ArchiveDescriptor {
            date: self.archive_date(&filename),
            group_id: self.group_id(&filename),
            url: url.into(),
            filename,
        }
    }
}

/// A way of enumerating archives under a base URL
#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Archives available under `base_url`, optionally only from `since` on
    async fn discover(
        &self,
        base_url: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<ArchiveDescriptor>>;
}

/// First day of the month containing `date`
pub fn month_floor(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Keep archives covering `since` or later
///
/// The cutoff is month-granular: archives are dated to the first day of their
/// period, so the comparison is made against the first day of the month
/// containing `since`. An archive dated earlier in that same month is kept,
/// since it may still hold entries updated after `since`. Undated archives
/// cannot be placed after `since` and are dropped when a cutoff is given.
pub fn retain_since(archives: &mut Vec<ArchiveDescriptor>, since: Option<NaiveDate>) {
    if let Some(since) = since {
        let floor = month_floor(since);
        archives.retain(|a| a.date.is_some_and(|d| d >= floor));
    }
}

pub fn distinct_group_ids(archives: &[ArchiveDescriptor]) -> BTreeSet<String> {
    archives
        .iter()
        .filter_map(|a| a.group_id.clone())
        .collect()
}

/// Result of a discovery run
#[derive(Debug, Clone, Default)]
pub struct Discovered {
    /// Archives, oldest first
    pub archives: Vec<ArchiveDescriptor>,
    /// More than one syndication group was found
    pub mixed_groups: bool,
}

/// Picks a strategy for a base URL and enforces the ordering invariant
pub struct ArchiveDiscovery {
    http: Arc<HttpClient>,
    naming: Arc<ArchiveNaming>,
    limiter: Arc<RateLimiter>,
    months_to_check: u32,
    today: Option<NaiveDate>,
}

impl ArchiveDiscovery {
    /// Probing requests are paced by `limiter`
    pub fn new(
        http: Arc<HttpClient>,
        limiter: Arc<RateLimiter>,
        months_to_check: u32,
    ) -> Result<Self> {
        Ok(Self {
            http,
            naming: Arc::new(ArchiveNaming::new()?),
            limiter,
            months_to_check,
            today: None,
        })
    }

    /// Pin the reference date used by the probing strategy
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Choose the strategy matching the URL shape
    ///
    /// An unrecognised URL is a configuration error and aborts the run.
    pub fn strategy_for(&self, base_url: &str) -> Result<Box<dyn DiscoveryStrategy>> {
        let lowered = base_url.to_lowercase();

        if lowered.contains("sindicacion") {
            let mut strategy = PatternProbeStrategy::new(
                Arc::clone(&self.http),
                Arc::clone(&self.naming),
                Arc::clone(&self.limiter),
                self.months_to_check,
            );
            if let Some(today) = self.today {
                strategy = strategy.with_today(today);
            }
            return Ok(Box::new(strategy));
        }

        if lowered.contains("datosabiertos")
            || lowered.ends_with(".html")
            || lowered.ends_with(".htm")
        {
            return Ok(Box::new(ListingStrategy::new(
                Arc::clone(&self.http),
                Arc::clone(&self.naming),
            )));
        }

        Err(IngestError::NoDiscoveryStrategy(base_url.to_string()))
    }

    /// Discover archives under `base_url`, oldest first
    pub async fn discover(&self, base_url: &str, since: Option<NaiveDate>) -> Result<Discovered> {
        let strategy = self.strategy_for(base_url)?;
        info!(
            url = %base_url,
            strategy = strategy.name(),
            since = ?since,
            "Discovering archives"
        );

        let mut archives = strategy.discover(base_url, since).await?;
        retain_since(&mut archives, since);
        archives.sort();
        archives.dedup_by(|a, b| a.url == b.url);

        let groups = distinct_group_ids(&archives);
        let mixed_groups = groups.len() > 1;
        if mixed_groups {
            warn!(
                groups = ?groups,
                "Archives from several syndication groups discovered; chains may not connect"
            );
        }

        info!(
            count = archives.len(),
            oldest = ?archives.first().and_then(|a| a.date),
            newest = ?archives.last().and_then(|a| a.date),
            "Discovered {} archives",
            archives.len()
        );

        Ok(Discovered {
            archives,
            mixed_groups,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::HttpSettings;

    fn naming() -> ArchiveNaming {
        ArchiveNaming::new().unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_archive_date_rules() {
        let n = naming();
        assert_eq!(
            n.archive_date("licitacionesPerfilesContratanteCompleto3_202503.zip"),
            Some(date(2025, 3, 1))
        );
        assert_eq!(n.archive_date("PLACSP_2019.zip"), Some(date(2019, 1, 1)));
        assert_eq!(n.archive_date("PLACSP_2019.ZIP"), Some(date(2019, 1, 1)));
        // 201913 is not a month; the yearly suffix still applies
        assert_eq!(n.archive_date("PLACSP_201913_2019.zip"), Some(date(2019, 1, 1)));
        assert_eq!(n.archive_date("PLACSP_latest.zip"), None);
    }

    #[test]
    fn test_group_id() {
        let n = naming();
        assert_eq!(
            n.group_id("licitacionesPerfilesContratanteCompleto3_202503.zip"),
            Some("3".to_string())
        );
        assert_eq!(n.group_id("PLACSP_2019.zip"), None);
    }

    #[test]
    fn test_ordering_puts_undated_last() {
        let n = naming();
        let mut archives = vec![
            n.describe("PLACSP_latest.zip", "u1"),
            n.describe("Completo3_202502.zip", "u2"),
            n.describe("PLACSP_2019.zip", "u3"),
            n.describe("Completo3_202411.zip", "u4"),
            n.describe("PLACSP_archive.zip", "u5"),
        ];
        archives.sort();

        let names: Vec<_> = archives.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "PLACSP_2019.zip",
                "Completo3_202411.zip",
                "Completo3_202502.zip",
                "PLACSP_archive.zip",
                "PLACSP_latest.zip",
            ]
        );
    }

    #[test]
    fn test_retain_since_uses_month_granularity() {
        let n = naming();
        let mut archives = vec![
            n.describe("Completo3_202409.zip", "a"),
            n.describe("Completo3_202410.zip", "b"),
            n.describe("Completo3_202411.zip", "c"),
            n.describe("PLACSP_latest.zip", "d"),
        ];
        retain_since(&mut archives, Some(date(2024, 10, 17)));

        let names: Vec<_> = archives.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["Completo3_202410.zip", "Completo3_202411.zip"]);

        let mut untouched = vec![n.describe("PLACSP_latest.zip", "d")];
        retain_since(&mut untouched, None);
        assert_eq!(untouched.len(), 1);
    }

    #[test]
    fn test_retain_since_keeps_archive_dated_earlier_in_same_month() {
        let n = naming();
        let mut archives = vec![
            n.describe("Completo3_202410.zip", "a"),
            n.describe("PLACSP_2024.zip", "b"),
        ];
        assert_eq!(archives[0].date, Some(date(2024, 10, 1)));

        // dated the 1st, still kept for a cutoff on the 31st of the same month
        retain_since(&mut archives, Some(date(2024, 10, 31)));
        let names: Vec<_> = archives.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["Completo3_202410.zip"]);

        // a yearly archive is dated January and only survives a January cutoff
        let mut yearly = vec![n.describe("PLACSP_2024.zip", "b")];
        retain_since(&mut yearly, Some(date(2024, 1, 20)));
        assert_eq!(yearly.len(), 1);
    }

    #[test]
    fn test_unknown_url_shape_is_fatal() {
        let http = Arc::new(HttpClient::new(HttpSettings::default()).unwrap());
        let limiter = Arc::new(RateLimiter::new(0.0));
        let discovery = ArchiveDiscovery::new(http, limiter, 24).unwrap();

        assert_eq!(
            discovery
                .strategy_for("https://contrataciondelestado.es/sindicacion/sindicacion_643/")
                .unwrap()
                .name(),
            "pattern-probe"
        );
        assert_eq!(
            discovery
                .strategy_for("https://contrataciondelestado.es/datosabiertos/")
                .unwrap()
                .name(),
            "listing"
        );

        let err = discovery
            .strategy_for("https://example.org/feeds")
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_distinct_groups() {
        let n = naming();
        let archives = vec![
            n.describe("Completo3_202410.zip", "a"),
            n.describe("Completo3_202411.zip", "b"),
            n.describe("Completo1_202411.zip", "c"),
        ];
        assert_eq!(distinct_group_ids(&archives).len(), 2);
    }
}
