//! Discovery by probing synthesized monthly archive names

use super::{month_floor, ArchiveDescriptor, ArchiveNaming, DiscoveryStrategy};
use crate::error::Result;
use crate::framework::{HttpClient, RateLimiter};
use async_trait::async_trait;
use chrono::{Months, NaiveDate, Utc};
use futures::{stream, StreamExt};
use std::sync::Arc;
use tracing::debug;

/// Naming template of the monthly syndication archives
pub const DEFAULT_TEMPLATE: &str = "licitacionesPerfilesContratanteCompleto3_{yyyymm}.zip";

const PROBE_CONCURRENCY: usize = 4;

/// HEAD-probes one candidate archive per month, newest first
///
/// Candidates older than the month containing `since` are never probed.
/// Every HEAD request waits on the shared limiter first.
pub struct PatternProbeStrategy {
    http: Arc<HttpClient>,
    naming: Arc<ArchiveNaming>,
    limiter: Arc<RateLimiter>,
    months_to_check: u32,
    template: String,
    today: Option<NaiveDate>,
}

impl PatternProbeStrategy {
    pub fn new(
        http: Arc<HttpClient>,
        naming: Arc<ArchiveNaming>,
        limiter: Arc<RateLimiter>,
        months_to_check: u32,
    ) -> Self {
        Self {
            http,
            naming,
            limiter,
            months_to_check,
            template: DEFAULT_TEMPLATE.to_string(),
            today: None,
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Months to probe, newest first, stopping before `since`
    pub fn candidate_months(&self, since: Option<NaiveDate>) -> Vec<NaiveDate> {
        let current = month_floor(self.today.unwrap_or_else(|| Utc::now().date_naive()));
        let floor = since.map(month_floor);

        (0..self.months_to_check)
            .map_while(|offset| current.checked_sub_months(Months::new(offset)))
            .take_while(|month| floor.is_none_or(|floor| *month >= floor))
            .collect()
    }

    pub fn filename_for(&self, month: NaiveDate) -> String {
        self.template
            .replace("{yyyymm}", &month.format("%Y%m").to_string())
    }
}

#[async_trait]
impl DiscoveryStrategy for PatternProbeStrategy {
    fn name(&self) -> &'static str {
        "pattern-probe"
    }

    async fn discover(
        &self,
        base_url: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<ArchiveDescriptor>> {
        let base = base_url.trim_end_matches('/');
        let candidates: Vec<(String, String)> = self
            .candidate_months(since)
            .into_iter()
            .map(|month| {
                let filename = self.filename_for(month);
                let url = format!("{}/{}", base, filename);
                (filename, url)
            })
            .collect();

        debug!(candidates = candidates.len(), url = %base, "Probing monthly archives");

        let http = &self.http;
        let limiter = &self.limiter;
        let mut found: Vec<ArchiveDescriptor> = stream::iter(candidates)
            .map(|(filename, url)| async move {
                limiter.acquire().await;
                let exists = http.exists(&url).await;
                debug!(archive = %filename, exists, "Probed archive");
                exists.then(|| (filename, url))
            })
            .buffered(PROBE_CONCURRENCY)
            .filter_map(|hit| async move { hit })
            .map(|(filename, url)| self.naming.describe(filename, url))
            .collect()
            .await;

        found.sort();
        Ok(found)
    }
}
