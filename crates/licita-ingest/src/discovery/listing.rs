//! Discovery by scraping an HTML index page

use super::{retain_since, ArchiveDescriptor, ArchiveNaming, DiscoveryStrategy};
use crate::error::{IngestError, Result};
use crate::framework::HttpClient;
use async_trait::async_trait;
use chrono::NaiveDate;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error};
use url::Url;

/// Name fragments identifying procurement archives in an index page
const ARCHIVE_MARKERS: &[&str] = &["placsp", "licitacionesperfilescontratante"];

/// Reads archive links from a browsable index
pub struct ListingStrategy {
    http: Arc<HttpClient>,
    naming: Arc<ArchiveNaming>,
}

impl ListingStrategy {
    pub fn new(http: Arc<HttpClient>, naming: Arc<ArchiveNaming>) -> Self {
        Self { http, naming }
    }
}

#[async_trait]
impl DiscoveryStrategy for ListingStrategy {
    fn name(&self) -> &'static str {
        "listing"
    }

    async fn discover(
        &self,
        base_url: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<ArchiveDescriptor>> {
        let html = match self.http.get_text(base_url).await {
            Ok(html) => html,
            Err(e) => {
                error!(url = %base_url, error = %e, "Failed to fetch archive index");
                return Ok(Vec::new());
            },
        };

        let mut archives: Vec<ArchiveDescriptor> = archive_links(&html, base_url)?
            .into_iter()
            .map(|(filename, url)| self.naming.describe(filename, url))
            .collect();

        retain_since(&mut archives, since);
        archives.sort();
        Ok(archives)
    }
}

/// Archive links of an index page as `(filename, absolute url)` pairs
pub fn archive_links(html: &str, base_url: &str) -> Result<Vec<(String, String)>> {
    let mut base = Url::parse(base_url)?;
    if !base.path().ends_with('/') && !base.path().ends_with(".html") && !base.path().ends_with(".htm") {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]")
        .map_err(|e| IngestError::Parse(format!("Invalid link selector: {}", e)))?;

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        let path_part = href.split(['?', '#']).next().unwrap_or(href);
        let Some(filename) = path_part.rsplit('/').next().filter(|f| !f.is_empty()) else {
            continue;
        };

        let lowered = filename.to_lowercase();
        if !lowered.ends_with(".zip") || !ARCHIVE_MARKERS.iter().any(|m| lowered.contains(m)) {
            continue;
        }

        let absolute = match base.join(href) {
            Ok(url) => url.to_string(),
            Err(e) => {
                debug!(href = %href, error = %e, "Skipping unresolvable link");
                continue;
            },
        };

        if seen.insert(absolute.clone()) {
            links.push((filename.to_string(), absolute));
        }
    }

    debug!(count = links.len(), url = %base_url, "Archive links found in index");
    Ok(links)
}
