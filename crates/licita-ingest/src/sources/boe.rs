//! Official state bulletin: one JSON summary per publication day

use super::{Fetched, RawItem, Source};
use crate::config::{IngestConfig, PoolSettings};
use crate::error::{IngestError, Result};
use crate::framework::{ConcurrentProcessor, HttpClient};
use crate::normalize::{RawContract, SourceRecord};
use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use licita_common::ContractStatus;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

pub const NAME: &str = "boe";
pub const PLATFORM: &str = "BOE";
const SITE: &str = "https://www.boe.es";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemKind {
    Contract,
    Announcement,
    Regulation,
    Authority,
    Other,
}

impl ItemKind {
    /// Classify an item by the section and subsection it was published in
    pub fn infer(section: &str, subsection: &str) -> Self {
        let section = section.to_lowercase();
        let subsection = subsection.to_lowercase();
        let either = |needles: &[&str]| {
            needles
                .iter()
                .any(|n| section.contains(n) || subsection.contains(n))
        };

        if either(&["contratación", "contratacion"]) {
            ItemKind::Contract
        } else if ["anuncio", "licitación", "licitacion"]
            .iter()
            .any(|n| subsection.contains(n))
        {
            ItemKind::Announcement
        } else if section.contains("disposicion") || subsection.contains("decreto") {
            ItemKind::Regulation
        } else if section.contains("autoridad") {
            ItemKind::Authority
        } else {
            ItemKind::Other
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Contract => "CONTRACT",
            ItemKind::Announcement => "ANNOUNCEMENT",
            ItemKind::Regulation => "REGULATION",
            ItemKind::Authority => "AUTHORITY",
            ItemKind::Other => "OTHER",
        }
    }
}

/// One publication of a daily bulletin
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulletinItem {
    pub identifier: String,
    pub title: String,
    pub department: String,
    pub section: String,
    pub subsection: String,
    pub url: String,
    pub kind: ItemKind,
    pub date: NaiveDate,
}

/// Levels of the summary hold either a single object or an array of them
fn one_or_many(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(item @ Value::Object(_)) => vec![item],
        _ => Vec::new(),
    }
}

fn text<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).map(str::trim).unwrap_or_default()
}

fn absolute_url(item: &Value) -> String {
    let raw = match item.get("url_html") {
        Some(Value::String(url)) => url.trim(),
        Some(object @ Value::Object(_)) => text(object, "texto"),
        _ => "",
    };
    if raw.is_empty() || raw.starts_with("http") {
        raw.to_string()
    } else {
        format!("{}{}", SITE, raw)
    }
}

/// Flatten `data.sumario.diario[].seccion[].departamento[].epigrafe[].item[]`
///
/// Items without an identifier or title are skipped.
pub fn parse_summary(document: &Value, date: NaiveDate) -> Vec<BulletinItem> {
    let Some(sumario) = document.get("data").and_then(|d| d.get("sumario")) else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for diario in one_or_many(sumario.get("diario")) {
        for section in one_or_many(diario.get("seccion")) {
            let section_name = text(section, "nombre");
            for department in one_or_many(section.get("departamento")) {
                let department_name = text(department, "nombre");
                for epigrafe in one_or_many(department.get("epigrafe")) {
                    let subsection = text(epigrafe, "nombre");
                    for item in one_or_many(epigrafe.get("item")) {
                        let identifier = text(item, "identificador");
                        let title = text(item, "titulo");
                        if identifier.is_empty() || title.is_empty() {
                            debug!(section = %section_name, "Skipping bulletin item without id or title");
                            continue;
                        }
                        items.push(BulletinItem {
                            identifier: identifier.to_string(),
                            title: title.to_string(),
                            department: department_name.to_string(),
                            section: section_name.to_string(),
                            subsection: subsection.to_string(),
                            url: absolute_url(item),
                            kind: ItemKind::infer(section_name, subsection),
                            date,
                        });
                    }
                }
            }
        }
    }
    items
}

pub struct BoeSource {
    http: Arc<HttpClient>,
    base_url: String,
    pool: PoolSettings,
    max_days: u32,
    today: Option<NaiveDate>,
}

impl BoeSource {
    pub fn new(config: &IngestConfig, http: Arc<HttpClient>) -> Self {
        Self {
            http,
            base_url: config.bulletin_url.trim_end_matches('/').to_string(),
            pool: config.archive_pool,
            max_days: config.bulletin_max_days,
            today: None,
        }
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Publication days to request, oldest first, at most `max_days` of them
    pub fn days_since(&self, since: NaiveDate) -> Vec<NaiveDate> {
        let today = self.today.unwrap_or_else(|| Utc::now().date_naive());
        let window_start = today
            .checked_sub_days(Days::new(u64::from(self.max_days.saturating_sub(1))))
            .unwrap_or(today);
        let first = since.max(window_start);

        first
            .iter_days()
            .take_while(|day| *day <= today)
            .collect()
    }

    async fn fetch_day(&self, day: NaiveDate) -> Result<Vec<BulletinItem>> {
        let url = format!("{}/{}", self.base_url, day.format("%Y%m%d"));
        match self.http.get_json::<Value>(&url).await {
            Ok(document) => Ok(parse_summary(&document, day)),
            Err(e) if e.status() == Some(404) => {
                debug!(day = %day, "No bulletin published");
                Ok(Vec::new())
            },
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Source for BoeSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn default_status(&self) -> ContractStatus {
        ContractStatus::Draft
    }

    async fn fetch(&self, since: NaiveDate) -> Result<Fetched> {
        let days = self.days_since(since);
        let processor = ConcurrentProcessor::new("bulletin-days", self.pool);
        let (mut per_day, stats) = processor
            .process_all(days, |day| self.fetch_day(day))
            .await;

        per_day.sort_by_key(|items| items.first().map(|i| i.date));
        let items: Vec<RawItem> = per_day
            .into_iter()
            .flatten()
            .map(RawItem::Bulletin)
            .collect();

        info!(source = NAME, days = stats.total_items, items = items.len(), "Fetched bulletins");
        Ok(Fetched {
            items,
            stats,
            mixed_groups: false,
        })
    }

    fn parse(&self, item: &RawItem) -> Result<Option<SourceRecord>> {
        let RawItem::Bulletin(item) = item else {
            return Err(IngestError::Parse(format!("{} only parses bulletin items", NAME)));
        };

        Ok(Some(SourceRecord::Flat(RawContract {
            external_id: Some(item.identifier.clone()),
            title: Some(item.title.clone()),
            contracting_authority: Some(item.department.clone()),
            publication_date: Some(item.date.format("%Y-%m-%d").to_string()),
            source_url: Some(item.url.clone()).filter(|u| !u.is_empty()),
            category: Some(item.kind.as_str().to_string()),
            ..RawContract::default()
        })))
    }
}
