//! Procurement sources
//!
//! A source knows how to fetch its raw items and how to turn one raw item into
//! a [`SourceRecord`]. Everything after that (normalization, sinks, run
//! statistics) is shared and lives in [`crate::pipeline`].

pub mod boe;
pub mod placsp;

pub use boe::{BoeSource, BulletinItem};
pub use placsp::PlacspSource;

use crate::error::Result;
use crate::feed::FeedEntry;
use crate::framework::ItemId;
use crate::normalize::SourceRecord;
use async_trait::async_trait;
use chrono::NaiveDate;
use licita_common::{ContractStatus, ProcessingStats};

/// One unit of raw source data, parsed independently of its siblings
#[derive(Debug, Clone)]
pub enum RawItem {
    Entry(FeedEntry),
    Bulletin(BulletinItem),
}

impl ItemId for RawItem {
    fn item_id(&self) -> String {
        match self {
            RawItem::Entry(entry) => entry.item_id(),
            RawItem::Bulletin(item) => item.identifier.clone(),
        }
    }
}

/// Output of a source fetch
#[derive(Debug, Default)]
pub struct Fetched {
    pub items: Vec<RawItem>,
    /// Statistics of the fetch stage (archives or bulletin days)
    pub stats: ProcessingStats,
    pub mixed_groups: bool,
}

#[async_trait]
pub trait Source: Send + Sync {
    /// Registry key, e.g. `placsp`
    fn name(&self) -> &'static str;

    /// Platform label stamped on every contract
    fn platform(&self) -> &'static str;

    /// Status used when the published one is missing or unknown
    fn default_status(&self) -> ContractStatus;

    /// Fetch everything published on or after `since`
    ///
    /// Per-archive and per-day failures are folded into [`Fetched::stats`];
    /// only configuration problems are returned as errors.
    async fn fetch(&self, since: NaiveDate) -> Result<Fetched>;

    /// Turn one raw item into a record; `Ok(None)` when it carries none
    fn parse(&self, item: &RawItem) -> Result<Option<SourceRecord>>;
}
