//! Canonical records produced by the ingestion pipeline
//!
//! These are the only types an external sink needs to understand: the
//! normalized [`ContractDto`], the per-stage [`ProcessingStats`] and the
//! terminal [`RunReport`] of a source run.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Award procedure of a contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcedureType {
    #[default]
    Open,
    Restricted,
    Negotiated,
    CompetitiveDialogue,
    Minor,
}

impl ProcedureType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcedureType::Open => "OPEN",
            ProcedureType::Restricted => "RESTRICTED",
            ProcedureType::Negotiated => "NEGOTIATED",
            ProcedureType::CompetitiveDialogue => "COMPETITIVE_DIALOGUE",
            ProcedureType::Minor => "MINOR",
        }
    }
}

/// Object of a contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractType {
    Works,
    Services,
    Supplies,
    Mixed,
    #[default]
    Other,
}

impl ContractType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContractType::Works => "WORKS",
            ContractType::Services => "SERVICES",
            ContractType::Supplies => "SUPPLIES",
            ContractType::Mixed => "MIXED",
            ContractType::Other => "OTHER",
        }
    }
}

/// Lifecycle status of a contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    #[default]
    Published,
    Awarded,
    InProgress,
    Completed,
    Cancelled,
    Draft,
}

impl ContractStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ContractStatus::Published => "PUBLISHED",
            ContractStatus::Awarded => "AWARDED",
            ContractStatus::InProgress => "IN_PROGRESS",
            ContractStatus::Completed => "COMPLETED",
            ContractStatus::Cancelled => "CANCELLED",
            ContractStatus::Draft => "DRAFT",
        }
    }
}

macro_rules! impl_display_as_str {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl std::fmt::Display for $ty {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str(self.as_str())
                }
            }
        )+
    };
}

impl_display_as_str!(ProcedureType, ContractType, ContractStatus);

/// Normalized contract handed to persistence
///
/// `external_id` is the idempotent upsert key. Dates are ISO `YYYY-MM-DD`
/// strings; amounts are exact decimals in euros.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDto {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub budget: Option<BigDecimal>,
    pub awarded_amount: Option<BigDecimal>,
    pub contracting_authority: Option<String>,
    pub awarded_to_name: Option<String>,
    pub awarded_to_tax_id: Option<String>,
    pub publication_date: Option<String>,
    pub deadline_date: Option<String>,
    pub award_date: Option<String>,
    pub procedure_type: ProcedureType,
    pub contract_type: ContractType,
    pub status: ContractStatus,
    pub cpv_code: Option<String>,
    /// Autonomous community, empty when it could not be inferred
    pub region: String,
    pub municipality: Option<String>,
    pub source_url: Option<String>,
    /// Platform the record came from, e.g. "PLACSP"
    pub source_platform: String,
}

impl ContractDto {
    pub fn is_valid(&self) -> bool {
        !self.external_id.trim().is_empty() && !self.title.trim().is_empty()
    }

    /// Key used by sinks to deduplicate records across runs
    pub fn dedupe_key(&self) -> &str {
        &self.external_id
    }
}

/// A single failed item, attributable for operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub item_id: String,
    pub error: String,
}

/// Aggregate outcome of one batch of concurrent work
///
/// For a completed batch `successful + failed == total_items`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total_items: usize,
    pub successful: usize,
    pub failed: usize,
    /// Sum of the time spent on each item
    pub total_duration: Duration,
    /// Elapsed time of the whole batch
    pub wall_time: Duration,
    pub errors: Vec<ItemError>,
}

impl ProcessingStats {
    pub fn new(total_items: usize) -> Self {
        Self {
            total_items,
            ..Self::default()
        }
    }

    pub fn record_success(&mut self, elapsed: Duration) {
        self.successful += 1;
        self.total_duration += elapsed;
    }

    pub fn record_failure(
        &mut self,
        item_id: impl Into<String>,
        error: impl Into<String>,
        elapsed: Duration,
    ) {
        self.failed += 1;
        self.total_duration += elapsed;
        self.errors.push(ItemError {
            item_id: item_id.into(),
            error: error.into(),
        });
    }

    /// Percentage of successful items, 0 for an empty batch
    pub fn success_rate(&self) -> f64 {
        if self.total_items == 0 {
            return 0.0;
        }
        self.successful as f64 / self.total_items as f64 * 100.0
    }

    pub fn average_duration(&self) -> Duration {
        match u32::try_from(self.total_items) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.total_duration / n,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.successful + self.failed == self.total_items
    }

    /// Fold another batch into this one
    pub fn absorb(&mut self, other: ProcessingStats) {
        self.total_items += other.total_items;
        self.successful += other.successful;
        self.failed += other.failed;
        self.total_duration += other.total_duration;
        self.wall_time += other.wall_time;
        self.errors.extend(other.errors);
    }
}

/// Final state of a source run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    /// Derive the status from how many items failed or succeeded
    pub fn from_counts(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (_, 0) => RunStatus::Success,
            (0, _) => RunStatus::Failed,
            _ => RunStatus::Partial,
        }
    }
}

/// Terminal summary of a source run, handed to the sink after the last record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    /// Archive (or day) level fetch statistics
    pub archives: ProcessingStats,
    /// Entry level extraction statistics
    pub entries: ProcessingStats,
    /// Records handed to the sink
    pub contracts: usize,
    /// Entries dropped for missing identity fields
    pub dropped: usize,
    pub sink_failures: usize,
    /// Set when discovery returned archives from more than one syndication group
    pub mixed_groups: bool,
    /// Fatal error that stopped the run before any work, if any
    pub error: Option<String>,
}

impl RunReport {
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
