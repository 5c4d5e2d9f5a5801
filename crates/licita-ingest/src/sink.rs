//! Sink interface handing records to external persistence
//!
//! The pipeline only talks to [`ContractSink`]; storage engines live outside
//! this crate. Sinks upsert by `external_id`, the pipeline never retries a
//! failed write.

use crate::normalize::SourceRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use licita_common::types::RunReport;
use licita_common::{ContractDto, LicitaError, Result};
use serde::Serialize;
use serde_jsonlines::JsonLinesWriter;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Source record kept verbatim next to the normalized contract
#[derive(Debug, Clone, Serialize)]
pub struct RawRecord {
    pub source: String,
    pub reference: String,
    pub fetched_at: DateTime<Utc>,
    pub record: SourceRecord,
}

#[async_trait]
pub trait ContractSink: Send + Sync {
    async fn upsert_raw(&self, record: &RawRecord) -> Result<()>;

    async fn upsert_contract(&self, contract: &ContractDto) -> Result<()>;

    /// Called once per source run, after the last record
    async fn finish(&self, report: &RunReport) -> Result<()>;
}

#[derive(Default)]
struct MemoryState {
    contracts: BTreeMap<String, ContractDto>,
    raw: Vec<RawRecord>,
    reports: Vec<RunReport>,
}

/// In-process sink; the latest write for an `external_id` wins
#[derive(Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored contracts ordered by `external_id`
    pub async fn contracts(&self) -> Vec<ContractDto> {
        self.state.lock().await.contracts.values().cloned().collect()
    }

    pub async fn get(&self, external_id: &str) -> Option<ContractDto> {
        self.state.lock().await.contracts.get(external_id).cloned()
    }

    pub async fn raw_records(&self) -> Vec<RawRecord> {
        self.state.lock().await.raw.clone()
    }

    pub async fn reports(&self) -> Vec<RunReport> {
        self.state.lock().await.reports.clone()
    }
}

#[async_trait]
impl ContractSink for MemorySink {
    async fn upsert_raw(&self, record: &RawRecord) -> Result<()> {
        self.state.lock().await.raw.push(record.clone());
        Ok(())
    }

    async fn upsert_contract(&self, contract: &ContractDto) -> Result<()> {
        if !contract.is_valid() {
            return Err(LicitaError::Validation(format!(
                "contract without identity: {:?}",
                contract.external_id
            )));
        }
        self.state
            .lock()
            .await
            .contracts
            .insert(contract.dedupe_key().to_string(), contract.clone());
        Ok(())
    }

    async fn finish(&self, report: &RunReport) -> Result<()> {
        self.state.lock().await.reports.push(report.clone());
        Ok(())
    }
}

type LineWriter = JsonLinesWriter<BufWriter<File>>;

fn create_writer(path: &Path) -> Result<LineWriter> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    Ok(JsonLinesWriter::new(BufWriter::new(file)))
}

/// Writes one JSON document per line
///
/// Contracts go to one file, raw records optionally to another. Repeated
/// `external_id`s are written as they come; consumers keep the last one.
pub struct JsonLinesSink {
    path: PathBuf,
    contracts: Mutex<LineWriter>,
    raw: Option<Mutex<LineWriter>>,
}

impl JsonLinesSink {
    pub fn create(path: impl Into<PathBuf>, raw_path: Option<&Path>) -> Result<Self> {
        let path = path.into();
        let contracts = Mutex::new(create_writer(&path)?);
        let raw = raw_path.map(create_writer).transpose()?.map(Mutex::new);

        info!(path = %path.display(), raw = raw.is_some(), "Writing JSON lines");
        Ok(Self {
            path,
            contracts,
            raw,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ContractSink for JsonLinesSink {
    async fn upsert_raw(&self, record: &RawRecord) -> Result<()> {
        if let Some(raw) = &self.raw {
            raw.lock().await.write(record)?;
        }
        Ok(())
    }

    async fn upsert_contract(&self, contract: &ContractDto) -> Result<()> {
        self.contracts.lock().await.write(contract)?;
        Ok(())
    }

    async fn finish(&self, report: &RunReport) -> Result<()> {
        self.contracts.lock().await.flush()?;
        if let Some(raw) = &self.raw {
            raw.lock().await.flush()?;
        }
        debug!(path = %self.path.display(), source = %report.source, "Flushed JSON lines");
        Ok(())
    }
}
