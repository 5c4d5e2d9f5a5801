//! Source runs: fetch, extract and normalize concurrently, hand off to a sink

use crate::config::{IngestConfig, PoolSettings};
use crate::error::{IngestError, Result};
use crate::framework::{ConcurrentProcessor, ItemId};
use crate::normalize::Normalizer;
use crate::registry::SourceRegistry;
use crate::sink::{ContractSink, RawRecord};
use crate::sources::{Fetched, Source};
use chrono::{DateTime, Months, NaiveDate, Utc};
use licita_common::types::{RunReport, RunStatus};
use licita_common::{ContractDto, ProcessingStats};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Outcome of one raw item
struct Parsed {
    raw: Option<RawRecord>,
    contract: Option<ContractDto>,
}

pub struct IngestRunner {
    entry_pool: PoolSettings,
    months_to_check: u32,
    today: Option<NaiveDate>,
}

impl IngestRunner {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            entry_pool: config.entry_pool,
            months_to_check: config.months_to_check,
            today: None,
        }
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Start of the window to fetch
    ///
    /// The date of the last successful run when known, otherwise a bounded
    /// historical window of `months_to_check` months.
    pub fn effective_since(&self, last_run: Option<DateTime<Utc>>) -> NaiveDate {
        let today = self.today.unwrap_or_else(|| Utc::now().date_naive());
        match last_run {
            Some(ts) => ts.date_naive(),
            None => today
                .checked_sub_months(Months::new(self.months_to_check))
                .unwrap_or(today),
        }
    }

    /// Run one source end to end
    ///
    /// Only fatal configuration errors are returned; anything else ends up in
    /// the report.
    pub async fn run_source(
        &self,
        source: &dyn Source,
        last_run: Option<DateTime<Utc>>,
        sink: &dyn ContractSink,
    ) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let since = self.effective_since(last_run);
        info!(run_id = %run_id, source = source.name(), since = %since, "Starting source run");

        let fetched = match source.fetch(since).await {
            Ok(fetched) => fetched,
            Err(e) if e.is_fatal() => {
                error!(run_id = %run_id, source = source.name(), error = %e, "Run aborted");
                return Err(e);
            },
            Err(e) => {
                error!(run_id = %run_id, source = source.name(), error = %e, "Fetch failed");
                let report = RunReport {
                    run_id,
                    source: source.name().to_string(),
                    started_at,
                    finished_at: Utc::now(),
                    status: RunStatus::Failed,
                    archives: ProcessingStats::default(),
                    entries: ProcessingStats::default(),
                    contracts: 0,
                    dropped: 0,
                    sink_failures: 0,
                    mixed_groups: false,
                    error: Some(e.to_string()),
                };
                return Ok(self.finish(sink, report).await);
            },
        };

        Ok(self.deliver(run_id, started_at, source, fetched, sink).await)
    }

    /// Extract, normalize and deliver items that were fetched elsewhere
    pub async fn ingest_fetched(
        &self,
        source: &dyn Source,
        fetched: Fetched,
        sink: &dyn ContractSink,
    ) -> RunReport {
        self.deliver(Uuid::new_v4(), Utc::now(), source, fetched, sink)
            .await
    }

    /// Run the named sources (all when `names` is empty), one after another
    ///
    /// Names are resolved before any source starts; an unknown one aborts.
    pub async fn run_all(
        &self,
        registry: &SourceRegistry,
        names: &[String],
        last_run: Option<DateTime<Utc>>,
        sink: &dyn ContractSink,
    ) -> Result<Vec<RunReport>> {
        let sources = registry.select(names)?;
        let mut reports = Vec::with_capacity(sources.len());
        for source in sources {
            reports.push(self.run_source(source.as_ref(), last_run, sink).await?);
        }
        Ok(reports)
    }

    async fn deliver(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        source: &dyn Source,
        fetched: Fetched,
        sink: &dyn ContractSink,
    ) -> RunReport {
        let normalizer = Normalizer::new(source.platform(), source.default_status());
        let processor = ConcurrentProcessor::new("entries", self.entry_pool);

        let (parsed, entries) = processor
            .process_all(fetched.items, |item| {
                let normalizer = &normalizer;
                async move {
                    let record = source.parse(&item)?;
                    let contract = record.as_ref().and_then(|r| normalizer.normalize(r));
                    let raw = record.map(|record| RawRecord {
                        source: source.name().to_string(),
                        reference: record
                            .reference()
                            .map(str::to_string)
                            .unwrap_or_else(|| item.item_id()),
                        fetched_at: Utc::now(),
                        record,
                    });
                    Ok::<_, IngestError>(Parsed { raw, contract })
                }
            })
            .await;

        let mut contracts = 0usize;
        let mut dropped = 0usize;
        let mut sink_failures = 0usize;

        for Parsed { raw, contract } in parsed {
            if let Some(raw) = raw {
                if let Err(e) = sink.upsert_raw(&raw).await {
                    sink_failures += 1;
                    warn!(item = %raw.reference, error = %e, "Raw upsert failed");
                }
            }
            match contract {
                Some(contract) => match sink.upsert_contract(&contract).await {
                    Ok(()) => contracts += 1,
                    Err(e) => {
                        sink_failures += 1;
                        warn!(item = %contract.external_id, error = %e, "Contract upsert failed");
                    },
                },
                None => dropped += 1,
            }
        }

        let status = RunStatus::from_counts(
            fetched.stats.successful + entries.successful,
            fetched.stats.failed + entries.failed,
        );
        let report = RunReport {
            run_id,
            source: source.name().to_string(),
            started_at,
            finished_at: Utc::now(),
            status,
            archives: fetched.stats,
            entries,
            contracts,
            dropped,
            sink_failures,
            mixed_groups: fetched.mixed_groups,
            error: None,
        };

        info!(
            run_id = %run_id,
            source = %report.source,
            status = ?report.status,
            contracts,
            dropped,
            sink_failures,
            "Source run finished"
        );
        self.finish(sink, report).await
    }

    async fn finish(&self, sink: &dyn ContractSink, mut report: RunReport) -> RunReport {
        if let Err(e) = sink.finish(&report).await {
            warn!(run_id = %report.run_id, error = %e, "Sink failed to finish run");
            report.sink_failures += 1;
        }
        report
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::normalize::{RawContract, SourceRecord};
    use crate::sink::MemorySink;
    use crate::sources::{BulletinItem, RawItem};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use licita_common::ContractStatus;

    /// Source serving canned bulletin items
    struct Canned {
        items: Vec<RawItem>,
        fail_fetch: Option<fn() -> IngestError>,
    }

    fn item(id: &str, title: &str) -> RawItem {
        RawItem::Bulletin(BulletinItem {
            identifier: id.to_string(),
            title: title.to_string(),
            department: "Ayuntamiento de Madrid".to_string(),
            section: String::new(),
            subsection: String::new(),
            url: String::new(),
            kind: crate::sources::boe::ItemKind::Contract,
            date: NaiveDate::from_ymd_opt(2025, 11, 29).unwrap(),
        })
    }

    #[async_trait]
    impl Source for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }

        fn platform(&self) -> &'static str {
            "CANNED"
        }

        fn default_status(&self) -> ContractStatus {
            ContractStatus::Draft
        }

        async fn fetch(&self, _since: NaiveDate) -> Result<Fetched> {
            if let Some(fail) = self.fail_fetch {
                return Err(fail());
            }
            Ok(Fetched {
                items: self.items.clone(),
                stats: ProcessingStats {
                    total_items: 1,
                    successful: 1,
                    ..ProcessingStats::default()
                },
                mixed_groups: false,
            })
        }

        fn parse(&self, item: &RawItem) -> Result<Option<SourceRecord>> {
            let RawItem::Bulletin(item) = item else {
                return Ok(None);
            };
            if item.identifier == "boom" {
                return Err(IngestError::MalformedEntry("boom".to_string()));
            }
            Ok(Some(SourceRecord::Flat(RawContract {
                external_id: Some(item.identifier.clone()),
                title: Some(item.title.clone()),
                contracting_authority: Some(item.department.clone()),
                ..RawContract::default()
            })))
        }
    }

    fn runner() -> IngestRunner {
        IngestRunner::new(&IngestConfig::default())
            .with_today(NaiveDate::from_ymd_opt(2025, 11, 30).unwrap())
    }

    #[test]
    fn test_effective_since() {
        let runner = runner();
        assert_eq!(
            runner.effective_since(None),
            NaiveDate::from_ymd_opt(2023, 11, 30).unwrap()
        );
        let last = Utc.with_ymd_and_hms(2025, 10, 1, 8, 0, 0).unwrap();
        assert_eq!(
            runner.effective_since(Some(last)),
            NaiveDate::from_ymd_opt(2025, 10, 1).unwrap()
        );
    }

    #[tokio::test]
    async fn test_run_counts_drops_and_failures() {
        let source = Canned {
            items: vec![item("a", "Obras"), item("b", ""), item("boom", "x"), item("c", "Servicios")],
            fail_fetch: None,
        };
        let sink = MemorySink::new();

        let report = runner().run_source(&source, None, &sink).await.unwrap();

        assert_eq!(report.entries.total_items, 4);
        assert_eq!(report.entries.successful, 3);
        assert_eq!(report.entries.failed, 1);
        assert_eq!(report.entries.errors[0].item_id, "boom");
        assert_eq!(report.contracts, 2);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.status, RunStatus::Partial);

        let stored = sink.contracts().await;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].region, "Comunidad de Madrid");
        assert_eq!(stored[0].status, ContractStatus::Draft);
        assert_eq!(sink.raw_records().await.len(), 3);
        assert_eq!(sink.reports().await.len(), 1);
    }

    #[tokio::test]
    async fn test_fatal_fetch_error_aborts() {
        let source = Canned {
            items: Vec::new(),
            fail_fetch: Some(|| IngestError::NoDiscoveryStrategy("ftp://x".to_string())),
        };
        let sink = MemorySink::new();
        let err = runner().run_source(&source, None, &sink).await.unwrap_err();
        assert!(matches!(err, IngestError::NoDiscoveryStrategy(_)));
        assert!(sink.reports().await.is_empty());
    }

    #[tokio::test]
    async fn test_non_fatal_fetch_error_is_reported() {
        let source = Canned {
            items: Vec::new(),
            fail_fetch: Some(|| IngestError::Parse("listing".to_string())),
        };
        let sink = MemorySink::new();
        let report = runner().run_source(&source, None, &sink).await.unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.error.unwrap().contains("listing"));
        assert_eq!(sink.reports().await.len(), 1);
    }

    #[tokio::test]
    async fn test_run_all_rejects_unknown_names_upfront() {
        let mut registry = SourceRegistry::new();
        registry
            .register(std::sync::Arc::new(Canned {
                items: vec![item("a", "Obras")],
                fail_fetch: None,
            }))
            .unwrap();
        let sink = MemorySink::new();

        let err = runner()
            .run_all(&registry, &["canned".to_string(), "missing".to_string()], None, &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UnknownSource(_)));
        assert!(sink.contracts().await.is_empty());

        let reports = runner().run_all(&registry, &[], None, &sink).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, RunStatus::Success);
    }
}
