//! Bounded-parallelism map with per-item error isolation
//!
//! [`ConcurrentProcessor::process_all`] runs a work function over a batch of
//! items on at most `workers` concurrent tasks. A failing (or panicking) item
//! is recorded in the returned [`ProcessingStats`] and never aborts the batch.

use crate::config::PoolSettings;
use crate::framework::rate_limiter::RateLimiter;
use futures::{stream, FutureExt, StreamExt};
use licita_common::types::ProcessingStats;
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const ITEM_ID_MAX_CHARS: usize = 50;

/// Identity of a work item, used to attribute failures
pub trait ItemId {
    fn item_id(&self) -> String;
}

fn truncated(value: &str) -> String {
    value.chars().take(ITEM_ID_MAX_CHARS).collect()
}

impl ItemId for String {
    fn item_id(&self) -> String {
        truncated(self)
    }
}

impl ItemId for &str {
    fn item_id(&self) -> String {
        truncated(self)
    }
}

impl ItemId for chrono::NaiveDate {
    fn item_id(&self) -> String {
        self.format("%Y-%m-%d").to_string()
    }
}

/// Loosely typed items: `id`, then `filename`, then the JSON text itself
impl ItemId for serde_json::Value {
    fn item_id(&self) -> String {
        ["id", "identifier", "filename"]
            .iter()
            .find_map(|key| match self.get(key) {
                Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(serde_json::Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| truncated(&self.to_string()))
    }
}

/// Worker pool with a shared rate gate
pub struct ConcurrentProcessor {
    name: String,
    workers: usize,
    limiter: Arc<RateLimiter>,
}

impl ConcurrentProcessor {
    pub fn new(name: impl Into<String>, settings: PoolSettings) -> Self {
        Self::with_limiter(
            name,
            settings.workers,
            Arc::new(RateLimiter::new(settings.requests_per_second)),
        )
    }

    /// Build a pool that shares its limiter with other pools or callers
    pub fn with_limiter(name: impl Into<String>, workers: usize, limiter: Arc<RateLimiter>) -> Self {
        Self {
            name: name.into(),
            workers: workers.max(1),
            limiter,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `work` over every item
    ///
    /// The limiter is acquired right before each invocation. Results arrive in
    /// completion order, not input order; `results.len() == stats.successful`.
    pub async fn process_all<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        work: F,
    ) -> (Vec<R>, ProcessingStats)
    where
        T: ItemId,
        E: Display,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let total = items.len();
        let mut stats = ProcessingStats::new(total);
        let mut results = Vec::with_capacity(total);
        let started = Instant::now();

        debug!(pool = %self.name, items = total, workers = self.workers, "starting batch");

        let limiter = &self.limiter;
        let work = &work;
        let mut outcomes = stream::iter(items)
            .map(|item| async move {
                let id = item.item_id();
                limiter.acquire().await;
                let began = Instant::now();
                let outcome = AssertUnwindSafe(async move { work(item).await })
                    .catch_unwind()
                    .await;
                (id, outcome, began.elapsed())
            })
            .buffer_unordered(self.workers);

        while let Some((id, outcome, elapsed)) = outcomes.next().await {
            match outcome {
                Ok(Ok(value)) => {
                    stats.record_success(elapsed);
                    results.push(value);
                },
                Ok(Err(e)) => {
                    warn!(pool = %self.name, item = %id, error = %e, "item failed");
                    stats.record_failure(id, e.to_string(), elapsed);
                },
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(pool = %self.name, item = %id, panic = %message, "worker panicked");
                    stats.record_failure(id, format!("worker panicked: {}", message), elapsed);
                },
            }
        }

        stats.wall_time = started.elapsed();
        info!(
            pool = %self.name,
            total = stats.total_items,
            successful = stats.successful,
            failed = stats.failed,
            elapsed_ms = stats.wall_time.as_millis() as u64,
            "batch finished"
        );

        (results, stats)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn pool(workers: usize) -> ConcurrentProcessor {
        ConcurrentProcessor::new(
            "test",
            PoolSettings {
                workers,
                requests_per_second: 1000.0,
            },
        )
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let items: Vec<String> = (0..10).map(|i| format!("item-{}", i)).collect();

        let (results, stats) = pool(3)
            .process_all(items, |item: String| async move {
                if item.ends_with('3') || item.ends_with('7') {
                    Err(format!("cannot handle {}", item))
                } else {
                    Ok(item.len())
                }
            })
            .await;

        assert_eq!(stats.total_items, 10);
        assert_eq!(stats.successful, 8);
        assert_eq!(stats.failed, 2);
        assert_eq!(results.len(), stats.successful);
        assert!(stats.is_complete());

        let mut failed: Vec<_> = stats.errors.iter().map(|e| e.item_id.as_str()).collect();
        failed.sort();
        assert_eq!(failed, vec!["item-3", "item-7"]);
    }

    #[tokio::test]
    async fn test_panics_become_failures() {
        let items = vec!["ok".to_string(), "explode".to_string()];

        let (results, stats) = pool(2)
            .process_all(items, |item: String| async move {
                if item == "explode" {
                    panic!("bad input");
                }
                Ok::<_, String>(item)
            })
            .await;

        assert_eq!(results, vec!["ok".to_string()]);
        assert_eq!(stats.failed, 1);
        assert!(stats.errors[0].error.contains("bad input"));
    }

    #[test]
    fn test_no_profile_aborts_on_panic() {
        // catching worker panics only works when every build profile unwinds
        let manifest = include_str!("../../../../Cargo.toml");
        let aborting: Vec<_> = manifest
            .lines()
            .map(str::trim)
            .filter(|line| line.replace(' ', "") == r#"panic="abort""#)
            .collect();
        assert!(aborting.is_empty(), "workspace profile sets panic = \"abort\"");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wall_time_bounded_by_worker_count() {
        let items: Vec<String> = (0..8).map(|i| i.to_string()).collect();

        let (_, stats) = pool(4)
            .process_all(items, |_item: String| async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, String>(())
            })
            .await;

        // ceil(8 / 4) rounds of one second each, plus limiter spacing
        assert!(stats.wall_time >= Duration::from_secs(2));
        assert!(stats.wall_time < Duration::from_secs(3));
        assert!(stats.total_duration >= Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_never_exceeds_worker_count() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let items: Vec<String> = (0..20).map(|i| i.to_string()).collect();

        let (_, stats) = pool(3)
            .process_all(items, |_item: String| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                }
            })
            .await;

        assert_eq!(stats.successful, 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_item_id_priority() {
        let with_id = serde_json::json!({"id": "A-1", "filename": "x.zip"});
        let with_filename = serde_json::json!({"filename": "x.zip"});
        let anonymous = serde_json::json!({"title": "a".repeat(80)});

        assert_eq!(with_id.item_id(), "A-1");
        assert_eq!(with_filename.item_id(), "x.zip");
        assert_eq!(anonymous.item_id().chars().count(), ITEM_ID_MAX_CHARS);
        assert_eq!("short".item_id(), "short");
    }
}
