//! 批量调度（BatchDispatcher）
//!
//! 将认领到的记录按 `batch_size` 切块，块与块顺序执行，块内至多 `concurrency`
//! 个投递同时进行。单条失败互不影响，结果逐条收集并记录结构化日志；
//! 调度器本身不重试，回退的记录由下一轮轮询重新认领。
//!
use super::publisher::{Delivery, RecordPublisher};
use crate::error::{DomainError, DomainResult};
use crate::outbox::OutboxRecord;
use bon::Builder;
use futures_util::{StreamExt, stream};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder)]
pub struct DispatchConfig {
    #[builder(default = 3)]
    pub batch_size: usize,
    #[builder(default = 3)]
    pub concurrency: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig::builder().build()
    }
}

/// 单条记录的调度结果
#[derive(Debug)]
pub struct DispatchItem {
    pub record_id: String,
    pub trace_id: String,
    pub correlation_id: String,
    pub outcome: DomainResult<Delivery>,
}

impl DispatchItem {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    items: Vec<DispatchItem>,
}

impl BatchReport {
    pub fn items(&self) -> &[DispatchItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &DomainError)> {
        self.items
            .iter()
            .filter_map(|i| i.outcome.as_ref().err().map(|e| (i.record_id.as_str(), e)))
    }
}

#[derive(Clone)]
pub struct BatchDispatcher {
    publisher: Arc<dyn RecordPublisher>,
    config: DispatchConfig,
}

impl BatchDispatcher {
    pub fn new(publisher: Arc<dyn RecordPublisher>, config: DispatchConfig) -> DomainResult<Self> {
        if config.batch_size == 0 {
            return Err(DomainError::validation("dispatch batch size must be positive"));
        }
        if config.concurrency == 0 {
            return Err(DomainError::validation("dispatch concurrency must be positive"));
        }
        Ok(Self { publisher, config })
    }

    pub fn config(&self) -> DispatchConfig {
        self.config
    }

    pub async fn dispatch(&self, batch: Vec<OutboxRecord>) -> BatchReport {
        let mut items = Vec::with_capacity(batch.len());
        let mut records = batch.into_iter().peekable();

        while records.peek().is_some() {
            let chunk: Vec<OutboxRecord> = records.by_ref().take(self.config.batch_size).collect();
            let done: Vec<DispatchItem> = stream::iter(chunk)
                .map(|record| {
                    let publisher = self.publisher.clone();
                    async move { Self::dispatch_one(publisher, record).await }
                })
                .buffer_unordered(self.config.concurrency)
                .collect()
                .await;
            items.extend(done);
        }

        let report = BatchReport { items };
        if report.failed() > 0 {
            tracing::warn!(
                total = report.len(),
                failed = report.failed(),
                "batch dispatched with failures"
            );
        }
        report
    }

    async fn dispatch_one(publisher: Arc<dyn RecordPublisher>, record: OutboxRecord) -> DispatchItem {
        let record_id = record.identifier().to_string();
        let trace_id = record.trace_id().to_string();
        let correlation_id = Uuid::new_v4().to_string();
        let outcome = publisher.publish(record, &correlation_id).await;

        match &outcome {
            Ok(_) => tracing::info!(
                record_id = %record_id,
                trace_id = %trace_id,
                correlation_id = %correlation_id,
                "outbox record delivered"
            ),
            Err(err) => tracing::warn!(
                record_id = %record_id,
                trace_id = %trace_id,
                correlation_id = %correlation_id,
                error = %err,
                transient = err.is_transient(),
                "outbox record delivery failed"
            ),
        }

        DispatchItem {
            record_id,
            trace_id,
            correlation_id,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Gauge {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RecordPublisher for Gauge {
        async fn publish(&self, record: OutboxRecord, correlation_id: &str) -> DomainResult<Delivery> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if record.payload()["fail"] == json!(true) {
                return Err(DomainError::transient_delivery("broker down"));
            }
            Ok(Delivery {
                record_id: record.identifier().to_string(),
                correlation_id: correlation_id.to_string(),
                trace_id: record.trace_id().to_string(),
            })
        }
    }

    fn records(n: usize) -> Vec<OutboxRecord> {
        (0..n)
            .map(|i| OutboxRecord::new("welcome", json!({ "n": i, "fail": i == 2 }), "t"))
            .collect()
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let gauge: Arc<dyn RecordPublisher> = Arc::new(Gauge::default());
        let zero_batch = DispatchConfig::builder().batch_size(0).build();
        let zero_conc = DispatchConfig::builder().concurrency(0).build();
        assert!(BatchDispatcher::new(gauge.clone(), zero_batch).is_err());
        assert!(BatchDispatcher::new(gauge, zero_conc).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrency_is_bounded_and_failures_are_isolated() {
        let gauge = Arc::new(Gauge::default());
        let dispatcher = BatchDispatcher::new(
            gauge.clone(),
            DispatchConfig::builder().batch_size(12).concurrency(3).build(),
        )
        .unwrap();

        let report = dispatcher.dispatch(records(12)).await;
        assert_eq!(report.len(), 12);
        assert_eq!(report.failed(), 1);
        assert_eq!(gauge.calls.load(Ordering::SeqCst), 12);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn chunks_run_one_after_another() {
        let gauge = Arc::new(Gauge::default());
        let dispatcher = BatchDispatcher::new(
            gauge.clone(),
            DispatchConfig::builder().batch_size(2).concurrency(8).build(),
        )
        .unwrap();

        let report = dispatcher.dispatch(records(5)).await;
        assert_eq!(report.len(), 5);
        // 块大小为 2 时，即使并发上限为 8，同时进行的投递也不超过 2
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn failed_items_keep_their_correlation_id() {
        let dispatcher =
            BatchDispatcher::new(Arc::new(Gauge::default()), DispatchConfig::default()).unwrap();

        let report = dispatcher.dispatch(records(4)).await;
        let ids: HashSet<&str> = report
            .items()
            .iter()
            .map(|item| item.correlation_id.as_str())
            .collect();
        assert_eq!(ids.len(), 4);
        assert!(!ids.contains(""));

        for item in report.items() {
            if let Ok(delivery) = &item.outcome {
                assert_eq!(delivery.correlation_id, item.correlation_id);
            }
        }
        assert_eq!(report.failed(), 1);
    }
}
