use crate::record::{ExceptionInfo, LogRecord};
use crate::sink::LogSink;
use chrono::Utc;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::BTreeMap;
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Event targets that are never shipped. Shipping emits events of its own
/// (this crate, the HTTP stack); forwarding those would loop.
const IGNORED_TARGETS: &[&str] = &["tracing_es_sink", "reqwest", "hyper", "h2", "rustls"];

/// `tracing_subscriber` layer that turns events into [`LogRecord`]s and
/// forwards them to a [`LogSink`] via a bounded channel and background task.
///
/// Each record is sent on its own task, so documents are in flight
/// concurrently and complete in any order. Failed sends are counted and
/// reported on stderr; nothing is retried.
pub struct ShippingLayer {
    sender: mpsc::Sender<LogRecord>,
    min_level: Level,
    /// Total events seen by the layer (before filtering by level).
    pub total_events: Arc<AtomicU64>,
    /// Successfully enqueued into channel.
    pub enqueued_events: Arc<AtomicU64>,
    /// Dropped because the channel was full.
    pub dropped_events: Arc<AtomicU64>,
    /// Accepted by the sink.
    pub shipped_events: Arc<AtomicU64>,
    /// Rejected by the sink or lost in transport.
    pub failed_events: Arc<AtomicU64>,
}

impl ShippingLayer {
    /// Create a new layer and spawn the background task that pulls
    /// [`LogRecord`]s from the channel and hands them to `sink`.
    ///
    /// `buffer` is raised to at least 16. Must be called from within a
    /// Tokio runtime.
    pub fn new(sink: Arc<dyn LogSink>, buffer: usize, min_level: Level) -> (Self, JoinHandle<()>) {
        let buffer = buffer.max(16);
        let (tx, mut rx) = mpsc::channel::<LogRecord>(buffer);

        let total_events = Arc::new(AtomicU64::new(0));
        let enqueued_events = Arc::new(AtomicU64::new(0));
        let dropped_events = Arc::new(AtomicU64::new(0));
        let shipped_events = Arc::new(AtomicU64::new(0));
        let failed_events = Arc::new(AtomicU64::new(0));

        let shipped_events_bg = Arc::clone(&shipped_events);
        let failed_events_bg = Arc::clone(&failed_events);

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let sink = Arc::clone(&sink);
                let shipped = Arc::clone(&shipped_events_bg);
                let failed = Arc::clone(&failed_events_bg);

                tokio::spawn(async move {
                    match sink.send(&record).await {
                        Ok(()) => {
                            shipped.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                            eprintln!("failed to ship log record: {}", e);
                        }
                    }
                });
            }
        });

        (Self {
            sender: tx,
            min_level,
            total_events,
            enqueued_events,
            dropped_events,
            shipped_events,
            failed_events,
        }, handle)
    }
}

impl<S> Layer<S> for ShippingLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        let meta = event.metadata();
        if *meta.level() > self.min_level {
            return;
        }
        if is_ignored_target(meta.target()) {
            return;
        }

        let mut fields = BTreeMap::new();
        let mut message: Option<String> = None;
        let mut exception: Option<ExceptionInfo> = None;

        let mut visitor = FieldVisitor {
            fields: &mut fields,
            message: &mut message,
            exception: &mut exception,
        };
        event.record(&mut visitor);

        let record = LogRecord {
            timestamp: Utc::now(),
            level: meta.level().to_string(),
            target: meta.target().to_string(),
            module_path: meta.module_path().map(|s| s.to_string()),
            file: meta.file().map(|s| s.to_string()),
            line: meta.line(),
            fields,
            message,
            service_name: None,
            exception,
        };

        match self.sender.try_send(record) {
            Ok(()) => {
                self.enqueued_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(_e) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                eprintln!("log channel full, dropping log record");
            }
        }
    }
}

/// Matches `krate` and `krate::*`, not every target sharing the prefix.
fn is_ignored_target(target: &str) -> bool {
    IGNORED_TARGETS.iter().any(|krate| {
        target
            .strip_prefix(krate)
            .map_or(false, |rest| rest.is_empty() || rest.starts_with("::"))
    })
}

use tracing::field::{Field, Visit};

/// Collects event fields into a [`LogRecord`]'s parts.
///
/// The `message` field becomes the record message; the first error value
/// becomes its [`ExceptionInfo`].
pub struct FieldVisitor<'a> {
    pub fields: &'a mut BTreeMap<String, serde_json::Value>,
    pub message: &'a mut Option<String>,
    pub exception: &'a mut Option<ExceptionInfo>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        if self.exception.is_none() {
            let mut info = ExceptionInfo::from_dyn_error(value);
            let backtrace = Backtrace::capture();
            if backtrace.status() == BacktraceStatus::Captured {
                info = info.with_stack_trace(backtrace.to_string());
            }
            *self.exception = Some(info);
        }
        self.fields.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        // Formatted messages (`error!("x = {}", x)`) arrive here.
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(format!("{:?}", value)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShipError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<LogRecord>>,
        reject: bool,
    }

    #[async_trait]
    impl LogSink for RecordingSink {
        async fn send(&self, record: &LogRecord) -> Result<(), ShipError> {
            self.records.lock().unwrap().push(record.clone());
            if self.reject {
                Err(ShipError::MissingMessage)
            } else {
                Ok(())
            }
        }
    }

    async fn wait_for(counter: &AtomicU64, expected: u64) {
        for _ in 0..200 {
            if counter.load(Ordering::Relaxed) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("counter stuck at {}", counter.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn ships_events_at_or_above_min_level() {
        let sink = Arc::new(RecordingSink::default());
        let (layer, _handle) = ShippingLayer::new(sink.clone(), 64, Level::WARN);
        let shipped = Arc::clone(&layer.shipped_events);
        let total = Arc::clone(&layer.total_events);

        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "app", "not shipped");
            tracing::warn!(target: "app", user_id = 42, "disk {} full", "/var");
            tracing::error!(target: "app", retry = false, ratio = 0.5, "payment failed");
        });

        wait_for(&shipped, 2).await;
        assert_eq!(total.load(Ordering::Relaxed), 3);

        let mut records = sink.records.lock().unwrap().clone();
        records.sort_by(|a, b| a.level.cmp(&b.level));
        assert_eq!(records.len(), 2);

        let error = &records[0];
        assert_eq!(error.level, "ERROR");
        assert_eq!(error.message.as_deref(), Some("payment failed"));
        assert_eq!(error.fields["retry"], serde_json::json!(false));
        assert_eq!(error.fields["ratio"], serde_json::json!(0.5));

        let warn = &records[1];
        assert_eq!(warn.message.as_deref(), Some("disk /var full"));
        assert_eq!(warn.fields["user_id"], serde_json::json!(42));
        assert_eq!(warn.target, "app");
    }

    #[tokio::test]
    async fn error_fields_become_exceptions() {
        let sink = Arc::new(RecordingSink::default());
        let (layer, _handle) = ShippingLayer::new(sink.clone(), 64, Level::ERROR);
        let shipped = Arc::clone(&layer.shipped_events);

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset");
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(target: "app", error = &io as &(dyn std::error::Error + 'static), "upstream call failed");
        });

        wait_for(&shipped, 1).await;
        let records = sink.records.lock().unwrap();
        let exception = records[0].exception.as_ref().expect("exception");
        assert_eq!(exception.message, "peer reset");
        assert_eq!(exception.type_name, "std::io::Error");
        assert_eq!(records[0].fields["error"], serde_json::json!("peer reset"));
    }

    #[tokio::test]
    async fn own_and_http_stack_events_are_ignored() {
        let sink = Arc::new(RecordingSink::default());
        let (layer, _handle) = ShippingLayer::new(sink.clone(), 64, Level::TRACE);
        let enqueued = Arc::clone(&layer.enqueued_events);
        let shipped = Arc::clone(&layer.shipped_events);

        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!(target: "hyper::proto", "flushed 120 bytes");
            tracing::debug!(target: "tracing_es_sink::shipper", "index request completed");
            tracing::debug!(target: "app", "kept");
        });

        wait_for(&shipped, 1).await;
        assert_eq!(enqueued.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn crates_sharing_an_ignored_prefix_are_shipped() {
        let sink = Arc::new(RecordingSink::default());
        let (layer, _handle) = ShippingLayer::new(sink.clone(), 64, Level::TRACE);
        let enqueued = Arc::clone(&layer.enqueued_events);
        let shipped = Arc::clone(&layer.shipped_events);

        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(target: "hyperion::billing", "invoice rejected");
            tracing::error!(target: "h2o_app", "pump stalled");
            tracing::error!(target: "rustlsx", "handshake retried");
            tracing::error!(target: "h2", "stream reset");
        });

        wait_for(&shipped, 3).await;
        assert_eq!(enqueued.load(Ordering::Relaxed), 3);

        let mut targets: Vec<String> = sink.records.lock().unwrap().iter().map(|r| r.target.clone()).collect();
        targets.sort();
        assert_eq!(targets, vec!["h2o_app", "hyperion::billing", "rustlsx"]);
    }

    #[test]
    fn ignored_targets_match_on_crate_boundary() {
        assert!(is_ignored_target("hyper"));
        assert!(is_ignored_target("hyper::proto::h1"));
        assert!(is_ignored_target("tracing_es_sink::shipper"));
        assert!(!is_ignored_target("hyperion::billing"));
        assert!(!is_ignored_target("h2o_app"));
        assert!(!is_ignored_target("tracing_es_sinker"));
    }

    #[tokio::test]
    async fn sink_failures_are_counted() {
        let sink = Arc::new(RecordingSink { reject: true, ..Default::default() });
        let (layer, _handle) = ShippingLayer::new(sink, 64, Level::ERROR);
        let failed = Arc::clone(&layer.failed_events);
        let shipped = Arc::clone(&layer.shipped_events);

        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(target: "app", "first");
            tracing::error!(target: "app", "second");
        });

        wait_for(&failed, 2).await;
        assert_eq!(shipped.load(Ordering::Relaxed), 0);
    }
}
