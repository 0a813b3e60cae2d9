use crate::record::LogRecord;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Renders a [`LogRecord`] into the JSON text of an index document.
///
/// The shipper parses the output and expects a JSON object carrying an
/// `@message` field. Output that is not valid JSON is reported to the
/// caller as a render error and nothing is sent.
pub trait Layout: Send + Sync {
    fn render(&self, record: &LogRecord) -> String;
}

/// Default layout producing `@`-prefixed top-level fields.
///
/// `@message` is always present (empty when the event had no message).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLayout;

impl Layout for JsonLayout {
    fn render(&self, record: &LogRecord) -> String {
        let mut doc = Map::new();
        doc.insert("@timestamp".into(), Value::String(record.timestamp.to_rfc3339()));
        doc.insert("@level".into(), Value::String(record.level.clone()));
        doc.insert("@target".into(), Value::String(record.target.clone()));
        doc.insert(
            "@message".into(),
            Value::String(record.message.clone().unwrap_or_default()),
        );

        if let Some(module_path) = &record.module_path {
            doc.insert("@module_path".into(), Value::String(module_path.clone()));
        }
        if let Some(file) = &record.file {
            doc.insert("@file".into(), Value::String(file.clone()));
        }
        if let Some(line) = record.line {
            doc.insert("@line".into(), Value::from(line));
        }
        if let Some(service) = &record.service_name {
            doc.insert("@service".into(), Value::String(service.clone()));
        }
        if !record.fields.is_empty() {
            let fields = record.fields.clone().into_iter().collect::<Map<_, _>>();
            doc.insert("@fields".into(), Value::Object(fields));
        }

        Value::Object(doc).to_string()
    }
}

/// Placeholder replaced by the event date in an [`IndexTemplate`].
pub const SHORTDATE: &str = "${shortdate}";

pub const DEFAULT_INDEX_TEMPLATE: &str = "logs-${shortdate}/all";

/// Index path template, rendered per event from the event's own timestamp.
///
/// `${shortdate}` expands to `YYYY-MM-DD` in UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTemplate {
    template: String,
}

impl IndexTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        IndexTemplate { template: template.into() }
    }

    pub fn render(&self, timestamp: &DateTime<Utc>) -> String {
        if !self.template.contains(SHORTDATE) {
            return self.template.clone();
        }
        let date = timestamp.format("%Y-%m-%d").to_string();
        self.template.replace(SHORTDATE, &date)
    }
}

impl Default for IndexTemplate {
    fn default() -> Self {
        IndexTemplate::new(DEFAULT_INDEX_TEMPLATE)
    }
}
