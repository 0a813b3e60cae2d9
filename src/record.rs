use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;

/// A single log event as seen by the shipper.
///
/// The layout decides how a record turns into a document; the shipper only
/// relies on the timestamp (for the index name) and on `exception`.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub module_path: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub fields: BTreeMap<String, serde_json::Value>,
    pub message: Option<String>,
    pub service_name: Option<String>,
    pub exception: Option<ExceptionInfo>,
}

impl LogRecord {
    /// Minimal record stamped with the current time.
    pub fn new(level: impl Into<String>, target: impl Into<String>, message: impl Into<String>) -> Self {
        LogRecord {
            timestamp: Utc::now(),
            level: level.into(),
            target: target.into(),
            module_path: None,
            file: None,
            line: None,
            fields: BTreeMap::new(),
            message: Some(message.into()),
            service_name: None,
            exception: None,
        }
    }

    pub fn with_exception(mut self, exception: ExceptionInfo) -> Self {
        self.exception = Some(exception);
        self
    }
}

/// Object form of an error attached to a log event.
///
/// Serialized under the `exception` key of the outgoing document. The
/// `source` chain mirrors [`Error::source`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExceptionInfo {
    #[serde(rename = "type")]
    pub type_name: String,
    pub message: String,
    /// Free-form trace text. Records built by the tracing layer carry the
    /// backtrace of the logging call site (when `RUST_BACKTRACE` enables
    /// capture), not of the place the error was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Box<ExceptionInfo>>,
}

impl ExceptionInfo {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        ExceptionInfo {
            type_name: type_name.into(),
            message: message.into(),
            stack_trace: None,
            source: None,
        }
    }

    /// Build from a concrete error type; the type name comes from the
    /// compiler, the cause chain from `source()`.
    pub fn from_error<E: Error + 'static>(err: &E) -> Self {
        ExceptionInfo {
            type_name: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
            stack_trace: None,
            source: err.source().map(|s| Box::new(Self::from_dyn_error(s))),
        }
    }

    /// Build from a trait object, as handed out by `tracing`'s
    /// `record_error`. The concrete type is erased, so well-known error
    /// types are recovered by downcasting; anything else is named `Error`
    /// unless its `Debug` output starts with a path.
    pub fn from_dyn_error(err: &(dyn Error + 'static)) -> Self {
        ExceptionInfo {
            type_name: dyn_type_name(err),
            message: err.to_string(),
            stack_trace: None,
            source: err.source().map(|s| Box::new(Self::from_dyn_error(s))),
        }
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }
}

macro_rules! downcast_name {
    ($err:expr, $($ty:ty => $name:literal),+ $(,)?) => {
        $(
            if $err.is::<$ty>() {
                return $name.to_string();
            }
        )+
    };
}

fn dyn_type_name(err: &(dyn Error + 'static)) -> String {
    downcast_name!(
        err,
        std::io::Error => "std::io::Error",
        std::fmt::Error => "std::fmt::Error",
        std::num::ParseIntError => "std::num::ParseIntError",
        std::num::ParseFloatError => "std::num::ParseFloatError",
        std::str::Utf8Error => "std::str::Utf8Error",
        std::string::FromUtf8Error => "std::string::FromUtf8Error",
        serde_json::Error => "serde_json::Error",
        reqwest::Error => "reqwest::Error",
        chrono::ParseError => "chrono::ParseError",
    );

    // Leading identifiers without a path are usually enum variants
    // (`Custom { .. }`, `NotFound`), which would mislabel the type.
    let debug = format!("{:?}", err);
    let name: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == ':')
        .collect();

    if name.contains("::") && name.starts_with(|c: char| c.is_alphabetic()) {
        name.trim_end_matches(':').to_string()
    } else {
        "Error".to_string()
    }
}
