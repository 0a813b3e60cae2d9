use crate::error::ShipError;
use crate::record::LogRecord;
use async_trait::async_trait;

/// Asynchronous destination for [`LogRecord`]s produced by the logging layer.
///
/// The layer calls `send` from a spawned task, one call per record, and
/// never awaits it on the application thread.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Send a single log record to the underlying backend.
    ///
    /// **Returns**
    /// - `Ok(())` if the backend accepted the document.
    /// - `Err(..)` describing why this record was not stored. The layer
    ///   reports the failure and moves on; nothing is retried.
    async fn send(&self, record: &LogRecord) -> Result<(), ShipError>;
}
