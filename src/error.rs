use reqwest::StatusCode;

/// Outcome of a failed write, delivered through the event's completion.
///
/// Nothing here is fatal: every variant means "this one event was not
/// indexed" and the caller decides whether to drop, log or alert.
#[derive(thiserror::Error, Debug)]
pub enum ShipError {
    /// The layout produced text that is not JSON.
    #[error("layout did not render valid JSON: {0}")]
    Render(#[source] serde_json::Error),

    /// The layout produced valid JSON that is not an object.
    #[error("layout rendered a JSON {0}, expected an object")]
    NotAnObject(&'static str),

    /// The rendered document has no `@message` field.
    #[error("rendered document has no `@message` field")]
    MissingMessage,

    /// `base_url + index` is not a valid URL.
    #[error("invalid index URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The HTTP client could not be constructed (TLS backend, settings).
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// The request never produced a response (connect, DNS, TLS, timeout).
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// The backend answered with an `error` payload. The message is the
    /// response body as received.
    #[error("{body}")]
    BackendRejected {
        status: StatusCode,
        body: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// Non-success response without a recognizable error payload.
    #[error("failed to send log event to Elasticsearch (status {status})")]
    SendFailed {
        status: StatusCode,
        #[source]
        source: Option<reqwest::Error>,
    },
}

impl ShipError {
    /// True when the backend received the document and refused it.
    pub fn is_rejected(&self) -> bool {
        matches!(self, ShipError::BackendRejected { .. } | ShipError::SendFailed { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ShipError::Transport(_))
    }

    /// HTTP status of the response, if the backend answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ShipError::BackendRejected { status, .. } | ShipError::SendFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}
