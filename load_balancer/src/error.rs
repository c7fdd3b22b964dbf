use reqwest::StatusCode;

use crate::endpoint::Endpoint;

/// Errors surfaced by the dispatch layer. Collaborator failures (server selection, transport) are
/// forwarded as they are; the only errors raised here are the structural ones.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request URI is not usable, either as given or after routing it to an endpoint.
    #[error("invalid uri `{uri}`: {reason}")]
    InvalidUri { uri: String, reason: String },

    /// The declared return type of an operation is neither a single value nor a stream.
    #[error("unsupported return shape `{0}`, expected `Future<..>` or `Stream<..>`")]
    UnsupportedReturnShape(String),

    /// The load balancer could not hand out an endpoint.
    #[error("no server available for service `{0}`")]
    NoServerAvailable(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unknown operation `{0}`")]
    UnknownOperation(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_uri(uri: impl ToString, reason: impl ToString) -> Self {
        Error::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_route(
        uri: &url::Url,
        endpoint: &Endpoint,
        reason: impl ToString,
    ) -> Self {
        Error::InvalidUri {
            uri: uri.to_string(),
            reason: format!("cannot route to {}: {}", endpoint, reason.to_string()),
        }
    }

    /// Whether another attempt, possibly on another server, may succeed. Only network level
    /// failures and explicit unavailability qualify.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_retriable(),
            _ => false,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Failures reported by the HTTP transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("server answered {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),

    #[error("failed to decode response value: {0}")]
    Decode(#[from] serde_json::Error),
}

impl TransportError {
    pub(crate) fn from_reqwest(url: &url::Url, e: reqwest::Error) -> Self {
        let url = url.to_string();
        if e.is_timeout() {
            TransportError::Timeout { url }
        } else if e.is_connect() {
            TransportError::Connect { url, source: e }
        } else {
            TransportError::Request { url, source: e }
        }
    }

    pub fn is_retriable(&self) -> bool {
        match self {
            TransportError::Connect { .. } | TransportError::Timeout { .. } => true,
            TransportError::Status { status, .. } => *status == StatusCode::SERVICE_UNAVAILABLE,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
