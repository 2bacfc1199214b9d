use std::any::Any;
use std::time::Duration;

use thiserror::Error;

use promsource_common::duration::DurationError;
use promsource_common::error::{ErrorExt, StatusCode};

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("error reading query: {0}")]
    MalformedQuery(String),
    #[error("invalid interval: {0}")]
    InvalidInterval(#[from] DurationError),
    #[error(transparent)]
    UpstreamTransport(#[from] reqwest::Error),
    #[error("unexpected response status {status}: {message}")]
    UpstreamStatus { status: u16, message: String },
    #[error("bad request ({status}): {message}")]
    BadRequest { status: u16, message: String },
    #[error("{error_type}: {message}")]
    UpstreamQuery { error_type: String, message: String },
    #[error("unknown result type: {0}")]
    UnknownResultType(String),
    #[error("error decoding response: {0}")]
    Decode(String),
    #[error("exemplar query failed: {0}")]
    ExemplarFetchFailed(Box<RuntimeError>),
    #[error("failed to create client: {0}")]
    ClientConstruction(String),
    #[error("query cancelled")]
    Cancelled,
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid datasource configuration: {0}")]
    InvalidConfiguration(String),
}

/// Who is to blame for a failed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ErrorSource {
    /// The query pipeline itself or its input.
    Plugin,
    /// The metrics backend or the network in between.
    Downstream,
}

impl RuntimeError {
    pub fn error_source(&self) -> ErrorSource {
        use RuntimeError::*;
        match self {
            UpstreamTransport(_)
            | UpstreamStatus { .. }
            | BadRequest { .. }
            | UpstreamQuery { .. }
            | Timeout(_) => ErrorSource::Downstream,
            ExemplarFetchFailed(inner) => inner.error_source(),
            _ => ErrorSource::Plugin,
        }
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(err: serde_json::Error) -> Self {
        RuntimeError::Decode(err.to_string())
    }
}

impl ErrorExt for RuntimeError {
    fn status_code(&self) -> StatusCode {
        use RuntimeError::*;
        match self {
            MalformedQuery(_) | InvalidInterval(_) | BadRequest { .. } => {
                StatusCode::InvalidArguments
            }
            InvalidConfiguration(_) => StatusCode::InvalidArguments,
            UpstreamTransport(_) => StatusCode::Unavailable,
            UpstreamStatus { status, .. } if *status >= 500 => StatusCode::Unavailable,
            UpstreamStatus { .. } | UpstreamQuery { .. } => StatusCode::Downstream,
            UnknownResultType(_) => StatusCode::Unsupported,
            Decode(_) => StatusCode::Unexpected,
            ExemplarFetchFailed(inner) => inner.status_code(),
            ClientConstruction(_) => StatusCode::Internal,
            Cancelled => StatusCode::Cancelled,
            Timeout(_) => StatusCode::TimedOut,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
