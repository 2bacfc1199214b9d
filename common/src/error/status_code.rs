use strum::{AsRefStr, Display};

/// Common status code for errors surfaced to callers of the query pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum StatusCode {
    /// Success.
    Success,
    /// Unknown error.
    Unknown,
    /// Unsupported operation.
    Unsupported,
    /// Unexpected error, maybe there is a BUG.
    Unexpected,
    /// Internal server error.
    Internal,
    /// Invalid arguments.
    InvalidArguments,
    /// The task is cancelled.
    Cancelled,
    /// The operation did not finish in time.
    TimedOut,
    /// A downstream service could not be reached.
    Unavailable,
    /// A downstream service answered with an error.
    Downstream,
}

impl StatusCode {
    pub fn is_success(&self) -> bool {
        matches!(self, StatusCode::Success)
    }

    /// Returns `true` if the same request may succeed when issued again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StatusCode::TimedOut | StatusCode::Unavailable)
    }
}
