//! Error types for the polling engine

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::handle::OperationHandle;
use super::probe::Fault;

/// Error returned by a remote API call (submission or status read)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status code, if the request reached the server
    pub status: Option<u16>,
    /// Vendor error code (e.g., "CCE.01400001")
    pub code: Option<String>,
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    pub fn is_forbidden(&self) -> bool {
        self.status == Some(403)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, &self.code) {
            (Some(status), Some(code)) => write!(f, "HTTP {} ({}): {}", status, code, self.message),
            (Some(status), None) => write!(f, "HTTP {}: {}", status, self.message),
            (None, Some(code)) => write!(f, "{}: {}", code, self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ApiError {}

/// Errors produced while driving an asynchronous operation to completion
#[derive(Debug, Error)]
pub enum WaitError {
    /// The poll parameters violate their invariants
    #[error("invalid poll spec: {0}")]
    InvalidSpec(String),

    /// The status probe itself failed
    #[error("failed to probe {handle}: {source}")]
    Probe {
        handle: OperationHandle,
        #[source]
        source: ApiError,
    },

    /// The remote side reported a failure state
    #[error("{handle} entered failure state {state}: {fault}")]
    Failed {
        handle: OperationHandle,
        state: String,
        fault: Fault,
    },

    /// The remote side reported a state that is neither pending nor target
    #[error("{handle} reported unexpected state {state:?} (pending: {pending:?}, target: {target:?})")]
    UnexpectedState {
        handle: OperationHandle,
        state: String,
        pending: Vec<String>,
        target: Vec<String>,
    },

    #[error(
        "timeout while waiting for {handle}: gave up after {elapsed:?} (timeout: {timeout:?}, last state: {})",
        .last_state.as_deref().unwrap_or("<none>")
    )]
    Timeout {
        handle: OperationHandle,
        timeout: Duration,
        elapsed: Duration,
        last_state: Option<String>,
    },

    #[error(
        "wait for {handle} canceled after {elapsed:?} (last state: {})",
        .last_state.as_deref().unwrap_or("<none>")
    )]
    Canceled {
        handle: OperationHandle,
        elapsed: Duration,
        last_state: Option<String>,
    },

    /// One step of a composite wait failed; later steps were not run
    #[error("step {index} ({name}) failed: {source}")]
    Step {
        /// 1-based position of the failed step
        index: usize,
        name: String,
        #[source]
        source: Box<WaitError>,
    },

    /// Submission failed with an error the classifier did not consider retryable
    #[error("submission failed after {attempts} attempt(s): {source}")]
    Submit {
        attempts: u32,
        #[source]
        source: ApiError,
    },

    /// Submission kept failing with a retryable error until the retry budget ran out
    #[error("submission still rejected after {attempts} attempt(s) in {elapsed:?}: {source}")]
    RetryExhausted {
        attempts: u32,
        elapsed: Duration,
        #[source]
        source: ApiError,
    },
}

impl WaitError {
    pub fn is_timeout(&self) -> bool {
        match self {
            WaitError::Timeout { .. } => true,
            WaitError::Step { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    pub fn is_canceled(&self) -> bool {
        match self {
            WaitError::Canceled { .. } => true,
            WaitError::Step { source, .. } => source.is_canceled(),
            _ => false,
        }
    }

    /// The underlying API error, if this failure originated from one
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            WaitError::Probe { source, .. }
            | WaitError::Submit { source, .. }
            | WaitError::RetryExhausted { source, .. } => Some(source),
            WaitError::Step { source, .. } => source.api_error(),
            _ => None,
        }
    }
}
