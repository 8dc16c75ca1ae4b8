//! Probe results - one observation of a remote operation's status

use std::fmt;
use std::future::Future;

use super::error::ApiError;

/// Diagnostic payload attached to a remote failure state
///
/// Carries the vendor's own text so it can be surfaced verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub code: Option<String>,
    pub message: String,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Result of a single status query
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult<T> {
    /// Current state label as reported by the remote API
    pub state: String,
    /// Snapshot of the resource at the time of the probe
    pub snapshot: Option<T>,
    /// Failure payload reported alongside the state, if any
    pub fault: Option<Fault>,
}

impl<T> ProbeResult<T> {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            snapshot: None,
            fault: None,
        }
    }

    pub fn with_snapshot(mut self, snapshot: T) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }
}

/// Outcome of a probe invocation: an observation, or the transport/API error that prevented one
pub type ProbeOutcome<T> = Result<ProbeResult<T>, ApiError>;

/// A status prober: queries the remote system once per call
///
/// Implemented for every `FnMut() -> impl Future<Output = ProbeOutcome<T>>`, so call sites
/// usually pass a closure capturing the client and handle they need.
pub trait Probe<T> {
    fn probe(&mut self) -> impl Future<Output = ProbeOutcome<T>> + Send;
}

impl<T, F, Fut> Probe<T> for F
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProbeOutcome<T>> + Send,
{
    fn probe(&mut self) -> impl Future<Output = ProbeOutcome<T>> + Send {
        self()
    }
}
