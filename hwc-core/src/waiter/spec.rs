//! Poll parameters - which states to wait through, which to wait for, and for how long

use std::collections::BTreeSet;
use std::time::Duration;

use super::error::WaitError;

/// Default overall wait time (matches the provider's default operation timeouts)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Default delay between two probes
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Describes how one poll loop classifies observed states and paces itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSpec {
    /// States that mean "still in progress". Empty means any non-target state is pending.
    pub pending: BTreeSet<String>,
    /// States that mean "done"
    pub target: BTreeSet<String>,
    /// States that mean the remote operation failed
    pub failure: BTreeSet<String>,
    /// Upper bound on total wall-clock time, including `initial_delay`
    pub timeout: Duration,
    /// Grace period before the first probe
    pub initial_delay: Duration,
    pub interval: Duration,
    /// State label a not-found probe error resolves to (e.g., "DELETED")
    pub not_found: Option<String>,
    /// Number of consecutive probes that must observe a target state
    pub continuous_target_occurrences: u32,
}

impl PollSpec {
    /// Create a spec waiting for any of the given target states
    pub fn new<I, S>(target: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pending: BTreeSet::new(),
            target: target.into_iter().map(Into::into).collect(),
            failure: BTreeSet::new(),
            timeout: DEFAULT_TIMEOUT,
            initial_delay: Duration::ZERO,
            interval: DEFAULT_INTERVAL,
            not_found: None,
            continuous_target_occurrences: 1,
        }
    }

    pub fn with_pending<I, S>(mut self, pending: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending = pending.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_failure<I, S>(mut self, failure: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failure = failure.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Treat a not-found probe error as reaching `state`, which must be a target state
    pub fn with_not_found(mut self, state: impl Into<String>) -> Self {
        self.not_found = Some(state.into());
        self
    }

    pub fn with_continuous_target_occurrences(mut self, occurrences: u32) -> Self {
        self.continuous_target_occurrences = occurrences;
        self
    }

    pub fn is_target(&self, state: &str) -> bool {
        self.target.contains(state)
    }

    pub fn is_failure(&self, state: &str) -> bool {
        self.failure.contains(state)
    }

    /// Whether `state` means "keep waiting"
    ///
    /// With an empty pending set every state that is neither target nor failure is pending.
    pub fn is_pending(&self, state: &str) -> bool {
        if self.pending.is_empty() {
            !self.is_target(state) && !self.is_failure(state)
        } else {
            self.pending.contains(state)
        }
    }

    /// Check the spec's invariants
    pub fn validate(&self) -> Result<(), WaitError> {
        if self.target.is_empty() {
            return Err(WaitError::InvalidSpec(
                "at least one target state is required".to_string(),
            ));
        }
        if let Some(state) = self.pending.intersection(&self.target).next() {
            return Err(WaitError::InvalidSpec(format!(
                "state {:?} is both pending and target",
                state
            )));
        }
        if let Some(state) = self.failure.intersection(&self.target).next() {
            return Err(WaitError::InvalidSpec(format!(
                "state {:?} is both failure and target",
                state
            )));
        }
        if let Some(state) = self.failure.intersection(&self.pending).next() {
            return Err(WaitError::InvalidSpec(format!(
                "state {:?} is both failure and pending",
                state
            )));
        }
        if self.interval.is_zero() {
            return Err(WaitError::InvalidSpec(
                "interval must be greater than zero".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(WaitError::InvalidSpec(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if self.continuous_target_occurrences == 0 {
            return Err(WaitError::InvalidSpec(
                "continuous target occurrences must be at least 1".to_string(),
            ));
        }
        if let Some(state) = &self.not_found
            && !self.is_target(state)
        {
            return Err(WaitError::InvalidSpec(format!(
                "not-found state {:?} is not a target state",
                state
            )));
        }
        Ok(())
    }

    pub(crate) fn pending_list(&self) -> Vec<String> {
        self.pending.iter().cloned().collect()
    }

    pub(crate) fn target_list(&self) -> Vec<String> {
        self.target.iter().cloned().collect()
    }
}
