//! Composite wait - sequential poll loops for multi-stage operations
//!
//! Creating a prepaid database, for example, first waits for the provisioning job, then for
//! the billing order, then for the instance itself to become ACTIVE. Each stage only means
//! something once the previous one has reached its target, so steps run strictly in order
//! and the first failure stops the chain. No rollback is attempted here.

use std::future::Future;
use std::time::Duration;

use log::{info, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::WaitError;
use super::handle::OperationHandle;
use super::probe::ProbeOutcome;
use super::refresh::{Resolved, poll};
use super::spec::PollSpec;
use crate::provider::BoxFuture;

type BoxProbe<'a, T> = Box<dyn FnMut() -> BoxFuture<'a, ProbeOutcome<T>> + Send + 'a>;

/// One stage of a [`WaitChain`]
pub struct WaitStep<'a, T> {
    name: String,
    handle: OperationHandle,
    spec: PollSpec,
    probe: BoxProbe<'a, T>,
}

impl<'a, T> WaitStep<'a, T> {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        handle: OperationHandle,
        spec: PollSpec,
        mut probe: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'a,
        Fut: Future<Output = ProbeOutcome<T>> + Send + 'a,
    {
        Self {
            name: name.into(),
            handle,
            spec,
            probe: Box::new(move || -> BoxFuture<'a, ProbeOutcome<T>> { Box::pin(probe()) }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &OperationHandle {
        &self.handle
    }
}

impl<T> std::fmt::Debug for WaitStep<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitStep")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// Ordered sequence of waits sharing one operation context
pub struct WaitChain<'a, T> {
    steps: Vec<WaitStep<'a, T>>,
    cancel: Option<CancellationToken>,
    timeout: Option<Duration>,
}

impl<T> Default for WaitChain<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T> WaitChain<'a, T> {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            cancel: None,
            timeout: None,
        }
    }

    /// Append a step
    pub fn then(mut self, step: WaitStep<'a, T>) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a step built from its parts
    pub fn step<F, Fut>(
        self,
        name: impl Into<String>,
        handle: OperationHandle,
        spec: PollSpec,
        probe: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'a,
        Fut: Future<Output = ProbeOutcome<T>> + Send + 'a,
    {
        self.then(WaitStep::new(name, handle, spec, probe))
    }

    /// Abort whichever step is running when `token` is canceled
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Bound the whole chain; each step gets at most what is left of `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[WaitStep<'a, T>] {
        &self.steps
    }

    /// Run every step in order and return the last step's result
    ///
    /// All specs are validated before the first probe, so a malformed later step cannot
    /// leave the operation half-waited.
    pub async fn run(self) -> Result<Resolved<T>, WaitError> {
        if self.steps.is_empty() {
            return Err(WaitError::InvalidSpec(
                "wait chain has no steps".to_string(),
            ));
        }

        for (i, step) in self.steps.iter().enumerate() {
            if let Err(err) = step.spec.validate() {
                return Err(WaitError::Step {
                    index: i + 1,
                    name: step.name.clone(),
                    source: Box::new(err),
                });
            }
        }

        let total = self.steps.len();
        let start = Instant::now();
        let deadline = self.timeout.map(|t| start + t);
        let mut last = None;

        for (i, step) in self.steps.into_iter().enumerate() {
            let WaitStep {
                name,
                handle,
                spec,
                probe,
            } = step;

            let spec = match (deadline, self.timeout) {
                (Some(deadline), Some(budget)) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        warn!("step {}/{} ({}): no time left for {}", i + 1, total, name, handle);
                        return Err(WaitError::Step {
                            index: i + 1,
                            name,
                            source: Box::new(WaitError::Timeout {
                                handle,
                                timeout: budget,
                                elapsed: start.elapsed(),
                                last_state: None,
                            }),
                        });
                    }
                    let timeout = spec.timeout.min(remaining);
                    spec.with_timeout(timeout)
                }
                _ => spec,
            };

            info!("step {}/{} ({}): waiting for {}", i + 1, total, name, handle);

            match poll(&handle, &spec, self.cancel.as_ref(), probe).await {
                Ok(resolved) => last = Some(resolved),
                Err(err) => {
                    return Err(WaitError::Step {
                        index: i + 1,
                        name,
                        source: Box::new(err),
                    });
                }
            }
        }

        last.ok_or_else(|| WaitError::InvalidSpec("wait chain has no steps".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waiter::error::ApiError;
    use crate::waiter::probe::ProbeResult;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast(spec: PollSpec) -> PollSpec {
        spec.with_interval(Duration::from_secs(1))
            .with_timeout(Duration::from_secs(30))
    }

    #[tokio::test(start_paused = true)]
    async fn failed_step_short_circuits_the_rest() {
        let instance_calls = Arc::new(AtomicU32::new(0));
        let calls = instance_calls.clone();

        let chain = WaitChain::new()
            .step(
                "job",
                OperationHandle::job("job-1"),
                fast(PollSpec::new(["Completed"])),
                || async { Err(ApiError::new("job service unavailable").with_status(503)) },
            )
            .step(
                "instance",
                OperationHandle::resource("instance-1"),
                fast(PollSpec::new(["ACTIVE"])),
                move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(ProbeResult::<&str>::new("ACTIVE")) }
                },
            );

        let err = chain.run().await.unwrap_err();

        match &err {
            WaitError::Step { index, name, source } => {
                assert_eq!(*index, 1);
                assert_eq!(name, "job");
                assert!(matches!(**source, WaitError::Probe { .. }));
            }
            other => panic!("Expected Step, got {:?}", other),
        }
        assert_eq!(instance_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_final_step_snapshot() {
        let order_calls = Arc::new(AtomicU32::new(0));
        let calls = order_calls.clone();

        let resolved = WaitChain::new()
            .step(
                "order",
                OperationHandle::order("CS-1"),
                fast(PollSpec::new(["COMPLETED"]).with_pending(["PROCESSING"])),
                move || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        let state = if n < 1 { "PROCESSING" } else { "COMPLETED" };
                        Ok(ProbeResult::new(state).with_snapshot("order"))
                    }
                },
            )
            .step(
                "instance",
                OperationHandle::resource("instance-1"),
                fast(PollSpec::new(["ACTIVE"])),
                || async { Ok(ProbeResult::new("ACTIVE").with_snapshot("instance")) },
            )
            .run()
            .await
            .unwrap();

        assert_eq!(resolved.state, "ACTIVE");
        assert_eq!(resolved.snapshot, Some("instance"));
        assert_eq!(order_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_which_step_timed_out() {
        let err = WaitChain::new()
            .step(
                "job",
                OperationHandle::job("job-1"),
                fast(PollSpec::new(["Completed"])),
                || async { Ok(ProbeResult::<()>::new("Completed")) },
            )
            .step(
                "instance",
                OperationHandle::resource("instance-1"),
                fast(PollSpec::new(["ACTIVE"]).with_pending(["BUILD"])),
                || async { Ok(ProbeResult::<()>::new("BUILD")) },
            )
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, WaitError::Step { index: 2, .. }));
        assert!(err.is_timeout());
        assert!(err.to_string().contains("BUILD"));
    }

    #[tokio::test]
    async fn invalid_later_step_runs_nothing() {
        let job_calls = Arc::new(AtomicU32::new(0));
        let calls = job_calls.clone();

        let err = WaitChain::new()
            .step(
                "job",
                OperationHandle::job("job-1"),
                fast(PollSpec::new(["Completed"])),
                move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(ProbeResult::<()>::new("Completed")) }
                },
            )
            .step(
                "instance",
                OperationHandle::resource("instance-1"),
                PollSpec::new(Vec::<String>::new()),
                || async { Ok(ProbeResult::<()>::new("ACTIVE")) },
            )
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, WaitError::Step { index: 2, .. }));
        assert_eq!(job_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn overall_timeout_is_shared_between_steps() {
        let instance_calls = Arc::new(AtomicU32::new(0));
        let calls = instance_calls.clone();

        let err = WaitChain::new()
            .step(
                "job",
                OperationHandle::job("job-1"),
                fast(PollSpec::new(["Completed"]).with_pending(["Running"])),
                || async { Ok(ProbeResult::<()>::new("Running")) },
            )
            .step(
                "instance",
                OperationHandle::resource("instance-1"),
                fast(PollSpec::new(["ACTIVE"])),
                move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(ProbeResult::<()>::new("ACTIVE")) }
                },
            )
            .with_timeout(Duration::from_secs(10))
            .run()
            .await
            .unwrap_err();

        match &err {
            WaitError::Step { index, source, .. } => {
                assert_eq!(*index, 1);
                match &**source {
                    WaitError::Timeout { timeout, .. } => {
                        assert_eq!(*timeout, Duration::from_secs(10))
                    }
                    other => panic!("Expected Timeout, got {:?}", other),
                }
            }
            other => panic!("Expected Step, got {:?}", other),
        }
        assert_eq!(instance_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_chain_is_invalid() {
        let err = WaitChain::<()>::new().run().await.unwrap_err();
        assert!(matches!(err, WaitError::InvalidSpec(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_token_applies_to_running_step() {
        let token = CancellationToken::new();
        token.cancel();

        let err = WaitChain::new()
            .step(
                "instance",
                OperationHandle::resource("instance-1"),
                fast(PollSpec::new(["ACTIVE"])),
                || async { Ok(ProbeResult::<()>::new("BUILD")) },
            )
            .with_cancel(token)
            .run()
            .await
            .unwrap_err();

        assert!(err.is_canceled());
    }

    #[test]
    fn chain_reports_its_steps() {
        let chain = WaitChain::new().step(
            "job",
            OperationHandle::job("job-1"),
            PollSpec::new(["SUCCESS"]),
            || async { Ok(ProbeResult::<()>::new("SUCCESS")) },
        );
        assert_eq!(chain.len(), 1);
        assert!(!chain.is_empty());
        assert_eq!(chain.steps()[0].name(), "job");
        assert_eq!(chain.steps()[0].handle(), &OperationHandle::job("job-1"));
    }
}
