//! Poll loop - drives one asynchronous operation to a target state
//!
//! Each call owns its own clock and counters; nothing is shared between waits, so any
//! number of waits can run concurrently on separate tasks.

use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::WaitError;
use super::handle::OperationHandle;
use super::probe::{Fault, Probe, ProbeResult};
use super::spec::PollSpec;

/// A successfully completed wait
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    /// The target state that ended the wait
    pub state: String,
    /// Snapshot from the probe that resolved the wait (`None` for not-found resolution)
    pub snapshot: Option<T>,
    /// Number of probes issued
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Poll `probe` until it reports a target state, fails, or `spec.timeout` elapses
pub async fn wait_for_state<T, P>(
    handle: &OperationHandle,
    spec: &PollSpec,
    probe: P,
) -> Result<Resolved<T>, WaitError>
where
    P: Probe<T>,
{
    poll(handle, spec, None, probe).await
}

/// Same as [`wait_for_state`], aborting early with [`WaitError::Canceled`] once `cancel` fires
pub async fn wait_for_state_with_cancel<T, P>(
    handle: &OperationHandle,
    spec: &PollSpec,
    cancel: &CancellationToken,
    probe: P,
) -> Result<Resolved<T>, WaitError>
where
    P: Probe<T>,
{
    poll(handle, spec, Some(cancel), probe).await
}

pub(crate) async fn poll<T, P>(
    handle: &OperationHandle,
    spec: &PollSpec,
    cancel: Option<&CancellationToken>,
    mut probe: P,
) -> Result<Resolved<T>, WaitError>
where
    P: Probe<T>,
{
    spec.validate()?;

    let start = Instant::now();
    let deadline = start + spec.timeout;
    let mut last_state: Option<String> = None;
    let mut attempts = 0u32;
    let mut target_streak = 0u32;

    debug!(
        "waiting for {} to reach {:?} (timeout {:?})",
        handle, spec.target, spec.timeout
    );

    if !spec.initial_delay.is_zero()
        && let Err(interrupt) = bounded(
            tokio::time::sleep(spec.initial_delay),
            deadline,
            cancel,
        )
        .await
    {
        return Err(interrupt.into_error(handle, spec, start, last_state));
    }

    loop {
        if Instant::now() >= deadline {
            return Err(Interrupt::Deadline.into_error(handle, spec, start, last_state));
        }

        attempts += 1;
        let outcome = match bounded(probe.probe(), deadline, cancel).await {
            Ok(outcome) => outcome,
            Err(interrupt) => return Err(interrupt.into_error(handle, spec, start, last_state)),
        };

        match outcome {
            Err(err) => {
                if err.is_not_found()
                    && let Some(state) = &spec.not_found
                {
                    info!("{} is gone, treating as {}", handle, state);
                    return Ok(Resolved {
                        state: state.clone(),
                        snapshot: None,
                        attempts,
                        elapsed: start.elapsed(),
                    });
                }
                warn!("probing {} failed: {}", handle, err);
                return Err(WaitError::Probe {
                    handle: handle.clone(),
                    source: err,
                });
            }
            Ok(ProbeResult {
                state,
                snapshot,
                fault,
            }) => {
                debug!("{} is {} (attempt {})", handle, state, attempts);
                last_state = Some(state.clone());

                if spec.is_target(&state) {
                    target_streak += 1;
                    if target_streak >= spec.continuous_target_occurrences {
                        info!(
                            "{} reached {} after {} probe(s)",
                            handle, state, attempts
                        );
                        return Ok(Resolved {
                            state,
                            snapshot,
                            attempts,
                            elapsed: start.elapsed(),
                        });
                    }
                } else {
                    target_streak = 0;

                    if let Some(fault) = fault {
                        warn!("{} failed in state {}: {}", handle, state, fault);
                        return Err(WaitError::Failed {
                            handle: handle.clone(),
                            state,
                            fault,
                        });
                    }
                    if spec.is_failure(&state) {
                        warn!("{} failed in state {}", handle, state);
                        let fault = Fault::new(format!("{} reported no further detail", handle));
                        return Err(WaitError::Failed {
                            handle: handle.clone(),
                            state,
                            fault,
                        });
                    }
                    if !spec.is_pending(&state) {
                        warn!("{} reported unexpected state {}", handle, state);
                        return Err(WaitError::UnexpectedState {
                            handle: handle.clone(),
                            state,
                            pending: spec.pending_list(),
                            target: spec.target_list(),
                        });
                    }
                }
            }
        }

        if let Err(interrupt) = bounded(tokio::time::sleep(spec.interval), deadline, cancel).await
        {
            return Err(interrupt.into_error(handle, spec, start, last_state));
        }
    }
}

/// Why a sleep or probe did not run to completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Deadline,
    Canceled,
}

impl Interrupt {
    fn into_error(
        self,
        handle: &OperationHandle,
        spec: &PollSpec,
        start: Instant,
        last_state: Option<String>,
    ) -> WaitError {
        let elapsed = start.elapsed();
        match self {
            Interrupt::Deadline => {
                warn!(
                    "timed out waiting for {} after {:?} (last state: {:?})",
                    handle, elapsed, last_state
                );
                WaitError::Timeout {
                    handle: handle.clone(),
                    timeout: spec.timeout,
                    elapsed,
                    last_state,
                }
            }
            Interrupt::Canceled => {
                info!("wait for {} canceled after {:?}", handle, elapsed);
                WaitError::Canceled {
                    handle: handle.clone(),
                    elapsed,
                    last_state,
                }
            }
        }
    }
}

/// Run `fut` until it completes, the deadline passes, or the token is canceled
async fn bounded<F: Future>(
    fut: F,
    deadline: Instant,
    cancel: Option<&CancellationToken>,
) -> Result<F::Output, Interrupt> {
    tokio::select! {
        biased;
        _ = canceled(cancel) => Err(Interrupt::Canceled),
        result = tokio::time::timeout_at(deadline, fut) => result.map_err(|_| Interrupt::Deadline),
    }
}

async fn canceled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waiter::error::ApiError;
    use crate::waiter::probe::ProbeOutcome;
    use std::future::{Ready, ready};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Probe replaying `outcomes` in order, repeating the last one; each snapshot is the call index
    fn scripted(
        outcomes: Vec<ProbeOutcome<()>>,
    ) -> (
        impl FnMut() -> Ready<ProbeOutcome<usize>>,
        Arc<AtomicUsize>,
    ) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let probe = move || {
            let index = counter.fetch_add(1, Ordering::SeqCst);
            let outcome = outcomes
                .get(index)
                .or_else(|| outcomes.last())
                .cloned()
                .unwrap_or_else(|| Err(ApiError::new("empty script")));
            ready(outcome.map(|result| ProbeResult {
                state: result.state,
                snapshot: Some(index),
                fault: result.fault,
            }))
        };
        (probe, calls)
    }

    fn states(states: &[&str]) -> Vec<ProbeOutcome<()>> {
        states.iter().map(|s| Ok(ProbeResult::new(*s))).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_with_snapshot_from_resolving_probe() {
        let handle = OperationHandle::resource("instance-1");
        let spec = PollSpec::new(["Available"])
            .with_pending(["Creating"])
            .with_interval(Duration::from_secs(1))
            .with_timeout(Duration::from_secs(10));
        let (probe, calls) = scripted(states(&["Creating", "Creating", "Available"]));

        let resolved = wait_for_state(&handle, &spec, probe).await.unwrap();

        assert_eq!(resolved.state, "Available");
        assert_eq!(resolved.snapshot, Some(2));
        assert_eq!(resolved.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(resolved.elapsed >= Duration::from_secs(2));
        assert!(resolved.elapsed < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_naming_last_state() {
        let handle = OperationHandle::resource("nat-1");
        let spec = PollSpec::new(["ACTIVE"])
            .with_pending(["PENDING_CREATE"])
            .with_interval(Duration::from_secs(2))
            .with_timeout(Duration::from_secs(9));
        let (probe, calls) = scripted(states(&["PENDING_CREATE"]));

        let err = wait_for_state(&handle, &spec, probe).await.unwrap_err();

        match &err {
            WaitError::Timeout {
                last_state,
                timeout,
                elapsed,
                ..
            } => {
                assert_eq!(last_state.as_deref(), Some("PENDING_CREATE"));
                assert_eq!(*timeout, Duration::from_secs(9));
                assert!(*elapsed >= Duration::from_secs(9));
            }
            other => panic!("Expected Timeout, got {:?}", other),
        }
        assert!(err.to_string().contains("PENDING_CREATE"));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_state_is_fatal() {
        let handle = OperationHandle::resource("zone-1");
        let spec = PollSpec::new(["ACTIVE"])
            .with_pending(["PENDING_CREATE"])
            .with_interval(Duration::from_secs(1));
        let (probe, calls) = scripted(states(&["PENDING_CREATE", "FROZEN"]));

        let err = wait_for_state(&handle, &spec, probe).await.unwrap_err();

        match err {
            WaitError::UnexpectedState { state, target, .. } => {
                assert_eq!(state, "FROZEN");
                assert_eq!(target, vec!["ACTIVE".to_string()]);
            }
            other => panic!("Expected UnexpectedState, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_resolves_when_mapped() {
        let handle = OperationHandle::resource("zone-1");
        let spec = PollSpec::new(["DELETED"])
            .with_pending(["PENDING_DELETE"])
            .with_not_found("DELETED")
            .with_interval(Duration::from_secs(1));
        let (probe, _) = scripted(vec![
            Ok(ProbeResult::new("PENDING_DELETE")),
            Err(ApiError::new("zone not found").with_status(404)),
        ]);

        let resolved = wait_for_state(&handle, &spec, probe).await.unwrap();

        assert_eq!(resolved.state, "DELETED");
        assert_eq!(resolved.snapshot, None);
        assert_eq!(resolved.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_without_mapping_is_fatal() {
        let handle = OperationHandle::resource("zone-1");
        let spec = PollSpec::new(["ACTIVE"]).with_interval(Duration::from_secs(1));
        let (probe, calls) = scripted(vec![Err(
            ApiError::new("zone not found").with_status(404)
        )]);

        let err = wait_for_state(&handle, &spec, probe).await.unwrap_err();

        match err {
            WaitError::Probe { source, .. } => assert!(source.is_not_found()),
            other => panic!("Expected Probe, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_errors_are_not_retried() {
        let handle = OperationHandle::job("job-1");
        let spec = PollSpec::new(["SUCCESS"]).with_interval(Duration::from_secs(1));
        let (probe, calls) = scripted(vec![Err(
            ApiError::new("internal error").with_status(500)
        )]);

        let err = wait_for_state(&handle, &spec, probe).await.unwrap_err();

        assert_eq!(
            err.api_error(),
            Some(&ApiError::new("internal error").with_status(500))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fault_payload_is_surfaced_verbatim() {
        let handle = OperationHandle::resource("rds-1");
        let spec = PollSpec::new(["ACTIVE"]).with_interval(Duration::from_secs(1));
        let (probe, _) = scripted(vec![Ok(ProbeResult::new("ERROR")
            .with_fault(Fault::new("quota exceeded").with_code("500")))]);

        let err = wait_for_state(&handle, &spec, probe).await.unwrap_err();

        assert!(matches!(err, WaitError::Failed { ref state, .. } if state == "ERROR"));
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_state_without_fault_is_fatal() {
        let handle = OperationHandle::job("job-1");
        let spec = PollSpec::new(["SUCCESS"])
            .with_pending(["RUNNING"])
            .with_failure(["FAIL"])
            .with_interval(Duration::from_secs(1));
        let (probe, calls) = scripted(states(&["RUNNING", "FAIL"]));

        let err = wait_for_state(&handle, &spec, probe).await.unwrap_err();

        assert!(matches!(err, WaitError::Failed { ref state, .. } if state == "FAIL"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_delay_counts_toward_timeout() {
        let handle = OperationHandle::resource("instance-1");
        let spec = PollSpec::new(["ACTIVE"])
            .with_initial_delay(Duration::from_secs(5))
            .with_timeout(Duration::from_secs(3));
        let (probe, calls) = scripted(states(&["ACTIVE"]));

        let err = wait_for_state(&handle, &spec, probe).await.unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_delay_precedes_first_probe() {
        let handle = OperationHandle::resource("instance-1");
        let spec = PollSpec::new(["ACTIVE"])
            .with_initial_delay(Duration::from_secs(4))
            .with_timeout(Duration::from_secs(30));
        let (probe, _) = scripted(states(&["ACTIVE"]));

        let resolved = wait_for_state(&handle, &spec, probe).await.unwrap();

        assert_eq!(resolved.attempts, 1);
        assert!(resolved.elapsed >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probe_is_bounded_by_timeout() {
        let handle = OperationHandle::resource("instance-1");
        let spec = PollSpec::new(["ACTIVE"]).with_timeout(Duration::from_secs(10));
        let probe = || async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, ApiError>(ProbeResult::<()>::new("ACTIVE"))
        };

        let err = wait_for_state(&handle, &spec, probe).await.unwrap_err();

        match err {
            WaitError::Timeout { last_state, .. } => assert_eq!(last_state, None),
            other => panic!("Expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_distinct_from_timeout() {
        let handle = OperationHandle::resource("cluster-1");
        let spec = PollSpec::new(["Available"])
            .with_interval(Duration::from_secs(1))
            .with_timeout(Duration::from_secs(60));
        let (probe, _) = scripted(states(&["Creating"]));
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(3500)).await;
            trigger.cancel();
        });

        let err = wait_for_state_with_cancel(&handle, &spec, &token, probe)
            .await
            .unwrap_err();

        match &err {
            WaitError::Canceled {
                elapsed,
                last_state,
                ..
            } => {
                assert!(*elapsed < Duration::from_secs(60));
                assert_eq!(last_state.as_deref(), Some("Creating"));
            }
            other => panic!("Expected Canceled, got {:?}", other),
        }
        assert!(err.is_canceled());
        assert!(!err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_target_occurrences_require_a_streak() {
        let handle = OperationHandle::resource("instance-1");
        let spec = PollSpec::new(["ACTIVE"])
            .with_pending(["BUILD"])
            .with_continuous_target_occurrences(2)
            .with_interval(Duration::from_secs(1));
        let (probe, _) = scripted(states(&["ACTIVE", "BUILD", "ACTIVE", "ACTIVE"]));

        let resolved = wait_for_state(&handle, &spec, probe).await.unwrap();

        assert_eq!(resolved.attempts, 4);
        assert_eq!(resolved.snapshot, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_spec_never_probes() {
        let handle = OperationHandle::resource("instance-1");
        let spec = PollSpec::new(["ACTIVE"]).with_pending(["ACTIVE"]);
        let (probe, calls) = scripted(states(&["ACTIVE"]));

        let err = wait_for_state(&handle, &spec, probe).await.unwrap_err();

        assert!(matches!(err, WaitError::InvalidSpec(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
