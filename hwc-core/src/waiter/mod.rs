//! Asynchronous operation polling engine
//!
//! A mutating API call hands back an [`OperationHandle`]; the caller then drives that
//! operation to completion with [`wait_for_state`] (one stage) or a [`WaitChain`]
//! (several dependent stages). Submissions the API rejects only because a prerequisite is
//! still transitioning go through [`submit_with_retry`] with a [`RetryClassifier`].
//!
//! # Example
//!
//! ```ignore
//! use hwc_core::waiter::{OperationHandle, PollSpec, ProbeResult, wait_for_state};
//!
//! let handle = OperationHandle::resource(&zone_id);
//! let spec = PollSpec::new(["ACTIVE"])
//!     .with_pending(["PENDING_CREATE"])
//!     .with_failure(["ERROR"])
//!     .with_timeout(timeouts.create);
//!
//! let resolved = wait_for_state(&handle, &spec, || async {
//!     let zone = client.get("dns", &format!("/v2/zones/{}", zone_id)).await?;
//!     Ok(ProbeResult::new(zone["status"].as_str().unwrap_or_default()).with_snapshot(zone))
//! })
//! .await?;
//! ```

pub mod chain;
pub mod error;
pub mod handle;
pub mod probe;
pub mod refresh;
pub mod retry;
pub mod spec;

pub use chain::{WaitChain, WaitStep};
pub use error::{ApiError, WaitError};
pub use handle::{OperationHandle, OperationKind};
pub use probe::{Fault, Probe, ProbeOutcome, ProbeResult};
pub use refresh::{Resolved, wait_for_state, wait_for_state_with_cancel};
pub use retry::{
    ForbiddenWhileTransitioning, RetryClassifier, RetryDecision, RetryPolicy, submit_with_retry,
};
pub use spec::PollSpec;
