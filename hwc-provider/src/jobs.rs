//! Job and order probes
//!
//! Most mutating calls return a job ID (asynchronous provisioning task) and, for prepaid
//! resources, a billing order ID. Both are tracked through their own status APIs before
//! the resource itself is polled.

use std::collections::HashMap;
use std::time::Duration;

use hwc_core::waiter::{
    ApiError, Fault, OperationHandle, PollSpec, ProbeOutcome, ProbeResult, Resolved, WaitError,
    wait_for_state_with_cancel,
};
use log::debug;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::client::ApiClient;
use crate::resources::StateTable;
use crate::utils::{pointer_str, render_path};

/// A service's job status API
#[derive(Debug)]
pub struct JobApi {
    pub service: &'static str,
    /// Path with `{project_id}` and `{job_id}` placeholders
    pub path: &'static str,
    pub status_pointer: &'static str,
    pub reason_pointer: &'static str,
    pub code_pointer: Option<&'static str>,
    pub states: StateTable,
}

/// ECS/EVS/VPC style jobs
pub static ECS_JOBS: JobApi = JobApi {
    service: "ecs",
    path: "/v1/{project_id}/jobs/{job_id}",
    status_pointer: "/status",
    reason_pointer: "/fail_reason",
    code_pointer: Some("/error_code"),
    states: StateTable {
        pending: &["INIT", "RUNNING"],
        target: &["SUCCESS"],
        failure: &["FAIL"],
    },
};

pub static RDS_JOBS: JobApi = JobApi {
    service: "rds",
    path: "/v3/{project_id}/jobs?id={job_id}",
    status_pointer: "/job/status",
    reason_pointer: "/job/fail_reason",
    code_pointer: None,
    states: StateTable {
        pending: &["Running"],
        target: &["Completed"],
        failure: &["Failed"],
    },
};

pub static DDS_JOBS: JobApi = JobApi {
    service: "dds",
    path: "/v3/{project_id}/jobs?id={job_id}",
    status_pointer: "/job/status",
    reason_pointer: "/job/fail_reason",
    code_pointer: None,
    states: StateTable {
        pending: &["Running"],
        target: &["Completed"],
        failure: &["Failed"],
    },
};

pub static CCE_JOBS: JobApi = JobApi {
    service: "cce",
    path: "/api/v3/projects/{project_id}/jobs/{job_id}",
    status_pointer: "/status/phase",
    reason_pointer: "/status/reason",
    code_pointer: None,
    states: StateTable {
        pending: &["Initializing", "Running"],
        target: &["Success"],
        failure: &["Failed"],
    },
};

/// State a job is reported in while the job API does not list it yet
pub const JOB_NOT_LISTED: &str = "NOT_LISTED";

/// Job APIs by service name
pub fn job_api(service: &str) -> Option<&'static JobApi> {
    [&ECS_JOBS, &RDS_JOBS, &DDS_JOBS, &CCE_JOBS]
        .into_iter()
        .find(|api| api.service == service)
}

impl JobApi {
    pub fn spec(&self, timeout: Duration) -> PollSpec {
        self.states.spec(timeout)
    }

    /// Spec for a job that was submitted moments ago
    ///
    /// A fresh job can take a while to appear in the job API, so the first probe waits for
    /// `initial_delay` and a job that is not listed yet counts as pending.
    pub fn submitted_spec(&self, timeout: Duration, initial_delay: Duration) -> PollSpec {
        let mut spec = self.spec(timeout).with_initial_delay(initial_delay);
        spec.pending.insert(JOB_NOT_LISTED.to_string());
        spec
    }

    /// Like [`JobApi::probe`], reporting [`JOB_NOT_LISTED`] instead of a not-found error
    pub async fn probe_submitted<C>(&self, client: &C, job_id: &str) -> ProbeOutcome<Value>
    where
        C: ApiClient + ?Sized,
    {
        match self.probe(client, job_id).await {
            Err(err) if err.is_not_found() => {
                debug!("job {} is not listed yet", job_id);
                Ok(ProbeResult::new(JOB_NOT_LISTED))
            }
            outcome => outcome,
        }
    }

    /// Read the job once
    ///
    /// A failed job carries its fail reason as the fault.
    pub async fn probe<C>(&self, client: &C, job_id: &str) -> ProbeOutcome<Value>
    where
        C: ApiClient + ?Sized,
    {
        let params = HashMap::from([
            ("project_id".to_string(), client.project_id().to_string()),
            ("job_id".to_string(), job_id.to_string()),
        ]);
        let path = render_path(self.path, &params)
            .map_err(|name| ApiError::new(format!("job path is missing {{{}}}", name)))?;

        let body = client.get(self.service, &path).await?;
        let state = pointer_str(&body, self.status_pointer).ok_or_else(|| {
            ApiError::new(format!(
                "job {} response has no status at {}",
                job_id, self.status_pointer
            ))
        })?;
        debug!("job {}: {}", job_id, state);

        let mut result = ProbeResult::new(state.as_str());
        if self.states.is_failure(&state) {
            let message = pointer_str(&body, self.reason_pointer)
                .filter(|reason| !reason.is_empty())
                .unwrap_or_else(|| format!("job {} failed without a reason", job_id));
            let mut fault = Fault::new(message);
            if let Some(pointer) = self.code_pointer
                && let Some(code) = pointer_str(&body, pointer)
            {
                fault = fault.with_code(code);
            }
            result = result.with_fault(fault);
        }
        Ok(result.with_snapshot(body))
    }
}

/// Wait for a job to finish
pub async fn wait_for_job<C>(
    client: &C,
    api: &JobApi,
    job_id: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Resolved<Value>, WaitError>
where
    C: ApiClient + ?Sized,
{
    wait_for_state_with_cancel(
        &OperationHandle::job(job_id),
        &api.spec(timeout),
        cancel,
        || api.probe(client, job_id),
    )
    .await
}

// =============================================================================
// Orders
// =============================================================================

pub const ORDER_SERVICE: &str = "bss";
pub const ORDER_PATH: &str = "/v2/orders/customer-orders/details/{order_id}";
pub const ORDER_STATUS_POINTER: &str = "/order_info/status";

/// Order states. An unpaid order never completes on its own, so it fails the wait.
pub static ORDER_STATES: StateTable = StateTable {
    pending: &["PENDING_APPROVAL", "PROCESSING", "PENDING_CONFIRMATION"],
    target: &["COMPLETED"],
    failure: &["CANCELED", "PENDING_PAYMENT"],
};

/// Label for a numeric BSS order status
pub fn order_status_label(status: i64) -> String {
    match status {
        1 => "PENDING_APPROVAL".to_string(),
        3 => "PROCESSING".to_string(),
        4 => "CANCELED".to_string(),
        5 => "COMPLETED".to_string(),
        6 => "PENDING_PAYMENT".to_string(),
        9 => "PENDING_CONFIRMATION".to_string(),
        other => format!("UNKNOWN({})", other),
    }
}

pub fn order_spec(timeout: Duration) -> PollSpec {
    ORDER_STATES.spec(timeout)
}

/// Read a billing order once
pub async fn probe_order<C>(client: &C, order_id: &str) -> ProbeOutcome<Value>
where
    C: ApiClient + ?Sized,
{
    let params = HashMap::from([("order_id".to_string(), order_id.to_string())]);
    let path = render_path(ORDER_PATH, &params)
        .map_err(|name| ApiError::new(format!("order path is missing {{{}}}", name)))?;

    let body = client.get(ORDER_SERVICE, &path).await?;
    let status = body
        .pointer(ORDER_STATUS_POINTER)
        .and_then(Value::as_i64)
        .ok_or_else(|| ApiError::new(format!("order {} response has no status", order_id)))?;
    let state = order_status_label(status);
    debug!("order {}: {} ({})", order_id, state, status);

    let mut result = ProbeResult::new(state.as_str());
    match state.as_str() {
        "CANCELED" => {
            result = result.with_fault(Fault::new(format!("order {} was canceled", order_id)));
        }
        "PENDING_PAYMENT" => {
            result = result.with_fault(Fault::new(format!(
                "order {} is waiting for payment; pay it or enable auto-pay",
                order_id
            )));
        }
        _ => {}
    }
    Ok(result.with_snapshot(body))
}

/// Wait for a billing order to complete
pub async fn wait_for_order<C>(
    client: &C,
    order_id: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Resolved<Value>, WaitError>
where
    C: ApiClient + ?Sized,
{
    wait_for_state_with_cancel(
        &OperationHandle::order(order_id),
        &order_spec(timeout),
        cancel,
        || probe_order(client, order_id),
    )
    .await
}
