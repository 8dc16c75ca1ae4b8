//! HuaweiCloud Provider implementation
//!
//! This module contains the main provider implementation. Mutations are submitted through
//! the service's REST API and then driven to completion with the polling engine: the job,
//! then the billing order, then the resource's own status.

use std::collections::HashMap;
use std::time::Duration;

use hwc_core::provider::{ProviderError, ProviderResult};
use hwc_core::resource::{Resource, ResourceId, State, Value};
use hwc_core::timeouts::{TIMEOUTS_ATTRIBUTE, Timeouts};
use hwc_core::waiter::{
    ApiError, Fault, ForbiddenWhileTransitioning, OperationHandle, PollSpec, ProbeOutcome,
    ProbeResult, Resolved, RetryPolicy, WaitChain, WaitError, submit_with_retry,
    wait_for_state_with_cancel,
};
use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::client::ApiClient;
use crate::jobs::{order_spec, probe_order};
use crate::resources::{ParentLink, ResourceConfig, StateTable, UpdateMethod, resource_config};
use crate::utils::{pointer_str, render_path, snapshot_attributes, value_to_json};

/// Get the ResourceConfig for a resource, or an error naming it
fn config_for(id: &ResourceId) -> ProviderResult<&'static ResourceConfig> {
    resource_config(&id.resource_type).ok_or_else(|| {
        ProviderError::new(format!("Unknown resource type: {}", id.resource_type))
            .for_resource(id.clone())
    })
}

fn api_failure(action: &str, id: &ResourceId, err: ApiError) -> ProviderError {
    ProviderError::new(format!("Failed to {} resource: {}", action, err))
        .for_resource(id.clone())
        .with_cause(err)
}

/// What a mutation waits for once it has been accepted
struct Settle<'r> {
    /// Response of the mutating call (carries job and order IDs)
    response: &'r serde_json::Value,
    resource_id: &'r str,
    read_path: String,
    /// Table used to decide whether a resource state carries a fault
    table: &'static StateTable,
    spec: PollSpec,
    timeout: Duration,
    /// Whether to wait for a billing order first
    with_order: bool,
}

/// HuaweiCloud Provider
pub struct HuaweiCloudProvider<C> {
    client: C,
    /// Stops every wait this provider runs when cancelled
    cancel: CancellationToken,
}

impl<C: ApiClient> HuaweiCloudProvider<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            cancel: CancellationToken::new(),
        }
    }

    /// Share a cancellation token with the provider's waits (e.g. one cancelled on Ctrl-C)
    ///
    /// A cancelled wait fails with [`WaitError::Canceled`]; the remote operation keeps running.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    // =========================================================================
    // Probes and waits
    // =========================================================================

    fn path_params(
        &self,
        config: &ResourceConfig,
        parent_id: Option<&str>,
        id: Option<&str>,
    ) -> HashMap<String, String> {
        let mut params = HashMap::new();
        params.insert("project_id".to_string(), self.client.project_id().to_string());
        if let (Some(link), Some(parent_id)) = (&config.parent, parent_id) {
            params.insert(link.id_attribute.to_string(), parent_id.to_string());
        }
        if let Some(id) = id {
            params.insert("id".to_string(), id.to_string());
        }
        params
    }

    fn render(
        &self,
        config: &ResourceConfig,
        template: &str,
        params: &HashMap<String, String>,
    ) -> ProviderResult<String> {
        render_path(template, params).map_err(|name| {
            ProviderError::new(format!(
                "{} path {} needs a value for {{{}}}",
                config.type_name, template, name
            ))
        })
    }

    /// Read a resource once and classify its status against `table`
    ///
    /// A read that no longer finds the resource (HTTP 404, or an empty list for services
    /// that only support filtered listing) comes back as a not-found error.
    async fn probe_resource(
        &self,
        config: &'static ResourceConfig,
        table: &'static StateTable,
        path: String,
    ) -> ProbeOutcome<serde_json::Value> {
        let body = self.client.get(config.service, &path).await?;
        let snapshot = body
            .pointer(config.snapshot_pointer)
            .filter(|s| !s.is_null())
            .cloned()
            .ok_or_else(|| {
                ApiError::new(format!("{} not found at {}", config.type_name, path))
                    .with_status(404)
            })?;

        let state = pointer_str(&snapshot, config.status_pointer)
            .filter(|s| !s.is_empty())
            .or_else(|| config.status_default.map(str::to_string))
            .unwrap_or_default();
        debug!("{} at {}: {}", config.type_name, path, state);

        let mut result = ProbeResult::new(state.as_str());
        if table.is_failure(&state)
            && let Some(pointer) = config.fault_pointer
            && let Some(reason) = pointer_str(&snapshot, pointer).filter(|r| !r.is_empty())
        {
            result = result.with_fault(Fault::new(reason));
        }
        Ok(result.with_snapshot(snapshot))
    }

    /// Wait until the parent accepts changes to its children again
    async fn wait_for_parent(
        &self,
        link: &'static ParentLink,
        parent_id: &str,
        path: &str,
        timeout: Duration,
    ) -> Result<(), WaitError> {
        info!(
            "waiting for {} {} before resubmitting",
            link.resource.type_name, parent_id
        );
        wait_for_state_with_cancel(
            &OperationHandle::resource(parent_id),
            &link.ready.spec(timeout),
            &self.cancel,
            || self.probe_resource(link.resource, &link.ready, path.to_string()),
        )
        .await
        .map(|_| ())
    }

    /// Run the job, order and resource waits in sequence for an accepted mutation
    async fn settle(
        &self,
        config: &'static ResourceConfig,
        settle: Settle<'_>,
    ) -> Result<Resolved<serde_json::Value>, WaitError> {
        let Settle {
            response,
            resource_id,
            read_path,
            table,
            spec,
            timeout,
            with_order,
        } = settle;

        let mut chain = WaitChain::new()
            .with_timeout(timeout)
            .with_cancel(self.cancel.clone());

        if let Some(api) = config.job
            && let Some(job_id) = pointer_str(response, config.job_pointer)
        {
            chain = chain.step(
                "job",
                OperationHandle::job(job_id.as_str()),
                api.submitted_spec(timeout, config.initial_delay),
                move || {
                    let job_id = job_id.clone();
                    async move { api.probe_submitted(&self.client, &job_id).await }
                },
            );
        }

        if with_order
            && let Some(pointer) = config.order_pointer
            && let Some(order_id) = pointer_str(response, pointer)
        {
            chain = chain.step(
                "order",
                OperationHandle::order(order_id.as_str()),
                order_spec(timeout).with_initial_delay(config.initial_delay),
                move || {
                    let order_id = order_id.clone();
                    async move { probe_order(&self.client, &order_id).await }
                },
            );
        }

        chain = chain.step(
            "resource",
            OperationHandle::resource(resource_id),
            spec,
            move || self.probe_resource(config, table, read_path.clone()),
        );

        chain.run().await
    }

    fn to_state(
        &self,
        id: &ResourceId,
        identifier: &str,
        status: &str,
        snapshot: Option<&serde_json::Value>,
    ) -> State {
        let attributes = snapshot.map(snapshot_attributes).unwrap_or_default();
        State::existing(id.clone(), attributes)
            .with_identifier(identifier)
            .with_status(status)
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Read a resource by its stored identifier
    pub async fn read_resource(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> ProviderResult<State> {
        let config = config_for(id)?;

        let identifier = match identifier {
            Some(identifier) => identifier,
            None => return Ok(State::not_found(id.clone())),
        };
        let (parent_id, own_id) = config
            .split_identifier(identifier)
            .map_err(|msg| ProviderError::new(msg).for_resource(id.clone()))?;
        let path = self
            .render(
                config,
                config.read_path,
                &self.path_params(config, parent_id, Some(own_id)),
            )
            .map_err(|e| e.for_resource(id.clone()))?;

        match self.probe_resource(config, &config.create, path).await {
            Ok(result) => Ok(self.to_state(
                id,
                identifier,
                &result.state,
                result.snapshot.as_ref(),
            )),
            Err(err) if err.is_not_found() => Ok(State::not_found(id.clone())),
            Err(err) => Err(api_failure("read", id, err)),
        }
    }

    /// Create a resource and wait until it is usable
    pub async fn create_resource(&self, resource: &Resource) -> ProviderResult<State> {
        let id = &resource.id;
        let config = config_for(id)?;
        let timeouts = Timeouts::from_attributes(&resource.attributes, config.timeouts)
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;

        let parent_id = match &config.parent {
            Some(link) => Some(resource.attribute_str(link.id_attribute).ok_or_else(|| {
                ProviderError::new(format!("{} is required", link.id_attribute))
                    .for_resource(id.clone())
            })?),
            None => None,
        };

        let path = self
            .render(
                config,
                config.create_path,
                &self.path_params(config, parent_id, None),
            )
            .map_err(|e| e.for_resource(id.clone()))?;
        let body = build_body(config, &resource.attributes);

        info!("Creating {}", id);
        let response = match (&config.parent, parent_id) {
            (Some(link), Some(parent_id)) => {
                self.submit_after_parent(config, link, parent_id, &path, &body, timeouts.create)
                    .await
            }
            _ => self
                .client
                .post(config.service, &path, &body)
                .await
                .map_err(|e| api_failure("create", id, e)),
        }
        .map_err(|e| e.for_resource(id.clone()))?;

        let own_id = pointer_str(&response, config.id_pointer).ok_or_else(|| {
            ProviderError::new(format!(
                "create response has no resource ID at {}",
                config.id_pointer
            ))
            .for_resource(id.clone())
        })?;
        let identifier = config.join_identifier(parent_id, &own_id);
        let read_path = self
            .render(
                config,
                config.read_path,
                &self.path_params(config, parent_id, Some(&own_id)),
            )
            .map_err(|e| e.for_resource(id.clone()))?;

        let resolved = self
            .settle(
                config,
                Settle {
                    response: &response,
                    resource_id: &own_id,
                    read_path,
                    table: &config.create,
                    spec: config
                        .create
                        .spec(timeouts.create)
                        .with_initial_delay(config.initial_delay),
                    timeout: timeouts.create,
                    with_order: true,
                },
            )
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;

        info!("Created {} ({})", id, identifier);
        Ok(self.to_state(id, &identifier, &resolved.state, resolved.snapshot.as_ref()))
    }

    /// Submit a child resource, waiting out the parent's transitions on HTTP 403
    async fn submit_after_parent(
        &self,
        config: &'static ResourceConfig,
        link: &'static ParentLink,
        parent_id: &str,
        path: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> ProviderResult<serde_json::Value> {
        let parent_path = self.render(
            link.resource,
            link.resource.read_path,
            &self.path_params(link.resource, None, Some(parent_id)),
        )?;
        let policy = RetryPolicy::new(RetryPolicy::default().max_attempts, timeout);
        let operation = format!("create {}", config.type_name);

        submit_with_retry(
            &operation,
            &policy,
            &ForbiddenWhileTransitioning,
            || self.client.post(config.service, path, body),
            || self.wait_for_parent(link, parent_id, &parent_path, timeout),
        )
        .await
        .map_err(ProviderError::from)
    }

    /// Update a resource in place and wait for it to settle
    pub async fn update_resource(
        &self,
        id: &ResourceId,
        identifier: &str,
        to: &Resource,
    ) -> ProviderResult<State> {
        let config = config_for(id)?;
        let Some(update) = &config.update else {
            return Err(ProviderError::new(format!(
                "Update not supported for {}, delete and recreate",
                id.resource_type
            ))
            .for_resource(id.clone()));
        };
        let timeouts = Timeouts::from_attributes(&to.attributes, config.timeouts)
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;

        let (parent_id, own_id) = config
            .split_identifier(identifier)
            .map_err(|msg| ProviderError::new(msg).for_resource(id.clone()))?;
        let params = self.path_params(config, parent_id, Some(own_id));
        let path = self
            .render(config, update.path, &params)
            .map_err(|e| e.for_resource(id.clone()))?;
        let read_path = self
            .render(config, config.read_path, &params)
            .map_err(|e| e.for_resource(id.clone()))?;
        let body = build_body(config, &to.attributes);

        info!("Updating {}", id);
        let response = match update.method {
            UpdateMethod::Put => self.client.put(config.service, &path, &body),
            UpdateMethod::Patch => self.client.patch(config.service, &path, &body),
        }
        .await
        .map_err(|e| api_failure("update", id, e))?;

        let resolved = self
            .settle(
                config,
                Settle {
                    response: &response,
                    resource_id: own_id,
                    read_path,
                    table: &update.states,
                    spec: update
                        .states
                        .spec(timeouts.update)
                        .with_initial_delay(config.initial_delay),
                    timeout: timeouts.update,
                    with_order: false,
                },
            )
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;

        info!("Updated {}", id);
        Ok(self.to_state(id, identifier, &resolved.state, resolved.snapshot.as_ref()))
    }

    /// Delete a resource and wait until it reads as gone
    ///
    /// `timeout` defaults to the resource type's delete timeout.
    pub async fn delete_resource(
        &self,
        id: &ResourceId,
        identifier: &str,
        timeout: Option<Duration>,
    ) -> ProviderResult<()> {
        let config = config_for(id)?;
        let timeout = timeout.unwrap_or(config.timeouts.delete);

        let (parent_id, own_id) = config
            .split_identifier(identifier)
            .map_err(|msg| ProviderError::new(msg).for_resource(id.clone()))?;
        let params = self.path_params(config, parent_id, Some(own_id));
        let path = self
            .render(config, config.delete_path, &params)
            .map_err(|e| e.for_resource(id.clone()))?;
        let read_path = self
            .render(config, config.read_path, &params)
            .map_err(|e| e.for_resource(id.clone()))?;

        info!("Deleting {}", id);
        let response = match self.client.delete(config.service, &path).await {
            Ok(response) => response,
            Err(err) if err.is_not_found() => {
                info!("{} was already deleted", id);
                return Ok(());
            }
            Err(err) => return Err(api_failure("delete", id, err)),
        };

        self.settle(
            config,
            Settle {
                response: &response,
                resource_id: own_id,
                read_path,
                table: &config.delete,
                spec: config.delete_spec(timeout),
                timeout,
                with_order: false,
            },
        )
        .await
        .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;

        info!("Deleted {}", id);
        Ok(())
    }
}

/// Build the request body from resource attributes
///
/// The `timeouts` block and the parent ID (carried in the path) are not sent.
fn build_body(config: &ResourceConfig, attributes: &HashMap<String, Value>) -> serde_json::Value {
    let parent_attribute = config.parent.as_ref().map(|link| link.id_attribute);

    let fields: serde_json::Map<String, serde_json::Value> = attributes
        .iter()
        .filter(|(key, _)| {
            key.as_str() != TIMEOUTS_ATTRIBUTE && Some(key.as_str()) != parent_attribute
        })
        .map(|(key, value)| (key.clone(), value_to_json(value)))
        .collect();

    match config.body_key {
        Some(key) => {
            let mut wrapped = serde_json::Map::new();
            wrapped.insert(key.to_string(), serde_json::Value::Object(fields));
            serde_json::Value::Object(wrapped)
        }
        None => serde_json::Value::Object(fields),
    }
}
