//! Resource type configurations for HuaweiCloud services
//!
//! This module defines:
//! - How each resource kind maps onto its service's REST API (paths, body shape, JSON pointers)
//! - The state tables that drive the create, update and delete waits
//! - Resource type definitions (implementing the ResourceType trait)

use std::time::Duration;

use hwc_core::provider::ResourceType;
use hwc_core::timeouts::Timeouts;
use hwc_core::waiter::PollSpec;

use crate::jobs::{CCE_JOBS, DDS_JOBS, JobApi, RDS_JOBS};

/// State label a delete wait resolves to once the resource reads as not found
pub const DELETED: &str = "DELETED";

/// Pending, target and failure states of one wait
#[derive(Debug, Clone, Copy)]
pub struct StateTable {
    pub pending: &'static [&'static str],
    pub target: &'static [&'static str],
    pub failure: &'static [&'static str],
}

impl StateTable {
    /// Poll spec for this table bounded by `timeout`
    pub fn spec(&self, timeout: Duration) -> PollSpec {
        PollSpec::new(self.target.iter().copied())
            .with_pending(self.pending.iter().copied())
            .with_failure(self.failure.iter().copied())
            .with_timeout(timeout)
    }

    pub fn is_failure(&self, state: &str) -> bool {
        self.failure.contains(&state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMethod {
    Put,
    Patch,
}

/// In-place update support
#[derive(Debug)]
pub struct UpdateConfig {
    pub method: UpdateMethod,
    pub path: &'static str,
    pub states: StateTable,
}

/// Dependency on a parent resource that must be idle before children can change
#[derive(Debug)]
pub struct ParentLink {
    /// Attribute (and path placeholder) holding the parent's ID
    pub id_attribute: &'static str,
    pub resource: &'static ResourceConfig,
    /// States in which the parent accepts changes to its children
    pub ready: StateTable,
}

/// Resource type configuration
#[derive(Debug)]
pub struct ResourceConfig {
    /// DSL resource type name (e.g., "rds_instance")
    pub type_name: &'static str,
    /// Service host prefix (e.g., "rds")
    pub service: &'static str,
    pub create_path: &'static str,
    /// Path read by probes; `{id}` is the resource's own ID
    pub read_path: &'static str,
    pub delete_path: &'static str,
    pub update: Option<UpdateConfig>,
    /// Wrap the request body under this key (e.g., `{"nat_gateway": {...}}`)
    pub body_key: Option<&'static str>,
    /// Resource ID in the create response
    pub id_pointer: &'static str,
    /// Resource object in the read response (`""` for the whole body)
    pub snapshot_pointer: &'static str,
    /// Status label, relative to the snapshot
    pub status_pointer: &'static str,
    /// Status used when the API leaves the status field out or empty
    pub status_default: Option<&'static str>,
    /// Failure detail, relative to the snapshot
    pub fault_pointer: Option<&'static str>,
    /// Job API tracking asynchronous create/update/delete, if the service uses one
    pub job: Option<&'static JobApi>,
    /// Job ID in mutation responses
    pub job_pointer: &'static str,
    /// Billing order ID in the create response (prepaid resources)
    pub order_pointer: Option<&'static str>,
    pub create: StateTable,
    pub delete: StateTable,
    /// Delay before the first resource probe after a mutation
    pub initial_delay: Duration,
    pub timeouts: Timeouts,
    pub parent: Option<ParentLink>,
}

impl ResourceConfig {
    /// Split a stored identifier into parent ID and own ID
    ///
    /// Child resources are addressed as `"<parent_id>/<id>"`.
    pub fn split_identifier<'i>(
        &self,
        identifier: &'i str,
    ) -> Result<(Option<&'i str>, &'i str), String> {
        match &self.parent {
            None => Ok((None, identifier)),
            Some(link) => match identifier.split_once('/') {
                Some((parent, id)) if !parent.is_empty() && !id.is_empty() => {
                    Ok((Some(parent), id))
                }
                _ => Err(format!(
                    "{} identifier must be \"<{}>/<id>\", got {:?}",
                    self.type_name, link.id_attribute, identifier
                )),
            },
        }
    }

    /// Inverse of [`split_identifier`](Self::split_identifier)
    pub fn join_identifier(&self, parent_id: Option<&str>, id: &str) -> String {
        match (self.parent.is_some(), parent_id) {
            (true, Some(parent)) => format!("{}/{}", parent, id),
            _ => id.to_string(),
        }
    }

    /// Spec for the delete wait: a not-found read resolves as [`DELETED`]
    pub fn delete_spec(&self, timeout: Duration) -> PollSpec {
        self.delete
            .spec(timeout)
            .with_initial_delay(self.initial_delay)
            .with_not_found(DELETED)
    }
}

// =============================================================================
// DNS
// =============================================================================

pub static DNS_ZONE: ResourceConfig = ResourceConfig {
    type_name: "dns_zone",
    service: "dns",
    create_path: "/v2/zones",
    read_path: "/v2/zones/{id}",
    delete_path: "/v2/zones/{id}",
    update: Some(UpdateConfig {
        method: UpdateMethod::Patch,
        path: "/v2/zones/{id}",
        states: StateTable {
            pending: &["PENDING_UPDATE"],
            target: &["ACTIVE"],
            failure: &["ERROR"],
        },
    }),
    body_key: None,
    id_pointer: "/id",
    snapshot_pointer: "",
    status_pointer: "/status",
    status_default: None,
    fault_pointer: None,
    job: None,
    job_pointer: "/job_id",
    order_pointer: None,
    create: StateTable {
        pending: &["PENDING_CREATE"],
        target: &["ACTIVE"],
        failure: &["ERROR"],
    },
    delete: StateTable {
        pending: &["ACTIVE", "PENDING_DELETE"],
        target: &[DELETED],
        failure: &["ERROR"],
    },
    initial_delay: Duration::from_secs(5),
    timeouts: Timeouts::uniform(Duration::from_secs(600)),
    parent: None,
};

// =============================================================================
// NAT
// =============================================================================

pub static NAT_GATEWAY: ResourceConfig = ResourceConfig {
    type_name: "nat_gateway",
    service: "nat",
    create_path: "/v2/{project_id}/nat_gateways",
    read_path: "/v2/{project_id}/nat_gateways/{id}",
    delete_path: "/v2/{project_id}/nat_gateways/{id}",
    update: Some(UpdateConfig {
        method: UpdateMethod::Put,
        path: "/v2/{project_id}/nat_gateways/{id}",
        states: StateTable {
            pending: &["PENDING_UPDATE"],
            target: &["ACTIVE"],
            failure: &["INACTIVE"],
        },
    }),
    body_key: Some("nat_gateway"),
    id_pointer: "/nat_gateway/id",
    snapshot_pointer: "/nat_gateway",
    status_pointer: "/status",
    status_default: None,
    fault_pointer: None,
    job: None,
    job_pointer: "/job_id",
    order_pointer: Some("/order_id"),
    create: StateTable {
        pending: &["PENDING_CREATE"],
        target: &["ACTIVE"],
        failure: &["INACTIVE"],
    },
    delete: StateTable {
        pending: &["ACTIVE", "PENDING_DELETE"],
        target: &[DELETED],
        failure: &[],
    },
    initial_delay: Duration::from_secs(5),
    timeouts: Timeouts::uniform(Duration::from_secs(600)),
    parent: None,
};

// =============================================================================
// Databases
// =============================================================================

pub static RDS_INSTANCE: ResourceConfig = ResourceConfig {
    type_name: "rds_instance",
    service: "rds",
    create_path: "/v3/{project_id}/instances",
    read_path: "/v3/{project_id}/instances?id={id}",
    delete_path: "/v3/{project_id}/instances/{id}",
    update: None,
    body_key: None,
    id_pointer: "/instance/id",
    snapshot_pointer: "/instances/0",
    status_pointer: "/status",
    status_default: None,
    fault_pointer: None,
    job: Some(&RDS_JOBS),
    job_pointer: "/job_id",
    order_pointer: Some("/order_id"),
    create: StateTable {
        pending: &["BUILD"],
        target: &["ACTIVE"],
        failure: &["FAILED"],
    },
    delete: StateTable {
        pending: &["ACTIVE", "DELETING"],
        target: &[DELETED],
        failure: &["FAILED"],
    },
    initial_delay: Duration::from_secs(30),
    timeouts: Timeouts::uniform(Duration::from_secs(1800)),
    parent: None,
};

pub static DDS_INSTANCE: ResourceConfig = ResourceConfig {
    type_name: "dds_instance",
    service: "dds",
    create_path: "/v3/{project_id}/instances",
    read_path: "/v3/{project_id}/instances?id={id}",
    delete_path: "/v3/{project_id}/instances/{id}",
    update: None,
    body_key: None,
    id_pointer: "/id",
    snapshot_pointer: "/instances/0",
    status_pointer: "/status",
    status_default: None,
    fault_pointer: None,
    job: Some(&DDS_JOBS),
    job_pointer: "/job_id",
    order_pointer: Some("/order_id"),
    create: StateTable {
        pending: &["creating"],
        target: &["normal"],
        failure: &["abnormal", "createfail"],
    },
    delete: StateTable {
        pending: &["normal", "abnormal", "deleting"],
        target: &[DELETED],
        failure: &[],
    },
    initial_delay: Duration::from_secs(30),
    timeouts: Timeouts::new(
        Duration::from_secs(3600),
        Duration::from_secs(3600),
        Duration::from_secs(1800),
    ),
    parent: None,
};

// =============================================================================
// CCE
// =============================================================================

pub static CCE_CLUSTER: ResourceConfig = ResourceConfig {
    type_name: "cce_cluster",
    service: "cce",
    create_path: "/api/v3/projects/{project_id}/clusters",
    read_path: "/api/v3/projects/{project_id}/clusters/{id}",
    delete_path: "/api/v3/projects/{project_id}/clusters/{id}",
    update: Some(UpdateConfig {
        method: UpdateMethod::Put,
        path: "/api/v3/projects/{project_id}/clusters/{id}",
        states: StateTable {
            pending: &["Upgrading", "Resizing", "ScalingUp", "ScalingDown"],
            target: &["Available"],
            failure: &["Error"],
        },
    }),
    body_key: None,
    id_pointer: "/metadata/uid",
    snapshot_pointer: "",
    status_pointer: "/status/phase",
    status_default: None,
    fault_pointer: Some("/status/reason"),
    job: Some(&CCE_JOBS),
    job_pointer: "/status/jobID",
    order_pointer: None,
    create: StateTable {
        pending: &["Creating"],
        target: &["Available"],
        failure: &["Error"],
    },
    delete: StateTable {
        pending: &["Available", "Unavailable", "Deleting"],
        target: &[DELETED],
        failure: &["Error"],
    },
    initial_delay: Duration::from_secs(30),
    timeouts: Timeouts::uniform(Duration::from_secs(1800)),
    parent: None,
};

pub static CCE_NODE_POOL: ResourceConfig = ResourceConfig {
    type_name: "cce_node_pool",
    service: "cce",
    create_path: "/api/v3/projects/{project_id}/clusters/{cluster_id}/nodepools",
    read_path: "/api/v3/projects/{project_id}/clusters/{cluster_id}/nodepools/{id}",
    delete_path: "/api/v3/projects/{project_id}/clusters/{cluster_id}/nodepools/{id}",
    update: Some(UpdateConfig {
        method: UpdateMethod::Put,
        path: "/api/v3/projects/{project_id}/clusters/{cluster_id}/nodepools/{id}",
        states: StateTable {
            pending: &["Synchronizing"],
            target: &["Active", "Synchronized"],
            failure: &["Error", "SoldOut"],
        },
    }),
    body_key: None,
    id_pointer: "/metadata/id",
    snapshot_pointer: "",
    status_pointer: "/status/phase",
    status_default: Some("Active"),
    fault_pointer: None,
    job: None,
    job_pointer: "/status/jobId",
    order_pointer: None,
    create: StateTable {
        pending: &["Synchronizing"],
        target: &["Active", "Synchronized"],
        failure: &["Error", "SoldOut"],
    },
    delete: StateTable {
        pending: &["Active", "Synchronized", "Deleting"],
        target: &[DELETED],
        failure: &["Error"],
    },
    initial_delay: Duration::from_secs(10),
    timeouts: Timeouts::new(
        Duration::from_secs(1200),
        Duration::from_secs(1200),
        Duration::from_secs(1200),
    ),
    parent: Some(ParentLink {
        id_attribute: "cluster_id",
        resource: &CCE_CLUSTER,
        ready: StateTable {
            pending: &["Creating", "Upgrading", "Resizing", "ScalingUp", "ScalingDown"],
            target: &["Available"],
            failure: &["Error"],
        },
    }),
};

// =============================================================================
// Resource Type Definitions
// =============================================================================

/// Every resource kind this provider manages
pub static RESOURCE_CONFIGS: [&ResourceConfig; 6] = [
    &DNS_ZONE,
    &NAT_GATEWAY,
    &RDS_INSTANCE,
    &DDS_INSTANCE,
    &CCE_CLUSTER,
    &CCE_NODE_POOL,
];

/// Look up the configuration for a resource type
pub fn resource_config(type_name: &str) -> Option<&'static ResourceConfig> {
    RESOURCE_CONFIGS
        .iter()
        .copied()
        .find(|c| c.type_name == type_name)
}

/// [`ResourceType`] backed by a [`ResourceConfig`]
pub struct ConfiguredType(&'static ResourceConfig);

impl ResourceType for ConfiguredType {
    fn name(&self) -> &'static str {
        self.0.type_name
    }

    fn timeouts(&self) -> Timeouts {
        self.0.timeouts
    }
}

/// Returns all resource types supported by this provider
pub fn resource_types() -> Vec<Box<dyn ResourceType>> {
    RESOURCE_CONFIGS
        .iter()
        .map(|c| Box::new(ConfiguredType(*c)) as Box<dyn ResourceType>)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::path_placeholders;

    #[test]
    fn every_state_table_is_a_valid_spec() {
        let timeout = Duration::from_secs(60);
        for config in RESOURCE_CONFIGS {
            config.create.spec(timeout).validate().unwrap();
            config.delete_spec(timeout).validate().unwrap();
            if let Some(update) = &config.update {
                update.states.spec(timeout).validate().unwrap();
            }
            if let Some(link) = &config.parent {
                link.ready.spec(timeout).validate().unwrap();
            }
        }
    }

    #[test]
    fn paths_only_use_known_placeholders() {
        for config in RESOURCE_CONFIGS {
            let mut paths = vec![config.create_path, config.read_path, config.delete_path];
            if let Some(update) = &config.update {
                paths.push(update.path);
            }
            let parent_attr = config.parent.as_ref().map(|l| l.id_attribute);

            for path in paths {
                for name in path_placeholders(path) {
                    assert!(
                        name == "project_id" || name == "id" || Some(name.as_str()) == parent_attr,
                        "{}: unexpected placeholder {{{}}} in {}",
                        config.type_name,
                        name,
                        path
                    );
                }
            }
        }
    }

    #[test]
    fn lookup_by_type_name() {
        assert_eq!(
            resource_config("cce_node_pool").map(|c| c.service),
            Some("cce")
        );
        assert!(resource_config("ecs_instance").is_none());

        let names: Vec<_> = resource_types().iter().map(|t| t.name()).collect();
        assert_eq!(names.len(), RESOURCE_CONFIGS.len());
        assert!(names.contains(&"dns_zone"));
    }

    #[test]
    fn resource_types_carry_their_timeouts() {
        let rds = resource_types()
            .into_iter()
            .find(|t| t.name() == "rds_instance")
            .unwrap();
        assert_eq!(rds.timeouts().create, Duration::from_secs(1800));
    }

    #[test]
    fn child_identifiers_include_parent() {
        assert_eq!(
            CCE_NODE_POOL.split_identifier("cluster-1/pool-1"),
            Ok((Some("cluster-1"), "pool-1"))
        );
        assert!(CCE_NODE_POOL.split_identifier("pool-1").is_err());
        assert!(CCE_NODE_POOL.split_identifier("/pool-1").is_err());
        assert_eq!(
            CCE_NODE_POOL.join_identifier(Some("cluster-1"), "pool-1"),
            "cluster-1/pool-1"
        );

        assert_eq!(DNS_ZONE.split_identifier("zone-1"), Ok((None, "zone-1")));
        assert_eq!(DNS_ZONE.join_identifier(None, "zone-1"), "zone-1");
    }

    #[test]
    fn delete_spec_maps_not_found() {
        let spec = NAT_GATEWAY.delete_spec(Duration::from_secs(60));
        assert_eq!(spec.not_found.as_deref(), Some(DELETED));
        assert!(spec.is_target(DELETED));
        assert_eq!(spec.initial_delay, NAT_GATEWAY.initial_delay);
    }
}
