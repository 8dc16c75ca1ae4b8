//! HWC HuaweiCloud Provider
//!
//! HuaweiCloud Provider implementation on top of the hwc-core polling engine.
//!
//! ## Module Structure
//!
//! - `client` - ApiClient trait and the reqwest-backed HttpClient
//! - `jobs` - Job and billing order probes
//! - `resources` - Resource type definitions and configurations
//! - `provider` - HuaweiCloudProvider implementation
//! - `utils` - Helper functions for paths and value conversion

pub mod client;
pub mod jobs;
pub mod provider;
pub mod resources;
pub mod utils;

// Re-export main types
pub use client::{ApiClient, ClientConfig, HttpClient};
pub use provider::HuaweiCloudProvider;
pub use resources::{ResourceConfig, resource_config};

use hwc_core::provider::{BoxFuture, Provider, ProviderResult, ResourceType};
use hwc_core::resource::{Resource, ResourceId, State};

use resources::resource_types;

// =============================================================================
// Provider Trait Implementation
// =============================================================================

impl<C: ApiClient> Provider for HuaweiCloudProvider<C> {
    fn name(&self) -> &'static str {
        "huaweicloud"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        resource_types()
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.map(|s| s.to_string());
        Box::pin(async move { self.read_resource(&id, identifier.as_deref()).await })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.create_resource(&resource).await })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        _from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let to = to.clone();
        Box::pin(async move { self.update_resource(&id, &identifier, &to).await })
    }

    /// Waits with the type's default delete timeout; a declared `timeouts.delete` is only
    /// honoured through [`HuaweiCloudProvider::delete_resource`], since a stored identifier
    /// does not carry the resource's attributes.
    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move { self.delete_resource(&id, &identifier, None).await })
    }
}
