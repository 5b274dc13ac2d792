use std::sync::Arc;

use crate::domain::{Cadence, ContainerSummary};
use crate::ports::{ContainerRuntime, RuntimeResult};

use super::SubscriptionRegistry;

/// Main application service: container listing plus the live stats registry
pub struct MonitoringService {
    runtime: Arc<dyn ContainerRuntime>,
    registry: SubscriptionRegistry,
}

impl MonitoringService {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, default_cadence: Cadence) -> Self {
        let registry = SubscriptionRegistry::new(runtime.clone(), default_cadence);
        Self { runtime, registry }
    }

    /// Get all containers, stopped ones included
    pub async fn get_containers(&self) -> RuntimeResult<Vec<ContainerSummary>> {
        self.runtime.list_containers().await
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }
}
