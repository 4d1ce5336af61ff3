use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::{SandboxInstance, TenantId};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A registered instance. The mutex serializes access to its process handle.
pub type SharedInstance = Arc<Mutex<SandboxInstance>>;

/// Where the manager keeps live instances, keyed directly by tenant.
#[async_trait]
pub trait SandboxRegistry: Send + Sync + fmt::Debug {
    /// Returns the instance registered for `tenant`.
    async fn get(&self, tenant: &TenantId) -> Option<SharedInstance>;

    /// Registers `instance` for `tenant`, returning the instance it replaced.
    async fn insert(&self, tenant: TenantId, instance: SharedInstance) -> Option<SharedInstance>;

    /// Unregisters `tenant`, returning its instance.
    async fn remove(&self, tenant: &TenantId) -> Option<SharedInstance>;

    /// The tenants with a registered instance, sorted.
    async fn tenants(&self) -> Vec<TenantId>;
}

/// A process-local registry.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    instances: RwLock<HashMap<TenantId, SharedInstance>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl InMemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl SandboxRegistry for InMemoryRegistry {
    async fn get(&self, tenant: &TenantId) -> Option<SharedInstance> {
        self.instances.read().await.get(tenant).cloned()
    }

    async fn insert(&self, tenant: TenantId, instance: SharedInstance) -> Option<SharedInstance> {
        self.instances.write().await.insert(tenant, instance)
    }

    async fn remove(&self, tenant: &TenantId) -> Option<SharedInstance> {
        self.instances.write().await.remove(tenant)
    }

    async fn tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<_> = self.instances.read().await.keys().cloned().collect();
        tenants.sort();
        tenants
    }
}
