use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use tokio::sync::{Mutex, OwnedMutexGuard};

use super::TenantId;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One async mutex per tenant.
///
/// Entries are dropped once nobody holds or waits on them.
#[derive(Debug, Default)]
pub struct TenantLocks {
    locks: Mutex<HashMap<TenantId, Weak<Mutex<()>>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TenantLocks {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `tenant`.
    pub async fn lock(&self, tenant: &TenantId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| lock.strong_count() > 0);

            match locks.get(tenant).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(Mutex::new(()));
                    locks.insert(tenant.clone(), Arc::downgrade(&lock));
                    lock
                }
            }
        };

        lock.lock_owned().await
    }

    /// The number of tenants with a held or awaited lock.
    pub async fn len(&self) -> usize {
        self.locks
            .lock()
            .await
            .values()
            .filter(|lock| lock.strong_count() > 0)
            .count()
    }

    /// Returns true if no tenant lock is held or awaited.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_same_tenant_is_exclusive() -> anyhow::Result<()> {
        let locks = Arc::new(TenantLocks::new());
        let alice = TenantId::new("alice")?;

        let guard = locks.lock(&alice).await;

        let waiter = {
            let locks = locks.clone();
            let alice = alice.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&alice).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter).await??;

        Ok(())
    }

    #[tokio::test]
    async fn test_different_tenants_do_not_block() -> anyhow::Result<()> {
        let locks = TenantLocks::new();
        let _alice = locks.lock(&TenantId::new("alice")?).await;

        let bob = TenantId::new("bob")?;
        let bob = tokio::time::timeout(Duration::from_secs(1), locks.lock(&bob)).await;
        assert!(bob.is_ok());

        Ok(())
    }

    #[tokio::test]
    async fn test_released_locks_are_pruned() -> anyhow::Result<()> {
        let locks = TenantLocks::new();
        {
            let _alice = locks.lock(&TenantId::new("alice")?).await;
            assert_eq!(locks.len().await, 1);
        }

        assert!(locks.is_empty().await);

        Ok(())
    }
}
