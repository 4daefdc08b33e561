use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{LockBackend, LockLease};
use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct MemoryLock {
    inner: Arc<Mutex<()>>,
}

struct MemoryLease {
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl LockBackend for MemoryLock {
    async fn try_acquire(&self) -> Result<Option<Box<dyn LockLease>>> {
        Ok(self
            .inner
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| Box::new(MemoryLease { _guard: guard }) as Box<dyn LockLease>))
    }
}

#[async_trait]
impl LockLease for MemoryLease {
    async fn release(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
