mod memory;
mod postgres;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::MemoryLock;
pub use postgres::PgAdvisoryLock;

#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Attempts the lock without waiting. `Ok(None)` means it is held elsewhere.
    async fn try_acquire(&self) -> Result<Option<Box<dyn LockLease>>>;
}

/// A held lock. Dropping a lease without releasing it still frees the lock,
/// but only once the backend notices.
#[async_trait]
pub trait LockLease: Send {
    async fn release(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome<T> {
    Acquired(T),
    Skipped(String),
}

impl<T> LockOutcome<T> {
    pub fn acquired(self) -> Option<T> {
        match self {
            Self::Acquired(value) => Some(value),
            Self::Skipped(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct ConvergenceLock {
    backend: Arc<dyn LockBackend>,
}

impl ConvergenceLock {
    pub fn new(backend: Arc<dyn LockBackend>) -> Self {
        Self { backend }
    }

    /// Runs `work` only if the lock is acquired right now, releasing the
    /// lock afterwards regardless of what `work` returned.
    pub async fn with_lock<T, F, Fut>(&self, work: F) -> LockOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lease = match self.backend.try_acquire().await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                tracing::debug!("convergence lock held elsewhere; skipping");
                return LockOutcome::Skipped("lock held by another instance".to_owned());
            }
            Err(err) => {
                tracing::warn!(%err, "convergence lock backend unavailable; skipping");
                return LockOutcome::Skipped(err.to_string());
            }
        };

        let output = work().await;

        if let Err(err) = lease.release().await {
            tracing::warn!(%err, "failed to release convergence lock");
        }
        LockOutcome::Acquired(output)
    }
}
