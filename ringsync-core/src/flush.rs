use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::providers::{RingClient, RingTarget};
use crate::resolver::Resolver;
use crate::tree::{self, ConfigTree};

pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        u64::try_from(Utc::now().timestamp()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum FlushOutcome {
    Updated(BTreeSet<String>),
    UpToDate,
    Skipped(String),
}

impl FlushOutcome {
    pub fn changed_paths(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::Updated(paths) => Some(paths),
            _ => None,
        }
    }
}

/// Per-service results of one sweep. A failure in one service never stops
/// the others.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub converged: BTreeMap<String, BTreeSet<String>>,
    pub up_to_date: BTreeSet<String>,
    pub skipped: BTreeMap<String, String>,
    pub failed: BTreeMap<String, String>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Reconciler {
    resolver: Arc<Resolver>,
    ring: Arc<dyn RingClient>,
    target: RingTarget,
    clock: Arc<dyn Clock>,
    versions: Mutex<HashMap<String, u64>>,
}

impl Reconciler {
    pub fn new(
        resolver: Arc<Resolver>,
        ring: Arc<dyn RingClient>,
        target: RingTarget,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver,
            ring,
            target,
            clock,
            versions: Mutex::new(HashMap::new()),
        }
    }

    pub fn target(&self) -> &RingTarget {
        &self.target
    }

    pub async fn read_ring(&self, service: &str) -> Result<Option<ConfigTree>> {
        self.ring.read(service, &self.target).await
    }

    /// Brings one service's ring configuration in line with its resolved
    /// configuration, writing only when something actually changed.
    pub async fn flush(&self, service: &str) -> Result<FlushOutcome> {
        let schema = self.resolver.schema(service)?;

        if !self.ring.has_service(service, &self.target).await? {
            tracing::debug!(service, "service is not running in the ring; skipping");
            return Ok(FlushOutcome::Skipped(format!(
                "{} is not running",
                self.target.service_group(service)
            )));
        }
        let mut old = self
            .ring
            .read(service, &self.target)
            .await?
            .unwrap_or_default();

        let mut new = self.resolver.resolve(service, Some(&old)).await?;

        schema.strip_unmanaged(&mut old);
        schema.strip_unmanaged(&mut new);

        let paths = tree::diff_paths(&old, &new);
        if paths.is_empty() {
            tracing::debug!(service, "configuration already up to date");
            return Ok(FlushOutcome::UpToDate);
        }

        let mut versions = self.versions.lock().await;
        let last = versions.get(service).copied().unwrap_or_default();
        let version = self.clock.now_secs().max(last + 1);
        self.ring.write(service, &self.target, &new, version).await?;
        versions.insert(service.to_owned(), version);
        drop(versions);

        tracing::info!(
            service,
            version,
            paths = %paths.iter().cloned().collect::<Vec<_>>().join(", "),
            "updated ring configuration"
        );
        tracing::trace!(service, old = ?old, new = ?new, "ring configuration delta");
        Ok(FlushOutcome::Updated(paths))
    }

    pub async fn flush_all(&self) -> BatchReport {
        let mut report = BatchReport::default();
        let services: Vec<String> = self.resolver.schemas().keys().cloned().collect();

        for service in services {
            match self.flush(&service).await {
                Ok(FlushOutcome::Updated(paths)) => {
                    report.converged.insert(service, paths);
                }
                Ok(FlushOutcome::UpToDate) => {
                    report.up_to_date.insert(service);
                }
                Ok(FlushOutcome::Skipped(reason)) => {
                    report.skipped.insert(service, reason);
                }
                Err(err) if err.is_not_ready() => {
                    tracing::info!(service = %service, %err, "not ready; will retry on the next sweep");
                    report.skipped.insert(service, err.to_string());
                }
                Err(err) => {
                    tracing::warn!(service = %service, %err, "flush failed");
                    report.failed.insert(service, err.to_string());
                }
            }
        }

        report
    }
}
