pub mod config;
pub mod error;
pub mod flush;
pub mod lock;
pub mod logging;
pub mod providers;
pub mod resolver;
pub mod schema;
pub mod targets;
pub mod transform;
pub mod tree;

use std::sync::Arc;

pub use config::Config;
pub use error::{Error, Result};
pub use flush::{BatchReport, FlushOutcome};
pub use lock::LockOutcome;
pub use schema::{Schema, SchemaSet};
pub use tree::ConfigTree;

use flush::{Clock, Reconciler, SystemClock};
use lock::{ConvergenceLock, LockBackend};
use providers::{KeyValueRegistry, ObjectStore, RingClient, SecretProvider, StackProvider};
use resolver::Resolver;
use transform::TransformPipeline;

pub struct Providers {
    pub stack: Arc<dyn StackProvider>,
    pub secrets: Arc<dyn SecretProvider>,
    pub registry: Arc<dyn KeyValueRegistry>,
    pub objects: Arc<dyn ObjectStore>,
    pub ring: Arc<dyn RingClient>,
    pub lock: Arc<dyn LockBackend>,
}

pub struct RingSync {
    resolver: Arc<Resolver>,
    reconciler: Reconciler,
    lock: ConvergenceLock,
}

impl RingSync {
    pub fn new(config: &Config, schemas: SchemaSet, providers: Providers) -> Result<Self> {
        Self::with_clock(config, schemas, providers, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &Config,
        schemas: SchemaSet,
        providers: Providers,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config::validate_config(config)?;

        let transforms = TransformPipeline::new(
            providers.secrets,
            providers.registry.clone(),
            providers.objects,
            config.registry.local_secrets_path(),
        );
        let resolver = Arc::new(Resolver::new(
            Arc::new(schemas),
            providers.stack,
            providers.registry,
            transforms,
            config.registry.clone(),
        ));
        let reconciler = Reconciler::new(
            resolver.clone(),
            providers.ring,
            config.ring.target(),
            clock,
        );

        Ok(Self {
            resolver,
            reconciler,
            lock: ConvergenceLock::new(providers.lock),
        })
    }

    pub fn schemas(&self) -> &SchemaSet {
        self.resolver.schemas()
    }

    pub fn schema(&self, service: &str) -> Result<&Schema> {
        self.resolver.schema(service)
    }

    pub async fn resolve(&self, service: &str) -> Result<ConfigTree> {
        self.resolver.resolve(service, None).await
    }

    pub async fn flush(&self, service: &str) -> Result<FlushOutcome> {
        self.reconciler.flush(service).await
    }

    pub async fn flush_locked(&self, service: &str) -> LockOutcome<Result<FlushOutcome>> {
        self.lock.with_lock(|| self.reconciler.flush(service)).await
    }

    pub async fn flush_all(&self) -> BatchReport {
        self.reconciler.flush_all().await
    }

    /// Sweeps every service under the convergence lock. `None` when another
    /// instance holds the lock or the lock backend is unreachable.
    pub async fn flush_all_locked(&self) -> Option<BatchReport> {
        self.lock
            .with_lock(|| self.reconciler.flush_all())
            .await
            .acquired()
    }

    pub async fn read_editable(&self, service: &str) -> Result<ConfigTree> {
        self.resolver.read_editable(service).await
    }

    /// Merges `patch` into the stored overrides for `service`, then flushes
    /// the service so the change reaches the ring.
    pub async fn update_editable(&self, service: &str, patch: ConfigTree) -> Result<FlushOutcome> {
        let schema = self.resolver.schema(service)?;
        schema.validate_editable(&patch)?;

        let mut stored = self.resolver.read_editable(service).await?;
        tree::deep_merge(&mut stored, &schema.coerce_tree(&patch));
        self.resolver.write_editable(service, stored).await?;
        tracing::info!(service, "updated editable configuration");

        self.reconciler.flush(service).await
    }

    pub async fn read_ring(&self, service: &str) -> Result<Option<ConfigTree>> {
        self.reconciler.read_ring(service).await
    }
}
