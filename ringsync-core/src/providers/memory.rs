use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::providers::types::{
    KeyValueRegistry, ObjectStore, RingClient, RingTarget, SecretProvider, StackOutput,
    StackProvider,
};
use crate::tree::ConfigTree;

#[derive(Debug, Default)]
struct StackState {
    outputs: Vec<StackOutput>,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct MemoryStack {
    state: RwLock<StackState>,
}

impl MemoryStack {
    pub fn new(outputs: Vec<StackOutput>) -> Self {
        Self {
            state: RwLock::new(StackState {
                outputs,
                completed_at: Some(Utc::now()),
            }),
        }
    }

    pub async fn set_outputs(&self, outputs: Vec<StackOutput>) {
        let mut state = self.state.write().await;
        state.outputs = outputs;
        state.completed_at = Some(Utc::now());
    }

    /// Marks the stack as mid-update; reads report it as not ready.
    pub async fn begin_update(&self) {
        self.state.write().await.completed_at = None;
    }
}

#[async_trait]
impl StackProvider for MemoryStack {
    async fn last_update_if_complete(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.state.read().await.completed_at)
    }

    async fn read_outputs(&self) -> Result<Vec<StackOutput>> {
        let state = self.state.read().await;
        if state.completed_at.is_none() {
            return Err(Error::StackNotReady("stack update in progress".to_owned()));
        }
        Ok(state.outputs.clone())
    }
}

#[derive(Debug, Default)]
pub struct MemorySecrets {
    secrets: RwLock<HashMap<String, String>>,
}

impl MemorySecrets {
    pub async fn insert(&self, id: impl Into<String>, secret: impl Into<String>) {
        self.secrets.write().await.insert(id.into(), secret.into());
    }
}

#[async_trait]
impl SecretProvider for MemorySecrets {
    async fn get_secret(&self, id: &str) -> Result<Option<String>> {
        Ok(self.secrets.read().await.get(id).cloned())
    }
}

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    entries: RwLock<HashMap<String, ConfigTree>>,
}

#[async_trait]
impl KeyValueRegistry for MemoryRegistry {
    async fn read(&self, path: &str) -> Result<Option<ConfigTree>> {
        Ok(self.entries.read().await.get(path).cloned())
    }

    async fn write(&self, path: &str, values: ConfigTree) -> Result<()> {
        self.entries.write().await.insert(path.to_owned(), values);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryObjects {
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryObjects {
    pub async fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.objects
            .write()
            .await
            .insert((bucket.to_owned(), key.to_owned()), body.into());
    }
}

#[async_trait]
impl ObjectStore for MemoryObjects {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .objects
            .read()
            .await
            .get(&(bucket.to_owned(), key.to_owned()))
            .cloned())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RingWrite {
    pub service_group: String,
    pub version: u64,
    pub config: ConfigTree,
}

#[derive(Debug, Default)]
struct RingState {
    configs: HashMap<String, ConfigTree>,
    writes: Vec<RingWrite>,
}

/// Ring keyed by `service.group[@org]`. A service runs once it has been
/// started or written to.
#[derive(Debug, Default)]
pub struct MemoryRing {
    state: RwLock<RingState>,
}

impl MemoryRing {
    pub async fn start(&self, service: &str, target: &RingTarget, config: ConfigTree) {
        self.state
            .write()
            .await
            .configs
            .insert(target.service_group(service), config);
    }

    pub async fn writes(&self) -> Vec<RingWrite> {
        self.state.read().await.writes.clone()
    }
}

#[async_trait]
impl RingClient for MemoryRing {
    async fn read(&self, service: &str, target: &RingTarget) -> Result<Option<ConfigTree>> {
        Ok(self
            .state
            .read()
            .await
            .configs
            .get(&target.service_group(service))
            .cloned())
    }

    async fn write(
        &self,
        service: &str,
        target: &RingTarget,
        config: &ConfigTree,
        version: u64,
    ) -> Result<()> {
        let service_group = target.service_group(service);
        let mut state = self.state.write().await;
        if let Some(previous) = state
            .writes
            .iter()
            .rev()
            .find(|write| write.service_group == service_group)
        {
            if version <= previous.version {
                return Err(Error::RingUnreachable(format!(
                    "{service_group} rejected version {version}; ring is at {}",
                    previous.version
                )));
            }
        }
        state.configs.insert(service_group.clone(), config.clone());
        state.writes.push(RingWrite {
            service_group,
            version,
            config: config.clone(),
        });
        Ok(())
    }

    async fn has_service(&self, service: &str, target: &RingTarget) -> Result<bool> {
        Ok(self
            .state
            .read()
            .await
            .configs
            .contains_key(&target.service_group(service)))
    }
}
