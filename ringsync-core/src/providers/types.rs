use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tree::ConfigTree;

/// One flat key/value published by the infrastructure stack, annotated with
/// its targets either inside `description` (bracketed) or in `targets`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackOutput {
    pub key: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingTarget {
    pub group: String,
    pub org: Option<String>,
}

impl RingTarget {
    pub fn new(group: impl Into<String>, org: Option<String>) -> Self {
        Self {
            group: group.into(),
            org,
        }
    }

    pub fn service_group(&self, service: &str) -> String {
        match &self.org {
            Some(org) => format!("{service}.{}@{org}", self.group),
            None => format!("{service}.{}", self.group),
        }
    }
}

#[async_trait]
pub trait StackProvider: Send + Sync {
    /// Timestamp of the last completed stack update, or `None` while the
    /// stack is mid-mutation or otherwise unavailable.
    async fn last_update_if_complete(&self) -> Result<Option<DateTime<Utc>>>;

    async fn read_outputs(&self) -> Result<Vec<StackOutput>>;
}

#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn get_secret(&self, id: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait KeyValueRegistry: Send + Sync {
    async fn read(&self, path: &str) -> Result<Option<ConfigTree>>;
    async fn write(&self, path: &str, values: ConfigTree) -> Result<()>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>>;
}

#[async_trait]
pub trait RingClient: Send + Sync {
    async fn read(&self, service: &str, target: &RingTarget) -> Result<Option<ConfigTree>>;
    async fn write(
        &self,
        service: &str,
        target: &RingTarget,
        config: &ConfigTree,
        version: u64,
    ) -> Result<()>;
    async fn has_service(&self, service: &str, target: &RingTarget) -> Result<bool>;
}
