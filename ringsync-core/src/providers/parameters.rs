use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::providers::types::{
    KeyValueRegistry, RingClient, RingTarget, StackOutput, StackProvider,
};
use crate::tree::ConfigTree;

/// Stack outputs and editable overrides hosted by a parameters service
/// running in the ring itself.
///
/// The service's configuration carries an array of stack outputs under
/// `stack`, the `stack_id` they were published from, an optional
/// `stack_updated_at` (RFC 3339), and registry entries under `params.<path>`.
pub struct RingParameters {
    ring: Arc<dyn RingClient>,
    target: RingTarget,
    service: String,
    stack_id: Option<String>,
    last_version: Mutex<u64>,
}

impl RingParameters {
    pub fn new(ring: Arc<dyn RingClient>, target: RingTarget, service: impl Into<String>) -> Self {
        Self {
            ring,
            target,
            service: service.into(),
            stack_id: None,
            last_version: Mutex::new(0),
        }
    }

    /// Only trust outputs published from `stack_id`.
    pub fn with_stack_id(mut self, stack_id: Option<String>) -> Self {
        self.stack_id = stack_id;
        self
    }

    async fn read_parameters(&self) -> Result<Option<ConfigTree>> {
        self.ring.read(&self.service, &self.target).await
    }

    fn published_elsewhere(&self, parameters: &ConfigTree) -> bool {
        let Some(expected) = self.stack_id.as_deref() else {
            return false;
        };
        parameters.get("stack_id").and_then(Value::as_str) != Some(expected)
    }
}

#[async_trait]
impl StackProvider for RingParameters {
    async fn last_update_if_complete(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(parameters) = self.read_parameters().await? else {
            return Ok(None);
        };
        if !parameters.contains_key("stack") || self.published_elsewhere(&parameters) {
            return Ok(None);
        }
        match parameters.get("stack_updated_at").and_then(Value::as_str) {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|timestamp| Some(timestamp.with_timezone(&Utc)))
                .map_err(|err| {
                    Error::Provider(format!("stack_updated_at '{raw}' is not RFC 3339: {err}"))
                }),
            None => Ok(Some(Utc::now())),
        }
    }

    async fn read_outputs(&self) -> Result<Vec<StackOutput>> {
        let parameters = self.read_parameters().await?.ok_or_else(|| {
            Error::StackNotReady(format!("parameters service '{}' is not running", self.service))
        })?;
        if self.published_elsewhere(&parameters) {
            return Err(Error::StackNotReady(format!(
                "parameters service '{}' has outputs from another stack",
                self.service
            )));
        }
        match parameters.get("stack") {
            Some(stack) => serde_json::from_value(stack.clone()).map_err(|err| {
                Error::Provider(format!("parameters service has malformed stack outputs: {err}"))
            }),
            None => Err(Error::StackNotReady(format!(
                "parameters service '{}' has no stack outputs yet",
                self.service
            ))),
        }
    }
}

#[async_trait]
impl KeyValueRegistry for RingParameters {
    async fn read(&self, path: &str) -> Result<Option<ConfigTree>> {
        let Some(parameters) = self.read_parameters().await? else {
            return Err(Error::StoreNotReady(format!(
                "parameters service '{}' is not running",
                self.service
            )));
        };
        Ok(parameters
            .get("params")
            .and_then(|params| params.get(path))
            .and_then(Value::as_object)
            .cloned())
    }

    async fn write(&self, path: &str, values: ConfigTree) -> Result<()> {
        let mut last_version = self.last_version.lock().await;
        let mut parameters = self.read_parameters().await?.ok_or_else(|| {
            Error::StoreNotReady(format!("parameters service '{}' is not running", self.service))
        })?;

        let params = parameters
            .entry("params".to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if !params.is_object() {
            *params = Value::Object(Map::new());
        }
        if let Value::Object(params) = params {
            params.insert(path.to_owned(), Value::Object(values));
        }

        let now = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
        let version = now.max(*last_version + 1);
        self.ring
            .write(&self.service, &self.target, &parameters, version)
            .await?;
        *last_version = version;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::providers::memory::MemoryRing;

    fn target() -> RingTarget {
        RingTarget::new("default", None)
    }

    async fn started(config: Value) -> (Arc<MemoryRing>, RingParameters) {
        let ring = Arc::new(MemoryRing::default());
        ring.start(
            "polycosm-parameters",
            &target(),
            config.as_object().cloned().expect("object"),
        )
        .await;
        let parameters = RingParameters::new(ring.clone(), target(), "polycosm-parameters");
        (ring, parameters)
    }

    #[tokio::test]
    async fn stack_is_not_ready_until_outputs_are_published() {
        let ring = Arc::new(MemoryRing::default());
        let parameters = RingParameters::new(ring, target(), "polycosm-parameters");
        assert!(parameters.last_update_if_complete().await.expect("ok").is_none());
        let error = parameters.read_outputs().await.expect_err("not running");
        assert!(error.is_not_ready());
    }

    #[tokio::test]
    async fn reads_stack_outputs_and_timestamp() {
        let (_ring, parameters) = started(json!({
            "stack_updated_at": "2024-05-01T10:00:00Z",
            "stack": [
                {"key": "DbHost", "value": "db.internal", "description": "[reticulum/db/hostname]"},
                {"key": "DbPass", "value": "pw-id", "targets": ["reticulum/db/password!read-aws-secret"]}
            ]
        }))
        .await;

        let updated = parameters.last_update_if_complete().await.expect("ok");
        assert_eq!(updated.map(|t| t.to_rfc3339()), Some("2024-05-01T10:00:00+00:00".to_owned()));

        let outputs = parameters.read_outputs().await.expect("ok");
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[1].targets.as_ref().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn outputs_from_another_stack_are_not_ready() {
        let (_ring, parameters) = started(json!({
            "stack_id": "arn:stack/staging",
            "stack": [{"key": "DbHost", "value": "db.internal"}]
        }))
        .await;
        let parameters = parameters.with_stack_id(Some("arn:stack/prod".to_owned()));

        assert!(parameters.last_update_if_complete().await.expect("ok").is_none());
        let error = parameters.read_outputs().await.expect_err("other stack");
        assert!(error.is_not_ready());

        let parameters = parameters.with_stack_id(Some("arn:stack/staging".to_owned()));
        assert_eq!(parameters.read_outputs().await.expect("ok").len(), 1);
    }

    #[tokio::test]
    async fn registry_writes_land_under_params() {
        let (ring, parameters) = started(json!({"stack": []})).await;

        assert!(parameters.read("ita/dev/reticulum").await.expect("ok").is_none());
        let values = json!({"db": {"port": "5433"}}).as_object().cloned().expect("object");
        parameters
            .write("ita/dev/reticulum", values.clone())
            .await
            .expect("write");
        parameters
            .write("ita/dev/reticulum", values.clone())
            .await
            .expect("second write gets a newer version");

        assert_eq!(parameters.read("ita/dev/reticulum").await.expect("ok"), Some(values));
        let writes = ring.writes().await;
        assert_eq!(writes.len(), 2);
        assert!(writes[1].version > writes[0].version);
    }
}
