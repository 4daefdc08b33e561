use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use tokio::process::Command;

use crate::config::schema::RingConfig;
use crate::error::{Error, Result};
use crate::providers::retry::{send_with_retry, RetryPolicy};
use crate::providers::types::{RingClient, RingTarget};
use crate::tree::ConfigTree;

/// Ring client for a Habitat supervisor: reads through the supervisor's HTTP
/// gateway and writes with `hab config apply`.
#[derive(Debug, Clone)]
pub struct HabitatRing {
    http: reqwest::Client,
    gateway_url: String,
    remote_sup: String,
    hab_binary: PathBuf,
    retry: RetryPolicy,
}

impl HabitatRing {
    pub fn new(config: &RingConfig, retry: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|err| Error::Config(format!("failed to build ring HTTP client: {err}")))?;
        Ok(Self {
            http,
            gateway_url: format!("http://{}:{}", config.http_host, config.http_port),
            remote_sup: format!("{}:{}", config.sup_host, config.sup_port),
            hab_binary: PathBuf::from(&config.hab_binary),
            retry,
        })
    }

    fn service_url(&self, service: &str, target: &RingTarget) -> String {
        match &target.org {
            Some(org) => format!("{}/services/{service}/{}/{org}", self.gateway_url, target.group),
            None => format!("{}/services/{service}/{}", self.gateway_url, target.group),
        }
    }

    /// The gateway's service document, or `None` when the service is not
    /// running.
    async fn fetch_service(&self, service: &str, target: &RingTarget) -> Result<Option<Value>> {
        let operation = format!("ring read {}", target.service_group(service));
        let response = send_with_retry(
            self.http.get(self.service_url(service, target)),
            &self.retry,
            &operation,
        )
        .await
        .map_err(|err| Error::RingUnreachable(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Error::RingUnreachable(format!("{operation} returned HTTP {status}")));
        }
        let document = response
            .json::<Value>()
            .await
            .map_err(|err| Error::RingUnreachable(format!("{operation} returned bad JSON: {err}")))?;
        Ok(Some(document))
    }
}

#[async_trait]
impl RingClient for HabitatRing {
    async fn read(&self, service: &str, target: &RingTarget) -> Result<Option<ConfigTree>> {
        let Some(document) = self.fetch_service(service, target).await? else {
            return Ok(None);
        };
        match document.get("cfg") {
            Some(Value::Object(cfg)) => Ok(Some(cfg.clone())),
            _ => Ok(Some(Map::new())),
        }
    }

    async fn write(
        &self,
        service: &str,
        target: &RingTarget,
        config: &ConfigTree,
        version: u64,
    ) -> Result<()> {
        let service_group = target.service_group(service);
        let payload = toml::to_string(&Value::Object(config.clone())).map_err(|err| {
            Error::Validation(format!("config for {service_group} is not TOML-encodable: {err}"))
        })?;

        let payload_path =
            std::env::temp_dir().join(format!("ringsync-{}.toml", uuid::Uuid::new_v4()));
        tokio::fs::write(&payload_path, payload).await?;

        let output = Command::new(&self.hab_binary)
            .arg("config")
            .arg("apply")
            .arg(format!("--remote-sup={}", self.remote_sup))
            .arg(&service_group)
            .arg(version.to_string())
            .arg(&payload_path)
            .stdin(Stdio::null())
            .output()
            .await;
        if let Err(err) = tokio::fs::remove_file(&payload_path).await {
            tracing::warn!(%err, path = %payload_path.display(), "failed to remove ring payload file");
        }

        let output = output.map_err(|err| {
            Error::RingUnreachable(format!(
                "failed to run '{}': {err}",
                self.hab_binary.display()
            ))
        })?;
        if !output.status.success() {
            return Err(Error::RingUnreachable(format!(
                "hab config apply for {service_group} at version {version} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        tracing::debug!(service_group = %service_group, version, "applied config to ring");
        Ok(())
    }

    async fn has_service(&self, service: &str, target: &RingTarget) -> Result<bool> {
        Ok(self.fetch_service(service, target).await?.is_some())
    }
}
