use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::providers::retry::RetryPolicy;
use crate::providers::RingTarget;
use crate::tree::{self, ConfigTree};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ring: RingConfig,
    pub stack: StackConfig,
    pub registry: RegistryConfig,
    pub lock: LockConfig,
    pub schemas: SchemaConfig,
    pub objects: ObjectStoreConfig,
    pub secrets: SecretsConfig,
    pub logging: LoggingConfig,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    pub http_host: String,
    pub http_port: u16,
    pub sup_host: String,
    pub sup_port: u16,
    pub group: String,
    pub org: Option<String>,
    pub hab_binary: String,
    pub request_timeout_ms: u64,
    pub parameters_service: String,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            http_host: "127.0.0.1".to_owned(),
            http_port: 9631,
            sup_host: "127.0.0.1".to_owned(),
            sup_port: 9632,
            group: "default".to_owned(),
            org: None,
            hab_binary: "hab".to_owned(),
            request_timeout_ms: 10_000,
            parameters_service: "polycosm-parameters".to_owned(),
        }
    }
}

impl RingConfig {
    pub fn target(&self) -> RingTarget {
        RingTarget::new(self.group.clone(), self.org.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub stack_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Prefix of every registry path; overrides live at `<prefix>/<service>`.
    pub prefix: String,
    pub secrets_key: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            prefix: "ita".to_owned(),
            secrets_key: "keymaster".to_owned(),
        }
    }
}

impl RegistryConfig {
    pub fn editable_path(&self, service: &str) -> String {
        format!("{}/{service}", self.prefix)
    }

    pub fn local_secrets_path(&self) -> String {
        format!("{}/{}", self.prefix, self.secrets_key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub connection_url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub database: Option<String>,
    pub lock_id: i64,
    pub idle_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Ring service whose `db` section supplies unset connection fields.
    pub fallback_service: Option<String>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            connection_url: None,
            user: None,
            password: None,
            host: None,
            port: 5432,
            database: None,
            lock_id: -874_238_742_382_195,
            idle_timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
            fallback_service: None,
        }
    }
}

impl LockConfig {
    /// Fills connection fields that are still unset from a resolved service
    /// configuration's `db` section (`username`, `password`, `hostname`,
    /// `database`). Explicit settings always win.
    pub fn with_fallback(mut self, resolved: &ConfigTree) -> Self {
        let lookup = |key: &str| {
            tree::get_path(resolved, &["db", key])
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
        };
        self.user = self.user.or_else(|| lookup("username"));
        self.password = self.password.or_else(|| lookup("password"));
        self.host = self.host.or_else(|| lookup("hostname"));
        self.database = self.database.or_else(|| lookup("database"));
        self
    }

    pub fn is_configured(&self) -> bool {
        self.connection_url.is_some() || self.host.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub dir: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            dir: "schemas".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    pub root: String,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            root: "objects".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    pub file: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            file: "secrets.json".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub with_target: bool,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            with_target: true,
            ansi: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn lock_settings_fall_back_to_resolved_db_section() {
        let resolved = json!({"db": {"username": "ita", "password": "pw", "hostname": "db", "database": ""}})
            .as_object()
            .cloned()
            .expect("object");
        let config = LockConfig {
            user: Some("admin".to_owned()),
            ..LockConfig::default()
        }
        .with_fallback(&resolved);

        assert_eq!(config.user.as_deref(), Some("admin"));
        assert_eq!(config.password.as_deref(), Some("pw"));
        assert_eq!(config.host.as_deref(), Some("db"));
        assert_eq!(config.database, None);
        assert!(config.is_configured());
    }

    #[test]
    fn registry_paths_share_the_prefix() {
        let registry = RegistryConfig {
            prefix: "ita/dev-stack".to_owned(),
            ..RegistryConfig::default()
        };
        assert_eq!(registry.editable_path("reticulum"), "ita/dev-stack/reticulum");
        assert_eq!(registry.local_secrets_path(), "ita/dev-stack/keymaster");
    }
}
