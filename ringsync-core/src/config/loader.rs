use std::path::Path;

use crate::config::schema::Config;
use crate::error::{Error, Result};

pub fn load_from_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|err| {
        Error::Config(format!("failed to read config '{}': {err}", path.display()))
    })?;

    toml::from_str(&content).map_err(|err| {
        Error::Config(format!(
            "failed to parse config '{}': {err}",
            path.display()
        ))
    })
}

pub fn load(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => load_from_file(path)?,
        None => Config::default(),
    };
    apply_env(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// Overlays the conventional deployment variables onto `config`. `lookup`
/// is injected so callers and tests control the environment.
pub fn apply_env(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
    let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(group) = get("HAB_GROUP") {
        config.ring.group = group;
    }
    if let Some(org) = get("HAB_ORG") {
        config.ring.org = Some(org);
    }
    if let Some(host) = get("HAB_HTTP_HOST") {
        config.ring.http_host = host;
    }
    if let Some(port) = get("HAB_HTTP_PORT") {
        config.ring.http_port = parse_port("HAB_HTTP_PORT", &port)?;
    }
    if let Some(host) = get("HAB_SUP_HOST") {
        config.ring.sup_host = host;
    }
    if let Some(port) = get("HAB_SUP_PORT") {
        config.ring.sup_port = parse_port("HAB_SUP_PORT", &port)?;
    }
    if let Some(stack_id) = get("AWS_STACK_ID") {
        config.stack.stack_id = Some(stack_id);
    }
    if let Some(user) = get("PGUSER") {
        config.lock.user = Some(user);
    }
    if let Some(password) = get("PGPASSWORD") {
        config.lock.password = Some(password);
    }
    if let Some(host) = get("PGHOST") {
        config.lock.host = Some(host);
    }
    if let Some(database) = get("PGDATABASE") {
        config.lock.database = Some(database);
    }
    if let Some(level) = get("RINGSYNC_LOG") {
        config.logging.level = level;
    }

    Ok(())
}

fn parse_port(key: &str, value: &str) -> Result<u16> {
    value
        .trim()
        .parse()
        .map_err(|err| Error::Config(format!("{key}='{value}' is not a valid port: {err}")))
}
