mod cli;

use std::path::Path;
use std::sync::Arc;

use ringsync_core::config::LockConfig;
use ringsync_core::lock::{LockBackend, MemoryLock, PgAdvisoryLock};
use ringsync_core::providers::files::{FileSecrets, FsObjectStore};
use ringsync_core::providers::habitat::HabitatRing;
use ringsync_core::providers::parameters::RingParameters;
use ringsync_core::providers::RingClient;
use ringsync_core::{
    BatchReport, ConfigTree, Error, FlushOutcome, LockOutcome, Providers, RingSync,
};
use serde::Serialize;
use serde_json::Value;

fn main() {
    if let Err(error) = run() {
        eprintln!("ringsync failed: {error}");
        std::process::exit(1);
    }
}

fn run() -> ringsync_core::Result<()> {
    let args = cli::Cli::parse_args();
    let config = ringsync_core::config::load(args.config.as_deref())?;
    ringsync_core::logging::init_tracing(&config.logging);
    ringsync_core::config::validate_config(&config)?;

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|err| Error::Config(format!("failed to create tokio runtime: {err}")))?;
    runtime.block_on(execute(config, args.command, args.output))
}

async fn execute(
    config: ringsync_core::Config,
    command: cli::Command,
    output: cli::OutputFormat,
) -> ringsync_core::Result<()> {
    let schemas = ringsync_core::schema::load_schemas(Path::new(&config.schemas.dir))?;

    let ring: Arc<dyn RingClient> = Arc::new(HabitatRing::new(&config.ring, config.retry.clone())?);
    let parameters = Arc::new(
        RingParameters::new(
            ring.clone(),
            config.ring.target(),
            config.ring.parameters_service.clone(),
        )
        .with_stack_id(config.stack.stack_id.clone()),
    );
    let lock = build_lock(&config.lock, ring.as_ref(), &config.ring.target()).await?;
    let providers = Providers {
        stack: parameters.clone(),
        secrets: Arc::new(FileSecrets::new(&config.secrets.file)),
        registry: parameters,
        objects: Arc::new(FsObjectStore::new(&config.objects.root)),
        ring,
        lock,
    };
    let sync = RingSync::new(&config, schemas, providers)?;

    match command {
        cli::Command::Schemas { service } => match service {
            Some(service) => print(output, sync.schema(&service)?),
            None => print(output, sync.schemas()),
        },
        cli::Command::Resolve { service } => print(output, &sync.resolve(&service).await?),
        cli::Command::Flush { service, no_lock } => flush(&sync, service, no_lock, output).await,
        cli::Command::Editable { service } => print(output, &sync.read_editable(&service).await?),
        cli::Command::Set {
            service,
            assignments,
        } => {
            let patch = parse_assignments(&assignments)?;
            let outcome = sync.update_editable(&service, patch).await?;
            print(output, &outcome)
        }
        cli::Command::Ring { service } => match sync.read_ring(&service).await? {
            Some(current) => print(output, &current),
            None => Err(Error::NotFound(format!("{service} is not running in the ring"))),
        },
    }
}

/// Postgres when connection settings exist (possibly borrowed from a running
/// service's `db` section), otherwise an in-process lock.
async fn build_lock(
    config: &LockConfig,
    ring: &dyn RingClient,
    target: &ringsync_core::providers::RingTarget,
) -> ringsync_core::Result<Arc<dyn LockBackend>> {
    let mut config = config.clone();
    if !config.is_configured() {
        if let Some(service) = config.fallback_service.clone() {
            match ring.read(&service, target).await {
                Ok(Some(current)) => config = config.with_fallback(&current),
                Ok(None) => tracing::debug!(service = %service, "lock fallback service not running"),
                Err(err) => tracing::warn!(%err, service = %service, "could not read lock fallback service"),
            }
        }
    }

    if config.is_configured() {
        Ok(Arc::new(PgAdvisoryLock::new(&config)?))
    } else {
        tracing::info!("no lock database configured; using an in-process lock");
        Ok(Arc::new(MemoryLock::default()))
    }
}

async fn flush(
    sync: &RingSync,
    service: Option<String>,
    no_lock: bool,
    output: cli::OutputFormat,
) -> ringsync_core::Result<()> {
    match (service, no_lock) {
        (Some(service), true) => print(output, &sync.flush(&service).await?),
        (Some(service), false) => match sync.flush_locked(&service).await {
            LockOutcome::Acquired(outcome) => print(output, &outcome?),
            LockOutcome::Skipped(reason) => print(output, &FlushOutcome::Skipped(reason)),
        },
        (None, no_lock) => {
            let report = if no_lock {
                sync.flush_all().await
            } else {
                match sync.flush_all_locked().await {
                    Some(report) => report,
                    None => {
                        tracing::info!("convergence lock not acquired; nothing flushed");
                        return Ok(());
                    }
                }
            };
            print(output, &report)?;
            ensure_clean(&report)
        }
    }
}

fn ensure_clean(report: &BatchReport) -> ringsync_core::Result<()> {
    if report.is_clean() {
        return Ok(());
    }
    let failed: Vec<&str> = report.failed.keys().map(String::as_str).collect();
    Err(Error::Unconverged(format!(
        "{} service(s) failed: {}",
        failed.len(),
        failed.join(", ")
    )))
}

/// Builds an override patch from `section[.subsection].config=value` pairs.
/// Values that parse as JSON scalars keep that type; anything else is text.
fn parse_assignments(assignments: &[String]) -> ringsync_core::Result<ConfigTree> {
    let mut patch = ConfigTree::new();
    for assignment in assignments {
        let (path, raw) = assignment.split_once('=').ok_or_else(|| {
            Error::Validation(format!("'{assignment}' must look like section.config=value"))
        })?;
        let keys: Vec<&str> = path.split('.').map(str::trim).collect();
        if keys.len() < 2 || keys.iter().any(|key| key.is_empty()) {
            return Err(Error::Validation(format!(
                "'{path}' must name a section and a config"
            )));
        }
        let value = match serde_json::from_str::<Value>(raw) {
            Ok(parsed @ (Value::Bool(_) | Value::Number(_))) => parsed,
            _ => Value::String(raw.to_owned()),
        };
        ringsync_core::tree::set_path(&mut patch, keys.as_slice(), value);
    }
    Ok(patch)
}

fn print<T: Serialize + ?Sized>(output: cli::OutputFormat, value: &T) -> ringsync_core::Result<()> {
    let rendered = match output {
        cli::OutputFormat::Json => serde_json::to_string_pretty(value)?,
        cli::OutputFormat::Text => {
            let value = serde_json::to_value(value)?;
            let mut lines = Vec::new();
            render_text(&value, "", &mut lines);
            lines.join("\n")
        }
    };
    println!("{rendered}");
    Ok(())
}

fn render_text(value: &Value, prefix: &str, lines: &mut Vec<String>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                render_text(child, &path, lines);
            }
        }
        Value::String(text) => lines.push(format!("{prefix} = {text}")),
        other => lines.push(format!("{prefix} = {other}")),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn assignments_become_a_nested_patch() {
        let patch = parse_assignments(&[
            "db.port=5433".to_owned(),
            "db.pool.name=main".to_owned(),
            "features.enabled=true".to_owned(),
        ])
        .expect("valid assignments");
        assert_eq!(
            Value::Object(patch),
            json!({"db": {"port": 5433, "pool": {"name": "main"}}, "features": {"enabled": true}})
        );
    }

    #[test]
    fn rejects_assignments_without_a_section() {
        assert!(parse_assignments(&["port=5433".to_owned()]).is_err());
        assert!(parse_assignments(&["db.port".to_owned()]).is_err());
    }

    #[test]
    fn failed_sweeps_become_errors() {
        let mut report = BatchReport::default();
        report.up_to_date.insert("hubs".to_owned());
        assert!(ensure_clean(&report).is_ok());

        report
            .failed
            .insert("reticulum".to_owned(), "ring unreachable".to_owned());
        let error = ensure_clean(&report).expect_err("failed service");
        assert!(matches!(error, Error::Unconverged(ref detail) if detail.contains("reticulum")));
    }

    #[test]
    fn text_output_flattens_trees() {
        let mut lines = Vec::new();
        render_text(&json!({"db": {"port": 5433, "host": "h"}}), "", &mut lines);
        assert_eq!(lines, vec!["db.host = h", "db.port = 5433"]);
    }
}
