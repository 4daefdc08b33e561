use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use serde_json::Map;

use crate::config::schema::RegistryConfig;
use crate::error::{Error, Result};
use crate::providers::{KeyValueRegistry, StackOutput, StackProvider};
use crate::schema::{Schema, SchemaSet};
use crate::targets::{targets_for_output, TargetSpecifier};
use crate::transform::{Transform, TransformPipeline};
use crate::tree::{self, ConfigTree};

enum ServiceState {
    InProgress,
    Resolved(ConfigTree),
}

/// State shared by every service resolved while answering one request.
/// Stack outputs and the local secret table are read at most once, and each
/// sourced service is resolved at most once.
#[derive(Default)]
struct ResolutionContext {
    services: HashMap<String, ServiceState>,
    chain: Vec<String>,
    stack_outputs: Option<Arc<Vec<StackOutput>>>,
    local_secrets: Option<Arc<ConfigTree>>,
}

pub struct Resolver {
    schemas: Arc<SchemaSet>,
    stack: Arc<dyn StackProvider>,
    registry: Arc<dyn KeyValueRegistry>,
    transforms: TransformPipeline,
    paths: RegistryConfig,
}

impl Resolver {
    pub fn new(
        schemas: Arc<SchemaSet>,
        stack: Arc<dyn StackProvider>,
        registry: Arc<dyn KeyValueRegistry>,
        transforms: TransformPipeline,
        paths: RegistryConfig,
    ) -> Self {
        Self {
            schemas,
            stack,
            registry,
            transforms,
            paths,
        }
    }

    pub fn schemas(&self) -> &SchemaSet {
        &self.schemas
    }

    pub fn schema(&self, service: &str) -> Result<&Schema> {
        self.schemas
            .get(service)
            .ok_or_else(|| Error::NotFound(format!("no schema for service '{service}'")))
    }

    /// Resolves `service`, scrubbing `prior` (the ring's current state, if
    /// any) so that fields no other layer provides come out blank.
    pub async fn resolve(&self, service: &str, prior: Option<&ConfigTree>) -> Result<ConfigTree> {
        let mut context = ResolutionContext::default();
        self.resolve_in(service, prior, &mut context).await
    }

    pub async fn read_editable(&self, service: &str) -> Result<ConfigTree> {
        let schema = self.schema(service)?;
        let stored = self
            .registry
            .read(&self.paths.editable_path(service))
            .await?
            .unwrap_or_default();
        Ok(schema.coerce_tree(&stored))
    }

    pub async fn write_editable(&self, service: &str, values: ConfigTree) -> Result<()> {
        self.registry
            .write(&self.paths.editable_path(service), values)
            .await
    }

    fn resolve_in<'a>(
        &'a self,
        service: &'a str,
        prior: Option<&'a ConfigTree>,
        context: &'a mut ResolutionContext,
    ) -> BoxFuture<'a, Result<ConfigTree>> {
        Box::pin(async move {
            match context.services.get(service) {
                Some(ServiceState::Resolved(resolved)) if prior.is_none() => {
                    return Ok(resolved.clone());
                }
                Some(ServiceState::InProgress) => {
                    let mut chain = context.chain.clone();
                    chain.push(service.to_owned());
                    return Err(Error::SourceCycle(chain.join(" -> ")));
                }
                _ => {}
            }

            context
                .services
                .insert(service.to_owned(), ServiceState::InProgress);
            context.chain.push(service.to_owned());
            let resolved = self.compute(service, prior, context).await;
            context.chain.pop();

            match resolved {
                Ok(resolved) => {
                    context
                        .services
                        .insert(service.to_owned(), ServiceState::Resolved(resolved.clone()));
                    Ok(resolved)
                }
                Err(err) => {
                    context.services.remove(service);
                    Err(err)
                }
            }
        })
    }

    async fn compute(
        &self,
        service: &str,
        prior: Option<&ConfigTree>,
        context: &mut ResolutionContext,
    ) -> Result<ConfigTree> {
        let schema = self.schema(service)?;
        tracing::debug!(service, "resolving configuration");

        let outputs = self.stack_outputs(context).await?;
        let stack = self.stack_values(service, schema, &outputs, context).await?;
        let mut editable = self.read_editable(service).await?;
        let defaults = schema.defaults();

        let mut sourced = Map::new();
        for (path, source) in schema.sourced() {
            if tree::remove_path(&mut editable, path.as_slice()).is_some() {
                tracing::warn!(service, source = %source, "ignoring stored override of a sourced field");
            }
            let other = self.resolve_in(&source.service, None, context).await?;
            match tree::get_path(&other, source.path.as_slice()) {
                Some(value) => tree::set_path(
                    &mut sourced,
                    path.as_slice(),
                    schema.coerce(path.as_slice(), value.clone()),
                ),
                None => tracing::debug!(service, source = %source, "sourced field has no value"),
            }
        }

        let blanked = prior.map(|prior| schema.blank(prior)).unwrap_or_default();

        Ok(tree::merge_layers([
            &blanked, &defaults, &sourced, &stack, &editable,
        ]))
    }

    async fn stack_outputs(&self, context: &mut ResolutionContext) -> Result<Arc<Vec<StackOutput>>> {
        if let Some(outputs) = &context.stack_outputs {
            return Ok(outputs.clone());
        }
        if self.stack.last_update_if_complete().await?.is_none() {
            return Err(Error::StackNotReady(
                "stack update in progress or stack unavailable".to_owned(),
            ));
        }
        let outputs = Arc::new(self.stack.read_outputs().await?);
        context.stack_outputs = Some(outputs.clone());
        Ok(outputs)
    }

    async fn local_secrets(&self, context: &mut ResolutionContext) -> Result<Arc<ConfigTree>> {
        if let Some(secrets) = &context.local_secrets {
            return Ok(secrets.clone());
        }
        let secrets = Arc::new(self.transforms.load_local_secrets().await?);
        context.local_secrets = Some(secrets.clone());
        Ok(secrets)
    }

    /// Maps the stack outputs aimed at `service` through their transforms.
    /// All transforms run concurrently; each lands on its own path.
    async fn stack_values(
        &self,
        service: &str,
        schema: &Schema,
        outputs: &[StackOutput],
        context: &mut ResolutionContext,
    ) -> Result<ConfigTree> {
        let mut jobs: Vec<(TargetSpecifier, &str)> = Vec::new();
        for output in outputs {
            let targets =
                match targets_for_output(output.description.as_deref(), output.targets.as_deref()) {
                    Ok(targets) => targets,
                    Err(err) => {
                        tracing::warn!(%err, output = %output.key, "ignoring stack output with malformed targets");
                        continue;
                    }
                };
            for target in targets.into_iter().filter(|target| target.service == service) {
                if schema
                    .descriptor(target.config_path().as_slice())
                    .is_some_and(|descriptor| descriptor.source.is_some())
                {
                    tracing::warn!(output = %output.key, specifier = %target, "stack output targets a sourced field; ignoring");
                    continue;
                }
                jobs.push((target, output.value.as_str()));
            }
        }

        let needs_local = jobs
            .iter()
            .any(|(target, _)| Transform::from_spec(target.transform.as_ref()).uses_local_secrets());
        let local_secrets = if needs_local {
            self.local_secrets(context).await?
        } else {
            Arc::new(Map::new())
        };

        let transforms = &self.transforms;
        let local_secrets = local_secrets.as_ref();
        let results = try_join_all(jobs.iter().map(|(target, value)| async move {
            let transformed = transforms
                .apply(value, target.transform.as_ref(), local_secrets)
                .await?;
            Ok::<_, Error>((target.config_path(), transformed))
        }))
        .await?;

        let mut values = Map::new();
        for (path, value) in results {
            if let Some(value) = value {
                tree::set_path(&mut values, path.as_slice(), schema.coerce(path.as_slice(), value));
            }
        }
        Ok(values)
    }
}
