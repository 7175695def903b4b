//! Metadata service seam
//!
//! The metadata graph stores contexts (experiments, runs), executions,
//! artifacts, and the lineage edges between them. The client never walks the
//! graph itself; traversal is delegated to the service's
//! `query_execution_inputs_and_outputs`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::names::{ArtifactName, ContextName, ExecutionName};

/// Schema titles and well-known metadata keys.
pub mod schema {
    /// Experiment context.
    pub const EXPERIMENT: &str = "system.Experiment";
    /// Experiment-run context.
    pub const EXPERIMENT_RUN: &str = "system.ExperimentRun";
    /// Pipeline-run context (attached to experiments by the pipeline service).
    pub const PIPELINE_RUN: &str = "system.PipelineRun";
    /// Run execution attached to an experiment-run context.
    pub const RUN_EXECUTION: &str = "system.Run";
    /// Generic container execution.
    pub const CONTAINER_EXECUTION: &str = "system.ContainerExecution";
    /// Classification-metrics artifact.
    pub const CLASSIFICATION_METRICS: &str = "system.ClassificationMetrics";
    /// Artifact referencing a live tensorboard run.
    pub const TENSORBOARD_RUN: &str = "system.TensorboardRun";
    /// Logged-model artifact.
    pub const EXPERIMENT_MODEL: &str = "system.ExperimentModel";
    /// Default schema version for system schemas.
    pub const DEFAULT_VERSION: &str = "0.0.1";

    /// Context metadata key holding the run's parameters.
    pub const PARAM_KEY: &str = "_params";
    /// Context metadata key holding the run's summary metrics.
    pub const METRIC_KEY: &str = "_metrics";
    /// Context metadata key holding the run's lifecycle state.
    pub const STATE_KEY: &str = "_state";
    /// Experiment metadata key holding the backing tensorboard resource.
    pub const BACKING_TENSORBOARD_KEY: &str = "backing_tensorboard_resource";
    /// Run metadata key holding the backing tensorboard-run resource.
    pub const BACKING_TENSORBOARD_RUN_KEY: &str = "backing_tensorboard_run_resource";
    /// Tensorboard-run artifact metadata key holding the resource name.
    pub const RESOURCE_NAME_KEY: &str = "resourceName";
}

/// Structured metadata attached to contexts, executions, and artifacts.
pub type MetadataMap = serde_json::Map<String, serde_json::Value>;

/// A metadata context: a named grouping node (experiment or run).
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    /// Resource name.
    pub name: ContextName,
    /// Human-readable name; defaults to the context id.
    pub display_name: String,
    /// Free-form description.
    pub description: String,
    /// Schema title, e.g. [`schema::EXPERIMENT_RUN`].
    pub schema_title: String,
    /// Schema version.
    pub schema_version: String,
    /// Structured metadata (params, metrics, state, ...).
    pub metadata: MetadataMap,
    /// Server-assigned creation time.
    pub create_time: DateTime<Utc>,
    /// Server-assigned last-update time.
    pub update_time: DateTime<Utc>,
}

impl Context {
    /// Create a context value ready for `create_context`.
    #[must_use]
    pub fn new(name: ContextName, schema_title: impl Into<String>) -> Self {
        let display_name = name.context_id.clone();
        Self {
            name,
            display_name,
            description: String::new(),
            schema_title: schema_title.into(),
            schema_version: schema::DEFAULT_VERSION.to_string(),
            metadata: MetadataMap::new(),
            create_time: Utc::now(),
            update_time: Utc::now(),
        }
    }
}

/// Lifecycle state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionState {
    /// Created but not started.
    New,
    /// Currently running.
    Running,
    /// Finished successfully.
    Complete,
    /// Finished with an error.
    Failed,
    /// Skipped; outputs were served from cache.
    Cached,
}

/// A metadata execution: a typed activity with lineage edges.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    /// Resource name.
    pub name: ExecutionName,
    /// Human-readable name.
    pub display_name: String,
    /// Schema title, e.g. [`schema::RUN_EXECUTION`].
    pub schema_title: String,
    /// Lifecycle state.
    pub state: ExecutionState,
    /// Structured metadata.
    pub metadata: MetadataMap,
    /// Server-assigned creation time.
    pub create_time: DateTime<Utc>,
}

impl Execution {
    /// Create an execution value ready for `create_execution`.
    #[must_use]
    pub fn new(name: ExecutionName, schema_title: impl Into<String>) -> Self {
        let display_name = name.execution_id.clone();
        Self {
            name,
            display_name,
            schema_title: schema_title.into(),
            state: ExecutionState::New,
            metadata: MetadataMap::new(),
            create_time: Utc::now(),
        }
    }
}

/// A metadata artifact: a typed, schema-tagged reference to stored data.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    /// Resource name.
    pub name: ArtifactName,
    /// Human-readable name.
    pub display_name: String,
    /// Schema title, e.g. [`schema::CLASSIFICATION_METRICS`].
    pub schema_title: String,
    /// Schema version.
    pub schema_version: String,
    /// URI of the referenced payload; empty for pure-metadata artifacts.
    pub uri: String,
    /// Structured metadata.
    pub metadata: MetadataMap,
    /// Server-assigned creation time.
    pub create_time: DateTime<Utc>,
}

impl Artifact {
    /// Create an artifact value ready for `create_artifact`.
    #[must_use]
    pub fn new(name: ArtifactName, schema_title: impl Into<String>) -> Self {
        let display_name = name.artifact_id.clone();
        Self {
            name,
            display_name,
            schema_title: schema_title.into(),
            schema_version: schema::DEFAULT_VERSION.to_string(),
            uri: String::new(),
            metadata: MetadataMap::new(),
            create_time: Utc::now(),
        }
    }
}

/// Direction of a lineage edge between an execution and an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineageKind {
    /// The artifact is consumed by the execution.
    Input,
    /// The artifact is produced by the execution.
    Output,
}

/// A lineage edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageEvent {
    /// Edge source/sink execution.
    pub execution: ExecutionName,
    /// Edge source/sink artifact.
    pub artifact: ArtifactName,
    /// Edge direction.
    pub kind: LineageKind,
}

/// Inputs and outputs of one execution, as resolved by the service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineageSubgraph {
    /// Artifacts consumed by the execution.
    pub inputs: Vec<Artifact>,
    /// Artifacts produced by the execution.
    pub outputs: Vec<Artifact>,
}

/// Server-side filter for context listings.
#[derive(Debug, Clone, Default)]
pub struct ContextFilter {
    /// Match any of these schema titles; empty matches all.
    pub schema_titles: Vec<String>,
    /// Only children of this context.
    pub parent: Option<ContextName>,
    /// Exact display-name match.
    pub display_name: Option<String>,
}

/// Server-side filter for artifact listings.
#[derive(Debug, Clone, Default)]
pub struct ArtifactFilter {
    /// Match any of these schema titles; empty matches all.
    pub schema_titles: Vec<String>,
    /// Exact display-name match.
    pub display_name: Option<String>,
    /// Only artifacts attached to this context.
    pub in_context: Option<ContextName>,
}

/// CRUD and lineage surface of the metadata service.
pub trait MetadataService: Send + Sync {
    /// Create a context under its id.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyExists`] when the id is taken.
    fn create_context(&self, context: Context) -> Result<Context>;

    /// Fetch a context by name.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when absent.
    fn get_context(&self, name: &ContextName) -> Result<Context>;

    /// Replace a context's mutable fields (display name, metadata).
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when absent.
    fn update_context(&self, context: Context) -> Result<Context>;

    /// List contexts in a project/location matching `filter`.
    ///
    /// # Errors
    ///
    /// Transport errors only; an empty result is not an error.
    fn list_contexts(
        &self,
        project: &str,
        location: &str,
        filter: &ContextFilter,
    ) -> Result<Vec<Context>>;

    /// Record parent/child edges between contexts.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the parent is absent.
    fn add_context_children(&self, parent: &ContextName, children: &[ContextName]) -> Result<()>;

    /// Create an execution under its id.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyExists`] when the id is taken.
    fn create_execution(&self, execution: Execution) -> Result<Execution>;

    /// Fetch an execution by name.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when absent.
    fn get_execution(&self, name: &ExecutionName) -> Result<Execution>;

    /// Replace an execution's mutable fields (state, metadata).
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when absent.
    fn update_execution(&self, execution: Execution) -> Result<Execution>;

    /// Create an artifact under its id.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyExists`] when the id is taken.
    fn create_artifact(&self, artifact: Artifact) -> Result<Artifact>;

    /// Fetch an artifact by name.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when absent.
    fn get_artifact(&self, name: &ArtifactName) -> Result<Artifact>;

    /// Replace an artifact's mutable fields.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when absent.
    fn update_artifact(&self, artifact: Artifact) -> Result<Artifact>;

    /// List artifacts in a project/location matching `filter`.
    ///
    /// # Errors
    ///
    /// Transport errors only; an empty result is not an error.
    fn list_artifacts(
        &self,
        project: &str,
        location: &str,
        filter: &ArtifactFilter,
    ) -> Result<Vec<Artifact>>;

    /// Attach artifacts and executions to a context.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the context is absent.
    fn add_context_artifacts_and_executions(
        &self,
        context: &ContextName,
        artifacts: &[ArtifactName],
        executions: &[ExecutionName],
    ) -> Result<()>;

    /// Write lineage edges.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when an endpoint is absent.
    fn add_execution_events(&self, events: &[LineageEvent]) -> Result<()>;

    /// Resolve the input and output artifacts of an execution.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the execution is absent.
    fn query_execution_inputs_and_outputs(
        &self,
        execution: &ExecutionName,
    ) -> Result<LineageSubgraph>;
}

/// In-memory metadata service for tests and offline tooling.
///
/// Lineage is held as two adjacency maps keyed by execution name; the graph
/// is never traversed recursively.
#[derive(Debug, Default)]
pub struct InMemoryMetadataService {
    contexts: DashMap<String, Context>,
    executions: DashMap<String, Execution>,
    artifacts: DashMap<String, Artifact>,
    child_contexts: DashMap<String, Vec<ContextName>>,
    context_artifacts: DashMap<String, Vec<ArtifactName>>,
    context_executions: DashMap<String, Vec<ExecutionName>>,
    execution_inputs: DashMap<String, Vec<ArtifactName>>,
    execution_outputs: DashMap<String, Vec<ArtifactName>>,
}

impl InMemoryMetadataService {
    /// Create an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Children recorded for `parent`.
    #[must_use]
    pub fn children_of(&self, parent: &ContextName) -> Vec<ContextName> {
        self.child_contexts
            .get(&parent.to_string())
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Artifacts attached to `context`.
    #[must_use]
    pub fn artifacts_in_context(&self, context: &ContextName) -> Vec<ArtifactName> {
        self.context_artifacts
            .get(&context.to_string())
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Executions attached to `context`.
    #[must_use]
    pub fn executions_in_context(&self, context: &ContextName) -> Vec<ExecutionName> {
        self.context_executions
            .get(&context.to_string())
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    fn context_has_parent(&self, child: &ContextName, parent: &ContextName) -> bool {
        self.child_contexts
            .get(&parent.to_string())
            .is_some_and(|children| children.iter().any(|c| c == child))
    }
}

impl MetadataService for InMemoryMetadataService {
    fn create_context(&self, context: Context) -> Result<Context> {
        let key = context.name.to_string();
        if self.contexts.contains_key(&key) {
            return Err(Error::AlreadyExists(key));
        }
        self.contexts.insert(key, context.clone());
        Ok(context)
    }

    fn get_context(&self, name: &ContextName) -> Result<Context> {
        self.contexts
            .get(&name.to_string())
            .map(|c| c.clone())
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    fn update_context(&self, mut context: Context) -> Result<Context> {
        let key = context.name.to_string();
        if !self.contexts.contains_key(&key) {
            return Err(Error::NotFound(key));
        }
        context.update_time = Utc::now();
        self.contexts.insert(key, context.clone());
        Ok(context)
    }

    fn list_contexts(
        &self,
        project: &str,
        location: &str,
        filter: &ContextFilter,
    ) -> Result<Vec<Context>> {
        let mut out: Vec<Context> = self
            .contexts
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|c| c.name.project == project && c.name.location == location)
            .filter(|c| {
                filter.schema_titles.is_empty()
                    || filter.schema_titles.iter().any(|t| *t == c.schema_title)
            })
            .filter(|c| {
                filter
                    .display_name
                    .as_ref()
                    .map_or(true, |d| *d == c.display_name)
            })
            .filter(|c| {
                filter
                    .parent
                    .as_ref()
                    .map_or(true, |p| self.context_has_parent(&c.name, p))
            })
            .collect();
        out.sort_by(|a, b| a.name.context_id.cmp(&b.name.context_id));
        Ok(out)
    }

    fn add_context_children(&self, parent: &ContextName, children: &[ContextName]) -> Result<()> {
        let key = parent.to_string();
        if !self.contexts.contains_key(&key) {
            return Err(Error::NotFound(key));
        }
        let mut entry = self.child_contexts.entry(key).or_default();
        for child in children {
            if !entry.iter().any(|c| c == child) {
                entry.push(child.clone());
            }
        }
        Ok(())
    }

    fn create_execution(&self, execution: Execution) -> Result<Execution> {
        let key = execution.name.to_string();
        if self.executions.contains_key(&key) {
            return Err(Error::AlreadyExists(key));
        }
        self.executions.insert(key, execution.clone());
        Ok(execution)
    }

    fn get_execution(&self, name: &ExecutionName) -> Result<Execution> {
        self.executions
            .get(&name.to_string())
            .map(|e| e.clone())
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    fn update_execution(&self, execution: Execution) -> Result<Execution> {
        let key = execution.name.to_string();
        if !self.executions.contains_key(&key) {
            return Err(Error::NotFound(key));
        }
        self.executions.insert(key, execution.clone());
        Ok(execution)
    }

    fn create_artifact(&self, artifact: Artifact) -> Result<Artifact> {
        let key = artifact.name.to_string();
        if self.artifacts.contains_key(&key) {
            return Err(Error::AlreadyExists(key));
        }
        self.artifacts.insert(key, artifact.clone());
        Ok(artifact)
    }

    fn get_artifact(&self, name: &ArtifactName) -> Result<Artifact> {
        self.artifacts
            .get(&name.to_string())
            .map(|a| a.clone())
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    fn update_artifact(&self, artifact: Artifact) -> Result<Artifact> {
        let key = artifact.name.to_string();
        if !self.artifacts.contains_key(&key) {
            return Err(Error::NotFound(key));
        }
        self.artifacts.insert(key, artifact.clone());
        Ok(artifact)
    }

    fn list_artifacts(
        &self,
        project: &str,
        location: &str,
        filter: &ArtifactFilter,
    ) -> Result<Vec<Artifact>> {
        let in_context: Option<Vec<ArtifactName>> =
            filter.in_context.as_ref().map(|c| self.artifacts_in_context(c));
        let mut out: Vec<Artifact> = self
            .artifacts
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|a| a.name.project == project && a.name.location == location)
            .filter(|a| {
                filter.schema_titles.is_empty()
                    || filter.schema_titles.iter().any(|t| *t == a.schema_title)
            })
            .filter(|a| {
                filter
                    .display_name
                    .as_ref()
                    .map_or(true, |d| *d == a.display_name)
            })
            .filter(|a| {
                in_context
                    .as_ref()
                    .map_or(true, |names| names.iter().any(|n| *n == a.name))
            })
            .collect();
        out.sort_by(|a, b| a.name.artifact_id.cmp(&b.name.artifact_id));
        Ok(out)
    }

    fn add_context_artifacts_and_executions(
        &self,
        context: &ContextName,
        artifacts: &[ArtifactName],
        executions: &[ExecutionName],
    ) -> Result<()> {
        let key = context.to_string();
        if !self.contexts.contains_key(&key) {
            return Err(Error::NotFound(key));
        }
        let mut attached = self.context_artifacts.entry(key.clone()).or_default();
        for artifact in artifacts {
            if !attached.iter().any(|a| a == artifact) {
                attached.push(artifact.clone());
            }
        }
        drop(attached);
        let mut attached = self.context_executions.entry(key).or_default();
        for execution in executions {
            if !attached.iter().any(|e| e == execution) {
                attached.push(execution.clone());
            }
        }
        Ok(())
    }

    fn add_execution_events(&self, events: &[LineageEvent]) -> Result<()> {
        for event in events {
            let exec_key = event.execution.to_string();
            if !self.executions.contains_key(&exec_key) {
                return Err(Error::NotFound(exec_key));
            }
            if !self.artifacts.contains_key(&event.artifact.to_string()) {
                return Err(Error::NotFound(event.artifact.to_string()));
            }
            let map = match event.kind {
                LineageKind::Input => &self.execution_inputs,
                LineageKind::Output => &self.execution_outputs,
            };
            let mut edges = map.entry(exec_key).or_default();
            if !edges.iter().any(|a| *a == event.artifact) {
                edges.push(event.artifact.clone());
            }
        }
        Ok(())
    }

    fn query_execution_inputs_and_outputs(
        &self,
        execution: &ExecutionName,
    ) -> Result<LineageSubgraph> {
        let key = execution.to_string();
        if !self.executions.contains_key(&key) {
            return Err(Error::NotFound(key));
        }
        let resolve = |names: Option<dashmap::mapref::one::Ref<'_, String, Vec<ArtifactName>>>| {
            names
                .map(|v| v.value().clone())
                .unwrap_or_default()
                .iter()
                .filter_map(|n| self.artifacts.get(&n.to_string()).map(|a| a.clone()))
                .collect::<Vec<_>>()
        };
        Ok(LineageSubgraph {
            inputs: resolve(self.execution_inputs.get(&key)),
            outputs: resolve(self.execution_outputs.get(&key)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(id: &str, schema_title: &str) -> Context {
        Context::new(ContextName::new("p", "l", id), schema_title)
    }

    #[test]
    fn test_context_create_get_update() {
        let svc = InMemoryMetadataService::new();
        let created = svc.create_context(ctx("exp", schema::EXPERIMENT)).unwrap();
        assert_eq!(created.display_name, "exp");

        let mut fetched = svc.get_context(&created.name).unwrap();
        fetched
            .metadata
            .insert("k".to_string(), serde_json::json!(1));
        svc.update_context(fetched).unwrap();

        let back = svc.get_context(&created.name).unwrap();
        assert_eq!(back.metadata["k"], serde_json::json!(1));
    }

    #[test]
    fn test_context_create_conflict() {
        let svc = InMemoryMetadataService::new();
        svc.create_context(ctx("exp", schema::EXPERIMENT)).unwrap();
        let err = svc.create_context(ctx("exp", schema::EXPERIMENT)).unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let svc = InMemoryMetadataService::new();
        let err = svc.get_context(&ContextName::new("p", "l", "nope")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_list_contexts_by_parent_and_schema() {
        let svc = InMemoryMetadataService::new();
        let exp = svc.create_context(ctx("exp", schema::EXPERIMENT)).unwrap();
        let run = svc
            .create_context(ctx("exp-r1", schema::EXPERIMENT_RUN))
            .unwrap();
        svc.create_context(ctx("other", schema::EXPERIMENT_RUN))
            .unwrap();
        svc.add_context_children(&exp.name, &[run.name.clone()])
            .unwrap();

        let filter = ContextFilter {
            schema_titles: vec![schema::EXPERIMENT_RUN.to_string()],
            parent: Some(exp.name),
            display_name: None,
        };
        let listed = svc.list_contexts("p", "l", &filter).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, run.name);
    }

    #[test]
    fn test_lineage_adjacency() {
        let svc = InMemoryMetadataService::new();
        let exec = svc
            .create_execution(Execution::new(
                ExecutionName::new("p", "l", "exp-r1"),
                schema::RUN_EXECUTION,
            ))
            .unwrap();
        let input = svc
            .create_artifact(Artifact::new(
                ArtifactName::new("p", "l", "in"),
                schema::TENSORBOARD_RUN,
            ))
            .unwrap();
        let output = svc
            .create_artifact(Artifact::new(
                ArtifactName::new("p", "l", "out"),
                schema::EXPERIMENT_MODEL,
            ))
            .unwrap();

        svc.add_execution_events(&[
            LineageEvent {
                execution: exec.name.clone(),
                artifact: input.name.clone(),
                kind: LineageKind::Input,
            },
            LineageEvent {
                execution: exec.name.clone(),
                artifact: output.name.clone(),
                kind: LineageKind::Output,
            },
        ])
        .unwrap();

        let subgraph = svc.query_execution_inputs_and_outputs(&exec.name).unwrap();
        assert_eq!(subgraph.inputs.len(), 1);
        assert_eq!(subgraph.inputs[0].name, input.name);
        assert_eq!(subgraph.outputs.len(), 1);
        assert_eq!(subgraph.outputs[0].name, output.name);
    }

    #[test]
    fn test_attach_to_context() {
        let svc = InMemoryMetadataService::new();
        let run = svc
            .create_context(ctx("exp-r1", schema::EXPERIMENT_RUN))
            .unwrap();
        let artifact = svc
            .create_artifact(Artifact::new(
                ArtifactName::new("p", "l", "metrics"),
                schema::CLASSIFICATION_METRICS,
            ))
            .unwrap();
        svc.add_context_artifacts_and_executions(&run.name, &[artifact.name.clone()], &[])
            .unwrap();
        // Idempotent re-attach.
        svc.add_context_artifacts_and_executions(&run.name, &[artifact.name.clone()], &[])
            .unwrap();
        assert_eq!(svc.artifacts_in_context(&run.name).len(), 1);
    }
}
