//! Experiment-run resource
//!
//! A run is a metadata context whose id is `{experiment}-{run}`. Its params,
//! summary metrics, and lifecycle state live in the context metadata under
//! well-known keys; the optional backing tensorboard run is recorded both as
//! a metadata key and as a lineage artifact attached to the context.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::api::metadata::{schema, Artifact, Context, Execution, MetadataService};
use crate::error::{Error, Result};
use crate::names::{run_context_id, ArtifactName, ContextName, ExecutionName, TensorboardRunName};

use super::{Experiment, ParamValue, RunState};

/// One training/analysis invocation under an experiment.
#[derive(Debug, Clone)]
pub struct ExperimentRun {
    context: Context,
    run_name: String,
}

impl ExperimentRun {
    /// Create the run context (or adopt a concurrently created one), mark it
    /// RUNNING, and attach it to the experiment.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a bad or over-long name; service
    /// errors unchanged.
    pub fn create(
        metadata: &Arc<dyn MetadataService>,
        experiment: &Experiment,
        name: &str,
    ) -> Result<Self> {
        let context_id = run_context_id(experiment.name(), name)?;
        let parent = experiment.context_name();
        let context_name = ContextName::new(&parent.project, &parent.location, &context_id);

        let mut context = Context::new(context_name.clone(), schema::EXPERIMENT_RUN);
        context.display_name = name.to_string();
        context.metadata.insert(
            schema::STATE_KEY.to_string(),
            serde_json::Value::String(RunState::Running.as_str().to_string()),
        );
        context
            .metadata
            .insert(schema::PARAM_KEY.to_string(), serde_json::json!({}));
        context
            .metadata
            .insert(schema::METRIC_KEY.to_string(), serde_json::json!({}));

        let context = match metadata.create_context(context) {
            Ok(created) => {
                info!(run = %context_id, "created experiment run");
                created
            }
            Err(err) if err.is_already_exists() => {
                // Another process won the create; adopt its context.
                let mut existing = Self::load_run_context(metadata, &context_name)?;
                existing.metadata.insert(
                    schema::STATE_KEY.to_string(),
                    serde_json::Value::String(RunState::Running.as_str().to_string()),
                );
                metadata.update_context(existing)?
            }
            Err(err) => return Err(err),
        };

        metadata.add_context_children(parent, &[context_name.clone()])?;
        Self::ensure_run_execution(metadata, &context_name)?;

        Ok(Self {
            context,
            run_name: name.to_string(),
        })
    }

    /// Load an existing run and mark it RUNNING again.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the run does not exist;
    /// [`Error::InvalidArgument`] for a bad name or wrong schema.
    pub fn resume(
        metadata: &Arc<dyn MetadataService>,
        experiment: &Experiment,
        name: &str,
    ) -> Result<Self> {
        let context_id = run_context_id(experiment.name(), name)?;
        let parent = experiment.context_name();
        let context_name = ContextName::new(&parent.project, &parent.location, &context_id);

        let mut context = Self::load_run_context(metadata, &context_name)?;
        context.metadata.insert(
            schema::STATE_KEY.to_string(),
            serde_json::Value::String(RunState::Running.as_str().to_string()),
        );
        let context = metadata.update_context(context)?;

        Ok(Self {
            context,
            run_name: name.to_string(),
        })
    }

    fn load_run_context(
        metadata: &Arc<dyn MetadataService>,
        name: &ContextName,
    ) -> Result<Context> {
        let context = metadata.get_context(name)?;
        if context.schema_title != schema::EXPERIMENT_RUN {
            return Err(Error::InvalidArgument(format!(
                "context {} exists but is a {}, not an experiment run",
                name.context_id, context.schema_title
            )));
        }
        Ok(context)
    }

    /// The run execution shares the `{experiment}-{run}` id with the context.
    fn ensure_run_execution(
        metadata: &Arc<dyn MetadataService>,
        context_name: &ContextName,
    ) -> Result<()> {
        let execution_name = ExecutionName::new(
            &context_name.project,
            &context_name.location,
            &context_name.context_id,
        );
        let mut execution = Execution::new(execution_name.clone(), schema::RUN_EXECUTION);
        execution.state = crate::api::metadata::ExecutionState::Running;
        match metadata.create_execution(execution) {
            Ok(_) => {}
            Err(err) if err.is_already_exists() => {}
            Err(err) => return Err(err),
        }
        metadata.add_context_artifacts_and_executions(context_name, &[], &[execution_name])
    }

    /// The run's short name (without the experiment prefix).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.run_name
    }

    /// The run's context resource name.
    #[must_use]
    pub const fn context_name(&self) -> &ContextName {
        &self.context.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RunState {
        match self
            .context
            .metadata
            .get(schema::STATE_KEY)
            .and_then(serde_json::Value::as_str)
        {
            Some("COMPLETE") => RunState::Complete,
            Some("FAILED") => RunState::Failed,
            _ => RunState::Running,
        }
    }

    /// Persist a state transition.
    ///
    /// # Errors
    ///
    /// Service errors unchanged.
    pub fn set_state(&mut self, metadata: &Arc<dyn MetadataService>, state: RunState) -> Result<()> {
        self.context.metadata.insert(
            schema::STATE_KEY.to_string(),
            serde_json::Value::String(state.as_str().to_string()),
        );
        self.context = metadata.update_context(self.context.clone())?;
        Ok(())
    }

    /// The run's parameters.
    #[must_use]
    pub fn params(&self) -> BTreeMap<String, ParamValue> {
        self.scalar_map(schema::PARAM_KEY)
    }

    /// The run's summary metrics.
    #[must_use]
    pub fn metrics(&self) -> BTreeMap<String, ParamValue> {
        self.scalar_map(schema::METRIC_KEY)
    }

    fn scalar_map(&self, key: &str) -> BTreeMap<String, ParamValue> {
        self.context
            .metadata
            .get(key)
            .and_then(serde_json::Value::as_object)
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| {
                        ParamValue::try_from(v.clone()).ok().map(|p| (k.clone(), p))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Merge `entries` into the run's parameters (last writer wins).
    ///
    /// # Errors
    ///
    /// Service errors unchanged.
    pub fn update_params(
        &mut self,
        metadata: &Arc<dyn MetadataService>,
        entries: BTreeMap<String, ParamValue>,
    ) -> Result<()> {
        self.merge_scalar_map(metadata, schema::PARAM_KEY, entries)
    }

    /// Merge `entries` into the run's summary metrics (last writer wins).
    ///
    /// # Errors
    ///
    /// Service errors unchanged.
    pub fn update_metrics(
        &mut self,
        metadata: &Arc<dyn MetadataService>,
        entries: BTreeMap<String, ParamValue>,
    ) -> Result<()> {
        self.merge_scalar_map(metadata, schema::METRIC_KEY, entries)
    }

    fn merge_scalar_map(
        &mut self,
        metadata: &Arc<dyn MetadataService>,
        key: &str,
        entries: BTreeMap<String, ParamValue>,
    ) -> Result<()> {
        let slot = self
            .context
            .metadata
            .entry(key.to_string())
            .or_insert_with(|| serde_json::json!({}));
        if let serde_json::Value::Object(map) = slot {
            for (name, value) in entries {
                map.insert(name, value.to_json());
            }
        }
        self.context = metadata.update_context(self.context.clone())?;
        Ok(())
    }

    /// The backing tensorboard run recorded on this run, if any.
    #[must_use]
    pub fn tensorboard_run(&self) -> Option<TensorboardRunName> {
        self.context
            .metadata
            .get(schema::BACKING_TENSORBOARD_RUN_KEY)
            .and_then(serde_json::Value::as_str)
            .and_then(|s| TensorboardRunName::parse(s).ok())
    }

    /// Record `tensorboard_run` as this run's time-series backend: write the
    /// metadata key and attach a tensorboard-run lineage artifact.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when a different tensorboard run is already
    /// bound; service errors unchanged.
    pub fn bind_tensorboard_run(
        &mut self,
        metadata: &Arc<dyn MetadataService>,
        tensorboard_run: &TensorboardRunName,
    ) -> Result<()> {
        if let Some(existing) = self.tensorboard_run() {
            if existing == *tensorboard_run {
                return Ok(());
            }
            return Err(Error::InvalidArgument(format!(
                "run {:?} is already backed by {existing}",
                self.run_name
            )));
        }

        let artifact_id = format!("{}-tb-run", self.context.name.context_id);
        let artifact_name = ArtifactName::new(
            &self.context.name.project,
            &self.context.name.location,
            &artifact_id,
        );
        let mut artifact = Artifact::new(artifact_name.clone(), schema::TENSORBOARD_RUN);
        artifact.uri = tensorboard_run.to_string();
        artifact.metadata.insert(
            schema::RESOURCE_NAME_KEY.to_string(),
            serde_json::Value::String(tensorboard_run.to_string()),
        );
        let artifact = match metadata.create_artifact(artifact) {
            Ok(created) => created,
            Err(err) if err.is_already_exists() => metadata.get_artifact(&artifact_name)?,
            Err(err) => return Err(err),
        };
        metadata.add_context_artifacts_and_executions(
            &self.context.name,
            &[artifact.name],
            &[],
        )?;

        self.context.metadata.insert(
            schema::BACKING_TENSORBOARD_RUN_KEY.to_string(),
            serde_json::Value::String(tensorboard_run.to_string()),
        );
        self.context = metadata.update_context(self.context.clone())?;
        Ok(())
    }

    pub(crate) const fn context(&self) -> &Context {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::metadata::InMemoryMetadataService;
    use crate::names::TensorboardName;

    fn setup() -> (Arc<dyn MetadataService>, Experiment) {
        let metadata: Arc<dyn MetadataService> = Arc::new(InMemoryMetadataService::new());
        let experiment = Experiment::get_or_create(&metadata, "p", "l", "exp", None).unwrap();
        (metadata, experiment)
    }

    #[test]
    fn test_create_initializes_running() {
        let (metadata, experiment) = setup();
        let run = ExperimentRun::create(&metadata, &experiment, "r1").unwrap();
        assert_eq!(run.name(), "r1");
        assert_eq!(run.context_name().context_id, "exp-r1");
        assert_eq!(run.state(), RunState::Running);

        // Run execution carries the same combined id.
        assert!(metadata
            .get_execution(&ExecutionName::new("p", "l", "exp-r1"))
            .is_ok());
    }

    #[test]
    fn test_create_adopts_existing_context() {
        let (metadata, experiment) = setup();
        let first = ExperimentRun::create(&metadata, &experiment, "r1").unwrap();
        let second = ExperimentRun::create(&metadata, &experiment, "r1").unwrap();
        assert_eq!(first.context_name(), second.context_name());
    }

    #[test]
    fn test_resume_requires_existing_run() {
        let (metadata, experiment) = setup();
        assert!(ExperimentRun::resume(&metadata, &experiment, "ghost")
            .unwrap_err()
            .is_not_found());

        let mut created = ExperimentRun::create(&metadata, &experiment, "r1").unwrap();
        created.set_state(&metadata, RunState::Complete).unwrap();

        let resumed = ExperimentRun::resume(&metadata, &experiment, "r1").unwrap();
        assert_eq!(resumed.state(), RunState::Running);
    }

    #[test]
    fn test_params_merge_last_writer_wins() {
        let (metadata, experiment) = setup();
        let mut run = ExperimentRun::create(&metadata, &experiment, "r1").unwrap();

        let mut first = BTreeMap::new();
        first.insert("lr".to_string(), ParamValue::Float(0.01));
        first.insert("dropout".to_string(), ParamValue::Float(0.2));
        run.update_params(&metadata, first).unwrap();

        let mut second = BTreeMap::new();
        second.insert("lr".to_string(), ParamValue::Float(0.001));
        run.update_params(&metadata, second).unwrap();

        let params = run.params();
        assert_eq!(params["lr"], ParamValue::Float(0.001));
        assert_eq!(params["dropout"], ParamValue::Float(0.2));
    }

    #[test]
    fn test_state_transition_persists() {
        let (metadata, experiment) = setup();
        let mut run = ExperimentRun::create(&metadata, &experiment, "r1").unwrap();
        run.set_state(&metadata, RunState::Failed).unwrap();

        let raw = metadata.get_context(run.context_name()).unwrap();
        assert_eq!(raw.metadata[schema::STATE_KEY], "FAILED");
    }

    #[test]
    fn test_bind_tensorboard_run_creates_artifact() {
        let (metadata, experiment) = setup();
        let mut run = ExperimentRun::create(&metadata, &experiment, "r1").unwrap();

        let tb_run = TensorboardName::new("p", "l", "tb")
            .experiment("exp")
            .run("abc");
        run.bind_tensorboard_run(&metadata, &tb_run).unwrap();
        assert_eq!(run.tensorboard_run(), Some(tb_run.clone()));

        let artifact = metadata
            .get_artifact(&ArtifactName::new("p", "l", "exp-r1-tb-run"))
            .unwrap();
        assert_eq!(artifact.schema_title, schema::TENSORBOARD_RUN);
        assert_eq!(
            artifact.metadata[schema::RESOURCE_NAME_KEY],
            tb_run.to_string()
        );

        // Idempotent for the same run; rejected for a different one.
        run.bind_tensorboard_run(&metadata, &tb_run).unwrap();
        let other = TensorboardName::new("p", "l", "tb")
            .experiment("exp")
            .run("xyz");
        assert!(run.bind_tensorboard_run(&metadata, &other).is_err());
    }

    #[test]
    fn test_run_name_length_boundary() {
        let (metadata, experiment) = setup();
        // "exp-" is 4 chars; 124 more lands exactly on 128.
        let ok = "r".repeat(124);
        assert!(ExperimentRun::create(&metadata, &experiment, &ok).is_ok());
        let too_long = "r".repeat(125);
        assert!(ExperimentRun::create(&metadata, &experiment, &too_long).is_err());
    }
}
