//! Tracker
//!
//! The user-facing state machine for experiment and run lifecycle:
//!
//! ```text
//! UNBOUND ──init(experiment)──► EXPERIMENT_BOUND
//! EXPERIMENT_BOUND ──start_run──► RUN_ACTIVE
//! RUN_ACTIVE ──end_run──► EXPERIMENT_BOUND
//! any ──init──► re-bind
//! ```
//!
//! A tracker is an explicit value callers hold; it owns at most one current
//! run and is not meant for concurrent mutation from multiple threads. The
//! [`global`](super::global) module offers a thread-local wrapper for the
//! implicit-current-tracker ergonomics.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use tracing::warn;
use uuid::Uuid;

use crate::api::metadata::{schema, Artifact, MetadataService};
use crate::api::tensorboard::{
    get_or_create_experiment, get_or_create_run, TensorboardService,
};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::event::{DataClass, ValueMetadata};
use crate::limits::UploadLimits;
use crate::names::{validate_resource_id, ArtifactName, ContextName, ExecutionName, TensorboardName};
use crate::serializer::{SerializableModel, SerializerRegistry};
use crate::uploader::{RateLimiter, ScalarSender, UploadStats};

use super::dataframe::{experiment_rows, ExperimentRow};
use super::{
    ClassificationMetrics, Experiment, ExperimentRun, ExecutionScope, ParamValue, RunState,
};

/// How `init` binds the experiment's backing tensorboard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TensorboardOption {
    /// Resolve the project default, creating it when absent.
    #[default]
    Default,
    /// Bind this tensorboard instance.
    Instance(TensorboardName),
    /// No backing tensorboard; time-series logging will be rejected.
    Disabled,
}

/// Arguments to [`Tracker::init`].
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Project id.
    pub project: String,
    /// Location id.
    pub location: String,
    /// Experiment to bind, if any.
    pub experiment: Option<String>,
    /// Description for a newly created experiment.
    pub description: Option<String>,
    /// Backing-tensorboard binding.
    pub tensorboard: TensorboardOption,
}

impl InitOptions {
    /// Options binding no experiment.
    #[must_use]
    pub fn new(project: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            location: location.into(),
            experiment: None,
            description: None,
            tensorboard: TensorboardOption::default(),
        }
    }

    /// Bind `experiment`.
    #[must_use]
    pub fn experiment(mut self, experiment: impl Into<String>) -> Self {
        self.experiment = Some(experiment.into());
        self
    }

    /// Describe a newly created experiment.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Choose the backing-tensorboard binding.
    #[must_use]
    pub fn tensorboard(mut self, tensorboard: TensorboardOption) -> Self {
        self.tensorboard = tensorboard;
        self
    }
}

struct ActiveRun {
    run: ExperimentRun,
    sender: Option<ScalarSender>,
    ts_steps: FxHashMap<String, i64>,
}

/// Experiment-tracking entry point.
pub struct Tracker {
    metadata: Arc<dyn MetadataService>,
    tensorboard_service: Arc<dyn TensorboardService>,
    clock: Arc<dyn Clock>,
    limits: UploadLimits,
    serializers: SerializerRegistry,
    project: String,
    location: String,
    experiment: Option<Experiment>,
    backing_tensorboard: Option<TensorboardName>,
    active: Option<ActiveRun>,
    stats: Arc<Mutex<UploadStats>>,
}

impl Tracker {
    /// Create an unbound tracker over the given service handles.
    #[must_use]
    pub fn new(
        metadata: Arc<dyn MetadataService>,
        tensorboard_service: Arc<dyn TensorboardService>,
    ) -> Self {
        Self {
            metadata,
            tensorboard_service,
            clock: Arc::new(SystemClock),
            limits: UploadLimits::default(),
            serializers: SerializerRegistry::new(),
            project: String::new(),
            location: String::new(),
            experiment: None,
            backing_tensorboard: None,
            active: None,
            stats: Arc::new(Mutex::new(UploadStats::default())),
        }
    }

    /// Override the clock (tests).
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override the upload limits for time-series logging.
    #[must_use]
    pub fn with_limits(mut self, limits: UploadLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Accept logged models from `framework`.
    pub fn register_model_framework(&mut self, framework: impl Into<String>) {
        self.serializers.register(framework);
    }

    /// Bind (or re-bind) the tracker to a project, location, and optionally
    /// an experiment with a backing tensorboard.
    ///
    /// An active run is ended as COMPLETE before re-binding.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a tensorboard binding without an
    /// experiment; service errors unchanged.
    pub fn init(&mut self, options: InitOptions) -> Result<()> {
        if self.active.is_some() {
            warn!("re-initializing with an active run; ending it as COMPLETE");
            self.end_run(RunState::Complete)?;
        }
        self.project = options.project;
        self.location = options.location;
        self.experiment = None;
        self.backing_tensorboard = None;

        let Some(name) = options.experiment else {
            if matches!(options.tensorboard, TensorboardOption::Instance(_)) {
                return Err(Error::InvalidArgument(
                    "binding a tensorboard requires an experiment".to_string(),
                ));
            }
            return Ok(());
        };

        let mut experiment = Experiment::get_or_create(
            &self.metadata,
            &self.project,
            &self.location,
            &name,
            options.description.as_deref(),
        )?;

        match options.tensorboard {
            TensorboardOption::Instance(tensorboard) => {
                self.tensorboard_service.get_tensorboard(&tensorboard)?;
                experiment.assign_backing_tensorboard(&self.metadata, &tensorboard)?;
                self.backing_tensorboard = Some(tensorboard);
            }
            TensorboardOption::Default => {
                let tensorboard = match experiment.backing_tensorboard() {
                    Some(existing) => existing,
                    None => {
                        let resolved = Experiment::resolve_default_tensorboard(
                            &self.tensorboard_service,
                            &self.project,
                            &self.location,
                        )?;
                        experiment.assign_backing_tensorboard(&self.metadata, &resolved)?;
                        resolved
                    }
                };
                self.backing_tensorboard = Some(tensorboard);
            }
            TensorboardOption::Disabled => {}
        }

        self.experiment = Some(experiment);
        Ok(())
    }

    /// The bound experiment, if any.
    #[must_use]
    pub const fn experiment(&self) -> Option<&Experiment> {
        self.experiment.as_ref()
    }

    /// The current run, if one is active.
    #[must_use]
    pub fn current_run(&self) -> Option<&ExperimentRun> {
        self.active.as_ref().map(|a| &a.run)
    }

    /// Counters for time-series writes issued by this tracker.
    ///
    /// # Panics
    ///
    /// Panics if the stats mutex is poisoned.
    #[must_use]
    pub fn stats(&self) -> UploadStats {
        *self.stats.lock().expect("stats poisoned")
    }

    /// Start (or with `resume`, reload) the run named `name` and make it
    /// current. An already-active run is ended as COMPLETE first.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when no experiment is bound or the name is
    /// invalid; [`Error::NotFound`] for `resume` on a missing run.
    pub fn start_run(&mut self, name: &str, resume: bool) -> Result<&ExperimentRun> {
        if self.experiment.is_none() {
            return Err(Error::InvalidArgument(
                "bind an experiment with init before starting a run".to_string(),
            ));
        }
        if self.active.is_some() {
            warn!(run = name, "starting a new run while one is active; ending the active run as COMPLETE");
            self.end_run(RunState::Complete)?;
        }
        let metadata = self.metadata.clone();
        let experiment = self
            .experiment
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("no experiment bound".to_string()))?;
        let run = if resume {
            ExperimentRun::resume(&metadata, experiment, name)?
        } else {
            ExperimentRun::create(&metadata, experiment, name)?
        };
        let active = self.active.insert(ActiveRun {
            run,
            sender: None,
            ts_steps: FxHashMap::default(),
        });
        Ok(&active.run)
    }

    /// End the current run with `state`, flushing pending time series.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when no run is active; service errors
    /// unchanged.
    pub fn end_run(&mut self, state: RunState) -> Result<()> {
        let mut active = self.active.take().ok_or_else(|| {
            Error::InvalidArgument("no run is active; call start_run first".to_string())
        })?;
        if let Some(sender) = active.sender.as_mut() {
            sender.flush()?;
        }
        active.run.set_state(&self.metadata, state)
    }

    fn active_mut(&mut self) -> Result<&mut ActiveRun> {
        self.active.as_mut().ok_or_else(|| {
            Error::InvalidArgument("no run is active; call start_run first".to_string())
        })
    }

    /// Merge `params` into the current run (last writer wins).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when no run is active; service errors
    /// unchanged.
    pub fn log_params(&mut self, params: BTreeMap<String, ParamValue>) -> Result<()> {
        let metadata = self.metadata.clone();
        let active = self.active_mut()?;
        active.run.update_params(&metadata, params)
    }

    /// Merge `metrics` into the current run (last writer wins).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when no run is active; service errors
    /// unchanged.
    pub fn log_metrics(&mut self, metrics: BTreeMap<String, ParamValue>) -> Result<()> {
        let metadata = self.metadata.clone();
        let active = self.active_mut()?;
        active.run.update_metrics(&metadata, metrics)
    }

    /// [`log_params`](Self::log_params) over a JSON map; nested values are
    /// rejected.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for nested values or when no run is active.
    pub fn log_params_json(&mut self, params: serde_json::Map<String, serde_json::Value>) -> Result<()> {
        self.log_params(convert_scalar_map(params)?)
    }

    /// [`log_metrics`](Self::log_metrics) over a JSON map; nested values are
    /// rejected.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for nested values or when no run is active.
    pub fn log_metrics_json(&mut self, metrics: serde_json::Map<String, serde_json::Value>) -> Result<()> {
        self.log_metrics(convert_scalar_map(metrics)?)
    }

    /// Write one scalar point per `(tag, value)` to the run's backing
    /// tensorboard run, creating the backing resources on first call.
    ///
    /// Without an explicit `step`, each tag auto-increments from its last
    /// logged step. `wall_time` defaults to now.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when no run is active or the experiment has
    /// no backing tensorboard; service errors unchanged.
    pub fn log_time_series_metrics(
        &mut self,
        metrics: BTreeMap<String, f64>,
        step: Option<i64>,
        wall_time: Option<f64>,
    ) -> Result<()> {
        let metadata = self.metadata.clone();
        let service = self.tensorboard_service.clone();
        let clock = self.clock.clone();
        let limits = self.limits.clone();
        let stats = self.stats.clone();
        let tensorboard = self.backing_tensorboard.clone();
        let experiment_id = self.experiment.as_ref().map(|e| e.name().to_string());

        let active = self.active.as_mut().ok_or_else(|| {
            Error::InvalidArgument("no run is active; call start_run first".to_string())
        })?;
        let Some(tensorboard) = tensorboard else {
            return Err(Error::InvalidArgument(
                "the experiment has no backing tensorboard; re-init with a tensorboard to log time-series metrics"
                    .to_string(),
            ));
        };
        let experiment_id = experiment_id.ok_or_else(|| {
            Error::InvalidArgument("bind an experiment with init first".to_string())
        })?;

        if active.sender.is_none() {
            let tb_experiment = get_or_create_experiment(
                service.as_ref(),
                &tensorboard,
                &experiment_id,
                &experiment_id,
            )?;
            let tb_run =
                get_or_create_run(service.as_ref(), &tb_experiment.name, active.run.name())?;
            active.run.bind_tensorboard_run(&metadata, &tb_run.name)?;

            let limiter = Arc::new(Mutex::new(RateLimiter::new(
                limits.min_scalar_request_interval,
                clock.clone(),
            )));
            active.sender = Some(ScalarSender::new(
                service,
                tb_run.name,
                limits.max_scalar_request_size,
                limiter,
                stats,
            )?);
        }

        let wall_time = wall_time.unwrap_or_else(|| {
            let now = clock.now();
            now.timestamp_millis() as f64 / 1000.0
        });
        let descriptor = ValueMetadata {
            plugin_name: "scalars".to_string(),
            plugin_data: Vec::new(),
            data_class: DataClass::Scalar,
        };

        let Some(sender) = active.sender.as_mut() else {
            return Err(Error::Other("scalar sender missing after setup".to_string()));
        };
        for (tag, value) in metrics {
            let step_value = match step {
                Some(explicit) => {
                    active.ts_steps.insert(tag.clone(), explicit);
                    explicit
                }
                None => {
                    let entry = active.ts_steps.entry(tag.clone()).or_insert(0);
                    *entry += 1;
                    *entry
                }
            };
            sender.add_value(&tag, &descriptor, step_value, wall_time, value)?;
        }
        sender.flush()
    }

    /// Store classification metrics as a typed artifact on the current run.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for inconsistent metrics or when no run is
    /// active; service errors unchanged.
    pub fn log_classification_metrics(
        &mut self,
        metrics: &ClassificationMetrics,
    ) -> Result<Artifact> {
        metrics.validate()?;
        let metadata = self.metadata.clone();
        let project = self.project.clone();
        let location = self.location.clone();
        let active = self.active_mut()?;

        let artifact_id = Uuid::new_v4().simple().to_string();
        let mut artifact = Artifact::new(
            ArtifactName::new(&project, &location, &artifact_id),
            schema::CLASSIFICATION_METRICS,
        );
        if let Some(display_name) = &metrics.display_name {
            artifact.display_name = display_name.clone();
        }
        artifact.metadata = metrics.to_metadata();

        let artifact = metadata.create_artifact(artifact)?;
        metadata.add_context_artifacts_and_executions(
            active.run.context_name(),
            &[artifact.name.clone()],
            &[],
        )?;
        Ok(artifact)
    }

    /// Attach an existing pipeline run to the experiment and the current run.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for a missing pipeline context;
    /// [`Error::InvalidArgument`] when it is not a pipeline run or no run is
    /// active.
    pub fn log_pipeline_job(&mut self, pipeline_context_id: &str) -> Result<()> {
        let metadata = self.metadata.clone();
        let pipeline_name =
            ContextName::new(&self.project, &self.location, pipeline_context_id);
        let pipeline = metadata.get_context(&pipeline_name)?;
        if pipeline.schema_title != schema::PIPELINE_RUN {
            return Err(Error::InvalidArgument(format!(
                "context {pipeline_context_id:?} is a {}, not a pipeline run",
                pipeline.schema_title
            )));
        }
        let experiment_context = self
            .experiment
            .as_ref()
            .ok_or_else(|| {
                Error::InvalidArgument("bind an experiment with init first".to_string())
            })?
            .context_name()
            .clone();
        let active = self.active_mut()?;
        metadata.add_context_children(&experiment_context, &[pipeline.name.clone()])?;
        metadata.add_context_children(active.run.context_name(), &[pipeline.name])?;
        Ok(())
    }

    /// Serialize `model` into `output_dir` and attach it to the current run
    /// as a model artifact.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an unregistered framework or when no
    /// run is active; serialization and service errors unchanged.
    pub fn log_model(
        &mut self,
        model: &dyn SerializableModel,
        output_dir: &Path,
    ) -> Result<Artifact> {
        self.serializers.ensure_registered(model.framework_name())?;
        let metadata = self.metadata.clone();
        let project = self.project.clone();
        let location = self.location.clone();
        let active = self.active_mut()?;

        let file_name = format!("{}-model-{}", model.framework_name(), Uuid::new_v4().simple());
        let path = output_dir.join(&file_name);
        model.serialize_to(&path)?;

        let mut artifact = Artifact::new(
            ArtifactName::new(&project, &location, Uuid::new_v4().simple().to_string()),
            schema::EXPERIMENT_MODEL,
        );
        artifact.display_name = file_name;
        artifact.uri = path.display().to_string();
        artifact.metadata.insert(
            "frameworkName".to_string(),
            serde_json::Value::String(model.framework_name().to_string()),
        );
        artifact.metadata.insert(
            "frameworkVersion".to_string(),
            serde_json::Value::String(model.framework_version().to_string()),
        );
        if let Some(input_schema) = model.input_schema() {
            artifact
                .metadata
                .insert("inputSchema".to_string(), input_schema);
        }

        let artifact = metadata.create_artifact(artifact)?;
        metadata.add_context_artifacts_and_executions(
            active.run.context_name(),
            &[artifact.name.clone()],
            &[],
        )?;
        Ok(artifact)
    }

    /// Open an execution scope attached to the current run.
    ///
    /// The execution starts RUNNING; closing the scope with
    /// [`ExecutionScope::complete`] marks it COMPLETE, and dropping it
    /// unclosed marks it FAILED.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a bad name or when no run is active;
    /// [`Error::AlreadyExists`] when the execution id is taken.
    pub fn start_execution(
        &mut self,
        name: &str,
        display_name: Option<&str>,
    ) -> Result<ExecutionScope> {
        validate_resource_id(name)?;
        let metadata = self.metadata.clone();
        let project = self.project.clone();
        let location = self.location.clone();
        let active = self.active_mut()?;
        ExecutionScope::start(
            metadata,
            ExecutionName::new(&project, &location, name),
            schema::CONTAINER_EXECUTION,
            display_name.unwrap_or(name),
            active.run.context_name(),
        )
    }

    /// Tabular view of an experiment's runs (the bound experiment when
    /// `experiment` is `None`).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when neither is available;
    /// [`Error::NotFound`] for a missing experiment.
    pub fn experiment_df(&self, experiment: Option<&str>) -> Result<Vec<ExperimentRow>> {
        let name = experiment
            .map(str::to_string)
            .or_else(|| self.experiment.as_ref().map(|e| e.name().to_string()))
            .ok_or_else(|| {
                Error::InvalidArgument(
                    "name an experiment or bind one with init first".to_string(),
                )
            })?;
        experiment_rows(
            &self.metadata,
            &self.tensorboard_service,
            &self.project,
            &self.location,
            &name,
        )
    }
}

fn convert_scalar_map(
    map: serde_json::Map<String, serde_json::Value>,
) -> Result<BTreeMap<String, ParamValue>> {
    map.into_iter()
        .map(|(key, value)| ParamValue::try_from(value).map(|v| (key, v)))
        .collect()
}
