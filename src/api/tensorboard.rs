//! Tensorboard service seam
//!
//! Four-level hierarchy: tensorboard → experiment → run → time series.
//! Run and time-series ids are allocated server-side; clients address runs
//! by display name and resolve create races through filtered listings. The
//! in-memory implementation mirrors the control plane's uniqueness rules and
//! records every batched write request so tests can assert on wire effects.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::names::{TensorboardExperimentName, TensorboardName, TensorboardRunName, TimeSeriesName};
use crate::wire::{TimeSeriesDataPoint, ValueType, WriteRunDataRequest};

/// Label marking a project's default tensorboard.
pub const DEFAULT_TENSORBOARD_LABEL: &str = "is_default";

/// A tensorboard instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensorboard {
    /// Resource name.
    pub name: TensorboardName,
    /// Human-readable name.
    pub display_name: String,
    /// Free-form description.
    pub description: String,
    /// Resource labels.
    pub labels: BTreeMap<String, String>,
    /// Root folder for blob payloads belonging to this tensorboard.
    pub blob_storage_folder: String,
    /// Server-assigned creation time.
    pub create_time: DateTime<Utc>,
}

/// A tensorboard experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorboardExperiment {
    /// Resource name.
    pub name: TensorboardExperimentName,
    /// Human-readable name.
    pub display_name: String,
    /// Free-form description.
    pub description: String,
}

/// A tensorboard run.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorboardRun {
    /// Resource name; the final segment is server-assigned.
    pub name: TensorboardRunName,
    /// Human-readable name, unique within the parent experiment.
    pub display_name: String,
    /// Server-assigned creation time.
    pub create_time: DateTime<Utc>,
}

/// A tensorboard time series.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorboardTimeSeries {
    /// Resource name; the final segment is server-assigned.
    pub name: TimeSeriesName,
    /// Human-readable name (the summary tag), unique within the parent run.
    pub display_name: String,
    /// Point value type; immutable once created.
    pub value_type: ValueType,
    /// Producer plugin name.
    pub plugin_name: String,
    /// Opaque plugin payload.
    pub plugin_data: Vec<u8>,
}

/// Client-supplied fields for a new time series.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesSpec {
    /// Display name (the summary tag).
    pub display_name: String,
    /// Point value type.
    pub value_type: ValueType,
    /// Producer plugin name.
    pub plugin_name: String,
    /// Opaque plugin payload.
    pub plugin_data: Vec<u8>,
}

/// CRUD and write surface of the tensorboard service.
pub trait TensorboardService: Send + Sync {
    /// Create a tensorboard with a server-assigned id.
    ///
    /// # Errors
    ///
    /// Transport errors only.
    fn create_tensorboard(
        &self,
        project: &str,
        location: &str,
        display_name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Tensorboard>;

    /// Fetch a tensorboard by name.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when absent.
    fn get_tensorboard(&self, name: &TensorboardName) -> Result<Tensorboard>;

    /// List tensorboards in a project/location.
    ///
    /// # Errors
    ///
    /// Transport errors only.
    fn list_tensorboards(&self, project: &str, location: &str) -> Result<Vec<Tensorboard>>;

    /// Create an experiment under the requested id.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for a missing parent, [`Error::AlreadyExists`]
    /// when the id is taken.
    fn create_tensorboard_experiment(
        &self,
        parent: &TensorboardName,
        experiment_id: &str,
        display_name: &str,
    ) -> Result<TensorboardExperiment>;

    /// Fetch an experiment by name.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when absent.
    fn get_tensorboard_experiment(
        &self,
        name: &TensorboardExperimentName,
    ) -> Result<TensorboardExperiment>;

    /// Create a run under the requested id.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for a missing parent experiment;
    /// [`Error::AlreadyExists`] when the id or the display name is taken.
    fn create_tensorboard_run(
        &self,
        parent: &TensorboardExperimentName,
        run_id: &str,
        display_name: &str,
    ) -> Result<TensorboardRun>;

    /// List runs under an experiment, optionally filtered by display name.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for a missing parent experiment.
    fn list_tensorboard_runs(
        &self,
        parent: &TensorboardExperimentName,
        display_name: Option<&str>,
    ) -> Result<Vec<TensorboardRun>>;

    /// Create a time series with a server-assigned id.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for a missing parent run;
    /// [`Error::AlreadyExists`] when the display name is taken.
    fn create_tensorboard_time_series(
        &self,
        parent: &TensorboardRunName,
        spec: TimeSeriesSpec,
    ) -> Result<TensorboardTimeSeries>;

    /// List time series under a run, optionally filtered by display name.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for a missing parent run.
    fn list_tensorboard_time_series(
        &self,
        parent: &TensorboardRunName,
        display_name: Option<&str>,
    ) -> Result<Vec<TensorboardTimeSeries>>;

    /// Append points to multiple time series of one run in a single batch.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the run or a referenced series is absent.
    fn write_run_data(&self, request: &WriteRunDataRequest) -> Result<()>;

    /// Read back all points of a time series, in write order.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the series is absent.
    fn read_time_series(&self, name: &TimeSeriesName) -> Result<Vec<TimeSeriesDataPoint>>;
}

/// In-memory tensorboard service for tests and offline tooling.
#[derive(Debug, Default)]
pub struct InMemoryTensorboardService {
    tensorboards: DashMap<String, Tensorboard>,
    experiments: DashMap<String, TensorboardExperiment>,
    runs: DashMap<String, TensorboardRun>,
    series: DashMap<String, TensorboardTimeSeries>,
    points: DashMap<String, Vec<TimeSeriesDataPoint>>,
    write_log: Mutex<Vec<WriteRunDataRequest>>,
}

impl InMemoryTensorboardService {
    /// Create an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All write requests accepted so far, in arrival order.
    ///
    /// # Panics
    ///
    /// Panics if the write-log mutex is poisoned.
    #[must_use]
    pub fn write_requests(&self) -> Vec<WriteRunDataRequest> {
        self.write_log.lock().expect("write log poisoned").clone()
    }

    /// Number of accepted write requests.
    ///
    /// # Panics
    ///
    /// Panics if the write-log mutex is poisoned.
    #[must_use]
    pub fn write_request_count(&self) -> usize {
        self.write_log.lock().expect("write log poisoned").len()
    }

    /// Drop an experiment and its subtree, simulating server-side deletion.
    pub fn delete_tensorboard_experiment(&self, name: &TensorboardExperimentName) {
        let prefix = format!("{name}/");
        self.experiments.remove(&name.to_string());
        self.runs.retain(|key, _| !key.starts_with(&prefix));
        self.series.retain(|key, _| !key.starts_with(&prefix));
        self.points.retain(|key, _| !key.starts_with(&prefix));
    }
}

impl TensorboardService for InMemoryTensorboardService {
    fn create_tensorboard(
        &self,
        project: &str,
        location: &str,
        display_name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Tensorboard> {
        let id = Uuid::new_v4().simple().to_string();
        let name = TensorboardName::new(project, location, id);
        let tensorboard = Tensorboard {
            blob_storage_folder: format!("tensorboards/{}", name.tensorboard),
            name: name.clone(),
            display_name: display_name.to_string(),
            description: String::new(),
            labels: labels.clone(),
            create_time: Utc::now(),
        };
        self.tensorboards
            .insert(name.to_string(), tensorboard.clone());
        Ok(tensorboard)
    }

    fn get_tensorboard(&self, name: &TensorboardName) -> Result<Tensorboard> {
        self.tensorboards
            .get(&name.to_string())
            .map(|t| t.clone())
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    fn list_tensorboards(&self, project: &str, location: &str) -> Result<Vec<Tensorboard>> {
        let mut out: Vec<Tensorboard> = self
            .tensorboards
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|t| t.name.project == project && t.name.location == location)
            .collect();
        out.sort_by(|a, b| a.create_time.cmp(&b.create_time));
        Ok(out)
    }

    fn create_tensorboard_experiment(
        &self,
        parent: &TensorboardName,
        experiment_id: &str,
        display_name: &str,
    ) -> Result<TensorboardExperiment> {
        if !self.tensorboards.contains_key(&parent.to_string()) {
            return Err(Error::NotFound(parent.to_string()));
        }
        let name = parent.experiment(experiment_id);
        let key = name.to_string();
        if self.experiments.contains_key(&key) {
            return Err(Error::AlreadyExists(key));
        }
        let experiment = TensorboardExperiment {
            name,
            display_name: display_name.to_string(),
            description: String::new(),
        };
        self.experiments.insert(key, experiment.clone());
        Ok(experiment)
    }

    fn get_tensorboard_experiment(
        &self,
        name: &TensorboardExperimentName,
    ) -> Result<TensorboardExperiment> {
        self.experiments
            .get(&name.to_string())
            .map(|e| e.clone())
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    fn create_tensorboard_run(
        &self,
        parent: &TensorboardExperimentName,
        run_id: &str,
        display_name: &str,
    ) -> Result<TensorboardRun> {
        if !self.experiments.contains_key(&parent.to_string()) {
            return Err(Error::NotFound(parent.to_string()));
        }
        let duplicate = self
            .runs
            .iter()
            .any(|r| r.name.experiment == *parent && r.display_name == display_name);
        if duplicate {
            return Err(Error::AlreadyExists(format!(
                "{parent}/runs display_name={display_name:?}"
            )));
        }
        let name = parent.run(run_id);
        let key = name.to_string();
        if self.runs.contains_key(&key) {
            return Err(Error::AlreadyExists(key));
        }
        let run = TensorboardRun {
            name,
            display_name: display_name.to_string(),
            create_time: Utc::now(),
        };
        self.runs.insert(key, run.clone());
        Ok(run)
    }

    fn list_tensorboard_runs(
        &self,
        parent: &TensorboardExperimentName,
        display_name: Option<&str>,
    ) -> Result<Vec<TensorboardRun>> {
        if !self.experiments.contains_key(&parent.to_string()) {
            return Err(Error::NotFound(parent.to_string()));
        }
        let mut out: Vec<TensorboardRun> = self
            .runs
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|r| r.name.experiment == *parent)
            .filter(|r| display_name.map_or(true, |d| d == r.display_name))
            .collect();
        out.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(out)
    }

    fn create_tensorboard_time_series(
        &self,
        parent: &TensorboardRunName,
        spec: TimeSeriesSpec,
    ) -> Result<TensorboardTimeSeries> {
        if !self.runs.contains_key(&parent.to_string()) {
            return Err(Error::NotFound(parent.to_string()));
        }
        let duplicate = self
            .series
            .iter()
            .any(|s| s.name.run == *parent && s.display_name == spec.display_name);
        if duplicate {
            return Err(Error::AlreadyExists(format!(
                "{parent}/timeSeries display_name={:?}",
                spec.display_name
            )));
        }
        let name = parent.time_series(Uuid::new_v4().simple().to_string());
        let series = TensorboardTimeSeries {
            name: name.clone(),
            display_name: spec.display_name,
            value_type: spec.value_type,
            plugin_name: spec.plugin_name,
            plugin_data: spec.plugin_data,
        };
        self.series.insert(name.to_string(), series.clone());
        Ok(series)
    }

    fn list_tensorboard_time_series(
        &self,
        parent: &TensorboardRunName,
        display_name: Option<&str>,
    ) -> Result<Vec<TensorboardTimeSeries>> {
        if !self.runs.contains_key(&parent.to_string()) {
            return Err(Error::NotFound(parent.to_string()));
        }
        let mut out: Vec<TensorboardTimeSeries> = self
            .series
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|s| s.name.run == *parent)
            .filter(|s| display_name.map_or(true, |d| d == s.display_name))
            .collect();
        out.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(out)
    }

    fn write_run_data(&self, request: &WriteRunDataRequest) -> Result<()> {
        let run = TensorboardRunName::parse(&request.tensorboard_run)?;
        if !self.runs.contains_key(&run.to_string()) {
            return Err(Error::NotFound(request.tensorboard_run.clone()));
        }
        for data in &request.time_series_data {
            let series_name = run.time_series(data.time_series_id.clone());
            if !self.series.contains_key(&series_name.to_string()) {
                return Err(Error::NotFound(series_name.to_string()));
            }
            self.points
                .entry(series_name.to_string())
                .or_default()
                .extend(data.values.iter().cloned());
        }
        self.write_log
            .lock()
            .expect("write log poisoned")
            .push(request.clone());
        Ok(())
    }

    fn read_time_series(&self, name: &TimeSeriesName) -> Result<Vec<TimeSeriesDataPoint>> {
        if !self.series.contains_key(&name.to_string()) {
            return Err(Error::NotFound(name.to_string()));
        }
        Ok(self
            .points
            .get(&name.to_string())
            .map(|p| p.clone())
            .unwrap_or_default())
    }
}

/// Create the experiment under the requested id, or fetch it when another
/// writer got there first.
///
/// # Errors
///
/// [`Error::NotFound`] for a missing parent tensorboard; service errors
/// unchanged.
pub fn get_or_create_experiment(
    service: &dyn TensorboardService,
    parent: &TensorboardName,
    experiment_id: &str,
    display_name: &str,
) -> Result<TensorboardExperiment> {
    match service.create_tensorboard_experiment(parent, experiment_id, display_name) {
        Ok(experiment) => Ok(experiment),
        Err(err) if err.is_already_exists() => {
            service.get_tensorboard_experiment(&parent.experiment(experiment_id))
        }
        Err(err) => Err(err),
    }
}

/// Create a run under a random requested id, or adopt the one run already
/// listed under the same display name when the create is rejected.
///
/// Run ids are server-assigned, so identity rides on the display name; an
/// already-exists rejection that resolves to zero or multiple matches is an
/// error.
///
/// # Errors
///
/// [`Error::NotFound`] for a missing parent experiment; service errors
/// unchanged.
pub fn get_or_create_run(
    service: &dyn TensorboardService,
    parent: &TensorboardExperimentName,
    display_name: &str,
) -> Result<TensorboardRun> {
    let requested = Uuid::new_v4().simple().to_string();
    match service.create_tensorboard_run(parent, &requested, display_name) {
        Ok(run) => Ok(run),
        Err(err) if err.is_already_exists() => {
            let mut matches = service.list_tensorboard_runs(parent, Some(display_name))?;
            match matches.len() {
                1 => Ok(matches.remove(0)),
                0 => Err(Error::Other(format!(
                    "run {display_name:?} reported as existing under {parent} but not listable"
                ))),
                n => Err(Error::Other(format!(
                    "expected one run named {display_name:?} under {parent}, found {n}"
                ))),
            }
        }
        Err(err) => Err(err),
    }
}
