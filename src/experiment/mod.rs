//! Experiment tracking
//!
//! The user-facing lifecycle: bind an experiment, start runs under it, log
//! params, metrics, time series, artifacts, and executions, and read the
//! whole experiment back as a table. Time-series logging reuses the same
//! batched scalar sender as the logdir uploader.

mod classification;
mod dataframe;
mod execution;
mod experiment_resource;
mod run;
mod tracker;

pub mod global;

pub use classification::{ClassificationMetrics, ConfidenceMetrics};
pub use dataframe::ExperimentRow;
pub use execution::ExecutionScope;
pub use experiment_resource::Experiment;
pub use run::ExperimentRun;
pub use tracker::{InitOptions, TensorboardOption, Tracker};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle state of an experiment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    /// The run is in progress.
    #[serde(rename = "RUNNING")]
    Running,
    /// The run finished successfully.
    #[serde(rename = "COMPLETE")]
    Complete,
    /// The run finished with an error.
    #[serde(rename = "FAILED")]
    Failed,
}

impl RunState {
    /// The wire string stored in context metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        }
    }
}

/// A scalar parameter or summary-metric value.
///
/// Nested structures are unrepresentable here; JSON inputs are validated
/// through [`ParamValue::try_from`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// String value.
    Str(String),
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl TryFrom<serde_json::Value> for ParamValue {
    type Error = Error;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Bool(b) => Ok(Self::Bool(b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Self::Float(f))
                } else {
                    Err(Error::InvalidArgument(format!(
                        "number {n} is not representable as a parameter value"
                    )))
                }
            }
            serde_json::Value::String(s) => Ok(Self::Str(s)),
            other => Err(Error::InvalidArgument(format!(
                "parameter values must be scalar (number, string, bool); got {other}"
            ))),
        }
    }
}

impl ParamValue {
    /// The JSON representation stored in context metadata.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::Str(s) => serde_json::Value::String(s.clone()),
        }
    }
}
