//! Tabular experiment view
//!
//! Joins every run context under an experiment (user runs and pipeline runs)
//! with its params, summary metrics, and backing time series into one row
//! per run.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::api::metadata::{schema, Context, ContextFilter, MetadataService};
use crate::api::tensorboard::TensorboardService;
use crate::error::Result;
use crate::names::{ContextName, TensorboardRunName};
use crate::wire::ValueType;

use super::ParamValue;

/// One row of the experiment table.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentRow {
    /// Parent experiment name.
    pub experiment_name: String,
    /// Run display name (experiment prefix stripped for user runs).
    pub run_name: String,
    /// Schema title distinguishing user runs from pipeline runs.
    pub run_type: String,
    /// Lifecycle state string; empty when the context records none.
    pub state: String,
    /// Logged parameters.
    pub params: BTreeMap<String, ParamValue>,
    /// Logged summary metrics.
    pub metrics: BTreeMap<String, ParamValue>,
    /// Scalar time series read from the backing tensorboard run, keyed by
    /// tag, as `(step, value)` in write order.
    pub time_series: BTreeMap<String, Vec<(i64, f64)>>,
}

fn scalar_map(context: &Context, key: &str) -> BTreeMap<String, ParamValue> {
    context
        .metadata
        .get(key)
        .and_then(serde_json::Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| ParamValue::try_from(v.clone()).ok().map(|p| (k.clone(), p)))
                .collect()
        })
        .unwrap_or_default()
}

fn backing_time_series(
    tensorboard: &Arc<dyn TensorboardService>,
    context: &Context,
) -> BTreeMap<String, Vec<(i64, f64)>> {
    let Some(run_name) = context
        .metadata
        .get(schema::BACKING_TENSORBOARD_RUN_KEY)
        .and_then(serde_json::Value::as_str)
        .and_then(|s| TensorboardRunName::parse(s).ok())
    else {
        return BTreeMap::new();
    };

    let series = match tensorboard.list_tensorboard_time_series(&run_name, None) {
        Ok(series) => series,
        Err(err) => {
            warn!(run = %run_name, %err, "skipping unreadable backing tensorboard run");
            return BTreeMap::new();
        }
    };

    let mut out = BTreeMap::new();
    for entry in series {
        if entry.value_type != ValueType::Scalar {
            continue;
        }
        match tensorboard.read_time_series(&entry.name) {
            Ok(points) => {
                let values: Vec<(i64, f64)> = points
                    .iter()
                    .filter_map(|p| p.scalar.as_ref().map(|s| (p.step, s.value)))
                    .collect();
                out.insert(entry.display_name, values);
            }
            Err(err) => {
                warn!(series = %entry.name, %err, "skipping unreadable time series");
            }
        }
    }
    out
}

/// Build the experiment table for `experiment_name`.
///
/// # Errors
///
/// [`Error::NotFound`](crate::Error::NotFound) when the experiment does not
/// exist; service errors unchanged.
pub(crate) fn experiment_rows(
    metadata: &Arc<dyn MetadataService>,
    tensorboard: &Arc<dyn TensorboardService>,
    project: &str,
    location: &str,
    experiment_name: &str,
) -> Result<Vec<ExperimentRow>> {
    let experiment_context =
        metadata.get_context(&ContextName::new(project, location, experiment_name))?;

    let filter = ContextFilter {
        schema_titles: vec![
            schema::EXPERIMENT_RUN.to_string(),
            schema::PIPELINE_RUN.to_string(),
        ],
        parent: Some(experiment_context.name.clone()),
        display_name: None,
    };
    let contexts = metadata.list_contexts(project, location, &filter)?;

    let prefix = format!("{experiment_name}-");
    let rows = contexts
        .iter()
        .map(|context| {
            let run_name = if context.schema_title == schema::EXPERIMENT_RUN {
                context
                    .name
                    .context_id
                    .strip_prefix(&prefix)
                    .unwrap_or(&context.name.context_id)
                    .to_string()
            } else {
                context.display_name.clone()
            };
            ExperimentRow {
                experiment_name: experiment_name.to_string(),
                run_name,
                run_type: context.schema_title.clone(),
                state: context
                    .metadata
                    .get(schema::STATE_KEY)
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                params: scalar_map(context, schema::PARAM_KEY),
                metrics: scalar_map(context, schema::METRIC_KEY),
                time_series: backing_time_series(tensorboard, context),
            }
        })
        .collect();
    Ok(rows)
}
