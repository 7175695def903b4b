//! Experiment resource
//!
//! An experiment is a metadata context with the experiment schema title. It
//! optionally carries a backing tensorboard in its metadata; time-series
//! logging requires that binding.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::api::metadata::{schema, Context, MetadataService};
use crate::api::tensorboard::{TensorboardService, DEFAULT_TENSORBOARD_LABEL};
use crate::error::{Error, Result};
use crate::names::{validate_resource_id, ContextName, TensorboardName};

/// A named grouping of runs, backed by a metadata context.
#[derive(Debug, Clone)]
pub struct Experiment {
    context: Context,
}

impl Experiment {
    /// Fetch the experiment context, creating it on first use.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a bad name or when the existing context
    /// is not an experiment; service errors unchanged.
    pub fn get_or_create(
        metadata: &Arc<dyn MetadataService>,
        project: &str,
        location: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<Self> {
        validate_resource_id(name)?;
        let context_name = ContextName::new(project, location, name);
        let mut context = Context::new(context_name.clone(), schema::EXPERIMENT);
        if let Some(description) = description {
            context.description = description.to_string();
        }
        let context = match metadata.create_context(context) {
            Ok(created) => {
                info!(experiment = name, "created experiment");
                created
            }
            Err(err) if err.is_already_exists() => {
                let existing = metadata.get_context(&context_name)?;
                if existing.schema_title != schema::EXPERIMENT {
                    return Err(Error::InvalidArgument(format!(
                        "context {name:?} exists but is a {}, not an experiment",
                        existing.schema_title
                    )));
                }
                existing
            }
            Err(err) => return Err(err),
        };
        Ok(Self { context })
    }

    /// The experiment's short name (its context id).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.context.name.context_id
    }

    /// The experiment's context resource name.
    #[must_use]
    pub const fn context_name(&self) -> &ContextName {
        &self.context.name
    }

    /// The backing tensorboard recorded on the experiment, if any.
    #[must_use]
    pub fn backing_tensorboard(&self) -> Option<TensorboardName> {
        self.context
            .metadata
            .get(schema::BACKING_TENSORBOARD_KEY)
            .and_then(serde_json::Value::as_str)
            .and_then(|s| TensorboardName::parse(s).ok())
    }

    /// Record `tensorboard` as the experiment's backing tensorboard.
    ///
    /// Re-assigning the same tensorboard is a no-op.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when a different tensorboard is already
    /// bound; service errors unchanged.
    pub fn assign_backing_tensorboard(
        &mut self,
        metadata: &Arc<dyn MetadataService>,
        tensorboard: &TensorboardName,
    ) -> Result<()> {
        if let Some(existing) = self.backing_tensorboard() {
            if existing == *tensorboard {
                return Ok(());
            }
            return Err(Error::InvalidArgument(format!(
                "experiment {:?} is already backed by {existing}",
                self.name()
            )));
        }
        self.context.metadata.insert(
            schema::BACKING_TENSORBOARD_KEY.to_string(),
            serde_json::Value::String(tensorboard.to_string()),
        );
        self.context = metadata.update_context(self.context.clone())?;
        Ok(())
    }

    /// Resolve the project's default tensorboard, creating one when absent.
    ///
    /// The default instance carries the `is_default` label.
    ///
    /// # Errors
    ///
    /// Service errors unchanged.
    pub fn resolve_default_tensorboard(
        service: &Arc<dyn TensorboardService>,
        project: &str,
        location: &str,
    ) -> Result<TensorboardName> {
        let existing = service
            .list_tensorboards(project, location)?
            .into_iter()
            .find(|t| t.labels.contains_key(DEFAULT_TENSORBOARD_LABEL));
        if let Some(tensorboard) = existing {
            return Ok(tensorboard.name);
        }
        let mut labels = BTreeMap::new();
        labels.insert(DEFAULT_TENSORBOARD_LABEL.to_string(), "true".to_string());
        let created =
            service.create_tensorboard(project, location, "Default Tensorboard", &labels)?;
        info!(tensorboard = %created.name, "created default tensorboard");
        Ok(created.name)
    }

    pub(crate) const fn context(&self) -> &Context {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::metadata::InMemoryMetadataService;
    use crate::api::tensorboard::InMemoryTensorboardService;

    fn services() -> (Arc<dyn MetadataService>, Arc<dyn TensorboardService>) {
        (
            Arc::new(InMemoryMetadataService::new()),
            Arc::new(InMemoryTensorboardService::new()),
        )
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let (metadata, _) = services();
        let first = Experiment::get_or_create(&metadata, "p", "l", "exp", Some("demo")).unwrap();
        let second = Experiment::get_or_create(&metadata, "p", "l", "exp", None).unwrap();
        assert_eq!(first.context_name(), second.context_name());
        assert_eq!(second.context().description, "demo");
    }

    #[test]
    fn test_rejects_invalid_name() {
        let (metadata, _) = services();
        assert!(Experiment::get_or_create(&metadata, "p", "l", "Bad_Name", None).is_err());
    }

    #[test]
    fn test_rejects_non_experiment_context() {
        let (metadata, _) = services();
        metadata
            .create_context(Context::new(
                ContextName::new("p", "l", "exp"),
                schema::PIPELINE_RUN,
            ))
            .unwrap();
        let err = Experiment::get_or_create(&metadata, "p", "l", "exp", None).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_backing_tensorboard_round_trip() {
        let (metadata, _) = services();
        let mut experiment = Experiment::get_or_create(&metadata, "p", "l", "exp", None).unwrap();
        assert!(experiment.backing_tensorboard().is_none());

        let tb = TensorboardName::new("p", "l", "tb1");
        experiment
            .assign_backing_tensorboard(&metadata, &tb)
            .unwrap();
        assert_eq!(experiment.backing_tensorboard(), Some(tb.clone()));

        // Same binding is a no-op; a different one is rejected.
        experiment
            .assign_backing_tensorboard(&metadata, &tb)
            .unwrap();
        let other = TensorboardName::new("p", "l", "tb2");
        assert!(experiment
            .assign_backing_tensorboard(&metadata, &other)
            .is_err());

        // Persisted: reloading sees the binding.
        let reloaded = Experiment::get_or_create(&metadata, "p", "l", "exp", None).unwrap();
        assert_eq!(reloaded.backing_tensorboard(), Some(tb));
    }

    #[test]
    fn test_resolve_default_tensorboard_creates_once() {
        let (_, service) = services();
        let first = Experiment::resolve_default_tensorboard(&service, "p", "l").unwrap();
        let second = Experiment::resolve_default_tensorboard(&service, "p", "l").unwrap();
        assert_eq!(first, second);
    }
}
