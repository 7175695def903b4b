//! Run dispatcher
//!
//! Routes every incoming `(run, event, value)` to the right batched sender.
//! Owns the per-run sender maps, the per-run tensorboard-run resources, and
//! the global `(run, tag)` feature-descriptor map. Per-value failures are
//! logged and swallowed so one bad summary cannot stall the stream; only a
//! vanished experiment ends the session.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use tracing::{debug, error, warn};

use crate::api::blob::BlobStore;
use crate::api::tensorboard::TensorboardService;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::event::{DataClass, LogEvent, LogValue, ValueMetadata};
use crate::limits::UploadLimits;
use crate::names::{TensorboardExperimentName, TensorboardRunName};
use crate::uploader::graph::{prepare_graph_def, GRAPHS_PLUGIN, MAX_GRAPH_ATTR_SIZE};
use crate::uploader::rate_limiter::RateLimiter;
use crate::uploader::senders::{BlobSender, ScalarSender, TensorSender};
use crate::uploader::UploadStats;
use crate::wire::TensorProto;

/// Per-run senders and shared descriptor state for one upload session.
pub struct RunDispatcher {
    service: Arc<dyn TensorboardService>,
    blob_store: Arc<dyn BlobStore>,
    experiment: TensorboardExperimentName,
    limits: UploadLimits,
    allowed_plugins: HashSet<String>,
    blob_folder: String,
    stats: Arc<Mutex<UploadStats>>,
    scalar_limiter: Arc<Mutex<RateLimiter>>,
    tensor_limiter: Arc<Mutex<RateLimiter>>,
    blob_limiter: Arc<Mutex<RateLimiter>>,
    run_resources: FxHashMap<String, TensorboardRunName>,
    scalar_senders: FxHashMap<String, ScalarSender>,
    tensor_senders: FxHashMap<String, TensorSender>,
    blob_senders: FxHashMap<String, BlobSender>,
    descriptors: FxHashMap<(String, String), ValueMetadata>,
}

impl RunDispatcher {
    /// Create a dispatcher writing under `experiment`.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service: Arc<dyn TensorboardService>,
        blob_store: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        experiment: TensorboardExperimentName,
        allowed_plugins: impl IntoIterator<Item = String>,
        blob_folder: impl Into<String>,
        limits: UploadLimits,
        stats: Arc<Mutex<UploadStats>>,
    ) -> Self {
        let scalar_limiter = Arc::new(Mutex::new(RateLimiter::new(
            limits.min_scalar_request_interval,
            clock.clone(),
        )));
        let tensor_limiter = Arc::new(Mutex::new(RateLimiter::new(
            limits.min_tensor_request_interval,
            clock.clone(),
        )));
        let blob_limiter = Arc::new(Mutex::new(RateLimiter::new(
            limits.min_blob_request_interval,
            clock,
        )));
        Self {
            service,
            blob_store,
            experiment,
            limits,
            allowed_plugins: allowed_plugins.into_iter().collect(),
            blob_folder: blob_folder.into(),
            stats,
            scalar_limiter,
            tensor_limiter,
            blob_limiter,
            run_resources: FxHashMap::default(),
            scalar_senders: FxHashMap::default(),
            tensor_senders: FxHashMap::default(),
            blob_senders: FxHashMap::default(),
            descriptors: FxHashMap::default(),
        }
    }

    /// The experiment this dispatcher writes under.
    #[must_use]
    pub const fn experiment(&self) -> &TensorboardExperimentName {
        &self.experiment
    }

    /// Consume one polling cycle's events and flush all senders.
    ///
    /// Returns the number of accepted values. Per-value failures are logged
    /// and swallowed.
    ///
    /// # Errors
    ///
    /// [`Error::ExperimentNotFound`] when the backing experiment is gone.
    pub fn dispatch(&mut self, runs: &BTreeMap<String, Vec<LogEvent>>) -> Result<u64> {
        let mut accepted = 0;
        for (run, events) in runs {
            for event in events {
                for value in &event.values {
                    match self.send_value(run, event, value) {
                        Ok(true) => accepted += 1,
                        Ok(false) => {}
                        Err(err @ Error::ExperimentNotFound(_)) => return Err(err),
                        Err(err) => {
                            error!(run, tag = %value.tag, %err, "failed to upload value");
                        }
                    }
                }
            }
        }
        self.flush_all()?;
        Ok(accepted)
    }

    /// Flush every sender in (scalar, tensor, blob) order.
    ///
    /// # Errors
    ///
    /// [`Error::ExperimentNotFound`] when the backing experiment is gone;
    /// other flush failures are logged and swallowed.
    pub fn flush_all(&mut self) -> Result<()> {
        for sender in self.scalar_senders.values_mut() {
            match sender.flush() {
                Ok(()) => {}
                Err(err @ Error::ExperimentNotFound(_)) => return Err(err),
                Err(err) => error!(%err, "scalar flush failed"),
            }
        }
        for sender in self.tensor_senders.values_mut() {
            match sender.flush() {
                Ok(()) => {}
                Err(err @ Error::ExperimentNotFound(_)) => return Err(err),
                Err(err) => error!(%err, "tensor flush failed"),
            }
        }
        for sender in self.blob_senders.values_mut() {
            match sender.flush() {
                Ok(()) => {}
                Err(err @ Error::ExperimentNotFound(_)) => return Err(err),
                Err(err) => error!(%err, "blob flush failed"),
            }
        }
        Ok(())
    }

    /// Returns true when the value was handed to a sender.
    fn send_value(&mut self, run: &str, event: &LogEvent, value: &LogValue) -> Result<bool> {
        let key = (run.to_string(), value.tag.clone());
        let descriptor = if let Some(known) = self.descriptors.get(&key) {
            if let Some(meta) = &value.metadata {
                if meta.plugin_name != known.plugin_name {
                    warn!(
                        run,
                        tag = %value.tag,
                        was = %known.plugin_name,
                        now = %meta.plugin_name,
                        "dropping value whose plugin changed after first sight"
                    );
                    return Ok(false);
                }
            }
            known.clone()
        } else {
            let Some(meta) = &value.metadata else {
                warn!(run, tag = %value.tag, "dropping value with no metadata on first sight");
                return Ok(false);
            };
            self.descriptors.insert(key, meta.clone());
            meta.clone()
        };

        if !self.allowed_plugins.contains(&descriptor.plugin_name) {
            debug!(
                run,
                tag = %value.tag,
                plugin = %descriptor.plugin_name,
                "dropping value from disallowed plugin"
            );
            return Ok(false);
        }

        self.ensure_run(run)?;

        let tensor_bytes = if descriptor.plugin_name == GRAPHS_PLUGIN {
            match prepare_graph_def(&value.tensor, MAX_GRAPH_ATTR_SIZE) {
                Ok(filtered) => filtered,
                Err(err) => {
                    warn!(run, tag = %value.tag, %err, "dropping unparseable graph");
                    return Ok(false);
                }
            }
        } else {
            value.tensor.clone()
        };

        match descriptor.data_class {
            DataClass::Scalar => {
                let scalar = TensorProto::decode_bytes(&tensor_bytes)
                    .ok()
                    .and_then(|t| t.as_scalar());
                let Some(scalar) = scalar else {
                    warn!(run, tag = %value.tag, "dropping scalar value with no numeric payload");
                    return Ok(false);
                };
                self.scalar_senders
                    .get_mut(run)
                    .ok_or_else(|| Error::Other(format!("no scalar sender for run {run:?}")))?
                    .add_value(&value.tag, &descriptor, event.step, event.wall_time, scalar)?;
            }
            DataClass::Tensor => {
                self.tensor_senders
                    .get_mut(run)
                    .ok_or_else(|| Error::Other(format!("no tensor sender for run {run:?}")))?
                    .add_value(
                        &value.tag,
                        &descriptor,
                        event.step,
                        event.wall_time,
                        &tensor_bytes,
                    )?;
            }
            DataClass::BlobSequence => {
                self.blob_senders
                    .get_mut(run)
                    .ok_or_else(|| Error::Other(format!("no blob sender for run {run:?}")))?
                    .add_value(
                        &value.tag,
                        &descriptor,
                        event.step,
                        event.wall_time,
                        &tensor_bytes,
                    )?;
            }
            DataClass::Unknown => return Ok(false),
        }
        Ok(true)
    }

    /// Resolve the tensorboard run for `run` and build its senders lazily.
    fn ensure_run(&mut self, run: &str) -> Result<()> {
        if self.run_resources.contains_key(run) {
            return Ok(());
        }
        let resource = self.get_or_create_run(run)?;

        self.scalar_senders.insert(
            run.to_string(),
            ScalarSender::new(
                self.service.clone(),
                resource.clone(),
                self.limits.max_scalar_request_size,
                self.scalar_limiter.clone(),
                self.stats.clone(),
            )?,
        );
        self.tensor_senders.insert(
            run.to_string(),
            TensorSender::new(
                self.service.clone(),
                resource.clone(),
                self.limits.max_tensor_request_size,
                self.limits.max_tensor_point_size,
                self.tensor_limiter.clone(),
                self.stats.clone(),
            )?,
        );
        self.blob_senders.insert(
            run.to_string(),
            BlobSender::new(
                self.service.clone(),
                self.blob_store.clone(),
                resource.clone(),
                self.blob_folder.clone(),
                self.limits.max_blob_size,
                self.blob_limiter.clone(),
                self.stats.clone(),
            ),
        );
        self.run_resources.insert(run.to_string(), resource);
        Ok(())
    }

    /// Create-or-adopt the tensorboard run for a display name; a missing
    /// parent experiment is fatal to the session.
    fn get_or_create_run(&self, display_name: &str) -> Result<TensorboardRunName> {
        match crate::api::tensorboard::get_or_create_run(
            self.service.as_ref(),
            &self.experiment,
            display_name,
        ) {
            Ok(run) => Ok(run.name),
            Err(err) if err.is_not_found() => {
                Err(Error::ExperimentNotFound(self.experiment.to_string()))
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::blob::MemoryBlobStore;
    use crate::api::tensorboard::InMemoryTensorboardService;
    use crate::clock::ManualClock;
    use prost::Message;
    use std::collections::BTreeMap as StdBTreeMap;

    fn scalar_value(tag: &str, value: f64) -> LogValue {
        LogValue {
            tag: tag.to_string(),
            metadata: Some(ValueMetadata {
                plugin_name: "scalars".to_string(),
                plugin_data: Vec::new(),
                data_class: DataClass::Scalar,
            }),
            tensor: TensorProto::from_scalar(value).encode_to_vec(),
        }
    }

    fn dispatcher_harness() -> (Arc<InMemoryTensorboardService>, RunDispatcher) {
        let svc = Arc::new(InMemoryTensorboardService::new());
        let tb = svc
            .create_tensorboard("p", "l", "board", &StdBTreeMap::new())
            .unwrap();
        let exp = svc
            .create_tensorboard_experiment(&tb.name, "exp", "exp")
            .unwrap();
        let dispatcher = RunDispatcher::new(
            svc.clone(),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(ManualClock::new()),
            exp.name,
            ["scalars".to_string(), "graphs".to_string()],
            "folder",
            UploadLimits::default(),
            Arc::new(Mutex::new(UploadStats::default())),
        );
        (svc, dispatcher)
    }

    fn one_run(events: Vec<LogEvent>) -> BTreeMap<String, Vec<LogEvent>> {
        let mut runs = BTreeMap::new();
        runs.insert("a".to_string(), events);
        runs
    }

    #[test]
    fn test_dispatch_scalars_one_request() {
        let (svc, mut dispatcher) = dispatcher_harness();
        let runs = one_run(vec![
            LogEvent {
                step: 0,
                wall_time: 100.0,
                values: vec![scalar_value("loss", 1.0)],
            },
            LogEvent {
                step: 1,
                wall_time: 101.0,
                values: vec![scalar_value("loss", 0.5)],
            },
        ]);

        let accepted = dispatcher.dispatch(&runs).unwrap();
        assert_eq!(accepted, 2);

        let requests = svc.write_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].time_series_data.len(), 1);
        assert_eq!(requests[0].time_series_data[0].values.len(), 2);
    }

    #[test]
    fn test_descriptor_is_immutable_after_first_sight() {
        let (svc, mut dispatcher) = dispatcher_harness();
        let mut changed = scalar_value("loss", 0.5);
        changed.metadata = Some(ValueMetadata {
            plugin_name: "histograms".to_string(),
            plugin_data: Vec::new(),
            data_class: DataClass::Tensor,
        });

        let runs = one_run(vec![
            LogEvent {
                step: 0,
                wall_time: 100.0,
                values: vec![scalar_value("loss", 1.0)],
            },
            LogEvent {
                step: 1,
                wall_time: 101.0,
                values: vec![changed],
            },
        ]);

        let accepted = dispatcher.dispatch(&runs).unwrap();
        assert_eq!(accepted, 1);
        let requests = svc.write_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].time_series_data[0].values.len(), 1);
    }

    #[test]
    fn test_disallowed_plugin_dropped() {
        let (svc, mut dispatcher) = dispatcher_harness();
        let mut value = scalar_value("text", 0.0);
        value.metadata.as_mut().unwrap().plugin_name = "text".to_string();
        let runs = one_run(vec![LogEvent {
            step: 0,
            wall_time: 100.0,
            values: vec![value],
        }]);

        let accepted = dispatcher.dispatch(&runs).unwrap();
        assert_eq!(accepted, 0);
        assert_eq!(svc.write_request_count(), 0);
    }

    #[test]
    fn test_unknown_data_class_dropped_silently() {
        let (svc, mut dispatcher) = dispatcher_harness();
        let mut value = scalar_value("mystery", 0.0);
        value.metadata.as_mut().unwrap().data_class = DataClass::Unknown;
        let runs = one_run(vec![LogEvent {
            step: 0,
            wall_time: 100.0,
            values: vec![value],
        }]);

        let accepted = dispatcher.dispatch(&runs).unwrap();
        assert_eq!(accepted, 0);
        assert_eq!(svc.write_request_count(), 0);
    }

    #[test]
    fn test_two_runs_two_resources() {
        let (svc, mut dispatcher) = dispatcher_harness();
        let mut runs = BTreeMap::new();
        runs.insert(
            "a".to_string(),
            vec![LogEvent {
                step: 0,
                wall_time: 100.0,
                values: vec![scalar_value("loss", 1.0)],
            }],
        );
        runs.insert(
            "b".to_string(),
            vec![LogEvent {
                step: 0,
                wall_time: 100.0,
                values: vec![scalar_value("loss", 2.0)],
            }],
        );

        dispatcher.dispatch(&runs).unwrap();
        let listed = svc
            .list_tensorboard_runs(dispatcher.experiment(), None)
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(svc.write_request_count(), 2);
    }

    #[test]
    fn test_adopts_run_created_by_other_writer() {
        let (svc, mut dispatcher) = dispatcher_harness();
        let existing = svc
            .create_tensorboard_run(dispatcher.experiment(), "other-writer-id", "a")
            .unwrap();

        let runs = one_run(vec![LogEvent {
            step: 0,
            wall_time: 100.0,
            values: vec![scalar_value("loss", 1.0)],
        }]);
        dispatcher.dispatch(&runs).unwrap();

        let requests = svc.write_requests();
        assert_eq!(requests[0].tensorboard_run, existing.name.to_string());
    }

    #[test]
    fn test_deleted_experiment_is_fatal() {
        let (svc, mut dispatcher) = dispatcher_harness();
        svc.delete_tensorboard_experiment(&dispatcher.experiment().clone());

        let runs = one_run(vec![LogEvent {
            step: 0,
            wall_time: 100.0,
            values: vec![scalar_value("loss", 1.0)],
        }]);
        let err = dispatcher.dispatch(&runs).unwrap_err();
        assert!(matches!(err, Error::ExperimentNotFound(_)));
    }
}
