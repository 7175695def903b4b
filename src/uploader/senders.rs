//! Batched request senders
//!
//! One sender per data class per run. Scalar and tensor senders accumulate
//! points into a size-budgeted request and flush when full; the blob sender
//! writes one request per value after streaming its blobs to the blob store.
//! A not-found rejection from the write RPC means the backing experiment is
//! gone, which ends the whole upload session.

use std::sync::{Arc, Mutex};

use prost::Message;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::blob::BlobStore;
use crate::api::tensorboard::{TensorboardService, TimeSeriesSpec};
use crate::error::{Error, Result};
use crate::event::ValueMetadata;
use crate::names::TensorboardRunName;
use crate::uploader::byte_budget::{ByteBudgetManager, OutOfSpace};
use crate::uploader::rate_limiter::RateLimiter;
use crate::uploader::time_series::TimeSeriesResourceManager;
use crate::uploader::UploadStats;
use crate::wire::{
    TensorProto, TimeSeriesData, TimeSeriesDataPoint, ValueType, WriteRunDataRequest,
};

fn map_write_error(err: Error, run: &TensorboardRunName) -> Error {
    if err.is_not_found() {
        Error::ExperimentNotFound(run.experiment.to_string())
    } else {
        err
    }
}

/// Request accumulator shared by the scalar and tensor senders.
struct BatchState {
    request: WriteRunDataRequest,
    budget: ByteBudgetManager,
    tag_index: rustc_hash::FxHashMap<String, usize>,
}

impl BatchState {
    fn new(run: &TensorboardRunName, max_request_size: usize) -> Result<Self> {
        let request = WriteRunDataRequest::new(run.to_string());
        let mut budget = ByteBudgetManager::new(max_request_size);
        budget.reset(&request).map_err(|OutOfSpace| {
            Error::InvalidArgument(format!(
                "run name {run} alone exceeds the {max_request_size}-byte request budget"
            ))
        })?;
        Ok(Self {
            request,
            budget,
            tag_index: rustc_hash::FxHashMap::default(),
        })
    }

    /// Index of `tag`'s series in the request, adding the entry if absent.
    /// `Err(OutOfSpace)` asks the caller to flush and retry.
    fn series_index(
        &mut self,
        tag: &str,
        series_id: &str,
        value_type: ValueType,
    ) -> std::result::Result<usize, OutOfSpace> {
        if let Some(&index) = self.tag_index.get(tag) {
            return Ok(index);
        }
        let entry = TimeSeriesData {
            time_series_id: series_id.to_string(),
            value_type: value_type as i32,
            values: Vec::new(),
        };
        self.budget.add_time_series(&entry)?;
        self.request.time_series_data.push(entry);
        let index = self.request.time_series_data.len() - 1;
        self.tag_index.insert(tag.to_string(), index);
        Ok(index)
    }

    fn restart(&mut self, run: &TensorboardRunName, max_request_size: usize) -> Result<()> {
        self.request = WriteRunDataRequest::new(run.to_string());
        self.tag_index.clear();
        self.budget.reset(&self.request).map_err(|OutOfSpace| {
            Error::InvalidArgument(format!(
                "run name {run} alone exceeds the {max_request_size}-byte request budget"
            ))
        })
    }

    /// Drop series that gathered no points; true when something remains.
    fn prune(&mut self) -> bool {
        self.request.time_series_data.retain(|s| !s.values.is_empty());
        self.tag_index.clear();
        !self.request.time_series_data.is_empty()
    }
}

/// Accumulates scalar points for one run.
pub struct ScalarSender {
    service: Arc<dyn TensorboardService>,
    resources: TimeSeriesResourceManager,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    stats: Arc<Mutex<UploadStats>>,
    state: BatchState,
    max_request_size: usize,
}

impl ScalarSender {
    /// Create a sender for `run`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when the run name alone exceeds the budget.
    pub fn new(
        service: Arc<dyn TensorboardService>,
        run: TensorboardRunName,
        max_request_size: usize,
        rate_limiter: Arc<Mutex<RateLimiter>>,
        stats: Arc<Mutex<UploadStats>>,
    ) -> Result<Self> {
        let state = BatchState::new(&run, max_request_size)?;
        Ok(Self {
            resources: TimeSeriesResourceManager::new(service.clone(), run),
            service,
            rate_limiter,
            stats,
            state,
            max_request_size,
        })
    }

    /// Append one scalar point, flushing first when the request is full.
    ///
    /// # Errors
    ///
    /// Flush errors, and [`Error::ExperimentNotFound`] when the backing
    /// experiment is gone.
    pub fn add_value(
        &mut self,
        tag: &str,
        metadata: &ValueMetadata,
        step: i64,
        wall_time: f64,
        value: f64,
    ) -> Result<()> {
        let point = TimeSeriesDataPoint::scalar(step, wall_time, value);
        self.add_point(tag, metadata, point)?;
        self.stats.lock().expect("stats poisoned").scalar_points += 1;
        Ok(())
    }

    fn add_point(
        &mut self,
        tag: &str,
        metadata: &ValueMetadata,
        point: TimeSeriesDataPoint,
    ) -> Result<()> {
        let series_id = self
            .resources
            .get_or_create(tag, || TimeSeriesSpec {
                display_name: tag.to_string(),
                value_type: ValueType::Scalar,
                plugin_name: metadata.plugin_name.clone(),
                plugin_data: metadata.plugin_data.clone(),
            })?
            .name
            .time_series
            .clone();

        for attempt in 0..2 {
            let outcome = self
                .state
                .series_index(tag, &series_id, ValueType::Scalar)
                .and_then(|index| {
                    self.state.budget.add_point(&point)?;
                    Ok(index)
                });
            match outcome {
                Ok(index) => {
                    self.state.request.time_series_data[index]
                        .values
                        .push(point.clone());
                    return Ok(());
                }
                Err(OutOfSpace) if attempt == 0 => self.flush()?,
                Err(OutOfSpace) => break,
            }
        }
        Err(Error::InvalidArgument(format!(
            "scalar point for {tag:?} exceeds the {}-byte request budget on its own",
            self.max_request_size
        )))
    }

    /// Send the accumulated request, if any, and start a fresh one.
    ///
    /// # Errors
    ///
    /// [`Error::ExperimentNotFound`] when the backing experiment is gone;
    /// other service errors unchanged.
    pub fn flush(&mut self) -> Result<()> {
        if !self.state.prune() {
            return self.state.restart(self.resources.run(), self.max_request_size);
        }
        self.rate_limiter
            .lock()
            .expect("rate limiter poisoned")
            .tick();
        debug!(
            run = %self.resources.run(),
            series = self.state.request.time_series_data.len(),
            bytes = self.state.request.encoded_len(),
            "flushing scalar request"
        );
        self.service
            .write_run_data(&self.state.request)
            .map_err(|e| map_write_error(e, self.resources.run()))?;
        self.stats.lock().expect("stats poisoned").requests_sent += 1;
        self.state.restart(self.resources.run(), self.max_request_size)
    }
}

/// Accumulates tensor points for one run.
pub struct TensorSender {
    service: Arc<dyn TensorboardService>,
    resources: TimeSeriesResourceManager,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    stats: Arc<Mutex<UploadStats>>,
    state: BatchState,
    max_request_size: usize,
    max_point_size: usize,
}

impl TensorSender {
    /// Create a sender for `run`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when the run name alone exceeds the budget.
    pub fn new(
        service: Arc<dyn TensorboardService>,
        run: TensorboardRunName,
        max_request_size: usize,
        max_point_size: usize,
        rate_limiter: Arc<Mutex<RateLimiter>>,
        stats: Arc<Mutex<UploadStats>>,
    ) -> Result<Self> {
        let state = BatchState::new(&run, max_request_size)?;
        Ok(Self {
            resources: TimeSeriesResourceManager::new(service.clone(), run),
            service,
            rate_limiter,
            stats,
            state,
            max_request_size,
            max_point_size,
        })
    }

    /// Append one tensor point from its serialized payload.
    ///
    /// Oversized tensors are skipped with a warning and counted; undecodable
    /// payloads fail the add.
    ///
    /// # Errors
    ///
    /// [`Error::Decode`] for undecodable payloads; flush errors; and
    /// [`Error::ExperimentNotFound`] when the backing experiment is gone.
    pub fn add_value(
        &mut self,
        tag: &str,
        metadata: &ValueMetadata,
        step: i64,
        wall_time: f64,
        tensor_bytes: &[u8],
    ) -> Result<()> {
        let tensor = TensorProto::decode_bytes(tensor_bytes)?;
        let tensor_size = tensor.encoded_len();
        if tensor_size > self.max_point_size {
            warn!(
                tag,
                size = tensor_size,
                limit = self.max_point_size,
                "dropping oversized tensor point"
            );
            let mut stats = self.stats.lock().expect("stats poisoned");
            stats.tensor_points_skipped += 1;
            stats.tensor_bytes_skipped += tensor_size as u64;
            return Ok(());
        }

        let series_id = self
            .resources
            .get_or_create(tag, || TimeSeriesSpec {
                display_name: tag.to_string(),
                value_type: ValueType::Tensor,
                plugin_name: metadata.plugin_name.clone(),
                plugin_data: metadata.plugin_data.clone(),
            })?
            .name
            .time_series
            .clone();
        let point = TimeSeriesDataPoint::tensor(step, wall_time, tensor);

        for attempt in 0..2 {
            let outcome = self
                .state
                .series_index(tag, &series_id, ValueType::Tensor)
                .and_then(|index| {
                    self.state.budget.add_point(&point)?;
                    Ok(index)
                });
            match outcome {
                Ok(index) => {
                    self.state.request.time_series_data[index]
                        .values
                        .push(point.clone());
                    self.stats.lock().expect("stats poisoned").tensor_points += 1;
                    return Ok(());
                }
                Err(OutOfSpace) if attempt == 0 => self.flush()?,
                Err(OutOfSpace) => break,
            }
        }
        Err(Error::InvalidArgument(format!(
            "tensor point for {tag:?} exceeds the {}-byte request budget on its own",
            self.max_request_size
        )))
    }

    /// Send the accumulated request, if any, and start a fresh one.
    ///
    /// # Errors
    ///
    /// [`Error::ExperimentNotFound`] when the backing experiment is gone;
    /// other service errors unchanged.
    pub fn flush(&mut self) -> Result<()> {
        if !self.state.prune() {
            return self.state.restart(self.resources.run(), self.max_request_size);
        }
        self.rate_limiter
            .lock()
            .expect("rate limiter poisoned")
            .tick();
        debug!(
            run = %self.resources.run(),
            series = self.state.request.time_series_data.len(),
            bytes = self.state.request.encoded_len(),
            "flushing tensor request"
        );
        self.service
            .write_run_data(&self.state.request)
            .map_err(|e| map_write_error(e, self.resources.run()))?;
        self.stats.lock().expect("stats poisoned").requests_sent += 1;
        self.state.restart(self.resources.run(), self.max_request_size)
    }
}

/// Streams blob-sequence values for one run.
///
/// No batching: each value becomes one request carrying a single point whose
/// payload lists the uploaded blob ids in order.
pub struct BlobSender {
    service: Arc<dyn TensorboardService>,
    blob_store: Arc<dyn BlobStore>,
    resources: TimeSeriesResourceManager,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    stats: Arc<Mutex<UploadStats>>,
    folder: String,
    max_blob_size: u64,
}

impl BlobSender {
    /// Create a sender for `run`, storing blobs under `folder`.
    #[must_use]
    pub fn new(
        service: Arc<dyn TensorboardService>,
        blob_store: Arc<dyn BlobStore>,
        run: TensorboardRunName,
        folder: impl Into<String>,
        max_blob_size: u64,
        rate_limiter: Arc<Mutex<RateLimiter>>,
        stats: Arc<Mutex<UploadStats>>,
    ) -> Self {
        Self {
            resources: TimeSeriesResourceManager::new(service.clone(), run),
            service,
            blob_store,
            rate_limiter,
            stats,
            folder: folder.into(),
            max_blob_size,
        }
    }

    fn blob_path(&self, series_id: &str) -> String {
        let run = self.resources.run();
        format!(
            "{}/tensorboard-{}/{}/{}/{}/{}",
            self.folder,
            run.experiment.tensorboard.tensorboard,
            run.experiment.experiment,
            run.run,
            series_id,
            Uuid::new_v4().simple()
        )
    }

    /// Upload one blob-sequence value and write its data point.
    ///
    /// Values whose tensor is not rank 1 are rejected with a warning;
    /// individual blobs above the size limit are skipped with a warning and
    /// contribute no id.
    ///
    /// # Errors
    ///
    /// [`Error::Decode`] for undecodable payloads; blob-store errors; and
    /// [`Error::ExperimentNotFound`] when the backing experiment is gone.
    pub fn add_value(
        &mut self,
        tag: &str,
        metadata: &ValueMetadata,
        step: i64,
        wall_time: f64,
        tensor_bytes: &[u8],
    ) -> Result<()> {
        let tensor = TensorProto::decode_bytes(tensor_bytes)?;
        if tensor.rank() != 1 {
            warn!(tag, rank = tensor.rank(), "rejecting non-rank-1 blob sequence");
            return Ok(());
        }

        let series_id = self
            .resources
            .get_or_create(tag, || TimeSeriesSpec {
                display_name: tag.to_string(),
                value_type: ValueType::BlobSequence,
                plugin_name: metadata.plugin_name.clone(),
                plugin_data: metadata.plugin_data.clone(),
            })?
            .name
            .time_series
            .clone();

        let mut blob_ids = Vec::new();
        for blob in &tensor.string_val {
            if blob.len() as u64 > self.max_blob_size {
                warn!(
                    tag,
                    size = blob.len(),
                    limit = self.max_blob_size,
                    "dropping oversized blob"
                );
                self.stats.lock().expect("stats poisoned").blobs_skipped += 1;
                continue;
            }
            let id = self.blob_store.put(&self.blob_path(&series_id), blob)?;
            self.stats.lock().expect("stats poisoned").blobs_uploaded += 1;
            blob_ids.push(id);
        }

        let mut request = WriteRunDataRequest::new(self.resources.run().to_string());
        request.time_series_data.push(TimeSeriesData {
            time_series_id: series_id,
            value_type: ValueType::BlobSequence as i32,
            values: vec![TimeSeriesDataPoint::blob_sequence(step, wall_time, blob_ids)],
        });

        self.rate_limiter
            .lock()
            .expect("rate limiter poisoned")
            .tick();
        self.service
            .write_run_data(&request)
            .map_err(|e| map_write_error(e, self.resources.run()))?;
        let mut stats = self.stats.lock().expect("stats poisoned");
        stats.requests_sent += 1;
        stats.blob_points += 1;
        Ok(())
    }

    /// Nothing is buffered; present for flush-protocol symmetry.
    pub fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
