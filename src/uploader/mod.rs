//! Logdir uploader
//!
//! One uploader session ships a live log directory to one tensorboard
//! experiment: `create_experiment` binds the session, `start_uploading`
//! polls the reader and hands each cycle's run-grouped events to the
//! dispatcher. One-shot sessions exit after a single cycle; continuous
//! sessions loop until the process ends or the experiment disappears.

pub mod byte_budget;
pub mod dispatcher;
pub mod graph;
pub mod rate_limiter;
pub mod senders;
pub mod time_series;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::api::blob::BlobStore;
use crate::api::tensorboard::TensorboardService;
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::event::{LogdirReader, LogEvent};
use crate::limits::UploadLimits;
use crate::names::{TensorboardExperimentName, TensorboardName};

pub use byte_budget::{ByteBudgetManager, OutOfSpace};
pub use dispatcher::RunDispatcher;
pub use rate_limiter::RateLimiter;
pub use senders::{BlobSender, ScalarSender, TensorSender};
pub use time_series::TimeSeriesResourceManager;

/// Counters for one upload session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadStats {
    /// Scalar points accepted into requests.
    pub scalar_points: u64,
    /// Tensor points accepted into requests.
    pub tensor_points: u64,
    /// Blob-sequence points written.
    pub blob_points: u64,
    /// Tensor points dropped for exceeding the point-size limit.
    pub tensor_points_skipped: u64,
    /// Total serialized bytes of the dropped tensor points.
    pub tensor_bytes_skipped: u64,
    /// Blobs streamed to the blob store.
    pub blobs_uploaded: u64,
    /// Blobs dropped for exceeding the blob-size limit.
    pub blobs_skipped: u64,
    /// Write requests issued.
    pub requests_sent: u64,
}

/// Configures a [`LogdirUploader`].
pub struct LogdirUploaderBuilder {
    service: Arc<dyn TensorboardService>,
    blob_store: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    tensorboard: TensorboardName,
    experiment_id: String,
    experiment_display_name: Option<String>,
    allowed_plugins: Vec<String>,
    run_name_prefix: Option<String>,
    blob_folder: Option<String>,
    one_shot: bool,
    limits: UploadLimits,
}

impl LogdirUploaderBuilder {
    /// Start configuring an uploader session writing under `tensorboard`.
    #[must_use]
    pub fn new(
        service: Arc<dyn TensorboardService>,
        blob_store: Arc<dyn BlobStore>,
        tensorboard: TensorboardName,
        experiment_id: impl Into<String>,
    ) -> Self {
        Self {
            service,
            blob_store,
            clock: Arc::new(SystemClock),
            tensorboard,
            experiment_id: experiment_id.into(),
            experiment_display_name: None,
            allowed_plugins: vec!["scalars".to_string()],
            run_name_prefix: None,
            blob_folder: None,
            one_shot: false,
            limits: UploadLimits::default(),
        }
    }

    /// Override the experiment display name (defaults to the experiment id).
    #[must_use]
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.experiment_display_name = Some(name.into());
        self
    }

    /// Set the plugin allow-list (defaults to `scalars` only).
    #[must_use]
    pub fn allowed_plugins(mut self, plugins: impl IntoIterator<Item = String>) -> Self {
        self.allowed_plugins = plugins.into_iter().collect();
        self
    }

    /// Prefix every run name before dispatch.
    #[must_use]
    pub fn run_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.run_name_prefix = Some(prefix.into());
        self
    }

    /// Override the blob storage folder (defaults to the tensorboard's).
    #[must_use]
    pub fn blob_folder(mut self, folder: impl Into<String>) -> Self {
        self.blob_folder = Some(folder.into());
        self
    }

    /// Exit after one polling cycle instead of looping.
    #[must_use]
    pub const fn one_shot(mut self, one_shot: bool) -> Self {
        self.one_shot = one_shot;
        self
    }

    /// Override the upload limits.
    #[must_use]
    pub fn limits(mut self, limits: UploadLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Override the clock (tests).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bind the session to `reader`.
    #[must_use]
    pub fn build<R: LogdirReader>(self, reader: R) -> LogdirUploader<R> {
        let poll_limiter = RateLimiter::new(self.limits.min_logdir_poll_interval, self.clock.clone());
        LogdirUploader {
            service: self.service,
            blob_store: self.blob_store,
            clock: self.clock,
            tensorboard: self.tensorboard,
            experiment_id: self.experiment_id.clone(),
            experiment_display_name: self
                .experiment_display_name
                .unwrap_or(self.experiment_id),
            allowed_plugins: self.allowed_plugins,
            run_name_prefix: self.run_name_prefix,
            blob_folder: self.blob_folder,
            one_shot: self.one_shot,
            limits: self.limits,
            reader,
            poll_limiter,
            dispatcher: None,
            stats: Arc::new(Mutex::new(UploadStats::default())),
        }
    }
}

/// Polls a log directory and ships its events to a tensorboard experiment.
pub struct LogdirUploader<R: LogdirReader> {
    service: Arc<dyn TensorboardService>,
    blob_store: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    tensorboard: TensorboardName,
    experiment_id: String,
    experiment_display_name: String,
    allowed_plugins: Vec<String>,
    run_name_prefix: Option<String>,
    blob_folder: Option<String>,
    one_shot: bool,
    limits: UploadLimits,
    reader: R,
    poll_limiter: RateLimiter,
    dispatcher: Option<RunDispatcher>,
    stats: Arc<Mutex<UploadStats>>,
}

impl<R: LogdirReader> LogdirUploader<R> {
    /// Create or fetch the tensorboard experiment and bind the dispatcher.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the tensorboard itself is absent; service
    /// errors unchanged.
    pub fn create_experiment(&mut self) -> Result<TensorboardExperimentName> {
        let name = match self.service.create_tensorboard_experiment(
            &self.tensorboard,
            &self.experiment_id,
            &self.experiment_display_name,
        ) {
            Ok(experiment) => experiment.name,
            Err(err) if err.is_already_exists() => {
                let name = self.tensorboard.experiment(self.experiment_id.clone());
                self.service.get_tensorboard_experiment(&name)?.name
            }
            Err(err) => return Err(err),
        };

        let blob_folder = match &self.blob_folder {
            Some(folder) => folder.clone(),
            None => self.service.get_tensorboard(&self.tensorboard)?.blob_storage_folder,
        };

        info!(experiment = %name, "bound upload session");
        self.dispatcher = Some(RunDispatcher::new(
            self.service.clone(),
            self.blob_store.clone(),
            self.clock.clone(),
            name.clone(),
            self.allowed_plugins.clone(),
            blob_folder,
            self.limits.clone(),
            self.stats.clone(),
        ));
        Ok(name)
    }

    /// Poll the reader and upload until the session ends.
    ///
    /// One-shot sessions return after a single cycle; continuous sessions
    /// only return on a fatal error.
    ///
    /// # Errors
    ///
    /// [`Error::Other`] when called before `create_experiment`;
    /// [`Error::ExperimentNotFound`] when the experiment disappears
    /// mid-session; reader errors unchanged.
    pub fn start_uploading(&mut self) -> Result<UploadStats> {
        if self.dispatcher.is_none() {
            return Err(Error::Other(
                "create_experiment must be called before start_uploading".to_string(),
            ));
        }
        let mut total_accepted = 0u64;
        loop {
            total_accepted += self.upload_once()?;
            if self.one_shot {
                if total_accepted == 0 {
                    warn!(
                        "one-shot upload found no uploadable data; check the logdir and the plugin allow-list"
                    );
                }
                break;
            }
        }
        Ok(self.stats())
    }

    /// Run exactly one polling cycle.
    ///
    /// # Errors
    ///
    /// Same as [`start_uploading`](Self::start_uploading).
    pub fn upload_once(&mut self) -> Result<u64> {
        let dispatcher = self
            .dispatcher
            .as_mut()
            .ok_or_else(|| Error::Other(
                "create_experiment must be called before uploading".to_string(),
            ))?;
        self.poll_limiter.tick();
        self.reader.synchronize_runs()?;
        let mut runs = self.reader.run_events();
        if let Some(prefix) = &self.run_name_prefix {
            runs = prefix_runs(prefix, runs);
        }
        dispatcher.dispatch(&runs)
    }

    /// Snapshot of the session counters.
    ///
    /// # Panics
    ///
    /// Panics if the stats mutex is poisoned.
    #[must_use]
    pub fn stats(&self) -> UploadStats {
        *self.stats.lock().expect("stats poisoned")
    }
}

fn prefix_runs(
    prefix: &str,
    runs: BTreeMap<String, Vec<LogEvent>>,
) -> BTreeMap<String, Vec<LogEvent>> {
    runs.into_iter()
        .map(|(run, events)| (format!("{prefix}{run}"), events))
        .collect()
}
