//! # Bitacora: Experiment Tracking & Tensorboard Upload Client
//!
//! Client SDK for a managed ML platform's experiment-tracking surface:
//! metadata contexts for experiments and runs, lineage artifacts and
//! executions, and batched time-series upload to tensorboard resources.
//!
//! ## Architecture
//!
//! ```text
//! Tracker ──────────────► MetadataService (contexts, lineage)
//!    │ log_time_series         ▲
//!    ▼                         │
//! ScalarSender ──┐             │
//! TensorSender ──┼── RunDispatcher ◄── LogdirUploader ◄── LogdirReader
//! BlobSender ────┘        │
//!    │                    ▼
//!    └──────────► TensorboardService (runs, time series, batched writes)
//! ```
//!
//! The remote services are trait seams ([`api`]); in-memory implementations
//! back the test suites and offline tooling.
//!
//! ## Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! use bitacora::api::{InMemoryMetadataService, InMemoryTensorboardService};
//! use bitacora::experiment::{InitOptions, ParamValue, RunState, Tracker};
//!
//! # fn main() -> bitacora::Result<()> {
//! let mut tracker = Tracker::new(
//!     Arc::new(InMemoryMetadataService::new()),
//!     Arc::new(InMemoryTensorboardService::new()),
//! );
//! tracker.init(InitOptions::new("my-project", "us-central1").experiment("exp"))?;
//! tracker.start_run("r1", false)?;
//!
//! let mut params = BTreeMap::new();
//! params.insert("lr".to_string(), ParamValue::Float(0.01));
//! tracker.log_params(params)?;
//!
//! tracker.end_run(RunState::Complete)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

pub mod api;
pub mod clock;
pub mod error;
pub mod event;
pub mod experiment;
pub mod limits;
pub mod names;
pub mod serializer;
pub mod uploader;
pub mod wire;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use event::{DataClass, JsonlLogdirReader, LogEvent, LogValue, LogdirReader, ValueMetadata};
pub use experiment::{InitOptions, RunState, TensorboardOption, Tracker};
pub use limits::UploadLimits;
pub use uploader::{LogdirUploader, LogdirUploaderBuilder, UploadStats};
