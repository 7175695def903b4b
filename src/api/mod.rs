//! Remote service seams
//!
//! The control plane is consumed through three trait seams: the metadata
//! graph, the tensorboard hierarchy, and the blob store. Each ships with an
//! in-memory implementation used by the test suites and by offline tooling;
//! transport bindings live outside this crate.

pub mod blob;
pub mod metadata;
pub mod tensorboard;

pub use blob::{BlobStore, MemoryBlobStore};
pub use metadata::{
    Artifact, ArtifactFilter, Context, ContextFilter, Execution, ExecutionState,
    InMemoryMetadataService, LineageEvent, LineageKind, LineageSubgraph, MetadataMap,
    MetadataService,
};
pub use tensorboard::{
    get_or_create_experiment, get_or_create_run, InMemoryTensorboardService, Tensorboard,
    TensorboardExperiment, TensorboardRun, TensorboardService, TensorboardTimeSeries,
    TimeSeriesSpec,
};
