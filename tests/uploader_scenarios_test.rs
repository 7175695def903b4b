//! Uploader scenario tests
//!
//! Drives the full uploader stack (reader → dispatcher → senders → service)
//! over the in-memory backends and asserts on the write requests the
//! service actually received.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use prost::Message;

use bitacora::api::blob::MemoryBlobStore;
use bitacora::api::tensorboard::{InMemoryTensorboardService, TensorboardService};
use bitacora::clock::ManualClock;
use bitacora::event::MemoryLogdirReader;
use bitacora::names::TensorboardName;
use bitacora::wire::{TensorProto, ValueType};
use bitacora::{
    DataClass, JsonlLogdirReader, LogEvent, LogValue, LogdirUploaderBuilder, UploadLimits,
    ValueMetadata,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

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

fn harness() -> (
    Arc<InMemoryTensorboardService>,
    Arc<MemoryBlobStore>,
    TensorboardName,
) {
    init_tracing();
    let service = Arc::new(InMemoryTensorboardService::new());
    let blob_store = Arc::new(MemoryBlobStore::new());
    let tensorboard = service
        .create_tensorboard("p", "l", "board", &BTreeMap::new())
        .unwrap()
        .name;
    (service, blob_store, tensorboard)
}

#[test]
fn test_one_shot_scalars_single_request_in_order() {
    let (service, blob_store, tensorboard) = harness();

    let mut reader = MemoryLogdirReader::new();
    reader.push(
        "a",
        LogEvent {
            step: 0,
            wall_time: 100.0,
            values: vec![scalar_value("loss", 1.0)],
        },
    );
    reader.push(
        "a",
        LogEvent {
            step: 1,
            wall_time: 101.0,
            values: vec![scalar_value("loss", 0.5)],
        },
    );

    let mut uploader = LogdirUploaderBuilder::new(service.clone(), blob_store, tensorboard, "exp")
        .one_shot(true)
        .clock(Arc::new(ManualClock::new()))
        .build(reader);
    uploader.create_experiment().unwrap();
    let stats = uploader.start_uploading().unwrap();

    let requests = service.write_requests();
    assert_eq!(requests.len(), 1, "expected exactly one write request");
    assert_eq!(requests[0].time_series_data.len(), 1);
    let series = &requests[0].time_series_data[0];
    assert_eq!(series.value_type, ValueType::Scalar as i32);
    assert_eq!(series.values.len(), 2);
    assert_eq!(series.values[0].step, 0);
    assert_eq!(series.values[0].scalar.as_ref().unwrap().value, 1.0);
    assert_eq!(series.values[1].step, 1);
    assert_eq!(series.values[1].scalar.as_ref().unwrap().value, 0.5);
    assert_eq!(stats.scalar_points, 2);
}

#[test]
fn test_blob_sequence_uploads_and_single_point() {
    let (service, blob_store, tensorboard) = harness();

    let blobs = vec![vec![1u8; 512], vec![2u8; 512], vec![3u8; 512]];
    let mut reader = MemoryLogdirReader::new();
    reader.push(
        "a",
        LogEvent {
            step: 0,
            wall_time: 100.0,
            values: vec![LogValue {
                tag: "images".to_string(),
                metadata: Some(ValueMetadata {
                    plugin_name: "images".to_string(),
                    plugin_data: Vec::new(),
                    data_class: DataClass::BlobSequence,
                }),
                tensor: TensorProto::from_blobs(blobs.clone()).encode_to_vec(),
            }],
        },
    );

    let mut uploader = LogdirUploaderBuilder::new(
        service.clone(),
        blob_store.clone(),
        tensorboard,
        "exp",
    )
    .allowed_plugins(["images".to_string()])
    .one_shot(true)
    .clock(Arc::new(ManualClock::new()))
    .build(reader);
    uploader.create_experiment().unwrap();
    let stats = uploader.start_uploading().unwrap();

    // Three puts, one data point listing the three ids in order.
    assert_eq!(blob_store.put_count(), 3);
    assert_eq!(stats.blobs_uploaded, 3);

    let requests = service.write_requests();
    assert_eq!(requests.len(), 1);
    let point = &requests[0].time_series_data[0].values[0];
    let ids = &point.blobs.as_ref().unwrap().blob_ids;
    assert_eq!(ids.len(), 3);
    for (id, blob) in ids.iter().zip(&blobs) {
        assert_eq!(blob_store.get(id).unwrap(), *blob);
    }
}

#[test]
fn test_oversized_tensor_skipped_with_counts() {
    let (service, blob_store, tensorboard) = harness();

    // ~20 KiB of packed bytes against a 16 KiB point limit.
    let big = TensorProto {
        dtype: bitacora::wire::TensorDtype::Double as i32,
        dim: vec![20 * 1024 / 8],
        tensor_content: vec![0u8; 20 * 1024 - 9],
        ..TensorProto::default()
    };
    let tensor_size = big.encoded_len();
    assert!(tensor_size > 16 * 1024);

    let mut reader = MemoryLogdirReader::new();
    reader.push(
        "a",
        LogEvent {
            step: 0,
            wall_time: 100.0,
            values: vec![LogValue {
                tag: "hist".to_string(),
                metadata: Some(ValueMetadata {
                    plugin_name: "histograms".to_string(),
                    plugin_data: Vec::new(),
                    data_class: DataClass::Tensor,
                }),
                tensor: big.encode_to_vec(),
            }],
        },
    );

    let mut uploader = LogdirUploaderBuilder::new(service.clone(), blob_store, tensorboard, "exp")
        .allowed_plugins(["histograms".to_string()])
        .one_shot(true)
        .clock(Arc::new(ManualClock::new()))
        .build(reader);
    uploader.create_experiment().unwrap();
    let stats = uploader.start_uploading().unwrap();

    assert_eq!(service.write_request_count(), 0);
    assert_eq!(stats.tensor_points_skipped, 1);
    assert_eq!(stats.tensor_bytes_skipped, tensor_size as u64);
}

#[test]
fn test_empty_logdir_one_shot_exits_clean() {
    let (service, blob_store, tensorboard) = harness();

    let mut uploader = LogdirUploaderBuilder::new(service.clone(), blob_store, tensorboard, "exp")
        .one_shot(true)
        .clock(Arc::new(ManualClock::new()))
        .build(MemoryLogdirReader::new());
    uploader.create_experiment().unwrap();
    let stats = uploader.start_uploading().unwrap();

    assert_eq!(stats, bitacora::UploadStats::default());
    assert_eq!(service.write_request_count(), 0);
}

#[test]
fn test_small_budget_forces_flush_but_loses_nothing() {
    let (service, blob_store, tensorboard) = harness();

    let mut reader = MemoryLogdirReader::new();
    for step in 0..100 {
        reader.push(
            "a",
            LogEvent {
                step,
                wall_time: 100.0 + step as f64,
                values: vec![scalar_value("loss", 1.0 / (step as f64 + 1.0))],
            },
        );
    }

    let limits = UploadLimits::new().with_max_scalar_request_size(256);
    let mut uploader = LogdirUploaderBuilder::new(service.clone(), blob_store, tensorboard, "exp")
        .one_shot(true)
        .limits(limits)
        .clock(Arc::new(ManualClock::new()))
        .build(reader);
    uploader.create_experiment().unwrap();
    let stats = uploader.start_uploading().unwrap();

    let requests = service.write_requests();
    assert!(requests.len() > 1);
    for request in &requests {
        assert!(request.encoded_len() <= 256);
    }
    let total: usize = requests
        .iter()
        .flat_map(|r| &r.time_series_data)
        .map(|s| s.values.len())
        .sum();
    assert_eq!(total, 100);
    assert_eq!(stats.scalar_points, 100);
}

#[test]
fn test_run_name_prefix_applied() {
    let (service, blob_store, tensorboard) = harness();

    let mut reader = MemoryLogdirReader::new();
    reader.push(
        "train",
        LogEvent {
            step: 0,
            wall_time: 100.0,
            values: vec![scalar_value("loss", 1.0)],
        },
    );

    let mut uploader =
        LogdirUploaderBuilder::new(service.clone(), blob_store, tensorboard, "exp")
            .run_name_prefix("worker-0/")
            .one_shot(true)
            .clock(Arc::new(ManualClock::new()))
            .build(reader);
    let experiment = uploader.create_experiment().unwrap();
    uploader.start_uploading().unwrap();

    let runs = service.list_tensorboard_runs(&experiment, None).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].display_name, "worker-0/train");
}

#[test]
fn test_repeated_cycles_resume_from_offsets() {
    let (service, blob_store, tensorboard) = harness();
    let logdir = tempfile::tempdir().unwrap();
    let run_dir = logdir.path().join("train");
    std::fs::create_dir_all(&run_dir).unwrap();
    let file_path = run_dir.join("events.jsonl");

    let event = LogEvent {
        step: 0,
        wall_time: 100.0,
        values: vec![scalar_value("loss", 1.0)],
    };
    let mut file = std::fs::File::create(&file_path).unwrap();
    writeln!(file, "{}", serde_json::to_string(&event).unwrap()).unwrap();
    file.sync_all().unwrap();

    let mut uploader = LogdirUploaderBuilder::new(
        service.clone(),
        blob_store,
        tensorboard,
        "exp",
    )
    .clock(Arc::new(ManualClock::new()))
    .build(JsonlLogdirReader::new(logdir.path()));
    uploader.create_experiment().unwrap();

    assert_eq!(uploader.upload_once().unwrap(), 1);

    // Nothing new: the reader remembered its offset.
    assert_eq!(uploader.upload_once().unwrap(), 0);

    // Append a second event; only it is picked up.
    let second = LogEvent {
        step: 1,
        wall_time: 101.0,
        values: vec![scalar_value("loss", 0.5)],
    };
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&file_path)
        .unwrap();
    writeln!(file, "{}", serde_json::to_string(&second).unwrap()).unwrap();
    file.sync_all().unwrap();

    assert_eq!(uploader.upload_once().unwrap(), 1);

    let total: usize = service
        .write_requests()
        .iter()
        .flat_map(|r| &r.time_series_data)
        .map(|s| s.values.len())
        .sum();
    assert_eq!(total, 2);
}
