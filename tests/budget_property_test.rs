//! Byte-budget properties
//!
//! For any sequence of added values, no request handed to the service may
//! exceed the configured byte ceiling, and no accepted point may be lost.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;

use bitacora::api::tensorboard::{InMemoryTensorboardService, TensorboardService};
use bitacora::clock::ManualClock;
use bitacora::names::TensorboardRunName;
use bitacora::uploader::{RateLimiter, ScalarSender, UploadStats};
use bitacora::{DataClass, ValueMetadata};
use prost::Message;

fn scalar_metadata() -> ValueMetadata {
    ValueMetadata {
        plugin_name: "scalars".to_string(),
        plugin_data: Vec::new(),
        data_class: DataClass::Scalar,
    }
}

fn sender_harness(
    max_request_size: usize,
) -> (Arc<InMemoryTensorboardService>, ScalarSender) {
    let service = Arc::new(InMemoryTensorboardService::new());
    let tensorboard = service
        .create_tensorboard("p", "l", "board", &BTreeMap::new())
        .unwrap()
        .name;
    let experiment = service
        .create_tensorboard_experiment(&tensorboard, "exp", "exp")
        .unwrap()
        .name;
    let run = service
        .create_tensorboard_run(&experiment, "run-id", "r1")
        .unwrap()
        .name;
    let sender = make_sender(&service, run, max_request_size);
    (service, sender)
}

fn make_sender(
    service: &Arc<InMemoryTensorboardService>,
    run: TensorboardRunName,
    max_request_size: usize,
) -> ScalarSender {
    let limiter = Arc::new(Mutex::new(RateLimiter::new(
        Duration::ZERO,
        Arc::new(ManualClock::new()),
    )));
    ScalarSender::new(
        service.clone(),
        run,
        max_request_size,
        limiter,
        Arc::new(Mutex::new(UploadStats::default())),
    )
    .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_requests_never_exceed_budget(
        values in proptest::collection::vec(
            (0u8..4, 0i64..1000, proptest::num::f64::NORMAL),
            1..200,
        ),
        max_request_size in 192usize..2048,
    ) {
        let (service, mut sender) = sender_harness(max_request_size);
        let metadata = scalar_metadata();
        let tags = ["loss", "accuracy", "lr", "grad-norm"];

        let mut accepted = 0usize;
        for (tag_index, step, value) in values {
            let tag = tags[tag_index as usize];
            if sender.add_value(tag, &metadata, step, step as f64, value).is_ok() {
                accepted += 1;
            }
        }
        sender.flush().unwrap();

        let requests = service.write_requests();
        for request in &requests {
            prop_assert!(
                request.encoded_len() <= max_request_size,
                "request of {} bytes exceeds the {} byte budget",
                request.encoded_len(),
                max_request_size
            );
        }
        let total: usize = requests
            .iter()
            .flat_map(|r| &r.time_series_data)
            .map(|s| s.values.len())
            .sum();
        prop_assert_eq!(total, accepted);
    }
}
