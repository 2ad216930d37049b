//! End-to-end update runs against in-memory collaborators.

mod common;

use common::*;
use handsign_core::{UpdateError, UpdateOutcome, UpdateReport, UpdateRequest, UpdateStage};
use handsign_store::{ContentDigest, ModelRegistry};

fn request(base: &str, gesture: &str, rows: Vec<Vec<f32>>) -> UpdateRequest {
    UpdateRequest {
        base_model: base.to_string(),
        batch: batch(gesture, rows),
    }
}

fn published(outcome: UpdateOutcome) -> UpdateReport {
    match outcome {
        UpdateOutcome::Published(report) => report,
        UpdateOutcome::DuplicateRejected(report) => {
            panic!("expected publication, got rejection: {report:?}")
        }
    }
}

#[tokio::test]
async fn new_gesture_extends_label_space_and_publishes() {
    let h = Harness::new();
    let (train, test) = ab_base();
    h.seed_base("base", &train, &test).await;

    let outcome = h
        .orchestrator()
        .run(request("base", "C", gesture_rows(20.0, 0, 10)))
        .await
        .unwrap();
    let report = published(outcome);
    let code = report.version_code.clone();

    let labels: Vec<_> = report.label_space.labels().to_vec();
    assert_eq!(labels, vec!["none", "A", "B", "C"]);
    assert_eq!(report.label_space.index_of("C"), Some(3));
    assert_eq!(report.new_labels, vec!["C"]);
    assert_eq!(report.duplicates.train.ratio, 0.0);
    assert_eq!(report.duplicates.test.ratio, 0.0);
    assert_eq!(report.train_samples, 24);
    assert_eq!(report.test_samples, 6);
    assert_eq!(
        report.stages,
        vec![
            UpdateStage::Start,
            UpdateStage::FetchBase,
            UpdateStage::IngestUpdate,
            UpdateStage::CheckDuplicates,
            UpdateStage::Merge,
            UpdateStage::BuildLabelSpace,
            UpdateStage::Train,
            UpdateStage::PersistArtifacts,
            UpdateStage::Publish,
            UpdateStage::Done,
        ]
    );

    let job = h.engine.last_job().unwrap();
    assert_eq!(job.num_classes, 4);
    assert_eq!(job.train_len, 24);
    assert_eq!(job.class_weights, vec![0.0, 1.0, 1.0, 1.0]);
    assert_eq!(h.compiler.representative_counts(), vec![5]);

    for path in [
        &report.artifacts.weights,
        &report.artifacts.compiled,
        &report.artifacts.train,
        &report.artifacts.test,
    ] {
        assert!(path.is_file(), "{} missing", path.display());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with(&code));
    }
    let merged_train = handsign_core::dataset::npy::read_split(&report.artifacts.train).unwrap();
    assert_eq!(merged_train.len(), 24);

    let primary_key = format!("models/{code}_cnn.tflite");
    assert_eq!(report.primary_url, format!("mem://{primary_key}"));
    assert_eq!(h.blob.uploaded_keys().first(), Some(&primary_key));

    let record = h.registry.get(&code).await.unwrap().unwrap();
    assert_eq!(record.base_model.as_deref(), Some("base"));
    assert_eq!(record.labels, labels);
    assert_eq!(record.primary_url, report.primary_url);

    h.pool.drain().await;
    assert!(h.blob.object(&format!("models/{code}.zip")).is_some());
}

#[tokio::test]
async fn published_bundle_serves_as_next_base() {
    let h = Harness::new();
    let (train, test) = ab_base();
    h.seed_base("base", &train, &test).await;
    let orchestrator = h.orchestrator();

    let first = published(
        orchestrator
            .run(request("base", "C", gesture_rows(20.0, 0, 10)))
            .await
            .unwrap(),
    );
    h.pool.drain().await;

    let second = published(
        orchestrator
            .run(request(&first.version_code, "D", gesture_rows(30.0, 0, 10)))
            .await
            .unwrap(),
    );
    assert_ne!(first.version_code, second.version_code);
    assert_eq!(
        second.label_space.labels().to_vec(),
        vec!["none", "A", "B", "C", "D"]
    );
    assert_eq!(second.new_labels, vec!["D"]);
    assert_eq!(second.train_samples, 32);
    assert_eq!(
        h.registry.get(&second.version_code).await.unwrap().unwrap().base_model,
        Some(first.version_code.clone())
    );
}

#[tokio::test]
async fn near_duplicate_batch_is_rejected_without_side_effects() {
    let h = Harness::new();
    let (train, test) = ab_base();
    h.seed_base("base", &train, &test).await;

    // identical to gesture A's training rows, under a new name
    let rows: Vec<_> = gesture_rows(0.0, 0, 8).into_iter().cycle().take(10).collect();
    let outcome = h
        .orchestrator()
        .run(request("base", "A-again", rows))
        .await
        .unwrap();

    let report = match outcome {
        UpdateOutcome::DuplicateRejected(report) => report,
        UpdateOutcome::Published(r) => panic!("expected rejection, published {}", r.version_code),
    };
    assert!(report.rejected);
    assert_eq!(report.train.ratio, 100.0);
    assert!(report.decisive_ratio() >= 70.0);

    assert!(h.output_entries().is_empty());
    assert_eq!(h.registry.len(), 1, "only the base is registered");
    assert!(h.blob.uploaded_keys().is_empty());
    assert_eq!(h.engine.calls(), 0);
    assert_eq!(h.compiler.calls(), 0);
}

#[tokio::test]
async fn mostly_duplicate_batch_is_rejected() {
    let h = Harness::new();
    let (train, test) = ab_base();
    h.seed_base("base", &train, &test).await;

    // 8 of 10 rows copy gesture A's training rows, 2 are far away
    let mut rows = gesture_rows(0.0, 0, 8);
    rows.extend(gesture_rows(50.0, 0, 2));
    let outcome = h
        .orchestrator()
        .run(request("base", "A-again", rows))
        .await
        .unwrap();

    let report = match outcome {
        UpdateOutcome::DuplicateRejected(report) => report,
        UpdateOutcome::Published(r) => panic!("expected rejection, published {}", r.version_code),
    };
    // whatever the split, at least 6 of the 8 training rows are copies
    assert!(report.rejected);
    assert_eq!(report.train.total, 8);
    assert!(report.train.matches >= 6, "{:?}", report.train);
    assert!(report.train.ratio >= 75.0);

    assert!(h.output_entries().is_empty());
    assert_eq!(h.registry.len(), 1);
    assert!(h.blob.uploaded_keys().is_empty());
    assert_eq!(h.engine.calls(), 0);
}

#[tokio::test]
async fn existing_gesture_keeps_its_index() {
    let h = Harness::new();
    let (train, test) = ab_base();
    h.seed_base("base", &train, &test).await;

    let report = published(
        h.orchestrator()
            .run(request("base", "A", gesture_rows(0.0, 100, 10)))
            .await
            .unwrap(),
    );
    assert_eq!(report.label_space.labels().to_vec(), vec!["none", "A", "B"]);
    assert!(report.new_labels.is_empty());
    assert_eq!(h.engine.last_job().unwrap().num_classes, 3);
}

#[tokio::test]
async fn unknown_base_is_not_found() {
    let h = Harness::new();
    let err = h
        .orchestrator()
        .run(request("ghost", "C", gesture_rows(20.0, 0, 10)))
        .await
        .unwrap_err();
    assert!(
        matches!(&err, UpdateError::NotFound { model_code } if model_code == "ghost"),
        "got {err:?}"
    );
    assert!(h.output_entries().is_empty());
}

#[tokio::test]
async fn corrupt_base_is_reported_as_not_found() {
    let h = Harness::new();
    h.blob.insert("models/broken.zip", b"not a zip".to_vec());
    h.register_base("broken", vec!["none".to_string()]).await;
    let err = h
        .orchestrator()
        .run(request("broken", "C", gesture_rows(20.0, 0, 10)))
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::NotFound { .. }), "got {err:?}");
}

#[tokio::test]
async fn unregistered_base_is_not_found_even_with_archive() {
    let h = Harness::new();
    let (train, test) = ab_base();
    h.blob.insert("models/stray.zip", bundle_zip("stray", &train, &test));

    let err = h
        .orchestrator()
        .run(request("stray", "C", gesture_rows(20.0, 0, 10)))
        .await
        .unwrap_err();
    assert!(
        matches!(&err, UpdateError::NotFound { model_code } if model_code == "stray"),
        "got {err:?}"
    );
    assert_eq!(h.blob.download_count("models/stray.zip"), 0);
}

#[tokio::test]
async fn repaired_base_archive_is_fetched_again() {
    let h = Harness::new();
    h.blob.insert("models/base.zip", b"garbage".to_vec());
    h.register_base("base", vec!["none".to_string(), "A".to_string(), "B".to_string()])
        .await;
    let orchestrator = h.orchestrator();

    let err = orchestrator
        .run(request("base", "C", gesture_rows(20.0, 0, 10)))
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::NotFound { .. }), "got {err:?}");

    let (train, test) = ab_base();
    h.blob.insert("models/base.zip", bundle_zip("base", &train, &test));
    let report = published(
        orchestrator
            .run(request("base", "C", gesture_rows(20.0, 0, 10)))
            .await
            .unwrap(),
    );
    assert_eq!(report.new_labels, vec!["C"]);
    assert_eq!(h.blob.download_count("models/base.zip"), 2);
}

#[tokio::test]
async fn unreadable_base_split_is_fetched_again() {
    let h = Harness::new();
    let (train, test) = ab_base();
    h.seed_base("base", &train, &test).await;
    let orchestrator = h.orchestrator();
    orchestrator.fetcher().fetch("base").await.unwrap();

    let split = h
        .config
        .bundle
        .models_dir
        .join("base")
        .join("base_train_hand_landmarks.npy");
    std::fs::write(&split, b"truncated").unwrap();
    let err = orchestrator
        .run(request("base", "C", gesture_rows(20.0, 0, 10)))
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::NotFound { .. }), "got {err:?}");

    published(
        orchestrator
            .run(request("base", "C", gesture_rows(20.0, 0, 10)))
            .await
            .unwrap(),
    );
    assert_eq!(h.blob.download_count("models/base.zip"), 2);
}

#[tokio::test]
async fn imported_base_can_be_updated() {
    let h = Harness::new();
    let (train, test) = ab_base();
    h.blob.insert("models/legacy.zip", bundle_zip("legacy", &train, &test));
    let compiled = h.root.path().join("exported.tflite");
    std::fs::write(&compiled, b"compiled legacy model").unwrap();

    let orchestrator = h.orchestrator();
    let record = orchestrator.import_base("legacy", &compiled).await.unwrap();
    assert_eq!(record.base_model, None);
    assert_eq!(record.archive_file, "legacy.zip");
    assert_eq!(record.labels, vec!["none", "A", "B"]);
    assert_eq!(record.primary_url, "mem://models/legacy_cnn.tflite");
    assert_eq!(
        h.blob.object("models/legacy_cnn.tflite").unwrap(),
        b"compiled legacy model"
    );
    assert_eq!(
        record.compiled_digest,
        ContentDigest::from_bytes(b"compiled legacy model")
    );

    let report = published(
        orchestrator
            .run(request("legacy", "C", gesture_rows(20.0, 0, 10)))
            .await
            .unwrap(),
    );
    assert_eq!(report.label_space.labels().to_vec(), vec!["none", "A", "B", "C"]);

    let again = orchestrator.import_base("legacy", &compiled).await.unwrap_err();
    assert!(matches!(again, UpdateError::Registry(_)), "got {again:?}");
}

#[tokio::test]
async fn published_record_names_its_archive() {
    let h = Harness::new();
    let (train, test) = ab_base();
    h.seed_base("base", &train, &test).await;

    let report = published(
        h.orchestrator()
            .run(request("base", "C", gesture_rows(20.0, 0, 10)))
            .await
            .unwrap(),
    );
    h.pool.drain().await;

    let code = &report.version_code;
    let record = h.registry.get(code).await.unwrap().unwrap();
    assert_eq!(record.archive_file, format!("{code}.zip"));
    assert!(h.blob.object(&format!("models/{}", record.archive_file)).is_some());
}

#[tokio::test]
async fn base_with_column_stacked_splits_is_accepted() {
    let h = Harness::new();
    let (train, test) = ab_base();
    h.blob.insert(
        "models/base.zip",
        bundle_zip_from("base", string_matrix_npy(&train), string_matrix_npy(&test)),
    );
    h.register_base("base", vec!["none".to_string(), "A".to_string(), "B".to_string()])
        .await;

    let report = published(
        h.orchestrator()
            .run(request("base", "C", gesture_rows(20.0, 0, 10)))
            .await
            .unwrap(),
    );
    assert_eq!(report.label_space.labels().to_vec(), vec!["none", "A", "B", "C"]);
    assert_eq!(report.train_samples, 24);

    // the new bundle is written in the structured layout
    let merged = handsign_core::dataset::npy::read_split(&report.artifacts.train).unwrap();
    assert_eq!(merged.len(), 24);
}

#[tokio::test]
async fn tiny_batch_is_invalid() {
    let h = Harness::new();
    let (train, test) = ab_base();
    h.seed_base("base", &train, &test).await;
    let err = h
        .orchestrator()
        .run(request("base", "C", gesture_rows(20.0, 0, 1)))
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::InvalidUpdate(_)), "got {err:?}");
}

#[tokio::test]
async fn training_failure_leaves_no_bundle_behind() {
    let h = Harness::new();
    let (train, test) = ab_base();
    h.seed_base("base", &train, &test).await;
    h.engine.fail_with("out of memory");

    let err = h
        .orchestrator()
        .run(request("base", "C", gesture_rows(20.0, 0, 10)))
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::Training(_)), "got {err:?}");
    assert!(h.output_entries().is_empty());
    assert_eq!(h.registry.len(), 1, "only the base is registered");
    assert!(h.blob.uploaded_keys().is_empty());
}

#[tokio::test]
async fn primary_upload_failure_fails_the_run() {
    let h = Harness::new();
    let (train, test) = ab_base();
    h.seed_base("base", &train, &test).await;
    h.blob.fail_uploads_ending_with(".tflite");

    let err = h
        .orchestrator()
        .run(request("base", "C", gesture_rows(20.0, 0, 10)))
        .await
        .unwrap_err();
    assert!(err.is_retryable(), "got {err:?}");
    assert!(h.output_entries().is_empty());
    assert_eq!(h.registry.len(), 1, "only the base is registered");
    assert_eq!(h.pool.pending(), 0);
}

#[tokio::test]
async fn background_upload_failure_does_not_fail_the_run() {
    let h = Harness::new();
    let (train, test) = ab_base();
    h.seed_base("base", &train, &test).await;
    h.blob.fail_uploads_ending_with(".zip");

    let report = published(
        h.orchestrator()
            .run(request("base", "C", gesture_rows(20.0, 0, 10)))
            .await
            .unwrap(),
    );
    h.pool.drain().await;

    let code = &report.version_code;
    assert_eq!(h.blob.uploaded_keys(), vec![format!("models/{code}_cnn.tflite")]);
    assert!(h.registry.get(code).await.unwrap().is_some());
    assert!(report.artifacts.weights.is_file());
}

#[tokio::test]
async fn preview_writes_nothing() {
    let h = Harness::new();
    let (train, test) = ab_base();
    h.seed_base("base", &train, &test).await;

    let preview = h
        .orchestrator()
        .preview("base", &batch("C", gesture_rows(20.0, 0, 10)))
        .await
        .unwrap();
    assert_eq!(preview.label_space.new_labels().to_vec(), vec!["C"]);
    assert_eq!((preview.update_train, preview.update_test), (8, 2));
    assert!(!preview.duplicates.rejected);
    assert!(h.output_entries().is_empty());
    assert_eq!(h.engine.calls(), 0);
}
