//! Patch pipeline lifecycle integration tests.
//!
//! These tests drive complete patch runs against the mock backend:
//! initialize -> version -> manifest -> downloader -> download -> cache -> start

use std::sync::{Arc, Mutex};
use std::time::Duration;

use hotpatch_core::{
    backend::{BackendError, CacheClearMode, InitParameters, PlayMode},
    config::{Config, Platform},
    patch::{run_all, PatchEvent, PatchOperation, PatchStage, PatchStatus},
    testing::{fixtures, BackendOp, MockAssetBackend, MockPolicySource, RecordedCall},
    version::{PolicyError, ServerVersionPolicy, UpdateType},
};

/// Test helper bundling a backend, an operation and its event log.
struct TestHarness {
    backend: MockAssetBackend,
    events: Arc<Mutex<Vec<PatchEvent>>>,
    operation: PatchOperation,
}

impl TestHarness {
    fn new(config: Config) -> Self {
        Self::with_mode(config, PlayMode::Host)
    }

    fn with_mode(config: Config, mode: PlayMode) -> Self {
        let backend = MockAssetBackend::new();
        let mut operation =
            PatchOperation::new("DefaultPackage", mode, config, Arc::new(backend.clone()))
                .expect("Failed to create operation")
                .with_tick_interval(Duration::from_millis(1));

        let (events, recorder) = fixtures::event_recorder();
        operation.subscribe(recorder);

        Self {
            backend,
            events,
            operation,
        }
    }

    fn with_policy(mut self, source: MockPolicySource) -> Self {
        self.operation = self.operation.with_policy_source(Arc::new(source));
        self
    }

    fn events(&self) -> Vec<PatchEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Stages entered, in order.
    fn stage_history(&self) -> Vec<PatchStage> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PatchEvent::StageChanged { current, .. } => Some(current),
                _ => None,
            })
            .collect()
    }

    fn errors(&self) -> Vec<(PatchStage, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PatchEvent::Error { stage, message } => Some((stage, message)),
                _ => None,
            })
            .collect()
    }

    fn completed_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| **e == PatchEvent::Completed)
            .count()
    }

    fn progress_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, PatchEvent::ProgressChanged { .. }))
            .count()
    }
}

fn full_pipeline() -> Vec<PatchStage> {
    vec![
        PatchStage::InitializePackage,
        PatchStage::RequestPackageVersion,
        PatchStage::UpdatePackageManifest,
        PatchStage::CreateDownloader,
        PatchStage::DownloadPackageFiles,
        PatchStage::DownloadPackageOver,
        PatchStage::ClearCacheBundle,
        PatchStage::StartGame,
        PatchStage::Completed,
    ]
}

// =============================================================================
// Successful Runs
// =============================================================================

#[tokio::test]
async fn test_pipeline_with_downloads_visits_every_stage() {
    let mut harness = TestHarness::new(fixtures::test_config());
    harness
        .backend
        .set_pending_files(fixtures::bundle_files(3, 1024))
        .await;

    let report = harness.operation.run().await.unwrap();

    assert!(report.succeeded());
    assert_eq!(report.final_stage, PatchStage::Completed);
    assert_eq!(report.package_version.as_deref(), Some("1.0.1"));
    assert_eq!(harness.operation.status(), PatchStatus::Succeeded);
    assert_eq!(harness.stage_history(), full_pipeline());
    assert_eq!(harness.completed_count(), 1);
    assert!(harness.errors().is_empty());
    assert_eq!(harness.backend.fetched_files().await.len(), 3);

    // The completion event is the last thing emitted.
    assert_eq!(harness.events().last(), Some(&PatchEvent::Completed));
}

#[tokio::test]
async fn test_download_progress_events() {
    let mut harness = TestHarness::new(fixtures::test_config());
    harness
        .backend
        .set_pending_files(fixtures::bundle_files(2, 500))
        .await;

    harness.operation.run().await.unwrap();

    let progress: Vec<_> = harness
        .events()
        .into_iter()
        .filter_map(|e| match e {
            PatchEvent::ProgressChanged {
                stage,
                progress,
                message,
                download,
            } => Some((stage, progress, message, download)),
            _ => None,
        })
        .collect();

    // Discovery event followed by one event per file.
    assert_eq!(progress.len(), 3);

    let (stage, value, message, download) = &progress[0];
    assert_eq!(*stage, PatchStage::CreateDownloader);
    assert_eq!(*value, 0.0);
    assert_eq!(message, "Found 2 files to update");
    let download = download.as_ref().unwrap();
    assert_eq!(download.total_count, 2);
    assert_eq!(download.total_bytes, 1000);
    assert_eq!(download.current_count, 0);

    let (stage, value, message, download) = &progress[2];
    assert_eq!(*stage, PatchStage::DownloadPackageFiles);
    assert_eq!(*value, 1.0);
    assert_eq!(message, "2/2 files");
    assert_eq!(download.as_ref().unwrap().current_bytes, 1000);
}

#[tokio::test]
async fn test_no_pending_files_goes_straight_to_start_game() {
    let mut harness = TestHarness::new(fixtures::test_config());

    let report = harness.operation.run().await.unwrap();

    assert!(report.succeeded());
    assert_eq!(
        harness.stage_history(),
        vec![
            PatchStage::InitializePackage,
            PatchStage::RequestPackageVersion,
            PatchStage::UpdatePackageManifest,
            PatchStage::CreateDownloader,
            PatchStage::StartGame,
            PatchStage::Completed,
        ]
    );
    assert_eq!(harness.progress_count(), 0);

    let calls = harness.backend.calls().await;
    assert!(!calls
        .iter()
        .any(|c| matches!(c, RecordedCall::ClearCache { .. })));
}

#[tokio::test]
async fn test_manual_ticking() {
    let mut harness = TestHarness::new(fixtures::test_config());

    harness.operation.start().unwrap();
    assert_eq!(
        harness.operation.current_stage(),
        PatchStage::InitializePackage
    );

    for _ in 0..1000 {
        if harness.operation.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        harness.operation.update().unwrap();
    }

    assert!(harness.operation.succeeded());
    assert_eq!(harness.operation.current_stage(), PatchStage::Completed);
    assert_eq!(harness.operation.previous_stage(), PatchStage::StartGame);

    // Ticks after completion change nothing.
    let before = harness.events().len();
    harness.operation.update().unwrap();
    assert_eq!(harness.events().len(), before);
}

// =============================================================================
// Backend Parameters
// =============================================================================

#[tokio::test]
async fn test_host_mode_receives_remote_services() {
    let mut harness = TestHarness::new(fixtures::test_config());
    harness.operation = harness.operation.with_platform(Platform::Android);

    harness.operation.run().await.unwrap();

    let calls = harness.backend.calls().await;
    match &calls[0] {
        RecordedCall::Initialize { package, params } => {
            assert_eq!(package, "DefaultPackage");
            match params {
                InitParameters::Host { remote } => {
                    assert_eq!(remote.main_url, "http://127.0.0.1:1/CDN/Android/v1.0");
                    assert_eq!(remote.fallback_url, "http://127.0.0.1:1/CDN/Android/v1.0");
                }
                other => panic!("unexpected parameters: {:?}", other),
            }
        }
        other => panic!("unexpected first call: {:?}", other),
    }
}

#[tokio::test]
async fn test_offline_mode_has_no_remote() {
    let mut harness = TestHarness::with_mode(fixtures::test_config(), PlayMode::Offline);

    harness.operation.run().await.unwrap();

    let calls = harness.backend.calls().await;
    assert!(matches!(
        &calls[0],
        RecordedCall::Initialize {
            params: InitParameters::Offline,
            ..
        }
    ));
}

#[tokio::test]
async fn test_downloader_uses_configured_limits() {
    let mut config = fixtures::test_config();
    config.download.max_concurrent = 5;
    config.download.retry_count = 7;
    let mut harness = TestHarness::new(config);

    harness.operation.run().await.unwrap();

    let calls = harness.backend.calls().await;
    let options = calls
        .iter()
        .find_map(|c| match c {
            RecordedCall::CreateDownloader { options, .. } => Some(*options),
            _ => None,
        })
        .expect("downloader created");
    assert_eq!(options.max_concurrency, 5);
    assert_eq!(options.max_retries, 7);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_download_failure_reports_single_error() {
    let mut harness = TestHarness::new(fixtures::test_config());
    let files = fixtures::bundle_files(1, 1024);
    harness.backend.set_pending_files(files.clone()).await;
    harness.backend.fail_file(&files[0].name, u32::MAX).await;

    let report = harness.operation.run().await.unwrap();

    assert!(!report.succeeded());
    assert_eq!(report.final_stage, PatchStage::Failed);
    assert_eq!(report.stalled_at, Some(PatchStage::DownloadPackageFiles));
    assert_eq!(harness.operation.status(), PatchStatus::Failed);
    assert_eq!(
        harness.operation.current_stage(),
        PatchStage::DownloadPackageFiles
    );

    let errors = harness.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, PatchStage::DownloadPackageFiles);
    assert!(errors[0].1.contains(&files[0].name));
    assert_eq!(harness.completed_count(), 0);
}

#[tokio::test]
async fn test_transient_file_failure_recovers() {
    let mut harness = TestHarness::new(fixtures::test_config());
    let files = fixtures::bundle_files(2, 100);
    harness.backend.set_pending_files(files.clone()).await;
    // retry_count is 1, so one failure is absorbed.
    harness.backend.fail_file(&files[1].name, 1).await;

    let report = harness.operation.run().await.unwrap();

    assert!(report.succeeded());
    assert!(harness.errors().is_empty());
}

#[tokio::test]
async fn test_initialize_failure_stalls_in_stage() {
    let mut harness = TestHarness::new(fixtures::test_config());
    harness
        .backend
        .set_error(
            BackendOp::Initialize,
            BackendError::InitializationFailed("missing build output".to_string()),
        )
        .await;

    let report = harness.operation.run().await.unwrap();

    assert_eq!(report.final_stage, PatchStage::Failed);
    assert_eq!(report.stalled_at, Some(PatchStage::InitializePackage));
    assert_eq!(harness.stage_history(), vec![PatchStage::InitializePackage]);

    let errors = harness.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, PatchStage::InitializePackage);
    assert!(errors[0].1.contains("missing build output"));

    // No further backend calls after the failing stage.
    assert_eq!(harness.backend.calls().await.len(), 1);
}

#[tokio::test]
async fn test_manifest_failure_stalls_in_stage() {
    let mut harness = TestHarness::new(fixtures::test_config());
    harness
        .backend
        .set_error(
            BackendOp::ApplyManifest,
            BackendError::ManifestFailed("hash mismatch".to_string()),
        )
        .await;

    let report = harness.operation.run().await.unwrap();

    assert_eq!(report.stalled_at, Some(PatchStage::UpdatePackageManifest));
    assert_eq!(harness.errors().len(), 1);
    assert_eq!(harness.completed_count(), 0);
}

#[tokio::test]
async fn test_cache_clear_failure_is_non_fatal() {
    let mut harness = TestHarness::new(fixtures::test_config());
    harness
        .backend
        .set_pending_files(fixtures::bundle_files(1, 10))
        .await;
    harness
        .backend
        .set_error(
            BackendOp::ClearCache,
            BackendError::CacheClearFailed("disk busy".to_string()),
        )
        .await;

    let report = harness.operation.run().await.unwrap();

    assert!(report.succeeded());
    assert!(harness.errors().is_empty());
    assert_eq!(harness.stage_history(), full_pipeline());
}

#[tokio::test]
async fn test_cache_clear_uses_configured_mode() {
    let mut config = fixtures::test_config();
    config.cache.clear_mode = CacheClearMode::ClearAllManifestFiles;
    let mut harness = TestHarness::new(config);
    harness
        .backend
        .set_pending_files(fixtures::bundle_files(1, 10))
        .await;

    harness.operation.run().await.unwrap();

    let calls = harness.backend.calls().await;
    assert!(calls.contains(&RecordedCall::ClearCache {
        package: "DefaultPackage".to_string(),
        mode: CacheClearMode::ClearAllManifestFiles,
    }));
}

#[tokio::test]
async fn test_cache_auto_clear_disabled() {
    let mut config = fixtures::test_config();
    config.cache.auto_clear = false;
    let mut harness = TestHarness::new(config);
    harness
        .backend
        .set_pending_files(fixtures::bundle_files(1, 10))
        .await;

    let report = harness.operation.run().await.unwrap();

    assert!(report.succeeded());
    let calls = harness.backend.calls().await;
    assert!(!calls
        .iter()
        .any(|c| matches!(c, RecordedCall::ClearCache { .. })));
}

// =============================================================================
// Version Gating
// =============================================================================

#[tokio::test]
async fn test_policy_timeout_falls_back_to_builtin_rules() {
    let source = MockPolicySource::new();
    source.push_error(PolicyError::Timeout).await;
    source.push_error(PolicyError::Timeout).await;

    let mut harness = TestHarness::new(fixtures::gated_config("v1.0.0")).with_policy(source.clone());
    harness.backend.set_latest_version("v1.0.1").await;

    let report = harness.operation.run().await.unwrap();

    assert!(report.succeeded());
    assert!(harness.errors().is_empty());
    assert!(harness
        .stage_history()
        .contains(&PatchStage::UpdatePackageManifest));
    assert_eq!(source.fetch_count().await, 2);

    let check = report.version_check.expect("version check recorded");
    assert!(check.is_compatible);
    assert_eq!(check.update_type, UpdateType::Optional);
}

#[tokio::test]
async fn test_major_version_update_blocks_pipeline() {
    let mut harness = TestHarness::new(fixtures::gated_config("v1.0.0"))
        .with_policy(MockPolicySource::with_policy(ServerVersionPolicy::default()));
    harness.backend.set_latest_version("v2.0.0").await;

    let report = harness.operation.run().await.unwrap();

    assert_eq!(report.stalled_at, Some(PatchStage::RequestPackageVersion));
    let errors = harness.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, PatchStage::RequestPackageVersion);
    assert!(errors[0].1.starts_with("Version check failed"));

    let calls = harness.backend.calls().await;
    assert!(!calls
        .iter()
        .any(|c| matches!(c, RecordedCall::ApplyManifest { .. })));
}

#[tokio::test]
async fn test_allow_list_rejects_unlisted_client() {
    let policy = ServerVersionPolicy {
        compatible_versions: vec!["v1.2.0".to_string()],
        ..Default::default()
    };
    let mut harness = TestHarness::new(fixtures::gated_config("v1.0.0"))
        .with_policy(MockPolicySource::with_policy(policy));
    harness.backend.set_latest_version("v1.0.1").await;

    let report = harness.operation.run().await.unwrap();

    assert_eq!(report.final_stage, PatchStage::Failed);
    let check = report.version_check.unwrap();
    assert!(!check.is_compatible);
    assert!(check.reason.contains("allow-list"));
}

#[tokio::test]
async fn test_force_update_threshold_carries_policy_message() {
    let policy = ServerVersionPolicy {
        force_update_version: Some("v1.5.0".to_string()),
        update_message: Some("Please install the latest build".to_string()),
        ..Default::default()
    };
    let mut harness = TestHarness::new(fixtures::gated_config("v1.0.0"))
        .with_policy(MockPolicySource::with_policy(policy));
    harness.backend.set_latest_version("v1.0.1").await;

    let report = harness.operation.run().await.unwrap();

    assert_eq!(report.stalled_at, Some(PatchStage::RequestPackageVersion));
    let errors = harness.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].1.contains("Please install the latest build"));
}

#[tokio::test]
async fn test_gating_disabled_ignores_version_distance() {
    let mut harness = TestHarness::new(fixtures::test_config());
    harness.backend.set_latest_version("2024-10-01-1530").await;

    let report = harness.operation.run().await.unwrap();

    assert!(report.succeeded());
    assert!(report.version_check.is_none());
    assert_eq!(report.package_version.as_deref(), Some("2024-10-01-1530"));
}

// =============================================================================
// Cancellation & Observers
// =============================================================================

#[tokio::test]
async fn test_cancellation_fails_run_once() {
    let mut harness = TestHarness::new(fixtures::test_config());
    harness
        .backend
        .set_pending_files(fixtures::bundle_files(4, 10))
        .await;
    harness
        .backend
        .set_fetch_delay(Duration::from_millis(200))
        .await;

    let token = harness.operation.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let report = harness.operation.run().await.unwrap();

    assert_eq!(report.final_stage, PatchStage::Failed);
    assert!(report.error.unwrap().contains("cancelled"));
    assert_eq!(harness.errors().len(), 1);
    assert_eq!(harness.completed_count(), 0);
    assert!(harness.backend.fetched_files().await.len() < 4);
}

#[tokio::test]
async fn test_cancel_before_start() {
    let mut harness = TestHarness::new(fixtures::test_config());
    harness.operation.cancel();

    let report = harness.operation.run().await.unwrap();

    assert_eq!(report.stalled_at, Some(PatchStage::InitializePackage));
    assert!(harness.backend.calls().await.is_empty());
}

#[tokio::test]
async fn test_broadcast_stream_and_unsubscribe() {
    let mut harness = TestHarness::new(fixtures::test_config());
    let mut stream = harness.operation.events();

    let (late_events, recorder) = fixtures::event_recorder();
    let id = harness.operation.subscribe(recorder);
    assert!(harness.operation.unsubscribe(id));

    harness.operation.run().await.unwrap();

    let mut streamed = Vec::new();
    while let Ok(event) = stream.try_recv() {
        streamed.push(event);
    }
    assert_eq!(streamed, harness.events());
    assert!(late_events.lock().unwrap().is_empty());
}

// =============================================================================
// Multiple Packages
// =============================================================================

#[tokio::test]
async fn test_batch_one_package_fails_other_succeeds() {
    let backend = MockAssetBackend::new();
    backend
        .set_package_error(
            "Dlc",
            BackendOp::Initialize,
            BackendError::InitializationFailed("no build for Dlc".to_string()),
        )
        .await;

    let reports = run_all(
        ["Base", "Dlc"],
        PlayMode::Host,
        &fixtures::test_config(),
        Arc::new(backend.clone()),
    )
    .await
    .unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].package, "Base");
    assert!(reports[0].succeeded());
    assert_eq!(reports[0].final_stage, PatchStage::Completed);

    assert_eq!(reports[1].package, "Dlc");
    assert!(!reports[1].succeeded());
    assert_eq!(reports[1].stalled_at, Some(PatchStage::InitializePackage));
    assert!(reports[1]
        .error
        .as_deref()
        .unwrap()
        .contains("no build for Dlc"));

    // The failed package made no calls past initialization.
    let dlc_calls: Vec<_> = backend
        .calls()
        .await
        .into_iter()
        .filter(|call| match call {
            RecordedCall::Initialize { package, .. }
            | RecordedCall::RequestVersion { package }
            | RecordedCall::ApplyManifest { package, .. }
            | RecordedCall::CreateDownloader { package, .. }
            | RecordedCall::ClearCache { package, .. } => package == "Dlc",
        })
        .collect();
    assert_eq!(dlc_calls.len(), 1);
}
