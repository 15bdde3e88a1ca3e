//! Pipeline nodes.
//!
//! Each node starts its work as a spawned task on enter and polls the task on
//! every tick, so the state machine itself never waits.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{
    AssetBackend, BackendError, DownloadInfo, DownloadReporter, DownloadSignal, InitParameters,
    PackageDownloader,
};
use crate::config::Config;
use crate::fsm::{FsmError, StateMachine, StateNode, Transition};
use crate::version::{check_version, fetch_policy_with_retry, PolicySource, VersionCheckResult};

use super::context::PatchContext;
use super::stage::PatchStage;

const CANCELLED: &str = "Patch operation cancelled";

/// Behaviour of one pipeline stage.
///
/// The blanket [`StateNode`] impl announces the stage on enter and stops
/// ticking the node once the run is terminal or cancelled.
pub trait PatchState: Send {
    const STAGE: PatchStage;

    fn enter(&mut self, ctx: &mut PatchContext) -> Transition<PatchStage>;

    fn update(&mut self, _ctx: &mut PatchContext) -> Transition<PatchStage> {
        Transition::Stay
    }

    fn exit(&mut self, _ctx: &mut PatchContext) {}
}

impl<T: PatchState> StateNode<PatchStage, PatchContext> for T {
    fn key(&self) -> PatchStage {
        T::STAGE
    }

    fn on_enter(&mut self, ctx: &mut PatchContext) -> Transition<PatchStage> {
        ctx.set_stage(T::STAGE, None);
        if ctx.cancel.is_cancelled() {
            ctx.fail(T::STAGE, CANCELLED);
            return Transition::Stay;
        }
        self.enter(ctx)
    }

    fn on_update(&mut self, ctx: &mut PatchContext) -> Transition<PatchStage> {
        if !ctx.is_running() {
            return Transition::Stay;
        }
        if ctx.cancel.is_cancelled() {
            ctx.fail(T::STAGE, CANCELLED);
            return Transition::Stay;
        }
        self.update(ctx)
    }

    fn on_exit(&mut self, ctx: &mut PatchContext) {
        self.exit(ctx);
    }
}

/// Register every pipeline node.
pub(crate) fn register_all(
    machine: &mut StateMachine<PatchStage, PatchContext>,
) -> Result<(), FsmError> {
    machine.register(InitializePackage::default())?;
    machine.register(RequestPackageVersion::default())?;
    machine.register(UpdatePackageManifest::default())?;
    machine.register(CreateDownloader::default())?;
    machine.register(DownloadPackageFiles::default())?;
    machine.register(DownloadPackageOver)?;
    machine.register(ClearCacheBundle::default())?;
    machine.register(StartGame)?;
    Ok(())
}

/// A spawned task polled without blocking. Aborted when dropped.
struct PendingTask<T> {
    handle: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> PendingTask<T> {
    fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            handle: Some(tokio::spawn(future)),
        }
    }

    /// Output of the task once it has finished.
    fn poll(&mut self) -> Option<Result<T, JoinError>> {
        let handle = self.handle.as_mut()?;
        if !handle.is_finished() {
            return None;
        }
        let output = handle.now_or_never()?;
        self.handle = None;
        Some(output)
    }
}

impl<T> Default for PendingTask<T> {
    fn default() -> Self {
        Self { handle: None }
    }
}

impl<T> Drop for PendingTask<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Fail the run for a task that panicked or was aborted.
fn fail_join(ctx: &mut PatchContext, stage: PatchStage, e: JoinError) -> Transition<PatchStage> {
    ctx.fail(stage, format!("Stage task failed: {}", e));
    Transition::Stay
}

fn fail_backend(
    ctx: &mut PatchContext,
    stage: PatchStage,
    e: BackendError,
) -> Transition<PatchStage> {
    match e {
        BackendError::Cancelled => ctx.fail(stage, CANCELLED),
        e => ctx.fail(stage, e.to_string()),
    }
    Transition::Stay
}

// =============================================================================
// InitializePackage
// =============================================================================

#[derive(Default)]
pub(crate) struct InitializePackage {
    task: Option<PendingTask<Result<(), BackendError>>>,
}

impl PatchState for InitializePackage {
    const STAGE: PatchStage = PatchStage::InitializePackage;

    fn exit(&mut self, _ctx: &mut PatchContext) {
        self.task = None;
    }

    fn enter(&mut self, ctx: &mut PatchContext) -> Transition<PatchStage> {
        let params = InitParameters::for_mode(
            ctx.play_mode,
            ctx.config.server.remote_services(ctx.platform),
        );
        info!(
            package = %ctx.package,
            mode = %ctx.play_mode,
            remote = ?params.remote().map(|r| &r.main_url),
            "Initializing package"
        );

        let backend = ctx.backend.clone();
        let package = ctx.package.clone();
        self.task = Some(PendingTask::spawn(async move {
            backend.initialize_package(&package, params).await
        }));
        Transition::Stay
    }

    fn update(&mut self, ctx: &mut PatchContext) -> Transition<PatchStage> {
        let Some(result) = self.task.as_mut().and_then(PendingTask::poll) else {
            return Transition::Stay;
        };
        self.task = None;

        match result {
            Ok(Ok(())) => Transition::ChangeTo(PatchStage::RequestPackageVersion),
            Ok(Err(e)) => fail_backend(ctx, Self::STAGE, e),
            Err(e) => fail_join(ctx, Self::STAGE, e),
        }
    }
}

// =============================================================================
// RequestPackageVersion
// =============================================================================

struct ResolvedVersion {
    version: String,
    check: Option<VersionCheckResult>,
}

/// Look up the latest version and, when gating is enabled, decide whether
/// the installed application may move to it.
async fn resolve_version(
    backend: Arc<dyn AssetBackend>,
    package: String,
    config: Arc<Config>,
    policy_source: Option<Arc<dyn PolicySource>>,
    cancel: CancellationToken,
) -> Result<ResolvedVersion, BackendError> {
    let version = backend.request_latest_version(&package).await?;
    info!(package = %package, version = %version, "Resolved package version");

    if !config.version.enabled {
        return Ok(ResolvedVersion {
            version,
            check: None,
        });
    }

    let policy = match policy_source.as_deref() {
        Some(source) if config.version.fetch_policy => {
            fetch_policy_with_retry(source, &config.version.retry, &cancel).await
        }
        _ => None,
    };
    let check = check_version(&config.server.app_version, &version, policy.as_ref());
    debug!(
        local = %config.server.app_version,
        server = %version,
        compatible = check.is_compatible,
        update_type = check.update_type.as_str(),
        "Version check: {}",
        check.reason
    );

    Ok(ResolvedVersion {
        version,
        check: Some(check),
    })
}

#[derive(Default)]
pub(crate) struct RequestPackageVersion {
    task: Option<PendingTask<Result<ResolvedVersion, BackendError>>>,
}

impl PatchState for RequestPackageVersion {
    const STAGE: PatchStage = PatchStage::RequestPackageVersion;

    fn exit(&mut self, _ctx: &mut PatchContext) {
        self.task = None;
    }

    fn enter(&mut self, ctx: &mut PatchContext) -> Transition<PatchStage> {
        let backend = ctx.backend.clone();
        let package = ctx.package.clone();
        let config = ctx.config.clone();
        let policy_source = ctx.policy_source.clone();
        let cancel = ctx.cancel.clone();

        self.task = Some(PendingTask::spawn(async move {
            resolve_version(backend, package, config, policy_source, cancel).await
        }));
        Transition::Stay
    }

    fn update(&mut self, ctx: &mut PatchContext) -> Transition<PatchStage> {
        let Some(result) = self.task.as_mut().and_then(PendingTask::poll) else {
            return Transition::Stay;
        };
        self.task = None;

        let resolved = match result {
            Ok(Ok(resolved)) => resolved,
            Ok(Err(e)) => return fail_backend(ctx, Self::STAGE, e),
            Err(e) => return fail_join(ctx, Self::STAGE, e),
        };

        ctx.package_version = Some(resolved.version);
        if let Some(check) = resolved.check {
            let blocked = !check.allows_patching();
            let reason = match &check.message {
                Some(message) => format!("{} ({})", check.reason, message),
                None => check.reason.clone(),
            };
            ctx.version_check = Some(check);

            if blocked {
                ctx.fail(Self::STAGE, format!("Version check failed: {}", reason));
                return Transition::Stay;
            }
        }

        Transition::ChangeTo(PatchStage::UpdatePackageManifest)
    }
}

// =============================================================================
// UpdatePackageManifest
// =============================================================================

#[derive(Default)]
pub(crate) struct UpdatePackageManifest {
    task: Option<PendingTask<Result<(), BackendError>>>,
}

impl PatchState for UpdatePackageManifest {
    const STAGE: PatchStage = PatchStage::UpdatePackageManifest;

    fn exit(&mut self, _ctx: &mut PatchContext) {
        self.task = None;
    }

    fn enter(&mut self, ctx: &mut PatchContext) -> Transition<PatchStage> {
        let Some(version) = ctx.package_version.clone() else {
            ctx.fail(Self::STAGE, "No package version resolved");
            return Transition::Stay;
        };

        let backend = ctx.backend.clone();
        let package = ctx.package.clone();
        self.task = Some(PendingTask::spawn(async move {
            backend.apply_manifest(&package, &version).await
        }));
        Transition::Stay
    }

    fn update(&mut self, ctx: &mut PatchContext) -> Transition<PatchStage> {
        let Some(result) = self.task.as_mut().and_then(PendingTask::poll) else {
            return Transition::Stay;
        };
        self.task = None;

        match result {
            Ok(Ok(())) => Transition::ChangeTo(PatchStage::CreateDownloader),
            Ok(Err(e)) => fail_backend(ctx, Self::STAGE, e),
            Err(e) => fail_join(ctx, Self::STAGE, e),
        }
    }
}

// =============================================================================
// CreateDownloader
// =============================================================================

#[derive(Default)]
pub(crate) struct CreateDownloader {
    task: Option<PendingTask<Box<dyn PackageDownloader>>>,
}

impl PatchState for CreateDownloader {
    const STAGE: PatchStage = PatchStage::CreateDownloader;

    fn exit(&mut self, _ctx: &mut PatchContext) {
        self.task = None;
    }

    fn enter(&mut self, ctx: &mut PatchContext) -> Transition<PatchStage> {
        let backend = ctx.backend.clone();
        let package = ctx.package.clone();
        let options = ctx.config.download.downloader_options();
        self.task = Some(PendingTask::spawn(async move {
            backend.create_downloader(&package, options).await
        }));
        Transition::Stay
    }

    fn update(&mut self, ctx: &mut PatchContext) -> Transition<PatchStage> {
        let Some(result) = self.task.as_mut().and_then(PendingTask::poll) else {
            return Transition::Stay;
        };
        self.task = None;

        let downloader = match result {
            Ok(downloader) => downloader,
            Err(e) => return fail_join(ctx, Self::STAGE, e),
        };

        let count = downloader.pending_count();
        if count == 0 {
            info!(package = %ctx.package, "No files to download");
            return Transition::ChangeTo(PatchStage::StartGame);
        }

        let bytes = downloader.pending_bytes();
        info!(package = %ctx.package, files = count, bytes, "Found files to download");
        ctx.send_progress(
            0.0,
            format!("Found {} files to update", count),
            Some(DownloadInfo::totals(count, bytes)),
        );
        ctx.downloader = Some(downloader);
        Transition::ChangeTo(PatchStage::DownloadPackageFiles)
    }
}

// =============================================================================
// DownloadPackageFiles
// =============================================================================

#[derive(Default)]
pub(crate) struct DownloadPackageFiles {
    task: Option<PendingTask<Result<(), BackendError>>>,
    signals: Option<mpsc::UnboundedReceiver<DownloadSignal>>,
}

impl DownloadPackageFiles {
    fn forward_signals(&mut self, ctx: &mut PatchContext) {
        let Some(signals) = self.signals.as_mut() else {
            return;
        };
        while let Ok(signal) = signals.try_recv() {
            match signal {
                DownloadSignal::Progress(info) => {
                    let message = format!("{}/{} files", info.current_count, info.total_count);
                    ctx.send_progress(info.progress(), message, Some(info));
                }
                DownloadSignal::FileError { file_name, message } => {
                    warn!(file = %file_name, "File download failed: {}", message);
                    ctx.send_error(
                        Self::STAGE,
                        format!("Failed to download {}: {}", file_name, message),
                    );
                }
            }
        }
    }
}

impl PatchState for DownloadPackageFiles {
    const STAGE: PatchStage = PatchStage::DownloadPackageFiles;

    fn exit(&mut self, _ctx: &mut PatchContext) {
        self.task = None;
        self.signals = None;
    }

    fn enter(&mut self, ctx: &mut PatchContext) -> Transition<PatchStage> {
        let Some(mut downloader) = ctx.downloader.take() else {
            ctx.fail(Self::STAGE, "No downloader created");
            return Transition::Stay;
        };

        let (reporter, signals) = DownloadReporter::channel();
        let cancel = ctx.cancel.clone();
        self.signals = Some(signals);
        self.task = Some(PendingTask::spawn(async move {
            downloader.begin(reporter, cancel).await
        }));
        Transition::Stay
    }

    fn update(&mut self, ctx: &mut PatchContext) -> Transition<PatchStage> {
        // Poll before draining so signals sent just before completion are seen.
        let result = self.task.as_mut().and_then(PendingTask::poll);
        self.forward_signals(ctx);

        let Some(result) = result else {
            return Transition::Stay;
        };
        self.task = None;
        self.signals = None;

        match result {
            Ok(Ok(())) => Transition::ChangeTo(PatchStage::DownloadPackageOver),
            Ok(Err(BackendError::Cancelled)) => {
                ctx.fail(Self::STAGE, CANCELLED);
                Transition::Stay
            }
            Ok(Err(e)) => {
                ctx.fail(Self::STAGE, format!("Download failed: {}", e));
                Transition::Stay
            }
            Err(e) => fail_join(ctx, Self::STAGE, e),
        }
    }
}

// =============================================================================
// DownloadPackageOver
// =============================================================================

pub(crate) struct DownloadPackageOver;

impl PatchState for DownloadPackageOver {
    const STAGE: PatchStage = PatchStage::DownloadPackageOver;

    fn enter(&mut self, _ctx: &mut PatchContext) -> Transition<PatchStage> {
        Transition::ChangeTo(PatchStage::ClearCacheBundle)
    }
}

// =============================================================================
// ClearCacheBundle
// =============================================================================

#[derive(Default)]
pub(crate) struct ClearCacheBundle {
    task: Option<PendingTask<Result<(), BackendError>>>,
}

impl PatchState for ClearCacheBundle {
    const STAGE: PatchStage = PatchStage::ClearCacheBundle;

    fn exit(&mut self, _ctx: &mut PatchContext) {
        self.task = None;
    }

    fn enter(&mut self, ctx: &mut PatchContext) -> Transition<PatchStage> {
        if !ctx.config.cache.auto_clear {
            debug!(package = %ctx.package, "Cache auto-clear disabled");
            return Transition::ChangeTo(PatchStage::StartGame);
        }

        let backend = ctx.backend.clone();
        let package = ctx.package.clone();
        let mode = ctx.config.cache.clear_mode;
        self.task = Some(PendingTask::spawn(async move {
            backend.clear_cache(&package, mode).await
        }));
        Transition::Stay
    }

    fn update(&mut self, ctx: &mut PatchContext) -> Transition<PatchStage> {
        let Some(result) = self.task.as_mut().and_then(PendingTask::poll) else {
            return Transition::Stay;
        };
        self.task = None;

        match result {
            Ok(Ok(())) => {
                info!(
                    package = %ctx.package,
                    mode = ctx.config.cache.clear_mode.as_str(),
                    "Cache cleared"
                );
            }
            Ok(Err(e)) => warn!(package = %ctx.package, "Cache clear failed: {}", e),
            Err(e) => warn!(package = %ctx.package, "Cache clear task failed: {}", e),
        }
        Transition::ChangeTo(PatchStage::StartGame)
    }
}

// =============================================================================
// StartGame
// =============================================================================

pub(crate) struct StartGame;

impl PatchState for StartGame {
    const STAGE: PatchStage = PatchStage::StartGame;

    fn enter(&mut self, ctx: &mut PatchContext) -> Transition<PatchStage> {
        ctx.finish();
        Transition::Stay
    }
}
