//! Typed state shared by the pipeline nodes of one run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::backend::{AssetBackend, DownloadInfo, PackageDownloader, PlayMode};
use crate::config::{Config, Platform};
use crate::metrics;
use crate::version::{PolicySource, VersionCheckResult};

use super::events::{EventHub, PatchEvent};
use super::stage::PatchStage;

/// Lifecycle status of a patch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl PatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PatchStatus::Succeeded | PatchStatus::Failed)
    }
}

/// Run context owned by the pipeline state machine.
pub struct PatchContext {
    pub package: String,
    pub play_mode: PlayMode,
    pub platform: Platform,
    pub config: Arc<Config>,
    pub backend: Arc<dyn AssetBackend>,
    pub policy_source: Option<Arc<dyn PolicySource>>,
    pub cancel: CancellationToken,
    pub events: EventHub,

    pub current_stage: PatchStage,
    pub previous_stage: PatchStage,
    pub status: PatchStatus,
    /// Stage the run stopped in when it failed.
    pub failed_stage: Option<PatchStage>,
    pub failure: Option<String>,

    pub package_version: Option<String>,
    pub version_check: Option<VersionCheckResult>,
    pub downloader: Option<Box<dyn PackageDownloader>>,
    /// Last download snapshot reported.
    pub download: Option<DownloadInfo>,

    /// Whether an error event was already emitted for the current stage.
    error_reported: bool,
}

impl PatchContext {
    pub fn new(
        package: String,
        play_mode: PlayMode,
        config: Arc<Config>,
        backend: Arc<dyn AssetBackend>,
    ) -> Self {
        Self {
            package,
            play_mode,
            platform: Platform::current(),
            config,
            backend,
            policy_source: None,
            cancel: CancellationToken::new(),
            events: EventHub::default(),
            current_stage: PatchStage::None,
            previous_stage: PatchStage::None,
            status: PatchStatus::Pending,
            failed_stage: None,
            failure: None,
            package_version: None,
            version_check: None,
            downloader: None,
            download: None,
            error_reported: false,
        }
    }

    /// Record entry into `stage` and emit a stage change.
    pub fn set_stage(&mut self, stage: PatchStage, message: Option<String>) {
        self.previous_stage = self.current_stage;
        self.current_stage = stage;
        self.error_reported = false;

        metrics::STAGE_TRANSITIONS
            .with_label_values(&[stage.as_str()])
            .inc();

        self.events.emit(PatchEvent::StageChanged {
            previous: self.previous_stage,
            current: stage,
            message: message.unwrap_or_else(|| stage.description().to_string()),
        });
    }

    pub fn send_progress(
        &mut self,
        progress: f32,
        message: impl Into<String>,
        download: Option<DownloadInfo>,
    ) {
        if download.is_some() {
            self.download = download.clone();
        }
        self.events.emit(PatchEvent::ProgressChanged {
            stage: self.current_stage,
            progress: progress.clamp(0.0, 1.0),
            message: message.into(),
            download,
        });
    }

    /// Emit an error event without ending the run.
    pub fn send_error(&mut self, stage: PatchStage, message: impl Into<String>) {
        self.error_reported = true;
        self.events.emit(PatchEvent::Error {
            stage,
            message: message.into(),
        });
    }

    /// Mark the run failed in `stage`. Only the first call has an effect.
    ///
    /// The error event is skipped when the stage already reported one.
    pub fn fail(&mut self, stage: PatchStage, reason: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        let reason = reason.into();

        self.status = PatchStatus::Failed;
        self.failed_stage = Some(stage);
        metrics::STAGE_FAILURES
            .with_label_values(&[stage.as_str()])
            .inc();
        error!(package = %self.package, stage = %stage, "Patch failed: {}", reason);

        if !self.error_reported {
            self.send_error(stage, reason.clone());
        }
        self.failure = Some(reason);
    }

    /// Mark the run succeeded and emit completion. Only the first call has an effect.
    pub fn finish(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = PatchStatus::Succeeded;
        info!(package = %self.package, version = ?self.package_version, "Patch done");

        self.set_stage(PatchStage::Completed, Some("Patch completed".to_string()));
        self.events.emit(PatchEvent::Completed);
    }

    pub fn is_running(&self) -> bool {
        self.status == PatchStatus::Running
    }
}
