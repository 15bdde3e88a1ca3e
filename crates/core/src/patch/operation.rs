//! The externally observable patch operation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::backend::{AssetBackend, PlayMode};
use crate::config::{validate_config, Config, ConfigError, Platform};
use crate::fsm::{FsmError, StateMachine};
use crate::metrics;
use crate::version::{HttpPolicySource, PolicyError, PolicySource, VersionCheckResult};

use super::context::{PatchContext, PatchStatus};
use super::events::{PatchEvent, SubscriptionId};
use super::stage::PatchStage;
use super::states;

/// Default interval between ticks in [`PatchOperation::run`].
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Errors that prevent a patch operation from running.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("State machine error: {0}")]
    Fsm(#[from] FsmError),

    #[error("Policy source error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Patch operation already started")]
    AlreadyStarted,
}

/// Outcome of a finished patch run.
#[derive(Debug, Clone, Serialize)]
pub struct PatchReport {
    pub id: Uuid,
    pub package: String,
    pub play_mode: PlayMode,
    /// `Completed` or `Failed`.
    pub final_stage: PatchStage,
    /// Stage the run stopped in, for failed runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stalled_at: Option<PatchStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_check: Option<VersionCheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PatchReport {
    pub fn succeeded(&self) -> bool {
        self.final_stage == PatchStage::Completed
    }
}

/// Drives the patch pipeline for one package.
///
/// Call [`start`](Self::start) then [`update`](Self::update) once per tick,
/// or let [`run`](Self::run) tick until the run is terminal. Both must be
/// called from within a Tokio runtime since stages spawn their work.
pub struct PatchOperation {
    id: Uuid,
    machine: StateMachine<PatchStage, PatchContext>,
    tick_interval: Duration,
    started_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    finished_at: Option<DateTime<Utc>>,
}

impl PatchOperation {
    /// Build an operation. Fails on invalid configuration before any network
    /// activity.
    pub fn new(
        package: impl Into<String>,
        play_mode: PlayMode,
        config: Config,
        backend: Arc<dyn AssetBackend>,
    ) -> Result<Self, PatchError> {
        validate_config(&config)?;

        let package = package.into();
        let context = PatchContext::new(package, play_mode, Arc::new(config), backend);

        let mut machine = StateMachine::new(context);
        states::register_all(&mut machine)?;

        Ok(Self {
            id: Uuid::new_v4(),
            machine,
            tick_interval: DEFAULT_TICK_INTERVAL,
            started_at: None,
            started: None,
            finished_at: None,
        })
    }

    /// Replace the version policy source.
    pub fn with_policy_source(mut self, source: Arc<dyn PolicySource>) -> Self {
        self.machine.context_mut().policy_source = Some(source);
        self
    }

    /// Override the platform used for CDN paths.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.machine.context_mut().platform = platform;
        self
    }

    /// Set the interval between ticks in [`run`](Self::run).
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn package(&self) -> &str {
        &self.ctx().package
    }

    pub fn play_mode(&self) -> PlayMode {
        self.ctx().play_mode
    }

    /// Enter `InitializePackage`.
    pub fn start(&mut self) -> Result<(), PatchError> {
        if self.ctx().status != PatchStatus::Pending {
            return Err(PatchError::AlreadyStarted);
        }

        self.ensure_policy_source()?;
        self.started_at = Some(Utc::now());
        self.started = Some(Instant::now());
        info!(
            id = %self.id,
            package = %self.ctx().package,
            mode = %self.ctx().play_mode,
            "Starting patch operation"
        );

        self.machine.context_mut().status = PatchStatus::Running;
        self.machine.run(PatchStage::InitializePackage)?;
        self.record_if_terminal();
        Ok(())
    }

    /// Point gating at `{server}/{cdn}/version/policy.json` unless a source was supplied.
    fn ensure_policy_source(&mut self) -> Result<(), PatchError> {
        let ctx = self.machine.context_mut();
        let version = &ctx.config.version;
        if ctx.policy_source.is_some() || !version.enabled || !version.fetch_policy {
            return Ok(());
        }

        let source = HttpPolicySource::new(
            ctx.config.server.full_server_url(false, ctx.platform),
            version.policy_timeout(),
            version.policy_cache_ttl(),
        )?;
        ctx.policy_source = Some(Arc::new(source));
        Ok(())
    }

    /// Advance the pipeline by one tick. No-op unless running.
    pub fn update(&mut self) -> Result<(), PatchError> {
        if !self.ctx().is_running() {
            return Ok(());
        }
        self.machine.update()?;
        self.record_if_terminal();
        Ok(())
    }

    /// Start if needed, then tick until the run is terminal.
    pub async fn run(&mut self) -> Result<PatchReport, PatchError> {
        if self.ctx().status == PatchStatus::Pending {
            self.start()?;
        }

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.is_terminal() {
            ticker.tick().await;
            self.update()?;
        }

        Ok(self.report())
    }

    /// Request cancellation. The run fails at the next tick.
    pub fn cancel(&self) {
        self.ctx().cancel.cancel();
    }

    /// Token that cancels this operation, usable from other tasks.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.ctx().cancel.clone()
    }

    /// Register a callback for every event. Callbacks run synchronously in
    /// registration order.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: Fn(&PatchEvent) + Send + Sync + 'static,
    {
        self.machine
            .context_mut()
            .events
            .subscribe(Arc::new(callback))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.machine.context_mut().events.unsubscribe(id)
    }

    /// Stream of events emitted from now on.
    pub fn events(&self) -> broadcast::Receiver<PatchEvent> {
        self.ctx().events.receiver()
    }

    pub fn current_stage(&self) -> PatchStage {
        self.ctx().current_stage
    }

    pub fn previous_stage(&self) -> PatchStage {
        self.ctx().previous_stage
    }

    pub fn status(&self) -> PatchStatus {
        self.ctx().status
    }

    pub fn is_terminal(&self) -> bool {
        self.ctx().status.is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        self.ctx().status == PatchStatus::Succeeded
    }

    pub fn package_version(&self) -> Option<&str> {
        self.ctx().package_version.as_deref()
    }

    pub fn version_check(&self) -> Option<&VersionCheckResult> {
        self.ctx().version_check.as_ref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.ctx().failure.as_deref()
    }

    /// Summary of the run so far.
    pub fn report(&self) -> PatchReport {
        let ctx = self.ctx();
        let now = Utc::now();
        let final_stage = match ctx.status {
            PatchStatus::Succeeded => PatchStage::Completed,
            PatchStatus::Failed => PatchStage::Failed,
            _ => ctx.current_stage,
        };

        PatchReport {
            id: self.id,
            package: ctx.package.clone(),
            play_mode: ctx.play_mode,
            final_stage,
            stalled_at: ctx.failed_stage,
            package_version: ctx.package_version.clone(),
            version_check: ctx.version_check.clone(),
            error: ctx.failure.clone(),
            started_at: self.started_at.unwrap_or(now),
            finished_at: self.finished_at.unwrap_or(now),
        }
    }

    fn ctx(&self) -> &PatchContext {
        self.machine.context()
    }

    fn record_if_terminal(&mut self) {
        if self.finished_at.is_some() || !self.is_terminal() {
            return;
        }
        self.finished_at = Some(Utc::now());
        // Exiting the stalled or final node drops its in-flight task.
        self.machine.halt();

        let ctx = self.ctx();
        let result = match ctx.status {
            PatchStatus::Succeeded => "succeeded",
            _ if ctx.cancel.is_cancelled() => "cancelled",
            _ => "failed",
        };
        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();

        metrics::PATCH_RUNS.with_label_values(&[result]).inc();
        metrics::PATCH_RUN_DURATION
            .with_label_values(&[result])
            .observe(elapsed.as_secs_f64());

        info!(
            id = %self.id,
            package = %ctx.package,
            result,
            elapsed_ms = elapsed.as_millis() as u64,
            "Patch operation finished"
        );
    }
}

impl std::fmt::Debug for PatchOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ctx = self.ctx();
        f.debug_struct("PatchOperation")
            .field("id", &self.id)
            .field("package", &ctx.package)
            .field("play_mode", &ctx.play_mode)
            .field("stage", &ctx.current_stage)
            .field("status", &ctx.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::testing::{BackendOp, MockAssetBackend};

    fn operation(config: Config) -> Result<PatchOperation, PatchError> {
        PatchOperation::new(
            "DefaultPackage",
            PlayMode::Host,
            config,
            Arc::new(MockAssetBackend::new()),
        )
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = Config {
            server: ServerConfig {
                main_url: String::new(),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = operation(config).unwrap_err();
        assert!(matches!(err, PatchError::Config(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_new_operation_is_pending() {
        let op = operation(Config::default()).unwrap();
        assert_eq!(op.status(), PatchStatus::Pending);
        assert_eq!(op.current_stage(), PatchStage::None);
        assert!(!op.is_terminal());
        assert!(!op.succeeded());
        assert_eq!(op.package(), "DefaultPackage");
    }

    #[test]
    fn test_update_before_start_is_noop() {
        let mut op = operation(Config::default()).unwrap();
        op.update().unwrap();
        assert_eq!(op.current_stage(), PatchStage::None);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut op = operation(Config::default()).unwrap();
        op.start().unwrap();
        assert_eq!(op.current_stage(), PatchStage::InitializePackage);
        assert!(matches!(op.start(), Err(PatchError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_gating_builds_http_policy_source() {
        let mut config = Config::default();
        config.version.enabled = true;
        let mut op = operation(config).unwrap();
        assert!(op.ctx().policy_source.is_none());
        op.start().unwrap();
        assert!(op.ctx().policy_source.is_some());

        let mut op = operation(Config::default()).unwrap();
        op.start().unwrap();
        assert!(op.ctx().policy_source.is_none());
    }

    #[tokio::test]
    async fn test_run_reports_success() {
        let mut op = operation(Config::default())
            .unwrap()
            .with_tick_interval(Duration::from_millis(1));
        let report = op.run().await.unwrap();

        assert!(report.succeeded());
        assert_eq!(report.final_stage, PatchStage::Completed);
        assert!(report.stalled_at.is_none());
        assert!(report.finished_at >= report.started_at);
        assert_eq!(report.id, op.id());
        assert!(!op.machine.is_running());
    }

    #[tokio::test]
    async fn test_cancel_during_slow_stage_halts_machine() {
        let backend = MockAssetBackend::new();
        backend
            .set_delay(BackendOp::Initialize, Duration::from_secs(60))
            .await;
        let mut op = PatchOperation::new(
            "DefaultPackage",
            PlayMode::Host,
            Config::default(),
            Arc::new(backend),
        )
        .unwrap()
        .with_tick_interval(Duration::from_millis(1));

        let token = op.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let report = tokio::time::timeout(Duration::from_secs(5), op.run())
            .await
            .expect("run did not stop")
            .unwrap();

        assert_eq!(report.stalled_at, Some(PatchStage::InitializePackage));
        assert!(!op.machine.is_running());
        assert!(op.machine.has_started());
    }
}
