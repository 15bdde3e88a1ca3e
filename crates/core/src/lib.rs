pub mod backend;
pub mod config;
pub mod fsm;
pub mod metrics;
pub mod patch;
pub mod testing;
pub mod version;

pub use backend::{
    AssetBackend, BackendError, CacheClearMode, DownloadInfo, DownloadReporter, DownloadSignal,
    DownloaderOptions, FileFetcher, InitParameters, PackageDownloader, PlayMode, RemoteServices,
    TransferFile, TransferQueue,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, Platform,
};
pub use fsm::{Blackboard, FsmError, StateMachine, StateNode, Transition};
pub use patch::{
    run_all, run_operations, PatchError, PatchEvent, PatchOperation, PatchReport, PatchStage,
    PatchStatus, SubscriptionId,
};
pub use version::{
    check_version, fetch_policy_with_retry, get_update_type, HttpPolicySource, PolicyError,
    PolicySource, ServerVersionPolicy, UpdateType, VersionCheckConfig, VersionCheckResult,
    VersionInfo,
};
