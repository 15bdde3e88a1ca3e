//! Package patch pipeline.
//!
//! A [`PatchOperation`] runs a fixed graph of stages on the generic state
//! machine:
//!
//! ```text
//! InitializePackage -> RequestPackageVersion -> UpdatePackageManifest
//!   -> CreateDownloader -> DownloadPackageFiles -> DownloadPackageOver
//!   -> ClearCacheBundle -> StartGame
//! ```
//!
//! `CreateDownloader` skips straight to `StartGame` when nothing is pending.
//! A failing stage reports one error and the run stops in that stage.
//! [`run_all`] patches several packages concurrently.

mod batch;
mod context;
mod events;
mod operation;
mod stage;
mod states;

pub use batch::{run_all, run_operations};
pub use context::{PatchContext, PatchStatus};
pub use events::{EventCallback, EventHub, PatchEvent, SubscriptionId};
pub use operation::{PatchError, PatchOperation, PatchReport, DEFAULT_TICK_INTERVAL};
pub use stage::PatchStage;
