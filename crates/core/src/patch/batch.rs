//! Patching several packages side by side.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use crate::backend::{AssetBackend, PlayMode};
use crate::config::Config;

use super::operation::{PatchError, PatchOperation, PatchReport};

/// Run every operation concurrently and wait for all of them.
///
/// Reports come back in the order of `operations`. One package failing does
/// not stop the others.
pub async fn run_operations(
    operations: &mut [PatchOperation],
) -> Result<Vec<PatchReport>, PatchError> {
    let results = join_all(operations.iter_mut().map(|op| op.run())).await;
    let reports = results.into_iter().collect::<Result<Vec<_>, _>>()?;

    let failed = reports.iter().filter(|r| !r.succeeded()).count();
    if failed > 0 {
        warn!(total = reports.len(), failed, "Some packages failed to patch");
    } else {
        info!(total = reports.len(), "All packages patched");
    }
    Ok(reports)
}

/// Patch `packages` with a shared config and backend.
///
/// Every operation is built before any starts, so an invalid config fails
/// the whole batch up front.
pub async fn run_all<I, S>(
    packages: I,
    play_mode: PlayMode,
    config: &Config,
    backend: Arc<dyn AssetBackend>,
) -> Result<Vec<PatchReport>, PatchError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut operations = packages
        .into_iter()
        .map(|package| PatchOperation::new(package, play_mode, config.clone(), backend.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    run_operations(&mut operations).await
}
