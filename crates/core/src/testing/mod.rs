//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the external collaborators
//! of the patch pipeline, allowing full pipeline runs without real servers
//! or storage.
//!
//! # Example
//!
//! ```rust,ignore
//! use hotpatch_core::testing::{fixtures, MockAssetBackend, MockPolicySource};
//!
//! let backend = MockAssetBackend::new();
//! backend.set_pending_files(fixtures::bundle_files(3, 1024)).await;
//!
//! let policy = MockPolicySource::with_policy(fixtures::policy_with_minimum("v1.0.0"));
//! ```

mod mock_backend;
mod mock_policy_source;

pub use mock_backend::{BackendOp, MockAssetBackend, MockDownloader, RecordedCall, RecordedFetch};
pub use mock_policy_source::MockPolicySource;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::sync::{Arc, Mutex};

    use crate::backend::TransferFile;
    use crate::config::Config;
    use crate::patch::PatchEvent;
    use crate::version::ServerVersionPolicy;

    /// `count` bundle files of `size` bytes each.
    pub fn bundle_files(count: usize, size: u64) -> Vec<TransferFile> {
        (0..count)
            .map(|i| TransferFile::new(format!("assets_{:03}.bundle", i), size))
            .collect()
    }

    /// Default config with fast, small download settings.
    pub fn test_config() -> Config {
        let mut config = Config::default();
        config.server.main_url = "http://127.0.0.1:1".to_string();
        config.server.fallback_url = "http://127.0.0.1:1".to_string();
        config.download.max_concurrent = 2;
        config.download.retry_count = 1;
        config.version.retry.initial_delay_ms = 1;
        config
    }

    /// Test config with version gating enabled for `app_version`.
    pub fn gated_config(app_version: &str) -> Config {
        let mut config = test_config();
        config.server.app_version = app_version.to_string();
        config.version.enabled = true;
        config
    }

    /// Policy that only sets a minimum supported version.
    pub fn policy_with_minimum(min: &str) -> ServerVersionPolicy {
        ServerVersionPolicy {
            min_supported_version: Some(min.to_string()),
            ..Default::default()
        }
    }

    /// Shared event log and a callback that appends to it.
    pub fn event_recorder() -> (
        Arc<Mutex<Vec<PatchEvent>>>,
        impl Fn(&PatchEvent) + Send + Sync + 'static,
    ) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback = move |event: &PatchEvent| {
            if let Ok(mut events) = sink.lock() {
                events.push(event.clone());
            }
        };
        (events, callback)
    }
}
