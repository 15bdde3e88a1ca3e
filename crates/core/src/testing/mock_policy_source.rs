//! Mock version policy source for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::version::{PolicyError, PolicySource, ServerVersionPolicy};

/// Mock implementation of the PolicySource trait.
///
/// Queued errors are returned first, one per fetch. After that the configured
/// policy is returned, or HTTP 404 when none is set.
#[derive(Debug, Clone, Default)]
pub struct MockPolicySource {
    policy: Arc<RwLock<Option<ServerVersionPolicy>>>,
    errors: Arc<RwLock<VecDeque<PolicyError>>>,
    delay: Arc<RwLock<Option<Duration>>>,
    fetch_count: Arc<RwLock<u32>>,
}

impl MockPolicySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source that always returns `policy`.
    pub fn with_policy(policy: ServerVersionPolicy) -> Self {
        Self {
            policy: Arc::new(RwLock::new(Some(policy))),
            ..Self::default()
        }
    }

    pub async fn set_policy(&self, policy: ServerVersionPolicy) {
        *self.policy.write().await = Some(policy);
    }

    /// Queue an error for the next fetch.
    pub async fn push_error(&self, error: PolicyError) {
        self.errors.write().await.push_back(error);
    }

    /// Make every fetch take `delay`, to exercise timeouts and cancellation.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    pub async fn fetch_count(&self) -> u32 {
        *self.fetch_count.read().await
    }
}

#[async_trait]
impl PolicySource for MockPolicySource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self) -> Result<ServerVersionPolicy, PolicyError> {
        *self.fetch_count.write().await += 1;

        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.errors.write().await.pop_front() {
            return Err(error);
        }

        self.policy
            .read()
            .await
            .clone()
            .ok_or(PolicyError::Status(404))
    }
}
