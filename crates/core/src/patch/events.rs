//! Patch operation events and their delivery.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::backend::DownloadInfo;

use super::stage::PatchStage;

/// Event emitted by a patch operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatchEvent {
    StageChanged {
        previous: PatchStage,
        current: PatchStage,
        message: String,
    },
    ProgressChanged {
        stage: PatchStage,
        /// Fraction done, in `[0, 1]`.
        progress: f32,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        download: Option<DownloadInfo>,
    },
    Error {
        stage: PatchStage,
        message: String,
    },
    Completed,
}

impl PatchEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, PatchEvent::Error { .. })
    }
}

/// Callback invoked synchronously for every event.
pub type EventCallback = Arc<dyn Fn(&PatchEvent) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Fans events out to callbacks and broadcast receivers.
///
/// Callbacks run in registration order before the event is broadcast.
pub struct EventHub {
    listeners: Vec<(SubscriptionId, EventCallback)>,
    next_id: u64,
    tx: broadcast::Sender<PatchEvent>,
}

impl EventHub {
    /// Create a hub whose broadcast channel buffers `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: Vec::new(),
            next_id: 0,
            tx,
        }
    }

    pub fn subscribe(&mut self, callback: EventCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, callback));
        id
    }

    /// Remove a callback. Returns whether it was registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener, _)| *listener != id);
        self.listeners.len() != before
    }

    /// New receiver for events emitted from now on.
    pub fn receiver(&self) -> broadcast::Receiver<PatchEvent> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn emit(&self, event: PatchEvent) {
        for (_, listener) in &self.listeners {
            listener(&event);
        }
        // No receivers is not an error.
        let _ = self.tx.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("listeners", &self.listeners.len())
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}
