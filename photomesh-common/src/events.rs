//! Pipeline event types and broadcast bus
//!
//! Events are emitted by the reconstruction pipeline as a request moves through
//! its states and are streamed to UI clients over SSE.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Reconstruction request state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    /// Checking upload count and content types
    Validating,
    /// Work directory created, raw images being persisted
    DirectoryAcquired,
    /// Remote background removal in progress
    BackgroundRemoving,
    /// Waiting for or holding the GPU
    Reconstructing,
    /// Building the response payload
    Assembling,
    /// Artifact set produced
    Succeeded,
    /// A stage raised a fatal error
    Failed,
    /// Caller abandoned the request
    Cancelled,
}

impl PipelineState {
    /// Terminal states end the request
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Succeeded | PipelineState::Failed | PipelineState::Cancelled
        )
    }
}

/// Events emitted while processing a reconstruction request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Request accepted by the orchestrator
    RequestStarted {
        request_id: Uuid,
        image_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Request moved between states
    StateChanged {
        request_id: Uuid,
        old_state: PipelineState,
        new_state: PipelineState,
        timestamp: DateTime<Utc>,
    },

    /// Background removal finished for one image
    ImageMasked {
        request_id: Uuid,
        index: usize,
        /// "removed" or "fallback"
        outcome: String,
        timestamp: DateTime<Utc>,
    },

    /// Mesh produced
    RequestSucceeded {
        request_id: Uuid,
        mesh_file: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Request ended without a mesh
    RequestFailed {
        request_id: Uuid,
        kind: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::RequestStarted { .. } => "RequestStarted",
            PipelineEvent::StateChanged { .. } => "StateChanged",
            PipelineEvent::ImageMasked { .. } => "ImageMasked",
            PipelineEvent::RequestSucceeded { .. } => "RequestSucceeded",
            PipelineEvent::RequestFailed { .. } => "RequestFailed",
        }
    }

    /// Request the event belongs to
    pub fn request_id(&self) -> Uuid {
        match self {
            PipelineEvent::RequestStarted { request_id, .. }
            | PipelineEvent::StateChanged { request_id, .. }
            | PipelineEvent::ImageMasked { request_id, .. }
            | PipelineEvent::RequestSucceeded { request_id, .. }
            | PipelineEvent::RequestFailed { request_id, .. } => *request_id,
        }
    }
}

/// Broadcast bus for pipeline events
///
/// Cloning shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
