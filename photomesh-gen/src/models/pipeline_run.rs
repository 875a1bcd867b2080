//! Reconstruction request state machine
//!
//! VALIDATING → DIRECTORY_ACQUIRED → BACKGROUND_REMOVING → RECONSTRUCTING →
//! ASSEMBLING → SUCCEEDED, with FAILED or CANCELLED reachable from any
//! non-terminal state.

use chrono::{DateTime, Utc};
use photomesh_common::events::PipelineState;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub request_id: Uuid,
    pub old_state: PipelineState,
    pub new_state: PipelineState,
    pub transitioned_at: DateTime<Utc>,
}

/// In-memory progress of one request through the pipeline
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub request_id: Uuid,
    pub state: PipelineState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    start_instant: std::time::Instant,
}

impl PipelineRun {
    pub fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            state: PipelineState::Validating,
            started_at: Utc::now(),
            ended_at: None,
            start_instant: std::time::Instant::now(),
        }
    }

    /// Transition to new state
    pub fn transition_to(&mut self, new_state: PipelineState) -> StateTransition {
        let transition = StateTransition {
            request_id: self.request_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;

        if new_state.is_terminal() {
            self.ended_at = Some(Utc::now());
        }

        transition
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start_instant.elapsed().as_millis() as u64
    }
}
