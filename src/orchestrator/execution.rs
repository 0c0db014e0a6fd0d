//! Execution state: the per-session record of an autonomous run.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::sandbox::SnapshotRecord;
use crate::session::{Event, EventBus, EventType};

/// States of the execution state machine.
///
/// Terminal states are `Success`, `Failed`, and `Timeout`; every
/// transition emits a `state_change` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionState {
    Idle,
    Planning,
    Building,
    Testing,
    Fixing,
    Success,
    Failed,
    Timeout,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Planning => "PLANNING",
            Self::Building => "BUILDING",
            Self::Testing => "TESTING",
            Self::Fixing => "FIXING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Timeout)
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal state of a single build-test attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationState {
    Pending,
    Success,
    Error,
}

/// One Build -> Test attempt within an execution. Append-only.
#[derive(Debug, Clone)]
pub struct Iteration {
    /// 1-based ordinal.
    pub number: u32,
    pub started_at: DateTime<Utc>,
    pub state: IterationState,
    /// Raw builder output for this attempt.
    pub builder_output: Option<String>,
    /// Errors reported by the test phase.
    pub errors: Vec<String>,
    pub snapshot: Option<SnapshotRecord>,
}

impl Iteration {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            started_at: Utc::now(),
            state: IterationState::Pending,
            builder_output: None,
            errors: Vec::new(),
            snapshot: None,
        }
    }
}

/// The full state of one autonomous run. Owned exclusively by its
/// orchestrator task; readers get cloned projections.
pub struct Execution {
    /// Internal id, distinct from the client-supplied session id.
    pub id: Uuid,
    pub session_id: String,
    pub prompt: String,
    pub state: ExecutionState,
    pub started: Instant,
    pub started_at: DateTime<Utc>,
    pub iterations: Vec<Iteration>,
    pub plan: Option<String>,
    pub code: Option<String>,
    pub errors: Vec<String>,
    pub snapshots: Vec<SnapshotRecord>,
    pub container_name: Option<String>,
    pub events: Arc<EventBus>,
}

impl Execution {
    pub fn new(session_id: &str, prompt: &str, events: Arc<EventBus>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            prompt: prompt.to_string(),
            state: ExecutionState::Idle,
            started: Instant::now(),
            started_at: Utc::now(),
            iterations: Vec::new(),
            plan: None,
            code: None,
            errors: Vec::new(),
            snapshots: Vec::new(),
            container_name: None,
            events,
        }
    }

    /// Transition the state machine, emitting a `state_change` event.
    pub fn set_state(&mut self, next: ExecutionState) {
        if self.state == next {
            return;
        }
        let previous = self.state;
        self.state = next;
        self.events.emit(
            EventType::StateChange,
            serde_json::json!({ "from": previous, "to": next }),
        );
        tracing::debug!(
            session_id = %self.session_id,
            from = previous.as_str(),
            to = next.as_str(),
            "execution state change"
        );
    }

    /// 1-based index of the current iteration (0 before the first build).
    pub fn current_iteration(&self) -> u32 {
        self.iterations.len() as u32
    }

    pub fn status(&self) -> ExecutionStatus {
        ExecutionStatus {
            execution_id: self.id,
            session_id: self.session_id.clone(),
            state: self.state,
            current_iteration: self.current_iteration(),
            error_count: self.errors.len(),
            snapshot_count: self.snapshots.len(),
            event_count: self.events.len(),
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }

    pub fn details(&self) -> ExecutionDetails {
        ExecutionDetails {
            status: self.status(),
            prompt: self.prompt.clone(),
            plan: self.plan.clone(),
            code: self.code.clone(),
            errors: self.errors.clone(),
            iterations: self
                .iterations
                .iter()
                .map(|it| IterationSummary {
                    number: it.number,
                    started_at: it.started_at,
                    state: it.state,
                    error_count: it.errors.len(),
                    has_snapshot: it.snapshot.is_some(),
                })
                .collect(),
            snapshots: self.snapshots.clone(),
            events: self.events.log(),
        }
    }
}

/// Small read-only projection of an execution.
#[derive(Debug, Clone)]
pub struct ExecutionStatus {
    pub execution_id: Uuid,
    pub session_id: String,
    pub state: ExecutionState,
    pub current_iteration: u32,
    pub error_count: usize,
    pub snapshot_count: usize,
    pub event_count: usize,
    pub duration_ms: u64,
}

/// Per-iteration summary inside [`ExecutionDetails`].
#[derive(Debug, Clone)]
pub struct IterationSummary {
    pub number: u32,
    pub started_at: DateTime<Utc>,
    pub state: IterationState,
    pub error_count: usize,
    pub has_snapshot: bool,
}

/// Full read-only projection of an execution.
#[derive(Debug, Clone)]
pub struct ExecutionDetails {
    pub status: ExecutionStatus,
    pub prompt: String,
    pub plan: Option<String>,
    pub code: Option<String>,
    pub errors: Vec<String>,
    pub iterations: Vec<IterationSummary>,
    pub snapshots: Vec<SnapshotRecord>,
    pub events: Vec<Event>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_changes_emit_events() {
        let bus = Arc::new(EventBus::new(None));
        let mut execution = Execution::new("s1", "build", Arc::clone(&bus));

        execution.set_state(ExecutionState::Planning);
        execution.set_state(ExecutionState::Planning); // no-op
        execution.set_state(ExecutionState::Building);

        let log = bus.log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].event_type, EventType::StateChange);
        assert_eq!(log[0].data["to"], "PLANNING");
        assert_eq!(log[1].data["from"], "PLANNING");
        assert_eq!(log[1].data["to"], "BUILDING");
    }

    #[test]
    fn terminal_states() {
        assert!(ExecutionState::Success.is_terminal());
        assert!(ExecutionState::Failed.is_terminal());
        assert!(ExecutionState::Timeout.is_terminal());
        assert!(!ExecutionState::Building.is_terminal());
        assert!(!ExecutionState::Idle.is_terminal());
    }

    #[test]
    fn status_counts_track_fields() {
        let bus = Arc::new(EventBus::new(None));
        let mut execution = Execution::new("s1", "build", bus);
        execution.iterations.push(Iteration::new(1));
        execution.errors.push("boom".to_string());

        let status = execution.status();
        assert_eq!(status.current_iteration, 1);
        assert_eq!(status.error_count, 1);
        assert_eq!(status.snapshot_count, 0);
    }
}
