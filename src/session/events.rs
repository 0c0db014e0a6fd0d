//! Per-execution event log and caller fan-out.

use std::sync::{Arc, Mutex};

use serde::Serialize;

/// Every event type an execution can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SandboxCreating,
    SandboxCreated,
    SandboxFailed,
    PlanningStart,
    PlanningComplete,
    PlanningFailed,
    BuildingStart,
    BuildingComplete,
    BuildingFailed,
    SnapshotCreated,
    InstallingDependencies,
    BuildErrors,
    FixingStart,
    FixingComplete,
    FixingFailed,
    StateChange,
    ExecutionComplete,
    ExecutionFailed,
    ExecutionTimeout,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SandboxCreating => "sandbox_creating",
            Self::SandboxCreated => "sandbox_created",
            Self::SandboxFailed => "sandbox_failed",
            Self::PlanningStart => "planning_start",
            Self::PlanningComplete => "planning_complete",
            Self::PlanningFailed => "planning_failed",
            Self::BuildingStart => "building_start",
            Self::BuildingComplete => "building_complete",
            Self::BuildingFailed => "building_failed",
            Self::SnapshotCreated => "snapshot_created",
            Self::InstallingDependencies => "installing_dependencies",
            Self::BuildErrors => "build_errors",
            Self::FixingStart => "fixing_start",
            Self::FixingComplete => "fixing_complete",
            Self::FixingFailed => "fixing_failed",
            Self::StateChange => "state_change",
            Self::ExecutionComplete => "execution_complete",
            Self::ExecutionFailed => "execution_failed",
            Self::ExecutionTimeout => "execution_timeout",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable event record, delivered exactly once, in order.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp_ms: i64,
    pub data: serde_json::Value,
}

/// Callback invoked for every event, in generation order.
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

struct BusInner {
    log: Vec<Event>,
    callback: Option<EventCallback>,
}

/// Ordered event log with optional caller fan-out.
///
/// The callback is invoked while the log lock is held, so delivery order
/// matches append order even across emitting tasks. The callback is a
/// borrowed capability for the execution's lifetime; `clear_callback`
/// drops it on cleanup.
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new(callback: Option<EventCallback>) -> Self {
        Self {
            inner: Mutex::new(BusInner {
                log: Vec::new(),
                callback,
            }),
        }
    }

    pub fn emit(&self, event_type: EventType, data: serde_json::Value) {
        let event = Event {
            event_type,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            data,
        };
        let mut inner = self.lock();
        if let Some(ref callback) = inner.callback {
            callback(&event);
        }
        inner.log.push(event);
    }

    pub fn log(&self) -> Vec<Event> {
        self.lock().log.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Type of the most recently emitted event, if any.
    pub fn last_type(&self) -> Option<EventType> {
        self.lock().log.last().map(|e| e.event_type)
    }

    pub fn clear_callback(&self) {
        self.lock().callback = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn events_are_delivered_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let bus = EventBus::new(Some(Arc::new(move |event: &Event| {
            seen2.lock().unwrap().push(event.event_type);
        })));

        bus.emit(EventType::SandboxCreating, serde_json::json!({}));
        bus.emit(EventType::SandboxCreated, serde_json::json!({}));
        bus.emit(EventType::PlanningStart, serde_json::json!({}));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                EventType::SandboxCreating,
                EventType::SandboxCreated,
                EventType::PlanningStart
            ]
        );
        assert_eq!(bus.len(), 3);
        assert_eq!(bus.last_type(), Some(EventType::PlanningStart));
    }

    #[test]
    fn cleared_callback_stops_delivery_but_not_logging() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let bus = EventBus::new(Some(Arc::new(move |_: &Event| {
            count2.fetch_add(1, Ordering::SeqCst);
        })));

        bus.emit(EventType::StateChange, serde_json::json!({}));
        bus.clear_callback();
        bus.emit(EventType::StateChange, serde_json::json!({}));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.len(), 2);
    }

    #[test]
    fn event_serializes_with_snake_case_type() {
        let event = Event {
            event_type: EventType::ExecutionComplete,
            timestamp_ms: 123,
            data: serde_json::json!({"iterations": 1}),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "execution_complete");
        assert_eq!(json["timestamp_ms"], 123);
    }
}
