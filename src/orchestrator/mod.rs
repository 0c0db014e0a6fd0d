//! Execution Orchestrator.
//!
//! Drives the autonomous Planner -> Builder -> Test -> Fixer loop for one
//! session:
//!
//! ```text
//! start()
//!   ├─ acquire sandbox (FIFO pool)
//!   ├─ PLANNING   planner.invoke(prompt)
//!   └─ loop (≤ 5 iterations)
//!        ├─ BUILDING  builder.invoke(prompt | error-augmented prompt)
//!        ├─ write extracted files, snapshot container
//!        ├─ TESTING   npm install? + node --check
//!        ├─ SUCCESS   → destroy sandbox, done
//!        └─ FIXING    fixer.invoke(errors + code), next iteration
//! ```
//!
//! Each execution is a single cooperative task armed with an orchestration
//! timeout; `stop` aborts it at the next suspension point. Events flow to
//! the caller callback in generation order.

mod agents;
mod execution;
mod files;

pub use agents::{Agent, AgentReply, AgentRole, AgentSet};
pub use execution::{
    Execution, ExecutionDetails, ExecutionState, ExecutionStatus, Iteration, IterationState,
    IterationSummary,
};
pub use files::{extract_file_blocks, FileBlock};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::error::OrchestratorError;
use crate::sandbox::testing::{run_code_tests, TestNotice};
use crate::sandbox::SandboxManager;
use crate::session::{EventBus, EventCallback, EventType};

/// Hard ceiling on build-test attempts per execution.
pub const MAX_ITERATIONS: u32 = 5;
/// Orchestration timeout: the whole workflow must finish within this.
pub const MAX_ORCHESTRATION_TIME: Duration = Duration::from_secs(900);

/// Options for starting an execution.
#[derive(Clone, Default)]
pub struct StartOptions {
    /// Caller callback receiving every event in order.
    pub on_event: Option<EventCallback>,
    /// Override of the orchestration timeout.
    pub timeout: Option<Duration>,
    /// Override of the iteration ceiling.
    pub max_iterations: Option<u32>,
}

/// Result of a `stop` call.
#[derive(Debug, Clone)]
pub struct StopReport {
    pub duration_ms: u64,
}

type ExecutionHandle = Arc<RwLock<Execution>>;

/// Per-session orchestration service.
pub struct Orchestrator {
    sandbox: Arc<SandboxManager>,
    executions: RwLock<HashMap<String, ExecutionHandle>>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(sandbox: Arc<SandboxManager>) -> Arc<Self> {
        Arc::new(Self {
            sandbox,
            executions: RwLock::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Start the autonomous workflow for a session.
    ///
    /// Fails with `AlreadyRunning` when an execution record exists for the
    /// session (terminal records are released by [`Orchestrator::cleanup`]).
    pub async fn start(
        self: &Arc<Self>,
        session_id: &str,
        prompt: &str,
        agents: AgentSet,
        options: StartOptions,
    ) -> Result<(), OrchestratorError> {
        let bus = Arc::new(EventBus::new(options.on_event.clone()));
        let execution = Arc::new(RwLock::new(Execution::new(session_id, prompt, Arc::clone(&bus))));

        {
            let mut executions = self.executions.write().await;
            if executions.contains_key(session_id) {
                return Err(OrchestratorError::AlreadyRunning {
                    session_id: session_id.to_string(),
                });
            }
            executions.insert(session_id.to_string(), Arc::clone(&execution));
        }

        let timeout = options.timeout.unwrap_or(MAX_ORCHESTRATION_TIME);
        let max_iterations = options.max_iterations.unwrap_or(MAX_ITERATIONS).max(1);

        let sandbox = Arc::clone(&self.sandbox);
        let session = session_id.to_string();
        let task = tokio::spawn({
            let execution = Arc::clone(&execution);
            async move {
                let workflow = run_workflow(
                    Arc::clone(&sandbox),
                    Arc::clone(&execution),
                    agents,
                    max_iterations,
                );
                if tokio::time::timeout(timeout, workflow).await.is_err() {
                    handle_timeout(sandbox, execution).await;
                }
            }
        });
        self.lock_tasks().insert(session, task);

        tracing::info!(session_id, "started execution");
        Ok(())
    }

    /// Read-only status snapshot.
    pub async fn status(&self, session_id: &str) -> Result<ExecutionStatus, OrchestratorError> {
        let execution = self.execution(session_id).await?;
        let guard = execution.read().await;
        Ok(guard.status())
    }

    /// Full read-only projection: plan, code, iterations, snapshots, events.
    pub async fn details(&self, session_id: &str) -> Result<ExecutionDetails, OrchestratorError> {
        let execution = self.execution(session_id).await?;
        let guard = execution.read().await;
        Ok(guard.details())
    }

    /// Cancel a running execution: abort the workflow at its next
    /// suspension point, destroy the sandbox, transition to FAILED.
    pub async fn stop(
        &self,
        session_id: &str,
        reason: &str,
    ) -> Result<StopReport, OrchestratorError> {
        let execution = self.execution(session_id).await?;

        if let Some(task) = self.lock_tasks().remove(session_id) {
            task.abort();
        }

        let duration_ms = {
            let mut guard = execution.write().await;
            if !guard.state.is_terminal() {
                guard.errors.push(format!("stopped: {}", reason));
                guard.set_state(ExecutionState::Failed);
                guard.events.emit(
                    EventType::ExecutionFailed,
                    serde_json::json!({ "reason": "stopped", "detail": reason }),
                );
            }
            guard.started.elapsed().as_millis() as u64
        };

        let _ = self.sandbox.destroy_container(session_id, "stopped").await;

        tracing::info!(session_id, reason, "stopped execution");
        Ok(StopReport { duration_ms })
    }

    /// Release every resource held for the session. Idempotent; a no-op
    /// for unknown sessions and for already-terminal executions.
    pub async fn cleanup(&self, session_id: &str) {
        if let Some(task) = self.lock_tasks().remove(session_id) {
            task.abort();
        }
        let _ = self.sandbox.destroy_container(session_id, "cleanup").await;

        let removed = self.executions.write().await.remove(session_id);
        if let Some(execution) = removed {
            let guard = execution.read().await;
            guard.events.clear_callback();
        }
    }

    /// Await the workflow task (test and shutdown helper). Returns once
    /// the execution reaches a terminal state or was aborted.
    pub async fn wait(&self, session_id: &str) {
        let task = self.lock_tasks().remove(session_id);
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Number of executions currently tracked (terminal included).
    pub async fn execution_count(&self) -> usize {
        self.executions.read().await.len()
    }

    async fn execution(&self, session_id: &str) -> Result<ExecutionHandle, OrchestratorError> {
        let executions = self.executions.read().await;
        executions
            .get(session_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound {
                session_id: session_id.to_string(),
            })
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The linear per-session workflow. Runs inside the timeout wrapper.
async fn run_workflow(
    sandbox: Arc<SandboxManager>,
    execution: ExecutionHandle,
    agents: AgentSet,
    max_iterations: u32,
) {
    let (session_id, prompt, bus) = {
        let guard = execution.read().await;
        (
            guard.session_id.clone(),
            guard.prompt.clone(),
            Arc::clone(&guard.events),
        )
    };

    // Phase 0: sandbox.
    bus.emit(EventType::SandboxCreating, serde_json::json!({}));
    let container = match sandbox.create_container(&session_id).await {
        Ok(container) => container,
        Err(e) => {
            bus.emit(
                EventType::SandboxFailed,
                serde_json::json!({ "error": e.to_string() }),
            );
            let mut guard = execution.write().await;
            guard.errors.push(e.to_string());
            guard.set_state(ExecutionState::Failed);
            return;
        }
    };
    {
        let mut guard = execution.write().await;
        guard.container_name = Some(container.name.clone());
    }
    bus.emit(
        EventType::SandboxCreated,
        serde_json::json!({ "container": container.name }),
    );

    // Phase 1: planning.
    {
        execution.write().await.set_state(ExecutionState::Planning);
    }
    bus.emit(EventType::PlanningStart, serde_json::json!({}));
    let plan = match agents.planner.invoke(&prompt, None).await {
        Ok(reply) => {
            bus.emit(
                EventType::PlanningComplete,
                serde_json::json!({ "chars": reply.content.len(), "model": reply.model }),
            );
            execution.write().await.plan = Some(reply.content.clone());
            reply.content
        }
        Err(e) => {
            bus.emit(
                EventType::PlanningFailed,
                serde_json::json!({ "error": e.to_string() }),
            );
            fail_execution(&sandbox, &execution, &session_id, e.to_string()).await;
            return;
        }
    };

    // Phase 2: the bounded build loop.
    for number in 1..=max_iterations {
        {
            let mut guard = execution.write().await;
            guard.iterations.push(Iteration::new(number));
            guard.set_state(ExecutionState::Building);
        }
        bus.emit(
            EventType::BuildingStart,
            serde_json::json!({ "iteration": number }),
        );

        let build_prompt = if number == 1 {
            prompt.clone()
        } else {
            let previous_errors = {
                let guard = execution.read().await;
                guard
                    .iterations
                    .iter()
                    .rev()
                    .find(|it| !it.errors.is_empty())
                    .map(|it| it.errors.join("\n"))
                    .unwrap_or_default()
            };
            format!(
                "Previous attempt had errors. Fix them and try again.\n\nErrors:\n{}\n\nOriginal request: {}",
                previous_errors, prompt
            )
        };

        let reply = match agents.builder.invoke(&build_prompt, Some(plan.as_str())).await {
            Ok(reply) => reply,
            Err(e) => {
                bus.emit(
                    EventType::BuildingFailed,
                    serde_json::json!({ "iteration": number, "error": e.to_string() }),
                );
                {
                    let mut guard = execution.write().await;
                    if let Some(iteration) = guard.iterations.last_mut() {
                        iteration.state = IterationState::Error;
                        iteration.errors.push(e.to_string());
                    }
                }
                fail_execution(&sandbox, &execution, &session_id, e.to_string()).await;
                return;
            }
        };
        {
            let mut guard = execution.write().await;
            guard.code = Some(reply.content.clone());
            if let Some(iteration) = guard.iterations.last_mut() {
                iteration.builder_output = Some(reply.content.clone());
            }
        }
        bus.emit(
            EventType::BuildingComplete,
            serde_json::json!({ "iteration": number, "chars": reply.content.len() }),
        );

        // Materialize files. Failed writes are logged and skipped.
        let blocks = extract_file_blocks(&reply.content);
        let mut written = 0usize;
        for block in &blocks {
            match sandbox.write_file(&session_id, &block.path, &block.content).await {
                Ok(()) => written += 1,
                Err(e) => {
                    tracing::warn!(
                        session_id = %session_id,
                        path = %block.path,
                        error = %e,
                        "file write failed, skipping"
                    );
                }
            }
        }
        tracing::info!(
            session_id = %session_id,
            iteration = number,
            files = written,
            blocks = blocks.len(),
            "materialized builder output"
        );

        // Snapshot after every build. Failures are non-fatal.
        match sandbox.create_snapshot(&session_id).await {
            Ok(snapshot) => {
                {
                    let mut guard = execution.write().await;
                    guard.snapshots.push(snapshot.clone());
                    if let Some(iteration) = guard.iterations.last_mut() {
                        iteration.snapshot = Some(snapshot.clone());
                    }
                }
                bus.emit(
                    EventType::SnapshotCreated,
                    serde_json::json!({ "name": snapshot.name, "image_id": snapshot.image_id }),
                );
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "snapshot failed");
            }
        }

        // Test.
        {
            execution.write().await.set_state(ExecutionState::Testing);
        }
        let report = match run_code_tests(&sandbox, &session_id, |notice| match notice {
            TestNotice::InstallingDependencies => {
                bus.emit(EventType::InstallingDependencies, serde_json::json!({}));
            }
        })
        .await
        {
            Ok(report) => report,
            Err(e) => {
                fail_execution(&sandbox, &execution, &session_id, e.to_string()).await;
                return;
            }
        };

        if report.success {
            let duration_ms = {
                let mut guard = execution.write().await;
                if let Some(iteration) = guard.iterations.last_mut() {
                    iteration.state = IterationState::Success;
                }
                guard.set_state(ExecutionState::Success);
                guard.started.elapsed().as_millis() as u64
            };
            bus.emit(
                EventType::ExecutionComplete,
                serde_json::json!({ "iterations": number, "duration_ms": duration_ms }),
            );
            let _ = sandbox.destroy_container(&session_id, "completed").await;
            return;
        }

        {
            let mut guard = execution.write().await;
            if let Some(iteration) = guard.iterations.last_mut() {
                iteration.state = IterationState::Error;
                iteration.errors = report.errors.clone();
            }
            guard.errors.extend(report.errors.iter().cloned());
        }
        bus.emit(
            EventType::BuildErrors,
            serde_json::json!({ "iteration": number, "errors": report.errors }),
        );

        if number < max_iterations {
            {
                execution.write().await.set_state(ExecutionState::Fixing);
            }
            bus.emit(
                EventType::FixingStart,
                serde_json::json!({ "iteration": number }),
            );

            let latest_code = {
                let guard = execution.read().await;
                guard.code.clone().unwrap_or_default()
            };
            let fix_prompt = format!(
                "The code has errors. Analyze and fix them.\n\nErrors:\n{}\n\nOriginal code:\n{}",
                report.errors.join("\n"),
                latest_code
            );
            // The fixer's reply is recorded but deliberately not fed into
            // the next builder call; the error-augmented prompt alone
            // carries state forward. A fixer failure is logged and the
            // loop continues.
            match agents.fixer.invoke(&fix_prompt, None).await {
                Ok(reply) => {
                    bus.emit(
                        EventType::FixingComplete,
                        serde_json::json!({ "chars": reply.content.len() }),
                    );
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "fixer failed");
                    bus.emit(
                        EventType::FixingFailed,
                        serde_json::json!({ "error": e.to_string() }),
                    );
                }
            }
        } else {
            {
                execution.write().await.set_state(ExecutionState::Failed);
            }
            bus.emit(
                EventType::ExecutionFailed,
                serde_json::json!({ "reason": "max_iterations", "iterations": number }),
            );
            let _ = sandbox.destroy_container(&session_id, "completed").await;
            return;
        }
    }
}

/// Terminal failure path: record, transition, emit, destroy sandbox.
async fn fail_execution(
    sandbox: &Arc<SandboxManager>,
    execution: &ExecutionHandle,
    session_id: &str,
    error: String,
) {
    let bus = {
        let mut guard = execution.write().await;
        guard.errors.push(error.clone());
        guard.set_state(ExecutionState::Failed);
        Arc::clone(&guard.events)
    };
    bus.emit(
        EventType::ExecutionFailed,
        serde_json::json!({ "reason": "error", "detail": error }),
    );
    let _ = sandbox.destroy_container(session_id, "failed").await;
}

/// Orchestration timer fired: transition, emit, destroy sandbox.
async fn handle_timeout(sandbox: Arc<SandboxManager>, execution: ExecutionHandle) {
    let (session_id, bus) = {
        let mut guard = execution.write().await;
        guard.errors.push("orchestration timeout".to_string());
        guard.set_state(ExecutionState::Timeout);
        (guard.session_id.clone(), Arc::clone(&guard.events))
    };
    bus.emit(EventType::ExecutionTimeout, serde_json::json!({}));
    let _ = sandbox.destroy_container(&session_id, "timeout").await;
    tracing::warn!(session_id = %session_id, "execution timed out");
}
