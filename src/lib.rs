//! AutoForge - autonomous multi-agent code-generation orchestrator.
//!
//! Given a natural-language build request, AutoForge drives a closed loop of
//! three cooperating LLM agents (Planner -> Builder -> Fixer) that produces a
//! plan, synthesizes a multi-file program, materializes it inside an isolated
//! remote container, runs static validation, and feeds errors back to the
//! Fixer for another attempt, up to a bounded number of iterations.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      Orchestrator                           │
//! │   start() ─► acquire sandbox ─► plan ─► [build ─► test     │
//! │                                          ─► fix]* ─► done   │
//! └──────┬─────────────────────────────┬───────────────────────┘
//!        │                             │
//!        ▼                             ▼
//! ┌─────────────────┐          ┌──────────────────────┐
//! │ Sandbox Manager │          │    Agent Gateway      │
//! │  pool + queue   │          │  routing + queue +    │
//! │  over SSH/docker│          │  retry                │
//! └─────────────────┘          └──────┬───────┬────────┘
//!                                     │       │
//!                                     ▼       ▼
//!                              ┌─────────┐ ┌──────────────┐
//!                              │ polling │ │ chat         │
//!                              │ bot     │ │ completions  │
//!                              └─────────┘ └──────────────┘
//! ```
//!
//! The HTTP surface, metric exposition, and SSH key provisioning live outside
//! this crate; everything here is driven through the [`orchestrator::Orchestrator`],
//! [`sandbox::SandboxManager`], and [`gateway::AgentGateway`] services.

pub mod config;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod orchestrator;
pub mod queue;
pub mod sandbox;
pub mod session;

pub use error::Error;
