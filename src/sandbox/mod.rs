//! Sandbox management: remote container pool over a secure-shell transport.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ SandboxManager                                │
//! │   create_container() ── FIFO queue, cap 3     │
//! │   exec / write / read / list / snapshot       │
//! │   destroy_container() ── idempotent           │
//! │   reaper ── every 300 s, lifetime + 60 s      │
//! └──────────────┬───────────────────────────────┘
//!                │ ssh user@host docker ...
//!                ▼
//!        remote container engine
//! ```

mod manager;
pub mod testing;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use manager::{
    CleanupReport, Container, ContainerStatus, DestroyReport, ExecResult, HealthReport,
    PoolStatus, ResourceUsage, SandboxManager, SnapshotRecord,
};
pub use transport::{RemoteOutput, SandboxTransport, SshTransport};
