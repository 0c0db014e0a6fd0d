//! Remote sandbox configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::helpers::{parse_optional_env, parse_string_env, required_env};
use crate::error::ConfigError;

/// Configuration for the remote container pool.
///
/// All engine operations run over SSH against the host identified by
/// `VPS_HOST`/`VPS_USER`/`VPS_SSH_KEY`.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Remote host running the container engine.
    pub vps_host: String,
    /// SSH user on the remote host.
    pub vps_user: String,
    /// Path to the SSH private key (prepared outside this crate).
    pub vps_ssh_key: PathBuf,
    /// Docker image for sandbox containers.
    pub image: String,
    /// Process-wide cap on running containers.
    pub max_containers: usize,
    /// CPU cap per container (`--cpus`).
    pub cpu_limit: u32,
    /// Memory cap per container (`--memory`), docker syntax.
    pub memory_limit: String,
    /// Disk cap per container (`--storage-opt size=`), docker syntax.
    pub disk_limit: String,
    /// Hard lifetime of a container before forced destruction.
    pub max_execution_time: Duration,
    /// Pending creation requests allowed before `QueueFull`.
    pub queue_cap: usize,
}

impl SandboxConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let max_execution_ms: u64 = parse_optional_env("MAX_EXECUTION_TIME", 900_000)?;
        Ok(Self {
            vps_host: required_env("VPS_HOST")?,
            vps_user: required_env("VPS_USER")?,
            vps_ssh_key: PathBuf::from(required_env("VPS_SSH_KEY")?),
            image: parse_string_env("SANDBOX_IMAGE", "node:20-alpine"),
            max_containers: parse_optional_env("MAX_CONCURRENT_CONTAINERS", 3)?,
            cpu_limit: parse_optional_env("CONTAINER_CPU_LIMIT", 1)?,
            memory_limit: parse_string_env("CONTAINER_MEMORY_LIMIT", "2g"),
            disk_limit: parse_string_env("CONTAINER_DISK_LIMIT", "10g"),
            max_execution_time: Duration::from_millis(max_execution_ms),
            queue_cap: parse_optional_env("SANDBOX_QUEUE_CAP", 64)?,
        })
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            vps_host: "sandbox.test".to_string(),
            vps_user: "forge".to_string(),
            vps_ssh_key: PathBuf::from("/tmp/test-key"),
            image: "node:20-alpine".to_string(),
            max_containers: 3,
            cpu_limit: 1,
            memory_limit: "2g".to_string(),
            disk_limit: "10g".to_string(),
            max_execution_time: Duration::from_millis(900_000),
            queue_cap: 64,
        }
    }
}
