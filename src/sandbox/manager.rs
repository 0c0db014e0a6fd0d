//! Remote container pool.
//!
//! One container per session, a process-wide cap on running containers,
//! and a FIFO creation queue that resolves as slots free on destruction.
//! Containers carry a hard lifetime; a background reaper force-destroys
//! anything past lifetime + grace.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine as _;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::queue::{SlotPermit, SlotQueue};
use crate::sandbox::transport::{
    engine_result, shell_quote, SandboxTransport, CREATE_TIMEOUT, DEFAULT_TIMEOUT,
    SNAPSHOT_TIMEOUT,
};

/// How often the reaper sweeps for stale containers.
const REAPER_INTERVAL: Duration = Duration::from_secs(300);
/// Grace past the hard lifetime before the reaper force-destroys.
const REAPER_GRACE: Duration = Duration::from_secs(60);
/// tmpfs size for /tmp.
const TMP_TMPFS_SIZE: &str = "1g";
/// tmpfs size for the per-session workspace.
const WORKSPACE_TMPFS_SIZE: &str = "5g";

/// Container lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Running,
    Destroyed,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Public snapshot of a pooled container.
#[derive(Debug, Clone)]
pub struct Container {
    /// Remote engine container id.
    pub engine_id: String,
    pub session_id: String,
    /// Logical container name on the remote engine.
    pub name: String,
    pub status: ContainerStatus,
    pub created_at: DateTime<Utc>,
    /// Working directory inside the container.
    pub workdir: String,
    pub commands_executed: u64,
    pub files_written: u64,
    pub files_read: u64,
    pub errors: u64,
}

/// Result of a command run inside a container. Non-zero exits are data,
/// not errors.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub success: bool,
    pub output: String,
    pub exit_code: i32,
}

/// A committed image of a container.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SnapshotRecord {
    pub name: String,
    pub image_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time resource readings for a container.
#[derive(Debug, Clone, Default)]
pub struct ResourceUsage {
    pub cpu: String,
    pub memory: String,
    pub network: String,
    pub disk: String,
    pub uptime: Duration,
}

/// Outcome of a destroy call.
#[derive(Debug, Clone)]
pub struct DestroyReport {
    /// `false` when the container was already gone (idempotent call).
    pub removed: bool,
    pub lifetime: Duration,
}

/// Outcome of `cleanup_all`.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub total: usize,
    pub ok: usize,
    pub failed: usize,
}

/// Engine health probe result.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub healthy: bool,
    pub engine_version: Option<String>,
    pub error: Option<String>,
}

/// Pool-level status projection.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub active: usize,
    pub queued: usize,
    pub max: usize,
    pub containers: Vec<Container>,
}

struct Entry {
    container: Container,
    created: Instant,
    _permit: SlotPermit,
    lifetime_timer: JoinHandle<()>,
}

pub struct SandboxManager {
    config: SandboxConfig,
    transport: Arc<dyn SandboxTransport>,
    containers: RwLock<HashMap<String, Entry>>,
    queue: SlotQueue,
}

impl SandboxManager {
    pub fn new(config: SandboxConfig, transport: Arc<dyn SandboxTransport>) -> Arc<Self> {
        let queue = SlotQueue::new(
            "sandbox-create",
            config.max_containers,
            config.queue_cap,
            Duration::from_secs(120),
        );
        Arc::new(Self {
            config,
            transport,
            containers: RwLock::new(HashMap::new()),
            queue,
        })
    }

    /// Create and start a container for the session.
    ///
    /// Blocks in the FIFO creation queue when the pool is at its cap.
    /// Creation failure releases the slot instead of consuming it.
    pub async fn create_container(
        self: &Arc<Self>,
        session_id: &str,
    ) -> Result<Container, SandboxError> {
        if self.containers.read().await.contains_key(session_id) {
            return Err(SandboxError::AlreadyExists {
                session_id: session_id.to_string(),
            });
        }

        let permit = self.queue.acquire().await?;

        // Re-check after the (possibly long) queue wait.
        if self.containers.read().await.contains_key(session_id) {
            return Err(SandboxError::AlreadyExists {
                session_id: session_id.to_string(),
            });
        }

        let name = format!("autoforge-{}", sanitize_name(session_id));
        let workdir = format!("/workspace/{}", session_id);
        let command = self.run_command(session_id, &name, &workdir);

        let output = self.transport.run(&command, CREATE_TIMEOUT).await?;
        let engine_id = engine_result(&command, output)?;

        let container = Container {
            engine_id: engine_id.clone(),
            session_id: session_id.to_string(),
            name: name.clone(),
            status: ContainerStatus::Running,
            created_at: Utc::now(),
            workdir,
            commands_executed: 0,
            files_written: 0,
            files_read: 0,
            errors: 0,
        };

        let lifetime_timer = {
            let mgr = Arc::clone(self);
            let sid = session_id.to_string();
            let lifetime = self.config.max_execution_time;
            tokio::spawn(async move {
                tokio::time::sleep(lifetime).await;
                match mgr.destroy_inner(&sid, "expired", false).await {
                    Ok(report) if report.removed => {
                        tracing::warn!(session_id = %sid, "container hit hard lifetime, destroyed");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(session_id = %sid, error = %e, "lifetime destruction failed");
                    }
                }
            })
        };

        self.containers.write().await.insert(
            session_id.to_string(),
            Entry {
                container: container.clone(),
                created: Instant::now(),
                _permit: permit,
                lifetime_timer,
            },
        );

        tracing::info!(session_id, name = %name, engine_id = %engine_id, "created sandbox container");
        Ok(container)
    }

    /// Run a command inside the session's container.
    ///
    /// Never errors for a non-zero exit; only transport failures raise.
    pub async fn exec_in_container(
        &self,
        session_id: &str,
        cmd: &str,
        timeout: Duration,
    ) -> Result<ExecResult, SandboxError> {
        let engine_id = self.engine_id(session_id).await?;
        let remote = format!("docker exec {} sh -lc {}", engine_id, shell_quote(cmd));

        let result = self.transport.run(&remote, timeout).await;

        {
            let mut containers = self.containers.write().await;
            if let Some(entry) = containers.get_mut(session_id) {
                entry.container.commands_executed += 1;
                if !matches!(result, Ok(ref out) if out.exit_code == 0) {
                    entry.container.errors += 1;
                }
            }
        }

        let output = result?;
        let combined = if output.stderr.trim().is_empty() {
            output.stdout
        } else if output.stdout.trim().is_empty() {
            output.stderr
        } else {
            format!("{}\n{}", output.stdout.trim_end(), output.stderr.trim_end())
        };

        Ok(ExecResult {
            success: output.exit_code == 0,
            output: combined,
            exit_code: output.exit_code,
        })
    }

    /// Write a file into the session workspace.
    ///
    /// Content is base64-encoded host-side and decoded in-container, so no
    /// shell-escaping of the payload is needed. Paths escaping the
    /// workspace are rejected.
    pub async fn write_file(
        &self,
        session_id: &str,
        path: &str,
        content: &str,
    ) -> Result<(), SandboxError> {
        let (engine_id, workdir) = self.engine_id_and_workdir(session_id).await?;
        let target = workspace_path(&workdir, path)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(content);

        let parent = match target.rfind('/') {
            Some(idx) if idx > 0 => &target[..idx],
            _ => &workdir,
        };
        let pipeline = format!(
            "mkdir -p {} && printf %s {} | base64 -d > {}",
            shell_quote(parent),
            shell_quote(&encoded),
            shell_quote(&target)
        );
        let remote = format!("docker exec {} sh -lc {}", engine_id, shell_quote(&pipeline));

        let output = self.transport.run(&remote, DEFAULT_TIMEOUT).await?;
        engine_result(&remote, output)?;

        if let Some(entry) = self.containers.write().await.get_mut(session_id) {
            entry.container.files_written += 1;
        }
        Ok(())
    }

    /// Read a file from the session workspace.
    pub async fn read_file(&self, session_id: &str, path: &str) -> Result<String, SandboxError> {
        let (engine_id, workdir) = self.engine_id_and_workdir(session_id).await?;
        let target = workspace_path(&workdir, path)?;

        let pipeline = format!("base64 < {}", shell_quote(&target));
        let remote = format!("docker exec {} sh -lc {}", engine_id, shell_quote(&pipeline));
        let output = self.transport.run(&remote, DEFAULT_TIMEOUT).await?;
        let encoded = engine_result(&remote, output)?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.replace(['\n', '\r'], ""))
            .map_err(|e| SandboxError::Transport(crate::error::TransportError::EngineFailed {
                command: remote,
                exit_code: 0,
                detail: format!("invalid base64 from remote: {}", e),
            }))?;

        if let Some(entry) = self.containers.write().await.get_mut(session_id) {
            entry.container.files_read += 1;
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// List files under a directory in the session workspace, sorted.
    pub async fn list_files(
        &self,
        session_id: &str,
        dir: &str,
    ) -> Result<Vec<String>, SandboxError> {
        let (engine_id, workdir) = self.engine_id_and_workdir(session_id).await?;
        let target = if dir.is_empty() || dir == "." {
            workdir.clone()
        } else {
            workspace_path(&workdir, dir)?
        };

        let pipeline = format!("find {} -type f | sort", shell_quote(&target));
        let remote = format!("docker exec {} sh -lc {}", engine_id, shell_quote(&pipeline));
        let output = self.transport.run(&remote, DEFAULT_TIMEOUT).await?;
        let listing = engine_result(&remote, output)?;

        Ok(listing
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Commit the container to an image named uniquely per timestamp.
    pub async fn create_snapshot(
        &self,
        session_id: &str,
    ) -> Result<SnapshotRecord, SandboxError> {
        let engine_id = self.engine_id(session_id).await?;
        let timestamp = Utc::now();
        let name = format!(
            "autoforge-snapshot-{}-{}",
            sanitize_name(session_id),
            timestamp.timestamp_millis()
        );

        let command = format!("docker commit {} {}", engine_id, name);
        let output = self.transport.run(&command, SNAPSHOT_TIMEOUT).await?;
        let image_id = engine_result(&command, output)?;

        tracing::debug!(session_id, snapshot = %name, "created container snapshot");
        Ok(SnapshotRecord {
            name,
            image_id,
            timestamp,
        })
    }

    /// Point-in-time resource usage for the session's container.
    pub async fn resource_usage(
        &self,
        session_id: &str,
    ) -> Result<ResourceUsage, SandboxError> {
        let engine_id = self.engine_id(session_id).await?;
        let command = format!("docker stats --no-stream --format '{{{{json .}}}}' {}", engine_id);
        let output = self.transport.run(&command, DEFAULT_TIMEOUT).await?;
        let raw = engine_result(&command, output)?;

        #[derive(serde::Deserialize, Default)]
        struct StatsLine {
            #[serde(rename = "CPUPerc", default)]
            cpu: String,
            #[serde(rename = "MemUsage", default)]
            memory: String,
            #[serde(rename = "NetIO", default)]
            network: String,
            #[serde(rename = "BlockIO", default)]
            disk: String,
        }
        let stats: StatsLine = serde_json::from_str(raw.trim()).unwrap_or_default();

        let uptime = {
            let containers = self.containers.read().await;
            containers
                .get(session_id)
                .map(|e| e.created.elapsed())
                .unwrap_or_default()
        };

        Ok(ResourceUsage {
            cpu: stats.cpu,
            memory: stats.memory,
            network: stats.network,
            disk: stats.disk,
            uptime,
        })
    }

    /// Destroy the session's container. Idempotent: a second call reports
    /// `removed: false`. Releases the pool slot, starting the next queued
    /// creation before returning.
    pub async fn destroy_container(
        &self,
        session_id: &str,
        reason: &str,
    ) -> Result<DestroyReport, SandboxError> {
        self.destroy_inner(session_id, reason, true).await
    }

    async fn destroy_inner(
        &self,
        session_id: &str,
        reason: &str,
        abort_timer: bool,
    ) -> Result<DestroyReport, SandboxError> {
        let entry = self.containers.write().await.remove(session_id);
        let Some(mut entry) = entry else {
            return Ok(DestroyReport {
                removed: false,
                lifetime: Duration::ZERO,
            });
        };

        if abort_timer {
            entry.lifetime_timer.abort();
        }
        entry.container.status = ContainerStatus::Destroyed;
        let lifetime = entry.created.elapsed();

        let command = format!("docker rm -f {}", entry.container.engine_id);
        match self.transport.run(&command, DEFAULT_TIMEOUT).await {
            Ok(output) => {
                if let Err(e) = engine_result(&command, output) {
                    tracing::warn!(session_id, error = %e, "container removal reported an error");
                }
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "container removal transport failure");
            }
        }

        tracing::info!(
            session_id,
            reason,
            lifetime_secs = lifetime.as_secs(),
            "destroyed sandbox container"
        );
        // Entry (and its permit) drops here, handing the slot to the next
        // queued creation.
        Ok(DestroyReport {
            removed: true,
            lifetime,
        })
    }

    /// Destroy every container in the pool.
    pub async fn cleanup_all(&self) -> CleanupReport {
        let session_ids: Vec<String> = {
            let containers = self.containers.read().await;
            containers.keys().cloned().collect()
        };

        let mut report = CleanupReport {
            total: session_ids.len(),
            ..CleanupReport::default()
        };
        for session_id in session_ids {
            match self.destroy_container(&session_id, "shutdown").await {
                Ok(_) => report.ok += 1,
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "cleanup failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Probe the remote engine.
    pub async fn health_check(&self) -> HealthReport {
        let command = "docker version --format '{{.Server.Version}}'";
        match self.transport.run(command, DEFAULT_TIMEOUT).await {
            Ok(output) => match engine_result(command, output) {
                Ok(version) => HealthReport {
                    healthy: true,
                    engine_version: Some(version),
                    error: None,
                },
                Err(e) => HealthReport {
                    healthy: false,
                    engine_version: None,
                    error: Some(e.to_string()),
                },
            },
            Err(e) => HealthReport {
                healthy: false,
                engine_version: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Pool-level status projection.
    pub async fn status(&self) -> PoolStatus {
        let containers = self.containers.read().await;
        PoolStatus {
            active: containers.len(),
            queued: self.queue.depth(),
            max: self.config.max_containers,
            containers: containers.values().map(|e| e.container.clone()).collect(),
        }
    }

    /// Spawn the background reaper that force-destroys containers past
    /// their hard lifetime plus grace.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let mgr = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REAPER_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                mgr.reap_stale().await;
            }
        })
    }

    async fn reap_stale(&self) {
        let cutoff = self.config.max_execution_time + REAPER_GRACE;
        let stale: Vec<String> = {
            let containers = self.containers.read().await;
            containers
                .iter()
                .filter(|(_, entry)| entry.created.elapsed() > cutoff)
                .map(|(sid, _)| sid.clone())
                .collect()
        };

        for session_id in stale {
            tracing::warn!(session_id = %session_id, "reaping stale container");
            if let Err(e) = self.destroy_inner(&session_id, "stale", true).await {
                tracing::warn!(session_id = %session_id, error = %e, "reap failed");
            }
        }
    }

    async fn engine_id(&self, session_id: &str) -> Result<String, SandboxError> {
        let containers = self.containers.read().await;
        containers
            .get(session_id)
            .map(|e| e.container.engine_id.clone())
            .ok_or_else(|| SandboxError::NotFound {
                session_id: session_id.to_string(),
            })
    }

    async fn engine_id_and_workdir(
        &self,
        session_id: &str,
    ) -> Result<(String, String), SandboxError> {
        let containers = self.containers.read().await;
        containers
            .get(session_id)
            .map(|e| (e.container.engine_id.clone(), e.container.workdir.clone()))
            .ok_or_else(|| SandboxError::NotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Compose the hardened `docker run` for a session container.
    fn run_command(&self, session_id: &str, name: &str, workdir: &str) -> String {
        format!(
            "docker run -d --name {name} \
             --cpus {cpus} --memory {memory} --storage-opt size={disk} \
             --read-only \
             --tmpfs /tmp:rw,noexec,nosuid,size={tmp_size} \
             --tmpfs {workdir}:rw,exec,nosuid,size={ws_size} \
             --workdir {workdir} \
             --cap-drop ALL --security-opt no-new-privileges \
             --network none \
             --label session={session_id} --label created={created} \
             {image} sleep infinity",
            name = name,
            cpus = self.config.cpu_limit,
            memory = self.config.memory_limit,
            disk = self.config.disk_limit,
            tmp_size = TMP_TMPFS_SIZE,
            workdir = workdir,
            ws_size = WORKSPACE_TMPFS_SIZE,
            session_id = session_id,
            created = Utc::now().timestamp_millis(),
            image = self.config.image,
        )
    }
}

/// Reduce a session id to characters docker accepts in names and tags.
fn sanitize_name(session_id: &str) -> String {
    let cleaned: String = session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "session".to_string()
    } else {
        cleaned
    }
}

/// Resolve a caller-supplied path against the workspace, rejecting
/// traversal and out-of-workspace absolutes.
fn workspace_path(workdir: &str, path: &str) -> Result<String, SandboxError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(SandboxError::PathEscape {
            path: path.to_string(),
        });
    }
    if trimmed.split('/').any(|component| component == "..") {
        return Err(SandboxError::PathEscape {
            path: path.to_string(),
        });
    }

    if let Some(absolute) = trimmed.strip_prefix('/') {
        let workdir_rel = workdir.trim_start_matches('/');
        if absolute == workdir_rel || absolute.starts_with(&format!("{}/", workdir_rel)) {
            Ok(trimmed.to_string())
        } else {
            Err(SandboxError::PathEscape {
                path: path.to_string(),
            })
        }
    } else {
        let relative = trimmed.trim_start_matches("./");
        Ok(format!("{}/{}", workdir.trim_end_matches('/'), relative))
    }
}
