//! Static validation of generated code inside a sandbox.
//!
//! The protocol, given a materialized workspace:
//! 1. `npm install --production` when a `package.json` exists at the root
//!    (failure is recorded, not fatal).
//! 2. `node --check` over the first 10 `.js`/`.ts` files in listing order.
//!
//! Syntax only; the generated program is never executed.

use crate::error::SandboxError;
use crate::sandbox::manager::SandboxManager;
use crate::sandbox::transport::{DEFAULT_TIMEOUT, INSTALL_TIMEOUT};

/// How many source files are syntax-checked per run.
const MAX_CHECKED_FILES: usize = 10;
/// How much of a failing install log is kept.
const INSTALL_LOG_TAIL: usize = 400;

/// Outcome of one validation pass.
#[derive(Debug, Clone)]
pub struct TestReport {
    pub success: bool,
    pub errors: Vec<String>,
}

/// Progress notices surfaced to the caller while the protocol runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestNotice {
    InstallingDependencies,
}

/// Run the validation protocol against the session's workspace.
///
/// Transport failures raise; everything the generated code did wrong is
/// collected into the report instead.
pub async fn run_code_tests(
    manager: &SandboxManager,
    session_id: &str,
    mut notify: impl FnMut(TestNotice),
) -> Result<TestReport, SandboxError> {
    let mut errors = Vec::new();

    let has_manifest = manager
        .exec_in_container(session_id, "test -f package.json", DEFAULT_TIMEOUT)
        .await?
        .success;

    if has_manifest {
        notify(TestNotice::InstallingDependencies);
        let install = manager
            .exec_in_container(session_id, "npm install --production", INSTALL_TIMEOUT)
            .await?;
        if !install.success {
            errors.push(format!(
                "npm install failed: {}",
                tail(&install.output, INSTALL_LOG_TAIL)
            ));
        }
    }

    let listing = manager
        .exec_in_container(
            session_id,
            "find . -type f \\( -name '*.js' -o -name '*.ts' \\) | sort",
            DEFAULT_TIMEOUT,
        )
        .await?;
    let sources: Vec<String> = listing
        .output
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .take(MAX_CHECKED_FILES)
        .collect();

    for file in &sources {
        let check = manager
            .exec_in_container(
                session_id,
                &format!("node --check {}", file),
                DEFAULT_TIMEOUT,
            )
            .await?;
        if !check.success {
            errors.push(format!("Syntax error in {}: {}", file, check.output.trim()));
        }
    }

    tracing::debug!(
        session_id,
        checked = sources.len(),
        errors = errors.len(),
        "code validation finished"
    );
    Ok(TestReport {
        success: errors.is_empty(),
        errors,
    })
}

/// Last `max` bytes of a log, on a char boundary.
fn tail(text: &str, max: usize) -> &str {
    let trimmed = text.trim();
    if trimmed.len() <= max {
        return trimmed;
    }
    let mut start = trimmed.len() - max;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}
