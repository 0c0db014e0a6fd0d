//! Scripted transport for unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::sandbox::transport::{RemoteOutput, SandboxTransport};

type Handler = Box<dyn FnMut(&str) -> Result<RemoteOutput, TransportError> + Send>;

/// Every remote command goes through a closure and is recorded for
/// assertions.
pub(crate) struct MockTransport {
    handler: Mutex<Handler>,
    pub log: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new(
        handler: impl FnMut(&str) -> Result<RemoteOutput, TransportError> + Send + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Mutex::new(Box::new(handler)),
            log: Mutex::new(Vec::new()),
        })
    }

    /// Transport that answers every command successfully with `stdout`.
    pub fn always_ok(stdout: &'static str) -> Arc<Self> {
        Self::new(move |_| Ok(ok_output(stdout)))
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

/// A successful `RemoteOutput` with the given stdout.
pub(crate) fn ok_output(stdout: &str) -> RemoteOutput {
    RemoteOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

/// A failed `RemoteOutput` with the given exit code and stderr.
pub(crate) fn err_output(exit_code: i32, stderr: &str) -> RemoteOutput {
    RemoteOutput {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl SandboxTransport for MockTransport {
    async fn run(
        &self,
        command: &str,
        _timeout: Duration,
    ) -> Result<RemoteOutput, TransportError> {
        self.log.lock().unwrap().push(command.to_string());
        (self.handler.lock().unwrap())(command)
    }
}
