//! Subprocess transport
//!
//! Runs a helper program that speaks the dock protocol on stdout and accepts
//! commands on stdin. Anything the helper writes to stderr is treated as a
//! fault; the session then asks it to `stop` and kills it.

use super::{spawn_reader, LineTransport, TransportError, TransportEvent, TransportType};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Helper process configuration
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Program to execute
    pub program: String,
    /// Program arguments
    pub args: Vec<String>,
}

impl ProcessConfig {
    /// Create a configuration for `program` without arguments
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    /// Set program arguments
    #[must_use]
    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

/// Transport backed by a child process' stdio
pub struct ProcessTransport {
    config: ProcessConfig,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    pumps: Vec<JoinHandle<()>>,
}

impl ProcessTransport {
    /// Create a new process transport
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            child: None,
            stdin: None,
            events: None,
            pumps: Vec::new(),
        }
    }
}

#[async_trait]
impl LineTransport for ProcessTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.close().await?;

        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::SpawnFailed {
                program: self.config.program.clone(),
                source,
            })?;

        let (tx, rx) = mpsc::unbounded_channel();

        if let Some(stdout) = child.stdout.take() {
            self.pumps.push(spawn_reader(stdout, tx.clone()));
        }

        if let Some(mut stderr) = child.stderr.take() {
            let tx = tx.clone();
            self.pumps.push(tokio::spawn(async move {
                let mut buffer = vec![0u8; 1024];
                match stderr.read(&mut buffer).await {
                    Ok(n) if n > 0 => {
                        let message = String::from_utf8_lossy(&buffer[..n]).trim().to_string();
                        let _ = tx.send(TransportEvent::Error(format!("process error: {message}")));
                    }
                    _ => {}
                }
            }));
        }

        self.stdin = child.stdin.take();
        self.child = Some(child);
        self.events = Some(rx);

        debug!(program = %self.config.program, "helper process spawned");
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let stdin = self.stdin.as_mut().ok_or(TransportError::NotConnected)?;
        stdin.write_all(data).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        match self.events.as_mut() {
            Some(rx) => rx.recv().await.unwrap_or(TransportEvent::Closed),
            None => TransportEvent::Closed,
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
        self.events = None;
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!(program = %self.config.program, "failed to kill helper process: {}", e);
            }
        }
        Ok(())
    }

    fn supports_stop(&self) -> bool {
        true
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Process
    }

    fn connection_info(&self) -> String {
        if self.config.args.is_empty() {
            self.config.program.clone()
        } else {
            format!("{} {}", self.config.program, self.config.args.join(" "))
        }
    }
}
