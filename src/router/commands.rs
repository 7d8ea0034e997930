//! Command execution and the host (serial input) command path.
//!
//! Commands are short ASCII words. Results never come back synchronously:
//! the executor pushes a [`CommandResult`] into a channel and the node's
//! event loop hands it to [`super::MessageRouter::on_command_result`] on a
//! later iteration.
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::config::NodeCapabilities;
use crate::logutil::escape_log;
use crate::mesh::frame::{self, FrameError, HOST_FRAME_PREFIX};
use crate::mesh::{MeshError, MeshGateway, NodeId};
use crate::metrics;
use crate::serial::LineAssembler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub payload: Vec<u8>,
    /// The requester expects an answer over the mesh.
    pub needs_reply: bool,
    pub reply_to: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub text: Vec<u8>,
    /// Mesh node to answer, `None` for host-issued commands.
    pub reply_to: Option<NodeId>,
}

/// Runs a command and reports its result later.
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, request: CommandRequest);
}

/// Built-in command set of every node.
pub struct BuiltinCommands {
    node_id: NodeId,
    started: Instant,
    alive: Option<Arc<AtomicU32>>,
    results: mpsc::UnboundedSender<CommandResult>,
}

impl BuiltinCommands {
    pub fn new(node_id: NodeId, results: mpsc::UnboundedSender<CommandResult>) -> Self {
        BuiltinCommands {
            node_id,
            started: Instant::now(),
            alive: None,
            results,
        }
    }

    /// Expose the keep-alive counter to the `alive` command.
    pub fn with_alive_counter(mut self, counter: Arc<AtomicU32>) -> Self {
        self.alive = Some(counter);
        self
    }

    fn answer(&self, command: &str) -> String {
        match command {
            "ping" => "pong".to_string(),
            "id" => format!("id:{}", self.node_id),
            "uptime" => format!("uptime:{}", self.started.elapsed().as_secs()),
            "stats" => metrics::snapshot().compact(),
            "alive" => match &self.alive {
                Some(c) => format!("alive:{}", c.load(Ordering::Relaxed)),
                None => "alive:n/a".to_string(),
            },
            other => format!("unknown:{}", other),
        }
    }
}

impl CommandExecutor for BuiltinCommands {
    fn execute(&self, request: CommandRequest) {
        let text = String::from_utf8_lossy(&request.payload);
        let command = text.trim().to_ascii_lowercase();
        let answer = self.answer(&command);
        debug!("command '{}' -> '{}'", escape_log(command.as_bytes()), answer);
        let result = CommandResult {
            text: answer.into_bytes(),
            reply_to: request.needs_reply.then_some(request.reply_to),
        };
        if self.results.send(result).is_err() {
            warn!("command result dropped: event loop gone");
        }
    }
}

/// What the host path did with a completed input line.
#[derive(Debug, PartialEq, Eq)]
pub enum HostAction {
    /// Serial commands are disabled on this node.
    Ignored,
    /// A `tmsg` frame was decoded and handed to the mesh.
    FrameSent,
    /// The line went to the local command executor.
    Executed,
    /// The `tmsg` line could not be turned into a frame.
    Rejected(FrameError),
    /// The mesh refused the decoded frame.
    SendFailed(String),
}

/// Assembles host bytes into lines and acts on them.
pub struct HostCommands {
    assembler: LineAssembler,
    caps: NodeCapabilities,
    mesh: Arc<MeshGateway>,
    executor: Arc<dyn CommandExecutor>,
    bytes_seen: u64,
}

impl HostCommands {
    pub fn new(
        caps: NodeCapabilities,
        mesh: Arc<MeshGateway>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        HostCommands {
            assembler: LineAssembler::new(),
            caps,
            mesh,
            executor,
            bytes_seen: 0,
        }
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    /// Feed one byte from the serial link. Returns an action when the byte
    /// completed a line.
    pub fn on_byte_received(&mut self, byte: u8) -> Option<HostAction> {
        self.bytes_seen += 1;
        let line = self.assembler.push(byte)?;
        Some(self.on_line(&line))
    }

    fn on_line(&self, line: &[u8]) -> HostAction {
        if !self.caps.accept_serial_commands {
            debug!("host line ignored, serial commands disabled: {}", escape_log(line));
            return HostAction::Ignored;
        }
        let text = String::from_utf8_lossy(line);
        let is_frame = text
            .split_whitespace()
            .next()
            .is_some_and(|w| w.eq_ignore_ascii_case(HOST_FRAME_PREFIX));
        if is_frame {
            return match self.send_frame(&text) {
                Ok(()) => HostAction::FrameSent,
                Err(MeshError::Frame(e)) => {
                    warn!("host frame rejected: {}", e);
                    HostAction::Rejected(e)
                }
                Err(e) => {
                    warn!("host frame not sent: {}", e);
                    HostAction::SendFailed(e.to_string())
                }
            };
        }
        info!("host command: {}", escape_log(line));
        self.executor.execute(CommandRequest {
            payload: line.to_vec(),
            needs_reply: false,
            reply_to: self.mesh.this_node_id(),
        });
        metrics::inc_commands_executed();
        HostAction::Executed
    }

    fn send_frame(&self, text: &str) -> Result<(), MeshError> {
        let bytes = frame::parse_host_frame(text)?;
        let envelope = frame::decode(&bytes)?;
        self.mesh.send(envelope)
    }
}
