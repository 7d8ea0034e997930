//! # Inbound Message Router
//!
//! Decides what the node does with each envelope the radio hands over.
//!
//! ## Decision table
//!
//! Evaluated top to bottom:
//!
//! | broadcast | addressed here | response | pid             | outcome                          |
//! |-----------|----------------|----------|-----------------|----------------------------------|
//! | yes       | (ignored)      | -        | -               | relevant                         |
//! | no        | yes            | yes      | -               | relevant, delivery only          |
//! | no        | yes            | no       | ExecuteCommand  | execute if remote commands allowed, else relevant only |
//! | no        | yes            | no       | other           | relevant, no action              |
//! | no        | no             | -        | -               | dropped                          |
//!
//! Relevant envelopes are rendered to one text line and written to the
//! serial host when the node is configured as a gateway
//! (`bridge_mesh_to_serial`). Relay and sensor nodes skip rendering
//! entirely.
//!
//! Command execution is asynchronous: the executor reports back later and
//! [`MessageRouter::on_command_result`] forwards the result to the host and,
//! for remote requests, back over the mesh.

pub mod commands;

pub use commands::{
    BuiltinCommands, CommandExecutor, CommandRequest, CommandResult, HostAction, HostCommands,
};

use std::sync::Arc;

use log::{debug, trace, warn};

use crate::config::NodeCapabilities;
use crate::logutil::escape_log;
use crate::mesh::{Control, MeshEnvelope, MeshError, MeshGateway, MessageKind, NodeId};
use crate::metrics;
use crate::serial::{LineError, SerialError, SerialLine, SerialTransport};

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("command result rejected: {0}")]
    Line(#[from] LineError),

    #[error("command reply not sent: {0}")]
    Mesh(#[from] MeshError),

    #[error(transparent)]
    Serial(#[from] SerialError),
}

/// Result of classifying one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Unicast for another node; no side effects.
    NotRelevant,
    /// Broadcast, relevant whatever its destination byte says.
    Broadcast,
    /// Response addressed to this node; delivered, never executed.
    Response,
    /// Command addressed to this node and remote commands are allowed.
    Execute,
    /// Command addressed to this node but remote commands are disabled.
    CommandDenied,
    /// Any other unicast addressed to this node.
    Observed,
}

impl Classification {
    pub fn is_relevant(&self) -> bool {
        !matches!(self, Classification::NotRelevant)
    }
}

/// Pure decision over (broadcast, response, destination, pid, capabilities).
pub fn classify(env: &MeshEnvelope, this_node: NodeId, caps: &NodeCapabilities) -> Classification {
    if env.is_broadcast() {
        return Classification::Broadcast;
    }
    if env.dest_id() != this_node {
        return Classification::NotRelevant;
    }
    if env.is_response() {
        return Classification::Response;
    }
    if env.pid() == MessageKind::ExecuteCommand {
        if caps.allow_remote_commands {
            Classification::Execute
        } else {
            Classification::CommandDenied
        }
    } else {
        Classification::Observed
    }
}

/// Render an envelope as one host line: `src:<id>;dst:<id|*>;<kind>:<payload>`.
///
/// Printable ASCII payloads are copied as text, anything else is hex. The
/// caller clamps the result to the serial line size.
pub fn render_envelope(env: &MeshEnvelope) -> String {
    let dst = if env.is_broadcast() {
        "*".to_string()
    } else {
        env.dest_id().to_string()
    };
    let payload = env.payload();
    let body = if !payload.is_empty() && payload.iter().all(|b| (0x20..=0x7e).contains(b)) {
        String::from_utf8_lossy(payload).into_owned()
    } else {
        payload.iter().map(|b| format!("{:02x}", b)).collect()
    };
    let rsp = if env.is_response() { ";rsp" } else { "" };
    format!(
        "src:{};dst:{}{};{}:{}",
        env.source_id(),
        dst,
        rsp,
        env.pid().label(),
        body
    )
}

pub struct MessageRouter {
    caps: NodeCapabilities,
    mesh: Arc<MeshGateway>,
    serial: Arc<SerialTransport>,
    executor: Arc<dyn CommandExecutor>,
}

impl MessageRouter {
    pub fn new(
        caps: NodeCapabilities,
        mesh: Arc<MeshGateway>,
        serial: Arc<SerialTransport>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        MessageRouter {
            caps,
            mesh,
            serial,
            executor,
        }
    }

    /// Classify and act on one inbound envelope. The envelope is only
    /// borrowed for the duration of the call.
    pub async fn on_envelope(&self, env: &MeshEnvelope) -> Classification {
        let class = classify(env, self.mesh.this_node_id(), &self.caps);
        match class {
            Classification::NotRelevant => {
                metrics::inc_envelopes_dropped();
                trace!(
                    "drop {} -> {} ({}), not for us",
                    env.source_id(),
                    env.dest_id(),
                    env.pid().label()
                );
                return class;
            }
            Classification::Execute => {
                debug!(
                    "remote command from {}: {}",
                    env.source_id(),
                    escape_log(env.payload())
                );
                self.executor.execute(CommandRequest {
                    payload: env.payload().to_vec(),
                    needs_reply: true,
                    reply_to: env.source_id(),
                });
                metrics::inc_commands_executed();
            }
            Classification::CommandDenied => {
                debug!(
                    "remote command from {} ignored: remote commands disabled",
                    env.source_id()
                );
                metrics::inc_commands_denied();
            }
            _ => {}
        }
        metrics::inc_envelopes_relevant();

        if self.caps.bridge_mesh_to_serial {
            let line = render_envelope(env);
            if let Err(e) = self.serial.write(line.as_bytes()).await {
                warn!("bridge to serial failed: {}", e);
            }
        }
        class
    }

    /// Deliver an asynchronous command result: one serial line, plus a mesh
    /// response when the request came over the mesh. Results that do not
    /// fit a serial line are rejected whole.
    pub async fn on_command_result(&self, result: CommandResult) -> Result<(), RouterError> {
        let line = match SerialLine::exact(&result.text) {
            Ok(line) => line,
            Err(e) => {
                metrics::inc_oversize_results();
                warn!("command result dropped: {}", e);
                return Err(e.into());
            }
        };
        if let Some(dest) = result.reply_to {
            let reply = MeshEnvelope::new(
                self.mesh.this_node_id(),
                dest,
                Control::response(),
                MessageKind::ExecuteCommand,
                line.payload(),
            )?;
            self.mesh.send(reply)?;
        }
        self.serial.write_line(line).await?;
        Ok(())
    }
}
