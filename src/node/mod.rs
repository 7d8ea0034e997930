//! # Node Runtime
//!
//! Wires the node core together and drives it from one event loop:
//!
//! - scheduler ticks at `node.tick_ms`,
//! - inbound mesh envelopes (woken by the gateway's inbound signal),
//! - bytes typed by the serial host,
//! - asynchronous command results,
//! - control messages (shutdown).
//!
//! Everything mutable is owned by the loop, so handlers never race each
//! other. Collaborators outside the loop (radio driver, serial reader
//! thread) only talk to it through the handles in [`NodeHandles`].
//!
//! ```rust,no_run
//! use meshnode::config::Config;
//! use meshnode::mesh::{LoopbackRadio, NodeId};
//! use meshnode::node::NodeRuntime;
//! use meshnode::scheduler::NoPower;
//! use meshnode::serial::StdoutLink;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let radio = LoopbackRadio::new(NodeId(config.node.node_id));
//!     let (node, _handles) = NodeRuntime::new(
//!         &config,
//!         Box::new(radio),
//!         Box::new(StdoutLink::new()),
//!         Box::new(NoPower),
//!     )?;
//!     node.with_tick_limit(10).run().await;
//!     Ok(())
//! }
//! ```
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::{Config, ConfigError, JobConfig, JobKind, NodeCapabilities};
use crate::mesh::{InboundSink, MeshEnvelope, MeshGateway, MeshRadio, MessageKind};
use crate::router::{BuiltinCommands, CommandResult, HostAction, HostCommands, MessageRouter};
use crate::scheduler::{is_due, PeriodicScheduler, PowerControl, SchedulerError};
use crate::serial::{SerialLink, SerialTransport};
use crate::telemetry::{AliveJob, SensorReportJob, SimulatedSensor};

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("job setup failed: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Messages that steer the runtime from outside the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Shutdown,
}

/// Producer handles for collaborators running outside the event loop.
#[derive(Debug, Clone)]
pub struct NodeHandles {
    /// Radio driver side of the inbound mesh queue.
    pub inbound: InboundSink,
    /// Serial reader side of the host byte stream.
    pub host_bytes: mpsc::UnboundedSender<u8>,
    pub control: mpsc::UnboundedSender<ControlMessage>,
}

/// Counters returned when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u32,
    pub envelopes: u64,
    pub host_lines: u64,
    pub command_results: u64,
}

pub struct NodeRuntime {
    caps: NodeCapabilities,
    tick: std::time::Duration,
    boot_reset: bool,
    mesh: Arc<MeshGateway>,
    scheduler: PeriodicScheduler,
    router: MessageRouter,
    host: HostCommands,
    results_rx: mpsc::UnboundedReceiver<CommandResult>,
    bytes_rx: mpsc::UnboundedReceiver<u8>,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    tick_limit: Option<u32>,
}

/// Build the periodic jobs named in the config. Returns the alive counter
/// when an alive job is configured.
pub fn build_jobs(
    jobs: &[JobConfig],
    mesh: &Arc<MeshGateway>,
    scheduler: &mut PeriodicScheduler,
) -> Result<Option<Arc<AtomicU32>>, SchedulerError> {
    let mut alive_counter = None;
    for job in jobs {
        let periodic = match job.kind {
            JobKind::Alive => {
                let alive = AliveJob::new(mesh.clone());
                alive_counter.get_or_insert_with(|| alive.counter());
                alive.into_job(job.name.clone(), job.period, job.offset)?
            }
            kind => {
                let sensor = SimulatedSensor::new(sensor_kind(kind));
                SensorReportJob::new(Box::new(sensor), mesh.clone()).into_job(
                    job.name.clone(),
                    job.period,
                    job.offset,
                )?
            }
        };
        scheduler.register(periodic)?;
    }
    Ok(alive_counter)
}

fn sensor_kind(kind: JobKind) -> MessageKind {
    match kind {
        JobKind::Bme => MessageKind::Bme,
        JobKind::Light => MessageKind::Light,
        JobKind::Battery => MessageKind::Battery,
        JobKind::Alive => MessageKind::Alive,
    }
}

/// Which configured jobs fire on each of the first `ticks` ticks, skipping
/// idle ticks. Pure; used by the `plan` command.
pub fn schedule_plan(jobs: &[JobConfig], ticks: u32) -> Vec<(u32, Vec<String>)> {
    (0..ticks)
        .filter_map(|t| {
            let due: Vec<String> = jobs
                .iter()
                .filter(|j| is_due(t, j.period, j.offset))
                .map(|j| j.name.clone())
                .collect();
            (!due.is_empty()).then_some((t, due))
        })
        .collect()
}

impl NodeRuntime {
    pub fn new(
        config: &Config,
        radio: Box<dyn MeshRadio>,
        link: Box<dyn SerialLink>,
        power: Box<dyn PowerControl>,
    ) -> Result<(Self, NodeHandles), NodeError> {
        config.validate()?;
        let caps = config.capabilities;

        let mesh = Arc::new(MeshGateway::new(radio, config.node.send_wait()));
        if mesh.this_node_id().0 != config.node.node_id {
            warn!(
                "radio reports node id {} but config says {}; using the radio's",
                mesh.this_node_id(),
                config.node.node_id
            );
        }
        let serial = Arc::new(SerialTransport::new(link, config.serial.write_timeout()));

        let mut scheduler = PeriodicScheduler::new(mesh.clone(), power);
        let alive_counter = build_jobs(&config.jobs, &mesh, &mut scheduler)?;

        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let mut builtin = BuiltinCommands::new(mesh.this_node_id(), results_tx);
        if let Some(counter) = alive_counter {
            builtin = builtin.with_alive_counter(counter);
        }
        let executor = Arc::new(builtin);

        let router = MessageRouter::new(caps, mesh.clone(), serial, executor.clone());
        let host = HostCommands::new(caps, mesh.clone(), executor);

        let (bytes_tx, bytes_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let handles = NodeHandles {
            inbound: mesh.inbound(),
            host_bytes: bytes_tx,
            control: control_tx,
        };

        Ok((
            NodeRuntime {
                caps,
                tick: config.node.tick(),
                boot_reset: config.node.boot_reset,
                mesh,
                scheduler,
                router,
                host,
                results_rx,
                bytes_rx,
                control_rx,
                tick_limit: None,
            },
            handles,
        ))
    }

    /// Stop after `ticks` scheduler ticks.
    pub fn with_tick_limit(mut self, ticks: u32) -> Self {
        self.tick_limit = Some(ticks);
        self
    }

    /// Takes the gateway alone so the `run` future stays `Send`.
    async fn announce_reset(mesh: &MeshGateway) {
        let sent = MeshEnvelope::broadcast(mesh.this_node_id(), MessageKind::Reset, Vec::new())
            .and_then(|env| mesh.send(env));
        match sent {
            Ok(()) => {
                mesh.wait_send_complete().await;
                debug!("boot reset broadcast sent");
            }
            Err(e) => warn!("boot reset not sent: {}", e),
        }
    }

    /// Run until shutdown, ctrl-c or the tick limit.
    pub async fn run(mut self) -> RunSummary {
        info!(
            "node {} up: tick={}ms jobs={} caps={:?}",
            self.mesh.this_node_id(),
            self.tick.as_millis(),
            self.scheduler.jobs().len(),
            self.caps
        );
        if self.boot_reset {
            Self::announce_reset(&self.mesh).await;
        }

        let mut summary = RunSummary::default();
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.scheduler.on_tick().await;
                    summary.ticks = summary.ticks.wrapping_add(1);
                    if !report.sends_completed {
                        debug!("tick {}: sends abandoned", report.tick);
                    }
                    if self.tick_limit.is_some_and(|limit| summary.ticks >= limit) {
                        info!("tick limit reached after {} ticks", summary.ticks);
                        break;
                    }
                }

                _ = self.mesh.inbound_ready() => {
                    for env in self.mesh.receive_pending() {
                        summary.envelopes += 1;
                        self.router.on_envelope(&env).await;
                    }
                }

                Some(byte) = self.bytes_rx.recv() => {
                    if let Some(action) = self.host.on_byte_received(byte) {
                        summary.host_lines += 1;
                        if action == HostAction::Ignored {
                            debug!("host line ignored");
                        }
                    }
                }

                Some(result) = self.results_rx.recv() => {
                    summary.command_results += 1;
                    if let Err(e) = self.router.on_command_result(result).await {
                        warn!("command result not delivered: {}", e);
                    }
                }

                Some(msg) = self.control_rx.recv() => {
                    match msg {
                        ControlMessage::Shutdown => {
                            info!("shutdown requested");
                            break;
                        }
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        info!(
            "node stopped: ticks={} envelopes={} host_lines={} results={}",
            summary.ticks, summary.envelopes, summary.host_lines, summary.command_results
        );
        summary
    }
}
