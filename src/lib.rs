//! # Meshnode - Sensor Node Core for Low-Power Radio Meshes
//!
//! Meshnode is the control core of a battery-powered sensor node that lives in
//! a multi-hop radio mesh and, on gateway nodes, bridges mesh traffic to a
//! serial host.
//!
//! ## Features
//!
//! - **Duty-Cycled Scheduler**: One fixed-rate tick multiplexes every periodic job, with phase offsets to spread work across ticks.
//! - **Telemetry Jobs**: Environmental, light, battery and keep-alive reports broadcast as raw fixed-point payloads.
//! - **Message Routing**: A small decision table over broadcast/response/destination/pid decides what each envelope means for this node.
//! - **Serial Bridge**: Bounded-wait, single-pending-write host link with 64-byte lines and an explicit truncation marker.
//! - **Host Commands**: Lines typed on the serial host are executed locally or injected into the mesh as `tmsg` frames.
//! - **Async Design**: Built with Tokio; one event loop owns all mutable node state.
//!
//! ## Quick Start
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
//!     let config = Config::load("meshnode.toml").await?;
//!     let radio = LoopbackRadio::new(NodeId(config.node.node_id));
//!     let (node, _handles) = NodeRuntime::new(
//!         &config,
//!         Box::new(radio),
//!         Box::new(StdoutLink::new()),
//!         Box::new(NoPower),
//!     )?;
//!     node.run().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Configuration loading, defaults and validation
//! - [`mesh`] - Envelopes, frame codec and the mesh gateway facade
//! - [`serial`] - Serial host transport and line handling
//! - [`scheduler`] - Periodic, duty-cycled job scheduler
//! - [`telemetry`] - Sensor report and keep-alive jobs
//! - [`router`] - Inbound envelope routing and command execution
//! - [`node`] - Runtime wiring and the event loop
//! - [`metrics`] - Process-wide counters
//! - [`logutil`] - Log-safe rendering of raw bytes
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐      ┌─────────────────┐
//! │   Scheduler     │      │  Host commands  │ ← serial input
//! │ (telemetry jobs)│      └─────────────────┘
//! └─────────────────┘               │
//!          │                        │
//! ┌─────────────────┐      ┌─────────────────┐
//! │  Mesh gateway   │ ───► │ Message router  │
//! └─────────────────┘      └─────────────────┘
//!                                   │
//!                          ┌─────────────────┐
//!                          │ Serial transport│ → serial host
//!                          └─────────────────┘
//! ```

pub mod config;
pub mod logutil;
pub mod mesh;
pub mod metrics;
pub mod node;
pub mod router;
pub mod scheduler;
pub mod serial;
pub mod telemetry;
