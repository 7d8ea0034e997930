mod common;

use std::sync::Arc;
use std::time::Duration;

use common::RecordingExecutor;
use meshnode::config::NodeCapabilities;
use meshnode::mesh::frame::FrameError;
use meshnode::mesh::{LoopbackRadio, MeshGateway, MessageKind, NodeId};
use meshnode::router::{BuiltinCommands, HostAction, HostCommands};
use tokio::sync::mpsc;

fn caps(accept: bool) -> NodeCapabilities {
    NodeCapabilities {
        allow_remote_commands: false,
        bridge_mesh_to_serial: true,
        accept_serial_commands: accept,
    }
}

fn feed(host: &mut HostCommands, line: &str) -> Vec<HostAction> {
    line.bytes().filter_map(|b| host.on_byte_received(b)).collect()
}

#[test]
fn tmsg_line_injects_frame_into_mesh() {
    let radio = LoopbackRadio::new(NodeId(23));
    let sent = radio.sent_log();
    let mesh = Arc::new(MeshGateway::new(Box::new(radio), Duration::from_millis(10)));
    let executor = Arc::new(RecordingExecutor::default());
    let mut host = HostCommands::new(caps(true), mesh, executor.clone());

    let actions = feed(&mut host, "tmsg 0x07 0x71 0x0D 0x41 0x19 0x06 0xD0\r\n");
    assert_eq!(actions, vec![HostAction::FrameSent]);
    assert!(executor.requests.lock().unwrap().is_empty());

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let env = &sent[0];
    assert_eq!(env.pid(), MessageKind::Dimmer);
    assert_eq!(env.source_id(), NodeId(0x41));
    assert_eq!(env.dest_id(), NodeId(0x19));
    assert_eq!(env.payload(), &[0x06u8, 0xD0]);
    assert!(!env.is_broadcast());
    assert!(!env.is_response());
}

#[test]
fn malformed_tmsg_is_rejected() {
    let radio = LoopbackRadio::new(NodeId(23));
    let sent = radio.sent_log();
    let mesh = Arc::new(MeshGateway::new(Box::new(radio), Duration::from_millis(10)));
    let mut host = HostCommands::new(caps(true), mesh, Arc::new(RecordingExecutor::default()));

    let actions = feed(&mut host, "tmsg 0x07 0xZZ\n");
    assert!(matches!(
        actions.as_slice(),
        [HostAction::Rejected(FrameError::BadHexToken(_))]
    ));
    let actions = feed(&mut host, "tmsg 0x09 0x71 0x0D 0x41 0x19\n");
    assert!(matches!(
        actions.as_slice(),
        [HostAction::Rejected(FrameError::SizeMismatch { .. })]
    ));
    assert!(sent.lock().unwrap().is_empty());
}

#[test]
fn plain_line_runs_locally_without_mesh_reply() {
    let mesh = Arc::new(MeshGateway::new(
        Box::new(LoopbackRadio::new(NodeId(23))),
        Duration::from_millis(10),
    ));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let builtin = Arc::new(BuiltinCommands::new(NodeId(23), tx));
    let mut host = HostCommands::new(caps(true), mesh, builtin);

    assert_eq!(feed(&mut host, "ping\r"), vec![HostAction::Executed]);
    let result = rx.try_recv().unwrap();
    assert_eq!(result.text, b"pong");
    assert_eq!(result.reply_to, None);
    assert_eq!(host.bytes_seen(), 5);
}

#[test]
fn serial_commands_can_be_disabled() {
    let mesh = Arc::new(MeshGateway::new(
        Box::new(LoopbackRadio::new(NodeId(23))),
        Duration::from_millis(10),
    ));
    let executor = Arc::new(RecordingExecutor::default());
    let mut host = HostCommands::new(caps(false), mesh, executor.clone());
    assert_eq!(feed(&mut host, "ping\n"), vec![HostAction::Ignored]);
    assert!(executor.requests.lock().unwrap().is_empty());
}

#[test]
fn blank_lines_are_not_actions() {
    let mesh = Arc::new(MeshGateway::new(
        Box::new(LoopbackRadio::new(NodeId(23))),
        Duration::from_millis(10),
    ));
    let mut host = HostCommands::new(caps(true), mesh, Arc::new(RecordingExecutor::default()));
    assert!(feed(&mut host, "\r\n\r\n").is_empty());
}
