mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{RecordingExecutor, RecordingLink};
use meshnode::config::NodeCapabilities;
use meshnode::mesh::{Control, LoopbackRadio, MeshEnvelope, MeshGateway, MessageKind, NodeId};
use meshnode::router::{Classification, CommandResult, MessageRouter, RouterError};
use meshnode::serial::SerialTransport;

const ME: u8 = 23;

struct Fixture {
    router: MessageRouter,
    serial: RecordingLink,
    sent: Arc<Mutex<Vec<MeshEnvelope>>>,
    executor: Arc<RecordingExecutor>,
}

fn fixture(allow_remote: bool, bridge: bool) -> Fixture {
    let radio = LoopbackRadio::new(NodeId(ME));
    let sent = radio.sent_log();
    let mesh = Arc::new(MeshGateway::new(Box::new(radio), Duration::from_millis(50)));
    let serial = RecordingLink::default();
    let transport = Arc::new(SerialTransport::new(
        Box::new(serial.clone()),
        Duration::from_millis(100),
    ));
    let executor = Arc::new(RecordingExecutor::default());
    let caps = NodeCapabilities {
        allow_remote_commands: allow_remote,
        bridge_mesh_to_serial: bridge,
        accept_serial_commands: false,
    };
    Fixture {
        router: MessageRouter::new(caps, mesh, transport, executor.clone()),
        serial,
        sent,
        executor,
    }
}

fn command_to(dest: u8, text: &[u8]) -> MeshEnvelope {
    MeshEnvelope::new(
        NodeId(7),
        NodeId(dest),
        Control::unicast(),
        MessageKind::ExecuteCommand,
        text.to_vec(),
    )
    .unwrap()
}

#[tokio::test]
async fn broadcast_is_bridged_on_gateway() {
    let f = fixture(false, true);
    let env = MeshEnvelope::broadcast(NodeId(5), MessageKind::Text, b"hello".to_vec()).unwrap();
    assert_eq!(f.router.on_envelope(&env).await, Classification::Broadcast);
    assert_eq!(f.serial.lines(), vec!["src:5;dst:*;text:hello\r\n"]);
}

#[tokio::test]
async fn denied_command_is_still_bridged_but_not_executed() {
    let f = fixture(false, true);
    let class = f.router.on_envelope(&command_to(ME, b"ping")).await;
    assert_eq!(class, Classification::CommandDenied);
    assert!(f.executor.requests.lock().unwrap().is_empty());
    assert_eq!(f.serial.lines(), vec!["src:7;dst:23;cmd:ping\r\n"]);
}

#[tokio::test]
async fn allowed_command_is_executed_with_reply_address() {
    let f = fixture(true, false);
    let class = f.router.on_envelope(&command_to(ME, b"ping")).await;
    assert_eq!(class, Classification::Execute);
    let reqs = f.executor.requests.lock().unwrap();
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].payload, b"ping");
    assert!(reqs[0].needs_reply);
    assert_eq!(reqs[0].reply_to, NodeId(7));
}

#[tokio::test]
async fn unicast_for_another_node_has_no_side_effects() {
    let f = fixture(true, true);
    let class = f.router.on_envelope(&command_to(24, b"ping")).await;
    assert_eq!(class, Classification::NotRelevant);
    assert!(f.executor.requests.lock().unwrap().is_empty());
    assert!(f.serial.lines().is_empty());
    assert!(f.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn non_gateway_never_touches_serial() {
    let f = fixture(false, false);
    let env = MeshEnvelope::broadcast(NodeId(5), MessageKind::Alive, 3u32.to_le_bytes().to_vec())
        .unwrap();
    assert!(f.router.on_envelope(&env).await.is_relevant());
    assert!(f.serial.lines().is_empty());
}

#[tokio::test]
async fn response_is_delivered_not_executed() {
    let f = fixture(true, true);
    let env = MeshEnvelope::new(
        NodeId(7),
        NodeId(ME),
        Control::response(),
        MessageKind::ExecuteCommand,
        b"pong".to_vec(),
    )
    .unwrap();
    assert_eq!(f.router.on_envelope(&env).await, Classification::Response);
    assert!(f.executor.requests.lock().unwrap().is_empty());
    assert_eq!(f.serial.lines(), vec!["src:7;dst:23;rsp;cmd:pong\r\n"]);
}

#[tokio::test]
async fn long_bridged_line_is_clamped_with_marker() {
    let f = fixture(false, true);
    let env = MeshEnvelope::broadcast(NodeId(5), MessageKind::Text, vec![b'x'; 100]).unwrap();
    f.router.on_envelope(&env).await;
    let writes = f.serial.writes.lock().unwrap();
    assert_eq!(writes[0].len(), 66);
    assert_eq!(writes[0][63], b'>');
    assert!(writes[0].ends_with(b"\r\n"));
}

#[tokio::test]
async fn remote_result_goes_to_mesh_and_serial() {
    let f = fixture(true, true);
    f.router
        .on_command_result(CommandResult {
            text: b"pong".to_vec(),
            reply_to: Some(NodeId(7)),
        })
        .await
        .unwrap();
    let sent = f.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].dest_id(), NodeId(7));
    assert_eq!(sent[0].source_id(), NodeId(ME));
    assert!(sent[0].is_response());
    assert!(!sent[0].is_broadcast());
    assert_eq!(sent[0].pid(), MessageKind::ExecuteCommand);
    assert_eq!(sent[0].payload(), b"pong");
    assert_eq!(f.serial.lines(), vec!["pong\r\n"]);
}

#[tokio::test]
async fn host_result_goes_to_serial_only() {
    let f = fixture(true, true);
    f.router
        .on_command_result(CommandResult {
            text: b"id:23".to_vec(),
            reply_to: None,
        })
        .await
        .unwrap();
    assert!(f.sent.lock().unwrap().is_empty());
    assert_eq!(f.serial.lines(), vec!["id:23\r\n"]);
}

#[tokio::test]
async fn oversize_result_is_rejected_whole() {
    let f = fixture(true, true);
    let err = f
        .router
        .on_command_result(CommandResult {
            text: vec![b'r'; 65],
            reply_to: Some(NodeId(7)),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::Line(_)));
    assert!(f.sent.lock().unwrap().is_empty());
    assert!(f.serial.lines().is_empty());

    // exactly one line's worth is fine
    f.router
        .on_command_result(CommandResult {
            text: vec![b'r'; 64],
            reply_to: None,
        })
        .await
        .unwrap();
    assert_eq!(f.serial.writes.lock().unwrap()[0].len(), 66);
}

#[tokio::test]
async fn result_with_embedded_newline_stays_one_line() {
    let f = fixture(true, true);
    f.router
        .on_command_result(CommandResult {
            text: b"unknown:a\nb".to_vec(),
            reply_to: Some(NodeId(7)),
        })
        .await
        .unwrap();
    assert_eq!(f.serial.lines(), vec!["unknown:a b\r\n"]);
    assert_eq!(f.sent.lock().unwrap()[0].payload(), b"unknown:a b");
}
