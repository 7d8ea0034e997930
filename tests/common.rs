//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use meshnode::mesh::{MeshEnvelope, MeshError, MeshRadio, NodeId, SendCompletion};
use meshnode::router::{CommandExecutor, CommandRequest};
use meshnode::scheduler::PowerControl;
use meshnode::serial::{SerialError, SerialLink, WriteCompletion};

/// Serial link that records every write. Completes at once unless parked.
#[derive(Clone, Default)]
pub struct RecordingLink {
    pub writes: Arc<Mutex<Vec<Vec<u8>>>>,
    pub parked: Arc<Mutex<Vec<WriteCompletion>>>,
    pub park: bool,
}

impl RecordingLink {
    pub fn parking() -> Self {
        RecordingLink {
            park: true,
            ..Default::default()
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }
}

impl SerialLink for RecordingLink {
    fn start_write(&mut self, bytes: &[u8], done: WriteCompletion) -> Result<(), SerialError> {
        self.writes.lock().unwrap().push(bytes.to_vec());
        if self.park {
            self.parked.lock().unwrap().push(done);
        } else {
            done.complete();
        }
        Ok(())
    }
}

/// Radio that accepts every send and never reports completion.
pub struct SilentRadio {
    pub id: NodeId,
    pub sent: Arc<Mutex<Vec<MeshEnvelope>>>,
    parked: Vec<SendCompletion>,
}

impl SilentRadio {
    pub fn new(id: u8) -> Self {
        SilentRadio {
            id: NodeId(id),
            sent: Arc::new(Mutex::new(Vec::new())),
            parked: Vec::new(),
        }
    }
}

impl MeshRadio for SilentRadio {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn transmit(&mut self, envelope: &MeshEnvelope, done: SendCompletion) -> Result<(), MeshError> {
        self.sent.lock().unwrap().push(envelope.clone());
        self.parked.push(done);
        Ok(())
    }
}

/// Power domain that appends "up"/"down" to a shared event log.
pub struct PowerLog {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl PowerControl for PowerLog {
    fn power_up(&mut self) {
        self.events.lock().unwrap().push("up".into());
    }
    fn power_down(&mut self) {
        self.events.lock().unwrap().push("down".into());
    }
}

/// Executor that only records what it was asked to run.
#[derive(Default)]
pub struct RecordingExecutor {
    pub requests: Mutex<Vec<CommandRequest>>,
}

impl CommandExecutor for RecordingExecutor {
    fn execute(&self, request: CommandRequest) {
        self.requests.lock().unwrap().push(request);
    }
}
