//! Mesh gateway facade over the radio collaborator.
//!
//! The radio owns packet encoding, channel access and multi-hop delivery.
//! The gateway adds the pieces the node core relies on:
//!
//! * a fixed node identity, read once from the radio,
//! * fire-and-forget `send` with an in-flight counter that the radio
//!   decrements through a [`SendCompletion`] when the air transfer ends,
//! * a bounded [`MeshGateway::wait_send_complete`] that gives up after the
//!   send-wait budget and resets the counter so the next tick starts clean,
//! * an inbound queue the radio fills through an [`InboundSink`] and the
//!   node drains with [`MeshGateway::receive_pending`].
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::sync::{mpsc, watch, Notify};

use super::{frame, MeshEnvelope, MeshError, NodeId};
use crate::logutil::hex_snippet;
use crate::metrics;

/// Radio collaborator as seen by the node core.
pub trait MeshRadio: Send {
    fn node_id(&self) -> NodeId;

    /// Start transmitting `envelope`. The radio must call `done.complete()`
    /// once the transfer has left the device (from any thread, any time).
    fn transmit(&mut self, envelope: &MeshEnvelope, done: SendCompletion) -> Result<(), MeshError>;
}

#[derive(Debug, Clone, Copy, Default)]
struct TxState {
    in_flight: usize,
    /// Bumped whenever a stalled wait force-clears `in_flight`; completions
    /// issued before the bump are ignored.
    epoch: u64,
}

/// One-shot completion notice for a single transmit.
#[derive(Debug)]
pub struct SendCompletion {
    state: Arc<watch::Sender<TxState>>,
    epoch: u64,
}

impl SendCompletion {
    pub fn complete(self) {
        let epoch = self.epoch;
        self.state.send_modify(|s| {
            if s.epoch == epoch {
                s.in_flight = s.in_flight.saturating_sub(1);
            } else {
                trace!("late send completion ignored (epoch {} != {})", epoch, s.epoch);
            }
        });
    }
}

/// Producer side of the inbound queue, handed to the radio driver.
#[derive(Debug, Clone)]
pub struct InboundSink {
    tx: mpsc::UnboundedSender<MeshEnvelope>,
    signal: Arc<Notify>,
}

impl InboundSink {
    /// Queue a received envelope. Returns false once the gateway is gone.
    pub fn deliver(&self, envelope: MeshEnvelope) -> bool {
        let ok = self.tx.send(envelope).is_ok();
        if ok {
            self.signal.notify_one();
        }
        ok
    }
}

pub struct MeshGateway {
    node_id: NodeId,
    radio: Mutex<Box<dyn MeshRadio>>,
    tx_state: Arc<watch::Sender<TxState>>,
    send_wait: Duration,
    inbound_tx: mpsc::UnboundedSender<MeshEnvelope>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<MeshEnvelope>>,
    inbound_signal: Arc<Notify>,
}

impl MeshGateway {
    pub fn new(radio: Box<dyn MeshRadio>, send_wait: Duration) -> Self {
        let (state_tx, _) = watch::channel(TxState::default());
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        MeshGateway {
            node_id: radio.node_id(),
            radio: Mutex::new(radio),
            tx_state: Arc::new(state_tx),
            send_wait,
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            inbound_signal: Arc::new(Notify::new()),
        }
    }

    pub fn this_node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn send_wait(&self) -> Duration {
        self.send_wait
    }

    /// Hand an envelope to the radio without waiting for the air transfer.
    pub fn send(&self, envelope: MeshEnvelope) -> Result<(), MeshError> {
        let mut epoch = 0;
        self.tx_state.send_modify(|s| {
            s.in_flight += 1;
            epoch = s.epoch;
        });
        let done = SendCompletion {
            state: self.tx_state.clone(),
            epoch,
        };
        trace!(
            "mesh tx {} -> {} {} [{}]",
            envelope.source_id(),
            envelope.dest_id(),
            envelope.pid().label(),
            hex_snippet(&frame::encode(&envelope), 32)
        );
        let result = self
            .radio
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .transmit(&envelope, done);
        match result {
            Ok(()) => {
                metrics::inc_mesh_sent();
                Ok(())
            }
            Err(e) => {
                // the radio never started, so nobody will complete this send
                self.tx_state.send_modify(|s| {
                    if s.epoch == epoch {
                        s.in_flight = s.in_flight.saturating_sub(1);
                    }
                });
                Err(e)
            }
        }
    }

    /// Number of sends the radio has not completed yet.
    pub fn sends_in_flight(&self) -> usize {
        self.tx_state.borrow().in_flight
    }

    /// Wait until every started send has completed, bounded by the send-wait
    /// budget. Returns false when the budget ran out; pending sends are then
    /// forgotten so the caller can move on.
    pub async fn wait_send_complete(&self) -> bool {
        let mut rx = self.tx_state.subscribe();
        let completed = matches!(
            tokio::time::timeout(self.send_wait, rx.wait_for(|s| s.in_flight == 0)).await,
            Ok(Ok(_))
        );
        if !completed {
            let mut abandoned = 0;
            self.tx_state.send_modify(|s| {
                abandoned = s.in_flight;
                s.in_flight = 0;
                s.epoch = s.epoch.wrapping_add(1);
            });
            metrics::inc_mesh_send_stalls();
            warn!(
                "mesh send stalled: {} send(s) not completed within {}ms, continuing",
                abandoned,
                self.send_wait.as_millis()
            );
        }
        completed
    }

    /// Producer handle for the radio driver.
    pub fn inbound(&self) -> InboundSink {
        InboundSink {
            tx: self.inbound_tx.clone(),
            signal: self.inbound_signal.clone(),
        }
    }

    /// Resolves once at least one envelope was delivered since the last wake.
    pub async fn inbound_ready(&self) {
        self.inbound_signal.notified().await
    }

    /// Drain queued inbound envelopes without blocking. May be empty.
    pub fn receive_pending(&self) -> Vec<MeshEnvelope> {
        let mut rx = self
            .inbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut out = Vec::new();
        while let Ok(env) = rx.try_recv() {
            out.push(env);
        }
        if !out.is_empty() {
            debug!("mesh rx: drained {} envelope(s)", out.len());
        }
        out
    }
}

/// Radio stand-in used when no mesh hardware is attached: frames are logged
/// and, after an optional airtime delay, reported as sent.
pub struct LoopbackRadio {
    node_id: NodeId,
    airtime: Duration,
    sent: Arc<Mutex<Vec<MeshEnvelope>>>,
}

impl LoopbackRadio {
    pub fn new(node_id: NodeId) -> Self {
        LoopbackRadio {
            node_id,
            airtime: Duration::ZERO,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_airtime(mut self, airtime: Duration) -> Self {
        self.airtime = airtime;
        self
    }

    /// Shared log of every transmitted envelope.
    pub fn sent_log(&self) -> Arc<Mutex<Vec<MeshEnvelope>>> {
        self.sent.clone()
    }
}

impl MeshRadio for LoopbackRadio {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn transmit(&mut self, envelope: &MeshEnvelope, done: SendCompletion) -> Result<(), MeshError> {
        debug!(
            "loopback radio: {} bytes ({})",
            frame::HEADER_LEN + envelope.payload_length(),
            envelope.pid().label()
        );
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope.clone());
        if self.airtime.is_zero() {
            done.complete();
            return Ok(());
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let airtime = self.airtime;
                handle.spawn(async move {
                    tokio::time::sleep(airtime).await;
                    done.complete();
                });
            }
            Err(_) => done.complete(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MessageKind;

    struct SilentRadio {
        parked: Vec<SendCompletion>,
    }

    impl MeshRadio for SilentRadio {
        fn node_id(&self) -> NodeId {
            NodeId(9)
        }
        fn transmit(&mut self, _: &MeshEnvelope, done: SendCompletion) -> Result<(), MeshError> {
            self.parked.push(done);
            Ok(())
        }
    }

    struct DeadRadio;

    impl MeshRadio for DeadRadio {
        fn node_id(&self) -> NodeId {
            NodeId(2)
        }
        fn transmit(&mut self, _: &MeshEnvelope, _: SendCompletion) -> Result<(), MeshError> {
            Err(MeshError::Radio("tx fifo full".into()))
        }
    }

    fn alive() -> MeshEnvelope {
        MeshEnvelope::broadcast(NodeId(9), MessageKind::Alive, vec![1, 0, 0, 0]).unwrap()
    }

    #[tokio::test]
    async fn loopback_send_completes_immediately() {
        let gw = MeshGateway::new(
            Box::new(LoopbackRadio::new(NodeId(3))),
            Duration::from_millis(50),
        );
        assert_eq!(gw.this_node_id(), NodeId(3));
        gw.send(alive()).unwrap();
        assert_eq!(gw.sends_in_flight(), 0);
        assert!(gw.wait_send_complete().await);
    }

    #[tokio::test]
    async fn stalled_send_times_out_and_resets() {
        let gw = MeshGateway::new(
            Box::new(SilentRadio { parked: Vec::new() }),
            Duration::from_millis(20),
        );
        gw.send(alive()).unwrap();
        assert_eq!(gw.sends_in_flight(), 1);
        let started = std::time::Instant::now();
        assert!(!gw.wait_send_complete().await);
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(gw.sends_in_flight(), 0);
        // next wait has nothing outstanding
        assert!(gw.wait_send_complete().await);
    }

    #[tokio::test]
    async fn delayed_airtime_is_awaited() {
        let radio = LoopbackRadio::new(NodeId(4)).with_airtime(Duration::from_millis(10));
        let gw = MeshGateway::new(Box::new(radio), Duration::from_millis(500));
        gw.send(alive()).unwrap();
        assert!(gw.wait_send_complete().await);
    }

    #[tokio::test]
    async fn inbound_queue_drains_in_order() {
        let gw = MeshGateway::new(
            Box::new(LoopbackRadio::new(NodeId(1))),
            Duration::from_millis(10),
        );
        assert!(gw.receive_pending().is_empty());
        let sink = gw.inbound();
        for n in 0..3u8 {
            let env = MeshEnvelope::broadcast(NodeId(n), MessageKind::Text, vec![n]).unwrap();
            assert!(sink.deliver(env));
        }
        gw.inbound_ready().await;
        let got: Vec<u8> = gw
            .receive_pending()
            .iter()
            .map(|e| e.source_id().0)
            .collect();
        assert_eq!(got, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn refused_send_is_not_counted_in_flight() {
        let gw = MeshGateway::new(Box::new(DeadRadio), Duration::from_millis(20));
        assert!(matches!(gw.send(alive()), Err(MeshError::Radio(_))));
        assert_eq!(gw.sends_in_flight(), 0);
        assert!(gw.wait_send_complete().await);
    }
}
