//! Process-wide node counters.
//!
//! Counters are plain relaxed atomics: they feed the `stats` command and
//! periodic debug logs, never control flow.
use std::sync::atomic::{AtomicU64, Ordering};

static TICKS: AtomicU64 = AtomicU64::new(0);
static JOBS_FIRED: AtomicU64 = AtomicU64::new(0);
static MESH_SENT: AtomicU64 = AtomicU64::new(0);
static MESH_SEND_STALLS: AtomicU64 = AtomicU64::new(0);
static ENVELOPES_RELEVANT: AtomicU64 = AtomicU64::new(0);
static ENVELOPES_DROPPED: AtomicU64 = AtomicU64::new(0);
static COMMANDS_EXECUTED: AtomicU64 = AtomicU64::new(0);
static COMMANDS_DENIED: AtomicU64 = AtomicU64::new(0);
static SERIAL_WRITES: AtomicU64 = AtomicU64::new(0);
static SERIAL_STALLS: AtomicU64 = AtomicU64::new(0);
static SERIAL_TRUNCATIONS: AtomicU64 = AtomicU64::new(0);
static OVERSIZE_RESULTS: AtomicU64 = AtomicU64::new(0);

pub fn inc_ticks() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_jobs_fired() {
    JOBS_FIRED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_mesh_sent() {
    MESH_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_mesh_send_stalls() {
    MESH_SEND_STALLS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_envelopes_relevant() {
    ENVELOPES_RELEVANT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_envelopes_dropped() {
    ENVELOPES_DROPPED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_commands_executed() {
    COMMANDS_EXECUTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_commands_denied() {
    COMMANDS_DENIED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_serial_writes() {
    SERIAL_WRITES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_serial_stalls() {
    SERIAL_STALLS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_serial_truncations() {
    SERIAL_TRUNCATIONS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_oversize_results() {
    OVERSIZE_RESULTS.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub ticks: u64,
    pub jobs_fired: u64,
    pub mesh_sent: u64,
    pub mesh_send_stalls: u64,
    pub envelopes_relevant: u64,
    pub envelopes_dropped: u64,
    pub commands_executed: u64,
    pub commands_denied: u64,
    pub serial_writes: u64,
    pub serial_stalls: u64,
    pub serial_truncations: u64,
    pub oversize_results: u64,
}

impl Snapshot {
    /// Compact form that fits a single 64-byte serial line for typical values.
    pub fn compact(&self) -> String {
        format!(
            "t:{};tx:{};st:{};rx:{};dr:{};sw:{};ss:{}",
            self.ticks,
            self.mesh_sent,
            self.mesh_send_stalls,
            self.envelopes_relevant,
            self.envelopes_dropped,
            self.serial_writes,
            self.serial_stalls
        )
    }
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        ticks: TICKS.load(Ordering::Relaxed),
        jobs_fired: JOBS_FIRED.load(Ordering::Relaxed),
        mesh_sent: MESH_SENT.load(Ordering::Relaxed),
        mesh_send_stalls: MESH_SEND_STALLS.load(Ordering::Relaxed),
        envelopes_relevant: ENVELOPES_RELEVANT.load(Ordering::Relaxed),
        envelopes_dropped: ENVELOPES_DROPPED.load(Ordering::Relaxed),
        commands_executed: COMMANDS_EXECUTED.load(Ordering::Relaxed),
        commands_denied: COMMANDS_DENIED.load(Ordering::Relaxed),
        serial_writes: SERIAL_WRITES.load(Ordering::Relaxed),
        serial_stalls: SERIAL_STALLS.load(Ordering::Relaxed),
        serial_truncations: SERIAL_TRUNCATIONS.load(Ordering::Relaxed),
        oversize_results: OVERSIZE_RESULTS.load(Ordering::Relaxed),
    }
}
