//! Duty-cycled periodic scheduler.
//!
//! One fixed-rate tick multiplexes every periodic job of the node. A job with
//! period `p` and phase offset `o` is due on tick `t` when `(t + o) % p == 0`,
//! so jobs sharing a period can be spread over different ticks.
//!
//! Each tick runs, in order:
//!
//! 1. power up the shared peripheral bus (only if something is due),
//! 2. every due job, in registration order,
//! 3. a bounded wait for the sends those jobs started,
//! 4. `tick_count += 1` (wrapping),
//! 5. power the bus back down.
//!
//! The bus therefore never goes down while a send from the same cycle might
//! still be on the air, except when the send-wait budget runs out, in which
//! case the tick moves on regardless.
use std::sync::Arc;

use log::{debug, trace};

use crate::mesh::MeshGateway;
use crate::metrics;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("job '{name}' has a zero period")]
    ZeroPeriod { name: String },

    #[error("job '{name}' offset {offset} must be below its period {period}")]
    OffsetOutOfRange {
        name: String,
        offset: u32,
        period: u32,
    },

    #[error("job '{0}' is already registered")]
    DuplicateJob(String),
}

/// True when a job with `period`/`offset` fires on `tick`.
///
/// Computed in 64 bits so `tick + offset` cannot overflow near the wrap.
pub fn is_due(tick: u32, period: u32, offset: u32) -> bool {
    period != 0 && (u64::from(tick) + u64::from(offset)) % u64::from(period) == 0
}

/// Shared peripheral power domain (sensor bus and its clock).
pub trait PowerControl: Send {
    fn power_up(&mut self);
    fn power_down(&mut self);
}

/// Power domain for nodes without a switchable bus.
#[derive(Debug, Default)]
pub struct NoPower;

impl PowerControl for NoPower {
    fn power_up(&mut self) {
        trace!("bus power up (no-op)");
    }
    fn power_down(&mut self) {
        trace!("bus power down (no-op)");
    }
}

type Action = Box<dyn FnMut() + Send>;

pub struct PeriodicJob {
    name: String,
    period_ticks: u32,
    phase_offset: u32,
    action: Action,
}

impl PeriodicJob {
    pub fn new(
        name: impl Into<String>,
        period_ticks: u32,
        phase_offset: u32,
        action: impl FnMut() + Send + 'static,
    ) -> Result<Self, SchedulerError> {
        let name = name.into();
        if period_ticks == 0 {
            return Err(SchedulerError::ZeroPeriod { name });
        }
        if phase_offset >= period_ticks {
            return Err(SchedulerError::OffsetOutOfRange {
                name,
                offset: phase_offset,
                period: period_ticks,
            });
        }
        Ok(PeriodicJob {
            name,
            period_ticks,
            phase_offset,
            action: Box::new(action),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period_ticks(&self) -> u32 {
        self.period_ticks
    }

    pub fn phase_offset(&self) -> u32 {
        self.phase_offset
    }

    pub fn is_due(&self, tick: u32) -> bool {
        is_due(tick, self.period_ticks, self.phase_offset)
    }
}

impl std::fmt::Debug for PeriodicJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicJob")
            .field("name", &self.name)
            .field("period_ticks", &self.period_ticks)
            .field("phase_offset", &self.phase_offset)
            .finish()
    }
}

/// Outcome of one [`PeriodicScheduler::on_tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number the jobs were evaluated against.
    pub tick: u32,
    /// Names of the jobs that ran, in execution order.
    pub fired: Vec<String>,
    /// Whether the bus was powered for this tick.
    pub powered: bool,
    /// False when the send-wait budget ran out.
    pub sends_completed: bool,
}

pub struct PeriodicScheduler {
    jobs: Vec<PeriodicJob>,
    tick_count: u32,
    mesh: Arc<MeshGateway>,
    power: Box<dyn PowerControl>,
}

impl PeriodicScheduler {
    pub fn new(mesh: Arc<MeshGateway>, power: Box<dyn PowerControl>) -> Self {
        PeriodicScheduler {
            jobs: Vec::new(),
            tick_count: 0,
            mesh,
            power,
        }
    }

    /// Start counting from `tick` instead of 0.
    pub fn with_start_tick(mut self, tick: u32) -> Self {
        self.tick_count = tick;
        self
    }

    /// Add a job. Jobs due on the same tick run in registration order.
    pub fn register(&mut self, job: PeriodicJob) -> Result<(), SchedulerError> {
        if self.jobs.iter().any(|j| j.name == job.name) {
            return Err(SchedulerError::DuplicateJob(job.name));
        }
        debug!(
            "scheduler: registered '{}' period={} offset={}",
            job.name, job.period_ticks, job.phase_offset
        );
        self.jobs.push(job);
        Ok(())
    }

    pub fn tick_count(&self) -> u32 {
        self.tick_count
    }

    pub fn jobs(&self) -> &[PeriodicJob] {
        &self.jobs
    }

    /// Names of the jobs due on `tick`, in execution order.
    pub fn due_on(&self, tick: u32) -> Vec<&str> {
        self.jobs
            .iter()
            .filter(|j| j.is_due(tick))
            .map(|j| j.name.as_str())
            .collect()
    }

    /// Run one scheduler cycle.
    pub async fn on_tick(&mut self) -> TickReport {
        let tick = self.tick_count;
        let powered = self.jobs.iter().any(|j| j.is_due(tick));
        if powered {
            self.power.power_up();
        }

        let mut fired = Vec::new();
        for job in self.jobs.iter_mut().filter(|j| j.is_due(tick)) {
            trace!("tick {}: running '{}'", tick, job.name);
            (job.action)();
            metrics::inc_jobs_fired();
            fired.push(job.name.clone());
        }

        let sends_completed = self.mesh.wait_send_complete().await;

        self.tick_count = self.tick_count.wrapping_add(1);
        metrics::inc_ticks();

        if powered {
            self.power.power_down();
        }
        if !fired.is_empty() {
            debug!("tick {}: fired [{}]", tick, fired.join(","));
        }
        TickReport {
            tick,
            fired,
            powered,
            sends_completed,
        }
    }
}
