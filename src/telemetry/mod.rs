//! Telemetry jobs: read a sensor, broadcast the raw reading, log it.
//!
//! Readings stay fixed-point end to end. Every value is a raw integer with
//! a sensor-specific divisor, and only the diagnostic log line converts to
//! floating point. A faulty read is still transmitted unchanged so the
//! telemetry cadence seen by the mesh never depends on sensor health.
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{info, warn};
use rand::Rng;

use crate::mesh::{MeshEnvelope, MeshGateway, MessageKind};
use crate::scheduler::{PeriodicJob, SchedulerError};

/// One scaled integer field of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawValue {
    pub name: &'static str,
    pub raw: i64,
    /// Encoded width in bytes (2 or 4), little-endian.
    pub width: u8,
    /// `raw / divisor` is the value in `unit`.
    pub divisor: u32,
    pub unit: &'static str,
}

impl RawValue {
    pub fn new(name: &'static str, raw: i64, width: u8, divisor: u32, unit: &'static str) -> Self {
        RawValue {
            name,
            raw,
            width,
            divisor,
            unit,
        }
    }

    fn display_value(&self) -> f64 {
        self.raw as f64 / f64::from(self.divisor.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub kind: MessageKind,
    pub values: Vec<RawValue>,
    /// Set by the driver when the bus transfer or the sensor reported an error.
    pub fault: bool,
}

impl Reading {
    /// Temperature in 1/100 degC, humidity in 1/1024 %, pressure in 1/25600 hPa.
    pub fn bme(temperature: i32, humidity: u32, pressure: u32) -> Self {
        Reading {
            kind: MessageKind::Bme,
            values: vec![
                RawValue::new("temperature", temperature.into(), 4, 100, "C"),
                RawValue::new("humidity", humidity.into(), 4, 1024, "%"),
                RawValue::new("pressure", pressure.into(), 4, 256 * 100, "hPa"),
            ],
            fault: false,
        }
    }

    pub fn light(milli_lux: u32) -> Self {
        Reading {
            kind: MessageKind::Light,
            values: vec![RawValue::new("light", milli_lux.into(), 4, 1000, "lux")],
            fault: false,
        }
    }

    pub fn battery(millivolts: u16) -> Self {
        Reading {
            kind: MessageKind::Battery,
            values: vec![RawValue::new("battery", millivolts.into(), 2, 1000, "V")],
            fault: false,
        }
    }

    pub fn with_fault(mut self) -> Self {
        self.fault = true;
        self
    }

    /// Payload bytes: each raw value little-endian at its width.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.values.len() * 4);
        for v in &self.values {
            let bytes = v.raw.to_le_bytes();
            out.extend_from_slice(&bytes[..usize::from(v.width)]);
        }
        out
    }

    /// Human readable form for the diagnostic log.
    pub fn describe(&self) -> String {
        self.values
            .iter()
            .map(|v| format!("{} = {:.2} {}", v.name, v.display_value(), v.unit))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Sensor register driver as seen by the node core.
pub trait Sensor: Send {
    fn measure(&mut self) -> Reading;
}

/// Reads one sensor and broadcasts the raw reading.
pub struct SensorReportJob {
    sensor: Box<dyn Sensor>,
    mesh: Arc<MeshGateway>,
}

impl SensorReportJob {
    pub fn new(sensor: Box<dyn Sensor>, mesh: Arc<MeshGateway>) -> Self {
        SensorReportJob { sensor, mesh }
    }

    pub fn run(&mut self) {
        let reading = self.sensor.measure();
        if reading.fault {
            warn!("{} read reported a fault, transmitting as read", reading.kind.label());
        }
        let sent = MeshEnvelope::broadcast(self.mesh.this_node_id(), reading.kind, reading.encode())
            .and_then(|env| self.mesh.send(env));
        if let Err(e) = sent {
            warn!("{} report not sent: {}", reading.kind.label(), e);
        }
        info!("{}", reading.describe());
    }

    pub fn into_job(
        mut self,
        name: impl Into<String>,
        period: u32,
        offset: u32,
    ) -> Result<PeriodicJob, SchedulerError> {
        PeriodicJob::new(name, period, offset, move || self.run())
    }
}

/// Keep-alive broadcast carrying an incrementing counter.
pub struct AliveJob {
    count: Arc<AtomicU32>,
    mesh: Arc<MeshGateway>,
}

impl AliveJob {
    pub fn new(mesh: Arc<MeshGateway>) -> Self {
        AliveJob {
            count: Arc::new(AtomicU32::new(0)),
            mesh,
        }
    }

    /// Shared view of the number of alive messages sent so far.
    pub fn counter(&self) -> Arc<AtomicU32> {
        self.count.clone()
    }

    pub fn run(&mut self) -> u32 {
        let n = self.count.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let node = self.mesh.this_node_id();
        let sent = MeshEnvelope::broadcast(node, MessageKind::Alive, n.to_le_bytes().to_vec())
            .and_then(|env| self.mesh.send(env));
        if let Err(e) = sent {
            warn!("alive not sent: {}", e);
        }
        info!("id:{}:alive:{}", node, n);
        n
    }

    pub fn into_job(
        mut self,
        name: impl Into<String>,
        period: u32,
        offset: u32,
    ) -> Result<PeriodicJob, SchedulerError> {
        PeriodicJob::new(name, period, offset, move || {
            self.run();
        })
    }
}

/// Sensor stand-in producing plausible values with a small random walk.
pub struct SimulatedSensor {
    kind: MessageKind,
    state: [i64; 3],
}

impl SimulatedSensor {
    pub fn new(kind: MessageKind) -> Self {
        let state = match kind {
            MessageKind::Bme => [2150, 50 * 1024, 101_325 * 256],
            MessageKind::Light => [350_000, 0, 0],
            MessageKind::Battery => [3_000, 0, 0],
            _ => [0, 0, 0],
        };
        SimulatedSensor { kind, state }
    }
}

impl Sensor for SimulatedSensor {
    fn measure(&mut self) -> Reading {
        let mut rng = rand::thread_rng();
        match self.kind {
            MessageKind::Bme => {
                self.state[0] = (self.state[0] + rng.gen_range(-5..=5)).clamp(-4000, 8500);
                self.state[1] = (self.state[1] + rng.gen_range(-256..=256)).clamp(0, 100 * 1024);
                self.state[2] =
                    (self.state[2] + rng.gen_range(-2560..=2560)).clamp(0, i64::from(u32::MAX));
                Reading::bme(self.state[0] as i32, self.state[1] as u32, self.state[2] as u32)
            }
            MessageKind::Light => {
                self.state[0] =
                    (self.state[0] + rng.gen_range(-5_000..=5_000)).clamp(0, 188_000_000);
                Reading::light(self.state[0] as u32)
            }
            _ => {
                // battery drains slowly, never below the brown-out level
                self.state[0] = (self.state[0] - rng.gen_range(0..=1)).max(1_800);
                Reading::battery(self.state[0] as u16)
            }
        }
    }
}
