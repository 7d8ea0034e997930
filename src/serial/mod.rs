//! # Serial Host Transport
//!
//! Outbound path from the node to a serial host (USB CDC or UART bridge).
//!
//! The link collaborator accepts one write at a time and reports completion
//! asynchronously. [`SerialTransport`] keeps exactly one pending write:
//!
//! 1. wait for the previous write's completion flag, bounded by
//!    `write_timeout` (100ms by default),
//! 2. on timeout, force the flag back to complete and carry on (the earlier
//!    frame may be lost or interleaved; the node keeps running),
//! 3. clamp the payload to a 64-byte [`SerialLine`], clear the flag and start
//!    the new write.
//!
//! The pending write is tracked as a `watch` channel holding the token of the
//! write in flight, so the link may signal from a driver thread, a spawned
//! task or the same task. A completion only counts when its token is the one
//! in flight; a late notice for a write that was already forced past is
//! dropped.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use meshnode::serial::{SerialTransport, StdoutLink};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = SerialTransport::new(Box::new(StdoutLink::new()), Duration::from_millis(100));
//!     transport.write(b"id:23;alive:1").await?;
//!     Ok(())
//! }
//! ```

pub mod line;
#[cfg(feature = "serial")]
pub mod port;

pub use line::{LineAssembler, LineError, SerialLine, MAX_LINE_PAYLOAD, TRUNCATION_MARKER};

use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{trace, warn};
use tokio::sync::{watch, Mutex};

use crate::logutil::escape_log;
use crate::metrics;

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("serial link I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial link closed")]
    Closed,

    #[error(transparent)]
    Line(#[from] LineError),
}

/// Identifies one started write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriteToken(pub u32);

/// Token of the write in flight, `None` when the link is idle.
type PendingSlot = Arc<watch::Sender<Option<WriteToken>>>;

fn finish(pending: &watch::Sender<Option<WriteToken>>, token: WriteToken) -> bool {
    pending.send_if_modified(|slot| {
        if *slot == Some(token) {
            *slot = None;
            true
        } else {
            trace!("stale serial completion {:?} ignored (in flight: {:?})", token, slot);
            false
        }
    })
}

/// Completion notice for the write identified by `token`.
#[derive(Debug, Clone)]
pub struct WriteCompletion {
    token: WriteToken,
    pending: PendingSlot,
}

impl WriteCompletion {
    pub fn token(&self) -> WriteToken {
        self.token
    }

    /// Mark this write complete. Safe to call from any thread. Returns false
    /// when a newer write has replaced it.
    pub fn complete(&self) -> bool {
        trace!("serial write {:?} complete", self.token);
        finish(&self.pending, self.token)
    }
}

/// Link collaborator: starts a write and later calls `done.complete()`.
pub trait SerialLink: Send {
    fn start_write(&mut self, bytes: &[u8], done: WriteCompletion) -> Result<(), SerialError>;
}

/// What a call to [`SerialTransport::write`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub token: WriteToken,
    /// Payload was clamped and carries the truncation marker.
    pub truncated: bool,
    /// The previous write never completed; its flag was forced.
    pub forced: bool,
}

pub struct SerialTransport {
    link: Mutex<Box<dyn SerialLink>>,
    pending: PendingSlot,
    next_token: AtomicU32,
    write_timeout: Duration,
}

impl SerialTransport {
    pub fn new(link: Box<dyn SerialLink>, write_timeout: Duration) -> Self {
        let (pending, _) = watch::channel(None);
        SerialTransport {
            link: Mutex::new(link),
            pending: Arc::new(pending),
            next_token: AtomicU32::new(1),
            write_timeout,
        }
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// True when no write is in flight.
    pub fn is_write_complete(&self) -> bool {
        self.pending.borrow().is_none()
    }

    /// Token of the write in flight, if any.
    pub fn pending_write(&self) -> Option<WriteToken> {
        *self.pending.borrow()
    }

    /// Notification entry point for links that report completion by token
    /// rather than through the handle they were given. Tokens other than
    /// the one in flight are ignored.
    pub fn on_write_complete(&self, token: WriteToken) -> bool {
        trace!("serial write {:?} reported complete", token);
        finish(&self.pending, token)
    }

    /// Write one line, clamped to [`MAX_LINE_PAYLOAD`] bytes plus `\r\n`.
    pub async fn write(&self, payload: &[u8]) -> Result<WriteOutcome, SerialError> {
        self.write_line(SerialLine::clamped(payload)).await
    }

    /// Write a prepared line, waiting (bounded) for the previous write first.
    pub async fn write_line(&self, line: SerialLine) -> Result<WriteOutcome, SerialError> {
        let mut link = self.link.lock().await;

        let mut rx = self.pending.subscribe();
        let completed = matches!(
            tokio::time::timeout(self.write_timeout, rx.wait_for(Option::is_none)).await,
            Ok(Ok(_))
        );
        if !completed {
            metrics::inc_serial_stalls();
            let abandoned = self.pending.send_replace(None);
            warn!(
                "serial write stalled: {:?} not complete after {}ms, forcing",
                abandoned,
                self.write_timeout.as_millis()
            );
        }

        if line.was_truncated() {
            metrics::inc_serial_truncations();
        }
        let token = WriteToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.pending.send_replace(Some(token));
        let done = WriteCompletion {
            token,
            pending: self.pending.clone(),
        };
        trace!("serial tx {:?}: {}", token, escape_log(line.as_bytes()));
        if let Err(e) = link.start_write(line.as_bytes(), done) {
            // nothing is in flight, so do not make the next writer wait
            finish(&self.pending, token);
            return Err(e);
        }
        metrics::inc_serial_writes();
        Ok(WriteOutcome {
            token,
            truncated: line.was_truncated(),
            forced: !completed,
        })
    }
}

/// Link that writes lines to the process stdout and completes at once.
/// Used when the node runs without a serial port.
#[derive(Debug, Default)]
pub struct StdoutLink;

impl StdoutLink {
    pub fn new() -> Self {
        StdoutLink
    }
}

impl SerialLink for StdoutLink {
    fn start_write(&mut self, bytes: &[u8], done: WriteCompletion) -> Result<(), SerialError> {
        let mut out = std::io::stdout().lock();
        out.write_all(bytes)?;
        out.flush()?;
        done.complete();
        Ok(())
    }
}
