//! Serial link backed by a real port (USB CDC ACM or UART adapter).
//!
//! Writes run on the blocking pool and signal completion when the bytes have
//! been flushed to the OS driver. Reads run on a dedicated thread that
//! forwards every received byte to the node's event loop.
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{debug, error, warn};
use serialport::SerialPort;
use tokio::sync::mpsc;

use super::{SerialError, SerialLink, WriteCompletion};

type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;

pub struct SerialPortLink {
    port: SharedPort,
}

/// Open `port_name` and return the write link plus a reader clone.
pub fn open(port_name: &str, baud_rate: u32) -> Result<(SerialPortLink, Box<dyn SerialPort>)> {
    let port = serialport::new(port_name, baud_rate)
        .timeout(Duration::from_millis(100))
        .open()
        .map_err(|e| anyhow!("Failed to open serial port {}: {}", port_name, e))?;
    let reader = port
        .try_clone()
        .map_err(|e| anyhow!("Failed to clone serial port {}: {}", port_name, e))?;
    debug!("Serial port {} opened at {} baud", port_name, baud_rate);
    Ok((
        SerialPortLink {
            port: Arc::new(Mutex::new(port)),
        },
        reader,
    ))
}

impl SerialLink for SerialPortLink {
    fn start_write(&mut self, bytes: &[u8], done: WriteCompletion) -> Result<(), SerialError> {
        let port = self.port.clone();
        let bytes = bytes.to_vec();
        let write = move || {
            let mut guard = port.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.write_all(&bytes).and_then(|_| guard.flush()) {
                Ok(()) => {
                    done.complete();
                }
                // no completion: the transport's bounded wait recovers
                Err(e) => warn!("serial write {:?} failed: {}", done.token(), e),
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(write);
            }
            Err(_) => write(),
        }
        Ok(())
    }
}

/// Forward received bytes to `bytes_tx` until the channel closes.
pub fn spawn_reader(
    mut port: Box<dyn SerialPort>,
    bytes_tx: mpsc::UnboundedSender<u8>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buf = [0u8; 256];
        loop {
            match port.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    for &b in &buf[..n] {
                        if bytes_tx.send(b).is_err() {
                            debug!("serial reader: event loop gone, stopping");
                            return;
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    if bytes_tx.is_closed() {
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("serial reader error: {} - stopping", e);
                    return;
                }
            }
        }
    })
}
