//! Serial port transport
//!
//! Ports are opened with `serialport` in raw 8N1 mode, so every byte the
//! device sends (ETX included) reaches the parser unchanged. The port is
//! blocking; two threads move bytes between it and the async halves handed
//! to the connector:
//!
//! ```text
//! port ──read thread──▶ mpsc ──▶ SerialReader (AsyncRead)
//! port ◀─write thread── mpsc ◀── SerialWriter (AsyncWrite)
//! ```
//!
//! Dropping the async halves ends both threads.

use super::{LinkReader, LinkWriter};
use crate::error::LinkError;
use serialport::{DataBits, FlowControl, Parity, StopBits};
use std::io::{self, Read, Write};
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

/// Baud rate of the common HC-05/HC-06 Bluetooth modules
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// How long a blocking read waits before checking whether the link closed
const READ_POLL: Duration = Duration::from_millis(100);

const READ_CHUNK: usize = 256;

/// Chunks read from the port and not yet consumed
const INBOUND_QUEUE: usize = 64;

/// Open a serial device and return its async halves
pub async fn open(path: &Path, baud_rate: u32) -> Result<(LinkReader, LinkWriter), LinkError> {
    let device = path.display().to_string();
    let connect_failed = |reason: String| LinkError::ConnectFailed {
        device: device.clone(),
        reason,
    };

    let port_name = path.to_string_lossy().into_owned();
    let opened = tokio::task::spawn_blocking(move || {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_POLL)
            .open()?;
        let write_port = port.try_clone()?;
        Ok::<_, serialport::Error>((port, write_port))
    })
    .await
    .map_err(|e| connect_failed(e.to_string()))?;
    let (read_port, write_port) = opened.map_err(|e| connect_failed(e.to_string()))?;

    tracing::debug!("Opened {} at {} baud (8N1, raw)", device, baud_rate);
    bridge(read_port, write_port, &device).map_err(|e| connect_failed(e.to_string()))
}

/// Start the pump threads for a pair of blocking port handles
fn bridge<R, W>(read_port: R, write_port: W, device: &str) -> io::Result<(LinkReader, LinkWriter)>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    thread::Builder::new()
        .name(format!("serial-rx {}", device))
        .spawn(move || pump_inbound(read_port, inbound_tx))?;
    thread::Builder::new()
        .name(format!("serial-tx {}", device))
        .spawn(move || pump_outbound(write_port, outbound_rx))?;

    Ok((
        Box::new(SerialReader::new(inbound_rx)),
        Box::new(SerialWriter { tx: outbound_tx }),
    ))
}

/// Copy port input into the channel until the port fails or the reader is dropped
fn pump_inbound<R: Read>(mut port: R, tx: mpsc::Sender<io::Result<Vec<u8>>>) {
    let mut buf = [0u8; READ_CHUNK];
    while !tx.is_closed() {
        match port.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                break;
            }
        }
    }
    tracing::trace!("Serial read thread stopped");
}

/// Write queued chunks to the port until the writer is dropped or a write fails
fn pump_outbound<W: Write>(mut port: W, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(bytes) = rx.blocking_recv() {
        if let Err(e) = port.write_all(&bytes).and_then(|_| port.flush()) {
            tracing::warn!("Serial write failed: {}", e);
            break;
        }
    }
    tracing::trace!("Serial write thread stopped");
}

/// Read half fed by the read thread
struct SerialReader {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    chunk: Vec<u8>,
    offset: usize,
}

impl SerialReader {
    fn new(rx: mpsc::Receiver<io::Result<Vec<u8>>>) -> Self {
        Self {
            rx,
            chunk: Vec::new(),
            offset: 0,
        }
    }
}

impl AsyncRead for SerialReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.offset == self.chunk.len() {
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.chunk = chunk;
                    self.offset = 0;
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                // Read thread gone: end of stream
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }

        let n = buf.remaining().min(self.chunk.len() - self.offset);
        let start = self.offset;
        buf.put_slice(&self.chunk[start..start + n]);
        self.offset += n;
        Poll::Ready(Ok(()))
    }
}

/// Write half drained by the write thread
struct SerialWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl AsyncWrite for SerialWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.tx.send(buf.to_vec()) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "serial write thread stopped",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
