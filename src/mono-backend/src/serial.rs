// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Serial link to the controller board.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

use mono_core::{Connector, IoFuture, LinkSettings, Transport};

/// Opens ports through `tokio-serial`.
#[derive(Debug, Default)]
pub struct SerialConnector;

impl SerialConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for SerialConnector {
    fn name(&self) -> &str {
        "serial"
    }

    fn list_ports(&self) -> io::Result<Vec<String>> {
        let ports = tokio_serial::available_ports().map_err(io::Error::from)?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    fn open<'a>(&'a self, settings: &'a LinkSettings) -> IoFuture<'a, Arc<dyn Transport>> {
        Box::pin(async move {
            let stream = tokio_serial::new(&settings.port, settings.baud)
                .timeout(settings.read_timeout)
                .open_native_async()
                .map_err(io::Error::from)?;
            // Opening the port resets the board.
            tokio::time::sleep(settings.settle).await;
            info!("Serial: {} @ {} baud", settings.port, settings.baud);
            Ok(Arc::new(SerialTransport::new(&settings.port, stream)) as Arc<dyn Transport>)
        })
    }
}

struct LineReader {
    inner: BufReader<ReadHalf<SerialStream>>,
    partial: Vec<u8>,
}

struct SerialTransport {
    port: String,
    writer: Mutex<Option<WriteHalf<SerialStream>>>,
    reader: Mutex<Option<LineReader>>,
    closed: AtomicBool,
}

impl SerialTransport {
    fn new(port: &str, stream: SerialStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            port: port.to_string(),
            writer: Mutex::new(Some(write_half)),
            reader: Mutex::new(Some(LineReader {
                inner: BufReader::new(read_half),
                partial: Vec::new(),
            })),
            closed: AtomicBool::new(false),
        }
    }

    fn not_connected(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotConnected,
            format!("{} is closed", self.port),
        )
    }
}

impl Transport for SerialTransport {
    fn port(&self) -> &str {
        &self.port
    }

    fn send<'a>(&'a self, bytes: &'a [u8]) -> IoFuture<'a, ()> {
        Box::pin(async move {
            let mut guard = self.writer.lock().await;
            let writer = match guard.as_mut() {
                Some(writer) if !self.closed.load(Ordering::SeqCst) => writer,
                _ => return Err(self.not_connected()),
            };
            writer.write_all(bytes).await?;
            writer.flush().await?;
            Ok(())
        })
    }

    fn bytes_waiting(&self) -> io::Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.not_connected());
        }
        // A reader blocked in read_line owns the buffer; report nothing.
        match self.reader.try_lock() {
            Ok(guard) => Ok(guard
                .as_ref()
                .map(|r| r.inner.buffer().len() + r.partial.len())
                .unwrap_or(0)),
            Err(_) => Ok(0),
        }
    }

    fn read_line<'a>(&'a self, wait: Duration) -> IoFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut guard = self.reader.lock().await;
            let reader = match guard.as_mut() {
                Some(reader) if !self.closed.load(Ordering::SeqCst) => reader,
                _ => return Err(self.not_connected()),
            };
            let LineReader { inner, partial } = reader;

            // Bytes of an unfinished line stay in `partial` across timeouts.
            let read = timeout(wait, inner.read_until(b'\n', partial)).await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(self.not_connected());
            }
            match read {
                Err(_) => Ok(None),
                Ok(Ok(0)) => Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} reached end of stream", self.port),
                )),
                Ok(Ok(_)) => {
                    let line = String::from_utf8_lossy(partial)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    partial.clear();
                    Ok(Some(line))
                }
                Ok(Err(e)) => Err(e),
            }
        })
    }

    fn close<'a>(&'a self) -> IoFuture<'a, ()> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            if let Some(mut writer) = self.writer.lock().await.take() {
                if let Err(e) = writer.shutdown().await {
                    debug!("Shutdown of {} failed: {}", self.port, e);
                }
            }
            // The read half is released with the transport when a read is pending.
            if let Ok(mut reader) = self.reader.try_lock() {
                reader.take();
            }
            info!("Serial: {} closed", self.port);
            Ok(())
        })
    }
}
