// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! In-memory transport used by the controller tests.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::device::{wire, Connector, IoFuture, LinkSettings, Transport};

type Responder = Box<dyn Fn(&str) -> Vec<String> + Send + Sync>;

struct Shared {
    tx: mpsc::UnboundedSender<String>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    pending: AtomicUsize,
    written: Mutex<Vec<u8>>,
    responder: Mutex<Option<Responder>>,
    fail_read: AtomicBool,
    fail_write: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

#[derive(Clone)]
pub(crate) struct ScriptedTransport {
    shared: Arc<Shared>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                tx,
                rx: tokio::sync::Mutex::new(rx),
                pending: AtomicUsize::new(0),
                written: Mutex::new(Vec::new()),
                responder: Mutex::new(None),
                fail_read: AtomicBool::new(false),
                fail_write: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                close_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Transport answering like the documented firmware.
    ///
    /// `wavelength_selected 99999` is rejected and `wavelength_selected hold`
    /// never finishes on its own.
    pub(crate) fn with_firmware() -> Self {
        let transport = Self::new();
        transport.respond_with(|line| {
            let reply: &[&str] = match line {
                "home" => &["Homing the motor...", "Homing complete. You can now select the grating you wish to operate with."],
                "mode_selected" => &[],
                "0" | "1" | "2" => &["Grating in place.", wire::GRATING_SELECTED],
                "stop" => &[wire::STOP_ACK],
                "wavelength_selected 99999" => &["Invalid wavelength, please enter a value between 200 and 1100."],
                "wavelength_selected hold" => &["Moving..."],
                l if l.starts_with("wavelength_selected") => &["Moving...", "Wavelength reached. You can now enter a new wavelength or choose another grating to work with."],
                _ => &["Unknown command"],
            };
            reply.iter().map(|s| s.to_string()).collect()
        });
        transport
    }

    pub(crate) fn respond_with(&self, f: impl Fn(&str) -> Vec<String> + Send + Sync + 'static) {
        *self.shared.responder.lock().unwrap() = Some(Box::new(f));
    }

    pub(crate) fn emit<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for line in lines {
            let line = line.into();
            self.shared.pending.fetch_add(line.len() + 1, Ordering::SeqCst);
            let _ = self.shared.tx.send(line);
        }
    }

    /// Every line written by the host so far.
    pub(crate) fn written_lines(&self) -> Vec<String> {
        let bytes = self.shared.written.lock().unwrap();
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub(crate) fn bytes_written(&self) -> usize {
        self.shared.written.lock().unwrap().len()
    }

    pub(crate) fn fail_next_read(&self) {
        self.shared.fail_read.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_write(&self) {
        self.shared.fail_write.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.shared.close_calls.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    fn port(&self) -> &str {
        "scripted"
    }

    fn send<'a>(&'a self, bytes: &'a [u8]) -> IoFuture<'a, ()> {
        Box::pin(async move {
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
            }
            if self.shared.fail_write.swap(false, Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted write fault"));
            }
            self.shared.written.lock().unwrap().extend_from_slice(bytes);
            let replies: Vec<String> = {
                let responder = self.shared.responder.lock().unwrap();
                match responder.as_ref() {
                    Some(f) => String::from_utf8_lossy(bytes)
                        .lines()
                        .flat_map(|line| f(line.trim()))
                        .collect(),
                    None => Vec::new(),
                }
            };
            self.emit(replies);
            Ok(())
        })
    }

    fn bytes_waiting(&self) -> io::Result<usize> {
        Ok(self.shared.pending.load(Ordering::SeqCst))
    }

    fn read_line<'a>(&'a self, timeout: Duration) -> IoFuture<'a, Option<String>> {
        Box::pin(async move {
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
            }
            if self.shared.fail_read.swap(false, Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted read fault"));
            }
            let mut rx = self.shared.rx.lock().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(line)) => {
                    self.shared.pending.fetch_sub(line.len() + 1, Ordering::SeqCst);
                    Ok(Some(line))
                }
                Ok(None) => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "eof")),
                Err(_) => Ok(None),
            }
        })
    }

    fn close<'a>(&'a self) -> IoFuture<'a, ()> {
        Box::pin(async move {
            self.shared.close_calls.fetch_add(1, Ordering::SeqCst);
            self.shared.closed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Connector handing out a prepared [`ScriptedTransport`].
pub(crate) struct ScriptedConnector {
    transport: ScriptedTransport,
    refuse: bool,
}

impl ScriptedConnector {
    pub(crate) fn new(transport: ScriptedTransport) -> Self {
        Self {
            transport,
            refuse: false,
        }
    }

    pub(crate) fn refusing() -> Self {
        Self {
            transport: ScriptedTransport::new(),
            refuse: true,
        }
    }
}

impl Connector for ScriptedConnector {
    fn name(&self) -> &str {
        "scripted"
    }

    fn list_ports(&self) -> io::Result<Vec<String>> {
        Ok(vec!["scripted".to_string()])
    }

    fn open<'a>(&'a self, settings: &'a LinkSettings) -> IoFuture<'a, Arc<dyn Transport>> {
        Box::pin(async move {
            if self.refuse {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no such port {}", settings.port),
                ));
            }
            Ok(Arc::new(self.transport.clone()) as Arc<dyn Transport>)
        })
    }
}
