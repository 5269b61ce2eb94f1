// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Simulated monochromator firmware for development and testing.
//!
//! Answers the host protocol in memory with the same wording as the real
//! controller board. No hardware or serial port required.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use mono_core::{Connector, IoFuture, LinkSettings, Transport};

/// Behaviour of the simulated firmware.
#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Name of the single port the simulator advertises.
    pub port: String,
    /// Lines queued as soon as the port is opened.
    pub banner: Vec<String>,
    pub home_time: Duration,
    pub grating_time: Duration,
    pub travel_time: Duration,
    pub min_wavelength: f64,
    pub max_wavelength: f64,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            port: "sim".to_string(),
            banner: vec![
                "Monochromator controller v2.1".to_string(),
                "Stepper driver ready.".to_string(),
                "Send 'home' to start.".to_string(),
            ],
            home_time: Duration::from_millis(1500),
            grating_time: Duration::from_millis(500),
            travel_time: Duration::from_secs(2),
            min_wavelength: 200.0,
            max_wavelength: 1100.0,
        }
    }
}

#[derive(Default)]
struct ProbeShared {
    written: Mutex<Vec<u8>>,
    fail_read: AtomicBool,
    fail_write: AtomicBool,
    muted: AtomicBool,
    opened: AtomicUsize,
    closed: AtomicBool,
}

/// Test hook into every transport opened by one [`SimConnector`].
#[derive(Clone, Default)]
pub struct SimProbe {
    shared: Arc<ProbeShared>,
}

impl SimProbe {
    /// Every line the host has written so far.
    pub fn written_lines(&self) -> Vec<String> {
        let bytes = self
            .shared
            .written
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn bytes_written(&self) -> usize {
        self.shared
            .written
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn fail_next_read(&self) {
        self.shared.fail_read.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_write(&self) {
        self.shared.fail_write.store(true, Ordering::SeqCst);
    }

    /// A muted firmware swallows commands without answering.
    pub fn set_muted(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Whether the most recently opened transport has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

/// Connector for the simulated firmware.
pub struct SimConnector {
    options: SimOptions,
    probe: SimProbe,
}

impl SimConnector {
    pub fn new(options: SimOptions) -> Self {
        Self {
            options,
            probe: SimProbe::default(),
        }
    }

    pub fn probe(&self) -> SimProbe {
        self.probe.clone()
    }
}

impl Connector for SimConnector {
    fn name(&self) -> &str {
        "sim"
    }

    fn list_ports(&self) -> io::Result<Vec<String>> {
        Ok(vec![self.options.port.clone()])
    }

    fn open<'a>(&'a self, settings: &'a LinkSettings) -> IoFuture<'a, Arc<dyn Transport>> {
        Box::pin(async move {
            if settings.port != self.options.port {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no simulated device on {}", settings.port),
                ));
            }
            tokio::time::sleep(settings.settle).await;

            let transport = SimTransport::new(self.options.clone(), self.probe.clone());
            transport.outbox.emit_all(&self.options.banner);
            self.probe.shared.opened.fetch_add(1, Ordering::SeqCst);
            self.probe.shared.closed.store(false, Ordering::SeqCst);
            info!("Simulated firmware listening on {}", settings.port);
            Ok(Arc::new(transport) as Arc<dyn Transport>)
        })
    }
}

/// Firmware side of the link: lines queued here are read by the host.
#[derive(Clone)]
struct Outbox {
    tx: mpsc::UnboundedSender<String>,
    pending: Arc<AtomicUsize>,
}

impl Outbox {
    fn emit(&self, line: impl Into<String>) {
        let line = line.into();
        self.pending.fetch_add(line.len() + 2, Ordering::SeqCst);
        if self.tx.send(line).is_err() {
            debug!("Simulated firmware output dropped");
        }
    }

    fn emit_all(&self, lines: &[String]) {
        for line in lines {
            self.emit(line.clone());
        }
    }

    fn emit_after(&self, delay: Duration, line: String) -> JoinHandle<()> {
        let outbox = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            outbox.emit(line);
        })
    }
}

#[derive(Default)]
struct Firmware {
    awaiting_mode: bool,
    travel: Option<JoinHandle<()>>,
}

struct SimTransport {
    options: SimOptions,
    probe: SimProbe,
    outbox: Outbox,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    firmware: Mutex<Firmware>,
    closed: AtomicBool,
}

impl SimTransport {
    fn new(options: SimOptions, probe: SimProbe) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            options,
            probe,
            outbox: Outbox {
                tx,
                pending: Arc::new(AtomicUsize::new(0)),
            },
            inbox: tokio::sync::Mutex::new(rx),
            firmware: Mutex::new(Firmware::default()),
            closed: AtomicBool::new(false),
        }
    }

    fn not_connected(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotConnected,
            format!("{} is closed", self.options.port),
        )
    }

    fn handle_line(&self, line: &str) {
        let mut firmware = self.firmware.lock().unwrap_or_else(|e| e.into_inner());

        if firmware.awaiting_mode {
            firmware.awaiting_mode = false;
            let reply = match line {
                "0" => "VIS grating in place. Grating mode selected.",
                "1" => "IR grating in place. Grating mode selected.",
                "2" => "Switch mode active. Grating mode selected.",
                _ => "Invalid grating mode.",
            };
            self.outbox
                .emit_after(self.options.grating_time, reply.to_string());
            return;
        }

        match line.split_once(' ').unwrap_or((line, "")) {
            ("home", _) => {
                self.outbox.emit("Homing the motor...");
                self.outbox.emit_after(
                    self.options.home_time,
                    "Homing complete. You can now select the grating you wish to operate with."
                        .to_string(),
                );
            }
            ("mode_selected", _) => firmware.awaiting_mode = true,
            ("wavelength_selected", value) => {
                let value = value.trim();
                match value.parse::<f64>() {
                    Ok(nm)
                        if nm >= self.options.min_wavelength
                            && nm <= self.options.max_wavelength =>
                    {
                        if let Some(previous) = firmware.travel.take() {
                            previous.abort();
                        }
                        self.outbox.emit(format!("Moving to {} nm...", value));
                        firmware.travel = Some(self.outbox.emit_after(
                            self.options.travel_time,
                            "Wavelength reached. You can now enter a new wavelength or choose another grating to work with."
                                .to_string(),
                        ));
                    }
                    _ => self.outbox.emit(format!(
                        "Invalid wavelength, please enter a value between {} and {} nm.",
                        self.options.min_wavelength, self.options.max_wavelength
                    )),
                }
            }
            ("stop", _) => {
                if let Some(travel) = firmware.travel.take() {
                    travel.abort();
                }
                self.outbox.emit("Emergency stop initiated.");
            }
            _ => self.outbox.emit(format!("Unknown command: {}", line)),
        }
    }
}

impl Transport for SimTransport {
    fn port(&self) -> &str {
        &self.options.port
    }

    fn send<'a>(&'a self, bytes: &'a [u8]) -> IoFuture<'a, ()> {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(self.not_connected());
            }
            let shared = &self.probe.shared;
            if shared.fail_write.swap(false, Ordering::SeqCst) {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "simulated write fault",
                ));
            }
            shared
                .written
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend_from_slice(bytes);
            if shared.muted.load(Ordering::SeqCst) {
                return Ok(());
            }
            for line in String::from_utf8_lossy(bytes).lines() {
                let line = line.trim();
                if !line.is_empty() {
                    self.handle_line(line);
                }
            }
            Ok(())
        })
    }

    fn bytes_waiting(&self) -> io::Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.not_connected());
        }
        Ok(self.outbox.pending.load(Ordering::SeqCst))
    }

    fn read_line<'a>(&'a self, wait: Duration) -> IoFuture<'a, Option<String>> {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(self.not_connected());
            }
            if self.probe.shared.fail_read.swap(false, Ordering::SeqCst) {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "simulated read fault",
                ));
            }
            let mut inbox = self.inbox.lock().await;
            match tokio::time::timeout(wait, inbox.recv()).await {
                Ok(Some(line)) => {
                    self.outbox
                        .pending
                        .fetch_sub(line.len() + 2, Ordering::SeqCst);
                    Ok(Some(line))
                }
                Ok(None) => Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "simulated firmware went away",
                )),
                Err(_) if self.closed.load(Ordering::SeqCst) => Err(self.not_connected()),
                Err(_) => Ok(None),
            }
        })
    }

    fn close<'a>(&'a self) -> IoFuture<'a, ()> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            let mut firmware = self.firmware.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(travel) = firmware.travel.take() {
                travel.abort();
            }
            self.probe.shared.closed.store(true, Ordering::SeqCst);
            info!("Simulated firmware on {} closed", self.options.port);
            Ok(())
        })
    }
}
