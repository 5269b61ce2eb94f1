// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub mod command;
pub mod controller;
pub mod request;
pub mod response;
pub mod state;
pub mod wire;
pub mod worker;

/// Alias to reduce type complexity in [`Transport`] and [`Connector`].
pub type IoFuture<'a, T> = Pin<Box<dyn Future<Output = io::Result<T>> + Send + 'a>>;

/// Parameters used to open the serial link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    pub port: String,
    pub baud: u32,
    pub read_timeout: Duration,
    /// Pause after the OS-level open while the controller resets.
    pub settle: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud: 9600,
            read_timeout: Duration::from_secs(1),
            settle: Duration::from_millis(100),
        }
    }
}

/// Byte and line oriented channel to the controller firmware.
///
/// Writers are serialised internally, and reads hold a separate lock, so
/// `send` may be called while another task is blocked in `read_line`.
pub trait Transport: Send + Sync {
    fn port(&self) -> &str;

    /// Write the whole buffer in one critical section.
    fn send<'a>(&'a self, bytes: &'a [u8]) -> IoFuture<'a, ()>;

    /// Bytes received on the host side that have not yet been returned as lines.
    fn bytes_waiting(&self) -> io::Result<usize>;

    /// Next complete line without its terminator, or `None` once `timeout` elapses.
    fn read_line<'a>(&'a self, timeout: Duration) -> IoFuture<'a, Option<String>>;

    /// Closing an already closed transport is a no-op.
    fn close<'a>(&'a self) -> IoFuture<'a, ()>;
}

/// Opens transports for a backend.
pub trait Connector: Send + Sync {
    fn name(&self) -> &str;

    fn list_ports(&self) -> io::Result<Vec<String>>;

    /// Open the link and wait out `settings.settle` before handing it over.
    fn open<'a>(&'a self, settings: &'a LinkSettings) -> IoFuture<'a, Arc<dyn Transport>>;
}

/// An open link, owned by the protocol state machine.
#[derive(Clone)]
pub struct ConnectionHandle {
    settings: LinkSettings,
    transport: Arc<dyn Transport>,
}

impl ConnectionHandle {
    pub fn new(settings: LinkSettings, transport: Arc<dyn Transport>) -> Self {
        Self {
            settings,
            transport,
        }
    }

    pub fn port(&self) -> &str {
        &self.settings.port
    }

    pub fn baud(&self) -> u32 {
        self.settings.baud
    }

    pub fn read_timeout(&self) -> Duration {
        self.settings.read_timeout
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("port", &self.settings.port)
            .field("baud", &self.settings.baud)
            .field("read_timeout", &self.settings.read_timeout)
            .finish()
    }
}
