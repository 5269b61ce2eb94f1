// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Emergency stop, dispatchable while another exchange is in flight.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::device::command::Operation;
use crate::device::controller::machine::check_state;
use crate::device::controller::reader::{collect_until, drain_pending, Termination};
use crate::device::response::{MonoError, MonoResult};
use crate::device::state::DeviceState;
use crate::device::{wire, Transport};
use crate::status::StatusLog;

/// Link state shared between the controller and its stop handles.
pub(crate) struct LinkShared {
    transport: RwLock<Option<Arc<dyn Transport>>>,
    state: watch::Sender<DeviceState>,
    /// Held for the duration of every command/response exchange.
    pub(crate) exchange: Mutex<()>,
    /// Set when a stop write failed; the controller drops to Disconnected
    /// on its next call.
    pub(crate) lost: AtomicBool,
    /// Wakes an exchange waiting on a link that a stop handle dropped.
    pub(crate) dropped: Notify,
}

impl LinkShared {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(DeviceState::Disconnected);
        Self {
            transport: RwLock::new(None),
            state,
            exchange: Mutex::new(()),
            lost: AtomicBool::new(false),
            dropped: Notify::new(),
        }
    }

    pub(crate) fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn set_transport(&self, transport: Option<Arc<dyn Transport>>) {
        *self.transport.write().unwrap_or_else(|e| e.into_inner()) = transport;
    }

    pub(crate) fn publish_state(&self, state: DeviceState) {
        self.state.send_replace(state);
    }

    pub(crate) fn state(&self) -> DeviceState {
        if self.lost.load(Ordering::SeqCst) {
            DeviceState::Disconnected
        } else {
            *self.state.borrow()
        }
    }

}

/// Cloneable handle that sends `stop` on the controller's link.
///
/// The stop bypasses the one-operation-at-a-time queue. When a wavelength
/// move is in flight the command is only written, and the move's own
/// reader picks up the firmware's acknowledgement. When the link is idle
/// the handle waits for the acknowledgement itself.
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<LinkShared>,
    status: StatusLog,
    ack_wait: Duration,
}

impl StopHandle {
    pub(crate) fn new(shared: Arc<LinkShared>, status: StatusLog, ack_wait: Duration) -> Self {
        Self {
            shared,
            status,
            ack_wait,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.shared.state()
    }

    pub async fn emergency_stop(&self) -> MonoResult<()> {
        let op = Operation::EmergencyStop;
        check_state(op, self.state()).map_err(|e| self.fail(e))?;
        let Some(transport) = self.shared.transport() else {
            return Err(self.fail(MonoError::precondition(
                op.name(),
                DeviceState::Disconnected,
                "COM port is not selected.",
            )));
        };

        let Ok(_guard) = self.shared.exchange.try_lock() else {
            debug!("-> stop");
            if let Err(e) = transport.send(wire::STOP).await {
                return Err(self.link_lost(transport.as_ref(), e).await);
            }
            info!("Emergency stop sent during an active exchange");
            return Ok(());
        };

        if let Err(e) = drain_pending(transport.as_ref(), &self.status).await {
            return Err(self.link_lost(transport.as_ref(), e).await);
        }
        debug!("-> stop");
        if let Err(e) = transport.send(wire::STOP).await {
            return Err(self.link_lost(transport.as_ref(), e).await);
        }

        let acked = collect_until(
            transport.as_ref(),
            Termination::Phrases(&[wire::STOP_ACK]),
            self.ack_wait,
            &self.status,
        )
        .await;
        match acked {
            Ok(_) => {
                info!("Emergency stop acknowledged");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(self.fail(MonoError::Timeout {
                operation: op.name(),
                after: self.ack_wait,
            })),
            Err(e) => Err(self.link_lost(transport.as_ref(), e).await),
        }
    }

    fn fail(&self, err: MonoError) -> MonoError {
        warn!("{}", err);
        self.status.push(err.to_string());
        err
    }

    async fn link_lost(&self, transport: &dyn Transport, err: io::Error) -> MonoError {
        self.shared.lost.store(true, Ordering::SeqCst);
        if let Err(e) = transport.close().await {
            debug!("closing {} after fault: {}", transport.port(), e);
        }
        self.shared.publish_state(DeviceState::Disconnected);
        let err = MonoError::LinkLost(format!("emergency_stop failed: {}", err));
        error!("{}", err);
        self.status.push(err.to_string());
        self.shared.dropped.notify_waiters();
        err
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle")
            .field("state", &self.state())
            .finish()
    }
}
