// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Task that owns the [`Monochromator`] and serves requests one at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::device::controller::{DeviceListener, Monochromator, StopHandle};
use crate::device::Connector;
use crate::{
    DeviceState, DynResult, GratingMode, MonoCommand, MonoError, MonoOutcome, MonoRequest,
    MonoResult, MonoSnapshot, StatusLog, WavelengthOutcome,
};

const REQUEST_QUEUE: usize = 32;

struct SnapshotPublisher {
    tx: watch::Sender<MonoSnapshot>,
}

impl DeviceListener for SnapshotPublisher {
    fn on_snapshot(&self, snapshot: &MonoSnapshot) {
        self.tx.send_replace(snapshot.clone());
    }
}

/// Serve requests until every sender is dropped.
///
/// Requests run strictly in arrival order, so at most one command/response
/// exchange is outstanding. Emergency stops should go through a
/// [`StopHandle`] instead of this queue.
pub async fn run_mono_task(
    mut mono: Monochromator,
    mut rx: mpsc::Receiver<MonoRequest>,
) -> DynResult<()> {
    info!("Controller task started ({} connector)", mono.connector().name());

    while let Some(MonoRequest { cmd, respond_to }) = rx.recv().await {
        let cmd_label = format!("{:?}", cmd);
        let started = Instant::now();

        let result = process_command(&mut mono, cmd).await;
        if respond_to.send(result).is_err() {
            debug!("Caller of {} went away before the reply", cmd_label);
        }

        let elapsed = started.elapsed();
        if elapsed > Duration::from_secs(5) {
            warn!("Command {} took {:?}", cmd_label, elapsed);
        } else {
            debug!("Command {} completed in {:?}", cmd_label, elapsed);
        }
    }

    if mono.current_state().is_connected() {
        mono.disconnect().await?;
    }
    info!("Controller task shutting down (channel closed)");
    Ok(())
}

async fn process_command(mono: &mut Monochromator, cmd: MonoCommand) -> MonoResult<MonoOutcome> {
    match cmd {
        MonoCommand::GetSnapshot => Ok(MonoOutcome::Snapshot(mono.snapshot())),
        MonoCommand::Connect(port) => mono.connect(&port).await.map(|_| MonoOutcome::Done),
        MonoCommand::Initialize => mono.initialize().await.map(|_| MonoOutcome::Done),
        MonoCommand::Home => mono.home().await.map(|_| MonoOutcome::Done),
        MonoCommand::GratingAlreadySelected => Ok(MonoOutcome::GratingAlreadySelected(
            mono.grating_already_selected(),
        )),
        MonoCommand::CancelGratingChange => {
            mono.cancel_grating_change();
            Ok(MonoOutcome::Done)
        }
        MonoCommand::SelectGrating(mode) => {
            mono.select_grating(mode).await.map(|_| MonoOutcome::Done)
        }
        MonoCommand::SetWavelength(value) => mono
            .set_wavelength(&value)
            .await
            .map(MonoOutcome::Wavelength),
        MonoCommand::EmergencyStop => mono.emergency_stop().await.map(|_| MonoOutcome::Done),
        MonoCommand::Disconnect => mono.disconnect().await.map(|_| MonoOutcome::Done),
    }
}

/// Start [`run_mono_task`] on the runtime and return a handle to it.
pub fn spawn_worker(mut mono: Monochromator) -> (MonoHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
    let (snapshot_tx, snapshot_rx) = watch::channel(mono.snapshot());
    mono.register_listener(Arc::new(SnapshotPublisher { tx: snapshot_tx }));

    let handle = MonoHandle {
        tx,
        snapshot_rx,
        status: mono.status().clone(),
        stop: mono.stop_handle(),
        connector: mono.connector(),
    };
    let task = tokio::spawn(async move {
        if let Err(e) = run_mono_task(mono, rx).await {
            error!("Controller task error: {:?}", e);
        }
    });
    (handle, task)
}

/// Cloneable client of a running controller task.
#[derive(Clone)]
pub struct MonoHandle {
    tx: mpsc::Sender<MonoRequest>,
    snapshot_rx: watch::Receiver<MonoSnapshot>,
    status: StatusLog,
    stop: StopHandle,
    connector: Arc<dyn Connector>,
}

impl MonoHandle {
    async fn request(&self, cmd: MonoCommand) -> MonoResult<MonoOutcome> {
        let (respond_to, reply) = oneshot::channel();
        self.tx
            .send(MonoRequest { cmd, respond_to })
            .await
            .map_err(|_| task_gone())?;
        reply.await.map_err(|_| task_gone())?
    }

    pub async fn connect(&self, port: impl Into<String>) -> MonoResult<()> {
        self.request(MonoCommand::Connect(port.into())).await.map(drop)
    }

    pub async fn initialize(&self) -> MonoResult<()> {
        self.request(MonoCommand::Initialize).await.map(drop)
    }

    pub async fn home(&self) -> MonoResult<()> {
        self.request(MonoCommand::Home).await.map(drop)
    }

    pub async fn grating_already_selected(&self) -> MonoResult<bool> {
        match self.request(MonoCommand::GratingAlreadySelected).await? {
            MonoOutcome::GratingAlreadySelected(selected) => Ok(selected),
            other => Err(unexpected(other)),
        }
    }

    pub async fn cancel_grating_change(&self) -> MonoResult<()> {
        self.request(MonoCommand::CancelGratingChange).await.map(drop)
    }

    pub async fn select_grating(&self, mode: GratingMode) -> MonoResult<()> {
        self.request(MonoCommand::SelectGrating(mode)).await.map(drop)
    }

    pub async fn set_wavelength(&self, value: impl Into<String>) -> MonoResult<WavelengthOutcome> {
        match self.request(MonoCommand::SetWavelength(value.into())).await? {
            MonoOutcome::Wavelength(outcome) => Ok(outcome),
            other => Err(unexpected(other)),
        }
    }

    /// Send `stop` right away, ahead of any queued request.
    pub async fn emergency_stop(&self) -> MonoResult<()> {
        self.stop.emergency_stop().await
    }

    pub async fn disconnect(&self) -> MonoResult<()> {
        self.request(MonoCommand::Disconnect).await.map(drop)
    }

    /// Snapshot taken by the task after all earlier requests finished.
    pub async fn fetch_snapshot(&self) -> MonoResult<MonoSnapshot> {
        match self.request(MonoCommand::GetSnapshot).await? {
            MonoOutcome::Snapshot(snapshot) => Ok(snapshot),
            other => Err(unexpected(other)),
        }
    }

    /// Latest published snapshot, without waiting on the queue.
    pub fn snapshot(&self) -> MonoSnapshot {
        let mut snapshot = self.snapshot_rx.borrow().clone();
        if self.stop.state() == DeviceState::Disconnected {
            snapshot = MonoSnapshot::default();
        }
        snapshot
    }

    pub fn current_state(&self) -> DeviceState {
        self.snapshot().state
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<MonoSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn status_log(&self) -> Vec<String> {
        self.status.snapshot()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<String> {
        self.status.subscribe()
    }

    pub fn status(&self) -> &StatusLog {
        &self.status
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn list_ports(&self) -> Vec<String> {
        match self.connector.list_ports() {
            Ok(ports) => ports,
            Err(e) => {
                warn!("Port enumeration failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Whether the controller task is still accepting requests.
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl std::fmt::Debug for MonoHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonoHandle")
            .field("connector", &self.connector.name())
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

fn task_gone() -> MonoError {
    MonoError::LinkLost("controller task is not running".to_string())
}

fn unexpected(outcome: MonoOutcome) -> MonoError {
    MonoError::DeviceRejected(format!("unexpected controller reply {:?}", outcome))
}
