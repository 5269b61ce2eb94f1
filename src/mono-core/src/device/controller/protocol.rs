// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Host-side protocol controller for the monochromator firmware.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::device::command::Operation;
use crate::device::controller::events::{DeviceEventEmitter, DeviceListener, ListenerId};
use crate::device::controller::machine::{DeviceEvent, DeviceStateMachine};
use crate::device::controller::policies::ExchangePolicy;
use crate::device::controller::reader::{collect_until, drain_pending, ResponseBatch, Termination};
use crate::device::controller::stop::{LinkShared, StopHandle};
use crate::device::response::{MonoError, MonoResult, WavelengthOutcome};
use crate::device::state::{DeviceState, GratingMode, MonoSnapshot};
use crate::device::{wire, ConnectionHandle, Connector, LinkSettings, Transport};
use crate::status::StatusLog;

/// Drives the firmware through connect, initialize, home, grating selection
/// and wavelength moves.
///
/// Each operation checks its precondition against the current state,
/// performs one command/response exchange and applies the resulting
/// transition. Every failure appends exactly one line to the status log.
pub struct Monochromator {
    connector: Arc<dyn Connector>,
    link_defaults: LinkSettings,
    policy: ExchangePolicy,
    machine: DeviceStateMachine,
    link: Option<ConnectionHandle>,
    grating: Option<GratingMode>,
    change_acknowledged: bool,
    status: StatusLog,
    emitter: DeviceEventEmitter,
    shared: Arc<LinkShared>,
}

impl Monochromator {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let status = StatusLog::new();
        status.push("First select a COM port.");
        Self {
            connector,
            link_defaults: LinkSettings::default(),
            policy: ExchangePolicy::default(),
            machine: DeviceStateMachine::new(),
            link: None,
            grating: None,
            change_acknowledged: false,
            status,
            emitter: DeviceEventEmitter::new(),
            shared: Arc::new(LinkShared::new()),
        }
    }

    /// Baud rate, read timeout and settle delay used for every connect.
    /// The port field is ignored.
    pub fn with_link_defaults(mut self, settings: LinkSettings) -> Self {
        self.link_defaults = settings;
        self
    }

    pub fn with_policy(mut self, policy: ExchangePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &ExchangePolicy {
        &self.policy
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::clone(&self.connector)
    }

    pub fn register_listener(&mut self, listener: Arc<dyn DeviceListener>) -> ListenerId {
        self.emitter.register(listener)
    }

    /// Enumerate serial ports the connector can see. Enumeration failures
    /// yield an empty list.
    pub fn list_ports(&self) -> Vec<String> {
        match self.connector.list_ports() {
            Ok(ports) => ports,
            Err(e) => {
                warn!("Port enumeration failed: {}", e);
                Vec::new()
            }
        }
    }

    pub fn current_state(&self) -> DeviceState {
        if self.shared.lost.load(Ordering::SeqCst) {
            DeviceState::Disconnected
        } else {
            self.machine.state()
        }
    }

    pub fn transition_count(&self) -> u64 {
        self.machine.transition_count()
    }

    pub fn snapshot(&self) -> MonoSnapshot {
        let state = self.current_state();
        MonoSnapshot {
            state,
            port: self
                .link
                .as_ref()
                .filter(|_| state.is_connected())
                .map(|link| link.port().to_string()),
            grating: self.grating.filter(|_| state == DeviceState::GratingSelected),
        }
    }

    /// Ordered copy of every status line appended so far.
    pub fn status_log(&self) -> Vec<String> {
        self.status.snapshot()
    }

    /// Shared handle to the status log, for subscribers.
    pub fn status(&self) -> &StatusLog {
        &self.status
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new(
            Arc::clone(&self.shared),
            self.status.clone(),
            self.policy.stop_ack,
        )
    }

    /// Ask whether a grating is already selected.
    ///
    /// A `true` answer counts as confirmation that the caller intends to
    /// change it, which allows the next [`Monochromator::select_grating`].
    pub fn grating_already_selected(&mut self) -> bool {
        self.reconcile();
        let selected = self.machine.state() == DeviceState::GratingSelected;
        self.change_acknowledged = selected;
        selected
    }

    /// Record that the operator declined a grating change.
    pub fn cancel_grating_change(&mut self) {
        self.change_acknowledged = false;
        self.status.push("Grating mode change cancelled.");
    }

    pub async fn connect(&mut self, port: &str) -> MonoResult<()> {
        self.reconcile();
        self.machine
            .check(Operation::Connect)
            .map_err(|e| self.fail(e))?;

        let port = port.trim();
        if port.is_empty() {
            return Err(self.fail(MonoError::PortUnavailable {
                port: "<none>".to_string(),
                reason: "no port given".to_string(),
            }));
        }

        let settings = LinkSettings {
            port: port.to_string(),
            ..self.link_defaults.clone()
        };
        info!(
            "Opening {} via {} @ {} baud",
            settings.port,
            self.connector.name(),
            settings.baud
        );

        let opened = self.connector.open(&settings).await;
        match opened {
            Ok(transport) => {
                self.shared.set_transport(Some(Arc::clone(&transport)));
                self.shared.lost.store(false, Ordering::SeqCst);
                self.link = Some(ConnectionHandle::new(settings, transport));
                self.grating = None;
                self.change_acknowledged = false;
                self.transition(DeviceEvent::Opened);
                self.status.push(format!(
                    "Connected to {}, you can now initialize and start your Monochromator.",
                    port
                ));
                Ok(())
            }
            Err(e) => Err(self.fail(MonoError::PortUnavailable {
                port: port.to_string(),
                reason: e.to_string(),
            })),
        }
    }

    /// Drain the firmware's start-up banner.
    pub async fn initialize(&mut self) -> MonoResult<()> {
        let op = Operation::Initialize;
        let transport = self.begin(op)?;
        let batch = self
            .exchange(
                op,
                &transport,
                None,
                Termination::Quiescence(self.policy.quiescence),
                self.policy.banner_wait,
            )
            .await?;
        if batch.is_empty() {
            debug!("No start-up banner received");
        }
        self.transition(DeviceEvent::BannerDrained);
        self.status
            .push("Monochromator initialized. Please home the motor.");
        Ok(())
    }

    pub async fn home(&mut self) -> MonoResult<()> {
        let op = Operation::Home;
        let transport = self.begin(op)?;
        self.exchange(
            op,
            &transport,
            Some(wire::HOME),
            Termination::Phrases(&[wire::HOMED]),
            self.policy.terminal_timeout,
        )
        .await?;
        self.transition(DeviceEvent::Homed);
        Ok(())
    }

    pub async fn select_grating(&mut self, mode: GratingMode) -> MonoResult<()> {
        let op = Operation::SelectGrating;
        let transport = self.begin(op)?;
        if self.machine.state() == DeviceState::GratingSelected && !self.change_acknowledged {
            return Err(self.fail(MonoError::precondition(
                op.name(),
                DeviceState::GratingSelected,
                "A grating mode is already selected; confirm the change first.",
            )));
        }
        self.change_acknowledged = false;

        let command = wire::select_grating(mode);
        self.exchange(
            op,
            &transport,
            Some(&command),
            Termination::Phrases(&[wire::GRATING_SELECTED]),
            self.policy.terminal_timeout,
        )
        .await?;
        self.grating = Some(mode);
        self.transition(DeviceEvent::GratingSelected);
        Ok(())
    }

    /// Move to `value` nanometres. The value is passed through verbatim;
    /// range checking is the firmware's job.
    pub async fn set_wavelength(&mut self, value: &str) -> MonoResult<WavelengthOutcome> {
        let op = Operation::SetWavelength;
        let transport = self.begin(op)?;
        let command = wire::set_wavelength(value);
        let batch = self
            .exchange(
                op,
                &transport,
                Some(&command),
                Termination::Phrases(&[
                    wire::WAVELENGTH_REACHED,
                    wire::WAVELENGTH_INVALID,
                    wire::STOP_ACK,
                ]),
                self.policy.terminal_timeout,
            )
            .await?;

        if batch.ended_with(wire::WAVELENGTH_INVALID) {
            let line = batch.terminal_line().unwrap_or(wire::WAVELENGTH_INVALID);
            return Err(self.fail(MonoError::DeviceRejected(line.to_string())));
        }
        if batch.ended_with(wire::STOP_ACK) {
            info!("Wavelength move to {} stopped", value.trim());
            return Ok(WavelengthOutcome::Stopped);
        }
        Ok(WavelengthOutcome::Reached)
    }

    pub async fn emergency_stop(&self) -> MonoResult<()> {
        self.stop_handle().emergency_stop().await
    }

    /// Close the link. Calling this while disconnected only notes that
    /// there was nothing to close.
    pub async fn disconnect(&mut self) -> MonoResult<()> {
        self.reconcile();
        let Some(link) = self.link.take() else {
            self.status.push("No serial connection to disconnect.");
            return Ok(());
        };

        self.shared.set_transport(None);
        if let Err(e) = link.transport().close().await {
            warn!("Error closing {}: {}", link.port(), e);
        }
        self.grating = None;
        self.change_acknowledged = false;
        self.transition(DeviceEvent::Closed);
        info!("Closed {}", link.port());
        self.status.push("Disconnected from Arduino.");
        Ok(())
    }

    fn begin(&mut self, op: Operation) -> MonoResult<Arc<dyn Transport>> {
        self.reconcile();
        self.machine.check(op).map_err(|e| self.fail(e))?;
        match self.link.as_ref() {
            Some(link) => Ok(Arc::clone(link.transport())),
            None => Err(self.fail(MonoError::precondition(
                op.name(),
                self.machine.state(),
                "COM port is not selected.",
            ))),
        }
    }

    async fn exchange(
        &mut self,
        op: Operation,
        transport: &Arc<dyn Transport>,
        command: Option<&[u8]>,
        termination: Termination<'_>,
        bound: Duration,
    ) -> MonoResult<ResponseBatch> {
        let shared = Arc::clone(&self.shared);
        let _guard = shared.exchange.lock().await;
        let dropped = shared.dropped.notified();
        tokio::pin!(dropped);
        if shared.lost.load(Ordering::SeqCst) {
            return Err(self.link_dropped(op));
        }

        if let Err(e) = drain_pending(transport.as_ref(), &self.status).await {
            return Err(self.link_lost(op, e).await);
        }
        if let Some(bytes) = command {
            debug!("-> {}", String::from_utf8_lossy(bytes).trim_end().escape_debug());
            if let Err(e) = transport.send(bytes).await {
                return Err(self.link_lost(op, e).await);
            }
        }

        let collected = tokio::select! {
            collected = collect_until(transport.as_ref(), termination, bound, &self.status) => {
                Some(collected)
            }
            _ = &mut dropped => None,
        };
        let Some(collected) = collected else {
            return Err(self.link_dropped(op));
        };
        match collected {
            Ok(batch) => Ok(batch),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(self.fail(MonoError::Timeout {
                operation: op.name(),
                after: bound,
            })),
            Err(e) => Err(self.link_lost(op, e).await),
        }
    }

    /// Pick up a link fault recorded by a stop handle.
    fn reconcile(&mut self) {
        if !self.shared.lost.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(link) = self.link.take() {
            warn!("Link to {} was lost during an emergency stop", link.port());
        }
        self.shared.set_transport(None);
        self.grating = None;
        self.change_acknowledged = false;
        self.transition(DeviceEvent::LinkLost);
    }

    /// The stop handle already closed the link and logged the failure.
    fn link_dropped(&mut self, op: Operation) -> MonoError {
        self.reconcile();
        let err = MonoError::LinkLost(format!("{} abandoned after a failed emergency stop", op.name()));
        warn!("{}", err);
        err
    }

    async fn link_lost(&mut self, op: Operation, err: io::Error) -> MonoError {
        if self.shared.lost.load(Ordering::SeqCst) {
            return self.link_dropped(op);
        }
        if let Some(link) = self.link.take() {
            if let Err(e) = link.transport().close().await {
                debug!("Closing {} after fault: {}", link.port(), e);
            }
        }
        self.shared.set_transport(None);
        self.grating = None;
        self.change_acknowledged = false;
        self.transition(DeviceEvent::LinkLost);
        self.fail(MonoError::LinkLost(format!("{} failed: {}", op.name(), err)))
    }

    fn fail(&self, err: MonoError) -> MonoError {
        if err.is_recoverable() {
            warn!("{}", err);
        } else {
            error!("{}", err);
        }
        self.status.push(err.to_string());
        err
    }

    fn transition(&mut self, event: DeviceEvent) {
        let old = self.machine.state();
        let held = self.machine.time_in_state();
        if !self.machine.process_event(event) {
            return;
        }
        let new = self.machine.state();
        if old != new {
            match held {
                Some(held) => info!("{} -> {} after {:.1?}", old, new, held),
                None => info!("{} -> {}", old, new),
            }
        }
        self.shared.publish_state(new);
        self.emitter.notify_state_change(old, new);
        self.emitter.notify_snapshot(&self.snapshot());
    }
}

impl std::fmt::Debug for Monochromator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monochromator")
            .field("connector", &self.connector.name())
            .field("state", &self.current_state())
            .field("link", &self.link)
            .field("grating", &self.grating)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::controller::testing::{ScriptedConnector, ScriptedTransport};
    use crate::device::response::ErrorKind;
    use std::sync::Mutex;

    fn mono_with(transport: &ScriptedTransport) -> Monochromator {
        Monochromator::new(Arc::new(ScriptedConnector::new(transport.clone())))
    }

    async fn ready(transport: &ScriptedTransport) -> Monochromator {
        let mut mono = mono_with(transport);
        mono.connect("scripted").await.unwrap();
        mono.initialize().await.unwrap();
        mono.home().await.unwrap();
        mono.select_grating(GratingMode::Vis).await.unwrap();
        mono
    }

    #[derive(Default)]
    struct Transitions {
        seen: Mutex<Vec<(DeviceState, DeviceState)>>,
    }

    impl DeviceListener for Transitions {
        fn on_state_change(&self, old: DeviceState, new: DeviceState) {
            self.seen.lock().unwrap().push((old, new));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_visits_states_in_order() {
        let transport = ScriptedTransport::with_firmware();
        transport.emit(["Monochromator v1.0", "Ready."]);
        let mut mono = mono_with(&transport);
        let transitions = Arc::new(Transitions::default());
        mono.register_listener(transitions.clone());

        mono.connect("scripted").await.unwrap();
        mono.initialize().await.unwrap();
        mono.home().await.unwrap();
        mono.select_grating(GratingMode::Vis).await.unwrap();
        let outcome = mono.set_wavelength("500").await.unwrap();

        assert_eq!(outcome, WavelengthOutcome::Reached);
        assert_eq!(mono.current_state(), DeviceState::GratingSelected);
        assert_eq!(
            *transitions.seen.lock().unwrap(),
            vec![
                (DeviceState::Disconnected, DeviceState::Connected),
                (DeviceState::Connected, DeviceState::Initialized),
                (DeviceState::Initialized, DeviceState::Homed),
                (DeviceState::Homed, DeviceState::GratingSelected),
            ]
        );
        assert_eq!(
            transport.written_lines(),
            vec!["home", "mode_selected", "0", "wavelength_selected 500"]
        );
        let log = mono.status_log();
        assert_eq!(log[0], "First select a COM port.");
        assert!(log.iter().any(|l| l == "Monochromator v1.0"));
        assert!(log.iter().any(|l| l.contains(wire::WAVELENGTH_REACHED)));
        assert_eq!(
            mono.snapshot(),
            MonoSnapshot {
                state: DeviceState::GratingSelected,
                port: Some("scripted".to_string()),
                grating: Some(GratingMode::Vis),
            }
        );
    }

    #[tokio::test]
    async fn test_operations_refused_before_connect() {
        let transport = ScriptedTransport::with_firmware();
        let mut mono = mono_with(&transport);

        let before = mono.status_log().len();
        let err = mono.home().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionViolation);
        assert_eq!(mono.status_log().len(), before + 1);
        assert!(mono.status_log()[before].starts_with("COM port is not selected."));

        assert!(mono.initialize().await.is_err());
        assert!(mono.select_grating(GratingMode::Ir).await.is_err());
        assert!(mono.set_wavelength("500").await.is_err());
        assert!(mono.emergency_stop().await.is_err());
        assert_eq!(mono.current_state(), DeviceState::Disconnected);
        assert_eq!(transport.bytes_written(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_refused_out_of_order() {
        let transport = ScriptedTransport::with_firmware();
        let mut mono = mono_with(&transport);
        mono.connect("scripted").await.unwrap();

        let err = mono.home().await.unwrap_err();
        assert!(err.to_string().contains("The Arduino is off, please press START."));
        assert_eq!(mono.current_state(), DeviceState::Connected);

        let err = mono.connect("scripted").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionViolation);

        mono.initialize().await.unwrap();
        let err = mono.select_grating(GratingMode::Vis).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("Please home the motor first to start operation."));
        assert_eq!(mono.current_state(), DeviceState::Initialized);

        mono.home().await.unwrap();
        let err = mono.set_wavelength("500").await.unwrap_err();
        assert!(err.to_string().contains("Please select a preferred grating"));
        assert_eq!(mono.current_state(), DeviceState::Homed);
        assert_eq!(transport.written_lines(), vec!["home"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reselect_requires_confirmation() {
        let transport = ScriptedTransport::with_firmware();
        let mut mono = ready(&transport).await;
        let written = transport.bytes_written();

        let err = mono.select_grating(GratingMode::Ir).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionViolation);
        assert_eq!(transport.bytes_written(), written);
        assert_eq!(mono.snapshot().grating, Some(GratingMode::Vis));

        assert!(mono.grating_already_selected());
        mono.select_grating(GratingMode::Ir).await.unwrap();
        assert_eq!(mono.snapshot().grating, Some(GratingMode::Ir));

        // confirmation is consumed by one selection
        assert!(mono.select_grating(GratingMode::Switch).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_query_before_first_selection() {
        let transport = ScriptedTransport::with_firmware();
        let mut mono = mono_with(&transport);
        mono.connect("scripted").await.unwrap();
        mono.initialize().await.unwrap();
        mono.home().await.unwrap();

        assert!(!mono.grating_already_selected());
        mono.select_grating(GratingMode::Switch).await.unwrap();
        assert!(transport.written_lines().ends_with(&["mode_selected".to_string(), "2".to_string()]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_wavelength_rejected() {
        let transport = ScriptedTransport::with_firmware();
        let mut mono = ready(&transport).await;

        let err = mono.set_wavelength("99999").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceRejected);
        assert!(err.is_recoverable());
        assert_eq!(mono.current_state(), DeviceState::GratingSelected);

        assert_eq!(
            mono.set_wavelength("650").await.unwrap(),
            WavelengthOutcome::Reached
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_stop_ends_move_in_flight() {
        let transport = ScriptedTransport::with_firmware();
        let mut mono = ready(&transport).await;
        let stop = mono.stop_handle();

        let (outcome, stopped) = tokio::join!(mono.set_wavelength("hold"), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop.emergency_stop().await
        });

        stopped.unwrap();
        assert_eq!(outcome.unwrap(), WavelengthOutcome::Stopped);
        assert_eq!(mono.current_state(), DeviceState::GratingSelected);
        assert!(mono.status_log().iter().any(|l| l == wire::STOP_ACK));
        assert_eq!(
            transport.written_lines().last().map(String::as_str),
            Some("stop")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_stop_while_idle_waits_for_ack() {
        let transport = ScriptedTransport::with_firmware();
        let mut mono = mono_with(&transport);
        mono.connect("scripted").await.unwrap();
        mono.initialize().await.unwrap();

        let err = mono.emergency_stop().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionViolation);

        mono.home().await.unwrap();
        mono.emergency_stop().await.unwrap();
        assert_eq!(mono.status().last().as_deref(), Some(wire::STOP_ACK));
        assert_eq!(mono.current_state(), DeviceState::Homed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_fault_drops_link() {
        let transport = ScriptedTransport::with_firmware();
        let mut mono = mono_with(&transport);
        mono.connect("scripted").await.unwrap();
        mono.initialize().await.unwrap();

        transport.fail_next_read();
        let err = mono.home().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LinkLost);
        assert!(!err.is_recoverable());
        assert_eq!(mono.current_state(), DeviceState::Disconnected);
        assert!(transport.is_closed());
        assert!(mono.status().last().unwrap().starts_with("Link lost"));
        assert_eq!(mono.snapshot().port, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_fault_drops_link() {
        let transport = ScriptedTransport::with_firmware();
        let mut mono = ready(&transport).await;

        transport.fail_next_write();
        let err = mono.set_wavelength("500").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LinkLost);
        assert_eq!(mono.current_state(), DeviceState::Disconnected);

        // the next operation needs a fresh connect
        assert_eq!(
            mono.home().await.unwrap_err().kind(),
            ErrorKind::PreconditionViolation
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_fault_is_picked_up_later() {
        let transport = ScriptedTransport::with_firmware();
        let mut mono = ready(&transport).await;

        transport.fail_next_write();
        let err = mono.stop_handle().emergency_stop().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LinkLost);
        assert_eq!(mono.current_state(), DeviceState::Disconnected);

        let err = mono.set_wavelength("500").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionViolation);
        assert_eq!(mono.snapshot().state, DeviceState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_write_fault_ends_move_at_once() {
        let transport = ScriptedTransport::with_firmware();
        let mut mono = ready(&transport).await;
        let stop = mono.stop_handle();
        let before = mono.status().len();
        let started = tokio::time::Instant::now();

        let (moved, stopped) = tokio::join!(mono.set_wavelength("hold"), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            transport.fail_next_write();
            stop.emergency_stop().await
        });

        assert_eq!(stopped.unwrap_err().kind(), ErrorKind::LinkLost);
        assert_eq!(moved.unwrap_err().kind(), ErrorKind::LinkLost);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(mono.current_state(), DeviceState::Disconnected);
        assert_eq!(mono.snapshot(), MonoSnapshot::default());

        let lines = mono.status().since(before);
        assert_eq!(lines.iter().filter(|l| l.starts_with("Link lost")).count(), 1);
        assert!(!lines.iter().any(|l| l.contains("timed out")));
        assert_eq!(transport.close_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_stop_ack_does_not_end_next_move() {
        let transport = ScriptedTransport::with_firmware();
        let mut mono = ready(&transport).await;
        transport.respond_with(|line| {
            if line.starts_with("wavelength_selected") {
                vec!["Moving...".to_string(), wire::WAVELENGTH_REACHED.to_string()]
            } else {
                Vec::new()
            }
        });

        let err = mono.emergency_stop().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        // acknowledgement arrives after the stop gave up
        transport.emit([wire::STOP_ACK]);
        let outcome = mono.set_wavelength("500").await.unwrap();
        assert_eq!(outcome, WavelengthOutcome::Reached);
        assert!(mono.status_log().iter().any(|l| l == wire::STOP_ACK));
        assert_eq!(mono.current_state(), DeviceState::GratingSelected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_homing_reply_does_not_complete_retry() {
        let transport = ScriptedTransport::new();
        let mut mono = mono_with(&transport).with_policy(ExchangePolicy {
            terminal_timeout: Duration::from_secs(5),
            ..ExchangePolicy::default()
        });
        mono.connect("scripted").await.unwrap();
        mono.initialize().await.unwrap();

        assert_eq!(mono.home().await.unwrap_err().kind(), ErrorKind::Timeout);
        transport.emit([wire::HOMED]);

        assert_eq!(mono.home().await.unwrap_err().kind(), ErrorKind::Timeout);
        assert_eq!(mono.current_state(), DeviceState::Initialized);
        assert_eq!(transport.written_lines(), vec!["home", "home"]);
        assert!(mono.status_log().iter().any(|l| l == wire::HOMED));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_firmware_times_out() {
        let transport = ScriptedTransport::new();
        let mut mono = mono_with(&transport).with_policy(ExchangePolicy {
            terminal_timeout: Duration::from_secs(5),
            ..ExchangePolicy::default()
        });
        mono.connect("scripted").await.unwrap();
        mono.initialize().await.unwrap();

        let err = mono.home().await.unwrap_err();
        assert_eq!(
            err,
            MonoError::Timeout {
                operation: "home",
                after: Duration::from_secs(5),
            }
        );
        assert_eq!(mono.current_state(), DeviceState::Initialized);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let mut mono = Monochromator::new(Arc::new(ScriptedConnector::refusing()));
        let err = mono.connect("/dev/ttyUSB9").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PortUnavailable);
        assert!(err.to_string().contains("/dev/ttyUSB9"));
        assert_eq!(mono.current_state(), DeviceState::Disconnected);

        assert_eq!(
            mono.connect("  ").await.unwrap_err().kind(),
            ErrorKind::PortUnavailable
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let transport = ScriptedTransport::with_firmware();
        let mut mono = ready(&transport).await;

        mono.disconnect().await.unwrap();
        assert_eq!(mono.current_state(), DeviceState::Disconnected);
        assert_eq!(mono.status().last().as_deref(), Some("Disconnected from Arduino."));

        mono.disconnect().await.unwrap();
        assert_eq!(
            mono.status().last().as_deref(),
            Some("No serial connection to disconnect.")
        );
        assert_eq!(transport.close_calls(), 1);
        assert_eq!(mono.snapshot(), MonoSnapshot::default());
    }
}
