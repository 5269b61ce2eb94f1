// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Device state machine for the bring-up sequence.
//!
//! Bring-up is strictly ordered: a link must be open before the banner is
//! drained, the motor must be homed before a grating is chosen, and a
//! grating must be chosen before any wavelength move.

use std::time::{Duration, Instant};

use crate::device::command::Operation;
use crate::device::response::MonoError;
use crate::device::state::DeviceState;

/// Events that can trigger state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Serial link opened
    Opened,
    /// Boot banner drained
    BannerDrained,
    /// Homing acknowledged by the firmware
    Homed,
    /// Grating change acknowledged by the firmware
    GratingSelected,
    /// Read or write failed on the link
    LinkLost,
    /// Link closed on request
    Closed,
}

/// The device state machine that manages state transitions.
#[derive(Debug, Clone)]
pub struct DeviceStateMachine {
    state: DeviceState,
    transition_count: u64,
    last_transition: Option<Instant>,
}

impl Default for DeviceStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStateMachine {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self {
            state: DeviceState::Disconnected,
            transition_count: 0,
            last_transition: None,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Get the number of state transitions that have occurred.
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Get the time since the last transition.
    pub fn time_in_state(&self) -> Option<Duration> {
        self.last_transition.map(|t| t.elapsed())
    }

    /// Process an event and potentially transition to a new state.
    /// Returns true if a transition occurred.
    pub fn process_event(&mut self, event: DeviceEvent) -> bool {
        match self.next_state(event) {
            Some(state) => {
                self.state = state;
                self.transition_count += 1;
                self.last_transition = Some(Instant::now());
                true
            }
            None => false,
        }
    }

    fn next_state(&self, event: DeviceEvent) -> Option<DeviceState> {
        use DeviceState::*;
        match (self.state, event) {
            (Disconnected, DeviceEvent::Opened) => Some(Connected),
            (Connected, DeviceEvent::BannerDrained) => Some(Initialized),
            (Initialized, DeviceEvent::Homed) => Some(Homed),
            (Homed | GratingSelected, DeviceEvent::GratingSelected) => Some(GratingSelected),

            // Already down
            (Disconnected, DeviceEvent::LinkLost | DeviceEvent::Closed) => None,
            (_, DeviceEvent::LinkLost | DeviceEvent::Closed) => Some(Disconnected),

            _ => None,
        }
    }

    /// Validate that `op` may start from the current state.
    pub fn check(&self, op: Operation) -> Result<(), MonoError> {
        check_state(op, self.state)
    }
}

pub(crate) fn check_state(op: Operation, state: DeviceState) -> Result<(), MonoError> {
    if op.permitted(state) {
        return Ok(());
    }
    Err(MonoError::precondition(
        op.name(),
        state,
        precondition_hint(op, state),
    ))
}

/// Operator-facing explanation of why `op` cannot run in `state`.
fn precondition_hint(op: Operation, state: DeviceState) -> String {
    use DeviceState::*;
    match (op, state) {
        (_, Disconnected) => "COM port is not selected.".to_string(),
        (Operation::Connect, _) => "Already connected; disconnect first.".to_string(),
        (_, Connected) => "The Arduino is off, please press START.".to_string(),
        (Operation::Initialize, _) => "The controller is already initialized.".to_string(),
        (_, Initialized) => "Please home the motor first to start operation.".to_string(),
        (Operation::Home, _) => "The motor is already homed.".to_string(),
        (Operation::SetWavelength, Homed) => {
            "Please select a preferred grating to work with and then move to the desired wavelength."
                .to_string()
        }
        (op, state) => format!("{} is not available while {}.", op.name(), state),
    }
}
