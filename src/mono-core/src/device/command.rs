// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use crate::device::state::{DeviceState, GratingMode};

/// Protocol operations and the states they may start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Initialize,
    Home,
    SelectGrating,
    SetWavelength,
    EmergencyStop,
    Disconnect,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Initialize => "initialize",
            Self::Home => "home",
            Self::SelectGrating => "select_grating",
            Self::SetWavelength => "set_wavelength",
            Self::EmergencyStop => "emergency_stop",
            Self::Disconnect => "disconnect",
        }
    }

    /// States in which the operation is allowed to start.
    pub fn allowed_in(self) -> &'static [DeviceState] {
        use DeviceState::*;
        match self {
            Self::Connect => &[Disconnected],
            Self::Initialize => &[Connected],
            Self::Home => &[Initialized],
            Self::SelectGrating => &[Homed, GratingSelected],
            Self::SetWavelength => &[GratingSelected],
            Self::EmergencyStop => &[Homed, GratingSelected],
            Self::Disconnect => &[
                Disconnected,
                Connected,
                Initialized,
                Homed,
                GratingSelected,
            ],
        }
    }

    pub fn permitted(self, state: DeviceState) -> bool {
        self.allowed_in().contains(&state)
    }
}

/// Command handled by the controller worker.
#[derive(Debug, Clone, PartialEq)]
pub enum MonoCommand {
    GetSnapshot,
    Connect(String),
    Initialize,
    Home,
    GratingAlreadySelected,
    CancelGratingChange,
    SelectGrating(GratingMode),
    SetWavelength(String),
    EmergencyStop,
    Disconnect,
}
