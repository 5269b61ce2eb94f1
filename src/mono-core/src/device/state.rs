// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle of the monochromator as seen from the host.
///
/// The order of the variants is the order in which bring-up proceeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceState {
    #[default]
    Disconnected,
    Connected,
    Initialized,
    Homed,
    GratingSelected,
}

impl DeviceState {
    /// A serial link is open.
    pub fn is_connected(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }

    /// The motor has been driven to its reference position.
    pub fn is_homed(&self) -> bool {
        matches!(self, Self::Homed | Self::GratingSelected)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connected => "Connected",
            Self::Initialized => "Initialized",
            Self::Homed => "Homed",
            Self::GratingSelected => "GratingSelected",
        };
        f.write_str(name)
    }
}

/// Grating position requested from the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GratingMode {
    Vis,
    Ir,
    Switch,
}

impl GratingMode {
    pub const ALL: [GratingMode; 3] = [GratingMode::Vis, GratingMode::Ir, GratingMode::Switch];

    /// Code sent on the line following `mode_selected`.
    pub fn wire_code(self) -> u8 {
        match self {
            Self::Vis => 0,
            Self::Ir => 1,
            Self::Switch => 2,
        }
    }

    /// Operator-facing label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Vis => "VIS Grating",
            Self::Ir => "IR Grating",
            Self::Switch => "Switch Mode",
        }
    }
}

impl fmt::Display for GratingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown grating mode '{0}' (expected vis, ir or switch)")]
pub struct ParseGratingModeError(pub String);

impl FromStr for GratingMode {
    type Err = ParseGratingModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match key.as_str() {
            "vis" | "visgrating" | "0" => Ok(Self::Vis),
            "ir" | "irgrating" | "1" => Ok(Self::Ir),
            "switch" | "switchmode" | "2" => Ok(Self::Switch),
            _ => Err(ParseGratingModeError(s.trim().to_string())),
        }
    }
}

/// Point-in-time view of the controller published to host adapters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonoSnapshot {
    pub state: DeviceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grating: Option<GratingMode>,
}
