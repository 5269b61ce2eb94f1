// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::device::state::{DeviceState, MonoSnapshot};

/// Failure reported by a protocol operation.
///
/// The `Display` text is the single status line appended for the failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonoError {
    #[error("Could not open {port}: {reason}. Please select another port.")]
    PortUnavailable { port: String, reason: String },

    #[error("{hint} ({operation} refused while {state})")]
    PreconditionViolation {
        operation: &'static str,
        state: DeviceState,
        hint: String,
    },

    #[error("Link lost: {0}. The device is now disconnected.")]
    LinkLost(String),

    #[error("Device rejected the request: {0}")]
    DeviceRejected(String),

    #[error("{operation} timed out after {}s without a response from the device", after.as_secs_f32())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

/// Coarse classification of [`MonoError`] for adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    PortUnavailable,
    PreconditionViolation,
    LinkLost,
    DeviceRejected,
    Timeout,
}

impl MonoError {
    pub fn precondition(operation: &'static str, state: DeviceState, hint: impl Into<String>) -> Self {
        Self::PreconditionViolation {
            operation,
            state,
            hint: hint.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PortUnavailable { .. } => ErrorKind::PortUnavailable,
            Self::PreconditionViolation { .. } => ErrorKind::PreconditionViolation,
            Self::LinkLost(_) => ErrorKind::LinkLost,
            Self::DeviceRejected(_) => ErrorKind::DeviceRejected,
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Everything except a lost link leaves the device state untouched.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::LinkLost(_))
    }
}

pub type MonoResult<T> = Result<T, MonoError>;

/// How a wavelength move ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WavelengthOutcome {
    /// The firmware reported the target wavelength as reached.
    Reached,
    /// An emergency stop cut the move short.
    Stopped,
}

/// Successful result of a controller command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonoOutcome {
    Done,
    Snapshot(MonoSnapshot),
    GratingAlreadySelected(bool),
    Wavelength(WavelengthOutcome),
}
