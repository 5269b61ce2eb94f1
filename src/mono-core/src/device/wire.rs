// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Host/firmware wire vocabulary.
//!
//! Commands are newline terminated ASCII. Firmware replies are free-form
//! lines; the phrases below mark the end of a multi-line reply.

use crate::device::state::GratingMode;

pub const HOME: &[u8] = b"home\n";
pub const STOP: &[u8] = b"stop\n";
pub const MODE_SELECTED: &str = "mode_selected";
pub const WAVELENGTH_SELECTED: &str = "wavelength_selected";

/// Homing finished.
pub const HOMED: &str = "You can now select the grating you wish to operate with.";
/// Grating change finished.
pub const GRATING_SELECTED: &str = "Grating mode selected.";
/// Wavelength move finished.
pub const WAVELENGTH_REACHED: &str =
    "You can now enter a new wavelength or choose another grating to work with.";
/// Firmware refused the requested wavelength.
pub const WAVELENGTH_INVALID: &str = "Invalid wavelength";
/// Acknowledgement of `stop`.
pub const STOP_ACK: &str = "Emergency stop initiated.";

/// `mode_selected` followed by the grating code, as one buffer.
pub fn select_grating(mode: GratingMode) -> Vec<u8> {
    format!("{}\n{}\n", MODE_SELECTED, mode.wire_code()).into_bytes()
}

/// The value is passed through untouched; the firmware validates it.
pub fn set_wavelength(value: &str) -> Vec<u8> {
    format!("{} {}\n", WAVELENGTH_SELECTED, value.trim()).into_bytes()
}
