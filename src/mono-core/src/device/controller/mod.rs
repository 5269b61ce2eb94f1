// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Monochromator controller components.
//!
//! This module contains the protocol state machine, the response reader
//! that turns the serial stream into terminated replies, event listeners,
//! and the timing policy applied to every exchange.

pub mod events;
pub mod machine;
pub mod policies;
pub mod protocol;
pub mod reader;
pub mod stop;

#[cfg(test)]
pub(crate) mod testing;

pub use events::{DeviceEventEmitter, DeviceListener, ListenerId};
pub use machine::{DeviceEvent, DeviceStateMachine};
pub use policies::ExchangePolicy;
pub use protocol::Monochromator;
pub use reader::{collect_until, drain_pending, ResponseBatch, Termination};
pub use stop::StopHandle;
