// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod device;
pub mod status;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use device::command::{MonoCommand, Operation};
pub use device::controller::{
    DeviceListener, ExchangePolicy, ListenerId, Monochromator, StopHandle,
};
pub use device::request::MonoRequest;
pub use device::response::{ErrorKind, MonoError, MonoOutcome, MonoResult, WavelengthOutcome};
pub use device::{ConnectionHandle, Connector, IoFuture, LinkSettings, Transport};
pub use device::state::{DeviceState, GratingMode, MonoSnapshot};
pub use device::worker::{run_mono_task, spawn_worker, MonoHandle};
pub use status::StatusLog;
