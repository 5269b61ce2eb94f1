// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use tokio::sync::oneshot;

use crate::{MonoCommand, MonoOutcome, MonoResult};

/// Request sent to the controller worker.
#[derive(Debug)]
pub struct MonoRequest {
    pub cmd: MonoCommand,
    pub respond_to: oneshot::Sender<MonoResult<MonoOutcome>>,
}
