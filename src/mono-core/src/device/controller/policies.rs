// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Timing policy for command/response exchanges.

use std::time::Duration;

/// Bounds applied while waiting for firmware replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangePolicy {
    /// Silence that ends a reply with no fixed terminal phrase.
    pub quiescence: Duration,
    /// How long `initialize` waits for the first banner line.
    pub banner_wait: Duration,
    /// Upper bound on waiting for a terminal phrase.
    pub terminal_timeout: Duration,
    /// How long an idle emergency stop waits for its acknowledgement.
    pub stop_ack: Duration,
}

impl ExchangePolicy {
    pub fn new(
        quiescence: Duration,
        banner_wait: Duration,
        terminal_timeout: Duration,
        stop_ack: Duration,
    ) -> Self {
        Self {
            quiescence,
            banner_wait,
            terminal_timeout,
            stop_ack,
        }
    }
}

impl Default for ExchangePolicy {
    fn default() -> Self {
        Self {
            quiescence: Duration::from_millis(300),
            banner_wait: Duration::from_secs(2),
            terminal_timeout: Duration::from_secs(120),
            stop_ack: Duration::from_millis(1500),
        }
    }
}
