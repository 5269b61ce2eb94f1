// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Line-buffered aggregation of firmware replies.
//!
//! Replies that end with a known phrase (homing, grating selection,
//! wavelength moves) are read until that phrase arrives, however long the
//! reply takes, subject only to the overall bound. Replies without one (the
//! boot banner) end after a period of silence.

use std::io;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::device::Transport;
use crate::status::StatusLog;

/// How the end of a reply is recognised.
#[derive(Debug, Clone, Copy)]
pub enum Termination<'p> {
    /// Stop at the first line containing any of these phrases.
    Phrases(&'p [&'p str]),
    /// Stop once lines have arrived and the channel then goes quiet.
    Quiescence(Duration),
}

/// Lines collected for a single exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseBatch {
    lines: Vec<String>,
    terminal: Option<usize>,
}

impl ResponseBatch {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The line that ended the reply, if it ended on a phrase.
    pub fn terminal_line(&self) -> Option<&str> {
        self.terminal.map(|i| self.lines[i].as_str())
    }

    /// Whether the terminal line contains `phrase`.
    pub fn ended_with(&self, phrase: &str) -> bool {
        self.terminal_line()
            .map(|line| line.contains(phrase))
            .unwrap_or(false)
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Read lines from `transport` until `termination` is satisfied.
///
/// Each non-blank line is appended to `status` as it arrives. With
/// [`Termination::Phrases`], running past `bound` yields
/// `io::ErrorKind::TimedOut`. With [`Termination::Quiescence`], `bound`
/// only limits the wait for the first line; an empty batch is returned if
/// none arrives.
pub async fn collect_until(
    transport: &dyn Transport,
    termination: Termination<'_>,
    bound: Duration,
    status: &StatusLog,
) -> io::Result<ResponseBatch> {
    let deadline = Instant::now() + bound;
    let mut batch = ResponseBatch::default();

    loop {
        let now = Instant::now();
        let wait = match termination {
            Termination::Quiescence(quiet) if !batch.is_empty() => quiet,
            _ if now >= deadline => Duration::ZERO,
            _ => deadline - now,
        };

        let line = if wait.is_zero() {
            None
        } else {
            transport.read_line(wait).await?
        };

        let Some(line) = line else {
            match termination {
                Termination::Phrases(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "no terminal line before the deadline",
                    ));
                }
                // A line is still arriving; wait for the rest of it.
                Termination::Quiescence(_)
                    if Instant::now() < deadline && transport.bytes_waiting()? > 0 =>
                {
                    continue
                }
                Termination::Quiescence(_) => return Ok(batch),
            }
        };

        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        trace!("<- {}", line);
        status.push(line.clone());
        batch.lines.push(line);

        if let Termination::Phrases(phrases) = termination {
            let last = &batch.lines[batch.lines.len() - 1];
            if phrases.iter().any(|p| last.contains(p)) {
                batch.terminal = Some(batch.lines.len() - 1);
                return Ok(batch);
            }
        }
    }
}

/// Most stale lines read before a new command is written.
const DRAIN_LIMIT: usize = 64;

/// Read lines that are already waiting on `transport` without blocking.
///
/// Late replies to an abandoned exchange (a stop acknowledgement after a
/// timeout, say) would otherwise satisfy the next exchange's terminal
/// phrase. Drained lines are appended to `status` as informational output.
pub async fn drain_pending(transport: &dyn Transport, status: &StatusLog) -> io::Result<usize> {
    let mut drained = 0;
    while drained < DRAIN_LIMIT {
        let Some(line) = transport.read_line(Duration::ZERO).await? else {
            break;
        };
        drained += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        debug!("<- {} (stale)", line);
        status.push(line);
    }
    Ok(drained)
}
