// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Append-only log of operator-facing status lines.

use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

const LIVE_CHANNEL_CAPACITY: usize = 256;

/// Shared status log.
///
/// The controller appends; host adapters read snapshots or follow new lines
/// through [`StatusLog::subscribe`]. Entries are never evicted.
#[derive(Clone)]
pub struct StatusLog {
    entries: Arc<RwLock<Vec<String>>>,
    live: broadcast::Sender<String>,
}

impl Default for StatusLog {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusLog {
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            live,
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        let line = line.into();
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.clone());
        // No subscribers is fine.
        let _ = self.live.send(line);
    }

    /// Copy of every entry so far, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Entries appended at or after `index`.
    pub fn since(&self, index: usize) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(index..).map(<[String]>::to_vec).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    /// Follow lines appended after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.live.subscribe()
    }
}

impl std::fmt::Debug for StatusLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusLog")
            .field("entries", &self.len())
            .finish()
    }
}
