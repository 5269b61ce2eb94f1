// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Non-interactive `run` sequence.

use tracing::info;

use mono_core::{DynResult, GratingMode, MonoHandle, StatusLog, WavelengthOutcome};

/// Prints status lines appended since the previous call.
#[derive(Debug, Default)]
struct StatusCursor {
    printed: usize,
}

impl StatusCursor {
    fn flush(&mut self, status: &StatusLog) {
        let lines = status.since(self.printed);
        self.printed += lines.len();
        for line in lines {
            println!("{}", line);
        }
    }
}

/// Connect, initialize, home, select `grating`, then visit every entry of
/// `wavelengths` in order. The link is closed afterwards whether or not the
/// sequence succeeded.
pub async fn run_sequence(
    handle: &MonoHandle,
    port: &str,
    grating: GratingMode,
    wavelengths: &[String],
) -> DynResult<()> {
    let mut cursor = StatusCursor::default();
    let result = steps(handle, port, grating, wavelengths, &mut cursor).await;

    if let Err(e) = handle.disconnect().await {
        info!("Disconnect after run failed: {}", e);
    }
    cursor.flush(handle.status());
    result
}

async fn steps(
    handle: &MonoHandle,
    port: &str,
    grating: GratingMode,
    wavelengths: &[String],
    cursor: &mut StatusCursor,
) -> DynResult<()> {
    let status = handle.status();

    handle.connect(port).await?;
    cursor.flush(status);
    handle.initialize().await?;
    cursor.flush(status);
    handle.home().await?;
    cursor.flush(status);

    // A fresh link never has a grating selected, so no confirmation applies.
    handle.select_grating(grating).await?;
    cursor.flush(status);

    for value in wavelengths {
        let outcome = handle.set_wavelength(value.as_str()).await?;
        cursor.flush(status);
        if outcome == WavelengthOutcome::Stopped {
            return Err(format!("Move to {} nm was stopped", value).into());
        }
        info!("Reached {} nm", value);
    }
    Ok(())
}
