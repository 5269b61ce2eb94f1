// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod batch;
mod config;
mod terminal;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use mono_app::{init_logging, ConfigFile};
use mono_backend::{register_builtin_backends_on, RegistrationContext};
use mono_core::{spawn_worker, Connector, DynResult, GratingMode, Monochromator};

use config::CliConfig;

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - monochromator controller");

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Link backend to use (serial, sim)
    #[arg(short = 'b', long = "backend")]
    backend: Option<String>,
    /// Serial port of the controller board
    #[arg(short = 'p', long = "port")]
    port: Option<String>,
    /// Serial baud rate
    #[arg(long = "baud")]
    baud: Option<u32>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long = "log-level")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Operator terminal (default)
    Interactive,
    /// Connect, home, select a grating and visit each wavelength, then disconnect
    Run {
        /// Grating to select (vis, ir, switch)
        #[arg(short = 'g', long = "grating")]
        grating: GratingMode,
        /// Target wavelength in nm; repeat for several moves
        #[arg(short = 'w', long = "wavelength", required = true)]
        wavelengths: Vec<String>,
    },
    /// List available serial ports and exit
    Ports,
}

/// Command-line flags take precedence over the config file.
fn apply_overrides(cli: &Cli, cfg: &mut CliConfig) {
    if let Some(backend) = &cli.backend {
        cfg.link.backend = backend.to_ascii_lowercase();
    }
    if let Some(port) = &cli.port {
        cfg.link.port = Some(port.clone());
    }
    if let Some(baud) = cli.baud {
        cfg.link.baud = baud;
    }
    if let Some(level) = &cli.log_level {
        cfg.general.log_level = Some(level.clone());
    }
}

/// Configured port, or the only port the backend offers.
fn resolve_port(cfg: &CliConfig, connector: &dyn Connector) -> Option<String> {
    if let Some(port) = &cfg.link.port {
        return Some(port.clone());
    }
    match connector.list_ports() {
        Ok(ports) if ports.len() == 1 => ports.into_iter().next(),
        Ok(_) => None,
        Err(e) => {
            warn!("Port enumeration failed: {}", e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let mut registry = RegistrationContext::new();
    register_builtin_backends_on(&mut registry);

    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", CliConfig::example_toml());
        return Ok(());
    }

    let (mut cfg, config_path) = if let Some(ref path) = cli.config {
        let cfg = CliConfig::load_from_file(path)?;
        (cfg, Some(path.clone()))
    } else {
        CliConfig::load_from_default_paths()?
    };
    apply_overrides(&cli, &mut cfg);
    cfg.validate(&registry.registered_backends())
        .map_err(|e| format!("Invalid configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let connector = registry.build_connector(&cfg.link.backend)?;
    let command = cli.command.clone().unwrap_or(Command::Interactive);

    if let Command::Ports = command {
        let ports = connector.list_ports()?;
        if ports.is_empty() {
            println!("No serial ports found.");
        }
        for port in ports {
            println!("{}", port);
        }
        return Ok(());
    }

    let default_port = resolve_port(&cfg, connector.as_ref());
    let mono = Monochromator::new(connector)
        .with_link_defaults(cfg.link.settings())
        .with_policy(cfg.timing.policy());
    let (handle, task) = spawn_worker(mono);

    let result = match command {
        Command::Run {
            grating,
            wavelengths,
        } => {
            let port = default_port
                .ok_or("No port given. Use --port or set [link].port in config.")?;
            tokio::select! {
                res = batch::run_sequence(&handle, &port, grating, &wavelengths) => res,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    terminal::shutdown(&handle).await;
                    Err("interrupted".into())
                }
            }
        }
        _ => terminal::run_interactive(handle.clone(), default_port).await,
    };

    drop(handle);
    if let Err(e) = task.await {
        error!("Controller task panicked: {}", e);
    }
    result
}
