// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Interactive operator terminal.
//!
//! Long operations run as tasks against the controller handle, so the
//! prompt keeps accepting input (notably `stop`) while the motor moves.

use std::io::BufRead;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mono_core::{DynResult, ErrorKind, GratingMode, MonoHandle, WavelengthOutcome};

const HELP: &str = "\
Commands:
  ports               list serial ports
  connect [port]      open the link (defaults to the configured port)
  init                start the controller and read its banner
  home                home the motor
  grating <mode>      select vis, ir or switch
  wl <nm>             move to a wavelength
  stop | e            emergency stop
  state [--json]      show the current state
  log                 print the whole status log
  disconnect          close the link
  help                show this text
  quit                stop, disconnect and exit";

const CONFIRM_PROMPT: &str =
    "A grating mode is already selected. Are you sure you want to change it? (y/n)";

/// One operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Empty,
    Ports,
    Connect(Option<String>),
    Init,
    Home,
    Grating(GratingMode),
    Wavelength(String),
    Stop,
    State { json: bool },
    Log,
    Disconnect,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(Command::Empty);
    };
    let rest: Vec<&str> = words.collect();

    let command = match verb.to_ascii_lowercase().as_str() {
        "ports" => Command::Ports,
        "connect" => Command::Connect(rest.first().map(|p| p.to_string())),
        "init" | "initialize" | "start" => Command::Init,
        "home" => Command::Home,
        "grating" | "mode" => {
            if rest.is_empty() {
                return Err("Usage: grating <vis|ir|switch>".to_string());
            }
            let mode = rest.join(" ").parse::<GratingMode>().map_err(|e| e.to_string())?;
            Command::Grating(mode)
        }
        "wl" | "wavelength" => match rest.as_slice() {
            [value] => Command::Wavelength(value.to_string()),
            _ => return Err("Usage: wl <nm>".to_string()),
        },
        "stop" | "e" => Command::Stop,
        "state" | "status" => Command::State {
            json: rest.contains(&"--json"),
        },
        "log" => Command::Log,
        "disconnect" => Command::Disconnect,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("Unknown command '{}'. Type 'help'.", other)),
    };
    Ok(command)
}

/// Feedback from background operations to the prompt.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Event {
    ConfirmGrating(GratingMode),
    WavelengthRejected,
    WavelengthStopped,
}

#[derive(Debug, PartialEq)]
enum Flow {
    Continue,
    Quit,
}

struct Terminal {
    handle: MonoHandle,
    default_port: Option<String>,
    events: mpsc::UnboundedSender<Event>,
    pending_grating: Option<GratingMode>,
}

impl Terminal {
    fn handle_line(&mut self, line: &str) -> Flow {
        if let Some(mode) = self.pending_grating {
            // An emergency stop never waits behind the prompt.
            if parse_command(line) == Ok(Command::Stop) {
                let handle = self.handle.clone();
                self.spawn_op("emergency_stop", async move { handle.emergency_stop().await });
                println!("{}", CONFIRM_PROMPT);
                return Flow::Continue;
            }
            self.pending_grating = None;
            let answer = line.trim().to_ascii_lowercase();
            let handle = self.handle.clone();
            if answer == "y" || answer == "yes" {
                self.spawn_op("select_grating", async move { handle.select_grating(mode).await });
            } else {
                self.spawn_op("cancel_grating_change", async move {
                    handle.cancel_grating_change().await
                });
            }
            return Flow::Continue;
        }

        let command = match parse_command(line) {
            Ok(command) => command,
            Err(message) => {
                println!("{}", message);
                return Flow::Continue;
            }
        };
        debug!("Operator command: {:?}", command);

        let handle = self.handle.clone();
        match command {
            Command::Empty => {}
            Command::Ports => print_ports(&self.handle.list_ports()),
            Command::Connect(port) => {
                let Some(port) = port.or_else(|| self.default_port.clone()) else {
                    println!("First select a COM port.");
                    print_ports(&self.handle.list_ports());
                    return Flow::Continue;
                };
                self.spawn_op("connect", async move { handle.connect(port).await });
            }
            Command::Init => self.spawn_op("initialize", async move { handle.initialize().await }),
            Command::Home => self.spawn_op("home", async move { handle.home().await }),
            Command::Grating(mode) => {
                let events = self.events.clone();
                self.spawn_op("select_grating", async move {
                    if handle.grating_already_selected().await? {
                        let _ = events.send(Event::ConfirmGrating(mode));
                        return Ok(());
                    }
                    handle.select_grating(mode).await
                });
            }
            Command::Wavelength(value) => {
                let events = self.events.clone();
                self.spawn_op("set_wavelength", async move {
                    match handle.set_wavelength(value).await {
                        Ok(WavelengthOutcome::Reached) => Ok(()),
                        Ok(WavelengthOutcome::Stopped) => {
                            let _ = events.send(Event::WavelengthStopped);
                            Ok(())
                        }
                        Err(e) if e.kind() == ErrorKind::DeviceRejected => {
                            let _ = events.send(Event::WavelengthRejected);
                            Err(e)
                        }
                        Err(e) => Err(e),
                    }
                });
            }
            Command::Stop => {
                self.spawn_op("emergency_stop", async move { handle.emergency_stop().await })
            }
            Command::State { json } => {
                let snapshot = self.handle.snapshot();
                if json {
                    match serde_json::to_string(&snapshot) {
                        Ok(text) => println!("{}", text),
                        Err(e) => warn!("Failed to encode state: {}", e),
                    }
                } else {
                    println!(
                        "State: {}  Port: {}  Grating: {}",
                        snapshot.state,
                        snapshot.port.as_deref().unwrap_or("-"),
                        snapshot
                            .grating
                            .map(|g| g.label().to_string())
                            .unwrap_or_else(|| "-".to_string())
                    );
                }
            }
            Command::Log => {
                for line in self.handle.status_log() {
                    println!("{}", line);
                }
            }
            Command::Disconnect => {
                self.spawn_op("disconnect", async move { handle.disconnect().await })
            }
            Command::Help => println!("{}", HELP),
            Command::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::ConfirmGrating(mode) => {
                self.pending_grating = Some(mode);
                println!("{}", CONFIRM_PROMPT);
            }
            Event::WavelengthRejected => println!("Please enter a new wavelength with 'wl <nm>'."),
            Event::WavelengthStopped => println!("Move stopped before reaching the target."),
        }
    }

    /// Failures are already on the status log; only log them here.
    fn spawn_op<F>(&self, name: &'static str, op: F)
    where
        F: std::future::Future<Output = mono_core::MonoResult<()>> + Send + 'static,
    {
        tokio::spawn(async move {
            if let Err(e) = op.await {
                debug!("{} failed: {}", name, e);
            }
        });
    }
}

fn print_ports(ports: &[String]) {
    if ports.is_empty() {
        println!("No serial ports found.");
        return;
    }
    println!("Available ports:");
    for port in ports {
        println!("  {}", port);
    }
}

/// Echo status lines to stdout as they are appended.
pub fn spawn_status_printer(mut lines: broadcast::Receiver<String>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match lines.recv().await {
                Ok(line) => println!("{}", line),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Status output skipped {} lines; use 'log' to see them", n)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Read stdin on a dedicated thread; the channel closes at end of input.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read from stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Best-effort emergency stop followed by a disconnect.
pub async fn shutdown(handle: &MonoHandle) {
    if handle.current_state().is_homed() {
        if let Err(e) = handle.emergency_stop().await {
            warn!("Emergency stop on exit failed: {}", e);
        }
    }
    if let Err(e) = handle.disconnect().await {
        warn!("Disconnect on exit failed: {}", e);
    }
}

pub async fn run_interactive(handle: MonoHandle, default_port: Option<String>) -> DynResult<()> {
    let printer = spawn_status_printer(handle.subscribe_status());
    for line in handle.status_log() {
        println!("{}", line);
    }
    println!("Type 'help' for a list of commands.");

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut input = spawn_stdin_reader();
    let mut terminal = Terminal {
        handle: handle.clone(),
        default_port,
        events: events_tx,
        pending_grating: None,
    };

    while handle.is_running() {
        tokio::select! {
            line = input.recv() => {
                let Some(line) = line else {
                    info!("End of input");
                    break;
                };
                if terminal.handle_line(&line) == Flow::Quit {
                    break;
                }
            }
            Some(event) = events_rx.recv() => terminal.handle_event(event),
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }
    if !handle.is_running() {
        warn!("Controller task stopped; leaving the terminal");
    }

    shutdown(&handle).await;
    printer.abort();
    Ok(())
}
