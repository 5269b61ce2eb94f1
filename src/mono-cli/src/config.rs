// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for mono-cli.
//!
//! Config is loaded from the `[mono-cli]` section of `monochromator.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./monochromator.toml`
//! 3. `~/.config/monochromator/monochromator.toml`
//! 4. `/etc/monochromator/monochromator.toml`

use std::time::Duration;

use serde::{Deserialize, Serialize};

use mono_app::ConfigFile;
use mono_core::{ExchangePolicy, LinkSettings};

/// Top-level mono-cli configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub general: GeneralConfig,
    /// Serial link to the controller board
    pub link: LinkConfig,
    /// Bounds on waiting for firmware replies
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Link backend ("serial" or "sim")
    pub backend: String,
    /// Port opened by `connect` when none is given
    pub port: Option<String>,
    pub baud: u32,
    pub read_timeout_ms: u64,
    /// Pause after opening the port while the board resets
    pub settle_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            backend: "serial".to_string(),
            port: None,
            baud: 9600,
            read_timeout_ms: 1000,
            settle_ms: 100,
        }
    }
}

impl LinkConfig {
    /// Link parameters applied to every connect. The port is filled in
    /// when connecting.
    pub fn settings(&self) -> LinkSettings {
        LinkSettings {
            port: self.port.clone().unwrap_or_default(),
            baud: self.baud,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            settle: Duration::from_millis(self.settle_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Silence that ends the start-up banner
    pub quiescence_ms: u64,
    /// How long `init` waits for the first banner line
    pub banner_wait_ms: u64,
    /// Upper bound on home, grating and wavelength replies
    pub terminal_timeout_secs: u64,
    /// How long an idle emergency stop waits for its acknowledgement
    pub stop_ack_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            quiescence_ms: 300,
            banner_wait_ms: 2000,
            terminal_timeout_secs: 120,
            stop_ack_ms: 1500,
        }
    }
}

impl TimingConfig {
    pub fn policy(&self) -> ExchangePolicy {
        ExchangePolicy::new(
            Duration::from_millis(self.quiescence_ms),
            Duration::from_millis(self.banner_wait_ms),
            Duration::from_secs(self.terminal_timeout_secs),
            Duration::from_millis(self.stop_ack_ms),
        )
    }
}

impl CliConfig {
    /// Validate the configuration. `backends` lists the registered link
    /// backends.
    pub fn validate(&self, backends: &[String]) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        if !backends.iter().any(|b| b == &self.link.backend.to_ascii_lowercase()) {
            return Err(format!(
                "[link].backend '{}' is unknown (available: {})",
                self.link.backend,
                backends.join(", ")
            ));
        }
        if self.link.port.as_deref().is_some_and(|p| p.trim().is_empty()) {
            return Err("[link].port must not be empty when set".to_string());
        }
        if self.link.baud == 0 {
            return Err("[link].baud must be > 0".to_string());
        }
        if self.link.read_timeout_ms == 0 {
            return Err("[link].read_timeout_ms must be > 0".to_string());
        }

        if self.timing.quiescence_ms == 0 {
            return Err("[timing].quiescence_ms must be > 0".to_string());
        }
        if self.timing.banner_wait_ms == 0 {
            return Err("[timing].banner_wait_ms must be > 0".to_string());
        }
        if self.timing.terminal_timeout_secs == 0 {
            return Err("[timing].terminal_timeout_secs must be > 0".to_string());
        }
        if self.timing.stop_ack_ms == 0 {
            return Err("[timing].stop_ack_ms must be > 0".to_string());
        }
        Ok(())
    }

    pub fn example_toml() -> String {
        let example = CliConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            link: LinkConfig {
                port: Some("/dev/ttyACM0".to_string()),
                ..LinkConfig::default()
            },
            timing: TimingConfig::default(),
        };

        let mut root = toml::Table::new();
        match toml::Value::try_from(&example) {
            Ok(section) => {
                root.insert(Self::section_key().to_string(), section);
            }
            Err(_) => return String::new(),
        }
        toml::to_string_pretty(&root).unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        if mono_app::parse_level(level).is_none() {
            return Err(format!(
                "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                level
            ));
        }
    }
    Ok(())
}

impl ConfigFile for CliConfig {
    fn section_key() -> &'static str {
        "mono-cli"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backends() -> Vec<String> {
        vec!["serial".to_string(), "sim".to_string()]
    }

    #[test]
    fn test_default_config() {
        let config = CliConfig::default();
        assert_eq!(config.link.backend, "serial");
        assert_eq!(config.link.baud, 9600);
        assert_eq!(config.link.read_timeout_ms, 1000);
        assert_eq!(config.link.settle_ms, 100);
        assert_eq!(config.timing.terminal_timeout_secs, 120);
        assert_eq!(config.timing.policy(), ExchangePolicy::default());
        assert_eq!(config.link.settings(), LinkSettings::default());
        assert!(config.validate(&backends()).is_ok());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = CliConfig::load_from_str(
            r#"
[mono-cli.link]
backend = "sim"
port = "sim"
"#,
        )
        .unwrap();
        assert_eq!(config.link.backend, "sim");
        assert_eq!(config.link.port.as_deref(), Some("sim"));
        assert_eq!(config.link.baud, 9600);
        assert_eq!(config.timing, TimingConfig::default());
    }

    #[test]
    fn test_parse_full_toml() {
        let config = CliConfig::load_from_str(
            r#"
[mono-cli.general]
log_level = "debug"

[mono-cli.link]
backend = "serial"
port = "COM4"
baud = 115200
read_timeout_ms = 500
settle_ms = 2000

[mono-cli.timing]
quiescence_ms = 250
banner_wait_ms = 5000
terminal_timeout_secs = 60
stop_ack_ms = 1000
"#,
        )
        .unwrap();
        assert_eq!(config.general.log_level.as_deref(), Some("debug"));
        let settings = config.link.settings();
        assert_eq!(settings.port, "COM4");
        assert_eq!(settings.baud, 115200);
        assert_eq!(settings.settle, Duration::from_secs(2));
        let policy = config.timing.policy();
        assert_eq!(policy.terminal_timeout, Duration::from_secs(60));
        assert_eq!(policy.stop_ack, Duration::from_secs(1));
        assert!(config.validate(&backends()).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = CliConfig::default();
        config.link.baud = 0;
        assert_eq!(
            config.validate(&backends()).unwrap_err(),
            "[link].baud must be > 0"
        );

        let mut config = CliConfig::default();
        config.timing.terminal_timeout_secs = 0;
        assert!(config
            .validate(&backends())
            .unwrap_err()
            .contains("terminal_timeout_secs"));

        let mut config = CliConfig::default();
        config.general.log_level = Some("chatty".to_string());
        assert!(config.validate(&backends()).unwrap_err().contains("log_level"));

        let mut config = CliConfig::default();
        config.link.backend = "usb".to_string();
        assert!(config
            .validate(&backends())
            .unwrap_err()
            .contains("available: serial, sim"));
    }

    #[test]
    fn test_example_round_trips() {
        let example = CliConfig::example_toml();
        assert!(example.contains("[mono-cli.link]"));
        let config = CliConfig::load_from_str(&example).unwrap();
        assert_eq!(config.link.port.as_deref(), Some("/dev/ttyACM0"));
        assert!(config.validate(&backends()).is_ok());
    }
}
