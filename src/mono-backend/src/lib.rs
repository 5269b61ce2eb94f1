// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::HashMap;
use std::sync::Arc;

use mono_core::{Connector, DynResult};

#[cfg(feature = "serial")]
mod serial;
#[cfg(feature = "sim")]
mod sim;

#[cfg(feature = "serial")]
pub use serial::SerialConnector;
#[cfg(feature = "sim")]
pub use sim::{SimConnector, SimOptions, SimProbe};

pub type ConnectorFactory = fn() -> Arc<dyn Connector>;

/// Context for registering and instantiating link backends.
#[derive(Clone)]
pub struct RegistrationContext {
    factories: HashMap<String, ConnectorFactory>,
}

impl RegistrationContext {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory under a stable name (e.g. "serial").
    pub fn register_backend(&mut self, name: &str, factory: ConnectorFactory) {
        let key = normalize_name(name);
        self.factories.insert(key, factory);
    }

    pub fn is_backend_registered(&self, name: &str) -> bool {
        let key = normalize_name(name);
        self.factories.contains_key(&key)
    }

    /// List registered backend names.
    pub fn registered_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn build_connector(&self, name: &str) -> DynResult<Arc<dyn Connector>> {
        let key = normalize_name(name);
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| format!("Unknown link backend: {}", name))?;
        Ok(factory())
    }
}

impl Default for RegistrationContext {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_name(name: &str) -> String {
    name.to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Register all built-in backends enabled by features on a context.
pub fn register_builtin_backends_on(context: &mut RegistrationContext) {
    #[cfg(feature = "serial")]
    context.register_backend("serial", serial_factory);
    #[cfg(feature = "sim")]
    context.register_backend("sim", sim_factory);
}

#[cfg(feature = "serial")]
fn serial_factory() -> Arc<dyn Connector> {
    Arc::new(SerialConnector::new())
}

#[cfg(feature = "sim")]
fn sim_factory() -> Arc<dyn Connector> {
    Arc::new(SimConnector::new(SimOptions::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_backends_registered() {
        let mut context = RegistrationContext::new();
        register_builtin_backends_on(&mut context);
        assert_eq!(context.registered_backends(), vec!["serial", "sim"]);
        assert!(context.is_backend_registered("SIM"));
        assert!(context.is_backend_registered("Serial"));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let context = RegistrationContext::default();
        let err = context.build_connector("telnet").err().unwrap();
        assert_eq!(err.to_string(), "Unknown link backend: telnet");
    }

    #[test]
    fn test_build_sim_connector() {
        let mut context = RegistrationContext::new();
        register_builtin_backends_on(&mut context);
        let connector = context.build_connector("sim").unwrap();
        assert_eq!(connector.name(), "sim");
        assert_eq!(connector.list_ports().unwrap(), vec!["sim".to_string()]);
    }
}
