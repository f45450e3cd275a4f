// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Broker config file, toml format.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::Error;

mod general;
mod listener;
mod log;
mod security;

pub use general::General;
pub use listener::{Listener, Protocol};
pub use log::{Log, LogLevel};
pub use security::Security;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    general: General,

    #[serde(default = "Config::default_listeners")]
    listeners: Vec<Listener>,

    #[serde(default)]
    security: Security,

    #[serde(default)]
    log: Log,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: General::default(),
            listeners: Self::default_listeners(),
            security: Security::default(),
            log: Log::default(),
        }
    }
}

impl Config {
    fn default_listeners() -> Vec<Listener> {
        vec![Listener::default()]
    }

    /// Load config from `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the file is unreadable or not valid toml.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check config values are within their valid ranges.
    ///
    /// # Errors
    ///
    /// Returns error if some value is out of range.
    pub fn validate(&self) -> Result<(), Error> {
        self.general.validate()?;
        for listener in &self.listeners {
            listener.validate()?;
        }
        Ok(())
    }

    #[must_use]
    pub const fn general(&self) -> &General {
        &self.general
    }

    #[must_use]
    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    #[must_use]
    pub const fn security(&self) -> &Security {
        &self.security
    }

    #[must_use]
    pub const fn log(&self) -> &Log {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.listeners().len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_listeners() {
        let content = r#"
[general]
maximum_qos = 1
receive_maximum = 32

[[listeners]]
protocol = "mqtt"
address = "0.0.0.0:1883"

[[listeners]]
protocol = "ws"
address = "0.0.0.0:8083"
path = "/mqtt"
"#;
        let config: Config = toml::from_str(content).unwrap();
        assert_eq!(config.listeners().len(), 2);
        assert_eq!(config.general().receive_maximum(), 32);
    }
}
