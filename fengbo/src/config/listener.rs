// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind};

/// Transport binding of one listener.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain TCP.
    Mqtt,

    /// TCP with TLS.
    Mqtts,

    /// WebSocket over TCP.
    Ws,

    /// WebSocket over TLS.
    Wss,
}

/// One `[[listeners]]` entry in config.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Listener {
    #[serde(default = "Listener::default_protocol")]
    protocol: Protocol,

    /// Socket address to bind, like `0.0.0.0:1883`.
    #[serde(default = "Listener::default_address")]
    address: String,

    /// PEM cert chain file, required for mqtts and wss.
    #[serde(default)]
    cert_file: Option<PathBuf>,

    /// PEM private key file, required for mqtts and wss.
    #[serde(default)]
    key_file: Option<PathBuf>,

    /// Expected request path for websocket upgrades; any path is accepted
    /// when unset.
    #[serde(default)]
    path: Option<String>,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            protocol: Self::default_protocol(),
            address: Self::default_address(),
            cert_file: None,
            key_file: None,
            path: None,
        }
    }
}

impl Listener {
    #[must_use]
    pub const fn default_protocol() -> Protocol {
        Protocol::Mqtt
    }

    #[must_use]
    pub fn default_address() -> String {
        "0.0.0.0:1883".to_string()
    }

    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn cert_file(&self) -> Option<&Path> {
        self.cert_file.as_deref()
    }

    #[must_use]
    pub fn key_file(&self) -> Option<&Path> {
        self.key_file.as_deref()
    }

    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if matches!(self.protocol, Protocol::Mqtts | Protocol::Wss)
            && (self.cert_file.is_none() || self.key_file.is_none())
        {
            return Err(Error::from_string(
                ErrorKind::ConfigError,
                format!(
                    "listener {} requires cert_file and key_file",
                    self.address
                ),
            ));
        }
        Ok(())
    }
}
