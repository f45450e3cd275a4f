// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use codec::QoS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, ErrorKind};

/// General section in config.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct General {
    /// For MQTT v5 clients, the server sends a "server keep_alive" value
    /// overriding the keep_alive requested by the client when the request
    /// exceeds this maximum. Earlier protocol versions are disconnected
    /// when idle past 1.5 times their own keep alive.
    ///
    /// Default is 65535.
    #[serde(default = "General::default_maximum_keep_alive")]
    maximum_keep_alive: u16,

    /// Time interval in seconds before an established network connection
    /// must finish the CONNECT handshake.
    ///
    /// Default is 60.
    #[serde(default = "General::default_connect_timeout")]
    connect_timeout: u64,

    /// Set the maximum QoS supported.
    ///
    /// Clients publishing at a QoS higher than specified here will be
    /// disconnected. Available values are 0, 1 and 2.
    ///
    /// Default is 2.
    #[serde(default = "General::default_maximum_qos")]
    maximum_qos: QoS,

    /// Maximum size in bytes of one MQTT packet, including the fixed
    /// header. Clients sending larger packets are disconnected with a
    /// "packet too large" reason.
    ///
    /// Default is 268435455, the protocol limit. Values below 20 are
    /// rejected because they interfere with ordinary client operation.
    #[serde(default = "General::default_maximum_packet_size")]
    maximum_packet_size: u32,

    /// Maximum number of unacknowledged QoS 1 and QoS 2 publishes the
    /// broker accepts concurrently from one client. Further publishes are
    /// answered with a "quota exceeded" reason without being delivered.
    ///
    /// Default is 64.
    #[serde(default = "General::default_receive_maximum")]
    receive_maximum: u16,

    /// Highest topic alias value accepted from v5 clients. 0 disables
    /// topic aliases.
    ///
    /// Default is 32.
    #[serde(default = "General::default_topic_alias_maximum")]
    topic_alias_maximum: u16,

    /// Maximum number of messages queued for an offline session with
    /// QoS 1 or 2 subscriptions. The oldest message is dropped when the
    /// queue is full.
    ///
    /// Default is 1000.
    #[serde(default = "General::default_maximum_queued_messages")]
    maximum_queued_messages: usize,

    /// Seconds to wait for a graceful TLS/WebSocket close before the
    /// socket is closed hard.
    ///
    /// Default is 10.
    #[serde(default = "General::default_shutdown_timeout")]
    shutdown_timeout: u64,

    /// Read the whole packet body in one call when the remaining length
    /// is below this limit; larger bodies are read in chunks on demand.
    ///
    /// Default is 256.
    #[serde(default = "General::default_packet_bulk_read_limit")]
    packet_bulk_read_limit: usize,
}

impl General {
    #[must_use]
    pub const fn default_maximum_keep_alive() -> u16 {
        u16::MAX
    }

    #[must_use]
    pub const fn default_connect_timeout() -> u64 {
        60
    }

    #[must_use]
    pub const fn default_maximum_qos() -> QoS {
        QoS::ExactOnce
    }

    #[must_use]
    pub const fn default_maximum_packet_size() -> u32 {
        codec::MAX_PACKET_LEN as u32
    }

    #[must_use]
    pub const fn default_receive_maximum() -> u16 {
        64
    }

    #[must_use]
    pub const fn default_topic_alias_maximum() -> u16 {
        32
    }

    #[must_use]
    pub const fn default_maximum_queued_messages() -> usize {
        1000
    }

    #[must_use]
    pub const fn default_shutdown_timeout() -> u64 {
        10
    }

    #[must_use]
    pub const fn default_packet_bulk_read_limit() -> usize {
        256
    }

    #[must_use]
    pub const fn maximum_keep_alive(&self) -> u16 {
        self.maximum_keep_alive
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> u64 {
        self.connect_timeout
    }

    #[must_use]
    pub const fn maximum_qos(&self) -> QoS {
        self.maximum_qos
    }

    #[must_use]
    pub const fn maximum_packet_size(&self) -> u32 {
        self.maximum_packet_size
    }

    #[must_use]
    pub const fn receive_maximum(&self) -> u16 {
        self.receive_maximum
    }

    #[must_use]
    pub const fn topic_alias_maximum(&self) -> u16 {
        self.topic_alias_maximum
    }

    #[must_use]
    pub const fn maximum_queued_messages(&self) -> usize {
        self.maximum_queued_messages
    }

    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    #[must_use]
    pub const fn packet_bulk_read_limit(&self) -> usize {
        self.packet_bulk_read_limit
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.maximum_packet_size < 20 {
            return Err(Error::from_string(
                ErrorKind::ConfigError,
                format!(
                    "maximum_packet_size must be at least 20 bytes, got {}",
                    self.maximum_packet_size
                ),
            ));
        }
        if self.maximum_packet_size as usize > codec::MAX_PACKET_LEN {
            return Err(Error::from_string(
                ErrorKind::ConfigError,
                format!(
                    "maximum_packet_size exceeds the protocol limit, got {}",
                    self.maximum_packet_size
                ),
            ));
        }
        if self.receive_maximum == 0 {
            return Err(Error::new(
                ErrorKind::ConfigError,
                "receive_maximum must not be zero",
            ));
        }
        Ok(())
    }
}

impl Default for General {
    fn default() -> Self {
        Self {
            maximum_keep_alive: Self::default_maximum_keep_alive(),
            connect_timeout: Self::default_connect_timeout(),
            maximum_qos: Self::default_maximum_qos(),
            maximum_packet_size: Self::default_maximum_packet_size(),
            receive_maximum: Self::default_receive_maximum(),
            topic_alias_maximum: Self::default_topic_alias_maximum(),
            maximum_queued_messages: Self::default_maximum_queued_messages(),
            shutdown_timeout: Self::default_shutdown_timeout(),
            packet_bulk_read_limit: Self::default_packet_bulk_read_limit(),
        }
    }
}
