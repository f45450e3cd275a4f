// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use codec::utils::random_string;
use codec::QoS;
use std::time::Duration;

/// How to reach the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectType {
    /// Plain TCP, `host:port`.
    Mqtt(String),

    /// TCP with TLS; the domain is used for certificate validation.
    Mqtts { address: String, domain: String },

    /// WebSocket, `ws://host:port/path`.
    Ws(String),

    /// WebSocket over TLS, `wss://host:port/path`.
    Wss(String),
}

/// Will message registered at connect time.
#[derive(Debug, Clone)]
pub struct WillOptions {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,

    /// v5 will delay interval in seconds.
    pub delay_interval: u32,
}

/// Connection parameters of one client.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    connect_type: ConnectType,
    client_id: String,
    clean_session: bool,
    keep_alive: Duration,
    username: String,
    password: Vec<u8>,
    will: Option<WillOptions>,

    /// v5 session expiry interval in seconds.
    session_expiry_interval: u32,

    /// v5 receive maximum advertised to the broker.
    receive_maximum: Option<u16>,

    /// v5 topic alias maximum advertised to the broker.
    topic_alias_maximum: Option<u16>,

    /// How long to wait for the PINGRESP before the connection is
    /// considered dead. Disabled when `None`.
    pingresp_timeout: Option<Duration>,

    connect_timeout: Duration,
}

/// Length of generated client ids.
const RANDOM_CLIENT_ID_LEN: usize = 12;

impl ConnectOptions {
    /// Plain TCP connection to `address` with a random client id.
    #[must_use]
    pub fn new(address: &str) -> Self {
        Self {
            connect_type: ConnectType::Mqtt(address.to_string()),
            client_id: format!("yan-{}", random_string(RANDOM_CLIENT_ID_LEN)),
            clean_session: true,
            keep_alive: Duration::from_secs(60),
            username: String::new(),
            password: Vec::new(),
            will: None,
            session_expiry_interval: 0,
            receive_maximum: None,
            topic_alias_maximum: None,
            pingresp_timeout: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_connect_type(mut self, connect_type: ConnectType) -> Self {
        self.connect_type = connect_type;
        self
    }

    #[must_use]
    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.client_id = client_id.to_string();
        self
    }

    #[must_use]
    pub const fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    #[must_use]
    pub const fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, username: &str, password: &[u8]) -> Self {
        self.username = username.to_string();
        self.password = password.to_vec();
        self
    }

    #[must_use]
    pub fn with_will(mut self, will: WillOptions) -> Self {
        self.will = Some(will);
        self
    }

    #[must_use]
    pub const fn with_session_expiry_interval(mut self, seconds: u32) -> Self {
        self.session_expiry_interval = seconds;
        self
    }

    #[must_use]
    pub const fn with_receive_maximum(mut self, receive_maximum: u16) -> Self {
        self.receive_maximum = Some(receive_maximum);
        self
    }

    #[must_use]
    pub const fn with_topic_alias_maximum(mut self, topic_alias_maximum: u16) -> Self {
        self.topic_alias_maximum = Some(topic_alias_maximum);
        self
    }

    #[must_use]
    pub const fn with_pingresp_timeout(mut self, timeout: Duration) -> Self {
        self.pingresp_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn connect_type(&self) -> &ConnectType {
        &self.connect_type
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn password(&self) -> &[u8] {
        &self.password
    }

    #[must_use]
    pub const fn will(&self) -> Option<&WillOptions> {
        self.will.as_ref()
    }

    #[must_use]
    pub const fn session_expiry_interval(&self) -> u32 {
        self.session_expiry_interval
    }

    #[must_use]
    pub const fn receive_maximum(&self) -> Option<u16> {
        self.receive_maximum
    }

    #[must_use]
    pub const fn topic_alias_maximum(&self) -> Option<u16> {
        self.topic_alias_maximum
    }

    #[must_use]
    pub const fn pingresp_timeout(&self) -> Option<Duration> {
        self.pingresp_timeout
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConnectOptions::new("127.0.0.1:1883");
        assert!(options.client_id().starts_with("yan-"));
        assert!(options.clean_session());
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert!(options.pingresp_timeout().is_none());
        assert_eq!(
            options.connect_type(),
            &ConnectType::Mqtt("127.0.0.1:1883".to_string())
        );
    }

    #[test]
    fn test_builder() {
        let options = ConnectOptions::new("127.0.0.1:1883")
            .with_client_id("c1")
            .with_clean_session(false)
            .with_credentials("user", b"pass")
            .with_session_expiry_interval(300)
            .with_topic_alias_maximum(8)
            .with_pingresp_timeout(Duration::from_secs(5));
        assert_eq!(options.client_id(), "c1");
        assert!(!options.clean_session());
        assert_eq!(options.username(), "user");
        assert_eq!(options.password(), b"pass");
        assert_eq!(options.session_expiry_interval(), 300);
        assert_eq!(options.topic_alias_maximum(), Some(8));
        assert_eq!(options.pingresp_timeout(), Some(Duration::from_secs(5)));
    }
}
