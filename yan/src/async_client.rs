// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

//! Public async client, a thin wrapper spawning the protocol state
//! machine and exchanging commands and events with it.

use bytes::Bytes;
use codec::{PacketId, ProtocolLevel, QoS};
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::client_inner_v3::ClientInnerV3;
use crate::client_inner_v5::ClientInnerV5;
use crate::connect_options::ConnectOptions;
use crate::error::{Error, ErrorKind};

const CHANNEL_CAPACITY: usize = 32;

/// Requests from the application to the client task.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    Publish {
        topic: String,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    },

    /// Publish registering `alias` for `topic` on the send side; later
    /// publishes with the same alias may leave the topic empty (v5 only).
    PublishWithAlias {
        topic: String,
        alias: u16,
        qos: QoS,
        payload: Vec<u8>,
    },

    Subscribe {
        topic: String,
        qos: QoS,
    },

    Unsubscribe {
        topic: String,
    },

    /// Re-establish the connection, resuming the session when clean
    /// session is off.
    Reconnect,

    Disconnect,
}

/// Notifications from the client task to the application.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// CONNACK received with success.
    Connected { session_present: bool },

    /// Broker refused the connection.
    ConnectRefused,

    /// An application message arrived.
    Message {
        topic: String,
        qos: QoS,
        retain: bool,
        payload: Bytes,
    },

    /// A QoS 1 or QoS 2 publish finished its handshake.
    PublishDone(PacketId),

    SubscribeDone(PacketId),

    UnsubscribeDone(PacketId),

    /// PINGRESP did not arrive within the configured timeout.
    PingTimeout,

    /// The connection is gone, either on request or by failure.
    Disconnected,
}

/// Async MQTT client handle.
///
/// The protocol state machine runs in a background task; this handle
/// sends commands to it and receives events from it.
pub struct AsyncClient {
    command_sender: Sender<ClientCommand>,
    event_receiver: Receiver<ClientEvent>,
}

impl AsyncClient {
    /// Connect with `options` speaking the given protocol version.
    ///
    /// # Errors
    ///
    /// Returns error if the transport cannot be established.
    pub async fn connect(
        options: ConnectOptions,
        protocol_level: ProtocolLevel,
    ) -> Result<Self, Error> {
        let (command_sender, command_receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_sender, event_receiver) = mpsc::channel(CHANNEL_CAPACITY);

        match protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let mut inner = ClientInnerV3::new(options, event_sender);
                inner.connect().await?;
                tokio::spawn(async move { inner.run_loop(command_receiver).await });
            }
            ProtocolLevel::V5 => {
                let mut inner = ClientInnerV5::new(options, event_sender);
                inner.connect().await?;
                tokio::spawn(async move { inner.run_loop(command_receiver).await });
            }
        }

        Ok(Self {
            command_sender,
            event_receiver,
        })
    }

    async fn send_command(&self, command: ClientCommand) -> Result<(), Error> {
        self.command_sender.send(command).await.map_err(|err| {
            Error::from_string(ErrorKind::ChannelError, format!("Client task gone: {err}"))
        })
    }

    /// Publish `payload` to `topic`.
    ///
    /// # Errors
    ///
    /// Returns error if the client task has terminated.
    pub async fn publish(&self, topic: &str, qos: QoS, payload: &[u8]) -> Result<(), Error> {
        self.send_command(ClientCommand::Publish {
            topic: topic.to_string(),
            qos,
            retain: false,
            payload: payload.to_vec(),
        })
        .await
    }

    /// Publish a retained message.
    ///
    /// # Errors
    ///
    /// Returns error if the client task has terminated.
    pub async fn publish_retained(
        &self,
        topic: &str,
        qos: QoS,
        payload: &[u8],
    ) -> Result<(), Error> {
        self.send_command(ClientCommand::Publish {
            topic: topic.to_string(),
            qos,
            retain: true,
            payload: payload.to_vec(),
        })
        .await
    }

    /// Publish while registering a send-side topic alias (v5 only).
    ///
    /// # Errors
    ///
    /// Returns error if the client task has terminated.
    pub async fn publish_with_alias(
        &self,
        topic: &str,
        alias: u16,
        qos: QoS,
        payload: &[u8],
    ) -> Result<(), Error> {
        self.send_command(ClientCommand::PublishWithAlias {
            topic: topic.to_string(),
            alias,
            qos,
            payload: payload.to_vec(),
        })
        .await
    }

    /// Subscribe to `topic` with maximum `qos`.
    ///
    /// # Errors
    ///
    /// Returns error if the client task has terminated.
    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Error> {
        self.send_command(ClientCommand::Subscribe {
            topic: topic.to_string(),
            qos,
        })
        .await
    }

    /// Remove the subscription of `topic`.
    ///
    /// # Errors
    ///
    /// Returns error if the client task has terminated.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), Error> {
        self.send_command(ClientCommand::Unsubscribe {
            topic: topic.to_string(),
        })
        .await
    }

    /// Re-establish a dropped connection.
    ///
    /// # Errors
    ///
    /// Returns error if the client task has terminated.
    pub async fn reconnect(&self) -> Result<(), Error> {
        self.send_command(ClientCommand::Reconnect).await
    }

    /// Send DISCONNECT and close.
    ///
    /// # Errors
    ///
    /// Returns error if the client task has terminated.
    pub async fn disconnect(&self) -> Result<(), Error> {
        self.send_command(ClientCommand::Disconnect).await
    }

    /// Wait for the next client event. Returns `None` when the client
    /// task has terminated.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.event_receiver.recv().await
    }
}
