// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Handlers for packets received from the client.

use codec::utils::random_string;
use codec::v5::PropertyType;
use codec::{ByteArray, DecodePacket, EncodePacket, FixedHeader, PacketType, ProtocolLevel, QoS};
use std::convert::TryFrom;

use super::{Session, Status};
use crate::commands::SessionToListenerCmd;
use crate::error::{Error, ErrorKind};
use crate::types::{
    ConnectRequest, PublishMessage, SubscribeFilter, SubscribeRequest, UnsubscribeRequest,
    WillMessage,
};

/// Length of generated client ids.
const ASSIGNED_CLIENT_ID_LEN: usize = 16;

impl Session {
    pub(super) async fn handle_client_packet(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let fixed_header = FixedHeader::decode(&mut ba)?;
        let packet_type = fixed_header.packet_type();

        // The first packet on a connection MUST be CONNECT [MQTT-3.1.0-1],
        // and CONNECT MUST NOT be sent a second time [MQTT-3.1.0-2].
        match self.status {
            Status::Invalid => {
                if packet_type != PacketType::Connect {
                    return Err(Error::from_string(
                        ErrorKind::ProtocolError,
                        format!("session: Expected CONNECT, got {packet_type:?}"),
                    ));
                }
            }
            Status::Connecting => {
                return Err(Error::from_string(
                    ErrorKind::ProtocolError,
                    format!("session: Got {packet_type:?} while connect is pending"),
                ));
            }
            Status::Connected => {
                if packet_type == PacketType::Connect {
                    return Err(Error::new(
                        ErrorKind::ProtocolError,
                        "session: Duplicated CONNECT packet",
                    ));
                }
            }
            Status::Disconnecting | Status::Disconnected => return Ok(()),
        }

        if !fixed_header.is_valid_header(self.protocol_level) {
            return Err(Error::new(
                ErrorKind::ProtocolError,
                "session: AUTH packet requires protocol version 5.0",
            ));
        }

        match packet_type {
            PacketType::Connect => self.on_client_connect(buf).await,
            PacketType::Publish { .. } => self.on_client_publish(buf).await,
            PacketType::PublishAck => self.on_client_publish_ack(buf).await,
            PacketType::PublishReceived => self.on_client_publish_received(buf).await,
            PacketType::PublishRelease => self.on_client_publish_release(buf).await,
            PacketType::PublishComplete => self.on_client_publish_complete(buf).await,
            PacketType::Subscribe => self.on_client_subscribe(buf).await,
            PacketType::Unsubscribe => self.on_client_unsubscribe(buf).await,
            PacketType::PingRequest => self.on_client_ping(buf).await,
            PacketType::Disconnect => self.on_client_disconnect(buf).await,
            PacketType::Auth => Err(Error::new(
                ErrorKind::ProtocolError,
                "session: Extended authentication is not supported",
            )),
            t => Err(Error::from_string(
                ErrorKind::ProtocolError,
                format!("session: Unexpected packet from client: {t:?}"),
            )),
        }
    }

    /// Read the protocol level out of a CONNECT packet body without
    /// decoding the whole packet.
    fn peek_protocol_level(buf: &[u8]) -> Result<ProtocolLevel, Error> {
        let mut ba = ByteArray::new(buf);
        let _fixed_header = FixedHeader::decode(&mut ba)?;
        let name_len = ba.read_u16()?;
        let _name = ba.read_bytes(name_len as usize)?;
        let level = ba.read_byte()?;
        Ok(ProtocolLevel::try_from(level)?)
    }

    async fn on_client_connect(&mut self, buf: &[u8]) -> Result<(), Error> {
        let protocol_level = match Self::peek_protocol_level(buf) {
            Ok(level) => level,
            Err(err) => {
                // The Server MUST respond with CONNACK return code 0x01
                // (unacceptable protocol level) and then disconnect if the
                // protocol level is not supported [MQTT-3.1.2-2].
                let packet = codec::v3::ConnectAckPacket::new(
                    false,
                    codec::v3::ConnectReturnCode::UnacceptedProtocol,
                );
                let _ = self.send(packet).await;
                self.close_stream().await;
                return Err(err);
            }
        };
        self.protocol_level = protocol_level;

        let request = match protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => self.parse_connect_v3(buf).await?,
            ProtocolLevel::V5 => self.parse_connect_v5(buf).await?,
        };
        let Some(request) = request else {
            // Refusal already written.
            return Ok(());
        };

        self.client_id = request.client_id.clone();
        self.assigned_client_id = request.assigned_client_id;
        self.keep_alive = u64::from(request.keep_alive);
        self.status = Status::Connecting;

        self.sender
            .send(SessionToListenerCmd::Connect(self.id, request))
            .await?;
        Ok(())
    }

    async fn parse_connect_v3(&mut self, buf: &[u8]) -> Result<Option<ConnectRequest>, Error> {
        let mut ba = ByteArray::new(buf);
        let packet = codec::v3::ConnectPacket::decode(&mut ba)?;

        let mut client_id = packet.client_id().to_string();
        let mut assigned = false;
        if client_id.is_empty() {
            // A zero-byte client id requires CleanSession=1; reject with
            // return code 0x02 otherwise [MQTT-3.1.3-8].
            if !packet.clean_session() {
                let ack = codec::v3::ConnectAckPacket::new(
                    false,
                    codec::v3::ConnectReturnCode::IdentifierRejected,
                );
                self.send(ack).await?;
                self.close_stream().await;
                return Ok(None);
            }
            client_id = random_string(ASSIGNED_CLIENT_ID_LEN);
            assigned = true;
        }

        let will = match packet.will_topic() {
            Some(topic) => Some(WillMessage {
                topic: topic.as_ref().to_string(),
                payload: bytes::Bytes::copy_from_slice(packet.will_message()),
                qos: packet.connect_flags().will_qos,
                retain: packet.connect_flags().will_retain,
                delay_interval: 0,
                message_expiry_interval: None,
                properties: codec::v5::Properties::new(),
            }),
            None => None,
        };

        // A v3 session with CleanSession=0 is kept until a clean connect
        // replaces it; there is no expiry interval on the wire.
        let session_expiry_interval = if packet.clean_session() {
            Some(0)
        } else {
            Some(u32::MAX)
        };

        Ok(Some(ConnectRequest {
            client_id,
            assigned_client_id: assigned,
            protocol_level: self.protocol_level,
            clean_session: packet.clean_session(),
            keep_alive: packet.keep_alive(),
            username: packet.username().to_string(),
            password: packet.password().to_vec(),
            will,
            session_expiry_interval,
            receive_maximum: None,
            topic_alias_maximum: None,
        }))
    }

    async fn parse_connect_v5(&mut self, buf: &[u8]) -> Result<Option<ConnectRequest>, Error> {
        let mut ba = ByteArray::new(buf);
        let packet = codec::v5::ConnectPacket::decode(&mut ba)?;

        if packet.properties().get(PropertyType::AuthenticationMethod).is_some() {
            let ack = codec::v5::ConnectAckPacket::new(
                false,
                codec::v5::ReasonCode::BadAuthenticationMethod,
            );
            self.send(ack).await?;
            self.close_stream().await;
            return Ok(None);
        }

        let mut client_id = packet.client_id().to_string();
        let mut assigned = false;
        if client_id.is_empty() {
            // The Server MUST respond with an Assigned Client Identifier
            // when the client id is empty [MQTT-3.2.2-16].
            client_id = random_string(ASSIGNED_CLIENT_ID_LEN);
            assigned = true;
        }

        // Remember the peer's limits for our own outbound flow control.
        if let Some(receive_maximum) = packet.properties().receive_maximum() {
            self.peer_receive_maximum = usize::from(receive_maximum);
        }

        let will = match packet.will_topic() {
            Some(topic) => {
                let will_properties = packet.will_properties();
                let mut properties = will_properties.clone();
                properties.remove(PropertyType::WillDelayInterval);
                properties.remove(PropertyType::MessageExpiryInterval);
                Some(WillMessage {
                    topic: topic.as_ref().to_string(),
                    payload: bytes::Bytes::copy_from_slice(packet.will_message()),
                    qos: packet.connect_flags().will_qos,
                    retain: packet.connect_flags().will_retain,
                    delay_interval: will_properties.will_delay_interval().unwrap_or(0),
                    message_expiry_interval: will_properties.message_expiry_interval(),
                    properties,
                })
            }
            None => None,
        };

        Ok(Some(ConnectRequest {
            client_id,
            assigned_client_id: assigned,
            protocol_level: ProtocolLevel::V5,
            clean_session: packet.clean_start(),
            keep_alive: packet.keep_alive(),
            username: packet.username().to_string(),
            password: packet.password().to_vec(),
            will,
            session_expiry_interval: Some(
                packet.properties().session_expiry_interval().unwrap_or(0),
            ),
            receive_maximum: packet.properties().receive_maximum(),
            topic_alias_maximum: packet.properties().topic_alias_maximum(),
        }))
    }

    async fn on_client_publish(&mut self, buf: &[u8]) -> Result<(), Error> {
        let message = match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let mut ba = ByteArray::new(buf);
                let packet = codec::v3::PublishPacket::decode(&mut ba)?;
                self.check_publish_qos(packet.qos())?;
                PublishMessage {
                    topic: packet.topic().to_string(),
                    qos: packet.qos(),
                    retain: packet.retain(),
                    payload: packet.message_bytes(),
                    message_expiry_interval: None,
                    properties: codec::v5::Properties::new(),
                    packet_id: packet.packet_id(),
                }
            }
            ProtocolLevel::V5 => {
                let mut ba = ByteArray::new(buf);
                let packet = codec::v5::PublishPacket::decode(&mut ba)?;
                self.check_publish_qos(packet.qos())?;
                self.parse_publish_v5(&packet)?
            }
        };

        match message.qos {
            QoS::AtMostOnce => {
                self.sender
                    .send(SessionToListenerCmd::Publish(self.id, message))
                    .await?;
            }
            QoS::AtLeastOnce | QoS::ExactOnce => {
                let packet_id = message.packet_id;

                // A duplicated QoS 2 publish between PUBREC and PUBREL is
                // not re-delivered; only the PUBREC is repeated.
                if message.qos == QoS::ExactOnce && self.qos2_handled.contains(&packet_id) {
                    return self
                        .send_publish_received(packet_id, codec::v5::ReasonCode::Success)
                        .await;
                }

                if self.protocol_level == ProtocolLevel::V5
                    && self.inbound_quota_used() >= usize::from(self.config.receive_maximum())
                {
                    // Quota exhausted: acknowledge with an error reason
                    // and do not deliver.
                    log::warn!(
                        "session: Receive maximum reached on {}, rejecting publish {packet_id}",
                        self.client_id
                    );
                    let reason = codec::v5::ReasonCode::QuotaExceeded;
                    return match message.qos {
                        QoS::AtLeastOnce => self.send_publish_ack(packet_id, reason).await,
                        _ => self.send_publish_received(packet_id, reason).await,
                    };
                }

                self.pending_acl.insert(packet_id, message.qos);
                self.sender
                    .send(SessionToListenerCmd::Publish(self.id, message))
                    .await?;
            }
        }
        Ok(())
    }

    fn check_publish_qos(&self, qos: QoS) -> Result<(), Error> {
        if qos > self.config.maximum_qos() {
            return Err(Error::from_string(
                ErrorKind::ProtocolError,
                format!("session: QoS {qos:?} exceeds server maximum"),
            ));
        }
        Ok(())
    }

    /// Validate topic alias rules and strip per-connection properties
    /// before the message enters the broker.
    fn parse_publish_v5(
        &mut self,
        packet: &codec::v5::PublishPacket,
    ) -> Result<PublishMessage, Error> {
        let mut topic = packet.topic().to_string();

        if let Some(alias) = packet.properties().topic_alias() {
            if topic.is_empty() {
                // Empty topic resolves through a previously registered
                // alias; an unknown alias is a protocol error.
                match self.alias_recv.resolve(alias) {
                    Ok(Some(mapped)) => topic = mapped.to_string(),
                    Ok(None) => {
                        return Err(Error::from_string(
                            ErrorKind::ProtocolError,
                            format!("session: Unregistered topic alias {alias}"),
                        ));
                    }
                    Err(err) => {
                        return Err(Error::from_string(
                            ErrorKind::ProtocolError,
                            format!("session: Invalid topic alias {alias}: {err:?}"),
                        ));
                    }
                }
            } else if let Err(err) = self.alias_recv.register(alias, &topic) {
                return Err(Error::from_string(
                    ErrorKind::ProtocolError,
                    format!("session: Invalid topic alias {alias}: {err:?}"),
                ));
            }
        } else if topic.is_empty() {
            return Err(Error::new(
                ErrorKind::ProtocolError,
                "session: Empty topic without topic alias",
            ));
        }

        // A client publish MUST NOT carry a subscription identifier
        // [MQTT-3.3.4-6].
        if packet.properties().subscription_identifier().is_some() {
            return Err(Error::new(
                ErrorKind::ProtocolError,
                "session: Subscription identifier in client publish",
            ));
        }

        let mut properties = packet.properties().clone();
        // Alias maps are per connection; never forwarded.
        properties.remove(PropertyType::TopicAlias);
        let message_expiry_interval = properties.message_expiry_interval();
        properties.remove(PropertyType::MessageExpiryInterval);

        Ok(PublishMessage {
            topic,
            qos: packet.qos(),
            retain: packet.retain(),
            payload: packet.message_bytes(),
            message_expiry_interval,
            properties,
            packet_id: packet.packet_id(),
        })
    }

    async fn on_client_publish_ack(&mut self, buf: &[u8]) -> Result<(), Error> {
        let packet_id = match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let mut ba = ByteArray::new(buf);
                codec::v3::PublishAckPacket::decode(&mut ba)?.packet_id()
            }
            ProtocolLevel::V5 => {
                let mut ba = ByteArray::new(buf);
                codec::v5::PublishAckPacket::decode(&mut ba)?.packet_id()
            }
        };

        if self
            .inflight
            .erase(packet_id, codec::ExpectedAck::PublishAck)
        {
            self.packet_ids.release(packet_id);
        } else {
            log::warn!(
                "session: PUBACK for unknown packet id {packet_id} from {}",
                self.client_id
            );
        }
        self.flush_pending_out().await
    }

    async fn on_client_publish_received(&mut self, buf: &[u8]) -> Result<(), Error> {
        let (packet_id, success) = match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let mut ba = ByteArray::new(buf);
                let packet = codec::v3::PublishReceivedPacket::decode(&mut ba)?;
                (packet.packet_id(), true)
            }
            ProtocolLevel::V5 => {
                let mut ba = ByteArray::new(buf);
                let packet = codec::v5::PublishReceivedPacket::decode(&mut ba)?;
                (packet.packet_id(), !packet.reason_code().is_error())
            }
        };

        if !success {
            // The receiver refused the publish; the exchange ends here.
            if self
                .inflight
                .erase(packet_id, codec::ExpectedAck::PublishReceived)
            {
                self.packet_ids.release(packet_id);
            }
            return self.flush_pending_out().await;
        }

        if !self.inflight.contains(packet_id) {
            log::warn!(
                "session: PUBREC for unknown packet id {packet_id} from {}",
                self.client_id
            );
        }

        // Replace the stored PUBLISH with the PUBREL of the next
        // handshake step, keeping its replay position.
        let mut bytes = Vec::new();
        match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let pubrel = codec::v3::PublishReleasePacket::new(packet_id);
                pubrel.encode(&mut bytes)?;
            }
            ProtocolLevel::V5 => {
                let pubrel = codec::v5::PublishReleasePacket::new(packet_id);
                pubrel.encode(&mut bytes)?;
            }
        }
        self.inflight.insert_or_update(
            packet_id,
            codec::ExpectedAck::PublishComplete,
            bytes.clone(),
        );
        self.send_bytes(&bytes).await
    }

    async fn on_client_publish_release(&mut self, buf: &[u8]) -> Result<(), Error> {
        let packet_id = match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let mut ba = ByteArray::new(buf);
                codec::v3::PublishReleasePacket::decode(&mut ba)?.packet_id()
            }
            ProtocolLevel::V5 => {
                let mut ba = ByteArray::new(buf);
                codec::v5::PublishReleasePacket::decode(&mut ba)?.packet_id()
            }
        };

        let known = self.qos2_handled.remove(&packet_id);
        self.pending_acl.remove(&packet_id);

        match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let packet = codec::v3::PublishCompletePacket::new(packet_id);
                self.send(packet).await
            }
            ProtocolLevel::V5 => {
                let packet = if known {
                    codec::v5::PublishCompletePacket::new(packet_id)
                } else {
                    codec::v5::PublishCompletePacket::with_reason(
                        packet_id,
                        codec::v5::ReasonCode::PacketIdentifierNotFound,
                    )
                };
                self.send(packet).await
            }
        }
    }

    async fn on_client_publish_complete(&mut self, buf: &[u8]) -> Result<(), Error> {
        let packet_id = match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let mut ba = ByteArray::new(buf);
                codec::v3::PublishCompletePacket::decode(&mut ba)?.packet_id()
            }
            ProtocolLevel::V5 => {
                let mut ba = ByteArray::new(buf);
                codec::v5::PublishCompletePacket::decode(&mut ba)?.packet_id()
            }
        };

        if self
            .inflight
            .erase(packet_id, codec::ExpectedAck::PublishComplete)
        {
            self.packet_ids.release(packet_id);
        } else {
            log::warn!(
                "session: PUBCOMP for unknown packet id {packet_id} from {}",
                self.client_id
            );
        }
        self.flush_pending_out().await
    }

    async fn on_client_subscribe(&mut self, buf: &[u8]) -> Result<(), Error> {
        let request = match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let mut ba = ByteArray::new(buf);
                let packet = codec::v3::SubscribePacket::decode(&mut ba)?;
                SubscribeRequest {
                    packet_id: packet.packet_id(),
                    filters: packet
                        .topics()
                        .iter()
                        .map(|topic| SubscribeFilter {
                            filter: topic.topic().to_string(),
                            options: codec::v5::SubscribeOptions {
                                qos: topic.qos(),
                                ..codec::v5::SubscribeOptions::default()
                            },
                        })
                        .collect(),
                    subscription_id: None,
                }
            }
            ProtocolLevel::V5 => {
                let mut ba = ByteArray::new(buf);
                let packet = codec::v5::SubscribePacket::decode(&mut ba)?;
                let request = SubscribeRequest {
                    packet_id: packet.packet_id(),
                    filters: packet
                        .topics()
                        .iter()
                        .map(|topic| SubscribeFilter {
                            filter: topic.topic().to_string(),
                            options: *topic.options(),
                        })
                        .collect(),
                    subscription_id: packet.properties().subscription_identifier(),
                };

                // It is a Protocol Error to set the No Local option on a
                // shared subscription [MQTT-3.8.3-4].
                for filter in &request.filters {
                    if filter.options.no_local
                        && filter.filter.starts_with(codec::topic::SHARE_PREFIX)
                    {
                        return Err(Error::new(
                            ErrorKind::ProtocolError,
                            "session: No Local is invalid on a shared subscription",
                        ));
                    }
                }
                request
            }
        };

        self.sender
            .send(SessionToListenerCmd::Subscribe(self.id, request))
            .await?;
        Ok(())
    }

    async fn on_client_unsubscribe(&mut self, buf: &[u8]) -> Result<(), Error> {
        let request = match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let mut ba = ByteArray::new(buf);
                let packet = codec::v3::UnsubscribePacket::decode(&mut ba)?;
                UnsubscribeRequest {
                    packet_id: packet.packet_id(),
                    filters: packet
                        .topics()
                        .iter()
                        .map(|topic| topic.as_ref().to_string())
                        .collect(),
                }
            }
            ProtocolLevel::V5 => {
                let mut ba = ByteArray::new(buf);
                let packet = codec::v5::UnsubscribePacket::decode(&mut ba)?;
                UnsubscribeRequest {
                    packet_id: packet.packet_id(),
                    filters: packet
                        .topics()
                        .iter()
                        .map(|topic| topic.as_ref().to_string())
                        .collect(),
                }
            }
        };

        self.sender
            .send(SessionToListenerCmd::Unsubscribe(self.id, request))
            .await?;
        Ok(())
    }

    async fn on_client_ping(&mut self, buf: &[u8]) -> Result<(), Error> {
        match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let mut ba = ByteArray::new(buf);
                let _packet = codec::v3::PingRequestPacket::decode(&mut ba)?;
                self.send(codec::v3::PingResponsePacket::new()).await
            }
            ProtocolLevel::V5 => {
                let mut ba = ByteArray::new(buf);
                let _packet = codec::v5::PingRequestPacket::decode(&mut ba)?;
                self.send(codec::v5::PingResponsePacket::new()).await
            }
        }
    }

    async fn on_client_disconnect(&mut self, buf: &[u8]) -> Result<(), Error> {
        match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let mut ba = ByteArray::new(buf);
                let _packet = codec::v3::DisconnectPacket::decode(&mut ba)?;
                self.graceful_disconnect = true;
            }
            ProtocolLevel::V5 => {
                let mut ba = ByteArray::new(buf);
                let packet = codec::v5::DisconnectPacket::decode(&mut ba)?;
                // A normal disconnection discards the Will; the dedicated
                // reason code requests its publication [MQTT-3.14.4-3].
                self.graceful_disconnect =
                    packet.reason_code() == codec::v5::ReasonCode::Success;
                self.disconnect_expiry = packet.properties().session_expiry_interval();
            }
        }
        self.status = Status::Disconnected;
        Ok(())
    }
}
