// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Handlers for commands arriving from the listener: connect replies,
//! outbound deliveries, acknowledgement relays and kicks.

use codec::v5::{Properties, Property, ReasonCode};
use codec::{
    BoolData, EncodePacket, ExpectedAck, PacketId, ProtocolLevel, QoS, StringData, U16Data,
    U32Data, VarInt,
};

use super::{Session, Status};
use crate::commands::ListenerToSessionCmd;
use crate::error::Error;
use crate::types::{
    ConnectError, ConnectReply, KickReason, OutboundPublish, SubscribeReply, UnsubscribeReply,
};

impl Session {
    pub(super) async fn handle_listener_cmd(
        &mut self,
        cmd: ListenerToSessionCmd,
    ) -> Result<(), Error> {
        match cmd {
            ListenerToSessionCmd::ConnectAck(reply) => self.on_connect_ack(reply).await,
            ListenerToSessionCmd::PublishAck(packet_id, qos, accepted) => {
                self.on_publish_result(packet_id, qos, accepted).await
            }
            ListenerToSessionCmd::Publish(outbound) => self.send_outbound_publish(outbound).await,
            ListenerToSessionCmd::SubscribeAck(packet_id, replies) => {
                self.on_subscribe_ack(packet_id, &replies).await
            }
            ListenerToSessionCmd::UnsubscribeAck(packet_id, replies) => {
                self.on_unsubscribe_ack(packet_id, &replies).await
            }
            ListenerToSessionCmd::Kick(reason) => self.on_kick(reason).await,
        }
    }

    async fn on_connect_ack(&mut self, reply: ConnectReply) -> Result<(), Error> {
        if self.status != Status::Connecting {
            log::warn!("session: Stale connect reply on {}", self.id);
            return Ok(());
        }

        if let Err(connect_error) = reply.result {
            self.send_connect_refusal(connect_error).await?;
            self.close_stream().await;
            return Ok(());
        }

        if reply.session_present {
            self.restore_state(&reply.state)?;
        }

        let requested_keep_alive = self.keep_alive;
        self.keep_alive = u64::from(reply.keep_alive);

        match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let packet = codec::v3::ConnectAckPacket::new(
                    reply.session_present,
                    codec::v3::ConnectReturnCode::Accepted,
                );
                self.status = Status::Connected;
                self.send(packet).await?;
            }
            ProtocolLevel::V5 => {
                let mut packet =
                    codec::v5::ConnectAckPacket::new(reply.session_present, ReasonCode::Success);
                let properties = self.connect_ack_properties(requested_keep_alive, reply.keep_alive);
                *packet.properties_mut() = properties;
                self.status = Status::Connected;
                self.send(packet).await?;
            }
        }

        // Replay unacknowledged entries in their original send order
        // before any fresh delivery goes out.
        if reply.session_present {
            self.replay_inflight().await?;
        }
        Ok(())
    }

    fn connect_ack_properties(&self, requested_keep_alive: u64, keep_alive: u16) -> Properties {
        let mut properties = Properties::new();
        // The server keep alive overrides the client's value when the
        // request exceeded the configured maximum [MQTT-3.2.2-21].
        if u64::from(keep_alive) != requested_keep_alive {
            properties.push(Property::ServerKeepAlive(U16Data::new(keep_alive)));
        }
        if self.assigned_client_id {
            if let Ok(client_id) = StringData::from(&self.client_id) {
                properties.push(Property::AssignedClientIdentifier(client_id));
            }
        }
        properties.push(Property::ReceiveMaximum(U16Data::new(
            self.config.receive_maximum(),
        )));
        properties.push(Property::TopicAliasMaximum(U16Data::new(
            self.config.topic_alias_maximum(),
        )));
        #[allow(clippy::cast_possible_truncation)]
        properties.push(Property::MaximumPacketSize(U32Data::new(
            self.config.maximum_packet_size() as u32,
        )));
        match self.config.maximum_qos() {
            QoS::ExactOnce => (),
            QoS::AtLeastOnce => properties.push(Property::MaximumQoS(BoolData::new(true))),
            QoS::AtMostOnce => properties.push(Property::MaximumQoS(BoolData::new(false))),
        }
        properties
    }

    async fn send_connect_refusal(&mut self, connect_error: ConnectError) -> Result<(), Error> {
        match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let return_code = match connect_error {
                    ConnectError::NotAuthorized => codec::v3::ConnectReturnCode::Unauthorized,
                    ConnectError::IdentifierRejected => {
                        codec::v3::ConnectReturnCode::IdentifierRejected
                    }
                    ConnectError::ServerUnavailable => {
                        codec::v3::ConnectReturnCode::ServerUnavailable
                    }
                };
                self.send(codec::v3::ConnectAckPacket::new(false, return_code))
                    .await
            }
            ProtocolLevel::V5 => {
                let reason_code = match connect_error {
                    ConnectError::NotAuthorized => ReasonCode::NotAuthorized,
                    ConnectError::IdentifierRejected => ReasonCode::ClientIdentifierNotValid,
                    ConnectError::ServerUnavailable => ReasonCode::ServerUnavailable,
                };
                self.send(codec::v5::ConnectAckPacket::new(false, reason_code))
                    .await
            }
        }
    }

    /// Relay the authorization outcome of an inbound publish as the
    /// matching acknowledgement packet.
    async fn on_publish_result(
        &mut self,
        packet_id: PacketId,
        qos: QoS,
        accepted: bool,
    ) -> Result<(), Error> {
        let reason = if accepted {
            ReasonCode::Success
        } else {
            ReasonCode::NotAuthorized
        };
        match qos {
            // A denied QoS 0 publish is dropped silently.
            QoS::AtMostOnce => Ok(()),
            QoS::AtLeastOnce => {
                self.pending_acl.remove(&packet_id);
                self.send_publish_ack(packet_id, reason).await
            }
            QoS::ExactOnce => {
                self.pending_acl.remove(&packet_id);
                if accepted {
                    self.qos2_handled.insert(packet_id);
                }
                self.send_publish_received(packet_id, reason).await
            }
        }
    }

    pub(super) async fn send_publish_ack(
        &mut self,
        packet_id: PacketId,
        reason: ReasonCode,
    ) -> Result<(), Error> {
        match self.protocol_level {
            // v3 has no reason codes; the ack itself is the only answer.
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                self.send(codec::v3::PublishAckPacket::new(packet_id)).await
            }
            ProtocolLevel::V5 => {
                let packet = if reason == ReasonCode::Success {
                    codec::v5::PublishAckPacket::new(packet_id)
                } else {
                    codec::v5::PublishAckPacket::with_reason(packet_id, reason)
                };
                self.send(packet).await
            }
        }
    }

    pub(super) async fn send_publish_received(
        &mut self,
        packet_id: PacketId,
        reason: ReasonCode,
    ) -> Result<(), Error> {
        match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                self.send(codec::v3::PublishReceivedPacket::new(packet_id))
                    .await
            }
            ProtocolLevel::V5 => {
                let packet = if reason == ReasonCode::Success {
                    codec::v5::PublishReceivedPacket::new(packet_id)
                } else {
                    codec::v5::PublishReceivedPacket::with_reason(packet_id, reason)
                };
                self.send(packet).await
            }
        }
    }

    /// Deliver one message to the connected client, allocating a packet
    /// id and storing the serialized bytes for QoS 1 and 2.
    pub(super) async fn send_outbound_publish(
        &mut self,
        outbound: OutboundPublish,
    ) -> Result<(), Error> {
        if self.status != Status::Connected {
            log::warn!("session: Dropping delivery on non-connected session {}", self.id);
            return Ok(());
        }

        if outbound.qos == QoS::AtMostOnce {
            let bytes = self.encode_outbound_publish(&outbound, PacketId::new(0), false)?;
            return self.send_bytes(&bytes).await;
        }

        // The peer's receive maximum bounds our unacknowledged sends;
        // excess deliveries wait for a released quota slot.
        if self.inflight.len() >= self.peer_receive_maximum {
            self.pending_out.push_back(outbound);
            return Ok(());
        }

        let packet_id = match self.packet_ids.allocate() {
            Ok(packet_id) => packet_id,
            Err(err) => {
                log::error!(
                    "session: Packet ids exhausted on {}, queueing delivery: {err:?}",
                    self.client_id
                );
                self.pending_out.push_back(outbound);
                return Ok(());
            }
        };

        let expected = match outbound.qos {
            QoS::AtLeastOnce => ExpectedAck::PublishAck,
            _ => ExpectedAck::PublishReceived,
        };
        let bytes = self.encode_outbound_publish(&outbound, packet_id, false)?;
        self.inflight
            .insert_or_update(packet_id, expected, bytes.clone());
        self.send_bytes(&bytes).await
    }

    /// Send queued deliveries while quota and packet ids are available.
    pub(super) async fn flush_pending_out(&mut self) -> Result<(), Error> {
        while self.inflight.len() < self.peer_receive_maximum {
            let before = self.pending_out.len();
            let Some(outbound) = self.pending_out.pop_front() else {
                return Ok(());
            };
            self.send_outbound_publish(outbound).await?;
            if self.pending_out.len() >= before {
                // The delivery was re-queued; no progress is possible
                // until an acknowledgement frees resources.
                return Ok(());
            }
        }
        Ok(())
    }

    fn encode_outbound_publish(
        &self,
        outbound: &OutboundPublish,
        packet_id: PacketId,
        dup: bool,
    ) -> Result<Vec<u8>, Error> {
        let message = &outbound.message;
        let mut bytes = Vec::new();
        match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let mut packet =
                    codec::v3::PublishPacket::new(&message.topic, outbound.qos, &message.payload)?;
                packet.set_retain(outbound.retain);
                packet.set_packet_id(packet_id);
                if dup && outbound.qos != QoS::AtMostOnce {
                    packet.set_dup(true)?;
                }
                packet.encode(&mut bytes)?;
            }
            ProtocolLevel::V5 => {
                let mut packet =
                    codec::v5::PublishPacket::new(&message.topic, outbound.qos, &message.payload)?;
                packet.set_retain(outbound.retain);
                packet.set_packet_id(packet_id);
                if dup && outbound.qos != QoS::AtMostOnce {
                    packet.set_dup(true)?;
                }

                let properties = packet.properties_mut();
                *properties = message.properties.clone();
                if let Some(expiry) = message.message_expiry_interval {
                    properties.set(Property::MessageExpiryInterval(U32Data::new(expiry)));
                }
                for subscription_id in &outbound.subscription_ids {
                    if let Ok(id) = VarInt::from(*subscription_id) {
                        properties.push(Property::SubscriptionIdentifier(id));
                    }
                }
                packet.encode(&mut bytes)?;
            }
        }
        Ok(bytes)
    }

    async fn on_subscribe_ack(
        &mut self,
        packet_id: PacketId,
        replies: &[SubscribeReply],
    ) -> Result<(), Error> {
        match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let acks = replies
                    .iter()
                    .map(|reply| match reply {
                        SubscribeReply::Granted(qos) => codec::v3::SubscribeAck::QoS(*qos),
                        _ => codec::v3::SubscribeAck::Failed,
                    })
                    .collect();
                self.send(codec::v3::SubscribeAckPacket::with_vec(acks, packet_id))
                    .await
            }
            ProtocolLevel::V5 => {
                let reasons = replies
                    .iter()
                    .map(|reply| match reply {
                        SubscribeReply::Granted(QoS::AtMostOnce) => ReasonCode::Success,
                        SubscribeReply::Granted(QoS::AtLeastOnce) => ReasonCode::GrantedQoS1,
                        SubscribeReply::Granted(QoS::ExactOnce) => ReasonCode::GrantedQoS2,
                        SubscribeReply::NotAuthorized => ReasonCode::NotAuthorized,
                        SubscribeReply::InvalidFilter => ReasonCode::TopicFilterInvalid,
                    })
                    .collect();
                self.send(codec::v5::SubscribeAckPacket::with_vec(reasons, packet_id))
                    .await
            }
        }
    }

    async fn on_unsubscribe_ack(
        &mut self,
        packet_id: PacketId,
        replies: &[UnsubscribeReply],
    ) -> Result<(), Error> {
        match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                self.send(codec::v3::UnsubscribeAckPacket::new(packet_id))
                    .await
            }
            ProtocolLevel::V5 => {
                let reasons = replies
                    .iter()
                    .map(|reply| match reply {
                        UnsubscribeReply::Success => ReasonCode::Success,
                        UnsubscribeReply::NoSubscriptionExisted => {
                            ReasonCode::NoSubscriptionExisted
                        }
                    })
                    .collect();
                self.send(codec::v5::UnsubscribeAckPacket::with_vec(reasons, packet_id))
                    .await
            }
        }
    }

    async fn on_kick(&mut self, reason: KickReason) -> Result<(), Error> {
        log::info!("session: Kicked, id: {}, reason: {reason:?}", self.id);
        if self.protocol_level == ProtocolLevel::V5 && self.status == Status::Connected {
            let reason_code = match reason {
                KickReason::SessionTakenOver => ReasonCode::SessionTakenOver,
                KickReason::ServerShuttingDown => ReasonCode::ServerShuttingDown,
            };
            let packet = codec::v5::DisconnectPacket::with_reason(reason_code);
            if let Err(err) = self.send(packet).await {
                log::warn!("session: Failed to send takeover disconnect: {err:?}");
            }
        }
        self.close_stream().await;
        Ok(())
    }
}
