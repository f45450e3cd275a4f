// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use bytes::Bytes;
use std::io::Write;

use super::property::check_property_type_list;
use super::{Properties, PropertyType};
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet, PacketId,
    PacketType, PubTopic, QoS, VarIntError,
};

/// Properties available in the variable header of a PUBLISH packet.
pub const PUBLISH_PROPERTIES: &[PropertyType] = &[
    // A Server MUST send the Payload Format Indicator unaltered to all
    // subscribers [MQTT-3.3.2-4].
    PropertyType::PayloadFormatIndicator,
    // If the Message Expiry Interval has passed and the Server has not
    // managed to start onward delivery to a matching subscriber, it MUST
    // delete the copy of the message for that subscriber [MQTT-3.3.2-5].
    PropertyType::MessageExpiryInterval,
    // Alias maps are strictly per connection; the Server MUST NOT forward
    // a Topic Alias to its subscribers.
    PropertyType::TopicAlias,
    PropertyType::ResponseTopic,
    PropertyType::CorrelationData,
    // The Server MUST maintain the order of User Properties when
    // forwarding the Application Message [MQTT-3.3.2-18].
    PropertyType::UserProperty,
    // A PUBLISH packet sent from a Client to a Server MUST NOT contain a
    // Subscription Identifier [MQTT-3.3.4-6]; packets the Server forwards
    // carry the identifiers of all matching subscriptions [MQTT-3.3.4-4].
    PropertyType::SubscriptionIdentifier,
    PropertyType::ContentType,
];

/// MQTT 5 PUBLISH packet.
///
/// The v5 grammar extends the 3.1.1 packet with a property list between
/// the packet id and the payload. An empty topic name is legal when a
/// topic alias property is present.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishPacket {
    /// The DUP flag MUST be set to 0 for all QoS 0 messages [MQTT-3.3.1-2].
    dup: bool,

    qos: QoS,

    /// Retained message handling follows the Retain As Published
    /// subscription option when the Server forwards the message
    /// [MQTT-3.3.1-12], [MQTT-3.3.1-13].
    retain: bool,

    /// It is a Protocol Error if the Topic Name is zero length and there
    /// is no Topic Alias.
    topic: PubTopic,

    /// Only present when QoS is 1 or 2.
    packet_id: PacketId,

    properties: Properties,

    /// Payload buffer, shared between fan-out copies.
    msg: Bytes,
}

impl PublishPacket {
    /// Create a new publish packet.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid.
    pub fn new(topic: &str, qos: QoS, msg: &[u8]) -> Result<Self, EncodeError> {
        let topic = PubTopic::new(topic)?;
        Ok(Self {
            qos,
            topic,
            msg: Bytes::copy_from_slice(msg),
            ..Self::default()
        })
    }

    /// Create a packet with an empty topic name, carrying only a topic
    /// alias property.
    #[must_use]
    pub fn with_topic_alias(qos: QoS, msg: &[u8]) -> Self {
        Self {
            qos,
            topic: PubTopic::empty(),
            msg: Bytes::copy_from_slice(msg),
            ..Self::default()
        }
    }

    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    /// Update `dup` flag.
    ///
    /// # Errors
    ///
    /// Returns error if `dup` flag is set in a QoS 0 packet.
    pub fn set_dup(&mut self, dup: bool) -> Result<&mut Self, EncodeError> {
        if dup && self.qos == QoS::AtMostOnce {
            return Err(EncodeError::InvalidPacketType);
        }
        self.dup = dup;
        Ok(self)
    }

    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    pub fn set_qos(&mut self, qos: QoS) -> &mut Self {
        if qos == QoS::AtMostOnce {
            self.packet_id = PacketId::new(0);
            self.dup = false;
        }
        self.qos = qos;
        self
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    pub fn set_packet_id(&mut self, packet_id: PacketId) -> &mut Self {
        self.packet_id = packet_id;
        self
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    /// Update topic value.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid.
    pub fn set_topic(&mut self, topic: &str) -> Result<&mut Self, EncodeError> {
        self.topic = PubTopic::new(topic)?;
        Ok(self)
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    #[must_use]
    pub fn message(&self) -> &[u8] {
        &self.msg
    }

    /// Get a cheap clone of the shared payload buffer.
    #[must_use]
    pub fn message_bytes(&self) -> Bytes {
        self.msg.clone()
    }

    fn get_fixed_header(&self) -> Result<FixedHeader, VarIntError> {
        let mut remaining_length = self.topic.bytes() + self.properties.bytes() + self.msg.len();
        if self.qos != QoS::AtMostOnce {
            remaining_length += PacketId::bytes();
        }

        let packet_type = PacketType::Publish {
            dup: self.dup,
            retain: self.retain,
            qos: self.qos,
        };
        FixedHeader::new(packet_type, remaining_length)
    }
}

impl DecodePacket for PublishPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;

        let PacketType::Publish { dup, qos, retain } = fixed_header.packet_type() else {
            return Err(DecodeError::InvalidPacketType);
        };

        // The DUP flag MUST be set to 0 for all QoS 0 messages
        // [MQTT-3.3.1-2].
        if dup && qos == QoS::AtMostOnce {
            return Err(DecodeError::InvalidPacketFlags);
        }

        let start_offset = ba.offset();
        let topic = PubTopic::decode(ba)?;

        let packet_id = if qos == QoS::AtMostOnce {
            PacketId::new(0)
        } else {
            let packet_id = PacketId::decode(ba)?;
            if packet_id.value() == 0 {
                return Err(DecodeError::InvalidPacketId);
            }
            packet_id
        };

        let properties = Properties::decode(ba)?;
        if let Err(property_type) = check_property_type_list(properties.props(), PUBLISH_PROPERTIES)
        {
            log::error!("v5/PublishPacket: Invalid property type {property_type:?}");
            return Err(DecodeError::InvalidPropertyType);
        }

        // It is a Protocol Error if the Topic Name is zero length and
        // there is no Topic Alias.
        if topic.is_empty() && properties.topic_alias().is_none() {
            return Err(DecodeError::InvalidTopic);
        }

        // It is valid for a PUBLISH packet to contain a zero length
        // payload.
        let consumed = ba.offset() - start_offset;
        let msg_len = fixed_header
            .remaining_length()
            .checked_sub(consumed)
            .ok_or(DecodeError::InvalidRemainingLength)?;

        let msg = Bytes::copy_from_slice(ba.read_bytes(msg_len)?);
        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            properties,
            msg,
        })
    }
}

impl EncodePacket for PublishPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();

        let fixed_header = self.get_fixed_header()?;
        fixed_header.encode(v)?;

        self.topic.encode(v)?;
        if self.qos != QoS::AtMostOnce {
            self.packet_id.encode(v)?;
        }
        self.properties.encode(v)?;

        v.write_all(&self.msg)?;

        Ok(v.len() - old_len)
    }
}

impl Packet for PublishPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Publish {
            dup: self.dup,
            retain: self.retain,
            qos: self.qos,
        }
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        let fixed_header = self.get_fixed_header()?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v5::Property;
    use crate::U16Data;

    #[test]
    fn test_encode_decode() {
        let mut packet = PublishPacket::new("t1", QoS::AtLeastOnce, b"payload").unwrap();
        packet.set_packet_id(PacketId::new(9));
        packet
            .properties_mut()
            .push(Property::TopicAlias(U16Data::new(1)));

        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.properties().topic_alias(), Some(1));
    }

    #[test]
    fn test_empty_topic_without_alias_is_error() {
        let packet = PublishPacket::with_topic_alias(QoS::AtMostOnce, b"m");
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishPacket::decode(&mut ba),
            Err(DecodeError::InvalidTopic)
        );
    }
}
