// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};
use std::convert::TryFrom;

use super::property::check_property_type_list;
use super::{Properties, PropertyType};
use crate::utils::validate_client_id;
use crate::{
    BinaryData, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader,
    Packet, PacketType, ProtocolLevel, PubTopic, QoS, StringData, VarIntError,
};

/// Protocol name of MQTT 5.0.
pub const PROTOCOL_NAME: &str = "MQTT";

/// Properties available in the variable header of a CONNECT packet.
pub const CONNECT_PROPERTIES: &[PropertyType] = &[
    PropertyType::SessionExpiryInterval,
    PropertyType::ReceiveMaximum,
    PropertyType::MaximumPacketSize,
    PropertyType::TopicAliasMaximum,
    PropertyType::RequestResponseInformation,
    PropertyType::RequestProblemInformation,
    PropertyType::UserProperty,
    PropertyType::AuthenticationMethod,
    PropertyType::AuthenticationData,
];

/// Properties available in the will section of the payload.
pub const WILL_PROPERTIES: &[PropertyType] = &[
    PropertyType::WillDelayInterval,
    PropertyType::PayloadFormatIndicator,
    PropertyType::MessageExpiryInterval,
    PropertyType::ContentType,
    PropertyType::ResponseTopic,
    PropertyType::CorrelationData,
    PropertyType::UserProperty,
];

/// Flag bits in the variable header of a CONNECT packet.
///
/// Bit 0 is reserved and MUST be zero [MQTT-3.1.2-3]. In MQTT 5 the clean
/// session flag of earlier protocol versions is called Clean Start and
/// only controls discarding of an existing session on connect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectFlags {
    pub username: bool,
    pub password: bool,
    pub will_retain: bool,
    pub will_qos: QoS,
    pub will: bool,
    pub clean_start: bool,
}

impl Default for ConnectFlags {
    fn default() -> Self {
        Self {
            username: false,
            password: false,
            will_retain: false,
            will_qos: QoS::AtMostOnce,
            will: false,
            clean_start: true,
        }
    }
}

impl ConnectFlags {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl EncodePacket for ConnectFlags {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut flags = 0b0000_0000;
        if self.username {
            flags |= 0b1000_0000;
        }
        if self.password {
            flags |= 0b0100_0000;
        }
        if self.will_retain {
            flags |= 0b0010_0000;
        }
        flags |= (self.will_qos as u8) << 3;
        if self.will {
            flags |= 0b0000_0100;
        }
        if self.clean_start {
            flags |= 0b0000_0010;
        }
        buf.push(flags);
        Ok(Self::bytes())
    }
}

impl DecodePacket for ConnectFlags {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let flags = ba.read_byte()?;
        if flags & 0b0000_0001 != 0 {
            return Err(DecodeError::InvalidConnectFlags);
        }

        let username = flags & 0b1000_0000 != 0;
        let password = flags & 0b0100_0000 != 0;
        let will_retain = flags & 0b0010_0000 != 0;
        let will_qos = QoS::try_from((flags & 0b0001_1000) >> 3)?;
        let will = flags & 0b0000_0100 != 0;
        let clean_start = flags & 0b0000_0010 != 0;

        // If the Will Flag is set to 0, then Will QoS MUST be 0 and Will
        // Retain MUST be 0 [MQTT-3.1.2-11], [MQTT-3.1.2-13].
        if !will && (will_qos != QoS::AtMostOnce || will_retain) {
            return Err(DecodeError::InvalidConnectFlags);
        }

        Ok(Self {
            username,
            password,
            will_retain,
            will_qos,
            will,
            clean_start,
        })
    }
}

/// MQTT 5 CONNECT packet.
///
/// Compared to the 3.1.1 grammar, the variable header gains a property
/// list and the will section of the payload gains its own property list.
/// A password without a username is permitted in MQTT 5.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectPacket {
    connect_flags: ConnectFlags,
    keep_alive: u16,
    properties: Properties,

    client_id: StringData,
    will_properties: Properties,
    will_topic: Option<PubTopic>,
    will_message: BinaryData,
    username: StringData,
    password: BinaryData,
}

impl ConnectPacket {
    /// Create a connect packet with `client_id`.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` is invalid.
    pub fn new(client_id: &str) -> Result<Self, EncodeError> {
        validate_client_id(client_id)?;
        Ok(Self {
            keep_alive: 60,
            client_id: StringData::from(client_id)?,
            ..Self::default()
        })
    }

    #[must_use]
    pub const fn connect_flags(&self) -> &ConnectFlags {
        &self.connect_flags
    }

    pub fn set_clean_start(&mut self, clean_start: bool) -> &mut Self {
        self.connect_flags.clean_start = clean_start;
        self
    }

    #[must_use]
    pub const fn clean_start(&self) -> bool {
        self.connect_flags.clean_start
    }

    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    /// Update client id.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` is invalid.
    pub fn set_client_id(&mut self, client_id: &str) -> Result<&mut Self, EncodeError> {
        validate_client_id(client_id)?;
        self.client_id = StringData::from(client_id)?;
        Ok(self)
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        self.client_id.as_ref()
    }

    /// Update username.
    ///
    /// # Errors
    ///
    /// Returns error if `username` is invalid.
    pub fn set_username(&mut self, username: &str) -> Result<&mut Self, EncodeError> {
        self.username = StringData::from(username)?;
        self.connect_flags.username = !username.is_empty();
        Ok(self)
    }

    #[must_use]
    pub fn username(&self) -> &str {
        self.username.as_ref()
    }

    /// Update password.
    ///
    /// # Errors
    ///
    /// Returns error if `password` is too long.
    pub fn set_password(&mut self, password: &[u8]) -> Result<&mut Self, EncodeError> {
        self.password = BinaryData::from_slice(password)?;
        self.connect_flags.password = !password.is_empty();
        Ok(self)
    }

    #[must_use]
    pub fn password(&self) -> &[u8] {
        self.password.as_ref()
    }

    /// Set will message with `topic`, `message` payload, `qos` and
    /// `retain` flag.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` or `message` is invalid.
    pub fn set_will(
        &mut self,
        topic: &str,
        message: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<&mut Self, EncodeError> {
        self.will_topic = Some(PubTopic::new(topic)?);
        self.will_message = BinaryData::from_slice(message)?;
        self.connect_flags.will = true;
        self.connect_flags.will_qos = qos;
        self.connect_flags.will_retain = retain;
        Ok(self)
    }

    #[must_use]
    pub fn will_topic(&self) -> Option<&PubTopic> {
        self.will_topic.as_ref()
    }

    #[must_use]
    pub fn will_message(&self) -> &[u8] {
        self.will_message.as_ref()
    }

    #[must_use]
    pub const fn will_properties(&self) -> &Properties {
        &self.will_properties
    }

    pub fn will_properties_mut(&mut self) -> &mut Properties {
        &mut self.will_properties
    }

    fn remaining_length(&self) -> usize {
        let mut len = 2 + PROTOCOL_NAME.len() // protocol name
            + 1 // protocol level
            + ConnectFlags::bytes()
            + 2 // keep alive
            + self.properties.bytes()
            + self.client_id.bytes();

        if self.connect_flags.will {
            len += self.will_properties.bytes();
            if let Some(will_topic) = &self.will_topic {
                len += will_topic.bytes();
            }
            len += self.will_message.bytes();
        }
        if self.connect_flags.username {
            len += self.username.bytes();
        }
        if self.connect_flags.password {
            len += self.password.bytes();
        }
        len
    }
}

impl DecodePacket for ConnectPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Connect {
            return Err(DecodeError::InvalidPacketType);
        }

        let protocol_name = StringData::decode(ba)?;
        if protocol_name.as_ref() != PROTOCOL_NAME {
            return Err(DecodeError::InvalidProtocolName);
        }
        let protocol_level = ProtocolLevel::try_from(ba.read_byte()?)?;
        if protocol_level != ProtocolLevel::V5 {
            return Err(DecodeError::InvalidProtocolLevel);
        }

        let connect_flags = ConnectFlags::decode(ba)?;
        let keep_alive = ba.read_u16()?;

        let properties = Properties::decode(ba)?;
        if let Err(property_type) = check_property_type_list(properties.props(), CONNECT_PROPERTIES)
        {
            log::error!("v5/ConnectPacket: Invalid property type {property_type:?}");
            return Err(DecodeError::InvalidPropertyType);
        }

        let client_id = StringData::decode(ba)?;
        validate_client_id(client_id.as_ref()).map_err(|_| DecodeError::InvalidClientId)?;

        let (will_properties, will_topic, will_message) = if connect_flags.will {
            let will_properties = Properties::decode(ba)?;
            if let Err(property_type) =
                check_property_type_list(will_properties.props(), WILL_PROPERTIES)
            {
                log::error!("v5/ConnectPacket: Invalid will property type {property_type:?}");
                return Err(DecodeError::InvalidPropertyType);
            }
            let topic = PubTopic::decode(ba)?;
            if topic.is_empty() {
                return Err(DecodeError::InvalidTopic);
            }
            let message = BinaryData::decode(ba)?;
            (will_properties, Some(topic), message)
        } else {
            (Properties::new(), None, BinaryData::new())
        };

        let username = if connect_flags.username {
            StringData::decode(ba)?
        } else {
            StringData::new()
        };

        let password = if connect_flags.password {
            BinaryData::decode(ba)?
        } else {
            BinaryData::new()
        };

        Ok(Self {
            connect_flags,
            keep_alive,
            properties,
            client_id,
            will_properties,
            will_topic,
            will_message,
            username,
            password,
        })
    }
}

impl EncodePacket for ConnectPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let fixed_header = FixedHeader::new(PacketType::Connect, self.remaining_length())?;
        fixed_header.encode(buf)?;

        StringData::from(PROTOCOL_NAME)?.encode(buf)?;
        ProtocolLevel::V5.encode(buf)?;
        self.connect_flags.encode(buf)?;
        buf.write_u16::<BigEndian>(self.keep_alive)?;
        self.properties.encode(buf)?;

        self.client_id.encode(buf)?;
        if self.connect_flags.will {
            self.will_properties.encode(buf)?;
            if let Some(will_topic) = &self.will_topic {
                will_topic.encode(buf)?;
            }
            self.will_message.encode(buf)?;
        }
        if self.connect_flags.username {
            self.username.encode(buf)?;
        }
        if self.connect_flags.password {
            self.password.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl Packet for ConnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Connect
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        let fixed_header = FixedHeader::new(PacketType::Connect, self.remaining_length())?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v5::Property;
    use crate::U32Data;

    #[test]
    fn test_encode_decode() {
        let mut packet = ConnectPacket::new("device-7").unwrap();
        packet.set_clean_start(false);
        packet
            .properties_mut()
            .push(Property::SessionExpiryInterval(U32Data::new(0xffff_ffff)));
        packet
            .set_will("status/device-7", b"offline", QoS::AtLeastOnce, true)
            .unwrap();
        packet
            .will_properties_mut()
            .push(Property::WillDelayInterval(U32Data::new(5)));

        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert!(!decoded.clean_start());
        assert_eq!(
            decoded.properties().session_expiry_interval(),
            Some(0xffff_ffff)
        );
        assert_eq!(decoded.will_properties().will_delay_interval(), Some(5));
    }
}
