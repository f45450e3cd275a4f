// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};
use std::convert::TryFrom;

use crate::utils::validate_client_id;
use crate::{
    BinaryData, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader,
    Packet, PacketType, ProtocolLevel, PubTopic, QoS, StringData, VarIntError,
};

/// Protocol name of MQTT 3.1.1 and 5.0.
pub const PROTOCOL_NAME: &str = "MQTT";

/// Protocol name of MQTT 3.1.
pub const PROTOCOL_NAME_V31: &str = "MQIsdp";

/// Flag bits in the variable header of a CONNECT packet.
///
/// ```txt
///  7 6 5 4 3 2 1 0
/// +-+-+-+---+-+-+-+
/// |U|P|R|Q Q|W|C|0|
/// +-+-+-+---+-+-+-+
/// ```
///
/// U = username, P = password, R = will retain, QQ = will qos,
/// W = will flag, C = clean session. Bit 0 is reserved and MUST be zero
/// [MQTT-3.1.2-3].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectFlags {
    pub username: bool,
    pub password: bool,
    pub will_retain: bool,
    pub will_qos: QoS,
    pub will: bool,
    pub clean_session: bool,
}

impl Default for ConnectFlags {
    fn default() -> Self {
        Self {
            username: false,
            password: false,
            will_retain: false,
            will_qos: QoS::AtMostOnce,
            will: false,
            clean_session: true,
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
        if self.clean_session {
            flags |= 0b0000_0010;
        }
        buf.push(flags);
        Ok(Self::bytes())
    }
}

impl DecodePacket for ConnectFlags {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let flags = ba.read_byte()?;
        // The Server MUST validate that the reserved flag in the CONNECT
        // Control Packet is set to zero and disconnect the Client if it is
        // not zero [MQTT-3.1.2-3].
        if flags & 0b0000_0001 != 0 {
            return Err(DecodeError::InvalidConnectFlags);
        }

        let username = flags & 0b1000_0000 != 0;
        let password = flags & 0b0100_0000 != 0;
        let will_retain = flags & 0b0010_0000 != 0;
        let will_qos = QoS::try_from((flags & 0b0001_1000) >> 3)?;
        let will = flags & 0b0000_0100 != 0;
        let clean_session = flags & 0b0000_0010 != 0;

        // If the Will Flag is set to 0, then Will QoS MUST be 0 and
        // Will Retain MUST be 0 [MQTT-3.1.2-13], [MQTT-3.1.2-15].
        if !will && (will_qos != QoS::AtMostOnce || will_retain) {
            return Err(DecodeError::InvalidConnectFlags);
        }

        // If the User Name Flag is set to 0, the Password Flag MUST be
        // set to 0 [MQTT-3.1.2-22].
        if !username && password {
            return Err(DecodeError::InvalidConnectFlags);
        }

        Ok(Self {
            username,
            password,
            will_retain,
            will_qos,
            will,
            clean_session,
        })
    }
}

/// After a network connection is established, the first packet sent from
/// the client to the server MUST be a CONNECT packet [MQTT-3.1.0-1].
///
/// Basic structure of the packet:
///
/// ```txt
///  7                          0
/// +----------------------------+
/// | Fixed header               |
/// |                            |
/// +----------------------------+
/// | Protocol name length       |
/// |                            |
/// +----------------------------+
/// | Protocol name ...          |
/// +----------------------------+
/// | Protocol level             |
/// +----------------------------+
/// | Connect flags              |
/// +----------------------------+
/// | Keep alive                 |
/// |                            |
/// +----------------------------+
/// | Client id length           |
/// |                            |
/// +----------------------------+
/// | Client id ...              |
/// +----------------------------+
/// | Will topic length          |
/// |                            |
/// +----------------------------+
/// | Will topic ...             |
/// +----------------------------+
/// | Will message length        |
/// |                            |
/// +----------------------------+
/// | Will message ...           |
/// +----------------------------+
/// | Username length            |
/// |                            |
/// +----------------------------+
/// | Username ...               |
/// +----------------------------+
/// | Password length            |
/// |                            |
/// +----------------------------+
/// | Password ...               |
/// +----------------------------+
/// ```
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectPacket {
    protocol_level: ProtocolLevel,

    connect_flags: ConnectFlags,

    /// Time interval between two packets in seconds.
    ///
    /// Client must send PingRequest packet before exceeding this interval.
    /// If this value is not zero and the Server does not receive a Control
    /// Packet from the Client within one and a half times the Keep Alive
    /// time period, it MUST disconnect [MQTT-3.1.2-24].
    keep_alive: u16,

    /// Identifies the Client to the Server.
    ///
    /// The Client and the Server MUST use the ClientId to identify session
    /// state that they hold relating to this MQTT connection between the
    /// Client and the Server [MQTT-3.1.3-2].
    client_id: StringData,

    /// Topic the Will Message is published to when the network connection
    /// ends abnormally.
    will_topic: Option<PubTopic>,

    /// Payload of the Will Message.
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
            protocol_level: ProtocolLevel::V311,
            keep_alive: 60,
            client_id: StringData::from(client_id)?,
            ..Self::default()
        })
    }

    pub fn set_protocol_level(&mut self, level: ProtocolLevel) -> &mut Self {
        self.protocol_level = level;
        self
    }

    #[must_use]
    pub const fn protocol_level(&self) -> ProtocolLevel {
        self.protocol_level
    }

    #[must_use]
    pub const fn connect_flags(&self) -> &ConnectFlags {
        &self.connect_flags
    }

    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.connect_flags.clean_session = clean_session;
        self
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.connect_flags.clean_session
    }

    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
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

    fn protocol_name(&self) -> &'static str {
        match self.protocol_level {
            ProtocolLevel::V31 => PROTOCOL_NAME_V31,
            ProtocolLevel::V311 | ProtocolLevel::V5 => PROTOCOL_NAME,
        }
    }

    fn remaining_length(&self) -> usize {
        let mut len = 2 + self.protocol_name().len() // protocol name
            + 1 // protocol level
            + ConnectFlags::bytes()
            + 2 // keep alive
            + self.client_id.bytes();

        if self.connect_flags.will {
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
        let protocol_level_byte = ba.read_byte()?;
        let protocol_level = ProtocolLevel::try_from(protocol_level_byte)?;

        // If the protocol name is incorrect the Server MAY disconnect the
        // Client [MQTT-3.1.2-1].
        let expected_name = match protocol_level {
            ProtocolLevel::V31 => PROTOCOL_NAME_V31,
            ProtocolLevel::V311 | ProtocolLevel::V5 => PROTOCOL_NAME,
        };
        if protocol_name.as_ref() != expected_name {
            return Err(DecodeError::InvalidProtocolName);
        }

        let connect_flags = ConnectFlags::decode(ba)?;
        let keep_alive = ba.read_u16()?;

        let client_id = StringData::decode(ba)?;
        validate_client_id(client_id.as_ref()).map_err(|_| DecodeError::InvalidClientId)?;

        let (will_topic, will_message) = if connect_flags.will {
            let topic = PubTopic::decode(ba)?;
            if topic.is_empty() {
                return Err(DecodeError::InvalidTopic);
            }
            let message = BinaryData::decode(ba)?;
            (Some(topic), message)
        } else {
            (None, BinaryData::new())
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
            protocol_level,
            connect_flags,
            keep_alive,
            client_id,
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

        StringData::from(self.protocol_name())?.encode(buf)?;
        self.protocol_level.encode(buf)?;
        self.connect_flags.encode(buf)?;
        buf.write_u16::<BigEndian>(self.keep_alive)?;
        self.client_id.encode(buf)?;

        if self.connect_flags.will {
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

    #[test]
    fn test_encode_decode() {
        let mut packet = ConnectPacket::new("client-1").unwrap();
        packet.set_keep_alive(30);
        packet.set_username("user").unwrap();
        packet.set_password(b"pass").unwrap();

        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.client_id(), "client-1");
        assert_eq!(decoded.keep_alive(), 30);
        assert_eq!(decoded.username(), "user");
        assert_eq!(decoded.password(), b"pass");
    }

    #[test]
    fn test_decode_reserved_flag() {
        // CONNECT with reserved connect-flag bit set.
        let buf = [
            0x10, 0x0e, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x03, 0x00, 0x3c, 0x00, 0x02,
            b'i', b'd',
        ];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectPacket::decode(&mut ba),
            Err(DecodeError::InvalidConnectFlags)
        );
    }

    #[test]
    fn test_decode_wrong_protocol_name() {
        let buf = [
            0x10, 0x0e, 0x00, 0x04, b'M', b'Q', b'T', b'X', 0x04, 0x02, 0x00, 0x3c, 0x00, 0x02,
            b'i', b'd',
        ];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectPacket::decode(&mut ba),
            Err(DecodeError::InvalidProtocolName)
        );
    }
}
