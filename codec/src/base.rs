// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

use crate::{ByteArray, DecodeError, EncodeError};

/// Convert typed values into a network byte stream.
pub trait EncodePacket {
    /// Append encoded bytes to `buf`, returns number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns error if some field contains invalid data.
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError>;
}

/// Parse typed values from a network byte stream.
pub trait DecodePacket: Sized {
    /// Read bytes from `ba` and construct a value.
    ///
    /// # Errors
    ///
    /// Returns error if byte stream does not follow the packet grammar.
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError>;
}

/// Protocol version as transferred in the CONNECT packet.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ProtocolLevel {
    /// MQTT 3.1, protocol name is "MQIsdp".
    V31 = 3,

    /// MQTT 3.1.1, protocol name is "MQTT".
    #[default]
    V311 = 4,

    /// MQTT 5.0, protocol name is "MQTT".
    V5 = 5,
}

impl TryFrom<u8> for ProtocolLevel {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            3 => Ok(Self::V31),
            4 => Ok(Self::V311),
            5 => Ok(Self::V5),
            _ => Err(DecodeError::InvalidProtocolLevel),
        }
    }
}

impl EncodePacket for ProtocolLevel {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(*self as u8);
        Ok(1)
    }
}

/// Quality of service level of PUBLISH packets.
///
/// A PUBLISH Packet MUST NOT have both QoS bits set to 1. If a Server or
/// Client receives a PUBLISH packet which has both QoS bits set to 1 it is
/// a malformed packet [MQTT-3.3.1-4].
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QoS {
    /// At most once delivery.
    #[default]
    AtMostOnce = 0,

    /// At least once delivery.
    AtLeastOnce = 1,

    /// Exactly once delivery.
    ExactOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactOnce),
            _ => Err(DecodeError::InvalidQoS),
        }
    }
}
