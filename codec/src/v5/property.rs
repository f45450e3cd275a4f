// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! MQTT 5 property list.
//!
//! The last field of the variable header of the CONNECT, CONNACK, PUBLISH,
//! PUBACK, PUBREC, PUBREL, PUBCOMP, SUBSCRIBE, SUBACK, UNSUBSCRIBE,
//! UNSUBACK, DISCONNECT and AUTH packets is a set of properties, prefixed
//! by a Variable Byte Integer byte length.

use std::convert::TryFrom;

use crate::{
    BinaryData, BoolData, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket,
    PubTopic, StringData, StringPairData, U16Data, U32Data, VarInt,
};

/// Properties which are allowed to appear more than once in one packet.
///
/// A PUBLISH packet forwarded by the Server carries the Subscription
/// Identifiers of all matching subscriptions [MQTT-3.3.4-4]; in a
/// SUBSCRIBE packet the identifier is a singleton, checked separately
/// with `check_multiple_subscription_identifiers`.
pub const MULTIPLE_PROPERTIES: &[PropertyType] = &[
    PropertyType::UserProperty,
    PropertyType::SubscriptionIdentifier,
];

/// Reject repeated subscription identifiers, for packets where the
/// property is a singleton.
///
/// # Errors
///
/// Returns the offending property type.
pub fn check_multiple_subscription_identifiers(
    properties: &[Property],
) -> Result<(), PropertyType> {
    let count = properties
        .iter()
        .filter(|p| p.property_type() == PropertyType::SubscriptionIdentifier)
        .count();
    if count > 1 {
        return Err(PropertyType::SubscriptionIdentifier);
    }
    Ok(())
}

#[allow(clippy::module_name_repetitions)]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0b,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1a,
    ServerReference = 0x1c,
    ReasonString = 0x1f,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQoS = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2a,
}

impl PropertyType {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl TryFrom<u8> for PropertyType {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(Self::PayloadFormatIndicator),
            0x02 => Ok(Self::MessageExpiryInterval),
            0x03 => Ok(Self::ContentType),
            0x08 => Ok(Self::ResponseTopic),
            0x09 => Ok(Self::CorrelationData),
            0x0b => Ok(Self::SubscriptionIdentifier),
            0x11 => Ok(Self::SessionExpiryInterval),
            0x12 => Ok(Self::AssignedClientIdentifier),
            0x13 => Ok(Self::ServerKeepAlive),
            0x15 => Ok(Self::AuthenticationMethod),
            0x16 => Ok(Self::AuthenticationData),
            0x17 => Ok(Self::RequestProblemInformation),
            0x18 => Ok(Self::WillDelayInterval),
            0x19 => Ok(Self::RequestResponseInformation),
            0x1a => Ok(Self::ResponseInformation),
            0x1c => Ok(Self::ServerReference),
            0x1f => Ok(Self::ReasonString),
            0x21 => Ok(Self::ReceiveMaximum),
            0x22 => Ok(Self::TopicAliasMaximum),
            0x23 => Ok(Self::TopicAlias),
            0x24 => Ok(Self::MaximumQoS),
            0x25 => Ok(Self::RetainAvailable),
            0x26 => Ok(Self::UserProperty),
            0x27 => Ok(Self::MaximumPacketSize),
            0x28 => Ok(Self::WildcardSubscriptionAvailable),
            0x29 => Ok(Self::SubscriptionIdentifierAvailable),
            0x2a => Ok(Self::SharedSubscriptionAvailable),
            _ => Err(DecodeError::InvalidPropertyType),
        }
    }
}

/// One typed property.
///
/// Each property id has a fixed value type. A property which may appear at
/// most once fails decoding with `DuplicateProperty` when repeated;
/// `UserProperty` is allowed to appear more than once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    /// Byte. Used in PUBLISH, Will Properties. 0 means unspecified bytes,
    /// 1 means UTF-8 encoded character data.
    PayloadFormatIndicator(BoolData),

    /// Four Byte Integer. Lifetime of the message in seconds. The PUBLISH
    /// packet sent to a Client by the Server MUST contain a Message Expiry
    /// Interval set to the received value minus the time the message has
    /// been waiting in the Server [MQTT-3.3.2-6].
    MessageExpiryInterval(U32Data),

    /// UTF-8 Encoded String. Used in PUBLISH, Will Properties.
    ContentType(StringData),

    /// UTF-8 Encoded String. Topic name for a response message.
    ResponseTopic(PubTopic),

    /// Binary Data. Used by the sender of a request message to identify
    /// which request a response message is for.
    CorrelationData(BinaryData),

    /// Variable Byte Integer. The Subscription Identifier can have a value
    /// of 1 to 268,435,455; a value of 0 is a Protocol Error.
    SubscriptionIdentifier(VarInt),

    /// Four Byte Integer. Session Expiry Interval in seconds. If set to 0
    /// or absent, the Session ends when the Network Connection is closed;
    /// 0xFFFFFFFF means the Session does not expire.
    SessionExpiryInterval(U32Data),

    /// UTF-8 Encoded String. Used in CONNACK when the Client connected
    /// with a zero length client id.
    AssignedClientIdentifier(StringData),

    /// Two Byte Integer. If present in CONNACK, the Client MUST use this
    /// value instead of the Keep Alive it sent [MQTT-3.2.2-21].
    ServerKeepAlive(U16Data),

    /// UTF-8 Encoded String. Name of the extended authentication method.
    AuthenticationMethod(StringData),

    /// Binary Data. Contents defined by the authentication method.
    AuthenticationData(BinaryData),

    /// Byte, 0 or 1. Whether reason strings and user properties may be
    /// sent in the case of failures.
    RequestProblemInformation(BoolData),

    /// Four Byte Integer. Delay in seconds before the Server publishes the
    /// Client's Will Message. If a new Network Connection to this Session
    /// is made before the interval has passed, the Server MUST NOT send
    /// the Will Message [MQTT-3.1.3-9].
    WillDelayInterval(U32Data),

    /// Byte, 0 or 1. Whether the Server may return Response Information in
    /// the CONNACK.
    RequestResponseInformation(BoolData),

    /// UTF-8 Encoded String. Used as the basis for creating a Response
    /// Topic.
    ResponseInformation(StringData),

    /// UTF-8 Encoded String. Another server the Client may use.
    ServerReference(StringData),

    /// UTF-8 Encoded String. Human readable diagnostics, not parsed by the
    /// receiver.
    ReasonString(StringData),

    /// Two Byte Integer. Maximum number of QoS 1 and QoS 2 publications
    /// the sender is willing to process concurrently. It is a Protocol
    /// Error to include the value 0.
    ReceiveMaximum(U16Data),

    /// Two Byte Integer. Highest value the sender accepts as a Topic Alias.
    TopicAliasMaximum(U16Data),

    /// Two Byte Integer. An integer value used to identify the topic
    /// instead of using the Topic Name. A value of 0 is a Protocol Error.
    TopicAlias(U16Data),

    /// Byte, 0 or 1. Maximum QoS the Server supports.
    MaximumQoS(BoolData),

    /// Byte, 0 or 1. Whether the Server supports retained messages.
    RetainAvailable(BoolData),

    /// UTF-8 String Pair. This property may appear multiple times; the
    /// order of user properties MUST be preserved when forwarding
    /// [MQTT-3.3.2-18].
    UserProperty(StringPairData),

    /// Four Byte Integer. Maximum packet size the sender is willing to
    /// accept. It is a Protocol Error to include the value 0.
    MaximumPacketSize(U32Data),

    /// Byte, 0 or 1. Whether the Server supports Wildcard Subscriptions.
    WildcardSubscriptionAvailable(BoolData),

    /// Byte, 0 or 1. Whether the Server supports Subscription Identifiers.
    SubscriptionIdentifierAvailable(BoolData),

    /// Byte, 0 or 1. Whether the Server supports Shared Subscriptions.
    SharedSubscriptionAvailable(BoolData),
}

impl Property {
    #[must_use]
    pub const fn property_type(&self) -> PropertyType {
        match self {
            Self::PayloadFormatIndicator(_) => PropertyType::PayloadFormatIndicator,
            Self::MessageExpiryInterval(_) => PropertyType::MessageExpiryInterval,
            Self::ContentType(_) => PropertyType::ContentType,
            Self::ResponseTopic(_) => PropertyType::ResponseTopic,
            Self::CorrelationData(_) => PropertyType::CorrelationData,
            Self::SubscriptionIdentifier(_) => PropertyType::SubscriptionIdentifier,
            Self::SessionExpiryInterval(_) => PropertyType::SessionExpiryInterval,
            Self::AssignedClientIdentifier(_) => PropertyType::AssignedClientIdentifier,
            Self::ServerKeepAlive(_) => PropertyType::ServerKeepAlive,
            Self::AuthenticationMethod(_) => PropertyType::AuthenticationMethod,
            Self::AuthenticationData(_) => PropertyType::AuthenticationData,
            Self::RequestProblemInformation(_) => PropertyType::RequestProblemInformation,
            Self::WillDelayInterval(_) => PropertyType::WillDelayInterval,
            Self::RequestResponseInformation(_) => PropertyType::RequestResponseInformation,
            Self::ResponseInformation(_) => PropertyType::ResponseInformation,
            Self::ServerReference(_) => PropertyType::ServerReference,
            Self::ReasonString(_) => PropertyType::ReasonString,
            Self::ReceiveMaximum(_) => PropertyType::ReceiveMaximum,
            Self::TopicAliasMaximum(_) => PropertyType::TopicAliasMaximum,
            Self::TopicAlias(_) => PropertyType::TopicAlias,
            Self::MaximumQoS(_) => PropertyType::MaximumQoS,
            Self::RetainAvailable(_) => PropertyType::RetainAvailable,
            Self::UserProperty(_) => PropertyType::UserProperty,
            Self::MaximumPacketSize(_) => PropertyType::MaximumPacketSize,
            Self::WildcardSubscriptionAvailable(_) => PropertyType::WildcardSubscriptionAvailable,
            Self::SubscriptionIdentifierAvailable(_) => {
                PropertyType::SubscriptionIdentifierAvailable
            }
            Self::SharedSubscriptionAvailable(_) => PropertyType::SharedSubscriptionAvailable,
        }
    }

    /// Get byte length in packet, including the property id byte.
    #[must_use]
    pub fn bytes(&self) -> usize {
        PropertyType::bytes()
            + match self {
                Self::PayloadFormatIndicator(_)
                | Self::RequestProblemInformation(_)
                | Self::RequestResponseInformation(_)
                | Self::MaximumQoS(_)
                | Self::RetainAvailable(_)
                | Self::WildcardSubscriptionAvailable(_)
                | Self::SubscriptionIdentifierAvailable(_)
                | Self::SharedSubscriptionAvailable(_) => BoolData::bytes(),
                Self::MessageExpiryInterval(_)
                | Self::SessionExpiryInterval(_)
                | Self::WillDelayInterval(_)
                | Self::MaximumPacketSize(_) => U32Data::bytes(),
                Self::ServerKeepAlive(_)
                | Self::ReceiveMaximum(_)
                | Self::TopicAliasMaximum(_)
                | Self::TopicAlias(_) => U16Data::bytes(),
                Self::ContentType(value)
                | Self::AssignedClientIdentifier(value)
                | Self::AuthenticationMethod(value)
                | Self::ResponseInformation(value)
                | Self::ServerReference(value)
                | Self::ReasonString(value) => value.bytes(),
                Self::ResponseTopic(value) => value.bytes(),
                Self::CorrelationData(value) | Self::AuthenticationData(value) => value.bytes(),
                Self::SubscriptionIdentifier(value) => value.bytes(),
                Self::UserProperty(value) => value.bytes(),
            }
    }
}

impl DecodePacket for Property {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let property_type = PropertyType::try_from(ba.read_byte()?)?;
        match property_type {
            PropertyType::PayloadFormatIndicator => {
                Ok(Self::PayloadFormatIndicator(BoolData::decode(ba)?))
            }
            PropertyType::MessageExpiryInterval => {
                Ok(Self::MessageExpiryInterval(U32Data::decode(ba)?))
            }
            PropertyType::ContentType => Ok(Self::ContentType(StringData::decode(ba)?)),
            PropertyType::ResponseTopic => Ok(Self::ResponseTopic(PubTopic::decode(ba)?)),
            PropertyType::CorrelationData => Ok(Self::CorrelationData(BinaryData::decode(ba)?)),
            PropertyType::SubscriptionIdentifier => {
                let id = VarInt::decode(ba)?;
                if id.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::SubscriptionIdentifier(id))
            }
            PropertyType::SessionExpiryInterval => {
                Ok(Self::SessionExpiryInterval(U32Data::decode(ba)?))
            }
            PropertyType::AssignedClientIdentifier => {
                Ok(Self::AssignedClientIdentifier(StringData::decode(ba)?))
            }
            PropertyType::ServerKeepAlive => Ok(Self::ServerKeepAlive(U16Data::decode(ba)?)),
            PropertyType::AuthenticationMethod => {
                Ok(Self::AuthenticationMethod(StringData::decode(ba)?))
            }
            PropertyType::AuthenticationData => {
                Ok(Self::AuthenticationData(BinaryData::decode(ba)?))
            }
            PropertyType::RequestProblemInformation => {
                Ok(Self::RequestProblemInformation(BoolData::decode(ba)?))
            }
            PropertyType::WillDelayInterval => Ok(Self::WillDelayInterval(U32Data::decode(ba)?)),
            PropertyType::RequestResponseInformation => {
                Ok(Self::RequestResponseInformation(BoolData::decode(ba)?))
            }
            PropertyType::ResponseInformation => {
                Ok(Self::ResponseInformation(StringData::decode(ba)?))
            }
            PropertyType::ServerReference => Ok(Self::ServerReference(StringData::decode(ba)?)),
            PropertyType::ReasonString => Ok(Self::ReasonString(StringData::decode(ba)?)),
            PropertyType::ReceiveMaximum => {
                let value = U16Data::decode(ba)?;
                if value.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::ReceiveMaximum(value))
            }
            PropertyType::TopicAliasMaximum => Ok(Self::TopicAliasMaximum(U16Data::decode(ba)?)),
            PropertyType::TopicAlias => Ok(Self::TopicAlias(U16Data::decode(ba)?)),
            PropertyType::MaximumQoS => Ok(Self::MaximumQoS(BoolData::decode(ba)?)),
            PropertyType::RetainAvailable => Ok(Self::RetainAvailable(BoolData::decode(ba)?)),
            PropertyType::UserProperty => Ok(Self::UserProperty(StringPairData::decode(ba)?)),
            PropertyType::MaximumPacketSize => {
                let value = U32Data::decode(ba)?;
                if value.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::MaximumPacketSize(value))
            }
            PropertyType::WildcardSubscriptionAvailable => {
                Ok(Self::WildcardSubscriptionAvailable(BoolData::decode(ba)?))
            }
            PropertyType::SubscriptionIdentifierAvailable => {
                Ok(Self::SubscriptionIdentifierAvailable(BoolData::decode(ba)?))
            }
            PropertyType::SharedSubscriptionAvailable => {
                Ok(Self::SharedSubscriptionAvailable(BoolData::decode(ba)?))
            }
        }
    }
}

impl EncodePacket for Property {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(self.property_type() as u8);
        let value_bytes = match self {
            Self::PayloadFormatIndicator(value)
            | Self::RequestProblemInformation(value)
            | Self::RequestResponseInformation(value)
            | Self::MaximumQoS(value)
            | Self::RetainAvailable(value)
            | Self::WildcardSubscriptionAvailable(value)
            | Self::SubscriptionIdentifierAvailable(value)
            | Self::SharedSubscriptionAvailable(value) => value.encode(buf)?,
            Self::MessageExpiryInterval(value)
            | Self::SessionExpiryInterval(value)
            | Self::WillDelayInterval(value)
            | Self::MaximumPacketSize(value) => value.encode(buf)?,
            Self::ServerKeepAlive(value)
            | Self::ReceiveMaximum(value)
            | Self::TopicAliasMaximum(value)
            | Self::TopicAlias(value) => value.encode(buf)?,
            Self::ContentType(value)
            | Self::AssignedClientIdentifier(value)
            | Self::AuthenticationMethod(value)
            | Self::ResponseInformation(value)
            | Self::ServerReference(value)
            | Self::ReasonString(value) => value.encode(buf)?,
            Self::ResponseTopic(value) => value.encode(buf)?,
            Self::CorrelationData(value) | Self::AuthenticationData(value) => value.encode(buf)?,
            Self::SubscriptionIdentifier(value) => value.encode(buf)?,
            Self::UserProperty(value) => value.encode(buf)?,
        };
        Ok(PropertyType::bytes() + value_bytes)
    }
}

/// Check that all properties are allowed by `types` and that singleton
/// properties do not repeat.
///
/// # Errors
///
/// Returns the offending property type.
pub fn check_property_type_list(
    properties: &[Property],
    types: &[PropertyType],
) -> Result<(), PropertyType> {
    if properties.is_empty() {
        return Ok(());
    }

    for property in properties {
        if !types.contains(&property.property_type()) {
            return Err(property.property_type());
        }
    }

    for property_type in types {
        let count = properties
            .iter()
            .filter(|p| p.property_type() == *property_type)
            .count();
        if count > 1 && !MULTIPLE_PROPERTIES.contains(property_type) {
            return Err(*property_type);
        }
    }

    Ok(())
}

/// Property list of one packet, length-prefixed on the wire.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Properties(Vec<Property>);

impl Properties {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn props(&self) -> &[Property] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Append a property without replacing existing entries.
    pub fn push(&mut self, property: Property) {
        self.0.push(property);
    }

    /// Replace any property of the same type, or append.
    pub fn set(&mut self, property: Property) {
        let property_type = property.property_type();
        self.0.retain(|p| p.property_type() != property_type);
        self.0.push(property);
    }

    /// Remove all properties of `property_type`.
    pub fn remove(&mut self, property_type: PropertyType) {
        self.0.retain(|p| p.property_type() != property_type);
    }

    #[must_use]
    pub fn get(&self, property_type: PropertyType) -> Option<&Property> {
        self.0.iter().find(|p| p.property_type() == property_type)
    }

    /// Get byte length in packet, including the length prefix.
    #[must_use]
    pub fn bytes(&self) -> usize {
        let payload: usize = self.0.iter().map(Property::bytes).sum();
        let len = VarInt::from(payload).unwrap_or_default();
        len.bytes() + payload
    }

    #[must_use]
    pub fn session_expiry_interval(&self) -> Option<u32> {
        match self.get(PropertyType::SessionExpiryInterval) {
            Some(Property::SessionExpiryInterval(value)) => Some(value.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn message_expiry_interval(&self) -> Option<u32> {
        match self.get(PropertyType::MessageExpiryInterval) {
            Some(Property::MessageExpiryInterval(value)) => Some(value.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn will_delay_interval(&self) -> Option<u32> {
        match self.get(PropertyType::WillDelayInterval) {
            Some(Property::WillDelayInterval(value)) => Some(value.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn receive_maximum(&self) -> Option<u16> {
        match self.get(PropertyType::ReceiveMaximum) {
            Some(Property::ReceiveMaximum(value)) => Some(value.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn topic_alias_maximum(&self) -> Option<u16> {
        match self.get(PropertyType::TopicAliasMaximum) {
            Some(Property::TopicAliasMaximum(value)) => Some(value.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn topic_alias(&self) -> Option<u16> {
        match self.get(PropertyType::TopicAlias) {
            Some(Property::TopicAlias(value)) => Some(value.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn maximum_packet_size(&self) -> Option<u32> {
        match self.get(PropertyType::MaximumPacketSize) {
            Some(Property::MaximumPacketSize(value)) => Some(value.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn server_keep_alive(&self) -> Option<u16> {
        match self.get(PropertyType::ServerKeepAlive) {
            Some(Property::ServerKeepAlive(value)) => Some(value.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn subscription_identifier(&self) -> Option<usize> {
        match self.get(PropertyType::SubscriptionIdentifier) {
            Some(Property::SubscriptionIdentifier(value)) => Some(value.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn assigned_client_identifier(&self) -> Option<&str> {
        match self.get(PropertyType::AssignedClientIdentifier) {
            Some(Property::AssignedClientIdentifier(value)) => Some(value.as_ref()),
            _ => None,
        }
    }

    pub fn user_properties(&self) -> impl Iterator<Item = &StringPairData> {
        self.0.iter().filter_map(|p| match p {
            Property::UserProperty(pair) => Some(pair),
            _ => None,
        })
    }
}

impl DecodePacket for Properties {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let total_bytes = VarInt::decode(ba)?.value();
        let end_offset = ba.offset() + total_bytes;
        if end_offset > ba.len() {
            return Err(DecodeError::InvalidRemainingLength);
        }

        let mut properties = Vec::new();
        while ba.offset() < end_offset {
            properties.push(Property::decode(ba)?);
        }
        if ba.offset() != end_offset {
            return Err(DecodeError::InvalidRemainingLength);
        }

        Ok(Self(properties))
    }
}

impl EncodePacket for Properties {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let payload: usize = self.0.iter().map(Property::bytes).sum();
        VarInt::from(payload)?.encode(buf)?;
        for property in &self.0 {
            property.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let mut properties = Properties::new();
        properties.push(Property::SessionExpiryInterval(U32Data::new(120)));
        properties.push(Property::ReceiveMaximum(U16Data::new(20)));
        properties.push(Property::UserProperty(
            StringPairData::from("k", "v").unwrap(),
        ));

        let mut buf = Vec::new();
        let written = properties.encode(&mut buf).unwrap();
        assert_eq!(written, properties.bytes());

        let mut ba = ByteArray::new(&buf);
        let decoded = Properties::decode(&mut ba).unwrap();
        assert_eq!(decoded, properties);
        assert_eq!(decoded.session_expiry_interval(), Some(120));
        assert_eq!(decoded.receive_maximum(), Some(20));
    }

    #[test]
    fn test_empty_properties() {
        let properties = Properties::new();
        let mut buf = Vec::new();
        properties.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x00]);

        let mut ba = ByteArray::new(&buf);
        let decoded = Properties::decode(&mut ba).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_zero_receive_maximum_is_error() {
        // Property id 0x21 with value 0.
        let buf = [0x03, 0x21, 0x00, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            Properties::decode(&mut ba),
            Err(DecodeError::InvalidPropertyValue)
        );
    }

    #[test]
    fn test_check_property_type_list() {
        let mut properties = Properties::new();
        properties.push(Property::TopicAlias(U16Data::new(4)));
        properties.push(Property::TopicAlias(U16Data::new(5)));
        assert_eq!(
            check_property_type_list(properties.props(), &[PropertyType::TopicAlias]),
            Err(PropertyType::TopicAlias)
        );

        let mut properties = Properties::new();
        properties.push(Property::UserProperty(
            StringPairData::from("a", "1").unwrap(),
        ));
        properties.push(Property::UserProperty(
            StringPairData::from("a", "2").unwrap(),
        ));
        assert!(
            check_property_type_list(properties.props(), &[PropertyType::UserProperty]).is_ok()
        );
    }
}
