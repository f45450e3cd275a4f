// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Topic names, topic filters and the matching rules between them.
//!
//! Rules are defined in MQTT chapter 4.7, Topic Names and Topic Filters.

use byteorder::{BigEndian, WriteBytesExt};
use std::fmt;
use std::io::Write;

use crate::utils::validate_utf8_string;
use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket};

/// Prefix of shared subscription filters.
pub const SHARE_PREFIX: &str = "$share/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicError {
    EmptyTopic,
    TooManyData,
    InvalidChar,
    ContainsWildcard,
    InvalidShareName,
}

/// Split a topic name or topic filter into its levels.
///
/// Adjacent separators produce empty levels, as required by the protocol:
/// "sport//tennis" has three levels, the second one empty.
pub fn tokenize(s: &str) -> impl Iterator<Item = &str> {
    s.split('/')
}

/// Validate a topic filter, which may contain wildcards.
///
/// The multi-level wildcard `#` MUST be the last character and occupy an
/// entire level [MQTT-4.7.1-2]. The single-level wildcard `+` MUST occupy
/// an entire level of the filter [MQTT-4.7.1-3].
///
/// # Errors
///
/// Returns error if the filter breaks wildcard rules, is empty or too long.
pub fn validate_sub_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::EmptyTopic);
    }
    if topic.len() > u16::MAX as usize {
        return Err(TopicError::TooManyData);
    }

    let bytes = topic.as_bytes();
    for (index, b) in bytes.iter().enumerate() {
        match b {
            b'#' => {
                // Must occupy an entire level.
                if index > 0 && bytes[index - 1] != b'/' {
                    return Err(TopicError::InvalidChar);
                }
                // Must be the last character in the filter.
                if index != bytes.len() - 1 {
                    return Err(TopicError::InvalidChar);
                }
            }
            b'+' => {
                if index > 0 && bytes[index - 1] != b'/' {
                    return Err(TopicError::InvalidChar);
                }
                if index + 1 < bytes.len() && bytes[index + 1] != b'/' {
                    return Err(TopicError::InvalidChar);
                }
            }
            _ => (),
        }
    }

    Ok(())
}

/// Validate a topic name, which must not contain wildcard characters
/// [MQTT-3.3.2-2].
///
/// An empty topic name is accepted here; PUBLISH packets decide whether an
/// empty name is legal based on the presence of a topic alias.
///
/// # Errors
///
/// Returns error if the name contains wildcards or is too long.
pub fn validate_pub_topic(topic: &str) -> Result<(), TopicError> {
    if topic.len() > u16::MAX as usize {
        return Err(TopicError::TooManyData);
    }

    if topic.bytes().any(|c| c == b'+' || c == b'#') {
        Err(TopicError::ContainsWildcard)
    } else {
        Ok(())
    }
}

/// Check whether `topic` matches `filter` per the wildcard rules.
///
/// Topics beginning with `$` do not match filters whose first level is a
/// wildcard: a subscription to `#` or `+/monitor/Clients` will not receive
/// messages published to `$SYS` topics [MQTT-4.7.2-1].
#[must_use]
pub fn topic_match(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_iter = tokenize(filter);
    let mut topic_iter = tokenize(topic);
    loop {
        match (filter_iter.next(), topic_iter.next()) {
            (None, None) => return true,
            // `#` matches the parent level as well as any number of
            // child levels.
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => (),
            (Some(filter_part), Some(topic_part)) if filter_part == topic_part => (),
            _ => return false,
        }
    }
}

/// Topic name in PUBLISH packets.
///
/// May only be empty when the packet carries a topic alias.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PubTopic(String);

impl PubTopic {
    /// Create a topic name from a string slice.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` contains wildcards or is empty.
    pub fn new(topic: &str) -> Result<Self, TopicError> {
        if topic.is_empty() {
            return Err(TopicError::EmptyTopic);
        }
        validate_pub_topic(topic)?;
        Ok(Self(topic.to_string()))
    }

    /// Create an empty topic name, to be resolved through a topic alias.
    #[must_use]
    pub const fn empty() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get byte length in packet.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }
}

impl fmt::Display for PubTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PubTopic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl DecodePacket for PubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let len = ba.read_u16()?;
        let s = ba.read_string(len as usize)?;
        validate_pub_topic(&s)?;
        Ok(Self(s))
    }
}

impl EncodePacket for PubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.0.len() as u16;
        buf.write_u16::<BigEndian>(len)?;
        buf.write_all(self.0.as_bytes())?;
        Ok(self.bytes())
    }
}

/// Topic filter in SUBSCRIBE and UNSUBSCRIBE packets.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubTopic(String);

impl SubTopic {
    /// Create a topic filter from a string slice.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` breaks wildcard rules.
    pub fn new(topic: &str) -> Result<Self, TopicError> {
        validate_utf8_string(topic).map_err(|_| TopicError::InvalidChar)?;
        validate_sub_topic(topic)?;
        Ok(Self(topic.to_string()))
    }

    /// Check whether `topic` name matches this filter.
    #[must_use]
    pub fn is_match(&self, topic: &str) -> bool {
        topic_match(&self.0, topic)
    }

    /// Get byte length in packet.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }
}

impl fmt::Display for SubTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SubTopic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl DecodePacket for SubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let len = ba.read_u16()?;
        let s = ba.read_string(len as usize)?;
        validate_sub_topic(&s)?;
        Ok(Self(s))
    }
}

impl EncodePacket for SubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.0.len() as u16;
        buf.write_u16::<BigEndian>(len)?;
        buf.write_all(self.0.as_bytes())?;
        Ok(self.bytes())
    }
}

/// A parsed shared subscription filter, `$share/<name>/<filter>`.
///
/// The share name MUST NOT contain `/`, `+` or `#` and MUST NOT be empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SharedTopic {
    group: String,
    filter: String,
}

impl SharedTopic {
    /// Try to parse a topic filter as a shared subscription.
    ///
    /// Returns `Ok(None)` for ordinary, non-shared filters.
    ///
    /// # Errors
    ///
    /// Returns error if the filter starts with `$share/` but the share name
    /// or the inner filter is invalid.
    pub fn parse(filter: &str) -> Result<Option<Self>, TopicError> {
        let Some(rest) = filter.strip_prefix(SHARE_PREFIX) else {
            return Ok(None);
        };

        let Some((group, inner)) = rest.split_once('/') else {
            return Err(TopicError::InvalidShareName);
        };
        if group.is_empty() || group.contains(['+', '#']) {
            return Err(TopicError::InvalidShareName);
        }
        validate_sub_topic(inner)?;

        Ok(Some(Self {
            group: group.to_string(),
            filter: inner.to_string(),
        }))
    }

    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_sub_topic() {
        assert!(validate_sub_topic("sport/tennis/player/#").is_ok());
        assert!(validate_sub_topic("sport/tennis/player#").is_err());
        assert!(validate_sub_topic("#").is_ok());
        assert!(validate_sub_topic("sport/#/player/ranking").is_err());
        assert!(validate_sub_topic("+").is_ok());
        assert!(validate_sub_topic("+/tennis/#").is_ok());
        assert!(validate_sub_topic("sport+").is_err());
        assert!(validate_sub_topic("sport/+x").is_err());
        assert!(validate_sub_topic("").is_err());
    }

    #[test]
    fn test_validate_pub_topic() {
        assert!(validate_pub_topic("sport/tennis/player/ranking").is_ok());
        assert!(validate_pub_topic("sport/tennis/player/#").is_err());
        assert!(validate_pub_topic("sport/+").is_err());
    }

    #[test]
    fn test_topic_match() {
        assert!(topic_match("sport/tennis/player1/#", "sport/tennis/player1"));
        assert!(topic_match(
            "sport/tennis/player1/#",
            "sport/tennis/player1/ranking"
        ));
        assert!(topic_match("sport/tennis/+", "sport/tennis/player1"));
        assert!(!topic_match("sport/tennis/+", "sport/tennis/player1/ranking"));
        assert!(topic_match("sport/+", "sport/"));
        assert!(!topic_match("+", "/finance"));
        assert!(topic_match("+/+", "/finance"));
        assert!(topic_match("#", "a/b/c"));
        assert!(!topic_match("a/+", "a"));
        assert!(topic_match("a/#", "a"));
    }

    #[test]
    fn test_dollar_topics_do_not_match_root_wildcards() {
        assert!(!topic_match("#", "$SYS/monitor/Clients"));
        assert!(!topic_match("+/monitor/Clients", "$SYS/monitor/Clients"));
        assert!(topic_match("$SYS/#", "$SYS/monitor/Clients"));
        assert!(topic_match("$SYS/monitor/+", "$SYS/monitor/Clients"));
    }

    #[test]
    fn test_shared_topic_parse() {
        assert_eq!(SharedTopic::parse("a/b").unwrap(), None);
        let shared = SharedTopic::parse("$share/group1/t/+").unwrap().unwrap();
        assert_eq!(shared.group(), "group1");
        assert_eq!(shared.filter(), "t/+");

        assert!(SharedTopic::parse("$share/").is_err());
        assert!(SharedTopic::parse("$share//t").is_err());
        assert!(SharedTopic::parse("$share/g+/t").is_err());
    }
}
