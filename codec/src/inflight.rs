// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Per-session store of unacknowledged outbound PUBLISH and PUBREL packets.

use crate::{ByteArray, DecodeError, DecodePacket, FixedHeader, PacketId, PacketType, QoS};

/// The acknowledgement packet kind which completes or advances the
/// handshake of a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedAck {
    /// QoS 1 PUBLISH waiting for PUBACK.
    PublishAck,

    /// QoS 2 PUBLISH waiting for PUBREC.
    PublishReceived,

    /// PUBREL waiting for PUBCOMP.
    PublishComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// A persisted block holds a packet kind which cannot be restored,
    /// only PUBLISH (QoS > 0) and PUBREL are stored.
    RestoreType,

    /// A persisted block does not decode.
    Decode(DecodeError),
}

impl From<DecodeError> for StoreError {
    fn from(err: DecodeError) -> Self {
        Self::Decode(err)
    }
}

/// One unacknowledged outbound packet.
///
/// The serialized bytes are kept so the packet can be retransmitted
/// unchanged, only the DUP flag is patched on resend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    packet_id: PacketId,
    expected: ExpectedAck,
    bytes: Vec<u8>,
}

impl StoreEntry {
    #[must_use]
    pub fn new(packet_id: PacketId, expected: ExpectedAck, bytes: Vec<u8>) -> Self {
        Self {
            packet_id,
            expected,
            bytes,
        }
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub const fn expected(&self) -> ExpectedAck {
        self.expected
    }

    /// Serialized packet bytes, as originally sent.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Serialized packet bytes with the DUP flag set, for retransmission
    /// of PUBLISH packets. PUBREL packets are returned unchanged.
    #[must_use]
    pub fn to_resend_bytes(&self) -> Vec<u8> {
        let mut bytes = self.bytes.clone();
        if let Some(first) = bytes.first_mut() {
            if (*first >> 4) == 3 {
                *first |= 0b0000_1000;
            }
        }
        bytes
    }

    /// Reconstruct an entry from a persisted opaque block.
    ///
    /// The block is the serialized packet itself. Only PUBLISH with
    /// QoS 1/2 and PUBREL blocks are accepted.
    ///
    /// # Errors
    ///
    /// Returns `RestoreType` for any other packet kind, or a decode error
    /// if the block is truncated.
    pub fn from_block(block: &[u8]) -> Result<Self, StoreError> {
        let mut ba = ByteArray::new(block);
        let fixed_header = FixedHeader::decode(&mut ba)?;
        match fixed_header.packet_type() {
            PacketType::Publish { qos, .. } => {
                // Variable header starts with the topic name, the packet
                // id follows it in both v3 and v5 grammars.
                let expected = match qos {
                    QoS::AtLeastOnce => ExpectedAck::PublishAck,
                    QoS::ExactOnce => ExpectedAck::PublishReceived,
                    QoS::AtMostOnce => return Err(StoreError::RestoreType),
                };
                let topic_len = ba.read_u16().map_err(DecodeError::from)?;
                let _topic = ba.read_bytes(topic_len as usize).map_err(DecodeError::from)?;
                let packet_id = PacketId::decode(&mut ba)?;
                if packet_id.value() == 0 {
                    return Err(StoreError::Decode(DecodeError::InvalidPacketId));
                }
                Ok(Self::new(packet_id, expected, block.to_vec()))
            }
            PacketType::PublishRelease => {
                let packet_id = PacketId::decode(&mut ba)?;
                if packet_id.value() == 0 {
                    return Err(StoreError::Decode(DecodeError::InvalidPacketId));
                }
                Ok(Self::new(
                    packet_id,
                    ExpectedAck::PublishComplete,
                    block.to_vec(),
                ))
            }
            _ => Err(StoreError::RestoreType),
        }
    }
}

/// Insertion-ordered store of inflight entries for one session.
///
/// For a given packet id there is at most one entry, and its expected
/// acknowledgement only advances: the PUBLISH entry is replaced in place
/// by a PUBREL entry when PUBREC is received, keeping the original
/// position so replay order matches send order.
#[derive(Debug, Default, Clone)]
pub struct InflightStore {
    entries: Vec<StoreEntry>,
}

impl InflightStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, packet_id: PacketId) -> bool {
        self.entries.iter().any(|e| e.packet_id == packet_id)
    }

    #[must_use]
    pub fn get(&self, packet_id: PacketId) -> Option<&StoreEntry> {
        self.entries.iter().find(|e| e.packet_id == packet_id)
    }

    /// Insert a new entry or replace the existing entry with the same
    /// packet id in place.
    pub fn insert_or_update(&mut self, packet_id: PacketId, expected: ExpectedAck, bytes: Vec<u8>) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.packet_id == packet_id) {
            entry.expected = expected;
            entry.bytes = bytes;
        } else {
            self.entries.push(StoreEntry::new(packet_id, expected, bytes));
        }
    }

    /// Remove the entry with `packet_id` if its expected acknowledgement
    /// matches. A mismatch leaves the store untouched, protecting the
    /// handshake against stray acknowledgements.
    pub fn erase(&mut self, packet_id: PacketId, expected: ExpectedAck) -> bool {
        let index = self
            .entries
            .iter()
            .position(|e| e.packet_id == packet_id && e.expected == expected);
        if let Some(index) = index {
            self.entries.remove(index);
            true
        } else {
            false
        }
    }

    /// Iterate entries in insertion order, for replay on reconnect.
    pub fn iter(&self) -> impl Iterator<Item = &StoreEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Serialize all entries as opaque blocks for cross-restart recovery.
    #[must_use]
    pub fn to_blocks(&self) -> Vec<Vec<u8>> {
        self.entries.iter().map(|e| e.bytes.clone()).collect()
    }

    /// Restore entries from persisted blocks in order.
    ///
    /// # Errors
    ///
    /// Returns error on the first block which does not restore; earlier
    /// blocks stay inserted.
    pub fn restore_blocks(&mut self, blocks: &[Vec<u8>]) -> Result<(), StoreError> {
        for block in blocks {
            let entry = StoreEntry::from_block(block)?;
            self.insert_or_update(entry.packet_id, entry.expected, entry.bytes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // PUBLISH, QoS 1, topic "t", pid 5, payload "m".
    const QOS1_PUBLISH: &[u8] = &[0x32, 0x06, 0x00, 0x01, b't', 0x00, 0x05, b'm'];
    // PUBREL, pid 5.
    const PUBREL: &[u8] = &[0x62, 0x02, 0x00, 0x05];

    #[test]
    fn test_insert_erase() {
        let mut store = InflightStore::new();
        store.insert_or_update(
            PacketId::new(5),
            ExpectedAck::PublishAck,
            QOS1_PUBLISH.to_vec(),
        );
        assert_eq!(store.len(), 1);

        // A stray PUBCOMP must not remove the entry.
        assert!(!store.erase(PacketId::new(5), ExpectedAck::PublishComplete));
        assert_eq!(store.len(), 1);

        assert!(store.erase(PacketId::new(5), ExpectedAck::PublishAck));
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_keeps_position() {
        let mut store = InflightStore::new();
        store.insert_or_update(PacketId::new(1), ExpectedAck::PublishReceived, vec![1]);
        store.insert_or_update(PacketId::new(2), ExpectedAck::PublishReceived, vec![2]);

        // PUBREC for pid 1 replaces the entry with a PUBREL in place.
        store.insert_or_update(PacketId::new(1), ExpectedAck::PublishComplete, vec![3]);
        let order: Vec<u16> = store.iter().map(|e| e.packet_id().value()).collect();
        assert_eq!(order, vec![1, 2]);
        assert_eq!(
            store.get(PacketId::new(1)).unwrap().expected(),
            ExpectedAck::PublishComplete
        );
    }

    #[test]
    fn test_resend_sets_dup() {
        let entry = StoreEntry::from_block(QOS1_PUBLISH).unwrap();
        let resend = entry.to_resend_bytes();
        assert_eq!(resend[0], 0x3a);

        let entry = StoreEntry::from_block(PUBREL).unwrap();
        assert_eq!(entry.to_resend_bytes(), PUBREL.to_vec());
    }

    #[test]
    fn test_restore_blocks() {
        let mut store = InflightStore::new();
        store
            .restore_blocks(&[QOS1_PUBLISH.to_vec(), PUBREL.to_vec()])
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get(PacketId::new(5)).unwrap().expected(),
            ExpectedAck::PublishComplete
        );
    }

    #[test]
    fn test_restore_rejects_other_kinds() {
        // PINGREQ block.
        let block = vec![0xc0, 0x00];
        assert_eq!(
            StoreEntry::from_block(&block),
            Err(StoreError::RestoreType)
        );
    }
}
