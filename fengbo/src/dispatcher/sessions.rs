// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Session table of the dispatcher.
//!
//! One record per client id, holding the live connection handle, the
//! subscriptions, the offline queue and the cached protocol state while
//! the session is disconnected.

use codec::v5::SubscribeOptions;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::types::{
    ConnectRequest, OutboundPublish, SessionGid, SessionState, WillMessage,
};

/// One subscription of a session.
#[derive(Debug, Clone)]
pub struct SubscriptionEntry {
    pub options: SubscribeOptions,
    pub subscription_id: Option<usize>,

    /// Share group name when this is a shared subscription; the key in
    /// the subscriptions map is the full `$share/...` filter then.
    pub share_group: Option<String>,
}

/// Per-client-id session record.
#[derive(Debug)]
pub struct SessionRecord {
    /// Live connection, `None` while the session is offline.
    pub gid: Option<SessionGid>,

    pub clean_session: bool,

    /// Session expiry interval in seconds; `u32::MAX` never expires.
    pub session_expiry_interval: u32,

    /// `filter → subscription` as subscribed, shared filters under their
    /// full `$share/...` form.
    pub subscriptions: HashMap<String, SubscriptionEntry>,

    /// Messages queued while the session is offline, in arrival order.
    pub offline_queue: VecDeque<OutboundPublish>,

    /// Number of messages dropped from the full offline queue.
    pub offline_dropped: usize,

    /// Cached inflight state while offline.
    pub state: SessionState,

    pub will: Option<WillMessage>,

    /// Deadline for discarding the offline session.
    pub expire_at: Option<Instant>,

    /// Deadline for publishing the delayed will.
    pub will_due_at: Option<Instant>,

    /// A connect request waiting for the previous connection of this
    /// client id to finish its takeover shutdown.
    pub pending_connect: Option<(SessionGid, ConnectRequest)>,
}

impl SessionRecord {
    #[must_use]
    pub fn new(gid: SessionGid, request: &ConnectRequest) -> Self {
        Self {
            gid: Some(gid),
            clean_session: request.clean_session,
            session_expiry_interval: request.session_expiry_interval.unwrap_or(0),
            subscriptions: HashMap::new(),
            offline_queue: VecDeque::new(),
            offline_dropped: 0,
            state: SessionState::default(),
            will: request.will.clone(),
            expire_at: None,
            will_due_at: None,
            pending_connect: None,
        }
    }

    /// Reset connection-scoped fields on resume.
    pub fn resume(&mut self, gid: SessionGid, request: &ConnectRequest) {
        self.gid = Some(gid);
        self.clean_session = request.clean_session;
        self.session_expiry_interval = request.session_expiry_interval.unwrap_or(0);
        self.will = request.will.clone();
        self.expire_at = None;
        // A reconnect within the will delay interval cancels the will
        // [MQTT-3.1.3-9].
        self.will_due_at = None;
    }

    /// Queue a message for the offline session, dropping the oldest entry
    /// when the queue is full.
    pub fn queue_offline(&mut self, publish: OutboundPublish, limit: usize) {
        if self.offline_queue.len() >= limit {
            self.offline_queue.pop_front();
            self.offline_dropped += 1;
            log::warn!(
                "sessions: Offline queue full, {} messages dropped so far",
                self.offline_dropped
            );
        }
        self.offline_queue.push_back(publish);
    }

    /// True when messages should be kept for this session while offline.
    #[must_use]
    pub fn keeps_messages(&self) -> bool {
        !self.clean_session && self.session_expiry_interval > 0
    }

    /// Arm the session expiry timer at disconnect time.
    pub fn arm_expiry(&mut self, now: Instant) {
        self.expire_at = if self.session_expiry_interval == u32::MAX {
            None
        } else {
            now.checked_add(Duration::from_secs(u64::from(self.session_expiry_interval)))
        };
    }
}

/// `client id → session record` table with a reverse index from the live
/// connection id.
#[derive(Debug, Default)]
pub struct SessionTable {
    by_client: HashMap<String, SessionRecord>,
    by_gid: HashMap<SessionGid, String>,
}

impl SessionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_client.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_client.is_empty()
    }

    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<&SessionRecord> {
        self.by_client.get(client_id)
    }

    #[must_use]
    pub fn get_mut(&mut self, client_id: &str) -> Option<&mut SessionRecord> {
        self.by_client.get_mut(client_id)
    }

    #[must_use]
    pub fn client_of(&self, gid: SessionGid) -> Option<&str> {
        self.by_gid.get(&gid).map(String::as_str)
    }

    /// Register a fresh record, replacing any previous one for the same
    /// client id.
    pub fn insert(&mut self, client_id: String, record: SessionRecord) {
        if let Some(old) = self.by_client.remove(&client_id) {
            if let Some(old_gid) = old.gid {
                self.by_gid.remove(&old_gid);
            }
        }
        if let Some(gid) = record.gid {
            self.by_gid.insert(gid, client_id.clone());
        }
        self.by_client.insert(client_id, record);
    }

    /// Attach a live connection to an existing record.
    pub fn attach(&mut self, client_id: &str, gid: SessionGid) {
        if let Some(record) = self.by_client.get_mut(client_id) {
            if let Some(old_gid) = record.gid.replace(gid) {
                self.by_gid.remove(&old_gid);
            }
            self.by_gid.insert(gid, client_id.to_string());
        }
    }

    /// Detach the live connection `gid` from its record. Returns the
    /// client id if the gid was current.
    pub fn detach(&mut self, gid: SessionGid) -> Option<String> {
        let client_id = self.by_gid.remove(&gid)?;
        if let Some(record) = self.by_client.get_mut(&client_id) {
            if record.gid == Some(gid) {
                record.gid = None;
            }
        }
        Some(client_id)
    }

    /// Drop the record for `client_id` entirely.
    pub fn remove(&mut self, client_id: &str) -> Option<SessionRecord> {
        let record = self.by_client.remove(client_id)?;
        if let Some(gid) = record.gid {
            self.by_gid.remove(&gid);
        }
        Some(record)
    }

    /// Client ids whose offline expiry deadline has passed.
    #[must_use]
    pub fn expired_clients(&self, now: Instant) -> Vec<String> {
        self.by_client
            .iter()
            .filter(|(_, record)| {
                record.gid.is_none()
                    && record
                        .expire_at
                        .is_some_and(|deadline| deadline <= now)
            })
            .map(|(client_id, _)| client_id.clone())
            .collect()
    }

    /// Client ids with a will due for publication.
    #[must_use]
    pub fn due_wills(&self, now: Instant) -> Vec<String> {
        self.by_client
            .iter()
            .filter(|(_, record)| {
                record
                    .will_due_at
                    .is_some_and(|deadline| deadline <= now)
            })
            .map(|(client_id, _)| client_id.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SessionRecord)> {
        self.by_client.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use codec::v5::Properties;
    use codec::{PacketId, QoS};

    fn request(client_id: &str, clean_session: bool, expiry: u32) -> ConnectRequest {
        ConnectRequest {
            client_id: client_id.to_string(),
            assigned_client_id: false,
            protocol_level: codec::ProtocolLevel::V311,
            clean_session,
            keep_alive: 60,
            username: String::new(),
            password: Vec::new(),
            will: None,
            session_expiry_interval: Some(expiry),
            receive_maximum: None,
            topic_alias_maximum: None,
        }
    }

    fn outbound(payload: &str) -> OutboundPublish {
        OutboundPublish {
            message: crate::types::PublishMessage {
                topic: "t".to_string(),
                qos: QoS::AtLeastOnce,
                retain: false,
                payload: Bytes::copy_from_slice(payload.as_bytes()),
                message_expiry_interval: None,
                properties: Properties::new(),
                packet_id: PacketId::new(0),
            },
            qos: QoS::AtLeastOnce,
            retain: false,
            subscription_ids: Vec::new(),
        }
    }

    #[test]
    fn test_attach_detach() {
        let mut table = SessionTable::new();
        let gid = SessionGid::new(0, 1);
        table.insert("c1".to_string(), SessionRecord::new(gid, &request("c1", false, 30)));
        assert_eq!(table.client_of(gid), Some("c1"));

        assert_eq!(table.detach(gid), Some("c1".to_string()));
        assert_eq!(table.client_of(gid), None);
        assert!(table.get("c1").unwrap().gid.is_none());

        // A stale detach of the same gid is a no-op.
        assert_eq!(table.detach(gid), None);

        let new_gid = SessionGid::new(0, 2);
        table.attach("c1", new_gid);
        assert_eq!(table.client_of(new_gid), Some("c1"));
    }

    #[test]
    fn test_offline_queue_bound_drops_oldest() {
        let gid = SessionGid::new(0, 1);
        let mut record = SessionRecord::new(gid, &request("c1", false, 30));
        for index in 0..4 {
            record.queue_offline(outbound(&format!("m{index}")), 3);
        }
        assert_eq!(record.offline_queue.len(), 3);
        assert_eq!(record.offline_dropped, 1);
        assert_eq!(record.offline_queue[0].message.payload, Bytes::from_static(b"m1"));
    }

    #[test]
    fn test_keeps_messages() {
        let gid = SessionGid::new(0, 1);
        let record = SessionRecord::new(gid, &request("c1", false, 30));
        assert!(record.keeps_messages());

        let record = SessionRecord::new(gid, &request("c2", true, 0));
        assert!(!record.keeps_messages());

        let record = SessionRecord::new(gid, &request("c3", false, 0));
        assert!(!record.keeps_messages());
    }

    #[test]
    fn test_expiry_deadlines() {
        let now = Instant::now();
        let gid = SessionGid::new(0, 1);
        let mut table = SessionTable::new();

        let mut record = SessionRecord::new(gid, &request("c1", false, 0));
        record.session_expiry_interval = 1;
        record.gid = None;
        record.expire_at = Some(now);
        table.insert("c1".to_string(), record);

        let expired = table.expired_clients(now + Duration::from_secs(2));
        assert_eq!(expired, vec!["c1".to_string()]);

        // A live session never expires.
        table.attach("c1", gid);
        assert!(table
            .expired_clients(now + Duration::from_secs(2))
            .is_empty());
    }

    #[test]
    fn test_resume_cancels_will_and_expiry() {
        let gid = SessionGid::new(0, 1);
        let mut record = SessionRecord::new(gid, &request("c1", false, 30));
        record.gid = None;
        record.expire_at = Some(Instant::now());
        record.will_due_at = Some(Instant::now());

        let new_gid = SessionGid::new(0, 2);
        record.resume(new_gid, &request("c1", false, 60));
        assert_eq!(record.gid, Some(new_gid));
        assert!(record.expire_at.is_none());
        assert!(record.will_due_at.is_none());
        assert_eq!(record.session_expiry_interval, 60);
    }
}
