// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Protocol-neutral structs passed between the broker apps.
//!
//! The session actors translate between the versioned wire packets and
//! these structs, so the dispatcher and the security apps never need to
//! care which protocol version a connection speaks.

use bytes::Bytes;
use codec::v5::{Properties, SubscribeOptions};
use codec::{PacketId, ProtocolLevel, QoS};
use std::fmt;

pub type ListenerId = u32;
pub type SessionId = u64;

/// Globally unique session identifier, `(listener_id, session_id)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionGid {
    listener_id: ListenerId,
    session_id: SessionId,
}

impl SessionGid {
    #[must_use]
    pub const fn new(listener_id: ListenerId, session_id: SessionId) -> Self {
        Self {
            listener_id,
            session_id,
        }
    }

    #[must_use]
    pub const fn listener_id(&self) -> ListenerId {
        self.listener_id
    }

    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }
}

impl fmt::Display for SessionGid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.listener_id, self.session_id)
    }
}

/// An application message in flight through the broker.
///
/// The topic alias of the publisher has already been resolved and
/// stripped; alias maps are per-connection and never forwarded.
#[derive(Debug, Clone)]
pub struct PublishMessage {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Bytes,

    /// Remaining lifetime in seconds, from the message expiry interval
    /// property. Decremented by the queueing time on delivery.
    pub message_expiry_interval: Option<u32>,

    /// Forwarded v5 properties (response topic, correlation data, content
    /// type, user properties). Empty for v3 publishers.
    pub properties: Properties,

    /// Packet id assigned by the publisher, used to correlate the
    /// acknowledgement on the inbound side. Zero for QoS 0.
    pub packet_id: PacketId,
}

/// One filter entry of a subscribe request.
#[derive(Debug, Clone)]
pub struct SubscribeFilter {
    pub filter: String,
    pub options: SubscribeOptions,
}

/// Protocol-neutral SUBSCRIBE request.
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub packet_id: PacketId,
    pub filters: Vec<SubscribeFilter>,

    /// v5 subscription identifier covering all filters in this request.
    pub subscription_id: Option<usize>,
}

/// Per-filter result of a subscribe request, in request order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeReply {
    /// Subscription accepted with the granted maximum QoS.
    Granted(QoS),

    /// Filter rejected by the authorization rules.
    NotAuthorized,

    /// Filter failed to parse or breaks wildcard rules.
    InvalidFilter,
}

/// Protocol-neutral UNSUBSCRIBE request.
#[derive(Debug, Clone)]
pub struct UnsubscribeRequest {
    pub packet_id: PacketId,
    pub filters: Vec<String>,
}

/// Per-filter result of an unsubscribe request, in request order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeReply {
    Success,
    NoSubscriptionExisted,
}

/// Will message captured from a CONNECT packet, published by the broker
/// when the connection ends abnormally.
#[derive(Debug, Clone)]
pub struct WillMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,

    /// Seconds to wait after disconnect before publishing. A reconnect
    /// within the interval cancels the publication.
    pub delay_interval: u32,

    pub message_expiry_interval: Option<u32>,
    pub properties: Properties,
}

/// Protocol-neutral CONNECT request, sent by a session actor after the
/// wire packet has been validated.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub client_id: String,

    /// True when the broker generated the client id for an empty one.
    pub assigned_client_id: bool,

    pub protocol_level: ProtocolLevel,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub username: String,
    pub password: Vec<u8>,
    pub will: Option<WillMessage>,

    /// v5 session expiry interval in seconds; `None` maps to 0, which
    /// ends the session when the network connection closes. For v3
    /// connections with CleanSession=0 this is `u32::MAX` (no expiry).
    pub session_expiry_interval: Option<u32>,

    pub receive_maximum: Option<u16>,
    pub topic_alias_maximum: Option<u16>,
}

/// Generic connect refusal reasons, translated to a v3 return code or a
/// v5 reason code by the session actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    NotAuthorized,
    IdentifierRejected,
    ServerUnavailable,
}

/// Session state handed back to a session actor when it resumes an
/// existing session.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Serialized inflight entries, in send order.
    pub inflight_blocks: Vec<Vec<u8>>,

    /// Incoming QoS 2 publish ids whose PUBREL has not yet arrived.
    pub qos2_handled: Vec<PacketId>,
}

/// Reply to a `ConnectRequest`.
#[derive(Debug, Clone)]
pub struct ConnectReply {
    pub result: Result<(), ConnectError>,
    pub session_present: bool,

    /// Restored state when `session_present` is true.
    pub state: SessionState,

    /// Keep alive value the server enforces, echoed to v5 clients via the
    /// server keep alive property when it differs from the request.
    pub keep_alive: u16,
}

/// A publish delivery on its way to one subscriber.
#[derive(Debug, Clone)]
pub struct OutboundPublish {
    pub message: PublishMessage,

    /// Delivery QoS after the `min(publisher, subscription)` downgrade.
    pub qos: QoS,

    /// Retain flag after applying retain-as-published, or set for
    /// retained-on-subscribe deliveries.
    pub retain: bool,

    /// Subscription identifiers of the matching subscriptions.
    pub subscription_ids: Vec<usize>,
}

/// Why a session actor is asked to drop its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KickReason {
    /// Another connection with the same client id took over the session.
    SessionTakenOver,

    /// The broker is shutting down.
    ServerShuttingDown,
}

/// Context a session actor reports when its connection ends.
#[derive(Debug, Clone)]
pub struct DisconnectContext {
    /// True for a clean DISCONNECT with normal reason; the Will is
    /// discarded in that case.
    pub graceful: bool,

    /// Session expiry requested at DISCONNECT time (v5 allows updating
    /// the interval in the DISCONNECT packet).
    pub session_expiry_interval: Option<u32>,

    /// Per-session protocol state to cache for resumption.
    pub state: SessionState,
}
