// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Command enums exchanged between the broker apps over mpsc channels.

use crate::types::{
    ConnectReply, ConnectRequest, DisconnectContext, KickReason, ListenerId, OutboundPublish,
    PublishMessage, SessionGid, SessionId, SubscribeReply, SubscribeRequest, UnsubscribeReply,
    UnsubscribeRequest,
};

#[derive(Debug, Clone)]
pub enum ListenerToAuthCmd {
    /// listener-id, session-id, username, password.
    RequestAuth(ListenerId, SessionId, String, Vec<u8>),
}

#[derive(Debug, Clone)]
pub enum AuthToListenerCmd {
    /// session-id, authenticated identity. `None` means access denied;
    /// anonymous and unauthenticated logins map to their configured
    /// usernames.
    ResponseAuth(SessionId, Option<String>),
}

#[derive(Debug, Clone)]
pub enum ListenerToAclCmd {
    /// Check whether `identity` may publish to the message topic.
    Publish(SessionGid, String, PublishMessage),

    /// Check which filters of the request `identity` may subscribe to.
    Subscribe(SessionGid, String, SubscribeRequest),
}

#[derive(Debug, Clone)]
pub enum AclToListenerCmd {
    /// (session-id, message, accepted).
    PublishResult(SessionId, PublishMessage, bool),

    /// (session-id, request, per-filter allowed flags in request order).
    SubscribeResult(SessionId, SubscribeRequest, Vec<bool>),
}

#[derive(Debug, Clone)]
pub enum SessionToListenerCmd {
    Connect(SessionId, ConnectRequest),
    Publish(SessionId, PublishMessage),
    Subscribe(SessionId, SubscribeRequest),
    Unsubscribe(SessionId, UnsubscribeRequest),

    /// The connection ended, carrying the state to cache.
    Disconnect(SessionId, DisconnectContext),
}

#[derive(Debug, Clone)]
pub enum ListenerToSessionCmd {
    /// Answer to a connect request.
    ConnectAck(ConnectReply),

    /// Result of the publish authorization for an inbound publish:
    /// (packet-id, qos, accepted).
    PublishAck(codec::PacketId, codec::QoS, bool),

    /// Deliver a message to the connected subscriber.
    Publish(OutboundPublish),

    /// Per-filter subscribe results, in request order.
    SubscribeAck(codec::PacketId, Vec<SubscribeReply>),

    /// Per-filter unsubscribe results, in request order.
    UnsubscribeAck(codec::PacketId, Vec<UnsubscribeReply>),

    /// Force-close this connection.
    Kick(KickReason),
}

#[derive(Debug, Clone)]
pub enum ListenerToDispatcherCmd {
    /// A connection passed authentication; resolve its session.
    CheckSession(SessionGid, ConnectRequest),

    /// An authorized publish to route.
    Publish(SessionGid, PublishMessage),

    /// Subscribe request with per-filter authorization flags.
    Subscribe(SessionGid, SubscribeRequest, Vec<bool>),

    Unsubscribe(SessionGid, UnsubscribeRequest),

    /// Session ended; cache or destroy per its expiry settings.
    SessionDisconnected(SessionGid, DisconnectContext),
}

#[derive(Debug, Clone)]
pub enum DispatcherToListenerCmd {
    /// Answer to `CheckSession`, to forward to the session actor.
    CheckSessionResp(SessionId, ConnectReply),

    /// Deliver a message to a connected session.
    Publish(SessionId, OutboundPublish),

    SubscribeAck(SessionId, codec::PacketId, Vec<SubscribeReply>),

    UnsubscribeAck(SessionId, codec::PacketId, Vec<UnsubscribeReply>),

    /// Force-close a session, e.g. on session takeover.
    Kick(SessionId, KickReason),
}
