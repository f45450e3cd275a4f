// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Session actor: the server-role protocol state machine of one
//! connection.
//!
//! The actor owns the socket and every piece of per-connection protocol
//! state: the packet id allocator, the inflight store of unacknowledged
//! outbound publishes, the set of handled inbound QoS 2 ids and the
//! receive-side topic alias table. Other apps reach the connection only
//! through its command channel.

use codec::{
    EncodePacket, InflightStore, PacketId, PacketIdAllocator, ProtocolLevel, TopicAliasTable,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{Receiver, Sender};

use crate::commands::{ListenerToSessionCmd, SessionToListenerCmd};
use crate::error::{Error, ErrorKind};
use crate::stream::Stream;
use crate::types::{DisconnectContext, OutboundPublish, SessionId, SessionState};

mod client;
mod config;
mod listener;

pub use config::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Network connection established, CONNECT not yet received.
    Invalid,

    /// CONNECT forwarded, waiting for the broker's answer.
    Connecting,

    Connected,

    Disconnecting,

    Disconnected,
}

/// One connection of the broker.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    config: SessionConfig,
    stream: Stream,

    status: Status,
    protocol_level: ProtocolLevel,
    client_id: String,

    /// True when the broker generated the client id for an empty one; the
    /// id is echoed to v5 clients in the CONNACK.
    assigned_client_id: bool,

    /// Effective keep alive in seconds, after the server maximum is
    /// applied. Zero disables the idle check.
    keep_alive: u64,

    /// Instant of the last packet received from the client.
    last_packet_at: Instant,
    connected_at: Instant,

    /// Outbound QoS state.
    packet_ids: PacketIdAllocator,
    inflight: InflightStore,

    /// Advertised receive maximum of the peer; bounds the number of
    /// unacknowledged outbound publishes.
    peer_receive_maximum: usize,

    /// Deliveries waiting for a free outbound quota slot.
    pending_out: VecDeque<OutboundPublish>,

    /// Inbound QoS state: ids of QoS 2 publishes whose PUBREL has not
    /// arrived yet, and publishes whose authorization result is pending.
    qos2_handled: HashSet<PacketId>,
    pending_acl: HashMap<PacketId, codec::QoS>,

    /// Receive-side topic alias table, bounded by our advertised maximum.
    alias_recv: TopicAliasTable,

    /// True after a clean DISCONNECT; the Will is discarded then.
    graceful_disconnect: bool,

    /// Session expiry override from a v5 DISCONNECT packet.
    disconnect_expiry: Option<u32>,

    sender: Sender<SessionToListenerCmd>,
    receiver: Receiver<ListenerToSessionCmd>,
}

impl Session {
    pub fn new(
        id: SessionId,
        config: SessionConfig,
        stream: Stream,
        sender: Sender<SessionToListenerCmd>,
        receiver: Receiver<ListenerToSessionCmd>,
    ) -> Self {
        let alias_recv = TopicAliasTable::new(config.topic_alias_maximum());
        Self {
            id,
            config,
            stream,

            status: Status::Invalid,
            protocol_level: ProtocolLevel::V311,
            client_id: String::new(),
            assigned_client_id: false,
            keep_alive: 0,
            last_packet_at: Instant::now(),
            connected_at: Instant::now(),

            packet_ids: PacketIdAllocator::new(),
            inflight: InflightStore::new(),
            peer_receive_maximum: usize::from(u16::MAX),
            pending_out: VecDeque::new(),

            qos2_handled: HashSet::new(),
            pending_acl: HashMap::new(),

            alias_recv,

            graceful_disconnect: false,
            disconnect_expiry: None,

            sender,
            receiver,
        }
    }

    pub async fn run_loop(mut self) {
        let mut buf = Vec::with_capacity(1024);
        let mut timer = tokio::time::interval(Duration::from_secs(1));

        loop {
            if self.status == Status::Disconnected {
                break;
            }

            tokio::select! {
                ret = self.stream.read_packet(
                    &mut buf,
                    self.config.packet_bulk_read_limit(),
                    self.config.maximum_packet_size(),
                ) => {
                    match ret {
                        Ok(0) => {
                            log::info!("session: Stream closed by peer, {}", self.id);
                            break;
                        }
                        Ok(_n_recv) => {
                            self.last_packet_at = Instant::now();
                            if let Err(err) = self.handle_client_packet(&buf).await {
                                self.handle_error(err).await;
                            }
                            buf.clear();
                        }
                        Err(err) => {
                            self.handle_error(err).await;
                            buf.clear();
                        }
                    }
                }
                Some(cmd) = self.receiver.recv() => {
                    if let Err(err) = self.handle_listener_cmd(cmd).await {
                        log::error!("session: Failed to handle listener cmd: {err:?}");
                    }
                },
                _ = timer.tick() => {
                    self.check_timeouts().await;
                },
            }
        }

        let context = self.build_disconnect_context();
        if let Err(err) = self
            .sender
            .send(SessionToListenerCmd::Disconnect(self.id, context))
            .await
        {
            log::error!(
                "session: Failed to send disconnect cmd to listener, id: {}, err: {err:?}",
                self.id
            );
        }
    }

    async fn check_timeouts(&mut self) {
        // If the server does not receive a CONNECT packet within a
        // reasonable amount of time after the network connection is
        // established, it SHOULD close the connection. The same bound
        // covers a connect handshake stuck behind a lost broker reply.
        if (self.status == Status::Invalid || self.status == Status::Connecting)
            && self.config.connect_timeout() > 0
            && self.connected_at.elapsed().as_secs() > self.config.connect_timeout()
        {
            log::info!("session: Connect timeout reached, {}", self.id);
            self.close_stream().await;
            return;
        }

        // If the Keep Alive value is non-zero and the Server does not
        // receive a Control Packet from the Client within one and a half
        // times the Keep Alive time period, it MUST disconnect
        // [MQTT-3.1.2-24].
        if self.status == Status::Connected
            && self.keep_alive > 0
            && self.last_packet_at.elapsed().as_secs() * 2 > self.keep_alive * 3
        {
            log::warn!(
                "session: keep_alive timeout, disconnect client {}",
                self.client_id
            );
            if self.protocol_level == ProtocolLevel::V5 {
                let packet = codec::v5::DisconnectPacket::with_reason(
                    codec::v5::ReasonCode::KeepAliveTimeout,
                );
                let _ = self.send(packet).await;
            }
            self.close_stream().await;
        }
    }

    /// Encode and write one packet to the stream.
    pub(super) async fn send<P: EncodePacket>(&mut self, packet: P) -> Result<(), Error> {
        if self.status == Status::Disconnected {
            return Err(Error::new(
                ErrorKind::SendError,
                "session: Cannot send packet on closed stream",
            ));
        }
        let mut buf = Vec::new();
        packet.encode(&mut buf)?;
        self.stream.write(&buf).await.map(drop)?;
        Ok(())
    }

    /// Write pre-serialized bytes, used when replaying the inflight
    /// store.
    pub(super) async fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.stream.write(bytes).await.map(drop)?;
        Ok(())
    }

    /// Classify a connection error and close accordingly: malformed and
    /// protocol errors get a best-effort v5 DISCONNECT with the matching
    /// reason code, transport errors close silently.
    async fn handle_error(&mut self, err: Error) {
        let reason = match err.kind() {
            ErrorKind::DecodeError => Some(codec::v5::ReasonCode::MalformedPacket),
            ErrorKind::ProtocolError => Some(codec::v5::ReasonCode::ProtocolError),
            ErrorKind::PacketTooLarge => Some(codec::v5::ReasonCode::PacketTooLarge),
            ErrorKind::QuotaExceeded => Some(codec::v5::ReasonCode::QuotaExceeded),
            ErrorKind::NotAuthorized => Some(codec::v5::ReasonCode::NotAuthorized),
            ErrorKind::IdExhausted => Some(codec::v5::ReasonCode::QuotaExceeded),
            _ => None,
        };
        log::error!("session: Connection error on {}: {err:?}", self.id);

        if let Some(reason) = reason {
            if self.status == Status::Connected && self.protocol_level == ProtocolLevel::V5 {
                let packet = codec::v5::DisconnectPacket::with_reason(reason);
                let _ = self.send(packet).await;
            }
        }
        self.close_stream().await;
    }

    /// Graceful close with a bounded timer; a hard close follows when the
    /// timer fires. Closing twice is harmless.
    pub(super) async fn close_stream(&mut self) {
        if self.status == Status::Disconnected {
            return;
        }
        self.status = Status::Disconnecting;
        let timeout = self.config.shutdown_timeout();
        match tokio::time::timeout(timeout, self.stream.shutdown()).await {
            Ok(Ok(())) => (),
            Ok(Err(err)) => {
                log::warn!("session: Graceful close failed on {}: {err:?}", self.id);
            }
            Err(_elapsed) => {
                log::warn!(
                    "session: Graceful close timed out on {}, closing hard",
                    self.id
                );
            }
        }
        self.status = Status::Disconnected;
    }

    /// Number of inbound publishes counting against the receive maximum:
    /// authorization-pending ones plus QoS 2 exchanges awaiting PUBREL.
    pub(super) fn inbound_quota_used(&self) -> usize {
        self.pending_acl.len() + self.qos2_handled.len()
    }

    fn build_disconnect_context(&self) -> DisconnectContext {
        let mut qos2_handled: Vec<PacketId> = self.qos2_handled.iter().copied().collect();
        qos2_handled.sort_unstable();
        DisconnectContext {
            graceful: self.graceful_disconnect,
            session_expiry_interval: self.disconnect_expiry,
            state: SessionState {
                inflight_blocks: self.inflight.to_blocks(),
                qos2_handled,
            },
        }
    }

    /// Restore per-session protocol state on session resumption, before
    /// the CONNACK is written.
    pub(super) fn restore_state(&mut self, state: &SessionState) -> Result<(), Error> {
        self.inflight.restore_blocks(&state.inflight_blocks)?;
        let ids: Vec<PacketId> = self.inflight.iter().map(codec::StoreEntry::packet_id).collect();
        for id in ids {
            self.packet_ids.register(id);
        }
        for id in &state.qos2_handled {
            self.qos2_handled.insert(*id);
        }
        Ok(())
    }

    /// Retransmit every stored entry in insertion order with the DUP flag
    /// set, then release the write path for fresh deliveries.
    pub(super) async fn replay_inflight(&mut self) -> Result<(), Error> {
        let blocks: Vec<Vec<u8>> = self
            .inflight
            .iter()
            .map(codec::StoreEntry::to_resend_bytes)
            .collect();
        for block in blocks {
            self.send_bytes(&block).await?;
        }
        Ok(())
    }
}
