// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

//! Client-role protocol state machine for MQTT 5.0.

use codec::v5::{
    ConnectAckPacket, ConnectPacket, DisconnectPacket, PingRequestPacket, PingResponsePacket,
    Property, PublishAckPacket, PublishCompletePacket, PublishPacket, PublishReceivedPacket,
    PublishReleasePacket, ReasonCode, SubscribeAckPacket, SubscribePacket, UnsubscribeAckPacket,
    UnsubscribePacket,
};
use codec::{
    ByteArray, DecodePacket, EncodePacket, ExpectedAck, FixedHeader, InflightStore, PacketId,
    PacketIdAllocator, PacketType, QoS, StoreEntry, TopicAliasTable, U16Data, U32Data,
};
use std::collections::HashSet;
use std::time::Instant;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::async_client::{ClientCommand, ClientEvent};
use crate::connect_options::ConnectOptions;
use crate::error::{Error, ErrorKind};
use crate::status::ClientStatus;
use crate::stream::Stream;

pub struct ClientInnerV5 {
    connect_options: ConnectOptions,
    stream: Stream,
    status: ClientStatus,

    packet_ids: PacketIdAllocator,
    inflight: InflightStore,
    qos2_handled: HashSet<PacketId>,

    subscribing_packets: HashSet<PacketId>,
    unsubscribing_packets: HashSet<PacketId>,

    /// Send-side aliases, bounded by the broker's advertised maximum from
    /// the CONNACK. Cleared on every reconnect: aliases do not survive
    /// the connection.
    alias_send: TopicAliasTable,

    /// Receive-side aliases registered by the broker, bounded by the
    /// maximum we advertised in the CONNECT.
    alias_recv: TopicAliasTable,

    ping_sent_at: Option<Instant>,

    event_sender: Sender<ClientEvent>,
}

impl ClientInnerV5 {
    #[must_use]
    pub fn new(connect_options: ConnectOptions, event_sender: Sender<ClientEvent>) -> Self {
        let alias_recv =
            TopicAliasTable::new(connect_options.topic_alias_maximum().unwrap_or(0));
        Self {
            connect_options,
            stream: Stream::none(),
            status: ClientStatus::Disconnected,
            packet_ids: PacketIdAllocator::new(),
            inflight: InflightStore::new(),
            qos2_handled: HashSet::new(),
            subscribing_packets: HashSet::new(),
            unsubscribing_packets: HashSet::new(),
            alias_send: TopicAliasTable::new(0),
            alias_recv,
            ping_sent_at: None,
            event_sender,
        }
    }

    #[must_use]
    pub const fn status(&self) -> ClientStatus {
        self.status
    }

    /// Open the transport and send the CONNECT packet.
    ///
    /// # Errors
    ///
    /// Returns error if the transport or the packet write fails.
    pub async fn connect(&mut self) -> Result<(), Error> {
        if self.status == ClientStatus::Connecting || self.status == ClientStatus::Connected {
            return Err(Error::new(
                ErrorKind::InvalidClientStatus,
                "Already connected",
            ));
        }

        self.stream = Stream::connect(self.connect_options.connect_type()).await?;
        self.ping_sent_at = None;
        // Topic aliases are connection-scoped and never survive a
        // reconnect; the stored inflight entries stay valid because they
        // carry full topic names.
        self.alias_send = TopicAliasTable::new(0);
        self.alias_recv =
            TopicAliasTable::new(self.connect_options.topic_alias_maximum().unwrap_or(0));

        let mut packet = ConnectPacket::new(self.connect_options.client_id())?;
        packet.set_clean_start(self.connect_options.clean_session());
        #[allow(clippy::cast_possible_truncation)]
        packet.set_keep_alive(self.connect_options.keep_alive().as_secs().min(65535) as u16);
        if !self.connect_options.username().is_empty() {
            packet.set_username(self.connect_options.username())?;
        }
        if !self.connect_options.password().is_empty() {
            packet.set_password(self.connect_options.password())?;
        }

        if self.connect_options.session_expiry_interval() > 0 {
            packet.properties_mut().push(Property::SessionExpiryInterval(
                U32Data::new(self.connect_options.session_expiry_interval()),
            ));
        }
        if let Some(receive_maximum) = self.connect_options.receive_maximum() {
            packet
                .properties_mut()
                .push(Property::ReceiveMaximum(U16Data::new(receive_maximum)));
        }
        if let Some(alias_maximum) = self.connect_options.topic_alias_maximum() {
            packet
                .properties_mut()
                .push(Property::TopicAliasMaximum(U16Data::new(alias_maximum)));
        }

        if let Some(will) = self.connect_options.will() {
            packet.set_will(&will.topic, &will.payload, will.qos, will.retain)?;
            if will.delay_interval > 0 {
                packet
                    .will_properties_mut()
                    .push(Property::WillDelayInterval(U32Data::new(
                        will.delay_interval,
                    )));
            }
        }

        self.status = ClientStatus::Connecting;
        self.send(packet).await
    }

    pub async fn run_loop(&mut self, mut command_receiver: Receiver<ClientCommand>) {
        let mut buf = Vec::with_capacity(1024);
        // A keep alive of zero turns the ping mechanism off; the timer
        // still needs a non-zero period to exist.
        let period = if self.connect_options.keep_alive().is_zero() {
            std::time::Duration::from_secs(3600)
        } else {
            self.connect_options.keep_alive()
        };
        let mut timer = tokio::time::interval(period);
        timer.tick().await;

        loop {
            tokio::select! {
                ret = self.stream.read_packet(&mut buf),
                    if self.status == ClientStatus::Connecting
                        || self.status == ClientStatus::Connected => {
                    match ret {
                        Ok(0) => {
                            log::info!("client: Stream closed by broker");
                            self.on_transport_lost().await;
                        }
                        Ok(_n_recv) => {
                            if let Err(err) = self.handle_broker_packet(&buf).await {
                                log::error!("client: Failed to handle packet: {err:?}");
                            }
                            buf.clear();
                        }
                        Err(err) => {
                            log::error!("client: Stream error: {err:?}");
                            buf.clear();
                            self.on_transport_lost().await;
                        }
                    }
                }
                cmd = command_receiver.recv() => {
                    let Some(cmd) = cmd else {
                        let _ = self.shutdown(true).await;
                        return;
                    };
                    let stop = matches!(cmd, ClientCommand::Disconnect);
                    if let Err(err) = self.handle_command(cmd).await {
                        log::error!("client: Failed to handle command: {err:?}");
                    }
                    if stop {
                        return;
                    }
                }
                _ = timer.tick() => {
                    if let Err(err) = self.on_keep_alive_tick().await {
                        log::error!("client: Keep alive failed: {err:?}");
                        self.on_transport_lost().await;
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: ClientCommand) -> Result<(), Error> {
        match cmd {
            ClientCommand::Publish {
                topic,
                qos,
                retain,
                payload,
            } => self.publish(&topic, None, qos, retain, &payload).await,
            ClientCommand::PublishWithAlias {
                topic,
                alias,
                qos,
                payload,
            } => self.publish(&topic, Some(alias), qos, false, &payload).await,
            ClientCommand::Subscribe { topic, qos } => self.subscribe(&topic, qos).await,
            ClientCommand::Unsubscribe { topic } => self.unsubscribe(&topic).await,
            ClientCommand::Reconnect => self.connect().await,
            ClientCommand::Disconnect => self.shutdown(true).await,
        }
    }

    async fn send<P: EncodePacket>(&mut self, packet: P) -> Result<(), Error> {
        let mut buf = Vec::new();
        packet.encode(&mut buf)?;
        self.stream.write(&buf).await.map(drop)
    }

    async fn publish(
        &mut self,
        topic: &str,
        alias: Option<u16>,
        qos: QoS,
        retain: bool,
        payload: &[u8],
    ) -> Result<(), Error> {
        let mut packet = match alias {
            Some(alias) => {
                // A known alias-topic pair shrinks the packet to an empty
                // topic name; the first use registers the mapping.
                let known = self
                    .alias_send
                    .resolve(alias)
                    .ok()
                    .flatten()
                    .is_some_and(|mapped| mapped == topic);
                let mut packet = if known {
                    PublishPacket::with_topic_alias(qos, payload)
                } else {
                    self.alias_send.register(alias, topic).map_err(|err| {
                        Error::from_string(
                            ErrorKind::ProtocolError,
                            format!("client: Cannot register alias {alias}: {err:?}"),
                        )
                    })?;
                    PublishPacket::new(topic, qos, payload)?
                };
                packet
                    .properties_mut()
                    .push(Property::TopicAlias(U16Data::new(alias)));
                packet
            }
            None => PublishPacket::new(topic, qos, payload)?,
        };
        packet.set_retain(retain);

        match qos {
            QoS::AtMostOnce => self.send(packet).await,
            QoS::AtLeastOnce | QoS::ExactOnce => {
                let packet_id = self.packet_ids.allocate()?;
                packet.set_packet_id(packet_id);

                let mut bytes = Vec::new();
                packet.encode(&mut bytes)?;
                let expected = if qos == QoS::AtLeastOnce {
                    ExpectedAck::PublishAck
                } else {
                    ExpectedAck::PublishReceived
                };
                self.inflight.insert_or_update(packet_id, expected, bytes.clone());
                self.stream.write(&bytes).await.map(drop)
            }
        }
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), Error> {
        let packet_id = self.packet_ids.allocate()?;
        self.subscribing_packets.insert(packet_id);
        let packet = SubscribePacket::new(topic, qos, packet_id)?;
        self.send(packet).await
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), Error> {
        let packet_id = self.packet_ids.allocate()?;
        self.unsubscribing_packets.insert(packet_id);
        let packet = UnsubscribePacket::new(topic, packet_id)?;
        self.send(packet).await
    }

    async fn shutdown(&mut self, send_disconnect: bool) -> Result<(), Error> {
        if self.status == ClientStatus::Connected && send_disconnect {
            self.status = ClientStatus::Disconnecting;
            let _ = self.send(DisconnectPacket::new()).await;
        }
        self.stream.shutdown().await;
        self.status = ClientStatus::Disconnected;
        self.emit(ClientEvent::Disconnected).await;
        Ok(())
    }

    async fn on_transport_lost(&mut self) {
        self.stream.shutdown().await;
        self.status = ClientStatus::Disconnected;
        self.ping_sent_at = None;
        self.emit(ClientEvent::Disconnected).await;
    }

    async fn emit(&self, event: ClientEvent) {
        if let Err(err) = self.event_sender.send(event).await {
            log::warn!("client: Event receiver gone: {err:?}");
        }
    }

    async fn on_keep_alive_tick(&mut self) -> Result<(), Error> {
        if self.status != ClientStatus::Connected
            || self.connect_options.keep_alive().is_zero()
        {
            return Ok(());
        }

        if let (Some(sent_at), Some(timeout)) =
            (self.ping_sent_at, self.connect_options.pingresp_timeout())
        {
            if sent_at.elapsed() >= timeout {
                self.emit(ClientEvent::PingTimeout).await;
                return Err(Error::new(
                    ErrorKind::PingTimeout,
                    "No PINGRESP within timeout",
                ));
            }
        }

        self.send(PingRequestPacket::new()).await?;
        if self.ping_sent_at.is_none() {
            self.ping_sent_at = Some(Instant::now());
        }
        Ok(())
    }

    async fn handle_broker_packet(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let fixed_header = FixedHeader::decode(&mut ba)?;

        if self.status == ClientStatus::Connecting
            && fixed_header.packet_type() != PacketType::ConnectAck
        {
            return Err(Error::new(
                ErrorKind::ProtocolError,
                "client: Expected CONNACK as first packet",
            ));
        }

        match fixed_header.packet_type() {
            PacketType::ConnectAck => self.on_connect_ack(buf).await,
            PacketType::Publish { .. } => self.on_message(buf).await,
            PacketType::PublishAck => self.on_publish_ack(buf).await,
            PacketType::PublishReceived => self.on_publish_received(buf).await,
            PacketType::PublishRelease => self.on_publish_release(buf).await,
            PacketType::PublishComplete => self.on_publish_complete(buf).await,
            PacketType::SubscribeAck => self.on_subscribe_ack(buf).await,
            PacketType::UnsubscribeAck => self.on_unsubscribe_ack(buf).await,
            PacketType::PingResponse => self.on_ping_response(buf),
            PacketType::Disconnect => self.on_disconnect(buf).await,
            t => Err(Error::from_string(
                ErrorKind::ProtocolError,
                format!("client: Unexpected packet from broker: {t:?}"),
            )),
        }
    }

    async fn on_connect_ack(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let packet = ConnectAckPacket::decode(&mut ba)?;

        if packet.reason_code() != ReasonCode::Success {
            log::warn!(
                "client: Connect refused with reason {:?}",
                packet.reason_code()
            );
            self.status = ClientStatus::Disconnected;
            self.emit(ClientEvent::ConnectRefused).await;
            return Ok(());
        }

        self.status = ClientStatus::Connected;

        // The broker bounds how many aliases we may use towards it.
        let alias_maximum = packet.properties().topic_alias_maximum().unwrap_or(0);
        self.alias_send = TopicAliasTable::new(alias_maximum);

        if !packet.session_present() {
            self.inflight.clear();
            self.packet_ids.clear();
            self.qos2_handled.clear();
        }
        self.emit(ClientEvent::Connected {
            session_present: packet.session_present(),
        })
        .await;

        if packet.session_present() {
            let blocks: Vec<Vec<u8>> =
                self.inflight.iter().map(StoreEntry::to_resend_bytes).collect();
            for block in blocks {
                self.stream.write(&block).await?;
            }
        }
        Ok(())
    }

    async fn on_message(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let packet = PublishPacket::decode(&mut ba)?;
        let topic = self.resolve_topic(&packet)?;

        match packet.qos() {
            QoS::AtMostOnce => {
                self.emit_message(&packet, topic).await;
            }
            QoS::AtLeastOnce => {
                let packet_id = packet.packet_id();
                self.emit_message(&packet, topic).await;
                self.send(PublishAckPacket::new(packet_id)).await?;
            }
            QoS::ExactOnce => {
                let packet_id = packet.packet_id();
                if !self.qos2_handled.contains(&packet_id) {
                    self.emit_message(&packet, topic).await;
                    self.qos2_handled.insert(packet_id);
                }
                self.send(PublishReceivedPacket::new(packet_id)).await?;
            }
        }
        Ok(())
    }

    /// Apply the receive-side topic alias rules to an incoming publish.
    fn resolve_topic(&mut self, packet: &PublishPacket) -> Result<String, Error> {
        let topic = packet.topic();
        match packet.properties().topic_alias() {
            Some(alias) if topic.is_empty() => {
                match self.alias_recv.resolve(alias) {
                    Ok(Some(mapped)) => Ok(mapped.to_string()),
                    Ok(None) => Err(Error::from_string(
                        ErrorKind::ProtocolError,
                        format!("client: Unregistered topic alias {alias}"),
                    )),
                    Err(err) => Err(Error::from_string(
                        ErrorKind::ProtocolError,
                        format!("client: Invalid topic alias {alias}: {err:?}"),
                    )),
                }
            }
            Some(alias) => {
                self.alias_recv.register(alias, topic).map_err(|err| {
                    Error::from_string(
                        ErrorKind::ProtocolError,
                        format!("client: Invalid topic alias {alias}: {err:?}"),
                    )
                })?;
                Ok(topic.to_string())
            }
            None if topic.is_empty() => Err(Error::new(
                ErrorKind::ProtocolError,
                "client: Empty topic without topic alias",
            )),
            None => Ok(topic.to_string()),
        }
    }

    async fn emit_message(&self, packet: &PublishPacket, topic: String) {
        self.emit(ClientEvent::Message {
            topic,
            qos: packet.qos(),
            retain: packet.retain(),
            payload: packet.message_bytes(),
        })
        .await;
    }

    async fn on_publish_ack(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let packet = PublishAckPacket::decode(&mut ba)?;
        let packet_id = packet.packet_id();

        if packet.reason_code().is_error() {
            log::warn!(
                "client: Publish {packet_id} rejected with reason {:?}",
                packet.reason_code()
            );
        }
        if self.inflight.erase(packet_id, ExpectedAck::PublishAck) {
            self.packet_ids.release(packet_id);
            self.emit(ClientEvent::PublishDone(packet_id)).await;
        } else {
            log::warn!("client: PUBACK for unknown packet id {packet_id}");
        }
        Ok(())
    }

    async fn on_publish_received(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let packet = PublishReceivedPacket::decode(&mut ba)?;
        let packet_id = packet.packet_id();

        if packet.reason_code().is_error() {
            // The exchange ends on an error PUBREC; the id is free again.
            log::warn!(
                "client: Publish {packet_id} rejected with reason {:?}",
                packet.reason_code()
            );
            if self.inflight.erase(packet_id, ExpectedAck::PublishReceived) {
                self.packet_ids.release(packet_id);
            }
            return Ok(());
        }

        let pubrel = PublishReleasePacket::new(packet_id);
        let mut bytes = Vec::new();
        pubrel.encode(&mut bytes)?;
        self.inflight
            .insert_or_update(packet_id, ExpectedAck::PublishComplete, bytes.clone());
        self.stream.write(&bytes).await.map(drop)
    }

    async fn on_publish_release(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let packet = PublishReleasePacket::decode(&mut ba)?;
        let packet_id = packet.packet_id();

        self.qos2_handled.remove(&packet_id);
        self.send(PublishCompletePacket::new(packet_id)).await
    }

    async fn on_publish_complete(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let packet = PublishCompletePacket::decode(&mut ba)?;
        let packet_id = packet.packet_id();

        if self.inflight.erase(packet_id, ExpectedAck::PublishComplete) {
            self.packet_ids.release(packet_id);
            self.emit(ClientEvent::PublishDone(packet_id)).await;
        } else {
            log::warn!("client: PUBCOMP for unknown packet id {packet_id}");
        }
        Ok(())
    }

    async fn on_subscribe_ack(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let packet = SubscribeAckPacket::decode(&mut ba)?;
        let packet_id = packet.packet_id();

        for reason in packet.reasons() {
            if reason.is_error() {
                log::warn!("client: Subscription rejected with reason {reason:?}");
            }
        }
        if self.subscribing_packets.remove(&packet_id) {
            self.packet_ids.release(packet_id);
            self.emit(ClientEvent::SubscribeDone(packet_id)).await;
        } else {
            log::warn!("client: SUBACK for unknown packet id {packet_id}");
        }
        Ok(())
    }

    async fn on_unsubscribe_ack(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let packet = UnsubscribeAckPacket::decode(&mut ba)?;
        let packet_id = packet.packet_id();

        if self.unsubscribing_packets.remove(&packet_id) {
            self.packet_ids.release(packet_id);
            self.emit(ClientEvent::UnsubscribeDone(packet_id)).await;
        } else {
            log::warn!("client: UNSUBACK for unknown packet id {packet_id}");
        }
        Ok(())
    }

    fn on_ping_response(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let _packet = PingResponsePacket::decode(&mut ba)?;
        self.ping_sent_at = None;
        Ok(())
    }

    async fn on_disconnect(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let packet = DisconnectPacket::decode(&mut ba)?;
        log::info!(
            "client: Broker closed the connection with reason {:?}",
            packet.reason_code()
        );
        self.on_transport_lost().await;
        Ok(())
    }
}
