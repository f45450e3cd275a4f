// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Dispatcher handlers for listener commands: session resolution, publish
//! routing, subscriptions and disconnects.

use codec::v5::RetainHandling;
use codec::{PacketId, QoS, SharedTopic};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::sessions::{SessionRecord, SubscriptionEntry};
use super::{Dispatcher, RetainedMessage};
use crate::commands::{DispatcherToListenerCmd, ListenerToDispatcherCmd};
use crate::error::Error;
use crate::types::{
    ConnectReply, ConnectRequest, DisconnectContext, KickReason, OutboundPublish, PublishMessage,
    SessionGid, SessionState, SubscribeReply, SubscribeRequest, UnsubscribeReply,
    UnsubscribeRequest, WillMessage,
};

impl Dispatcher {
    pub(super) async fn handle_listener_cmd(
        &mut self,
        cmd: ListenerToDispatcherCmd,
    ) -> Result<(), Error> {
        match cmd {
            ListenerToDispatcherCmd::CheckSession(gid, request) => {
                self.on_check_session(gid, request).await
            }
            ListenerToDispatcherCmd::Publish(gid, message) => self.on_publish(gid, message).await,
            ListenerToDispatcherCmd::Subscribe(gid, request, allowed) => {
                self.on_subscribe(gid, request, allowed).await
            }
            ListenerToDispatcherCmd::Unsubscribe(gid, request) => {
                self.on_unsubscribe(gid, request).await
            }
            ListenerToDispatcherCmd::SessionDisconnected(gid, context) => {
                self.on_session_disconnected(gid, context).await
            }
        }
    }

    /// Resolve the session of an authenticated connect request.
    ///
    /// When another connection is live for the same client id, it is
    /// kicked first and the request parks until that connection reports
    /// its final state, so a takeover never loses inflight entries.
    async fn on_check_session(
        &mut self,
        gid: SessionGid,
        request: ConnectRequest,
    ) -> Result<(), Error> {
        let old_gid = self
            .sessions
            .get(&request.client_id)
            .and_then(|record| record.gid);

        if let Some(old_gid) = old_gid {
            log::info!(
                "dispatcher: Kick session {old_gid} of {} for takeover",
                request.client_id
            );
            if let Some(record) = self.sessions.get_mut(&request.client_id) {
                record.pending_connect = Some((gid, request));
            }
            return self
                .send_to_listener(
                    old_gid.listener_id(),
                    DispatcherToListenerCmd::Kick(
                        old_gid.session_id(),
                        KickReason::SessionTakenOver,
                    ),
                )
                .await;
        }

        self.complete_connect(gid, request).await
    }

    async fn complete_connect(
        &mut self,
        gid: SessionGid,
        request: ConnectRequest,
    ) -> Result<(), Error> {
        let client_id = request.client_id.clone();
        let keep_alive = request
            .keep_alive
            .min(self.config.maximum_keep_alive());

        let resumed_state = if request.clean_session {
            // Discard any previous session state [MQTT-3.1.2-4].
            self.destroy_session(&client_id);
            None
        } else {
            self.sessions.get_mut(&client_id).map(|record| {
                let state = std::mem::take(&mut record.state);
                record.resume(gid, &request);
                state
            })
        };

        let (session_present, state) = match resumed_state {
            Some(state) => {
                self.sessions.attach(&client_id, gid);
                (true, state)
            }
            None => {
                self.sessions
                    .insert(client_id.clone(), SessionRecord::new(gid, &request));
                (false, SessionState::default())
            }
        };

        let reply = ConnectReply {
            result: Ok(()),
            session_present,
            state,
            keep_alive,
        };
        self.send_to_listener(
            gid.listener_id(),
            DispatcherToListenerCmd::CheckSessionResp(gid.session_id(), reply),
        )
        .await?;

        // Queued messages drain after the connect reply; the session
        // actor replays its restored inflight store before handling them,
        // so replays precede fresh deliveries on the wire.
        if session_present {
            let queued = self
                .sessions
                .get_mut(&client_id)
                .map(|record| std::mem::take(&mut record.offline_queue))
                .unwrap_or_default();
            for outbound in queued {
                self.send_to_listener(
                    gid.listener_id(),
                    DispatcherToListenerCmd::Publish(gid.session_id(), outbound),
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Route one authorized publish: update the retained index, then
    /// deliver to matching subscribers.
    async fn on_publish(&mut self, gid: SessionGid, message: PublishMessage) -> Result<(), Error> {
        let publisher = self.sessions.client_of(gid).map(str::to_string);

        if message.retain {
            if message.payload.is_empty() {
                // An empty retained payload removes the stored message
                // [MQTT-3.3.1-6] and is not forwarded as retained.
                self.retain.remove(&message.topic);
            } else if let Err(err) = self
                .retain
                .insert_or_update(RetainedMessage::new(message.clone()))
            {
                log::error!(
                    "dispatcher: Failed to store retained message on {}: {err:?}",
                    message.topic
                );
            }
        }

        self.route_message(publisher.as_deref(), &message).await
    }

    /// Deliver `message` to every matching subscriber.
    ///
    /// Overlapping non-shared subscriptions of one client collapse into a
    /// single delivery with the highest downgraded QoS and the union of
    /// their subscription identifiers. Each matching shared group
    /// delivers to exactly one member.
    pub(super) async fn route_message(
        &mut self,
        publisher: Option<&str>,
        message: &PublishMessage,
    ) -> Result<(), Error> {
        struct Merged {
            qos: QoS,
            retain: bool,
            subscription_ids: Vec<usize>,
        }

        let mut merged: HashMap<String, Merged> = HashMap::new();
        for (client_id, filter) in self.sub_trie.matches(&message.topic) {
            let Some(record) = self.sessions.get(&client_id) else {
                continue;
            };
            let Some(entry) = record.subscriptions.get(&filter) else {
                continue;
            };
            // Skip the publisher's own session on no-local subscriptions
            // [MQTT-3.8.3-3].
            if entry.options.no_local && publisher == Some(client_id.as_str()) {
                continue;
            }

            let qos = message.qos.min(entry.options.qos);
            let retain = entry.options.retain_as_published && message.retain;
            let slot = merged.entry(client_id).or_insert(Merged {
                qos,
                retain,
                subscription_ids: Vec::new(),
            });
            slot.qos = slot.qos.max(qos);
            slot.retain = slot.retain || retain;
            if let Some(id) = entry.subscription_id {
                slot.subscription_ids.push(id);
            }
        }

        for (client_id, slot) in merged {
            let outbound = OutboundPublish {
                message: message.clone(),
                qos: slot.qos,
                retain: slot.retain,
                subscription_ids: slot.subscription_ids,
            };
            self.deliver(&client_id, outbound).await?;
        }

        for (client_id, options) in self.shared.pick(&message.topic) {
            let outbound = OutboundPublish {
                message: message.clone(),
                qos: message.qos.min(options.qos),
                retain: options.retain_as_published && message.retain,
                subscription_ids: Vec::new(),
            };
            self.deliver(&client_id, outbound).await?;
        }

        Ok(())
    }

    /// Hand a delivery to the live connection, or queue it for an offline
    /// session which keeps messages.
    async fn deliver(&mut self, client_id: &str, outbound: OutboundPublish) -> Result<(), Error> {
        let Some(record) = self.sessions.get(client_id) else {
            return Ok(());
        };
        let gid = record.gid;
        let keeps_messages = record.keeps_messages();

        if let Some(gid) = gid {
            self.send_to_listener(
                gid.listener_id(),
                DispatcherToListenerCmd::Publish(gid.session_id(), outbound),
            )
            .await
        } else if keeps_messages && outbound.qos > QoS::AtMostOnce {
            let limit = self.config.maximum_queued_messages();
            if let Some(record) = self.sessions.get_mut(client_id) {
                record.queue_offline(outbound, limit);
            }
            Ok(())
        } else {
            Ok(())
        }
    }

    async fn on_subscribe(
        &mut self,
        gid: SessionGid,
        request: SubscribeRequest,
        allowed: Vec<bool>,
    ) -> Result<(), Error> {
        let Some(client_id) = self.sessions.client_of(gid).map(str::to_string) else {
            return Err(Error::session_error(gid.session_id()));
        };

        let maximum_qos = self.config.maximum_qos();
        let mut replies = Vec::with_capacity(request.filters.len());
        let mut retained_jobs: Vec<(String, QoS, Option<usize>)> = Vec::new();

        for (filter, allowed) in request.filters.iter().zip(allowed) {
            if !allowed {
                replies.push(SubscribeReply::NotAuthorized);
                continue;
            }

            // The granted maximum QoS may be lower than requested
            // [MQTT-3.8.4-6].
            let granted = filter.options.qos.min(maximum_qos);
            let mut options = filter.options;
            options.qos = granted;

            match SharedTopic::parse(&filter.filter) {
                Err(err) => {
                    log::error!(
                        "dispatcher: Invalid shared filter {}: {err:?}",
                        filter.filter
                    );
                    replies.push(SubscribeReply::InvalidFilter);
                }
                Ok(Some(shared)) => {
                    self.shared
                        .insert(shared.group(), shared.filter(), &client_id, options);
                    if let Some(record) = self.sessions.get_mut(&client_id) {
                        record.subscriptions.insert(
                            filter.filter.clone(),
                            SubscriptionEntry {
                                options,
                                subscription_id: request.subscription_id,
                                share_group: Some(shared.group().to_string()),
                            },
                        );
                    }
                    replies.push(SubscribeReply::Granted(granted));
                    // Shared subscriptions never receive retained
                    // messages at subscribe time.
                }
                Ok(None) => {
                    let is_new = self
                        .sessions
                        .get(&client_id)
                        .is_some_and(|record| !record.subscriptions.contains_key(&filter.filter));

                    self.sub_trie
                        .insert(&filter.filter, (client_id.clone(), filter.filter.clone()));
                    if let Some(record) = self.sessions.get_mut(&client_id) {
                        record.subscriptions.insert(
                            filter.filter.clone(),
                            SubscriptionEntry {
                                options,
                                subscription_id: request.subscription_id,
                                share_group: None,
                            },
                        );
                    }
                    replies.push(SubscribeReply::Granted(granted));

                    let send_retained = match options.retain_handling {
                        RetainHandling::SendAtSubscribe => true,
                        RetainHandling::SendAtNewSubscribe => is_new,
                        RetainHandling::DoNotSend => false,
                    };
                    if send_retained {
                        retained_jobs.push((
                            filter.filter.clone(),
                            granted,
                            request.subscription_id,
                        ));
                    }
                }
            }
        }

        // Acknowledge before retained messages flow [MQTT-3.3.1-9].
        self.send_to_listener(
            gid.listener_id(),
            DispatcherToListenerCmd::SubscribeAck(gid.session_id(), request.packet_id, replies),
        )
        .await?;

        let now = Instant::now();
        for (filter, granted, subscription_id) in retained_jobs {
            for retained in self.retain.matches(&filter) {
                if retained.is_expired(now) {
                    continue;
                }
                let mut message = retained.message.clone();
                message.message_expiry_interval = retained.remaining_expiry_interval(now);
                message.packet_id = PacketId::new(0);
                let outbound = OutboundPublish {
                    qos: message.qos.min(granted),
                    // Retained deliveries keep the retain flag set
                    // [MQTT-3.3.1-8].
                    retain: true,
                    subscription_ids: subscription_id.into_iter().collect(),
                    message,
                };
                self.send_to_listener(
                    gid.listener_id(),
                    DispatcherToListenerCmd::Publish(gid.session_id(), outbound),
                )
                .await?;
            }
        }

        Ok(())
    }

    async fn on_unsubscribe(
        &mut self,
        gid: SessionGid,
        request: UnsubscribeRequest,
    ) -> Result<(), Error> {
        let Some(client_id) = self.sessions.client_of(gid).map(str::to_string) else {
            return Err(Error::session_error(gid.session_id()));
        };

        let mut replies = Vec::with_capacity(request.filters.len());
        for filter in &request.filters {
            let entry = self
                .sessions
                .get_mut(&client_id)
                .and_then(|record| record.subscriptions.remove(filter));
            match entry {
                Some(entry) => {
                    if let Some(group) = entry.share_group {
                        if let Ok(Some(shared)) = SharedTopic::parse(filter) {
                            self.shared.remove(&group, shared.filter(), &client_id);
                        }
                    } else {
                        self.sub_trie
                            .remove(filter, &(client_id.clone(), filter.clone()));
                    }
                    replies.push(UnsubscribeReply::Success);
                }
                None => replies.push(UnsubscribeReply::NoSubscriptionExisted),
            }
        }

        self.send_to_listener(
            gid.listener_id(),
            DispatcherToListenerCmd::UnsubscribeAck(gid.session_id(), request.packet_id, replies),
        )
        .await
    }

    async fn on_session_disconnected(
        &mut self,
        gid: SessionGid,
        context: DisconnectContext,
    ) -> Result<(), Error> {
        // A session replaced by a newer connection reports its exit with
        // a gid no longer in the table; nothing to do then.
        let Some(client_id) = self.sessions.detach(gid) else {
            return Ok(());
        };
        let now = Instant::now();

        let mut immediate_will: Option<WillMessage> = None;
        let mut pending_connect = None;
        let mut destroy = false;

        if let Some(record) = self.sessions.get_mut(&client_id) {
            record.state = context.state;
            if let Some(expiry) = context.session_expiry_interval {
                record.session_expiry_interval = expiry;
            }

            if context.graceful {
                // A normal disconnect discards the Will [MQTT-3.14.4-3].
                record.will = None;
            } else if let Some(delay) = record.will.as_ref().map(|will| will.delay_interval) {
                if delay == 0 {
                    immediate_will = record.will.take();
                } else {
                    record.will_due_at = Some(now + Duration::from_secs(u64::from(delay)));
                }
            }

            pending_connect = record.pending_connect.take();

            if pending_connect.is_none() {
                if record.clean_session || record.session_expiry_interval == 0 {
                    destroy = true;
                } else {
                    record.arm_expiry(now);
                }
            }
        }

        if let Some(will) = immediate_will {
            let message = Self::will_to_message(will);
            self.publish_with_retain(&client_id, message).await?;
        }

        if let Some((new_gid, request)) = pending_connect {
            return self.complete_connect(new_gid, request).await;
        }
        if destroy {
            self.destroy_session(&client_id);
        }
        Ok(())
    }

    /// Publish a will which reached its delay deadline.
    pub(super) async fn publish_will(&mut self, client_id: &str) -> Result<(), Error> {
        let will = match self.sessions.get_mut(client_id) {
            Some(record) => {
                record.will_due_at = None;
                record.will.take()
            }
            None => None,
        };
        let Some(will) = will else {
            return Ok(());
        };

        log::info!("dispatcher: Publish will of {client_id}");
        let message = Self::will_to_message(will);
        self.publish_with_retain(client_id, message).await
    }

    fn will_to_message(will: WillMessage) -> PublishMessage {
        PublishMessage {
            topic: will.topic,
            qos: will.qos,
            retain: will.retain,
            payload: will.payload,
            message_expiry_interval: will.message_expiry_interval,
            properties: will.properties,
            packet_id: PacketId::new(0),
        }
    }

    async fn publish_with_retain(
        &mut self,
        publisher: &str,
        message: PublishMessage,
    ) -> Result<(), Error> {
        if message.retain {
            if message.payload.is_empty() {
                self.retain.remove(&message.topic);
            } else if let Err(err) = self
                .retain
                .insert_or_update(RetainedMessage::new(message.clone()))
            {
                log::error!(
                    "dispatcher: Failed to store retained will on {}: {err:?}",
                    message.topic
                );
            }
        }
        self.route_message(Some(publisher), &message).await
    }
}
