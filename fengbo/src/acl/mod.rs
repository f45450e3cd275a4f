// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! The acl app authorizes publish and subscribe operations against the
//! security rule set.

use std::collections::HashMap;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::commands::{AclToListenerCmd, ListenerToAclCmd};
use crate::error::Error;
use crate::security::Security;
use crate::types::{ListenerId, PublishMessage, SessionGid, SubscribeRequest};

#[derive(Debug)]
pub struct AclApp {
    security: Security,

    listener_senders: HashMap<ListenerId, Sender<AclToListenerCmd>>,
    listener_receiver: Receiver<ListenerToAclCmd>,
}

impl AclApp {
    #[must_use]
    pub fn new(
        security: Security,
        listener_senders: Vec<(ListenerId, Sender<AclToListenerCmd>)>,
        listener_receiver: Receiver<ListenerToAclCmd>,
    ) -> Self {
        Self {
            security,
            listener_senders: listener_senders.into_iter().collect(),
            listener_receiver,
        }
    }

    pub async fn run_loop(&mut self) -> ! {
        loop {
            if let Some(cmd) = self.listener_receiver.recv().await {
                if let Err(err) = self.handle_listener_cmd(cmd).await {
                    log::error!("acl: Failed to handle listener cmd: {err:?}");
                }
            }
        }
    }

    async fn handle_listener_cmd(&mut self, cmd: ListenerToAclCmd) -> Result<(), Error> {
        match cmd {
            ListenerToAclCmd::Publish(gid, identity, message) => {
                self.on_check_publish(gid, &identity, message).await
            }
            ListenerToAclCmd::Subscribe(gid, identity, request) => {
                self.on_check_subscribe(gid, &identity, request).await
            }
        }
    }

    async fn on_check_publish(
        &mut self,
        gid: SessionGid,
        identity: &str,
        message: PublishMessage,
    ) -> Result<(), Error> {
        let accepted = self.security.allow_publish(identity, &message.topic);
        self.send_to_listener(
            gid,
            AclToListenerCmd::PublishResult(gid.session_id(), message, accepted),
        )
        .await
    }

    async fn on_check_subscribe(
        &mut self,
        gid: SessionGid,
        identity: &str,
        request: SubscribeRequest,
    ) -> Result<(), Error> {
        let allowed = request
            .filters
            .iter()
            .map(|filter| {
                // Shared subscriptions are authorized against their inner
                // filter.
                let checked = match codec::SharedTopic::parse(&filter.filter) {
                    Ok(Some(shared)) => shared.filter().to_string(),
                    Ok(None) => filter.filter.clone(),
                    Err(_) => return false,
                };
                self.security.allow_subscribe(identity, &checked)
            })
            .collect();

        self.send_to_listener(
            gid,
            AclToListenerCmd::SubscribeResult(gid.session_id(), request, allowed),
        )
        .await
    }

    async fn send_to_listener(
        &mut self,
        gid: SessionGid,
        cmd: AclToListenerCmd,
    ) -> Result<(), Error> {
        if let Some(sender) = self.listener_senders.get(&gid.listener_id()) {
            sender.send(cmd).await?;
            Ok(())
        } else {
            Err(Error::from_string(
                crate::error::ErrorKind::ChannelError,
                format!("acl: Failed to find listener with id: {}", gid.listener_id()),
            ))
        }
    }
}
