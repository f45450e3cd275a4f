// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Handler for acl app responses.

use super::Listener;
use crate::commands::{AclToListenerCmd, ListenerToDispatcherCmd, ListenerToSessionCmd};
use crate::error::Error;
use crate::types::{PublishMessage, SessionGid, SessionId, SubscribeRequest};

impl Listener {
    pub(super) async fn handle_acl_cmd(&mut self, cmd: AclToListenerCmd) -> Result<(), Error> {
        match cmd {
            AclToListenerCmd::PublishResult(session_id, message, accepted) => {
                self.on_publish_result(session_id, message, accepted).await
            }
            AclToListenerCmd::SubscribeResult(session_id, request, allowed) => {
                self.on_subscribe_result(session_id, request, allowed).await
            }
        }
    }

    async fn on_publish_result(
        &mut self,
        session_id: SessionId,
        message: PublishMessage,
        accepted: bool,
    ) -> Result<(), Error> {
        // The acknowledgement goes back to the publisher either way; the
        // message is only routed when the rule set allows it.
        self.send_to_session(
            session_id,
            ListenerToSessionCmd::PublishAck(message.packet_id, message.qos, accepted),
        )
        .await?;

        if accepted {
            self.dispatcher_sender
                .send(ListenerToDispatcherCmd::Publish(
                    SessionGid::new(self.id, session_id),
                    message,
                ))
                .await?;
        } else {
            log::warn!(
                "listener: Publish to {} denied for session {session_id}",
                message.topic
            );
        }
        Ok(())
    }

    async fn on_subscribe_result(
        &mut self,
        session_id: SessionId,
        request: SubscribeRequest,
        allowed: Vec<bool>,
    ) -> Result<(), Error> {
        self.dispatcher_sender
            .send(ListenerToDispatcherCmd::Subscribe(
                SessionGid::new(self.id, session_id),
                request,
                allowed,
            ))
            .await?;
        Ok(())
    }
}
