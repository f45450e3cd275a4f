// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Handlers for commands from session actors.

use super::Listener;
use crate::commands::{
    ListenerToAclCmd, ListenerToAuthCmd, ListenerToDispatcherCmd, SessionToListenerCmd,
};
use crate::error::Error;
use crate::types::{
    ConnectRequest, DisconnectContext, PublishMessage, SessionGid, SessionId, SubscribeRequest,
    UnsubscribeRequest,
};

impl Listener {
    pub(super) async fn handle_session_cmd(
        &mut self,
        cmd: SessionToListenerCmd,
    ) -> Result<(), Error> {
        match cmd {
            SessionToListenerCmd::Connect(session_id, request) => {
                self.on_session_connect(session_id, request).await
            }
            SessionToListenerCmd::Publish(session_id, message) => {
                self.on_session_publish(session_id, message).await
            }
            SessionToListenerCmd::Subscribe(session_id, request) => {
                self.on_session_subscribe(session_id, request).await
            }
            SessionToListenerCmd::Unsubscribe(session_id, request) => {
                self.on_session_unsubscribe(session_id, request).await
            }
            SessionToListenerCmd::Disconnect(session_id, context) => {
                self.on_session_disconnect(session_id, context).await
            }
        }
    }

    async fn on_session_connect(
        &mut self,
        session_id: SessionId,
        request: ConnectRequest,
    ) -> Result<(), Error> {
        let username = request.username.clone();
        let password = request.password.clone();
        self.pending_connects.insert(session_id, request);
        self.auth_sender
            .send(ListenerToAuthCmd::RequestAuth(
                self.id, session_id, username, password,
            ))
            .await?;
        Ok(())
    }

    async fn on_session_publish(
        &mut self,
        session_id: SessionId,
        message: PublishMessage,
    ) -> Result<(), Error> {
        let Some(identity) = self.identities.get(&session_id).cloned() else {
            log::warn!("listener: Publish from unauthenticated session {session_id}");
            return Ok(());
        };
        self.acl_sender
            .send(ListenerToAclCmd::Publish(
                SessionGid::new(self.id, session_id),
                identity,
                message,
            ))
            .await?;
        Ok(())
    }

    async fn on_session_subscribe(
        &mut self,
        session_id: SessionId,
        request: SubscribeRequest,
    ) -> Result<(), Error> {
        let Some(identity) = self.identities.get(&session_id).cloned() else {
            log::warn!("listener: Subscribe from unauthenticated session {session_id}");
            return Ok(());
        };
        self.acl_sender
            .send(ListenerToAclCmd::Subscribe(
                SessionGid::new(self.id, session_id),
                identity,
                request,
            ))
            .await?;
        Ok(())
    }

    async fn on_session_unsubscribe(
        &mut self,
        session_id: SessionId,
        request: UnsubscribeRequest,
    ) -> Result<(), Error> {
        self.dispatcher_sender
            .send(ListenerToDispatcherCmd::Unsubscribe(
                SessionGid::new(self.id, session_id),
                request,
            ))
            .await?;
        Ok(())
    }

    async fn on_session_disconnect(
        &mut self,
        session_id: SessionId,
        context: DisconnectContext,
    ) -> Result<(), Error> {
        log::info!("listener: Session {}:{session_id} disconnected", self.id);
        self.session_senders.remove(&session_id);
        self.pending_connects.remove(&session_id);
        self.identities.remove(&session_id);

        self.dispatcher_sender
            .send(ListenerToDispatcherCmd::SessionDisconnected(
                SessionGid::new(self.id, session_id),
                context,
            ))
            .await?;
        Ok(())
    }
}
