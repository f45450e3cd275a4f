// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Handler for auth app responses.

use super::Listener;
use crate::commands::{AuthToListenerCmd, ListenerToDispatcherCmd, ListenerToSessionCmd};
use crate::error::Error;
use crate::types::{ConnectError, ConnectReply, SessionGid, SessionId, SessionState};

impl Listener {
    pub(super) async fn handle_auth_cmd(&mut self, cmd: AuthToListenerCmd) -> Result<(), Error> {
        match cmd {
            AuthToListenerCmd::ResponseAuth(session_id, identity) => {
                self.on_auth_response(session_id, identity).await
            }
        }
    }

    async fn on_auth_response(
        &mut self,
        session_id: SessionId,
        identity: Option<String>,
    ) -> Result<(), Error> {
        let Some(request) = self.pending_connects.remove(&session_id) else {
            log::warn!("listener: Auth response for unknown session {session_id}");
            return Ok(());
        };

        match identity {
            Some(identity) => {
                self.identities.insert(session_id, identity);
                self.dispatcher_sender
                    .send(ListenerToDispatcherCmd::CheckSession(
                        SessionGid::new(self.id, session_id),
                        request,
                    ))
                    .await?;
                Ok(())
            }
            None => {
                log::warn!(
                    "listener: Authentication failed for client {} on session {session_id}",
                    request.client_id
                );
                let reply = ConnectReply {
                    result: Err(ConnectError::NotAuthorized),
                    session_present: false,
                    state: SessionState::default(),
                    keep_alive: request.keep_alive,
                };
                self.send_to_session(session_id, ListenerToSessionCmd::ConnectAck(reply))
                    .await
            }
        }
    }
}
