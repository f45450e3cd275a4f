// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! The auth app answers authentication requests from the listeners.

use std::collections::HashMap;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::commands::{AuthToListenerCmd, ListenerToAuthCmd};
use crate::error::Error;
use crate::security::Security;
use crate::types::{ListenerId, SessionId};

#[derive(Debug)]
pub struct AuthApp {
    security: Security,

    listener_senders: HashMap<ListenerId, Sender<AuthToListenerCmd>>,
    listener_receiver: Receiver<ListenerToAuthCmd>,
}

impl AuthApp {
    #[must_use]
    pub fn new(
        security: Security,
        listener_senders: Vec<(ListenerId, Sender<AuthToListenerCmd>)>,
        listener_receiver: Receiver<ListenerToAuthCmd>,
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
                    log::error!("auth: Failed to handle listener cmd: {err:?}");
                }
            }
        }
    }

    async fn handle_listener_cmd(&mut self, cmd: ListenerToAuthCmd) -> Result<(), Error> {
        match cmd {
            ListenerToAuthCmd::RequestAuth(listener_id, session_id, username, password) => {
                self.on_request_auth(listener_id, session_id, &username, &password)
                    .await
            }
        }
    }

    async fn on_request_auth(
        &mut self,
        listener_id: ListenerId,
        session_id: SessionId,
        username: &str,
        password: &[u8],
    ) -> Result<(), Error> {
        let identity = match self.security.login(username, password) {
            Some(identity) => Some(identity),
            None if username.is_empty() => {
                // Connections without credentials fall back to the
                // configured unauthenticated user.
                self.security
                    .login_unauthenticated()
                    .map(str::to_string)
            }
            None => None,
        };

        if identity.is_none() {
            log::warn!("auth: Check auth failed for username: {username}");
        }

        if let Some(sender) = self.listener_senders.get(&listener_id) {
            sender
                .send(AuthToListenerCmd::ResponseAuth(session_id, identity))
                .await?;
            Ok(())
        } else {
            Err(Error::from_string(
                crate::error::ErrorKind::ChannelError,
                format!("auth: Failed to find listener with id: {listener_id}"),
            ))
        }
    }
}
