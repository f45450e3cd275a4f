// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use tokio::sync::mpsc;

use super::{Listener, CHANNEL_CAPACITY};
use crate::commands::ListenerToSessionCmd;
use crate::session::Session;
use crate::stream::Stream;
use crate::types::SessionId;

impl Listener {
    pub async fn run_loop(mut self) {
        let Some(mut session_receiver) = self.session_receiver.take() else {
            log::error!("listener: session receiver already taken");
            return;
        };
        let Some(mut dispatcher_receiver) = self.dispatcher_receiver.take() else {
            log::error!("listener: dispatcher receiver already taken");
            return;
        };
        let Some(mut auth_receiver) = self.auth_receiver.take() else {
            log::error!("listener: auth receiver already taken");
            return;
        };
        let Some(mut acl_receiver) = self.acl_receiver.take() else {
            log::error!("listener: acl receiver already taken");
            return;
        };

        loop {
            tokio::select! {
                ret = self.accept() => {
                    match ret {
                        Ok(stream) => self.new_connection(stream),
                        Err(err) => log::error!("listener: Failed to accept connection: {err:?}"),
                    }
                }
                Some(cmd) = session_receiver.recv() => {
                    if let Err(err) = self.handle_session_cmd(cmd).await {
                        log::error!("listener: Failed to handle session cmd: {err:?}");
                    }
                }
                Some(cmd) = dispatcher_receiver.recv() => {
                    if let Err(err) = self.handle_dispatcher_cmd(cmd).await {
                        log::error!("listener: Failed to handle dispatcher cmd: {err:?}");
                    }
                }
                Some(cmd) = auth_receiver.recv() => {
                    if let Err(err) = self.handle_auth_cmd(cmd).await {
                        log::error!("listener: Failed to handle auth cmd: {err:?}");
                    }
                }
                Some(cmd) = acl_receiver.recv() => {
                    if let Err(err) = self.handle_acl_cmd(cmd).await {
                        log::error!("listener: Failed to handle acl cmd: {err:?}");
                    }
                }
            }
        }
    }

    /// Spawn a session actor owning the new connection.
    fn new_connection(&mut self, stream: Stream) {
        let session_id = self.next_session_id();
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let session = Session::new(
            session_id,
            self.session_config.clone(),
            stream,
            self.session_sender.clone(),
            receiver,
        );
        self.session_senders.insert(session_id, sender);
        log::info!(
            "listener: New connection with session id: {}:{session_id}",
            self.id
        );
        tokio::spawn(session.run_loop());
    }

    fn next_session_id(&mut self) -> SessionId {
        self.next_session_id += 1;
        self.next_session_id
    }

    pub(super) async fn send_to_session(
        &mut self,
        session_id: SessionId,
        cmd: ListenerToSessionCmd,
    ) -> Result<(), crate::Error> {
        if let Some(sender) = self.session_senders.get(&session_id) {
            sender.send(cmd).await?;
            Ok(())
        } else {
            Err(crate::Error::session_error(session_id))
        }
    }
}
