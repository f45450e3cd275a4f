// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Handler for dispatcher commands, relayed to the session actors.

use super::Listener;
use crate::commands::{DispatcherToListenerCmd, ListenerToSessionCmd};
use crate::error::Error;

impl Listener {
    pub(super) async fn handle_dispatcher_cmd(
        &mut self,
        cmd: DispatcherToListenerCmd,
    ) -> Result<(), Error> {
        match cmd {
            DispatcherToListenerCmd::CheckSessionResp(session_id, reply) => {
                self.send_to_session(session_id, ListenerToSessionCmd::ConnectAck(reply))
                    .await
            }
            DispatcherToListenerCmd::Publish(session_id, outbound) => {
                self.send_to_session(session_id, ListenerToSessionCmd::Publish(outbound))
                    .await
            }
            DispatcherToListenerCmd::SubscribeAck(session_id, packet_id, replies) => {
                self.send_to_session(
                    session_id,
                    ListenerToSessionCmd::SubscribeAck(packet_id, replies),
                )
                .await
            }
            DispatcherToListenerCmd::UnsubscribeAck(session_id, packet_id, replies) => {
                self.send_to_session(
                    session_id,
                    ListenerToSessionCmd::UnsubscribeAck(packet_id, replies),
                )
                .await
            }
            DispatcherToListenerCmd::Kick(session_id, reason) => {
                self.send_to_session(session_id, ListenerToSessionCmd::Kick(reason))
                    .await
            }
        }
    }
}
