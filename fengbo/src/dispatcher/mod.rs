// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! The dispatcher app routes messages between sessions.
//!
//! It owns the broker-wide shared state: the subscription trie, the
//! retained message index, the shared subscription groups and the session
//! table. Listeners talk to it over channels; it never touches a session's
//! connection state directly.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{Receiver, Sender};

use crate::commands::{DispatcherToListenerCmd, ListenerToDispatcherCmd};
use crate::config::General;
use crate::error::Error;
use crate::types::ListenerId;

mod listener;
mod retain;
mod sessions;
mod shared;
mod sub_trie;

pub use retain::{RetainError, RetainTrie, RetainedMessage};
pub use sessions::{SessionRecord, SessionTable, SubscriptionEntry};
pub use shared::SharedGroups;
pub use sub_trie::SubTrie;

/// Seconds between two timer sweeps over retained messages, wills and
/// session expiry deadlines.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Dispatcher is the message router of the broker.
#[derive(Debug)]
pub struct Dispatcher {
    config: General,

    /// `(client id, filter)` pairs indexed by filter.
    sub_trie: SubTrie<(String, String)>,

    retain: RetainTrie,

    shared: SharedGroups,

    sessions: SessionTable,

    listener_senders: HashMap<ListenerId, Sender<DispatcherToListenerCmd>>,
    listener_receiver: Receiver<ListenerToDispatcherCmd>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        config: General,
        listener_senders: Vec<(ListenerId, Sender<DispatcherToListenerCmd>)>,
        listener_receiver: Receiver<ListenerToDispatcherCmd>,
    ) -> Self {
        Self {
            config,
            sub_trie: SubTrie::new(),
            retain: RetainTrie::new(),
            shared: SharedGroups::new(),
            sessions: SessionTable::new(),
            listener_senders: listener_senders.into_iter().collect(),
            listener_receiver,
        }
    }

    pub async fn run_loop(&mut self) -> ! {
        let mut timer = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                Some(cmd) = self.listener_receiver.recv() => {
                    if let Err(err) = self.handle_listener_cmd(cmd).await {
                        log::error!("dispatcher: Failed to handle listener cmd: {err:?}");
                    }
                },
                _ = timer.tick() => {
                    self.handle_tick(Instant::now()).await;
                },
            }
        }
    }

    pub(super) async fn send_to_listener(
        &mut self,
        listener_id: ListenerId,
        cmd: DispatcherToListenerCmd,
    ) -> Result<(), Error> {
        if let Some(sender) = self.listener_senders.get(&listener_id) {
            sender.send(cmd).await?;
            Ok(())
        } else {
            Err(Error::from_string(
                crate::error::ErrorKind::ChannelError,
                format!("dispatcher: Failed to find listener with id: {listener_id}"),
            ))
        }
    }

    /// Periodic sweep: expired retained messages, due wills and expired
    /// offline sessions.
    async fn handle_tick(&mut self, now: Instant) {
        let purged = self.retain.purge_expired(now);
        if purged > 0 {
            log::debug!("dispatcher: Purged {purged} expired retained messages");
        }

        for client_id in self.sessions.due_wills(now) {
            if let Err(err) = self.publish_will(&client_id).await {
                log::error!("dispatcher: Failed to publish will of {client_id}: {err:?}");
            }
        }

        for client_id in self.sessions.expired_clients(now) {
            log::info!("dispatcher: Session of {client_id} expired");
            self.destroy_session(&client_id);
        }
    }

    /// Drop the whole session record with its subscriptions.
    pub(super) fn destroy_session(&mut self, client_id: &str) {
        if let Some(record) = self.sessions.remove(client_id) {
            for (filter, entry) in &record.subscriptions {
                if let Some(group) = &entry.share_group {
                    if let Ok(Some(shared)) = codec::SharedTopic::parse(filter) {
                        self.shared.remove(group, shared.filter(), client_id);
                    }
                } else {
                    self.sub_trie
                        .remove(filter, &(client_id.to_string(), filter.clone()));
                }
            }
        }
    }
}
