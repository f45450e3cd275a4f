// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! The listener app accepts connections on one transport binding and
//! spawns a session actor per connection.

use std::collections::HashMap;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio_rustls::TlsAcceptor;

use crate::commands::{
    AclToListenerCmd, AuthToListenerCmd, DispatcherToListenerCmd, ListenerToAclCmd,
    ListenerToAuthCmd, ListenerToDispatcherCmd, ListenerToSessionCmd, SessionToListenerCmd,
};
use crate::config;
use crate::session::SessionConfig;
use crate::types::{ConnectRequest, ListenerId, SessionId};

mod acl;
mod auth;
mod dispatcher;
mod init;
mod run;
mod session;

pub(crate) const CHANNEL_CAPACITY: usize = 16;

/// Accepted transport of this listener.
pub(crate) enum Acceptor {
    Mqtt(TcpListener),
    Mqtts(TcpListener, TlsAcceptor),
    Ws(TcpListener),
    Wss(TcpListener, TlsAcceptor),
}

impl std::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mqtt(listener) => f.debug_tuple("Mqtt").field(listener).finish(),
            Self::Mqtts(listener, _) => f.debug_tuple("Mqtts").field(listener).field(&"..").finish(),
            Self::Ws(listener) => f.debug_tuple("Ws").field(listener).finish(),
            Self::Wss(listener, _) => f.debug_tuple("Wss").field(listener).field(&"..").finish(),
        }
    }
}

#[derive(Debug)]
pub struct Listener {
    id: ListenerId,
    acceptor: Acceptor,
    config: config::Listener,
    session_config: SessionConfig,

    next_session_id: SessionId,
    session_senders: HashMap<SessionId, Sender<ListenerToSessionCmd>>,

    /// Connect requests parked while the auth app answers.
    pending_connects: HashMap<SessionId, ConnectRequest>,

    /// Authenticated identity per live session, for authorization checks.
    identities: HashMap<SessionId, String>,

    session_sender: Sender<SessionToListenerCmd>,
    session_receiver: Option<Receiver<SessionToListenerCmd>>,

    dispatcher_sender: Sender<ListenerToDispatcherCmd>,
    dispatcher_receiver: Option<Receiver<DispatcherToListenerCmd>>,

    auth_sender: Sender<ListenerToAuthCmd>,
    auth_receiver: Option<Receiver<AuthToListenerCmd>>,

    acl_sender: Sender<ListenerToAclCmd>,
    acl_receiver: Option<Receiver<AclToListenerCmd>>,
}
