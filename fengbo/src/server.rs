// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Wires the apps together and runs the broker.

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::acl::AclApp;
use crate::auth::AuthApp;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, ErrorKind};
use crate::listener::Listener;
use crate::security::Security;
use crate::types::ListenerId;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct Server {
    config: Config,
}

impl Server {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Bind all listeners and run the broker apps until the process is
    /// stopped.
    ///
    /// # Errors
    ///
    /// Returns error if a listener fails to bind or the security file is
    /// invalid.
    pub async fn run(self) -> Result<(), Error> {
        let security = match self.config.security().security_file() {
            Some(path) => {
                log::info!("server: Loading security file {path:?}");
                Security::load_file(path)?
            }
            None => {
                log::warn!("server: No security file configured, allowing anonymous access");
                Security::default_config()
            }
        };

        let (listener_to_dispatcher_sender, listener_to_dispatcher_receiver) =
            mpsc::channel(CHANNEL_CAPACITY);
        let (listener_to_auth_sender, listener_to_auth_receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let (listener_to_acl_sender, listener_to_acl_receiver) = mpsc::channel(CHANNEL_CAPACITY);

        let mut dispatcher_to_listener_senders = Vec::new();
        let mut auth_to_listener_senders = Vec::new();
        let mut acl_to_listener_senders = Vec::new();
        let mut listeners = Vec::new();

        for (index, listener_config) in self.config.listeners().iter().enumerate() {
            let listener_id = ListenerId::try_from(index).map_err(|_| {
                Error::new(ErrorKind::ConfigError, "Too many listeners configured")
            })?;

            let (dispatcher_sender, dispatcher_receiver) = mpsc::channel(CHANNEL_CAPACITY);
            dispatcher_to_listener_senders.push((listener_id, dispatcher_sender));

            let (auth_sender, auth_receiver) = mpsc::channel(CHANNEL_CAPACITY);
            auth_to_listener_senders.push((listener_id, auth_sender));

            let (acl_sender, acl_receiver) = mpsc::channel(CHANNEL_CAPACITY);
            acl_to_listener_senders.push((listener_id, acl_sender));

            let listener = Listener::bind(
                listener_id,
                listener_config.clone(),
                self.config.general(),
                listener_to_dispatcher_sender.clone(),
                dispatcher_receiver,
                listener_to_auth_sender.clone(),
                auth_receiver,
                listener_to_acl_sender.clone(),
                acl_receiver,
            )
            .await?;
            listeners.push(listener);
        }

        let mut dispatcher = Dispatcher::new(
            self.config.general().clone(),
            dispatcher_to_listener_senders,
            listener_to_dispatcher_receiver,
        );
        let mut auth_app = AuthApp::new(
            security.clone(),
            auth_to_listener_senders,
            listener_to_auth_receiver,
        );
        let mut acl_app = AclApp::new(
            security,
            acl_to_listener_senders,
            listener_to_acl_receiver,
        );

        let mut tasks: JoinSet<()> = JoinSet::new();
        tasks.spawn(async move {
            dispatcher.run_loop().await;
        });
        tasks.spawn(async move {
            auth_app.run_loop().await;
        });
        tasks.spawn(async move {
            acl_app.run_loop().await;
        });
        for listener in listeners {
            tasks.spawn(listener.run_loop());
        }

        while let Some(ret) = tasks.join_next().await {
            if let Err(err) = ret {
                log::error!("server: App task failed: {err:?}");
            }
        }
        Err(Error::new(
            ErrorKind::SocketError,
            "server: All app tasks exited",
        ))
    }
}
