// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Bind listeners and accept new connections.

use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use super::{Acceptor, Listener, CHANNEL_CAPACITY};
use crate::commands::{
    AclToListenerCmd, AuthToListenerCmd, DispatcherToListenerCmd, ListenerToAclCmd,
    ListenerToAuthCmd, ListenerToDispatcherCmd,
};
use crate::config;
use crate::error::{Error, ErrorKind};
use crate::session::SessionConfig;
use crate::socket::new_tcp_listener;
use crate::stream::{Stream, Transport};
use crate::types::ListenerId;

impl Listener {
    fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
        let mut reader = BufReader::new(File::open(path)?);
        rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                Error::from_string(
                    ErrorKind::CertError,
                    format!("Failed to load cert file at {path:?}, got: {err:?}"),
                )
            })
    }

    fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, Error> {
        let mut reader = BufReader::new(File::open(path)?);
        rustls_pemfile::private_key(&mut reader)
            .map_err(|err| {
                Error::from_string(
                    ErrorKind::CertError,
                    format!("Failed to load key file at {path:?}, got: {err:?}"),
                )
            })?
            .ok_or_else(|| {
                Error::from_string(
                    ErrorKind::CertError,
                    format!("No private key found in {path:?}"),
                )
            })
    }

    fn tls_acceptor(listener_config: &config::Listener) -> Result<TlsAcceptor, Error> {
        let cert_file = listener_config
            .cert_file()
            .ok_or_else(|| Error::new(ErrorKind::CertError, "cert_file is required"))?;
        let key_file = listener_config
            .key_file()
            .ok_or_else(|| Error::new(ErrorKind::CertError, "key_file is required"))?;

        let certs = Self::load_certs(cert_file)?;
        let key = Self::load_key(key_file)?;
        let tls_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|err| {
                Error::from_string(
                    ErrorKind::CertError,
                    format!("Failed to init tls ServerConfig, got {err:?}"),
                )
            })?;
        Ok(TlsAcceptor::from(Arc::new(tls_config)))
    }

    /// Bind one listener per its config entry.
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound or TLS files are
    /// invalid.
    #[allow(clippy::too_many_arguments)]
    pub async fn bind(
        id: ListenerId,
        listener_config: config::Listener,
        general: &config::General,
        // dispatcher
        dispatcher_sender: Sender<ListenerToDispatcherCmd>,
        dispatcher_receiver: Receiver<DispatcherToListenerCmd>,
        // auth
        auth_sender: Sender<ListenerToAuthCmd>,
        auth_receiver: Receiver<AuthToListenerCmd>,
        // acl
        acl_sender: Sender<ListenerToAclCmd>,
        acl_receiver: Receiver<AclToListenerCmd>,
    ) -> Result<Self, Error> {
        let address = listener_config.address();
        let acceptor = match listener_config.protocol() {
            config::Protocol::Mqtt => {
                log::info!("bind mqtt://{address}");
                Acceptor::Mqtt(new_tcp_listener(address).await?)
            }
            config::Protocol::Mqtts => {
                log::info!("bind mqtts://{address}");
                let tls_acceptor = Self::tls_acceptor(&listener_config)?;
                Acceptor::Mqtts(new_tcp_listener(address).await?, tls_acceptor)
            }
            config::Protocol::Ws => {
                log::info!("bind ws://{address}");
                Acceptor::Ws(new_tcp_listener(address).await?)
            }
            config::Protocol::Wss => {
                log::info!("bind wss://{address}");
                let tls_acceptor = Self::tls_acceptor(&listener_config)?;
                Acceptor::Wss(new_tcp_listener(address).await?, tls_acceptor)
            }
        };

        let (session_sender, session_receiver) = mpsc::channel(CHANNEL_CAPACITY);
        Ok(Self {
            id,
            acceptor,
            config: listener_config,
            session_config: SessionConfig::from(general),

            next_session_id: 0,
            session_senders: HashMap::new(),
            pending_connects: HashMap::new(),
            identities: HashMap::new(),

            session_sender,
            session_receiver: Some(session_receiver),

            dispatcher_sender,
            dispatcher_receiver: Some(dispatcher_receiver),

            auth_sender,
            auth_receiver: Some(auth_receiver),

            acl_sender,
            acl_receiver: Some(acl_receiver),
        })
    }

    pub(super) async fn accept(&mut self) -> Result<Stream, Error> {
        use tokio_tungstenite::tungstenite::handshake::server as ws_server;
        let listener_path = self.config.path().map(str::to_string);
        let check_ws_path = move |request: &ws_server::Request,
                                  response: ws_server::Response|
              -> Result<ws_server::Response, ws_server::ErrorResponse> {
            let path = request.uri().path();
            match &listener_path {
                None => Ok(response),
                Some(expected) if path == expected => Ok(response),
                Some(_) => {
                    let builder = http::Response::builder().status(http::StatusCode::NOT_FOUND);
                    match builder.body(None) {
                        Ok(resp) => Err(resp),
                        Err(err) => {
                            log::error!("listener: Failed to build 404 response: {err:?}");
                            Err(ws_server::ErrorResponse::new(None))
                        }
                    }
                }
            }
        };

        match &mut self.acceptor {
            Acceptor::Mqtt(tcp_listener) => {
                let (tcp_stream, _address) = tcp_listener.accept().await?;
                Ok(Stream::new(Transport::Mqtt(tcp_stream)))
            }
            Acceptor::Mqtts(tcp_listener, tls_acceptor) => {
                let (tcp_stream, _address) = tcp_listener.accept().await?;
                let tls_stream = tls_acceptor.accept(tcp_stream).await?;
                Ok(Stream::new(Transport::Mqtts(Box::new(tls_stream))))
            }
            Acceptor::Ws(tcp_listener) => {
                let (tcp_stream, _address) = tcp_listener.accept().await?;
                let ws_stream = if self.config.path().is_none() {
                    tokio_tungstenite::accept_async(tcp_stream).await?
                } else {
                    tokio_tungstenite::accept_hdr_async(tcp_stream, check_ws_path).await?
                };
                Ok(Stream::new(Transport::Ws(Box::new(ws_stream))))
            }
            Acceptor::Wss(tcp_listener, tls_acceptor) => {
                let (tcp_stream, _address) = tcp_listener.accept().await?;
                let tls_stream = tls_acceptor.accept(tcp_stream).await?;
                let wss_stream = if self.config.path().is_none() {
                    tokio_tungstenite::accept_async(tls_stream).await?
                } else {
                    tokio_tungstenite::accept_hdr_async(tls_stream, check_ws_path).await?
                };
                Ok(Stream::new(Transport::Wss(Box::new(wss_stream))))
            }
        }
    }
}
