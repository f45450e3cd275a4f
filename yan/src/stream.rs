// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use futures_util::{SinkExt, StreamExt};
use rustls_pki_types::ServerName;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::connect_options::ConnectType;
use crate::error::{Error, ErrorKind};

/// Underlying socket of the connection to the broker.
#[derive(Debug)]
enum Transport {
    None,
    Mqtt(TcpStream),
    Mqtts(Box<TlsStream<TcpStream>>),
    Ws(Box<WebSocketStream<MaybeTlsStream<TcpStream>>>),
}

/// Client side of a duplex connection, framing complete control packets.
///
/// Received bytes accumulate in `pending` before a packet is cut, so a
/// read cancelled by the select loop never loses data.
#[derive(Debug)]
pub struct Stream {
    transport: Transport,
    pending: Vec<u8>,
}

impl Default for Stream {
    fn default() -> Self {
        Self::none()
    }
}

/// Check whether `pending` starts with a complete control packet.
fn complete_packet_len(pending: &[u8]) -> Result<Option<usize>, Error> {
    if pending.is_empty() {
        return Ok(None);
    }

    let mut remaining_length: usize = 0;
    let mut multiplier: usize = 1;
    let mut header_len = 1;
    loop {
        if header_len > 4 {
            return Err(Error::new(
                ErrorKind::DecodeError,
                "Invalid remaining length in fixed header",
            ));
        }
        let Some(byte) = pending.get(header_len) else {
            return Ok(None);
        };
        remaining_length += (*byte as usize & 0x7f) * multiplier;
        multiplier *= 128;
        header_len += 1;
        if byte & 0x80 == 0 {
            break;
        }
    }

    let total = header_len + remaining_length;
    if pending.len() < total {
        Ok(None)
    } else {
        Ok(Some(total))
    }
}

impl Stream {
    /// A stream without a connection; reads and writes fail until
    /// `connect` replaces it.
    #[must_use]
    pub fn none() -> Self {
        Self {
            transport: Transport::None,
            pending: Vec::new(),
        }
    }

    /// Open a connection per `connect_type`.
    ///
    /// # Errors
    ///
    /// Returns error if the socket, TLS handshake or websocket upgrade
    /// fails.
    pub async fn connect(connect_type: &ConnectType) -> Result<Self, Error> {
        let transport = match connect_type {
            ConnectType::Mqtt(address) => {
                let tcp_stream = TcpStream::connect(address).await?;
                Transport::Mqtt(tcp_stream)
            }
            ConnectType::Mqtts { address, domain } => {
                let mut root_store = RootCertStore::empty();
                root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                let tls_config = ClientConfig::builder()
                    .with_root_certificates(root_store)
                    .with_no_client_auth();
                let connector = TlsConnector::from(Arc::new(tls_config));

                let server_name = ServerName::try_from(domain.clone()).map_err(|err| {
                    Error::from_string(
                        ErrorKind::ConfigError,
                        format!("Invalid domain name {domain}: {err:?}"),
                    )
                })?;
                let tcp_stream = TcpStream::connect(address).await?;
                let tls_stream = connector.connect(server_name, tcp_stream).await?;
                Transport::Mqtts(Box::new(tls_stream))
            }
            ConnectType::Ws(url) | ConnectType::Wss(url) => {
                let (ws_stream, _response) =
                    tokio_tungstenite::connect_async(url.as_str()).await?;
                Transport::Ws(Box::new(ws_stream))
            }
        };
        Ok(Self {
            transport,
            pending: Vec::with_capacity(1024),
        })
    }

    /// Read one complete packet into `buf`. Returns 0 on a closed stream.
    ///
    /// # Errors
    ///
    /// Returns error if the socket fails or the fixed header is
    /// malformed.
    pub async fn read_packet(&mut self, buf: &mut Vec<u8>) -> Result<usize, Error> {
        loop {
            if let Some(total) = complete_packet_len(&self.pending)? {
                buf.extend_from_slice(&self.pending[..total]);
                self.pending.drain(..total);
                return Ok(total);
            }

            let n_recv = match &mut self.transport {
                Transport::None => {
                    return Err(Error::new(ErrorKind::SocketError, "Stream is not connected"));
                }
                Transport::Mqtt(tcp_stream) => {
                    self.pending.reserve(1024);
                    tcp_stream.read_buf(&mut self.pending).await?
                }
                Transport::Mqtts(tls_stream) => {
                    self.pending.reserve(1024);
                    tls_stream.read_buf(&mut self.pending).await?
                }
                Transport::Ws(ws_stream) => loop {
                    let Some(msg) = ws_stream.next().await else {
                        break 0;
                    };
                    match msg? {
                        Message::Binary(data) => {
                            let data_len = data.len();
                            self.pending.extend(data);
                            break data_len;
                        }
                        Message::Close(_) => break 0,
                        Message::Ping(_) | Message::Pong(_) => (),
                        msg => {
                            return Err(Error::from_string(
                                ErrorKind::SocketError,
                                format!("Unexpected websocket message: {msg:?}"),
                            ));
                        }
                    }
                },
            };

            if n_recv == 0 {
                if self.pending.is_empty() {
                    return Ok(0);
                }
                return Err(Error::new(
                    ErrorKind::SocketError,
                    "Stream closed inside a packet",
                ));
            }
        }
    }

    /// Write buffer to stream.
    ///
    /// # Errors
    ///
    /// Returns error if the socket fails.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        match &mut self.transport {
            Transport::None => Err(Error::new(ErrorKind::SocketError, "Stream is not connected")),
            Transport::Mqtt(tcp_stream) => {
                tcp_stream.write_all(buf).await?;
                Ok(buf.len())
            }
            Transport::Mqtts(tls_stream) => {
                tls_stream.write_all(buf).await?;
                Ok(buf.len())
            }
            Transport::Ws(ws_stream) => {
                ws_stream.send(Message::binary(buf.to_vec())).await?;
                Ok(buf.len())
            }
        }
    }

    /// Close the stream gracefully and drop the transport.
    pub async fn shutdown(&mut self) {
        match &mut self.transport {
            Transport::None => (),
            Transport::Mqtt(tcp_stream) => {
                let _ = tcp_stream.shutdown().await;
            }
            Transport::Mqtts(tls_stream) => {
                let _ = tls_stream.shutdown().await;
            }
            Transport::Ws(ws_stream) => {
                let _ = ws_stream.close(None).await;
            }
        }
        self.transport = Transport::None;
        self.pending.clear();
    }
}
