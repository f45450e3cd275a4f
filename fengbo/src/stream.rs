// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_tungstenite::{tungstenite::protocol::Message, WebSocketStream};

use crate::error::{Error, ErrorKind};

/// Underlying socket of one connection.
#[derive(Debug)]
pub enum Transport {
    Mqtt(TcpStream),
    Mqtts(Box<TlsStream<TcpStream>>),
    Ws(Box<WebSocketStream<TcpStream>>),
    Wss(Box<WebSocketStream<TlsStream<TcpStream>>>),
}

/// Duplex connection to a client, framing complete control packets.
///
/// Received bytes accumulate in `pending` before a packet is cut, so a
/// cancelled read never loses data: every await point is a single
/// cancel-safe socket read, and whatever it returned is already stored.
#[derive(Debug)]
pub struct Stream {
    transport: Transport,
    pending: Vec<u8>,
}

/// Check whether `pending` starts with a complete control packet.
///
/// Returns the total packet length when all its bytes are buffered,
/// `None` when more bytes are needed.
fn complete_packet_len(pending: &[u8], max_packet_size: usize) -> Result<Option<usize>, Error> {
    if pending.is_empty() {
        return Ok(None);
    }

    // Remaining length, 1 to 4 bytes after the type byte.
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
    if total > max_packet_size {
        return Err(Error::from_string(
            ErrorKind::PacketTooLarge,
            format!("Packet size {total} exceeds maximum {max_packet_size}"),
        ));
    }

    if pending.len() < total {
        Ok(None)
    } else {
        Ok(Some(total))
    }
}

impl Stream {
    #[must_use]
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            pending: Vec::with_capacity(1024),
        }
    }

    /// Read exactly one control packet from the stream into `buf`.
    ///
    /// Bytes are pulled in chunks of at most `bulk_read_limit`; a body
    /// below the limit usually arrives with its header in a single read.
    /// Returns 0 when the peer closed the stream between packets.
    ///
    /// # Errors
    ///
    /// Returns error if the socket fails, the fixed header is malformed,
    /// the packet exceeds `max_packet_size`, or the stream ends inside a
    /// packet.
    pub async fn read_packet(
        &mut self,
        buf: &mut Vec<u8>,
        bulk_read_limit: usize,
        max_packet_size: usize,
    ) -> Result<usize, Error> {
        loop {
            if let Some(total) = complete_packet_len(&self.pending, max_packet_size)? {
                buf.extend_from_slice(&self.pending[..total]);
                self.pending.drain(..total);
                return Ok(total);
            }

            let n_recv = match &mut self.transport {
                Transport::Mqtt(tcp_stream) => {
                    self.pending.reserve(bulk_read_limit.max(1));
                    tcp_stream.read_buf(&mut self.pending).await?
                }
                Transport::Mqtts(tls_stream) => {
                    self.pending.reserve(bulk_read_limit.max(1));
                    tls_stream.read_buf(&mut self.pending).await?
                }
                Transport::Ws(ws_stream) => Self::read_ws_message(ws_stream, &mut self.pending).await?,
                Transport::Wss(wss_stream) => {
                    Self::read_ws_message(wss_stream, &mut self.pending).await?
                }
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

    async fn read_ws_message<S>(
        ws_stream: &mut WebSocketStream<S>,
        pending: &mut Vec<u8>,
    ) -> Result<usize, Error>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        loop {
            let Some(msg) = ws_stream.next().await else {
                return Ok(0);
            };
            match msg? {
                Message::Binary(data) => {
                    let data_len = data.len();
                    pending.extend(data);
                    return Ok(data_len);
                }
                Message::Close(_) => return Ok(0),
                Message::Ping(_) | Message::Pong(_) => (),
                msg => {
                    return Err(Error::from_string(
                        ErrorKind::SocketError,
                        format!("Unexpected websocket message: {msg:?}"),
                    ));
                }
            }
        }
    }

    /// Write buffer to stream.
    ///
    /// # Errors
    ///
    /// Returns error if socket/stream fails.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        match &mut self.transport {
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
            Transport::Wss(wss_stream) => {
                wss_stream.send(Message::binary(buf.to_vec())).await?;
                Ok(buf.len())
            }
        }
    }

    /// Start a graceful close of the transport.
    ///
    /// The caller bounds this with a timer and drops the stream on
    /// expiry; dropping after a failed graceful close is the hard close.
    /// Calling shutdown twice is harmless.
    pub async fn shutdown(&mut self) -> Result<(), Error> {
        match &mut self.transport {
            Transport::Mqtt(tcp_stream) => {
                tcp_stream.shutdown().await?;
                Ok(())
            }
            Transport::Mqtts(tls_stream) => {
                tls_stream.shutdown().await?;
                Ok(())
            }
            Transport::Ws(ws_stream) => {
                if let Err(err) = ws_stream.close(None).await {
                    if !matches!(
                        err,
                        tokio_tungstenite::tungstenite::Error::ConnectionClosed
                            | tokio_tungstenite::tungstenite::Error::AlreadyClosed
                    ) {
                        return Err(err.into());
                    }
                }
                Ok(())
            }
            Transport::Wss(wss_stream) => {
                if let Err(err) = wss_stream.close(None).await {
                    if !matches!(
                        err,
                        tokio_tungstenite::tungstenite::Error::ConnectionClosed
                            | tokio_tungstenite::tungstenite::Error::AlreadyClosed
                    ) {
                        return Err(err.into());
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_packet_len() {
        // PINGREQ, exactly one packet.
        assert_eq!(complete_packet_len(&[0xc0, 0x00], 1024).unwrap(), Some(2));

        // Header only, body missing.
        assert_eq!(
            complete_packet_len(&[0x30, 0x04, 0x00], 1024).unwrap(),
            None
        );

        // Two packets buffered back to back; only the first is cut.
        assert_eq!(
            complete_packet_len(&[0xc0, 0x00, 0xd0, 0x00], 1024).unwrap(),
            Some(2)
        );

        // Incomplete variable length header.
        assert_eq!(complete_packet_len(&[0x30, 0x80], 1024).unwrap(), None);

        // Five length bytes are malformed.
        assert!(complete_packet_len(&[0x30, 0x80, 0x80, 0x80, 0x80, 0x01], usize::MAX).is_err());

        // Too large for the negotiated maximum.
        assert!(complete_packet_len(&[0x30, 0x7f], 16).is_err());
    }
}
