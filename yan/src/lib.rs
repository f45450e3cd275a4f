// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

//! Yan is an async MQTT client library speaking protocol versions 3.1.1
//! and 5.0.
//!
//! The inner client structs implement the client-role protocol state
//! machine: outbound QoS 1/2 handshakes backed by a packet id allocator
//! and an inflight store which is replayed after a reconnect, inbound
//! QoS 2 duplicate suppression, keep alive pings with a bounded wait for
//! the PINGRESP, and send-side topic aliases within the broker's
//! advertised maximum.

mod async_client;
mod client_inner_v3;
mod client_inner_v5;
mod connect_options;
mod error;
mod status;
mod stream;

pub use async_client::{AsyncClient, ClientCommand, ClientEvent};
pub use client_inner_v3::ClientInnerV3;
pub use client_inner_v5::ClientInnerV5;
pub use connect_options::{ConnectType, ConnectOptions, WillOptions};
pub use error::{Error, ErrorKind};
pub use status::ClientStatus;
