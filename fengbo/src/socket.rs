// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use tokio::net::TcpListener;

use crate::error::Error;

/// Create a new tcp listener bound to `address`.
///
/// # Errors
///
/// Returns error if the address is in use or invalid.
pub async fn new_tcp_listener(address: &str) -> Result<TcpListener, Error> {
    let listener = TcpListener::bind(address).await?;
    Ok(listener)
}
