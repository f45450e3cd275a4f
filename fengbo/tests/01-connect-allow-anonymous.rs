// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Anonymous clients may connect when no security file is configured.

mod common;

use codec::ProtocolLevel;
use yan::{AsyncClient, ConnectOptions};

#[tokio::test(flavor = "multi_thread")]
async fn test_connect_allow_anonymous_v311() {
    const PORT: u16 = 18831;
    common::start_broker(PORT).await;

    let options = ConnectOptions::new(&format!("127.0.0.1:{PORT}"));
    let mut client = AsyncClient::connect(options, ProtocolLevel::V311)
        .await
        .expect("connect failed");
    let session_present = common::wait_connected(&mut client).await;
    assert!(!session_present);

    client.disconnect().await.expect("disconnect failed");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connect_allow_anonymous_v5() {
    const PORT: u16 = 18832;
    common::start_broker(PORT).await;

    let options = ConnectOptions::new(&format!("127.0.0.1:{PORT}"));
    let mut client = AsyncClient::connect(options, ProtocolLevel::V5)
        .await
        .expect("connect failed");
    let session_present = common::wait_connected(&mut client).await;
    assert!(!session_present);

    client.disconnect().await.expect("disconnect failed");
}
