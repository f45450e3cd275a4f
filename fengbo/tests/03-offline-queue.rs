// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Messages published while a persistent session is offline are queued
//! and delivered in publisher order on resume.

mod common;

use codec::{ProtocolLevel, QoS};
use yan::{AsyncClient, ClientEvent, ConnectOptions};

#[tokio::test(flavor = "multi_thread")]
async fn test_offline_queue_delivery_order() {
    const PORT: u16 = 18851;
    common::start_broker(PORT).await;
    let address = format!("127.0.0.1:{PORT}");

    // Subscribe with a persistent session, then drop the connection.
    let mut subscriber = AsyncClient::connect(
        ConnectOptions::new(&address)
            .with_client_id("offline-sub")
            .with_clean_session(false),
        ProtocolLevel::V311,
    )
    .await
    .expect("connect failed");
    common::wait_connected(&mut subscriber).await;
    subscriber
        .subscribe("t", QoS::ExactOnce)
        .await
        .expect("subscribe failed");
    loop {
        match common::next_event_timeout(&mut subscriber, 5).await {
            Some(ClientEvent::SubscribeDone(_)) => break,
            Some(_other) => (),
            None => panic!("no suback received"),
        }
    }
    subscriber.disconnect().await.expect("disconnect failed");
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    // Publish three QoS 2 messages while the subscriber is away.
    let mut publisher = AsyncClient::connect(
        ConnectOptions::new(&address).with_client_id("offline-pub"),
        ProtocolLevel::V311,
    )
    .await
    .expect("connect failed");
    common::wait_connected(&mut publisher).await;
    for payload in [b"m1", b"m2", b"m3"] {
        publisher
            .publish("t", QoS::ExactOnce, payload)
            .await
            .expect("publish failed");
        // Wait for the handshake so arrival order is fixed.
        loop {
            match common::next_event_timeout(&mut publisher, 5).await {
                Some(ClientEvent::PublishDone(_)) => break,
                Some(_other) => (),
                None => panic!("publish did not complete"),
            }
        }
    }

    // Resume the session under the same client id.
    let mut resumed = AsyncClient::connect(
        ConnectOptions::new(&address)
            .with_client_id("offline-sub")
            .with_clean_session(false),
        ProtocolLevel::V311,
    )
    .await
    .expect("connect failed");
    let session_present = common::wait_connected(&mut resumed).await;
    assert!(session_present);

    let mut received = Vec::new();
    while received.len() < 3 {
        match common::next_event_timeout(&mut resumed, 5).await {
            Some(ClientEvent::Message { payload, qos, .. }) => {
                assert_eq!(qos, QoS::ExactOnce);
                received.push(payload.to_vec());
            }
            Some(_other) => (),
            None => panic!("queued message missing, got {received:?}"),
        }
    }
    assert_eq!(received, vec![b"m1".to_vec(), b"m2".to_vec(), b"m3".to_vec()]);
}
