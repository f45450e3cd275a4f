// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Receive-side topic alias handling: registration, overwrite and
//! resolution of an empty topic name.

mod common;

use codec::{ProtocolLevel, QoS};
use yan::{AsyncClient, ClientEvent, ConnectOptions};

#[tokio::test(flavor = "multi_thread")]
async fn test_topic_alias_overwrite() {
    const PORT: u16 = 18871;
    common::start_broker(PORT).await;
    let address = format!("127.0.0.1:{PORT}");

    let mut subscriber = AsyncClient::connect(
        ConnectOptions::new(&address).with_client_id("alias-sub"),
        ProtocolLevel::V5,
    )
    .await
    .expect("connect failed");
    common::wait_connected(&mut subscriber).await;
    subscriber
        .subscribe("#", QoS::AtMostOnce)
        .await
        .expect("subscribe failed");
    loop {
        match common::next_event_timeout(&mut subscriber, 5).await {
            Some(ClientEvent::SubscribeDone(_)) => break,
            Some(_other) => (),
            None => panic!("no suback received"),
        }
    }

    let mut publisher = AsyncClient::connect(
        ConnectOptions::new(&address).with_client_id("alias-pub"),
        ProtocolLevel::V5,
    )
    .await
    .expect("connect failed");
    common::wait_connected(&mut publisher).await;

    // Register alias 1 for t1, re-register it for t2, then publish with
    // an empty topic resolving through the alias.
    publisher
        .publish_with_alias("t1", 1, QoS::AtMostOnce, b"m1")
        .await
        .expect("publish failed");
    publisher
        .publish_with_alias("t2", 1, QoS::AtMostOnce, b"m2")
        .await
        .expect("publish failed");
    publisher
        .publish_with_alias("t2", 1, QoS::AtMostOnce, b"m3")
        .await
        .expect("publish failed");

    let mut topics = Vec::new();
    while topics.len() < 3 {
        match common::next_event_timeout(&mut subscriber, 5).await {
            Some(ClientEvent::Message { topic, payload, .. }) => {
                topics.push((topic, payload.to_vec()));
            }
            Some(_other) => (),
            None => panic!("alias message missing, got {topics:?}"),
        }
    }

    assert_eq!(
        topics,
        vec![
            ("t1".to_string(), b"m1".to_vec()),
            ("t2".to_string(), b"m2".to_vec()),
            ("t2".to_string(), b"m3".to_vec()),
        ]
    );
}
