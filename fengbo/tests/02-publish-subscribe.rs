// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Message routing between two clients, including retained messages.

mod common;

use codec::{ProtocolLevel, QoS};
use yan::{AsyncClient, ClientEvent, ConnectOptions};

async fn wait_message(client: &mut AsyncClient) -> (String, QoS, bool, Vec<u8>) {
    loop {
        match common::next_event_timeout(client, 5).await {
            Some(ClientEvent::Message {
                topic,
                qos,
                retain,
                payload,
            }) => return (topic, qos, retain, payload.to_vec()),
            Some(_other) => (),
            None => panic!("no message received"),
        }
    }
}

async fn wait_subscribed(client: &mut AsyncClient) {
    loop {
        match common::next_event_timeout(client, 5).await {
            Some(ClientEvent::SubscribeDone(_)) => return,
            Some(_other) => (),
            None => panic!("no suback received"),
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_publish_subscribe_qos_levels() {
    const PORT: u16 = 18841;
    common::start_broker(PORT).await;
    let address = format!("127.0.0.1:{PORT}");

    let mut subscriber = AsyncClient::connect(
        ConnectOptions::new(&address).with_client_id("sub-1"),
        ProtocolLevel::V311,
    )
    .await
    .expect("connect failed");
    common::wait_connected(&mut subscriber).await;
    subscriber
        .subscribe("data/#", QoS::ExactOnce)
        .await
        .expect("subscribe failed");
    wait_subscribed(&mut subscriber).await;

    let mut publisher = AsyncClient::connect(
        ConnectOptions::new(&address).with_client_id("pub-1"),
        ProtocolLevel::V311,
    )
    .await
    .expect("connect failed");
    common::wait_connected(&mut publisher).await;

    publisher
        .publish("data/a", QoS::AtMostOnce, b"m0")
        .await
        .expect("publish failed");
    publisher
        .publish("data/b", QoS::AtLeastOnce, b"m1")
        .await
        .expect("publish failed");
    publisher
        .publish("data/c", QoS::ExactOnce, b"m2")
        .await
        .expect("publish failed");

    let (topic, qos, _retain, payload) = wait_message(&mut subscriber).await;
    assert_eq!(topic, "data/a");
    assert_eq!(qos, QoS::AtMostOnce);
    assert_eq!(payload, b"m0");

    let (topic, qos, _retain, payload) = wait_message(&mut subscriber).await;
    assert_eq!(topic, "data/b");
    assert_eq!(qos, QoS::AtLeastOnce);
    assert_eq!(payload, b"m1");

    let (topic, qos, _retain, payload) = wait_message(&mut subscriber).await;
    assert_eq!(topic, "data/c");
    assert_eq!(qos, QoS::ExactOnce);
    assert_eq!(payload, b"m2");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retained_message_store_and_delete() {
    const PORT: u16 = 18842;
    common::start_broker(PORT).await;
    let address = format!("127.0.0.1:{PORT}");

    let mut publisher = AsyncClient::connect(
        ConnectOptions::new(&address).with_client_id("pub-2"),
        ProtocolLevel::V311,
    )
    .await
    .expect("connect failed");
    common::wait_connected(&mut publisher).await;
    publisher
        .publish_retained("a/b", QoS::AtLeastOnce, b"hello")
        .await
        .expect("publish failed");

    // A fresh subscriber receives the retained payload once.
    let mut first = AsyncClient::connect(
        ConnectOptions::new(&address).with_client_id("sub-2a"),
        ProtocolLevel::V311,
    )
    .await
    .expect("connect failed");
    common::wait_connected(&mut first).await;
    first
        .subscribe("a/+", QoS::AtLeastOnce)
        .await
        .expect("subscribe failed");
    wait_subscribed(&mut first).await;

    let (topic, _qos, retain, payload) = wait_message(&mut first).await;
    assert_eq!(topic, "a/b");
    assert!(retain);
    assert_eq!(payload, b"hello");

    // An empty retained payload deletes the stored message.
    publisher
        .publish_retained("a/b", QoS::AtLeastOnce, b"")
        .await
        .expect("publish failed");
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let mut second = AsyncClient::connect(
        ConnectOptions::new(&address).with_client_id("sub-2b"),
        ProtocolLevel::V311,
    )
    .await
    .expect("connect failed");
    common::wait_connected(&mut second).await;
    second
        .subscribe("a/b", QoS::AtLeastOnce)
        .await
        .expect("subscribe failed");
    wait_subscribed(&mut second).await;

    let no_message =
        tokio::time::timeout(std::time::Duration::from_millis(500), second.next_event()).await;
    assert!(no_message.is_err(), "retained message was not deleted");
}
