// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! A shared subscription group delivers each publication to exactly one
//! member, round-robin.

mod common;

use codec::{ProtocolLevel, QoS};
use yan::{AsyncClient, ClientEvent, ConnectOptions};

async fn subscribe_shared(client: &mut AsyncClient, filter: &str) {
    client
        .subscribe(filter, QoS::AtLeastOnce)
        .await
        .expect("subscribe failed");
    loop {
        match common::next_event_timeout(client, 5).await {
            Some(ClientEvent::SubscribeDone(_)) => return,
            Some(_other) => (),
            None => panic!("no suback received"),
        }
    }
}

async fn collect_messages(client: &mut AsyncClient, expect: usize) -> Vec<Vec<u8>> {
    let mut messages = Vec::new();
    while messages.len() < expect {
        match common::next_event_timeout(client, 5).await {
            Some(ClientEvent::Message { payload, .. }) => messages.push(payload.to_vec()),
            Some(_other) => (),
            None => break,
        }
    }
    messages
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shared_subscription_round_robin() {
    const PORT: u16 = 18861;
    common::start_broker(PORT).await;
    let address = format!("127.0.0.1:{PORT}");

    let mut member1 = AsyncClient::connect(
        ConnectOptions::new(&address).with_client_id("share-1"),
        ProtocolLevel::V5,
    )
    .await
    .expect("connect failed");
    common::wait_connected(&mut member1).await;
    subscribe_shared(&mut member1, "$share/g/t").await;

    let mut member2 = AsyncClient::connect(
        ConnectOptions::new(&address).with_client_id("share-2"),
        ProtocolLevel::V5,
    )
    .await
    .expect("connect failed");
    common::wait_connected(&mut member2).await;
    subscribe_shared(&mut member2, "$share/g/t").await;

    let mut publisher = AsyncClient::connect(
        ConnectOptions::new(&address).with_client_id("share-pub"),
        ProtocolLevel::V5,
    )
    .await
    .expect("connect failed");
    common::wait_connected(&mut publisher).await;

    for payload in [b"p1", b"p2", b"p3", b"p4"] {
        publisher
            .publish("t", QoS::AtLeastOnce, payload)
            .await
            .expect("publish failed");
        loop {
            match common::next_event_timeout(&mut publisher, 5).await {
                Some(ClientEvent::PublishDone(_)) => break,
                Some(_other) => (),
                None => panic!("publish did not complete"),
            }
        }
    }

    // Each member receives exactly two messages, in publisher order
    // within its own stream.
    let got1 = collect_messages(&mut member1, 2).await;
    let got2 = collect_messages(&mut member2, 2).await;
    assert_eq!(got1.len(), 2);
    assert_eq!(got2.len(), 2);
    assert_ne!(got1, got2);

    let mut all: Vec<Vec<u8>> = got1.iter().chain(got2.iter()).cloned().collect();
    all.sort();
    assert_eq!(
        all,
        vec![b"p1".to_vec(), b"p2".to_vec(), b"p3".to_vec(), b"p4".to_vec()]
    );

    // No extra deliveries: exactly one member got each publication.
    let extra =
        tokio::time::timeout(std::time::Duration::from_millis(300), member1.next_event()).await;
    assert!(extra.is_err());
}
