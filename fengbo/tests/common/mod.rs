// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Shared helpers for broker integration tests.

use std::time::Duration;

use fengbo::config::Config;
use fengbo::server::Server;

/// Start a broker on `port` in a background task and wait until the
/// listener accepts connections.
pub async fn start_broker(port: u16) {
    let config_text = format!(
        r#"
[[listeners]]
protocol = "mqtt"
address = "127.0.0.1:{port}"
"#
    );
    let config: Config = toml::from_str(&config_text).expect("Invalid test config");
    let server = Server::new(config);
    tokio::spawn(async move {
        if let Err(err) = server.run().await {
            eprintln!("broker exited: {err}");
        }
    });

    // Wait for the listener to come up.
    for _ in 0..100 {
        if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("broker did not start on port {port}");
}

/// Wait for the next event, failing the test after `secs` seconds.
pub async fn next_event_timeout(
    client: &mut yan::AsyncClient,
    secs: u64,
) -> Option<yan::ClientEvent> {
    tokio::time::timeout(Duration::from_secs(secs), client.next_event())
        .await
        .ok()
        .flatten()
}

/// Wait until the client reports a successful connect.
pub async fn wait_connected(client: &mut yan::AsyncClient) -> bool {
    loop {
        match next_event_timeout(client, 5).await {
            Some(yan::ClientEvent::Connected { session_present }) => return session_present,
            Some(yan::ClientEvent::ConnectRefused) | None => {
                panic!("client failed to connect");
            }
            Some(_other) => (),
        }
    }
}
