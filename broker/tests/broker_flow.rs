//! Drives a [`BrokerClient`] against a scripted in-process broker.

use std::sync::Arc;

use cove_broker::{BrokerClient, BrokerConfig};
use cove_core::payments::PaymentsT;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;

// anvil's first well-known development key
const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

#[derive(Default)]
struct MockState {
    transfers: Vec<(String, u64)>,
    methods: Vec<String>,
}

/// Accept one connection and answer the handshake and transfer methods the
/// way a broker would.
async fn run_mock_broker(listener: TcpListener, state: Arc<Mutex<MockState>>) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

    while let Some(Ok(msg)) = ws.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let req: Value = serde_json::from_str(&text).unwrap();
        let id = req["id"].as_u64().unwrap();
        let method = req["method"].as_str().unwrap().to_owned();
        state.lock().await.methods.push(method.clone());

        let reply = match method.as_str() {
            "auth_request" => {
                assert!(req["params"]["signature"]
                    .as_str()
                    .unwrap()
                    .starts_with("0x"));
                json!({ "id": id, "result": { "challenge": "mock-challenge-1" } })
            }
            "auth_verify" => {
                assert_eq!(req["params"]["challenge"], "mock-challenge-1");
                json!({ "id": id, "result": { "success": true } })
            }
            "get_channels" => {
                // Signed requests prove session key ownership.
                assert!(req["sig"].as_str().unwrap().starts_with("0x"));
                json!({ "id": id, "result": { "channels": [] } })
            }
            "create_channel" => json!({ "id": id, "result": { "channelId": "ch-mock-1" } }),
            "resize_channel" => {
                assert_eq!(req["params"]["channelId"], "ch-mock-1");
                json!({ "id": id, "result": { "success": true } })
            }
            "transfer" => {
                let to = req["params"]["destination"].as_str().unwrap().to_owned();
                let amount = req["params"]["amount"].as_u64().unwrap();
                state.lock().await.transfers.push((to, amount));
                json!({ "id": id, "result": { "success": true } })
            }
            other => json!({ "id": id, "error": { "code": -1, "message": other } }),
        };
        ws.send(Message::Text(reply.to_string().into()))
            .await
            .unwrap();
    }
}

fn test_config(port: u16) -> BrokerConfig {
    BrokerConfig {
        ws_url: format!("ws://127.0.0.1:{}", port),
        private_key: TEST_KEY.into(),
        asset: "usdc".into(),
        custody: None,
        adjudicator: None,
        channel_collateral: 1000,
    }
}

#[tokio::test]
async fn test_connect_authenticates_and_funds_channel() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let state = Arc::new(Mutex::new(MockState::default()));
    tokio::spawn(run_mock_broker(listener, state.clone()));

    let client = BrokerClient::connect(test_config(port)).await.unwrap();
    assert!(client.ready());

    let methods = state.lock().await.methods.clone();
    assert_eq!(
        methods,
        vec![
            "auth_request",
            "auth_verify",
            "get_channels",
            "create_channel",
            "resize_channel"
        ]
    );
}

#[tokio::test]
async fn test_transfer_reaches_broker() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let state = Arc::new(Mutex::new(MockState::default()));
    tokio::spawn(run_mock_broker(listener, state.clone()));

    let client = BrokerClient::connect(test_config(port)).await.unwrap();
    client.transfer("0x00000000000000000000000000000000000000aa", 5)
        .await
        .unwrap();
    client.transfer("0x00000000000000000000000000000000000000bb", 7)
        .await
        .unwrap();

    let transfers = state.lock().await.transfers.clone();
    assert_eq!(
        transfers,
        vec![
            ("0x00000000000000000000000000000000000000aa".to_owned(), 5),
            ("0x00000000000000000000000000000000000000bb".to_owned(), 7),
        ]
    );
}
