//! Tests for the rosbridge client against a local websocket server

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use navrelay_bridge::{BridgeEvent, BridgeEventHandler, RobotLink, RosBridgeClient};
use navrelay_core::{BridgeConfig, PoseNormalizer};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

struct ChannelHandler(mpsc::UnboundedSender<BridgeEvent>);

#[async_trait]
impl BridgeEventHandler for ChannelHandler {
    async fn handle_event(&self, event: BridgeEvent) {
        let _ = self.0.send(event);
    }
}

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("client never connected")
        .unwrap();
    accept_async(stream).await.unwrap()
}

async fn wait_connected(client: &RosBridgeClient, connected: bool) {
    for _ in 0..200 {
        if client.is_connected() == connected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("client connected state never became {}", connected);
}

/// Handler that never finishes handling its first event
struct StuckHandler(mpsc::UnboundedSender<BridgeEvent>);

#[async_trait]
impl BridgeEventHandler for StuckHandler {
    async fn handle_event(&self, event: BridgeEvent) {
        let _ = self.0.send(event);
        std::future::pending::<()>().await;
    }
}

fn test_config(port: u16) -> BridgeConfig {
    BridgeConfig {
        url: format!("ws://127.0.0.1:{}", port),
        reconnect_backoff_ms: 50,
        ..BridgeConfig::default()
    }
}

#[tokio::test]
async fn test_handshake_events_and_publish() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let client = Arc::new(RosBridgeClient::new(test_config(port)).unwrap());
    let (tx, mut events) = mpsc::unbounded_channel();
    let task = client.spawn(Arc::new(ChannelHandler(tx)));

    let mut ws = accept(&listener).await;

    let mut handshake = Vec::new();
    for _ in 0..5 {
        handshake.push(next_json(&mut ws).await);
    }
    assert_eq!(handshake[0]["op"], "advertise");
    assert_eq!(handshake[0]["topic"], "/move_base/goal");
    assert!(handshake.iter().any(|m| m["op"] == "subscribe" && m["topic"] == "/move_base/result"));
    assert!(handshake.iter().any(|m| m["op"] == "subscribe" && m["topic"] == "/amcl_pose"));

    let mut covariance = vec![0.0; 36];
    covariance[0] = 0.2;
    covariance[7] = 0.3;
    ws.send(Message::Text(
        json!({"op": "publish", "topic": "/amcl_pose", "msg": {"pose": {"covariance": covariance}}}).to_string(),
    ))
    .await
    .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
    assert_eq!(event, BridgeEvent::Localization { cov_x: 0.2, cov_y: 0.3 });

    // Malformed frames are skipped without dropping the connection
    ws.send(Message::Text("{broken".to_string())).await.unwrap();

    wait_connected(&client, true).await;
    let pose = PoseNormalizer::default().normalize(1.0, 2.0, 0.0, 1.0);
    let goal = client.publish_goal(pose, 2).await.unwrap();
    assert!(goal.goal_id.starts_with("goal_2_"));

    let published = next_json(&mut ws).await;
    assert_eq!(published["op"], "publish");
    assert_eq!(published["topic"], "/move_base/goal");
    assert_eq!(published["msg"]["goal_id"]["id"], goal.goal_id.as_str());
    assert_eq!(published["msg"]["goal"]["target_pose"]["pose"]["position"]["x"], 1.0);

    client.cancel_goal().await.unwrap();
    client.stop().await.unwrap();

    let cancel = next_json(&mut ws).await;
    assert_eq!(cancel["topic"], "/move_base/cancel");
    assert_eq!(cancel["msg"]["id"], "");
    let halt = next_json(&mut ws).await;
    assert_eq!(halt["topic"], "/cmd_vel");
    assert_eq!(halt["msg"]["angular"]["z"], 0.0);
    let clear = next_json(&mut ws).await;
    assert_eq!(clear["op"], "call_service");
    assert_eq!(clear["service"], "/move_base/clear_costmaps");

    assert!(client.current_goal().is_none());
    task.abort();
}

#[tokio::test]
async fn test_reconnects_after_server_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let client = Arc::new(RosBridgeClient::new(test_config(port)).unwrap());
    let (tx, _events) = mpsc::unbounded_channel();
    let task = client.spawn(Arc::new(ChannelHandler(tx)));

    let mut first = accept(&listener).await;
    assert_eq!(next_json(&mut first).await["op"], "advertise");
    wait_connected(&client, true).await;

    drop(first);
    wait_connected(&client, false).await;
    assert!(client.clear_costmaps().await.is_err());

    let mut second = accept(&listener).await;
    assert_eq!(next_json(&mut second).await["op"], "advertise");
    wait_connected(&client, true).await;

    task.abort();
}

#[tokio::test]
async fn test_slow_handler_does_not_block_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let client = Arc::new(RosBridgeClient::new(test_config(port)).unwrap());
    let (tx, mut events) = mpsc::unbounded_channel();
    let task = client.spawn(Arc::new(StuckHandler(tx)));

    let mut ws = accept(&listener).await;
    for _ in 0..5 {
        next_json(&mut ws).await;
    }
    wait_connected(&client, true).await;

    let result = json!({
        "op": "publish",
        "topic": "/move_base/result",
        "msg": {"status": {"status": 3, "goal_id": {"id": "goal_1_1"}}}
    });
    ws.send(Message::Text(result.to_string())).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();

    // The handler is stuck, but outbound traffic still flows
    client.clear_costmaps().await.unwrap();
    let clear = next_json(&mut ws).await;
    assert_eq!(clear["op"], "call_service");
    assert!(client.is_connected());

    task.abort();
}

#[tokio::test]
async fn test_missing_pong_tears_down_and_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let config = BridgeConfig {
        heartbeat_interval_secs: 1,
        heartbeat_timeout_secs: 1,
        ..test_config(port)
    };
    let client = Arc::new(RosBridgeClient::new(config).unwrap());
    let (tx, _events) = mpsc::unbounded_channel();
    let task = client.spawn(Arc::new(ChannelHandler(tx)));

    // Accept but never read, so pings go unanswered
    let silent = accept(&listener).await;
    wait_connected(&client, true).await;

    let start = std::time::Instant::now();
    let mut disconnected = false;
    while start.elapsed() < Duration::from_secs(5) {
        if !client.is_connected() {
            disconnected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(disconnected, "half-open connection was never torn down");
    assert!(start.elapsed() >= Duration::from_millis(900));

    let mut second = accept(&listener).await;
    assert_eq!(next_json(&mut second).await["op"], "advertise");
    wait_connected(&client, true).await;

    drop(silent);
    task.abort();
}
