//! Tests for command dispatch and robot event handling

use async_trait::async_trait;
use navrelay_bridge::{BridgeEvent, BridgeEventHandler, RobotCommand, RobotLink, SimulatedRobot, Twist, GOAL_STATUS_SUCCEEDED};
use navrelay_core::{LocalizationState, MemoryStationStore, RelayConfig, Result, Station, StationStore};
use navrelay_server::{dispatch, RelaySession, Reply, ReplyKind};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn stations() -> Vec<Station> {
    vec![
        Station::new(2, 4.0, 1.0, 1.0, 0.0),
        Station::new(0, 0.0, 0.0, 0.0, 1.0),
        Station::new(1, 2.0, 0.5, 0.7071, 0.7071),
    ]
}

fn setup() -> (Arc<RelaySession>, Arc<SimulatedRobot>) {
    let robot = Arc::new(SimulatedRobot::new(None));
    let store = Arc::new(MemoryStationStore::new(stations()));
    let session = Arc::new(RelaySession::new(&RelayConfig::default(), store, robot.clone()));
    (session, robot)
}

/// Station store whose lookups take `delay`
struct SlowStationStore {
    inner: MemoryStationStore,
    delay: Duration,
}

#[async_trait]
impl StationStore for SlowStationStore {
    async fn list_stations(&self) -> Result<Vec<Station>> {
        self.inner.list_stations().await
    }

    async fn get_station(&self, index: i64) -> Result<Station> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_station(index).await
    }
}

fn console_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

async fn localize(session: &RelaySession, cov_x: f64, cov_y: f64) {
    session.handle_event(BridgeEvent::Localization { cov_x, cov_y }).await;
}

async fn run(session: &RelaySession, line: &str) -> Vec<Reply> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    dispatch(session, line, &tx).await;
    drop(tx);
    let mut replies = Vec::new();
    while let Some(reply) = rx.recv().await {
        replies.push(reply);
    }
    replies
}

#[tokio::test]
async fn test_navigation_rejected_until_localized() {
    let (session, robot) = setup();
    assert_eq!(session.localization_state(), LocalizationState::Diverged);

    let replies = run(&session, "cmd:2").await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].kind, ReplyKind::CmdReject);
    assert_eq!(replies[0].data["station"], 2);
    assert!(!replies[0].success);
    assert!(robot.history().is_empty());
    assert_eq!(session.current_station_index(), -1);
}

#[tokio::test]
async fn test_navigation_publishes_normalized_goal() {
    let (session, robot) = setup();
    localize(&session, 0.1, 0.1).await;

    let replies = run(&session, "cmd:2").await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].kind, ReplyKind::CmdAck);
    assert!(replies[0].success);
    let goal_id = replies[0].data["goal_id"].as_str().unwrap().to_string();
    assert!(goal_id.starts_with("goal_2_"));

    let history = robot.history();
    assert_eq!(history.len(), 1);
    match &history[0] {
        RobotCommand::Goal(goal) => {
            assert_eq!(goal.goal_id, goal_id);
            assert_eq!(goal.station_index, 2);
            assert_eq!(goal.pose.position.x, 4.0);
            assert_eq!(goal.pose.position.y, 1.0);
            assert_eq!(goal.pose.position.z, 0.0);
            assert!((goal.pose.orientation.z.abs() - 1.0).abs() < 1e-6);
            assert!(goal.pose.orientation.w.abs() < 1e-6);
        }
        other => panic!("unexpected command {:?}", other),
    }
    assert_eq!(session.current_station_index(), 2);
}

#[tokio::test]
async fn test_unknown_station() {
    let (session, robot) = setup();
    localize(&session, 0.1, 0.1).await;

    let replies = run(&session, "cmd:99").await;
    assert_eq!(replies[0].kind, ReplyKind::Error);
    assert!(replies[0].msg.contains("99"));
    assert!(robot.history().is_empty());
}

#[tokio::test]
async fn test_malformed_commands_reply_with_error() {
    let (session, _robot) = setup();
    for line in ["hello", "cmd:abc", "turn:left"] {
        let replies = run(&session, line).await;
        assert_eq!(replies.len(), 1, "{}", line);
        assert_eq!(replies[0].kind, ReplyKind::Error, "{}", line);
        assert!(!replies[0].success);
    }
}

#[tokio::test]
async fn test_bridge_down_is_reported() {
    let (session, robot) = setup();
    localize(&session, 0.1, 0.1).await;
    robot.set_connected(false);

    let replies = run(&session, "cmd:1").await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].kind, ReplyKind::Error);
    assert!(replies[0].msg.contains("unavailable"), "{}", replies[0].msg);
    assert_eq!(session.current_station_index(), -1);
}

#[tokio::test(start_paused = true)]
async fn test_turn_acknowledges_then_rotates() {
    let (session, robot) = setup();

    let replies = run(&session, "turn:90").await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].kind, ReplyKind::TurnAck);
    assert_eq!(replies[0].data["angle"], 90);

    let history = robot.history();
    assert!(history.len() > 1);
    assert!(matches!(&history[0], RobotCommand::Velocity(t) if t.angular.z > 0.0));
    assert_eq!(history.last(), Some(&RobotCommand::Velocity(Twist::zero())));
}

#[tokio::test]
async fn test_turn_with_bridge_down() {
    let (session, robot) = setup();
    robot.set_connected(false);

    let replies = run(&session, "turn:-30").await;
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].kind, ReplyKind::TurnAck);
    assert_eq!(replies[1].kind, ReplyKind::Error);
}

#[tokio::test]
async fn test_gate_transitions_notify_once() {
    let (session, robot) = setup();
    let (tx, mut rx) = mpsc::unbounded_channel();
    session.operators().register(console_addr(40000), tx);

    for (x, y) in [(0.5, 0.5), (0.3, 0.3), (0.3, 0.3), (0.5, 0.1)] {
        localize(&session, x, y).await;
    }

    let mut kinds = Vec::new();
    while let Ok(reply) = rx.try_recv() {
        kinds.push(reply.kind);
    }
    assert_eq!(kinds, vec![ReplyKind::AmclStatus, ReplyKind::AmclLost]);
    assert_eq!(
        robot.history(),
        vec![RobotCommand::Cancel, RobotCommand::Velocity(Twist::zero()), RobotCommand::ClearCostmaps]
    );
    assert_eq!(session.localization_state(), LocalizationState::Diverged);
}

#[tokio::test]
async fn test_localization_loss_cancels_active_goal() {
    let (session, robot) = setup();
    localize(&session, 0.1, 0.1).await;
    run(&session, "cmd:0").await;
    assert!(robot.current_goal().is_some());

    localize(&session, 0.9, 0.9).await;
    assert!(robot.current_goal().is_none());

    let replies = run(&session, "cmd:0").await;
    assert_eq!(replies[0].kind, ReplyKind::CmdReject);
}

#[tokio::test(start_paused = true)]
async fn test_arrival_notifies_then_clears_costmaps() {
    let (session, robot) = setup();
    localize(&session, 0.1, 0.1).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    session.operators().register(console_addr(40001), tx);

    let ack = run(&session, "cmd:1").await.remove(0);
    let goal_id = ack.data["goal_id"].as_str().unwrap().to_string();
    robot.clear_history();

    session
        .handle_event(BridgeEvent::NavigationResult { status: GOAL_STATUS_SUCCEEDED, goal_id: goal_id.clone() })
        .await;

    let arrived = rx.recv().await.unwrap();
    assert_eq!(arrived.kind, ReplyKind::Arrived);
    assert_eq!(arrived.data["station"], goal_id.as_str());
    assert_eq!(arrived.data["station_index"], 1);
    assert!(robot.history().is_empty());

    tokio::time::sleep(Duration::from_millis(3100)).await;
    assert_eq!(robot.history(), vec![RobotCommand::ClearCostmaps]);
    assert!(robot.current_goal().is_none());

    // A late repeat of the same result no longer maps to a station
    session
        .handle_event(BridgeEvent::NavigationResult { status: GOAL_STATUS_SUCCEEDED, goal_id: goal_id.clone() })
        .await;
    let repeat = rx.recv().await.unwrap();
    assert_eq!(repeat.kind, ReplyKind::Arrived);
    assert!(repeat.data["station_index"].is_null());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_arrival_is_ignored() {
    let (session, robot) = setup();
    let (tx, mut rx) = mpsc::unbounded_channel();
    session.operators().register(console_addr(40002), tx);

    let result = || BridgeEvent::NavigationResult { status: GOAL_STATUS_SUCCEEDED, goal_id: "goal_0_1".to_string() };
    session.handle_event(result()).await;
    session.handle_event(result()).await;

    assert_eq!(rx.recv().await.unwrap().kind, ReplyKind::Arrived);
    assert!(tokio::time::timeout(Duration::from_millis(500), rx.recv()).await.is_err());

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(robot.history(), vec![RobotCommand::ClearCostmaps]);

    // Guard is released once costmaps are cleared
    session.handle_event(result()).await;
    assert_eq!(rx.recv().await.unwrap().kind, ReplyKind::Arrived);
}

#[tokio::test]
async fn test_non_success_status_is_ignored() {
    let (session, robot) = setup();
    let (tx, mut rx) = mpsc::unbounded_channel();
    session.operators().register(console_addr(40003), tx);

    session
        .handle_event(BridgeEvent::NavigationResult { status: 4, goal_id: "goal_0_1".to_string() })
        .await;
    tokio::task::yield_now().await;
    assert!(rx.try_recv().is_err());
    assert!(robot.history().is_empty());
}

#[tokio::test]
async fn test_last_console_receives_events() {
    let (session, _robot) = setup();
    let (first_tx, mut first_rx) = mpsc::unbounded_channel();
    let (second_tx, mut second_rx) = mpsc::unbounded_channel();

    let first = session.operators().register(console_addr(40010), first_tx);
    let second = session.operators().register(console_addr(40011), second_tx);
    assert_eq!(session.operators().current_addr(), Some(console_addr(40011)));

    localize(&session, 0.1, 0.1).await;
    assert_eq!(second_rx.try_recv().unwrap().kind, ReplyKind::AmclStatus);
    assert!(first_rx.try_recv().is_err());

    // Releasing a replaced console leaves the current one in place
    session.operators().release(first);
    assert_eq!(session.operators().current_addr(), Some(console_addr(40011)));

    session.operators().release(second);
    assert!(session.operators().current_addr().is_none());
    assert!(!session.operators().notify(Reply::amcl_lost()));
}

#[tokio::test]
async fn test_greeting_lists_stations_in_order() {
    let (session, _robot) = setup();
    let greeting = session.greeting().await;
    assert_eq!(greeting.kind, ReplyKind::StationList);
    assert_eq!(greeting.current_station_index, Some(-1));
    let orders: Vec<i64> = greeting
        .data
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["station_order"].as_i64().unwrap())
        .collect();
    assert_eq!(orders, vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_slow_station_lookup_does_not_delay_localization_loss() {
    let robot = Arc::new(SimulatedRobot::new(None));
    let store = Arc::new(SlowStationStore {
        inner: MemoryStationStore::new(stations()),
        delay: Duration::from_secs(30),
    });
    let session = Arc::new(RelaySession::new(&RelayConfig::default(), store, robot.clone()));
    let (tx, mut rx) = mpsc::unbounded_channel();
    session.operators().register(console_addr(40020), tx);
    localize(&session, 0.1, 0.1).await;
    assert_eq!(rx.recv().await.unwrap().kind, ReplyKind::AmclStatus);

    let navigating = {
        let session = session.clone();
        tokio::spawn(async move { run(&session, "cmd:1").await })
    };
    tokio::task::yield_now().await;

    let start = tokio::time::Instant::now();
    localize(&session, 0.9, 0.9).await;
    assert!(start.elapsed() < Duration::from_secs(1), "divergence waited {:?}", start.elapsed());
    assert_eq!(rx.recv().await.unwrap().kind, ReplyKind::AmclLost);
    assert_eq!(
        robot.history(),
        vec![RobotCommand::Cancel, RobotCommand::Velocity(Twist::zero()), RobotCommand::ClearCostmaps]
    );

    // The lookup finishes after localization was lost, so no goal goes out
    let replies = navigating.await.unwrap();
    assert_eq!(replies[0].kind, ReplyKind::CmdReject);
    assert!(!robot.history().iter().any(|c| matches!(c, RobotCommand::Goal(_))));
}

#[tokio::test]
async fn test_turn_too_long_for_speed_is_rejected() {
    let robot = Arc::new(SimulatedRobot::new(None));
    let store = Arc::new(MemoryStationStore::new(stations()));
    let mut config = RelayConfig::default();
    config.motion.angular_speed = 0.005;
    let session = RelaySession::new(&config, store, robot.clone());

    let replies = run(&session, &format!("turn:{}", i64::MAX)).await;
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].kind, ReplyKind::TurnAck);
    assert_eq!(replies[1].kind, ReplyKind::Error);
    assert!(robot.history().is_empty());
}
