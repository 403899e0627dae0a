//! rosbridge websocket client
//!
//! One long-lived task owns the websocket. Publishes from any task go
//! through a single outbound queue, so messages reach the robot in the order
//! they were sent. The task reconnects forever with a fixed backoff and
//! pings the bridge to catch half-open connections.

use crate::error::BridgeError;
use crate::link::{BridgeEventHandler, RobotLink, DEFAULT_ROTATE_PUBLISH_INTERVAL};
use crate::messages::{GoalId, NavigationGoal, Twist};
use crate::protocol::{BridgeEvent, RosbridgeOp, Topics};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use navrelay_core::{BridgeConfig, Pose};
use parking_lot::RwLock;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

pub struct RosBridgeClient {
    config: BridgeConfig,
    url: Url,
    topics: Topics,
    rotate_interval: Duration,
    outbound: RwLock<Option<mpsc::UnboundedSender<Message>>>,
    current_goal: RwLock<Option<NavigationGoal>>,
    connected: AtomicBool,
}

impl RosBridgeClient {
    /// Create a client. Fails only if the bridge URL is not a ws:// or wss:// URL.
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        let url = Url::parse(&config.url).map_err(|e| BridgeError::InvalidUrl(format!("{}: {}", config.url, e)))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(BridgeError::InvalidUrl(format!(
                "{}: scheme must be ws or wss",
                config.url
            )));
        }

        Ok(Self {
            topics: Topics::from(&config),
            config,
            url,
            rotate_interval: DEFAULT_ROTATE_PUBLISH_INTERVAL,
            outbound: RwLock::new(None),
            current_goal: RwLock::new(None),
            connected: AtomicBool::new(false),
        })
    }

    pub fn with_rotate_interval(mut self, interval: Duration) -> Self {
        self.rotate_interval = interval;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Start the connection task
    pub fn spawn(self: &Arc<Self>, handler: Arc<dyn BridgeEventHandler>) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move { client.run(handler).await })
    }

    /// Connect, serve, and reconnect after every failure. Never returns.
    ///
    /// Decoded events go to a separate task, so a slow handler never holds
    /// up the socket loop or the heartbeat.
    pub async fn run(&self, handler: Arc<dyn BridgeEventHandler>) {
        let (events, mut inbound) = mpsc::unbounded_channel::<BridgeEvent>();
        tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                handler.handle_event(event).await;
            }
        });

        let backoff = self.config.reconnect_backoff();
        loop {
            match self.run_once(&events).await {
                Ok(()) => warn!("Robot bridge connection closed"),
                Err(e) => error!("Robot bridge error: {}", e),
            }
            self.mark_disconnected();
            info!("Reconnecting to robot bridge in {:?}", backoff);
            tokio::time::sleep(backoff).await;
        }
    }

    async fn run_once(&self, events: &mpsc::UnboundedSender<BridgeEvent>) -> Result<(), BridgeError> {
        info!("Connecting to robot bridge at {}", self.url);
        let (ws, _) = tokio::time::timeout(self.config.connect_timeout(), connect_async(self.url.as_str()))
            .await
            .map_err(|_| BridgeError::Timeout(format!("connecting to {}", self.url)))??;
        let (mut sink, mut stream) = ws.split();

        for op in self.topics.handshake() {
            sink.send(Message::Text(op.to_json()?)).await?;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.outbound.write() = Some(tx);
        self.connected.store(true, Ordering::SeqCst);
        info!("Connected to robot bridge at {}", self.url);

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval());
        heartbeat.tick().await;
        let mut pong_deadline: Option<Instant> = None;

        loop {
            let deadline = pong_deadline.unwrap_or_else(Instant::now);
            tokio::select! {
                Some(message) = rx.recv() => {
                    sink.send(message).await?;
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.dispatch(&text, events),
                    Some(Ok(Message::Pong(_))) => pong_deadline = None,
                    Some(Ok(Message::Close(frame))) => {
                        debug!("Robot bridge sent close: {:?}", frame);
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                },
                _ = heartbeat.tick() => {
                    if pong_deadline.is_none() {
                        sink.send(Message::Ping(Vec::new())).await?;
                        pong_deadline = Some(Instant::now() + self.config.heartbeat_timeout());
                    }
                }
                _ = tokio::time::sleep_until(deadline), if pong_deadline.is_some() => {
                    return Err(BridgeError::Timeout("no pong from robot bridge".to_string()));
                }
            }
        }
    }

    fn dispatch(&self, text: &str, events: &mpsc::UnboundedSender<BridgeEvent>) {
        match self.topics.decode(text) {
            Ok(Some(event)) => {
                if events.send(event).is_err() {
                    warn!("Bridge event handler has stopped, event dropped");
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Skipping malformed bridge message: {}", e),
        }
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.outbound.write() = None;
    }

    fn send(&self, op: RosbridgeOp) -> Result<(), BridgeError> {
        let text = op.to_json()?;
        let outbound = self.outbound.read();
        let sender = outbound.as_ref().ok_or(BridgeError::Unavailable)?;
        sender.send(Message::Text(text)).map_err(|_| BridgeError::Unavailable)
    }
}

#[async_trait]
impl RobotLink for RosBridgeClient {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn current_goal(&self) -> Option<NavigationGoal> {
        self.current_goal.read().clone()
    }

    fn complete_goal(&self, goal_id: &str) -> Option<NavigationGoal> {
        let mut current = self.current_goal.write();
        if current.as_ref().map(|g| g.goal_id.as_str()) == Some(goal_id) {
            current.take()
        } else {
            None
        }
    }

    fn rotate_publish_interval(&self) -> Duration {
        self.rotate_interval
    }

    async fn publish_goal(&self, pose: Pose, station_index: i64) -> Result<NavigationGoal, BridgeError> {
        let goal = NavigationGoal::now(station_index, pose);
        self.send(RosbridgeOp::publish(&self.topics.goal, &goal.to_action_goal())?)?;
        info!("Published navigation goal {} for station {}", goal.goal_id, station_index);
        *self.current_goal.write() = Some(goal.clone());
        Ok(goal)
    }

    async fn cancel_goal(&self) -> Result<(), BridgeError> {
        self.send(RosbridgeOp::publish(&self.topics.cancel, &GoalId::cancel_all())?)?;
        if let Some(goal) = self.current_goal.write().take() {
            info!("Cancelled navigation goal {}", goal.goal_id);
        }
        Ok(())
    }

    async fn publish_velocity(&self, linear_x: f64, angular_z: f64) -> Result<(), BridgeError> {
        self.send(RosbridgeOp::publish(&self.topics.cmd_vel, &Twist::new(linear_x, angular_z))?)
    }

    async fn clear_costmaps(&self) -> Result<(), BridgeError> {
        self.send(RosbridgeOp::CallService {
            service: self.topics.clear_costmaps.clone(),
            args: json!({}),
            id: None,
        })?;
        info!("Requested costmap clear");
        Ok(())
    }
}
