//! Relay session state
//!
//! All state shared between console connections and the robot bridge lives
//! here: the localization gate, the console that receives pushed events, the
//! last dispatched station and the arrival guard.
//!
//! Pushed events (arrival, localization changes) go only to the most
//! recently connected console. Other consoles still get replies to their own
//! commands.

use crate::protocol::Reply;
use async_trait::async_trait;
use navrelay_bridge::{BridgeEvent, BridgeEventHandler, NavigationGoal, RobotLink};
use navrelay_core::{
    GateTransition, LocalizationState, NavigationGate, PoseNormalizer, RelayConfig, Result, StationStore,
};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub type OperatorId = u64;

struct Operator {
    id: OperatorId,
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<Reply>,
}

/// Tracks which console receives pushed events. Last connection wins.
#[derive(Default)]
pub struct OperatorRegistry {
    next_id: AtomicU64,
    current: RwLock<Option<Operator>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a console the push target, replacing any previous one
    pub fn register(&self, addr: SocketAddr, tx: mpsc::UnboundedSender<Reply>) -> OperatorId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = self.current.write().replace(Operator { id, addr, tx }) {
            info!("Console {} replaces {} as event target", addr, previous.addr);
        }
        id
    }

    /// Forget a console if it is still the push target
    pub fn release(&self, id: OperatorId) {
        let mut current = self.current.write();
        if current.as_ref().map(|op| op.id) == Some(id) {
            *current = None;
        }
    }

    pub fn current_addr(&self) -> Option<SocketAddr> {
        self.current.read().as_ref().map(|op| op.addr)
    }

    /// Push an event to the current console. Returns false if nobody received it.
    pub fn notify(&self, reply: Reply) -> bool {
        let current = self.current.read();
        match current.as_ref() {
            Some(op) => match op.tx.send(reply) {
                Ok(()) => true,
                Err(_) => {
                    debug!("Console {} is gone, event dropped", op.addr);
                    false
                }
            },
            None => {
                debug!("No console connected, {:?} dropped", reply.kind);
                false
            }
        }
    }
}

pub struct RelaySession {
    store: Arc<dyn StationStore>,
    robot: Arc<dyn RobotLink>,
    gate: NavigationGate,
    normalizer: PoseNormalizer,
    operators: Arc<OperatorRegistry>,
    current_station_index: AtomicI64,
    arrival_in_progress: Arc<AtomicBool>,
    // Held while a goal is dispatched and while a divergence is handled,
    // so a cancel can never overtake the goal it is meant to cancel.
    dispatch: tokio::sync::Mutex<()>,
    angular_speed: f64,
    settle_delay: Duration,
}

impl RelaySession {
    pub fn new(config: &RelayConfig, store: Arc<dyn StationStore>, robot: Arc<dyn RobotLink>) -> Self {
        Self {
            store,
            robot,
            gate: NavigationGate::new(config.gate.covariance_threshold),
            normalizer: PoseNormalizer::new(config.normalizer),
            operators: Arc::new(OperatorRegistry::new()),
            current_station_index: AtomicI64::new(-1),
            arrival_in_progress: Arc::new(AtomicBool::new(false)),
            dispatch: tokio::sync::Mutex::new(()),
            angular_speed: config.motion.angular_speed,
            settle_delay: config.motion.settle_delay(),
        }
    }

    pub fn operators(&self) -> &OperatorRegistry {
        &self.operators
    }

    pub fn localization_state(&self) -> LocalizationState {
        self.gate.state()
    }

    pub fn current_station_index(&self) -> i64 {
        self.current_station_index.load(Ordering::SeqCst)
    }

    /// Greeting for a newly connected console
    pub async fn greeting(&self) -> Reply {
        match self.store.list_stations().await {
            Ok(stations) => Reply::station_list(&stations, self.current_station_index()),
            Err(e) => {
                error!("Failed to load stations: {}", e);
                Reply::error(format!("failed to load stations: {}", e))
            }
        }
    }

    /// Dispatch a navigation goal to the station with the given order
    pub async fn navigate(&self, index: i64) -> Result<NavigationGoal> {
        self.gate.check()?;
        let station = self.store.get_station(index).await?;
        let pose = self.normalizer.normalize(station.x, station.y, station.z, station.w);

        // Localization may have been lost during the lookup
        let _dispatch = self.dispatch.lock().await;
        self.gate.check()?;
        let goal = self.robot.publish_goal(pose, index).await?;

        self.current_station_index.store(index, Ordering::SeqCst);
        Ok(goal)
    }

    /// Rotate in place. Blocks the caller for the whole rotation.
    pub async fn turn(&self, degrees: i64) -> Result<()> {
        self.robot.rotate(degrees as f64, self.angular_speed).await?;
        Ok(())
    }

    async fn on_localization(&self, cov_x: f64, cov_y: f64) {
        let _dispatch = self.dispatch.lock().await;
        match self.gate.observe(cov_x, cov_y) {
            Some(GateTransition::Converged) => {
                self.operators.notify(Reply::amcl_status());
            }
            Some(GateTransition::Diverged) => {
                if let Err(e) = self.robot.cancel_goal().await {
                    warn!("Failed to cancel goal after localization loss: {}", e);
                }
                if let Err(e) = self.robot.stop().await {
                    warn!("Failed to stop robot after localization loss: {}", e);
                }
                self.operators.notify(Reply::amcl_lost());
            }
            None => {}
        }
    }

    fn on_navigation_result(&self, status: i64, goal_id: String) {
        if status != navrelay_bridge::GOAL_STATUS_SUCCEEDED {
            debug!("Goal {} reported status {}", goal_id, status);
            return;
        }
        if self.arrival_in_progress.swap(true, Ordering::SeqCst) {
            debug!("Arrival of {} already being handled", goal_id);
            return;
        }

        info!("Arrived: {}", goal_id);
        let station_index = self.robot.complete_goal(&goal_id).map(|goal| goal.station_index);
        let operators = self.operators.clone();
        let robot = self.robot.clone();
        let guard = self.arrival_in_progress.clone();
        let settle_delay = self.settle_delay;

        tokio::spawn(async move {
            operators.notify(Reply::arrived(&goal_id, station_index));
            tokio::time::sleep(settle_delay).await;
            if let Err(e) = robot.clear_costmaps().await {
                warn!("Failed to clear costmaps after arrival: {}", e);
            }
            guard.store(false, Ordering::SeqCst);
        });
    }
}

#[async_trait]
impl BridgeEventHandler for RelaySession {
    async fn handle_event(&self, event: BridgeEvent) {
        match event {
            BridgeEvent::Localization { cov_x, cov_y } => self.on_localization(cov_x, cov_y).await,
            BridgeEvent::NavigationResult { status, goal_id } => self.on_navigation_result(status, goal_id),
        }
    }
}
