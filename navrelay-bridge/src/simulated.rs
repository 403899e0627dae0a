//! Simulated robot for running the relay without ROS
//!
//! Records every command it receives and, when an arrival delay is set,
//! reports each goal as succeeded after that delay. On start it reports a
//! converged localization so the console can navigate immediately.

use crate::error::BridgeError;
use crate::link::{BridgeEventHandler, RobotLink};
use crate::messages::{NavigationGoal, Twist, GOAL_STATUS_SUCCEEDED};
use crate::protocol::BridgeEvent;
use async_trait::async_trait;
use navrelay_core::Pose;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Variance reported by the simulated localization
pub const SIMULATED_COVARIANCE: f64 = 0.05;

/// A command the simulated robot received
#[derive(Debug, Clone, PartialEq)]
pub enum RobotCommand {
    Goal(NavigationGoal),
    Cancel,
    Velocity(Twist),
    ClearCostmaps,
}

pub struct SimulatedRobot {
    arrival_delay: Option<Duration>,
    rotate_interval: Duration,
    connected: AtomicBool,
    history: Mutex<Vec<RobotCommand>>,
    current_goal: RwLock<Option<NavigationGoal>>,
    handler: RwLock<Option<Weak<dyn BridgeEventHandler>>>,
}

impl SimulatedRobot {
    /// `arrival_delay` of `None` never reports arrivals on its own
    pub fn new(arrival_delay: Option<Duration>) -> Self {
        Self {
            arrival_delay,
            rotate_interval: crate::link::DEFAULT_ROTATE_PUBLISH_INTERVAL,
            connected: AtomicBool::new(true),
            history: Mutex::new(Vec::new()),
            current_goal: RwLock::new(None),
            handler: RwLock::new(None),
        }
    }

    pub fn with_rotate_interval(mut self, interval: Duration) -> Self {
        self.rotate_interval = interval;
        self
    }

    /// Attach the event handler and report a converged localization
    pub fn spawn(self: &Arc<Self>, handler: Arc<dyn BridgeEventHandler>) -> JoinHandle<()> {
        *self.handler.write() = Some(Arc::downgrade(&handler));
        info!("Simulated robot started");
        tokio::spawn(async move {
            handler
                .handle_event(BridgeEvent::Localization {
                    cov_x: SIMULATED_COVARIANCE,
                    cov_y: SIMULATED_COVARIANCE,
                })
                .await;
        })
    }

    /// Deliver an event to the attached handler as if the robot had sent it
    pub async fn report(&self, event: BridgeEvent) {
        let handler = self.handler.read().as_ref().and_then(Weak::upgrade);
        if let Some(handler) = handler {
            handler.handle_event(event).await;
        }
    }

    /// Simulate the bridge going down or coming back
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn history(&self) -> Vec<RobotCommand> {
        self.history.lock().clone()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    fn record(&self, command: RobotCommand) -> Result<(), BridgeError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BridgeError::Unavailable);
        }
        self.history.lock().push(command);
        Ok(())
    }
}

#[async_trait]
impl RobotLink for SimulatedRobot {
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
        self.record(RobotCommand::Goal(goal.clone()))?;
        *self.current_goal.write() = Some(goal.clone());

        if let Some(delay) = self.arrival_delay {
            let handler = self.handler.read().clone();
            let goal_id = goal.goal_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(handler) = handler.and_then(|h| h.upgrade()) {
                    handler
                        .handle_event(BridgeEvent::NavigationResult {
                            status: GOAL_STATUS_SUCCEEDED,
                            goal_id,
                        })
                        .await;
                }
            });
        }
        Ok(goal)
    }

    async fn cancel_goal(&self) -> Result<(), BridgeError> {
        self.record(RobotCommand::Cancel)?;
        self.current_goal.write().take();
        Ok(())
    }

    async fn publish_velocity(&self, linear_x: f64, angular_z: f64) -> Result<(), BridgeError> {
        self.record(RobotCommand::Velocity(Twist::new(linear_x, angular_z)))
    }

    async fn clear_costmaps(&self) -> Result<(), BridgeError> {
        self.record(RobotCommand::ClearCostmaps)
    }
}
