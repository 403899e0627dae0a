//! Robot link abstraction
//!
//! The command server talks to the robot only through [`RobotLink`], and the
//! robot talks back only through [`BridgeEventHandler`]. The rosbridge client
//! and the simulated robot both sit behind these traits.

use crate::error::BridgeError;
use crate::messages::NavigationGoal;
use crate::protocol::BridgeEvent;
use async_trait::async_trait;
use navrelay_core::Pose;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_ROTATE_PUBLISH_INTERVAL: Duration = Duration::from_millis(100);

/// Receives decoded robot-side events
#[async_trait]
pub trait BridgeEventHandler: Send + Sync {
    async fn handle_event(&self, event: BridgeEvent);
}

/// How long an open-loop rotation of `angle_degrees` takes at `angular_speed` rad/s
pub fn rotation_duration(angle_degrees: f64, angular_speed: f64) -> Result<Duration, BridgeError> {
    let invalid = || {
        BridgeError::InvalidRequest(format!(
            "cannot rotate {} degrees at {} rad/s",
            angle_degrees, angular_speed
        ))
    };
    if !(angular_speed > 0.0) || !angle_degrees.is_finite() {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(angle_degrees.to_radians().abs() / angular_speed).map_err(|_| invalid())
}

#[async_trait]
pub trait RobotLink: Send + Sync {
    fn is_connected(&self) -> bool;

    /// The goal most recently dispatched and not yet cancelled
    fn current_goal(&self) -> Option<NavigationGoal>;

    /// Forget the current goal once the robot reports it reached. Returns the
    /// goal if `goal_id` was the current one.
    fn complete_goal(&self, goal_id: &str) -> Option<NavigationGoal>;

    /// Period between velocity publishes during [`RobotLink::rotate`]
    fn rotate_publish_interval(&self) -> Duration {
        DEFAULT_ROTATE_PUBLISH_INTERVAL
    }

    /// Publish a navigation goal for a station and make it the current goal
    async fn publish_goal(&self, pose: Pose, station_index: i64) -> Result<NavigationGoal, BridgeError>;

    /// Cancel whatever goal is active on the robot
    async fn cancel_goal(&self) -> Result<(), BridgeError>;

    async fn publish_velocity(&self, linear_x: f64, angular_z: f64) -> Result<(), BridgeError>;

    async fn clear_costmaps(&self) -> Result<(), BridgeError>;

    /// Halt the base and clear costmaps so planning can recover
    async fn stop(&self) -> Result<(), BridgeError> {
        self.publish_velocity(0.0, 0.0).await?;
        self.clear_costmaps().await
    }

    /// Rotate in place by publishing a fixed angular velocity for the time the
    /// angle should take, then a single zero-velocity command. Open loop: the
    /// actual heading is never consulted. Blocks the caller for the duration.
    async fn rotate(&self, angle_degrees: f64, angular_speed: f64) -> Result<(), BridgeError> {
        let duration = rotation_duration(angle_degrees, angular_speed)?;
        let angular_z = angular_speed.copysign(angle_degrees);
        info!("Rotating {} degrees at {:.2} rad/s for {:?}", angle_degrees, angular_speed, duration);

        let start = tokio::time::Instant::now();
        let mut ticker = tokio::time::interval(self.rotate_publish_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut published = 0u32;
        loop {
            ticker.tick().await;
            if start.elapsed() >= duration {
                break;
            }
            if let Err(e) = self.publish_velocity(0.0, angular_z).await {
                let _ = self.publish_velocity(0.0, 0.0).await;
                return Err(e);
            }
            published += 1;
        }

        self.publish_velocity(0.0, 0.0).await?;
        debug!("Rotation finished after {} velocity commands", published);
        Ok(())
    }
}
