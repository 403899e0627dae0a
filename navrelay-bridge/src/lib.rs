//! navrelay-bridge: connection to the robot's rosbridge server
//!
//! Provides:
//! - rosbridge v2 operations and the ROS1 message types the relay uses
//! - The `RobotLink` trait the command server drives
//! - A reconnecting websocket client with heartbeat
//! - A simulated robot for offline runs and tests

pub mod error;
pub mod messages;
pub mod protocol;
pub mod link;
pub mod client;
pub mod simulated;

pub use error::BridgeError;
pub use messages::{NavigationGoal, Twist, GOAL_STATUS_SUCCEEDED};
pub use protocol::{BridgeEvent, RosbridgeOp, Topics};
pub use link::{rotation_duration, BridgeEventHandler, RobotLink};
pub use client::RosBridgeClient;
pub use simulated::{RobotCommand, SimulatedRobot};
