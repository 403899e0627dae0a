//! ROS1 message definitions used over rosbridge
//!
//! Only the fields the relay reads or writes are modelled. Field names follow
//! the ROS message definitions so serde output is what rosbridge expects.

use navrelay_core::Pose;
use serde::{Deserialize, Serialize};

pub const MAP_FRAME: &str = "map";

/// `actionlib_msgs/GoalStatus` code for a goal that reached its target
pub const GOAL_STATUS_SUCCEEDED: i64 = 3;

/// `std_msgs/Time`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RosTime {
    pub secs: u32,
    pub nsecs: u32,
}

/// `std_msgs/Header`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub seq: u32,
    pub stamp: RosTime,
    pub frame_id: String,
}

impl Header {
    /// Header in the map frame with a zero stamp, so the receiver uses its latest transform
    pub fn map() -> Self {
        Self {
            seq: 0,
            stamp: RosTime::default(),
            frame_id: MAP_FRAME.to_string(),
        }
    }
}

/// `actionlib_msgs/GoalID`. An empty id cancels every active goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalId {
    pub stamp: RosTime,
    pub id: String,
}

impl GoalId {
    pub fn cancel_all() -> Self {
        Self {
            stamp: RosTime::default(),
            id: String::new(),
        }
    }
}

/// `geometry_msgs/PoseStamped`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseStamped {
    pub header: Header,
    pub pose: Pose,
}

/// `move_base_msgs/MoveBaseGoal`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveBaseGoal {
    pub target_pose: PoseStamped,
}

/// `move_base_msgs/MoveBaseActionGoal`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveBaseActionGoal {
    pub header: Header,
    pub goal_id: GoalId,
    pub goal: MoveBaseGoal,
}

/// `geometry_msgs/Vector3`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// `geometry_msgs/Twist`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Twist {
    pub linear: Vector3,
    pub angular: Vector3,
}

impl Twist {
    pub fn new(linear_x: f64, angular_z: f64) -> Self {
        Self {
            linear: Vector3 { x: linear_x, ..Default::default() },
            angular: Vector3 { z: angular_z, ..Default::default() },
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::zero()
    }
}

/// A navigation goal dispatched for one station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationGoal {
    pub goal_id: String,
    pub station_index: i64,
    pub pose: Pose,
    pub frame_id: String,
}

impl NavigationGoal {
    /// Goal ids have the form `goal_{station_index}_{unix_seconds}`
    pub fn new(station_index: i64, pose: Pose, unix_secs: u64) -> Self {
        Self {
            goal_id: format!("goal_{}_{}", station_index, unix_secs),
            station_index,
            pose,
            frame_id: MAP_FRAME.to_string(),
        }
    }

    pub fn now(station_index: i64, pose: Pose) -> Self {
        let unix_secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self::new(station_index, pose, unix_secs)
    }

    pub fn to_action_goal(&self) -> MoveBaseActionGoal {
        MoveBaseActionGoal {
            header: Header::map(),
            goal_id: GoalId {
                stamp: RosTime::default(),
                id: self.goal_id.clone(),
            },
            goal: MoveBaseGoal {
                target_pose: PoseStamped {
                    header: Header {
                        frame_id: self.frame_id.clone(),
                        ..Header::map()
                    },
                    pose: self.pose,
                },
            },
        }
    }
}
