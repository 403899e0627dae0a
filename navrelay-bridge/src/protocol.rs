//! rosbridge v2 wire protocol
//!
//! Outbound operations are a tagged enum keyed by `op`. Inbound frames are
//! decoded leniently: anything that is not a publish on a subscribed topic
//! is ignored, and a malformed payload on a subscribed topic is an error the
//! caller logs and skips.

use crate::error::BridgeError;
use crate::messages::GOAL_STATUS_SUCCEEDED;
use navrelay_core::gate::{COVARIANCE_X_INDEX, COVARIANCE_Y_INDEX};
use navrelay_core::BridgeConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const GOAL_MSG_TYPE: &str = "move_base_msgs/MoveBaseActionGoal";
pub const CANCEL_MSG_TYPE: &str = "actionlib_msgs/GoalID";
pub const TWIST_MSG_TYPE: &str = "geometry_msgs/Twist";
pub const RESULT_MSG_TYPE: &str = "move_base_msgs/MoveBaseActionResult";
pub const COVARIANCE_MSG_TYPE: &str = "geometry_msgs/PoseWithCovarianceStamped";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RosbridgeOp {
    Advertise {
        topic: String,
        #[serde(rename = "type")]
        msg_type: String,
    },
    Subscribe {
        topic: String,
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        msg_type: Option<String>,
    },
    Publish {
        topic: String,
        msg: JsonValue,
    },
    CallService {
        service: String,
        args: JsonValue,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl RosbridgeOp {
    pub fn publish<T: Serialize>(topic: &str, msg: &T) -> Result<Self, BridgeError> {
        Ok(RosbridgeOp::Publish {
            topic: topic.to_string(),
            msg: serde_json::to_value(msg)?,
        })
    }

    pub fn to_json(&self) -> Result<String, BridgeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Robot-side events the relay reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// x/y variances from the latest AMCL pose estimate
    Localization { cov_x: f64, cov_y: f64 },
    /// Terminal status of a navigation goal
    NavigationResult { status: i64, goal_id: String },
}

impl BridgeEvent {
    pub fn is_arrival(&self) -> bool {
        matches!(self, BridgeEvent::NavigationResult { status, .. } if *status == GOAL_STATUS_SUCCEEDED)
    }
}

/// Topic names the relay speaks, taken from configuration
#[derive(Debug, Clone)]
pub struct Topics {
    pub goal: String,
    pub cancel: String,
    pub result: String,
    pub cmd_vel: String,
    pub covariance: String,
    pub clear_costmaps: String,
}

impl From<&BridgeConfig> for Topics {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            goal: config.goal_topic.clone(),
            cancel: config.cancel_topic.clone(),
            result: config.result_topic.clone(),
            cmd_vel: config.cmd_vel_topic.clone(),
            covariance: config.covariance_topic.clone(),
            clear_costmaps: config.clear_costmaps_service.clone(),
        }
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

impl Topics {
    /// Operations sent right after every (re)connect
    pub fn handshake(&self) -> Vec<RosbridgeOp> {
        vec![
            RosbridgeOp::Advertise {
                topic: self.goal.clone(),
                msg_type: GOAL_MSG_TYPE.to_string(),
            },
            RosbridgeOp::Advertise {
                topic: self.cancel.clone(),
                msg_type: CANCEL_MSG_TYPE.to_string(),
            },
            RosbridgeOp::Advertise {
                topic: self.cmd_vel.clone(),
                msg_type: TWIST_MSG_TYPE.to_string(),
            },
            RosbridgeOp::Subscribe {
                topic: self.result.clone(),
                msg_type: Some(RESULT_MSG_TYPE.to_string()),
            },
            RosbridgeOp::Subscribe {
                topic: self.covariance.clone(),
                msg_type: Some(COVARIANCE_MSG_TYPE.to_string()),
            },
        ]
    }

    /// Decode one inbound text frame
    pub fn decode(&self, text: &str) -> Result<Option<BridgeEvent>, BridgeError> {
        let frame: JsonValue = serde_json::from_str(text)?;
        if frame.get("op").and_then(|v| v.as_str()) != Some("publish") {
            return Ok(None);
        }
        let topic = frame.get("topic").and_then(|v| v.as_str()).unwrap_or_default();
        let msg = match frame.get("msg") {
            Some(msg) => msg,
            None => return Err(BridgeError::Serialization(format!("publish on {} without msg", topic))),
        };

        if topic == self.result {
            let status = msg.get("status");
            let code = status
                .and_then(|s| s.get("status"))
                .and_then(|v| v.as_i64())
                .unwrap_or(-1);
            let goal_id = status
                .and_then(|s| s.get("goal_id"))
                .and_then(|g| g.get("id"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            Ok(Some(BridgeEvent::NavigationResult { status: code, goal_id }))
        } else if topic == self.covariance {
            let covariance = msg
                .get("pose")
                .and_then(|p| p.get("covariance"))
                .and_then(|c| c.as_array())
                .ok_or_else(|| BridgeError::Serialization(format!("{} message without pose.covariance", topic)))?;
            let variance = |index: usize| {
                covariance.get(index).and_then(|v| v.as_f64()).ok_or_else(|| {
                    BridgeError::Serialization(format!(
                        "covariance has {} elements, missing index {}",
                        covariance.len(),
                        index
                    ))
                })
            };
            Ok(Some(BridgeEvent::Localization {
                cov_x: variance(COVARIANCE_X_INDEX)?,
                cov_y: variance(COVARIANCE_Y_INDEX)?,
            }))
        } else {
            Ok(None)
        }
    }
}
