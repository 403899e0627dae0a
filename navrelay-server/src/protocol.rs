//! Operator console line protocol
//!
//! The console sends plain text commands (`cmd:<index>`, `turn:<degrees>`),
//! one per line. Every server message is a single JSON object terminated by
//! `\n`, with non-ASCII text left unescaped.

use navrelay_core::{RelayError, Station};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

/// A parsed console command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    /// Navigate to the station with this order
    Navigate(i64),
    /// Rotate in place by this many degrees, positive is counter-clockwise
    Turn(i64),
}

impl ClientCommand {
    pub fn parse(line: &str) -> Result<Self, RelayError> {
        let line = line.trim();
        if let Some(arg) = line.strip_prefix("cmd:") {
            parse_int(arg, "station index").map(ClientCommand::Navigate)
        } else if let Some(arg) = line.strip_prefix("turn:") {
            parse_int(arg, "turn angle").map(ClientCommand::Turn)
        } else {
            Err(RelayError::Protocol(format!("unknown command: {}", line)))
        }
    }
}

fn parse_int(arg: &str, what: &str) -> Result<i64, RelayError> {
    arg.trim()
        .parse::<i64>()
        .map_err(|_| RelayError::Protocol(format!("invalid {} '{}'", what, arg.trim())))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    StationList,
    CmdAck,
    CmdReject,
    TurnAck,
    Arrived,
    AmclStatus,
    AmclLost,
    Error,
}

/// One server-to-console message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_station_index: Option<i64>,
    #[serde(rename = "type")]
    pub kind: ReplyKind,
    pub data: JsonValue,
    pub msg: String,
    pub success: bool,
}

impl Reply {
    fn new(kind: ReplyKind, data: JsonValue, msg: impl Into<String>, success: bool) -> Self {
        Self {
            current_station_index: None,
            kind,
            data,
            msg: msg.into(),
            success,
        }
    }

    /// Greeting sent when a console connects
    pub fn station_list(stations: &[Station], current_station_index: i64) -> Self {
        Self {
            current_station_index: Some(current_station_index),
            ..Self::new(
                ReplyKind::StationList,
                json!(stations),
                "Initial station list",
                true,
            )
        }
    }

    pub fn cmd_ack(station: i64, goal_id: &str) -> Self {
        Self::new(
            ReplyKind::CmdAck,
            json!({"station": station, "goal_id": goal_id}),
            format!("Navigating to station {}", station),
            true,
        )
    }

    pub fn cmd_reject(station: i64, reason: &str) -> Self {
        Self::new(ReplyKind::CmdReject, json!({"station": station}), reason, false)
    }

    pub fn turn_ack(angle: i64) -> Self {
        Self::new(
            ReplyKind::TurnAck,
            json!({"angle": angle}),
            format!("Turning {} degrees", angle),
            true,
        )
    }

    pub fn arrived(goal_id: &str, station_index: Option<i64>) -> Self {
        Self::new(
            ReplyKind::Arrived,
            json!({"station": goal_id, "station_index": station_index}),
            "Arrived at target station",
            true,
        )
    }

    pub fn amcl_status() -> Self {
        Self::new(
            ReplyKind::AmclStatus,
            json!({"converged": true}),
            "Localization converged, navigation allowed",
            true,
        )
    }

    pub fn amcl_lost() -> Self {
        Self::new(
            ReplyKind::AmclLost,
            json!({"converged": false}),
            "Localization lost, navigation interrupted",
            false,
        )
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::new(ReplyKind::Error, json!({}), msg, false)
    }

    /// Map a failed command to the reply the console expects
    pub fn from_error(err: &RelayError, command: Option<ClientCommand>) -> Self {
        match (err, command) {
            (RelayError::NavigationRejected(reason), Some(ClientCommand::Navigate(station))) => {
                Self::cmd_reject(station, reason)
            }
            (err, _) => Self::error(err.to_string()),
        }
    }

    /// Serialize as one protocol line
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
