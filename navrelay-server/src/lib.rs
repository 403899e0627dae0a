//! navrelay-server: operator console server
//!
//! Accepts line-oriented TCP connections from the operator console, gates
//! navigation on localization quality and relays commands to the robot.

pub mod protocol;
pub mod session;
pub mod server;

pub use protocol::{ClientCommand, Reply, ReplyKind};
pub use session::{OperatorId, OperatorRegistry, RelaySession};
pub use server::{dispatch, CommandServer};
