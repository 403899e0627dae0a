//! navrelay-core: shared building blocks for the navigation relay
//!
//! Provides:
//! - Layered configuration (file, environment)
//! - Read-only station store (MySQL or in-memory)
//! - Heading normalization for stored station poses
//! - Edge-triggered localization gate

pub mod error;
pub mod config;
pub mod station;
pub mod pose;
pub mod gate;

pub use error::{RelayError, Result};
pub use config::{
    BridgeConfig, ConfigError, DbConfig, GateConfig, MotionConfig, NormalizerConfig, RelayConfig,
    ServerConfig, SimulationConfig,
};
pub use station::{MemoryStationStore, MySqlStationStore, Station, StationStore};
pub use pose::{quaternion_from_yaw, yaw_degrees, Heading, Point, Pose, PoseNormalizer, Quaternion};
pub use gate::{GateTransition, LocalizationState, NavigationGate};
