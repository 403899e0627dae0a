//! Station store
//!
//! Stations are pre-taught waypoints maintained by external tooling. The
//! relay only reads them, and every lookup goes back to the store so edits
//! made while the relay is running are picked up on the next command.

use crate::config::DbConfig;
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{OptsBuilder, Pool};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A taught waypoint, serialized with its storage column names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    #[serde(rename = "station_order")]
    pub order: i64,
    #[serde(rename = "station_x")]
    pub x: f64,
    #[serde(rename = "station_y")]
    pub y: f64,
    #[serde(rename = "station_z")]
    pub z: f64,
    #[serde(rename = "station_w")]
    pub w: f64,
}

impl Station {
    pub fn new(order: i64, x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { order, x, y, z, w }
    }
}

type StationRow = (i64, f64, f64, f64, f64);

impl From<StationRow> for Station {
    fn from((order, x, y, z, w): StationRow) -> Self {
        Self { order, x, y, z, w }
    }
}

/// Read-only access to the station table
#[async_trait]
pub trait StationStore: Send + Sync {
    /// All stations ordered by `order` ascending
    async fn list_stations(&self) -> Result<Vec<Station>>;

    /// The station with the given order, `StationNotFound` if absent
    async fn get_station(&self, index: i64) -> Result<Station>;
}

/// Station store backed by the MySQL table the teaching tools write to
pub struct MySqlStationStore {
    pool: Pool,
    list_query: String,
    get_query: String,
}

impl MySqlStationStore {
    /// Create a store. Connections are opened lazily on first query.
    pub fn new(config: &DbConfig) -> Self {
        let opts = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .db_name(Some(config.database.clone()));

        let columns = "station_order, station_x, station_y, station_z, station_w";
        info!(
            "Station store: mysql://{}@{}:{}/{} table {}",
            config.user, config.host, config.port, config.database, config.table
        );

        Self {
            pool: Pool::new(opts),
            list_query: format!("SELECT {} FROM {} ORDER BY station_order", columns, config.table),
            get_query: format!("SELECT {} FROM {} WHERE station_order = ?", columns, config.table),
        }
    }

    /// Close the connection pool
    pub async fn disconnect(self) -> Result<()> {
        self.pool.disconnect().await?;
        Ok(())
    }
}

#[async_trait]
impl StationStore for MySqlStationStore {
    async fn list_stations(&self) -> Result<Vec<Station>> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<StationRow> = conn.query(self.list_query.as_str()).await?;
        debug!("Fetched {} stations", rows.len());
        Ok(rows.into_iter().map(Station::from).collect())
    }

    async fn get_station(&self, index: i64) -> Result<Station> {
        let mut conn = self.pool.get_conn().await?;
        let row: Option<StationRow> = conn.exec_first(self.get_query.as_str(), (index,)).await?;
        row.map(Station::from).ok_or(RelayError::StationNotFound(index))
    }
}

#[derive(Debug, Deserialize)]
struct StationFile {
    stations: Vec<Station>,
}

/// In-process station store for offline runs and tests
#[derive(Debug, Default)]
pub struct MemoryStationStore {
    stations: RwLock<Vec<Station>>,
}

impl MemoryStationStore {
    pub fn new(stations: Vec<Station>) -> Self {
        Self {
            stations: RwLock::new(stations),
        }
    }

    /// Load stations from a JSON or TOML file with a top-level `stations` array
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: StationFile = if content.trim_start().starts_with('{') {
            serde_json::from_str(&content).map_err(|e| RelayError::Config(format!("{}: {}", path, e)))?
        } else {
            toml::from_str(&content).map_err(|e| RelayError::Config(format!("{}: {}", path, e)))?
        };
        info!("Loaded {} stations from {}", file.stations.len(), path);
        Ok(Self::new(file.stations))
    }

    /// Insert or replace a station
    pub fn upsert(&self, station: Station) {
        let mut stations = self.stations.write();
        stations.retain(|s| s.order != station.order);
        stations.push(station);
    }
}

#[async_trait]
impl StationStore for MemoryStationStore {
    async fn list_stations(&self) -> Result<Vec<Station>> {
        let mut stations = self.stations.read().clone();
        stations.sort_by_key(|s| s.order);
        Ok(stations)
    }

    async fn get_station(&self, index: i64) -> Result<Station> {
        self.stations
            .read()
            .iter()
            .find(|s| s.order == index)
            .cloned()
            .ok_or(RelayError::StationNotFound(index))
    }
}
