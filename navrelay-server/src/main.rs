// navrelay-server
// Relays operator console commands to a ROS robot over rosbridge

use anyhow::Context;
use clap::Parser;
use navrelay_bridge::{BridgeEventHandler, RobotLink, RosBridgeClient, SimulatedRobot};
use navrelay_core::{MemoryStationStore, MySqlStationStore, RelayConfig, Station, StationStore};
use navrelay_server::{CommandServer, RelaySession};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "navrelay-server")]
#[command(about = "Relay operator console commands to a ROS navigation stack", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML or JSON)
    #[arg(long, short)]
    config: Option<String>,

    /// TCP port for operator consoles
    #[arg(long, short)]
    port: Option<u16>,

    /// rosbridge websocket URL
    #[arg(long)]
    bridge_url: Option<String>,

    /// Run against a simulated robot instead of rosbridge
    #[arg(long)]
    simulate: bool,

    /// Station file for the in-memory store (JSON or TOML)
    #[arg(long)]
    stations: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(cli: &Cli) -> anyhow::Result<RelayConfig> {
    let mut config = match &cli.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };
    config.apply_env()?;

    if let Some(port) = cli.port {
        config.server.listen_port = port;
    }
    if let Some(url) = &cli.bridge_url {
        config.bridge.url = url.clone();
    }
    if cli.simulate {
        config.simulation.enabled = true;
    }
    if let Some(path) = &cli.stations {
        config.simulation.stations_file = Some(path.clone());
    }

    config.validate()?;
    Ok(config)
}

/// Stations served in simulation mode when no station file is given
fn demo_stations() -> Vec<Station> {
    vec![
        Station::new(0, 0.0, 0.0, 0.0, 1.0),
        Station::new(1, 2.0, 0.5, 0.7071, 0.7071),
        Station::new(2, 4.0, 1.0, 1.0, 0.0),
        Station::new(3, 1.5, -2.0, -0.7071, 0.7071),
    ]
}

fn build_store(config: &RelayConfig) -> anyhow::Result<Arc<dyn StationStore>> {
    if let Some(path) = &config.simulation.stations_file {
        let store = MemoryStationStore::from_file(path).with_context(|| format!("loading stations from {}", path))?;
        return Ok(Arc::new(store));
    }
    if config.simulation.enabled {
        info!("Using built-in demo stations");
        return Ok(Arc::new(MemoryStationStore::new(demo_stations())));
    }
    info!(
        "Using MySQL station store at {}:{}/{}",
        config.db.host, config.db.port, config.db.database
    );
    Ok(Arc::new(MySqlStationStore::new(&config.db)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let config = load_config(&cli)?;
    info!("Starting navrelay-server");

    let store = build_store(&config)?;
    let interval = config.motion.rotate_publish_interval();

    let (session, bridge_task) = if config.simulation.enabled {
        info!("Simulation mode: no rosbridge connection");
        let robot = Arc::new(SimulatedRobot::new(Some(config.simulation.arrival_delay())).with_rotate_interval(interval));
        let link: Arc<dyn RobotLink> = robot.clone();
        let session = Arc::new(RelaySession::new(&config, store, link));
        let task = robot.spawn(session.clone() as Arc<dyn BridgeEventHandler>);
        (session, task)
    } else {
        let client = Arc::new(
            RosBridgeClient::new(config.bridge.clone())
                .with_context(|| format!("invalid bridge url {}", config.bridge.url))?
                .with_rotate_interval(interval),
        );
        let link: Arc<dyn RobotLink> = client.clone();
        let session = Arc::new(RelaySession::new(&config, store, link));
        let task = client.spawn(session.clone() as Arc<dyn BridgeEventHandler>);
        (session, task)
    };

    let server = CommandServer::bind(session, config.server.clone()).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Command server stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    bridge_task.abort();
    info!("navrelay-server stopped");
    Ok(())
}
