//! presim - presence simulation dry run
//!
//! Replays a recorded history fixture against an in-memory registry and logs
//! every service call that would reach the live system.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use presence_sim::dispatch::{RecordingExecutor, ServiceDispatcher};
use presence_sim::entity::parse_many;
use presence_sim::storage::InMemoryStores;
use presence_sim::{CallOverrides, Clock, SimulationConfig, SimulationController, SystemClock};

#[derive(Debug, Parser)]
#[command(name = "presim", version, about = "Replay recorded device history to simulate presence")]
struct Cli {
    /// TOML config file (`entities`, `delta`, `interval`)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON fixture with known entities, groups and recorded history
    #[arg(short, long)]
    fixture: PathBuf,

    /// Replay these entities instead of the configured ones (repeatable)
    #[arg(short, long = "entity")]
    entities: Vec<String>,

    /// Replay window in days, overriding the config
    #[arg(short, long)]
    delta: Option<u32>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    run_for: Option<u64>,
}

impl Cli {
    fn overrides(&self) -> Option<CallOverrides> {
        if self.entities.is_empty() && self.delta.is_none() {
            return None;
        }
        let entities = if self.entities.is_empty() {
            None
        } else {
            let (ids, rejected) = parse_many(&self.entities);
            for err in rejected {
                warn!(error = %err, "ignoring entity");
            }
            Some(ids)
        };
        Some(CallOverrides {
            entities,
            delta: self.delta,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SimulationConfig::from_path(path)?,
        None => SimulationConfig::default(),
    };
    let overrides = cli.overrides();

    let stores = InMemoryStores::from_json(&std::fs::read_to_string(&cli.fixture)?)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let recorder = RecordingExecutor::new(clock.clone());

    let controller = SimulationController::builder(config)
        .registry(Arc::new(stores.registry))
        .history(Arc::new(stores.history))
        .dispatcher(Arc::new(ServiceDispatcher::new(recorder.clone())))
        .clock(clock)
        .build()?;

    let outcome = controller.start(overrides.as_ref()).await?;
    info!(?outcome, "press Ctrl+C to stop");

    match cli.run_for {
        Some(secs) => {
            tokio::select! {
                _ = signal::ctrl_c() => {}
                () = tokio::time::sleep(Duration::from_secs(secs)) => {}
            }
        }
        None => signal::ctrl_c().await?,
    }

    let status = controller.status();
    controller.shutdown().await;
    info!(calls = recorder.calls().len(), "shut down");

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
