//! CLI entrypoint (spec §0.4), analogous in shape to `bambam/src/main.rs`:
//! parse args with `clap`, initialise logging, load configuration, and run
//! either a single device or the full dispatcher.
//!
//! The store wired in here is the in-memory reference implementation
//! (`legtrace::store::mock`); a deployment swaps in a real `SampleStore` /
//! `TransitStore` / `TripWriter` backed by its own database, which is an
//! external collaborator out of scope for this crate (spec §1).

use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Parser;

use legtrace::config::PipelineConfig;
use legtrace::error::PipelineError;
use legtrace::model::TimeWindow;
use legtrace::store::mock::{FixedDeviceList, InMemoryStore};
use legtrace::{dispatcher, pipeline};

#[derive(Parser, Debug)]
#[command(name = "legtrace", about = "Trip and leg segmentation over device geolocation samples")]
struct Args {
    /// path to a TOML config file; falls back to built-in defaults when omitted.
    #[arg(long)]
    config: Option<String>,

    /// run a single device by id instead of discovering all devices with new samples.
    #[arg(long)]
    device: Option<String>,

    /// RFC3339 start of the processing window.
    #[arg(long)]
    start: DateTime<Utc>,

    /// RFC3339 end of the processing window.
    #[arg(long)]
    end: DateTime<Utc>,

    /// treat the device as owning a car, tightening transit-match acceptance (spec §4.5 step 4).
    #[arg(long, default_value_t = false)]
    user_has_car: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match PipelineConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("{e}");
                return ExitCode::FAILURE;
            }
        },
        None => PipelineConfig::default(),
    };

    let window = TimeWindow::new(args.start, args.end);
    let store = Arc::new(InMemoryStore::new());

    let aborted = match &args.device {
        Some(device_id) => run_single_device(store.as_ref(), device_id, window, &config, args.user_has_car).await,
        None => {
            let discovery = FixedDeviceList(Vec::new());
            dispatcher::dispatch(&discovery, store, args.start, window, Arc::new(config), move |_| args.user_has_car).await
        }
    };

    match aborted {
        Ok(0) => ExitCode::SUCCESS,
        Ok(n) => {
            log::error!("{n} device(s) aborted");
            ExitCode::FAILURE
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_single_device(
    store: &InMemoryStore,
    device_id: &str,
    window: TimeWindow,
    config: &PipelineConfig,
    user_has_car: bool,
) -> Result<usize, PipelineError> {
    match pipeline::run_device(store, device_id, window, config, user_has_car).await {
        Ok(()) => Ok(0),
        Err(PipelineError::NoData { device_id, start, end }) => {
            log::info!("device {device_id}: no samples in [{start}, {end}]");
            Ok(0)
        }
        Err(e) if e.aborts_device() => Err(e),
        Err(e) => {
            log::error!("{e}");
            Ok(0)
        }
    }
}
