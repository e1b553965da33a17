mod gui;

use ambitrack::{
    config::{PredictorKind, TrackingConfig},
    estimator::{spawn_estimator, TrackerMessage},
    staleness::StalenessWatchdog,
    synthetic_tracker::SyntheticTracker,
    transport::orientation_channel,
};
use clap::Parser;
use gui::engage_gui;
use std::{error::Error, path::PathBuf};

/// Live chart of what the estimator publishes for a synthetic head
#[derive(Debug, Parser)]
#[clap(version, about)]
struct MonitorArgs {
    /// RON file with tracking configuration
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = MonitorArgs::parse();
    let config = match &args.config {
        Some(path) => TrackingConfig::from_path(path)?,
        None => TrackingConfig::default(),
    };

    let (publisher, subscriber) = orientation_channel();
    let (tx, _events, estimator) = spawn_estimator(&config);
    tx.send(TrackerMessage::Init(publisher))?;
    tx.send(TrackerMessage::StartTracking)?;

    let mut tracker = SyntheticTracker::spawn(tx.clone(), config.synthetic);

    let tau = match config.predictor {
        PredictorKind::Eskf => config.eskf.prediction_horizon,
        PredictorKind::OneEuro => config.one_euro.prediction_horizon,
    };
    let result = engage_gui(
        subscriber.reader(),
        StalenessWatchdog::new(config.stale_after()),
        tx,
        tau,
    );

    tracker.stop();
    let _ = estimator.join();
    result
}
