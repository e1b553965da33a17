//! Command line front end: runs tracking sessions from synthetic, recorded,
//! or live input and renders head-tracked ambisonic audio.

use ambitrack::{
    args::{CommandTask, RenderCommand, ReplayCommand, SimulateCommand, TrackArgs},
    config::TrackingConfig,
    estimator::{spawn_estimator, EstimatorEvent, TrackerMessage},
    orientation::Euler,
    render::{render_blocks, SoundFieldRenderer},
    replay::forward_lines,
    staleness::{Freshness, StalenessWatchdog},
    synthetic_tracker::SyntheticTracker,
    transport::{orientation_channel, OrientationSubscriber, Slot},
    wav::{encode_mono_foa, read_foa, test_tone, write_foa},
};
use clap::Parser;
use log::{info, warn};
use serial2::SerialPort;
use std::{
    error::Error,
    fs::File,
    io::{self, BufReader},
    sync::mpsc::{Receiver, Sender},
    thread::{self, sleep, JoinHandle},
    time::{Duration, Instant},
};

// Example:
// cargo run --bin ambitrack -- --config tracking.ron simulate --seconds 10
// cargo run --bin ambitrack -- replay --input session.htrk --realtime
// cargo run --bin ambitrack -- render --out rotated.wav --seconds 4

/// What the estimator reported over a session.
#[derive(Debug, Default)]
struct EventSummary {
    published: u64,
    dropped: u64,
}

/// Consumes estimator events on a thread of their own so the channel never
/// backs up; the summary comes back when the estimator ends.
fn drain_events(events: Receiver<EstimatorEvent>) -> JoinHandle<EventSummary> {
    thread::spawn(move || {
        let mut summary = EventSummary::default();
        for event in events {
            match event {
                EstimatorEvent::Published { .. } => summary.published += 1,
                EstimatorEvent::Dropped(reason) => {
                    summary.dropped += 1;
                    if summary.dropped == 1 {
                        warn!("First dropped frame: {reason:?}");
                    }
                }
                _ => {}
            }
        }
        summary
    })
}

/// An estimator thread that already owns a shared block and is tracking.
struct Session {
    tx: Sender<TrackerMessage>,
    subscriber: OrientationSubscriber,
    estimator: JoinHandle<()>,
    events: JoinHandle<EventSummary>,
}

impl Session {
    fn start(config: &TrackingConfig) -> Result<Self, Box<dyn Error>> {
        let (publisher, subscriber) = orientation_channel();
        let (tx, events, estimator) = spawn_estimator(config);
        tx.send(TrackerMessage::Init(publisher))?;
        tx.send(TrackerMessage::StartTracking)?;

        Ok(Session {
            tx,
            subscriber,
            estimator,
            events: drain_events(events),
        })
    }

    fn finish(self) -> Result<EventSummary, Box<dyn Error>> {
        drop(self.tx);
        self.estimator
            .join()
            .map_err(|_| "estimator thread panicked")?;
        let summary = self
            .events
            .join()
            .map_err(|_| "event thread panicked")?;
        info!(
            "Session over: {} frames published, {} dropped.",
            summary.published, summary.dropped
        );
        Ok(summary)
    }
}

fn simulate(config: &TrackingConfig, command: SimulateCommand) -> Result<(), Box<dyn Error>> {
    let session = Session::start(config)?;
    let mut tracker = SyntheticTracker::spawn(session.tx.clone(), config.synthetic);

    let mut reader = session.subscriber.reader();
    let mut watchdog = StalenessWatchdog::new(config.stale_after());
    let deadline = Instant::now() + Duration::from_secs_f64(command.seconds.max(0.0));

    while Instant::now() < deadline {
        sleep(Duration::from_millis(500));
        reader.poll();
        match watchdog.observe(reader.last_sequence(), Instant::now()) {
            Freshness::Waiting => info!("Waiting for the first frame."),
            Freshness::Stale { since } => warn!("No frame for {since:?}."),
            Freshness::Fresh => {
                let frame = reader.frame();
                let raw = Euler::from_quat(frame.quat(Slot::Raw));
                let predicted = Euler::from_quat(frame.quat(Slot::Predicted));
                info!(
                    "#{}: raw yaw {:7.2}° pitch {:6.2}°, predicted yaw {:7.2}° pitch {:6.2}°",
                    reader.last_sequence(),
                    raw.yaw.to_degrees(),
                    raw.pitch.to_degrees(),
                    predicted.yaw.to_degrees(),
                    predicted.pitch.to_degrees(),
                );
            }
        }
    }

    let sent = tracker.stop();
    let summary = session.finish()?;
    println!(
        "{} synthetic frames, {} published, {} dropped",
        sent, summary.published, summary.dropped
    );
    Ok(())
}

fn replay(config: &TrackingConfig, command: ReplayCommand) -> Result<(), Box<dyn Error>> {
    let session = Session::start(config)?;

    let stats = match &command.device {
        Some(device) => {
            // Try to open the requested port and set its read timeout to
            // infinity, so that a quiet tracker is not an error.
            let mut port = SerialPort::open(device.as_str(), command.baud)?;
            port.set_read_timeout(Duration::MAX)?;
            info!("Reading tracker lines from {device} at {} baud.", command.baud);
            forward_lines(BufReader::new(port), &session.tx, false)?
        }
        None if command.input == "-" => {
            forward_lines(io::stdin().lock(), &session.tx, command.realtime)?
        }
        None => {
            let file = File::open(&command.input)?;
            forward_lines(BufReader::new(file), &session.tx, command.realtime)?
        }
    };

    let subscriber = session.subscriber.clone();
    let summary = session.finish()?;
    let sequence = subscriber.sequence();
    println!(
        "{} lines forwarded, {} skipped, {} malformed; {} frames published, last sequence {}",
        stats.forwarded, stats.skipped, stats.malformed, summary.published, sequence
    );
    Ok(())
}

fn render(config: &TrackingConfig, command: RenderCommand) -> Result<(), Box<dyn Error>> {
    let mut render_config = config.render;
    let mut frames = match &command.infile {
        Some(path) => {
            let (frames, sample_rate) = read_foa(path)?;
            render_config.sample_rate = sample_rate;
            frames
        }
        None => {
            let tone = test_tone(440.0, command.seconds, render_config.sample_rate);
            encode_mono_foa(&tone, 0.0, 0.0)
        }
    };
    info!(
        "Rendering {} frames at {} Hz in blocks of {}.",
        frames.len(),
        render_config.sample_rate,
        render_config.block_size
    );

    let session = Session::start(config)?;
    let mut tracker = SyntheticTracker::spawn(session.tx.clone(), config.synthetic);

    let mut renderer = SoundFieldRenderer::new(
        session.subscriber.reader(),
        render_config.audio_source,
        config.stale_after(),
    );
    render_blocks(&mut renderer, &mut frames, &render_config, true);

    tracker.stop();
    session.finish()?;

    write_foa(&command.outfile, &frames, render_config.sample_rate)?;
    println!("Wrote {}", command.outfile.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = TrackArgs::parse();

    let config = match &args.config {
        Some(path) => TrackingConfig::from_path(path)?,
        None => TrackingConfig::default(),
    };

    match args.command {
        CommandTask::Simulate(command) => simulate(&config, command),
        CommandTask::Replay(command) => replay(&config, command),
        CommandTask::Render(command) => render(&config, command),
        CommandTask::Devices => {
            let available_ports = SerialPort::available_ports()?;
            println!("Available devices:");
            for port in available_ports {
                println!("\t{}", port.to_string_lossy());
            }
            Ok(())
        }
        CommandTask::DumpConfig => {
            println!("{}", config.to_ron_string()?);
            Ok(())
        }
    }
}
