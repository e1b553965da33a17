//! The estimation loop.
//!
//! An [`Estimator`] owns the orientation filter and the write side of the
//! shared block. It is driven by [`TrackerMessage`]s from whatever delivers
//! measurements (a detector, a replayed recording, the synthetic tracker)
//! and reports what it did with each message as an [`EstimatorEvent`].
//! Run it on its own thread with [`spawn_estimator`].

use crate::component::{run_component, Component, ComponentError};
use crate::config::{PredictorKind, TrackingConfig};
use crate::eskf::{Eskf, TuningParams};
use crate::orientation::calculate_audio_orientation;
use crate::quat::Quat;
use crate::quat_predictor::QuatPredictor;
use crate::transport::{OrientationPublisher, OrientationUpdate};
use log::{debug, info, warn};
use std::fmt;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::JoinHandle;

/// Publishes logged at debug level after every (re)initialization.
const LOGGED_PUBLISHES: u64 = 3;

/// Everything the estimation loop can be told.
pub enum TrackerMessage {
    /// Hands over the write side of the shared block.
    Init(OrientationPublisher),
    StartTracking,
    /// Stops processing frames. All filter state is kept.
    StopTracking,
    /// One measurement: a row-major rotation matrix and its capture time.
    ProcessFrame {
        rotation: [f32; 9],
        timestamp_ms: f64,
    },
    UpdateParams(TuningParams),
    /// Publishes a user-chosen orientation to the manual slots.
    SetManualOrientation(Quat),
}

impl fmt::Debug for TrackerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerMessage::Init(_) => write!(f, "Init"),
            TrackerMessage::StartTracking => write!(f, "StartTracking"),
            TrackerMessage::StopTracking => write!(f, "StopTracking"),
            TrackerMessage::ProcessFrame {
                rotation,
                timestamp_ms,
            } => f
                .debug_struct("ProcessFrame")
                .field("rotation", rotation)
                .field("timestamp_ms", timestamp_ms)
                .finish(),
            TrackerMessage::UpdateParams(params) => {
                f.debug_tuple("UpdateParams").field(params).finish()
            }
            TrackerMessage::SetManualOrientation(q) => {
                f.debug_tuple("SetManualOrientation").field(q).finish()
            }
        }
    }
}

/// Why a frame was not published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No shared block has been handed over yet.
    NotInitialized,
    /// Tracking is stopped.
    NotTracking,
    /// The rotation matrix holds NaN or infinite values.
    InvalidFrame,
}

/// The outcome of one [`TrackerMessage`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EstimatorEvent {
    Ready,
    TrackingStarted,
    TrackingStopped,
    Published {
        sequence: i32,
        raw: Quat,
        predicted: Quat,
    },
    /// Manual and audio-manual slots were published.
    ManualPublished { sequence: i32 },
    Dropped(DropReason),
    ParamsUpdated,
}

/// The filter behind the published prediction.
#[derive(Debug, Clone)]
pub enum Predictor {
    Eskf(Eskf),
    OneEuro(QuatPredictor),
}

impl Predictor {
    pub fn from_config(config: &TrackingConfig) -> Self {
        match config.predictor {
            PredictorKind::Eskf => Predictor::Eskf(Eskf::new(config.eskf)),
            PredictorKind::OneEuro => Predictor::OneEuro(QuatPredictor::new(config.one_euro)),
        }
    }

    fn reset(&mut self) {
        match self {
            Predictor::Eskf(eskf) => eskf.reset(),
            Predictor::OneEuro(predictor) => predictor.reset(),
        }
    }
}

pub struct Estimator {
    predictor: Predictor,
    publisher: Option<OrientationPublisher>,
    tracking: bool,
    max_frame_gap: f64,
    last_timestamp: Option<f64>,
    last_predicted: Quat,
    published: u64,
    uninitialized_frames: u64,
}

impl Estimator {
    pub fn new(config: &TrackingConfig) -> Self {
        Self {
            predictor: Predictor::from_config(config),
            publisher: None,
            tracking: false,
            max_frame_gap: config.max_frame_gap_s,
            last_timestamp: None,
            last_predicted: Quat::IDENTITY,
            published: 0,
            uninitialized_frames: 0,
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    pub fn predictor(&self) -> &Predictor {
        &self.predictor
    }

    /// The current forward prediction, for consumers that share the
    /// estimator's thread instead of reading the shared block.
    pub fn predicted(&self) -> Quat {
        match &self.predictor {
            Predictor::Eskf(eskf) => eskf.predicted(),
            Predictor::OneEuro(_) => self.last_predicted,
        }
    }

    fn init(&mut self, publisher: OrientationPublisher) -> EstimatorEvent {
        if self.publisher.is_some() {
            warn!("{self} : replacing the shared block.");
        }
        self.publisher = Some(publisher);
        self.predictor.reset();
        self.last_timestamp = None;
        self.last_predicted = Quat::IDENTITY;
        self.published = 0;
        info!("{self} : initialized.");
        EstimatorEvent::Ready
    }

    fn process_frame(&mut self, rotation: [f32; 9], timestamp_ms: f64) -> EstimatorEvent {
        if self.publisher.is_none() {
            self.uninitialized_frames += 1;
            return EstimatorEvent::Dropped(DropReason::NotInitialized);
        }
        if !self.tracking {
            return EstimatorEvent::Dropped(DropReason::NotTracking);
        }
        if !timestamp_ms.is_finite() || rotation.iter().any(|v| !v.is_finite()) {
            warn!("{self} : dropping frame with non-finite values.");
            return EstimatorEvent::Dropped(DropReason::InvalidFrame);
        }

        let matrix = rotation.map(f64::from);
        let raw = Quat::from_rotation_matrix(&matrix);
        let timestamp = timestamp_ms / 1000.0;
        let dt = self.last_timestamp.map(|last| timestamp - last);
        // Late frames are still corrected but never move the clock back.
        if dt.map_or(true, |dt| dt > 0.0) {
            self.last_timestamp = Some(timestamp);
        }

        let predicted = match &mut self.predictor {
            Predictor::Eskf(eskf) => {
                match dt {
                    Some(dt) if dt > 0.0 && dt < self.max_frame_gap => eskf.predict(dt),
                    Some(dt) if dt >= self.max_frame_gap => {
                        warn!("Frame gap of {dt:.3} s, skipping predict.")
                    }
                    _ => {}
                }
                eskf.correct(raw);
                eskf.predicted()
            }
            Predictor::OneEuro(predictor) => predictor.update(raw, timestamp),
        };
        self.last_predicted = predicted;

        let update = OrientationUpdate {
            raw: Some(raw),
            predicted: Some(predicted),
            audio_tracked: Some(calculate_audio_orientation(predicted)),
            ..Default::default()
        };
        let Some(publisher) = self.publisher.as_mut() else {
            return EstimatorEvent::Dropped(DropReason::NotInitialized);
        };
        let sequence = publisher.publish(&update);

        self.published += 1;
        if self.published <= LOGGED_PUBLISHES {
            debug!("Published #{sequence}: raw {raw:?}, predicted {predicted:?}");
        }

        EstimatorEvent::Published {
            sequence,
            raw,
            predicted,
        }
    }

    fn update_params(&mut self, params: TuningParams) -> EstimatorEvent {
        match &mut self.predictor {
            Predictor::Eskf(eskf) => eskf.set_params(&params),
            Predictor::OneEuro(predictor) => match params.tau {
                Some(tau) if tau.is_finite() && tau >= 0.0 => {
                    predictor.set_prediction_horizon(tau)
                }
                Some(tau) => warn!("Ignoring prediction horizon {tau}"),
                None => {}
            },
        }
        info!("{self} : parameters updated {params:?}.");
        EstimatorEvent::ParamsUpdated
    }

    fn set_manual(&mut self, q: Quat) -> EstimatorEvent {
        let Some(publisher) = self.publisher.as_mut() else {
            return EstimatorEvent::Dropped(DropReason::NotInitialized);
        };
        let manual = q.normalize();
        let sequence = publisher.publish(&OrientationUpdate {
            manual: Some(manual),
            audio_manual: Some(calculate_audio_orientation(manual)),
            ..Default::default()
        });
        EstimatorEvent::ManualPublished { sequence }
    }
}

impl fmt::Display for Estimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.predictor {
            Predictor::Eskf(_) => write!(f, "Estimator(ESKF)"),
            Predictor::OneEuro(_) => write!(f, "Estimator(1€)"),
        }
    }
}

impl Component for Estimator {
    type InData = TrackerMessage;
    type OutData = EstimatorEvent;

    fn convert(&mut self, input: TrackerMessage) -> EstimatorEvent {
        match input {
            TrackerMessage::Init(publisher) => self.init(publisher),
            TrackerMessage::StartTracking => {
                self.tracking = true;
                info!("{self} : tracking started.");
                EstimatorEvent::TrackingStarted
            }
            TrackerMessage::StopTracking => {
                self.tracking = false;
                info!("{self} : tracking stopped.");
                EstimatorEvent::TrackingStopped
            }
            TrackerMessage::ProcessFrame {
                rotation,
                timestamp_ms,
            } => self.process_frame(rotation, timestamp_ms),
            TrackerMessage::UpdateParams(params) => self.update_params(params),
            TrackerMessage::SetManualOrientation(q) => self.set_manual(q),
        }
    }

    fn finalize(&mut self) -> Result<(), ComponentError> {
        if self.publisher.is_none() && self.uninitialized_frames > 0 {
            return Err(ComponentError::NeverInitialized {
                dropped_frames: self.uninitialized_frames,
            });
        }
        Ok(())
    }
}

/// Starts an [`Estimator`] on its own thread. Dropping every clone of the
/// returned sender ends the thread.
pub fn spawn_estimator(
    config: &TrackingConfig,
) -> (
    Sender<TrackerMessage>,
    Receiver<EstimatorEvent>,
    JoinHandle<()>,
) {
    let (message_tx, message_rx) = channel();
    let (event_tx, event_rx) = channel();
    let handle = run_component(Estimator::new(config), message_rx, event_tx);
    (message_tx, event_rx, handle)
}
