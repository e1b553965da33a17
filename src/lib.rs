//! AmbiTrack turns a stream of noisy head orientation measurements into a
//! smoothed, forward-predicted orientation and hands it to a real-time
//! ambisonic renderer without the audio thread ever waiting on the tracker.
//!
//! Measurements (rotation matrices with timestamps, from a face landmark
//! detector, a recording, or the [synthetic tracker](synthetic_tracker)) go
//! to the [estimator], which runs an [error-state Kalman filter](eskf) or a
//! [1€ based predictor](quat_predictor) on its own thread. Every processed
//! frame is published through a lock-free [shared block](transport) that
//! the [renderer](render) polls once per audio block to counter-rotate a
//! first-order ambisonic sound field.
//!
//! The binaries are `ambitrack`, which simulates, replays, and renders, and
//! `monitor`, a terminal chart of what the estimator publishes.

pub mod args;
pub mod component;
pub mod config;
pub mod eskf;
pub mod estimator;
pub mod frame_decoder;
pub mod linalg;
pub mod one_euro;
pub mod orientation;
pub mod quat;
pub mod quat_predictor;
pub mod render;
pub mod replay;
pub mod staleness;
pub mod synthetic_tracker;
pub mod transport;
pub mod wav;
