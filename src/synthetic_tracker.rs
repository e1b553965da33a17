//! A stand-in for the landmark detector: a background thread that sends
//! noisy, irregularly timed head poses to an estimator.
//!
//! The head sweeps sinusoidally in yaw, nods at twice that rate in pitch,
//! and every axis gets uniform noise. Frame intervals vary randomly around
//! the nominal period, like a detector whose inference time varies.

use crate::config::SyntheticConfig;
use crate::estimator::TrackerMessage;
use crate::orientation::Euler;
use log::{info, warn};
use rand::prelude::*;
use spin_sleep::SpinSleeper;
use std::f64::consts::PI;
use std::sync::mpsc::{self, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

pub struct SyntheticTracker {
    handle: Option<thread::JoinHandle<u64>>,
    tx: mpsc::Sender<Signal>,
}

enum Signal {
    Noise(f64),
    Rate(f64),
    Stop,
}

/// The noiseless head pose `t` seconds into the motion.
pub fn head_pose(t: f64, config: &SyntheticConfig) -> Euler {
    let phase = 2.0 * PI * t / config.period_s;
    Euler::from_degrees(
        config.pitch_amplitude_deg * (2.0 * phase).sin(),
        config.yaw_amplitude_deg * phase.sin(),
        0.0,
    )
}

/// Row-major rotation matrix of a pose, in the detector's `f32` format.
pub fn rotation_matrix(pose: &Euler) -> [f32; 9] {
    pose.to_quat().to_rotation_matrix().map(|v| v as f32)
}

fn noisy(pose: Euler, noise_deg: f64, rng: &mut impl Rng) -> Euler {
    if noise_deg <= 0.0 {
        return pose;
    }
    let noise = noise_deg.to_radians();
    Euler::new(
        pose.pitch + rng.gen_range(-noise..noise),
        pose.yaw + rng.gen_range(-noise..noise),
        pose.roll + rng.gen_range(-noise..noise),
    )
}

fn frame_interval(rate_hz: f64, jitter: f64, rng: &mut impl Rng) -> Duration {
    let period = 1.0 / rate_hz;
    let spread = if jitter > 0.0 {
        rng.gen_range(-jitter..jitter)
    } else {
        0.0
    };
    Duration::from_secs_f64(period * (1.0 + spread))
}

impl SyntheticTracker {
    /// Starts sending `ProcessFrame` messages to `output`. The thread ends on
    /// [`stop`](Self::stop), on drop, or when `output` hangs up.
    pub fn spawn(output: Sender<TrackerMessage>, config: SyntheticConfig) -> Self {
        let (tx, rx) = mpsc::channel::<Signal>();

        let handle = thread::spawn(move || {
            let mut rng = thread_rng();
            let sleeper = SpinSleeper::default();
            let mut noise_deg = config.noise_deg;
            let mut rate_hz = config.rate_hz;
            let start = Instant::now();
            let mut sent = 0;

            loop {
                match rx.try_recv() {
                    Ok(Signal::Noise(new_noise)) => noise_deg = new_noise,
                    Ok(Signal::Rate(new_rate)) => rate_hz = new_rate,
                    Ok(Signal::Stop) | Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) => {}
                }

                let t = start.elapsed().as_secs_f64();
                let pose = noisy(head_pose(t, &config), noise_deg, &mut rng);
                let message = TrackerMessage::ProcessFrame {
                    rotation: rotation_matrix(&pose),
                    timestamp_ms: t * 1000.0,
                };
                if output.send(message).is_err() {
                    break;
                }
                sent += 1;

                sleeper.sleep(frame_interval(rate_hz, config.jitter, &mut rng));
            }

            info!("Synthetic tracker : sent {sent} frames.");
            sent
        });

        SyntheticTracker {
            handle: Some(handle),
            tx,
        }
    }

    /// Changes the angular noise, in degrees.
    pub fn set_noise(&self, noise_deg: f64) {
        self.signal(Signal::Noise(noise_deg));
    }

    pub fn set_rate(&self, rate_hz: f64) {
        if rate_hz.is_finite() && rate_hz > 0.0 {
            self.signal(Signal::Rate(rate_hz));
        } else {
            warn!("Ignoring synthetic frame rate {rate_hz}");
        }
    }

    /// Stops the thread and returns how many frames it sent.
    pub fn stop(&mut self) -> u64 {
        self.signal(Signal::Stop);
        match self.handle.take().map(thread::JoinHandle::join) {
            Some(Ok(sent)) => sent,
            Some(Err(_)) => {
                warn!("Synthetic tracker thread panicked.");
                0
            }
            None => 0,
        }
    }

    fn signal(&self, signal: Signal) {
        // The thread only goes away after a stop or a hung-up estimator.
        let _ = self.tx.send(signal);
    }
}

impl Drop for SyntheticTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quat::Quat;

    #[test]
    fn pose_follows_the_sweep() {
        let config = SyntheticConfig::default();
        let quarter = head_pose(config.period_s / 4.0, &config);
        assert!((quarter.yaw.to_degrees() - config.yaw_amplitude_deg).abs() < 1e-9);
        assert!(quarter.pitch.abs() < 1e-9);

        let rest = head_pose(0.0, &config);
        assert_eq!(rest, Euler::default());
    }

    #[test]
    fn matrix_round_trips_through_quaternion() {
        let pose = Euler::from_degrees(5.0, 30.0, 0.0);
        let m = rotation_matrix(&pose).map(f64::from);
        let back = Euler::from_quat(Quat::from_rotation_matrix(&m));
        assert!((back.yaw - pose.yaw).abs() < 1e-5);
        assert!((back.pitch - pose.pitch).abs() < 1e-5);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let interval = frame_interval(30.0, 0.2, &mut rng).as_secs_f64();
            assert!(interval >= 0.8 / 30.0 - 1e-12);
            assert!(interval <= 1.2 / 30.0 + 1e-12);
        }
    }

    #[test]
    fn noise_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(11);
        let pose = Euler::from_degrees(0.0, 10.0, 0.0);
        for _ in 0..200 {
            let n = noisy(pose, 0.5, &mut rng);
            assert!((n.yaw - pose.yaw).abs() <= 0.5_f64.to_radians());
        }
        assert_eq!(noisy(pose, 0.0, &mut rng), pose);
    }

    #[test]
    fn rate_change_shortens_frame_spacing() {
        let (tx, rx) = mpsc::channel();
        let config = SyntheticConfig {
            rate_hz: 10.0,
            jitter: 0.0,
            noise_deg: 0.0,
            ..Default::default()
        };
        let mut tracker = SyntheticTracker::spawn(tx, config);
        tracker.set_rate(f64::NAN);
        tracker.set_rate(500.0);

        let timestamps: Vec<f64> = rx
            .iter()
            .take(12)
            .map(|message| match message {
                TrackerMessage::ProcessFrame { timestamp_ms, .. } => timestamp_ms,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        tracker.stop();

        // The first interval may still run at the old rate.
        let spacing = (timestamps[11] - timestamps[2]) / 9.0;
        assert!(spacing < 20.0, "mean spacing {spacing:.2} ms");
        assert!(spacing > 0.5, "mean spacing {spacing:.2} ms");
    }

    #[test]
    fn sends_frames_until_stopped() {
        let (tx, rx) = mpsc::channel();
        let config = SyntheticConfig {
            rate_hz: 200.0,
            ..Default::default()
        };
        let mut tracker = SyntheticTracker::spawn(tx, config);
        tracker.set_noise(0.0);

        let mut last = f64::NEG_INFINITY;
        for _ in 0..5 {
            match rx.recv().unwrap() {
                TrackerMessage::ProcessFrame { timestamp_ms, .. } => {
                    assert!(timestamp_ms >= last);
                    last = timestamp_ms;
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        let sent = tracker.stop();
        assert!(sent >= 5);
    }

    #[test]
    fn ends_when_receiver_hangs_up() {
        let (tx, rx) = mpsc::channel();
        let mut tracker = SyntheticTracker::spawn(tx, SyntheticConfig::default());
        drop(rx);
        // At most the frame that raced the hang-up got through.
        assert!(tracker.stop() <= 1);
    }
}
