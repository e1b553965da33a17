//! The real-time side: counter-rotating a first-order ambisonic sound field
//! by the published head orientation.
//!
//! Frames are `[W, Y, Z, X]` (ACN order, SN3D normalization). Ambisonic
//! axes are x forward, y left, z up; the tracker's are x right, y up,
//! z back. [`SoundFieldRenderer::process_block`] is what an audio callback
//! calls once per block: it polls the shared block, rebuilds its rotation
//! only when a new orientation arrived, and rotates the block in place.
//! It never blocks, allocates, or logs.

use crate::linalg::Mat3;
use crate::quat::Quat;
use crate::staleness::{Freshness, StalenessWatchdog};
use crate::transport::{OrientationReader, Slot};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use spin_sleep::SpinSleeper;
use std::time::{Duration, Instant};

/// Tracker axes to ambisonic axes, row-major.
const TRACKER_TO_AMBI: Mat3 = [
    0.0, 0.0, -1.0, //
    -1.0, 0.0, 0.0, //
    0.0, 1.0, 0.0,
];

/// Which orientation the sound field follows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioSource {
    /// The predicted head orientation.
    #[default]
    Tracked,
    /// The orientation set from the user interface.
    Manual,
}

impl AudioSource {
    pub fn slot(self) -> Slot {
        match self {
            AudioSource::Tracked => Slot::AudioTracked,
            AudioSource::Manual => Slot::AudioManual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub sample_rate: u32,
    /// Frames per callback.
    pub block_size: usize,
    pub audio_source: AudioSource,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 128,
            audio_source: AudioSource::Tracked,
        }
    }
}

impl RenderConfig {
    pub fn block_period(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / self.sample_rate as f64)
    }
}

fn mat3_mul(a: &Mat3, b: &Mat3) -> Mat3 {
    std::array::from_fn(|i| {
        let (r, c) = (i / 3, i % 3);
        (0..3).map(|k| a[r * 3 + k] * b[k * 3 + c]).sum()
    })
}

fn mat3_transpose(m: &Mat3) -> Mat3 {
    std::array::from_fn(|i| m[(i % 3) * 3 + i / 3])
}

/// The rotation to apply to the `[X, Y, Z]` components of the field so that
/// sources stay put in the world while the head turns by `head`.
pub fn field_rotation(head: Quat) -> [[f32; 3]; 3] {
    let head = head.normalize().to_rotation_matrix();
    let inverse = mat3_transpose(&head);
    let m = mat3_mul(
        &mat3_mul(&TRACKER_TO_AMBI, &inverse),
        &mat3_transpose(&TRACKER_TO_AMBI),
    );
    std::array::from_fn(|r| std::array::from_fn(|c| m[r * 3 + c] as f32))
}

pub struct SoundFieldRenderer {
    reader: OrientationReader,
    source: AudioSource,
    watchdog: StalenessWatchdog,
    rotation: [[f32; 3]; 3],
    freshness: Freshness,
}

impl SoundFieldRenderer {
    pub fn new(reader: OrientationReader, source: AudioSource, stale_after: Duration) -> Self {
        Self {
            reader,
            source,
            watchdog: StalenessWatchdog::new(stale_after),
            rotation: field_rotation(Quat::IDENTITY),
            freshness: Freshness::Waiting,
        }
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    pub fn rotation(&self) -> [[f32; 3]; 3] {
        self.rotation
    }

    /// Rotates one block of FOA frames in place. While the tracker is stale
    /// the last received orientation stays in effect.
    pub fn process_block(&mut self, now: Instant, block: &mut [[f32; 4]]) -> Freshness {
        if self.reader.poll() {
            self.rotation = field_rotation(self.reader.frame().quat(self.source.slot()));
        }
        self.freshness = self.watchdog.observe(self.reader.last_sequence(), now);

        let r = &self.rotation;
        for frame in block.iter_mut() {
            let [w, y, z, x] = *frame;
            let x2 = r[0][0] * x + r[0][1] * y + r[0][2] * z;
            let y2 = r[1][0] * x + r[1][1] * y + r[1][2] * z;
            let z2 = r[2][0] * x + r[2][1] * y + r[2][2] * z;
            *frame = [w, y2, z2, x2];
        }

        self.freshness
    }
}

fn same_state(a: Freshness, b: Freshness) -> bool {
    std::mem::discriminant(&a) == std::mem::discriminant(&b)
}

/// Runs `frames` through the renderer one block at a time. With `paced`,
/// each block waits for its slot in real time, as a sound card would.
/// Changes of tracker freshness are logged here, outside the callback.
pub fn render_blocks(
    renderer: &mut SoundFieldRenderer,
    frames: &mut [[f32; 4]],
    config: &RenderConfig,
    paced: bool,
) {
    let sleeper = SpinSleeper::default();
    let period = config.block_period();
    let start = Instant::now();
    let mut previous = renderer.freshness();

    for (index, block) in frames.chunks_mut(config.block_size.max(1)).enumerate() {
        if paced {
            let due = start + period * index as u32;
            let now = Instant::now();
            if due > now {
                sleeper.sleep(due - now);
            }
        }

        let freshness = renderer.process_block(Instant::now(), block);
        if !same_state(previous, freshness) {
            match freshness {
                Freshness::Fresh => info!("Block {index}: tracking data is fresh."),
                Freshness::Stale { since } => {
                    warn!("Block {index}: no tracking update for {since:?}, holding orientation.")
                }
                Freshness::Waiting => {}
            }
        }
        previous = freshness;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orientation::Euler;
    use crate::transport::{orientation_channel, OrientationUpdate};

    const STALE: Duration = Duration::from_millis(100);

    /// A unit source straight ahead.
    const FRONT: [f32; 4] = [1.0, 0.0, 0.0, 1.0];

    fn assert_frame(actual: [f32; 4], expected: [f32; 4]) {
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "{actual:?} != {expected:?}");
        }
    }

    fn publish_tracked(
        publisher: &mut crate::transport::OrientationPublisher,
        q: Quat,
    ) -> i32 {
        publisher.publish(&OrientationUpdate {
            audio_tracked: Some(q),
            ..Default::default()
        })
    }

    #[test]
    fn identity_leaves_the_field_alone() {
        let (_publisher, subscriber) = orientation_channel();
        let mut renderer = SoundFieldRenderer::new(subscriber.reader(), AudioSource::Tracked, STALE);

        let mut block = [FRONT, [0.5, 0.1, -0.2, 0.3]];
        let freshness = renderer.process_block(Instant::now(), &mut block);
        assert_eq!(freshness, Freshness::Waiting);
        assert_frame(block[0], FRONT);
        assert_frame(block[1], [0.5, 0.1, -0.2, 0.3]);
    }

    #[test]
    fn rotation_changes_only_with_a_new_publish() {
        let (mut publisher, subscriber) = orientation_channel();
        let mut renderer = SoundFieldRenderer::new(subscriber.reader(), AudioSource::Tracked, STALE);
        let identity = field_rotation(Quat::IDENTITY);
        assert_eq!(renderer.rotation(), identity);

        let turned = Euler::from_degrees(0.0, 90.0, 0.0).to_quat();
        publish_tracked(&mut publisher, turned);
        let mut block = [FRONT];
        renderer.process_block(Instant::now(), &mut block);
        assert_eq!(renderer.rotation(), field_rotation(turned));
        assert_ne!(renderer.rotation(), identity);

        renderer.process_block(Instant::now(), &mut block);
        assert_eq!(renderer.rotation(), field_rotation(turned));
    }

    #[test]
    fn turning_left_moves_a_front_source_to_the_right() {
        let (mut publisher, subscriber) = orientation_channel();
        let mut renderer = SoundFieldRenderer::new(subscriber.reader(), AudioSource::Tracked, STALE);
        publish_tracked(&mut publisher, Euler::from_degrees(0.0, 90.0, 0.0).to_quat());

        let mut block = [FRONT];
        assert_eq!(
            renderer.process_block(Instant::now(), &mut block),
            Freshness::Fresh
        );
        assert_frame(block[0], [1.0, -1.0, 0.0, 0.0]);
    }

    #[test]
    fn looking_up_moves_a_front_source_down() {
        let (mut publisher, subscriber) = orientation_channel();
        let mut renderer = SoundFieldRenderer::new(subscriber.reader(), AudioSource::Tracked, STALE);
        publish_tracked(&mut publisher, Euler::from_degrees(90.0, 0.0, 0.0).to_quat());

        let mut block = [FRONT];
        renderer.process_block(Instant::now(), &mut block);
        assert_frame(block[0], [1.0, 0.0, -1.0, 0.0]);
    }

    #[test]
    fn rotation_preserves_energy() {
        let r = field_rotation(Euler::from_degrees(20.0, -70.0, 15.0).to_quat());
        let v = [0.3_f32, -0.5, 0.8];
        let rotated: Vec<f32> = (0..3)
            .map(|i| (0..3).map(|k| r[i][k] * v[k]).sum())
            .collect();
        let before: f32 = v.iter().map(|c| c * c).sum();
        let after: f32 = rotated.iter().map(|c| c * c).sum();
        assert!((before - after).abs() < 1e-5);
    }

    #[test]
    fn follows_the_selected_slot() {
        let (mut publisher, subscriber) = orientation_channel();
        let mut renderer = SoundFieldRenderer::new(subscriber.reader(), AudioSource::Manual, STALE);
        publisher.publish(&OrientationUpdate {
            audio_tracked: Some(Euler::from_degrees(0.0, 90.0, 0.0).to_quat()),
            audio_manual: Some(Euler::from_degrees(0.0, -90.0, 0.0).to_quat()),
            ..Default::default()
        });

        let mut block = [FRONT];
        renderer.process_block(Instant::now(), &mut block);
        assert_frame(block[0], [1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn holds_orientation_while_stale() {
        let (mut publisher, subscriber) = orientation_channel();
        let mut renderer = SoundFieldRenderer::new(subscriber.reader(), AudioSource::Tracked, STALE);
        publish_tracked(&mut publisher, Euler::from_degrees(0.0, 90.0, 0.0).to_quat());

        let start = Instant::now();
        let mut block = [FRONT];
        renderer.process_block(start, &mut block);

        let mut later = [FRONT];
        let freshness = renderer.process_block(start + Duration::from_secs(1), &mut later);
        assert!(matches!(freshness, Freshness::Stale { .. }));
        assert_frame(later[0], [1.0, -1.0, 0.0, 0.0]);
    }

    #[test]
    fn render_blocks_covers_a_partial_last_block() {
        let (_publisher, subscriber) = orientation_channel();
        let mut renderer = SoundFieldRenderer::new(subscriber.reader(), AudioSource::Tracked, STALE);
        let config = RenderConfig {
            block_size: 4,
            ..Default::default()
        };
        let mut frames = vec![FRONT; 10];
        render_blocks(&mut renderer, &mut frames, &config, false);
        assert!(frames.iter().all(|f| *f == FRONT));
    }

    #[test]
    fn block_period_matches_the_callback_rate() {
        let config = RenderConfig::default();
        let period = config.block_period().as_secs_f64();
        assert!((period - 128.0 / 48_000.0).abs() < 1e-12);
    }
}
