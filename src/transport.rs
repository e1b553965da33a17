//! Lock-free hand-off of orientation from the estimation thread to the
//! audio render callback and any display loop.
//!
//! The shared block is 128 bytes:
//!
//! | word  | contents                                    |
//! |-------|---------------------------------------------|
//! | 0     | `i32` sequence number                       |
//! | 1–4   | raw tracker quaternion `x y z w`            |
//! | 5–8   | predicted quaternion                        |
//! | 9–12  | manual (UI) quaternion                      |
//! | 13–16 | audio orientation derived from prediction   |
//! | 17–20 | audio orientation derived from manual       |
//! | 21–31 | padding                                     |
//!
//! Quaternion words hold `f32` bit patterns. There is exactly one writer,
//! the [`OrientationPublisher`]. A publish writes the payload words and then
//! stores the incremented sequence number with release ordering; readers
//! load it with acquire ordering, so a reader that sees sequence `N` also
//! sees everything written for `N`.
//!
//! While the payload is being written the sequence word holds the negated
//! number of the publish in progress. Readers only accept positive values
//! and re-check the word after copying the payload, so they skip a read
//! that overlapped a write and pick the data up on their next poll. Nothing
//! on either side blocks, locks, or allocates.

use crate::quat::Quat;
use std::sync::{
    atomic::{fence, AtomicI32, AtomicU32, Ordering},
    Arc,
};

/// Size in bytes of the shared block.
pub const BLOCK_BYTES: usize = 128;

/// Number of 32-bit words following the sequence number.
const PAYLOAD_WORDS: usize = BLOCK_BYTES / 4 - 1;

/// Number of quaternion slots in the block.
pub const SLOT_COUNT: usize = 5;

/// One quaternion group in the shared block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// The measurement as converted from the detector, before filtering.
    Raw,
    /// The filtered, forward-predicted orientation.
    Predicted,
    /// The orientation set from the user interface.
    Manual,
    /// Audio orientation derived from [`Slot::Predicted`].
    AudioTracked,
    /// Audio orientation derived from [`Slot::Manual`].
    AudioManual,
}

impl Slot {
    pub const ALL: [Slot; SLOT_COUNT] = [
        Slot::Raw,
        Slot::Predicted,
        Slot::Manual,
        Slot::AudioTracked,
        Slot::AudioManual,
    ];

    const fn index(self) -> usize {
        match self {
            Slot::Raw => 0,
            Slot::Predicted => 1,
            Slot::Manual => 2,
            Slot::AudioTracked => 3,
            Slot::AudioManual => 4,
        }
    }

    /// Offset of the slot's `x` component, in 32-bit words from the start of
    /// the block.
    pub const fn word_offset(self) -> usize {
        1 + 4 * self.index()
    }
}

/// The shared memory block.
#[repr(C, align(64))]
pub struct SharedOrientation {
    sequence: AtomicI32,
    payload: [AtomicU32; PAYLOAD_WORDS],
}

const _: () = assert!(std::mem::size_of::<SharedOrientation>() == BLOCK_BYTES);
const _: () = assert!(Slot::AudioManual.word_offset() + 4 <= BLOCK_BYTES / 4);

impl SharedOrientation {
    /// A block with no publishes and every slot set to the identity.
    fn new() -> Self {
        let block = Self {
            sequence: AtomicI32::new(0),
            payload: std::array::from_fn(|_| AtomicU32::new(0)),
        };
        for slot in Slot::ALL {
            block.store_slot(slot, Quat::IDENTITY.to_f32_array());
        }
        block
    }

    /// The sequence word as it currently stands: the number of the last
    /// completed publish, zero before the first one, or a negative number
    /// while a publish is being written.
    pub fn sequence(&self) -> i32 {
        self.sequence.load(Ordering::Acquire)
    }

    fn store_slot(&self, slot: Slot, q: [f32; 4]) {
        let base = slot.word_offset() - 1;
        for (i, v) in q.iter().enumerate() {
            self.payload[base + i].store(v.to_bits(), Ordering::Relaxed);
        }
    }

    fn load_slot(&self, slot: Slot) -> [f32; 4] {
        let base = slot.word_offset() - 1;
        std::array::from_fn(|i| f32::from_bits(self.payload[base + i].load(Ordering::Relaxed)))
    }
}

/// Creates a shared block and returns its only write handle together with
/// a handle for creating readers.
pub fn orientation_channel() -> (OrientationPublisher, OrientationSubscriber) {
    let shared = Arc::new(SharedOrientation::new());
    let subscriber = OrientationSubscriber {
        shared: Arc::clone(&shared),
    };
    let publisher = OrientationPublisher {
        shared,
        sequence: 0,
    };
    (publisher, subscriber)
}

/// The set of slots written by one publish. `None` leaves a slot as it was.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OrientationUpdate {
    pub raw: Option<Quat>,
    pub predicted: Option<Quat>,
    pub manual: Option<Quat>,
    pub audio_tracked: Option<Quat>,
    pub audio_manual: Option<Quat>,
}

impl OrientationUpdate {
    fn slots(&self) -> [(Slot, Option<Quat>); SLOT_COUNT] {
        [
            (Slot::Raw, self.raw),
            (Slot::Predicted, self.predicted),
            (Slot::Manual, self.manual),
            (Slot::AudioTracked, self.audio_tracked),
            (Slot::AudioManual, self.audio_manual),
        ]
    }
}

/// The single writer of a [`SharedOrientation`] block. Not `Clone`.
pub struct OrientationPublisher {
    shared: Arc<SharedOrientation>,
    sequence: i32,
}

impl OrientationPublisher {
    /// Number of the last completed publish.
    pub fn sequence(&self) -> i32 {
        self.sequence
    }

    /// Starts a publish. The new data becomes visible when the returned
    /// guard is committed or dropped.
    pub fn begin(&mut self) -> PublishGuard<'_> {
        let next = next_sequence(self.sequence);
        self.shared.sequence.store(-next, Ordering::Relaxed);
        fence(Ordering::Release);
        PublishGuard {
            publisher: self,
            next,
            done: false,
        }
    }

    /// Writes every slot present in `update` and publishes them under one
    /// new sequence number, which is returned.
    pub fn publish(&mut self, update: &OrientationUpdate) -> i32 {
        let mut guard = self.begin();
        for (slot, q) in update.slots() {
            if let Some(q) = q {
                guard.write(slot, q);
            }
        }
        guard.commit()
    }
}

/// Sequence numbers stay positive; after `i32::MAX` they start again at 1.
fn next_sequence(current: i32) -> i32 {
    if current == i32::MAX {
        1
    } else {
        current + 1
    }
}

/// An open publish. Slots written through it are not observed by readers
/// until [`commit`](Self::commit).
pub struct PublishGuard<'a> {
    publisher: &'a mut OrientationPublisher,
    next: i32,
    done: bool,
}

impl PublishGuard<'_> {
    pub fn write(&mut self, slot: Slot, q: Quat) {
        self.publisher.shared.store_slot(slot, q.to_f32_array());
    }

    /// Publishes with a single release store of the new sequence number.
    pub fn commit(mut self) -> i32 {
        self.finish()
    }

    fn finish(&mut self) -> i32 {
        if !self.done {
            self.done = true;
            self.publisher
                .shared
                .sequence
                .store(self.next, Ordering::Release);
            self.publisher.sequence = self.next;
        }
        self.next
    }
}

impl Drop for PublishGuard<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

/// A cloneable handle from which readers are made.
#[derive(Clone)]
pub struct OrientationSubscriber {
    shared: Arc<SharedOrientation>,
}

impl OrientationSubscriber {
    pub fn reader(&self) -> OrientationReader {
        OrientationReader {
            shared: Arc::clone(&self.shared),
            last_sequence: 0,
            frame: OrientationFrame::default(),
        }
    }

    pub fn sequence(&self) -> i32 {
        self.shared.sequence()
    }
}

/// A copy of every quaternion slot as of one publish.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationFrame {
    slots: [[f32; 4]; SLOT_COUNT],
}

impl Default for OrientationFrame {
    fn default() -> Self {
        Self {
            slots: [Quat::IDENTITY.to_f32_array(); SLOT_COUNT],
        }
    }
}

impl OrientationFrame {
    /// The slot exactly as stored, `[x, y, z, w]`.
    pub fn slot(&self, slot: Slot) -> [f32; 4] {
        self.slots[slot.index()]
    }

    pub fn quat(&self, slot: Slot) -> Quat {
        Quat::from_f32_array(self.slot(slot))
    }
}

/// One consumer's view of the shared block. Each consumer owns its own
/// reader; polling never blocks.
pub struct OrientationReader {
    shared: Arc<SharedOrientation>,
    last_sequence: i32,
    frame: OrientationFrame,
}

impl OrientationReader {
    /// Checks for a new publish and copies it into the local frame.
    /// Returns `true` when the frame changed. Otherwise the previous frame
    /// is kept, which is also what happens after the writer goes away.
    pub fn poll(&mut self) -> bool {
        let before = self.shared.sequence.load(Ordering::Acquire);
        if before <= 0 || before == self.last_sequence {
            return false;
        }

        let slots = Slot::ALL.map(|slot| self.shared.load_slot(slot));

        fence(Ordering::Acquire);
        let after = self.shared.sequence.load(Ordering::Relaxed);
        if after != before {
            return false;
        }

        self.frame = OrientationFrame { slots };
        self.last_sequence = before;
        true
    }

    pub fn frame(&self) -> &OrientationFrame {
        &self.frame
    }

    /// Sequence number of the cached frame, zero before the first publish.
    pub fn last_sequence(&self) -> i32 {
        self.last_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    fn yaw_quat(deg: f64) -> Quat {
        let half = deg.to_radians() / 2.0;
        Quat::new(0.0, half.sin(), 0.0, half.cos())
    }

    #[test]
    fn layout_matches_the_documented_offsets() {
        assert_eq!(std::mem::size_of::<SharedOrientation>(), 128);
        assert_eq!(Slot::Raw.word_offset(), 1);
        assert_eq!(Slot::Predicted.word_offset(), 5);
        assert_eq!(Slot::Manual.word_offset(), 9);
        assert_eq!(Slot::AudioTracked.word_offset(), 13);
        assert_eq!(Slot::AudioManual.word_offset(), 17);
    }

    #[test]
    fn fresh_block_is_identity_and_unpublished() {
        let (_publisher, subscriber) = orientation_channel();
        let mut reader = subscriber.reader();
        assert_eq!(subscriber.sequence(), 0);
        assert!(!reader.poll());
        for slot in Slot::ALL {
            assert_eq!(reader.frame().slot(slot), [0.0, 0.0, 0.0, 1.0]);
        }
        let block = SharedOrientation::new();
        assert_eq!(block.load_slot(Slot::Manual), [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn reader_sees_new_data_only_after_the_sequence_store() {
        let (mut publisher, subscriber) = orientation_channel();
        let mut reader = subscriber.reader();

        let first = publisher.publish(&OrientationUpdate {
            raw: Some(yaw_quat(10.0)),
            ..Default::default()
        });
        assert_eq!(first, 1);
        assert!(reader.poll());
        let stale = reader.frame().slot(Slot::Raw);

        let q = yaw_quat(33.0);
        let mut guard = publisher.begin();
        guard.write(Slot::Raw, q);

        assert!(!reader.poll());
        assert_eq!(reader.last_sequence(), 1);
        assert_eq!(reader.frame().slot(Slot::Raw), stale);

        assert_eq!(guard.commit(), 2);
        assert!(reader.poll());
        assert_eq!(reader.last_sequence(), 2);
        let bits = reader.frame().slot(Slot::Raw).map(f32::to_bits);
        assert_eq!(bits, q.to_f32_array().map(f32::to_bits));
    }

    #[test]
    fn unchanged_sequence_reuses_cached_frame() {
        let (mut publisher, subscriber) = orientation_channel();
        let mut reader = subscriber.reader();
        publisher.publish(&OrientationUpdate {
            predicted: Some(yaw_quat(5.0)),
            ..Default::default()
        });
        assert!(reader.poll());
        let cached = *reader.frame();
        assert!(!reader.poll());
        assert_eq!(*reader.frame(), cached);
    }

    #[test]
    fn readers_coalesce_skipped_updates() {
        let (mut publisher, subscriber) = orientation_channel();
        let mut reader = subscriber.reader();
        for deg in [1.0, 2.0, 3.0] {
            publisher.publish(&OrientationUpdate {
                predicted: Some(yaw_quat(deg)),
                ..Default::default()
            });
        }
        assert!(reader.poll());
        assert_eq!(reader.last_sequence(), 3);
        assert_eq!(
            reader.frame().slot(Slot::Predicted),
            yaw_quat(3.0).to_f32_array()
        );
    }

    #[test]
    fn partial_update_keeps_other_slots() {
        let (mut publisher, subscriber) = orientation_channel();
        let mut reader = subscriber.reader();
        publisher.publish(&OrientationUpdate {
            raw: Some(yaw_quat(20.0)),
            predicted: Some(yaw_quat(21.0)),
            ..Default::default()
        });
        publisher.publish(&OrientationUpdate {
            manual: Some(yaw_quat(-90.0)),
            ..Default::default()
        });
        assert!(reader.poll());
        assert_eq!(reader.frame().slot(Slot::Raw), yaw_quat(20.0).to_f32_array());
        assert_eq!(
            reader.frame().slot(Slot::Manual),
            yaw_quat(-90.0).to_f32_array()
        );
        assert_eq!(reader.frame().slot(Slot::AudioManual), [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn dropped_guard_still_publishes() {
        let (mut publisher, subscriber) = orientation_channel();
        {
            let mut guard = publisher.begin();
            guard.write(Slot::Predicted, yaw_quat(12.0));
        }
        assert_eq!(subscriber.sequence(), 1);
        assert_eq!(publisher.sequence(), 1);
    }

    #[test]
    fn sequence_wraps_to_one() {
        assert_eq!(next_sequence(i32::MAX), 1);
        assert_eq!(next_sequence(0), 1);
        assert_eq!(next_sequence(41), 42);
    }

    #[test]
    fn reader_keeps_last_value_after_writer_is_gone() {
        let (mut publisher, subscriber) = orientation_channel();
        let mut reader = subscriber.reader();
        publisher.publish(&OrientationUpdate {
            predicted: Some(yaw_quat(7.0)),
            ..Default::default()
        });
        drop(publisher);
        assert!(reader.poll());
        assert!(!reader.poll());
        assert_eq!(
            reader.frame().slot(Slot::Predicted),
            yaw_quat(7.0).to_f32_array()
        );
    }

    /// Every publish writes the same value into every word, so a torn read
    /// would show up as a frame with mixed values.
    #[test]
    fn concurrent_reader_never_sees_a_torn_frame() {
        let (mut publisher, subscriber) = orientation_channel();
        let done = Arc::new(AtomicBool::new(false));

        let writer_done = Arc::clone(&done);
        let writer = thread::spawn(move || {
            for i in 1..=20_000 {
                let v = i as f64;
                let q = Quat::new(v, v, v, v);
                publisher.publish(&OrientationUpdate {
                    raw: Some(q),
                    predicted: Some(q),
                    manual: Some(q),
                    audio_tracked: Some(q),
                    audio_manual: Some(q),
                });
            }
            writer_done.store(true, Ordering::Release);
        });

        let mut reader = subscriber.reader();
        let mut last = 0;
        let mut updates = 0;
        loop {
            let finished = done.load(Ordering::Acquire);
            if reader.poll() {
                updates += 1;
                let seq = reader.last_sequence();
                assert!(seq > last);
                last = seq;

                let frame = reader.frame();
                let expected = frame.slot(Slot::Raw)[0];
                for slot in Slot::ALL {
                    assert!(frame.slot(slot).iter().all(|&v| v == expected));
                }
                assert_eq!(expected, seq as f32);
            }
            if finished && reader.last_sequence() == 20_000 {
                break;
            }
        }

        writer.join().unwrap();
        assert!(updates > 0);
    }
}
