//! Lock-free state hand-off between the sampling and I/O contexts.
//!
//! ```text
//!             set_targets                  read_targets
//! I/O ctx ─────────────────▶ [targets] ─────────────────▶ sampling ctx
//! I/O ctx ◀───────────────── [snapshot] ◀──────────────── sampling ctx
//!          take_snapshot_if_ready       publish_snapshot
//! ```
//!
//! Each direction has exactly one writer and one reader. No mutex is used:
//! every field is an atomic scalar.
//!
//! # Targets
//!
//! Written field by field. A read racing a write may combine old and new
//! channel values; channels are electrically independent and the next tick
//! reads the settled value, so this is tolerated.
//!
//! # Snapshot
//!
//! Published as a unit. The producer writes all fields and stores `ready`
//! last with `Release`; the consumer swaps `ready` first with `Acquire`. A
//! sequence counter around the field writes lets the consumer detect a
//! publish that overlapped its read; such a read is discarded (the overlapping
//! publish has already set `ready` again, so nothing is lost). Each publish is
//! handed out at most once. Snapshots not taken before the next publish are
//! overwritten: latest wins.

use std::sync::atomic::{fence, AtomicBool, AtomicI16, AtomicU32, AtomicU8, Ordering};

use cvbridge_frame::{InputSnapshot, OutputTargets, OUTPUT_CHANNELS};

struct TargetCells {
    flags: AtomicU8,
    channels: [AtomicI16; OUTPUT_CHANNELS],
}

struct SnapshotCells {
    flags: AtomicU8,
    cv: [AtomicI16; 2],
    audio: [AtomicI16; 2],
    controls: [AtomicI16; 3],
    /// Odd while the producer is writing fields.
    seq: AtomicU32,
    /// `seq` of the last snapshot handed out. Consumer-owned.
    taken_seq: AtomicU32,
    ready: AtomicBool,
}

/// Diagnostic counters. They never influence behaviour.
///
/// Counters wrap at `u32::MAX`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Snapshots published by the sampling context.
    pub published: u32,
    /// Snapshots overwritten before the I/O context took them.
    pub overwritten: u32,
    /// Takes discarded because a publish overlapped the read.
    pub torn: u32,
}

/// The only state shared between the sampling and I/O contexts.
///
/// Construct once at startup and hand an `Arc` to each loop.
pub struct SharedStateChannel {
    targets: TargetCells,
    snapshot: SnapshotCells,
    published: AtomicU32,
    overwritten: AtomicU32,
    torn: AtomicU32,
}

impl SharedStateChannel {
    /// All targets zero, no snapshot ready.
    pub const fn new() -> Self {
        Self {
            targets: TargetCells {
                flags: AtomicU8::new(0),
                channels: [const { AtomicI16::new(0) }; OUTPUT_CHANNELS],
            },
            snapshot: SnapshotCells {
                flags: AtomicU8::new(0),
                cv: [const { AtomicI16::new(0) }; 2],
                audio: [const { AtomicI16::new(0) }; 2],
                controls: [const { AtomicI16::new(0) }; 3],
                seq: AtomicU32::new(0),
                taken_seq: AtomicU32::new(0),
                ready: AtomicBool::new(false),
            },
            published: AtomicU32::new(0),
            overwritten: AtomicU32::new(0),
            torn: AtomicU32::new(0),
        }
    }

    /// Overwrite all output targets. I/O context only.
    #[inline]
    pub fn set_targets(&self, targets: &OutputTargets) {
        let cells = &self.targets;
        for (cell, value) in cells.channels.iter().zip(targets.channels) {
            cell.store(value, Ordering::Release);
        }
        cells.flags.store(targets.flags, Ordering::Release);
    }

    /// Most recently set output targets. Sampling context only.
    #[inline]
    pub fn read_targets(&self) -> OutputTargets {
        let cells = &self.targets;
        let flags = cells.flags.load(Ordering::Acquire);
        let mut channels = [0i16; OUTPUT_CHANNELS];
        for (value, cell) in channels.iter_mut().zip(&cells.channels) {
            *value = cell.load(Ordering::Acquire);
        }
        OutputTargets { flags, channels }
    }

    /// Publish a complete input snapshot. Sampling context only.
    ///
    /// Wait-free: a fixed number of atomic stores, never blocks.
    #[inline]
    pub fn publish_snapshot(&self, snapshot: &InputSnapshot) {
        let cells = &self.snapshot;

        let seq = cells.seq.load(Ordering::Relaxed);
        cells.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        cells.flags.store(snapshot.flags, Ordering::Relaxed);
        store_all(&cells.cv, &snapshot.cv);
        store_all(&cells.audio, &snapshot.audio);
        store_all(&cells.controls, &snapshot.controls);

        cells.seq.store(seq.wrapping_add(2), Ordering::Release);

        // Publishing write: makes every field above visible to an Acquire swap.
        if cells.ready.swap(true, Ordering::Release) {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Take the latest snapshot if one was published since the last take.
    /// I/O context only.
    #[inline]
    pub fn take_snapshot_if_ready(&self) -> Option<InputSnapshot> {
        let cells = &self.snapshot;

        if !cells.ready.swap(false, Ordering::Acquire) {
            return None;
        }

        let before = cells.seq.load(Ordering::Acquire);
        let snapshot = InputSnapshot {
            flags: cells.flags.load(Ordering::Relaxed),
            cv: load_all(&cells.cv),
            audio: load_all(&cells.audio),
            controls: load_all(&cells.controls),
        };
        fence(Ordering::Acquire);
        let after = cells.seq.load(Ordering::Relaxed);

        if before % 2 == 1 || before != after {
            self.torn.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        // A take can see a publish's fields before that publish raises
        // `ready`; the flag it raises afterwards must not deliver them again.
        if cells.taken_seq.swap(before, Ordering::Relaxed) == before {
            return None;
        }
        Some(snapshot)
    }

    /// True when a published snapshot is waiting to be taken.
    pub fn snapshot_ready(&self) -> bool {
        self.snapshot.ready.load(Ordering::Acquire)
    }

    /// Current diagnostic counters.
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            published: self.published.load(Ordering::Relaxed),
            overwritten: self.overwritten.load(Ordering::Relaxed),
            torn: self.torn.load(Ordering::Relaxed),
        }
    }
}

impl Default for SharedStateChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SharedStateChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStateChannel")
            .field("targets", &self.read_targets())
            .field("snapshot_ready", &self.snapshot_ready())
            .field("stats", &self.stats())
            .finish()
    }
}

#[inline]
fn store_all<const N: usize>(cells: &[AtomicI16; N], values: &[i16; N]) {
    for (cell, &value) in cells.iter().zip(values) {
        cell.store(value, Ordering::Relaxed);
    }
}

#[inline]
fn load_all<const N: usize>(cells: &[AtomicI16; N]) -> [i16; N] {
    let mut values = [0i16; N];
    for (value, cell) in values.iter_mut().zip(cells) {
        *value = cell.load(Ordering::Relaxed);
    }
    values
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn snapshot(n: i16) -> InputSnapshot {
        InputSnapshot {
            flags: (n as u8) & 0x0F,
            cv: [n, n.wrapping_neg()],
            audio: [n, n],
            controls: [n, n, n],
        }
    }

    #[test]
    fn targets_start_at_zero() {
        let channel = SharedStateChannel::new();
        assert_eq!(channel.read_targets(), OutputTargets::ZERO);
    }

    #[test]
    fn targets_reflect_latest_set() {
        let channel = SharedStateChannel::new();
        channel.set_targets(&OutputTargets::new(0x01, [1, 2, 3, 4]));
        channel.set_targets(&OutputTargets::new(0x02, [-5, 6, -7, 8]));
        assert_eq!(
            channel.read_targets(),
            OutputTargets::new(0x02, [-5, 6, -7, 8])
        );
    }

    #[test]
    fn no_snapshot_before_first_publish() {
        let channel = SharedStateChannel::new();
        assert!(!channel.snapshot_ready());
        assert_eq!(channel.take_snapshot_if_ready(), None);
    }

    #[test]
    fn snapshot_is_taken_at_most_once() {
        let channel = SharedStateChannel::new();
        channel.publish_snapshot(&snapshot(7));
        assert!(channel.snapshot_ready());
        assert_eq!(channel.take_snapshot_if_ready(), Some(snapshot(7)));
        assert_eq!(channel.take_snapshot_if_ready(), None);
    }

    #[test]
    fn latest_publish_wins() {
        let channel = SharedStateChannel::new();
        channel.publish_snapshot(&snapshot(1));
        channel.publish_snapshot(&snapshot(2));

        assert_eq!(channel.take_snapshot_if_ready(), Some(snapshot(2)));
        assert_eq!(channel.take_snapshot_if_ready(), None);
        assert_eq!(
            channel.stats(),
            ChannelStats {
                published: 2,
                overwritten: 1,
                torn: 0
            }
        );
    }

    #[test]
    fn debug_output_includes_targets() {
        let channel = SharedStateChannel::new();
        channel.set_targets(&OutputTargets::new(0, [9, 0, 0, 0]));
        let text = format!("{channel:?}");
        assert!(text.contains("targets"));
        assert!(text.contains("snapshot_ready: false"));
    }

    /// The consumer must never see a mix of two publishes.
    #[test]
    fn concurrent_snapshots_are_never_mixed() {
        let channel = Arc::new(SharedStateChannel::new());
        const PUBLISHES: i16 = 20_000;

        let producer = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                for n in 1..=PUBLISHES {
                    channel.publish_snapshot(&snapshot(n));
                }
            })
        };

        let mut last = 0i16;
        let mut taken = 0u32;
        loop {
            if let Some(got) = channel.take_snapshot_if_ready() {
                let n = got.controls[0];
                assert_eq!(got, snapshot(n), "snapshot fields from different publishes");
                assert!(n > last, "snapshots must arrive in publish order");
                last = n;
                taken += 1;
            }
            if producer.is_finished() && !channel.snapshot_ready() {
                break;
            }
        }
        producer.join().unwrap();

        // The final publish is always observable.
        if let Some(got) = channel.take_snapshot_if_ready() {
            last = got.controls[0];
            taken += 1;
        }
        assert_eq!(last, PUBLISHES);

        assert_eq!(channel.stats().published, PUBLISHES as u32);
        assert!(taken >= 1);
    }

    #[test]
    fn concurrent_targets_settle_on_last_value() {
        let channel = Arc::new(SharedStateChannel::new());

        let writer = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                for n in 0..10_000i16 {
                    channel.set_targets(&OutputTargets::new(0, [n; OUTPUT_CHANNELS]));
                }
            })
        };

        // Each channel is individually valid: always one of the written values.
        while !writer.is_finished() {
            let targets = channel.read_targets();
            for value in targets.channels {
                assert!((0..10_000).contains(&value));
            }
        }
        writer.join().unwrap();

        assert_eq!(
            channel.read_targets(),
            OutputTargets::new(0, [9_999; OUTPUT_CHANNELS])
        );
    }
}
