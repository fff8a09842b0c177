//! # MODCOD Accumulator
//!
//! Derives bitrate and frame-type distribution from the demodulator's
//! cumulative per-MODCOD frame counters.
//!
//! ## Counter datagram layout
//!
//! ```text
//! offset 40: for each of the 28 active MODCODs (DVB-S2 1..=28)
//!     u64 BE  normal frames, sub-count A
//!     u64 BE  normal frames, sub-count B
//!     u64 BE  short frames,  sub-count A
//!     u64 BE  short frames,  sub-count B
//! ```
//!
//! MODCOD 0 (dummy PLFRAME) is not reported; slot 0 of every per-class array
//! holds the grand total instead.
//!
//! $$\text{bitrate} = \frac{64800 \cdot \Delta N_{normal} + 16200 \cdot \Delta N_{short}}{\Delta t}$$

use bytes::Buf;
use chrono::{DateTime, Utc};

use crate::sdd::DecodeError;
use crate::storage::ModcodRecord;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Per-class array length: the total plus 28 active MODCODs.
pub const MODCOD_SLOTS: usize = 29;

/// MODCODs carried in the counter datagram.
pub const ACTIVE_MODCODS: usize = MODCOD_SLOTS - 1;

/// Offset of the first counter.
pub const COUNTERS_OFFSET: usize = 40;

/// Counters per MODCOD: two normal-frame, two short-frame.
pub const COUNTERS_PER_MODCOD: usize = 4;

/// Shortest datagram that carries every counter.
pub const MIN_MODCOD_LEN: usize = COUNTERS_OFFSET + ACTIVE_MODCODS * COUNTERS_PER_MODCOD * 8;

/// Bits per normal PLFRAME (EN 302 307).
pub const NORMAL_FRAME_BITS: u64 = 64800;

/// Bits per short PLFRAME (EN 302 307).
pub const SHORT_FRAME_BITS: u64 = 16200;

/// Display names, indexed like the per-class arrays (EN 302 307-1, 5.5.2.2).
pub const MODCOD_NAMES: [&str; MODCOD_SLOTS] = [
    "Total",
    "QPSK 1/4",
    "QPSK 1/3",
    "QPSK 2/5",
    "QPSK 1/2",
    "QPSK 3/5",
    "QPSK 2/3",
    "QPSK 3/4",
    "QPSK 4/5",
    "QPSK 5/6",
    "QPSK 8/9",
    "QPSK 9/10",
    "8PSK 3/5",
    "8PSK 2/3",
    "8PSK 3/4",
    "8PSK 5/6",
    "8PSK 8/9",
    "8PSK 9/10",
    "16APSK 2/3",
    "16APSK 3/4",
    "16APSK 4/5",
    "16APSK 5/6",
    "16APSK 8/9",
    "16APSK 9/10",
    "32APSK 3/4",
    "32APSK 4/5",
    "32APSK 5/6",
    "32APSK 8/9",
    "32APSK 9/10",
];

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// One decoded counter datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModcodSnapshot {
    /// Per-class frame count; slot 0 is the sum of all classes.
    pub counts: [u64; MODCOD_SLOTS],
    /// Normal-frame counters summed over every class.
    pub normal_frames: u64,
    /// Short-frame counters summed over every class.
    pub short_frames: u64,
}

impl ModcodSnapshot {
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < MIN_MODCOD_LEN {
            return Err(DecodeError {
                len: data.len(),
                need: MIN_MODCOD_LEN,
            });
        }

        let mut buf = &data[COUNTERS_OFFSET..MIN_MODCOD_LEN];
        let mut counts = [0u64; MODCOD_SLOTS];
        let mut normal_frames = 0u64;
        let mut short_frames = 0u64;

        for slot in counts.iter_mut().skip(1) {
            let normal = buf.get_u64().wrapping_add(buf.get_u64());
            let short = buf.get_u64().wrapping_add(buf.get_u64());
            normal_frames = normal_frames.wrapping_add(normal);
            short_frames = short_frames.wrapping_add(short);
            *slot = normal.wrapping_add(short);
        }
        counts[0] = counts[1..].iter().fold(0u64, |acc, c| acc.wrapping_add(*c));

        Ok(Self {
            counts,
            normal_frames,
            short_frames,
        })
    }

    pub fn total(&self) -> u64 {
        self.counts[0]
    }
}

// ─── Accumulator ─────────────────────────────────────────────────────────────

/// Long-lived MODCOD state: the previous snapshot plus the values derived
/// from the latest one.
#[derive(Debug, Clone)]
pub struct ModcodAccumulator {
    ts: DateTime<Utc>,
    counts: [u64; MODCOD_SLOTS],
    previous: [u64; MODCOD_SLOTS],
    delta: [u64; MODCOD_SLOTS],
    per_mille: [u64; MODCOD_SLOTS],
    normal_prev: u64,
    short_prev: u64,
    bitrate: u64,
}

impl ModcodAccumulator {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            ts: now,
            counts: [0; MODCOD_SLOTS],
            previous: [0; MODCOD_SLOTS],
            delta: [0; MODCOD_SLOTS],
            per_mille: [0; MODCOD_SLOTS],
            normal_prev: 0,
            short_prev: 0,
            bitrate: 0,
        }
    }

    /// Decode and fold in one counter datagram.
    ///
    /// Returns `Ok(false)` for a first measurement (process start, or the
    /// hardware counters were reset): the derived values are computed but
    /// describe no real interval, so the caller must not persist them.
    pub fn ingest(&mut self, datagram: &[u8], now: DateTime<Utc>) -> Result<bool, DecodeError> {
        let snapshot = ModcodSnapshot::decode(datagram)?;
        Ok(self.apply(&snapshot, now))
    }

    /// Fold in an already-decoded snapshot. See [`ingest`](Self::ingest).
    pub fn apply(&mut self, snapshot: &ModcodSnapshot, now: DateTime<Utc>) -> bool {
        let previous_total = self.counts[0];
        let first = previous_total == 0 || snapshot.total() < previous_total;

        self.counts = snapshot.counts;

        let mut bits = NORMAL_FRAME_BITS
            .saturating_mul(snapshot.normal_frames.saturating_sub(self.normal_prev))
            .saturating_add(
                SHORT_FRAME_BITS.saturating_mul(snapshot.short_frames.saturating_sub(self.short_prev)),
            );
        let elapsed = (now - self.ts).num_seconds();
        if elapsed > 0 {
            bits /= elapsed as u64;
        }
        self.bitrate = bits;

        let total = self.counts[0];
        for slot in 0..MODCOD_SLOTS {
            self.per_mille[slot] = if total == 0 {
                0
            } else {
                (1000.0 * self.counts[slot] as f64 / total as f64).round() as u64
            };
            self.delta[slot] = self.counts[slot].saturating_sub(self.previous[slot]);
        }

        self.ts = now;
        self.previous = self.counts;
        self.normal_prev = snapshot.normal_frames;
        self.short_prev = snapshot.short_frames;

        if first {
            tracing::debug!(total, "first MODCOD measurement, not persisting");
        }
        !first
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }

    pub fn counts(&self) -> &[u64; MODCOD_SLOTS] {
        &self.counts
    }

    pub fn delta(&self) -> &[u64; MODCOD_SLOTS] {
        &self.delta
    }

    /// Per-class share of the grand total in tenths of a percent.
    pub fn per_mille(&self) -> &[u64; MODCOD_SLOTS] {
        &self.per_mille
    }

    /// Bits per second over the last interval.
    pub fn bitrate(&self) -> u64 {
        self.bitrate
    }

    /// The persisted form of the latest ingest.
    pub fn record(&self) -> ModcodRecord {
        let mut shares = [0u16; ACTIVE_MODCODS];
        for (share, pm) in shares.iter_mut().zip(&self.per_mille[1..]) {
            *share = (*pm).min(1000) as u16;
        }
        ModcodRecord {
            ts: self.ts,
            bitrate_mbps: self.bitrate as f64 / 1_000_000.0,
            total: self.counts[0],
            per_mille: shares,
        }
    }

    /// One line per class that carried traffic, for debug logging.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "{:>12}: {:.3} Mbit/s",
            "Bit rate",
            self.bitrate as f64 / 1_000_000.0
        )];
        for slot in 0..MODCOD_SLOTS {
            let mut line = format!("{:>12}: {:>10}", MODCOD_NAMES[slot], self.counts[slot]);
            if self.delta[slot] > 0 {
                line.push_str(&format!(
                    "   ({:.1}%, +{})",
                    self.per_mille[slot] as f64 / 10.0,
                    self.delta[slot]
                ));
            } else if self.per_mille[slot] > 0 {
                line.push_str(&format!("   ({:.1}%)", self.per_mille[slot] as f64 / 10.0));
            }
            lines.push(line);
        }
        lines
    }
}

/// Build a counter datagram from per-class `(normal, short)` frame counts
/// (index 0 = MODCOD 1). Each count is split across its two sub-counters.
#[cfg(any(test, feature = "testing"))]
pub fn encode_counters(frames: &[(u64, u64); ACTIVE_MODCODS]) -> Vec<u8> {
    use bytes::BufMut;

    let mut buf = Vec::with_capacity(MIN_MODCOD_LEN);
    buf.put_bytes(0, COUNTERS_OFFSET);
    for &(normal, short) in frames {
        buf.put_u64(normal / 2);
        buf.put_u64(normal - normal / 2);
        buf.put_u64(short);
        buf.put_u64(0);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 6, 1, 12, 0, 0).unwrap()
    }

    fn frames(f: impl Fn(usize) -> (u64, u64)) -> [(u64, u64); ACTIVE_MODCODS] {
        std::array::from_fn(f)
    }

    #[test]
    fn decode_sums_subcounters_and_total() {
        let mut counts = frames(|_| (0, 0));
        counts[0] = (10, 4);
        counts[27] = (6, 0);
        let snap = ModcodSnapshot::decode(&encode_counters(&counts)).unwrap();
        assert_eq!(snap.counts[1], 14);
        assert_eq!(snap.counts[28], 6);
        assert_eq!(snap.total(), 20);
        assert_eq!(snap.normal_frames, 16);
        assert_eq!(snap.short_frames, 4);
    }

    #[test]
    fn short_datagram_is_rejected() {
        let mut acc = ModcodAccumulator::new(t0());
        assert!(acc.ingest(&[0u8; MIN_MODCOD_LEN - 1], t0()).is_err());
    }

    #[test]
    fn first_measurement_is_not_persisted() {
        let mut acc = ModcodAccumulator::new(t0());
        let data = encode_counters(&frames(|i| (i as u64 + 1, 0)));
        assert!(!acc.ingest(&data, t0() + TimeDelta::seconds(10)).unwrap());
        let data = encode_counters(&frames(|i| (i as u64 + 2, 0)));
        assert!(acc.ingest(&data, t0() + TimeDelta::seconds(20)).unwrap());
    }

    #[test]
    fn counter_reset_restarts_first_measurement() {
        let mut acc = ModcodAccumulator::new(t0());
        let busy = encode_counters(&frames(|_| (100, 100)));
        let quiet = encode_counters(&frames(|_| (0, 0)));
        acc.ingest(&busy, t0() + TimeDelta::seconds(1)).unwrap();
        assert!(acc.ingest(&busy, t0() + TimeDelta::seconds(2)).unwrap());
        assert!(!acc.ingest(&quiet, t0() + TimeDelta::seconds(3)).unwrap());
        assert!(!acc.ingest(&busy, t0() + TimeDelta::seconds(4)).unwrap());
        assert!(acc.ingest(&busy, t0() + TimeDelta::seconds(5)).unwrap());
    }

    #[test]
    fn lower_total_counts_as_reset() {
        let mut acc = ModcodAccumulator::new(t0());
        acc.ingest(&encode_counters(&frames(|_| (100, 0))), t0() + TimeDelta::seconds(1))
            .unwrap();
        let fresh = encode_counters(&frames(|_| (5, 0)));
        assert!(!acc.ingest(&fresh, t0() + TimeDelta::seconds(2)).unwrap());
        assert_eq!(acc.delta()[1], 0);
        assert_eq!(acc.bitrate(), 0);
    }

    #[test]
    fn bitrate_uses_frame_sizes_and_elapsed_seconds() {
        let mut acc = ModcodAccumulator::new(t0());
        let mut counts = frames(|_| (0, 0));
        counts[3] = (1000, 2000);
        acc.ingest(&encode_counters(&counts), t0()).unwrap();

        counts[3] = (1100, 2400);
        assert!(acc
            .ingest(&encode_counters(&counts), t0() + TimeDelta::seconds(10))
            .unwrap());
        assert_eq!(acc.bitrate(), (64800 * 100 + 16200 * 400) / 10);
        assert_eq!(acc.delta()[4], 500);
        assert_eq!(acc.delta()[0], 500);
    }

    #[test]
    fn zero_elapsed_reports_undivided_bits() {
        let mut acc = ModcodAccumulator::new(t0());
        let mut counts = frames(|_| (0, 0));
        counts[0] = (1, 0);
        acc.ingest(&encode_counters(&counts), t0()).unwrap();
        counts[0] = (3, 1);
        acc.ingest(&encode_counters(&counts), t0()).unwrap();
        assert_eq!(acc.bitrate(), 2 * 64800 + 16200);
    }

    #[test]
    fn per_mille_rounds_share_of_total() {
        let mut acc = ModcodAccumulator::new(t0());
        let mut counts = frames(|_| (0, 0));
        counts[0] = (1, 0);
        counts[1] = (2, 0);
        acc.ingest(&encode_counters(&counts), t0()).unwrap();
        assert_eq!(acc.per_mille()[0], 1000);
        assert_eq!(acc.per_mille()[1], 333);
        assert_eq!(acc.per_mille()[2], 667);

        let rec = acc.record();
        assert_eq!(rec.total, 3);
        assert_eq!(rec.per_mille[0], 333);
        assert_eq!(rec.per_mille[1], 667);
    }

    #[test]
    fn summary_lists_every_class() {
        let acc = ModcodAccumulator::new(t0());
        let lines = acc.summary();
        assert_eq!(lines.len(), MODCOD_SLOTS + 1);
        assert!(lines[1].contains("Total"));
        assert!(lines[MODCOD_SLOTS].contains("32APSK 9/10"));
    }
}
