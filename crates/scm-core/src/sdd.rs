//! # Link Quality (SDD) Accumulator
//!
//! Turns the bursty stream of SDD telemetry datagrams into one averaged
//! EsNo value per dwell.
//!
//! ## SDD datagram layout (relevant fields only)
//!
//! ```text
//! byte 6    bit 4  demod locked
//!           bit 6  demod tracked
//!           bit 7  lock definitive
//! byte 150..152    EsNo, big-endian u16, tenths of a dB
//! ```
//!
//! ## Sample policy, in order
//!
//! 1. every datagram counts towards `total`
//! 2. within [`SETTLE_TIME`] of a reset the datagram is dropped (traffic from
//!    the previous segment may still be in flight)
//! 3. demod not locked: rejected
//! 4. EsNo above [`ESNO_CEILING`]: rejected
//! 5. otherwise accepted and summed
//!
//! A dwell is invalid (reported as EsNo 0) when it accepted nothing, when
//! `total / rejected < 1.5`, or when the receive path timed out.

use bytes::Buf;
use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

use crate::segments::{NetworkSegment, Receiver, SegmentPosition};
use crate::storage::EsnoRecord;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Offset of the lock-status byte.
pub const STATUS_OFFSET: usize = 6;

/// Offset of the big-endian EsNo field.
pub const ESNO_OFFSET: usize = 150;

/// Shortest datagram that carries every decoded field.
pub const MIN_SDD_LEN: usize = ESNO_OFFSET + 2;

/// Implausibly high raw EsNo; anything above is rejected.
pub const ESNO_CEILING: u16 = 0xF00;

/// Start-of-dwell window during which samples are ignored.
pub const SETTLE_TIME: TimeDelta = TimeDelta::seconds(1);

/// `total / rejected` below this marks the dwell invalid.
pub const MIN_TOTAL_TO_REJECTED_RATIO: f64 = 1.5;

const LOCKED_BIT: u8 = 4;
const TRACKED_BIT: u8 = 6;
const DEFINITIVE_BIT: u8 = 7;

// ─── Message ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
#[error("datagram too short: {len} bytes, need {need}")]
pub struct DecodeError {
    pub len: usize,
    pub need: usize,
}

/// The fields of an SDD message this system uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SddMessage {
    /// EsNo in tenths of a dB.
    pub esno: u16,
    pub demod_locked: bool,
    pub demod_tracked: bool,
    pub lock_definitive: bool,
}

impl SddMessage {
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < MIN_SDD_LEN {
            return Err(DecodeError {
                len: data.len(),
                need: MIN_SDD_LEN,
            });
        }

        let status = data[STATUS_OFFSET];
        let esno = (&data[ESNO_OFFSET..MIN_SDD_LEN]).get_u16();

        Ok(Self {
            esno,
            demod_locked: (status >> LOCKED_BIT) & 1 == 1,
            demod_tracked: (status >> TRACKED_BIT) & 1 == 1,
            lock_definitive: (status >> DEFINITIVE_BIT) & 1 == 1,
        })
    }
}

// ─── Accumulator ─────────────────────────────────────────────────────────────

/// What happened to one ingested datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// Arrived inside the settle window; ignored.
    Settling,
    Accepted,
    RejectedUnlocked,
    RejectedCeiling,
    /// Too short to decode; counted as rejected.
    RejectedMalformed,
}

/// Per-dwell EsNo state. One live instance, reset at every segment change.
#[derive(Debug, Clone)]
pub struct LinkQualityAccumulator {
    position: SegmentPosition,
    segment: String,
    esno_sum: u64,
    accepted: u32,
    rejected: u32,
    total: u32,
    timed_out: bool,
    since: DateTime<Utc>,
}

impl LinkQualityAccumulator {
    pub fn new(position: SegmentPosition, segment: &NetworkSegment, now: DateTime<Utc>) -> Self {
        Self {
            position,
            segment: segment.name.clone(),
            esno_sum: 0,
            accepted: 0,
            rejected: 0,
            total: 0,
            timed_out: false,
            since: now,
        }
    }

    /// Start a fresh dwell on `position`.
    pub fn reset(&mut self, position: SegmentPosition, segment: &NetworkSegment, now: DateTime<Utc>) {
        *self = Self::new(position, segment, now);
    }

    pub fn position(&self) -> SegmentPosition {
        self.position
    }

    pub fn receiver(&self) -> Receiver {
        self.position.receiver
    }

    pub fn since(&self) -> DateTime<Utc> {
        self.since
    }

    pub fn accepted(&self) -> u32 {
        self.accepted
    }

    pub fn rejected(&self) -> u32 {
        self.rejected
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// Apply the sample policy to one raw datagram.
    pub fn ingest(&mut self, datagram: &[u8], now: DateTime<Utc>) -> SampleOutcome {
        self.total += 1;

        if now - self.since < SETTLE_TIME {
            return SampleOutcome::Settling;
        }

        let msg = match SddMessage::decode(datagram) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::trace!(error = %e, "undecodable SDD datagram");
                self.rejected += 1;
                return SampleOutcome::RejectedMalformed;
            }
        };

        if !msg.demod_locked {
            self.rejected += 1;
            return SampleOutcome::RejectedUnlocked;
        }

        if msg.esno > ESNO_CEILING {
            self.rejected += 1;
            return SampleOutcome::RejectedCeiling;
        }

        self.accepted += 1;
        self.esno_sum += u64::from(msg.esno);
        SampleOutcome::Accepted
    }

    /// Whether the dwell interval has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>, dwell: TimeDelta) -> bool {
        now - self.since >= dwell
    }

    /// The receive path saw no datagram for too long: the dwell is invalid
    /// no matter what it collected so far.
    pub fn mark_timeout(&mut self) {
        self.timed_out = true;
    }

    pub fn is_valid(&self) -> bool {
        if self.timed_out || self.accepted == 0 {
            return false;
        }
        if self.rejected == 0 {
            return true;
        }
        f64::from(self.total) / f64::from(self.rejected) >= MIN_TOTAL_TO_REJECTED_RATIO
    }

    /// Mean EsNo in dB, or 0 for an invalid dwell.
    pub fn average_esno(&self) -> f64 {
        if !self.is_valid() {
            return 0.0;
        }
        self.esno_sum as f64 / (f64::from(self.accepted) * 10.0)
    }

    /// Close the dwell. The record is produced whether or not it is valid.
    pub fn flush(&self) -> EsnoRecord {
        let valid = self.is_valid();
        if !valid {
            if self.timed_out {
                tracing::warn!(
                    receiver = %self.position.receiver,
                    segment = %self.segment,
                    "no SDD traffic before timeout, reporting EsNo 0; check the segment configuration"
                );
            } else {
                tracing::warn!(
                    receiver = %self.position.receiver,
                    segment = %self.segment,
                    accepted = self.accepted,
                    rejected = self.rejected,
                    total = self.total,
                    "dwell failed validity check, reporting EsNo 0"
                );
            }
        }

        EsnoRecord {
            receiver: self.position.receiver,
            segment: self.segment.clone(),
            ts: self.since,
            esno: self.average_esno(),
            valid,
            accepted: self.accepted,
            rejected: self.rejected,
            total: self.total,
        }
    }
}

/// Build an SDD datagram carrying `esno` with the given lock state.
#[cfg(any(test, feature = "testing"))]
pub fn encode_sdd(esno: u16, locked: bool) -> Vec<u8> {
    let mut buf = vec![0u8; MIN_SDD_LEN];
    if locked {
        buf[STATUS_OFFSET] = (1 << LOCKED_BIT) | (1 << TRACKED_BIT) | (1 << DEFINITIVE_BIT);
    }
    buf[ESNO_OFFSET..MIN_SDD_LEN].copy_from_slice(&esno.to_be_bytes());
    buf
}
