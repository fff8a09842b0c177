//! # Network Segments
//!
//! Static scan targets, one ordered list per receiver, loaded once from the
//! line-oriented segment file:
//!
//! ```text
//! # receiver, name, frequency, alarm threshold (EsNo dB)
//! RX1, Uplink North, 1234500, 5.0
//! RX2, Backhaul,     1100250, 6.5
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Longest accepted segment name, in characters.
pub const MAX_NAME_LEN: usize = 255;

/// Longest accepted frequency string, in digits.
pub const MAX_FREQUENCY_DIGITS: usize = 11;

// ─── Receiver ────────────────────────────────────────────────────────────────

/// One of the two tuner chains of the demodulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Receiver {
    #[serde(rename = "RX1")]
    Rx1,
    #[serde(rename = "RX2")]
    Rx2,
}

impl Receiver {
    pub const ALL: [Receiver; 2] = [Receiver::Rx1, Receiver::Rx2];

    /// Zero-based slot used to index per-receiver arrays.
    pub fn index(self) -> usize {
        match self {
            Receiver::Rx1 => 0,
            Receiver::Rx2 => 1,
        }
    }

    /// One-based number used by the device management interface.
    pub fn number(self) -> u8 {
        self.index() as u8 + 1
    }

    pub fn label(self) -> &'static str {
        match self {
            Receiver::Rx1 => "RX1",
            Receiver::Rx2 => "RX2",
        }
    }

    pub fn from_number(n: u32) -> Option<Self> {
        match n {
            1 => Some(Receiver::Rx1),
            2 => Some(Receiver::Rx2),
            _ => None,
        }
    }
}

impl fmt::Display for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Receiver {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RX1" => Ok(Receiver::Rx1),
            "RX2" => Ok(Receiver::Rx2),
            other => Err(format!("unknown receiver: {other}")),
        }
    }
}

// ─── Segment ─────────────────────────────────────────────────────────────────

/// One configured tuning target.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSegment {
    pub name: String,
    /// Tuner frequency as the device expects it (decimal digits, device units).
    pub frequency: String,
    /// Long-term EsNo (dB) below which the degradation monitor raises an alarm.
    pub alarm_threshold: f32,
}

/// Address of a segment inside a [`SegmentTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentPosition {
    pub receiver: Receiver,
    pub index: usize,
}

impl SegmentPosition {
    pub fn new(receiver: Receiver, index: usize) -> Self {
        Self { receiver, index }
    }
}

impl fmt::Display for SegmentPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.receiver, self.index)
    }
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SegmentConfigError {
    #[error("could not read segment file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: {reason} ('{text}')")]
    Malformed {
        line: usize,
        text: String,
        reason: String,
    },
    #[error("no network segments have been configured")]
    Empty,
}

// ─── Table ───────────────────────────────────────────────────────────────────

/// Parsed segment configuration: one ordered sequence per receiver.
///
/// At least one of the two sequences is non-empty; construction fails
/// otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentTable {
    receivers: [Vec<NetworkSegment>; 2],
}

impl SegmentTable {
    /// Build a table from already-validated per-receiver lists.
    pub fn new(
        rx1: Vec<NetworkSegment>,
        rx2: Vec<NetworkSegment>,
    ) -> Result<Self, SegmentConfigError> {
        if rx1.is_empty() && rx2.is_empty() {
            return Err(SegmentConfigError::Empty);
        }
        Ok(Self {
            receivers: [rx1, rx2],
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SegmentConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SegmentConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse the line-oriented segment format. Any malformed line is an error.
    pub fn parse(input: &str) -> Result<Self, SegmentConfigError> {
        let mut receivers: [Vec<NetworkSegment>; 2] = [Vec::new(), Vec::new()];

        for (idx, raw) in input.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (receiver, segment) = parse_line(line).map_err(|reason| {
                SegmentConfigError::Malformed {
                    line: idx + 1,
                    text: line.to_string(),
                    reason,
                }
            })?;

            tracing::info!(
                segment = %segment.name,
                receiver = %receiver,
                frequency = %segment.frequency,
                alarm_threshold = format_args!("{:.2}", segment.alarm_threshold),
                "segment added"
            );
            receivers[receiver.index()].push(segment);
        }

        let [rx1, rx2] = receivers;
        let table = Self::new(rx1, rx2)?;
        tracing::info!(targets = table.len(), "segment file parsed");
        Ok(table)
    }

    pub fn segments(&self, receiver: Receiver) -> &[NetworkSegment] {
        &self.receivers[receiver.index()]
    }

    pub fn get(&self, position: SegmentPosition) -> Option<&NetworkSegment> {
        self.segments(position.receiver).get(position.index)
    }

    /// Total segment count across both receivers.
    pub fn len(&self) -> usize {
        self.receivers.iter().map(Vec::len).sum()
    }

    /// Always false for a constructed table.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every segment, RX1 first, each receiver in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = (SegmentPosition, &NetworkSegment)> {
        Receiver::ALL.into_iter().flat_map(move |rx| {
            self.segments(rx)
                .iter()
                .enumerate()
                .map(move |(i, seg)| (SegmentPosition::new(rx, i), seg))
        })
    }
}

fn parse_line(line: &str) -> Result<(Receiver, NetworkSegment), String> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 4 {
        return Err(format!("expected 4 comma-separated fields, found {}", fields.len()));
    }

    let receiver = parse_receiver(fields[0])?;

    let name = fields[1];
    if name.is_empty() {
        return Err("segment name is empty".into());
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!("segment name longer than {MAX_NAME_LEN} characters"));
    }

    let frequency = fields[2];
    if frequency.is_empty() || !frequency.bytes().all(|b| b.is_ascii_digit()) {
        return Err("frequency must be decimal digits".into());
    }
    if frequency.len() > MAX_FREQUENCY_DIGITS {
        return Err(format!("frequency longer than {MAX_FREQUENCY_DIGITS} digits"));
    }

    let alarm_threshold: f32 = fields[3]
        .parse()
        .map_err(|e| format!("invalid alarm threshold '{}': {e}", fields[3]))?;
    if !alarm_threshold.is_finite() {
        return Err("alarm threshold must be finite".into());
    }

    Ok((
        receiver,
        NetworkSegment {
            name: name.to_string(),
            frequency: frequency.to_string(),
            alarm_threshold,
        },
    ))
}

/// Accepts any non-digit prefix followed by the receiver number (`RX1`, `rx 2`).
fn parse_receiver(field: &str) -> Result<Receiver, String> {
    let digits = field.trim_start_matches(|c: char| !c.is_ascii_digit());
    if digits.is_empty() {
        return Err(format!("no receiver number in '{field}'"));
    }
    if digits.len() == field.len() {
        return Err(format!("receiver '{field}' needs a prefix such as RX"));
    }
    let n: u32 = digits
        .parse()
        .map_err(|_| format!("invalid receiver '{field}'"))?;
    Receiver::from_number(n).ok_or_else(|| format!("invalid receiver (RX{n})"))
}
