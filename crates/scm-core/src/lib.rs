//! # scm-core
//!
//! Channel monitoring logic for a dual-receiver satellite demodulator.
//!
//! The daemon dwells on each configured network segment in turn, averages the
//! demodulator's EsNo reports while tuned there, tracks MODCOD frame counters,
//! and periodically checks each segment's long-term EsNo against its alarm
//! threshold. This crate holds that logic free of sockets, SNMP and databases;
//! the hardware, alarm and storage boundaries are traits.
//!
//! ## Crate structure
//!
//! - [`segments`] - Receivers, segments, and the segment file parser
//! - [`scanner`] - Round-robin scan order and per-receiver cursors
//! - [`sdd`] - SDD datagram decoding and the per-dwell EsNo accumulator
//! - [`modcod`] - MODCOD counter decoding, deltas, shares, and bitrate
//! - [`monitor`] - Long-window EsNo degradation checks
//! - [`actuator`] - Demodulator control seam
//! - [`alarm`] - External alarm seam and observation flags
//! - [`storage`] - Time-series storage seam and in-memory backend

pub mod actuator;
pub mod alarm;
pub mod modcod;
pub mod monitor;
pub mod scanner;
pub mod sdd;
pub mod segments;
pub mod storage;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
