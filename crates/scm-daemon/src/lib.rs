//! # scm-daemon
//!
//! I/O shims and the event loop around `scm-core`: TOML settings, SNMP
//! actuation, PostgreSQL storage, UDP telemetry sockets, the external
//! alarm script, and a read-only HTTP API over the stored statistics.

pub mod alarm;
pub mod api;
pub mod config;
pub mod daemon;
pub mod snmp;
pub mod socket;
pub mod store;
