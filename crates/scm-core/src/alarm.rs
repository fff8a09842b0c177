//! External alarm action seam.
//!
//! The monitor only decides *when* to alarm. What an alarm does (mail,
//! SNMP trap, ticket) lives in an external program; the daemon crate's
//! implementation runs it with `(receiver label, segment name, flag bits)`.

use std::fmt;
use std::future::Future;

use thiserror::Error;

use crate::segments::Receiver;

bitflags::bitflags! {
    /// Observation flags passed to the alarm action as a bitmask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AlarmFlags: u8 {
        /// Fewer records than expected in the observation window.
        const LOW_CONFIDENCE = 1 << 0;
        /// Average EsNo below the segment's threshold.
        const THRESHOLD_BREACHED = 1 << 1;
    }
}

/// The raw bitmask, as handed to the alarm program.
impl fmt::Display for AlarmFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.bits().fmt(f)
    }
}

/// Everything an alarm action is told.
#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    pub receiver: Receiver,
    pub segment: String,
    pub flags: AlarmFlags,
}

#[derive(Debug, Error)]
pub enum AlarmError {
    #[error("failed to launch alarm action: {0}")]
    Launch(#[from] std::io::Error),
    #[error("alarm action exited with {0}")]
    Exit(String),
}

pub trait AlarmAction: Send + Sync + 'static {
    fn raise(&self, alarm: &Alarm) -> impl Future<Output = Result<(), AlarmError>> + Send;
}
