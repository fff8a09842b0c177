//! Hardware control seam.
//!
//! The scanner drives the demodulator through this trait. Commands are
//! fire-and-forget: an implementation reports whether the command could be
//! issued, never whether the device applied it. Callers log failures and
//! carry on; the next scheduled advance simply tries again.

use std::sync::Arc;

use thiserror::Error;

use crate::segments::Receiver;

/// Demodulator configuration profile slot (the device has two per receiver).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Profile {
    #[default]
    First,
    Second,
}

impl Profile {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Profile::First),
            1 => Some(Profile::Second),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Profile::First => 0,
            Profile::Second => 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("command could not be encoded: {0}")]
    Encode(String),
    #[error("command could not be sent: {0}")]
    Send(#[from] std::io::Error),
}

pub trait Actuator {
    /// Tune `receiver` to `frequency` (decimal digits, device units).
    fn retune(&self, receiver: Receiver, frequency: &str) -> Result<(), ActuatorError>;

    /// Make `receiver` the one whose telemetry the device reports.
    fn select_receiver(&self, receiver: Receiver) -> Result<(), ActuatorError>;

    /// Activate a configuration profile on `receiver`.
    fn activate_profile(&self, receiver: Receiver, profile: Profile) -> Result<(), ActuatorError>;
}

impl<A: Actuator + ?Sized> Actuator for &A {
    fn retune(&self, receiver: Receiver, frequency: &str) -> Result<(), ActuatorError> {
        (**self).retune(receiver, frequency)
    }

    fn select_receiver(&self, receiver: Receiver) -> Result<(), ActuatorError> {
        (**self).select_receiver(receiver)
    }

    fn activate_profile(&self, receiver: Receiver, profile: Profile) -> Result<(), ActuatorError> {
        (**self).activate_profile(receiver, profile)
    }
}

impl<A: Actuator + ?Sized> Actuator for Arc<A> {
    fn retune(&self, receiver: Receiver, frequency: &str) -> Result<(), ActuatorError> {
        (**self).retune(receiver, frequency)
    }

    fn select_receiver(&self, receiver: Receiver) -> Result<(), ActuatorError> {
        (**self).select_receiver(receiver)
    }

    fn activate_profile(&self, receiver: Receiver, profile: Profile) -> Result<(), ActuatorError> {
        (**self).activate_profile(receiver, profile)
    }
}
