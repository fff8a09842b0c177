//! Recording fakes for the hardware, alarm and storage seams.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::actuator::{Actuator, ActuatorError, Profile};
use crate::alarm::{Alarm, AlarmAction, AlarmError};
use crate::segments::Receiver;
use crate::storage::{EsnoRecord, ModcodRecord, Storage, StorageError, WindowedAverage};

/// One command issued to a [`RecordingActuator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Retune(Receiver, String),
    Select(Receiver),
    Activate(Receiver, Profile),
}

/// Actuator that records every command, optionally failing each one after
/// recording it.
#[derive(Debug, Default)]
pub struct RecordingActuator {
    commands: Mutex<Vec<Command>>,
    fail: bool,
}

impl RecordingActuator {
    pub fn failing() -> Self {
        Self {
            commands: Mutex::default(),
            fail: true,
        }
    }

    /// Drain the recorded commands.
    pub fn take(&self) -> Vec<Command> {
        std::mem::take(&mut *self.commands.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn record(&self, command: Command) -> Result<(), ActuatorError> {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(command);
        if self.fail {
            Err(ActuatorError::Encode("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

impl Actuator for RecordingActuator {
    fn retune(&self, receiver: Receiver, frequency: &str) -> Result<(), ActuatorError> {
        self.record(Command::Retune(receiver, frequency.to_owned()))
    }

    fn select_receiver(&self, receiver: Receiver) -> Result<(), ActuatorError> {
        self.record(Command::Select(receiver))
    }

    fn activate_profile(&self, receiver: Receiver, profile: Profile) -> Result<(), ActuatorError> {
        self.record(Command::Activate(receiver, profile))
    }
}

/// Alarm action that records every raised alarm.
#[derive(Debug, Default)]
pub struct RecordingAlarm {
    raised: Mutex<Vec<Alarm>>,
    fail: bool,
}

impl RecordingAlarm {
    pub fn failing() -> Self {
        Self {
            raised: Mutex::default(),
            fail: true,
        }
    }

    pub fn take(&self) -> Vec<Alarm> {
        std::mem::take(&mut *self.raised.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl AlarmAction for RecordingAlarm {
    async fn raise(&self, alarm: &Alarm) -> Result<(), AlarmError> {
        self.raised
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(alarm.clone());
        if self.fail {
            Err(AlarmError::Exit("exit status: 1".into()))
        } else {
            Ok(())
        }
    }
}

/// Storage whose every call fails. Writes report a backend error; the
/// windowed query reports a malformed result.
#[derive(Debug, Default)]
pub struct FailingStorage;

impl Storage for FailingStorage {
    async fn append_esno(&self, _record: &EsnoRecord) -> Result<(), StorageError> {
        Err(StorageError::Backend("injected failure".into()))
    }

    async fn append_modcod(&self, _record: &ModcodRecord) -> Result<(), StorageError> {
        Err(StorageError::Backend("injected failure".into()))
    }

    async fn windowed_average(
        &self,
        _receiver: Receiver,
        _segment: &str,
        _since: DateTime<Utc>,
    ) -> Result<Option<WindowedAverage>, StorageError> {
        Err(StorageError::Malformed("injected shape".into()))
    }

    async fn upsert_heartbeat(&self, _ts: DateTime<Utc>) -> Result<(), StorageError> {
        Err(StorageError::Backend("injected failure".into()))
    }
}
