//! Alarm action backed by an external program.
//!
//! The program is run as `<script> <receiver> <segment> <flags>`, e.g.
//! `./esno_monitor.sh RX2 Backhaul 3`. It is started directly, not through a
//! shell, so segment names need no quoting.

use std::path::{Path, PathBuf};

use scm_core::alarm::{Alarm, AlarmAction, AlarmError};
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct ScriptAlarm {
    script: PathBuf,
}

impl ScriptAlarm {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
        }
    }

    pub fn script(&self) -> &Path {
        &self.script
    }
}

impl AlarmAction for ScriptAlarm {
    async fn raise(&self, alarm: &Alarm) -> Result<(), AlarmError> {
        let status = Command::new(&self.script)
            .arg(alarm.receiver.label())
            .arg(&alarm.segment)
            .arg(alarm.flags.to_string())
            .kill_on_drop(true)
            .status()
            .await?;

        if !status.success() {
            tracing::warn!(
                script = %self.script.display(),
                receiver = %alarm.receiver,
                segment = %alarm.segment,
                %status,
                "alarm script failed"
            );
            return Err(AlarmError::Exit(status.to_string()));
        }
        tracing::info!(
            script = %self.script.display(),
            receiver = %alarm.receiver,
            segment = %alarm.segment,
            flags = %alarm.flags,
            "alarm script completed"
        );
        Ok(())
    }
}
