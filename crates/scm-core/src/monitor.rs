//! # EsNo Degradation Monitor
//!
//! Walks every configured segment on a long period, one segment per tick,
//! and compares its average EsNo over a trailing observation window with the
//! segment's alarm threshold.
//!
//! Two observations are made per check:
//! - **low confidence**: fewer records than the scan schedule should have
//!   produced, with 10% slack:
//!   `floor(window / (segments * dwell))`, minus 10%, truncated
//! - **threshold breached**: average EsNo below the configured threshold
//!
//! Either one raises the external alarm action exactly once for the checked
//! segment. The storage query is the only fallible step that matters: a
//! missing or malformed result means the monitoring pipeline itself cannot be
//! trusted, and the error is returned for the caller to treat as fatal.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

use crate::alarm::{Alarm, AlarmAction, AlarmFlags};
use crate::segments::{Receiver, SegmentTable};
use crate::storage::{Storage, StorageError, WindowedAverage};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("no EsNo records for {segment} on {receiver} in the observation window")]
    NoData { receiver: Receiver, segment: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Timing the monitor derives its expectations from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Trailing window the average is taken over.
    pub observation_window: Duration,
    /// Scanner dwell per segment.
    pub dwell: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            observation_window: Duration::from_secs(86_400),
            dwell: Duration::from_secs(30),
        }
    }
}

/// One segment as the monitor sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorTarget {
    pub receiver: Receiver,
    pub segment: String,
    pub threshold: f32,
}

/// Result of one completed check.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub target: MonitorTarget,
    pub average: WindowedAverage,
    pub flags: AlarmFlags,
}

/// Minimum record count expected for one segment over `settings`' window
/// when `segments` segments share the scanner.
pub fn minimum_expected_samples(settings: &MonitorSettings, segments: usize) -> u64 {
    let per_cycle = settings.dwell.as_secs().max(1) * segments.max(1) as u64;
    let expected = settings.observation_window.as_secs() / per_cycle;
    (expected as f64 - 0.1 * expected as f64) as u64
}

/// Round-robin cursor over every (receiver, segment) pair, RX1 first.
#[derive(Debug, Clone)]
pub struct DegradationMonitor {
    targets: Vec<MonitorTarget>,
    cursor: usize,
    settings: MonitorSettings,
    min_samples: u64,
}

impl DegradationMonitor {
    pub fn new(table: &SegmentTable, settings: MonitorSettings) -> Self {
        let targets: Vec<MonitorTarget> = table
            .iter()
            .map(|(pos, seg)| MonitorTarget {
                receiver: pos.receiver,
                segment: seg.name.clone(),
                threshold: seg.alarm_threshold,
            })
            .collect();
        let min_samples = minimum_expected_samples(&settings, targets.len());

        Self {
            targets,
            cursor: 0,
            settings,
            min_samples,
        }
    }

    pub fn targets(&self) -> &[MonitorTarget] {
        &self.targets
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> &MonitorTarget {
        &self.targets[self.cursor]
    }

    pub fn minimum_expected_samples(&self) -> u64 {
        self.min_samples
    }

    /// Self-contained work item for the segment under the cursor, suitable
    /// for running on a worker task.
    pub fn job(&self, now: DateTime<Utc>) -> MonitorJob {
        let window = TimeDelta::from_std(self.settings.observation_window)
            .unwrap_or(TimeDelta::MAX);
        MonitorJob {
            target: self.current().clone(),
            since: now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC),
            min_samples: self.min_samples,
        }
    }

    /// Move to the next pair, wrapping.
    pub fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.targets.len();
    }

    /// Check the current pair and advance. The cursor stays put on error.
    pub async fn check<S: Storage, A: AlarmAction>(
        &mut self,
        storage: &S,
        alarm: &A,
        now: DateTime<Utc>,
    ) -> Result<Verdict, MonitorError> {
        let verdict = self.job(now).run(storage, alarm).await?;
        self.advance();
        Ok(verdict)
    }
}

/// One pending degradation check.
#[derive(Debug, Clone)]
pub struct MonitorJob {
    pub target: MonitorTarget,
    pub since: DateTime<Utc>,
    pub min_samples: u64,
}

impl MonitorJob {
    /// Flags the observations `average` warrants for this job's target.
    pub fn evaluate(&self, average: &WindowedAverage) -> AlarmFlags {
        let mut flags = AlarmFlags::empty();
        if average.count < self.min_samples {
            flags.insert(AlarmFlags::LOW_CONFIDENCE);
        }
        if average.esno < f64::from(self.target.threshold) {
            flags.insert(AlarmFlags::THRESHOLD_BREACHED);
        }
        flags
    }

    /// Query storage, evaluate, and raise the alarm when warranted.
    pub async fn run<S: Storage, A: AlarmAction>(
        self,
        storage: &S,
        alarm: &A,
    ) -> Result<Verdict, MonitorError> {
        let MonitorTarget {
            receiver,
            ref segment,
            threshold,
        } = self.target;

        let average = storage
            .windowed_average(receiver, segment, self.since)
            .await?
            .ok_or_else(|| MonitorError::NoData {
                receiver,
                segment: segment.clone(),
            })?;

        let flags = self.evaluate(&average);

        if flags.contains(AlarmFlags::LOW_CONFIDENCE) {
            tracing::warn!(
                receiver = %receiver,
                segment = %segment,
                count = average.count,
                expected = self.min_samples,
                "too few EsNo records in observation window"
            );
        }
        if flags.contains(AlarmFlags::THRESHOLD_BREACHED) {
            tracing::warn!(
                receiver = %receiver,
                segment = %segment,
                esno = average.esno,
                threshold,
                "EsNo threshold reached"
            );
        }

        if flags.is_empty() {
            tracing::info!(
                receiver = %receiver,
                segment = %segment,
                esno = average.esno,
                count = average.count,
                "EsNo within limits"
            );
        } else {
            let event = Alarm {
                receiver,
                segment: segment.clone(),
                flags,
            };
            tracing::warn!(receiver = %receiver, segment = %segment, flags = %flags, "raising alarm");
            if let Err(e) = alarm.raise(&event).await {
                tracing::error!(
                    receiver = %receiver,
                    segment = %segment,
                    error = %e,
                    "alarm action failed"
                );
            }
        }

        Ok(Verdict {
            target: self.target,
            average,
            flags,
        })
    }
}
