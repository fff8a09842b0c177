//! Time-series storage seam.
//!
//! Three collections: per-dwell EsNo records, MODCOD snapshots, and a single
//! heartbeat timestamp that lets the web front end tell whether the daemon is
//! alive. The daemon crate provides the PostgreSQL implementation;
//! [`MemoryStorage`] backs tests.

use std::future::Future;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::modcod::ACTIVE_MODCODS;
use crate::segments::Receiver;

// ─── Records ─────────────────────────────────────────────────────────────────

/// Outcome of one dwell.
#[derive(Debug, Clone, PartialEq)]
pub struct EsnoRecord {
    pub receiver: Receiver,
    pub segment: String,
    /// Start of the dwell.
    pub ts: DateTime<Utc>,
    /// Mean EsNo in dB; 0 when the dwell was invalid.
    pub esno: f64,
    pub valid: bool,
    pub accepted: u32,
    pub rejected: u32,
    pub total: u32,
}

/// One persisted MODCOD interval.
#[derive(Debug, Clone, PartialEq)]
pub struct ModcodRecord {
    pub ts: DateTime<Utc>,
    pub bitrate_mbps: f64,
    /// Grand total of frames counted by the hardware.
    pub total: u64,
    /// Share of each active MODCOD (1..=28) in tenths of a percent.
    pub per_mille: [u16; ACTIVE_MODCODS],
}

/// Mean EsNo and record count over a trailing window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowedAverage {
    pub esno: f64,
    pub count: u64,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("unexpected result shape: {0}")]
    Malformed(String),
}

// ─── Trait ───────────────────────────────────────────────────────────────────

pub trait Storage: Send + Sync + 'static {
    fn append_esno(
        &self,
        record: &EsnoRecord,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn append_modcod(
        &self,
        record: &ModcodRecord,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Mean EsNo and record count for `(receiver, segment)` over records
    /// strictly newer than `since`. `Ok(None)` means no matching records.
    fn windowed_average(
        &self,
        receiver: Receiver,
        segment: &str,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<WindowedAverage>, StorageError>> + Send;

    fn upsert_heartbeat(
        &self,
        ts: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;
}

// ─── In-memory implementation ────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryInner {
    esno: Vec<EsnoRecord>,
    modcod: Vec<ModcodRecord>,
    heartbeat: Option<DateTime<Utc>>,
}

/// Process-local storage with the same query semantics as the database.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryInner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn esno_records(&self) -> Vec<EsnoRecord> {
        self.lock().esno.clone()
    }

    pub fn modcod_records(&self) -> Vec<ModcodRecord> {
        self.lock().modcod.clone()
    }

    pub fn heartbeat(&self) -> Option<DateTime<Utc>> {
        self.lock().heartbeat
    }

    fn average(&self, receiver: Receiver, segment: &str, since: DateTime<Utc>) -> Option<WindowedAverage> {
        let inner = self.lock();
        let (sum, count) = inner
            .esno
            .iter()
            .filter(|r| r.receiver == receiver && r.segment == segment && r.ts > since)
            .fold((0.0, 0u64), |(sum, n), r| (sum + r.esno, n + 1));
        (count > 0).then(|| WindowedAverage {
            esno: sum / count as f64,
            count,
        })
    }
}

impl Storage for MemoryStorage {
    async fn append_esno(&self, record: &EsnoRecord) -> Result<(), StorageError> {
        self.lock().esno.push(record.clone());
        Ok(())
    }

    async fn append_modcod(&self, record: &ModcodRecord) -> Result<(), StorageError> {
        self.lock().modcod.push(record.clone());
        Ok(())
    }

    async fn windowed_average(
        &self,
        receiver: Receiver,
        segment: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<WindowedAverage>, StorageError> {
        Ok(self.average(receiver, segment, since))
    }

    async fn upsert_heartbeat(&self, ts: DateTime<Utc>) -> Result<(), StorageError> {
        self.lock().heartbeat = Some(ts);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn record(receiver: Receiver, segment: &str, ts: DateTime<Utc>, esno: f64) -> EsnoRecord {
        EsnoRecord {
            receiver,
            segment: segment.into(),
            ts,
            esno,
            valid: esno > 0.0,
            accepted: 1,
            rejected: 0,
            total: 1,
        }
    }

    #[tokio::test]
    async fn windowed_average_filters_pair_and_window() {
        let t0 = Utc.with_ymd_and_hms(2015, 6, 1, 0, 0, 0).unwrap();
        let store = MemoryStorage::new();
        for (i, esno) in [4.0, 6.0, 8.0].into_iter().enumerate() {
            let ts = t0 + TimeDelta::seconds(30 * (i as i64 + 1));
            store.append_esno(&record(Receiver::Rx1, "A", ts, esno)).await.unwrap();
        }
        store
            .append_esno(&record(Receiver::Rx2, "A", t0 + TimeDelta::seconds(60), 100.0))
            .await
            .unwrap();
        store
            .append_esno(&record(Receiver::Rx1, "B", t0 + TimeDelta::seconds(60), 100.0))
            .await
            .unwrap();

        let avg = store.windowed_average(Receiver::Rx1, "A", t0).await.unwrap().unwrap();
        assert_eq!(avg.count, 3);
        assert_eq!(avg.esno, 6.0);

        // `since` is exclusive
        let avg = store
            .windowed_average(Receiver::Rx1, "A", t0 + TimeDelta::seconds(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(avg.count, 2);
        assert_eq!(avg.esno, 7.0);
    }

    #[tokio::test]
    async fn windowed_average_without_records_is_none() {
        let store = MemoryStorage::new();
        let since = Utc.with_ymd_and_hms(2015, 6, 1, 0, 0, 0).unwrap();
        assert!(store.windowed_average(Receiver::Rx1, "A", since).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn heartbeat_is_overwritten() {
        let store = MemoryStorage::new();
        let t0 = Utc.with_ymd_and_hms(2015, 6, 1, 0, 0, 0).unwrap();
        store.upsert_heartbeat(t0).await.unwrap();
        store.upsert_heartbeat(t0 + TimeDelta::seconds(60)).await.unwrap();
        assert_eq!(store.heartbeat(), Some(t0 + TimeDelta::seconds(60)));
    }
}
