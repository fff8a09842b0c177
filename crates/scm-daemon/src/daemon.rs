//! # Event loop
//!
//! One cooperative loop on a current-thread runtime owns every piece of
//! mutable state. Each `select!` arm hands its handler exactly the state it
//! mutates:
//!
//! - SDD datagram, SDD silence, dwell deadline: [`ScanState`]
//! - MODCOD datagram: [`on_modcod_datagram`] with the MODCOD accumulator
//! - heartbeat tick: [`on_heartbeat`], no state
//! - monitor tick: [`on_monitor_tick`] with the degradation monitor
//! - SIGINT / SIGTERM: loop exit after the current handler
//!
//! The monitor check runs on its own task, but the arm awaits it before the
//! loop continues: checks never overlap with each other or with any other
//! handler.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};
use scm_core::actuator::{Actuator, Profile};
use scm_core::alarm::AlarmAction;
use scm_core::modcod::ModcodAccumulator;
use scm_core::monitor::{DegradationMonitor, Verdict};
use scm_core::scanner::SegmentIndex;
use scm_core::sdd::{LinkQualityAccumulator, SampleOutcome};
use scm_core::segments::SegmentTable;
use scm_core::storage::Storage;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::Settings;
use crate::socket::{self, MAX_DATAGRAM, TelemetrySocket};

// ─── Scan path ───────────────────────────────────────────────────────────────

/// Scanner plus the accumulator for the dwell in progress.
#[derive(Debug)]
pub struct ScanState {
    index: SegmentIndex,
    accu: LinkQualityAccumulator,
    dwell: TimeDelta,
}

impl ScanState {
    pub fn new(table: SegmentTable, dwell: std::time::Duration, now: DateTime<Utc>) -> Self {
        let index = SegmentIndex::new(table);
        let accu = LinkQualityAccumulator::new(index.position(), index.current_segment(), now);
        Self {
            index,
            accu,
            dwell: TimeDelta::from_std(dwell).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn index(&self) -> &SegmentIndex {
        &self.index
    }

    pub fn accumulator(&self) -> &LinkQualityAccumulator {
        &self.accu
    }

    /// Tune the hardware to the initial state and restart the first dwell.
    pub fn prime(&mut self, actuator: &impl Actuator, profile: Profile, now: DateTime<Utc>) {
        self.index.prime(actuator, profile);
        self.accu
            .reset(self.index.position(), self.index.current_segment(), now);
    }

    /// Feed one datagram. Returns `true` when it ended the dwell.
    pub async fn on_datagram<S: Storage, A: Actuator>(
        &mut self,
        datagram: &[u8],
        now: DateTime<Utc>,
        storage: &S,
        actuator: &A,
    ) -> bool {
        let outcome = self.accu.ingest(datagram, now);
        tracing::trace!(?outcome, len = datagram.len(), "SDD datagram");
        if outcome == SampleOutcome::Accepted && self.accu.is_due(now, self.dwell) {
            self.rotate(now, storage, actuator).await;
            return true;
        }
        false
    }

    /// No SDD traffic for the receive timeout: close the dwell as invalid.
    pub async fn on_silence<S: Storage, A: Actuator>(
        &mut self,
        now: DateTime<Utc>,
        storage: &S,
        actuator: &A,
    ) {
        self.accu.mark_timeout();
        self.rotate(now, storage, actuator).await;
    }

    /// Dwell deadline reached. Returns `true` when the dwell was closed.
    pub async fn on_deadline<S: Storage, A: Actuator>(
        &mut self,
        now: DateTime<Utc>,
        storage: &S,
        actuator: &A,
    ) -> bool {
        if !self.accu.is_due(now, self.dwell) {
            return false;
        }
        self.rotate(now, storage, actuator).await;
        true
    }

    /// Flush, store, advance, reset.
    async fn rotate<S: Storage, A: Actuator>(
        &mut self,
        now: DateTime<Utc>,
        storage: &S,
        actuator: &A,
    ) {
        let record = self.accu.flush();
        tracing::info!(
            receiver = %record.receiver,
            segment = %record.segment,
            esno = record.esno,
            valid = record.valid,
            accepted = record.accepted,
            rejected = record.rejected,
            total = record.total,
            "dwell complete"
        );
        if let Err(e) = storage.append_esno(&record).await {
            tracing::warn!(
                receiver = %record.receiver,
                segment = %record.segment,
                error = %e,
                "failed to store EsNo record"
            );
        }

        let next = self.index.advance(actuator);
        self.accu.reset(next, self.index.current_segment(), now);
    }
}

// ─── MODCOD path ─────────────────────────────────────────────────────────────

/// Feed one counter datagram. Returns `true` when a record was stored.
pub async fn on_modcod_datagram<S: Storage>(
    accu: &mut ModcodAccumulator,
    datagram: &[u8],
    now: DateTime<Utc>,
    storage: &S,
) -> bool {
    let persist = match accu.ingest(datagram, now) {
        Ok(persist) => persist,
        Err(e) => {
            tracing::warn!(error = %e, "undecodable MODCOD datagram");
            return false;
        }
    };
    if !persist {
        return false;
    }

    for line in accu.summary() {
        tracing::debug!("{line}");
    }
    let record = accu.record();
    match storage.append_modcod(&record).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "failed to store MODCOD record");
            false
        }
    }
}

// ─── Timers ──────────────────────────────────────────────────────────────────

pub async fn on_heartbeat<S: Storage>(storage: &S, now: DateTime<Utc>) {
    if let Err(e) = storage.upsert_heartbeat(now).await {
        tracing::warn!(error = %e, "failed to update heartbeat");
    }
}

/// Run one degradation check on a worker task and wait for it. The monitor
/// only advances after a successful check.
pub async fn on_monitor_tick<S: Storage, L: AlarmAction>(
    monitor: &mut DegradationMonitor,
    storage: &Arc<S>,
    alarm: &Arc<L>,
    now: DateTime<Utc>,
) -> anyhow::Result<Verdict> {
    let job = monitor.job(now);
    let storage = Arc::clone(storage);
    let alarm = Arc::clone(alarm);
    let handle = tokio::spawn(async move { job.run(&*storage, &*alarm).await });

    let verdict = handle
        .await
        .context("degradation check task failed")?
        .context("degradation check failed")?;

    tracing::info!(
        receiver = %verdict.target.receiver,
        segment = %verdict.target.segment,
        esno = verdict.average.esno,
        count = verdict.average.count,
        flags = %verdict.flags,
        "degradation check complete"
    );
    monitor.advance();
    Ok(verdict)
}

// ─── Loop ────────────────────────────────────────────────────────────────────

/// Sockets the loop reads; `None` disables that path.
#[derive(Debug, Default)]
pub struct Sockets {
    pub sdd: Option<TelemetrySocket>,
    pub modcod: Option<TelemetrySocket>,
}

pub struct Daemon<S, A, L> {
    settings: Settings,
    scan: ScanState,
    modcod: ModcodAccumulator,
    monitor: DegradationMonitor,
    storage: Arc<S>,
    actuator: A,
    alarm: Arc<L>,
}

impl<S: Storage, A: Actuator, L: AlarmAction> Daemon<S, A, L> {
    pub fn new(
        settings: Settings,
        table: SegmentTable,
        storage: Arc<S>,
        actuator: A,
        alarm: Arc<L>,
    ) -> Self {
        let now = Utc::now();
        let monitor = DegradationMonitor::new(&table, settings.monitor_settings());
        tracing::info!(
            targets = monitor.targets().len(),
            minimum_samples = monitor.minimum_expected_samples(),
            "degradation monitor ready"
        );
        Self {
            scan: ScanState::new(table, settings.scan.dwell, now),
            modcod: ModcodAccumulator::new(now),
            monitor,
            settings,
            storage,
            actuator,
            alarm,
        }
    }

    /// Run until `shutdown` resolves. Socket failures and failed degradation
    /// checks end the loop with an error.
    pub async fn run(
        mut self,
        sockets: Sockets,
        shutdown: impl Future<Output = ()>,
    ) -> anyhow::Result<()> {
        let sdd = if self.settings.scan.enabled {
            sockets.sdd.as_ref()
        } else {
            None
        };
        let modcod = if self.settings.telemetry.modcod_enabled {
            sockets.modcod.as_ref()
        } else {
            None
        };

        if sdd.is_some() {
            self.scan
                .prime(&self.actuator, self.settings.device.default_profile, Utc::now());
        }

        let dwell = self.settings.scan.dwell;
        let receive_timeout = self.settings.scan.receive_timeout;

        let mut heartbeat = tokio::time::interval(self.settings.heartbeat_period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let period = self.settings.monitor.period;
        let mut monitor_tick = tokio::time::interval_at(Instant::now() + period, period);
        monitor_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let silence = tokio::time::sleep(receive_timeout);
        let deadline = tokio::time::sleep(dwell);
        tokio::pin!(silence, deadline, shutdown);

        let mut sdd_buf = vec![0u8; MAX_DATAGRAM];
        let mut modcod_buf = vec![0u8; MAX_DATAGRAM];

        tracing::info!(
            sdd = sdd.is_some(),
            modcod = modcod.is_some(),
            "event loop started"
        );

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }

                ready = socket::readable(sdd) => {
                    ready.context("SDD socket failed")?;
                    let Some(sock) = sdd else { continue };
                    while let Some(n) = sock.try_receive(&mut sdd_buf).context("SDD receive failed")? {
                        let rotated = self
                            .scan
                            .on_datagram(&sdd_buf[..n], Utc::now(), &*self.storage, &self.actuator)
                            .await;
                        if rotated {
                            deadline.as_mut().reset(Instant::now() + dwell);
                        }
                    }
                    silence.as_mut().reset(Instant::now() + receive_timeout);
                }

                ready = socket::readable(modcod) => {
                    ready.context("MODCOD socket failed")?;
                    let Some(sock) = modcod else { continue };
                    while let Some(n) = sock.try_receive(&mut modcod_buf).context("MODCOD receive failed")? {
                        on_modcod_datagram(&mut self.modcod, &modcod_buf[..n], Utc::now(), &*self.storage)
                            .await;
                    }
                }

                _ = &mut silence, if sdd.is_some() => {
                    tracing::warn!(
                        receiver = %self.scan.accumulator().receiver(),
                        timeout_s = receive_timeout.as_secs(),
                        "no SDD traffic"
                    );
                    self.scan
                        .on_silence(Utc::now(), &*self.storage, &self.actuator)
                        .await;
                    let now = Instant::now();
                    silence.as_mut().reset(now + receive_timeout);
                    deadline.as_mut().reset(now + dwell);
                }

                _ = &mut deadline, if sdd.is_some() => {
                    self.scan
                        .on_deadline(Utc::now(), &*self.storage, &self.actuator)
                        .await;
                    // Re-arm from the dwell start so a late datagram cannot
                    // stretch the next dwell.
                    let elapsed = (Utc::now() - self.scan.accumulator().since())
                        .to_std()
                        .unwrap_or_default();
                    let remaining = dwell.saturating_sub(elapsed);
                    deadline.as_mut().reset(Instant::now() + remaining.max(std::time::Duration::from_millis(100)));
                }

                _ = heartbeat.tick() => {
                    on_heartbeat(&*self.storage, Utc::now()).await;
                }

                _ = monitor_tick.tick() => {
                    on_monitor_tick(&mut self.monitor, &self.storage, &self.alarm, Utc::now()).await?;
                }
            }
        }

        tracing::info!("event loop stopped");
        Ok(())
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
