//! Satellite channel monitor daemon
//!
//! Scans the demodulator's network segments, stores per-dwell EsNo and
//! MODCOD statistics, and runs the alarm script when a segment's long-term
//! EsNo degrades.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use scm_core::segments::SegmentTable;
use scm_daemon::alarm::ScriptAlarm;
use scm_daemon::api::{self, ApiState};
use scm_daemon::config::Settings;
use scm_daemon::daemon::{self, Daemon, Sockets};
use scm_daemon::snmp::SnmpActuator;
use scm_daemon::socket::TelemetrySocket;
use scm_daemon::store::{self, PgStorage};

/// Satellite channel monitor daemon.
#[derive(Parser, Debug)]
#[command(name = "scm-daemon", about = "Satellite channel monitor daemon")]
struct Cli {
    /// Daemon settings (TOML). Missing file means defaults.
    #[arg(long, default_value = "scm-daemon.toml")]
    config: PathBuf,

    /// Segment file; overrides `[scan] segments_file`.
    #[arg(long)]
    segments: Option<PathBuf>,

    /// PostgreSQL URL; overrides `[storage] database_url`.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Parse both files, report, and exit.
    #[arg(long, default_value_t = false)]
    check: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::load(&cli.config)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    if let Some(path) = cli.segments {
        settings.scan.segments_file = path;
    }
    if let Some(url) = cli.database_url {
        settings.database_url = url;
    }

    let table = SegmentTable::from_file(&settings.scan.segments_file).with_context(|| {
        format!(
            "loading segments from {}",
            settings.scan.segments_file.display()
        )
    })?;
    tracing::info!(
        rx1 = table.segments(scm_core::segments::Receiver::Rx1).len(),
        rx2 = table.segments(scm_core::segments::Receiver::Rx2).len(),
        dwell_s = settings.scan.dwell.as_secs(),
        "segment table loaded"
    );

    if cli.check {
        tracing::info!("configuration OK");
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    runtime.block_on(run(settings, table))
}

async fn run(settings: Settings, table: SegmentTable) -> anyhow::Result<()> {
    tracing::info!(
        device = %settings.device.snmp_addr(),
        sdd = %settings.telemetry.sdd_addr(),
        modcod = %settings.telemetry.modcod_addr(),
        "scm-daemon starting"
    );

    let pool = store::connect(&settings.database_url)
        .await
        .context("connecting to database")?;
    store::migrate(&pool).await?;

    let api_task = settings.api_listen.map(|addr| {
        let state = ApiState::new(pool.clone());
        tokio::spawn(async move {
            if let Err(e) = api::serve(addr, state, daemon::shutdown_signal()).await {
                tracing::error!(error = %e, "HTTP API stopped");
            }
        })
    });
    let storage = Arc::new(PgStorage::new(pool));

    let actuator = SnmpActuator::new(
        settings.device.snmp_addr(),
        settings.device.write_community.clone(),
        settings.device.default_profile,
    )
    .context("opening SNMP socket")?;

    let sockets = Sockets {
        sdd: if settings.scan.enabled {
            Some(
                TelemetrySocket::bind(settings.telemetry.sdd_addr(), "sdd")
                    .await
                    .context("binding SDD socket")?,
            )
        } else {
            None
        },
        modcod: if settings.telemetry.modcod_enabled {
            Some(
                TelemetrySocket::bind(settings.telemetry.modcod_addr(), "modcod")
                    .await
                    .context("binding MODCOD socket")?,
            )
        } else {
            None
        },
    };

    let alarm = Arc::new(ScriptAlarm::new(settings.monitor.alarm_script.clone()));

    let result = Daemon::new(settings, table, storage, actuator, alarm)
        .run(sockets, daemon::shutdown_signal())
        .await;
    if let Some(task) = api_task {
        task.abort();
    }
    result?;

    tracing::info!("scm-daemon stopped");
    Ok(())
}
