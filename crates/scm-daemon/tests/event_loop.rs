//! The full loop over loopback sockets with in-memory storage.

use std::sync::Arc;
use std::time::Duration;

use scm_core::modcod::{ACTIVE_MODCODS, encode_counters};
use scm_core::sdd::encode_sdd;
use scm_core::segments::SegmentTable;
use scm_core::storage::MemoryStorage;
use scm_core::testing::{Command, RecordingActuator, RecordingAlarm};
use scm_daemon::config::Settings;
use scm_daemon::daemon::{Daemon, Sockets};
use scm_daemon::socket::TelemetrySocket;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;

async fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn stores_modcod_and_heartbeat_then_shuts_down() {
    let mut settings = Settings::from_toml_str(
        "[scan]\nenabled = false\n[telemetry]\nmodcod_enabled = true",
    )
    .unwrap();
    settings.telemetry.bind = "127.0.0.1".parse().unwrap();

    let modcod = TelemetrySocket::bind("127.0.0.1:0".parse().unwrap(), "modcod")
        .await
        .unwrap();
    let modcod_addr = modcod.local_addr().unwrap();

    let storage = Arc::new(MemoryStorage::new());
    let alarm = Arc::new(RecordingAlarm::default());
    let actuator = Arc::new(RecordingActuator::default());
    let table = SegmentTable::parse("RX1, A, 100, 5.0").unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let daemon = Daemon::new(
        settings,
        table,
        Arc::clone(&storage),
        Arc::clone(&actuator),
        alarm,
    );
    let task = tokio::spawn(daemon.run(
        Sockets {
            sdd: None,
            modcod: Some(modcod),
        },
        async move {
            stop_rx.await.ok();
        },
    ));

    wait_for("heartbeat", || storage.heartbeat().is_some()).await;

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    peer.send_to(&encode_counters(&[(5, 1); ACTIVE_MODCODS]), modcod_addr)
        .await
        .unwrap();
    peer.send_to(&encode_counters(&[(9, 2); ACTIVE_MODCODS]), modcod_addr)
        .await
        .unwrap();

    wait_for("MODCOD record", || !storage.modcod_records().is_empty()).await;
    assert_eq!(storage.modcod_records()[0].total, 28 * 11);

    stop_tx.send(()).unwrap();
    task.await.unwrap().unwrap();

    // Scanning disabled: the hardware is never touched.
    assert!(actuator.take().is_empty());
    assert!(storage.esno_records().is_empty());
}

#[tokio::test]
async fn primes_hardware_when_scanning() {
    let settings = Settings::default();
    let sdd = TelemetrySocket::bind("127.0.0.1:0".parse().unwrap(), "sdd")
        .await
        .unwrap();

    let storage = Arc::new(MemoryStorage::new());
    let actuator = Arc::new(RecordingActuator::default());
    let table = SegmentTable::parse("RX2, C, 300, 5.0").unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let daemon = Daemon::new(
        settings,
        table,
        Arc::clone(&storage),
        Arc::clone(&actuator),
        Arc::new(RecordingAlarm::default()),
    );
    let task = tokio::spawn(daemon.run(
        Sockets {
            sdd: Some(sdd),
            modcod: None,
        },
        async move {
            stop_rx.await.ok();
        },
    ));

    wait_for("heartbeat", || storage.heartbeat().is_some()).await;
    stop_tx.send(()).unwrap();
    task.await.unwrap().unwrap();

    assert_eq!(
        actuator.take(),
        [
            Command::Select(scm_core::segments::Receiver::Rx2),
            Command::Activate(scm_core::segments::Receiver::Rx2, Default::default()),
            Command::Retune(scm_core::segments::Receiver::Rx2, "300".into()),
        ]
    );
}

#[tokio::test]
async fn sdd_dwells_close_on_data_deadline_and_silence() {
    let mut settings =
        Settings::from_toml_str("[scan]\ndwell_secs = 2\nreceive_timeout_secs = 1").unwrap();
    settings.telemetry.bind = "127.0.0.1".parse().unwrap();

    let sdd = TelemetrySocket::bind("127.0.0.1:0".parse().unwrap(), "sdd")
        .await
        .unwrap();
    let sdd_addr = sdd.local_addr().unwrap();

    let storage = Arc::new(MemoryStorage::new());
    let actuator = Arc::new(RecordingActuator::default());
    let table = SegmentTable::parse("RX1, A, 100, 5.0\nRX1, B, 200, 5.0").unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let daemon = Daemon::new(
        settings,
        table,
        Arc::clone(&storage),
        Arc::clone(&actuator),
        Arc::new(RecordingAlarm::default()),
    );
    let task = tokio::spawn(daemon.run(
        Sockets {
            sdd: Some(sdd),
            modcod: None,
        },
        async move {
            stop_rx.await.ok();
        },
    ));

    // Locked samples until an accepted one ends dwell A, then an unlocked
    // stream that only the deadline can close, then nothing.
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    for _ in 0..24 {
        peer.send_to(&encode_sdd(90, true), sdd_addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    for _ in 0..24 {
        peer.send_to(&encode_sdd(50, false), sdd_addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    wait_for("empty timed-out dwell", || {
        storage.esno_records().iter().any(|r| r.total == 0)
    })
    .await;
    stop_tx.send(()).unwrap();
    task.await.unwrap().unwrap();

    let records = storage.esno_records();
    assert!(records.len() >= 3, "{records:?}");

    let data_driven = &records[0];
    assert_eq!(data_driven.segment, "A");
    assert!(data_driven.valid);
    assert!(data_driven.accepted > 0);
    assert_eq!(data_driven.rejected, 0);

    let deadline_driven = &records[1];
    assert_eq!(deadline_driven.segment, "B");
    assert!(!deadline_driven.valid);
    assert_eq!(deadline_driven.accepted, 0);
    assert!(deadline_driven.rejected > 0);

    let silent = records.iter().skip(2).find(|r| r.total == 0).unwrap();
    assert!(!silent.valid);
    assert_eq!(silent.esno, 0.0);

    for pair in records.windows(2) {
        assert_ne!(pair[0].segment, pair[1].segment, "{records:?}");
    }
}
