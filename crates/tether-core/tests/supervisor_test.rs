// Integration tests for `PersistentDevice` against mock connections.

#![allow(clippy::unwrap_used)]

mod common;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use tether_core::{
    CANCELLED_OUTPUT, ConnectionState, CoreError, DeviceEvent, DeviceRegistry, OFFLINE,
    PersistentDevice, Progress, SupervisorConfig, TransportClassifier, TransportKind,
};

use common::{Fault, MockConnection, dynamic, eventually};

// ── Helpers ─────────────────────────────────────────────────────────

const WAIT: Duration = Duration::from_secs(5);

fn adb(id: &str) -> Arc<MockConnection> {
    MockConnection::new(id, TransportKind::DebugBridge)
}

fn supervise(connection: &Arc<MockConnection>) -> PersistentDevice {
    PersistentDevice::new("pixel-7", dynamic(connection), SupervisorConfig::default())
}

fn with_concurrency(concurrency: usize) -> SupervisorConfig {
    SupervisorConfig {
        concurrency,
        ..SupervisorConfig::default()
    }
}

fn lost_events(events: &mut tokio::sync::broadcast::Receiver<DeviceEvent>) -> usize {
    let mut count = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, DeviceEvent::ConnectionLost { .. }) {
            count += 1;
        }
    }
    count
}

// ── Retry across reconnection ───────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn operation_survives_connection_failure() {
    let a = adb("usb:A");
    a.probe().set_delay(Duration::from_millis(50));
    let device = supervise(&a);
    let mut events = device.subscribe();

    let op = {
        let device = device.clone();
        tokio::spawn(async move {
            device
                .execute_shell_command("getprop ro.serialno")
                .wait()
                .await
        })
    };

    eventually("operation running on A", || a.probe().calls() == 1).await;
    a.probe().set_fault(Fault::Broken);

    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    match event {
        DeviceEvent::ConnectionLost {
            connection, error, ..
        } => {
            assert_eq!(connection.connection_id(), "usb:A");
            assert_eq!(error.kind(), "network");
        }
        other => panic!("expected ConnectionLost, got {other:?}"),
    }
    assert_eq!(device.current_connection_method(), OFFLINE);
    assert_eq!(device.state(), ConnectionState::AwaitingConnection);
    assert!(!op.is_finished());

    let b = adb("usb:B");
    device.provide_connection(dynamic(&b)).await.unwrap();

    let output = timeout(WAIT, op).await.unwrap().unwrap().unwrap();
    assert_eq!(output, "getprop ro.serialno: done on usb:B");
    eventually("A released", || a.probe().released() == 1).await;
    assert_eq!(b.probe().released(), 0);
    assert_eq!(device.latest_connection_id(), "usb:B");
    assert!(!a.probe().used_after_release());
}

#[tokio::test]
async fn provide_replaces_a_healthy_connection() {
    let a = adb("usb:A");
    let device = supervise(&a);
    let mut events = device.subscribe();
    assert_eq!(device.current_connection_method(), "ADB");

    let b = MockConnection::new("10.0.0.7:22", TransportKind::RemoteShell);
    device.provide_connection(dynamic(&b)).await.unwrap();

    assert_eq!(device.current_connection_method(), "SSH");
    assert_eq!(device.latest_connection_id(), "10.0.0.7:22");
    assert_eq!(a.probe().released(), 1);
    assert_eq!(b.probe().released(), 0);
    assert_eq!(
        device.state(),
        ConnectionState::Connected {
            connection_id: "10.0.0.7:22".into(),
            method: "SSH".into(),
        }
    );
    assert!(matches!(
        events.try_recv().unwrap(),
        DeviceEvent::ConnectionEstablished { ref connection_id, .. }
            if connection_id == "10.0.0.7:22"
    ));

    device.reboot().await.unwrap();
    assert_eq!(a.probe().calls(), 0);
    assert_eq!(b.probe().calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gate_bounds_parallel_operations() {
    let a = adb("usb:A");
    a.probe().set_delay(Duration::from_millis(30));
    let device = PersistentDevice::new("pixel-7", dynamic(&a), with_concurrency(4));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let device = device.clone();
            tokio::spawn(async move { device.reboot().await })
        })
        .collect();
    for handle in handles {
        timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
    }

    assert_eq!(a.probe().calls(), 10);
    assert!(a.probe().peak() <= 4, "peak was {}", a.probe().peak());
    assert!(a.probe().peak() >= 2);
}

// ── Cancellation ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_while_offline_fails_without_mutation() {
    let a = adb("usb:A");
    a.probe().set_fault(Fault::Broken);
    let device = supervise(&a);
    let token = CancellationToken::new();
    device.set_cancellation_token(Some(token.clone()));

    let op = {
        let device = device.clone();
        tokio::spawn(async move { device.reboot().await })
    };
    eventually("slot retired", || {
        device.state() == ConnectionState::AwaitingConnection
    })
    .await;

    let before = device.state();
    token.cancel();
    let result = timeout(WAIT, op).await.unwrap().unwrap();
    assert_eq!(result, Err(CoreError::Cancelled));
    assert_eq!(device.state(), before);
    assert_eq!(device.current_connection_method(), OFFLINE);
    assert_eq!(a.probe().calls(), 1);

    // The pending slot is still the one a new connection resolves.
    device.set_cancellation_token(None);
    let b = adb("usb:B");
    device.provide_connection(dynamic(&b)).await.unwrap();
    device.reboot().await.unwrap();
    assert_eq!(b.probe().calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_shell_command_reports_marker() {
    let a = adb("usb:A");
    a.probe().set_fault(Fault::Broken);
    let device = supervise(&a);
    let token = CancellationToken::new();
    device.set_cancellation_token(Some(token.clone()));

    let result = device.execute_shell_command("dumpsys battery");
    eventually("first attempt made", || result.attempts() == 1).await;
    eventually("slot retired", || {
        device.state() == ConnectionState::AwaitingConnection
    })
    .await;

    token.cancel();
    assert_eq!(timeout(WAIT, result.wait()).await.unwrap(), Err(CoreError::Cancelled));
    assert_eq!(result.output(), CANCELLED_OUTPUT);
    assert!(result.is_cancelled());
}

// ── Error classification ────────────────────────────────────────────

#[tokio::test]
async fn command_errors_propagate_without_retry() {
    let a = adb("usb:A");
    a.probe().set_fault(Fault::CommandFailed);
    let device = supervise(&a);

    let err = device
        .pull_file("/sdcard/log.txt", Path::new("log.txt"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::CommandFailed { status: 1, .. }));
    assert_eq!(a.probe().calls(), 1);
    assert_eq!(a.probe().released(), 0);
    assert_eq!(device.current_connection_method(), "ADB");

    a.probe().set_fault(Fault::Vendor("adb_offline"));
    let err = device.reboot().await.unwrap_err();
    assert!(matches!(err, CoreError::OperationFailed { ref kind, .. } if kind == "adb_offline"));
    assert_eq!(a.probe().released(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn configured_kinds_are_retried() {
    let a = adb("usb:A");
    a.probe().set_fault(Fault::Vendor("adb_offline"));
    let config = SupervisorConfig::default()
        .with_classifier(TransportClassifier::default().with_kind("adb_offline"));
    let device = PersistentDevice::new("pixel-7", dynamic(&a), config);
    let mut events = device.subscribe();

    let op = {
        let device = device.clone();
        tokio::spawn(async move { device.reboot().await })
    };
    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert!(matches!(event, DeviceEvent::ConnectionLost { .. }));

    let b = adb("usb:B");
    device.provide_connection(dynamic(&b)).await.unwrap();
    timeout(WAIT, op).await.unwrap().unwrap().unwrap();
    eventually("A released", || a.probe().released() == 1).await;
}

// ── Retirement races ────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_failures_retire_once() {
    let a = adb("usb:A");
    a.probe().set_delay(Duration::from_millis(20));
    a.probe().set_fault(Fault::Broken);
    let device = PersistentDevice::new("pixel-7", dynamic(&a), with_concurrency(8));
    let mut events = device.subscribe();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let device = device.clone();
            tokio::spawn(async move {
                device
                    .push_file(Path::new("apk"), &format!("/data/local/tmp/{i}"), None)
                    .await
            })
        })
        .collect();

    eventually("A released", || a.probe().released() == 1).await;
    let b = adb("usb:B");
    device.provide_connection(dynamic(&b)).await.unwrap();

    for handle in handles {
        timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
    }
    assert_eq!(lost_events(&mut events), 1);
    assert_eq!(a.probe().released(), 1);
    assert_eq!(b.probe().released(), 0);
    assert_eq!(b.probe().calls(), 8);
    assert!(!a.probe().used_after_release());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_connection_is_released_exactly_once() {
    let a = adb("usb:A");
    a.probe().set_fault(Fault::Broken);
    let device = supervise(&a);

    let op = {
        let device = device.clone();
        tokio::spawn(async move { device.reboot().await })
    };
    eventually("A released", || a.probe().released() == 1).await;

    let b = adb("usb:B");
    device.provide_connection(dynamic(&b)).await.unwrap();
    timeout(WAIT, op).await.unwrap().unwrap().unwrap();

    let c = MockConnection::new("10.0.0.9:22", TransportKind::RemoteShell);
    device.provide_connection(dynamic(&c)).await.unwrap();

    device.dispose().await;
    device.dispose().await;

    for (name, probe) in [("A", a.probe()), ("B", b.probe()), ("C", c.probe())] {
        assert_eq!(probe.released(), 1, "connection {name}");
        assert!(!probe.used_after_release(), "connection {name}");
    }
}

#[tokio::test(start_paused = true)]
async fn slow_release_does_not_block_replacement() {
    let a = adb("usb:A");
    a.probe().set_release_delay(Duration::from_secs(600));
    let config = SupervisorConfig {
        release_timeout: Duration::from_millis(50),
        ..SupervisorConfig::default()
    };
    let device = PersistentDevice::new("pixel-7", dynamic(&a), config);

    let b = adb("usb:B");
    timeout(Duration::from_secs(1), device.provide_connection(dynamic(&b)))
        .await
        .unwrap()
        .unwrap();
    device.reboot().await.unwrap();
    assert_eq!(a.probe().released(), 1);
}

#[tokio::test]
async fn failed_release_does_not_block_replacement() {
    let a = adb("usb:A");
    a.probe().fail_release();
    let device = supervise(&a);

    let b = adb("usb:B");
    device.provide_connection(dynamic(&b)).await.unwrap();
    device.reboot().await.unwrap();
    assert_eq!(a.probe().released(), 1);
    assert_eq!(b.probe().calls(), 1);
}

#[tokio::test]
async fn provide_waits_for_operations_on_the_old_connection() {
    let a = adb("usb:A");
    a.probe().set_delay(Duration::from_millis(100));
    let device = supervise(&a);

    let result = device.execute_shell_command("pm list packages");
    eventually("running on A", || a.probe().active() == 1).await;

    let b = adb("usb:B");
    timeout(WAIT, device.provide_connection(dynamic(&b)))
        .await
        .unwrap()
        .unwrap();

    // Replacement drained the in-flight command before releasing A.
    assert_eq!(a.probe().active(), 0);
    assert!(result.is_complete());
    assert_eq!(
        result.wait().await.unwrap(),
        "pm list packages: done on usb:A"
    );
    assert_eq!(a.probe().released(), 1);
    assert!(!a.probe().used_after_release());
    assert_eq!(b.probe().calls(), 0);
    assert_eq!(device.current_connection_method(), "ADB");
    assert_eq!(device.latest_connection_id(), "usb:B");
}

// ── Command result forwarding ───────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shell_output_is_continuous_across_retry() {
    let a = adb("usb:A");
    a.probe().set_delay(Duration::from_millis(50));
    let device = supervise(&a);

    let result = device.execute_shell_command("uptime");
    assert_eq!(result.command_text(), "uptime");
    eventually("running on A", || result.output() == "uptime: running on usb:A").await;

    a.probe().set_fault(Fault::Broken);
    eventually("slot retired", || {
        device.state() == ConnectionState::AwaitingConnection
    })
    .await;
    assert!(!result.is_complete());

    let b = adb("usb:B");
    device.provide_connection(dynamic(&b)).await.unwrap();

    let output = timeout(WAIT, result.wait()).await.unwrap().unwrap();
    assert_eq!(output, "uptime: done on usb:B");
    assert_eq!(result.output(), output);
    assert_eq!(result.attempts(), 2);
}

#[tokio::test]
async fn transfers_report_progress() {
    let a = adb("usb:A");
    let device = supervise(&a);
    let reports = Arc::new(AtomicU32::new(0));
    let progress = {
        let reports = Arc::clone(&reports);
        Progress::new(move |_| {
            reports.fetch_add(1, Ordering::SeqCst);
        })
    };

    device
        .push_file(Path::new("app.apk"), "/data/local/tmp/app.apk", Some(progress.clone()))
        .await
        .unwrap();
    device
        .pull_file("/data/anr/traces.txt", Path::new("traces.txt"), Some(progress))
        .await
        .unwrap();
    assert_eq!(reports.load(Ordering::SeqCst), 2);
}

// ── Argument validation ─────────────────────────────────────────────

#[tokio::test]
async fn invalid_connections_are_rejected() {
    let a = adb("usb:A");
    let device = supervise(&a);

    let blank = adb("  ");
    let err = device.provide_connection(dynamic(&blank)).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgument { .. }));

    let err = device.provide_connection(dynamic(&a)).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgument { .. }));

    assert_eq!(a.probe().released(), 0);
    assert_eq!(blank.probe().released(), 0);
    assert_eq!(device.latest_connection_id(), "usb:A");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retired_connection_cannot_be_offered_again() {
    let a = adb("usb:A");
    a.probe().set_release_delay(Duration::from_millis(200));
    a.probe().set_fault(Fault::Broken);
    let device = supervise(&a);
    let mut events = device.subscribe();

    let op = {
        let device = device.clone();
        tokio::spawn(async move { device.reboot().await })
    };
    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert!(matches!(event, DeviceEvent::ConnectionLost { .. }));

    let err = device.provide_connection(dynamic(&a)).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgument { .. }));
    assert_eq!(device.current_connection_method(), OFFLINE);
    assert_eq!(device.state(), ConnectionState::AwaitingConnection);

    let b = adb("usb:B");
    device.provide_connection(dynamic(&b)).await.unwrap();
    timeout(WAIT, op).await.unwrap().unwrap().unwrap();

    eventually("A released", || a.probe().released() == 1).await;
    assert_eq!(a.probe().calls(), 1);
    assert!(!a.probe().used_after_release());
    assert_eq!(b.probe().calls(), 1);
}

// ── Disposal ────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispose_wakes_waiters_and_rejects_new_connections() {
    let a = adb("usb:A");
    a.probe().set_fault(Fault::Broken);
    let device = supervise(&a);
    let mut states = device.state_stream();

    let op = {
        let device = device.clone();
        tokio::spawn(async move { device.reboot().await })
    };
    eventually("slot retired", || {
        device.state() == ConnectionState::AwaitingConnection
    })
    .await;

    device.dispose().await;
    let result = timeout(WAIT, op).await.unwrap().unwrap();
    assert!(matches!(result, Err(CoreError::Disposed { ref device_id }) if device_id == "pixel-7"));
    assert!(device.is_disposed());
    assert_eq!(device.state(), ConnectionState::Disposed);

    let b = adb("usb:B");
    let err = device.provide_connection(dynamic(&b)).await.unwrap_err();
    assert!(matches!(err, CoreError::Disposed { .. }));
    assert_eq!(b.probe().released(), 1);

    assert!(matches!(device.reboot().await, Err(CoreError::Disposed { .. })));
    eventually("A released", || a.probe().released() == 1).await;

    let mut last = None;
    while let Ok(Some(state)) = timeout(Duration::from_millis(20), states.next()).await {
        last = Some(state);
    }
    assert_eq!(last, Some(ConnectionState::Disposed));
}

// ── Registry ────────────────────────────────────────────────────────

#[tokio::test]
async fn registry_attaches_and_reconnects_by_identity() {
    let registry = DeviceRegistry::new(SupervisorConfig::default());
    assert!(registry.is_empty());

    let a = adb("usb:A");
    let pixel = registry.attach("pixel-7", dynamic(&a)).await.unwrap();
    let b = adb("usb:B");
    let again = registry.attach("pixel-7", dynamic(&b)).await.unwrap();
    assert_eq!(again.latest_connection_id(), "usb:B");
    assert_eq!(pixel.latest_connection_id(), "usb:B");
    assert_eq!(a.probe().released(), 1);

    let c = MockConnection::new("10.0.0.3:22", TransportKind::RemoteShell);
    registry.attach("galaxy-s24", dynamic(&c)).await.unwrap();
    assert_eq!(registry.ids(), vec!["galaxy-s24".to_string(), "pixel-7".to_string()]);
    assert_eq!(registry.len(), 2);

    let err = registry.attach(" ", dynamic(&adb("usb:X"))).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgument { .. }));

    let removed = registry.remove("pixel-7").await.unwrap();
    assert!(removed.is_disposed());
    assert_eq!(b.probe().released(), 1);
    assert!(registry.get("pixel-7").is_none());

    registry.dispose_all().await;
    assert!(registry.is_empty());
    assert_eq!(c.probe().released(), 1);
}

#[tokio::test]
async fn registry_resolves_config_per_device() {
    let registry = DeviceRegistry::with_resolver(|device_id| {
        if device_id == "emulator-5554" {
            SupervisorConfig {
                concurrency: 1,
                ..SupervisorConfig::default()
            }
        } else {
            SupervisorConfig::default()
        }
    });

    let emulator = registry
        .attach("emulator-5554", dynamic(&adb("emulator-5554")))
        .await
        .unwrap();
    let pixel = registry.attach("pixel-7", dynamic(&adb("usb:A"))).await.unwrap();
    assert_eq!(emulator.concurrency(), 1);
    assert_eq!(pixel.concurrency(), 4);
    registry.dispose_all().await;
}
