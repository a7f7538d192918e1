//! Integration tests for playclockd
//!
//! These run the full daemon in-process: real socket, real store, real
//! scheduler, with only the clock under test control.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use playclock_api::{
    Command, Connectivity, DeviceKind, DeviceView, ErrorCode, ErrorInfo, EventPayload, Response,
    ResponsePayload, ResponseResult, Session, SessionStatus,
};
use playclock_config::{parse_config, Config, DeviceSeed, ServiceConfig};
use playclock_ipc::IpcClient;
use playclock_store::{SqliteStore, Store};
use playclock_util::{Clock, ManualClock};
use playclockd::service::{Service, ServiceTasks};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::time::timeout;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn test_config(dir: &Path) -> Config {
    Config {
        service: ServiceConfig {
            socket_path: dir.join("playclockd.sock"),
            data_dir: dir.to_path_buf(),
            tick_interval: Duration::from_millis(50),
        },
        devices: vec![
            DeviceSeed {
                id: "ps5-1".into(),
                name: "PlayStation 5 #1".into(),
                kind: DeviceKind::Console,
            },
            DeviceSeed {
                id: "pc-1".into(),
                name: "Gaming PC 1".into(),
                kind: DeviceKind::Computer,
            },
        ],
    }
}

async fn start_service(
    config: &Config,
    store: Arc<dyn Store>,
    clock: Arc<ManualClock>,
) -> (Arc<Service>, ServiceTasks) {
    let service = Arc::new(Service::new(config, store, clock).await.unwrap());
    let tasks = service.clone().start().await.unwrap();
    (service, tasks)
}

fn expect_session(response: Response) -> Session {
    match response.result {
        ResponseResult::Ok(ResponsePayload::Session(session)) => session,
        other => panic!("expected session payload, got {other:?}"),
    }
}

fn expect_sessions(response: Response) -> Vec<Session> {
    match response.result {
        ResponseResult::Ok(ResponsePayload::Sessions { sessions }) => sessions,
        other => panic!("expected sessions payload, got {other:?}"),
    }
}

fn expect_devices(response: Response) -> Vec<DeviceView> {
    match response.result {
        ResponseResult::Ok(ResponsePayload::Devices { devices }) => devices,
        other => panic!("expected devices payload, got {other:?}"),
    }
}

fn expect_device(response: Response) -> DeviceView {
    match response.result {
        ResponseResult::Ok(ResponsePayload::Device(device)) => device,
        other => panic!("expected device payload, got {other:?}"),
    }
}

fn expect_error(response: Response) -> ErrorInfo {
    match response.result {
        ResponseResult::Err(error) => error,
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn session_lifecycle_over_the_socket() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let clock = Arc::new(ManualClock::new(t0()));
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
    let (service, tasks) = start_service(&config, store, clock.clone()).await;

    let mut client = IpcClient::connect(&config.service.socket_path)
        .await
        .unwrap();

    // The customer pays for an hour on the console
    let session = expect_session(
        client
            .send(Command::StartSession {
                device_id: "ps5-1".into(),
                duration_minutes: 60,
                amount: 1500,
            })
            .await
            .unwrap(),
    );
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.amount, 1500);
    assert_eq!(session.remaining_seconds(clock.now()), 3600);

    // Twenty minutes in, the dashboard shows forty left
    clock.set(t0() + ChronoDuration::minutes(20));
    let views = expect_devices(client.send(Command::ListDevices).await.unwrap());
    assert_eq!(views.len(), 2);
    let view = views
        .iter()
        .find(|v| v.device.id.as_str() == "ps5-1")
        .unwrap();
    assert_eq!(view.remaining_seconds, 40 * 60);

    // A bathroom break freezes the countdown
    let paused = expect_session(
        client
            .send(Command::PauseSession {
                device_id: "ps5-1".into(),
            })
            .await
            .unwrap(),
    );
    assert_eq!(paused.status, SessionStatus::Paused);

    // Half an hour later the full frozen budget comes back
    clock.set(t0() + ChronoDuration::minutes(50));
    let resumed = expect_session(
        client
            .send(Command::ResumeSession {
                device_id: "ps5-1".into(),
            })
            .await
            .unwrap(),
    );
    assert_eq!(resumed.status, SessionStatus::Active);
    assert_eq!(resumed.remaining_seconds(clock.now()), 40 * 60);

    // The customer pays for another half hour
    let extended = expect_session(
        client
            .send(Command::AddTime {
                device_id: "ps5-1".into(),
                extra_minutes: 30,
            })
            .await
            .unwrap(),
    );
    assert_eq!(extended.remaining_seconds(clock.now()), 70 * 60);

    // And leaves early
    let ended = expect_session(
        client
            .send(Command::EndSession {
                device_id: "ps5-1".into(),
            })
            .await
            .unwrap(),
    );
    assert_eq!(ended.status, SessionStatus::Cancelled);

    let sessions = expect_sessions(
        client
            .send(Command::ListSessions { limit: Some(10) })
            .await
            .unwrap(),
    );
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Cancelled);

    service.stop(tasks).await;
}

#[tokio::test]
async fn errors_carry_protocol_codes() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let clock = Arc::new(ManualClock::new(t0()));
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
    let (service, tasks) = start_service(&config, store, clock).await;

    let mut client = IpcClient::connect(&config.service.socket_path)
        .await
        .unwrap();

    expect_session(
        client
            .send(Command::StartSession {
                device_id: "ps5-1".into(),
                duration_minutes: 30,
                amount: 0,
            })
            .await
            .unwrap(),
    );

    // Double-start is a conflict
    let error = expect_error(
        client
            .send(Command::StartSession {
                device_id: "ps5-1".into(),
                duration_minutes: 30,
                amount: 0,
            })
            .await
            .unwrap(),
    );
    assert_eq!(error.code, ErrorCode::SessionConflict);
    assert_eq!(error.code.http_status(), 409);

    // Unknown device
    let error = expect_error(
        client
            .send(Command::StartSession {
                device_id: "ghost".into(),
                duration_minutes: 30,
                amount: 0,
            })
            .await
            .unwrap(),
    );
    assert_eq!(error.code, ErrorCode::DeviceNotFound);
    assert_eq!(error.code.http_status(), 404);

    // Pausing an idle device is an invalid transition
    let error = expect_error(
        client
            .send(Command::PauseSession {
                device_id: "pc-1".into(),
            })
            .await
            .unwrap(),
    );
    assert_eq!(error.code, ErrorCode::InvalidState);

    // Adding time needs a session to add to
    let error = expect_error(
        client
            .send(Command::AddTime {
                device_id: "pc-1".into(),
                extra_minutes: 30,
            })
            .await
            .unwrap(),
    );
    assert_eq!(error.code, ErrorCode::SessionNotFound);

    // Zero-length sessions are rejected up front
    let error = expect_error(
        client
            .send(Command::StartSession {
                device_id: "pc-1".into(),
                duration_minutes: 0,
                amount: 0,
            })
            .await
            .unwrap(),
    );
    assert_eq!(error.code, ErrorCode::InvalidRequest);

    service.stop(tasks).await;
}

#[tokio::test]
async fn mismatched_api_version_is_rejected() {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let clock = Arc::new(ManualClock::new(t0()));
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
    let (service, tasks) = start_service(&config, store, clock).await;

    // The client library always stamps the current version, so speak raw
    // NDJSON to send a future one
    let stream = tokio::net::UnixStream::connect(&config.service.socket_path)
        .await
        .unwrap();
    let (read_half, mut write_half) = stream.into_split();
    write_half
        .write_all(b"{\"request_id\":1,\"api_version\":99,\"command\":{\"type\":\"ping\"}}\n")
        .await
        .unwrap();

    let mut line = String::new();
    BufReader::new(read_half).read_line(&mut line).await.unwrap();
    let response: Response = serde_json::from_str(&line).unwrap();

    assert_eq!(response.request_id, 1);
    let error = expect_error(response);
    assert_eq!(error.code, ErrorCode::InvalidRequest);
    assert!(error.message.contains("version"));

    service.stop(tasks).await;
}

#[tokio::test]
async fn time_over_reaches_lock_client_and_subscribers() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let clock = Arc::new(ManualClock::new(t0()));
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
    let (service, tasks) = start_service(&config, store, clock.clone()).await;

    // A dashboard watching everything
    let dashboard = IpcClient::connect(&config.service.socket_path)
        .await
        .unwrap();
    let mut dashboard_events = dashboard.subscribe().await.unwrap();

    // The terminal's lock agent registers for its device
    let agent = IpcClient::connect(&config.service.socket_path)
        .await
        .unwrap();
    let (device, snapshot, mut agent_events) = agent.register("ps5-1".into()).await.unwrap();
    assert_eq!(device.connectivity, Connectivity::Online);
    assert!(snapshot.is_none());

    // The operator sells one minute
    let mut operator = IpcClient::connect(&config.service.socket_path)
        .await
        .unwrap();
    expect_session(
        operator
            .send(Command::StartSession {
                device_id: "ps5-1".into(),
                duration_minutes: 1,
                amount: 100,
            })
            .await
            .unwrap(),
    );

    // Time passes; the scheduler notices on its next tick
    clock.set(t0() + ChronoDuration::minutes(2));

    let event = timeout(Duration::from_secs(2), agent_events.next())
        .await
        .expect("agent never saw time-over")
        .unwrap();
    match event.payload {
        EventPayload::TimeOver { device_id } => assert_eq!(device_id.as_str(), "ps5-1"),
        other => panic!("unexpected event for agent: {other:?}"),
    }

    // The dashboard sees it too, among the device-changed notices
    let mut saw_time_over = false;
    for _ in 0..10 {
        let event = timeout(Duration::from_secs(2), dashboard_events.next())
            .await
            .expect("dashboard event stream stalled")
            .unwrap();
        if matches!(event.payload, EventPayload::TimeOver { .. }) {
            saw_time_over = true;
            break;
        }
    }
    assert!(saw_time_over);

    // The device is free again and shows zero remaining
    let view = expect_device(
        operator
            .send(Command::GetDevice {
                device_id: "ps5-1".into(),
            })
            .await
            .unwrap(),
    );
    assert!(view.session.is_none());
    assert_eq!(view.remaining_seconds, 0);

    let sessions = expect_sessions(
        operator
            .send(Command::ListSessions { limit: Some(1) })
            .await
            .unwrap(),
    );
    assert_eq!(sessions[0].status, SessionStatus::Expired);

    // Shutdown is announced to everyone still connected
    service.stop(tasks).await;

    let event = timeout(Duration::from_secs(2), agent_events.next())
        .await
        .expect("agent never saw shutdown")
        .unwrap();
    assert!(matches!(event.payload, EventPayload::Shutdown));

    let mut saw_shutdown = false;
    for _ in 0..10 {
        let event = timeout(Duration::from_secs(2), dashboard_events.next())
            .await
            .expect("dashboard never saw shutdown")
            .unwrap();
        if matches!(event.payload, EventPayload::Shutdown) {
            saw_shutdown = true;
            break;
        }
    }
    assert!(saw_shutdown);
}

#[tokio::test]
async fn register_returns_current_session_snapshot() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let clock = Arc::new(ManualClock::new(t0()));
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
    let (service, tasks) = start_service(&config, store, clock.clone()).await;

    let mut operator = IpcClient::connect(&config.service.socket_path)
        .await
        .unwrap();
    expect_session(
        operator
            .send(Command::StartSession {
                device_id: "ps5-1".into(),
                duration_minutes: 30,
                amount: 0,
            })
            .await
            .unwrap(),
    );

    // A kiosk reconnecting mid-session converges from the snapshot alone
    clock.set(t0() + ChronoDuration::minutes(10));
    let agent = IpcClient::connect(&config.service.socket_path)
        .await
        .unwrap();
    let (device, snapshot, _events) = agent.register("ps5-1".into()).await.unwrap();

    assert_eq!(device.connectivity, Connectivity::Online);
    let session = snapshot.expect("registered during an active session");
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.remaining_seconds(clock.now()), 20 * 60);

    service.stop(tasks).await;
}

#[tokio::test]
async fn disconnect_marks_device_offline() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let clock = Arc::new(ManualClock::new(t0()));
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
    let (service, tasks) = start_service(&config, store, clock).await;

    let agent = IpcClient::connect(&config.service.socket_path)
        .await
        .unwrap();
    let (device, _, events) = agent.register("ps5-1".into()).await.unwrap();
    assert_eq!(device.connectivity, Connectivity::Online);

    // The kiosk drops off the network
    drop(events);

    let mut operator = IpcClient::connect(&config.service.socket_path)
        .await
        .unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        let view = expect_device(
            operator
                .send(Command::GetDevice {
                    device_id: "ps5-1".into(),
                })
                .await
                .unwrap(),
        );
        if view.device.connectivity == Connectivity::Offline {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "device never went offline"
        );
        // Poll gently to stay under the per-client rate limit
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    service.stop(tasks).await;
}

#[tokio::test]
async fn restart_recovers_and_expires_overdue_sessions() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let db_path = dir.path().join("playclockd.db");
    let clock = Arc::new(ManualClock::new(t0()));

    // First daemon run: sell a minute, then stop mid-session
    {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db_path).unwrap());
        let (service, tasks) = start_service(&config, store, clock.clone()).await;

        let mut client = IpcClient::connect(&config.service.socket_path)
            .await
            .unwrap();
        expect_session(
            client
                .send(Command::StartSession {
                    device_id: "ps5-1".into(),
                    duration_minutes: 1,
                    amount: 0,
                })
                .await
                .unwrap(),
        );

        service.stop(tasks).await;
    }

    // The daemon comes back well past the deadline
    clock.set(t0() + ChronoDuration::minutes(10));
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db_path).unwrap());
    let (service, tasks) = start_service(&config, store, clock.clone()).await;

    let mut client = IpcClient::connect(&config.service.socket_path)
        .await
        .unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        let sessions = expect_sessions(
            client
                .send(Command::ListSessions { limit: Some(1) })
                .await
                .unwrap(),
        );
        if sessions.first().map(|s| s.status) == Some(SessionStatus::Expired) {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "session never expired after restart"
        );
        // Poll gently to stay under the per-client rate limit
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // The device is free for the next customer
    expect_session(
        client
            .send(Command::StartSession {
                device_id: "ps5-1".into(),
                duration_minutes: 30,
                amount: 0,
            })
            .await
            .unwrap(),
    );

    service.stop(tasks).await;
}

#[tokio::test]
async fn health_reflects_catalog_and_sessions() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let clock = Arc::new(ManualClock::new(t0()));
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
    let (service, tasks) = start_service(&config, store, clock).await;

    let mut client = IpcClient::connect(&config.service.socket_path)
        .await
        .unwrap();

    let health = match client.send(Command::GetHealth).await.unwrap().result {
        ResponseResult::Ok(ResponsePayload::Health(health)) => health,
        other => panic!("expected health payload, got {other:?}"),
    };
    assert!(health.live);
    assert!(health.ready);
    assert!(health.store_ok);
    assert_eq!(health.device_count, 2);
    assert_eq!(health.active_sessions, 0);

    expect_session(
        client
            .send(Command::StartSession {
                device_id: "pc-1".into(),
                duration_minutes: 30,
                amount: 0,
            })
            .await
            .unwrap(),
    );

    let health = match client.send(Command::GetHealth).await.unwrap().result {
        ResponseResult::Ok(ResponsePayload::Health(health)) => health,
        other => panic!("expected health payload, got {other:?}"),
    };
    assert_eq!(health.active_sessions, 1);

    service.stop(tasks).await;
}

#[test]
fn config_parsing() {
    let config = parse_config(
        r#"
        config_version = 1

        [service]
        socket_path = "/run/playclock/playclockd.sock"
        data_dir = "/var/lib/playclockd"
        tick_interval_ms = 500

        [[devices]]
        id = "ps5-1"
        name = "PlayStation 5 #1"
        kind = "ps5"

        [[devices]]
        id = "pc-1"
        name = "Gaming PC 1"
        kind = "computer"
    "#,
    )
    .unwrap();

    assert_eq!(
        config.service.socket_path,
        PathBuf::from("/run/playclock/playclockd.sock")
    );
    assert_eq!(config.service.data_dir, PathBuf::from("/var/lib/playclockd"));
    assert_eq!(config.service.tick_interval, Duration::from_millis(500));
    assert_eq!(config.devices.len(), 2);
    assert_eq!(config.devices[0].kind, DeviceKind::Console);
    assert_eq!(config.devices[1].kind, DeviceKind::Computer);
}
