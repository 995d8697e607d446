use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use fieldsync_api::{app_router, AppConfig, AppState};
use fieldsync_core::db::RecordFilter;
use fieldsync_core::models::{Receipt, Trip};
use fieldsync_core::realtime::RealtimeOptions;
use fieldsync_core::sync::PullStatus;
use fieldsync_core::{
    EmployeeId, EntityKind, Error, EventName, HttpSyncBackend, LocalStore, PushPacing,
    RealtimeEvent, RealtimeSubscription, SyncCoordinator, SyncRun,
};
use pretty_assertions::assert_eq;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

const TOKEN: &str = "field-team-token";

async fn spawn_server(config: AppConfig) -> (SocketAddr, AppState) {
    let state = AppState::from_config(Arc::new(config));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, state)
}

fn employee() -> EmployeeId {
    EmployeeId::new("emp-42").unwrap()
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 9, d).unwrap()
}

fn device(addr: SocketAddr, token: Option<&str>) -> SyncCoordinator<HttpSyncBackend> {
    let backend = HttpSyncBackend::new(
        format!("http://{addr}"),
        token.map(str::to_string),
        Duration::from_secs(5),
    )
    .unwrap();
    SyncCoordinator::new(LocalStore::open_in_memory().unwrap(), backend, PushPacing::none())
}

fn completed(run: SyncRun) -> fieldsync_core::SyncReport {
    match run {
        SyncRun::Completed(report) => report,
        SyncRun::Skipped => panic!("sync run was skipped"),
    }
}

#[tokio::test]
async fn records_pushed_by_one_device_reach_another() {
    let (addr, state) = spawn_server(AppConfig::default()).await;

    let phone = device(addr, None);
    phone
        .store()
        .create(&employee(), Trip::new(day(2), "Depot", "Client site", 14.2))
        .unwrap();
    phone
        .store()
        .create(&employee(), Receipt::new(day(2), "Fuel Stop", "fuel", 4_850))
        .unwrap();

    let report = completed(phone.manual_sync(&employee()).await.unwrap());
    assert!(report.is_success());
    assert_eq!(report.push.records_pushed(), 2);
    assert!(matches!(report.pull, PullStatus::Applied(_)));

    let held = state.store().snapshot(&employee()).await.unwrap();
    assert_eq!(held.trips.len(), 1);
    assert_eq!(held.receipts.len(), 1);

    let tablet = device(addr, None);
    let report = completed(tablet.initial_load_sync(&employee()).await);
    assert!(report.is_success());

    let trips = tablet
        .store()
        .list::<Trip>(&employee(), &RecordFilter::default())
        .unwrap();
    assert_eq!(trips.len(), 1);
    assert_eq!(trips[0].payload.start_location, "Depot");
    assert_eq!(tablet.store().count(EntityKind::Receipt, &employee()).unwrap(), 1);
}

#[tokio::test]
async fn deletion_propagates_on_next_push() {
    let (addr, state) = spawn_server(AppConfig::default()).await;

    let phone = device(addr, None);
    let trip = phone
        .store()
        .create(&employee(), Trip::new(day(5), "Home", "Warehouse", 6.0))
        .unwrap();
    completed(phone.manual_sync(&employee()).await.unwrap());

    phone.store().delete(EntityKind::Trip, &trip.id).unwrap();
    let report = completed(phone.post_mutation_sync(&employee()).await.unwrap());
    assert!(report.push.succeeded.contains(&EntityKind::Trip));
    assert_eq!(report.pull, PullStatus::NotRequested);

    assert!(state.store().snapshot(&employee()).await.unwrap().is_empty());
}

#[tokio::test]
async fn push_publishes_data_update_over_realtime() {
    let (addr, _state) = spawn_server(AppConfig::default()).await;

    let options = RealtimeOptions {
        url: format!("ws://{addr}/v1/realtime"),
        initial_backoff: Duration::from_millis(50),
        ..RealtimeOptions::default()
    };
    let subscription = RealtimeSubscription::connect(&options, employee());
    let (tx, mut rx) = mpsc::unbounded_channel();
    for name in [EventName::ConnectionEstablished, EventName::DataUpdate] {
        let tx = tx.clone();
        subscription.on(name, move |event| {
            tx.send(event.clone()).ok();
        });
    }

    let hello = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    match hello {
        RealtimeEvent::ConnectionEstablished(info) => assert_eq!(info.employee_id, employee()),
        other => panic!("unexpected first event: {other:?}"),
    }

    let phone = device(addr, None);
    let trip = phone
        .store()
        .create(&employee(), Trip::new(day(9), "Office", "Site 4", 3.1))
        .unwrap();
    completed(phone.post_mutation_sync(&employee()).await.unwrap());

    let update = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    match update {
        RealtimeEvent::DataUpdate(update) => {
            assert_eq!(update.kind, Some(EntityKind::Trip));
            assert_eq!(update.record_ids, vec![trip.id]);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    subscription.close();
}

#[tokio::test]
async fn shared_token_is_enforced() {
    let config = AppConfig {
        auth_token: Some(TOKEN.to_string()),
        ..AppConfig::default()
    };
    let (addr, _state) = spawn_server(config).await;

    let anonymous = device(addr, None);
    anonymous
        .store()
        .create(&employee(), Trip::new(day(3), "A", "B", 1.0))
        .unwrap();
    let error = anonymous.manual_sync(&employee()).await.unwrap_err();
    match error {
        Error::PushFailed(outcome) => {
            assert!(outcome.failed[&EntityKind::Trip].contains("Unauthorized"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!anonymous.is_syncing());

    let trusted = device(addr, Some(TOKEN));
    trusted
        .store()
        .create(&employee(), Trip::new(day(3), "A", "B", 1.0))
        .unwrap();
    let report = completed(trusted.manual_sync(&employee()).await.unwrap());
    assert!(report.is_success());

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/v1/employees/emp-42/snapshot"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("Authorization"));
}

#[tokio::test]
async fn oversized_batch_is_rejected_without_replacing() {
    let config = AppConfig {
        max_batch_records: 1,
        ..AppConfig::default()
    };
    let (addr, state) = spawn_server(config).await;

    let phone = device(addr, None);
    phone
        .store()
        .create(&employee(), Trip::new(day(4), "A", "B", 1.0))
        .unwrap();
    phone
        .store()
        .create(&employee(), Trip::new(day(4), "B", "C", 2.0))
        .unwrap();

    let error = phone.manual_sync(&employee()).await.unwrap_err();
    assert!(matches!(error, Error::PushFailed(_)));
    assert!(state.store().snapshot(&employee()).await.unwrap().is_empty());
    assert_eq!(phone.store().count(EntityKind::Trip, &employee()).unwrap(), 2);
}

#[tokio::test]
async fn healthz_reports_ok() {
    let (addr, _state) = spawn_server(AppConfig::default()).await;

    let body: serde_json::Value = reqwest::get(format!("http://{addr}/healthz"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["rate_limit"]["push_limited"], 0);
}
