mod common;

use std::sync::Arc;

use chrono::Weekday;
use curfew_core::{DailySchedule, RemoteMutation};
use curfew_sync::{ClientError, MemoryAuthStore, SyncError};

use common::{bundle_expiring_in, fresh_bundle, gateway, FakeDashboard};

fn unavailable() -> ClientError {
    ClientError::Status {
        status: 503,
        body: "maintenance".into(),
    }
}

#[tokio::test]
async fn test_unauthenticated_refreshes_and_retries_once() {
    let store = Arc::new(MemoryAuthStore::new(fresh_bundle()));
    let client = FakeDashboard::new();
    client.fail_next([ClientError::Unauthenticated]);
    let gateway = gateway(store, client.clone());

    gateway.fetch_state("c-emma").await.unwrap();

    assert_eq!(client.logins(), 1);
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn test_second_rejection_surfaces_auth_expired() {
    let store = Arc::new(MemoryAuthStore::new(fresh_bundle()));
    let client = FakeDashboard::new();
    client.fail_next([
        ClientError::Unauthenticated,
        ClientError::Status {
            status: 401,
            body: String::new(),
        },
    ]);
    let gateway = gateway(store, client.clone());

    let err = gateway.fetch_state("c-emma").await.unwrap_err();

    assert!(matches!(err, SyncError::AuthExpired(_)));
    assert_eq!(client.logins(), 1);
    assert_eq!(client.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_server_errors_retry_with_backoff() {
    let store = Arc::new(MemoryAuthStore::new(fresh_bundle()));
    let client = FakeDashboard::new();
    client.fail_next([unavailable(), unavailable()]);
    let gateway = gateway(store, client.clone());

    let started = tokio::time::Instant::now();
    gateway.fetch_state("c-emma").await.unwrap();

    assert_eq!(client.calls(), 3);
    // 1s then 2s
    assert!(started.elapsed() >= std::time::Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_server_errors_give_up_after_three_attempts() {
    let store = Arc::new(MemoryAuthStore::new(fresh_bundle()));
    let client = FakeDashboard::new();
    client.fail_next([unavailable(), unavailable(), unavailable(), unavailable()]);
    let gateway = gateway(store, client.clone());

    let err = gateway.fetch_state("c-emma").await.unwrap_err();

    assert!(matches!(err, SyncError::RemoteError { status: 503, .. }));
    assert_eq!(client.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_is_retried() {
    let store = Arc::new(MemoryAuthStore::new(fresh_bundle()));
    let client = FakeDashboard::new();
    client.fail_next([ClientError::RateLimited]);
    let gateway = gateway(store, client.clone());

    gateway.list_children().await.unwrap();
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let store = Arc::new(MemoryAuthStore::new(fresh_bundle()));
    let client = FakeDashboard::new();
    client.fail_next([ClientError::Status {
        status: 400,
        body: "bad minutes".into(),
    }]);
    let gateway = gateway(store, client.clone());

    let err = gateway
        .set_daily_limit("c-emma", Weekday::Mon, 60, true)
        .await
        .unwrap_err();

    assert!(err.is_data_error());
    assert_eq!(client.calls(), 1);
    assert!(client.writes().is_empty());
}

#[tokio::test]
async fn test_malformed_response_is_not_retried() {
    let store = Arc::new(MemoryAuthStore::new(fresh_bundle()));
    let client = FakeDashboard::new();
    client.fail_next([ClientError::Malformed("missing limits".into())]);
    let gateway = gateway(store, client.clone());

    assert!(matches!(
        gateway.fetch_state("c-emma").await,
        Err(SyncError::Malformed(_))
    ));
    assert_eq!(client.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hung_call_times_out_as_unreachable() {
    let store = Arc::new(MemoryAuthStore::new(fresh_bundle()));
    let client = FakeDashboard::new();
    client.hang_next(3);
    let gateway = gateway(store, client.clone());

    let err = gateway.fetch_state("c-emma").await.unwrap_err();

    assert!(matches!(err, SyncError::Unreachable(_)));
    assert_eq!(client.calls(), 3);
}

#[tokio::test]
async fn test_expired_session_blocks_calls() {
    let store = Arc::new(MemoryAuthStore::new(bundle_expiring_in(
        chrono::Duration::minutes(-5),
    )));
    let client = FakeDashboard::new();
    client.fail_logins(true);
    let gateway = gateway(store, client.clone());

    assert!(gateway.fetch_state("c-emma").await.unwrap_err().is_auth_error());
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn test_minutes_are_clamped_to_grid() {
    let store = Arc::new(MemoryAuthStore::new(fresh_bundle()));
    let client = FakeDashboard::new();
    let gateway = gateway(store, client.clone());

    assert_eq!(
        gateway
            .set_daily_limit("c-emma", Weekday::Mon, 500, true)
            .await
            .unwrap(),
        480
    );
    assert_eq!(
        gateway
            .set_daily_limit("c-emma", Weekday::Tue, 100, true)
            .await
            .unwrap(),
        90
    );
    assert_eq!(
        gateway
            .set_daily_limit("c-emma", Weekday::Wed, -30, false)
            .await
            .unwrap(),
        0
    );

    assert_eq!(client.limit(Weekday::Mon).minutes_allowed, 480);
    assert_eq!(client.limit(Weekday::Tue).minutes_allowed, 90);
    for write in client.writes() {
        if let RemoteMutation::SetDailyLimit { minutes, .. } = write {
            assert_eq!(minutes % 15, 0);
            assert!(minutes <= 480);
        }
    }
}

#[tokio::test]
async fn test_apply_dispatches_each_mutation_kind() {
    let store = Arc::new(MemoryAuthStore::new(fresh_bundle()));
    let client = FakeDashboard::new();
    let gateway = gateway(store, client.clone());

    let schedule = DailySchedule {
        enabled: true,
        ..DailySchedule::default()
    };
    let mutations = [
        RemoteMutation::SetDailyLimit {
            day: Weekday::Sat,
            minutes: 120,
            enabled: true,
        },
        RemoteMutation::SetSchedule {
            day: Weekday::Sat,
            schedule,
        },
        RemoteMutation::SetBlock {
            duration_secs: Some(1800),
        },
    ];
    for mutation in &mutations {
        gateway.apply("c-emma", mutation).await.unwrap();
    }

    assert_eq!(client.writes(), mutations.to_vec());
}
