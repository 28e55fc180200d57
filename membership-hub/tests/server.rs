use membership_hub::api;
use membership_hub_core::{Database, HubConfig, MembershipStore, NewAccount, NewBackendGroup};
use std::future::IntoFuture;
use std::time::Duration;
use tokio::net::TcpListener;

fn store_at(path: &std::path::Path) -> MembershipStore {
    let config = HubConfig::default();
    MembershipStore::open(Database::open(path).unwrap(), config.membership)
}

#[tokio::test]
async fn server_health_endpoint() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = store_at(&tempdir.path().join("hub.db"));
    let app = api::router(api::AppState::new(store, &HubConfig::default()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(axum::serve(listener, app.into_make_service()).into_future());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let resp = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert_eq!(resp.text().await.unwrap(), "OK");

    server.abort();
}

#[tokio::test]
async fn members_over_http() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = store_at(&tempdir.path().join("hub.db"));
    let alice = store
        .accounts()
        .insert(NewAccount::new("alice", "Database", "/home/alice").display_name("Alice"))
        .unwrap();
    let staff = store
        .groups()
        .insert(NewBackendGroup::new("staff", "Database"))
        .unwrap();
    store.add_group_user(alice.id, staff.id).unwrap();
    let app = api::router(api::AppState::new(store, &HubConfig::default()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(axum::serve(listener, app.into_make_service()).into_future());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = reqwest::Client::new();
    let members: serde_json::Value = client
        .get(format!("http://{}/groups/staff/members?pattern=ali", addr))
        .header("X-User-Id", "alice")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(members[0]["user_id"], "alice");
    assert_eq!(members.as_array().unwrap().len(), 1);

    let resp = client
        .delete(format!("http://{}/groups/staff/members/alice", addr))
        .header("X-User-Id", "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 403);

    server.abort();
}
