mod common;

use actix_web::{web, App, HttpServer};
use chrono::{Duration, Utc};
use common::TestEnv;
use opsdesk_backend::attribution::snapshot::SnapshotSlot;
use opsdesk_backend::attribution::ttl_cache::TtlCache;
use opsdesk_backend::attribution::{AdjustDataPage, AttributionFilter, KvStore, MemoryStore, MountOutcome};
use opsdesk_backend::client::api_client::TOKEN_KEY;
use opsdesk_backend::client::{ApiClient, AuthSession, ClientError, Params};
use opsdesk_backend::models::report_models::DateRange;
use opsdesk_backend::{routes, AppState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Serves the full app on an ephemeral port and returns its base URL.
fn spawn_server(env: &TestEnv) -> String {
    let config = web::Data::new(env.config.clone());
    let pool = web::Data::new(env.pool.clone());
    let state = web::Data::new(AppState { push_sender: env.sender.clone() });
    let server = HttpServer::new(move || {
        App::new()
            .app_data(config.clone())
            .app_data(pool.clone())
            .app_data(state.clone())
            .configure(routes::configure)
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    format!("http://{}", addr)
}

#[actix_web::test]
async fn session_lifecycle_against_a_live_server() {
    let env = TestEnv::new();
    let base = spawn_server(&env);
    let store = Arc::new(MemoryStore::new());
    let client = Arc::new(ApiClient::new(&base, store.clone()).unwrap());

    let mut session = AuthSession::new(client.clone());
    let user = session.login("admin", "admin123").await.unwrap();
    assert_eq!(user.username, "admin");
    assert!(session.state().is_authenticated);
    assert!(store.get(TOKEN_KEY).unwrap().is_some());

    let tags = client.list_tags(&Params::new().page(1, 10)).await.unwrap();
    assert_eq!(tags.data.unwrap().len(), 3);
    assert_eq!(tags.pagination.unwrap().total, 3);

    let mut restored = AuthSession::new(client.clone());
    assert!(restored.restore().await.unwrap());
    assert_eq!(restored.state().user.as_ref().map(|u| u.username.as_str()), Some("admin"));

    session.logout().await.unwrap();
    assert!(!session.state().is_authenticated);
    assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
}

#[actix_web::test]
async fn rejected_token_clears_storage_and_fires_the_hook() {
    let env = TestEnv::new();
    let base = spawn_server(&env);
    let store = Arc::new(MemoryStore::new());
    store.set(TOKEN_KEY, "not-a-real-token").unwrap();
    let fired = Arc::new(AtomicBool::new(false));
    let flag = fired.clone();
    let client = ApiClient::new(&base, store.clone())
        .unwrap()
        .on_unauthorized(Arc::new(move || flag.store(true, Ordering::SeqCst)));

    let err = client.list_tags(&Params::new()).await.unwrap_err();
    assert!(matches!(err, ClientError::Unauthorized(_)));
    assert!(fired.load(Ordering::SeqCst));
    assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
}

#[actix_web::test]
async fn api_errors_carry_the_server_message() {
    let env = TestEnv::new();
    let base = spawn_server(&env);
    let client = Arc::new(ApiClient::new(&base, Arc::new(MemoryStore::new())).unwrap());
    AuthSession::new(client.clone()).login("testuser", "test123").await.unwrap();

    match client.list_push_tasks(&Params::new()).await {
        Err(ClientError::Api { status, message }) => {
            assert_eq!(status, 403);
            assert!(!message.is_empty());
        }
        other => panic!("expected a 403, got {:?}", other.map(|r| r.success)),
    }
}

#[actix_web::test]
async fn partner_list_falls_back_to_samples_when_missing() {
    let env = TestEnv::new();
    let pool = web::Data::new(env.pool.clone());
    let server = HttpServer::new(move || {
        App::new()
            .app_data(pool.clone())
            .service(web::scope("/api").configure(routes::public::config_api))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());

    let client = ApiClient::new(&format!("http://{}", addr), Arc::new(MemoryStore::new())).unwrap();
    let list = client.list_partners_with_fallback(&Params::new()).await.unwrap();
    assert!(list.from_fallback);
    assert!(!list.partners.is_empty());
    assert!(list.pagination.is_none());
}

#[actix_web::test]
async fn attribution_page_round_trip() {
    let env = TestEnv::new();
    let base = spawn_server(&env);
    let store = Arc::new(MemoryStore::new());
    let client = Arc::new(ApiClient::new(&base, store.clone()).unwrap());
    let user = AuthSession::new(client.clone()).login("admin", "admin123").await.unwrap();

    let cache = TtlCache::new(store.clone());
    let slot = Arc::new(SnapshotSlot::new());
    let mut page = AdjustDataPage::new(client.clone(), cache.clone(), slot.clone(), user.id, "adjust");
    assert_eq!(page.mount().await.unwrap(), MountOutcome::Empty);

    let today = Utc::now().date_naive();
    let filter = AttributionFilter {
        date_range: DateRange { start_date: today - Duration::days(30), end_date: today },
        media_sources: vec!["tiktok".to_string()],
        ad_sequences: vec![],
    };
    let count = page.apply_filter(filter).await.unwrap();
    assert!(count > 0);
    assert!(page.all_data().iter().all(|row| row.media_source == "tiktok"));

    page.toggle_favorite("tiktok", "seq_a");
    page.sync_favorites().await.unwrap();
    assert!(!page.favorites().is_dirty());
    let stored = client.get_favorites().await.unwrap().data.unwrap();
    assert_eq!(stored["tiktok"][0].value, "seq_a");

    page.unmount();
    let mut remounted = AdjustDataPage::new(client.clone(), cache.clone(), slot.clone(), user.id, "adjust");
    assert_eq!(remounted.mount().await.unwrap(), MountOutcome::Snapshot);
    assert_eq!(remounted.all_data().len(), count);

    remounted.unmount();
    slot.clear();
    let mut fresh = AdjustDataPage::new(client, cache, slot, user.id, "adjust");
    assert_eq!(fresh.mount().await.unwrap(), MountOutcome::Cached);
    assert_eq!(fresh.all_data().len(), count);
    assert!(fresh.favorites().is_favorite("tiktok", "seq_a"));
}
