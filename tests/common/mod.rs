#![allow(dead_code)]

use async_trait::async_trait;
use opsdesk_backend::config::Config;
use opsdesk_backend::helper::push_helpers::{PushError, PushSender};
use opsdesk_backend::models::push_models::{DispatchReport, PushConfig, PushMessage};
use opsdesk_backend::setup::db_setup;
use opsdesk_backend::DbPool;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Records every batch instead of calling a provider.
#[derive(Default)]
pub struct RecordingSender {
    pub batches: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl PushSender for RecordingSender {
    async fn send(&self, _config: &PushConfig, _message: &PushMessage, tokens: &[String]) -> Result<DispatchReport, PushError> {
        self.batches.lock().unwrap().push(tokens.to_vec());
        Ok(DispatchReport { success: tokens.len() as u32, failure: 0 })
    }
}

/// A migrated and seeded database in a temporary directory.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: Config,
    pub pool: DbPool,
    pub sender: Arc<RecordingSender>,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_paths(&dir.path().join("db"), &dir.path().join("media"));
        let pool = db_setup::create_pool(&config.database_file()).unwrap();
        {
            let mut conn = pool.get().unwrap();
            db_setup::setup_database(&mut conn).unwrap();
            db_setup::seed_database(&mut conn).unwrap();
        }
        TestEnv { dir, config, pool, sender: Arc::new(RecordingSender::default()) }
    }
}

/// Builds the full `/api` app over a [`TestEnv`].
#[macro_export]
macro_rules! test_app {
    ($env:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(actix_web::web::Data::new($env.config.clone()))
                .app_data(actix_web::web::Data::new($env.pool.clone()))
                .app_data(actix_web::web::Data::new(opsdesk_backend::AppState {
                    push_sender: $env.sender.clone(),
                }))
                .configure(opsdesk_backend::routes::configure),
        )
        .await
    };
}

/// Logs in and returns the bearer token.
#[macro_export]
macro_rules! login {
    ($app:expr, $username:expr, $password:expr) => {{
        let req = actix_web::test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(serde_json::json!({ "username": $username, "password": $password }))
            .to_request();
        let body: serde_json::Value = actix_web::test::call_and_read_body_json(&$app, req).await;
        assert_eq!(body["success"], true, "login failed: {}", body);
        body["data"]["token"].as_str().unwrap().to_string()
    }};
}

pub fn bearer(token: &str) -> (actix_web::http::header::HeaderName, String) {
    (actix_web::http::header::AUTHORIZATION, format!("Bearer {}", token))
}
