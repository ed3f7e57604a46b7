use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
pub type DbPool = Pool<SqliteConnectionManager>;

use crate::helper::push_helpers::PushSender;

/// Process-wide services shared by every worker.
pub struct AppState {
    pub push_sender: Arc<dyn PushSender>,
}

pub mod attribution;
pub mod client;
pub mod config;
pub mod error;
pub mod helper;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod setup;
