use chrono::{Duration, NaiveDate, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, Transaction};
use std::path::Path;
use thiserror::Error;

use crate::models::partner_models::PARTNER_TEXT_COLUMNS;
use crate::models::report_models::ReportKind;
use crate::models::UserRole;
use crate::DbPool;

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("R2D2 Pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Password hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The two accounts every fresh install starts with.
pub const DEFAULT_ACCOUNTS: [(&str, &str, &str, UserRole); 2] = [
    ("admin", "admin@example.com", "admin123", UserRole::Admin),
    ("testuser", "test@example.com", "test123", UserRole::User),
];

pub const SEED_MEDIA_SOURCES: [&str; 3] = ["google_ads", "facebook", "tiktok"];
pub const SEED_AD_SEQUENCES: [&str; 2] = ["seq_a", "seq_b"];
pub const SEED_EVENTS: [&str; 4] = ["install", "register", "apply", "loan"];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub users: usize,
    pub tags: usize,
    pub posts: usize,
    pub settings: usize,
    pub attribution_rows: usize,
    pub metric_rows: usize,
}

/// Opens (and creates if needed) the SQLite database behind a connection pool.
pub fn create_pool(db_file: &Path) -> Result<DbPool, SetupError> {
    if let Some(parent) = db_file.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(db_file).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
    });
    let pool = Pool::builder().max_size(8).build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;

    Ok(pool)
}

pub fn setup_database(conn: &mut Connection) -> Result<(), SetupError> {
    let tx = conn.transaction()?;

    log::info!("Creating user and session tables...");
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'USER' CHECK(role IN ('ADMIN', 'USER', 'MODERATOR')),
            is_active INTEGER NOT NULL DEFAULT 1,
            last_login_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        );",
    )?;

    log::info!("Creating content tables...");
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            color TEXT NOT NULL DEFAULT '#1890ff',
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            summary TEXT,
            status TEXT NOT NULL DEFAULT 'DRAFT' CHECK(status IN ('DRAFT', 'PUBLISHED', 'ARCHIVED')),
            views INTEGER NOT NULL DEFAULT 0,
            author_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE CASCADE
        );
        CREATE TABLE IF NOT EXISTS post_tags (
            post_id INTEGER NOT NULL,
            tag_id INTEGER NOT NULL,
            PRIMARY KEY (post_id, tag_id),
            FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE,
            FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
        );
        CREATE TABLE IF NOT EXISTS comments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id INTEGER NOT NULL,
            author_id INTEGER NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE,
            FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE CASCADE
        );
        CREATE TABLE IF NOT EXISTS system_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            description TEXT,
            updated_at TEXT NOT NULL
        );",
    )?;

    log::info!("Creating 'api_partner_configs' table...");
    let partner_columns: String = PARTNER_TEXT_COLUMNS
        .iter()
        .map(|column| format!("{} TEXT,\n", column))
        .collect();
    tx.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS api_partner_configs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            app_id INTEGER,
            partner_api TEXT NOT NULL,
            secret_key TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            {}
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
        partner_columns
    ))?;

    log::info!("Creating push tables...");
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS push_configs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            provider TEXT NOT NULL CHECK(provider IN ('fcm', 'apns', 'webhook')),
            endpoint_url TEXT NOT NULL,
            api_key TEXT,
            app_id TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS push_audiences (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            tag TEXT,
            description TEXT,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS push_tokens (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            token TEXT NOT NULL UNIQUE,
            platform TEXT NOT NULL CHECK(platform IN ('android', 'ios', 'web')),
            user_ref TEXT,
            tags TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS push_token_audiences (
            token_id INTEGER NOT NULL,
            audience_id INTEGER NOT NULL,
            PRIMARY KEY (token_id, audience_id),
            FOREIGN KEY (token_id) REFERENCES push_tokens(id) ON DELETE CASCADE,
            FOREIGN KEY (audience_id) REFERENCES push_audiences(id) ON DELETE CASCADE
        );
        CREATE TABLE IF NOT EXISTS push_templates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            payload TEXT NOT NULL DEFAULT '{}',
            audience_id INTEGER NOT NULL,
            config_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (audience_id) REFERENCES push_audiences(id),
            FOREIGN KEY (config_id) REFERENCES push_configs(id)
        );
        CREATE TABLE IF NOT EXISTS push_tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            template_id INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft'
                CHECK(status IN ('draft', 'scheduled', 'processing', 'completed', 'failed')),
            scheduled_at TEXT,
            started_at TEXT,
            finished_at TEXT,
            total_count INTEGER NOT NULL DEFAULT 0,
            success_count INTEGER NOT NULL DEFAULT 0,
            failure_count INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            created_by INTEGER,
            created_at TEXT NOT NULL,
            FOREIGN KEY (template_id) REFERENCES push_templates(id),
            FOREIGN KEY (created_by) REFERENCES users(id) ON DELETE SET NULL
        );",
    )?;

    log::info!("Creating report tables...");
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS attribution_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_date TEXT NOT NULL,
            data_source TEXT NOT NULL,
            media_source TEXT NOT NULL,
            ad_sequence TEXT NOT NULL,
            event_name TEXT NOT NULL,
            event_count INTEGER NOT NULL DEFAULT 0,
            revenue REAL NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_attribution_source_date
            ON attribution_events (data_source, event_date);
        CREATE TABLE IF NOT EXISTS report_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            report TEXT NOT NULL CHECK(report IN ('internal_transfer', 'page', 'post_loan', 'rating')),
            stat_date TEXT NOT NULL,
            dimension TEXT NOT NULL,
            metric TEXT NOT NULL,
            value REAL NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_report_metrics_report_date
            ON report_metrics (report, stat_date);
        CREATE TABLE IF NOT EXISTS attribution_favorites (
            user_id INTEGER NOT NULL,
            media_source TEXT NOT NULL,
            value TEXT NOT NULL,
            favorited_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, media_source, value),
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        );",
    )?;

    tx.commit()?;
    Ok(())
}

/// Inserts the default accounts, sample content, settings and report data. Existing rows
/// are left alone, so running it twice is harmless.
pub fn seed_database(conn: &mut Connection) -> Result<SeedSummary, SetupError> {
    let tx = conn.transaction()?;
    let now = Utc::now().to_rfc3339();
    let mut summary = SeedSummary::default();

    for (username, email, password, role) in DEFAULT_ACCOUNTS {
        let hashed = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;
        summary.users += tx.execute(
            "INSERT OR IGNORE INTO users (username, email, password_hash, role, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![username, email, hashed, role, now],
        )?;
    }

    for (name, color) in [("Technology", "#1890ff"), ("Finance", "#52c41a"), ("Announcement", "#fa8c16")] {
        summary.tags += tx.execute(
            "INSERT OR IGNORE INTO tags (name, color, created_at) VALUES (?1, ?2, ?3)",
            params![name, color, now],
        )?;
    }

    summary.posts = seed_posts(&tx, &now)?;
    summary.settings = seed_system_config(&tx, &now)?;

    let today = Utc::now().date_naive();
    summary.attribution_rows = seed_attribution_events(&tx, today)?;
    summary.metric_rows = seed_report_metrics(&tx, today)?;

    tx.commit()?;
    Ok(summary)
}

fn seed_posts(tx: &Transaction, now: &str) -> rusqlite::Result<usize> {
    let existing: i64 = tx.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
    if existing > 0 {
        return Ok(0);
    }
    let admin_id: i64 = tx.query_row("SELECT id FROM users WHERE username = 'admin'", [], |row| row.get(0))?;

    let samples = [
        (
            "Welcome to OpsDesk",
            "This dashboard manages users, content, push campaigns and partner integrations.",
            "Getting started with the operations dashboard.",
            "PUBLISHED",
            "Announcement",
        ),
        (
            "Quarterly lending rate update",
            "Rates for the upcoming quarter are under review.",
            "Draft notice about rate changes.",
            "DRAFT",
            "Finance",
        ),
    ];

    let mut inserted = 0;
    for (title, content, summary, status, tag) in samples {
        tx.execute(
            "INSERT INTO posts (title, content, summary, status, author_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![title, content, summary, status, admin_id, now],
        )?;
        let post_id = tx.last_insert_rowid();
        tx.execute(
            "INSERT OR IGNORE INTO post_tags (post_id, tag_id) SELECT ?1, id FROM tags WHERE name = ?2",
            params![post_id, tag],
        )?;
        inserted += 1;
    }
    Ok(inserted)
}

fn seed_system_config(tx: &Transaction, now: &str) -> rusqlite::Result<usize> {
    let defaults = [
        ("site_name", "OpsDesk", "Name shown in the dashboard header"),
        ("maintenance_mode", "false", "Blocks partner traffic while true"),
        ("default_page_size", "10", "Rows per page in list views"),
        ("support_email", "support@example.com", "Contact address shown to operators"),
    ];
    let mut inserted = 0;
    for (key, value, description) in defaults {
        inserted += tx.execute(
            "INSERT OR IGNORE INTO system_config (key, value, description, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![key, value, description, now],
        )?;
    }
    Ok(inserted)
}

fn seed_attribution_events(tx: &Transaction, today: NaiveDate) -> rusqlite::Result<usize> {
    let existing: i64 = tx.query_row("SELECT COUNT(*) FROM attribution_events", [], |row| row.get(0))?;
    if existing > 0 {
        return Ok(0);
    }

    let mut stmt = tx.prepare(
        "INSERT INTO attribution_events
            (event_date, data_source, media_source, ad_sequence, event_name, event_count, revenue)
         VALUES (?1, 'adjust', ?2, ?3, ?4, ?5, ?6)",
    )?;
    let mut inserted = 0;
    for day in 0..7i64 {
        let date = (today - Duration::days(day)).to_string();
        for (m, media) in SEED_MEDIA_SOURCES.iter().enumerate() {
            for (s, sequence) in SEED_AD_SEQUENCES.iter().enumerate() {
                // Each funnel step keeps roughly half of the previous one.
                let mut count = 400 - (m as i64 * 60) - (s as i64 * 40) + day * 5;
                for event in SEED_EVENTS {
                    let revenue = if event == "loan" { count as f64 * 12.5 } else { 0.0 };
                    stmt.execute(params![date, media, sequence, event, count, revenue])?;
                    inserted += 1;
                    count /= 2;
                }
            }
        }
    }
    Ok(inserted)
}

fn seed_report_metrics(tx: &Transaction, today: NaiveDate) -> rusqlite::Result<usize> {
    let existing: i64 = tx.query_row("SELECT COUNT(*) FROM report_metrics", [], |row| row.get(0))?;
    if existing > 0 {
        return Ok(0);
    }

    let dimensions = |kind: ReportKind| -> [&'static str; 2] {
        match kind {
            ReportKind::InternalTransfer => ["bank_transfer", "e_wallet"],
            ReportKind::Page => ["home", "loan_apply"],
            ReportKind::PostLoan => ["cash_loan", "installment"],
            ReportKind::Rating => ["google_play", "app_store"],
        }
    };

    let mut stmt = tx.prepare(
        "INSERT INTO report_metrics (report, stat_date, dimension, metric, value) VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    let mut inserted = 0;
    for kind in ReportKind::ALL {
        for day in 0..7i64 {
            let date = (today - Duration::days(day)).to_string();
            for (d, dimension) in dimensions(kind).iter().enumerate() {
                for (i, metric) in kind.metrics().iter().enumerate() {
                    let value = 100.0 + (day * 7) as f64 + (d * 30) as f64 + (i * 3) as f64;
                    stmt.execute(params![kind.table_key(), date, dimension, metric, value])?;
                    inserted += 1;
                }
            }
        }
    }
    Ok(inserted)
}

/// Re-hashes the passwords of the default accounts back to their documented values.
pub fn reset_default_passwords(conn: &Connection) -> Result<usize, SetupError> {
    let now = Utc::now().to_rfc3339();
    let mut updated = 0;
    for (username, _, password, _) in DEFAULT_ACCOUNTS {
        let hashed = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;
        updated += conn.execute(
            "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE username = ?3",
            params![hashed, now, username],
        )?;
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_db() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        setup_database(&mut conn).unwrap();
        conn
    }

    #[test]
    fn setup_is_idempotent() {
        let mut conn = fresh_db();
        setup_database(&mut conn).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'push_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 6);
    }

    #[test]
    fn seeding_twice_adds_nothing_the_second_time() {
        let mut conn = fresh_db();
        let first = seed_database(&mut conn).unwrap();
        assert_eq!(first.users, 2);
        assert_eq!(first.posts, 2);
        assert_eq!(
            first.attribution_rows,
            7 * SEED_MEDIA_SOURCES.len() * SEED_AD_SEQUENCES.len() * SEED_EVENTS.len()
        );

        let second = seed_database(&mut conn).unwrap();
        assert_eq!(second, SeedSummary::default());
    }

    #[test]
    fn partner_table_has_every_text_column() {
        let conn = fresh_db();
        let stmt = conn.prepare("SELECT * FROM api_partner_configs").unwrap();
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        for column in PARTNER_TEXT_COLUMNS {
            assert!(names.iter().any(|n| n == column), "missing column {}", column);
        }
    }
}
