use crate::models::db_operations::{like_pattern, timestamp, SqlFilter, SqlUpdate};
use crate::models::{PostAction, UpdateUserRequest, User, UserRole};
use bcrypt::{hash, verify, BcryptError};
use chrono::{Duration, Utc};
use rand::Rng;
use rusqlite::{params, Connection, Error as RusqliteError, OptionalExtension, Row};

const USER_COLUMNS: &str = "id, username, email, role, is_active, last_login_at, created_at, updated_at";

fn bcrypt_to_rusqlite_error(e: BcryptError) -> RusqliteError {
    RusqliteError::ToSqlConversionFailure(Box::new(e))
}

fn map_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        role: row.get(3)?,
        is_active: row.get(4)?,
        last_login_at: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

#[derive(Debug, Default, Clone)]
pub struct UserFilter {
    pub search: Option<String>,
    pub role: Option<UserRole>,
    pub is_active: Option<bool>,
}

pub fn create_user(
    conn: &Connection,
    username: &str,
    email: &str,
    password: &str,
    role: UserRole,
    is_active: bool,
) -> Result<i64, RusqliteError> {
    let hashed_password = hash(password, bcrypt::DEFAULT_COST).map_err(bcrypt_to_rusqlite_error)?;
    let now = timestamp();
    conn.execute(
        "INSERT INTO users (username, email, password_hash, role, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![username, email, hashed_password, role, is_active, now],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn read_user(conn: &Connection, user_id: i64) -> Result<Option<User>, RusqliteError> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        [user_id],
        map_user,
    )
    .optional()
}

pub fn read_user_by_username(conn: &Connection, username: &str) -> Result<Option<User>, RusqliteError> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
        [username],
        map_user,
    )
    .optional()
}

pub fn list_users(
    conn: &Connection,
    filter: &UserFilter,
    limit: u32,
    offset: u32,
) -> Result<(Vec<User>, i64), RusqliteError> {
    let mut sql_filter = SqlFilter::new();
    if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
        sql_filter.push_repeated("(username LIKE ? OR email LIKE ?)", like_pattern(search), 2);
    }
    if let Some(role) = filter.role {
        sql_filter.push("role = ?", role);
    }
    if let Some(is_active) = filter.is_active {
        sql_filter.push("is_active = ?", is_active);
    }

    let total = sql_filter.count(conn, "users")?;
    let sql = format!(
        "SELECT {} FROM users{} ORDER BY id LIMIT ? OFFSET ?",
        USER_COLUMNS,
        sql_filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map(sql_filter.params_with(&[limit as i64, offset as i64]).as_slice(), map_user)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((users, total))
}

pub fn update_user(conn: &Connection, user_id: i64, changes: &UpdateUserRequest) -> Result<usize, RusqliteError> {
    let mut update = SqlUpdate::new("users");
    update
        .set_opt("username", changes.username.clone())
        .set_opt("email", changes.email.clone())
        .set_opt("role", changes.role)
        .set_opt("is_active", changes.is_active);
    if !update.is_empty() {
        update.set("updated_at", timestamp());
    }
    update.execute(conn, user_id)
}

pub fn update_password(conn: &Connection, user_id: i64, new_password: &str) -> Result<usize, RusqliteError> {
    let hashed_password = hash(new_password, bcrypt::DEFAULT_COST).map_err(bcrypt_to_rusqlite_error)?;
    conn.execute(
        "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE id = ?3",
        params![hashed_password, timestamp(), user_id],
    )
}

pub fn delete_user(conn: &Connection, user_id: i64) -> Result<usize, RusqliteError> {
    conn.execute("DELETE FROM users WHERE id = ?1", [user_id])
}

/// Returns the user when the password matches and the account is active.
pub fn verify_credentials(
    conn: &Connection,
    username: &str,
    password: &str,
) -> Result<Option<User>, RusqliteError> {
    let hash: Option<String> = conn
        .query_row(
            "SELECT password_hash FROM users WHERE username = ?1 AND is_active = 1",
            [username],
            |row| row.get(0),
        )
        .optional()?;

    match hash {
        Some(hash) if verify(password, &hash).unwrap_or(false) => read_user_by_username(conn, username),
        _ => Ok(None),
    }
}

pub fn update_last_login_time(conn: &Connection, user_id: i64) -> Result<(), RusqliteError> {
    conn.execute("UPDATE users SET last_login_at = ?1 WHERE id = ?2", params![timestamp(), user_id])?;
    Ok(())
}

/// Whether `user` may edit or delete the post owned by `author_id`.
pub fn check_permission(user: &User, author_id: i64, _action: PostAction) -> bool {
    user.role.is_staff() || user.id == author_id
}

// --- Sessions ---

/// Generate a random 32-byte hex token.
fn generate_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

pub fn create_session(conn: &Connection, user_id: i64, ttl_hours: u64) -> Result<String, RusqliteError> {
    let token = generate_token();
    let now = Utc::now();
    let expires_at = now + Duration::hours(ttl_hours as i64);
    conn.execute(
        "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
        params![token, user_id, now.to_rfc3339(), expires_at.to_rfc3339()],
    )?;
    Ok(token)
}

/// Resolves a bearer token to its active, unexpired user.
pub fn find_session_user(conn: &Connection, token: &str) -> Result<Option<User>, RusqliteError> {
    let row: Option<(i64, String)> = conn
        .query_row(
            "SELECT user_id, expires_at FROM sessions WHERE token = ?1",
            [token],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((user_id, expires_at)) = row else {
        return Ok(None);
    };
    let still_valid = chrono::DateTime::parse_from_rfc3339(&expires_at)
        .map(|expiry| expiry > Utc::now())
        .unwrap_or(false);
    if !still_valid {
        delete_session(conn, token)?;
        return Ok(None);
    }

    Ok(read_user(conn, user_id)?.filter(|user| user.is_active))
}

pub fn delete_session(conn: &Connection, token: &str) -> Result<usize, RusqliteError> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", [token])
}

pub fn delete_sessions_for_user(conn: &Connection, user_id: i64) -> Result<usize, RusqliteError> {
    conn.execute("DELETE FROM sessions WHERE user_id = ?1", [user_id])
}

pub fn purge_expired_sessions(conn: &Connection) -> Result<usize, RusqliteError> {
    // RFC 3339 strings in UTC compare chronologically.
    conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", [timestamp()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::db_setup::setup_database;

    fn db() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        setup_database(&mut conn).unwrap();
        conn
    }

    #[test]
    fn credentials_require_active_account() {
        let conn = db();
        let id = create_user(&conn, "ops", "ops@example.com", "pa55word", UserRole::User, true).unwrap();
        assert_eq!(verify_credentials(&conn, "ops", "pa55word").unwrap().map(|u| u.id), Some(id));
        assert!(verify_credentials(&conn, "ops", "wrong").unwrap().is_none());

        let changes = UpdateUserRequest { is_active: Some(false), ..Default::default() };
        update_user(&conn, id, &changes).unwrap();
        assert!(verify_credentials(&conn, "ops", "pa55word").unwrap().is_none());
    }

    #[test]
    fn session_resolves_until_deleted() {
        let conn = db();
        let id = create_user(&conn, "ops", "ops@example.com", "pa55word", UserRole::Moderator, true).unwrap();
        let token = create_session(&conn, id, 1).unwrap();
        assert_eq!(token.len(), 64);
        assert_eq!(find_session_user(&conn, &token).unwrap().unwrap().role, UserRole::Moderator);

        delete_session(&conn, &token).unwrap();
        assert!(find_session_user(&conn, &token).unwrap().is_none());
    }

    #[test]
    fn expired_sessions_are_rejected_and_purged() {
        let conn = db();
        let id = create_user(&conn, "ops", "ops@example.com", "pa55word", UserRole::User, true).unwrap();
        conn.execute(
            "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES ('old', ?1, ?2, ?2)",
            params![id, (Utc::now() - Duration::hours(2)).to_rfc3339()],
        )
        .unwrap();
        assert!(find_session_user(&conn, "old").unwrap().is_none());
        let remaining: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0)).unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn list_users_filters_and_counts() {
        let conn = db();
        create_user(&conn, "alice", "alice@example.com", "pw123456", UserRole::Admin, true).unwrap();
        create_user(&conn, "bob", "bob@example.com", "pw123456", UserRole::User, true).unwrap();
        create_user(&conn, "bobby", "bobby@example.com", "pw123456", UserRole::User, false).unwrap();

        let filter = UserFilter { search: Some("bob".into()), ..Default::default() };
        let (page, total) = list_users(&conn, &filter, 1, 0).unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 1);

        let admins = UserFilter { role: Some(UserRole::Admin), ..Default::default() };
        assert_eq!(list_users(&conn, &admins, 10, 0).unwrap().1, 1);
    }

    #[test]
    fn staff_may_act_on_any_post_authors_on_their_own() {
        let conn = db();
        let author_id = create_user(&conn, "writer", "w@example.com", "pw123456", UserRole::User, true).unwrap();
        let author = read_user(&conn, author_id).unwrap().unwrap();
        assert!(check_permission(&author, author_id, PostAction::Edit));
        assert!(!check_permission(&author, author_id + 1, PostAction::Delete));

        let mut moderator = author.clone();
        moderator.role = UserRole::Moderator;
        assert!(check_permission(&moderator, author_id + 1, PostAction::Delete));
    }
}
