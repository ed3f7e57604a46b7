use crate::models::db_operations::{like_pattern, timestamp, SqlFilter};
use crate::models::SystemConfigEntry;
use rusqlite::{params, Connection, Error as RusqliteError, OptionalExtension, Row};

fn map_entry(row: &Row) -> rusqlite::Result<SystemConfigEntry> {
    Ok(SystemConfigEntry {
        key: row.get(0)?,
        value: row.get(1)?,
        description: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

pub fn list_entries(
    conn: &Connection,
    search: Option<&str>,
    limit: u32,
    offset: u32,
) -> Result<(Vec<SystemConfigEntry>, i64), RusqliteError> {
    let mut filter = SqlFilter::new();
    if let Some(search) = search.filter(|s| !s.trim().is_empty()) {
        filter.push_repeated("(key LIKE ? OR description LIKE ?)", like_pattern(search), 2);
    }
    let total = filter.count(conn, "system_config")?;
    let sql = format!(
        "SELECT key, value, description, updated_at FROM system_config{} ORDER BY key LIMIT ? OFFSET ?",
        filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map(filter.params_with(&[limit as i64, offset as i64]).as_slice(), map_entry)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((entries, total))
}

pub fn get_entry(conn: &Connection, key: &str) -> Result<Option<SystemConfigEntry>, RusqliteError> {
    conn.query_row(
        "SELECT key, value, description, updated_at FROM system_config WHERE key = ?1",
        [key],
        map_entry,
    )
    .optional()
}

pub fn create_entry(
    conn: &Connection,
    key: &str,
    value: &str,
    description: Option<&str>,
) -> Result<(), RusqliteError> {
    conn.execute(
        "INSERT INTO system_config (key, value, description, updated_at) VALUES (?1, ?2, ?3, ?4)",
        params![key, value, description, timestamp()],
    )?;
    Ok(())
}

/// Updates the value and, when given, the description. Returns the number of rows touched.
pub fn update_entry(
    conn: &Connection,
    key: &str,
    value: &str,
    description: Option<&str>,
) -> Result<usize, RusqliteError> {
    conn.execute(
        "UPDATE system_config SET value = ?1, description = COALESCE(?2, description), updated_at = ?3
         WHERE key = ?4",
        params![value, description, timestamp(), key],
    )
}

pub fn delete_entry(conn: &Connection, key: &str) -> Result<usize, RusqliteError> {
    conn.execute("DELETE FROM system_config WHERE key = ?1", [key])
}
