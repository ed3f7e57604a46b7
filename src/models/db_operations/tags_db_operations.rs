use crate::models::db_operations::{like_pattern, timestamp, SqlFilter, SqlUpdate};
use crate::models::Tag;
use rusqlite::{params, Connection, Error as RusqliteError, OptionalExtension, Row};

pub const DEFAULT_TAG_COLOR: &str = "#1890ff";

const TAG_SELECT: &str = "SELECT t.id, t.name, t.color,
        (SELECT COUNT(*) FROM post_tags pt WHERE pt.tag_id = t.id), t.created_at
     FROM tags t";

fn map_tag(row: &Row) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        color: row.get(2)?,
        post_count: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub fn list_tags(
    conn: &Connection,
    search: Option<&str>,
    limit: u32,
    offset: u32,
) -> Result<(Vec<Tag>, i64), RusqliteError> {
    let mut filter = SqlFilter::new();
    if let Some(search) = search.filter(|s| !s.trim().is_empty()) {
        filter.push("t.name LIKE ?", like_pattern(search));
    }
    let total = filter.count(conn, "tags t")?;
    let sql = format!("{}{} ORDER BY t.name LIMIT ? OFFSET ?", TAG_SELECT, filter.where_sql());
    let mut stmt = conn.prepare(&sql)?;
    let tags = stmt
        .query_map(filter.params_with(&[limit as i64, offset as i64]).as_slice(), map_tag)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((tags, total))
}

pub fn get_tag(conn: &Connection, tag_id: i64) -> Result<Option<Tag>, RusqliteError> {
    conn.query_row(&format!("{} WHERE t.id = ?1", TAG_SELECT), [tag_id], map_tag)
        .optional()
}

pub fn create_tag(conn: &Connection, name: &str, color: Option<&str>) -> Result<i64, RusqliteError> {
    conn.execute(
        "INSERT INTO tags (name, color, created_at) VALUES (?1, ?2, ?3)",
        params![name, color.unwrap_or(DEFAULT_TAG_COLOR), timestamp()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_tag(
    conn: &Connection,
    tag_id: i64,
    name: Option<String>,
    color: Option<String>,
) -> Result<usize, RusqliteError> {
    SqlUpdate::new("tags").set_opt("name", name).set_opt("color", color).execute(conn, tag_id)
}

/// Deleting a tag detaches it from every post.
pub fn delete_tag(conn: &Connection, tag_id: i64) -> Result<usize, RusqliteError> {
    conn.execute("DELETE FROM tags WHERE id = ?1", [tag_id])
}
