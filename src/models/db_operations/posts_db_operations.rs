use crate::models::db_operations::{like_pattern, timestamp, SqlFilter, SqlUpdate};
use crate::models::{Comment, CreatePostRequest, Post, PostStatus, TagRef, UpdatePostRequest};
use rusqlite::{params, Connection, Error as RusqliteError, OptionalExtension, Row};

const POST_SELECT: &str = "SELECT p.id, p.title, p.content, p.summary, p.status, p.views, p.author_id,
        COALESCE(u.username, ''), p.created_at, p.updated_at
     FROM posts p LEFT JOIN users u ON u.id = p.author_id";

#[derive(Debug, Default, Clone)]
pub struct PostFilter {
    pub status: Option<PostStatus>,
    pub tag_id: Option<i64>,
    pub author_id: Option<i64>,
    pub search: Option<String>,
}

fn map_post(row: &Row) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        summary: row.get(3)?,
        status: row.get(4)?,
        views: row.get(5)?,
        author_id: row.get(6)?,
        author_username: row.get(7)?,
        tags: Vec::new(),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn load_tags(conn: &Connection, post: &mut Post) -> Result<(), RusqliteError> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.color FROM tags t
         JOIN post_tags pt ON pt.tag_id = t.id
         WHERE pt.post_id = ?1 ORDER BY t.name",
    )?;
    post.tags = stmt
        .query_map([post.id], |row| Ok(TagRef { id: row.get(0)?, name: row.get(1)?, color: row.get(2)? }))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(())
}

/// Replaces the tag set of a post. Unknown tag ids fail on the foreign key.
fn replace_tags(conn: &Connection, post_id: i64, tag_ids: &[i64]) -> Result<(), RusqliteError> {
    conn.execute("DELETE FROM post_tags WHERE post_id = ?1", [post_id])?;
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO post_tags (post_id, tag_id) VALUES (?1, ?2)")?;
    for tag_id in tag_ids {
        stmt.execute(params![post_id, tag_id])?;
    }
    Ok(())
}

fn build_filter(filter: &PostFilter) -> SqlFilter {
    let mut sql_filter = SqlFilter::new();
    if let Some(status) = filter.status {
        sql_filter.push("p.status = ?", status);
    }
    if let Some(author_id) = filter.author_id {
        sql_filter.push("p.author_id = ?", author_id);
    }
    if let Some(tag_id) = filter.tag_id {
        sql_filter.push("EXISTS (SELECT 1 FROM post_tags pt WHERE pt.post_id = p.id AND pt.tag_id = ?)", tag_id);
    }
    if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
        sql_filter.push_repeated("(p.title LIKE ? OR p.content LIKE ?)", like_pattern(search), 2);
    }
    sql_filter
}

pub fn list_posts(
    conn: &Connection,
    filter: &PostFilter,
    limit: u32,
    offset: u32,
) -> Result<(Vec<Post>, i64), RusqliteError> {
    let sql_filter = build_filter(filter);
    let total = sql_filter.count(conn, "posts p")?;

    let sql = format!(
        "{}{} ORDER BY p.created_at DESC, p.id DESC LIMIT ? OFFSET ?",
        POST_SELECT,
        sql_filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut posts = stmt
        .query_map(sql_filter.params_with(&[limit as i64, offset as i64]).as_slice(), map_post)?
        .collect::<Result<Vec<_>, _>>()?;
    for post in posts.iter_mut() {
        load_tags(conn, post)?;
    }
    Ok((posts, total))
}

pub fn get_post(conn: &Connection, post_id: i64) -> Result<Option<Post>, RusqliteError> {
    let post = conn
        .query_row(&format!("{} WHERE p.id = ?1", POST_SELECT), [post_id], map_post)
        .optional()?;
    match post {
        Some(mut post) => {
            load_tags(conn, &mut post)?;
            Ok(Some(post))
        }
        None => Ok(None),
    }
}

pub fn get_published_post(conn: &Connection, post_id: i64) -> Result<Option<Post>, RusqliteError> {
    Ok(get_post(conn, post_id)?.filter(|post| post.status == PostStatus::Published))
}

pub fn create_post(conn: &mut Connection, author_id: i64, req: &CreatePostRequest) -> Result<i64, RusqliteError> {
    let tx = conn.transaction()?;
    let now = timestamp();
    tx.execute(
        "INSERT INTO posts (title, content, summary, status, author_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            req.title,
            req.content,
            req.summary,
            req.status.unwrap_or(PostStatus::Draft),
            author_id,
            now
        ],
    )?;
    let post_id = tx.last_insert_rowid();
    replace_tags(&tx, post_id, &req.tag_ids)?;
    tx.commit()?;
    Ok(post_id)
}

pub fn update_post(conn: &mut Connection, post_id: i64, req: &UpdatePostRequest) -> Result<usize, RusqliteError> {
    let tx = conn.transaction()?;
    let mut update = SqlUpdate::new("posts");
    update
        .set_opt("title", req.title.clone())
        .set_opt("content", req.content.clone())
        .set_opt("summary", req.summary.clone())
        .set_opt("status", req.status);
    if !update.is_empty() || req.tag_ids.is_some() {
        update.set("updated_at", timestamp());
    }
    let affected = update.execute(&tx, post_id)?;
    if affected > 0 {
        if let Some(tag_ids) = &req.tag_ids {
            replace_tags(&tx, post_id, tag_ids)?;
        }
    }
    tx.commit()?;
    Ok(affected)
}

pub fn delete_post(conn: &Connection, post_id: i64) -> Result<usize, RusqliteError> {
    conn.execute("DELETE FROM posts WHERE id = ?1", [post_id])
}

/// Returns the new view count of a published post.
pub fn increment_views(conn: &Connection, post_id: i64) -> Result<Option<i64>, RusqliteError> {
    let updated = conn.execute(
        "UPDATE posts SET views = views + 1 WHERE id = ?1 AND status = 'PUBLISHED'",
        [post_id],
    )?;
    if updated == 0 {
        return Ok(None);
    }
    conn.query_row("SELECT views FROM posts WHERE id = ?1", [post_id], |row| row.get(0))
        .optional()
}

pub fn post_author(conn: &Connection, post_id: i64) -> Result<Option<i64>, RusqliteError> {
    conn.query_row("SELECT author_id FROM posts WHERE id = ?1", [post_id], |row| row.get(0))
        .optional()
}

// --- Comments ---

fn map_comment(row: &Row) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        post_id: row.get(1)?,
        author_id: row.get(2)?,
        author_username: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

const COMMENT_SELECT: &str = "SELECT c.id, c.post_id, c.author_id, COALESCE(u.username, ''), c.content, c.created_at
     FROM comments c LEFT JOIN users u ON u.id = c.author_id";

pub fn list_comments(
    conn: &Connection,
    post_id: i64,
    limit: u32,
    offset: u32,
) -> Result<(Vec<Comment>, i64), RusqliteError> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM comments WHERE post_id = ?1", [post_id], |row| row.get(0))?;
    let mut stmt = conn.prepare(&format!(
        "{} WHERE c.post_id = ?1 ORDER BY c.created_at ASC, c.id ASC LIMIT ?2 OFFSET ?3",
        COMMENT_SELECT
    ))?;
    let comments = stmt
        .query_map(params![post_id, limit, offset], map_comment)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((comments, total))
}

pub fn get_comment(conn: &Connection, comment_id: i64) -> Result<Option<Comment>, RusqliteError> {
    conn.query_row(&format!("{} WHERE c.id = ?1", COMMENT_SELECT), [comment_id], map_comment)
        .optional()
}

pub fn create_comment(conn: &Connection, post_id: i64, author_id: i64, content: &str) -> Result<i64, RusqliteError> {
    conn.execute(
        "INSERT INTO comments (post_id, author_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![post_id, author_id, content, timestamp()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn delete_comment(conn: &Connection, comment_id: i64) -> Result<usize, RusqliteError> {
    conn.execute("DELETE FROM comments WHERE id = ?1", [comment_id])
}
