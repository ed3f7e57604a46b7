use crate::models::db_operations::{like_pattern, split_list, timestamp, SqlFilter, SqlUpdate};
use crate::models::push_models::{
    PushAudience, PushAudienceRequest, PushConfig, PushConfigRequest, PushPlatform, PushProvider, PushTask,
    PushTaskRequest, PushTaskStatus, PushTemplate, PushTemplateRequest, PushToken, PushTokenRequest,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Error as RusqliteError, OptionalExtension, Row};

/// Matches a token to an audience: explicit membership, or an active token carrying the audience tag.
const AUDIENCE_MEMBER_CLAUSE: &str = "(t.id IN (SELECT pta.token_id FROM push_token_audiences pta WHERE pta.audience_id = a.id)
      OR (t.is_active = 1 AND COALESCE(a.tag, '') <> ''
          AND instr(',' || t.tags || ',', ',' || a.tag || ',') > 0))";

/// Outcome of a write against a task that must still be pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskWrite {
    Done,
    NotFound,
    NotPending(PushTaskStatus),
}

/// Everything needed to send one task.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub template: PushTemplate,
    pub config: PushConfig,
    pub tokens: Vec<String>,
}

fn join_tags(tags: &[String]) -> String {
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

fn blank_to_none(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(String::from)
}

// --- Configs ---

const CONFIG_COLUMNS: &str = "id, name, provider, endpoint_url, api_key, app_id, is_active, created_at, updated_at";

fn map_config(row: &Row) -> rusqlite::Result<PushConfig> {
    Ok(PushConfig {
        id: row.get(0)?,
        name: row.get(1)?,
        provider: row.get(2)?,
        endpoint_url: row.get(3)?,
        api_key: row.get(4)?,
        app_id: row.get(5)?,
        is_active: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

pub fn list_configs(
    conn: &Connection,
    search: Option<&str>,
    limit: u32,
    offset: u32,
) -> Result<(Vec<PushConfig>, i64), RusqliteError> {
    let mut filter = SqlFilter::new();
    if let Some(search) = search.filter(|s| !s.trim().is_empty()) {
        filter.push("name LIKE ?", like_pattern(search));
    }
    let total = filter.count(conn, "push_configs")?;
    let sql = format!(
        "SELECT {} FROM push_configs{} ORDER BY id DESC LIMIT ? OFFSET ?",
        CONFIG_COLUMNS,
        filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(filter.params_with(&[limit as i64, offset as i64]).as_slice(), map_config)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((rows, total))
}

pub fn get_config(conn: &Connection, config_id: i64) -> Result<Option<PushConfig>, RusqliteError> {
    conn.query_row(
        &format!("SELECT {} FROM push_configs WHERE id = ?1", CONFIG_COLUMNS),
        [config_id],
        map_config,
    )
    .optional()
}

pub fn create_config(
    conn: &Connection,
    name: &str,
    provider: PushProvider,
    endpoint_url: &str,
    req: &PushConfigRequest,
) -> Result<i64, RusqliteError> {
    let now = timestamp();
    conn.execute(
        "INSERT INTO push_configs (name, provider, endpoint_url, api_key, app_id, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            name,
            provider,
            endpoint_url,
            blank_to_none(req.api_key.as_deref()),
            blank_to_none(req.app_id.as_deref()),
            req.is_active.unwrap_or(true),
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_config(conn: &Connection, config_id: i64, req: &PushConfigRequest) -> Result<usize, RusqliteError> {
    let mut update = SqlUpdate::new("push_configs");
    update
        .set_opt("name", req.name.clone())
        .set_opt("provider", req.provider)
        .set_opt("endpoint_url", req.endpoint_url.clone())
        .set_opt("is_active", req.is_active);
    if req.api_key.is_some() {
        update.set("api_key", blank_to_none(req.api_key.as_deref()));
    }
    if req.app_id.is_some() {
        update.set("app_id", blank_to_none(req.app_id.as_deref()));
    }
    if !update.is_empty() {
        update.set("updated_at", timestamp());
    }
    update.execute(conn, config_id)
}

/// Fails on the foreign key while templates still use the config.
pub fn delete_config(conn: &Connection, config_id: i64) -> Result<usize, RusqliteError> {
    conn.execute("DELETE FROM push_configs WHERE id = ?1", [config_id])
}

// --- Audiences ---

fn audience_select() -> String {
    format!(
        "SELECT a.id, a.name, a.tag, a.description,
            (SELECT COUNT(*) FROM push_tokens t WHERE {}), a.created_at
         FROM push_audiences a",
        AUDIENCE_MEMBER_CLAUSE
    )
}

fn map_audience(row: &Row) -> rusqlite::Result<PushAudience> {
    Ok(PushAudience {
        id: row.get(0)?,
        name: row.get(1)?,
        tag: row.get(2)?,
        description: row.get(3)?,
        token_count: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub fn list_audiences(
    conn: &Connection,
    search: Option<&str>,
    limit: u32,
    offset: u32,
) -> Result<(Vec<PushAudience>, i64), RusqliteError> {
    let mut filter = SqlFilter::new();
    if let Some(search) = search.filter(|s| !s.trim().is_empty()) {
        filter.push_repeated("(a.name LIKE ? OR a.tag LIKE ?)", like_pattern(search), 2);
    }
    let total = filter.count(conn, "push_audiences a")?;
    let sql = format!("{}{} ORDER BY a.id DESC LIMIT ? OFFSET ?", audience_select(), filter.where_sql());
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(filter.params_with(&[limit as i64, offset as i64]).as_slice(), map_audience)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((rows, total))
}

pub fn get_audience(conn: &Connection, audience_id: i64) -> Result<Option<PushAudience>, RusqliteError> {
    conn.query_row(&format!("{} WHERE a.id = ?1", audience_select()), [audience_id], map_audience)
        .optional()
}

pub fn create_audience(conn: &Connection, name: &str, req: &PushAudienceRequest) -> Result<i64, RusqliteError> {
    conn.execute(
        "INSERT INTO push_audiences (name, tag, description, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            name,
            blank_to_none(req.tag.as_deref()),
            blank_to_none(req.description.as_deref()),
            timestamp()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_audience(conn: &Connection, audience_id: i64, req: &PushAudienceRequest) -> Result<usize, RusqliteError> {
    let mut update = SqlUpdate::new("push_audiences");
    update.set_opt("name", req.name.clone());
    if req.tag.is_some() {
        update.set("tag", blank_to_none(req.tag.as_deref()));
    }
    if req.description.is_some() {
        update.set("description", blank_to_none(req.description.as_deref()));
    }
    update.execute(conn, audience_id)
}

pub fn delete_audience(conn: &Connection, audience_id: i64) -> Result<usize, RusqliteError> {
    conn.execute("DELETE FROM push_audiences WHERE id = ?1", [audience_id])
}

/// Active tokens that a send to this audience reaches, in id order.
pub fn resolve_audience_tokens(conn: &Connection, audience_id: i64) -> Result<Vec<String>, RusqliteError> {
    let sql = format!(
        "SELECT t.token FROM push_tokens t, push_audiences a
         WHERE a.id = ?1 AND t.is_active = 1 AND {}
         ORDER BY t.id",
        AUDIENCE_MEMBER_CLAUSE
    );
    let mut stmt = conn.prepare(&sql)?;
    let tokens = stmt
        .query_map([audience_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(tokens)
}

// --- Tokens ---

#[derive(Debug, Default, Clone)]
pub struct TokenFilter {
    pub search: Option<String>,
    pub platform: Option<PushPlatform>,
    pub audience_id: Option<i64>,
    pub is_active: Option<bool>,
}

fn map_token(row: &Row) -> rusqlite::Result<PushToken> {
    let tags: String = row.get(4)?;
    Ok(PushToken {
        id: row.get(0)?,
        token: row.get(1)?,
        platform: row.get(2)?,
        user_ref: row.get(3)?,
        tags: split_list(&tags),
        is_active: row.get(5)?,
        audience_ids: Vec::new(),
        created_at: row.get(6)?,
    })
}

fn load_audience_ids(conn: &Connection, token: &mut PushToken) -> Result<(), RusqliteError> {
    let mut stmt =
        conn.prepare("SELECT audience_id FROM push_token_audiences WHERE token_id = ?1 ORDER BY audience_id")?;
    token.audience_ids = stmt
        .query_map([token.id], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(())
}

fn replace_token_audiences(conn: &Connection, token_id: i64, audience_ids: &[i64]) -> Result<(), RusqliteError> {
    conn.execute("DELETE FROM push_token_audiences WHERE token_id = ?1", [token_id])?;
    let mut stmt =
        conn.prepare("INSERT OR IGNORE INTO push_token_audiences (token_id, audience_id) VALUES (?1, ?2)")?;
    for audience_id in audience_ids {
        stmt.execute(params![token_id, audience_id])?;
    }
    Ok(())
}

pub fn list_tokens(
    conn: &Connection,
    filter: &TokenFilter,
    limit: u32,
    offset: u32,
) -> Result<(Vec<PushToken>, i64), RusqliteError> {
    let mut sql_filter = SqlFilter::new();
    if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
        sql_filter.push_repeated("(token LIKE ? OR user_ref LIKE ?)", like_pattern(search), 2);
    }
    if let Some(platform) = filter.platform {
        sql_filter.push("platform = ?", platform);
    }
    if let Some(is_active) = filter.is_active {
        sql_filter.push("is_active = ?", is_active);
    }
    if let Some(audience_id) = filter.audience_id {
        sql_filter.push(
            "id IN (SELECT token_id FROM push_token_audiences WHERE audience_id = ?)",
            audience_id,
        );
    }

    let total = sql_filter.count(conn, "push_tokens")?;
    let sql = format!(
        "SELECT id, token, platform, user_ref, tags, is_active, created_at FROM push_tokens{}
         ORDER BY id DESC LIMIT ? OFFSET ?",
        sql_filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut tokens = stmt
        .query_map(sql_filter.params_with(&[limit as i64, offset as i64]).as_slice(), map_token)?
        .collect::<Result<Vec<_>, _>>()?;
    for token in tokens.iter_mut() {
        load_audience_ids(conn, token)?;
    }
    Ok((tokens, total))
}

pub fn get_token(conn: &Connection, token_id: i64) -> Result<Option<PushToken>, RusqliteError> {
    let token = conn
        .query_row(
            "SELECT id, token, platform, user_ref, tags, is_active, created_at FROM push_tokens WHERE id = ?1",
            [token_id],
            map_token,
        )
        .optional()?;
    match token {
        Some(mut token) => {
            load_audience_ids(conn, &mut token)?;
            Ok(Some(token))
        }
        None => Ok(None),
    }
}

pub fn create_token(
    conn: &mut Connection,
    token: &str,
    platform: PushPlatform,
    req: &PushTokenRequest,
) -> Result<i64, RusqliteError> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO push_tokens (token, platform, user_ref, tags, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            token,
            platform,
            blank_to_none(req.user_ref.as_deref()),
            join_tags(req.tags.as_deref().unwrap_or_default()),
            req.is_active.unwrap_or(true),
            timestamp()
        ],
    )?;
    let token_id = tx.last_insert_rowid();
    if let Some(audience_ids) = &req.audience_ids {
        replace_token_audiences(&tx, token_id, audience_ids)?;
    }
    tx.commit()?;
    Ok(token_id)
}

pub fn update_token(conn: &mut Connection, token_id: i64, req: &PushTokenRequest) -> Result<usize, RusqliteError> {
    let tx = conn.transaction()?;
    let mut update = SqlUpdate::new("push_tokens");
    update
        .set_opt("token", req.token.clone())
        .set_opt("platform", req.platform)
        .set_opt("tags", req.tags.as_deref().map(join_tags))
        .set_opt("is_active", req.is_active);
    if req.user_ref.is_some() {
        update.set("user_ref", blank_to_none(req.user_ref.as_deref()));
    }
    let affected = update.execute(&tx, token_id)?;
    if affected > 0 {
        if let Some(audience_ids) = &req.audience_ids {
            replace_token_audiences(&tx, token_id, audience_ids)?;
        }
    }
    tx.commit()?;
    Ok(affected)
}

pub fn delete_token(conn: &Connection, token_id: i64) -> Result<usize, RusqliteError> {
    conn.execute("DELETE FROM push_tokens WHERE id = ?1", [token_id])
}

// --- Templates ---

const TEMPLATE_COLUMNS: &str = "id, name, title, body, payload, audience_id, config_id, created_at, updated_at";

fn map_template(row: &Row) -> rusqlite::Result<PushTemplate> {
    let payload: String = row.get(4)?;
    let payload = serde_json::from_str(&payload)
        .map_err(|e| RusqliteError::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    Ok(PushTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        title: row.get(2)?,
        body: row.get(3)?,
        payload,
        audience_id: row.get(5)?,
        config_id: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

pub fn list_templates(
    conn: &Connection,
    search: Option<&str>,
    limit: u32,
    offset: u32,
) -> Result<(Vec<PushTemplate>, i64), RusqliteError> {
    let mut filter = SqlFilter::new();
    if let Some(search) = search.filter(|s| !s.trim().is_empty()) {
        filter.push_repeated("(name LIKE ? OR title LIKE ?)", like_pattern(search), 2);
    }
    let total = filter.count(conn, "push_templates")?;
    let sql = format!(
        "SELECT {} FROM push_templates{} ORDER BY id DESC LIMIT ? OFFSET ?",
        TEMPLATE_COLUMNS,
        filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(filter.params_with(&[limit as i64, offset as i64]).as_slice(), map_template)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((rows, total))
}

pub fn get_template(conn: &Connection, template_id: i64) -> Result<Option<PushTemplate>, RusqliteError> {
    conn.query_row(
        &format!("SELECT {} FROM push_templates WHERE id = ?1", TEMPLATE_COLUMNS),
        [template_id],
        map_template,
    )
    .optional()
}

/// Name, title, body and the two references are expected to be validated by the caller.
pub fn create_template(conn: &Connection, req: &PushTemplateRequest) -> Result<i64, RusqliteError> {
    let now = timestamp();
    let payload = req.payload.clone().unwrap_or_else(|| serde_json::json!({}));
    conn.execute(
        "INSERT INTO push_templates (name, title, body, payload, audience_id, config_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            req.name.as_deref().unwrap_or_default(),
            req.title.as_deref().unwrap_or_default(),
            req.body.as_deref().unwrap_or_default(),
            payload.to_string(),
            req.audience_id,
            req.config_id,
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_template(conn: &Connection, template_id: i64, req: &PushTemplateRequest) -> Result<usize, RusqliteError> {
    let mut update = SqlUpdate::new("push_templates");
    update
        .set_opt("name", req.name.clone())
        .set_opt("title", req.title.clone())
        .set_opt("body", req.body.clone())
        .set_opt("payload", req.payload.as_ref().map(|p| p.to_string()))
        .set_opt("audience_id", req.audience_id)
        .set_opt("config_id", req.config_id);
    if !update.is_empty() {
        update.set("updated_at", timestamp());
    }
    update.execute(conn, template_id)
}

pub fn delete_template(conn: &Connection, template_id: i64) -> Result<usize, RusqliteError> {
    conn.execute("DELETE FROM push_templates WHERE id = ?1", [template_id])
}

// --- Tasks ---

const TASK_COLUMNS: &str = "id, template_id, status, scheduled_at, started_at, finished_at,
    total_count, success_count, failure_count, error_message, created_by, created_at";

fn map_task(row: &Row) -> rusqlite::Result<PushTask> {
    Ok(PushTask {
        id: row.get(0)?,
        template_id: row.get(1)?,
        status: row.get(2)?,
        scheduled_at: row.get(3)?,
        started_at: row.get(4)?,
        finished_at: row.get(5)?,
        total_count: row.get(6)?,
        success_count: row.get(7)?,
        failure_count: row.get(8)?,
        error_message: row.get(9)?,
        created_by: row.get(10)?,
        created_at: row.get(11)?,
    })
}

pub fn list_tasks(
    conn: &Connection,
    status: Option<PushTaskStatus>,
    template_id: Option<i64>,
    limit: u32,
    offset: u32,
) -> Result<(Vec<PushTask>, i64), RusqliteError> {
    let mut filter = SqlFilter::new();
    if let Some(status) = status {
        filter.push("status = ?", status);
    }
    if let Some(template_id) = template_id {
        filter.push("template_id = ?", template_id);
    }
    let total = filter.count(conn, "push_tasks")?;
    let sql = format!(
        "SELECT {} FROM push_tasks{} ORDER BY id DESC LIMIT ? OFFSET ?",
        TASK_COLUMNS,
        filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(filter.params_with(&[limit as i64, offset as i64]).as_slice(), map_task)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((rows, total))
}

pub fn get_task(conn: &Connection, task_id: i64) -> Result<Option<PushTask>, RusqliteError> {
    conn.query_row(
        &format!("SELECT {} FROM push_tasks WHERE id = ?1", TASK_COLUMNS),
        [task_id],
        map_task,
    )
    .optional()
}

/// A task with a schedule starts out `scheduled`, otherwise `draft`.
pub fn create_task(
    conn: &Connection,
    template_id: i64,
    scheduled_at: Option<&str>,
    created_by: i64,
) -> Result<i64, RusqliteError> {
    let scheduled_at = blank_to_none(scheduled_at);
    let status = if scheduled_at.is_some() { PushTaskStatus::Scheduled } else { PushTaskStatus::Draft };
    conn.execute(
        "INSERT INTO push_tasks (template_id, status, scheduled_at, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![template_id, status, scheduled_at, created_by, timestamp()],
    )?;
    Ok(conn.last_insert_rowid())
}

fn pending_status(conn: &Connection, task_id: i64) -> Result<Result<PushTaskStatus, TaskWrite>, RusqliteError> {
    let status: Option<PushTaskStatus> = conn
        .query_row("SELECT status FROM push_tasks WHERE id = ?1", [task_id], |row| row.get(0))
        .optional()?;
    Ok(match status {
        None => Err(TaskWrite::NotFound),
        Some(status) if !status.is_pending() => Err(TaskWrite::NotPending(status)),
        Some(status) => Ok(status),
    })
}

/// Guards every write that is only allowed before execution starts.
const PENDING_CONDITION: &str = "status IN ('draft', 'scheduled')";

/// Explains why a guarded task write touched no row.
fn rejected_write(conn: &Connection, task_id: i64) -> Result<TaskWrite, RusqliteError> {
    Ok(match pending_status(conn, task_id)? {
        Err(outcome) => outcome,
        Ok(status) => TaskWrite::NotPending(status),
    })
}

/// Edits a pending task. Setting `scheduled_at` schedules it and an empty value moves it back to draft.
pub fn update_task(conn: &Connection, task_id: i64, req: &PushTaskRequest) -> Result<TaskWrite, RusqliteError> {
    let mut update = SqlUpdate::new("push_tasks");
    update.set_opt("template_id", req.template_id);
    if let Some(raw) = req.scheduled_at.as_deref() {
        match blank_to_none(Some(raw)) {
            Some(when) => update.set("scheduled_at", when).set("status", PushTaskStatus::Scheduled),
            None => update.set("scheduled_at", None::<String>).set("status", PushTaskStatus::Draft),
        };
    }
    if update.execute_where(conn, task_id, Some(PENDING_CONDITION))? == 1 {
        return Ok(TaskWrite::Done);
    }
    rejected_write(conn, task_id)
}

pub fn delete_task(conn: &Connection, task_id: i64) -> Result<TaskWrite, RusqliteError> {
    let deleted = conn.execute(
        &format!("DELETE FROM push_tasks WHERE id = ?1 AND {}", PENDING_CONDITION),
        [task_id],
    )?;
    if deleted == 1 {
        return Ok(TaskWrite::Done);
    }
    rejected_write(conn, task_id)
}

/// Moves a pending task to `processing`. Only one caller can win this transition.
pub fn start_task(conn: &Connection, task_id: i64) -> Result<TaskWrite, RusqliteError> {
    let updated = conn.execute(
        &format!(
            "UPDATE push_tasks SET status = 'processing', started_at = ?1, error_message = NULL
             WHERE id = ?2 AND {}",
            PENDING_CONDITION
        ),
        params![timestamp(), task_id],
    )?;
    if updated == 1 {
        return Ok(TaskWrite::Done);
    }
    rejected_write(conn, task_id)
}

/// Records the end state of a task that was started.
pub fn finish_task(
    conn: &Connection,
    task_id: i64,
    status: PushTaskStatus,
    total: i64,
    success: i64,
    failure: i64,
    error_message: Option<&str>,
) -> Result<usize, RusqliteError> {
    conn.execute(
        "UPDATE push_tasks SET status = ?1, finished_at = ?2, total_count = ?3, success_count = ?4,
             failure_count = ?5, error_message = ?6
         WHERE id = ?7 AND status = 'processing'",
        params![status, timestamp(), total, success, failure, error_message, task_id],
    )
}

pub fn load_dispatch_plan(conn: &Connection, task_id: i64) -> Result<Option<DispatchPlan>, RusqliteError> {
    let Some(task) = get_task(conn, task_id)? else {
        return Ok(None);
    };
    let Some(template) = get_template(conn, task.template_id)? else {
        return Ok(None);
    };
    let Some(config) = get_config(conn, template.config_id)? else {
        return Ok(None);
    };
    let tokens = resolve_audience_tokens(conn, template.audience_id)?;
    Ok(Some(DispatchPlan { template, config, tokens }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::db_setup::setup_database;

    struct Fixture {
        conn: Connection,
        audience: i64,
        template: i64,
    }

    fn fixture() -> Fixture {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        setup_database(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, created_at, updated_at)
             VALUES (1, 'admin', 'a@example.com', 'x', 'now', 'now')",
            [],
        )
        .unwrap();

        let config = create_config(
            &conn,
            "main",
            PushProvider::Webhook,
            "http://localhost/push",
            &PushConfigRequest::default(),
        )
        .unwrap();
        let audience = create_audience(
            &conn,
            "vip",
            &PushAudienceRequest { tag: Some("vip".into()), ..Default::default() },
        )
        .unwrap();
        let template = create_template(
            &conn,
            &PushTemplateRequest {
                name: Some("welcome".into()),
                title: Some("Hi".into()),
                body: Some("Welcome aboard".into()),
                payload: Some(serde_json::json!({"screen": "home"})),
                audience_id: Some(audience),
                config_id: Some(config),
            },
        )
        .unwrap();
        Fixture { conn, audience, template }
    }

    fn token(conn: &mut Connection, value: &str, tags: &[&str], audiences: &[i64], active: bool) -> i64 {
        let req = PushTokenRequest {
            tags: Some(tags.iter().map(|t| t.to_string()).collect()),
            audience_ids: Some(audiences.to_vec()),
            is_active: Some(active),
            ..Default::default()
        };
        create_token(conn, value, PushPlatform::Android, &req).unwrap()
    }

    #[test]
    fn audience_is_union_of_members_and_tagged_tokens() {
        let mut f = fixture();
        token(&mut f.conn, "explicit", &[], &[f.audience], true);
        token(&mut f.conn, "tagged", &["new", "vip"], &[], true);
        token(&mut f.conn, "tagged-inactive", &["vip"], &[], false);
        token(&mut f.conn, "vipish", &["vip2"], &[], true);
        token(&mut f.conn, "both", &["vip"], &[f.audience], true);

        assert_eq!(get_audience(&f.conn, f.audience).unwrap().unwrap().token_count, 3);
        assert_eq!(
            resolve_audience_tokens(&f.conn, f.audience).unwrap(),
            vec!["explicit".to_string(), "tagged".to_string(), "both".to_string()]
        );
    }

    #[test]
    fn audience_tags_match_exactly() {
        let mut f = fixture();
        let audience = create_audience(
            &f.conn,
            "newcomers",
            &PushAudienceRequest { tag: Some("new_user".into()), ..Default::default() },
        )
        .unwrap();
        token(&mut f.conn, "lookalike", &["newXuser"], &[], true);
        token(&mut f.conn, "percent", &["new%"], &[], true);
        token(&mut f.conn, "exact", &["beta", "new_user"], &[], true);

        assert_eq!(resolve_audience_tokens(&f.conn, audience).unwrap(), vec!["exact".to_string()]);
        assert_eq!(get_audience(&f.conn, audience).unwrap().unwrap().token_count, 1);
    }

    #[test]
    fn token_update_replaces_audiences() {
        let mut f = fixture();
        let id = token(&mut f.conn, "t1", &["a"], &[f.audience], true);
        let req = PushTokenRequest { audience_ids: Some(vec![]), tags: Some(vec![" b ".into()]), ..Default::default() };
        assert_eq!(update_token(&mut f.conn, id, &req).unwrap(), 1);

        let stored = get_token(&f.conn, id).unwrap().unwrap();
        assert!(stored.audience_ids.is_empty());
        assert_eq!(stored.tags, vec!["b".to_string()]);
    }

    #[test]
    fn schedule_moves_between_draft_and_scheduled() {
        let f = fixture();
        let id = create_task(&f.conn, f.template, None, 1).unwrap();
        assert_eq!(get_task(&f.conn, id).unwrap().unwrap().status, PushTaskStatus::Draft);

        let schedule = PushTaskRequest { scheduled_at: Some("2030-01-01T00:00:00Z".into()), ..Default::default() };
        assert_eq!(update_task(&f.conn, id, &schedule).unwrap(), TaskWrite::Done);
        assert_eq!(get_task(&f.conn, id).unwrap().unwrap().status, PushTaskStatus::Scheduled);

        let clear = PushTaskRequest { scheduled_at: Some(String::new()), ..Default::default() };
        update_task(&f.conn, id, &clear).unwrap();
        let task = get_task(&f.conn, id).unwrap().unwrap();
        assert_eq!(task.status, PushTaskStatus::Draft);
        assert!(task.scheduled_at.is_none());
    }

    #[test]
    fn start_wins_once_and_locks_the_task() {
        let f = fixture();
        let id = create_task(&f.conn, f.template, None, 1).unwrap();
        assert_eq!(start_task(&f.conn, id).unwrap(), TaskWrite::Done);
        assert_eq!(start_task(&f.conn, id).unwrap(), TaskWrite::NotPending(PushTaskStatus::Processing));
        assert_eq!(start_task(&f.conn, id + 100).unwrap(), TaskWrite::NotFound);

        assert_eq!(
            delete_task(&f.conn, id).unwrap(),
            TaskWrite::NotPending(PushTaskStatus::Processing)
        );
        finish_task(&f.conn, id, PushTaskStatus::Completed, 2, 2, 0, None).unwrap();
        let task = get_task(&f.conn, id).unwrap().unwrap();
        assert_eq!((task.status, task.success_count), (PushTaskStatus::Completed, 2));
        assert!(task.finished_at.is_some());
    }

    #[test]
    fn edits_never_reopen_a_started_task() {
        let f = fixture();
        let id = create_task(&f.conn, f.template, None, 1).unwrap();
        assert_eq!(start_task(&f.conn, id).unwrap(), TaskWrite::Done);

        let schedule = PushTaskRequest { scheduled_at: Some("2030-01-01T00:00:00Z".into()), ..Default::default() };
        assert_eq!(
            update_task(&f.conn, id, &schedule).unwrap(),
            TaskWrite::NotPending(PushTaskStatus::Processing)
        );
        assert_eq!(update_task(&f.conn, id + 100, &schedule).unwrap(), TaskWrite::NotFound);
        let task = get_task(&f.conn, id).unwrap().unwrap();
        assert_eq!(task.status, PushTaskStatus::Processing);
        assert!(task.scheduled_at.is_none());

        assert_eq!(finish_task(&f.conn, id, PushTaskStatus::Completed, 1, 1, 0, None).unwrap(), 1);
        assert_eq!(start_task(&f.conn, id).unwrap(), TaskWrite::NotPending(PushTaskStatus::Completed));
    }

    #[test]
    fn dispatch_plan_carries_template_config_and_tokens() {
        let mut f = fixture();
        token(&mut f.conn, "tagged", &["vip"], &[], true);
        let id = create_task(&f.conn, f.template, None, 1).unwrap();
        let plan = load_dispatch_plan(&f.conn, id).unwrap().unwrap();
        assert_eq!(plan.template.payload["screen"], "home");
        assert_eq!(plan.config.provider, PushProvider::Webhook);
        assert_eq!(plan.tokens, vec!["tagged".to_string()]);
    }

    #[test]
    fn config_in_use_cannot_be_deleted() {
        let f = fixture();
        let config_id = get_template(&f.conn, f.template).unwrap().unwrap().config_id;
        assert!(delete_config(&f.conn, config_id).is_err());
    }
}
