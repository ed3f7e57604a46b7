use actix_web::{web, HttpResponse};
use chrono::DateTime;
use serde::Deserialize;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::helper::db_helpers::with_conn;
use crate::helper::push_helpers::execute_task;
use crate::helper::response_helpers::{created, ok, ok_message, paginated, PageRequest};
use crate::helper::sanitization_helpers::{required_text, validate_http_url};
use crate::middleware::StaffUser;
use crate::models::db_operations::push_db_operations::{self, TaskWrite, TokenFilter};
use crate::models::push_models::{
    PushAudienceRequest, PushConfigRequest, PushPlatform, PushTaskRequest, PushTaskStatus, PushTemplateRequest,
    PushTokenRequest,
};
use crate::routes::ListQuery;
use crate::{AppState, DbPool};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenListQuery {
    page: Option<u32>,
    page_size: Option<u32>,
    search: Option<String>,
    platform: Option<PushPlatform>,
    audience_id: Option<i64>,
    is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListQuery {
    page: Option<u32>,
    page_size: Option<u32>,
    status: Option<PushTaskStatus>,
    template_id: Option<i64>,
}

pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.route("/push/configs", web::get().to(list_configs))
        .route("/push/configs", web::post().to(create_config))
        .route("/push/configs/{id}", web::get().to(get_config))
        .route("/push/configs/{id}", web::put().to(update_config))
        .route("/push/configs/{id}", web::delete().to(delete_config))
        .route("/push/audiences", web::get().to(list_audiences))
        .route("/push/audiences", web::post().to(create_audience))
        .route("/push/audiences/{id}", web::get().to(get_audience))
        .route("/push/audiences/{id}", web::put().to(update_audience))
        .route("/push/audiences/{id}", web::delete().to(delete_audience))
        .route("/push/tokens", web::get().to(list_tokens))
        .route("/push/tokens", web::post().to(create_token))
        .route("/push/tokens/{id}", web::get().to(get_token))
        .route("/push/tokens/{id}", web::put().to(update_token))
        .route("/push/tokens/{id}", web::delete().to(delete_token))
        .route("/push/templates", web::get().to(list_templates))
        .route("/push/templates", web::post().to(create_template))
        .route("/push/templates/{id}", web::get().to(get_template))
        .route("/push/templates/{id}", web::put().to(update_template))
        .route("/push/templates/{id}", web::delete().to(delete_template))
        .route("/push/tasks", web::get().to(list_tasks))
        .route("/push/tasks", web::post().to(create_task))
        .route("/push/tasks/{id}", web::get().to(get_task))
        .route("/push/tasks/{id}", web::put().to(update_task))
        .route("/push/tasks/{id}", web::delete().to(delete_task))
        .route("/push/tasks/{id}/execute", web::post().to(execute));
}

fn task_write_result(outcome: TaskWrite) -> ApiResult<()> {
    match outcome {
        TaskWrite::Done => Ok(()),
        TaskWrite::NotFound => Err(ApiError::not_found("Push task")),
        TaskWrite::NotPending(status) => Err(ApiError::Conflict(format!(
            "Push task is {} and can no longer be changed.",
            status.as_str()
        ))),
    }
}

/// Empty clears the schedule. Anything else must be an RFC 3339 timestamp.
fn check_schedule(scheduled_at: Option<&str>) -> ApiResult<()> {
    match scheduled_at.map(str::trim) {
        Some(raw) if !raw.is_empty() => DateTime::parse_from_rfc3339(raw)
            .map(|_| ())
            .map_err(|_| ApiError::bad_request("scheduledAt must be an RFC 3339 timestamp.")),
        _ => Ok(()),
    }
}

fn check_payload(payload: Option<&serde_json::Value>) -> ApiResult<()> {
    match payload {
        Some(value) if !value.is_object() => Err(ApiError::bad_request("payload must be a JSON object.")),
        _ => Ok(()),
    }
}

// --- Configs ---

async fn list_configs(pool: web::Data<DbPool>, _staff: StaffUser, query: web::Query<ListQuery>) -> ApiResult<HttpResponse> {
    let page = query.page_request();
    let search = query.search();
    let (configs, total) = with_conn(&pool, move |conn| {
        Ok(push_db_operations::list_configs(conn, search.as_deref(), page.limit(), page.offset())?)
    })
    .await?;
    Ok(paginated(configs, page, total))
}

async fn get_config(pool: web::Data<DbPool>, _staff: StaffUser, path: web::Path<i64>) -> ApiResult<HttpResponse> {
    let config_id = path.into_inner();
    let config = with_conn(&pool, move |conn| Ok(push_db_operations::get_config(conn, config_id)?))
        .await?
        .ok_or_else(|| ApiError::not_found("Push config"))?;
    Ok(ok(config))
}

async fn create_config(
    pool: web::Data<DbPool>,
    _staff: StaffUser,
    body: web::Json<PushConfigRequest>,
) -> ApiResult<HttpResponse> {
    let req = body.into_inner();
    let name = required_text("Name", req.name.as_deref().unwrap_or_default())?;
    let provider = req.provider.ok_or_else(|| ApiError::bad_request("provider is required."))?;
    let endpoint_url = req.endpoint_url.as_deref().unwrap_or_default().trim().to_string();
    validate_http_url("endpointUrl", &endpoint_url)?;

    let config = with_conn(&pool, move |conn| {
        let config_id = push_db_operations::create_config(conn, &name, provider, &endpoint_url, &req)
            .map_err(|e| ApiError::from_write(e, "Push config name already exists."))?;
        push_db_operations::get_config(conn, config_id)?.ok_or_else(|| ApiError::not_found("Push config"))
    })
    .await?;
    Ok(created(config, "Push config created."))
}

async fn update_config(
    pool: web::Data<DbPool>,
    _staff: StaffUser,
    path: web::Path<i64>,
    body: web::Json<PushConfigRequest>,
) -> ApiResult<HttpResponse> {
    let config_id = path.into_inner();
    let mut req = body.into_inner();
    req.name = req.name.as_deref().map(|name| required_text("Name", name)).transpose()?;
    if let Some(endpoint_url) = req.endpoint_url.as_mut() {
        *endpoint_url = endpoint_url.trim().to_string();
        validate_http_url("endpointUrl", endpoint_url)?;
    }

    let config = with_conn(&pool, move |conn| {
        let affected = push_db_operations::update_config(conn, config_id, &req)
            .map_err(|e| ApiError::from_write(e, "Push config name already exists."))?;
        if affected == 0 {
            return Err(ApiError::not_found("Push config"));
        }
        push_db_operations::get_config(conn, config_id)?.ok_or_else(|| ApiError::not_found("Push config"))
    })
    .await?;
    Ok(ok(config))
}

async fn delete_config(pool: web::Data<DbPool>, _staff: StaffUser, path: web::Path<i64>) -> ApiResult<HttpResponse> {
    let config_id = path.into_inner();
    let affected = with_conn(&pool, move |conn| {
        push_db_operations::delete_config(conn, config_id)
            .map_err(|e| ApiError::from_delete(e, "Push config is still used by a template."))
    })
    .await?;
    if affected == 0 {
        return Err(ApiError::not_found("Push config"));
    }
    Ok(ok_message("Push config deleted."))
}

// --- Audiences ---

async fn list_audiences(pool: web::Data<DbPool>, _staff: StaffUser, query: web::Query<ListQuery>) -> ApiResult<HttpResponse> {
    let page = query.page_request();
    let search = query.search();
    let (audiences, total) = with_conn(&pool, move |conn| {
        Ok(push_db_operations::list_audiences(conn, search.as_deref(), page.limit(), page.offset())?)
    })
    .await?;
    Ok(paginated(audiences, page, total))
}

async fn get_audience(pool: web::Data<DbPool>, _staff: StaffUser, path: web::Path<i64>) -> ApiResult<HttpResponse> {
    let audience_id = path.into_inner();
    let audience = with_conn(&pool, move |conn| Ok(push_db_operations::get_audience(conn, audience_id)?))
        .await?
        .ok_or_else(|| ApiError::not_found("Push audience"))?;
    Ok(ok(audience))
}

async fn create_audience(
    pool: web::Data<DbPool>,
    _staff: StaffUser,
    body: web::Json<PushAudienceRequest>,
) -> ApiResult<HttpResponse> {
    let req = body.into_inner();
    let name = required_text("Name", req.name.as_deref().unwrap_or_default())?;

    let audience = with_conn(&pool, move |conn| {
        let audience_id = push_db_operations::create_audience(conn, &name, &req)
            .map_err(|e| ApiError::from_write(e, "Audience name already exists."))?;
        push_db_operations::get_audience(conn, audience_id)?.ok_or_else(|| ApiError::not_found("Push audience"))
    })
    .await?;
    Ok(created(audience, "Audience created."))
}

async fn update_audience(
    pool: web::Data<DbPool>,
    _staff: StaffUser,
    path: web::Path<i64>,
    body: web::Json<PushAudienceRequest>,
) -> ApiResult<HttpResponse> {
    let audience_id = path.into_inner();
    let mut req = body.into_inner();
    req.name = req.name.as_deref().map(|name| required_text("Name", name)).transpose()?;

    let audience = with_conn(&pool, move |conn| {
        let affected = push_db_operations::update_audience(conn, audience_id, &req)
            .map_err(|e| ApiError::from_write(e, "Audience name already exists."))?;
        if affected == 0 {
            return Err(ApiError::not_found("Push audience"));
        }
        push_db_operations::get_audience(conn, audience_id)?.ok_or_else(|| ApiError::not_found("Push audience"))
    })
    .await?;
    Ok(ok(audience))
}

async fn delete_audience(pool: web::Data<DbPool>, _staff: StaffUser, path: web::Path<i64>) -> ApiResult<HttpResponse> {
    let audience_id = path.into_inner();
    let affected = with_conn(&pool, move |conn| {
        push_db_operations::delete_audience(conn, audience_id)
            .map_err(|e| ApiError::from_delete(e, "Audience is still used by a template."))
    })
    .await?;
    if affected == 0 {
        return Err(ApiError::not_found("Push audience"));
    }
    Ok(ok_message("Audience deleted."))
}

// --- Tokens ---

async fn list_tokens(
    pool: web::Data<DbPool>,
    _staff: StaffUser,
    query: web::Query<TokenListQuery>,
) -> ApiResult<HttpResponse> {
    let page = PageRequest::new(query.page, query.page_size);
    let filter = TokenFilter {
        search: query.search.clone(),
        platform: query.platform,
        audience_id: query.audience_id,
        is_active: query.is_active,
    };
    let (tokens, total) = with_conn(&pool, move |conn| {
        Ok(push_db_operations::list_tokens(conn, &filter, page.limit(), page.offset())?)
    })
    .await?;
    Ok(paginated(tokens, page, total))
}

async fn get_token(pool: web::Data<DbPool>, _staff: StaffUser, path: web::Path<i64>) -> ApiResult<HttpResponse> {
    let token_id = path.into_inner();
    let token = with_conn(&pool, move |conn| Ok(push_db_operations::get_token(conn, token_id)?))
        .await?
        .ok_or_else(|| ApiError::not_found("Push token"))?;
    Ok(ok(token))
}

async fn create_token(
    pool: web::Data<DbPool>,
    _staff: StaffUser,
    body: web::Json<PushTokenRequest>,
) -> ApiResult<HttpResponse> {
    let req = body.into_inner();
    let token = req.token.as_deref().unwrap_or_default().trim().to_string();
    if token.is_empty() {
        return Err(ApiError::bad_request("token is required."));
    }
    let platform = req.platform.ok_or_else(|| ApiError::bad_request("platform is required."))?;

    let created_token = with_conn(&pool, move |conn| {
        let token_id = push_db_operations::create_token(conn, &token, platform, &req)
            .map_err(|e| ApiError::from_write(e, "Token is already registered."))?;
        push_db_operations::get_token(conn, token_id)?.ok_or_else(|| ApiError::not_found("Push token"))
    })
    .await?;
    Ok(created(created_token, "Token registered."))
}

async fn update_token(
    pool: web::Data<DbPool>,
    _staff: StaffUser,
    path: web::Path<i64>,
    body: web::Json<PushTokenRequest>,
) -> ApiResult<HttpResponse> {
    let token_id = path.into_inner();
    let mut req = body.into_inner();
    if let Some(token) = req.token.as_mut() {
        *token = token.trim().to_string();
        if token.is_empty() {
            return Err(ApiError::bad_request("token cannot be empty."));
        }
    }

    let token = with_conn(&pool, move |conn| {
        let affected = push_db_operations::update_token(conn, token_id, &req)
            .map_err(|e| ApiError::from_write(e, "Token is already registered."))?;
        if affected == 0 {
            return Err(ApiError::not_found("Push token"));
        }
        push_db_operations::get_token(conn, token_id)?.ok_or_else(|| ApiError::not_found("Push token"))
    })
    .await?;
    Ok(ok(token))
}

async fn delete_token(pool: web::Data<DbPool>, _staff: StaffUser, path: web::Path<i64>) -> ApiResult<HttpResponse> {
    let token_id = path.into_inner();
    let affected = with_conn(&pool, move |conn| Ok(push_db_operations::delete_token(conn, token_id)?)).await?;
    if affected == 0 {
        return Err(ApiError::not_found("Push token"));
    }
    Ok(ok_message("Token deleted."))
}

// --- Templates ---

async fn list_templates(pool: web::Data<DbPool>, _staff: StaffUser, query: web::Query<ListQuery>) -> ApiResult<HttpResponse> {
    let page = query.page_request();
    let search = query.search();
    let (templates, total) = with_conn(&pool, move |conn| {
        Ok(push_db_operations::list_templates(conn, search.as_deref(), page.limit(), page.offset())?)
    })
    .await?;
    Ok(paginated(templates, page, total))
}

async fn get_template(pool: web::Data<DbPool>, _staff: StaffUser, path: web::Path<i64>) -> ApiResult<HttpResponse> {
    let template_id = path.into_inner();
    let template = with_conn(&pool, move |conn| Ok(push_db_operations::get_template(conn, template_id)?))
        .await?
        .ok_or_else(|| ApiError::not_found("Push template"))?;
    Ok(ok(template))
}

async fn create_template(
    pool: web::Data<DbPool>,
    _staff: StaffUser,
    body: web::Json<PushTemplateRequest>,
) -> ApiResult<HttpResponse> {
    let mut req = body.into_inner();
    req.name = Some(required_text("Name", req.name.as_deref().unwrap_or_default())?);
    req.title = Some(required_text("Title", req.title.as_deref().unwrap_or_default())?);
    req.body = Some(required_text("Body", req.body.as_deref().unwrap_or_default())?);
    check_payload(req.payload.as_ref())?;
    if req.audience_id.is_none() || req.config_id.is_none() {
        return Err(ApiError::bad_request("audienceId and configId are required."));
    }

    let template = with_conn(&pool, move |conn| {
        let template_id = push_db_operations::create_template(conn, &req)
            .map_err(|e| ApiError::from_write(e, "Template name already exists."))?;
        push_db_operations::get_template(conn, template_id)?.ok_or_else(|| ApiError::not_found("Push template"))
    })
    .await?;
    Ok(created(template, "Template created."))
}

async fn update_template(
    pool: web::Data<DbPool>,
    _staff: StaffUser,
    path: web::Path<i64>,
    body: web::Json<PushTemplateRequest>,
) -> ApiResult<HttpResponse> {
    let template_id = path.into_inner();
    let mut req = body.into_inner();
    req.name = req.name.as_deref().map(|v| required_text("Name", v)).transpose()?;
    req.title = req.title.as_deref().map(|v| required_text("Title", v)).transpose()?;
    req.body = req.body.as_deref().map(|v| required_text("Body", v)).transpose()?;
    check_payload(req.payload.as_ref())?;

    let template = with_conn(&pool, move |conn| {
        let affected = push_db_operations::update_template(conn, template_id, &req)
            .map_err(|e| ApiError::from_write(e, "Template name already exists."))?;
        if affected == 0 {
            return Err(ApiError::not_found("Push template"));
        }
        push_db_operations::get_template(conn, template_id)?.ok_or_else(|| ApiError::not_found("Push template"))
    })
    .await?;
    Ok(ok(template))
}

async fn delete_template(pool: web::Data<DbPool>, _staff: StaffUser, path: web::Path<i64>) -> ApiResult<HttpResponse> {
    let template_id = path.into_inner();
    let affected = with_conn(&pool, move |conn| {
        push_db_operations::delete_template(conn, template_id)
            .map_err(|e| ApiError::from_delete(e, "Template still has push tasks."))
    })
    .await?;
    if affected == 0 {
        return Err(ApiError::not_found("Push template"));
    }
    Ok(ok_message("Template deleted."))
}

// --- Tasks ---

async fn list_tasks(pool: web::Data<DbPool>, _staff: StaffUser, query: web::Query<TaskListQuery>) -> ApiResult<HttpResponse> {
    let page = PageRequest::new(query.page, query.page_size);
    let status = query.status;
    let template_id = query.template_id;
    let (tasks, total) = with_conn(&pool, move |conn| {
        Ok(push_db_operations::list_tasks(conn, status, template_id, page.limit(), page.offset())?)
    })
    .await?;
    Ok(paginated(tasks, page, total))
}

async fn get_task(pool: web::Data<DbPool>, _staff: StaffUser, path: web::Path<i64>) -> ApiResult<HttpResponse> {
    let task_id = path.into_inner();
    let task = with_conn(&pool, move |conn| Ok(push_db_operations::get_task(conn, task_id)?))
        .await?
        .ok_or_else(|| ApiError::not_found("Push task"))?;
    Ok(ok(task))
}

async fn create_task(pool: web::Data<DbPool>, staff: StaffUser, body: web::Json<PushTaskRequest>) -> ApiResult<HttpResponse> {
    let req = body.into_inner();
    let template_id = req.template_id.ok_or_else(|| ApiError::bad_request("templateId is required."))?;
    check_schedule(req.scheduled_at.as_deref())?;
    let created_by = staff.0.id;

    let task = with_conn(&pool, move |conn| {
        if push_db_operations::get_template(conn, template_id)?.is_none() {
            return Err(ApiError::bad_request("Template does not exist."));
        }
        let task_id = push_db_operations::create_task(conn, template_id, req.scheduled_at.as_deref(), created_by)?;
        push_db_operations::get_task(conn, task_id)?.ok_or_else(|| ApiError::not_found("Push task"))
    })
    .await?;
    Ok(created(task, "Push task created."))
}

async fn update_task(
    pool: web::Data<DbPool>,
    _staff: StaffUser,
    path: web::Path<i64>,
    body: web::Json<PushTaskRequest>,
) -> ApiResult<HttpResponse> {
    let task_id = path.into_inner();
    let req = body.into_inner();
    check_schedule(req.scheduled_at.as_deref())?;

    let task = with_conn(&pool, move |conn| {
        let outcome = push_db_operations::update_task(conn, task_id, &req)
            .map_err(|e| ApiError::from_write(e, "Push task already exists."))?;
        task_write_result(outcome)?;
        push_db_operations::get_task(conn, task_id)?.ok_or_else(|| ApiError::not_found("Push task"))
    })
    .await?;
    Ok(ok(task))
}

async fn delete_task(pool: web::Data<DbPool>, _staff: StaffUser, path: web::Path<i64>) -> ApiResult<HttpResponse> {
    let task_id = path.into_inner();
    let outcome = with_conn(&pool, move |conn| Ok(push_db_operations::delete_task(conn, task_id)?)).await?;
    task_write_result(outcome)?;
    Ok(ok_message("Push task deleted."))
}

/// Sends a pending task now and answers with its final state.
async fn execute(
    pool: web::Data<DbPool>,
    state: web::Data<AppState>,
    config: web::Data<Config>,
    staff: StaffUser,
    path: web::Path<i64>,
) -> ApiResult<HttpResponse> {
    let task_id = path.into_inner();
    log::info!("User '{}' executes push task {}", staff.0.username, task_id);
    let task = execute_task(&pool, state.push_sender.clone(), task_id, config.push_dispatch_timeout()).await?;
    Ok(ok(task))
}
