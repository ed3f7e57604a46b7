use actix_web::{web, HttpResponse};

use crate::error::{ApiError, ApiResult};
use crate::helper::db_helpers::with_conn;
use crate::helper::response_helpers::{created, ok, ok_message, paginated};
use crate::helper::sanitization_helpers::{required_text, validate_color};
use crate::middleware::{AuthenticatedUser, StaffUser};
use crate::models::db_operations::tags_db_operations;
use crate::models::TagRequest;
use crate::routes::ListQuery;
use crate::DbPool;

const DUPLICATE_TAG: &str = "Tag name already exists.";

pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.route("/tags", web::get().to(list_tags))
        .route("/tags", web::post().to(create_tag))
        .route("/tags/{id}", web::get().to(get_tag))
        .route("/tags/{id}", web::put().to(update_tag))
        .route("/tags/{id}", web::delete().to(delete_tag));
}

fn clean_color(color: Option<String>) -> ApiResult<Option<String>> {
    match color.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()) {
        Some(color) => {
            validate_color(&color)?;
            Ok(Some(color))
        }
        None => Ok(None),
    }
}

async fn list_tags(
    pool: web::Data<DbPool>,
    _auth: AuthenticatedUser,
    query: web::Query<ListQuery>,
) -> ApiResult<HttpResponse> {
    let page = query.page_request();
    let search = query.search();
    let (tags, total) = with_conn(&pool, move |conn| {
        Ok(tags_db_operations::list_tags(conn, search.as_deref(), page.limit(), page.offset())?)
    })
    .await?;
    Ok(paginated(tags, page, total))
}

async fn get_tag(pool: web::Data<DbPool>, _auth: AuthenticatedUser, path: web::Path<i64>) -> ApiResult<HttpResponse> {
    let tag_id = path.into_inner();
    let tag = with_conn(&pool, move |conn| Ok(tags_db_operations::get_tag(conn, tag_id)?))
        .await?
        .ok_or_else(|| ApiError::not_found("Tag"))?;
    Ok(ok(tag))
}

async fn create_tag(pool: web::Data<DbPool>, _staff: StaffUser, body: web::Json<TagRequest>) -> ApiResult<HttpResponse> {
    let req = body.into_inner();
    let name = required_text("Tag name", req.name.as_deref().unwrap_or_default())?;
    let color = clean_color(req.color)?;

    let tag = with_conn(&pool, move |conn| {
        let tag_id = tags_db_operations::create_tag(conn, &name, color.as_deref())
            .map_err(|e| ApiError::from_write(e, DUPLICATE_TAG))?;
        tags_db_operations::get_tag(conn, tag_id)?.ok_or_else(|| ApiError::not_found("Tag"))
    })
    .await?;
    Ok(created(tag, "Tag created."))
}

async fn update_tag(
    pool: web::Data<DbPool>,
    _staff: StaffUser,
    path: web::Path<i64>,
    body: web::Json<TagRequest>,
) -> ApiResult<HttpResponse> {
    let tag_id = path.into_inner();
    let req = body.into_inner();
    let name = req.name.as_deref().map(|name| required_text("Tag name", name)).transpose()?;
    let color = clean_color(req.color)?;

    let tag = with_conn(&pool, move |conn| {
        let affected = tags_db_operations::update_tag(conn, tag_id, name, color)
            .map_err(|e| ApiError::from_write(e, DUPLICATE_TAG))?;
        if affected == 0 {
            return Err(ApiError::not_found("Tag"));
        }
        tags_db_operations::get_tag(conn, tag_id)?.ok_or_else(|| ApiError::not_found("Tag"))
    })
    .await?;
    Ok(ok(tag))
}

async fn delete_tag(pool: web::Data<DbPool>, _staff: StaffUser, path: web::Path<i64>) -> ApiResult<HttpResponse> {
    let tag_id = path.into_inner();
    let affected = with_conn(&pool, move |conn| Ok(tags_db_operations::delete_tag(conn, tag_id)?)).await?;
    if affected == 0 {
        return Err(ApiError::not_found("Tag"));
    }
    Ok(ok_message("Tag deleted."))
}
