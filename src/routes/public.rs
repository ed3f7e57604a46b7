use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::helper::db_helpers::with_conn;
use crate::helper::response_helpers::{ok, paginated, PageRequest};
use crate::models::db_operations::posts_db_operations::{self, PostFilter};
use crate::models::db_operations::timestamp;
use crate::models::PostStatus;
use crate::DbPool;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicPostQuery {
    page: Option<u32>,
    page_size: Option<u32>,
    search: Option<String>,
    tag_id: Option<i64>,
}

pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/public/posts", web::get().to(list_published_posts))
        .route("/public/posts/{id}", web::get().to(get_published_post))
        .route("/posts/{id}/views", web::post().to(record_view));
}

async fn health(pool: web::Data<DbPool>) -> ApiResult<HttpResponse> {
    let database = with_conn(&pool, |conn| Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?))
        .await
        .map(|_| "ok")
        .unwrap_or_else(|e| {
            log::warn!("Health check could not reach the database: {}", e);
            "unavailable"
        });
    Ok(ok(json!({ "status": "ok", "database": database, "time": timestamp() })))
}

async fn list_published_posts(
    pool: web::Data<DbPool>,
    query: web::Query<PublicPostQuery>,
) -> ApiResult<HttpResponse> {
    let page = PageRequest::new(query.page, query.page_size);
    let filter = PostFilter {
        status: Some(PostStatus::Published),
        tag_id: query.tag_id,
        author_id: None,
        search: query.search.clone(),
    };
    let (posts, total) = with_conn(&pool, move |conn| {
        Ok(posts_db_operations::list_posts(conn, &filter, page.limit(), page.offset())?)
    })
    .await?;
    Ok(paginated(posts, page, total))
}

async fn get_published_post(pool: web::Data<DbPool>, path: web::Path<i64>) -> ApiResult<HttpResponse> {
    let post_id = path.into_inner();
    let post = with_conn(&pool, move |conn| Ok(posts_db_operations::get_published_post(conn, post_id)?))
        .await?
        .ok_or_else(|| ApiError::not_found("Post"))?;
    Ok(ok(post))
}

/// Anonymous view counter. Only published posts count.
async fn record_view(pool: web::Data<DbPool>, path: web::Path<i64>) -> ApiResult<HttpResponse> {
    let post_id = path.into_inner();
    let views = with_conn(&pool, move |conn| Ok(posts_db_operations::increment_views(conn, post_id)?))
        .await?
        .ok_or_else(|| ApiError::not_found("Post"))?;
    Ok(ok(json!({ "id": post_id, "views": views })))
}
