use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::helper::db_helpers::with_conn;
use crate::helper::response_helpers::{created, ok, ok_message, paginated, PageRequest};
use crate::helper::sanitization_helpers::{optional_text, required_rich_text, required_text};
use crate::middleware::AuthenticatedUser;
use crate::models::db_operations::posts_db_operations::{self, PostFilter};
use crate::models::db_operations::users_db_operations::check_permission;
use crate::models::{CommentRequest, CreatePostRequest, PostAction, PostStatus, UpdatePostRequest, User};
use crate::routes::ListQuery;
use crate::DbPool;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostListQuery {
    page: Option<u32>,
    page_size: Option<u32>,
    search: Option<String>,
    status: Option<PostStatus>,
    tag_id: Option<i64>,
    author_id: Option<i64>,
}

pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.route("/posts", web::get().to(list_posts))
        .route("/posts", web::post().to(create_post))
        .route("/posts/{id}", web::get().to(get_post))
        .route("/posts/{id}", web::put().to(update_post))
        .route("/posts/{id}", web::delete().to(delete_post))
        .route("/posts/{id}/comments", web::get().to(list_comments))
        .route("/posts/{id}/comments", web::post().to(create_comment))
        .route("/comments/{id}", web::delete().to(delete_comment));
}

/// Loads the author of a post and checks that `user` may act on it.
async fn authorize_post(pool: &web::Data<DbPool>, user: &User, post_id: i64, action: PostAction) -> ApiResult<()> {
    let author_id = with_conn(pool, move |conn| Ok(posts_db_operations::post_author(conn, post_id)?))
        .await?
        .ok_or_else(|| ApiError::not_found("Post"))?;
    if check_permission(user, author_id, action) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

async fn list_posts(
    pool: web::Data<DbPool>,
    _auth: AuthenticatedUser,
    query: web::Query<PostListQuery>,
) -> ApiResult<HttpResponse> {
    let page = PageRequest::new(query.page, query.page_size);
    let filter = PostFilter {
        status: query.status,
        tag_id: query.tag_id,
        author_id: query.author_id,
        search: query.search.clone(),
    };
    let (posts, total) = with_conn(&pool, move |conn| {
        Ok(posts_db_operations::list_posts(conn, &filter, page.limit(), page.offset())?)
    })
    .await?;
    Ok(paginated(posts, page, total))
}

async fn get_post(pool: web::Data<DbPool>, _auth: AuthenticatedUser, path: web::Path<i64>) -> ApiResult<HttpResponse> {
    let post_id = path.into_inner();
    let post = with_conn(&pool, move |conn| Ok(posts_db_operations::get_post(conn, post_id)?))
        .await?
        .ok_or_else(|| ApiError::not_found("Post"))?;
    Ok(ok(post))
}

async fn create_post(
    pool: web::Data<DbPool>,
    auth: AuthenticatedUser,
    body: web::Json<CreatePostRequest>,
) -> ApiResult<HttpResponse> {
    let mut req = body.into_inner();
    req.title = required_text("Title", &req.title)?;
    req.content = required_rich_text("Content", &req.content)?;
    req.summary = optional_text(req.summary.as_deref()).filter(|s| !s.is_empty());
    let author_id = auth.user.id;

    let post = with_conn(&pool, move |conn| {
        let post_id = posts_db_operations::create_post(conn, author_id, &req)
            .map_err(|e| ApiError::from_write(e, "Post already exists."))?;
        posts_db_operations::get_post(conn, post_id)?.ok_or_else(|| ApiError::not_found("Post"))
    })
    .await?;

    log::info!("User '{}' created post {}", auth.user.username, post.id);
    Ok(created(post, "Post created."))
}

async fn update_post(
    pool: web::Data<DbPool>,
    auth: AuthenticatedUser,
    path: web::Path<i64>,
    body: web::Json<UpdatePostRequest>,
) -> ApiResult<HttpResponse> {
    let post_id = path.into_inner();
    authorize_post(&pool, &auth.user, post_id, PostAction::Edit).await?;

    let mut req = body.into_inner();
    req.title = req.title.as_deref().map(|title| required_text("Title", title)).transpose()?;
    req.content = req.content.as_deref().map(|content| required_rich_text("Content", content)).transpose()?;
    req.summary = optional_text(req.summary.as_deref());

    let post = with_conn(&pool, move |conn| {
        let affected = posts_db_operations::update_post(conn, post_id, &req)
            .map_err(|e| ApiError::from_write(e, "Post already exists."))?;
        if affected == 0 {
            return Err(ApiError::not_found("Post"));
        }
        posts_db_operations::get_post(conn, post_id)?.ok_or_else(|| ApiError::not_found("Post"))
    })
    .await?;
    Ok(ok(post))
}

async fn delete_post(pool: web::Data<DbPool>, auth: AuthenticatedUser, path: web::Path<i64>) -> ApiResult<HttpResponse> {
    let post_id = path.into_inner();
    authorize_post(&pool, &auth.user, post_id, PostAction::Delete).await?;

    let affected = with_conn(&pool, move |conn| Ok(posts_db_operations::delete_post(conn, post_id)?)).await?;
    if affected == 0 {
        return Err(ApiError::not_found("Post"));
    }
    log::info!("User '{}' deleted post {}", auth.user.username, post_id);
    Ok(ok_message("Post deleted."))
}

async fn list_comments(
    pool: web::Data<DbPool>,
    _auth: AuthenticatedUser,
    path: web::Path<i64>,
    query: web::Query<ListQuery>,
) -> ApiResult<HttpResponse> {
    let post_id = path.into_inner();
    let page = query.page_request();
    let (comments, total) = with_conn(&pool, move |conn| {
        if posts_db_operations::post_author(conn, post_id)?.is_none() {
            return Err(ApiError::not_found("Post"));
        }
        Ok(posts_db_operations::list_comments(conn, post_id, page.limit(), page.offset())?)
    })
    .await?;
    Ok(paginated(comments, page, total))
}

async fn create_comment(
    pool: web::Data<DbPool>,
    auth: AuthenticatedUser,
    path: web::Path<i64>,
    body: web::Json<CommentRequest>,
) -> ApiResult<HttpResponse> {
    let post_id = path.into_inner();
    let content = required_text("Comment", &body.content)?;
    let author_id = auth.user.id;

    let comment = with_conn(&pool, move |conn| {
        if posts_db_operations::post_author(conn, post_id)?.is_none() {
            return Err(ApiError::not_found("Post"));
        }
        let comment_id = posts_db_operations::create_comment(conn, post_id, author_id, &content)?;
        posts_db_operations::get_comment(conn, comment_id)?.ok_or_else(|| ApiError::not_found("Comment"))
    })
    .await?;
    Ok(created(comment, "Comment added."))
}

/// Comment authors and staff may remove a comment.
async fn delete_comment(
    pool: web::Data<DbPool>,
    auth: AuthenticatedUser,
    path: web::Path<i64>,
) -> ApiResult<HttpResponse> {
    let comment_id = path.into_inner();
    let user = auth.user;

    with_conn(&pool, move |conn| {
        let comment = posts_db_operations::get_comment(conn, comment_id)?
            .ok_or_else(|| ApiError::not_found("Comment"))?;
        if !check_permission(&user, comment.author_id, PostAction::Delete) {
            return Err(ApiError::Forbidden);
        }
        posts_db_operations::delete_comment(conn, comment_id)?;
        Ok(())
    })
    .await?;
    Ok(ok_message("Comment deleted."))
}
