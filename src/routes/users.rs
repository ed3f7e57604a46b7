use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::helper::db_helpers::with_conn;
use crate::helper::response_helpers::{created, ok, ok_message, paginated, PageRequest};
use crate::helper::sanitization_helpers::{validate_email, validate_password, validate_username};
use crate::middleware::{AdminUser, StaffUser};
use crate::models::db_operations::users_db_operations::{self, UserFilter};
use crate::models::{CreateUserRequest, ResetPasswordRequest, UpdateUserRequest, UserRole};
use crate::DbPool;

const DUPLICATE_USER: &str = "Username or email already exists.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserListQuery {
    page: Option<u32>,
    page_size: Option<u32>,
    search: Option<String>,
    role: Option<UserRole>,
    is_active: Option<bool>,
}

pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.route("/users", web::get().to(list_users))
        .route("/users", web::post().to(create_user))
        .route("/users/{id}", web::get().to(get_user))
        .route("/users/{id}", web::put().to(update_user))
        .route("/users/{id}", web::delete().to(delete_user))
        .route("/users/{id}/password", web::put().to(reset_password));
}

async fn list_users(
    pool: web::Data<DbPool>,
    _staff: StaffUser,
    query: web::Query<UserListQuery>,
) -> ApiResult<HttpResponse> {
    let page = PageRequest::new(query.page, query.page_size);
    let filter = UserFilter { search: query.search.clone(), role: query.role, is_active: query.is_active };
    let (users, total) = with_conn(&pool, move |conn| {
        Ok(users_db_operations::list_users(conn, &filter, page.limit(), page.offset())?)
    })
    .await?;
    Ok(paginated(users, page, total))
}

async fn get_user(pool: web::Data<DbPool>, _staff: StaffUser, path: web::Path<i64>) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    let user = with_conn(&pool, move |conn| Ok(users_db_operations::read_user(conn, user_id)?))
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;
    Ok(ok(user))
}

async fn create_user(
    pool: web::Data<DbPool>,
    admin: AdminUser,
    body: web::Json<CreateUserRequest>,
) -> ApiResult<HttpResponse> {
    let req = body.into_inner();
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_string();
    validate_username(&username)?;
    validate_email(&email)?;
    validate_password(&req.password)?;
    let role = req.role.unwrap_or(UserRole::User);
    let is_active = req.is_active.unwrap_or(true);

    let user = with_conn(&pool, move |conn| {
        let user_id = users_db_operations::create_user(conn, &username, &email, &req.password, role, is_active)
            .map_err(|e| ApiError::from_write(e, DUPLICATE_USER))?;
        users_db_operations::read_user(conn, user_id)?.ok_or_else(|| ApiError::not_found("User"))
    })
    .await?;

    log::info!("Admin '{}' created user '{}' ({})", admin.0.username, user.username, user.role.as_str());
    Ok(created(user, "User created."))
}

async fn update_user(
    pool: web::Data<DbPool>,
    admin: AdminUser,
    path: web::Path<i64>,
    body: web::Json<UpdateUserRequest>,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    let mut changes = body.into_inner();

    if user_id == admin.0.id {
        if changes.is_active == Some(false) {
            return Err(ApiError::bad_request("You cannot deactivate your own account."));
        }
        if changes.role.map_or(false, |role| role != UserRole::Admin) {
            return Err(ApiError::bad_request("You cannot remove your own admin role."));
        }
    }
    if let Some(username) = changes.username.as_mut() {
        *username = username.trim().to_string();
        validate_username(username)?;
    }
    if let Some(email) = changes.email.as_mut() {
        *email = email.trim().to_string();
        validate_email(email)?;
    }

    let deactivated = changes.is_active == Some(false);
    let user = with_conn(&pool, move |conn| {
        let affected = users_db_operations::update_user(conn, user_id, &changes)
            .map_err(|e| ApiError::from_write(e, DUPLICATE_USER))?;
        if affected == 0 {
            return Err(ApiError::not_found("User"));
        }
        if deactivated {
            users_db_operations::delete_sessions_for_user(conn, user_id)?;
        }
        users_db_operations::read_user(conn, user_id)?.ok_or_else(|| ApiError::not_found("User"))
    })
    .await?;

    Ok(ok(user))
}

async fn delete_user(pool: web::Data<DbPool>, admin: AdminUser, path: web::Path<i64>) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    if user_id == admin.0.id {
        return Err(ApiError::bad_request("You cannot delete your own account."));
    }
    let affected = with_conn(&pool, move |conn| Ok(users_db_operations::delete_user(conn, user_id)?)).await?;
    if affected == 0 {
        return Err(ApiError::not_found("User"));
    }
    log::info!("Admin '{}' deleted user {}", admin.0.username, user_id);
    Ok(ok_message("User deleted."))
}

/// Sets a new password and signs the user out everywhere.
async fn reset_password(
    pool: web::Data<DbPool>,
    admin: AdminUser,
    path: web::Path<i64>,
    body: web::Json<ResetPasswordRequest>,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    let ResetPasswordRequest { password } = body.into_inner();
    validate_password(&password)?;

    with_conn(&pool, move |conn| {
        if users_db_operations::update_password(conn, user_id, &password)? == 0 {
            return Err(ApiError::not_found("User"));
        }
        users_db_operations::delete_sessions_for_user(conn, user_id)?;
        Ok(())
    })
    .await?;

    log::info!("Admin '{}' reset the password of user {}", admin.0.username, user_id);
    Ok(ok_message("Password updated."))
}
