use actix_web::{web, HttpResponse};

use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::helper::db_helpers::with_conn;
use crate::helper::response_helpers::{created, ok, ok_message};
use crate::helper::sanitization_helpers::{validate_email, validate_password, validate_username};
use crate::middleware::AuthenticatedUser;
use crate::models::db_operations::users_db_operations;
use crate::models::{AuthPayload, LoginRequest, RegisterRequest, UserRole};
use crate::DbPool;

pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.route("/auth/login", web::post().to(login))
        .route("/auth/register", web::post().to(register))
        .route("/auth/logout", web::post().to(logout))
        .route("/auth/profile", web::get().to(profile));
}

async fn login(
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    body: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    let LoginRequest { username, password } = body.into_inner();
    let username = username.trim().to_string();
    if username.is_empty() || password.is_empty() {
        return Err(ApiError::bad_request("Username and password are required."));
    }
    let ttl_hours = config.token_ttl_hours;

    let payload = with_conn(&pool, move |conn| {
        users_db_operations::purge_expired_sessions(conn)?;
        let user = users_db_operations::verify_credentials(conn, &username, &password)?
            .ok_or(ApiError::InvalidCredentials)?;
        users_db_operations::update_last_login_time(conn, user.id)?;
        let token = users_db_operations::create_session(conn, user.id, ttl_hours)?;
        let user = users_db_operations::read_user(conn, user.id)?.ok_or(ApiError::InvalidCredentials)?;
        Ok(AuthPayload { token, user })
    })
    .await;

    match payload {
        Ok(payload) => {
            log::info!("User '{}' logged in", payload.user.username);
            Ok(ok(payload))
        }
        Err(ApiError::InvalidCredentials) => {
            log::warn!("Failed login attempt");
            Err(ApiError::InvalidCredentials)
        }
        Err(e) => Err(e),
    }
}

/// Self-service sign-up. New accounts are active USERs.
async fn register(
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    body: web::Json<RegisterRequest>,
) -> ApiResult<HttpResponse> {
    let RegisterRequest { username, email, password } = body.into_inner();
    let username = username.trim().to_string();
    let email = email.trim().to_string();
    validate_username(&username)?;
    validate_email(&email)?;
    validate_password(&password)?;
    let ttl_hours = config.token_ttl_hours;

    let payload = with_conn(&pool, move |conn| {
        let user_id = users_db_operations::create_user(conn, &username, &email, &password, UserRole::User, true)
            .map_err(|e| ApiError::from_write(e, "Username or email already exists."))?;
        let token = users_db_operations::create_session(conn, user_id, ttl_hours)?;
        let user = users_db_operations::read_user(conn, user_id)?.ok_or_else(|| ApiError::not_found("User"))?;
        Ok(AuthPayload { token, user })
    })
    .await?;

    log::info!("Registered new user '{}'", payload.user.username);
    Ok(created(payload, "Registration successful."))
}

async fn logout(pool: web::Data<DbPool>, auth: AuthenticatedUser) -> ApiResult<HttpResponse> {
    let token = auth.token;
    with_conn(&pool, move |conn| Ok(users_db_operations::delete_session(conn, &token)?)).await?;
    Ok(ok_message("Logged out."))
}

async fn profile(auth: AuthenticatedUser) -> ApiResult<HttpResponse> {
    Ok(ok(auth.user))
}
