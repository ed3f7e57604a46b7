use actix_web::{dev, http::header, web, FromRequest, HttpRequest};
use futures_util::future::LocalBoxFuture;

use crate::error::ApiError;
use crate::helper::db_helpers::with_conn;
use crate::models::db_operations::users_db_operations;
use crate::models::{User, UserRole};
use crate::DbPool;

/// The caller behind a valid `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: User,
    pub token: String,
}

fn bearer_token(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

impl FromRequest for AuthenticatedUser {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut dev::Payload) -> Self::Future {
        let token = bearer_token(req);
        let pool = req.app_data::<web::Data<DbPool>>().cloned();

        Box::pin(async move {
            let token = token.ok_or(ApiError::Unauthorized)?;
            let pool = pool.ok_or_else(|| ApiError::Internal("Database pool is not configured".to_string()))?;

            let lookup = token.clone();
            let user = with_conn(&pool, move |conn| Ok(users_db_operations::find_session_user(conn, &lookup)?))
                .await?
                .ok_or(ApiError::Unauthorized)?;
            Ok(AuthenticatedUser { user, token })
        })
    }
}

/// An authenticated ADMIN.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

impl FromRequest for AdminUser {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut dev::Payload) -> Self::Future {
        let auth = AuthenticatedUser::from_request(req, payload);
        Box::pin(async move {
            let AuthenticatedUser { user, .. } = auth.await?;
            if user.role == UserRole::Admin {
                Ok(AdminUser(user))
            } else {
                Err(ApiError::Forbidden)
            }
        })
    }
}

/// An authenticated ADMIN or MODERATOR.
#[derive(Debug, Clone)]
pub struct StaffUser(pub User);

impl FromRequest for StaffUser {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut dev::Payload) -> Self::Future {
        let auth = AuthenticatedUser::from_request(req, payload);
        Box::pin(async move {
            let AuthenticatedUser { user, .. } = auth.await?;
            if user.role.is_staff() {
                Ok(StaffUser(user))
            } else {
                Err(ApiError::Forbidden)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn bearer_token_is_read_from_header() {
        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Bearer abc123"))
            .to_http_request();
        assert_eq!(bearer_token(&req).as_deref(), Some("abc123"));

        let basic = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Basic dXNlcg=="))
            .to_http_request();
        assert!(bearer_token(&basic).is_none());
        assert!(bearer_token(&TestRequest::default().to_http_request()).is_none());
    }
}
