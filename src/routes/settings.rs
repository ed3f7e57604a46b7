use actix_web::{web, HttpResponse};

use crate::error::{ApiError, ApiResult};
use crate::helper::db_helpers::with_conn;
use crate::helper::response_helpers::{created, ok, ok_message, paginated};
use crate::helper::sanitization_helpers::optional_text;
use crate::middleware::{AdminUser, StaffUser};
use crate::models::db_operations::settings_db_operations;
use crate::models::{CreateSystemConfigRequest, UpdateSystemConfigRequest};
use crate::routes::ListQuery;
use crate::DbPool;

pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.route("/system-config", web::get().to(list_entries))
        .route("/system-config", web::post().to(create_entry))
        .route("/system-config/{key}", web::get().to(get_entry))
        .route("/system-config/{key}", web::put().to(update_entry))
        .route("/system-config/{key}", web::delete().to(delete_entry));
}

fn valid_key(key: &str) -> ApiResult<String> {
    let key = key.trim();
    if key.is_empty() || key.len() > 128 || !key.chars().all(|c| c.is_ascii_alphanumeric() || "_.-".contains(c)) {
        return Err(ApiError::bad_request(
            "Config key must be up to 128 letters, digits, '_', '.' or '-'.",
        ));
    }
    Ok(key.to_string())
}

async fn list_entries(
    pool: web::Data<DbPool>,
    _staff: StaffUser,
    query: web::Query<ListQuery>,
) -> ApiResult<HttpResponse> {
    let page = query.page_request();
    let search = query.search();
    let (entries, total) = with_conn(&pool, move |conn| {
        Ok(settings_db_operations::list_entries(conn, search.as_deref(), page.limit(), page.offset())?)
    })
    .await?;
    Ok(paginated(entries, page, total))
}

async fn get_entry(pool: web::Data<DbPool>, _staff: StaffUser, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let key = path.into_inner();
    let entry = with_conn(&pool, move |conn| Ok(settings_db_operations::get_entry(conn, &key)?))
        .await?
        .ok_or_else(|| ApiError::not_found("Config entry"))?;
    Ok(ok(entry))
}

async fn create_entry(
    pool: web::Data<DbPool>,
    admin: AdminUser,
    body: web::Json<CreateSystemConfigRequest>,
) -> ApiResult<HttpResponse> {
    let req = body.into_inner();
    let key = valid_key(&req.key)?;
    let description = optional_text(req.description.as_deref()).filter(|d| !d.is_empty());

    let entry = with_conn(&pool, move |conn| {
        settings_db_operations::create_entry(conn, &key, &req.value, description.as_deref())
            .map_err(|e| ApiError::from_write(e, "Config key already exists."))?;
        settings_db_operations::get_entry(conn, &key)?.ok_or_else(|| ApiError::not_found("Config entry"))
    })
    .await?;

    log::info!("Admin '{}' created config key '{}'", admin.0.username, entry.key);
    Ok(created(entry, "Config entry created."))
}

async fn update_entry(
    pool: web::Data<DbPool>,
    admin: AdminUser,
    path: web::Path<String>,
    body: web::Json<UpdateSystemConfigRequest>,
) -> ApiResult<HttpResponse> {
    let key = path.into_inner();
    let req = body.into_inner();
    let description = optional_text(req.description.as_deref());

    let entry = with_conn(&pool, move |conn| {
        if settings_db_operations::update_entry(conn, &key, &req.value, description.as_deref())? == 0 {
            return Err(ApiError::not_found("Config entry"));
        }
        settings_db_operations::get_entry(conn, &key)?.ok_or_else(|| ApiError::not_found("Config entry"))
    })
    .await?;

    log::info!("Admin '{}' updated config key '{}'", admin.0.username, entry.key);
    Ok(ok(entry))
}

async fn delete_entry(pool: web::Data<DbPool>, _admin: AdminUser, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let key = path.into_inner();
    let affected = with_conn(&pool, move |conn| Ok(settings_db_operations::delete_entry(conn, &key)?)).await?;
    if affected == 0 {
        return Err(ApiError::not_found("Config entry"));
    }
    Ok(ok_message("Config entry deleted."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_keys_are_restricted() {
        assert_eq!(valid_key(" site.name ").unwrap(), "site.name");
        assert!(valid_key("").is_err());
        assert!(valid_key("has space").is_err());
    }
}
