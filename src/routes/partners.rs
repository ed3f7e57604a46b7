use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::helper::db_helpers::with_conn;
use crate::helper::response_helpers::{created, ok, ok_message, paginated, PageRequest};
use crate::middleware::{AdminUser, StaffUser};
use crate::models::db_operations::partners_db_operations::{self, PartnerFilter};
use crate::models::partner_models::ApiPartnerConfigInput;
use crate::DbPool;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerListQuery {
    page: Option<u32>,
    page_size: Option<u32>,
    search: Option<String>,
    app_id: Option<i64>,
    is_active: Option<bool>,
}

pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.route("/api-partners", web::get().to(list_partners))
        .route("/api-partners", web::post().to(create_partner))
        .route("/api-partners/{id}", web::get().to(get_partner))
        .route("/api-partners/{id}", web::put().to(update_partner))
        .route("/api-partners/{id}", web::delete().to(delete_partner));
}

/// `partnerApi` and `secretKey` can never be stored blank.
fn required_credential(field: &str, value: Option<&str>) -> ApiResult<String> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(ApiError::bad_request(format!("{} is required.", field))),
    }
}

fn check_update(input: &ApiPartnerConfigInput) -> ApiResult<()> {
    if input.partner_api.is_some() {
        required_credential("partnerApi", input.partner_api.as_deref())?;
    }
    if input.secret_key.is_some() {
        required_credential("secretKey", input.secret_key.as_deref())?;
    }
    Ok(())
}

async fn list_partners(
    pool: web::Data<DbPool>,
    _staff: StaffUser,
    query: web::Query<PartnerListQuery>,
) -> ApiResult<HttpResponse> {
    let page = PageRequest::new(query.page, query.page_size);
    let filter = PartnerFilter { search: query.search.clone(), app_id: query.app_id, is_active: query.is_active };
    let (partners, total) = with_conn(&pool, move |conn| {
        Ok(partners_db_operations::list_partners(conn, &filter, page.limit(), page.offset())?)
    })
    .await?;
    Ok(paginated(partners, page, total))
}

async fn get_partner(pool: web::Data<DbPool>, _staff: StaffUser, path: web::Path<i64>) -> ApiResult<HttpResponse> {
    let partner_id = path.into_inner();
    let partner = with_conn(&pool, move |conn| Ok(partners_db_operations::get_partner(conn, partner_id)?))
        .await?
        .ok_or_else(|| ApiError::not_found("API partner"))?;
    Ok(ok(partner))
}

async fn create_partner(
    pool: web::Data<DbPool>,
    admin: AdminUser,
    body: web::Json<ApiPartnerConfigInput>,
) -> ApiResult<HttpResponse> {
    let input = body.into_inner();
    let partner_api = required_credential("partnerApi", input.partner_api.as_deref())?;
    let secret_key = required_credential("secretKey", input.secret_key.as_deref())?;

    let partner = with_conn(&pool, move |conn| {
        let partner_id = partners_db_operations::create_partner(conn, &partner_api, &secret_key, &input)
            .map_err(|e| ApiError::from_write(e, "A partner with this API already exists."))?;
        partners_db_operations::get_partner(conn, partner_id)?.ok_or_else(|| ApiError::not_found("API partner"))
    })
    .await?;

    log::info!("Admin '{}' added API partner {}", admin.0.username, partner.id);
    Ok(created(partner, "API partner created."))
}

async fn update_partner(
    pool: web::Data<DbPool>,
    admin: AdminUser,
    path: web::Path<i64>,
    body: web::Json<ApiPartnerConfigInput>,
) -> ApiResult<HttpResponse> {
    let partner_id = path.into_inner();
    let input = body.into_inner();
    check_update(&input)?;

    let partner = with_conn(&pool, move |conn| {
        let affected = partners_db_operations::update_partner(conn, partner_id, &input)
            .map_err(|e| ApiError::from_write(e, "A partner with this API already exists."))?;
        if affected == 0 {
            return Err(ApiError::not_found("API partner"));
        }
        partners_db_operations::get_partner(conn, partner_id)?.ok_or_else(|| ApiError::not_found("API partner"))
    })
    .await?;

    log::info!("Admin '{}' updated API partner {}", admin.0.username, partner_id);
    Ok(ok(partner))
}

async fn delete_partner(pool: web::Data<DbPool>, admin: AdminUser, path: web::Path<i64>) -> ApiResult<HttpResponse> {
    let partner_id = path.into_inner();
    let affected = with_conn(&pool, move |conn| Ok(partners_db_operations::delete_partner(conn, partner_id)?)).await?;
    if affected == 0 {
        return Err(ApiError::not_found("API partner"));
    }
    log::info!("Admin '{}' deleted API partner {}", admin.0.username, partner_id);
    Ok(ok_message("API partner deleted."))
}
