use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};

use crate::config::Config;
use crate::error::ApiResult;
use crate::helper::response_helpers::created;
use crate::helper::upload_helpers::save_upload;
use crate::middleware::AuthenticatedUser;

pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.route("/uploads", web::post().to(upload_file));
}

/// Accepts a multipart `file` with a `category` of `partner_logo` or `news_image`.
async fn upload_file(config: web::Data<Config>, auth: AuthenticatedUser, payload: Multipart) -> ApiResult<HttpResponse> {
    let uploaded = save_upload(&config, payload).await?;
    log::info!("User '{}' uploaded {}", auth.user.username, uploaded.url);
    Ok(created(uploaded, "File uploaded."))
}
