use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::error::ApiError;
use crate::helper::response_helpers::{ApiResponse, PageRequest};

pub mod auth;
pub mod partners;
pub mod posts;
pub mod public;
pub mod push;
pub mod reports;
pub mod settings;
pub mod tags;
pub mod uploads;
pub mod users;

/// `page`, `pageSize` and a free-text `search`, shared by most list endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub search: Option<String>,
}

impl ListQuery {
    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.page_size)
    }

    pub fn search(&self) -> Option<String> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from)
    }
}

fn extractor_error(message: String) -> actix_web::Error {
    ApiError::bad_request(message).into()
}

/// Mounts every `/api` endpoint and renders extractor failures through the JSON envelope.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| extractor_error(format!("Invalid JSON body: {}", err))))
        .app_data(web::QueryConfig::default().error_handler(|err, _req| extractor_error(format!("Invalid query string: {}", err))))
        .app_data(web::PathConfig::default().error_handler(|err, _req| extractor_error(format!("Invalid path parameter: {}", err))))
        .service(
            web::scope("/api")
                .configure(public::config_api)
                .configure(auth::config_api)
                .configure(users::config_api)
                .configure(posts::config_api)
                .configure(tags::config_api)
                .configure(settings::config_api)
                .configure(partners::config_api)
                .configure(push::config_api)
                .configure(reports::config_api)
                .configure(uploads::config_api)
                .default_service(web::to(|| async {
                    HttpResponse::NotFound().json(ApiResponse::<()>::failure("No such endpoint."))
                })),
        );
}
