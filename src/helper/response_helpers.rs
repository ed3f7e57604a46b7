use actix_web::HttpResponse;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// The envelope every JSON endpoint answers with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse { success: true, data: Some(data), message: None, pagination: None }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        ApiResponse { success: false, data: None, message: Some(message.into()), pagination: None }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
    pub total_pages: u32,
}

/// A validated page window. `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Self {
        PageRequest {
            page: page.unwrap_or(1).max(1),
            page_size: page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn limit(&self) -> u32 {
        self.page_size
    }

    pub fn offset(&self) -> u32 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    pub fn pagination(&self, total: i64) -> Pagination {
        let total_pages = if total <= 0 {
            0
        } else {
            ((total as u64 + self.page_size as u64 - 1) / self.page_size as u64) as u32
        };
        Pagination { page: self.page, page_size: self.page_size, total, total_pages }
    }

    /// Slices an already materialized result set.
    pub fn slice<'a, T>(&self, rows: &'a [T]) -> &'a [T] {
        let start = (self.offset() as usize).min(rows.len());
        let end = (start + self.page_size as usize).min(rows.len());
        &rows[start..end]
    }
}

pub fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(data))
}

pub fn created<T: Serialize>(data: T, message: &str) -> HttpResponse {
    HttpResponse::Created().json(ApiResponse::success(data).with_message(message))
}

pub fn ok_message(message: &str) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::<()> {
        success: true,
        data: None,
        message: Some(message.to_string()),
        pagination: None,
    })
}

pub fn paginated<T: Serialize>(data: Vec<T>, page: PageRequest, total: i64) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse {
        success: true,
        data: Some(data),
        message: None,
        pagination: Some(page.pagination(total)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_clamps_inputs() {
        let page = PageRequest::new(Some(0), Some(1_000));
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, MAX_PAGE_SIZE);

        let defaults = PageRequest::new(None, None);
        assert_eq!(defaults.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(defaults.offset(), 0);
    }

    #[test]
    fn pagination_counts_partial_last_page() {
        let page = PageRequest::new(Some(3), Some(10));
        assert_eq!(page.offset(), 20);
        let meta = page.pagination(21);
        assert_eq!(meta.total_pages, 3);
        assert_eq!(page.pagination(0).total_pages, 0);
    }

    #[test]
    fn slice_never_exceeds_page_size() {
        let rows: Vec<u32> = (0..25).collect();
        assert_eq!(PageRequest::new(Some(1), Some(10)).slice(&rows).len(), 10);
        assert_eq!(PageRequest::new(Some(3), Some(10)).slice(&rows), &[20, 21, 22, 23, 24]);
        assert!(PageRequest::new(Some(9), Some(10)).slice(&rows).is_empty());
    }

    #[test]
    fn failure_envelope_omits_data() {
        let json = serde_json::to_value(ApiResponse::<()>::failure("nope")).unwrap();
        assert_eq!(json, serde_json::json!({ "success": false, "message": "nope" }));
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        id: i64,
    }

    #[test]
    fn envelope_reads_payloads_without_default() {
        let ack: ApiResponse<Row> = serde_json::from_str(r#"{"success":true,"message":"done"}"#).unwrap();
        assert!(ack.data.is_none());
        let full: ApiResponse<Row> = serde_json::from_str(r#"{"success":true,"data":{"id":7}}"#).unwrap();
        assert_eq!(full.data, Some(Row { id: 7 }));
    }
}
