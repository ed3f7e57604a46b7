use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::attribution::page::AttributionBackend;
use crate::attribution::storage::{KvStore, StoreError};
use crate::helper::response_helpers::{ApiResponse, Pagination};
use crate::models::partner_models::{ApiPartnerConfig, ApiPartnerConfigInput, PartnerDetails};
use crate::models::push_models::PushTask;
use crate::models::report_models::{
    AttributionOptions, AttributionQuery, AttributionRow, FavoritesMap, MetricReportQuery, MetricRow, ReportKind,
};
use crate::models::{
    AuthPayload, Comment, CommentRequest, CreatePostRequest, CreateSystemConfigRequest, CreateUserRequest,
    LoginRequest, Post, RegisterRequest, ResetPasswordRequest, SystemConfigEntry, Tag, TagRequest,
    UpdatePostRequest, UpdateSystemConfigRequest, UpdateUserRequest, User,
};

pub const TOKEN_KEY: &str = "token";
pub const USER_KEY: &str = "user";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// The content page races its list call against this.
pub const CONTENT_LIST_TIMEOUT: Duration = Duration::from_secs(15);
/// And its save calls against this.
pub const CONTENT_SAVE_TIMEOUT: Duration = Duration::from_secs(40);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("{0} timed out")]
    Timeout(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Serde JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("The response carried no data")]
    MissingData,
}

/// Message-only answers.
pub type Ack = ApiResponse<serde_json::Value>;

/// Query string pairs. Unset values are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Params::default()
    }

    pub fn page(self, page: u32, page_size: u32) -> Self {
        self.set("page", page).set("pageSize", page_size)
    }

    pub fn set(mut self, key: &str, value: impl ToString) -> Self {
        self.0.push((key.to_string(), value.to_string()));
        self
    }

    pub fn set_opt(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.set(key, value),
            None => self,
        }
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

/// Partners as listed by the management page.
#[derive(Debug, Clone, PartialEq)]
pub struct PartnerList {
    pub partners: Vec<ApiPartnerConfig>,
    pub pagination: Option<Pagination>,
    /// Set when the endpoint was missing and built-in samples stand in.
    pub from_fallback: bool,
}

pub fn sample_partners() -> Vec<ApiPartnerConfig> {
    let now = chrono::Utc::now().to_rfc3339();
    [(1, "https://api.partner-one.example"), (2, "https://api.partner-two.example")]
        .into_iter()
        .map(|(id, partner_api)| ApiPartnerConfig {
            id,
            app_id: None,
            partner_api: partner_api.to_string(),
            secret_key: "sample-secret".to_string(),
            is_active: true,
            details: PartnerDetails { remark: Some("Sample configuration".to_string()), ..Default::default() },
            created_at: now.clone(),
            updated_at: now.clone(),
        })
        .collect()
}

/// Races `fut` against `limit`.
pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    match actix_web::rt::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            log::warn!("{} exceeded {}s", what, limit.as_secs());
            Err(ClientError::Timeout(what.to_string()))
        }
    }
}

/// Reads the `data` of a successful envelope.
pub fn into_data<T>(response: ApiResponse<T>) -> Result<T, ClientError> {
    response.data.ok_or(ClientError::MissingData)
}

fn error_message(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<Ack>(body)
        .ok()
        .and_then(|envelope| envelope.message)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Request failed").to_string())
}

pub type UnauthorizedHook = Arc<dyn Fn() + Send + Sync>;

/// Typed access to the `/api` endpoints. The bearer token is read from `store` on every call.
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    store: Arc<dyn KvStore>,
    on_unauthorized: Option<UnauthorizedHook>,
}

impl ApiClient {
    pub fn new(base_url: &str, store: Arc<dyn KvStore>) -> Result<Self, ClientError> {
        Self::with_request_timeout(base_url, store, DEFAULT_TIMEOUT)
    }

    pub fn with_request_timeout(base_url: &str, store: Arc<dyn KvStore>, timeout: Duration) -> Result<Self, ClientError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(ApiClient { http, base, store, on_unauthorized: None })
    }

    /// Called after a 401 wiped the stored credentials, e.g. to route back to the login screen.
    pub fn on_unauthorized(mut self, hook: UnauthorizedHook) -> Self {
        self.on_unauthorized = Some(hook);
        self
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base.join(&format!("api/{}", path.trim_start_matches('/')))?)
    }

    // --- Stored credentials ---

    pub fn stored_token(&self) -> Result<Option<String>, ClientError> {
        Ok(self.store.get(TOKEN_KEY)?.filter(|t| !t.is_empty()))
    }

    /// The cached user. An unreadable entry counts as absent.
    pub fn stored_user(&self) -> Result<Option<User>, ClientError> {
        Ok(self.store.get(USER_KEY)?.and_then(|raw| serde_json::from_str(&raw).ok()))
    }

    pub fn store_credentials(&self, auth: &AuthPayload) -> Result<(), ClientError> {
        self.store.set(TOKEN_KEY, &auth.token)?;
        self.store_user(&auth.user)
    }

    pub fn store_user(&self, user: &User) -> Result<(), ClientError> {
        self.store.set(USER_KEY, &serde_json::to_string(user)?)?;
        Ok(())
    }

    pub fn clear_credentials(&self) -> Result<(), ClientError> {
        self.store.remove(TOKEN_KEY)?;
        self.store.remove(USER_KEY)?;
        Ok(())
    }

    // --- Transport ---

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        Ok(self.http.request(method, self.endpoint(path)?))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Vec<u8>, ClientError> {
        let request = match self.stored_token()? {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout("Request".to_string())
            } else {
                ClientError::Http(e)
            }
        })?;

        let status = response.status();
        let body = response.bytes().await?.to_vec();
        if status == StatusCode::UNAUTHORIZED {
            self.clear_credentials()?;
            if let Some(hook) = &self.on_unauthorized {
                hook();
            }
            return Err(ClientError::Unauthorized(error_message(status, &body)));
        }
        if !status.is_success() {
            return Err(ClientError::Api { status: status.as_u16(), message: error_message(status, &body) });
        }
        Ok(body)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<ApiResponse<T>, ClientError> {
        let body = self.execute(request).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn send_text(&self, request: RequestBuilder) -> Result<String, ClientError> {
        let body = self.execute(request).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, params: &Params) -> Result<ApiResponse<T>, ClientError> {
        self.send(self.request(Method::GET, path)?.query(params.pairs())).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, ClientError> {
        self.send(self.request(Method::POST, path)?.json(body)).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, ClientError> {
        self.send(self.request(Method::PUT, path)?.json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Ack, ClientError> {
        self.send(self.request(Method::DELETE, path)?).await
    }

    // --- Auth ---

    pub async fn login(&self, username: &str, password: &str) -> Result<ApiResponse<AuthPayload>, ClientError> {
        let body = LoginRequest { username: username.to_string(), password: password.to_string() };
        self.post("auth/login", &body).await
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<ApiResponse<AuthPayload>, ClientError> {
        self.post("auth/register", request).await
    }

    pub async fn logout(&self) -> Result<Ack, ClientError> {
        self.post("auth/logout", &serde_json::json!({})).await
    }

    pub async fn profile(&self) -> Result<ApiResponse<User>, ClientError> {
        self.get("auth/profile", &Params::new()).await
    }

    pub async fn health(&self) -> Result<ApiResponse<serde_json::Value>, ClientError> {
        self.get("health", &Params::new()).await
    }

    // --- Users ---

    pub async fn list_users(&self, params: &Params) -> Result<ApiResponse<Vec<User>>, ClientError> {
        self.get("users", params).await
    }

    pub async fn get_user(&self, id: i64) -> Result<ApiResponse<User>, ClientError> {
        self.get(&format!("users/{}", id), &Params::new()).await
    }

    pub async fn create_user(&self, request: &CreateUserRequest) -> Result<ApiResponse<User>, ClientError> {
        self.post("users", request).await
    }

    pub async fn update_user(&self, id: i64, request: &UpdateUserRequest) -> Result<ApiResponse<User>, ClientError> {
        self.put(&format!("users/{}", id), request).await
    }

    pub async fn delete_user(&self, id: i64) -> Result<Ack, ClientError> {
        self.delete(&format!("users/{}", id)).await
    }

    pub async fn reset_password(&self, id: i64, password: &str) -> Result<Ack, ClientError> {
        let body = ResetPasswordRequest { password: password.to_string() };
        self.put(&format!("users/{}/password", id), &body).await
    }

    // --- Posts and comments ---

    pub async fn list_posts(&self, params: &Params) -> Result<ApiResponse<Vec<Post>>, ClientError> {
        self.get("posts", params).await
    }

    pub async fn list_public_posts(&self, params: &Params) -> Result<ApiResponse<Vec<Post>>, ClientError> {
        self.get("public/posts", params).await
    }

    pub async fn get_post(&self, id: i64) -> Result<ApiResponse<Post>, ClientError> {
        self.get(&format!("posts/{}", id), &Params::new()).await
    }

    pub async fn create_post(&self, request: &CreatePostRequest) -> Result<ApiResponse<Post>, ClientError> {
        self.post("posts", request).await
    }

    pub async fn update_post(&self, id: i64, request: &UpdatePostRequest) -> Result<ApiResponse<Post>, ClientError> {
        self.put(&format!("posts/{}", id), request).await
    }

    pub async fn delete_post(&self, id: i64) -> Result<Ack, ClientError> {
        self.delete(&format!("posts/{}", id)).await
    }

    pub async fn record_view(&self, id: i64) -> Result<ApiResponse<serde_json::Value>, ClientError> {
        self.post(&format!("posts/{}/views", id), &serde_json::json!({})).await
    }

    pub async fn list_comments(&self, post_id: i64) -> Result<ApiResponse<Vec<Comment>>, ClientError> {
        self.get(&format!("posts/{}/comments", post_id), &Params::new()).await
    }

    pub async fn create_comment(&self, post_id: i64, content: &str) -> Result<ApiResponse<Comment>, ClientError> {
        let body = CommentRequest { content: content.to_string() };
        self.post(&format!("posts/{}/comments", post_id), &body).await
    }

    pub async fn delete_comment(&self, id: i64) -> Result<Ack, ClientError> {
        self.delete(&format!("comments/{}", id)).await
    }

    // --- Tags ---

    pub async fn list_tags(&self, params: &Params) -> Result<ApiResponse<Vec<Tag>>, ClientError> {
        self.get("tags", params).await
    }

    pub async fn create_tag(&self, request: &TagRequest) -> Result<ApiResponse<Tag>, ClientError> {
        self.post("tags", request).await
    }

    pub async fn update_tag(&self, id: i64, request: &TagRequest) -> Result<ApiResponse<Tag>, ClientError> {
        self.put(&format!("tags/{}", id), request).await
    }

    pub async fn delete_tag(&self, id: i64) -> Result<Ack, ClientError> {
        self.delete(&format!("tags/{}", id)).await
    }

    // --- System config ---

    pub async fn list_system_config(&self, params: &Params) -> Result<ApiResponse<Vec<SystemConfigEntry>>, ClientError> {
        self.get("system-config", params).await
    }

    pub async fn create_system_config(&self, request: &CreateSystemConfigRequest) -> Result<ApiResponse<SystemConfigEntry>, ClientError> {
        self.post("system-config", request).await
    }

    pub async fn update_system_config(
        &self,
        key: &str,
        request: &UpdateSystemConfigRequest,
    ) -> Result<ApiResponse<SystemConfigEntry>, ClientError> {
        self.put(&format!("system-config/{}", key), request).await
    }

    pub async fn delete_system_config(&self, key: &str) -> Result<Ack, ClientError> {
        self.delete(&format!("system-config/{}", key)).await
    }

    // --- API partners ---

    pub async fn list_partners(&self, params: &Params) -> Result<ApiResponse<Vec<ApiPartnerConfig>>, ClientError> {
        self.get("api-partners", params).await
    }

    /// Lists partners, substituting [`sample_partners`] when the endpoint answers 404.
    pub async fn list_partners_with_fallback(&self, params: &Params) -> Result<PartnerList, ClientError> {
        match self.list_partners(params).await {
            Ok(response) => Ok(PartnerList {
                pagination: response.pagination,
                partners: response.data.unwrap_or_default(),
                from_fallback: false,
            }),
            Err(ClientError::Api { status: 404, .. }) => {
                log::warn!("Partner endpoint missing, showing sample partners");
                Ok(PartnerList { partners: sample_partners(), pagination: None, from_fallback: true })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn create_partner(&self, input: &ApiPartnerConfigInput) -> Result<ApiResponse<ApiPartnerConfig>, ClientError> {
        self.post("api-partners", input).await
    }

    pub async fn update_partner(&self, id: i64, input: &ApiPartnerConfigInput) -> Result<ApiResponse<ApiPartnerConfig>, ClientError> {
        self.put(&format!("api-partners/{}", id), input).await
    }

    pub async fn delete_partner(&self, id: i64) -> Result<Ack, ClientError> {
        self.delete(&format!("api-partners/{}", id)).await
    }

    // --- Push ---
    // Configs, audiences, tokens and templates go through `get`/`post`/`put`/`delete`
    // with paths under `push/`.

    pub async fn list_push_tasks(&self, params: &Params) -> Result<ApiResponse<Vec<PushTask>>, ClientError> {
        self.get("push/tasks", params).await
    }

    pub async fn execute_push_task(&self, id: i64) -> Result<ApiResponse<PushTask>, ClientError> {
        self.post(&format!("push/tasks/{}/execute", id), &serde_json::json!({})).await
    }

    // --- Reports ---

    pub async fn attribution_options(&self, data_source: Option<&str>) -> Result<ApiResponse<AttributionOptions>, ClientError> {
        self.get("reports/attribution/options", &Params::new().set_opt("dataSource", data_source)).await
    }

    pub async fn query_attribution(&self, query: &AttributionQuery) -> Result<ApiResponse<Vec<AttributionRow>>, ClientError> {
        self.post("reports/attribution/query", query).await
    }

    pub async fn export_attribution(&self, query: &AttributionQuery) -> Result<String, ClientError> {
        self.send_text(self.request(Method::POST, "reports/attribution/export")?.json(query)).await
    }

    pub async fn metric_report(&self, kind: ReportKind, query: &MetricReportQuery) -> Result<ApiResponse<Vec<MetricRow>>, ClientError> {
        self.send(self.request(Method::GET, &format!("reports/{}", kind.slug()))?.query(query)).await
    }

    pub async fn export_metric_report(&self, kind: ReportKind, query: &MetricReportQuery) -> Result<String, ClientError> {
        self.send_text(self.request(Method::GET, &format!("reports/{}/export", kind.slug()))?.query(query)).await
    }

    pub async fn get_favorites(&self) -> Result<ApiResponse<FavoritesMap>, ClientError> {
        self.get("attribution/favorites", &Params::new()).await
    }

    pub async fn save_favorites(&self, favorites: &FavoritesMap) -> Result<ApiResponse<FavoritesMap>, ClientError> {
        self.put("attribution/favorites", favorites).await
    }
}

#[async_trait]
impl AttributionBackend for ApiClient {
    async fn query_attribution(&self, query: &AttributionQuery) -> Result<Vec<AttributionRow>, ClientError> {
        into_data(ApiClient::query_attribution(self, query).await?)
    }

    async fn load_favorites(&self) -> Result<FavoritesMap, ClientError> {
        into_data(self.get_favorites().await?)
    }

    async fn save_favorites(&self, favorites: &FavoritesMap) -> Result<FavoritesMap, ClientError> {
        into_data(ApiClient::save_favorites(self, favorites).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::storage::MemoryStore;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(base, Arc::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn endpoints_hang_off_the_api_prefix() {
        assert_eq!(client("http://localhost:8080").endpoint("/users/3").unwrap().as_str(), "http://localhost:8080/api/users/3");
        assert_eq!(
            client("http://host/admin").endpoint("tags").unwrap().as_str(),
            "http://host/admin/api/tags"
        );
    }

    #[test]
    fn error_message_prefers_the_envelope() {
        let body = br#"{"success":false,"message":"Tag name already exists."}"#;
        assert_eq!(error_message(StatusCode::CONFLICT, body), "Tag name already exists.");
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, b"<html>"), "Bad Gateway");
    }

    #[test]
    fn credentials_round_trip_through_the_store() {
        let client = client("http://localhost:8080");
        assert_eq!(client.stored_token().unwrap(), None);
        client.store.set(TOKEN_KEY, "abc").unwrap();
        client.store.set(USER_KEY, "not json").unwrap();
        assert_eq!(client.stored_token().unwrap().as_deref(), Some("abc"));
        assert_eq!(client.stored_user().unwrap(), None);
        client.clear_credentials().unwrap();
        assert_eq!(client.stored_token().unwrap(), None);
    }

    #[test]
    fn params_skip_unset_values() {
        let params = Params::new().page(2, 20).set_opt("search", None::<&str>).set("status", "published");
        assert_eq!(params.pairs().len(), 3);
    }

    #[actix_web::test]
    async fn slow_calls_time_out() {
        let slow = async {
            actix_web::rt::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, ClientError>(())
        };
        let err = with_timeout(Duration::from_millis(10), "Loading posts", slow).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(ref what) if what == "Loading posts"));
        assert!(sample_partners().iter().all(|p| !p.secret_key.is_empty()));
    }
}
