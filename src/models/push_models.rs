use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::sql_text_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushProvider {
    Fcm,
    Apns,
    Webhook,
}

impl PushProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushProvider::Fcm => "fcm",
            PushProvider::Apns => "apns",
            PushProvider::Webhook => "webhook",
        }
    }
}

impl FromStr for PushProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fcm" => Ok(PushProvider::Fcm),
            "apns" => Ok(PushProvider::Apns),
            "webhook" => Ok(PushProvider::Webhook),
            other => Err(format!("unknown push provider '{}'", other)),
        }
    }
}

sql_text_enum!(PushProvider);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushPlatform {
    Android,
    Ios,
    Web,
}

impl PushPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushPlatform::Android => "android",
            PushPlatform::Ios => "ios",
            PushPlatform::Web => "web",
        }
    }
}

impl FromStr for PushPlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "android" => Ok(PushPlatform::Android),
            "ios" => Ok(PushPlatform::Ios),
            "web" => Ok(PushPlatform::Web),
            other => Err(format!("unknown platform '{}'", other)),
        }
    }
}

sql_text_enum!(PushPlatform);

/// Lifecycle of a push task: draft → scheduled → processing → completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushTaskStatus {
    Draft,
    Scheduled,
    Processing,
    Completed,
    Failed,
}

impl PushTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushTaskStatus::Draft => "draft",
            PushTaskStatus::Scheduled => "scheduled",
            PushTaskStatus::Processing => "processing",
            PushTaskStatus::Completed => "completed",
            PushTaskStatus::Failed => "failed",
        }
    }

    /// Draft and scheduled tasks are the only ones that may be edited, deleted or executed.
    pub fn is_pending(&self) -> bool {
        matches!(self, PushTaskStatus::Draft | PushTaskStatus::Scheduled)
    }
}

impl FromStr for PushTaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PushTaskStatus::Draft),
            "scheduled" => Ok(PushTaskStatus::Scheduled),
            "processing" => Ok(PushTaskStatus::Processing),
            "completed" => Ok(PushTaskStatus::Completed),
            "failed" => Ok(PushTaskStatus::Failed),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

sql_text_enum!(PushTaskStatus);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushConfig {
    pub id: i64,
    pub name: String,
    pub provider: PushProvider,
    pub endpoint_url: String,
    pub api_key: Option<String>,
    pub app_id: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushConfigRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<PushProvider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAudience {
    pub id: i64,
    pub name: String,
    pub tag: Option<String>,
    pub description: Option<String>,
    pub token_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAudienceRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushToken {
    pub id: i64,
    pub token: String,
    pub platform: PushPlatform,
    pub user_ref: Option<String>,
    pub tags: Vec<String>,
    pub is_active: bool,
    pub audience_ids: Vec<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushTokenRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PushPlatform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience_ids: Option<Vec<i64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushTemplate {
    pub id: i64,
    pub name: String,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
    pub audience_id: i64,
    pub config_id: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushTemplateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushTask {
    pub id: i64,
    pub template_id: i64,
    pub status: PushTaskStatus,
    pub scheduled_at: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub total_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub error_message: Option<String>,
    pub created_by: Option<i64>,
    pub created_at: String,
}

/// `scheduledAt` set to an empty string clears the schedule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushTaskRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<String>,
}

/// What goes out to the provider for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub success: u32,
    pub failure: u32,
}
