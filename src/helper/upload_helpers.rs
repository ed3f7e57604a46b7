use actix_multipart::Multipart;
use actix_web::web::{self, BytesMut};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};

/// Upper bound for plain text form fields such as `category`.
pub const MAX_FORM_FIELD_BYTES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadCategory {
    PartnerLogo,
    NewsImage,
}

impl UploadCategory {
    pub fn dir_name(&self) -> &'static str {
        match self {
            UploadCategory::PartnerLogo => "partner_logo",
            UploadCategory::NewsImage => "news_image",
        }
    }
}

impl FromStr for UploadCategory {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "partner_logo" => Ok(UploadCategory::PartnerLogo),
            "news_image" => Ok(UploadCategory::NewsImage),
            other => Err(ApiError::bad_request(format!(
                "Unknown upload category '{}'. Use partner_logo or news_image.",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub url: String,
    pub category: UploadCategory,
    pub original_filename: String,
    pub content_type: String,
    pub size: u64,
}

/// Maps an accepted image MIME type to the extension it is stored with.
pub fn image_extension(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

struct PendingFile {
    bytes: BytesMut,
    extension: &'static str,
    content_type: String,
    original_filename: String,
}

/// Reads a `file` + `category` multipart body and stores the image under
/// `<media>/uploads/<category>/<uuid>.<ext>`.
pub async fn save_upload(config: &Config, mut payload: Multipart) -> ApiResult<UploadedFile> {
    let max_bytes = config.max_upload_bytes();
    let mut category: Option<UploadCategory> = None;
    let mut pending: Option<PendingFile> = None;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| ApiError::bad_request(format!("Malformed upload: {}", e)))?;
        let field_name = field.content_disposition().get_name().unwrap_or_default().to_string();

        match field_name.as_str() {
            "file" => {
                let content_type = field
                    .content_type()
                    .map(|m| m.essence_str().to_string())
                    .ok_or_else(|| ApiError::bad_request("Content-Type not available."))?;
                let extension = image_extension(&content_type).ok_or_else(|| {
                    ApiError::bad_request(format!(
                        "Unsupported file type: '{}'. Upload a JPEG, PNG, GIF or WebP image.",
                        content_type
                    ))
                })?;
                let original_filename = field
                    .content_disposition()
                    .get_filename()
                    .unwrap_or("upload")
                    .to_string();

                let mut bytes = BytesMut::new();
                while let Some(chunk) = field.next().await {
                    let data = chunk.map_err(|e| ApiError::bad_request(format!("Malformed upload: {}", e)))?;
                    if (bytes.len() + data.len()) as u64 > max_bytes {
                        return Err(ApiError::bad_request(format!(
                            "File is too large. Maximum size is {}MB.",
                            config.max_upload_size_mb
                        )));
                    }
                    bytes.extend_from_slice(&data);
                }
                pending = Some(PendingFile { bytes, extension, content_type, original_filename });
            }
            "category" => {
                let mut data = BytesMut::new();
                while let Some(chunk) = field.next().await {
                    let chunk = chunk.map_err(|e| ApiError::bad_request(format!("Malformed upload: {}", e)))?;
                    if data.len() + chunk.len() > MAX_FORM_FIELD_BYTES {
                        return Err(ApiError::bad_request("The category field is too long."));
                    }
                    data.extend_from_slice(&chunk);
                }
                let value = String::from_utf8(data.to_vec())
                    .map_err(|_| ApiError::bad_request("Invalid UTF-8 in form field."))?;
                category = Some(value.parse()?);
            }
            _ => (),
        }
    }

    let category = category.ok_or_else(|| ApiError::bad_request("category is required."))?;
    let file = pending.ok_or_else(|| ApiError::bad_request("No file was uploaded."))?;
    if file.bytes.is_empty() {
        return Err(ApiError::bad_request("The uploaded file is empty."));
    }

    let file_name = format!("{}.{}", Uuid::new_v4(), file.extension);
    let dir: PathBuf = config.uploads_dir().join(category.dir_name());
    let target = dir.join(&file_name);
    let size = file.bytes.len() as u64;

    let bytes = file.bytes.freeze();
    web::block(move || {
        fs::create_dir_all(&dir)?;
        fs::write(&target, &bytes)
    })
    .await??;

    log::info!("Stored {} upload '{}' ({} bytes)", category.dir_name(), file_name, size);

    Ok(UploadedFile {
        url: format!("/media/uploads/{}/{}", category.dir_name(), file_name),
        category,
        original_filename: file.original_filename,
        content_type: file.content_type,
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_images_are_accepted() {
        assert_eq!(image_extension("image/png"), Some("png"));
        assert_eq!(image_extension("image/jpeg"), Some("jpg"));
        assert_eq!(image_extension("application/pdf"), None);
        assert_eq!(image_extension("image/svg+xml"), None);
    }

    #[test]
    fn categories_parse_from_form_values() {
        assert_eq!("news_image".parse::<UploadCategory>().unwrap(), UploadCategory::NewsImage);
        assert_eq!(UploadCategory::PartnerLogo.dir_name(), "partner_logo");
        assert!("avatar".parse::<UploadCategory>().is_err());
    }
}
