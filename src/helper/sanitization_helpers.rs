use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::error::ApiError;

pub const MIN_PASSWORD_LEN: usize = 6;

fn username_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").expect("valid username regex"))
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"))
}

fn color_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("valid color regex"))
}

/// Strips all HTML tags from input (for titles, summaries, names and comments).
pub fn strip_all_html(input: &str) -> String {
    ammonia::Builder::new()
        .tags(HashSet::new())
        .clean(input)
        .to_string()
}

/// Stripped and trimmed text that must not end up empty.
pub fn required_text(field: &str, input: &str) -> Result<String, ApiError> {
    let cleaned = strip_all_html(input).trim().to_string();
    if cleaned.is_empty() {
        return Err(ApiError::bad_request(format!("{} is required.", field)));
    }
    Ok(cleaned)
}

/// Post bodies keep safe formatting markup; scripts, handlers and styles are removed.
pub fn required_rich_text(field: &str, input: &str) -> Result<String, ApiError> {
    let cleaned = ammonia::clean(input).trim().to_string();
    if strip_all_html(&cleaned).trim().is_empty() {
        return Err(ApiError::bad_request(format!("{} is required.", field)));
    }
    Ok(cleaned)
}

pub fn optional_text(input: Option<&str>) -> Option<String> {
    input.map(|s| strip_all_html(s).trim().to_string())
}

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    if username_regex().is_match(username) {
        Ok(())
    } else {
        Err(ApiError::bad_request(
            "Username must be 3-32 characters of letters, digits, '_', '.' or '-'.",
        ))
    }
}

pub fn validate_email(email: &str) -> Result<(), ApiError> {
    if email.len() <= 254 && email_regex().is_match(email) {
        Ok(())
    } else {
        Err(ApiError::bad_request("Email address is not valid."))
    }
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() >= MIN_PASSWORD_LEN {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!(
            "Password must be at least {} characters.",
            MIN_PASSWORD_LEN
        )))
    }
}

pub fn validate_color(color: &str) -> Result<(), ApiError> {
    if color_regex().is_match(color) {
        Ok(())
    } else {
        Err(ApiError::bad_request("Color must look like #1890ff."))
    }
}

/// Only absolute http(s) URLs are accepted as outbound endpoints.
pub fn validate_http_url(field: &str, value: &str) -> Result<(), ApiError> {
    match url::Url::parse(value.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(ApiError::bad_request(format!("{} must be an http(s) URL.", field))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markup_but_keeps_text() {
        assert_eq!(strip_all_html("<b>Rate</b> update<script>alert(1)</script>"), "Rate update");
        assert!(required_text("Title", "  <i></i> ").is_err());
        assert_eq!(required_text("Title", " <p>Hello</p> ").unwrap(), "Hello");
    }

    #[test]
    fn rich_text_keeps_formatting_only() {
        let cleaned = required_rich_text("Content", "<p onclick=\"x()\">Rates <b>drop</b></p><script>1</script>").unwrap();
        assert_eq!(cleaned, "<p>Rates <b>drop</b></p>");
        assert!(required_rich_text("Content", "<p> </p>").is_err());
    }

    #[test]
    fn usernames_and_emails() {
        assert!(validate_username("testuser").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("bad name").is_err());
        assert!(validate_email("admin@example.com").is_ok());
        assert!(validate_email("admin@example").is_err());
    }

    #[test]
    fn seeded_passwords_are_long_enough() {
        assert!(validate_password("test123").is_ok());
        assert!(validate_password("12345").is_err());
    }

    #[test]
    fn colors_and_urls() {
        assert!(validate_color("#1890ff").is_ok());
        assert!(validate_color("blue").is_err());
        assert!(validate_http_url("endpointUrl", "https://fcm.example.com/send").is_ok());
        assert!(validate_http_url("endpointUrl", "ftp://x").is_err());
    }
}
