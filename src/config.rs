use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use config;

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub web: WebConfig,
    // Populated from the .env file
    pub database_path: String,
    pub media_path: String,
    pub allowed_origins: String,
    pub log_level: String,
    pub token_ttl_hours: u64,
    pub report_timeout_secs: u64,
    pub slow_report_timeout_secs: u64,
    pub push_dispatch_timeout_secs: u64,
    pub max_upload_size_mb: u64,
}

fn required_var(key: &str) -> Result<String, config::ConfigError> {
    env::var(key).map_err(|_| config::ConfigError::Message(format!(
        "FATAL: Environment variable '{}' is not set in your .env file.", key
    )))
}

fn numeric_var(key: &str, default: u64) -> Result<u64, config::ConfigError> {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(value) if value > 0 => Ok(value),
            _ => Err(config::ConfigError::Message(format!(
                "FATAL: '{}' must be a positive whole number, got '{}'.", key, raw
            ))),
        },
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env(env_path: &Path) -> Result<Self, config::ConfigError> {
        dotenvy::from_path(env_path)
            .map_err(|e| config::ConfigError::Message(format!(
                "FATAL: Failed to load .env file from '{}'. Error: {}", env_path.display(), e
            )))?;

        let database_path = required_var("DATABASE_PATH")?;
        let media_path = required_var("MEDIA_PATH")?;

        for (key, value) in [("DATABASE_PATH", &database_path), ("MEDIA_PATH", &media_path)] {
            if Path::new(value).is_relative() {
                return Err(config::ConfigError::Message(format!(
                    "FATAL: The '{}' in your .env file is a relative path ('{}'). It MUST be an absolute path.",
                    key, value
                )));
            }
        }

        let allowed_origins = env::var("ALLOWED_ORIGINS").unwrap_or_default();
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let token_ttl_hours = numeric_var("TOKEN_TTL_HOURS", 24)?;
        let report_timeout_secs = numeric_var("REPORT_TIMEOUT_SECS", 15)?;
        let slow_report_timeout_secs = numeric_var("SLOW_REPORT_TIMEOUT_SECS", 40)?;
        let push_dispatch_timeout_secs = numeric_var("PUSH_DISPATCH_TIMEOUT_SECS", 30)?;
        let max_upload_size_mb = numeric_var("MAX_UPLOAD_SIZE_MB", 5)?;

        let builder = config::Config::builder()
            .set_default("web.host", "127.0.0.1")?
            .set_default("web.port", 8080_i64)?
            // Host/port may be overridden by the TOML file.
            .add_source(config::File::new("config/default.toml", config::FileFormat::Toml).required(false))
            .set_override("database_path", database_path)?
            .set_override("media_path", media_path)?
            .set_override("allowed_origins", allowed_origins)?
            .set_override("log_level", log_level)?
            .set_override("token_ttl_hours", token_ttl_hours as i64)?
            .set_override("report_timeout_secs", report_timeout_secs as i64)?
            .set_override("slow_report_timeout_secs", slow_report_timeout_secs as i64)?
            .set_override("push_dispatch_timeout_secs", push_dispatch_timeout_secs as i64)?
            .set_override("max_upload_size_mb", max_upload_size_mb as i64)?
            .build()?;

        builder.try_deserialize()
    }

    /// Builds a configuration with the default tunables for the given directories.
    pub fn with_paths(database_path: &Path, media_path: &Path) -> Self {
        Config {
            web: WebConfig { host: "127.0.0.1".to_string(), port: 8080 },
            database_path: database_path.display().to_string(),
            media_path: media_path.display().to_string(),
            allowed_origins: String::new(),
            log_level: "info".to_string(),
            token_ttl_hours: 24,
            report_timeout_secs: 15,
            slow_report_timeout_secs: 40,
            push_dispatch_timeout_secs: 30,
            max_upload_size_mb: 5,
        }
    }

    /// Returns the full path to the SQLite database file.
    pub fn database_file(&self) -> PathBuf {
        PathBuf::from(&self.database_path).join("opsdesk.db")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        PathBuf::from(&self.media_path).join("uploads")
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_secs(self.report_timeout_secs)
    }

    pub fn slow_report_timeout(&self) -> Duration {
        Duration::from_secs(self.slow_report_timeout_secs)
    }

    pub fn push_dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.push_dispatch_timeout_secs)
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_size_mb * 1024 * 1024
    }
}
