use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use uuid::Uuid;

/// One drive folder watched by the periodic sync, owned by a recruiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveFolder {
    pub folder_id: String,
    pub owner_id: Uuid,
}

#[derive(Debug, Clone, Default)]
pub struct DriveCredentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl DriveCredentials {
    pub fn is_configured(&self) -> bool {
        self.access_token.is_some() || (self.refresh_token.is_some() && self.client_id.is_some())
    }
}

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub port: u16,
    pub rust_log: String,

    /// Unset ⇒ structuring runs rule-based only.
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,
    pub embedding_model: String,
    /// Unset ⇒ regex-only entity extraction.
    pub ner_base_url: Option<String>,
    pub phone_default_region: String,

    pub workers_resume_processing: usize,
    pub workers_matching: usize,
    pub workers_drive_sync: usize,
    pub job_max_retries: i32,
    pub job_retry_base: Duration,
    pub task_soft_timeout: Duration,
    pub task_hard_timeout: Duration,
    pub queue_poll_interval: Duration,

    pub drive: DriveCredentials,
    pub drive_folders: Vec<DriveFolder>,
    pub drive_sync_interval: Duration,
    pub match_refresh_interval: Duration,
    pub job_cleanup_interval: Duration,
    pub job_retention_days: i64,

    pub training_min_examples: usize,
    pub training_min_accuracy: f64,
    pub auto_fine_tune: bool,
    pub fine_tune_poll_interval: Duration,
    pub few_shot_examples: usize,
    pub few_shot_min_accuracy: f64,
    /// Export requests may only name files inside this directory.
    pub training_export_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let drive_folders = match optional_env("DRIVE_FOLDERS") {
            Some(raw) => parse_drive_folders(&raw)?,
            None => Vec::new(),
        };

        let task_hard_timeout = Duration::from_secs(env_or("TASK_HARD_TIMEOUT_SECS", 1800)?);
        let task_soft_timeout = Duration::from_secs(env_or("TASK_SOFT_TIMEOUT_SECS", 1500)?);
        if task_soft_timeout > task_hard_timeout {
            bail!("TASK_SOFT_TIMEOUT_SECS must not exceed TASK_HARD_TIMEOUT_SECS");
        }

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            port: env_or("PORT", 8080u16).context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),

            llm_api_key: optional_env("LLM_API_KEY"),
            llm_base_url: optional_env("LLM_BASE_URL")
                .unwrap_or_else(|| crate::llm_client::DEFAULT_BASE_URL.to_string()),
            llm_model: optional_env("LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            embedding_model: optional_env("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            ner_base_url: optional_env("NER_BASE_URL"),
            phone_default_region: optional_env("PHONE_DEFAULT_REGION")
                .unwrap_or_else(|| "US".to_string()),

            workers_resume_processing: env_or("WORKERS_RESUME_PROCESSING", 2usize)?.max(1),
            workers_matching: env_or("WORKERS_MATCHING", 2usize)?.max(1),
            workers_drive_sync: env_or("WORKERS_DRIVE_SYNC", 1usize)?.max(1),
            job_max_retries: env_or("JOB_MAX_RETRIES", 3i32)?.max(1),
            job_retry_base: Duration::from_secs(env_or("JOB_RETRY_BASE_SECS", 60)?),
            task_soft_timeout,
            task_hard_timeout,
            queue_poll_interval: Duration::from_millis(env_or("QUEUE_POLL_INTERVAL_MS", 500)?),

            drive: DriveCredentials {
                access_token: optional_env("DRIVE_ACCESS_TOKEN"),
                refresh_token: optional_env("DRIVE_REFRESH_TOKEN"),
                client_id: optional_env("DRIVE_CLIENT_ID"),
                client_secret: optional_env("DRIVE_CLIENT_SECRET"),
            },
            drive_folders,
            drive_sync_interval: Duration::from_secs(env_or("DRIVE_SYNC_INTERVAL_SECS", 3600)?),
            match_refresh_interval: Duration::from_secs(env_or(
                "MATCH_REFRESH_INTERVAL_SECS",
                21600,
            )?),
            job_cleanup_interval: Duration::from_secs(env_or("JOB_CLEANUP_INTERVAL_SECS", 86400)?),
            job_retention_days: env_or("JOB_RETENTION_DAYS", 30i64)?,

            training_min_examples: env_or("TRAINING_MIN_EXAMPLES", 100usize)?,
            training_min_accuracy: env_or("TRAINING_MIN_ACCURACY", 0.90f64)?,
            auto_fine_tune: env_or("AUTO_FINE_TUNE", false)?,
            fine_tune_poll_interval: Duration::from_secs(env_or("FINE_TUNE_POLL_SECS", 60)?),
            few_shot_examples: env_or("FEW_SHOT_EXAMPLES", 0usize)?,
            few_shot_min_accuracy: env_or("FEW_SHOT_MIN_ACCURACY", 0.9f64)?,
            training_export_dir: optional_env("TRAINING_EXPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./training")),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid value for '{key}': {e}")),
        None => Ok(default),
    }
}

/// Parses `folder_id:recruiter_uuid,folder_id:recruiter_uuid`.
pub fn parse_drive_folders(raw: &str) -> Result<Vec<DriveFolder>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (folder_id, owner) = entry
                .split_once(':')
                .with_context(|| format!("DRIVE_FOLDERS entry '{entry}' must be folder_id:owner_uuid"))?;
            let owner_id = Uuid::parse_str(owner.trim())
                .with_context(|| format!("DRIVE_FOLDERS owner '{owner}' is not a UUID"))?;
            Ok(DriveFolder {
                folder_id: folder_id.trim().to_string(),
                owner_id,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_drive_folders() {
        let owner = Uuid::new_v4();
        let raw = format!(" abc123:{owner} , ,def456:{owner}");
        let folders = parse_drive_folders(&raw).unwrap();
        assert_eq!(folders.len(), 2);
        assert_eq!(folders[0].folder_id, "abc123");
        assert_eq!(folders[1].owner_id, owner);
    }

    #[test]
    fn test_parse_drive_folders_rejects_bad_owner() {
        assert!(parse_drive_folders("abc:not-a-uuid").is_err());
        assert!(parse_drive_folders("missing-separator").is_err());
    }

    #[test]
    fn test_drive_credentials_configured() {
        let mut creds = DriveCredentials::default();
        assert!(!creds.is_configured());
        creds.refresh_token = Some("r".into());
        creds.client_id = Some("c".into());
        assert!(creds.is_configured());
    }
}
