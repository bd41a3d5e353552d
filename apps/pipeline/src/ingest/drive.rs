//! Cloud-drive folder sync.
//!
//! [`GoogleDriveClient`] lists and downloads folder contents over the Drive v3
//! REST API, refreshing its OAuth token once on a 401. [`DriveSyncer`] walks a
//! folder, skips files already ingested (by drive file id) or of an
//! unsupported kind, and hands the rest to the ingestion service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{IngestError, IngestionService, UploadedFile};
use crate::config::DriveCredentials;
use crate::events::{EventBus, EventKind};
use crate::models::job::{DriveSync, DriveSyncCounts};
use crate::models::resume::MediaKind;
use crate::storage::{JobRepository, PipelineStore, ResumeRepository};

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const PAGE_SIZE: u32 = 100;
const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Drive API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Drive credentials missing or rejected")]
    Unauthorized,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[async_trait]
pub trait DriveSource: Send + Sync {
    /// Every non-trashed file directly inside `folder_id`.
    async fn list_folder(&self, folder_id: &str) -> Result<Vec<DriveFile>, DriveError>;

    async fn download(&self, file_id: &str) -> Result<Bytes, DriveError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct GoogleDriveClient {
    client: Client,
    api_base: String,
    token_url: String,
    credentials: DriveCredentials,
    access_token: RwLock<Option<String>>,
}

impl GoogleDriveClient {
    pub fn new(credentials: DriveCredentials) -> Result<Self, DriveError> {
        Self::with_endpoints(credentials, DEFAULT_API_BASE, DEFAULT_TOKEN_URL)
    }

    pub fn with_endpoints(
        credentials: DriveCredentials,
        api_base: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Result<Self, DriveError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token_url: token_url.into(),
            access_token: RwLock::new(credentials.access_token.clone()),
            credentials,
        })
    }

    async fn current_token(&self) -> Result<String, DriveError> {
        if let Some(token) = self.access_token.read().await.clone() {
            return Ok(token);
        }
        self.refresh_token().await
    }

    async fn refresh_token(&self) -> Result<String, DriveError> {
        let (Some(refresh), Some(client_id)) = (
            self.credentials.refresh_token.as_deref(),
            self.credentials.client_id.as_deref(),
        ) else {
            return Err(DriveError::Unauthorized);
        };
        let secret = self.credentials.client_secret.as_deref().unwrap_or_default();

        let resp = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh),
                ("client_id", client_id),
                ("client_secret", secret),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            warn!(status = resp.status().as_u16(), "Drive token refresh rejected");
            return Err(DriveError::Unauthorized);
        }
        let token = resp.json::<TokenResponse>().await?.access_token;
        *self.access_token.write().await = Some(token.clone());
        debug!("Drive access token refreshed");
        Ok(token)
    }

    /// Sends the request built by `build`, refreshing the token and retrying
    /// once when the API answers 401.
    async fn send_authorized<F>(&self, build: F) -> Result<Response, DriveError>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.current_token().await?;
        let mut resp = build(&token).send().await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            let token = self.refresh_token().await?;
            resp = build(&token).send().await?;
            if resp.status() == StatusCode::UNAUTHORIZED {
                return Err(DriveError::Unauthorized);
            }
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(DriveError::Api { status, message });
        }
        Ok(resp)
    }
}

#[async_trait]
impl DriveSource for GoogleDriveClient {
    async fn list_folder(&self, folder_id: &str) -> Result<Vec<DriveFile>, DriveError> {
        let url = format!("{}/drive/v3/files", self.api_base);
        let query = format!("'{}' in parents and trashed = false", folder_id.replace('\'', "\\'"));
        let page_size = PAGE_SIZE.to_string();

        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let resp = self
                .send_authorized(|token| {
                    let mut req = self
                        .client
                        .get(&url)
                        .bearer_auth(token)
                        .query(&[
                            ("q", query.as_str()),
                            ("fields", "nextPageToken, files(id, name, mimeType)"),
                            ("pageSize", page_size.as_str()),
                        ]);
                    if let Some(t) = &page_token {
                        req = req.query(&[("pageToken", t.as_str())]);
                    }
                    req
                })
                .await?;
            let page: FileList = resp.json().await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        Ok(files)
    }

    async fn download(&self, file_id: &str) -> Result<Bytes, DriveError> {
        let url = format!("{}/drive/v3/files/{}", self.api_base, file_id);
        let resp = self
            .send_authorized(|token| {
                self.client
                    .get(&url)
                    .bearer_auth(token)
                    .query(&[("alt", "media")])
            })
            .await?;
        Ok(resp.bytes().await?)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sync
// ────────────────────────────────────────────────────────────────────────────

pub struct DriveSyncer {
    store: Arc<dyn PipelineStore>,
    drive: Arc<dyn DriveSource>,
    ingest: Arc<IngestionService>,
    events: EventBus,
    /// A running sync older than this no longer blocks a new one.
    stale_after: Duration,
}

impl DriveSyncer {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        drive: Arc<dyn DriveSource>,
        ingest: Arc<IngestionService>,
        events: EventBus,
        stale_after: Duration,
    ) -> Self {
        Self {
            store,
            drive,
            ingest,
            events,
            stale_after,
        }
    }

    /// Ingests every new supported file in the folder. Returns `None` when
    /// another sync of the same folder is still running.
    ///
    /// Per-file failures are counted, not propagated; a listing failure ends
    /// the sync with its error recorded.
    pub async fn sync_folder(
        &self,
        folder_id: &str,
        owner_id: Uuid,
    ) -> Result<Option<DriveSync>, IngestError> {
        let Some(sync) = self
            .store
            .begin_drive_sync(folder_id, owner_id, self.stale_after)
            .await?
        else {
            info!(folder_id, "Drive sync already running, skipping");
            return Ok(None);
        };

        let mut counts = DriveSyncCounts::default();
        let listing = match self.drive.list_folder(folder_id).await {
            Ok(files) => files,
            Err(e) => {
                warn!(folder_id, error = %e, "Drive listing failed");
                let message = e.to_string();
                let finished = self
                    .store
                    .finish_drive_sync(sync.id, counts, Some(&message))
                    .await?;
                self.publish(&finished);
                return Ok(Some(finished));
            }
        };

        counts.files_found = listing.len() as i32;
        for file in listing {
            if MediaKind::from_filename(&file.name).is_none() {
                debug!(file = %file.name, "Skipping unsupported drive file");
                counts.files_skipped += 1;
                continue;
            }
            if self.store.drive_file_ingested(&file.id).await? {
                counts.files_skipped += 1;
                continue;
            }

            match self.ingest_file(owner_id, &file).await {
                Ok(()) => counts.files_ingested += 1,
                Err(e) => {
                    warn!(folder_id, file = %file.name, error = %e, "Drive file ingest failed");
                    counts.files_failed += 1;
                }
            }
        }

        let finished = self.store.finish_drive_sync(sync.id, counts, None).await?;
        info!(
            folder_id,
            found = counts.files_found,
            ingested = counts.files_ingested,
            skipped = counts.files_skipped,
            failed = counts.files_failed,
            "Drive sync finished"
        );
        self.publish(&finished);
        Ok(Some(finished))
    }

    async fn ingest_file(&self, owner_id: Uuid, file: &DriveFile) -> Result<(), IngestError> {
        let bytes = self.drive.download(&file.id).await?;
        self.ingest
            .ingest_drive_file(
                owner_id,
                &file.id,
                UploadedFile {
                    filename: file.name.clone(),
                    bytes,
                },
            )
            .await?;
        Ok(())
    }

    fn publish(&self, sync: &DriveSync) {
        self.events.publish(EventKind::DriveSyncCompleted {
            sync_id: sync.id,
            folder_id: sync.folder_id.clone(),
            owner_id: sync.owner_id,
            files_found: sync.files_found,
            files_ingested: sync.files_ingested,
            files_skipped: sync.files_skipped,
            files_failed: sync.files_failed,
            error: sync.error.clone(),
        });
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
