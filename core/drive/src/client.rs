//! Google Drive API client.

use bytes::Bytes;
use futures::{stream, StreamExt};
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use photodrive_common::{Error, FileId, PageSize, Result};

use crate::auth::{Authenticator, TokenSource};
use crate::batch::{batch_file_name, BatchReport, UploadOutcome};
use crate::config::DriveConfig;
use crate::diagnostics::ErrorLog;
use crate::query::{folder_named, FOLDER_MIME_TYPE};
use crate::retry::RetryPolicy;
use crate::source::UploadSource;

/// Fields requested from every listing.
const LIST_FIELDS: &str = "nextPageToken, files(id, name)";
/// Fields requested from every upload.
const UPLOAD_FIELDS: &str = "id, parents";
/// Content type sent for every uploaded file.
const UPLOAD_CONTENT_TYPE: &str = "application/octet-stream";

/// A file or folder as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Server-assigned id.
    pub id: FileId,
    /// Display name; not unique.
    pub name: String,
}

/// One page of a listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePage {
    #[serde(default)]
    pub files: Vec<FileRecord>,
    /// Token for the following page, absent on the last one.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    id: String,
    #[serde(default)]
    parents: Vec<String>,
}

/// Error body Google returns alongside non-success statuses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Google Drive API client.
///
/// Every operation returns `Result`; failures are also appended to the
/// client's [`ErrorLog`]. Operations run one request at a time.
pub struct DriveClient {
    http: Client,
    tokens: Arc<dyn TokenSource>,
    api_base: String,
    upload_base: String,
    retry: RetryPolicy,
    error_log: ErrorLog,
}

impl DriveClient {
    /// Authorize with the configured client secret and create a client.
    ///
    /// Blocks until the user has completed the consent flow when no cached
    /// tokens are usable.
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Client-secret file missing or malformed
    /// - Authorization denied or failed
    pub async fn connect(config: &DriveConfig) -> Result<Self> {
        config.validate()?;
        let tokens = Authenticator::from_config(config)?.authorize().await?;
        Self::with_token_source(config, Arc::new(tokens))
    }

    /// Create a client that takes its bearer tokens from `tokens`.
    pub fn with_token_source(config: &DriveConfig, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let mut builder = Client::builder().user_agent(config.application_name.as_str());
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| network_error("Failed to create HTTP client", &e))?;

        Ok(Self {
            http,
            tokens,
            api_base: config.api_base_url.trim_end_matches('/').to_string(),
            upload_base: config.upload_base_url.trim_end_matches('/').to_string(),
            retry: config.retry_policy(),
            error_log: ErrorLog::new(),
        })
    }

    /// Record failures in `error_log` instead of a private log.
    pub fn with_error_log(mut self, error_log: ErrorLog) -> Self {
        self.error_log = error_log;
        self
    }

    /// Replace the batch retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Log every failed operation is recorded in.
    pub fn error_log(&self) -> &ErrorLog {
        &self.error_log
    }

    /// List up to `page_size` files, in server order.
    ///
    /// # Errors
    /// - `page_size` outside `[1, 1000]`
    /// - Request or authentication failure
    pub async fn list_files(&self, page_size: u32) -> Result<Vec<FileRecord>> {
        let result = match PageSize::new(page_size) {
            Ok(size) => self.fetch_page(Some(size), None, None).await,
            Err(e) => Err(e),
        };
        self.observe("list_files", result.map(|page| page.files))
    }

    /// Fetch one page of the listing, continuing from `page_token`.
    pub async fn list_files_page(
        &self,
        page_size: PageSize,
        page_token: Option<&str>,
    ) -> Result<FilePage> {
        let result = self.fetch_page(Some(page_size), None, page_token).await;
        self.observe("list_files_page", result)
    }

    /// Find folders named exactly `name`.
    ///
    /// Folder names are not unique, so any number of records may match.
    pub async fn search_directory(&self, name: &str) -> Result<Vec<FileRecord>> {
        let query = folder_named(name);
        let result = self.list(&query).await;
        self.observe("search_directory", result)
    }

    /// Create a folder named `name` in the root and return its id.
    ///
    /// Existing folders are not checked: repeated calls create duplicates.
    pub async fn create_directory(&self, name: &str) -> Result<FileId> {
        let result = self.create_folder(name).await;
        self.observe("create_directory", result)
    }

    /// Upload `source` as `name` into the folder `parent`.
    ///
    /// The source is streamed into the request; nothing is buffered whole.
    pub async fn upload_file(
        &self,
        parent: &FileId,
        name: &str,
        mut source: UploadSource,
    ) -> Result<()> {
        let result = self.upload_once(parent, name, &mut source).await;
        self.observe("upload_file", result)
    }

    /// Upload every source into `parent`, item `i` as `photo_<i>.jpg`.
    ///
    /// Failed items are retried according to the retry policy; a failing
    /// item never stops the batch. Every failed attempt is recorded.
    pub async fn upload_files(&self, parent: &FileId, sources: Vec<UploadSource>) -> BatchReport {
        info!("Uploading {} files into {}", sources.len(), parent);
        let mut report = BatchReport::with_capacity(sources.len());

        for (index, mut source) in sources.into_iter().enumerate() {
            let name = batch_file_name(index);
            let mut attempts = 0;

            let result = loop {
                attempts += 1;
                let err = match self.upload_once(parent, &name, &mut source).await {
                    Ok(()) => break Ok(()),
                    Err(e) => e,
                };
                self.error_log.record("upload_files", &err);

                let delay = if !source.is_exhausted() {
                    self.retry.next_delay(attempts, &err)
                } else {
                    None
                };

                match delay {
                    Some(delay) => {
                        warn!(
                            "Upload of {} failed (attempt {}/{}), retrying in {:?}",
                            name,
                            attempts,
                            self.retry.max_attempts(),
                            delay
                        );
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    None => break Err(err),
                }
            };

            report.push(UploadOutcome {
                index,
                name,
                attempts,
                result,
            });
        }

        info!(
            "Batch upload finished: {}/{} succeeded",
            report.succeeded(),
            report.len()
        );
        report
    }

    fn observe<T>(&self, operation: &'static str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.error_log.record(operation, e);
        }
        result
    }

    async fn auth_header(&self) -> Result<String> {
        let token = self.tokens.access_token().await?;
        Ok(format!("Bearer {}", token))
    }

    async fn list(&self, query: &str) -> Result<Vec<FileRecord>> {
        debug!("Searching with query: {}", query);
        let page = self.fetch_page(None, Some(query), None).await?;
        Ok(page.files)
    }

    async fn fetch_page(
        &self,
        page_size: Option<PageSize>,
        query: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<FilePage> {
        let url = format!("{}/files", self.api_base);
        let auth = self.auth_header().await?;

        let mut request = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, auth)
            .query(&[("fields", LIST_FIELDS)]);

        if let Some(size) = page_size {
            request = request.query(&[("pageSize", size.get())]);
        }
        if let Some(query) = query {
            request = request.query(&[("q", query)]);
        }
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| network_error("Failed to list files", &e))?;

        let page: FilePage = handle_response(response).await?;
        info!("Listed {} files", page.files.len());
        Ok(page)
    }

    async fn create_folder(&self, name: &str) -> Result<FileId> {
        let url = format!("{}/files", self.api_base);
        let auth = self.auth_header().await?;

        let metadata = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
        });

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, auth)
            .query(&[("fields", "id")])
            .json(&metadata)
            .send()
            .await
            .map_err(|e| network_error("Failed to create folder", &e))?;

        let created: CreatedFile = handle_response(response).await?;
        let id = FileId::new(created.id)?;
        info!("Created folder {} ({})", name, id);
        Ok(id)
    }

    async fn upload_once(
        &self,
        parent: &FileId,
        name: &str,
        source: &mut UploadSource,
    ) -> Result<()> {
        let url = format!("{}/files", self.upload_base);
        let auth = self.auth_header().await?;

        let metadata = serde_json::json!({
            "name": name,
            "parents": [parent.as_str()],
        });
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| Error::Serialization(format!("Failed to serialize metadata: {}", e)))?;

        // Build multipart request
        let boundary = format!("photodrive-{}", Uuid::new_v4().simple());
        let head = format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n--{b}\r\nContent-Type: {ct}\r\n\r\n",
            b = boundary,
            meta = metadata_json,
            ct = UPLOAD_CONTENT_TYPE,
        );
        let tail = format!("\r\n--{}--\r\n", boundary);

        // Opened last: a one-shot source is only taken by an attempt that sends it.
        let content = source.open(&self.http).await?;

        let body = stream::iter([Ok::<_, Error>(Bytes::from(head))])
            .chain(content)
            .chain(stream::iter([Ok::<_, Error>(Bytes::from(tail))]));

        debug!("Uploading {} from {}", name, source);

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, auth)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .query(&[("uploadType", "multipart"), ("fields", UPLOAD_FIELDS)])
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await
            .map_err(|e| network_error(&format!("Failed to upload {}", name), &e))?;

        let uploaded: UploadedFile = handle_response(response).await?;
        info!(
            "Uploaded {} as {} into {:?}",
            name, uploaded.id, uploaded.parents
        );
        Ok(())
    }
}

/// Map a response to `T`, or to the error its status stands for.
async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();

    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse response: {}", e)));
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| {
            if body.is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                body
            }
        });

    Err(match status {
        StatusCode::UNAUTHORIZED => Error::Authentication(message),
        StatusCode::FORBIDDEN => Error::PermissionDenied(message),
        StatusCode::NOT_FOUND => Error::NotFound(message),
        _ => Error::Api {
            status: status.as_u16(),
            message,
        },
    })
}

/// Network error carrying `err` and every underlying cause.
pub(crate) fn network_error(context: &str, err: &reqwest::Error) -> Error {
    let mut message = format!("{}: {}", context, err);
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    Error::Network(message)
}
