use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use reqwest::StatusCode;
use reqwest::header::{DATE, IF_MODIFIED_SINCE};
use std::time::SystemTime;
use tokio_util::io::StreamReader;

use super::{Agent, SyncOutcome};
use crate::error::{Result, SyncError};
use crate::platform;

/// Permissions of the persisted encrypted bundle
const BUNDLE_FILE_MODE: u32 = 0o644;

/// Result of the conditional fetch
#[derive(Debug, PartialEq, Eq)]
enum FetchResult {
    /// A new bundle was persisted with the server's timestamp
    Updated { bytes: u64, modified: SystemTime },
    NotModified,
}

/// Format a timestamp as an HTTP date (`Tue, 15 Oct 2024 10:00:00 GMT`)
pub fn format_http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Parse an HTTP/RFC 1123 date header
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(SystemTime::from)
}

impl Agent {
    /// Run one sync cycle: conditional fetch, then extraction if updated
    pub async fn check_in(&self) -> Result<SyncOutcome> {
        match self.fetch_bundle().await? {
            FetchResult::NotModified => Ok(SyncOutcome::NotModified),
            FetchResult::Updated { bytes, modified } => {
                tracing::info!(
                    "Config bundle updated ({} bytes, modified {})",
                    bytes,
                    format_http_date(modified)
                );
                let summary = self.extract()?;
                Ok(SyncOutcome::Updated(summary))
            }
        }
    }

    /// Fetch the bundle unless the server copy is older than ours
    async fn fetch_bundle(&self) -> Result<FetchResult> {
        let client = self.client.as_ref().ok_or(SyncError::Offline)?;
        tracing::debug!("Checking in with: {}", self.config_url);

        let mut request = client.get(&self.config_url);

        // Don't pull it down unless we need to
        if let Some(modified) = platform::modified_time(&self.encrypted_config)? {
            let since = format_http_date(modified);
            tracing::debug!("Using If-Modified-Since: {}", since);
            request = request.header(IF_MODIFIED_SINCE, since);
        }

        let response = request.send().await.map_err(|source| SyncError::Request {
            url: self.config_url.clone(),
            source,
        })?;

        match response.status() {
            StatusCode::OK => {
                let modified = response
                    .headers()
                    .get(DATE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_http_date)
                    .unwrap_or_else(|| {
                        tracing::warn!(
                            "Unable to get modtime of config file, defaulting to 'now'"
                        );
                        SystemTime::now()
                    });

                let body = StreamReader::new(Box::pin(
                    response.bytes_stream().map_err(std::io::Error::other),
                ));
                let bytes = platform::atomic_write_stream(
                    &self.encrypted_config,
                    body,
                    Some(modified),
                    Some(BUNDLE_FILE_MODE),
                )
                .await
                .map_err(|e| self.body_error(e))?;

                Ok(FetchResult::Updated { bytes, modified })
            }
            StatusCode::NOT_MODIFIED => {
                tracing::info!("Config on server has not changed");
                Ok(FetchResult::NotModified)
            }
            StatusCode::NO_CONTENT => {
                tracing::info!("Device has no config defined on server");
                Ok(FetchResult::NotModified)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(SyncError::Status {
                    url: self.config_url.clone(),
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    /// Tell a dropped or timed-out download apart from a local write failure
    ///
    /// Body read errors reach the writer as an `io::Error` wrapping the
    /// `reqwest::Error`; those are reported as [`SyncError::Request`].
    fn body_error(&self, err: SyncError) -> SyncError {
        let (context, source) = match err {
            SyncError::Filesystem { context, source } => (context, source),
            other => return other,
        };
        if !source
            .get_ref()
            .is_some_and(|inner| inner.is::<reqwest::Error>())
        {
            return SyncError::Filesystem { context, source };
        }

        match source.into_inner().map(|inner| inner.downcast::<reqwest::Error>()) {
            Some(Ok(source)) => SyncError::Request {
                url: self.config_url.clone(),
                source: *source,
            },
            Some(Err(inner)) => SyncError::Filesystem {
                context,
                source: std::io::Error::other(inner),
            },
            None => SyncError::Filesystem {
                context,
                source: std::io::Error::other("body read failed"),
            },
        }
    }
}
