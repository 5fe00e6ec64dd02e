//! Document retrieval: fetch raw PDF bytes for a scanned url.
//!
//! ## Why a relay?
//!
//! COA documents often sit on lab portals that refuse cross-origin or
//! datacenter traffic. A relay endpoint (any service that takes the target
//! url as a single URL-encoded parameter and proxies the response) gets the
//! bytes through without teaching this crate anything about the portal.
//! When no relay is configured the target is fetched directly.
//!
//! One request, no retries: a scan that fails to fetch is recorded as a
//! failure and the user simply scans again.

use crate::config::PipelineConfig;
use crate::error::ScanError;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info};

/// Fetches document bytes, optionally through a relay.
///
/// Holds a connection-pooling client, so construct once per pipeline and
/// reuse across scans.
#[derive(Debug, Clone)]
pub struct DocumentFetcher {
    client: reqwest::Client,
    relay: Option<String>,
    timeout_secs: u64,
}

impl DocumentFetcher {
    pub fn new(config: &PipelineConfig) -> Result<Self, ScanError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| ScanError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            relay: config.relay_endpoint.clone(),
            timeout_secs: config.fetch_timeout_secs,
        })
    }

    /// Fetch the document behind `url`.
    ///
    /// Non-2xx responses, transport failures, and timeouts are all errors;
    /// success yields the full payload.
    pub async fn fetch(&self, url: &str) -> Result<Bytes, ScanError> {
        let request_url = self.request_url(url);
        info!("Fetching document: {}", url);

        let response = self.client.get(&request_url).send().await.map_err(|e| {
            if e.is_timeout() {
                ScanError::FetchTimeout {
                    url: url.to_string(),
                    secs: self.timeout_secs,
                }
            } else {
                ScanError::Fetch {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        if !response.status().is_success() {
            return Err(ScanError::FetchStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| ScanError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        debug!("Fetched {} bytes for {}", bytes.len(), url);
        Ok(bytes)
    }

    /// The url actually requested: the target itself, or the relay with the
    /// URL-encoded target appended.
    fn request_url(&self, target: &str) -> String {
        match &self.relay {
            Some(prefix) => {
                let encoded: String =
                    url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
                format!("{}{}", prefix, encoded)
            }
            None => target.to_string(),
        }
    }
}

/// Check if a decoded scan looks like a fetchable URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}
