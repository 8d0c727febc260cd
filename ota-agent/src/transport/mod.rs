//! HTTP client for the update server.
//!
//! Every call goes through [`RetryPolicy`]; each request carries its own
//! timeout so a stalled server never holds an execution context forever.

pub mod checksum;
pub mod progress;
pub mod retry;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{info, warn};

use crate::config::NetworkConfig;
use crate::manifest::Manifest;
use crate::utils::errors::{OtaError, Result};
use progress::{format_bytes, DownloadProgress};
pub use retry::RetryPolicy;

/// Outcome reported upstream after an install attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    Failed,
}

/// Body of `POST /report`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub device_id: String,
    pub product_type: String,
    pub version: String,
    pub status: ReportStatus,
    pub message: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    ping: Duration,
    manifest: Duration,
    download: Duration,
    report: Duration,
}

#[derive(Debug, Clone)]
pub struct OtaClient {
    client: reqwest::Client,
    server_url: String,
    product_type: String,
    device_id: String,
    retry: RetryPolicy,
    timeouts: Timeouts,
    chunk_size: usize,
}

impl OtaClient {
    pub fn new(
        server_url: &str,
        product_type: &str,
        device_id: &str,
        network: &NetworkConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ota-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            server_url: server_url.trim_end_matches('/').to_string(),
            product_type: product_type.to_string(),
            device_id: device_id.to_string(),
            retry: RetryPolicy::new(network.max_attempts, network.base_delay()),
            timeouts: Timeouts {
                ping: Duration::from_secs(network.ping_timeout_secs),
                manifest: Duration::from_secs(network.manifest_timeout_secs),
                download: Duration::from_secs(network.download_timeout_secs),
                report: Duration::from_secs(network.report_timeout_secs),
            },
            chunk_size: network.chunk_size.max(1024),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn manifest_url(&self) -> String {
        format!("{}/{}/manifest.json", self.server_url, self.product_type)
    }

    fn resolve(&self, remote_path: &str) -> String {
        if remote_path.starts_with("http://") || remote_path.starts_with("https://") {
            remote_path.to_string()
        } else {
            format!("{}/{}", self.server_url, remote_path.trim_start_matches('/'))
        }
    }

    /// Single reachability probe against `/ping`. Not retried.
    pub async fn check_network(&self) -> bool {
        let url = format!("{}/ping", self.server_url);
        match self.client.get(&url).timeout(self.timeouts.ping).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!("Server ping returned HTTP {}", response.status());
                false
            }
            Err(e) => {
                warn!("Server unreachable: {}", e);
                false
            }
        }
    }

    /// Fetch and validate the release manifest for this product.
    pub async fn fetch_manifest(&self) -> Result<Manifest> {
        let url = self.manifest_url();
        let url = url.as_str();
        let manifest = self
            .retry
            .run("Manifest fetch", move |_| self.fetch_manifest_once(url))
            .await?;
        info!(version = %manifest.version, "Fetched manifest");
        Ok(manifest)
    }

    /// One manifest fetch without retry, for connectivity diagnostics.
    pub async fn probe_manifest(&self) -> Result<Manifest> {
        self.fetch_manifest_once(&self.manifest_url()).await
    }

    async fn fetch_manifest_once(&self, url: &str) -> Result<Manifest> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeouts.manifest)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(OtaError::Network(format!(
                "HTTP {} fetching {}",
                response.status(),
                url
            )));
        }

        let body = response.bytes().await?;
        Manifest::from_slice(&body)
    }

    /// Stream `remote_path` to `local_path`, creating parent directories.
    /// Returns the number of bytes written.
    pub async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<u64> {
        let url = self.resolve(remote_path);
        let url = url.as_str();
        self.retry
            .run("Download", move |_| self.download_once(url, local_path))
            .await
    }

    async fn download_once(&self, url: &str, local_path: &Path) -> Result<u64> {
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut response = self
            .client
            .get(url)
            .timeout(self.timeouts.download)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(OtaError::Network(format!(
                "HTTP {} downloading {}",
                response.status(),
                url
            )));
        }

        let mut progress = DownloadProgress::new(response.content_length());
        let file = tokio::fs::File::create(local_path).await?;
        let mut writer = BufWriter::with_capacity(self.chunk_size, file);

        while let Some(chunk) = response.chunk().await? {
            writer.write_all(&chunk).await?;
            if let Some(percent) = progress.advance(chunk.len() as u64) {
                info!("Download {}: {}%", local_path.display(), percent);
            }
        }
        writer.flush().await?;

        info!(
            "Downloaded {} ({})",
            local_path.display(),
            format_bytes(progress.downloaded_bytes)
        );
        Ok(progress.downloaded_bytes)
    }

    /// Best-effort status report. Failures are logged and yield `false`.
    pub async fn report_status(&self, version: &str, status: ReportStatus, message: &str) -> bool {
        let url = format!("{}/report", self.server_url);
        let report = StatusReport {
            device_id: self.device_id.clone(),
            product_type: self.product_type.clone(),
            version: version.to_string(),
            status,
            message: message.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        let (url, report) = (url.as_str(), &report);

        let result = self
            .retry
            .run("Status report", move |_| async move {
                let response = self
                    .client
                    .post(url)
                    .timeout(self.timeouts.report)
                    .json(report)
                    .send()
                    .await?;
                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(OtaError::Network(format!("HTTP {}", response.status())))
                }
            })
            .await;

        match result {
            Ok(()) => {
                info!(version = %version, "Status reported: {:?}", status);
                true
            }
            Err(e) => {
                warn!(version = %version, "Status report failed: {}", e);
                false
            }
        }
    }
}
