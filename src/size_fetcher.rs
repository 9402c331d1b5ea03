//! # Size Fetcher Module
//!
//! Questo modulo scarica risorse remote e ne riporta la lunghezza in byte.
//!
//! ## Responsabilità:
//! - `fetch_len()`: probe best-effort della dimensione (HEAD, fallback GET)
//! - `download()`: download strict dei byte, usato dai job di compressione
//!
//! ## Politica degli errori:
//! - `fetch_len` non fallisce mai il batch: logga e restituisce `None`
//! - `download` propaga l'errore come fallimento del singolo job (no retry)

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Strict byte download, the seam jobs fetch image bytes through
#[async_trait]
pub trait ImageDownloader: Send + Sync {
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

/// Downloads resources by URL and reports their byte length
#[derive(Clone)]
pub struct SizeFetcher {
    client: Client,
}

impl SizeFetcher {
    /// Create a fetcher with a client-level request timeout
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }

    /// Best-effort byte length of a remote resource
    ///
    /// Tries a HEAD request first and falls back to downloading the body
    /// when the server doesn't report a Content-Length. Failures are logged
    /// and leave the size unknown.
    pub async fn fetch_len(&self, url: &str) -> Option<u64> {
        match self.client.head(url).send().await {
            Ok(response) if response.status().is_success() => {
                if let Some(len) = response.content_length() {
                    debug!("HEAD {} -> {} bytes", url, len);
                    return Some(len);
                }
            }
            Ok(response) => {
                debug!("HEAD {} -> {}", url, response.status());
            }
            Err(e) => {
                debug!("HEAD {} failed: {}", url, e);
            }
        }

        match self.download(url).await {
            Ok(bytes) => Some(bytes.len() as u64),
            Err(e) => {
                warn!("Could not determine size of {}: {}", url, e);
                None
            }
        }
    }

    /// Download the full body of a remote resource
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "GET {} returned status {}",
                url,
                response.status()
            ));
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageDownloader for SizeFetcher {
    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        SizeFetcher::download(self, url).await
    }
}
