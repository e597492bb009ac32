//! Where media lives and how it is reached.
//!
//! The media base is either an `http(s)` URL or a local directory (a `file`
//! URL). Existence probes, full fetches for images and video downloads all
//! go through [`MediaSource`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::assets::PrepareError;

/// Decides whether a candidate file is currently available.
#[async_trait]
pub trait ExistenceProbe: Send + Sync {
    async fn exists(&self, url: &Url) -> bool;
}

/// Resolves candidate filenames into probe and display URLs.
#[derive(Debug, Clone)]
pub struct Locator {
    base: Url,
    version: Option<String>,
}

impl Locator {
    /// Parse `base` as a URL, or treat it as a directory path.
    pub fn new(base: &str, version: Option<String>) -> Result<Self> {
        let mut base = match Url::parse(base) {
            Ok(url) if url.scheme() != "file" && url.cannot_be_a_base() => {
                anyhow::bail!("Media base cannot be used as a base URL: {}", base)
            }
            Ok(url) => url,
            Err(_) => {
                let dir = std::path::absolute(Path::new(base))
                    .with_context(|| format!("Invalid media directory: {}", base))?;
                Url::from_directory_path(&dir)
                    .map_err(|_| anyhow::anyhow!("Invalid media directory: {}", dir.display()))?
            }
        };

        // Without a trailing slash `join` would replace the last segment.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self { base, version })
    }

    /// Session-stable cache-busting token: boot time in milliseconds.
    pub fn boot_version() -> String {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default()
            .to_string()
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Bare URL of a candidate, used for existence probes.
    pub fn probe_url(&self, file: &str) -> Result<Url, url::ParseError> {
        self.base.join(file)
    }

    /// URL a candidate is preloaded and displayed from.
    pub fn display_url(&self, file: &str) -> Result<Url, url::ParseError> {
        let mut url = self.base.join(file)?;
        if let Some(ref version) = self.version {
            url.query_pairs_mut().append_pair("v", version);
        }
        Ok(url)
    }
}

/// Fetches media from the configured base.
#[derive(Clone)]
pub struct MediaSource {
    client: reqwest::Client,
    probe_timeout: Duration,
}

impl MediaSource {
    pub fn new(probe_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(probe_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            probe_timeout,
        })
    }

    /// Fetch a whole file.
    pub async fn fetch(&self, url: &Url) -> Result<Vec<u8>, PrepareError> {
        match url.scheme() {
            "file" => {
                let path = local_path(url)?;
                Ok(tokio::fs::read(&path).await?)
            }
            "http" | "https" => {
                let response = self
                    .client
                    .get(url.clone())
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(response.bytes().await?.to_vec())
            }
            other => Err(PrepareError::UnsupportedScheme(other.to_string())),
        }
    }

    /// Stream an `http(s)` resource into `file` and return the byte count.
    pub async fn download_to(
        &self,
        url: &Url,
        file: &mut tokio::fs::File,
    ) -> Result<u64, PrepareError> {
        match url.scheme() {
            "http" | "https" => {
                let response = self
                    .client
                    .get(url.clone())
                    .send()
                    .await?
                    .error_for_status()?;
                write_stream(response.bytes_stream(), file).await
            }
            other => Err(PrepareError::UnsupportedScheme(other.to_string())),
        }
    }
}

#[async_trait]
impl ExistenceProbe for MediaSource {
    async fn exists(&self, url: &Url) -> bool {
        match url.scheme() {
            "file" => match url.to_file_path() {
                Ok(path) => tokio::fs::metadata(&path)
                    .await
                    .map(|m| m.is_file())
                    .unwrap_or(false),
                Err(_) => false,
            },
            "http" | "https" => {
                let request = self
                    .client
                    .head(url.clone())
                    .header(CACHE_CONTROL, "no-store")
                    .header(PRAGMA, "no-cache")
                    .timeout(self.probe_timeout);

                match request.send().await {
                    Ok(response) => response.status().is_success(),
                    Err(e) => {
                        tracing::debug!("Probe for {} failed: {}", url, e);
                        false
                    }
                }
            }
            _ => false,
        }
    }
}

/// Filesystem path of a `file` URL.
pub(crate) fn local_path(url: &Url) -> Result<std::path::PathBuf, PrepareError> {
    url.to_file_path()
        .map_err(|_| PrepareError::UnsupportedScheme(url.to_string()))
}

/// Copy a body stream into `file` chunk by chunk.
async fn write_stream<S, B>(stream: S, file: &mut tokio::fs::File) -> Result<u64, PrepareError>
where
    S: Stream<Item = Result<B, reqwest::Error>>,
    B: AsRef<[u8]>,
{
    let mut stream = std::pin::pin!(stream);
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(chunk.as_ref()).await?;
        written += chunk.as_ref().len() as u64;
    }
    file.flush().await?;
    Ok(written)
}
