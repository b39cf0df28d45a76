//! Raw page storage, JSON file helpers and the page renderer used by the fetch stages.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "harvest-storage";

/// Flat directory of rendered markup, one file per page number or identifier.
#[derive(Debug, Clone)]
pub struct PageStore {
    root: PathBuf,
}

impl PageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    pub async fn ensure_root(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating page directory {}", self.root.display()))
    }

    /// Write markup under `file_name`, replacing any earlier document with the same key.
    ///
    /// The bytes land in a temp file first and are renamed into place, so readers never
    /// see a partially written page.
    pub async fn write_page(&self, file_name: &str, markup: &str) -> anyhow::Result<PathBuf> {
        self.ensure_root().await?;
        let absolute_path = self.path_for(file_name);

        let temp_path = self
            .root
            .join(format!(".{}.{}.tmp", Uuid::new_v4(), markup.len()));
        let file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp page file {}", temp_path.display()))?;
        fill_temp_file(file, &temp_path, markup.as_bytes()).await?;

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "renaming temp page {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }
        Ok(absolute_path)
    }
}

/// Write and flush `bytes` into the temp file at `temp_path`, removing it if either step fails.
async fn fill_temp_file<W: AsyncWrite + Unpin>(
    mut writer: W,
    temp_path: &Path,
    bytes: &[u8],
) -> anyhow::Result<()> {
    let written: std::io::Result<()> = async {
        writer.write_all(bytes).await?;
        writer.flush().await
    }
    .await;
    drop(writer);

    if let Err(err) = written {
        let _ = fs::remove_file(temp_path).await;
        return Err(err).with_context(|| format!("writing temp page file {}", temp_path.display()));
    }
    Ok(())
}

pub async fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Two-space indented JSON; non-ASCII text is written as-is rather than escaped.
pub async fn write_json_file<T: Serialize + ?Sized>(
    path: impl AsRef<Path>,
    value: &T,
) -> anyhow::Result<()> {
    let path = path.as_ref();
    let bytes = serde_json::to_vec_pretty(value)
        .with_context(|| format!("serializing {}", path.display()))?;
    fs::write(path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("building http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("navigating to {url}: {source}")]
    Navigation {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("no page has been loaded in this context")]
    NoPage,
}

/// Shared handle that hands out isolated browsing contexts.
///
/// One renderer serves a whole run; concurrent tasks each open their own context.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn new_context(&self) -> Result<Box<dyn BrowsingContext>, RenderError>;
}

/// A single page inside its own cookie/storage jar.
#[async_trait]
pub trait BrowsingContext: Send + Sync {
    async fn goto(&mut self, url: &str) -> Result<(), RenderError>;

    /// Markup of the page most recently loaded with [`BrowsingContext::goto`].
    async fn content(&self) -> Result<String, RenderError>;

    async fn close(&mut self) -> Result<(), RenderError>;
}

/// Navigate a context to `url` and return the resulting markup.
pub async fn render_in_context(
    context: &mut dyn BrowsingContext,
    url: &str,
) -> Result<String, RenderError> {
    context.goto(url).await?;
    context.content().await
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: Some("storefront-harvest/0.1".to_string()),
        }
    }
}

impl HttpClientConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout: std::env::var("HARVEST_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            user_agent: std::env::var("HARVEST_USER_AGENT")
                .ok()
                .or(defaults.user_agent),
        }
    }
}

/// Renderer backed by plain HTTP. Every context gets a fresh client with its own cookie store.
#[derive(Debug, Clone)]
pub struct HttpRenderer {
    config: HttpClientConfig,
}

impl HttpRenderer {
    pub fn new(config: HttpClientConfig) -> Self {
        Self { config }
    }

    fn build_client(&self) -> Result<reqwest::Client, RenderError> {
        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .timeout(self.config.timeout);

        if let Some(user_agent) = &self.config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        builder.build().map_err(RenderError::Client)
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn new_context(&self) -> Result<Box<dyn BrowsingContext>, RenderError> {
        Ok(Box::new(HttpContext {
            client: self.build_client()?,
            page: None,
        }))
    }
}

#[derive(Debug)]
pub struct HttpContext {
    client: reqwest::Client,
    page: Option<String>,
}

#[async_trait]
impl BrowsingContext for HttpContext {
    async fn goto(&mut self, url: &str) -> Result<(), RenderError> {
        let span = info_span!("render", url);
        async {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|source| RenderError::Navigation {
                    url: url.to_string(),
                    source,
                })?;

            let status = resp.status();
            if !status.is_success() {
                return Err(RenderError::HttpStatus {
                    status: status.as_u16(),
                    url: resp.url().to_string(),
                });
            }

            let body = resp.text().await.map_err(|source| RenderError::Navigation {
                url: url.to_string(),
                source,
            })?;
            debug!(bytes = body.len(), "page loaded");
            self.page = Some(body);
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn content(&self) -> Result<String, RenderError> {
        self.page.clone().ok_or(RenderError::NoPage)
    }

    async fn close(&mut self) -> Result<(), RenderError> {
        self.page = None;
        Ok(())
    }
}
