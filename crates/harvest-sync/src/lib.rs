//! Harvest pipeline orchestration: listing pages → listings → identifiers → detail pages.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use harvest_core::{settings_path_from_env, AppId, Settings};
use harvest_storage::{HttpClientConfig, HttpRenderer, Renderer};
use serde::Serialize;

mod details;
mod listings;
mod pages;
#[cfg(test)]
mod test_support;

pub use details::{fetch_detail_pages, run_detail_fetch};
pub use listings::{run_id_harvest, run_listing_extraction};
pub use pages::fetch_listing_pages;

pub const CRATE_NAME: &str = "harvest-sync";

#[derive(Debug, Clone, Serialize)]
pub struct PagesSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pages_saved: usize,
    pub saved: Vec<PathBuf>,
    pub output_dir: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files_scanned: usize,
    pub files_failed: usize,
    pub records: usize,
    pub output_file: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdsSummary {
    pub records_read: usize,
    pub ids_written: usize,
    pub source_file: String,
    pub output_file: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetailFailure {
    pub app_id: AppId,
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetailsSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub succeeded: usize,
    pub saved: Vec<PathBuf>,
    pub failures: Vec<DetailFailure>,
    pub output_dir: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub pages: PagesSummary,
    pub extraction: ExtractionSummary,
    pub ids: IdsSummary,
    pub details: DetailsSummary,
}

/// Settings plus the one renderer shared by every stage of a run.
pub struct HarvestPipeline {
    settings: Settings,
    renderer: Box<dyn Renderer>,
}

impl HarvestPipeline {
    pub fn new(settings: Settings, renderer: Box<dyn Renderer>) -> Self {
        Self { settings, renderer }
    }

    pub async fn fetch_pages(&self) -> Result<PagesSummary> {
        fetch_listing_pages(&self.settings, self.renderer.as_ref()).await
    }

    pub async fn extract_listings(&self) -> Result<ExtractionSummary> {
        run_listing_extraction(&self.settings).await
    }

    pub async fn harvest_ids(&self) -> Result<IdsSummary> {
        run_id_harvest(&self.settings).await
    }

    pub async fn fetch_details(&self) -> Result<DetailsSummary> {
        run_detail_fetch(&self.settings, self.renderer.as_ref()).await
    }

    /// Every stage in order. Settings for all stages are checked before the first request.
    pub async fn run_all(&self) -> Result<PipelineSummary> {
        self.settings.validate_for_pipeline()?;
        let pages = self.fetch_pages().await?;
        let extraction = self.extract_listings().await?;
        let ids = self.harvest_ids().await?;
        let details = self.fetch_details().await?;
        Ok(PipelineSummary {
            pages,
            extraction,
            ids,
            details,
        })
    }
}

/// Pipeline over the settings document named by the environment and an HTTP renderer.
pub fn pipeline_from_env() -> Result<HarvestPipeline> {
    let settings = Settings::load(settings_path_from_env())?;
    let renderer = HttpRenderer::new(HttpClientConfig::from_env());
    Ok(HarvestPipeline::new(settings, Box::new(renderer)))
}
