//! Listing index pages, fetched one after another through a single context.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use harvest_core::{listing_page_file_name, listing_page_url, Settings};
use harvest_storage::{render_in_context, BrowsingContext, PageStore, Renderer};
use tracing::info;

use crate::PagesSummary;

/// Save listing pages `1..storemax_pages` into `html_output_dir`.
///
/// The upper bound is exclusive: a page count of 3 saves pages 1 and 2. Any failure stops
/// the loop and is returned; pages already saved stay on disk.
pub async fn fetch_listing_pages(
    settings: &Settings,
    renderer: &dyn Renderer,
) -> Result<PagesSummary> {
    let page_count = settings.page_count()?;
    let store = PageStore::new(settings.html_output_dir()?);
    store.ensure_root().await?;

    let started_at = Utc::now();
    let mut context = renderer
        .new_context()
        .await
        .context("opening browsing context")?;
    let fetched = save_pages_in_order(context.as_mut(), &store, page_count).await;
    let closed = context.close().await;
    let saved = fetched?;
    closed.context("closing browsing context")?;

    info!("Finished downloading all pages.");
    Ok(PagesSummary {
        started_at,
        finished_at: Utc::now(),
        pages_saved: saved.len(),
        saved,
        output_dir: store.root().display().to_string(),
    })
}

async fn save_pages_in_order(
    context: &mut dyn BrowsingContext,
    store: &PageStore,
    page_count: i64,
) -> Result<Vec<PathBuf>> {
    let mut saved = Vec::new();
    for page in 1..page_count {
        let url = listing_page_url(page);
        info!("Loading page {page}: {url}");

        let markup = render_in_context(context, &url)
            .await
            .with_context(|| format!("rendering listing page {page}"))?;
        let path = store.write_page(&listing_page_file_name(page), &markup).await?;

        info!("Saved page {page} to {}", path.display());
        saved.push(path);
    }
    Ok(saved)
}
