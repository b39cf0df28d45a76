//! Detail pages: one isolated context per identifier, at most N in flight.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use harvest_core::{app_detail_file_name, app_detail_url, AppId, Settings, DETAIL_CONCURRENCY};
use harvest_storage::{read_json_file, render_in_context, PageStore, Renderer};
use tokio::sync::Semaphore;
use tracing::{error, info, info_span, Instrument};

use crate::{DetailFailure, DetailsSummary};

/// Read `ids.json` and download every listed app's detail page into `app_detail_dir`.
pub async fn run_detail_fetch(
    settings: &Settings,
    renderer: &dyn Renderer,
) -> Result<DetailsSummary> {
    let store = PageStore::new(settings.app_detail_dir());
    store.ensure_root().await?;
    let ids: Vec<AppId> = read_json_file(settings.ids_file()).await?;
    Ok(fetch_detail_pages(renderer, &store, &ids, DETAIL_CONCURRENCY).await)
}

/// Render and save every identifier's detail page with at most `concurrency` renders active.
///
/// Every identifier is scheduled; the ones beyond the ceiling wait for a permit. A failed
/// identifier is logged and recorded in the summary without disturbing the others, and
/// the call only returns once each identifier has either been saved or has failed.
pub async fn fetch_detail_pages(
    renderer: &dyn Renderer,
    store: &PageStore,
    ids: &[AppId],
    concurrency: usize,
) -> DetailsSummary {
    let started_at = Utc::now();
    let gate = Semaphore::new(concurrency.max(1));
    let total = ids.len();

    let units = ids.iter().enumerate().map(|(i, app_id)| {
        let span = info_span!("app_detail", app_id = app_id.as_str(), index = i + 1);
        fetch_one(&gate, renderer, store, app_id, i + 1, total).instrument(span)
    });
    let outcomes = join_all(units).await;

    let mut saved = Vec::new();
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(path) => saved.push(path),
            Err(failure) => failures.push(failure),
        }
    }

    info!("All app pages downloaded.");
    info!(
        total,
        succeeded = saved.len(),
        failed = failures.len(),
        "detail fetch finished"
    );

    DetailsSummary {
        started_at,
        finished_at: Utc::now(),
        total,
        succeeded: saved.len(),
        saved,
        failures,
        output_dir: store.root().display().to_string(),
    }
}

async fn fetch_one(
    gate: &Semaphore,
    renderer: &dyn Renderer,
    store: &PageStore,
    app_id: &str,
    index: usize,
    total: usize,
) -> Result<PathBuf, DetailFailure> {
    let url = app_detail_url(app_id);
    info!("({index}/{total}) Loading app: {url}");

    match render_and_save(gate, renderer, store, app_id, &url).await {
        Ok(path) => {
            info!("({index}/{total}) Saved to {}", path.display());
            Ok(path)
        }
        Err(err) => {
            error!("({index}/{total}) Failed to fetch {url}: {err:#}");
            Err(DetailFailure {
                app_id: app_id.to_string(),
                url,
                error: format!("{err:#}"),
            })
        }
    }
}

/// Everything that happens while holding an admission permit.
///
/// The permit guard lives until this function returns, so the slot is given back on
/// every path, and only after the browsing context has been closed.
async fn render_and_save(
    gate: &Semaphore,
    renderer: &dyn Renderer,
    store: &PageStore,
    app_id: &str,
    url: &str,
) -> Result<PathBuf> {
    let _permit = gate.acquire().await.context("admission gate closed")?;

    let mut context = renderer
        .new_context()
        .await
        .context("opening browsing context")?;
    let rendered = render_in_context(context.as_mut(), url).await;
    let closed = context.close().await;
    let markup = rendered?;
    closed.context("closing browsing context")?;

    store.write_page(&app_detail_file_name(app_id), &markup).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CapturedLogs, FakeRenderer};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    fn ids(values: &[&str]) -> Vec<AppId> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn failed_identifier_does_not_affect_the_others() {
        let dir = tempdir().expect("tempdir");
        let store = PageStore::new(dir.path().join("details"));
        let renderer = FakeRenderer::new().failing_on(&app_detail_url("a2"));

        let summary =
            fetch_detail_pages(&renderer, &store, &ids(&["a1", "a2", "a3"]), 2).await;

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].app_id, "a2");
        assert!(summary.failures[0].url.ends_with("/store/app/a2"));
        assert!(summary.failures[0].error.contains("a2"));

        assert!(store.path_for("a1.html").exists());
        assert!(!store.path_for("a2.html").exists());
        assert!(store.path_for("a3.html").exists());

        let stats = renderer.stats();
        assert_eq!(stats.opened(), 3);
        assert_eq!(stats.closed(), 3);
    }

    #[tokio::test]
    async fn progress_lines_carry_index_and_url() {
        let logs = CapturedLogs::default();
        let _guard = tracing::subscriber::set_default(logs.subscriber());
        let dir = tempdir().expect("tempdir");
        let store = PageStore::new(dir.path().join("details"));
        let renderer = FakeRenderer::new().failing_on(&app_detail_url("a2"));

        fetch_detail_pages(&renderer, &store, &ids(&["a1", "a2", "a3"]), 2).await;

        let lines = logs.lines();
        let logged = |needle: &str| lines.iter().any(|line| line.contains(needle));
        assert!(logged(&format!("(2/3) Loading app: {}", app_detail_url("a2"))));
        assert!(logged("(1/3) Saved to"));
        assert!(logged("(3/3) Saved to"));
        assert!(!logged("(2/3) Saved to"));
        let failed = format!("(2/3) Failed to fetch {}", app_detail_url("a2"));
        assert!(lines
            .iter()
            .any(|line| line.contains("ERROR") && line.contains(&failed)));
    }

    #[tokio::test]
    async fn never_more_renders_in_flight_than_the_ceiling() {
        let dir = tempdir().expect("tempdir");
        let store = PageStore::new(dir.path().join("details"));
        let renderer = FakeRenderer::new().with_delay(Duration::from_millis(15));
        let all: Vec<AppId> = (0..12).map(|i| format!("app{i}")).collect();

        let summary = fetch_detail_pages(&renderer, &store, &all, 3).await;

        assert_eq!(summary.succeeded, 12);
        assert_eq!(renderer.stats().peak(), 3);
        assert_eq!(renderer.stats().active(), 0);
        for app_id in &all {
            assert!(store.path_for(&format!("{app_id}.html")).exists());
        }
    }

    #[tokio::test]
    async fn ceiling_of_one_serializes_renders() {
        let dir = tempdir().expect("tempdir");
        let store = PageStore::new(dir.path().join("details"));
        let renderer = FakeRenderer::new().with_delay(Duration::from_millis(5));

        let summary = fetch_detail_pages(&renderer, &store, &ids(&["a", "b", "c", "d"]), 1).await;

        assert_eq!(summary.succeeded, 4);
        assert_eq!(renderer.stats().peak(), 1);
    }

    #[tokio::test]
    async fn zero_ceiling_is_treated_as_one() {
        let dir = tempdir().expect("tempdir");
        let store = PageStore::new(dir.path().join("details"));
        let renderer = FakeRenderer::new();

        let summary = fetch_detail_pages(&renderer, &store, &ids(&["a", "b"]), 0).await;

        assert_eq!(summary.succeeded, 2);
        assert_eq!(renderer.stats().peak(), 1);
    }

    #[tokio::test]
    async fn every_context_is_closed_even_when_all_fail() {
        let dir = tempdir().expect("tempdir");
        let store = PageStore::new(dir.path().join("details"));
        let renderer = FakeRenderer::new()
            .failing_on(&app_detail_url("x"))
            .failing_on(&app_detail_url("y"));

        let summary = fetch_detail_pages(&renderer, &store, &ids(&["x", "y"]), 4).await;

        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failures.len(), 2);
        assert_eq!(renderer.stats().opened(), renderer.stats().closed());
    }

    #[tokio::test]
    async fn rerun_overwrites_without_duplicates() {
        let dir = tempdir().expect("tempdir");
        let store = PageStore::new(dir.path().join("details"));
        let renderer = FakeRenderer::new();
        let list = ids(&["a1", "a2"]);

        fetch_detail_pages(&renderer, &store, &list, 2).await;
        fetch_detail_pages(&renderer, &store, &list, 2).await;

        let mut names: Vec<String> = std::fs::read_dir(store.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a1.html".to_string(), "a2.html".to_string()]);
    }

    #[tokio::test]
    async fn empty_identifier_list_completes_immediately() {
        let dir = tempdir().expect("tempdir");
        let store = PageStore::new(dir.path().join("details"));
        let renderer = FakeRenderer::new();

        let summary = fetch_detail_pages(&renderer, &store, &[], 10).await;

        assert_eq!(summary.total, 0);
        assert_eq!(renderer.stats().opened(), 0);
    }

    #[tokio::test]
    async fn stage_reads_identifier_list_from_disk() {
        let dir = tempdir().expect("tempdir");
        let ids_path = dir.path().join("ids.json");
        std::fs::write(&ids_path, r#"["a1", "a3"]"#).unwrap();
        let settings = Settings::from_value(json!({
            "app_detail_dir": dir.path().join("details"),
        }))
        .unwrap()
        .with_ids_file(&ids_path);
        let renderer = FakeRenderer::new();

        let summary = run_detail_fetch(&settings, &renderer).await.unwrap();

        assert_eq!(summary.succeeded, 2);
        assert!(dir.path().join("details/a1.html").exists());
        assert!(dir.path().join("details/a3.html").exists());
    }

    #[tokio::test]
    async fn stage_without_identifier_list_is_fatal() {
        let dir = tempdir().expect("tempdir");
        let settings = Settings::from_value(json!({
            "app_detail_dir": dir.path().join("details"),
        }))
        .unwrap()
        .with_ids_file(dir.path().join("ids.json"));
        let renderer = FakeRenderer::new();

        let err = run_detail_fetch(&settings, &renderer).await.unwrap_err();
        assert!(format!("{err:#}").contains("ids.json"));
        assert_eq!(renderer.stats().opened(), 0);
    }
}
