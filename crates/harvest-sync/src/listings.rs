//! Offline stages: listing records out of saved pages, identifiers out of listing records.

use anyhow::Result;
use chrono::Utc;
use harvest_core::{ListingRecord, Settings};
use harvest_extract::{harvest_ids, ListingExtractor};
use harvest_storage::{read_json_file, write_json_file};
use tracing::info;

use crate::{ExtractionSummary, IdsSummary};

/// Scan `html_output_dir` and write every embedded listing to `app_data_file`.
pub async fn run_listing_extraction(settings: &Settings) -> Result<ExtractionSummary> {
    let input_dir = settings.html_output_dir()?;
    let output_file = settings.app_data_file()?;
    let started_at = Utc::now();

    let extractor = ListingExtractor::new()?;
    let scan = extractor.extract_from_dir(input_dir)?;

    write_json_file(output_file, &scan.records).await?;
    info!(
        "Extracted {} apps and saved to '{}'",
        scan.records.len(),
        output_file.display()
    );

    Ok(ExtractionSummary {
        started_at,
        finished_at: Utc::now(),
        files_scanned: scan.files.len(),
        files_failed: scan.failed_files(),
        records: scan.records.len(),
        output_file: output_file.display().to_string(),
    })
}

/// Read `app_data_file` and write the `id` of each record to the identifier list.
pub async fn run_id_harvest(settings: &Settings) -> Result<IdsSummary> {
    let source = settings.app_data_file()?;
    info!("Reading from: {}", source.display());

    let records: Vec<ListingRecord> = read_json_file(source).await?;
    let ids = harvest_ids(&records);

    let output_file = settings.ids_file();
    write_json_file(output_file, &ids).await?;
    info!(
        "Extracted {} IDs and saved to '{}'",
        ids.len(),
        output_file.display()
    );

    Ok(IdsSummary {
        records_read: records.len(),
        ids_written: ids.len(),
        source_file: source.display().to_string(),
        output_file: output_file.display().to_string(),
    })
}
