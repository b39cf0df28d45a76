//! Listing extraction from saved storefront markup, plus identifier harvesting.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use harvest_core::ListingRecord;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};

mod ids;
mod relaxed;

pub use ids::harvest_ids;
pub use relaxed::{normalize_relaxed_json, parse_relaxed_object, RelaxedJsonError};

pub const CRATE_NAME: &str = "harvest-extract";

/// Text that identifies the bootstrap script carrying the page data.
pub const PAGE_DATA_MARKER: &str = "component.pageData =";

const PAGE_DATA_PATTERN: &str = r"(?s)component\.pageData\s*=\s*(\{.*?\});";
const MODULE_SCRIPT_SELECTOR: &str = r#"script[type="module"]"#;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("{0}")]
    Message(String),
    #[error("reading markup: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    PageData(#[from] RelaxedJsonError),
}

/// Per-file outcome of a directory scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileListings {
    pub path: PathBuf,
    pub records: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DirectoryListings {
    pub records: Vec<ListingRecord>,
    pub files: Vec<FileListings>,
}

impl DirectoryListings {
    pub fn failed_files(&self) -> usize {
        self.files.iter().filter(|f| f.error.is_some()).count()
    }
}

/// Pulls `apps.listings` out of the `component.pageData` assignment in module scripts.
#[derive(Debug)]
pub struct ListingExtractor {
    module_scripts: Selector,
    page_data: Regex,
}

impl ListingExtractor {
    pub fn new() -> Result<Self, ExtractError> {
        let module_scripts = Selector::parse(MODULE_SCRIPT_SELECTOR)
            .map_err(|e| ExtractError::Message(e.to_string()))?;
        let page_data =
            Regex::new(PAGE_DATA_PATTERN).map_err(|e| ExtractError::Message(e.to_string()))?;
        Ok(Self {
            module_scripts,
            page_data,
        })
    }

    /// Listings embedded in one document.
    ///
    /// Module scripts carrying the marker are tried in document order and the first
    /// one that decodes wins. A document without such a script yields no records; a
    /// document whose every candidate fails to decode yields the last decode error.
    pub fn extract_from_html(&self, html: &str) -> Result<Vec<ListingRecord>, ExtractError> {
        let document = Html::parse_document(html);
        let mut last_error = None;

        for script in document.select(&self.module_scripts) {
            let text = script.text().collect::<String>();
            if !text.contains(PAGE_DATA_MARKER) {
                continue;
            }
            let Some(captures) = self.page_data.captures(&text) else {
                continue;
            };
            match parse_relaxed_object(&captures[1]) {
                Ok(page_data) => return Ok(listings_from_page_data(page_data)),
                Err(err) => last_error = Some(err),
            }
        }

        match last_error {
            Some(err) => Err(err.into()),
            None => Ok(Vec::new()),
        }
    }

    /// Concatenate the listings of every `.html` file directly inside `dir`.
    ///
    /// Files are visited in file-name order. A file that cannot be read or decoded is
    /// logged and contributes nothing; only a missing directory is an error.
    pub fn extract_from_dir(&self, dir: &Path) -> anyhow::Result<DirectoryListings> {
        if !dir.is_dir() {
            bail!("Folder not found: '{}'", dir.display());
        }

        let mut out = DirectoryListings::default();
        for path in listing_html_files(dir)? {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            info!("Processing {name}");

            let extracted = std::fs::read_to_string(&path)
                .map_err(ExtractError::from)
                .and_then(|html| self.extract_from_html(&html));
            match extracted {
                Ok(records) => {
                    out.files.push(FileListings {
                        path,
                        records: records.len(),
                        error: None,
                    });
                    out.records.extend(records);
                }
                Err(err) => {
                    warn!("Failed to parse JSON in {}: {err}", path.display());
                    out.files.push(FileListings {
                        path,
                        records: 0,
                        error: Some(err.to_string()),
                    });
                }
            }
        }
        Ok(out)
    }
}

fn listings_from_page_data(mut page_data: ListingRecord) -> Vec<ListingRecord> {
    let Some(JsonValue::Object(mut apps)) = page_data.remove("apps") else {
        return Vec::new();
    };
    let Some(JsonValue::Array(listings)) = apps.remove("listings") else {
        return Vec::new();
    };
    listings
        .into_iter()
        .filter_map(|entry| match entry {
            JsonValue::Object(record) => Some(record),
            _ => None,
        })
        .collect()
}

/// Files in `dir` whose name ends in `.html`, any case, sorted by name. Symlinks are followed.
pub fn listing_html_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry.with_context(|| format!("reading entry in {}", dir.display()))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if name.ends_with(".html") && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
