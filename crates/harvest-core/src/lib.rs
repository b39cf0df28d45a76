//! Settings, record types and storefront URL conventions shared by the harvest crates.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

pub const CRATE_NAME: &str = "harvest-core";

pub const STORE_BASE_URL: &str = "https://store.servicenow.com";
pub const SETTINGS_FILE: &str = "settings.json";
pub const SETTINGS_PATH_ENV: &str = "HARVEST_SETTINGS";
pub const IDS_FILE: &str = "ids.json";
pub const DEFAULT_APP_DETAIL_DIR: &str = "app_detail_pages";

/// Ceiling on detail pages rendered at the same time.
pub const DETAIL_CONCURRENCY: usize = 10;

/// One application's metadata as embedded in a storefront listing page.
///
/// Schemaless on purpose: whatever keys the storefront emits are carried through.
pub type ListingRecord = Map<String, JsonValue>;

/// Identifier of one application, taken from a listing record's `id` field.
pub type AppId = String;

pub fn listing_page_url(page: i64) -> String {
    format!("{STORE_BASE_URL}/store/apps?pg={page}")
}

pub fn app_detail_url(app_id: &str) -> String {
    format!("{STORE_BASE_URL}/store/app/{app_id}")
}

pub fn listing_page_file_name(page: i64) -> String {
    format!("pg{page}.html")
}

pub fn app_detail_file_name(app_id: &str) -> String {
    format!("{app_id}.html")
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("reading settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid settings document: {0}")]
    Invalid(#[from] serde_json::Error),
    #[error("the '{0}' setting is required")]
    Missing(&'static str),
    #[error("the 'storemax_pages' setting must be a valid integer (got {0})")]
    InvalidPageCount(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawSettings {
    #[serde(default)]
    app_detail_dir: Option<PathBuf>,
    #[serde(default)]
    html_output_dir: Option<PathBuf>,
    #[serde(default)]
    app_data_file: Option<PathBuf>,
    #[serde(default)]
    storemax_pages: Option<JsonValue>,
}

/// Process-wide configuration, loaded once and handed to every stage by reference.
///
/// Required keys are checked lazily by the accessor of the stage that needs them,
/// so `ids` can run against a settings document that has no page count.
#[derive(Debug, Clone)]
pub struct Settings {
    app_detail_dir: PathBuf,
    html_output_dir: Option<PathBuf>,
    app_data_file: Option<PathBuf>,
    storemax_pages: Option<JsonValue>,
    ids_file: PathBuf,
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawSettings = serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_raw(raw))
    }

    pub fn from_value(value: JsonValue) -> Result<Self, SettingsError> {
        let raw: RawSettings = serde_json::from_value(value)?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawSettings) -> Self {
        Self {
            app_detail_dir: raw
                .app_detail_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_APP_DETAIL_DIR)),
            html_output_dir: raw.html_output_dir,
            app_data_file: raw.app_data_file,
            storemax_pages: raw.storemax_pages,
            ids_file: PathBuf::from(IDS_FILE),
        }
    }

    /// Relocates the identifier list, which otherwise lives at `ids.json` in the working directory.
    pub fn with_ids_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ids_file = path.into();
        self
    }

    pub fn app_detail_dir(&self) -> &Path {
        &self.app_detail_dir
    }

    pub fn html_output_dir(&self) -> Result<&Path, SettingsError> {
        self.html_output_dir
            .as_deref()
            .ok_or(SettingsError::Missing("html_output_dir"))
    }

    pub fn app_data_file(&self) -> Result<&Path, SettingsError> {
        self.app_data_file
            .as_deref()
            .ok_or(SettingsError::Missing("app_data_file"))
    }

    pub fn ids_file(&self) -> &Path {
        &self.ids_file
    }

    /// Configured page count. Accepts a JSON integer, an integral float or a numeric string.
    pub fn page_count(&self) -> Result<i64, SettingsError> {
        let Some(raw) = &self.storemax_pages else {
            return Err(SettingsError::InvalidPageCount("nothing".to_string()));
        };
        let parsed = match raw {
            JsonValue::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
            JsonValue::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| SettingsError::InvalidPageCount(raw.to_string()))
    }

    /// Checks every key the full pipeline needs, before anything touches the network.
    pub fn validate_for_pipeline(&self) -> Result<(), SettingsError> {
        self.page_count()?;
        self.html_output_dir()?;
        self.app_data_file()?;
        Ok(())
    }
}

/// Settings path: `HARVEST_SETTINGS` when set, otherwise `settings.json` in the working directory.
pub fn settings_path_from_env() -> PathBuf {
    std::env::var(SETTINGS_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(SETTINGS_FILE))
}
