use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "harvester.toml";
const ENV_PREFIX: &str = "HARVEST";

const DEFAULT_SEEDS: &[&str] = &[
    "https://expz.menu/edf7ccc5-db00-45f1-b425-e3d1e5ff556a",
    "https://expz.menu/a10b7226-4923-4fdf-853a-ab10e7886871",
    "https://expz.menu/6f72f6db-e19b-42a9-94f2-3de5b4680ed0",
    "https://expz.menu/dcb797dd-7b3e-4120-b4a4-f874d23390ff",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub seeds: Vec<String>,
    /// When set, seeds are re-read from this file on every run instead of `seeds`.
    pub seeds_file: Option<PathBuf>,
    pub schedule: ScheduleSettings,
    pub pipeline: PipelineSettings,
    pub fetcher: FetcherSettings,
    pub page: PageStructure,
    pub sink: SinkSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            seeds: DEFAULT_SEEDS.iter().map(|s| s.to_string()).collect(),
            seeds_file: None,
            schedule: ScheduleSettings::default(),
            pipeline: PipelineSettings::default(),
            fetcher: FetcherSettings::default(),
            page: PageStructure::default(),
            sink: SinkSettings::default(),
        }
    }
}

impl Settings {
    /// Where this run's seeds come from, for status lines.
    pub fn seed_summary(&self) -> String {
        match &self.seeds_file {
            Some(path) => format!("seeds from {}", path.display()),
            None => format!("{} seeds", self.seeds.len()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub interval_secs: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self { interval_secs: 180 }
    }
}

impl ScheduleSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub buffer_capacity: usize,
    /// Overrides the CPU-derived parse pool size.
    pub parse_workers: Option<usize>,
    /// Overrides the CPU-derived export pool size.
    pub export_workers: Option<usize>,
    pub shutdown_grace_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: 64,
            parse_workers: None,
            export_workers: None,
            shutdown_grace_secs: 10,
        }
    }
}

impl PipelineSettings {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    Browser,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetcherSettings {
    pub mode: FetchMode,
    pub load_timeout_secs: u64,
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            mode: FetchMode::Browser,
            load_timeout_secs: 20,
            headless: true,
            chrome_executable: None,
            extra_args: Vec::new(),
        }
    }
}

impl FetcherSettings {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs.max(1))
    }
}

/// CSS selectors describing the upstream menu pages.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PageStructure {
    pub restaurant_title: String,
    pub category_link: String,
    pub dish_block: String,
    pub sub_category_header: String,
    pub dish_name: String,
    pub dish_description: String,
    pub dish_price: String,
}

impl Default for PageStructure {
    fn default() -> Self {
        Self {
            restaurant_title: "h2.title".into(),
            category_link: "a.main-menu-item".into(),
            dish_block: "div.menu-list-item".into(),
            sub_category_header: "h2.dish-list--title".into(),
            dish_name: "h4.item-title".into(),
            dish_description: "div.item-description p".into(),
            dish_price: "div.price".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    pub kind: SinkKind,
    pub path: PathBuf,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            kind: SinkKind::Sqlite,
            path: PathBuf::from("data/menus.sqlite"),
        }
    }
}

/// Layer defaults, the optional TOML file and `HARVEST_*` environment variables.
pub fn load(path: Option<&Path>) -> Result<Settings> {
    let (file, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };

    let settings = Config::builder()
        .add_source(File::from(file.as_path()).required(required))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("seeds")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to read configuration from {}", file.display()))?;

    settings
        .try_deserialize()
        .context("Invalid harvester configuration")
}

// ── Tests ──
