use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::warn;

use crate::config::Settings;

/// Ordered, finite list of landing page URLs, polled once per run.
pub trait SeedSource: Send + Sync {
    fn seeds(&self) -> Result<Vec<String>>;
}

/// Fixed list, typically straight from configuration.
pub struct StaticSeeds(Vec<String>);

impl StaticSeeds {
    pub fn new(urls: Vec<String>) -> Self {
        Self(urls)
    }
}

impl SeedSource for StaticSeeds {
    fn seeds(&self) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// One URL per line; blank lines and `#` comments are skipped. Re-read every run.
pub struct FileSeeds {
    path: PathBuf,
}

impl FileSeeds {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SeedSource for FileSeeds {
    fn seeds(&self) -> Result<Vec<String>> {
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read seeds file {}", self.path.display()))?;
        Ok(parse_seed_lines(&text))
    }
}

fn parse_seed_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter(|l| {
            let ok = l.starts_with("http://") || l.starts_with("https://");
            if !ok {
                warn!(line = %l, "Skipping seed that is not an http(s) URL");
            }
            ok
        })
        .map(str::to_string)
        .collect()
}

pub fn from_settings(settings: &Settings) -> Box<dyn SeedSource> {
    match &settings.seeds_file {
        Some(path) => Box::new(FileSeeds::new(path)),
        None => Box::new(StaticSeeds::new(settings.seeds.clone())),
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_file_keeps_order_and_skips_noise() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seeds.txt");
        std::fs::write(
            &path,
            "# weekly menus\nhttps://a.example/menu\n\n  https://b.example/menu  \nnot a url\n",
        )
        .unwrap();

        let seeds = FileSeeds::new(&path).seeds().unwrap();
        assert_eq!(seeds, vec!["https://a.example/menu", "https://b.example/menu"]);
    }

    #[test]
    fn missing_seed_file_is_reported() {
        assert!(FileSeeds::new("/definitely/not/here.txt").seeds().is_err());
    }
}
