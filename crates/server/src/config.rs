use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;
use server_api::DEFAULT_MAX_PAGE_SIZE;
use shared::domain::ReorderStrategy;
use storage::{PersistenceOptions, DEFAULT_FLUSH_DELAY, DEFAULT_WRITE_TIMEOUT};
use tracing::warn;

pub const DEFAULT_DATA_FILE: &str = "./data/sorted_order.json";

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_bind: String,
    pub data_file: String,
    pub item_count: usize,
    pub flush_delay_ms: u64,
    pub flush_timeout_ms: u64,
    pub max_page_size: usize,
    pub reorder_strategy: ReorderStrategy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:3001".into(),
            data_file: DEFAULT_DATA_FILE.into(),
            item_count: 1_000_000,
            flush_delay_ms: DEFAULT_FLUSH_DELAY.as_millis() as u64,
            flush_timeout_ms: DEFAULT_WRITE_TIMEOUT.as_millis() as u64,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            reorder_strategy: ReorderStrategy::Swap,
        }
    }
}

impl Settings {
    pub fn persistence_options(&self) -> PersistenceOptions {
        PersistenceOptions {
            flush_delay: Duration::from_millis(self.flush_delay_ms),
            write_timeout: Duration::from_millis(self.flush_timeout_ms.max(1)),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    data_file: Option<String>,
    item_count: Option<usize>,
    flush_delay_ms: Option<u64>,
    flush_timeout_ms: Option<u64>,
    max_page_size: Option<usize>,
    reorder_strategy: Option<String>,
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        if let Err(error) = apply_file_settings(&mut settings, &raw) {
            warn!(error = %format!("{error:#}"), "ignoring unreadable server.toml");
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

pub fn apply_file_settings(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw).context("invalid server.toml")?;

    if let Some(v) = file_cfg.bind_addr {
        settings.server_bind = v;
    }
    if let Some(v) = file_cfg.data_file {
        settings.data_file = v;
    }
    if let Some(v) = file_cfg.item_count {
        settings.item_count = v;
    }
    if let Some(v) = file_cfg.flush_delay_ms {
        settings.flush_delay_ms = v;
    }
    if let Some(v) = file_cfg.flush_timeout_ms {
        settings.flush_timeout_ms = v;
    }
    if let Some(v) = file_cfg.max_page_size {
        settings.max_page_size = v;
    }
    if let Some(v) = file_cfg.reorder_strategy {
        settings.reorder_strategy = v
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("invalid reorder_strategy")?;
    }
    Ok(())
}

pub fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = lookup("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Some(v) = lookup("DATA_FILE") {
        settings.data_file = v;
    }
    if let Some(v) = lookup("APP__DATA_FILE") {
        settings.data_file = v;
    }

    if let Some(v) = parsed(&lookup, "APP__ITEM_COUNT") {
        settings.item_count = v;
    }
    if let Some(v) = parsed(&lookup, "APP__FLUSH_DELAY_MS") {
        settings.flush_delay_ms = v;
    }
    if let Some(v) = parsed(&lookup, "APP__FLUSH_TIMEOUT_MS") {
        settings.flush_timeout_ms = v;
    }
    if let Some(v) = parsed(&lookup, "APP__MAX_PAGE_SIZE") {
        settings.max_page_size = v;
    }
    if let Some(v) = parsed(&lookup, "APP__REORDER_STRATEGY") {
        settings.reorder_strategy = v;
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

pub fn prepare_data_file(raw_data_file: &str) -> anyhow::Result<PathBuf> {
    let path = normalize_data_file(raw_data_file);
    ensure_parent_dir_exists(&path)?;
    Ok(path)
}

fn normalize_data_file(raw_data_file: &str) -> PathBuf {
    let raw_data_file = raw_data_file.trim();

    if raw_data_file.is_empty() {
        return PathBuf::from(DEFAULT_DATA_FILE);
    }

    PathBuf::from(raw_data_file)
}

fn ensure_parent_dir_exists(path: &Path) -> anyhow::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for data file '{}'",
            parent.display(),
            path.display()
        )
    })?;

    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
