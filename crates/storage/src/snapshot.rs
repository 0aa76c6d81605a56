use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use shared::domain::{Item, ItemId};

/// Durable home of the full item collection. Every save replaces the
/// previous snapshot wholesale.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self) -> Result<Vec<Item>>;
    async fn save(&self, items: Vec<Item>) -> Result<()>;
    fn describe(&self) -> String;
}

/// JSON file holding `[[id, item], ...]` map entries.
///
/// Each save is encoded, written to a sibling temp file and renamed over the
/// target inside one blocking task, so a caller that stops waiting never
/// leaves half of a save running. Saves are ticketed in call order and a
/// save never replaces content written by a later one.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
    writes: Arc<WriteOrder>,
}

#[derive(Debug, Default)]
struct WriteOrder {
    issued: AtomicU64,
    // Ticket of the newest snapshot on disk; locked for the whole write.
    committed: Mutex<u64>,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writes: Arc::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self) -> Result<Vec<Item>> {
        let raw = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("failed to read item snapshot '{}'", self.path.display()))?;
        let items = tokio::task::spawn_blocking(move || decode_entries(&raw))
            .await
            .context("snapshot decode task failed")??;
        Ok(items)
    }

    async fn save(&self, items: Vec<Item>) -> Result<()> {
        let ticket = self.writes.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.path.clone();
        let writes = Arc::clone(&self.writes);
        tokio::task::spawn_blocking(move || write_snapshot(&path, &items, ticket, &writes))
            .await
            .context("snapshot write task failed")?
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

fn write_snapshot(path: &Path, items: &[Item], ticket: u64, writes: &WriteOrder) -> Result<()> {
    let encoded = encode_entries(items)?;

    let mut committed = writes
        .committed
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if *committed > ticket {
        return Ok(());
    }

    ensure_parent_dir_exists(path)?;
    let temp_path = temp_path(path);
    fs::write(&temp_path, encoded)
        .with_context(|| format!("failed to write '{}'", temp_path.display()))?;
    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "failed to move '{}' over '{}'",
            temp_path.display(),
            path.display()
        )
    })?;
    *committed = ticket;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "items.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

pub fn encode_entries(items: &[Item]) -> Result<Vec<u8>> {
    let entries: Vec<(&ItemId, &Item)> = items.iter().map(|item| (&item.id, item)).collect();
    serde_json::to_vec(&entries).context("failed to encode item snapshot")
}

/// Entry keys are ignored; items are re-keyed by their own `id`.
pub fn decode_entries(raw: &[u8]) -> Result<Vec<Item>> {
    let entries: Vec<(String, Item)> =
        serde_json::from_slice(raw).context("item snapshot is not valid JSON entries")?;
    Ok(entries.into_iter().map(|(_, item)| item).collect())
}

fn ensure_parent_dir_exists(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for item snapshot '{}'",
            parent.display(),
            path.display()
        )
    })?;

    Ok(())
}

/// In-memory snapshot target for tests and dry runs.
#[derive(Default)]
pub struct MemorySnapshotStore {
    saved: Mutex<Option<Vec<Item>>>,
    save_count: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    simulate_write_error: AtomicBool,
    save_delay: Option<Duration>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<Item>) -> Self {
        Self {
            saved: Mutex::new(Some(items)),
            ..Self::default()
        }
    }

    /// Every save sleeps this long before completing.
    pub fn with_save_delay(delay: Duration) -> Self {
        Self {
            save_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn set_simulate_write_error(&self, simulate: bool) {
        self.simulate_write_error.store(simulate, Ordering::SeqCst);
    }

    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn saved(&self) -> Option<Vec<Item>> {
        self.saved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> Result<Vec<Item>> {
        self.saved()
            .ok_or_else(|| anyhow!("no snapshot has been saved"))
    }

    async fn save(&self, items: Vec<Item>) -> Result<()> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        if let Some(delay) = self.save_delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = if self.simulate_write_error.load(Ordering::SeqCst) {
            Err(anyhow!("simulated write error"))
        } else {
            *self
                .saved
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(items);
            self.save_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
#[path = "tests/snapshot_tests.rs"]
mod tests;
