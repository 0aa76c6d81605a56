use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use shared::{
    domain::{Item, ItemId, ItemUpdate, ReorderStrategy},
    error::StoreError,
    protocol::ItemPage,
};
use thiserror::Error;
use tokio::sync::{watch, RwLock};

/// In-memory ordered collection shared by every request handler.
///
/// Items live in a map keyed by id; a `(position, id)` index keeps the total
/// order so pages are served without re-sorting. Every successful mutation
/// bumps a revision counter that persistence subscribes to.
#[derive(Clone)]
pub struct OrderedStore {
    shared: Arc<Shared>,
}

struct Shared {
    state: RwLock<StoreState>,
    revision: watch::Sender<u64>,
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<ItemId, Entry>,
    order: BTreeSet<(i64, ItemId)>,
}

struct Entry {
    item: Item,
    name_lower: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionViolation {
    #[error("position {position} of item {id} is outside 1..={len}")]
    OutOfRange { id: ItemId, position: i64, len: usize },
    #[error("position {position} is held by more than one item")]
    Duplicate { position: i64 },
}

/// Result of [`OrderedStore::apply_batch`]: how many updates matched a known
/// item, and the first position violation left behind, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub applied: usize,
    pub violation: Option<PositionViolation>,
}

impl OrderedStore {
    pub fn generate(count: usize) -> Self {
        let mut state = StoreState {
            entries: HashMap::with_capacity(count),
            order: BTreeSet::new(),
        };
        for index in 1..=count {
            state.insert(Item::synthetic(index));
        }
        Self::from_state(state)
    }

    pub fn from_items(items: Vec<Item>) -> Result<Self, StoreError> {
        let mut state = StoreState {
            entries: HashMap::with_capacity(items.len()),
            order: BTreeSet::new(),
        };
        for item in items {
            if state.entries.contains_key(&item.id) {
                return Err(StoreError::MalformedInput(format!(
                    "duplicate item id {}",
                    item.id
                )));
            }
            state.insert(item);
        }
        Ok(Self::from_state(state))
    }

    fn from_state(state: StoreState) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(state),
                revision,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.shared.revision.borrow()
    }

    // Callers hold the write guard so a snapshot never pairs old items with
    // a new revision.
    fn touch(&self) {
        self.shared.revision.send_modify(|revision| *revision += 1);
    }

    pub async fn len(&self) -> usize {
        self.shared.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn selected_count(&self) -> usize {
        let state = self.shared.state.read().await;
        state
            .entries
            .values()
            .filter(|entry| entry.item.selected)
            .count()
    }

    pub async fn get(&self, id: &ItemId) -> Option<Item> {
        let state = self.shared.state.read().await;
        state.entries.get(id).map(|entry| entry.item.clone())
    }

    /// All items in position order.
    pub async fn snapshot(&self) -> Vec<Item> {
        self.snapshot_with_revision().await.1
    }

    pub(crate) async fn snapshot_with_revision(&self) -> (u64, Vec<Item>) {
        let state = self.shared.state.read().await;
        let items: Vec<Item> = state.ordered().cloned().collect();
        (self.revision(), items)
    }

    /// Case-insensitive substring search over names, in position order,
    /// sliced to `[offset, offset + limit)`. `total` counts every match.
    pub async fn query(&self, search: &str, offset: usize, limit: usize) -> ItemPage {
        let needle = search.to_lowercase();
        let state = self.shared.state.read().await;

        if needle.is_empty() {
            return ItemPage {
                items: state.ordered().skip(offset).take(limit).cloned().collect(),
                total: state.entries.len(),
            };
        }

        let mut items = Vec::new();
        let mut total = 0;
        for (_, id) in &state.order {
            let Some(entry) = state.entries.get(id) else {
                continue;
            };
            if !entry.name_lower.contains(&needle) {
                continue;
            }
            if total >= offset && items.len() < limit {
                items.push(entry.item.clone());
            }
            total += 1;
        }
        ItemPage { items, total }
    }

    pub async fn set_selected(&self, id: &ItemId, selected: bool) -> Result<(), StoreError> {
        let mut state = self.shared.state.write().await;
        let entry = state
            .entries
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        entry.item.selected = selected;
        self.touch();
        Ok(())
    }

    pub async fn reorder(
        &self,
        id: &ItemId,
        target: &ItemId,
        strategy: ReorderStrategy,
    ) -> Result<(), StoreError> {
        if id == target {
            return Err(StoreError::InvalidReference(format!(
                "item {id} cannot be reordered relative to itself"
            )));
        }

        let mut state = self.shared.state.write().await;
        let source_position = state
            .position_of(id)
            .ok_or_else(|| StoreError::InvalidReference(format!("unknown item {id}")))?;
        let target_position = state
            .position_of(target)
            .ok_or_else(|| StoreError::InvalidReference(format!("unknown item {target}")))?;

        match strategy {
            ReorderStrategy::Swap => {
                state.set_position(id, target_position);
                state.set_position(target, source_position);
            }
            ReorderStrategy::MoveBefore => state.move_before(id, source_position, target),
        }
        self.touch();
        Ok(())
    }

    /// Overwrites position and selection for every known id, in input order.
    /// Unknown ids are skipped. The resulting positions are accepted as-is;
    /// any violation they cause is reported in the outcome.
    pub async fn apply_batch(&self, updates: &[ItemUpdate]) -> BatchOutcome {
        let mut state = self.shared.state.write().await;
        let mut applied = 0;
        for update in updates {
            let Some(entry) = state.entries.get_mut(&update.id) else {
                continue;
            };
            entry.item.selected = update.selected;
            state.set_position(&update.id, update.position);
            applied += 1;
        }
        if applied == 0 {
            return BatchOutcome::default();
        }
        self.touch();
        BatchOutcome {
            applied,
            violation: state.check_positions().err(),
        }
    }

    pub async fn verify_positions(&self) -> Result<(), PositionViolation> {
        self.shared.state.read().await.check_positions()
    }
}

impl StoreState {
    fn check_positions(&self) -> Result<(), PositionViolation> {
        let len = self.order.len();
        let mut previous = None;
        for (position, id) in &self.order {
            if *position < 1 || *position > len as i64 {
                return Err(PositionViolation::OutOfRange {
                    id: id.clone(),
                    position: *position,
                    len,
                });
            }
            if previous == Some(*position) {
                return Err(PositionViolation::Duplicate {
                    position: *position,
                });
            }
            previous = Some(*position);
        }
        Ok(())
    }

    fn insert(&mut self, item: Item) {
        self.order.insert((item.position, item.id.clone()));
        let name_lower = item.name.to_lowercase();
        self.entries
            .insert(item.id.clone(), Entry { item, name_lower });
    }

    fn ordered(&self) -> impl Iterator<Item = &Item> + '_ {
        self.order
            .iter()
            .filter_map(|(_, id)| self.entries.get(id).map(|entry| &entry.item))
    }

    fn position_of(&self, id: &ItemId) -> Option<i64> {
        self.entries.get(id).map(|entry| entry.item.position)
    }

    fn set_position(&mut self, id: &ItemId, position: i64) {
        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };
        if entry.item.position == position {
            return;
        }
        self.order.remove(&(entry.item.position, id.clone()));
        self.order.insert((position, id.clone()));
        entry.item.position = position;
    }

    fn move_before(&mut self, source: &ItemId, source_position: i64, target: &ItemId) {
        let mut changes = Vec::new();
        let mut next = 1;
        for (position, id) in &self.order {
            if id == source {
                continue;
            }
            if id == target {
                if source_position != next {
                    changes.push((source.clone(), next));
                }
                next += 1;
            }
            if *position != next {
                changes.push((id.clone(), next));
            }
            next += 1;
        }
        for (id, position) in changes {
            self.set_position(&id, position);
        }
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
