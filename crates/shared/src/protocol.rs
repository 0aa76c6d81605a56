use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Item, ItemId, ItemUpdate};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPage {
    pub items: Vec<Item>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectRequest {
    pub id: ItemId,
    pub selected: bool,
}

/// Drag-and-drop reorder. Older clients send `id1`/`id2`, newer ones
/// `draggedId`/`targetId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorderRequest {
    #[serde(alias = "draggedId", alias = "dragged_id")]
    pub id1: ItemId,
    #[serde(alias = "targetId", alias = "target_id")]
    pub id2: ItemId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub items: Vec<ItemUpdate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPhase {
    #[default]
    Idle,
    Armed,
    Flushing,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersistenceStatus {
    pub phase: FlushPhase,
    pub revision: u64,
    pub flushed_revision: u64,
    pub dirty: bool,
    pub flush_count: u64,
    pub failure_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_flush_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub item_count: usize,
    pub selected_count: usize,
    pub reorder_strategy: String,
    pub persistence: PersistenceStatus,
}
