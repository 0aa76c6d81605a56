use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A single record of the ordered collection.
///
/// `position` is 1-based and unique across the collection; `id` and `name`
/// never change after generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub position: i64,
    #[serde(default)]
    pub selected: bool,
}

impl Item {
    pub fn synthetic(index: usize) -> Self {
        Self {
            id: ItemId::generate(),
            name: format!("Item-{index}"),
            position: index as i64,
            selected: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub id: ItemId,
    pub position: i64,
    pub selected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReorderStrategy {
    /// Exchange the two items' positions.
    #[default]
    Swap,
    /// Take the dragged item out of the sequence and reinsert it directly
    /// before the target, renumbering everything to `index + 1`.
    MoveBefore,
}

impl FromStr for ReorderStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "swap" => Ok(Self::Swap),
            "move_before" | "move" => Ok(Self::MoveBefore),
            other => Err(format!("unknown reorder strategy '{other}'")),
        }
    }
}

impl fmt::Display for ReorderStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Swap => f.write_str("swap"),
            Self::MoveBefore => f.write_str("move_before"),
        }
    }
}
