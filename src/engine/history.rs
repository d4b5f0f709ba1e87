use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Pre-mutation positional state of one card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardSnapshot {
    pub card_id: String,
    pub status_id: String,
    pub order: f64,
}

/// Pre-mutation grid cell of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSnapshot {
    pub column_id: String,
    pub grid_row: u32,
    pub grid_col: u32,
}

/// Inverse of one committed mutation: the pre-mutation value of every
/// field the operation changed, enough to undo it exactly.
///
/// A compaction's `MoveCard` covers every renumbered card; a swap's
/// `ReorderColumn` covers both columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MutationRecord {
    MoveCard { cards: Vec<CardSnapshot> },
    ReorderColumn { columns: Vec<ColumnSnapshot> },
    MoveColumnToNewRow { columns: Vec<ColumnSnapshot> },
}

impl MutationRecord {
    pub fn touches_card(&self, card_id: &str) -> bool {
        match self {
            Self::MoveCard { cards } => cards.iter().any(|c| c.card_id == card_id),
            _ => false,
        }
    }

    pub fn touches_column(&self, column_id: &str) -> bool {
        match self {
            Self::ReorderColumn { columns } | Self::MoveColumnToNewRow { columns } => {
                columns.iter().any(|c| c.column_id == column_id)
            }
            Self::MoveCard { .. } => false,
        }
    }
}

/// Bounded, most-recent-first stack of inverse operations.
#[derive(Debug)]
pub struct UndoHistory {
    records: VecDeque<MutationRecord>,
    depth: usize,
}

impl UndoHistory {
    pub fn new(depth: usize) -> Self {
        Self {
            records: VecDeque::new(),
            depth: depth.max(1),
        }
    }

    /// Rebuild a stack from a snapshot (most-recent-first), dropping any
    /// overflow past `depth`.
    pub fn from_records(records: Vec<MutationRecord>, depth: usize) -> Self {
        let depth = depth.max(1);
        let mut records: VecDeque<MutationRecord> = records.into();
        records.truncate(depth);
        Self { records, depth }
    }

    /// Snapshot the stack, most-recent-first, for persistence.
    pub fn to_records(&self) -> Vec<MutationRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Record an inverse. Overflow drops the oldest record from the tail.
    pub fn push(&mut self, record: MutationRecord) {
        self.records.push_front(record);
        self.records.truncate(self.depth);
    }

    pub fn pop(&mut self) -> Option<MutationRecord> {
        self.records.pop_front()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Drop records referencing a card whose optimistic state was rolled
    /// back or resynced; their stored pre-values no longer apply.
    pub fn purge_card(&mut self, card_id: &str) {
        self.records.retain(|r| !r.touches_card(card_id));
    }

    /// Column counterpart of [`purge_card`](Self::purge_card).
    pub fn purge_column(&mut self, column_id: &str) {
        self.records.retain(|r| !r.touches_column(column_id));
    }
}
