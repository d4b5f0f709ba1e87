pub mod history;
pub mod persist;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::board::grid::{self, GridDrop, GridError, GridPlacement, PlacementKind};
use crate::board::order::{self, RankOutcome};
use crate::board::wip::{self, WipViolation};
use crate::board::{Card, StatusColumn, Workspace};

use history::{CardSnapshot, ColumnSnapshot, MutationRecord, UndoHistory};
use persist::{
    EntityKey, MutationPhase, PendingTracker, PersistError, PersistPayload, PersistRequest,
    RollbackValue, Settlement, Ticket,
};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown card: {0}")]
    UnknownCard(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("unknown board: {0}")]
    UnknownBoard(String),
    #[error("invalid drop target: {0}")]
    InvalidDrop(String),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl From<GridError> for EngineError {
    fn from(e: GridError) -> Self {
        match e {
            GridError::UnknownColumn(id) => Self::UnknownColumn(id),
            other => Self::InvalidDrop(other.to_string()),
        }
    }
}

/// Result of one committed mutation, returned before any persistence
/// round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    /// Outbound persistence calls to forward to the store. Empty entries
    /// mean the affected entities were busy and the write queued.
    pub persist: Vec<PersistRequest>,
    /// Columns left over their WIP limit by this mutation. Advisory.
    pub wip: Vec<WipViolation>,
}

/// Preview geometry for a card drag in progress. Commits nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct CardDropPreview {
    pub status_id: String,
    pub index: usize,
    pub would_violate_wip: bool,
}

/// Outcome of settling one persistence acknowledgment.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Backend confirmed; a queued successor may have dispatched.
    Confirmed { follow_up: Option<PersistRequest> },
    /// The optimistic value was reverted in memory.
    RolledBack { entity: EntityKey },
    /// A newer queued target superseded the failed call; send it.
    Superseded { follow_up: PersistRequest },
    /// Optimistic state was discarded; fetch the authoritative snapshot
    /// and resync via `set_cards`/`set_columns`.
    NeedsResync { entity: EntityKey },
}

/// The mutation engine: owns the canonical in-memory state tree, the undo
/// stack, and the per-entity persistence tracking.
///
/// Every intent commits synchronously and run-to-completion; the only
/// asynchronous boundary is the persistence store, reached through the
/// [`PersistRequest`] values each [`Commit`] carries. Per entity the
/// lifecycle is Idle → Committing → settled (confirmed, rolled back, or
/// resynced); previews never leave Idle.
#[derive(Debug)]
pub struct Engine {
    workspace: Workspace,
    history: UndoHistory,
    pending: PendingTracker,
    wip_flags: BTreeSet<String>,
}

impl Engine {
    pub fn new(workspace: Workspace, undo_depth: usize, persist_timeout_secs: u64) -> Self {
        let mut engine = Self {
            workspace,
            history: UndoHistory::new(undo_depth),
            pending: PendingTracker::new(persist_timeout_secs),
            wip_flags: BTreeSet::new(),
        };
        engine.refresh_all_wip();
        engine
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// For entity CRUD only (create/delete/rename). Positional fields
    /// (`status_id`, `order`, `grid_row`, `grid_col`) go through the
    /// engine's intents, never through this.
    pub fn workspace_mut(&mut self) -> &mut Workspace {
        &mut self.workspace
    }

    /// Whether a column currently carries a WIP warning flag.
    pub fn wip_flagged(&self, column_id: &str) -> bool {
        self.wip_flags.contains(column_id)
    }

    pub fn entity_phase(&self, entity: &EntityKey) -> MutationPhase {
        self.pending.phase(entity)
    }

    pub fn undo_available(&self) -> bool {
        !self.history.is_empty()
    }

    /// Restore a previously snapshotted undo stack (most-recent-first).
    pub fn restore_history(&mut self, records: Vec<MutationRecord>) {
        self.history = UndoHistory::from_records(records, self.history.depth());
    }

    /// Snapshot the undo stack for persistence alongside the workspace.
    pub fn history_snapshot(&self) -> Vec<MutationRecord> {
        self.history.to_records()
    }

    // -------------------------------------------------------------------
    // Previews (Dragging phase: geometry only, no commit)
    // -------------------------------------------------------------------

    /// Where a card drop would land. Pure; no state change, no record.
    pub fn preview_card_drop(
        &self,
        card_id: &str,
        dest_status_id: &str,
        dest_index: usize,
    ) -> Result<CardDropPreview, EngineError> {
        let board = self
            .workspace
            .board_of_card(card_id)
            .ok_or_else(|| EngineError::UnknownCard(card_id.to_string()))?;
        let dest = board
            .column(dest_status_id)
            .ok_or_else(|| EngineError::UnknownColumn(dest_status_id.to_string()))?;
        let card = board.card(card_id).ok_or_else(|| EngineError::UnknownCard(card_id.to_string()))?;

        let siblings = board.card_count(dest_status_id);
        let entering = card.status_id != dest.id;
        let count_after = if entering { siblings + 1 } else { siblings };
        let slots = if entering { siblings } else { siblings.saturating_sub(1) };

        Ok(CardDropPreview {
            status_id: dest.id.clone(),
            index: dest_index.min(slots),
            would_violate_wip: wip::violates_wip(dest.wip_limit, count_after),
        })
    }

    /// Where a column drop would land. Pure; `None` means the drop would
    /// change nothing.
    pub fn preview_column_drop(
        &self,
        column_id: &str,
        drop: GridDrop,
    ) -> Result<Option<GridPlacement>, EngineError> {
        let board = self
            .workspace
            .board_of_column(column_id)
            .ok_or_else(|| EngineError::UnknownColumn(column_id.to_string()))?;
        Ok(grid::resolve_drop_target(board, column_id, drop)?)
    }

    // -------------------------------------------------------------------
    // Commits
    // -------------------------------------------------------------------

    /// Move a card to `dest_index` within a destination column.
    ///
    /// Commits optimistically and returns at once; `Ok(None)` means the
    /// drop targeted the card's current slot and nothing changed.
    pub fn move_card(
        &mut self,
        card_id: &str,
        dest_status_id: &str,
        dest_index: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<Commit>, EngineError> {
        let board = self
            .workspace
            .board_of_card(card_id)
            .ok_or_else(|| EngineError::UnknownCard(card_id.to_string()))?;
        let board_id = board.id.clone();
        if board.column(dest_status_id).is_none() {
            return Err(EngineError::UnknownColumn(dest_status_id.to_string()));
        }
        let card = board.card(card_id).ok_or_else(|| EngineError::UnknownCard(card_id.to_string()))?;
        let prev_status = card.status_id.clone();
        let prev_order = card.order;

        let siblings: Vec<&Card> = board
            .cards_in_column(dest_status_id)
            .into_iter()
            .filter(|c| c.id != card_id)
            .collect();
        let idx = dest_index.min(siblings.len());

        if prev_status == dest_status_id {
            let full = board.cards_in_column(dest_status_id);
            let cur_idx = full.iter().position(|c| c.id == card_id).unwrap_or(0);
            if cur_idx == idx {
                return Ok(None);
            }
        }

        // Compute positions first, then mutate; the commit is atomic from
        // the caller's perspective.
        let outcome = order::rank_for_insert(&siblings, card_id, idx);
        let mut changed: Vec<(CardSnapshot, PersistPayload)> = Vec::new();

        match outcome {
            RankOutcome::Rank(rank) => {
                changed.push((
                    CardSnapshot {
                        card_id: card_id.to_string(),
                        status_id: prev_status.clone(),
                        order: prev_order,
                    },
                    PersistPayload::CardMove {
                        card_id: card_id.to_string(),
                        status_id: dest_status_id.to_string(),
                        order: rank,
                    },
                ));
            }
            RankOutcome::Compact(ranks) => {
                for (id, rank) in ranks {
                    let prev = board.card(&id).ok_or_else(|| EngineError::UnknownCard(id.clone()))?;
                    let status = if id == card_id {
                        dest_status_id.to_string()
                    } else {
                        prev.status_id.clone()
                    };
                    if prev.status_id == status && prev.order == rank {
                        continue;
                    }
                    changed.push((
                        CardSnapshot {
                            card_id: id.clone(),
                            status_id: prev.status_id.clone(),
                            order: prev.order,
                        },
                        PersistPayload::CardMove {
                            card_id: id,
                            status_id: status,
                            order: rank,
                        },
                    ));
                }
            }
        }

        let board = self
            .workspace
            .board_mut(&board_id)
            .ok_or_else(|| EngineError::UnknownBoard(board_id.clone()))?;
        for (_, payload) in &changed {
            if let PersistPayload::CardMove {
                card_id,
                status_id,
                order,
            } = payload
            {
                if let Some(card) = board.card_mut(card_id) {
                    card.status_id = status_id.clone();
                    card.order = *order;
                    card.touch(now);
                }
            }
        }
        board.updated = now;

        let record = MutationRecord::MoveCard {
            cards: changed.iter().map(|(snap, _)| snap.clone()).collect(),
        };
        self.history.push(record);

        let mut persist = Vec::new();
        for (snap, payload) in changed {
            let request = self
                .pending
                .track(payload, RollbackValue::Card(snap), now);
            persist.extend(request);
        }

        let wip = self.refresh_wip(&board_id, &[&prev_status, dest_status_id]);
        debug!(card = card_id, dest = dest_status_id, index = idx, "card move committed");
        Ok(Some(Commit { persist, wip }))
    }

    /// Re-place a column on the board grid from a drop descriptor.
    ///
    /// `Ok(None)` means the drop targeted the column's own cell (or an
    /// equivalent no-op) and nothing changed.
    pub fn reorder_column(
        &mut self,
        column_id: &str,
        drop: GridDrop,
        now: DateTime<Utc>,
    ) -> Result<Option<Commit>, EngineError> {
        let board = self
            .workspace
            .board_of_column(column_id)
            .ok_or_else(|| EngineError::UnknownColumn(column_id.to_string()))?;
        let board_id = board.id.clone();

        let placement = match grid::resolve_drop_target(board, column_id, drop)? {
            Some(placement) => placement,
            None => return Ok(None),
        };

        let mut moves: Vec<(String, u32, u32)> = vec![(
            column_id.to_string(),
            placement.grid_row,
            placement.grid_col,
        )];
        for mv in &placement.displaced {
            moves.push((mv.column_id.clone(), mv.grid_row, mv.grid_col));
        }

        let mut snapshots = Vec::with_capacity(moves.len());
        for (id, _, _) in &moves {
            let col = board.column(id).ok_or_else(|| EngineError::UnknownColumn(id.clone()))?;
            snapshots.push(ColumnSnapshot {
                column_id: id.clone(),
                grid_row: col.grid_row,
                grid_col: col.grid_col,
            });
        }

        let board = self
            .workspace
            .board_mut(&board_id)
            .ok_or_else(|| EngineError::UnknownBoard(board_id.clone()))?;
        for (id, row, col) in &moves {
            if let Some(column) = board.column_mut(id) {
                column.grid_row = *row;
                column.grid_col = *col;
                column.updated = now;
            }
        }
        board.updated = now;

        let record = match placement.kind {
            PlacementKind::NewRow => MutationRecord::MoveColumnToNewRow {
                columns: snapshots.clone(),
            },
            _ => MutationRecord::ReorderColumn {
                columns: snapshots.clone(),
            },
        };
        self.history.push(record);

        let mut persist = Vec::new();
        for ((id, row, col), snap) in moves.into_iter().zip(snapshots) {
            let request = self.pending.track(
                PersistPayload::ColumnGrid {
                    column_id: id,
                    grid_row: row,
                    grid_col: col,
                },
                RollbackValue::Column(snap),
                now,
            );
            persist.extend(request);
        }

        debug!(column = column_id, "column placement committed");
        Ok(Some(Commit {
            persist,
            wip: Vec::new(),
        }))
    }

    /// Revert the most recent committed mutation.
    ///
    /// The inverse re-enters the ordinary commit path: optimistic,
    /// asynchronously persisted, same failure handling. No redo entry is
    /// pushed. `Ok(None)` reports "nothing to undo".
    pub fn undo(&mut self, now: DateTime<Utc>) -> Result<Option<Commit>, EngineError> {
        let record = match self.history.pop() {
            Some(record) => record,
            None => return Ok(None),
        };

        let commit = match record {
            MutationRecord::MoveCard { cards } => self.revert_cards(cards, now),
            MutationRecord::ReorderColumn { columns }
            | MutationRecord::MoveColumnToNewRow { columns } => self.revert_columns(columns, now),
        };
        Ok(Some(commit))
    }

    fn revert_cards(&mut self, cards: Vec<CardSnapshot>, now: DateTime<Utc>) -> Commit {
        let mut persist = Vec::new();
        let mut affected: BTreeSet<String> = BTreeSet::new();
        let mut board_id = None;

        for snap in cards {
            let board = match self.workspace.board_of_card(&snap.card_id) {
                Some(board) => board,
                None => {
                    warn!(card = %snap.card_id, "undo target no longer exists, skipping");
                    continue;
                }
            };
            let id = board.id.clone();
            let current = board.card(&snap.card_id).map(|c| CardSnapshot {
                card_id: c.id.clone(),
                status_id: c.status_id.clone(),
                order: c.order,
            });
            let Some(current) = current else { continue };
            affected.insert(current.status_id.clone());
            affected.insert(snap.status_id.clone());

            if let Some(board) = self.workspace.board_mut(&id) {
                if let Some(card) = board.card_mut(&snap.card_id) {
                    card.status_id = snap.status_id.clone();
                    card.order = snap.order;
                    card.touch(now);
                }
                board.updated = now;
            }
            board_id = Some(id);

            let request = self.pending.track(
                PersistPayload::CardMove {
                    card_id: snap.card_id.clone(),
                    status_id: snap.status_id,
                    order: snap.order,
                },
                RollbackValue::Card(current),
                now,
            );
            persist.extend(request);
        }

        let wip = match board_id {
            Some(id) => {
                let columns: Vec<&str> = affected.iter().map(String::as_str).collect();
                self.refresh_wip(&id, &columns)
            }
            None => Vec::new(),
        };
        Commit { persist, wip }
    }

    fn revert_columns(&mut self, columns: Vec<ColumnSnapshot>, now: DateTime<Utc>) -> Commit {
        let mut persist = Vec::new();

        for snap in columns {
            let board = match self.workspace.board_of_column(&snap.column_id) {
                Some(board) => board,
                None => {
                    warn!(column = %snap.column_id, "undo target no longer exists, skipping");
                    continue;
                }
            };
            let id = board.id.clone();
            let current = board.column(&snap.column_id).map(|c| ColumnSnapshot {
                column_id: c.id.clone(),
                grid_row: c.grid_row,
                grid_col: c.grid_col,
            });
            let Some(current) = current else { continue };

            if let Some(board) = self.workspace.board_mut(&id) {
                if let Some(column) = board.column_mut(&snap.column_id) {
                    column.grid_row = snap.grid_row;
                    column.grid_col = snap.grid_col;
                    column.updated = now;
                }
                board.updated = now;
            }

            let request = self.pending.track(
                PersistPayload::ColumnGrid {
                    column_id: snap.column_id.clone(),
                    grid_row: snap.grid_row,
                    grid_col: snap.grid_col,
                },
                RollbackValue::Column(current),
                now,
            );
            persist.extend(request);
        }

        Commit {
            persist,
            wip: Vec::new(),
        }
    }

    // -------------------------------------------------------------------
    // Resync (authoritative snapshots replace optimistic state)
    // -------------------------------------------------------------------

    /// Replace a board's cards wholesale from the authoritative store.
    pub fn set_cards(&mut self, board_id: &str, cards: Vec<Card>) -> Result<(), EngineError> {
        let board = self
            .workspace
            .board_mut(board_id)
            .ok_or_else(|| EngineError::UnknownBoard(board_id.to_string()))?;

        let old_ids: Vec<String> = board.cards.iter().map(|c| c.id.clone()).collect();
        board.cards = cards;
        let new_ids: Vec<String> = board.cards.iter().map(|c| c.id.clone()).collect();

        for id in old_ids.iter().chain(new_ids.iter()) {
            self.pending.clear_entity(&EntityKey::Card(id.clone()));
            self.history.purge_card(id);
        }
        self.refresh_board_wip(board_id);
        Ok(())
    }

    /// Replace a board's columns wholesale from the authoritative store.
    pub fn set_columns(
        &mut self,
        board_id: &str,
        columns: Vec<StatusColumn>,
    ) -> Result<(), EngineError> {
        let board = self
            .workspace
            .board_mut(board_id)
            .ok_or_else(|| EngineError::UnknownBoard(board_id.to_string()))?;

        let old_ids: Vec<String> = board.columns.iter().map(|c| c.id.clone()).collect();
        board.columns = columns;
        let new_ids: Vec<String> = board.columns.iter().map(|c| c.id.clone()).collect();

        for id in old_ids.iter().chain(new_ids.iter()) {
            self.pending.clear_entity(&EntityKey::Column(id.clone()));
            self.history.purge_column(id);
        }
        self.refresh_board_wip(board_id);
        Ok(())
    }

    // -------------------------------------------------------------------
    // Persistence settlement
    // -------------------------------------------------------------------

    /// Deliver a backend outcome for an outstanding persistence call.
    pub fn resolve_persist(
        &mut self,
        ticket: Ticket,
        ok: bool,
        now: DateTime<Utc>,
    ) -> Result<Resolution, EngineError> {
        let settlement = self.pending.resolve(ticket, ok, now)?;
        Ok(self.apply_settlement(settlement, now))
    }

    /// Expire persistence calls past their deadline; expiry settles
    /// exactly like an explicit failure.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Resolution> {
        let settlements = self.pending.expire(now);
        settlements
            .into_iter()
            .map(|(entity, settlement)| {
                warn!(%entity, "persistence call timed out");
                self.apply_settlement(settlement, now)
            })
            .collect()
    }

    fn apply_settlement(&mut self, settlement: Settlement, now: DateTime<Utc>) -> Resolution {
        match settlement {
            Settlement::Confirmed { follow_up } => Resolution::Confirmed { follow_up },
            Settlement::Superseded { follow_up } => {
                warn!(entity = %follow_up.payload.entity(), "persist failed; superseded by a newer target");
                Resolution::Superseded { follow_up }
            }
            Settlement::RollBack { rollback } => {
                let entity = self.apply_rollback(rollback, now);
                warn!(%entity, "persist failed; optimistic state rolled back");
                Resolution::RolledBack { entity }
            }
            Settlement::NeedsResync { entity } => {
                warn!(%entity, "persist failed past a safe inverse; resync required");
                match &entity {
                    EntityKey::Card(id) => self.history.purge_card(id),
                    EntityKey::Column(id) => self.history.purge_column(id),
                }
                Resolution::NeedsResync { entity }
            }
        }
    }

    fn apply_rollback(&mut self, rollback: RollbackValue, now: DateTime<Utc>) -> EntityKey {
        match rollback {
            RollbackValue::Card(snap) => {
                let entity = EntityKey::Card(snap.card_id.clone());
                let board_id = self
                    .workspace
                    .board_of_card(&snap.card_id)
                    .map(|b| b.id.clone());
                if let Some(id) = board_id {
                    let mut affected = vec![snap.status_id.clone()];
                    if let Some(board) = self.workspace.board_mut(&id) {
                        if let Some(card) = board.card_mut(&snap.card_id) {
                            affected.push(card.status_id.clone());
                            card.status_id = snap.status_id.clone();
                            card.order = snap.order;
                            card.touch(now);
                        }
                    }
                    let columns: Vec<&str> = affected.iter().map(String::as_str).collect();
                    self.refresh_wip(&id, &columns);
                }
                self.history.purge_card(&snap.card_id);
                entity
            }
            RollbackValue::Column(snap) => {
                let entity = EntityKey::Column(snap.column_id.clone());
                let board_id = self
                    .workspace
                    .board_of_column(&snap.column_id)
                    .map(|b| b.id.clone());
                if let Some(id) = board_id {
                    if let Some(board) = self.workspace.board_mut(&id) {
                        if let Some(column) = board.column_mut(&snap.column_id) {
                            column.grid_row = snap.grid_row;
                            column.grid_col = snap.grid_col;
                            column.updated = now;
                        }
                    }
                }
                self.history.purge_column(&snap.column_id);
                entity
            }
        }
    }

    // -------------------------------------------------------------------
    // WIP flags
    // -------------------------------------------------------------------

    fn refresh_wip(&mut self, board_id: &str, column_ids: &[&str]) -> Vec<WipViolation> {
        let mut violations = Vec::new();
        let Some(board) = self.workspace.board(board_id) else {
            return violations;
        };
        let mut set_flags = Vec::new();
        let mut clear_flags = Vec::new();
        for id in column_ids {
            let Some(column) = board.column(id) else { continue };
            match wip::check_column(board, column) {
                Some(violation) => {
                    set_flags.push(column.id.clone());
                    violations.push(violation);
                }
                None => clear_flags.push(column.id.clone()),
            }
        }
        for id in set_flags {
            self.wip_flags.insert(id);
        }
        for id in clear_flags {
            self.wip_flags.remove(&id);
        }
        violations
    }

    fn refresh_board_wip(&mut self, board_id: &str) {
        let Some(board) = self.workspace.board(board_id) else {
            return;
        };
        let ids: Vec<String> = board.columns.iter().map(|c| c.id.clone()).collect();
        let columns: Vec<&str> = ids.iter().map(String::as_str).collect();
        self.refresh_wip(board_id, &columns);
    }

    fn refresh_all_wip(&mut self) {
        let ids: Vec<String> = self.workspace.boards.iter().map(|b| b.id.clone()).collect();
        for id in ids {
            self.refresh_board_wip(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Board, RepoRef};
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn test_card(id: &str, status: &str, order: f64, now: DateTime<Utc>) -> Card {
        Card::new(
            id.to_string(),
            "b1".to_string(),
            status.to_string(),
            RepoRef {
                owner: "octo".to_string(),
                name: id.to_string(),
            },
            order,
            now,
        )
    }

    /// Board b1: Backlog s1 (0,0) with c1 c2, Todo s2 (0,1, wip 3) with
    /// c3 c4, Done s3 (0,2) with c5 c6.
    fn fixture() -> (Engine, DateTime<Utc>) {
        let now = ts();
        let mut board = Board::new("b1".into(), "Main".into(), "me".into(), now);
        for (id, title, col, wip) in [
            ("s1", "Backlog", 0, 0),
            ("s2", "Todo", 1, 3),
            ("s3", "Done", 2, 0),
        ] {
            let mut column = StatusColumn::new(
                id.to_string(),
                "b1".into(),
                title.to_string(),
                "#5b8dd9".into(),
                0,
                col,
                now,
            );
            column.wip_limit = wip;
            board.columns.push(column);
        }
        for (id, status, order) in [
            ("c1", "s1", 0.0),
            ("c2", "s1", 1.0),
            ("c3", "s2", 0.0),
            ("c4", "s2", 1.0),
            ("c5", "s3", 0.0),
            ("c6", "s3", 1.0),
        ] {
            board.cards.push(test_card(id, status, order, now));
        }
        let mut workspace = Workspace::new();
        workspace.boards.push(board);
        (Engine::new(workspace, 12, 10), now)
    }

    fn column_order(engine: &Engine, status: &str) -> Vec<String> {
        engine
            .workspace()
            .board("b1")
            .unwrap()
            .cards_in_column(status)
            .iter()
            .map(|c| c.id.clone())
            .collect()
    }

    #[test]
    fn move_card_to_head_of_other_column() {
        let (mut engine, now) = fixture();
        let commit = engine.move_card("c1", "s2", 0, now).unwrap().unwrap();

        assert_eq!(column_order(&engine, "s2"), vec!["c1", "c3", "c4"]);
        assert_eq!(column_order(&engine, "s1"), vec!["c2"]);
        let card = engine.workspace().board("b1").unwrap().card("c1").unwrap();
        assert_eq!(card.status_id, "s2");
        assert_eq!(commit.persist.len(), 1);
        assert!(commit.wip.is_empty());
    }

    #[test]
    fn orders_stay_distinct_across_moves() {
        let (mut engine, now) = fixture();
        let moves = [
            ("c1", "s2", 0),
            ("c2", "s2", 1),
            ("c5", "s2", 2),
            ("c3", "s1", 0),
            ("c1", "s2", 3),
            ("c6", "s2", 0),
        ];
        for (card, dest, index) in moves {
            engine.move_card(card, dest, index, now).unwrap();
            for status in ["s1", "s2", "s3"] {
                let cards = engine
                    .workspace()
                    .board("b1")
                    .unwrap()
                    .cards_in_column(status);
                for pair in cards.windows(2) {
                    assert!(
                        pair[0].order < pair[1].order,
                        "duplicate or unordered ranks in {status}"
                    );
                }
            }
        }
    }

    #[test]
    fn fourth_card_over_wip_limit_succeeds_with_flag() {
        let (mut engine, now) = fixture();
        engine.move_card("c1", "s2", 0, now).unwrap();
        assert!(!engine.wip_flagged("s2"));

        let commit = engine.move_card("c2", "s2", 0, now).unwrap().unwrap();
        assert_eq!(engine.workspace().board("b1").unwrap().card_count("s2"), 4);
        assert_eq!(
            commit.wip,
            vec![WipViolation {
                column_id: "s2".into(),
                count: 4,
                limit: 3,
            }]
        );
        assert!(engine.wip_flagged("s2"));

        // Moving a card back out clears the flag.
        engine.move_card("c2", "s1", 0, now).unwrap();
        assert!(!engine.wip_flagged("s2"));
    }

    #[test]
    fn undo_restores_exact_pre_mutation_values() {
        let (mut engine, now) = fixture();
        let before = engine
            .workspace()
            .board("b1")
            .unwrap()
            .card("c1")
            .unwrap()
            .clone();

        engine.move_card("c1", "s2", 1, now).unwrap();
        engine.undo(now).unwrap().unwrap();

        let after = engine.workspace().board("b1").unwrap().card("c1").unwrap();
        assert_eq!(after.status_id, before.status_id);
        assert_eq!(after.order, before.order);
        assert_eq!(column_order(&engine, "s1"), vec!["c1", "c2"]);
        assert_eq!(column_order(&engine, "s2"), vec!["c3", "c4"]);
    }

    #[test]
    fn second_undo_reports_nothing_to_undo() {
        let (mut engine, now) = fixture();
        engine.move_card("c1", "s2", 0, now).unwrap();

        assert!(engine.undo(now).unwrap().is_some());
        assert_eq!(engine.undo(now).unwrap(), None);
    }

    #[test]
    fn undo_of_column_swap_restores_both_cells() {
        let (mut engine, now) = fixture();
        engine
            .reorder_column("s1", GridDrop::Cell { row: 0, col: 2 }, now)
            .unwrap()
            .unwrap();
        let board = engine.workspace().board("b1").unwrap();
        assert_eq!(board.column("s1").unwrap().grid_col, 2);
        assert_eq!(board.column("s3").unwrap().grid_col, 0);

        engine.undo(now).unwrap().unwrap();
        let board = engine.workspace().board("b1").unwrap();
        assert_eq!(board.column("s1").unwrap().grid_col, 0);
        assert_eq!(board.column("s3").unwrap().grid_col, 2);
    }

    #[test]
    fn compaction_renumbers_atomically_and_undoes() {
        let (mut engine, now) = fixture();
        {
            let board = engine.workspace_mut().board_mut("b1").unwrap();
            board.card_mut("c4").unwrap().order = 1e-9;
        }

        engine.move_card("c1", "s2", 1, now).unwrap().unwrap();
        assert_eq!(column_order(&engine, "s2"), vec!["c3", "c1", "c4"]);
        let board = engine.workspace().board("b1").unwrap();
        assert_eq!(board.card("c3").unwrap().order, 0.0);
        assert_eq!(board.card("c1").unwrap().order, 1.0);
        assert_eq!(board.card("c4").unwrap().order, 2.0);

        // One record covers the whole renumbering.
        engine.undo(now).unwrap().unwrap();
        let board = engine.workspace().board("b1").unwrap();
        assert_eq!(board.card("c1").unwrap().status_id, "s1");
        assert_eq!(board.card("c1").unwrap().order, 0.0);
        assert_eq!(board.card("c4").unwrap().order, 1e-9);
        assert_eq!(engine.undo(now).unwrap(), None);
    }

    #[test]
    fn drop_on_own_slot_commits_nothing() {
        let (mut engine, now) = fixture();
        assert_eq!(engine.move_card("c3", "s2", 0, now).unwrap(), None);
        assert_eq!(
            engine
                .reorder_column("s1", GridDrop::Cell { row: 0, col: 0 }, now)
                .unwrap(),
            None
        );
        assert!(!engine.undo_available());
        assert!(engine.pending.is_idle());
    }

    #[test]
    fn invalid_drop_changes_nothing() {
        let (mut engine, now) = fixture();
        let err = engine
            .reorder_column("s1", GridDrop::Cell { row: 7, col: 0 }, now)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidDrop(_)));
        assert!(!engine.undo_available());
        let board = engine.workspace().board("b1").unwrap();
        assert_eq!(board.column("s1").unwrap().grid_row, 0);
    }

    #[test]
    fn busy_card_queues_and_collapses() {
        let (mut engine, now) = fixture();
        let first = engine.move_card("c1", "s2", 0, now).unwrap().unwrap();
        assert_eq!(first.persist.len(), 1);
        assert_eq!(
            engine.entity_phase(&EntityKey::Card("c1".into())),
            MutationPhase::Committing
        );

        let second = engine.move_card("c1", "s3", 0, now).unwrap().unwrap();
        let third = engine.move_card("c1", "s1", 0, now).unwrap().unwrap();
        assert!(second.persist.is_empty());
        assert!(third.persist.is_empty());

        let resolution = engine
            .resolve_persist(first.persist[0].ticket, true, now)
            .unwrap();
        match resolution {
            Resolution::Confirmed {
                follow_up: Some(request),
            } => match request.payload {
                PersistPayload::CardMove { status_id, .. } => assert_eq!(status_id, "s1"),
                other => panic!("expected card payload, got {other:?}"),
            },
            other => panic!("expected confirmed with follow-up, got {other:?}"),
        }
    }

    #[test]
    fn persist_failure_rolls_the_card_back() {
        let (mut engine, now) = fixture();
        let commit = engine.move_card("c1", "s2", 0, now).unwrap().unwrap();

        let resolution = engine
            .resolve_persist(commit.persist[0].ticket, false, now)
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::RolledBack {
                entity: EntityKey::Card("c1".into())
            }
        );
        let card = engine.workspace().board("b1").unwrap().card("c1").unwrap();
        assert_eq!(card.status_id, "s1");
        assert_eq!(card.order, 0.0);
        // The stale inverse is gone too.
        assert!(!engine.undo_available());
    }

    #[test]
    fn timeout_settles_like_failure() {
        let (mut engine, now) = fixture();
        engine.move_card("c1", "s2", 0, now).unwrap().unwrap();

        assert!(engine.tick(now + chrono::Duration::seconds(5)).is_empty());
        let resolutions = engine.tick(now + chrono::Duration::seconds(11));
        assert_eq!(
            resolutions,
            vec![Resolution::RolledBack {
                entity: EntityKey::Card("c1".into())
            }]
        );
        let card = engine.workspace().board("b1").unwrap().card("c1").unwrap();
        assert_eq!(card.status_id, "s1");
    }

    #[test]
    fn set_cards_replaces_state_and_clears_tracking() {
        let (mut engine, now) = fixture();
        engine.move_card("c1", "s2", 0, now).unwrap().unwrap();
        assert!(engine.undo_available());

        let authoritative = vec![
            test_card("c1", "s1", 0.0, now),
            test_card("c2", "s1", 1.0, now),
        ];
        engine.set_cards("b1", authoritative).unwrap();

        assert!(!engine.undo_available());
        assert!(engine.pending.is_idle());
        assert_eq!(column_order(&engine, "s1"), vec!["c1", "c2"]);
        assert_eq!(column_order(&engine, "s2"), Vec::<String>::new());
    }

    #[test]
    fn preview_commits_nothing() {
        let (engine, _) = fixture();
        let preview = engine.preview_card_drop("c1", "s2", 9).unwrap();
        assert_eq!(preview.status_id, "s2");
        assert_eq!(preview.index, 2);
        assert!(!preview.would_violate_wip);

        assert!(!engine.undo_available());
        assert!(engine.pending.is_idle());
    }

    #[test]
    fn preview_flags_wip_before_the_drop() {
        let (mut engine, now) = fixture();
        engine.move_card("c1", "s2", 0, now).unwrap();
        let preview = engine.preview_card_drop("c2", "s2", 0).unwrap();
        assert!(preview.would_violate_wip);
    }

    #[test]
    fn unknown_targets_are_rejected_before_mutation() {
        let (mut engine, now) = fixture();
        assert!(matches!(
            engine.move_card("nope", "s2", 0, now),
            Err(EngineError::UnknownCard(_))
        ));
        assert!(matches!(
            engine.move_card("c1", "nope", 0, now),
            Err(EngineError::UnknownColumn(_))
        ));
        assert!(!engine.undo_available());
    }
}
