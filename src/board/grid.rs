use super::Board;

/// Where a column drag was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridDrop {
    /// Onto a cell. Occupied cell means a swap, free cell a plain move.
    Cell { row: u32, col: u32 },
    /// Between two columns in a row: the dragged column lands at `col`
    /// and columns at or after `col` shift right.
    Before { row: u32, col: u32 },
    /// Onto the new-row zone below the last row.
    NewRow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementKind {
    Swap,
    Insert,
    NewRow,
}

/// New coordinates for a column moved by a placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellMove {
    pub column_id: String,
    pub grid_row: u32,
    pub grid_col: u32,
}

/// A resolved drop: where the dragged column lands and every other column
/// that moves with it in the same transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridPlacement {
    pub kind: PlacementKind,
    pub grid_row: u32,
    pub grid_col: u32,
    pub displaced: Vec<CellMove>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GridError {
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("grid row {0} is out of range (new rows come from the new-row zone)")]
    RowOutOfRange(u32),
}

/// The cell a column dropped on the new-row zone would land in.
/// A board with no columns yields (0, 0).
pub fn new_row_target(board: &Board) -> (u32, u32) {
    match board.max_grid_row() {
        Some(row) => (row + 1, 0),
        None => (0, 0),
    }
}

/// Translate a column drop into a target placement.
///
/// Returns `Ok(None)` when the drop changes nothing (own cell, or the
/// new-row zone under a column already alone in the bottom row); such
/// drops commit no mutation and record nothing.
pub fn resolve_drop_target(
    board: &Board,
    column_id: &str,
    drop: GridDrop,
) -> Result<Option<GridPlacement>, GridError> {
    let dragged = board
        .column(column_id)
        .ok_or_else(|| GridError::UnknownColumn(column_id.to_string()))?;
    let (cur_row, cur_col) = (dragged.grid_row, dragged.grid_col);
    let max_row = board.max_grid_row().unwrap_or(0);

    match drop {
        GridDrop::Cell { row, col } => {
            if row == cur_row && col == cur_col {
                return Ok(None);
            }
            if row > max_row {
                return Err(GridError::RowOutOfRange(row));
            }
            match board.column_at_cell(row, col) {
                Some(occupant) => Ok(Some(GridPlacement {
                    kind: PlacementKind::Swap,
                    grid_row: row,
                    grid_col: col,
                    // Both sides of the swap move in the same transition.
                    displaced: vec![CellMove {
                        column_id: occupant.id.clone(),
                        grid_row: cur_row,
                        grid_col: cur_col,
                    }],
                })),
                None => Ok(Some(GridPlacement {
                    kind: PlacementKind::Insert,
                    grid_row: row,
                    grid_col: col,
                    displaced: Vec::new(),
                })),
            }
        }
        GridDrop::Before { row, col } => {
            if row > max_row {
                return Err(GridError::RowOutOfRange(row));
            }
            if row == cur_row && col == cur_col {
                return Ok(None);
            }
            // Shift columns at or after the insertion point one cell right.
            let displaced: Vec<CellMove> = board
                .columns
                .iter()
                .filter(|c| c.id != column_id && c.grid_row == row && c.grid_col >= col)
                .map(|c| CellMove {
                    column_id: c.id.clone(),
                    grid_row: row,
                    grid_col: c.grid_col + 1,
                })
                .collect();
            Ok(Some(GridPlacement {
                kind: PlacementKind::Insert,
                grid_row: row,
                grid_col: col,
                displaced,
            }))
        }
        GridDrop::NewRow => {
            // A column already alone in the bottom row has nowhere lower
            // to go.
            if cur_row == max_row && board.row_len(cur_row) == 1 {
                return Ok(None);
            }
            let (row, col) = new_row_target(board);
            Ok(Some(GridPlacement {
                kind: PlacementKind::NewRow,
                grid_row: row,
                grid_col: col,
                displaced: Vec::new(),
            }))
        }
    }
}
