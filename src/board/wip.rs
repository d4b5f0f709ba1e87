use super::{Board, StatusColumn};

/// Whether a column's card count exceeds its WIP limit. 0 = unlimited.
///
/// Advisory only: callers flag a warning, they never block the move.
pub fn violates_wip(wip_limit: u32, card_count: usize) -> bool {
    wip_limit != 0 && card_count as u64 > u64::from(wip_limit)
}

/// A column found over its WIP limit after a committed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WipViolation {
    pub column_id: String,
    pub count: usize,
    pub limit: u32,
}

/// Re-evaluate one column's occupancy against its limit.
pub fn check_column(board: &Board, column: &StatusColumn) -> Option<WipViolation> {
    let count = board.card_count(&column.id);
    violates_wip(column.wip_limit, count).then(|| WipViolation {
        column_id: column.id.clone(),
        count,
        limit: column.wip_limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limit_means_unlimited() {
        assert!(!violates_wip(0, 0));
        assert!(!violates_wip(0, 500));
    }

    #[test]
    fn at_limit_is_fine() {
        assert!(!violates_wip(3, 2));
        assert!(!violates_wip(3, 3));
    }

    #[test]
    fn over_limit_violates() {
        assert!(violates_wip(3, 4));
        assert!(violates_wip(1, 2));
    }
}
