use super::Card;

/// Smallest rank gap the midpoint strategy may leave behind. Inserting
/// into a tighter gap renumbers the whole column instead.
pub const MIN_RANK_GAP: f64 = 1e-6;

/// Rank assignment for a card entering a column at a given index.
#[derive(Debug, Clone, PartialEq)]
pub enum RankOutcome {
    /// A single fresh rank for the incoming card; no one else moves.
    Rank(f64),
    /// The gap was too tight: the whole column renumbers to `0..n-1` in
    /// visual order, incoming card included. `(card_id, new_rank)` pairs.
    Compact(Vec<(String, f64)>),
}

/// Compute the rank for `moved_id` entering a column at `dest_index`.
///
/// `siblings` are the destination column's cards in visual order, with the
/// moved card already filtered out (it may be moving within the same
/// column). An out-of-range `dest_index` clamps to the end.
pub fn rank_for_insert(siblings: &[&Card], moved_id: &str, dest_index: usize) -> RankOutcome {
    let idx = dest_index.min(siblings.len());

    if siblings.is_empty() {
        return RankOutcome::Rank(0.0);
    }
    if idx == 0 {
        return RankOutcome::Rank(siblings[0].order - 1.0);
    }
    if idx == siblings.len() {
        return RankOutcome::Rank(siblings[siblings.len() - 1].order + 1.0);
    }

    let a = siblings[idx - 1].order;
    let b = siblings[idx].order;
    // The midpoint halves the gap; renumber before it degrades below the
    // precision floor.
    if (b - a) / 2.0 < MIN_RANK_GAP {
        let mut ranks = Vec::with_capacity(siblings.len() + 1);
        for (i, card) in siblings[..idx].iter().enumerate() {
            ranks.push((card.id.clone(), i as f64));
        }
        ranks.push((moved_id.to_string(), idx as f64));
        for (i, card) in siblings[idx..].iter().enumerate() {
            ranks.push((card.id.clone(), (idx + 1 + i) as f64));
        }
        return RankOutcome::Compact(ranks);
    }

    RankOutcome::Rank((a + b) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::RepoRef;
    use chrono::Utc;

    fn card(id: &str, order: f64) -> Card {
        Card::new(
            id.to_string(),
            "b1".to_string(),
            "s1".to_string(),
            RepoRef {
                owner: "octo".to_string(),
                name: id.to_string(),
            },
            order,
            Utc::now(),
        )
    }

    #[test]
    fn empty_column_gets_zero() {
        assert_eq!(rank_for_insert(&[], "x", 0), RankOutcome::Rank(0.0));
    }

    #[test]
    fn insert_at_head_goes_below_first() {
        let a = card("a", 3.0);
        let b = card("b", 4.0);
        assert_eq!(
            rank_for_insert(&[&a, &b], "x", 0),
            RankOutcome::Rank(2.0)
        );
    }

    #[test]
    fn insert_at_tail_goes_above_last() {
        let a = card("a", 3.0);
        let b = card("b", 4.0);
        assert_eq!(
            rank_for_insert(&[&a, &b], "x", 2),
            RankOutcome::Rank(5.0)
        );
    }

    #[test]
    fn out_of_range_index_clamps_to_tail() {
        let a = card("a", 1.0);
        assert_eq!(
            rank_for_insert(&[&a], "x", 99),
            RankOutcome::Rank(2.0)
        );
    }

    #[test]
    fn insert_between_takes_midpoint() {
        let a = card("a", 1.0);
        let b = card("b", 2.0);
        assert_eq!(
            rank_for_insert(&[&a, &b], "x", 1),
            RankOutcome::Rank(1.5)
        );
    }

    #[test]
    fn tight_gap_triggers_compaction() {
        let a = card("a", 1.0);
        let b = card("b", 1.0 + 1e-7);
        let c = card("c", 5.0);
        match rank_for_insert(&[&a, &b, &c], "x", 1) {
            RankOutcome::Compact(ranks) => {
                let ids: Vec<&str> = ranks.iter().map(|(id, _)| id.as_str()).collect();
                assert_eq!(ids, vec!["a", "x", "b", "c"]);
                let values: Vec<f64> = ranks.iter().map(|(_, r)| *r).collect();
                assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0]);
            }
            other => panic!("expected compaction, got {other:?}"),
        }
    }

    #[test]
    fn compaction_preserves_relative_order_of_bystanders() {
        let a = card("a", 0.25);
        let b = card("b", 0.25 + 1e-9);
        let c = card("c", 0.75);
        let d = card("d", 9.0);
        match rank_for_insert(&[&a, &b, &c, &d], "x", 1) {
            RankOutcome::Compact(ranks) => {
                let pos = |id: &str| ranks.iter().position(|(i, _)| i == id).unwrap();
                assert!(pos("a") < pos("b"));
                assert!(pos("b") < pos("c"));
                assert!(pos("c") < pos("d"));
            }
            other => panic!("expected compaction, got {other:?}"),
        }
    }

    #[test]
    fn comfortable_gap_does_not_compact() {
        let a = card("a", 1.0);
        let b = card("b", 1.0 + 3e-6);
        match rank_for_insert(&[&a, &b], "x", 1) {
            RankOutcome::Rank(r) => {
                assert!(r > a.order && r < b.order);
            }
            other => panic!("expected plain rank, got {other:?}"),
        }
    }
}
