//! C8 — Query planner.
//!
//! Chooses one of four access strategies per §4.5's "Planning" rules,
//! encoded as an explicit [`Plan`] enum the executor dispatches on —
//! the "planner as a strategy machine" redesign spec.md §9 calls for,
//! so each plan can be built and tested independently of execution.

use crate::btree::IndexKind;
use crate::index::IndexManager;
use crate::query::{Condition, Operator, Query};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Plan {
    /// Drive candidates from `main`'s index; optionally narrow with a
    /// second condition's index via set intersection (§4.5 step 2).
    Indexed { main: usize, narrow: Option<usize> },
    /// No condition is directly indexable, but one can still be
    /// evaluated by walking an index in key order (§4.5 step 3).
    Scan { cond: usize },
    /// No usable condition index exists, but the order column is
    /// indexed and the result is expected to be small relative to the
    /// table (§4.5 step 4).
    OrderDriven,
    /// Fall back to a natural-order hash-store scan (§4.5 step 5).
    FullScan,
}

fn indexable_by(op: Operator, kind: IndexKind) -> bool {
    match kind {
        IndexKind::Lexical => matches!(op, Operator::Streq | Operator::Strbw | Operator::Stroreq),
        IndexKind::Decimal => op.is_numeric(),
        IndexKind::Token => matches!(op, Operator::Strand | Operator::Stror),
    }
}

fn scan_usable(op: Operator, kind: IndexKind) -> bool {
    matches!(kind, IndexKind::Lexical) && matches!(op, Operator::Strinc | Operator::Strew | Operator::Strrx)
}

fn eligible(cond: &Condition, indices: &IndexManager) -> Option<IndexKind> {
    if cond.negate || cond.noidx || !cond.alive {
        return None;
    }
    indices.kind_of(&cond.column)
}

pub fn plan(query: &mut Query, indices: &IndexManager, rnum: u64) -> Plan {
    let conditions = query.conditions.clone();

    let mut main: Option<usize> = None;
    for (i, cond) in conditions.iter().enumerate() {
        if let Some(kind) = eligible(cond, indices) {
            if indexable_by(cond.op, kind) {
                main = Some(i);
                break;
            }
        }
    }

    if let Some(main_idx) = main {
        let mut narrow = None;
        for (i, cond) in conditions.iter().enumerate() {
            if i == main_idx {
                continue;
            }
            if let Some(kind) = eligible(cond, indices) {
                if indexable_by(cond.op, kind) {
                    narrow = Some(i);
                    break;
                }
            }
        }
        let main_col = String::from_utf8_lossy(&conditions[main_idx].column).into_owned();
        query.log_hint(format!(
            "using an index: \"{}\" asc ({})",
            main_col,
            conditions[main_idx].op
        ));
        if let Some(n) = narrow {
            let narrow_col = String::from_utf8_lossy(&conditions[n].column).into_owned();
            query.log_hint(format!("narrowing with an index: \"{}\"", narrow_col));
        }
        return Plan::Indexed { main: main_idx, narrow };
    }

    for (i, cond) in conditions.iter().enumerate() {
        if let Some(kind) = eligible(cond, indices) {
            if scan_usable(cond.op, kind) {
                let col = String::from_utf8_lossy(&cond.column).into_owned();
                query.log_hint(format!("scanning an index in key order: \"{}\"", col));
                return Plan::Scan { cond: i };
            }
        }
    }

    if let Some(order) = &query.order {
        let has_index = match order.otype.is_numeric() {
            true => indices.kind_of(&order.column) == Some(IndexKind::Decimal),
            false => indices.kind_of(&order.column) == Some(IndexKind::Lexical),
        };
        let max = query.max.unwrap_or(usize::MAX);
        if has_index && rnum > 0 && (max as f64) < 0.2 * (rnum as f64) {
            let col = String::from_utf8_lossy(&order.column).into_owned();
            query.log_hint(format!("driving result from order index: \"{}\"", col));
            return Plan::OrderDriven;
        }
    }

    query.log_hint("leaving the natural order");
    Plan::FullScan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond(column: &str, op: Operator) -> Condition {
        Condition {
            column: column.as_bytes().to_vec(),
            op,
            expr: b"x".to_vec(),
            negate: false,
            noidx: false,
            alive: true,
        }
    }

    #[test]
    fn indexable_tables_match_spec() {
        assert!(indexable_by(Operator::Streq, IndexKind::Lexical));
        assert!(!indexable_by(Operator::Strinc, IndexKind::Lexical));
        assert!(indexable_by(Operator::Numge, IndexKind::Decimal));
        assert!(indexable_by(Operator::Strand, IndexKind::Token));
        assert!(!indexable_by(Operator::Streq, IndexKind::Token));
    }

    #[test]
    fn noidx_condition_is_never_eligible() {
        let mut c = cond("name", Operator::Streq);
        c.noidx = true;
        assert!(eligible(&c, &IndexManager::new(std::path::Path::new("/tmp/x"), crate::config::OpenFlags::default(), 1024)).is_none());
    }
}
