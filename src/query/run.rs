//! C8 — Query executor.
//!
//! Turns a [`planner::Plan`] into primary keys: gathers candidates from
//! the chosen index (or the hash store's natural order), re-checks
//! every condition against each candidate's column map, orders, then
//! applies skip/limit. `search` is the shared core; `Tdb` layers
//! `qry_search_out`/`qry_proc`/`qry_proc2` on top of it.

use std::cmp::Ordering;
use std::collections::HashSet;

use regex::Regex;

use crate::btree::IndexKind;
use crate::codec::ColumnMap;
use crate::engine::HashStore;
use crate::error::Result;
use crate::index::IndexManager;
use crate::query::planner::{self, Plan};
use crate::query::{Condition, Operator, OrderType, Query};
use crate::util;

fn contains_subslice(hay: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    hay.windows(needle.len()).any(|w| w == needle)
}

fn split_list(expr: &[u8]) -> Vec<&[u8]> {
    expr.split(|&b| b == b',').collect()
}

fn op_matches(op: Operator, value: &[u8], expr: &[u8]) -> bool {
    match op {
        Operator::Streq => value == expr,
        Operator::Strinc => contains_subslice(value, expr),
        Operator::Strbw => value.starts_with(expr),
        Operator::Strew => value.ends_with(expr),
        Operator::Stroreq => split_list(expr).iter().any(|e| *e == value),
        Operator::Strand => {
            let have: HashSet<&[u8]> = util::tokenize(value).into_iter().collect();
            util::tokenize(expr).into_iter().all(|t| have.contains(t))
        }
        Operator::Stror => {
            let have: HashSet<&[u8]> = util::tokenize(value).into_iter().collect();
            util::tokenize(expr).into_iter().any(|t| have.contains(t))
        }
        Operator::Strrx => match std::str::from_utf8(expr).ok().and_then(|p| Regex::new(p).ok()) {
            Some(re) => std::str::from_utf8(value).map(|v| re.is_match(v)).unwrap_or(false),
            None => false,
        },
        Operator::Numeq | Operator::Numgt | Operator::Numge | Operator::Numlt | Operator::Numle => {
            match (util::parse_leading_number(value), util::parse_leading_number(expr)) {
                (Some(v), Some(e)) => match op {
                    Operator::Numeq => v == e,
                    Operator::Numgt => v > e,
                    Operator::Numge => v >= e,
                    Operator::Numlt => v < e,
                    Operator::Numle => v <= e,
                    _ => unreachable!(),
                },
                _ => false,
            }
        }
        Operator::Numbt => {
            let bounds = split_list(expr);
            if bounds.len() != 2 {
                return false;
            }
            match (
                util::parse_leading_number(value),
                util::parse_leading_number(bounds[0]),
                util::parse_leading_number(bounds[1]),
            ) {
                (Some(v), Some(lo), Some(hi)) => v >= lo && v <= hi,
                _ => false,
            }
        }
        Operator::Numoreq => split_list(expr).iter().any(|e| {
            match (util::parse_leading_number(value), util::parse_leading_number(e)) {
                (Some(v), Some(n)) => v == n,
                _ => false,
            }
        }),
    }
}

fn eval_condition(cond: &Condition, value: Option<&[u8]>) -> bool {
    let raw = match value {
        Some(v) => op_matches(cond.op, v, &cond.expr),
        None => false,
    };
    if cond.negate {
        !raw
    } else {
        raw
    }
}

fn matches_all(conditions: &[Condition], pk: &[u8], store: &HashStore) -> Result<bool> {
    if conditions.is_empty() {
        return Ok(true);
    }
    if conditions.len() == 1 {
        let raw = match store.get(pk)? {
            Some(bytes) => ColumnMap::load_one(&bytes, &conditions[0].column)?,
            None => None,
        };
        return Ok(eval_condition(&conditions[0], raw.as_deref()));
    }
    let cols = match store.get(pk)? {
        Some(bytes) => ColumnMap::load(&bytes)?,
        None => return Ok(false),
    };
    for cond in conditions {
        let value = cols.get(&cond.column);
        if !eval_condition(cond, value) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn candidates_for(
    plan: &Plan,
    conditions: &[Condition],
    store: &HashStore,
    indices: &IndexManager,
) -> Result<Vec<Vec<u8>>> {
    match plan {
        Plan::Indexed { main, narrow } => {
            let mut pks = candidates_for_condition(&conditions[*main], indices)?;
            if let Some(n) = narrow {
                let narrow_set: HashSet<Vec<u8>> =
                    candidates_for_condition(&conditions[*n], indices)?.into_iter().collect();
                pks.retain(|pk| narrow_set.contains(pk));
            }
            Ok(pks)
        }
        Plan::Scan { cond } => {
            // Walk the index in key order, testing the predicate against
            // the key with its pk-disambiguator suffix stripped off.
            let condition = &conditions[*cond];
            let mut out = Vec::new();
            for (key, pk) in indices.lexical_all_ordered(&condition.column)? {
                let value = strip_hash_suffix(&key, &pk);
                if eval_condition(condition, Some(value)) {
                    out.push(pk);
                }
            }
            Ok(out)
        }
        Plan::OrderDriven | Plan::FullScan => {
            Ok(store.iter_all()?.into_iter().map(|(pk, _)| pk).collect())
        }
    }
}

/// Lexical composite keys are `value ++ 0x00 ++ hash16(pk)` (or bare
/// `value` for a primary-key index); recover `value` for predicate
/// re-evaluation during an ordered-index scan.
fn strip_hash_suffix<'a>(key: &'a [u8], pk: &[u8]) -> &'a [u8] {
    let suffix_len = 1 + 2; // NUL + u16 hash
    if key.len() > suffix_len {
        let mut probe = key[..key.len() - suffix_len].to_vec();
        util::push_hash_suffix(&mut probe, pk);
        if probe.as_slice() == key {
            return &key[..key.len() - suffix_len];
        }
    }
    key
}

fn candidates_for_condition(cond: &Condition, indices: &IndexManager) -> Result<Vec<Vec<u8>>> {
    match indices.kind_of(&cond.column) {
        Some(IndexKind::Lexical) => match cond.op {
            Operator::Streq => indices.lexical_eq(&cond.column, &cond.expr),
            Operator::Strbw => indices.lexical_prefix(&cond.column, &cond.expr),
            Operator::Stroreq => {
                let mut out = Vec::new();
                for v in split_list(&cond.expr) {
                    out.extend(indices.lexical_eq(&cond.column, v)?);
                }
                Ok(out)
            }
            _ => Ok(Vec::new()),
        },
        Some(IndexKind::Decimal) => match cond.op {
            Operator::Numeq => {
                let n = util::parse_leading_number(&cond.expr).unwrap_or(f64::NAN);
                Ok(indices
                    .decimal_from(&cond.column, n)?
                    .into_iter()
                    .take_while(|(v, _)| *v == Some(n))
                    .map(|(_, pk)| pk)
                    .collect())
            }
            Operator::Numge | Operator::Numgt => {
                let n = util::parse_leading_number(&cond.expr).unwrap_or(f64::NAN);
                Ok(indices
                    .decimal_from(&cond.column, n)?
                    .into_iter()
                    .filter(|(v, _)| match (v, cond.op) {
                        (Some(v), Operator::Numgt) => *v > n,
                        (Some(v), _) => *v >= n,
                        _ => false,
                    })
                    .map(|(_, pk)| pk)
                    .collect())
            }
            Operator::Numle | Operator::Numlt => {
                Ok(indices
                    .decimal_all(&cond.column)?
                    .into_iter()
                    .filter(|(v, _)| match (v, cond.op) {
                        (Some(v), Operator::Numlt) => {
                            *v < util::parse_leading_number(&cond.expr).unwrap_or(f64::NAN)
                        }
                        (Some(v), _) => {
                            *v <= util::parse_leading_number(&cond.expr).unwrap_or(f64::NAN)
                        }
                        _ => false,
                    })
                    .map(|(_, pk)| pk)
                    .collect())
            }
            Operator::Numbt => {
                let bounds = split_list(&cond.expr);
                if bounds.len() != 2 {
                    return Ok(Vec::new());
                }
                let lo = util::parse_leading_number(bounds[0]).unwrap_or(f64::NAN);
                let hi = util::parse_leading_number(bounds[1]).unwrap_or(f64::NAN);
                Ok(indices
                    .decimal_from(&cond.column, lo)?
                    .into_iter()
                    .take_while(|(v, _)| v.map(|v| v <= hi).unwrap_or(false))
                    .map(|(_, pk)| pk)
                    .collect())
            }
            Operator::Numoreq => {
                let mut out = Vec::new();
                for e in split_list(&cond.expr) {
                    if let Some(n) = util::parse_leading_number(e) {
                        out.extend(
                            indices
                                .decimal_from(&cond.column, n)?
                                .into_iter()
                                .take_while(|(v, _)| *v == Some(n))
                                .map(|(_, pk)| pk),
                        );
                    }
                }
                Ok(out)
            }
            _ => Ok(Vec::new()),
        },
        Some(IndexKind::Token) => match cond.op {
            Operator::Strand => {
                let mut sets = util::tokenize(&cond.expr)
                    .into_iter()
                    .map(|t| indices.token_postings(&cond.column, t).map(|v| v.into_iter().collect::<HashSet<_>>()));
                let first = match sets.next() {
                    Some(s) => s?,
                    None => return Ok(Vec::new()),
                };
                let mut acc = first;
                for s in sets {
                    let s = s?;
                    acc.retain(|pk| s.contains(pk));
                }
                Ok(acc.into_iter().collect())
            }
            Operator::Stror => {
                let mut acc = HashSet::new();
                for t in util::tokenize(&cond.expr) {
                    acc.extend(indices.token_postings(&cond.column, t)?);
                }
                Ok(acc.into_iter().collect())
            }
            _ => Ok(Vec::new()),
        },
        None => Ok(Vec::new()),
    }
}

fn order_key(cols: &ColumnMap, order: &crate::query::Order) -> OrderKey {
    let raw = cols.get(&order.column).map(|v| v.to_vec());
    if order.otype.is_numeric() {
        OrderKey::Num(raw.as_deref().and_then(util::parse_leading_number))
    } else {
        OrderKey::Str(raw)
    }
}

enum OrderKey {
    Str(Option<Vec<u8>>),
    Num(Option<f64>),
}

fn compare_keys(a: &OrderKey, b: &OrderKey) -> Ordering {
    match (a, b) {
        (OrderKey::Str(a), OrderKey::Str(b)) => a.cmp(b),
        (OrderKey::Num(a), OrderKey::Num(b)) => match (a, b) {
            (Some(a), Some(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
        _ => Ordering::Equal,
    }
}

/// Run `query` against `store`/`indices`, returning matching primary
/// keys in final (ordered, skipped, limited) order. `rnum` feeds the
/// planner's order-driven-index threshold (§4.5 step 4).
pub fn search(query: &mut Query, store: &HashStore, indices: &IndexManager, rnum: u64) -> Result<Vec<Vec<u8>>> {
    let plan = planner::plan(query, indices, rnum);
    let candidates = candidates_for(&plan, &query.conditions, store, indices)?;

    let residual: Vec<Condition> = match &plan {
        Plan::Indexed { main, narrow } => query
            .conditions
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != Some(*main) && Some(*i) != *narrow)
            .map(|(_, c)| c.clone())
            .collect(),
        Plan::Scan { cond } => query
            .conditions
            .iter()
            .enumerate()
            .filter(|(i, _)| i != cond)
            .map(|(_, c)| c.clone())
            .collect(),
        Plan::OrderDriven | Plan::FullScan => query.conditions.clone(),
    };

    let mut survivors = Vec::new();
    for pk in candidates {
        if matches_all(&residual, &pk, store)? {
            survivors.push(pk);
        }
    }

    if let Some(order) = &query.order {
        let mut keyed = Vec::with_capacity(survivors.len());
        for pk in survivors {
            let cols = match store.get(&pk)? {
                Some(bytes) => ColumnMap::load(&bytes)?,
                None => ColumnMap::new(),
            };
            let key = order_key(&cols, order);
            keyed.push((key, pk));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            let ord = compare_keys(a, b);
            if order.otype.is_descending() {
                ord.reverse()
            } else {
                ord
            }
        });
        survivors = keyed.into_iter().map(|(_, pk)| pk).collect();
    }

    let skipped: Vec<Vec<u8>> = survivors.into_iter().skip(query.skip).collect();
    let limited = match query.max {
        Some(max) => skipped.into_iter().take(max).collect(),
        None => skipped,
    };
    query.log_hint(format!("auxiliary result set size: {}", limited.len()));
    Ok(limited)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streq_matches_exact_value_only() {
        let cond = Condition {
            column: b"name".to_vec(),
            op: Operator::Streq,
            expr: b"alice".to_vec(),
            negate: false,
            noidx: false,
            alive: true,
        };
        assert!(eval_condition(&cond, Some(b"alice")));
        assert!(!eval_condition(&cond, Some(b"bob")));
        assert!(!eval_condition(&cond, None));
    }

    #[test]
    fn negated_condition_on_missing_column_succeeds() {
        let cond = Condition {
            column: b"name".to_vec(),
            op: Operator::Streq,
            expr: b"alice".to_vec(),
            negate: true,
            noidx: false,
            alive: true,
        };
        assert!(eval_condition(&cond, None));
    }

    #[test]
    fn numbt_checks_inclusive_range() {
        let cond = Condition {
            column: b"age".to_vec(),
            op: Operator::Numbt,
            expr: b"10,20".to_vec(),
            negate: false,
            noidx: false,
            alive: true,
        };
        assert!(eval_condition(&cond, Some(b"10")));
        assert!(eval_condition(&cond, Some(b"20")));
        assert!(!eval_condition(&cond, Some(b"21")));
    }
}
