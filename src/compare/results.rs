//! Result-set equivalence.
//!
//! Two result sets are equivalent when every expected column can be paired
//! with a distinct actual column holding the same multiset of values, and the
//! actual rows projected onto those columns form the same bag of tuples as the
//! expected rows. Labels and row order never matter.
//!
//! Column pairing is greedy: each expected column claims the first unclaimed
//! actual column with a matching multiset, without backtracking. When two
//! actual columns have identical contents the choice between them cannot
//! change the projected rows, so greedy pairing only misses a match when
//! distinct columns share a multiset but differ in row alignment.

use std::collections::HashMap;
use std::hash::Hash;
use tracing::debug;

use crate::db::{ResultSet, Value};

/// Pairing of expected columns to actual columns, by position.
///
/// Injective: no actual column appears twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    /// `actual[i]` is the actual column paired with expected column `i`.
    actual: Vec<usize>,
}

impl ColumnMapping {
    /// Actual column index paired with the given expected column.
    pub fn actual_for(&self, expected: usize) -> Option<usize> {
        self.actual.get(expected).copied()
    }

    /// Number of paired columns.
    pub fn len(&self) -> usize {
        self.actual.len()
    }

    /// Returns true if no columns are paired.
    pub fn is_empty(&self) -> bool {
        self.actual.is_empty()
    }

    /// Pairs as `(expected, actual)` in expected order.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.actual.iter().copied().enumerate()
    }
}

/// Decides whether `actual` answers the same question as `expected`.
///
/// Lenient mode ignores extra actual columns. Strict mode requires the column
/// counts to match.
pub fn compare(actual: &ResultSet, expected: &ResultSet, strict: bool) -> bool {
    if actual.column_count() < expected.column_count() {
        return false;
    }
    if strict && actual.column_count() != expected.column_count() {
        return false;
    }
    if actual.row_count() != expected.row_count() {
        return false;
    }

    match map_columns(actual, expected) {
        Some(mapping) => {
            debug!("Column mapping (expected, actual): {:?}", mapping.pairs().collect::<Vec<_>>());
            rows_match(actual, expected, &mapping)
        }
        None => false,
    }
}

/// Pairs each expected column with an unclaimed actual column of equal contents.
///
/// Returns None as soon as an expected column finds no partner.
pub fn map_columns(actual: &ResultSet, expected: &ResultSet) -> Option<ColumnMapping> {
    let actual_bags: Vec<HashMap<&Value, usize>> = (0..actual.column_count())
        .map(|i| bag(actual.column_values(i)))
        .collect();
    let mut claimed = vec![false; actual.column_count()];
    let mut mapping = Vec::with_capacity(expected.column_count());

    for i in 0..expected.column_count() {
        let wanted = bag(expected.column_values(i));
        let partner = actual_bags
            .iter()
            .enumerate()
            .find(|(j, candidate)| !claimed[*j] && **candidate == wanted)
            .map(|(j, _)| j)?;
        claimed[partner] = true;
        mapping.push(partner);
    }

    Some(ColumnMapping { actual: mapping })
}

fn rows_match(actual: &ResultSet, expected: &ResultSet, mapping: &ColumnMapping) -> bool {
    let projected = actual
        .rows
        .iter()
        .map(|row| mapping.actual.iter().map(|&j| &row[j]).collect::<Vec<_>>());
    let wanted = expected.rows.iter().map(|row| row.iter().collect::<Vec<_>>());

    bag(projected) == bag(wanted)
}

fn bag<T: Eq + Hash>(items: impl IntoIterator<Item = T>) -> HashMap<T, usize> {
    let mut counts = HashMap::new();
    for item in items {
        *counts.entry(item).or_insert(0) += 1;
    }
    counts
}
