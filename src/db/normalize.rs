//! Column label normalization.
//!
//! Unaliased joins often return the same label twice (`id`, `id`). Labels are
//! made unique by suffixing every repeated occurrence with its zero-based
//! column position; the first occurrence keeps the bare label.

use std::collections::HashSet;

use super::{ColumnInfo, ResultSet};

/// Makes column labels unique, preserving order.
pub fn dedupe_labels<S: AsRef<str>>(labels: &[S]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(labels.len());
    let mut out = Vec::with_capacity(labels.len());

    for (index, label) in labels.iter().enumerate() {
        let label = label.as_ref();
        let mut candidate = label.to_string();
        // A generated label can itself collide with a real one (`a`, `a`, `a_1`).
        while seen.contains(&candidate) {
            candidate = format!("{candidate}_{index}");
        }
        seen.insert(candidate.clone());
        out.push(candidate);
    }

    out
}

/// Normalizes a result set's column labels in place. Rows are untouched.
pub fn normalize(mut result: ResultSet) -> ResultSet {
    let labels = dedupe_labels(&result.column_names());
    result.columns = result
        .columns
        .into_iter()
        .zip(labels)
        .map(|(column, name)| ColumnInfo::new(name, column.data_type))
        .collect();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Value;

    #[test]
    fn test_unique_labels_untouched() {
        assert_eq!(dedupe_labels(&["id", "name"]), vec!["id", "name"]);
    }

    #[test]
    fn test_duplicate_gets_position_suffix() {
        assert_eq!(
            dedupe_labels(&["id", "name", "id"]),
            vec!["id", "name", "id_2"]
        );
        assert_eq!(
            dedupe_labels(&["count", "count", "count"]),
            vec!["count", "count_1", "count_2"]
        );
    }

    #[test]
    fn test_generated_label_does_not_collide() {
        let labels = dedupe_labels(&["a", "a_1", "a", "a"]);
        assert_eq!(labels[0], "a");
        assert_eq!(labels[1], "a_1");
        assert_eq!(labels[2], "a_2");
        assert_eq!(labels[3], "a_3");
        let unique: HashSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), labels.len());
    }

    #[test]
    fn test_normalize_preserves_rows_and_types() {
        let result = ResultSet::with_data(
            vec![ColumnInfo::new("id", "INT4"), ColumnInfo::new("id", "INT8")],
            vec![
                vec![Value::Int(2), Value::Int(20)],
                vec![Value::Int(1), Value::Int(10)],
            ],
        );

        let normalized = normalize(result.clone());
        assert_eq!(normalized.column_names(), vec!["id", "id_1"]);
        assert_eq!(normalized.columns[1].data_type, "INT8");
        assert_eq!(normalized.rows, result.rows);
    }
}
