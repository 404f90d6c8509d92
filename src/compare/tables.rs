//! Table-reference extraction and comparison.
//!
//! Used by the table-identification task: an agent passes when it names the
//! tables the golden query reads from.

use std::collections::{BTreeSet, HashSet};
use std::ops::ControlFlow;

use sqlparser::ast::{ObjectName, Query, Visit, Visitor};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::{EvalError, Result};

/// Collects relation names and CTE aliases while walking a statement.
#[derive(Default)]
struct RelationCollector {
    relations: Vec<String>,
    ctes: HashSet<String>,
}

impl Visitor for RelationCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(cte.alias.name.value.to_lowercase());
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        let name = relation
            .0
            .iter()
            .map(|ident| ident.value.to_lowercase())
            .collect::<Vec<_>>()
            .join(".");
        self.relations.push(name);
        ControlFlow::Continue(())
    }
}

/// Returns the lower-cased tables referenced by `sql`.
///
/// CTE names are excluded. Schema-qualified names keep their qualifier.
pub fn referenced_tables(sql: &str) -> Result<BTreeSet<String>> {
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| EvalError::query(format!("SQL parse error: {e}")))?;

    let mut collector = RelationCollector::default();
    for statement in &statements {
        let _ = statement.visit(&mut collector);
    }

    let RelationCollector { relations, ctes } = collector;
    Ok(relations
        .into_iter()
        .filter(|name| !ctes.contains(name))
        .collect())
}

/// Normalizes agent-supplied table names the same way parsed names are.
pub fn normalize_tables<S: AsRef<str>>(tables: &[S]) -> BTreeSet<String> {
    tables
        .iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Strict: the sets are equal. Lenient: every expected table was named.
pub fn compare_tables(
    actual: &BTreeSet<String>,
    expected: &BTreeSet<String>,
    strict: bool,
) -> bool {
    if strict {
        actual == expected
    } else {
        expected.is_subset(actual)
    }
}
