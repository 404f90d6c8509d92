//! Database schema types.
//!
//! Agents receive the target database's structure as DDL-like text. Table and
//! column comments loaded with the fixture are included so the model sees the
//! same descriptions a human would.

use serde::{Deserialize, Serialize};

/// The public schema of one target database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    /// All tables, ordered by name.
    pub tables: Vec<Table>,

    /// Foreign key relationships between tables.
    pub foreign_keys: Vec<ForeignKey>,
}

impl Schema {
    /// Creates a new empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all tables.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Returns a copy limited to the named tables (case-insensitive).
    ///
    /// Foreign keys are kept only when both ends survive.
    pub fn restrict_to<S: AsRef<str>>(&self, names: &[S]) -> Schema {
        let wanted: Vec<String> = names.iter().map(|n| n.as_ref().to_lowercase()).collect();
        let keep = |table: &str| wanted.iter().any(|w| *w == table.to_lowercase());

        Schema {
            tables: self
                .tables
                .iter()
                .filter(|t| keep(&t.name))
                .cloned()
                .collect(),
            foreign_keys: self
                .foreign_keys
                .iter()
                .filter(|fk| keep(&fk.from_table) && keep(&fk.to_table))
                .cloned()
                .collect(),
        }
    }

    /// Formats the schema as CREATE TABLE statements for an LLM prompt.
    pub fn format_for_llm(&self) -> String {
        self.tables
            .iter()
            .map(|table| self.format_table(table))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn format_table(&self, table: &Table) -> String {
        let mut lines: Vec<String> = table
            .columns
            .iter()
            .map(|column| {
                let null = if column.is_nullable { "NULL" } else { "NOT NULL" };
                let mut line = format!("    {} {} {}", column.name, column.data_type, null);
                if let Some(description) = &column.description {
                    line.push_str(" -- ");
                    line.push_str(description);
                }
                line
            })
            .collect();

        if !table.primary_key.is_empty() {
            lines.push(format!("    PRIMARY KEY ({})", table.primary_key.join(", ")));
        }

        lines.extend(
            self.foreign_keys
                .iter()
                .filter(|fk| fk.from_table == table.name)
                .map(|fk| {
                    format!(
                        "    FOREIGN KEY ({}) REFERENCES {} ({})",
                        fk.from_columns.join(", "),
                        fk.to_table,
                        fk.to_columns.join(", ")
                    )
                }),
        );

        let header = match &table.description {
            Some(description) => format!("-- {description}\n"),
            None => String::new(),
        };

        format!(
            "{header}CREATE TABLE {}\n(\n{}\n);\n",
            table.name,
            lines.join(",\n")
        )
    }
}

/// Represents a database table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,

    /// Table comment, if any.
    pub description: Option<String>,

    /// Columns in ordinal order.
    pub columns: Vec<Column>,

    /// Column names that form the primary key.
    pub primary_key: Vec<String>,
}

impl Table {
    /// Creates a new table with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Represents a column in a table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Formatted data type (e.g., "integer", "character varying(255)").
    pub data_type: String,

    /// Whether the column allows NULL values.
    pub is_nullable: bool,

    /// Column comment, if any.
    pub description: Option<String>,
}

impl Column {
    /// Creates a new nullable column with the given name and data type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            description: None,
        }
    }

    /// Sets whether the column is nullable.
    pub fn nullable(self, nullable: bool) -> Self {
        Self {
            is_nullable: nullable,
            ..self
        }
    }

    /// Sets the column comment.
    pub fn with_description(self, description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..self
        }
    }
}

/// Represents a foreign key relationship between tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Source table name.
    pub from_table: String,

    /// Source column names.
    pub from_columns: Vec<String>,

    /// Target table name.
    pub to_table: String,

    /// Target column names.
    pub to_columns: Vec<String>,
}

impl ForeignKey {
    /// Creates a new foreign key relationship.
    pub fn new(
        from_table: impl Into<String>,
        from_columns: Vec<String>,
        to_table: impl Into<String>,
        to_columns: Vec<String>,
    ) -> Self {
        Self {
            from_table: from_table.into(),
            from_columns,
            to_table: to_table.into(),
            to_columns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        Schema {
            tables: vec![
                Table {
                    name: "singer".to_string(),
                    description: Some("Performers known to the venue".to_string()),
                    columns: vec![
                        Column::new("singer_id", "integer").nullable(false),
                        Column::new("name", "text").with_description("Stage name"),
                        Column::new("country", "text"),
                    ],
                    primary_key: vec!["singer_id".to_string()],
                },
                Table {
                    name: "concert".to_string(),
                    description: None,
                    columns: vec![
                        Column::new("concert_id", "integer").nullable(false),
                        Column::new("singer_id", "integer"),
                        Column::new("year", "integer"),
                    ],
                    primary_key: vec!["concert_id".to_string()],
                },
                Table::new("stadium"),
            ],
            foreign_keys: vec![ForeignKey::new(
                "concert",
                vec!["singer_id".to_string()],
                "singer",
                vec!["singer_id".to_string()],
            )],
        }
    }

    #[test]
    fn test_format_for_llm_renders_ddl() {
        let formatted = sample_schema().format_for_llm();

        assert!(formatted.contains("-- Performers known to the venue\nCREATE TABLE singer\n("));
        assert!(formatted.contains("    singer_id integer NOT NULL"));
        assert!(formatted.contains("    name text NULL -- Stage name"));
        assert!(formatted.contains("    PRIMARY KEY (concert_id)"));
        assert!(formatted.contains("    FOREIGN KEY (singer_id) REFERENCES singer (singer_id)"));
    }

    #[test]
    fn test_restrict_to_is_case_insensitive() {
        let restricted = sample_schema().restrict_to(&["CONCERT"]);
        assert_eq!(restricted.table_names(), vec!["concert"]);
        // singer was dropped, so the FK is dropped too
        assert!(restricted.foreign_keys.is_empty());

        let both = sample_schema().restrict_to(&["concert", "singer"]);
        assert_eq!(both.tables.len(), 2);
        assert_eq!(both.foreign_keys.len(), 1);
    }

    #[test]
    fn test_empty_schema() {
        let schema = Schema::new();
        assert!(schema.format_for_llm().is_empty());
        assert!(schema.table_names().is_empty());
    }
}
