//! Schema DSL - fixed vocabulary for schema-change statements
//!
//! A migration unit's forward and backward operations are closures over
//! [`SchemaBuilder`], which collects SQL statements from a small set of
//! schema operations: create/drop table, add/drop column, indexes, foreign
//! keys, and a raw escape hatch for anything else (including units loaded
//! from `.sql` files).

use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// Collects schema-change statements for one direction of one unit.
pub struct SchemaBuilder {
    statements: Vec<String>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self {
            statements: Vec::new(),
        }
    }

    /// Create a new table
    pub fn create_table<F>(&mut self, table_name: &str, callback: F) -> &mut Self
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut table = TableBuilder::new(table_name);
        callback(&mut table);
        self.statements.push(table.to_sql());
        self
    }

    /// Drop a table
    pub fn drop_table(&mut self, table_name: &str) -> &mut Self {
        self.statements
            .push(format!("DROP TABLE IF EXISTS {};", table_name));
        self
    }

    /// Add a column to an existing table
    pub fn add_column(&mut self, table_name: &str, column_name: &str, sql_type: &str) -> &mut Self {
        self.statements.push(format!(
            "ALTER TABLE {} ADD COLUMN {} {};",
            table_name, column_name, sql_type
        ));
        self
    }

    /// Drop a column from an existing table. Destructive; a backward
    /// operation re-adding the column cannot restore its data.
    pub fn drop_column(&mut self, table_name: &str, column_name: &str) -> &mut Self {
        self.statements.push(format!(
            "ALTER TABLE {} DROP COLUMN {};",
            table_name, column_name
        ));
        self
    }

    /// Make an existing column nullable
    pub fn set_nullable(&mut self, table_name: &str, column_name: &str) -> &mut Self {
        self.statements.push(format!(
            "ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL;",
            table_name, column_name
        ));
        self
    }

    /// Add a foreign key constraint to an existing table
    pub fn add_foreign_key(
        &mut self,
        table_name: &str,
        column: &str,
        references_table: &str,
        references_column: &str,
    ) -> &mut Self {
        self.statements.push(format!(
            "ALTER TABLE {} ADD CONSTRAINT fk_{}_{} FOREIGN KEY ({}) REFERENCES {} ({});",
            table_name, table_name, column, column, references_table, references_column
        ));
        self
    }

    /// Create an index
    pub fn create_index(
        &mut self,
        table_name: &str,
        column_names: &[&str],
        index_name: Option<&str>,
    ) -> &mut Self {
        let default_name = format!("idx_{}_{}", table_name, column_names.join("_"));
        let index_name = index_name.unwrap_or(&default_name);
        self.statements.push(format!(
            "CREATE INDEX {} ON {} ({});",
            index_name,
            table_name,
            column_names.join(", ")
        ));
        self
    }

    /// Drop an index
    pub fn drop_index(&mut self, index_name: &str) -> &mut Self {
        self.statements
            .push(format!("DROP INDEX IF EXISTS {};", index_name));
        self
    }

    /// Append raw SQL. Multi-statement strings are split so each statement
    /// executes on its own.
    pub fn raw(&mut self, sql: &str) -> &mut Self {
        self.statements.extend(split_statements(sql));
        self
    }

    /// All collected statements, in order
    pub fn into_sql(self) -> Vec<String> {
        self.statements
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a SQL string into individual statements using a real parser,
/// falling back to naive semicolon splitting when the dialect defeats it.
pub fn split_statements(sql: &str) -> Vec<String> {
    let dialect = GenericDialect {};
    match Parser::parse_sql(&dialect, sql) {
        Ok(parsed) => parsed.into_iter().map(|stmt| format!("{};", stmt)).collect(),
        Err(e) => {
            tracing::warn!("SQL parsing failed, using naive semicolon splitting: {}", e);
            sql.split(';')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| format!("{};", s))
                .collect()
        }
    }
}

/// Column and constraint builder for CREATE TABLE statements
pub struct TableBuilder {
    table_name: String,
    columns: Vec<ColumnDef>,
    constraints: Vec<String>,
}

impl TableBuilder {
    pub fn new(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            columns: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Add a column with an explicit SQL type
    pub fn column(&mut self, name: &str, sql_type: &str) -> &mut ColumnDef {
        self.columns.push(ColumnDef::new(name, sql_type));
        self.columns.last_mut().unwrap()
    }

    /// UUID primary key with a server-side default
    pub fn id(&mut self, name: &str) -> &mut ColumnDef {
        self.column(name, "UUID")
            .primary_key()
            .default_to("gen_random_uuid()")
    }

    pub fn uuid(&mut self, name: &str) -> &mut ColumnDef {
        self.column(name, "UUID")
    }

    pub fn string(&mut self, name: &str) -> &mut ColumnDef {
        self.column(name, "VARCHAR(255)")
    }

    pub fn text(&mut self, name: &str) -> &mut ColumnDef {
        self.column(name, "TEXT")
    }

    pub fn integer(&mut self, name: &str) -> &mut ColumnDef {
        self.column(name, "INTEGER")
    }

    pub fn small_integer(&mut self, name: &str) -> &mut ColumnDef {
        self.column(name, "SMALLINT")
    }

    pub fn boolean(&mut self, name: &str) -> &mut ColumnDef {
        self.column(name, "BOOLEAN")
    }

    /// `created_at` timestamp defaulting to the insertion time
    pub fn created_at(&mut self) -> &mut ColumnDef {
        self.column("created_at", "TIMESTAMPTZ(6)")
            .not_null()
            .default_to("now()")
    }

    /// Add a table-level primary key constraint
    pub fn primary_key(&mut self, columns: &[&str]) -> &mut Self {
        self.constraints
            .push(format!("PRIMARY KEY ({})", columns.join(", ")));
        self
    }

    /// Add a foreign key constraint
    pub fn foreign_key(
        &mut self,
        column: &str,
        references_table: &str,
        references_column: &str,
    ) -> &mut Self {
        self.constraints.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            column, references_table, references_column
        ));
        self
    }

    /// Add a unique constraint
    pub fn unique(&mut self, columns: &[&str]) -> &mut Self {
        self.constraints
            .push(format!("UNIQUE ({})", columns.join(", ")));
        self
    }

    /// Build the CREATE TABLE statement
    pub fn to_sql(&self) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(ColumnDef::to_sql).collect();
        parts.extend(self.constraints.iter().cloned());

        format!(
            "CREATE TABLE {} (\n    {}\n);",
            self.table_name,
            parts.join(",\n    ")
        )
    }
}

/// A single column definition with chainable modifiers
pub struct ColumnDef {
    name: String,
    sql_type: String,
    not_null: bool,
    primary_key: bool,
    default: Option<String>,
}

impl ColumnDef {
    fn new(name: &str, sql_type: &str) -> Self {
        Self {
            name: name.to_string(),
            sql_type: sql_type.to_string(),
            not_null: false,
            primary_key: false,
            default: None,
        }
    }

    pub fn not_null(&mut self) -> &mut Self {
        self.not_null = true;
        self
    }

    pub fn primary_key(&mut self) -> &mut Self {
        self.primary_key = true;
        self
    }

    /// Server-side default expression
    pub fn default_to(&mut self, expr: &str) -> &mut Self {
        self.default = Some(expr.to_string());
        self
    }

    fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.sql_type);
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        sql
    }
}
