//! PostgreSQL DDL rendering.
//!
//! Every statement is schema qualified and ends with a semicolon. Hashed
//! definitions (`hash:body`) are rendered from their body, and the hash is
//! stored in a `COMMENT` so introspection can report it back unchanged.

use monolayer_schema::naming::split_hashed;
use monolayer_schema::{ColumnInfo, Identity, TableInfo};

/// Comment marking namespaces managed by monolayer.
pub const SCHEMA_COMMENT: &str = "monolayer";

/// DDL generator for one PostgreSQL schema.
#[derive(Debug, Clone)]
pub struct PostgresDdl {
    schema: String,
}

impl PostgresDdl {
    /// Create a generator for `schema`.
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }

    /// Schema name.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// `"schema"."name"`.
    pub fn qualified(&self, name: &str) -> String {
        format!("{}.{}", quote(&self.schema), quote(name))
    }

    /// Generate CREATE SCHEMA statements.
    pub fn create_schema(&self, name: &str) -> Vec<String> {
        vec![
            format!("CREATE SCHEMA IF NOT EXISTS {};", quote(name)),
            format!(
                "COMMENT ON SCHEMA {} IS {};",
                quote(name),
                quote_literal(SCHEMA_COMMENT)
            ),
        ]
    }

    /// Generate DROP SCHEMA statement.
    pub fn drop_schema(&self, name: &str) -> String {
        format!("DROP SCHEMA IF EXISTS {};", quote(name))
    }

    /// Generate CREATE EXTENSION statement.
    pub fn create_extension(&self, name: &str) -> String {
        format!("CREATE EXTENSION IF NOT EXISTS {};", quote(name))
    }

    /// Generate DROP EXTENSION statement.
    pub fn drop_extension(&self, name: &str) -> String {
        format!("DROP EXTENSION IF EXISTS {};", quote(name))
    }

    /// Generate CREATE TYPE for an enum.
    pub fn create_enum(&self, name: &str, values: &[String]) -> String {
        let values: Vec<String> = values.iter().map(|v| quote_literal(v)).collect();
        format!(
            "CREATE TYPE {} AS ENUM ({});",
            self.qualified(name),
            values.join(", ")
        )
    }

    /// Generate DROP TYPE.
    pub fn drop_enum(&self, name: &str) -> String {
        format!("DROP TYPE IF EXISTS {};", self.qualified(name))
    }

    /// Generate ALTER TYPE .. ADD VALUE. Cannot run inside a transaction.
    pub fn add_enum_value(&self, name: &str, value: &str, before: Option<&str>) -> String {
        match before {
            Some(next) => format!(
                "ALTER TYPE {} ADD VALUE IF NOT EXISTS {} BEFORE {};",
                self.qualified(name),
                quote_literal(value),
                quote_literal(next)
            ),
            None => format!(
                "ALTER TYPE {} ADD VALUE IF NOT EXISTS {};",
                self.qualified(name),
                quote_literal(value)
            ),
        }
    }

    /// Recreate an enum with `values` and move `columns` (table, column) over.
    ///
    /// PostgreSQL cannot remove enum values, so the type is swapped instead.
    pub fn rebuild_enum(&self, name: &str, values: &[String], columns: &[(String, String)]) -> Vec<String> {
        let retired = format!("{}_monolayer_previous", name);
        let mut stmts = vec![
            format!("ALTER TYPE {} RENAME TO {};", self.qualified(name), quote(&retired)),
            self.create_enum(name, values),
        ];
        for (table, column) in columns {
            stmts.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::text::{};",
                self.qualified(table),
                quote(column),
                self.qualified(name),
                quote(column),
                self.qualified(name)
            ));
        }
        stmts.push(format!("DROP TYPE {};", self.qualified(&retired)));
        stmts
    }

    /// Generate CREATE TABLE plus default fingerprints.
    pub fn create_table(&self, table: &str, info: &TableInfo) -> Vec<String> {
        let columns: Vec<String> = info
            .columns
            .iter()
            .map(|(name, column)| self.column_definition(name, column))
            .collect();

        let mut stmts = vec![format!(
            "CREATE TABLE {} (\n    {}\n);",
            self.qualified(table),
            columns.join(",\n    ")
        )];
        for (name, column) in &info.columns {
            if let Some(hash) = column.default_value.as_deref().and_then(|v| split_hashed(v).0) {
                stmts.push(self.comment_on_column(table, name, Some(hash)));
            }
        }
        stmts
    }

    /// Generate a column definition.
    pub fn column_definition(&self, name: &str, column: &ColumnInfo) -> String {
        let mut parts = vec![quote(name), column.data_type.clone()];

        if let Some(identity) = column.identity {
            parts.push(format!("GENERATED {} AS IDENTITY", identity.as_sql()));
        } else if let Some(expression) = column.default_expression() {
            parts.push(format!("DEFAULT {}", expression));
        }

        if !column.is_nullable {
            parts.push("NOT NULL".to_string());
        }

        parts.join(" ")
    }

    /// Generate DROP TABLE statement.
    pub fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE {};", self.qualified(table))
    }

    /// Generate ALTER TABLE .. RENAME TO.
    pub fn rename_table(&self, from: &str, to: &str) -> String {
        format!("ALTER TABLE {} RENAME TO {};", self.qualified(from), quote(to))
    }

    /// Generate ADD COLUMN plus default fingerprint.
    pub fn add_column(&self, table: &str, name: &str, column: &ColumnInfo) -> Vec<String> {
        let mut stmts = vec![format!(
            "ALTER TABLE {} ADD COLUMN {};",
            self.qualified(table),
            self.column_definition(name, column)
        )];
        if let Some(hash) = column.default_value.as_deref().and_then(|v| split_hashed(v).0) {
            stmts.push(self.comment_on_column(table, name, Some(hash)));
        }
        stmts
    }

    /// Generate DROP COLUMN.
    pub fn drop_column(&self, table: &str, name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {};",
            self.qualified(table),
            quote(name)
        )
    }

    /// Generate RENAME COLUMN.
    pub fn rename_column(&self, table: &str, from: &str, to: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {};",
            self.qualified(table),
            quote(from),
            quote(to)
        )
    }

    /// Generate ALTER COLUMN .. TYPE.
    pub fn alter_column_type(&self, table: &str, column: &str, data_type: &str) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{};",
            self.qualified(table),
            quote(column),
            data_type,
            quote(column),
            data_type
        )
    }

    /// Generate SET DEFAULT from a `hash:expression` value.
    pub fn set_default(&self, table: &str, column: &str, value: &str) -> Vec<String> {
        let (hash, expression) = split_hashed(value);
        vec![
            format!(
                "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {};",
                self.qualified(table),
                quote(column),
                expression
            ),
            self.comment_on_column(table, column, hash),
        ]
    }

    /// Generate DROP DEFAULT and clear the fingerprint.
    pub fn drop_default(&self, table: &str, column: &str) -> Vec<String> {
        vec![
            format!(
                "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT;",
                self.qualified(table),
                quote(column)
            ),
            self.comment_on_column(table, column, None),
        ]
    }

    fn comment_on_column(&self, table: &str, column: &str, hash: Option<&str>) -> String {
        format!(
            "COMMENT ON COLUMN {}.{} IS {};",
            self.qualified(table),
            quote(column),
            hash.map(quote_literal).unwrap_or_else(|| "NULL".to_string())
        )
    }

    /// Generate ADD GENERATED .. AS IDENTITY.
    pub fn add_identity(&self, table: &str, column: &str, identity: Identity) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} ADD GENERATED {} AS IDENTITY;",
            self.qualified(table),
            quote(column),
            identity.as_sql()
        )
    }

    /// Generate DROP IDENTITY.
    pub fn drop_identity(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} DROP IDENTITY IF EXISTS;",
            self.qualified(table),
            quote(column)
        )
    }

    /// Generate SET GENERATED.
    pub fn set_identity(&self, table: &str, column: &str, identity: Identity) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} SET GENERATED {};",
            self.qualified(table),
            quote(column),
            identity.as_sql()
        )
    }

    /// Generate SET NOT NULL or DROP NOT NULL.
    pub fn set_nullability(&self, table: &str, column: &str, nullable: bool) -> String {
        let action = if nullable { "DROP NOT NULL" } else { "SET NOT NULL" };
        format!(
            "ALTER TABLE {} ALTER COLUMN {} {};",
            self.qualified(table),
            quote(column),
            action
        )
    }

    /// Set `NOT NULL` on a populated table without a long exclusive lock.
    ///
    /// A validated `IS NOT NULL` check lets PostgreSQL skip the table scan
    /// of `SET NOT NULL`; the check is dropped afterwards.
    pub fn set_not_null_online(&self, table: &str, column: &str, check: &str) -> Vec<String> {
        let mut stmts = self.add_constraint_not_valid(
            table,
            check,
            &format!("CHECK ({} IS NOT NULL)", quote(column)),
        );
        stmts.push(self.set_nullability(table, column, false));
        stmts.push(self.drop_constraint(table, check));
        stmts
    }

    /// Generate ADD CONSTRAINT plus fingerprint for hashed definitions.
    pub fn add_constraint(&self, table: &str, name: &str, definition: &str) -> Vec<String> {
        let (hash, body) = split_hashed(definition);
        let mut stmts = vec![format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {};",
            self.qualified(table),
            quote(name),
            body
        )];
        if let Some(hash) = hash {
            stmts.push(self.comment_on_constraint(table, name, hash));
        }
        stmts
    }

    /// Add a constraint without scanning the table, then validate it.
    ///
    /// Validation takes a `SHARE UPDATE EXCLUSIVE` lock only, so writes keep
    /// flowing while existing rows are checked.
    pub fn add_constraint_not_valid(&self, table: &str, name: &str, definition: &str) -> Vec<String> {
        let (hash, body) = split_hashed(definition);
        let mut stmts = vec![
            format!(
                "ALTER TABLE {} ADD CONSTRAINT {} {} NOT VALID;",
                self.qualified(table),
                quote(name),
                body
            ),
            format!(
                "ALTER TABLE {} VALIDATE CONSTRAINT {};",
                self.qualified(table),
                quote(name)
            ),
        ];
        if let Some(hash) = hash {
            stmts.push(self.comment_on_constraint(table, name, hash));
        }
        stmts
    }

    /// Build a unique index concurrently and attach it as a constraint.
    /// Cannot run inside a transaction.
    pub fn add_unique_concurrently(&self, table: &str, name: &str, definition: &str) -> Vec<String> {
        let (_, body) = split_hashed(definition);
        let nulls = if body.to_ascii_uppercase().contains("NULLS NOT DISTINCT") {
            " NULLS NOT DISTINCT"
        } else {
            ""
        };
        vec![
            format!(
                "CREATE UNIQUE INDEX CONCURRENTLY {} ON {} {}{};",
                quote(name),
                self.qualified(table),
                column_list(body),
                nulls
            ),
            format!(
                "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE USING INDEX {};",
                self.qualified(table),
                quote(name),
                quote(name)
            ),
        ]
    }

    /// Generate DROP CONSTRAINT.
    pub fn drop_constraint(&self, table: &str, name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {};",
            self.qualified(table),
            quote(name)
        )
    }

    /// Generate DROP CONSTRAINT IF EXISTS, safe to run after a partial apply.
    pub fn drop_constraint_if_exists(&self, table: &str, name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
            self.qualified(table),
            quote(name)
        )
    }

    /// Generate RENAME CONSTRAINT.
    pub fn rename_constraint(&self, table: &str, from: &str, to: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME CONSTRAINT {} TO {};",
            self.qualified(table),
            quote(from),
            quote(to)
        )
    }

    fn comment_on_constraint(&self, table: &str, name: &str, hash: &str) -> String {
        format!(
            "COMMENT ON CONSTRAINT {} ON {} IS {};",
            quote(name),
            self.qualified(table),
            quote_literal(hash)
        )
    }

    /// Generate CREATE INDEX from its stored definition plus fingerprint.
    pub fn create_index(&self, name: &str, definition: &str, concurrently: bool) -> Vec<String> {
        let (hash, body) = split_hashed(definition);
        let body = if concurrently {
            with_concurrently(body)
        } else {
            body.to_string()
        };
        let mut stmts = vec![terminated(&body)];
        if let Some(hash) = hash {
            stmts.push(format!(
                "COMMENT ON INDEX {} IS {};",
                self.qualified(name),
                quote_literal(hash)
            ));
        }
        stmts
    }

    /// Generate DROP INDEX.
    pub fn drop_index(&self, name: &str, concurrently: bool) -> String {
        if concurrently {
            format!("DROP INDEX CONCURRENTLY IF EXISTS {};", self.qualified(name))
        } else {
            format!("DROP INDEX {};", self.qualified(name))
        }
    }

    /// Generate ALTER INDEX .. RENAME TO.
    pub fn rename_index(&self, from: &str, to: &str) -> String {
        format!("ALTER INDEX {} RENAME TO {};", self.qualified(from), quote(to))
    }

    /// Generate CREATE TRIGGER from its stored definition plus fingerprint.
    pub fn create_trigger(&self, table: &str, name: &str, definition: &str) -> Vec<String> {
        let (hash, body) = split_hashed(definition);
        let mut stmts = vec![terminated(body)];
        if let Some(hash) = hash {
            stmts.push(format!(
                "COMMENT ON TRIGGER {} ON {} IS {};",
                quote(name),
                self.qualified(table),
                quote_literal(hash)
            ));
        }
        stmts
    }

    /// Generate DROP TRIGGER.
    pub fn drop_trigger(&self, table: &str, name: &str) -> String {
        format!("DROP TRIGGER {} ON {};", quote(name), self.qualified(table))
    }

    /// Generate ALTER TRIGGER .. RENAME TO.
    pub fn rename_trigger(&self, table: &str, from: &str, to: &str) -> String {
        format!(
            "ALTER TRIGGER {} ON {} RENAME TO {};",
            quote(from),
            self.qualified(table),
            quote(to)
        )
    }
}

/// Quote an identifier.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Rewrite every quoted identifier in `sql` through `map`.
pub fn rewrite_identifiers(sql: &str, map: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '"' {
            out.push(c);
            continue;
        }
        let mut ident = String::new();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    ident.push('"');
                } else {
                    break;
                }
            } else {
                ident.push(c);
            }
        }
        match map(&ident) {
            Some(mapped) => out.push_str(&quote(&mapped)),
            None => out.push_str(&quote(&ident)),
        }
    }
    out
}

/// Quoted identifiers in order of appearance, unescaped.
pub fn quoted_identifiers(sql: &str) -> Vec<String> {
    let mut identifiers = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '"' {
            continue;
        }
        let mut ident = String::new();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    ident.push('"');
                } else {
                    break;
                }
            } else {
                ident.push(c);
            }
        }
        identifiers.push(ident);
    }
    identifiers
}

/// The parenthesized column list of a constraint definition.
fn column_list(body: &str) -> &str {
    match (body.find('('), body.rfind(')')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => body,
    }
}

fn with_concurrently(body: &str) -> String {
    let upper = body.to_ascii_uppercase();
    if upper.contains(" CONCURRENTLY ") {
        return body.to_string();
    }
    match upper.find("INDEX ") {
        Some(pos) => format!("{}INDEX CONCURRENTLY {}", &body[..pos], &body[pos + 6..]),
        None => body.to_string(),
    }
}

fn terminated(sql: &str) -> String {
    let sql = sql.trim_end();
    if sql.ends_with(';') {
        sql.to_string()
    } else {
        format!("{};", sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monolayer_schema::naming::hashed;
    use pretty_assertions::assert_eq;

    fn ddl() -> PostgresDdl {
        PostgresDdl::new("public")
    }

    #[test]
    fn test_create_table() {
        let table = TableInfo::new()
            .column("id", ColumnInfo::new("integer").identity(Identity::Always))
            .column(
                "created_at",
                ColumnInfo::new("timestamptz").not_null().default_sql("now()"),
            )
            .column("email", ColumnInfo::new("text"));

        let stmts = ddl().create_table("users", &table);
        assert_eq!(
            stmts[0],
            "CREATE TABLE \"public\".\"users\" (\n    \"id\" integer GENERATED ALWAYS AS IDENTITY NOT NULL,\n    \"created_at\" timestamptz DEFAULT now() NOT NULL,\n    \"email\" text\n);"
        );
        assert_eq!(stmts.len(), 2);
        assert!(stmts[1].starts_with("COMMENT ON COLUMN \"public\".\"users\".\"created_at\" IS '"));
    }

    #[test]
    fn test_create_index_concurrently() {
        let definition = hashed("CREATE INDEX \"users_email_idx\" ON \"public\".\"users\" USING btree (\"email\")");
        let stmts = ddl().create_index("users_email_idx", &definition, true);
        assert_eq!(
            stmts[0],
            "CREATE INDEX CONCURRENTLY \"users_email_idx\" ON \"public\".\"users\" USING btree (\"email\");"
        );
        assert!(stmts[1].starts_with("COMMENT ON INDEX \"public\".\"users_email_idx\" IS '"));

        let unique = ddl().create_index(
            "users_email_idx",
            "CREATE UNIQUE INDEX \"users_email_idx\" ON \"public\".\"users\" (\"email\")",
            true,
        );
        assert_eq!(unique.len(), 1);
        assert!(unique[0].starts_with("CREATE UNIQUE INDEX CONCURRENTLY \"users_email_idx\""));
    }

    #[test]
    fn test_unique_concurrently() {
        let stmts =
            ddl().add_unique_concurrently("users", "users_email_key", "UNIQUE NULLS NOT DISTINCT (\"email\")");
        assert_eq!(
            stmts,
            vec![
                "CREATE UNIQUE INDEX CONCURRENTLY \"users_email_key\" ON \"public\".\"users\" (\"email\") NULLS NOT DISTINCT;".to_string(),
                "ALTER TABLE \"public\".\"users\" ADD CONSTRAINT \"users_email_key\" UNIQUE USING INDEX \"users_email_key\";".to_string(),
            ]
        );
    }

    #[test]
    fn test_constraint_not_valid() {
        let stmts = ddl().add_constraint_not_valid(
            "books",
            "books_author_id_fkey",
            "FOREIGN KEY (\"author_id\") REFERENCES \"authors\" (\"id\")",
        );
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].ends_with("NOT VALID;"));
        assert_eq!(
            stmts[1],
            "ALTER TABLE \"public\".\"books\" VALIDATE CONSTRAINT \"books_author_id_fkey\";"
        );
    }

    #[test]
    fn test_set_not_null_online() {
        let stmts = ddl().set_not_null_online("users", "email", "users_email_check");
        assert_eq!(
            stmts,
            vec![
                "ALTER TABLE \"public\".\"users\" ADD CONSTRAINT \"users_email_check\" CHECK (\"email\" IS NOT NULL) NOT VALID;".to_string(),
                "ALTER TABLE \"public\".\"users\" VALIDATE CONSTRAINT \"users_email_check\";".to_string(),
                "ALTER TABLE \"public\".\"users\" ALTER COLUMN \"email\" SET NOT NULL;".to_string(),
                "ALTER TABLE \"public\".\"users\" DROP CONSTRAINT \"users_email_check\";".to_string(),
            ]
        );
    }

    #[test]
    fn test_set_default_comments_hash() {
        let value = hashed("0");
        let stmts = ddl().set_default("users", "count", &value);
        assert_eq!(
            stmts[0],
            "ALTER TABLE \"public\".\"users\" ALTER COLUMN \"count\" SET DEFAULT 0;"
        );
        let (hash, _) = split_hashed(&value);
        assert!(stmts[1].ends_with(&format!("IS '{}';", hash.unwrap_or_default())));
    }

    #[test]
    fn test_rebuild_enum() {
        let stmts = ddl().rebuild_enum(
            "role",
            &["admin".to_string(), "member".to_string()],
            &[("users".to_string(), "role".to_string())],
        );
        assert_eq!(stmts.len(), 4);
        assert_eq!(
            stmts[0],
            "ALTER TYPE \"public\".\"role\" RENAME TO \"role_monolayer_previous\";"
        );
        assert_eq!(stmts[3], "DROP TYPE \"public\".\"role_monolayer_previous\";");
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(
            quoted_identifiers("FOREIGN KEY (\"a\", \"b\") REFERENCES \"t\" (\"x\"\"y\")"),
            vec!["a", "b", "t", "x\"y"]
        );
    }
}
