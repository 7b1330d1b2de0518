//! Database Schema Definitions
//!
//! One table per entity family. Domain fields live in a JSON `data` column;
//! fields that are filtered on get an expression index over
//! `json_extract(data, '$.<field>')`.

use crate::client::normalize::indexed_fields;
use crate::shared::entity::EntityFamily;

/// Current database schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Schema migration versions
pub const MIGRATION_VERSIONS: &[i32] = &[1, 2];

/// Check if database needs migration
pub fn needs_migration(current_version: i32) -> bool {
    current_version < CURRENT_SCHEMA_VERSION
}

/// Get pending migrations
pub fn get_pending_migrations(current_version: i32) -> Vec<i32> {
    MIGRATION_VERSIONS
        .iter()
        .filter(|&&v| v > current_version)
        .cloned()
        .collect()
}

/// Statements applied by a migration
pub fn migration_statements(version: i32) -> Vec<String> {
    match version {
        1 => EntityFamily::ALL.iter().map(|family| create_table(*family)).collect(),
        2 => EntityFamily::ALL
            .iter()
            .flat_map(|family| create_indexes(*family))
            .collect(),
        _ => Vec::new(),
    }
}

/// DDL for a family's table
pub fn create_table(family: EntityFamily) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            data TEXT NOT NULL DEFAULT '{{}}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        family.collection()
    )
}

/// Expression indexes for a family's indexed fields
pub fn create_indexes(family: EntityFamily) -> Vec<String> {
    let table = family.collection();
    let mut statements: Vec<String> = indexed_fields(family)
        .iter()
        .map(|field| {
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_{field} ON {table} (json_extract(data, '{}'))",
                json_path(field)
            )
        })
        .collect();
    statements.push(format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_updated_at ON {table} (updated_at)"
    ));
    statements
}

/// JSON path for a top-level field, safe to embed in a SQL literal
///
/// Plain identifiers stay unquoted so queries match the index expressions.
pub fn json_path(field: &str) -> String {
    if !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        format!("$.{}", field)
    } else {
        let cleaned: String = field.chars().filter(|c| *c != '"' && *c != '\'').collect();
        format!("$.\"{}\"", cleaned)
    }
}
