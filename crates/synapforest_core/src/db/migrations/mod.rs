//! Library schema migrations.
//!
//! # Invariants
//! - Steps are ordered by strictly increasing `version`.
//! - `PRAGMA user_version` always names the last applied step.
//! - Pending steps run under one IMMEDIATE transaction, so workers opening a
//!   fresh library at the same time apply each step exactly once.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::{Connection, Transaction, TransactionBehavior};

struct SchemaStep {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const SCHEMA_STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        name: "library",
        sql: include_str!("0001_library.sql"),
    },
    SchemaStep {
        version: 2,
        name: "item_vectors",
        sql: include_str!("0002_item_vectors.sql"),
    },
];

/// Schema version written by the newest step.
pub fn latest_version() -> u32 {
    SCHEMA_STEPS.last().map_or(0, |step| step.version)
}

/// Brings the schema up to `latest_version`.
///
/// Fails with `UnsupportedSchemaVersion` when the file was written by a
/// newer build.
pub fn apply_migrations(conn: &Connection) -> DbResult<()> {
    if schema_version(conn)? == latest_version() {
        return Ok(());
    }

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    // Re-read under the write lock: another worker may have migrated meanwhile.
    let from_version = schema_version(&tx)?;
    if from_version > latest_version() {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from_version,
            latest_supported: latest_version(),
        });
    }

    let pending: Vec<&SchemaStep> = SCHEMA_STEPS
        .iter()
        .skip_while(|step| step.version <= from_version)
        .collect();
    for step in &pending {
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", step.version)?;
        info!(
            "event=db_migrate module=db status=ok version={} name={}",
            step.version, step.name
        );
    }
    tx.commit()?;

    if !pending.is_empty() {
        info!(
            "event=db_migrate module=db status=done from_version={} to_version={}",
            from_version,
            latest_version()
        );
    }
    Ok(())
}

fn schema_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?)
}
