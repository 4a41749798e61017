//! Connection bootstrap utilities for SQLite.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON` and a busy timeout, so
//!   concurrent workers wait on the write lock instead of failing.
//! - Returned connections have migrations fully applied and both root nodes
//!   seeded.

use super::migrations::apply_migrations;
use super::{DbError, DbResult};
use crate::model::node::{NodeKind, ROOT_NODE_ID, ROOT_NODE_NAME};
use log::{error, info};
use rusqlite::{params, Connection};
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens a library database file and applies all pending migrations.
///
/// Each worker is expected to open its own connection; WAL mode lets
/// readers proceed while one writer holds the lock.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let path = path.as_ref();
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=file");

    let result = Connection::open(path)
        .map_err(DbError::from)
        .and_then(|conn| {
            let _mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            bootstrap_connection(&conn)?;
            Ok(conn)
        });
    log_open_result(&result, "file", started_at);
    result
}

/// Opens an in-memory database and applies all pending migrations.
pub fn open_db_in_memory() -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=memory");

    let result = Connection::open_in_memory()
        .map_err(DbError::from)
        .and_then(|conn| {
            bootstrap_connection(&conn)?;
            Ok(conn)
        });
    log_open_result(&result, "memory", started_at);
    result
}

fn log_open_result(result: &DbResult<Connection>, mode: &str, started_at: Instant) {
    match result {
        Ok(_) => info!(
            "event=db_open module=db status=ok mode={} duration_ms={}",
            mode,
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=db_open module=db status=error mode={} duration_ms={} error={}",
            mode,
            started_at.elapsed().as_millis(),
            err
        ),
    }
}

fn bootstrap_connection(conn: &Connection) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    apply_migrations(conn)?;
    seed_root_nodes(conn)?;
    Ok(())
}

/// Creates the fixed root node of every kind if it is absent.
fn seed_root_nodes(conn: &Connection) -> DbResult<()> {
    let now = chrono::Utc::now().timestamp_millis();
    for kind in NodeKind::ALL {
        let inserted = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {table} (
                    id, parent_id, name, description, icon, icon_color,
                    is_expand, created_at, modified_at
                ) VALUES (?1, NULL, ?2, '', 0, 0, 1, ?3, ?3);",
                table = kind.table()
            ),
            params![ROOT_NODE_ID.to_string(), ROOT_NODE_NAME, now],
        )?;
        if inserted > 0 {
            info!(
                "event=root_seed module=db status=ok kind={}",
                kind.as_str()
            );
        }
    }
    Ok(())
}
