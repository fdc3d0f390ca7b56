use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;
use crate::util::now_utc_string;

pub const DB_SCHEMA_VERSION: &str = "1";

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

pub fn open_database(path: &Path) -> Result<Connection> {
    let connection = Connection::open(path)?;
    configure_connection(&connection)?;
    ensure_schema(&connection)?;
    Ok(connection)
}

#[cfg(test)]
pub fn open_in_memory() -> Result<Connection> {
    let connection = Connection::open_in_memory()?;
    connection.pragma_update(None, "foreign_keys", "ON")?;
    ensure_schema(&connection)?;
    Ok(connection)
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection.busy_timeout(BUSY_TIMEOUT)?;
    connection.pragma_update(None, "journal_mode", "WAL")?;
    connection.pragma_update(None, "synchronous", "NORMAL")?;
    connection.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS subjects (
          subject_key TEXT PRIMARY KEY,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS staging_topics (
          subject_key TEXT NOT NULL,
          code TEXT NOT NULL,
          level INTEGER NOT NULL CHECK(level >= 0),
          title TEXT NOT NULL,
          parent_code TEXT,
          parent_level INTEGER,
          source_hash TEXT NOT NULL,
          order_index INTEGER NOT NULL DEFAULT 0,
          run_id TEXT NOT NULL,
          promoted INTEGER NOT NULL DEFAULT 0,
          curated INTEGER NOT NULL DEFAULT 0,
          orphan_repaired INTEGER NOT NULL DEFAULT 0,
          stitch_truncated INTEGER NOT NULL DEFAULT 0,
          updated_at TEXT NOT NULL,
          UNIQUE(subject_key, code, level),
          FOREIGN KEY(subject_key) REFERENCES subjects(subject_key),
          FOREIGN KEY(subject_key, parent_code, parent_level)
            REFERENCES staging_topics(subject_key, code, level)
        );

        CREATE TABLE IF NOT EXISTS production_versions (
          subject_key TEXT NOT NULL,
          version INTEGER NOT NULL,
          node_count INTEGER NOT NULL,
          repaired_count INTEGER NOT NULL DEFAULT 0,
          status TEXT NOT NULL CHECK(status IN ('active', 'archived')),
          promoted_at TEXT NOT NULL,
          PRIMARY KEY(subject_key, version),
          FOREIGN KEY(subject_key) REFERENCES subjects(subject_key)
        );

        CREATE TABLE IF NOT EXISTS production_topics (
          topic_id INTEGER PRIMARY KEY AUTOINCREMENT,
          subject_key TEXT NOT NULL,
          version INTEGER NOT NULL,
          code TEXT NOT NULL,
          level INTEGER NOT NULL,
          title TEXT NOT NULL,
          parent_id INTEGER,
          source_hash TEXT NOT NULL,
          order_index INTEGER NOT NULL DEFAULT 0,
          active INTEGER NOT NULL DEFAULT 0,
          created_at TEXT NOT NULL,
          UNIQUE(subject_key, version, code, level),
          FOREIGN KEY(parent_id) REFERENCES production_topics(topic_id),
          FOREIGN KEY(subject_key, version) REFERENCES production_versions(subject_key, version)
        );

        CREATE TABLE IF NOT EXISTS promotion_audit (
          audit_id INTEGER PRIMARY KEY AUTOINCREMENT,
          subject_key TEXT NOT NULL,
          action TEXT NOT NULL,
          version INTEGER,
          node_count INTEGER NOT NULL,
          orphan_count INTEGER NOT NULL,
          validation_result TEXT NOT NULL,
          issues_json TEXT NOT NULL,
          recorded_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS extraction_runs (
          run_id TEXT NOT NULL,
          subject_key TEXT NOT NULL,
          source_path TEXT NOT NULL,
          source_sha256 TEXT NOT NULL,
          pattern TEXT,
          pattern_confidence REAL,
          status TEXT NOT NULL,
          node_count INTEGER NOT NULL DEFAULT 0,
          orphan_repaired_count INTEGER NOT NULL DEFAULT 0,
          stitch_truncated_count INTEGER NOT NULL DEFAULT 0,
          loose_line_count INTEGER NOT NULL DEFAULT 0,
          warnings_json TEXT NOT NULL,
          error TEXT,
          started_at TEXT NOT NULL,
          finished_at TEXT NOT NULL,
          PRIMARY KEY(run_id, subject_key)
        );

        CREATE TABLE IF NOT EXISTS batch_progress (
          batch_id TEXT NOT NULL,
          subject_key TEXT NOT NULL,
          status TEXT NOT NULL,
          run_id TEXT,
          message TEXT,
          updated_at TEXT NOT NULL,
          PRIMARY KEY(batch_id, subject_key)
        );

        CREATE INDEX IF NOT EXISTS idx_staging_parent
          ON staging_topics(subject_key, parent_code, parent_level);
        CREATE INDEX IF NOT EXISTS idx_staging_subject_order
          ON staging_topics(subject_key, order_index);
        CREATE INDEX IF NOT EXISTS idx_production_subject_active
          ON production_topics(subject_key, active);
        CREATE INDEX IF NOT EXISTS idx_production_parent ON production_topics(parent_id);
        CREATE INDEX IF NOT EXISTS idx_audit_subject ON promotion_audit(subject_key, audit_id);
        CREATE INDEX IF NOT EXISTS idx_runs_subject ON extraction_runs(subject_key, finished_at);
        ",
    )?;

    let now = now_utc_string();
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now],
    )?;

    Ok(())
}
