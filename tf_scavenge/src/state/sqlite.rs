//! SQLite backend setup / SQLite 后端初始化

use std::{path::Path, time::Duration};

use rusqlite::Connection;

use crate::{consts::BUSY_TIMEOUT_MS, error::Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS hash_users (
  hash INTEGER PRIMARY KEY,
  stream TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS collisions (
  stream TEXT PRIMARY KEY
);
CREATE TABLE IF NOT EXISTS original_streams (
  key TEXT PRIMARY KEY,
  is_tombstoned INTEGER NOT NULL DEFAULT 0,
  max_age INTEGER,
  max_count INTEGER,
  truncate_before INTEGER,
  discard_point INTEGER NOT NULL DEFAULT 0,
  maybe_discard_point INTEGER NOT NULL DEFAULT 0,
  status INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS original_streams_status ON original_streams (status, key);
CREATE TABLE IF NOT EXISTS meta_streams (
  key TEXT PRIMARY KEY,
  is_tombstoned INTEGER NOT NULL DEFAULT 0,
  discard_point INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS chunk_weights (
  num INTEGER PRIMARY KEY,
  weight REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS chunk_times (
  num INTEGER PRIMARY KEY,
  min INTEGER NOT NULL,
  max INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS checkpoint (
  id INTEGER PRIMARY KEY CHECK (id = 0),
  data TEXT NOT NULL
);
";

/// Open a connection in WAL mode, creating the schema / 以 WAL 模式打开并建表
pub(crate) fn open(path: &Path) -> Result<Connection> {
  let conn = Connection::open(path)?;
  conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
  conn.pragma_update(None, "journal_mode", "WAL")?;
  conn.pragma_update(None, "synchronous", "NORMAL")?;
  conn.execute_batch(SCHEMA)?;
  Ok(conn)
}
