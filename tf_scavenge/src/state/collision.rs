//! Stream hash collision detection / 流哈希冲突检测

use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use crate::{error::Result, hasher::StreamHasher};

#[derive(Default)]
struct Known {
  streams: HashSet<String>,
  hashes: HashSet<u64>,
}

/// Collision cache over the `hash_users` and `collisions` tables
/// 基于 hash_users 与 collisions 表的冲突缓存
pub(crate) struct Collisions {
  hasher: Arc<dyn StreamHasher>,
  known: Mutex<Known>,
}

impl Collisions {
  pub fn load(conn: &Connection, hasher: Arc<dyn StreamHasher>) -> Result<Self> {
    let c = Self {
      hasher,
      known: Mutex::new(Known::default()),
    };
    c.reload(conn)?;
    Ok(c)
  }

  /// Re-read from storage, used after a rollback / 回滚后重新加载
  pub fn reload(&self, conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare_cached("SELECT stream FROM collisions")?;
    let streams = stmt
      .query_map([], |row| row.get::<_, String>(0))?
      .collect::<rusqlite::Result<HashSet<_>>>()?;
    let hashes = streams.iter().map(|s| self.hasher.hash(s)).collect();
    *self.known.lock() = Known { streams, hashes };
    Ok(())
  }

  #[inline]
  pub fn contains(&self, stream: &str) -> bool {
    self.known.lock().streams.contains(stream)
  }

  #[inline]
  pub fn contains_hash(&self, hash: u64) -> bool {
    self.known.lock().hashes.contains(&hash)
  }

  pub fn all(&self) -> Vec<String> {
    let mut v: Vec<_> = self.known.lock().streams.iter().cloned().collect();
    v.sort();
    v
  }

  pub fn snapshot(&self) -> HashSet<String> {
    self.known.lock().streams.clone()
  }

  /// Register `stream` as a user of its hash. Returns the earlier user when this is
  /// the first time that user is found colliding, its data must move to id keys.
  /// 登记流为其哈希的使用者；若首次发现与先前使用者冲突则返回先前使用者
  pub fn detect(&self, conn: &Connection, stream: &str) -> Result<Option<String>> {
    if self.contains(stream) {
      return Ok(None);
    }
    let hash = self.hasher.hash(stream);
    let user: Option<String> = conn
      .prepare_cached("SELECT stream FROM hash_users WHERE hash = ?1")?
      .query_row(params![hash as i64], |row| row.get(0))
      .optional()?;
    let Some(user) = user else {
      conn
        .prepare_cached("INSERT INTO hash_users (hash, stream) VALUES (?1, ?2)")?
        .execute(params![hash as i64, stream])?;
      return Ok(None);
    };
    if user == stream {
      return Ok(None);
    }

    let mut add = conn.prepare_cached("INSERT OR IGNORE INTO collisions (stream) VALUES (?1)")?;
    add.execute(params![stream])?;
    let mut known = self.known.lock();
    known.streams.insert(stream.to_owned());
    known.hashes.insert(hash);
    if known.streams.contains(&user) {
      return Ok(None);
    }
    add.execute(params![user])?;
    known.streams.insert(user.clone());
    Ok(Some(user))
  }

  /// The only stream using `hash`, if it does not collide / 哈希的唯一使用者
  pub fn unique_user(&self, conn: &Connection, hash: u64) -> Result<Option<String>> {
    if self.contains_hash(hash) {
      return Ok(None);
    }
    Ok(
      conn
        .prepare_cached("SELECT stream FROM hash_users WHERE hash = ?1")?
        .query_row(params![hash as i64], |row| row.get(0))
        .optional()?,
    )
  }
}
