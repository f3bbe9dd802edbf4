//! Chunk file naming `chunk-{start:06}.{version:06}`
//! 块文件命名

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::{
  consts::{CHUNK_PREFIX, SCAVENGE_TMP, TMP_EXT},
  error::Result,
};

/// One chunk file found on disk / 磁盘上的块文件
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChunkFile {
  pub start: u32,
  pub version: u32,
  pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Naming {
  dir: PathBuf,
}

pub fn file_name(start: u32, version: u32) -> String {
  format!("{CHUNK_PREFIX}{start:06}.{version:06}")
}

/// Parse `chunk-000001.000002` / 解析块文件名
pub fn parse(name: &str) -> Option<(u32, u32)> {
  let rest = name.strip_prefix(CHUNK_PREFIX)?;
  let (start, version) = rest.split_once('.')?;
  if start.len() < 6 || version.len() < 6 {
    return None;
  }
  if !start.bytes().chain(version.bytes()).all(|b| b.is_ascii_digit()) {
    return None;
  }
  Some((start.parse().ok()?, version.parse().ok()?))
}

impl Naming {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  #[inline]
  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn path(&self, start: u32, version: u32) -> PathBuf {
    self.dir.join(file_name(start, version))
  }

  /// Every chunk file, sorted by start then version / 全部块文件
  pub fn all(&self) -> Result<Vec<ChunkFile>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(&self.dir)? {
      let entry = entry?;
      let name = entry.file_name();
      if let Some((start, version)) = name.to_str().and_then(parse) {
        files.push(ChunkFile {
          start,
          version,
          path: entry.path(),
        });
      }
    }
    files.sort_unstable();
    Ok(files)
  }

  /// Versions of one chunk, newest first / 某块的所有版本，最新在前
  pub fn versions(&self, start: u32) -> Result<Vec<ChunkFile>> {
    let mut v: Vec<_> = self.all()?.into_iter().filter(|f| f.start == start).collect();
    v.reverse();
    Ok(v)
  }

  pub fn latest(&self, start: u32) -> Result<Option<PathBuf>> {
    Ok(self.versions(start)?.into_iter().next().map(|f| f.path))
  }

  pub fn next_version(&self, start: u32) -> Result<u32> {
    Ok(
      self
        .versions(start)?
        .first()
        .map_or(0, |f| f.version + 1),
    )
  }

  /// Scratch path for a chunk being scavenged / 清理中块的临时路径
  pub fn scavenge_temp(&self) -> PathBuf {
    self
      .dir
      .join(format!("{}{SCAVENGE_TMP}", Uuid::new_v4().simple()))
  }

  /// Leftover temp files / 残留临时文件
  pub fn temp_files(&self) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(&self.dir)? {
      let path = entry?.path();
      if path.extension().is_some_and(|e| e == TMP_EXT) {
        files.push(path);
      }
    }
    Ok(files)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn name_round_trip() {
    assert_eq!(file_name(3, 12), "chunk-000003.000012");
    assert_eq!(parse("chunk-000003.000012"), Some((3, 12)));
    assert_eq!(parse("chunk-1234567.000001"), Some((1234567, 1)));
    assert_eq!(parse("chunk-000003.000012.tmp"), None);
    assert_eq!(parse("chunk-3.1"), None);
    assert_eq!(parse("writer.chk"), None);
  }
}
