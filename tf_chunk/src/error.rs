use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("chunk {path} is corrupted: {reason}")]
  CorruptChunk { path: PathBuf, reason: String },

  #[error("chunk {path} has unsupported version {version}")]
  WrongVersion { path: PathBuf, version: u8 },

  #[error("chunk {0} hash mismatch / 块哈希不匹配")]
  HashMismatch(PathBuf),

  #[error("chunk is read-only / 块只读")]
  ReadOnly,

  #[error("chunk is not completed / 块未完成")]
  NotReadOnly,

  #[error("raw chunk is not completely written: {0} of {1} bytes")]
  NotFullyWritten(u64, u64),

  #[error("chunk was not created for raw writing / 块不是原始写入模式")]
  NotRaw,

  #[error("scavenged flag mismatch: {0}")]
  ScavengedMismatch(&'static str),

  #[error("invalid read: {0}")]
  InvalidRead(String),

  #[error("unable to read past end: {0}")]
  ReadPastEnd(String),

  #[error("chunk file is being deleted / 块文件正在删除")]
  FileBeingDeleted,

  #[error("reader pool exhausted for chunk {0}")]
  ReaderPoolExhausted(PathBuf),

  #[error("record of {0} bytes exceeds limit")]
  RecordTooLarge(usize),

  #[error("invalid record: {0}")]
  InvalidRecord(String),

  #[error("midpoints depth {0} exceeds 31")]
  MidpointsDepth(u32),
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Error {
  Error::CorruptChunk {
    path: path.into(),
    reason: reason.into(),
  }
}
