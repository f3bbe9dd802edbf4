use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Specific cause of a corrupted database / 数据库损坏的具体原因
#[derive(Debug)]
pub enum Corruption {
  ChunkNotFound(PathBuf),
  ExtraneousFiles(Vec<PathBuf>),
  ReaderCheckpointHigherThanWriter {
    name: &'static str,
    value: i64,
    writer: i64,
  },
  BadCheckpoint(PathBuf),
  BadChunk(String),
  WrongVersion { path: PathBuf, version: u8 },
  HashMismatch(PathBuf),
}

impl fmt::Display for Corruption {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::ChunkNotFound(p) => write!(f, "chunk file {} not found", p.display()),
      Self::ExtraneousFiles(files) => {
        write!(f, "unexpected files:")?;
        for p in files {
          write!(f, " {}", p.display())?;
        }
        Ok(())
      }
      Self::ReaderCheckpointHigherThanWriter { name, value, writer } => {
        write!(f, "checkpoint {name} at {value} is ahead of writer at {writer}")
      }
      Self::BadCheckpoint(p) => write!(f, "checkpoint file {} is unreadable", p.display()),
      Self::BadChunk(msg) => f.write_str(msg),
      Self::WrongVersion { path, version } => {
        write!(f, "chunk {} has unsupported version {version}", path.display())
      }
      Self::HashMismatch(p) => write!(f, "chunk {} hash mismatch", p.display()),
    }
  }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Chunk(tf_chunk::Error),

  #[error("database corrupted / 数据库损坏: {0}")]
  Corrupt(Corruption),

  #[error("database is read-only / 数据库只读")]
  ReadOnly,

  #[error("database directory is locked: {0}")]
  Locked(PathBuf),

  #[error("record of {0} bytes does not fit in an empty chunk")]
  RecordTooLarge(u64),

  #[error("invalid chunk switch: {0}")]
  InvalidSwitch(String),
}

impl From<tf_chunk::Error> for Error {
  fn from(e: tf_chunk::Error) -> Self {
    use tf_chunk::Error as E;
    match e {
      E::CorruptChunk { path, reason } => {
        Self::Corrupt(Corruption::BadChunk(format!("chunk {} is corrupted: {reason}", path.display())))
      }
      E::WrongVersion { path, version } => Self::Corrupt(Corruption::WrongVersion { path, version }),
      E::HashMismatch(path) => Self::Corrupt(Corruption::HashMismatch(path)),
      e => Self::Chunk(e),
    }
  }
}

impl From<Corruption> for Error {
  fn from(c: Corruption) -> Self {
    Self::Corrupt(c)
  }
}

impl Error {
  #[inline]
  pub fn is_corrupt(&self) -> bool {
    matches!(self, Self::Corrupt(_))
  }

  #[inline]
  pub fn corruption(&self) -> Option<&Corruption> {
    match self {
      Self::Corrupt(c) => Some(c),
      _ => None,
    }
  }
}

pub type Result<T> = std::result::Result<T, Error>;
