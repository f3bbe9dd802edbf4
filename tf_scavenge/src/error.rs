use thiserror::Error;

use crate::checkpoint::Phase;

#[derive(Debug, Error)]
pub enum Error {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Db(#[from] tf_db::Error),

  #[error("sqlite: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),

  /// Cooperative stop, never a failure / 协作式停止，不视为失败
  #[error("scavenge cancelled / 清理已取消")]
  Cancelled,

  #[error("invalid operation: {0}")]
  InvalidOperation(String),

  #[error("{phase} failed: {source}")]
  Phase {
    phase: Phase,
    #[source]
    source: Box<Error>,
  },
}

impl From<tf_chunk::Error> for Error {
  fn from(e: tf_chunk::Error) -> Self {
    Self::Db(e.into())
  }
}

impl Error {
  /// Whether the error is, or wraps, a cancellation / 是否为取消
  pub fn is_cancelled(&self) -> bool {
    match self {
      Self::Cancelled => true,
      Self::Phase { source, .. } => source.is_cancelled(),
      _ => false,
    }
  }

  /// Tag with the phase it came from, cancellation stays as is
  /// 标注出错阶段，取消保持原样
  pub fn in_phase(self, phase: Phase) -> Self {
    match self {
      Self::Cancelled | Self::Phase { .. } => self,
      e => Self::Phase {
        phase,
        source: Box::new(e),
      },
    }
  }

  /// Chunk removed under the executor, usually by a concurrent switch
  /// 执行时块正被删除
  pub fn is_file_being_deleted(&self) -> bool {
    matches!(
      self,
      Self::Db(tf_db::Error::Chunk(tf_chunk::Error::FileBeingDeleted))
    )
  }
}

pub type Result<T> = std::result::Result<T, Error>;
