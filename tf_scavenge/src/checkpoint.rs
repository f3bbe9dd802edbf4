//! Resume state, one variant per phase / 恢复状态，每阶段一种

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::point::ScavengePoint;

/// Pipeline phases in order / 按顺序的流水线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
  Accumulation,
  Calculation,
  ChunkExecution,
  ChunkMerging,
  IndexExecution,
  Cleaning,
}

impl Phase {
  pub const ALL: [Self; 6] = [
    Self::Accumulation,
    Self::Calculation,
    Self::ChunkExecution,
    Self::ChunkMerging,
    Self::IndexExecution,
    Self::Cleaning,
  ];

  pub fn name(self) -> &'static str {
    match self {
      Self::Accumulation => "Accumulation",
      Self::Calculation => "Calculation",
      Self::ChunkExecution => "Chunk execution",
      Self::ChunkMerging => "Chunk merging",
      Self::IndexExecution => "Index execution",
      Self::Cleaning => "Cleaning",
    }
  }
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage")]
pub enum Checkpoint {
  Accumulating {
    sp: ScavengePoint,
    done_logical_chunk: Option<u32>,
  },
  Calculating {
    sp: ScavengePoint,
    /// Key of the last stream committed / 最后提交的流键
    done_stream: Option<String>,
  },
  ExecutingChunks {
    sp: ScavengePoint,
    done_logical_chunk: Option<u32>,
  },
  MergingChunks {
    sp: ScavengePoint,
  },
  ExecutingIndex {
    sp: ScavengePoint,
  },
  Cleaning {
    sp: ScavengePoint,
  },
  Done {
    sp: ScavengePoint,
  },
}

impl Checkpoint {
  pub fn scavenge_point(&self) -> &ScavengePoint {
    match self {
      Self::Accumulating { sp, .. }
      | Self::Calculating { sp, .. }
      | Self::ExecutingChunks { sp, .. }
      | Self::MergingChunks { sp }
      | Self::ExecutingIndex { sp }
      | Self::Cleaning { sp }
      | Self::Done { sp } => sp,
    }
  }

  /// Phase this checkpoint resumes into, `None` when done / 恢复进入的阶段
  pub fn phase(&self) -> Option<Phase> {
    Some(match self {
      Self::Accumulating { .. } => Phase::Accumulation,
      Self::Calculating { .. } => Phase::Calculation,
      Self::ExecutingChunks { .. } => Phase::ChunkExecution,
      Self::MergingChunks { .. } => Phase::ChunkMerging,
      Self::ExecutingIndex { .. } => Phase::IndexExecution,
      Self::Cleaning { .. } => Phase::Cleaning,
      Self::Done { .. } => return None,
    })
  }
}

impl fmt::Display for Checkpoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let sp = self.scavenge_point().name();
    match self {
      Self::Accumulating {
        done_logical_chunk, ..
      } => write!(f, "Accumulating {sp} done chunk {done_logical_chunk:?}"),
      Self::Calculating { done_stream, .. } => {
        write!(f, "Calculating {sp} done stream {done_stream:?}")
      }
      Self::ExecutingChunks {
        done_logical_chunk, ..
      } => write!(f, "Executing chunks {sp} done chunk {done_logical_chunk:?}"),
      Self::MergingChunks { .. } => write!(f, "Merging chunks {sp}"),
      Self::ExecutingIndex { .. } => write!(f, "Executing index {sp}"),
      Self::Cleaning { .. } => write!(f, "Cleaning {sp}"),
      Self::Done { .. } => write!(f, "Done {sp}"),
    }
  }
}
