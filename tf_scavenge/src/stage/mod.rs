//! Pipeline stages, each resumable from its checkpoint / 流水线各阶段，均可从检查点恢复

pub mod accumulator;
pub mod calculator;
pub mod chunk_executor;
pub mod cleaner;
pub mod index_executor;
pub mod merger;
mod weights;

use tf_chunk::Chunk;
use tf_db::ChunkDb;
pub use weights::WeightAccumulator;

use crate::{
  cancel::Cancel, conf::ScavengeConf, remover::ChunkRemover, scavenge_log::ScavengeLog,
  state::ScavengeState, throttle::Throttle,
};

/// What every stage works against / 各阶段共用的上下文
pub struct Ctx<'a, I> {
  pub db: &'a ChunkDb,
  pub index: &'a I,
  pub state: &'a ScavengeState,
  pub conf: &'a ScavengeConf,
  pub remover: &'a ChunkRemover,
  pub cancel: &'a Cancel,
  pub throttle: &'a Throttle,
  pub log: &'a dyn ScavengeLog,
}

impl<I> Ctx<'_, I> {
  #[inline]
  pub fn logical_chunk_of(&self, pos: i64) -> u32 {
    (pos / self.db.chunk_size() as i64) as u32
  }
}

/// Data plus position map bytes, padding excluded / 数据加位置映射字节数，不含填充
#[inline]
pub(crate) fn packed_size(chunk: &Chunk) -> u64 {
  chunk.physical_data_size() + chunk.footer().map_or(0, |f| f.map_size())
}
