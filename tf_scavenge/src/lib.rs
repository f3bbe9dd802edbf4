#![cfg_attr(docsrs, feature(doc_cfg))]

//! tf_scavenge - Resumable scavenge pipeline for the chunked transaction log
//! 分块事务日志的可恢复清理流水线

pub mod cancel;
pub mod checkpoint;
pub mod conf;
pub mod consts;
pub mod discard;
pub mod error;
pub mod handle;
pub mod hasher;
pub mod index;
pub mod lookup;
pub mod meta;
pub mod point;
pub mod remover;
pub mod scavenge_log;
mod scavenger;
pub mod stage;
pub mod state;
pub mod throttle;

pub use cancel::Cancel;
pub use checkpoint::{Checkpoint, Phase};
pub use conf::{Conf, ScavengeConf};
pub use discard::DiscardPoint;
pub use error::{Error, Result};
pub use handle::StreamHandle;
pub use hasher::{Crc32Hasher, StreamHasher};
pub use index::{EventInfo, EventSlice, IndexEntry, IndexReader, IndexScavenger, MemIndex};
pub use lookup::{MetastreamLookup, NameLookup};
pub use meta::StreamMetadata;
pub use point::{LogScavengePointSource, ScavengePoint, ScavengePointSource};
pub use remover::ChunkRemover;
pub use scavenge_log::{LogScavengeLog, ScavengeLog, ScavengeResult};
pub use scavenger::Scavenger;
pub use state::{ScavengeState, StateWorker};
pub use throttle::Throttle;
