#![cfg_attr(docsrs, feature(doc_cfg))]

//! tf_chunk - Append-only chunk of the transaction log
//! 事务日志追加写块

mod chunk;
pub mod conf;
pub mod consts;
pub mod error;
pub mod footer;
mod handle;
pub mod header;
pub mod pos_map;
pub mod read_side;
pub mod record;

pub use chunk::{Append, BulkReader, Chunk, RecordRead};
pub use conf::{ChunkConf, Conf};
pub use error::{Error, Result};
pub use footer::ChunkFooter;
pub use handle::Life;
pub use header::ChunkHeader;
pub use pos_map::{PosMap, PosMapFormat};
pub use read_side::ReadSide;
pub use record::{Commit, LogRecord, Prepare, PrepareFlags, System};
