#![cfg_attr(docsrs, feature(doc_cfg))]

//! tf_db - Chunked transaction log database
//! 分块事务日志数据库

pub mod checkpoint;
pub mod conf;
pub mod consts;
mod db;
pub mod error;
pub mod manager;
pub mod naming;

pub use checkpoint::FileCheckpoint;
pub use conf::{Conf, DbConf};
pub use db::ChunkDb;
pub use error::{Corruption, Error, Result};
pub use manager::Manager;
pub use naming::{ChunkFile, Naming};
