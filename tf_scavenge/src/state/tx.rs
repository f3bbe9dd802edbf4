//! Explicit transaction per checkpoint / 每个检查点一个显式事务

use log::error;

use super::ScavengeState;
use crate::{checkpoint::Checkpoint, error::Result};

/// Rolls back on drop unless committed / 未提交时析构即回滚
pub struct Tx<'a> {
  state: &'a ScavengeState,
  open: bool,
}

impl<'a> Tx<'a> {
  pub(super) fn begin(state: &'a ScavengeState) -> Result<Self> {
    state.conn.execute_batch("BEGIN")?;
    Ok(Self { state, open: true })
  }

  /// Store the checkpoint and commit together / 与检查点一同提交
  pub fn commit(mut self, checkpoint: &Checkpoint) -> Result<()> {
    self.state.write_checkpoint(checkpoint)?;
    self.state.conn.execute_batch("COMMIT")?;
    self.open = false;
    Ok(())
  }

  pub fn rollback(mut self) -> Result<()> {
    self.open = false;
    self.state.rollback()
  }
}

impl Drop for Tx<'_> {
  fn drop(&mut self) {
    if self.open
      && let Err(e) = self.state.rollback()
    {
      error!("SCAVENGING: rollback failed: {e}");
    }
  }
}
