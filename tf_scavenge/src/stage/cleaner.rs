//! Cleaning: forget state that can no longer affect a scavenge / 清除不再影响清理的状态

use log::{debug, info, warn};

use super::Ctx;
use crate::{
  checkpoint::Checkpoint,
  error::{Error, Result},
  point::ScavengePoint,
};

pub fn first_checkpoint(sp: &ScavengePoint) -> Checkpoint {
  Checkpoint::Cleaning { sp: sp.clone() }
}

pub fn clean<I>(ctx: &Ctx<'_, I>, sp: &ScavengePoint) -> Result<()> {
  debug!("SCAVENGING: cleaning for {}", sp.name());
  ctx.cancel.check()?;
  let tx = ctx.state.begin()?;

  if ctx.state.all_weights_zero()? {
    // every chunk has been executed, nothing still needs this data
    let meta = ctx.state.delete_metastreams()?;
    let originals = ctx
      .state
      .delete_originals(ctx.conf.unsafe_ignore_hard_deletes)?;
    info!("SCAVENGING: cleaned {meta} metastreams and {originals} original streams");
  } else if ctx.conf.unsafe_ignore_hard_deletes {
    return Err(Error::InvalidOperation(
      "chunks left unexecuted with unsafe hard deletes, tombstones would be forgotten".into(),
    ));
  } else {
    warn!("SCAVENGING: skipped cleaning, some chunks were not executed");
  }

  tx.commit(&Checkpoint::Done { sp: sp.clone() })
}
