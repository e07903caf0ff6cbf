use std::sync::Arc;

use walb_index::PendingIndex;

use crate::bio::BioWrapper;
use crate::error::WalbError;
use crate::lsid_state::LsidState;
use crate::pack::Pack;
use crate::state::DeviceState;

/// Runs the completion/GC bookkeeping for one finished wrapper (spec.md
/// §4.7): removes it from the pending index unless it was overwritten,
/// signals its waiter, and advances `written` (freeing the pack) once
/// every wrapper in the pack has finished.
///
/// `pack.wrapper_done()` fires exactly once, on whichever call finishes
/// the pack's last wrapper -- that call is also the one that clears the
/// GC counter `state.begin_gc()` raised when the pack entered the data
/// stage, since with several data-submit workers running concurrently
/// any one of them may be the one to finish a pack (spec.md §4.8).
///
/// Overlap-table removal is not done here: the caller already holds
/// the `OverlapHandle` it needs to call `OverlapTable::complete`, and
/// doing so may hand back ready successors that belong back on the
/// data-submit path, not the GC path.
pub fn complete_wrapper(
    w: &Arc<BioWrapper>,
    pack: &Pack,
    pending: &mut PendingIndex<BioWrapper>,
    lsid_state: &LsidState,
    state: &DeviceState,
    result: std::result::Result<(), WalbError>,
) {
    if !w.is_overwritten() {
        pending.delete(w);
    }
    w.complete(result);

    if pack.wrapper_done() {
        let pb_size = u32::try_from(pack.pack_pb_size()).expect("pack_pb_size fits u32");
        let end = pack.header.logpack_lsid.add_pb(pb_size);
        lsid_state.advance_written(end);
        state.end_gc();
        tracing::debug!(logpack_lsid = %pack.header.logpack_lsid, "pack fully written, freed");
    }
}
