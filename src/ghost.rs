//! Ghost eligibility.
//!
//! Old updates can be dropped to a reduced "ghost" form once nothing needed to rebuild the current
//! record depends on them. The required frontier is recomputed from the tangle itself rather than
//! taken from the live field-root tracker, so the answer stays correct even if that cache is cold.
//!
//! Only a window of `ghost_span` levels directly below the required frontier is reported as
//! ghostable; anything deeper was already eligible in an earlier window.

use std::collections::BTreeSet;

use crate::merge::owner_updates;
use crate::msg::{Msg, MsgId};
use crate::tangle::Tangle;

/// Field roots implied by the tangle's contents: walk the owner's updates in topological order,
/// drop whatever each one supersedes, then add the update itself.
pub fn required_roots(
    tangle: &Tangle,
    lookup: impl FnMut(&MsgId) -> Option<Msg>,
) -> BTreeSet<MsgId> {
    let mut roots = BTreeSet::new();
    for (id, payload) in owner_updates(tangle, lookup) {
        for superseded in &payload.supersedes {
            roots.remove(superseded);
        }
        roots.insert(id);
    }
    roots
}

/// Smallest depth among the required roots. A tangle with no updates requires nothing past the
/// moot, so this is 0.
pub fn min_required_depth(tangle: &Tangle, lookup: impl FnMut(&MsgId) -> Option<Msg>) -> u64 {
    required_roots(tangle, lookup)
        .iter()
        .filter_map(|id| tangle.depth(id))
        .min()
        .unwrap_or(0)
}

pub fn min_ghost_depth(min_required_depth: u64, ghost_span: u64) -> u64 {
    min_required_depth.saturating_sub(ghost_span)
}

/// Whether a message at `depth` falls in the ghostable window `[min_ghost, min_required)`.
pub fn in_ghost_window(depth: u64, min_required_depth: u64, ghost_span: u64) -> bool {
    min_ghost_depth(min_required_depth, ghost_span) <= depth && depth < min_required_depth
}
