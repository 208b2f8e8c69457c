//! Cascade planning.
//!
//! Anything sorted after a model may structurally depend on it, so replacing
//! or removing a model requires first removing every model from its sorted
//! position to the end of the order.

use crate::sort::SortedModels;
use std::ops::Range;

/// Index range of `sorted` that must be removed to touch every model in
/// `targets`.
///
/// Returns `None` when no target is present in `sorted`. Ids unknown to
/// `sorted` are ignored. The range always ends at `sorted.len()`; walk it in
/// reverse to delete dependents before their dependencies.
pub fn cascade_range<'a, I>(sorted: &SortedModels, targets: I) -> Option<Range<usize>>
where
    I: IntoIterator<Item = &'a str>,
{
    targets
        .into_iter()
        .filter_map(|id| sorted.position(id))
        .min()
        .map(|start| start..sorted.len())
}
