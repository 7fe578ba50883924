//! Fixpoint depletion of items whose completion is only observable later.
//!
//! [`deplete`] keeps scanning the item set, dropping every item that reports
//! completion, until a full scan removes nothing. It never blocks; waiting
//! between calls is up to the caller.

use tracing::trace;

/// Something that can be asked, without blocking, whether it has finished.
pub trait Depletable {
    /// Returns `true` once the item is done. May be called repeatedly.
    fn complete(&mut self) -> bool;
}

impl<T: Depletable + ?Sized> Depletable for &mut T {
    fn complete(&mut self) -> bool {
        (**self).complete()
    }
}

impl<T: Depletable + ?Sized> Depletable for Box<T> {
    fn complete(&mut self) -> bool {
        (**self).complete()
    }
}

/// Remove completed items until a scan makes no progress. Returns the items
/// still incomplete, in their original relative order.
///
/// Work is bounded by `scans × items`: every scan either shrinks the set or
/// is the last one.
pub fn deplete<T: Depletable>(mut items: Vec<T>) -> Vec<T> {
    let initial = items.len();
    let mut scans = 0usize;
    while !items.is_empty() {
        let before = items.len();
        items.retain_mut(|item| !item.complete());
        scans += 1;
        if items.len() == before {
            break;
        }
    }
    trace!(
        event = "deplete.fixpoint",
        initial,
        remaining = items.len(),
        scans,
    );
    items
}
