//! Subtree locks.
//!
//! A holder claims a set of absolute paths. Two claims conflict when any path
//! of one is equal to, an ancestor of, or a descendant of any path of the
//! other. Claims are all-or-nothing, so a single `acquire` never deadlocks
//! against another single `acquire`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Default)]
struct Table {
    next_id: u64,
    held: Vec<(u64, Vec<PathBuf>)>,
}

#[derive(Clone, Default)]
pub struct SubtreeLocks {
    table: Arc<Mutex<Table>>,
    released: Arc<Notify>,
}

fn overlaps(a: &Path, b: &Path) -> bool { a.starts_with(b) || b.starts_with(a) }

impl SubtreeLocks {
    pub fn new() -> Self { Self::default() }

    fn try_claim(&self, paths: &[PathBuf]) -> Option<u64> {
        let mut t = self.table.lock();
        let busy = t.held.iter().any(|(_, held)| {
            held.iter().any(|h| paths.iter().any(|p| overlaps(h, p)))
        });
        if busy {
            return None;
        }
        t.next_id += 1;
        let id = t.next_id;
        t.held.push((id, paths.to_vec()));
        Some(id)
    }

    /// Wait until every path in `paths` can be claimed, then claim them together.
    pub async fn acquire(&self, paths: Vec<PathBuf>) -> SubtreeGuard {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register before checking so a release between check and await is not lost.
            notified.as_mut().enable();
            if let Some(id) = self.try_claim(&paths) {
                return SubtreeGuard { locks: self.clone(), id };
            }
            notified.await;
        }
    }

    #[cfg(test)]
    pub(crate) fn held_count(&self) -> usize { self.table.lock().held.len() }
}

/// Releases its claim on drop.
pub struct SubtreeGuard {
    locks: SubtreeLocks,
    id: u64,
}

impl Drop for SubtreeGuard {
    fn drop(&mut self) {
        {
            let mut t = self.locks.table.lock();
            t.held.retain(|(id, _)| *id != self.id);
        }
        self.locks.released.notify_waiters();
    }
}
