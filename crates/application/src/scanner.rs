//! Shared pending-workflow scan ordering, reused by every store adapter.
//!
//! A durable adapter may have to merge results from more than one
//! secondary-index scan (e.g. one per queue shard); an in-memory adapter
//! merges none. Both end up needing the same ascending-by-`last_updated`
//! merge and truncation, so it lives here once instead of being
//! reimplemented per adapter.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use flowctl_domain::Workflow;

/// Merges several already-ascending-by-`last_updated` sequences into one
/// ascending sequence, truncated to `page_size`.
///
/// Each input sequence must already be sorted ascending by `last_updated`;
/// this performs a k-way merge, not a general sort.
#[must_use]
pub fn merge_pending_by_last_updated(sources: Vec<Vec<Workflow>>, page_size: usize) -> Vec<Workflow> {
    let mut cursors: Vec<std::vec::IntoIter<Workflow>> =
        sources.into_iter().map(|source| source.into_iter()).collect();
    let mut heap = BinaryHeap::new();

    for (source_index, cursor) in cursors.iter_mut().enumerate() {
        if let Some(workflow) = cursor.next() {
            heap.push(Reverse((workflow.last_updated, source_index, workflow)));
        }
    }

    let mut merged = Vec::with_capacity(page_size);
    while merged.len() < page_size {
        let Some(Reverse((_, source_index, workflow))) = heap.pop() else {
            break;
        };
        merged.push(workflow);
        if let Some(next) = cursors[source_index].next() {
            heap.push(Reverse((next.last_updated, source_index, next)));
        }
    }

    merged
}
