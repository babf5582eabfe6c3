//! Per (table, family) work queue.
//!
//! Four bins, one linked list each, plus an index from work id to the bin
//! and node currently holding it. Moving work between bins is one unlink
//! and one insert. Entries are placed behind everything touched no later
//! than them, so each bin reads oldest-touched first from the head even
//! when callers report times out of order. In-order times land at the
//! tail without a scan.

use std::collections::HashMap;
use shared::types::WorkStatus;
use crate::store::error::{StoreError, StoreResult};
use crate::store::linked_list::{LinkedList, NodeHandle};

#[derive(Debug)]
pub struct WorkEntry<P> {
    pub id: u64,
    pub payload: P,
    /// Unix seconds this entry last entered a bin
    pub touched: i64,
}

#[derive(Debug)]
pub struct WorkQueue<P> {
    init: LinkedList<WorkEntry<P>>,
    available: LinkedList<WorkEntry<P>>,
    dealt: LinkedList<WorkEntry<P>>,
    disabled: LinkedList<WorkEntry<P>>,
    index: HashMap<u64, (WorkStatus, NodeHandle)>,
}

impl<P> Default for WorkQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> WorkQueue<P> {
    pub fn new() -> Self {
        Self {
            init: LinkedList::new(),
            available: LinkedList::new(),
            dealt: LinkedList::new(),
            disabled: LinkedList::new(),
            index: HashMap::new(),
        }
    }

    fn bin(&self, bin: WorkStatus) -> &LinkedList<WorkEntry<P>> {
        match bin {
            WorkStatus::Init => &self.init,
            WorkStatus::Available => &self.available,
            WorkStatus::Dealt => &self.dealt,
            WorkStatus::Disabled => &self.disabled,
        }
    }

    fn bin_mut(&mut self, bin: WorkStatus) -> &mut LinkedList<WorkEntry<P>> {
        match bin {
            WorkStatus::Init => &mut self.init,
            WorkStatus::Available => &mut self.available,
            WorkStatus::Dealt => &mut self.dealt,
            WorkStatus::Disabled => &mut self.disabled,
        }
    }

    pub fn add_work(&mut self, id: u64, payload: P, bin: WorkStatus, now: i64) -> StoreResult<()> {
        if self.index.contains_key(&id) {
            return Err(StoreError::DuplicateKey {
                table: "work queue",
                key: id.to_string(),
            });
        }
        let handle = self.place(bin, WorkEntry { id, payload, touched: now });
        self.index.insert(id, (bin, handle));
        Ok(())
    }

    fn place(&mut self, bin: WorkStatus, entry: WorkEntry<P>) -> NodeHandle {
        let touched = entry.touched;
        self.bin_mut(bin).insert_from_back(entry, |e| e.touched <= touched)
    }

    /// Move `id` into `to`, stamping it with `now`.
    pub fn move_work(&mut self, id: u64, to: WorkStatus, now: i64) -> StoreResult<()> {
        let (from, handle) = *self
            .index
            .get(&id)
            .ok_or_else(|| StoreError::not_found("work", id))?;

        let mut entry = self.bin_mut(from).remove(handle)?;
        entry.touched = now;
        let handle = self.place(to, entry);
        self.index.insert(id, (to, handle));
        Ok(())
    }

    pub fn remove_work(&mut self, id: u64) -> StoreResult<P> {
        let (bin, handle) = *self
            .index
            .get(&id)
            .ok_or_else(|| StoreError::not_found("work", id))?;
        let entry = self.bin_mut(bin).remove(handle)?;
        self.index.remove(&id);
        Ok(entry.payload)
    }

    /// Least recently touched entry of `bin`.
    pub fn oldest(&self, bin: WorkStatus) -> Option<&WorkEntry<P>> {
        self.bin(bin).front()
    }

    pub fn iter(&self, bin: WorkStatus) -> impl Iterator<Item = &WorkEntry<P>> + '_ {
        self.bin(bin).iter()
    }

    pub fn bin_of(&self, id: u64) -> Option<WorkStatus> {
        self.index.get(&id).map(|(bin, _)| *bin)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.index.contains_key(&id)
    }

    pub fn bin_len(&self, bin: WorkStatus) -> usize {
        self.bin(bin).len()
    }

    /// Number of work ids tracked across all bins.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(q: &WorkQueue<&'static str>, bin: WorkStatus) -> Vec<u64> {
        q.iter(bin).map(|e| e.id).collect()
    }

    #[test]
    fn test_add_rejects_duplicate_id() {
        let mut q = WorkQueue::new();
        q.add_work(1, "a", WorkStatus::Init, 100).unwrap();

        let err = q.add_work(1, "b", WorkStatus::Available, 101).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
        assert_eq!(q.len(), 1);
        assert_eq!(q.bin_len(WorkStatus::Available), 0);
    }

    #[test]
    fn test_move_is_atomic_between_bins() {
        let mut q = WorkQueue::new();
        q.add_work(1, "a", WorkStatus::Init, 100).unwrap();
        q.add_work(2, "b", WorkStatus::Init, 101).unwrap();

        q.move_work(1, WorkStatus::Dealt, 150).unwrap();

        assert_eq!(q.bin_len(WorkStatus::Init), 1);
        assert_eq!(q.bin_len(WorkStatus::Dealt), 1);
        assert_eq!(q.len(), 2);
        assert_eq!(q.bin_of(1), Some(WorkStatus::Dealt));
        assert_eq!(ids(&q, WorkStatus::Init), vec![2]);
        for bin in [WorkStatus::Init, WorkStatus::Available, WorkStatus::Disabled] {
            assert!(!ids(&q, bin).contains(&1));
        }
        assert_eq!(q.oldest(WorkStatus::Dealt).unwrap().touched, 150);
    }

    #[test]
    fn test_moved_work_goes_behind_existing_entries() {
        let mut q = WorkQueue::new();
        for id in 1..=3 {
            q.add_work(id, "x", WorkStatus::Available, 100 + id as i64).unwrap();
        }

        // Re-touching the oldest puts it at the back.
        q.move_work(1, WorkStatus::Available, 200).unwrap();
        assert_eq!(ids(&q, WorkStatus::Available), vec![2, 3, 1]);
        assert_eq!(q.oldest(WorkStatus::Available).unwrap().id, 2);
    }

    #[test]
    fn test_out_of_order_times_keep_bin_sorted() {
        let mut q = WorkQueue::new();
        q.add_work(1, "a", WorkStatus::Dealt, 100).unwrap();
        q.add_work(2, "b", WorkStatus::Dealt, 100).unwrap();

        // A report from the future, then one from the past.
        q.move_work(1, WorkStatus::Available, 900).unwrap();
        q.move_work(2, WorkStatus::Available, 110).unwrap();
        assert_eq!(ids(&q, WorkStatus::Available), vec![2, 1]);
        assert_eq!(q.oldest(WorkStatus::Available).unwrap().touched, 110);

        q.add_work(3, "c", WorkStatus::Available, 500).unwrap();
        assert_eq!(ids(&q, WorkStatus::Available), vec![2, 3, 1]);
    }

    #[test]
    fn test_move_and_remove_unknown_id() {
        let mut q: WorkQueue<&'static str> = WorkQueue::new();
        assert_eq!(
            q.move_work(7, WorkStatus::Dealt, 1),
            Err(StoreError::NotFound { what: "work", id: 7 })
        );
        assert!(q.remove_work(7).is_err());
    }

    #[test]
    fn test_remove_work() {
        let mut q = WorkQueue::new();
        q.add_work(1, "a", WorkStatus::Dealt, 100).unwrap();

        assert_eq!(q.remove_work(1).unwrap(), "a");
        assert!(q.is_empty());
        assert!(!q.contains(1));
        assert_eq!(q.bin_len(WorkStatus::Dealt), 0);
    }
}
