//! Doubly-linked list stored in an arena of slots.
//!
//! Nodes are addressed by [`NodeHandle`]s instead of references, so a
//! handle kept in a side index can unlink its node in O(1) without the
//! list having to be searched. Each slot carries a generation that is
//! bumped when the slot is freed, which turns a stale handle into an error
//! instead of a silent removal of whatever reused the slot.

use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

static NEXT_LIST_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListError {
    #[error("list is empty")]
    Empty,
    #[error("handle belongs to another list")]
    ForeignHandle,
    #[error("handle no longer refers to a live node")]
    StaleHandle,
}

/// Opaque, copyable reference to one node of one list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    list: u32,
    slot: u32,
    generation: u32,
}

#[derive(Debug)]
enum Entry<T> {
    Occupied {
        value: T,
        prev: Option<u32>,
        next: Option<u32>,
    },
    Vacant {
        next_free: Option<u32>,
    },
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    entry: Entry<T>,
}

#[derive(Debug)]
pub struct LinkedList<T> {
    id: u32,
    slots: Vec<Slot<T>>,
    head: Option<u32>,
    tail: Option<u32>,
    free: Option<u32>,
    len: usize,
}

impl<T> Default for LinkedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LinkedList<T> {
    pub fn new() -> Self {
        Self {
            id: NEXT_LIST_ID.fetch_add(1, Ordering::Relaxed),
            slots: Vec::new(),
            head: None,
            tail: None,
            free: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert at the head and return the new node's handle.
    pub fn prepend(&mut self, value: T) -> NodeHandle {
        let slot = self.alloc(value, None, self.head);
        match self.head {
            Some(old_head) => self.set_prev(old_head, Some(slot)),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
        self.handle(slot)
    }

    /// Insert at the tail and return the new node's handle.
    pub fn append(&mut self, value: T) -> NodeHandle {
        let slot = self.alloc(value, self.tail, None);
        match self.tail {
            Some(old_tail) => self.set_next(old_tail, Some(slot)),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.handle(slot)
    }

    /// Insert right behind the last node for which `stays_ahead` holds,
    /// scanning from the tail. Goes to the head when no node qualifies.
    pub fn insert_from_back<F>(&mut self, value: T, stays_ahead: F) -> NodeHandle
    where
        F: Fn(&T) -> bool,
    {
        let mut cursor = self.tail;
        while let Some(slot) = cursor {
            if self.value(slot).map(&stays_ahead).unwrap_or(false) {
                break;
            }
            cursor = self.links(slot).0;
        }

        let Some(prev) = cursor else {
            return self.prepend(value);
        };
        if cursor == self.tail {
            return self.append(value);
        }
        let next = self.links(prev).1;
        let slot = self.alloc(value, Some(prev), next);
        self.set_next(prev, Some(slot));
        match next {
            Some(n) => self.set_prev(n, Some(slot)),
            None => self.tail = Some(slot),
        }
        self.handle(slot)
    }

    /// Unlink the node behind `handle` and return its value.
    pub fn remove(&mut self, handle: NodeHandle) -> Result<T, ListError> {
        if self.len == 0 {
            return Err(ListError::Empty);
        }
        if handle.list != self.id {
            return Err(ListError::ForeignHandle);
        }
        let live = self
            .slots
            .get(handle.slot as usize)
            .map(|s| s.generation == handle.generation && matches!(s.entry, Entry::Occupied { .. }))
            .unwrap_or(false);
        if !live {
            return Err(ListError::StaleHandle);
        }
        Ok(self.unlink(handle.slot))
    }

    /// Remove and return the head value, `None` when empty.
    pub fn pop_front(&mut self) -> Option<T> {
        let head = self.head?;
        Some(self.unlink(head))
    }

    pub fn front(&self) -> Option<&T> {
        self.head.and_then(|slot| self.value(slot))
    }

    /// Head-to-tail iteration.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    fn handle(&self, slot: u32) -> NodeHandle {
        NodeHandle {
            list: self.id,
            slot,
            generation: self.slots[slot as usize].generation,
        }
    }

    fn value(&self, slot: u32) -> Option<&T> {
        match &self.slots[slot as usize].entry {
            Entry::Occupied { value, .. } => Some(value),
            Entry::Vacant { .. } => None,
        }
    }

    fn links(&self, slot: u32) -> (Option<u32>, Option<u32>) {
        match &self.slots[slot as usize].entry {
            Entry::Occupied { prev, next, .. } => (*prev, *next),
            Entry::Vacant { .. } => (None, None),
        }
    }

    fn set_prev(&mut self, slot: u32, to: Option<u32>) {
        if let Entry::Occupied { prev, .. } = &mut self.slots[slot as usize].entry {
            *prev = to;
        }
    }

    fn set_next(&mut self, slot: u32, to: Option<u32>) {
        if let Entry::Occupied { next, .. } = &mut self.slots[slot as usize].entry {
            *next = to;
        }
    }

    fn alloc(&mut self, value: T, prev: Option<u32>, next: Option<u32>) -> u32 {
        let entry = Entry::Occupied { value, prev, next };
        self.len += 1;
        match self.free {
            Some(slot) => {
                let s = &mut self.slots[slot as usize];
                if let Entry::Vacant { next_free } = s.entry {
                    self.free = next_free;
                }
                s.entry = entry;
                slot
            }
            None => {
                self.slots.push(Slot { generation: 0, entry });
                (self.slots.len() - 1) as u32
            }
        }
    }

    // Caller guarantees `slot` is occupied.
    fn unlink(&mut self, slot: u32) -> T {
        let (prev, next) = self.links(slot);
        match prev {
            Some(p) => self.set_next(p, next),
            None => self.head = next,
        }
        match next {
            Some(n) => self.set_prev(n, prev),
            None => self.tail = prev,
        }

        let s = &mut self.slots[slot as usize];
        s.generation = s.generation.wrapping_add(1);
        let old = std::mem::replace(&mut s.entry, Entry::Vacant { next_free: self.free });
        self.free = Some(slot);
        self.len -= 1;

        match old {
            Entry::Occupied { value, .. } => value,
            Entry::Vacant { .. } => unreachable!("unlink on vacant slot"),
        }
    }
}

pub struct Iter<'a, T> {
    list: &'a LinkedList<T>,
    cursor: Option<u32>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor?;
        match &self.list.slots[slot as usize].entry {
            Entry::Occupied { value, next, .. } => {
                self.cursor = *next;
                Some(value)
            }
            Entry::Vacant { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(list: &LinkedList<u32>) -> Vec<u32> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_append_and_prepend_order() {
        let mut list = LinkedList::new();
        list.append(2);
        list.append(3);
        list.prepend(1);

        assert_eq!(collect(&list), vec![1, 2, 3]);
        assert_eq!(list.len(), 3);
        assert_eq!(list.front(), Some(&1));
    }

    #[test]
    fn test_remove_middle_head_and_tail() {
        let mut list = LinkedList::new();
        let a = list.append(1);
        let b = list.append(2);
        let c = list.append(3);

        assert_eq!(list.remove(b).unwrap(), 2);
        assert_eq!(collect(&list), vec![1, 3]);

        assert_eq!(list.remove(a).unwrap(), 1);
        assert_eq!(list.remove(c).unwrap(), 3);
        assert!(list.is_empty());
        assert_eq!(list.iter().next(), None);
    }

    #[test]
    fn test_remove_rejects_bad_handles() {
        let mut list = LinkedList::new();
        let mut other = LinkedList::new();
        let handle = list.append(1);
        let foreign = other.append(9);

        assert_eq!(list.remove(foreign), Err(ListError::ForeignHandle));

        list.remove(handle).unwrap();
        assert_eq!(list.remove(handle), Err(ListError::Empty));

        // Slot reused by a new node: the old handle is stale, not an alias.
        let fresh = list.append(2);
        assert_eq!(list.remove(handle), Err(ListError::StaleHandle));
        assert_eq!(list.remove(fresh).unwrap(), 2);
    }

    #[test]
    fn test_insert_from_back_keeps_order() {
        let mut list = LinkedList::new();
        list.insert_from_back(10, |v| *v <= 10);
        list.insert_from_back(30, |v| *v <= 30);
        list.insert_from_back(20, |v| *v <= 20);
        list.insert_from_back(5, |v| *v <= 5);
        let last = list.insert_from_back(40, |v| *v <= 40);

        assert_eq!(collect(&list), vec![5, 10, 20, 30, 40]);
        assert_eq!(list.front(), Some(&5));

        // Tail link survives the middle inserts.
        assert_eq!(list.remove(last).unwrap(), 40);
        list.append(50);
        assert_eq!(collect(&list), vec![5, 10, 20, 30, 50]);

        // Equal keys stay in arrival order.
        let mut list = LinkedList::new();
        list.insert_from_back(1, |_| true);
        list.insert_from_back(2, |_| true);
        assert_eq!(collect(&list), vec![1, 2]);
    }

    #[test]
    fn test_pop_front() {
        let mut list = LinkedList::new();
        assert_eq!(list.pop_front(), None);

        list.append(1);
        list.append(2);
        assert_eq!(list.pop_front(), Some(1));
        assert_eq!(list.pop_front(), Some(2));
        assert_eq!(list.pop_front(), None);
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_slots_are_reused() {
        let mut list = LinkedList::new();
        for round in 0..4 {
            let h = list.append(round);
            list.remove(h).unwrap();
        }
        list.append(7);
        assert_eq!(list.slots.len(), 1);
        assert_eq!(collect(&list), vec![7]);
    }
}
