//! Generational slab with index-linked lists.
//!
//! Every tracked entry (allocation or resource) lives in a slot of a per-thread
//! slab. Slots carry `prev`/`next` indices so that each scope can own an
//! ordered list of entries described only by a head/tail/len triple. Append,
//! unlink and whole-list splice are O(1) and never touch the payloads.
//!
//! Freed slots go onto a free list and are recycled with a bumped generation,
//! so a stale [`SlotKey`] never resolves to the slot's new occupant.

/// Key of an occupied slab slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SlotKey {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Head/tail/len of one index-linked list threaded through a [`Slab`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ListHead {
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl ListHead {
    pub(crate) const EMPTY: Self = Self {
        head: None,
        tail: None,
        len: 0,
    };

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }
}

struct Slot<T> {
    generation: u32,
    prev: Option<u32>,
    next: Option<u32>,
    value: Option<T>,
}

/// Slot storage shared by every list of one kind on a thread.
pub(crate) struct Slab<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Slab<T> {
    pub(crate) const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Number of occupied slots across all lists.
    pub(crate) fn occupied(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Insert `value` at the tail of `list`.
    pub(crate) fn push_back(&mut self, list: &mut ListHead, value: T) -> SlotKey {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
                self.slots.push(Slot {
                    generation: 0,
                    prev: None,
                    next: None,
                    value: None,
                });
                index
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.value = Some(value);
        let generation = slot.generation;
        self.link_back(list, index);

        SlotKey { index, generation }
    }

    /// Resolve a key to its value, rejecting stale keys.
    pub(crate) fn get(&self, key: SlotKey) -> Option<&T> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub(crate) fn get_mut(&mut self, key: SlotKey) -> Option<&mut T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Unlink `key` from `list` and free its slot.
    ///
    /// The caller must pass the list that currently owns the entry.
    pub(crate) fn remove(&mut self, list: &mut ListHead, key: SlotKey) -> Option<T> {
        self.get(key)?;
        self.unlink(list, key.index);
        Some(self.vacate(key.index))
    }

    /// Move `key` from `from` to the tail of `to`.
    pub(crate) fn relink_back(&mut self, from: &mut ListHead, to: &mut ListHead, key: SlotKey) -> bool {
        if self.get(key).is_none() {
            return false;
        }
        self.unlink(from, key.index);
        self.link_back(to, key.index);
        true
    }

    /// Move `key` to the tail of the list that already owns it.
    pub(crate) fn relink_back_within(&mut self, list: &mut ListHead, key: SlotKey) -> bool {
        if self.get(key).is_none() {
            return false;
        }
        self.unlink(list, key.index);
        self.link_back(list, key.index);
        true
    }

    /// Detach and return the head entry of `list`.
    pub(crate) fn pop_front(&mut self, list: &mut ListHead) -> Option<T> {
        let index = list.head?;
        self.unlink(list, index);
        Some(self.vacate(index))
    }

    /// Detach and return the tail entry of `list`.
    pub(crate) fn pop_back(&mut self, list: &mut ListHead) -> Option<T> {
        let index = list.tail?;
        self.unlink(list, index);
        Some(self.vacate(index))
    }

    /// Append every entry of `src` to the tail of `dst`, preserving order.
    ///
    /// `src` is left empty. No slot is touched except the two boundary links.
    pub(crate) fn splice_back(&mut self, dst: &mut ListHead, src: &mut ListHead) {
        let (Some(src_head), Some(src_tail)) = (src.head, src.tail) else {
            return;
        };

        match dst.tail {
            Some(dst_tail) => {
                self.slots[dst_tail as usize].next = Some(src_head);
                self.slots[src_head as usize].prev = Some(dst_tail);
            }
            None => dst.head = Some(src_head),
        }
        dst.tail = Some(src_tail);
        dst.len += src.len;

        *src = ListHead::EMPTY;
    }

    /// Visit the values of `list` from head to tail.
    pub(crate) fn for_each(&self, list: &ListHead, mut visit: impl FnMut(SlotKey, &T)) {
        let mut cursor = list.head;
        while let Some(index) = cursor {
            let slot = &self.slots[index as usize];
            if let Some(value) = slot.value.as_ref() {
                visit(
                    SlotKey {
                        index,
                        generation: slot.generation,
                    },
                    value,
                );
            }
            cursor = slot.next;
        }
    }

    /// Visit the values of `list` mutably from head to tail.
    pub(crate) fn for_each_mut(&mut self, list: &ListHead, mut visit: impl FnMut(&mut T)) {
        let mut cursor = list.head;
        while let Some(index) = cursor {
            let slot = &mut self.slots[index as usize];
            if let Some(value) = slot.value.as_mut() {
                visit(value);
            }
            cursor = slot.next;
        }
    }

    fn link_back(&mut self, list: &mut ListHead, index: u32) {
        let old_tail = list.tail;
        {
            let slot = &mut self.slots[index as usize];
            slot.prev = old_tail;
            slot.next = None;
        }
        match old_tail {
            Some(tail) => self.slots[tail as usize].next = Some(index),
            None => list.head = Some(index),
        }
        list.tail = Some(index);
        list.len += 1;
    }

    fn unlink(&mut self, list: &mut ListHead, index: u32) {
        let (prev, next) = {
            let slot = &mut self.slots[index as usize];
            (slot.prev.take(), slot.next.take())
        };

        match next {
            Some(next) => self.slots[next as usize].prev = prev,
            None => list.tail = prev,
        }
        match prev {
            Some(prev) => self.slots[prev as usize].next = next,
            None => list.head = next,
        }
        list.len -= 1;
    }

    fn vacate(&mut self, index: u32) -> T {
        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        match slot.value.take() {
            Some(value) => value,
            None => unreachable!("vacated an empty slab slot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(slab: &Slab<u32>, list: &ListHead) -> Vec<u32> {
        let mut out = Vec::new();
        slab.for_each(list, |_, v| out.push(*v));
        out
    }

    #[test]
    fn push_and_remove_keep_order() {
        let mut slab = Slab::new();
        let mut list = ListHead::EMPTY;
        let a = slab.push_back(&mut list, 1);
        let _b = slab.push_back(&mut list, 2);
        let _c = slab.push_back(&mut list, 3);

        assert_eq!(slab.remove(&mut list, a), Some(1));
        assert_eq!(collect(&slab, &list), vec![2, 3]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn stale_key_does_not_resolve_after_reuse() {
        let mut slab = Slab::new();
        let mut list = ListHead::EMPTY;
        let a = slab.push_back(&mut list, 10);
        slab.remove(&mut list, a);
        let b = slab.push_back(&mut list, 20);

        assert_eq!(a.index, b.index);
        assert!(slab.get(a).is_none());
        assert_eq!(slab.get(b), Some(&20));
        assert!(slab.remove(&mut list, a).is_none());
    }

    #[test]
    fn splice_appends_in_order_and_empties_source() {
        let mut slab = Slab::new();
        let mut parent = ListHead::EMPTY;
        let mut child = ListHead::EMPTY;
        slab.push_back(&mut parent, 1);
        slab.push_back(&mut child, 2);
        slab.push_back(&mut parent, 3);
        slab.push_back(&mut child, 4);

        slab.splice_back(&mut parent, &mut child);

        assert_eq!(collect(&slab, &parent), vec![1, 3, 2, 4]);
        assert!(child.is_empty());
        assert_eq!(parent.len(), 4);
        assert_eq!(slab.pop_back(&mut parent), Some(4));
        assert_eq!(slab.pop_front(&mut parent), Some(1));
    }

    #[test]
    fn splice_into_empty_list() {
        let mut slab = Slab::new();
        let mut parent = ListHead::EMPTY;
        let mut child = ListHead::EMPTY;
        slab.push_back(&mut child, 7);

        slab.splice_back(&mut parent, &mut child);
        assert_eq!(collect(&slab, &parent), vec![7]);
        assert_eq!(slab.occupied(), 1);
    }

    #[test]
    fn relink_moves_entry_to_other_tail() {
        let mut slab = Slab::new();
        let mut a = ListHead::EMPTY;
        let mut b = ListHead::EMPTY;
        let k = slab.push_back(&mut a, 1);
        slab.push_back(&mut a, 2);
        slab.push_back(&mut b, 3);

        assert!(slab.relink_back(&mut a, &mut b, k));
        assert_eq!(collect(&slab, &a), vec![2]);
        assert_eq!(collect(&slab, &b), vec![3, 1]);
    }
}
