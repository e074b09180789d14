//! Generation-checked slab arena
//!
//! Log entries live in a slab whose lifetime is the whole log. Removing an
//! entry frees its slot (and everything the entry owns) immediately and bumps
//! the slot generation so stale keys stop resolving.

use std::mem;

/// Handle to a slab slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlabKey {
    index: u32,
    generation: u32,
}

impl SlabKey {
    /// Slot index (stable while the value is live)
    pub fn index(&self) -> u32 {
        self.index
    }
}

#[derive(Debug)]
enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// Vec-backed slab with a free list
#[derive(Debug)]
pub struct Slab<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Slab<T> {
    /// Create an empty slab
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a slab with room for `capacity` values
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            len: 0,
        }
    }

    /// Number of live values
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if no values are live
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store a value and return its key
    pub fn insert(&mut self, value: T) -> SlabKey {
        self.len += 1;
        match self.free_head {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                let (generation, next_free) = match slot {
                    Slot::Vacant {
                        generation,
                        next_free,
                    } => (*generation, *next_free),
                    Slot::Occupied { .. } => unreachable!("free list points at a live slot"),
                };
                *slot = Slot::Occupied { generation, value };
                self.free_head = next_free;
                SlabKey { index, generation }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot::Occupied {
                    generation: 0,
                    value,
                });
                SlabKey {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Borrow the value for `key`, if still live
    pub fn get(&self, key: SlabKey) -> Option<&T> {
        match self.slots.get(key.index as usize) {
            Some(Slot::Occupied { generation, value }) if *generation == key.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    /// Mutably borrow the value for `key`, if still live
    pub fn get_mut(&mut self, key: SlabKey) -> Option<&mut T> {
        match self.slots.get_mut(key.index as usize) {
            Some(Slot::Occupied { generation, value }) if *generation == key.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    /// True if `key` still resolves
    pub fn contains(&self, key: SlabKey) -> bool {
        self.get(key).is_some()
    }

    /// Remove and return the value for `key`
    pub fn remove(&mut self, key: SlabKey) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == key.generation => {
                let next_generation = generation.wrapping_add(1);
                let old = mem::replace(
                    slot,
                    Slot::Vacant {
                        generation: next_generation,
                        next_free: self.free_head,
                    },
                );
                self.free_head = Some(key.index);
                self.len -= 1;
                match old {
                    Slot::Occupied { value, .. } => Some(value),
                    Slot::Vacant { .. } => None,
                }
            }
            _ => None,
        }
    }

    /// Drop every value at once
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_head = None;
        self.len = 0;
    }

    /// Iterate live values with their keys, in slot order
    pub fn iter(&self) -> impl Iterator<Item = (SlabKey, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, value } => Some((
                    SlabKey {
                        index: index as u32,
                        generation: *generation,
                    },
                    value,
                )),
                Slot::Vacant { .. } => None,
            })
    }

    /// Bytes used by live slots and bytes reserved by the backing vector
    pub fn memory_stats(&self) -> (u64, u64) {
        let slot_size = mem::size_of::<Slot<T>>() as u64;
        (
            self.len as u64 * slot_size,
            self.slots.capacity() as u64 * slot_size,
        )
    }
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slab_insert_get() {
        let mut slab = Slab::new();
        let a = slab.insert("a");
        let b = slab.insert("b");
        assert_eq!(slab.len(), 2);
        assert_eq!(slab.get(a), Some(&"a"));
        assert_eq!(slab.get(b), Some(&"b"));
    }

    #[test]
    fn test_slab_remove_invalidates_key() {
        let mut slab = Slab::new();
        let a = slab.insert(10);
        assert_eq!(slab.remove(a), Some(10));
        assert!(slab.get(a).is_none());
        assert!(slab.remove(a).is_none());
        assert!(slab.is_empty());
    }

    #[test]
    fn test_slab_reuses_slots_with_new_generation() {
        let mut slab = Slab::new();
        let a = slab.insert(1);
        slab.remove(a);
        let b = slab.insert(2);
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(slab.get(a).is_none());
        assert_eq!(slab.get(b), Some(&2));
    }

    #[test]
    fn test_slab_iter_skips_vacant() {
        let mut slab = Slab::new();
        let a = slab.insert(1);
        slab.insert(2);
        slab.insert(3);
        slab.remove(a);
        let values: Vec<_> = slab.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![2, 3]);
    }

    #[test]
    fn test_slab_memory_stats() {
        let mut slab: Slab<u64> = Slab::with_capacity(8);
        slab.insert(1);
        let (used, reserved) = slab.memory_stats();
        assert!(used > 0);
        assert!(reserved >= used);
    }
}
