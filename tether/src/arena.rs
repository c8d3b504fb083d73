use bitflags::bitflags;

use crate::object::{ObjRef, Object};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u8 {
        /// The entry currently holds a live object.
        const IN_USE = 1 << 0;
        /// Reached from a root during the current trace pass.
        const MARKED = 1 << 1;
    }
}

/// An object plus the allocator metadata for its arena slot.
#[derive(Debug)]
pub struct ObjectEntry {
    pub object: Object,
    pub flags: EntryFlags,
    /// External reference count, maintained by the GC layer.
    pub ref_count: u32,
    /// Bumped on every free so stale handles are detectable.
    pub generation: u32,
}

impl ObjectEntry {
    fn empty() -> Self {
        Self {
            object: Object::new(),
            flags: EntryFlags::empty(),
            ref_count: 0,
            generation: 0,
        }
    }

    #[inline]
    pub fn in_use(&self) -> bool {
        self.flags.contains(EntryFlags::IN_USE)
    }
}

/// A fixed-capacity array of entries that tracks how many of them are in
/// use, so the allocator can skip full buckets without scanning them.
#[derive(Debug)]
struct Bucket {
    used: usize,
    /// Rotating scan cursor; the next allocation scans from here.
    next: usize,
    entries: Vec<ObjectEntry>,
}

impl Bucket {
    fn new(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, ObjectEntry::empty);
        Self {
            used: 0,
            next: 0,
            entries,
        }
    }

    fn full(&self) -> bool {
        self.used >= self.entries.len()
    }

    /// Claim a free entry, scanning from the cursor. The caller checked
    /// that the bucket is not full.
    fn claim(&mut self) -> usize {
        let capacity = self.entries.len();
        for offset in 0..capacity {
            let index = (self.next + offset) % capacity;
            if !self.entries[index].in_use() {
                self.entries[index].flags.insert(EntryFlags::IN_USE);
                self.entries[index].object = Object::new();
                self.entries[index].ref_count = 0;
                self.used += 1;
                self.next = (index + 1) % capacity;
                return index;
            }
        }
        unreachable!("claim called on a full bucket");
    }
}

/// The bucketed object store.
///
/// This layer only knows in-use versus free; it performs no reachability
/// analysis and makes no lifetime decisions. All client allocation goes
/// through the GC layer, which decides when `free` may be called.
#[derive(Debug)]
pub struct Arena {
    buckets: Vec<Bucket>,
    bucket_capacity: usize,
}

impl Arena {
    pub fn new(bucket_capacity: usize) -> Self {
        assert!(bucket_capacity > 0, "bucket capacity must be positive");
        Self {
            buckets: vec![Bucket::new(bucket_capacity)],
            bucket_capacity,
        }
    }

    /// Claim a fresh entry, appending a bucket when every existing one
    /// is full. O(1) amortized.
    pub fn allocate(&mut self) -> ObjRef {
        for (bucket_index, bucket) in self.buckets.iter_mut().enumerate() {
            if bucket.full() {
                continue;
            }
            let slot = bucket.claim();
            let generation = bucket.entries[slot].generation;
            return ObjRef {
                bucket: bucket_index as u32,
                slot: slot as u32,
                generation,
            };
        }
        let bucket_index = self.buckets.len();
        let mut bucket = Bucket::new(self.bucket_capacity);
        let slot = bucket.claim();
        let generation = bucket.entries[slot].generation;
        self.buckets.push(bucket);
        ObjRef {
            bucket: bucket_index as u32,
            slot: slot as u32,
            generation,
        }
    }

    /// Release an entry back to the free pool. O(1). The slot becomes
    /// eligible for reuse by the next allocation scan.
    pub fn free(&mut self, r: ObjRef) {
        debug_assert!(self.contains(r), "freeing a dead or stale handle");
        let bucket = &mut self.buckets[r.bucket as usize];
        let entry = &mut bucket.entries[r.slot as usize];
        entry.flags.remove(EntryFlags::IN_USE | EntryFlags::MARKED);
        entry.object = Object::new();
        entry.ref_count = 0;
        entry.generation = entry.generation.wrapping_add(1);
        bucket.used -= 1;
    }

    /// Whether `r` refers to a live entry of the current generation.
    pub fn contains(&self, r: ObjRef) -> bool {
        self.buckets
            .get(r.bucket as usize)
            .and_then(|b| b.entries.get(r.slot as usize))
            .map(|e| e.in_use() && e.generation == r.generation)
            .unwrap_or(false)
    }

    pub fn get(&self, r: ObjRef) -> &Object {
        debug_assert!(self.contains(r), "dereferencing a dead handle");
        &self.buckets[r.bucket as usize].entries[r.slot as usize].object
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Object {
        debug_assert!(self.contains(r), "dereferencing a dead handle");
        &mut self.buckets[r.bucket as usize].entries[r.slot as usize].object
    }

    pub fn try_get(&self, r: ObjRef) -> Option<&Object> {
        if self.contains(r) {
            Some(self.get(r))
        } else {
            None
        }
    }

    pub(crate) fn entry(&self, r: ObjRef) -> &ObjectEntry {
        &self.buckets[r.bucket as usize].entries[r.slot as usize]
    }

    pub(crate) fn entry_mut(&mut self, r: ObjRef) -> &mut ObjectEntry {
        &mut self.buckets[r.bucket as usize].entries[r.slot as usize]
    }

    /// Handles for every live entry, in arena order.
    pub(crate) fn live_refs(&self) -> Vec<ObjRef> {
        let mut refs = Vec::with_capacity(self.live());
        for (bucket_index, bucket) in self.buckets.iter().enumerate() {
            for (slot, entry) in bucket.entries.iter().enumerate() {
                if entry.in_use() {
                    refs.push(ObjRef {
                        bucket: bucket_index as u32,
                        slot: slot as u32,
                        generation: entry.generation,
                    });
                }
            }
        }
        refs
    }

    pub fn live(&self) -> usize {
        self.buckets.iter().map(|b| b.used).sum()
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len() * self.bucket_capacity
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn allocates_and_reuses_freed_slots() {
        let mut arena = Arena::new(4);
        let n = 16;
        let mut refs: Vec<ObjRef> = (0..n).map(|_| arena.allocate()).collect();
        assert_eq!(arena.live(), n);
        assert!(arena.live() <= arena.capacity());

        // Free every other entry.
        let mut freed = Vec::new();
        for i in (0..n).step_by(2) {
            arena.free(refs[i]);
            freed.push(refs[i]);
        }
        refs.retain(|r| arena.contains(*r));
        assert_eq!(arena.live(), n / 2);

        // Reallocate half; no slot may be handed to two owners.
        for _ in 0..n / 2 {
            let r = arena.allocate();
            assert!(
                !refs.iter().any(|&old| old.bucket == r.bucket && old.slot == r.slot),
                "slot handed out while still owned"
            );
            refs.push(r);
        }
        assert_eq!(arena.live(), n);
        assert!(arena.live() <= arena.capacity());

        let unique: HashSet<(u32, u32)> =
            refs.iter().map(|r| (r.bucket, r.slot)).collect();
        assert_eq!(unique.len(), refs.len());
    }

    #[test]
    fn grows_by_appending_buckets() {
        let mut arena = Arena::new(2);
        assert_eq!(arena.bucket_count(), 1);
        for _ in 0..5 {
            arena.allocate();
        }
        assert_eq!(arena.bucket_count(), 3);
        assert_eq!(arena.live(), 5);
    }

    #[test]
    fn stale_handles_are_rejected() {
        let mut arena = Arena::new(2);
        let a = arena.allocate();
        assert!(arena.contains(a));
        arena.free(a);
        assert!(!arena.contains(a));
        assert!(arena.try_get(a).is_none());

        // The slot comes back with a new generation.
        let b = arena.allocate();
        let _ = arena.allocate();
        let reused = if (b.bucket, b.slot) == (a.bucket, a.slot) {
            b
        } else {
            let c = arena.allocate();
            c
        };
        if (reused.bucket, reused.slot) == (a.bucket, a.slot) {
            assert_ne!(reused.generation, a.generation);
            assert!(!arena.contains(a));
            assert!(arena.contains(reused));
        }
    }

    #[test]
    fn scan_cursor_rotates() {
        let mut arena = Arena::new(4);
        let a = arena.allocate();
        let b = arena.allocate();
        arena.free(a);
        // The cursor points past b; the freed slot is still found.
        let c = arena.allocate();
        let d = arena.allocate();
        let live: HashSet<(u32, u32)> = [b, c, d]
            .iter()
            .map(|r| (r.bucket, r.slot))
            .collect();
        assert_eq!(live.len(), 3);
        assert_eq!(arena.live(), 3);
    }
}
