use log::debug;

use crate::arena::{Arena, EntryFlags};
use crate::object::{ObjRef, Object};

/// Tunables for the allocator and collection policy. The bucket size and
/// the collection trigger are configuration, not hidden constants.
#[derive(Debug, Clone, Copy)]
pub struct GcConfig {
    /// Entries per arena bucket.
    pub bucket_capacity: usize,
    /// A trace pass is suggested after this many allocations.
    pub collect_threshold: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            bucket_capacity: 256,
            collect_threshold: 4096,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    pub collections: u64,
    pub last_marked: usize,
    pub last_freed: usize,
    pub total_freed: u64,
}

/// The lifetime authority over the object arena.
///
/// Liveness is hybrid: an explicit external reference count per entry
/// (`retain`/`release`) gives hosts a fast way to pin objects, and a
/// periodic trace pass from the VM root set reclaims everything else,
/// including cycles the counts can never see. The counts are an
/// optimization for rooting, never the sole liveness authority.
pub struct Gc {
    arena: Arena,
    config: GcConfig,
    since_collect: usize,
    stats: GcStats,
}

impl Gc {
    pub fn new(config: GcConfig) -> Self {
        Self {
            arena: Arena::new(config.bucket_capacity),
            config,
            since_collect: 0,
            stats: GcStats::default(),
        }
    }

    pub fn config(&self) -> GcConfig {
        self.config
    }

    pub fn allocate(&mut self) -> ObjRef {
        self.since_collect += 1;
        self.arena.allocate()
    }

    pub fn get(&self, r: ObjRef) -> &Object {
        self.arena.get(r)
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Object {
        self.arena.get_mut(r)
    }

    pub fn try_get(&self, r: ObjRef) -> Option<&Object> {
        self.arena.try_get(r)
    }

    pub fn contains(&self, r: ObjRef) -> bool {
        self.arena.contains(r)
    }

    /// Pin `r` with an external hold; the entry acts as a root until the
    /// matching `release`.
    pub fn retain(&mut self, r: ObjRef) {
        debug_assert!(self.arena.contains(r), "retain of a dead handle");
        let entry = self.arena.entry_mut(r);
        entry.ref_count += 1;
    }

    /// Drop an external hold. A zero count makes the entry eligible for
    /// reclamation at the next trace pass unless it is root-reachable.
    /// Underflow is an invariant violation, checked only in debug builds.
    pub fn release(&mut self, r: ObjRef) {
        if !self.arena.contains(r) {
            return;
        }
        let entry = self.arena.entry_mut(r);
        debug_assert!(entry.ref_count > 0, "release without matching retain");
        entry.ref_count = entry.ref_count.saturating_sub(1);
    }

    pub fn ref_count(&self, r: ObjRef) -> u32 {
        self.arena.entry(r).ref_count
    }

    pub fn should_collect(&self) -> bool {
        self.since_collect >= self.config.collect_threshold
    }

    /// Run a full trace pass.
    ///
    /// `roots` must enumerate every VM-held reference (see
    /// `state::trace_roots`); entries with a positive external count are
    /// added as roots automatically. Every allocated entry not reached
    /// from that set is freed, regardless of any stale count it carries.
    pub fn collect<F>(&mut self, mut roots: F)
    where
        F: FnMut(&mut dyn FnMut(ObjRef)),
    {
        let live_before = self.arena.live();
        let mut worklist: Vec<ObjRef> = Vec::new();
        roots(&mut |r| worklist.push(r));
        for r in self.arena.live_refs() {
            if self.arena.entry(r).ref_count > 0 {
                worklist.push(r);
            }
        }

        // Mark.
        let mut marked = 0usize;
        while let Some(r) = worklist.pop() {
            if !self.arena.contains(r) {
                continue;
            }
            let entry = self.arena.entry_mut(r);
            if entry.flags.contains(EntryFlags::MARKED) {
                continue;
            }
            entry.flags.insert(EntryFlags::MARKED);
            marked += 1;
            worklist.extend(self.arena.get(r).slot_values());
        }

        // Sweep: free the unmarked, clear marks on the survivors.
        let mut freed = 0usize;
        for r in self.arena.live_refs() {
            let entry = self.arena.entry_mut(r);
            if entry.flags.contains(EntryFlags::MARKED) {
                entry.flags.remove(EntryFlags::MARKED);
            } else {
                self.arena.free(r);
                freed += 1;
            }
        }

        self.since_collect = 0;
        self.stats.collections += 1;
        self.stats.last_marked = marked;
        self.stats.last_freed = freed;
        self.stats.total_freed += freed as u64;
        debug!(
            "gc: traced {live_before} live, marked {marked}, freed {freed}"
        );
    }

    pub fn live(&self) -> usize {
        self.arena.live()
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }
}
