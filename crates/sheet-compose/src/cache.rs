//! Copy bookkeeping for one composition job.
//!
//! Composition copies each source page into the output document once as a
//! Form XObject and places the copy by reference. The cache owns two
//! mappings: a bounded LRU of `source page index -> output ObjectId` for
//! the page forms themselves, and an unbounded `source id -> output id`
//! table for the indirect objects (fonts, images) reachable from page
//! resources, so shared resources are imported a single time per job.
//! A miss on an evicted page costs one fresh copy. Evicted values need no
//! release step; the copied object stays owned by the output document,
//! which already references it from finished sheets.

use std::collections::HashMap;

use lopdf::ObjectId;

struct CacheSlot {
    object_id: ObjectId,
    last_used: u64,
}

pub struct FormObjectCache {
    capacity: usize,
    entries: HashMap<usize, CacheSlot>,
    resources: HashMap<ObjectId, ObjectId>,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl FormObjectCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be positive");
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity.min(1024)),
            resources: HashMap::new(),
            tick: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up the form object for a source page, counting a hit or miss
    /// and refreshing recency on hit.
    pub fn get(&mut self, page_index: usize) -> Option<ObjectId> {
        self.tick += 1;
        match self.entries.get_mut(&page_index) {
            Some(slot) => {
                slot.last_used = self.tick;
                self.hits += 1;
                Some(slot.object_id)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Record a freshly copied form object, evicting the least recently
    /// used entry when full. Equal-recency ties break toward the lower
    /// page index so eviction stays deterministic.
    pub fn insert(&mut self, page_index: usize, object_id: ObjectId) {
        if !self.entries.contains_key(&page_index) && self.entries.len() >= self.capacity {
            let victim = self
                .entries
                .iter()
                .min_by_key(|(idx, slot)| (slot.last_used, **idx))
                .map(|(idx, _)| *idx);
            if let Some(victim) = victim {
                self.entries.remove(&victim);
            }
        }
        self.tick += 1;
        self.entries.insert(
            page_index,
            CacheSlot {
                object_id,
                last_used: self.tick,
            },
        );
    }

    /// Output id a shared resource object was imported under, if it has
    /// been imported already.
    pub(crate) fn resource_mapping(&self, source_id: ObjectId) -> Option<ObjectId> {
        self.resources.get(&source_id).copied()
    }

    /// Pin a source resource object to its reserved output id. Resource
    /// mappings live for the whole job and are never evicted; they map
    /// ids, not content, so their footprint stays small.
    pub(crate) fn record_resource(&mut self, source_id: ObjectId, output_id: ObjectId) {
        self.resources.insert(source_id, output_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}
