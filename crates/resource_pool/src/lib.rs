//! Bounded pool of reusable off-screen raster buffers.
//!
//! Resources move through three states: acquired (handed out to a
//! raster task), busy (released back but possibly still written by an
//! in-flight task), and free (reusable). All bookkeeping sits behind
//! one pool-wide lock held only for bookkeeping updates, never across
//! a rasterization call; the pixel payload of each resource has its
//! own lock so workers write without touching pool state.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use model::{MemoryUsage, ResourceFormat, ResourceId, SourceRevision};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourcePoolLimits {
    /// Hard cap on bytes tracked by the pool (acquired + busy + free).
    pub max_memory_usage_bytes: i64,
    /// Bytes worth of free resources kept around for reuse; anything
    /// beyond this is dropped as soon as it stops being busy.
    pub max_unused_memory_usage_bytes: i64,
    /// Hard cap on the number of tracked resources.
    pub max_resource_count: i32,
}

impl Default for ResourcePoolLimits {
    fn default() -> Self {
        Self {
            max_memory_usage_bytes: 256 * 1024 * 1024,
            max_unused_memory_usage_bytes: 64 * 1024 * 1024,
            max_resource_count: 2048,
        }
    }
}

/// One pooled buffer. The pool owns the bookkeeping; the backing is
/// shared with whatever raster task is writing into it.
#[derive(Debug)]
pub struct RasterResource {
    id: ResourceId,
    width: i32,
    height: i32,
    format: ResourceFormat,
    in_flight: AtomicBool,
    pixels: Mutex<Vec<u8>>,
}

impl RasterResource {
    fn new(id: ResourceId, width: i32, height: i32, format: ResourceFormat) -> Self {
        let byte_len = usize::try_from(
            MemoryUsage::from_dimensions(width, height, format).bytes(),
        )
        .expect("resource byte length exceeds address space");
        Self {
            id,
            width,
            height,
            format,
            in_flight: AtomicBool::new(false),
            pixels: Mutex::new(vec![0; byte_len]),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn format(&self) -> ResourceFormat {
        self.format
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage::from_dimensions(self.width, self.height, self.format)
    }

    /// Marked by the rasterization backend while a task may still be
    /// writing into the buffer. A busy pool entry stays out of the
    /// free list until this clears.
    pub fn set_in_flight(&self, in_flight: bool) {
        self.in_flight.store(in_flight, Ordering::SeqCst);
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn lock_pixels(&self) -> MutexGuard<'_, Vec<u8>> {
        self.pixels.lock().expect("resource pixel lock poisoned")
    }
}

#[derive(Debug)]
struct PoolEntry {
    resource: Arc<RasterResource>,
    content_revision: Option<SourceRevision>,
}

#[derive(Debug)]
struct PoolState {
    next_resource_id: u64,
    limits: ResourcePoolLimits,
    acquired: HashMap<ResourceId, Arc<RasterResource>>,
    busy: VecDeque<PoolEntry>,
    // LRU order: front is the oldest and evicted first.
    free: VecDeque<PoolEntry>,
    total_usage: MemoryUsage,
    acquired_usage: MemoryUsage,
}

#[derive(Debug)]
pub struct ResourcePool {
    state: Mutex<PoolState>,
}

impl ResourcePool {
    pub fn new(limits: ResourcePoolLimits) -> Self {
        Self {
            state: Mutex::new(PoolState {
                next_resource_id: 0,
                limits,
                acquired: HashMap::new(),
                busy: VecDeque::new(),
                free: VecDeque::new(),
                total_usage: MemoryUsage::default(),
                acquired_usage: MemoryUsage::default(),
            }),
        }
    }

    /// Hand out a resource of exactly the requested size and format,
    /// reusing a free one when possible.
    pub fn acquire(&self, width: i32, height: i32, format: ResourceFormat) -> Arc<RasterResource> {
        let mut state = self.lock_state();
        let reuse_index = state.free.iter().position(|entry| {
            entry.resource.width() == width
                && entry.resource.height() == height
                && entry.resource.format() == format
        });
        let resource = match reuse_index {
            Some(index) => {
                let entry = state
                    .free
                    .remove(index)
                    .expect("free list entry must exist at found index");
                entry.resource
            }
            None => {
                let raw_id = state.next_resource_id;
                state.next_resource_id = raw_id
                    .checked_add(1)
                    .expect("resource id space exhausted");
                let resource = Arc::new(RasterResource::new(
                    ResourceId::from_raw(raw_id),
                    width,
                    height,
                    format,
                ));
                state.total_usage += resource.memory_usage();
                resource
            }
        };
        state.acquired_usage += resource.memory_usage();
        state.acquired.insert(resource.id(), resource.clone());
        resource
    }

    /// Reuse check for partial re-raster: a free resource still tagged
    /// with the given content revision holds a valid previous
    /// rendering and can be painted incrementally.
    pub fn try_acquire_with_content_revision(
        &self,
        revision: SourceRevision,
    ) -> Option<Arc<RasterResource>> {
        let mut state = self.lock_state();
        let index = state
            .free
            .iter()
            .position(|entry| entry.content_revision == Some(revision))?;
        let entry = state
            .free
            .remove(index)
            .expect("free list entry must exist at found index");
        state.acquired_usage += entry.resource.memory_usage();
        state.acquired.insert(entry.resource.id(), entry.resource.clone());
        Some(entry.resource)
    }

    /// Return an acquired resource, optionally tagging it with the
    /// content revision now held in its pixels. Returning a resource
    /// the pool did not hand out is a lifecycle bug.
    pub fn release(&self, resource: Arc<RasterResource>, content_revision: Option<SourceRevision>) {
        let mut state = self.lock_state();
        let Some(tracked) = state.acquired.remove(&resource.id()) else {
            panic!("released resource was not acquired from this pool");
        };
        assert!(
            Arc::ptr_eq(&tracked, &resource),
            "released resource id belongs to a different backing"
        );
        state.acquired_usage -= resource.memory_usage();
        state.busy.push_back(PoolEntry {
            resource,
            content_revision,
        });
        self.enforce_limits(&mut state);
    }

    /// Reclassify busy resources whose raster work has finished as
    /// free, then drop free resources beyond the configured limits.
    pub fn check_busy_resources(&self) {
        let mut state = self.lock_state();
        let mut still_busy = VecDeque::with_capacity(state.busy.len());
        while let Some(entry) = state.busy.pop_front() {
            if entry.resource.is_in_flight() {
                still_busy.push_back(entry);
            } else {
                state.free.push_back(entry);
            }
        }
        state.busy = still_busy;
        self.enforce_limits(&mut state);
    }

    /// Proactively shrink toward the unused-memory limit by dropping
    /// free resources, oldest first.
    pub fn reduce_resource_usage(&self) {
        let mut state = self.lock_state();
        let mut dropped = 0usize;
        while !state.free.is_empty()
            && state.total_usage.bytes() > state.limits.max_unused_memory_usage_bytes
        {
            let entry = state.free.pop_front().expect("free list must be non-empty");
            state.total_usage -= entry.resource.memory_usage();
            dropped += 1;
        }
        if dropped > 0 {
            debug!("resource pool dropped {dropped} unused resources to reduce usage");
        }
    }

    pub fn set_resource_usage_limits(&self, limits: ResourcePoolLimits) {
        let mut state = self.lock_state();
        state.limits = limits;
        self.enforce_limits(&mut state);
    }

    /// Total bytes and count tracked by the pool (acquired, busy and
    /// free together).
    pub fn total_memory_usage(&self) -> MemoryUsage {
        self.lock_state().total_usage
    }

    pub fn acquired_memory_usage(&self) -> MemoryUsage {
        self.lock_state().acquired_usage
    }

    pub fn unused_memory_usage(&self) -> MemoryUsage {
        let state = self.lock_state();
        state
            .free
            .iter()
            .fold(MemoryUsage::default(), |usage, entry| {
                usage + entry.resource.memory_usage()
            })
    }

    pub fn busy_resource_count(&self) -> usize {
        self.lock_state().busy.len()
    }

    pub fn free_resource_count(&self) -> usize {
        self.lock_state().free.len()
    }

    fn enforce_limits(&self, state: &mut PoolState) {
        while !state.free.is_empty()
            && (state.total_usage.bytes() > state.limits.max_memory_usage_bytes
                || state.total_usage.resources() > state.limits.max_resource_count
                || self.unused_bytes(state) > state.limits.max_unused_memory_usage_bytes)
        {
            let entry = state.free.pop_front().expect("free list must be non-empty");
            state.total_usage -= entry.resource.memory_usage();
        }
    }

    fn unused_bytes(&self, state: &PoolState) -> i64 {
        state
            .free
            .iter()
            .map(|entry| entry.resource.memory_usage().bytes())
            .sum()
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().expect("resource pool state lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TILE: i32 = 64;
    const TILE_BYTES: i64 = (TILE as i64) * (TILE as i64) * 4;

    fn roomy_limits() -> ResourcePoolLimits {
        ResourcePoolLimits {
            max_memory_usage_bytes: TILE_BYTES * 100,
            max_unused_memory_usage_bytes: TILE_BYTES * 100,
            max_resource_count: 100,
        }
    }

    #[test]
    fn acquire_reuses_a_free_resource_of_matching_shape() {
        let pool = ResourcePool::new(roomy_limits());
        let first = pool.acquire(TILE, TILE, ResourceFormat::Rgba8888);
        let first_id = first.id();
        pool.release(first, None);
        pool.check_busy_resources();

        let reused = pool.acquire(TILE, TILE, ResourceFormat::Rgba8888);
        assert_eq!(reused.id(), first_id);
        assert_eq!(pool.total_memory_usage(), MemoryUsage::new(TILE_BYTES, 1));
    }

    #[test]
    fn acquire_does_not_reuse_mismatched_format() {
        let pool = ResourcePool::new(roomy_limits());
        let first = pool.acquire(TILE, TILE, ResourceFormat::Rgba8888);
        pool.release(first, None);
        pool.check_busy_resources();

        let other = pool.acquire(TILE, TILE, ResourceFormat::Rgba4444);
        assert_eq!(other.format(), ResourceFormat::Rgba4444);
        assert_eq!(pool.total_memory_usage().resources(), 2);
    }

    #[test]
    fn content_revision_reuse_finds_only_matching_entries() {
        let pool = ResourcePool::new(roomy_limits());
        let resource = pool.acquire(TILE, TILE, ResourceFormat::Rgba8888);
        let tagged_id = resource.id();
        pool.release(resource, Some(SourceRevision(7)));
        pool.check_busy_resources();

        assert!(pool.try_acquire_with_content_revision(SourceRevision(8)).is_none());
        let hit = pool
            .try_acquire_with_content_revision(SourceRevision(7))
            .expect("revision 7 must be reusable");
        assert_eq!(hit.id(), tagged_id);
        // The entry left the free list with the acquisition.
        assert!(pool.try_acquire_with_content_revision(SourceRevision(7)).is_none());
    }

    #[test]
    fn busy_resources_stay_out_of_the_free_list_until_not_in_flight() {
        let pool = ResourcePool::new(roomy_limits());
        let resource = pool.acquire(TILE, TILE, ResourceFormat::Rgba8888);
        resource.set_in_flight(true);
        pool.release(resource.clone(), None);

        pool.check_busy_resources();
        assert_eq!(pool.busy_resource_count(), 1);
        assert_eq!(pool.free_resource_count(), 0);

        resource.set_in_flight(false);
        pool.check_busy_resources();
        assert_eq!(pool.busy_resource_count(), 0);
        assert_eq!(pool.free_resource_count(), 1);
    }

    #[test]
    fn limits_drop_oldest_free_resources_first() {
        let pool = ResourcePool::new(ResourcePoolLimits {
            max_memory_usage_bytes: TILE_BYTES * 2,
            max_unused_memory_usage_bytes: TILE_BYTES * 2,
            max_resource_count: 100,
        });
        let first = pool.acquire(TILE, TILE, ResourceFormat::Rgba8888);
        let second = pool.acquire(TILE, TILE, ResourceFormat::Rgba8888);
        let third = pool.acquire(TILE, TILE, ResourceFormat::Rgba8888);
        let second_id = second.id();
        let third_id = third.id();

        pool.release(first, None);
        pool.release(second, None);
        pool.release(third, None);
        pool.check_busy_resources();

        // Three tiles exceed the two-tile cap; the oldest goes.
        assert_eq!(pool.total_memory_usage(), MemoryUsage::new(TILE_BYTES * 2, 2));
        let survivor = pool.acquire(TILE, TILE, ResourceFormat::Rgba8888);
        assert_eq!(survivor.id(), second_id);
        let other_survivor = pool.acquire(TILE, TILE, ResourceFormat::Rgba8888);
        assert_eq!(other_survivor.id(), third_id);
    }

    #[test]
    fn shrinking_limits_drops_free_resources_beyond_the_unused_cap() {
        let pool = ResourcePool::new(ResourcePoolLimits {
            max_memory_usage_bytes: TILE_BYTES * 10,
            max_unused_memory_usage_bytes: TILE_BYTES * 10,
            max_resource_count: 100,
        });
        for _ in 0..4 {
            let resource = pool.acquire(TILE, TILE, ResourceFormat::Rgba8888);
            pool.release(resource, None);
        }
        pool.check_busy_resources();
        assert_eq!(pool.free_resource_count(), 4);

        pool.set_resource_usage_limits(ResourcePoolLimits {
            max_memory_usage_bytes: TILE_BYTES * 10,
            max_unused_memory_usage_bytes: TILE_BYTES,
            max_resource_count: 100,
        });
        assert_eq!(pool.free_resource_count(), 1);
        assert_eq!(pool.total_memory_usage(), MemoryUsage::new(TILE_BYTES, 1));
    }

    #[test]
    fn reduce_resource_usage_frees_unused_resources_counted_against_total() {
        // Three tiles tracked, only one of them free: the per-list
        // limit check keeps it, but a proactive reduction drops it
        // because the total is over the unused cap.
        let pool = ResourcePool::new(ResourcePoolLimits {
            max_memory_usage_bytes: TILE_BYTES * 10,
            max_unused_memory_usage_bytes: TILE_BYTES * 2,
            max_resource_count: 100,
        });
        let held_a = pool.acquire(TILE, TILE, ResourceFormat::Rgba8888);
        let held_b = pool.acquire(TILE, TILE, ResourceFormat::Rgba8888);
        let released = pool.acquire(TILE, TILE, ResourceFormat::Rgba8888);
        pool.release(released, None);
        pool.check_busy_resources();
        assert_eq!(pool.free_resource_count(), 1);

        pool.reduce_resource_usage();
        assert_eq!(pool.free_resource_count(), 0);
        assert_eq!(pool.total_memory_usage(), MemoryUsage::new(TILE_BYTES * 2, 2));
        drop(held_a);
        drop(held_b);
    }

    #[test]
    fn accounting_tracks_acquired_and_total_separately() {
        let pool = ResourcePool::new(roomy_limits());
        let held = pool.acquire(TILE, TILE, ResourceFormat::Rgba8888);
        let released = pool.acquire(TILE, TILE, ResourceFormat::Rgba8888);
        pool.release(released, None);
        pool.check_busy_resources();

        assert_eq!(pool.acquired_memory_usage(), MemoryUsage::new(TILE_BYTES, 1));
        assert_eq!(pool.unused_memory_usage(), MemoryUsage::new(TILE_BYTES, 1));
        assert_eq!(pool.total_memory_usage(), MemoryUsage::new(TILE_BYTES * 2, 2));
        drop(held);
    }

    #[test]
    #[should_panic(expected = "was not acquired from this pool")]
    fn releasing_a_foreign_resource_is_fatal() {
        let pool = ResourcePool::new(roomy_limits());
        let other_pool = ResourcePool::new(roomy_limits());
        let foreign = other_pool.acquire(TILE, TILE, ResourceFormat::Rgba8888);
        pool.release(foreign, None);
    }
}
