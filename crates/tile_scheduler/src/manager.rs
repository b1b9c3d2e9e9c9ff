use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, warn};
use model::{
    ImageId, LayerId, MemoryLimitPolicy, MemoryUsage, PriorityBin, SourceRevision, TASK_SET_COUNT,
    TaskSet, TaskSetFlags, TileId, TilePriority, TileRect, TreePriority,
};
use raster_backend::RasterBackend;
use resource_pool::ResourcePool;
use task_graph::{Task, TaskGraph};

use crate::queues::{EvictionTilePriorityQueue, RasterQueueKind, RasterTilePriorityQueue};
use crate::raster_task::{ImageDecodeTask, RasterOutcome, RasterTask, TaskSetFinishedTask};
use crate::tile::{Tile, TileDrawInfo, TileLifecycle, TileParams};

/// Inputs that shape one scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalSchedulingState {
    pub memory_limit_policy: MemoryLimitPolicy,
    pub soft_memory_limit: MemoryUsage,
    pub hard_memory_limit: MemoryUsage,
    pub tree_priority: TreePriority,
}

impl Default for GlobalSchedulingState {
    fn default() -> Self {
        Self {
            memory_limit_policy: MemoryLimitPolicy::AllowAnything,
            soft_memory_limit: MemoryUsage::new(128 * 1024 * 1024, 512),
            hard_memory_limit: MemoryUsage::new(256 * 1024 * 1024, 1024),
            tree_priority: TreePriority::SamePriorityForBothTrees,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileManagerSettings {
    /// Ceiling on raster tasks scheduled in one pass. Hitting it flags
    /// the pass as incomplete so the client requests another one.
    pub scheduled_raster_task_limit: usize,
}

impl Default for TileManagerSettings {
    fn default() -> Self {
        Self {
            scheduled_raster_task_limit: 32,
        }
    }
}

/// Observability numbers for the most recent scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryAssignmentStats {
    pub bytes_scheduled: i64,
    pub bytes_freed_by_eviction: i64,
    pub had_enough_memory: bool,
}

/// Owner of the tile tree. Queues are rebuilt fresh for every pass;
/// notifications arrive after a completion drain, never re-entrantly
/// from inside it.
pub trait TileManagerClient {
    fn build_raster_queue(
        &mut self,
        tree_priority: TreePriority,
        kind: RasterQueueKind,
    ) -> RasterTilePriorityQueue;

    fn build_eviction_queue(&mut self, tree_priority: TreePriority) -> EvictionTilePriorityQueue;

    fn notify_ready_to_activate(&mut self);

    fn notify_ready_to_draw(&mut self);

    fn notify_all_tile_tasks_completed(&mut self);

    fn notify_tile_state_changed(&mut self, tile_id: TileId);

    fn notify_is_likely_to_require_a_draw(&mut self, is_likely: bool);
}

enum CompletionKind {
    Raster(Arc<RasterTask>),
    ImageDecode(Arc<ImageDecodeTask>),
    TaskSetFinished(Arc<TaskSetFinishedTask>),
}

struct ManagerResources {
    pool: Arc<ResourcePool>,
    backend: Box<dyn RasterBackend>,
}

fn completion_key(task: &Arc<dyn Task>) -> usize {
    Arc::as_ptr(task) as *const () as usize
}

/// Decides which tiles get rasterized, in what order, under what
/// memory ceiling, and signals completion back per task set. Runs on
/// one origin thread; raster work happens on the executor owned by the
/// bound backend.
pub struct TileManager {
    client: Box<dyn TileManagerClient>,
    settings: TileManagerSettings,
    global_state: GlobalSchedulingState,
    tiles: HashMap<TileId, Tile>,
    next_tile_id: u64,
    resources: Option<ManagerResources>,
    scheduling_generation: u64,
    signaled_task_sets: [bool; TASK_SET_COUNT],
    scheduled_tasks: HashMap<usize, CompletionKind>,
    image_decode_tasks: HashMap<(ImageId, LayerId), Arc<ImageDecodeTask>>,
    all_tiles_that_need_raster_are_scheduled: bool,
    exceeded_budget_pass_count: u64,
    last_assignment_stats: MemoryAssignmentStats,
}

impl TileManager {
    pub fn new(client: Box<dyn TileManagerClient>, settings: TileManagerSettings) -> Self {
        Self {
            client,
            settings,
            global_state: GlobalSchedulingState::default(),
            tiles: HashMap::new(),
            next_tile_id: 0,
            resources: None,
            scheduling_generation: 0,
            signaled_task_sets: [false; TASK_SET_COUNT],
            scheduled_tasks: HashMap::new(),
            image_decode_tasks: HashMap::new(),
            all_tiles_that_need_raster_are_scheduled: true,
            exceeded_budget_pass_count: 0,
            last_assignment_stats: MemoryAssignmentStats::default(),
        }
    }

    /// (Re)bind the manager to a resource pool and raster backend.
    /// Any previous binding is torn down first: pending tasks are
    /// canceled, in-flight ones joined, and every pooled resource
    /// returned, so nothing leaks across a backend swap.
    pub fn set_resources(
        &mut self,
        pool: Arc<ResourcePool>,
        backend: Box<dyn RasterBackend>,
        scheduled_raster_task_limit: usize,
    ) {
        self.finish_tasks_and_clear_resources();
        assert!(
            scheduled_raster_task_limit > 0,
            "scheduled raster task limit must be at least 1"
        );
        self.settings.scheduled_raster_task_limit = scheduled_raster_task_limit;
        self.resources = Some(ManagerResources { pool, backend });
        debug!("tile manager bound to a new raster backend");
    }

    /// Tear down the current binding. Blocks until in-flight tasks
    /// finish, then drains their completions and frees all resources.
    pub fn finish_tasks_and_clear_resources(&mut self) {
        if self.resources.is_none() {
            return;
        }
        {
            let resources = self
                .resources
                .as_ref()
                .expect("resources checked just above");
            resources.backend.shutdown();
        }
        self.check_for_completed_tasks();

        let resources = self
            .resources
            .as_ref()
            .expect("resources survive the completion drain");
        let pool = resources.pool.clone();
        for tile in self.tiles.values_mut() {
            if !tile.draw_info().has_resource() {
                continue;
            }
            let old = tile.set_draw_info(TileDrawInfo::NoResource);
            let TileDrawInfo::Resource {
                resource,
                content_revision,
            } = old
            else {
                unreachable!("has_resource checked just above");
            };
            pool.release(resource, Some(content_revision));
        }
        self.image_decode_tasks.clear();
        assert!(
            self.scheduled_tasks.is_empty(),
            "scheduled tasks survived a backend teardown"
        );
        self.resources = None;
    }

    /// One scheduling pass. Returns false (complete no-op) when no
    /// resource pool and backend are bound.
    pub fn prepare(&mut self, global_state: GlobalSchedulingState) -> bool {
        if self.resources.is_none() {
            return false;
        }
        assert!(
            !global_state
                .soft_memory_limit
                .exceeds(global_state.hard_memory_limit),
            "soft memory limit must not exceed the hard limit"
        );
        self.global_state = global_state;
        self.scheduling_generation = self
            .scheduling_generation
            .checked_add(1)
            .expect("scheduling generation overflow");
        self.signaled_task_sets = [false; TASK_SET_COUNT];

        self.resources
            .as_ref()
            .expect("resources checked on entry")
            .pool
            .check_busy_resources();

        let mut raster_queue = self
            .client
            .build_raster_queue(global_state.tree_priority, RasterQueueKind::All);
        let selection = self.assign_memory_to_tiles(&mut raster_queue);

        let draw_is_likely = selection
            .first()
            .map(|id| {
                self.tiles
                    .get(id)
                    .expect("selected tile must exist")
                    .required_for_draw()
            })
            .unwrap_or(false);
        self.client.notify_is_likely_to_require_a_draw(draw_is_likely);

        self.schedule_raster_tasks(&selection);
        debug!(
            "scheduling pass {} selected {} tiles (all needed scheduled: {})",
            self.scheduling_generation,
            selection.len(),
            self.all_tiles_that_need_raster_are_scheduled
        );
        true
    }

    /// Synchronously drain already-finished tasks and run their
    /// completion callbacks, without scheduling new work. Used to make
    /// recently finished rasterizations visible just before a draw.
    pub fn flush(&mut self) {
        self.check_for_completed_tasks();
    }

    /// Walk the raster queue in priority order, committing memory to
    /// tiles within budget and evicting lower-priority resources as
    /// needed. Returns the tiles to schedule, highest priority first.
    fn assign_memory_to_tiles(&mut self, queue: &mut RasterTilePriorityQueue) -> Vec<TileId> {
        let resources = self
            .resources
            .as_ref()
            .expect("memory assignment requires bound resources");
        let pool = resources.pool.clone();
        let format = resources.backend.resource_format(true);
        let policy = self.global_state.memory_limit_policy;
        let soft_limit = self.global_state.soft_memory_limit;
        let hard_limit = self.global_state.hard_memory_limit;
        let task_limit = self.settings.scheduled_raster_task_limit;

        let mut memory_usage = pool.acquired_memory_usage();
        let mut eviction_queue: Option<EvictionTilePriorityQueue> = None;
        let mut selection = Vec::new();
        let mut stats = MemoryAssignmentStats {
            had_enough_memory: true,
            ..MemoryAssignmentStats::default()
        };
        let mut state_changed = Vec::new();
        let mut all_scheduled = true;

        while let Some(tile_id) = queue.pop() {
            let Some(tile) = self.tiles.get(&tile_id) else {
                continue;
            };
            if tile.lifecycle() == TileLifecycle::ReleasedPending {
                continue;
            }
            let priority = tile.priority();
            // Tiles past the policy cutoff are left unscheduled, and
            // so is everything after them in the queue.
            if !policy.allows_bin(priority.bin) {
                break;
            }
            if !tile.needs_raster() {
                continue;
            }
            if selection.len() >= task_limit {
                all_scheduled = false;
                break;
            }

            // An in-flight task's memory is already accounted for in
            // the pool's acquired usage.
            let tile_usage = if tile.has_raster_task() {
                MemoryUsage::default()
            } else {
                let rect = tile.content_rect();
                MemoryUsage::from_dimensions(rect.width, rect.height, format)
            };
            let limit = if priority.bin == PriorityBin::Now {
                hard_limit
            } else {
                soft_limit
            };

            if (memory_usage + tile_usage).exceeds(limit) {
                let eviction_queue = eviction_queue.get_or_insert_with(|| {
                    self.client
                        .build_eviction_queue(self.global_state.tree_priority)
                });
                while (memory_usage + tile_usage).exceeds(limit) {
                    let Some(evict_id) = eviction_queue.peek() else {
                        break;
                    };
                    let Some(evict_tile) = self.tiles.get(&evict_id) else {
                        eviction_queue.pop();
                        continue;
                    };
                    // Only resources of strictly lower priority than
                    // the tile being scheduled may be reclaimed here.
                    if !priority.is_higher_priority_than(&evict_tile.priority()) {
                        break;
                    }
                    eviction_queue.pop();
                    if let Some(freed) = free_tile_resource(&mut self.tiles, &pool, evict_id) {
                        memory_usage -= freed;
                        stats.bytes_freed_by_eviction += freed.bytes();
                        state_changed.push(evict_id);
                    }
                }
            }

            if (memory_usage + tile_usage).exceeds(limit) {
                if priority.bin == PriorityBin::Now {
                    stats.had_enough_memory = false;
                }
                all_scheduled = false;
                let tile = self
                    .tiles
                    .get_mut(&tile_id)
                    .expect("tile looked up just above");
                // Out-of-memory marking only applies to tiles with
                // nothing at all to draw; a stale resource still
                // unblocks activation on its own.
                if tile.required_for_activation() && !tile.draw_info().is_ready_to_draw() {
                    tile.set_draw_info(TileDrawInfo::OutOfMemory);
                    state_changed.push(tile_id);
                }
                break;
            }

            memory_usage += tile_usage;
            stats.bytes_scheduled += tile_usage.bytes();
            selection.push(tile_id);
        }

        // Activation must never be starved by a budget shortfall:
        // every unscheduled tile still required for it reads as blank.
        while let Some(tile_id) = queue.pop() {
            let Some(tile) = self.tiles.get_mut(&tile_id) else {
                continue;
            };
            if tile.lifecycle() == TileLifecycle::ReleasedPending {
                continue;
            }
            if tile.required_for_activation()
                && !tile.draw_info().is_ready_to_draw()
                && !tile.has_raster_task()
            {
                tile.set_draw_info(TileDrawInfo::OutOfMemory);
                state_changed.push(tile_id);
            }
        }

        // Final eviction pass against the hard limit only, in case the
        // interleaved walk undershot.
        if memory_usage.exceeds(hard_limit) {
            let eviction_queue = eviction_queue.get_or_insert_with(|| {
                self.client
                    .build_eviction_queue(self.global_state.tree_priority)
            });
            while memory_usage.exceeds(hard_limit) {
                let Some(evict_id) = eviction_queue.pop() else {
                    break;
                };
                if let Some(freed) = free_tile_resource(&mut self.tiles, &pool, evict_id) {
                    memory_usage -= freed;
                    stats.bytes_freed_by_eviction += freed.bytes();
                    state_changed.push(evict_id);
                }
            }
        }

        if !stats.had_enough_memory {
            self.exceeded_budget_pass_count = self
                .exceeded_budget_pass_count
                .checked_add(1)
                .expect("exceeded budget pass count overflow");
            warn!("memory budget was insufficient for immediately visible tiles");
        }
        self.all_tiles_that_need_raster_are_scheduled = all_scheduled;
        self.last_assignment_stats = stats;

        for tile_id in state_changed {
            self.client.notify_tile_state_changed(tile_id);
        }
        selection
    }

    /// Build the pass's task graph from the selected tiles and hand it
    /// to the backend. Task priority is selection order; each task is
    /// wired into the synthetic finished node of every task set it
    /// belongs to.
    fn schedule_raster_tasks(&mut self, selection: &[TileId]) {
        assert!(
            selection.len() <= u16::MAX as usize,
            "selection exceeds task priority range"
        );
        let generation = self.scheduling_generation;
        let mut graph = TaskGraph::new();
        let mut set_counts = [0u32; TASK_SET_COUNT];
        let finished_tasks =
            TaskSet::ALL_SETS.map(|set| Arc::new(TaskSetFinishedTask::new(set, generation)));
        let mut decode_nodes_in_graph = HashSet::new();

        for (index, tile_id) in selection.iter().enumerate() {
            let priority = index as u16;
            let resources = self
                .resources
                .as_ref()
                .expect("task scheduling requires bound resources");
            let tile = self
                .tiles
                .get_mut(tile_id)
                .expect("selected tile must exist");

            if tile.raster_task().is_none() {
                let previous_revision = tile.previous_content_revision();
                let rect = tile.content_rect();
                let mut resource_revision = None;
                let resource = previous_revision
                    .and_then(|revision| {
                        resources
                            .pool
                            .try_acquire_with_content_revision(revision)
                            .inspect(|_| resource_revision = Some(revision))
                    })
                    .unwrap_or_else(|| {
                        resources.pool.acquire(
                            rect.width,
                            rect.height,
                            resources.backend.resource_format(true),
                        )
                    });
                let buffer = resources.backend.acquire_buffer(
                    &resource,
                    resource_revision,
                    previous_revision,
                );
                let task = Arc::new(RasterTask::new(
                    tile.id(),
                    resource,
                    resource_revision,
                    tile.source_revision(),
                    tile.raster_source().clone(),
                    rect,
                    tile.invalidated_rect(),
                    tile.contents_scale(),
                    buffer,
                ));
                tile.clear_invalidation();
                tile.set_raster_task(task);
            }
            let task = tile
                .raster_task()
                .cloned()
                .expect("tile raster task set just above");
            tile.set_scheduled_priority(priority);

            let mut flags = TaskSetFlags::empty().with(TaskSet::All);
            if tile.required_for_activation() {
                flags.insert(TaskSet::RequiredForActivation);
            }
            if tile.required_for_draw() {
                flags.insert(TaskSet::RequiredForDraw);
            }

            let layer_id = tile.layer_id();
            let images = tile.raster_source().embedded_images();
            let task_dyn: Arc<dyn Task> = task.clone();

            let mut dependency_count = 0u32;
            for image in images {
                let decode_key = (image.image_id(), layer_id);
                let decode = self
                    .image_decode_tasks
                    .entry(decode_key)
                    .or_insert_with(|| Arc::new(ImageDecodeTask::new(image, layer_id)))
                    .clone();
                let decode_dyn: Arc<dyn Task> = decode.clone();
                if decode_nodes_in_graph.insert(completion_key(&decode_dyn)) {
                    graph.push_task(decode_dyn.clone(), priority, 0);
                    self.scheduled_tasks.insert(
                        completion_key(&decode_dyn),
                        CompletionKind::ImageDecode(decode),
                    );
                }
                graph.push_edge(decode_dyn, task_dyn.clone());
                dependency_count = dependency_count
                    .checked_add(1)
                    .expect("decode dependency count overflow");
            }

            graph.push_task(task_dyn.clone(), priority, dependency_count);
            self.scheduled_tasks
                .insert(completion_key(&task_dyn), CompletionKind::Raster(task));
            for set in flags.iter() {
                set_counts[set.index()] = set_counts[set.index()]
                    .checked_add(1)
                    .expect("task set member count overflow");
                let finished_dyn: Arc<dyn Task> = finished_tasks[set.index()].clone();
                graph.push_edge(task_dyn.clone(), finished_dyn);
            }
        }

        // Every pass gets fresh finished nodes, even for empty sets;
        // an empty set completes immediately and still notifies.
        for set in TaskSet::ALL_SETS {
            let finished = finished_tasks[set.index()].clone();
            let finished_dyn: Arc<dyn Task> = finished.clone();
            graph.push_task(finished_dyn.clone(), 0, set_counts[set.index()]);
            self.scheduled_tasks.insert(
                completion_key(&finished_dyn),
                CompletionKind::TaskSetFinished(finished),
            );
        }

        self.resources
            .as_ref()
            .expect("task scheduling requires bound resources")
            .backend
            .schedule_tasks(graph);
    }

    /// Pull everything the executor finished since the last drain and
    /// apply completions: release buffers, update draw infos, sweep
    /// released tiles, then deliver coalesced notifications.
    pub fn check_for_completed_tasks(&mut self) {
        if self.resources.is_none() {
            return;
        }
        let pool = self
            .resources
            .as_ref()
            .expect("resources checked on entry")
            .pool
            .clone();
        pool.check_busy_resources();
        let completed = self
            .resources
            .as_ref()
            .expect("resources checked on entry")
            .backend
            .collect_completed_tasks();

        let mut finished_sets = Vec::new();
        let mut state_changed = Vec::new();
        for task in completed {
            let key = completion_key(&task);
            let kind = self
                .scheduled_tasks
                .remove(&key)
                .expect("completed task was never scheduled by this manager");
            match kind {
                CompletionKind::Raster(raster) => {
                    if let Some(buffer) = raster.take_buffer() {
                        self.resources
                            .as_ref()
                            .expect("resources checked on entry")
                            .backend
                            .release_buffer(buffer);
                    }
                    let outcome = raster.take_outcome();
                    let tile = self
                        .tiles
                        .get_mut(&raster.tile_id())
                        .expect("completed raster task references an unknown tile");
                    let current = tile
                        .take_raster_task()
                        .expect("tile lost its raster task before completion");
                    assert!(
                        Arc::ptr_eq(&current, &raster),
                        "completed task is not the tile's outstanding raster task"
                    );
                    match outcome {
                        None => {
                            // Canceled before running. The resource
                            // goes back untouched and the dirty region
                            // returns to the tile for the next task.
                            tile.restore_invalidation(raster.dirty_rect());
                            pool.release(
                                raster.resource().clone(),
                                raster.resource_content_revision(),
                            );
                        }
                        Some(RasterOutcome::Painted) => {
                            tile.set_last_rastered_revision(raster.new_content_revision());
                            let old = tile.set_draw_info(TileDrawInfo::Resource {
                                resource: raster.resource().clone(),
                                content_revision: raster.new_content_revision(),
                            });
                            release_replaced_draw_info(&pool, old);
                            if tile.lifecycle() == TileLifecycle::Live {
                                state_changed.push(raster.tile_id());
                            }
                        }
                        Some(RasterOutcome::SolidColor { color }) => {
                            tile.set_last_rastered_revision(raster.new_content_revision());
                            pool.release(
                                raster.resource().clone(),
                                raster.resource_content_revision(),
                            );
                            let old = tile.set_draw_info(TileDrawInfo::SolidColor {
                                color,
                                content_revision: raster.new_content_revision(),
                            });
                            release_replaced_draw_info(&pool, old);
                            if tile.lifecycle() == TileLifecycle::Live {
                                state_changed.push(raster.tile_id());
                            }
                        }
                    }
                    raster.mark_completed();
                }
                CompletionKind::ImageDecode(decode) => {
                    self.image_decode_tasks.remove(&decode.key());
                }
                CompletionKind::TaskSetFinished(finished) => {
                    let set_index = finished.task_set().index();
                    if finished.generation() == self.scheduling_generation
                        && !self.signaled_task_sets[set_index]
                    {
                        self.signaled_task_sets[set_index] = true;
                        finished_sets.push(finished.task_set());
                    }
                }
            }
        }

        self.sweep_released_tiles(&pool);

        // Client reactions happen after the drain so a client that
        // requests another pass never re-enters it.
        for tile_id in state_changed {
            self.client.notify_tile_state_changed(tile_id);
        }
        for set in finished_sets {
            match set {
                TaskSet::RequiredForActivation => self.client.notify_ready_to_activate(),
                TaskSet::RequiredForDraw => self.client.notify_ready_to_draw(),
                TaskSet::All => self.client.notify_all_tile_tasks_completed(),
            }
        }
    }

    pub fn create_tile(&mut self, params: TileParams) -> TileId {
        let raw_id = self.next_tile_id;
        self.next_tile_id = raw_id.checked_add(1).expect("tile id space exhausted");
        let id = TileId::from_raw(raw_id);
        self.tiles.insert(id, Tile::new(id, params));
        id
    }

    /// The owner no longer needs the tile. Without an in-flight task
    /// it is destroyed immediately and its resource freed; otherwise
    /// destruction is deferred to the next completion drain. Releasing
    /// a tile twice (or an unknown id) is a fatal lifecycle violation.
    pub fn release_tile(&mut self, tile_id: TileId) {
        let tile = self
            .tiles
            .get_mut(&tile_id)
            .unwrap_or_else(|| panic!("released unknown tile {}", tile_id.raw()));
        tile.mark_released();
        if tile.has_raster_task() {
            return;
        }
        self.destroy_tile(tile_id);
    }

    pub fn set_tile_priority(&mut self, tile_id: TileId, priority: TilePriority) {
        self.live_tile_mut(tile_id).set_priority(priority);
    }

    pub fn set_tile_required_for_activation(&mut self, tile_id: TileId, required: bool) {
        self.live_tile_mut(tile_id)
            .set_required_for_activation(required);
    }

    pub fn set_tile_required_for_draw(&mut self, tile_id: TileId, required: bool) {
        self.live_tile_mut(tile_id).set_required_for_draw(required);
    }

    /// Record that part of a tile's content changed: its revision
    /// moves forward and the dirty region accumulates until the next
    /// raster task picks it up.
    pub fn invalidate_tile_content(
        &mut self,
        tile_id: TileId,
        dirty_rect: TileRect,
        revision: SourceRevision,
    ) {
        self.live_tile_mut(tile_id)
            .invalidate_content(dirty_rect, revision);
    }

    pub fn tile(&self, tile_id: TileId) -> Option<&Tile> {
        self.tiles.get(&tile_id)
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_ready_to_activate(&self) -> bool {
        self.tiles.values().all(|tile| {
            tile.lifecycle() != TileLifecycle::Live
                || !tile.required_for_activation()
                || tile.draw_info().is_ready_to_draw()
        })
    }

    pub fn is_ready_to_draw(&self) -> bool {
        self.tiles.values().all(|tile| {
            tile.lifecycle() != TileLifecycle::Live
                || !tile.required_for_draw()
                || tile.draw_info().is_ready_to_draw()
        })
    }

    pub fn global_state(&self) -> GlobalSchedulingState {
        self.global_state
    }

    /// False when the last pass could not schedule everything that
    /// needed raster (task ceiling or budget), i.e. another pass will
    /// be required.
    pub fn all_tiles_that_need_raster_are_scheduled(&self) -> bool {
        self.all_tiles_that_need_raster_are_scheduled
    }

    pub fn last_assignment_stats(&self) -> MemoryAssignmentStats {
        self.last_assignment_stats
    }

    /// Number of passes in which the budget was insufficient for
    /// immediately visible content.
    pub fn exceeded_budget_pass_count(&self) -> u64 {
        self.exceeded_budget_pass_count
    }

    fn live_tile_mut(&mut self, tile_id: TileId) -> &mut Tile {
        let tile = self
            .tiles
            .get_mut(&tile_id)
            .unwrap_or_else(|| panic!("unknown tile {}", tile_id.raw()));
        if tile.lifecycle() != TileLifecycle::Live {
            panic!("tile {} was already released", tile_id.raw());
        }
        tile
    }

    fn sweep_released_tiles(&mut self, pool: &Arc<ResourcePool>) {
        let swept = self
            .tiles
            .iter()
            .filter(|(_, tile)| {
                tile.lifecycle() == TileLifecycle::ReleasedPending && !tile.has_raster_task()
            })
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        for tile_id in swept {
            let mut tile = self
                .tiles
                .remove(&tile_id)
                .expect("swept tile must still be registered");
            release_replaced_draw_info(pool, tile.set_draw_info(TileDrawInfo::NoResource));
        }
    }

    fn destroy_tile(&mut self, tile_id: TileId) {
        let mut tile = self
            .tiles
            .remove(&tile_id)
            .expect("destroyed tile must still be registered");
        assert!(
            !tile.has_raster_task(),
            "cannot destroy a tile with an in-flight raster task"
        );
        let old = tile.set_draw_info(TileDrawInfo::NoResource);
        if matches!(old, TileDrawInfo::Resource { .. }) {
            let pool = self
                .resources
                .as_ref()
                .map(|resources| resources.pool.clone())
                .expect("tile held a resource without a bound pool");
            release_replaced_draw_info(&pool, old);
        }
    }
}

impl Drop for TileManager {
    fn drop(&mut self) {
        self.finish_tasks_and_clear_resources();
    }
}

fn release_replaced_draw_info(pool: &Arc<ResourcePool>, old: TileDrawInfo) {
    if let TileDrawInfo::Resource {
        resource,
        content_revision,
    } = old
    {
        pool.release(resource, Some(content_revision));
    }
}

fn free_tile_resource(
    tiles: &mut HashMap<TileId, Tile>,
    pool: &Arc<ResourcePool>,
    tile_id: TileId,
) -> Option<MemoryUsage> {
    let tile = tiles.get_mut(&tile_id)?;
    if !tile.draw_info().has_resource() {
        return None;
    }
    let old = tile.set_draw_info(TileDrawInfo::NoResource);
    let TileDrawInfo::Resource {
        resource,
        content_revision,
    } = old
    else {
        unreachable!("has_resource checked just above");
    };
    let freed = resource.memory_usage();
    pool.release(resource, Some(content_revision));
    Some(freed)
}
