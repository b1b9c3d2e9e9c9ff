//! Run one scheduling pass end to end: a handful of tiles, a worker
//! pool, a byte budget, and a poll loop until everything is drawable.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use model::{
    Color, LayerId, MemoryLimitPolicy, MemoryUsage, PriorityBin, SourceRevision, TilePriority,
    TileRect, TreePriority,
};
use raster_backend::{PixelCanvas, RasterSource, SoftwareRasterBackend};
use resource_pool::{ResourcePool, ResourcePoolLimits};
use task_graph::{TaskGraphRunner, WorkerTaskGraphRunner};
use tile_scheduler::{
    EvictionTilePriorityQueue, GlobalSchedulingState, RasterQueueKind, RasterTilePriorityQueue,
    TileManager, TileManagerClient, TileManagerSettings, TileParams,
};

struct DemoSource {
    color: Color,
}

impl RasterSource for DemoSource {
    fn playback(
        &self,
        canvas: &mut PixelCanvas<'_>,
        _full_rect: TileRect,
        playback_rect: TileRect,
        _scale: f32,
        _include_embedded_images: bool,
    ) {
        canvas.fill_rect(playback_rect, self.color);
    }

    fn perform_solid_color_analysis(&self, _rect: TileRect, _scale: f32) -> Option<Color> {
        None
    }
}

#[derive(Default)]
struct DemoClientState {
    tiles: Vec<(model::TileId, TilePriority)>,
}

struct DemoClient {
    state: Rc<RefCell<DemoClientState>>,
}

impl TileManagerClient for DemoClient {
    fn build_raster_queue(
        &mut self,
        _tree_priority: TreePriority,
        _kind: RasterQueueKind,
    ) -> RasterTilePriorityQueue {
        RasterTilePriorityQueue::from_prioritized(self.state.borrow().tiles.iter().copied())
    }

    fn build_eviction_queue(&mut self, _tree_priority: TreePriority) -> EvictionTilePriorityQueue {
        EvictionTilePriorityQueue::from_prioritized(self.state.borrow().tiles.iter().copied())
    }

    fn notify_ready_to_activate(&mut self) {
        println!("client: ready to activate");
    }

    fn notify_ready_to_draw(&mut self) {
        println!("client: ready to draw");
    }

    fn notify_all_tile_tasks_completed(&mut self) {
        println!("client: all tile tasks completed");
    }

    fn notify_tile_state_changed(&mut self, tile_id: model::TileId) {
        println!("client: tile {} changed state", tile_id.raw());
    }

    fn notify_is_likely_to_require_a_draw(&mut self, is_likely: bool) {
        println!("client: draw likely = {is_likely}");
    }
}

fn main() {
    env_logger::init();

    let state = Rc::new(RefCell::new(DemoClientState::default()));
    let mut manager = TileManager::new(
        Box::new(DemoClient {
            state: state.clone(),
        }),
        TileManagerSettings::default(),
    );

    let runner = Arc::new(WorkerTaskGraphRunner::new(4));
    let pool = Arc::new(ResourcePool::new(ResourcePoolLimits::default()));
    let backend = SoftwareRasterBackend::new(runner.clone() as Arc<dyn TaskGraphRunner>);
    manager.set_resources(pool.clone(), Box::new(backend), 32);

    let tile_edge = 256;
    for index in 0..9 {
        let column = index % 3;
        let row = index / 3;
        let rect = TileRect::new(column * tile_edge, row * tile_edge, tile_edge, tile_edge);
        let bin = if row == 0 {
            PriorityBin::Now
        } else {
            PriorityBin::Soon
        };
        let priority = TilePriority::new(bin, index as f32);
        let tile_id = manager.create_tile(TileParams {
            layer_id: LayerId(1),
            content_rect: rect,
            enclosing_rect: rect,
            contents_scale: 1.0,
            raster_source: Arc::new(DemoSource {
                color: Color::opaque(30 * index as u8, 80, 160),
            }),
            source_revision: SourceRevision(1 + index as u64 * 100),
            priority,
            required_for_activation: row == 0,
            required_for_draw: row == 0,
        });
        state.borrow_mut().tiles.push((tile_id, priority));
    }

    let budget_bytes = 6 * (tile_edge as i64) * (tile_edge as i64) * 4;
    manager.prepare(GlobalSchedulingState {
        memory_limit_policy: MemoryLimitPolicy::AllowAnything,
        soft_memory_limit: MemoryUsage::new(budget_bytes, 6),
        hard_memory_limit: MemoryUsage::new(budget_bytes, 6),
        tree_priority: TreePriority::SamePriorityForBothTrees,
    });

    // The origin thread never blocks on raster work; poll completions.
    for _ in 0..1000 {
        manager.check_for_completed_tasks();
        if manager.is_ready_to_draw() && manager.is_ready_to_activate() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }

    let usage = pool.acquired_memory_usage();
    println!(
        "pass done: {} tiles, {} bytes across {} resources in use, scheduled everything: {}",
        manager.tile_count(),
        usage.bytes(),
        usage.resources(),
        manager.all_tiles_that_need_raster_are_scheduled()
    );
}
