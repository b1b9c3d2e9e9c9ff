use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use model::{Color, ImageId, LayerId, SourceRevision, TaskSet, TileId, TileRect};
use raster_backend::{EmbeddedImage, RasterBuffer, RasterSource};
use resource_pool::RasterResource;
use task_graph::Task;

/// What a raster task produced. Absent entirely when the task was
/// canceled before running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RasterOutcome {
    Painted,
    SolidColor { color: Color },
}

/// Paints one tile's content into a pooled resource on a worker
/// thread. The buffer is acquired on the origin thread when the task
/// is created and released on the origin thread when its completion is
/// drained.
pub(crate) struct RasterTask {
    tile_id: TileId,
    resource: Arc<RasterResource>,
    /// Revision the resource's pixels held when acquired, if reused.
    resource_content_revision: Option<SourceRevision>,
    new_content_revision: SourceRevision,
    source: Arc<dyn RasterSource>,
    full_rect: TileRect,
    dirty_rect: TileRect,
    scale: f32,
    buffer: Mutex<Option<Box<dyn RasterBuffer>>>,
    outcome: Mutex<Option<RasterOutcome>>,
    completed: AtomicBool,
}

impl RasterTask {
    pub(crate) fn new(
        tile_id: TileId,
        resource: Arc<RasterResource>,
        resource_content_revision: Option<SourceRevision>,
        new_content_revision: SourceRevision,
        source: Arc<dyn RasterSource>,
        full_rect: TileRect,
        dirty_rect: TileRect,
        scale: f32,
        buffer: Box<dyn RasterBuffer>,
    ) -> Self {
        Self {
            tile_id,
            resource,
            resource_content_revision,
            new_content_revision,
            source,
            full_rect,
            dirty_rect,
            scale,
            buffer: Mutex::new(Some(buffer)),
            outcome: Mutex::new(None),
            completed: AtomicBool::new(false),
        }
    }

    pub(crate) fn tile_id(&self) -> TileId {
        self.tile_id
    }

    pub(crate) fn resource(&self) -> &Arc<RasterResource> {
        &self.resource
    }

    pub(crate) fn resource_content_revision(&self) -> Option<SourceRevision> {
        self.resource_content_revision
    }

    pub(crate) fn new_content_revision(&self) -> SourceRevision {
        self.new_content_revision
    }

    pub(crate) fn dirty_rect(&self) -> TileRect {
        self.dirty_rect
    }

    pub(crate) fn take_buffer(&self) -> Option<Box<dyn RasterBuffer>> {
        self.buffer
            .lock()
            .expect("raster task buffer lock poisoned")
            .take()
    }

    pub(crate) fn take_outcome(&self) -> Option<RasterOutcome> {
        self.outcome
            .lock()
            .expect("raster task outcome lock poisoned")
            .take()
    }

    /// Terminal bookkeeping once the completion callback has run. A
    /// task completing twice is a broken lifecycle contract.
    pub(crate) fn mark_completed(&self) {
        let was_completed = self.completed.swap(true, Ordering::SeqCst);
        assert!(!was_completed, "raster task completed twice");
    }
}

impl Task for RasterTask {
    fn run(&self) {
        let outcome = if let Some(color) = self
            .source
            .perform_solid_color_analysis(self.full_rect, self.scale)
        {
            RasterOutcome::SolidColor { color }
        } else {
            let mut buffer_slot = self
                .buffer
                .lock()
                .expect("raster task buffer lock poisoned");
            let buffer = buffer_slot
                .as_mut()
                .expect("raster task ran without a buffer");
            buffer.playback(
                self.source.as_ref(),
                self.full_rect,
                self.dirty_rect,
                self.scale,
                true,
            );
            RasterOutcome::Painted
        };
        let previous = self
            .outcome
            .lock()
            .expect("raster task outcome lock poisoned")
            .replace(outcome);
        assert!(previous.is_none(), "raster task ran twice");
    }
}

/// Decodes one embedded image ahead of the raster tasks that replay
/// it. Deduplicated per (image, owning layer) so the same image is
/// never decoded twice concurrently.
pub(crate) struct ImageDecodeTask {
    image: Arc<dyn EmbeddedImage>,
    layer_id: LayerId,
}

impl ImageDecodeTask {
    pub(crate) fn new(image: Arc<dyn EmbeddedImage>, layer_id: LayerId) -> Self {
        Self { image, layer_id }
    }

    pub(crate) fn key(&self) -> (ImageId, LayerId) {
        (self.image.image_id(), self.layer_id)
    }
}

impl Task for ImageDecodeTask {
    fn run(&self) {
        self.image.decode();
    }
}

/// Synthetic sink node depending on every task of one task set, so a
/// set produces a single completion instead of one per tile. Carries
/// the pass generation it was scheduled in; a superseded pass's node
/// is recognized and ignored at drain time.
pub(crate) struct TaskSetFinishedTask {
    task_set: TaskSet,
    generation: u64,
}

impl TaskSetFinishedTask {
    pub(crate) fn new(task_set: TaskSet, generation: u64) -> Self {
        Self {
            task_set,
            generation,
        }
    }

    pub(crate) fn task_set(&self) -> TaskSet {
        self.task_set
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

impl Task for TaskSetFinishedTask {
    fn run(&self) {
        // Nothing to do on the worker; reaching completion is the
        // whole point of this node.
    }
}
