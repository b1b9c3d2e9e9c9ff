//! Rasterization backend boundary.
//!
//! A backend implements the uniform acquire/playback/release buffer
//! contract and forwards task graphs to an executor, regardless of
//! strategy (software bitmap, GPU-direct, zero-copy, one-copy,
//! pixel-buffer upload). Only the software strategy is implemented
//! here; the others live behind the same [`RasterBackend`] trait.

use std::sync::Arc;

use model::{Color, ImageId, ResourceFormat, SourceRevision, TileRect};
use resource_pool::RasterResource;
use task_graph::{Task, TaskGraph};

mod canvas;
mod software;

pub use canvas::PixelCanvas;
pub use software::SoftwareRasterBackend;

/// An embedded image referenced by a raster source that must be
/// decoded before the source can be played back.
pub trait EmbeddedImage: Send + Sync {
    fn image_id(&self) -> ImageId;

    fn decode(&self);
}

/// Recorded content for one tile, replayed by raster tasks on worker
/// threads. Implemented by the client owning the tile tree.
pub trait RasterSource: Send + Sync {
    /// Replay the recording into `canvas`. `full_rect` is the tile's
    /// content rect; only `playback_rect` (a subrect of it) needs to
    /// be produced.
    fn playback(
        &self,
        canvas: &mut PixelCanvas<'_>,
        full_rect: TileRect,
        playback_rect: TileRect,
        scale: f32,
        include_embedded_images: bool,
    );

    /// Whether `rect` is provably a single color. A solid tile needs
    /// no resource at all.
    fn perform_solid_color_analysis(&self, rect: TileRect, scale: f32) -> Option<Color>;

    /// Images that must be decoded before playback. The scheduler
    /// deduplicates decode work per (image, layer).
    fn embedded_images(&self) -> Vec<Arc<dyn EmbeddedImage>> {
        Vec::new()
    }
}

/// A writable mapping of one pooled resource for the duration of one
/// raster task. Obtained on the origin thread, written on a worker.
pub trait RasterBuffer: Send {
    fn playback(
        &mut self,
        source: &dyn RasterSource,
        full_rect: TileRect,
        dirty_rect: TileRect,
        scale: f32,
        include_embedded_images: bool,
    );
}

/// One rasterization strategy. `schedule_tasks` is responsible for
/// any backend-specific global barrier or flush around submission.
pub trait RasterBackend: Send + Sync {
    /// Map `resource` for raster. `resource_content_revision` is the
    /// revision the resource's pixels already hold (if it was reused
    /// from the pool) and `previous_content_revision` the revision the
    /// tile was last rasterized at; when they match, playback may be
    /// partial.
    fn acquire_buffer(
        &self,
        resource: &Arc<RasterResource>,
        resource_content_revision: Option<SourceRevision>,
        previous_content_revision: Option<SourceRevision>,
    ) -> Box<dyn RasterBuffer>;

    /// Unmap a buffer once its task completed (or was canceled). Runs
    /// on the origin thread before the task's completion callback.
    fn release_buffer(&self, buffer: Box<dyn RasterBuffer>);

    fn resource_format(&self, needs_alpha: bool) -> ResourceFormat;

    fn requires_swizzle(&self, needs_alpha: bool) -> bool;

    /// Forward a completed graph to the executor.
    fn schedule_tasks(&self, graph: TaskGraph);

    /// Drain tasks the executor finished since the last drain.
    fn collect_completed_tasks(&self) -> Vec<Arc<dyn Task>>;

    /// Cancel unstarted work and block until in-flight tasks finish.
    /// Required before dropping the backend so no task outlives the
    /// resources it references.
    fn shutdown(&self);
}
