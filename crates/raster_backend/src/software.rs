use std::sync::Arc;

use log::debug;
use model::{Color, ResourceFormat, SourceRevision, TileRect};
use resource_pool::RasterResource;
use task_graph::{NamespaceToken, Task, TaskGraph, TaskGraphRunner};

use crate::{PixelCanvas, RasterBackend, RasterBuffer, RasterSource};

/// Software strategy: playback goes straight into the pooled CPU
/// buffer, no upload step and no swizzle.
pub struct SoftwareRasterBackend {
    runner: Arc<dyn TaskGraphRunner>,
    namespace: NamespaceToken,
}

impl SoftwareRasterBackend {
    pub fn new(runner: Arc<dyn TaskGraphRunner>) -> Self {
        let namespace = runner.allocate_namespace();
        Self { runner, namespace }
    }
}

impl RasterBackend for SoftwareRasterBackend {
    fn acquire_buffer(
        &self,
        resource: &Arc<RasterResource>,
        resource_content_revision: Option<SourceRevision>,
        previous_content_revision: Option<SourceRevision>,
    ) -> Box<dyn RasterBuffer> {
        resource.set_in_flight(true);
        let previous_content_valid = resource_content_revision.is_some()
            && resource_content_revision == previous_content_revision;
        Box::new(SoftwareRasterBuffer {
            resource: resource.clone(),
            previous_content_valid,
        })
    }

    fn release_buffer(&self, buffer: Box<dyn RasterBuffer>) {
        // Dropping the buffer clears the in-flight mark.
        drop(buffer);
    }

    fn resource_format(&self, _needs_alpha: bool) -> ResourceFormat {
        ResourceFormat::Rgba8888
    }

    fn requires_swizzle(&self, _needs_alpha: bool) -> bool {
        false
    }

    fn schedule_tasks(&self, graph: TaskGraph) {
        // No global barrier is needed for software raster; the graph
        // goes straight to the executor.
        debug!(
            "software raster backend scheduling {} tasks",
            graph.node_count()
        );
        self.runner.schedule_tasks(self.namespace, graph);
    }

    fn collect_completed_tasks(&self) -> Vec<Arc<dyn Task>> {
        self.runner.collect_completed_tasks(self.namespace)
    }

    fn shutdown(&self) {
        self.runner.schedule_tasks(self.namespace, TaskGraph::new());
        self.runner.wait_for_tasks_to_finish(self.namespace);
    }
}

struct SoftwareRasterBuffer {
    resource: Arc<RasterResource>,
    previous_content_valid: bool,
}

impl RasterBuffer for SoftwareRasterBuffer {
    fn playback(
        &mut self,
        source: &dyn RasterSource,
        full_rect: TileRect,
        dirty_rect: TileRect,
        scale: f32,
        include_embedded_images: bool,
    ) {
        // Without valid previous content the whole tile must be
        // produced, whatever the invalidation says.
        let raster_rect = if self.previous_content_valid {
            dirty_rect.intersection(full_rect)
        } else {
            full_rect
        };
        if raster_rect.is_empty() {
            return;
        }
        let mut pixels = self.resource.lock_pixels();
        let mut canvas = PixelCanvas::new(
            &mut pixels,
            self.resource.width(),
            self.resource.height(),
            self.resource.format(),
            full_rect,
        );
        canvas.fill_rect(raster_rect, Color::TRANSPARENT);
        source.playback(
            &mut canvas,
            full_rect,
            raster_rect,
            scale,
            include_embedded_images,
        );
    }
}

impl Drop for SoftwareRasterBuffer {
    fn drop(&mut self) {
        self.resource.set_in_flight(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resource_pool::{ResourcePool, ResourcePoolLimits};
    use task_graph::SynchronousTaskGraphRunner;

    struct TwoToneSource {
        background: Color,
        accent: Color,
        accent_rect: TileRect,
    }

    impl RasterSource for TwoToneSource {
        fn playback(
            &self,
            canvas: &mut PixelCanvas<'_>,
            _full_rect: TileRect,
            playback_rect: TileRect,
            _scale: f32,
            _include_embedded_images: bool,
        ) {
            canvas.fill_rect(playback_rect, self.background);
            canvas.fill_rect(self.accent_rect.intersection(playback_rect), self.accent);
        }

        fn perform_solid_color_analysis(&self, rect: TileRect, _scale: f32) -> Option<Color> {
            if rect.intersects(self.accent_rect) {
                None
            } else {
                Some(self.background)
            }
        }
    }

    fn backend_and_pool() -> (SoftwareRasterBackend, ResourcePool) {
        let runner = Arc::new(SynchronousTaskGraphRunner::new());
        (
            SoftwareRasterBackend::new(runner),
            ResourcePool::new(ResourcePoolLimits::default()),
        )
    }

    #[test]
    fn full_playback_covers_the_whole_tile() {
        let (backend, pool) = backend_and_pool();
        let resource = pool.acquire(8, 8, ResourceFormat::Rgba8888);
        let full_rect = TileRect::new(16, 16, 8, 8);
        let source = TwoToneSource {
            background: Color::opaque(0, 0, 255),
            accent: Color::opaque(255, 0, 0),
            accent_rect: TileRect::new(16, 16, 2, 2),
        };

        let mut buffer = backend.acquire_buffer(&resource, None, None);
        assert!(resource.is_in_flight());
        buffer.playback(&source, full_rect, TileRect::default(), 1.0, true);
        backend.release_buffer(buffer);
        assert!(!resource.is_in_flight());

        let mut pixels = resource.lock_pixels();
        let canvas = PixelCanvas::new(&mut pixels, 8, 8, ResourceFormat::Rgba8888, full_rect);
        assert_eq!(canvas.pixel_at(16, 16), Color::opaque(255, 0, 0));
        assert_eq!(canvas.pixel_at(20, 20), Color::opaque(0, 0, 255));
    }

    #[test]
    fn partial_playback_repaints_only_the_dirty_rect() {
        let (backend, pool) = backend_and_pool();
        let resource = pool.acquire(8, 8, ResourceFormat::Rgba8888);
        let full_rect = TileRect::new(0, 0, 8, 8);

        let first_pass = TwoToneSource {
            background: Color::opaque(0, 255, 0),
            accent: Color::opaque(0, 255, 0),
            accent_rect: TileRect::default(),
        };
        let mut buffer = backend.acquire_buffer(&resource, None, None);
        buffer.playback(&first_pass, full_rect, TileRect::default(), 1.0, true);
        backend.release_buffer(buffer);

        // Reused with valid previous content: only the dirty corner is
        // replayed with the new background.
        let second_pass = TwoToneSource {
            background: Color::opaque(255, 255, 0),
            accent: Color::opaque(255, 255, 0),
            accent_rect: TileRect::default(),
        };
        let revision = Some(SourceRevision(4));
        let mut buffer = backend.acquire_buffer(&resource, revision, revision);
        buffer.playback(&second_pass, full_rect, TileRect::new(0, 0, 2, 2), 1.0, true);
        backend.release_buffer(buffer);

        let mut pixels = resource.lock_pixels();
        let canvas = PixelCanvas::new(&mut pixels, 8, 8, ResourceFormat::Rgba8888, full_rect);
        assert_eq!(canvas.pixel_at(1, 1), Color::opaque(255, 255, 0));
        assert_eq!(canvas.pixel_at(5, 5), Color::opaque(0, 255, 0));
    }

    #[test]
    fn stale_resource_revision_forces_full_playback() {
        let (backend, pool) = backend_and_pool();
        let resource = pool.acquire(4, 4, ResourceFormat::Rgba8888);
        let full_rect = TileRect::new(0, 0, 4, 4);
        let source = TwoToneSource {
            background: Color::opaque(9, 9, 9),
            accent: Color::opaque(9, 9, 9),
            accent_rect: TileRect::default(),
        };

        let mut buffer = backend.acquire_buffer(
            &resource,
            Some(SourceRevision(1)),
            Some(SourceRevision(2)),
        );
        buffer.playback(&source, full_rect, TileRect::new(0, 0, 1, 1), 1.0, true);
        backend.release_buffer(buffer);

        let mut pixels = resource.lock_pixels();
        let canvas = PixelCanvas::new(&mut pixels, 4, 4, ResourceFormat::Rgba8888, full_rect);
        // The dirty rect was tiny, but the mismatch repainted it all.
        assert_eq!(canvas.pixel_at(3, 3), Color::opaque(9, 9, 9));
    }
}
