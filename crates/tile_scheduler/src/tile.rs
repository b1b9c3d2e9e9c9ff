use std::sync::Arc;

use model::{Color, LayerId, SourceRevision, TileId, TilePriority, TileRect};
use raster_backend::RasterSource;
use resource_pool::RasterResource;

use crate::raster_task::RasterTask;

/// What a tile can currently be drawn from. Only a completed raster
/// task (or an explicit out-of-memory marking during budget
/// enforcement) moves a tile out of `NoResource`.
#[derive(Debug)]
pub enum TileDrawInfo {
    /// Needs raster; nothing to draw.
    NoResource,
    /// Ready to draw from a pooled resource holding `content_revision`.
    Resource {
        resource: Arc<RasterResource>,
        content_revision: SourceRevision,
    },
    /// Content is provably a single color; no resource needed.
    SolidColor {
        color: Color,
        content_revision: SourceRevision,
    },
    /// Treated as ready to draw but blank, so activation is never
    /// starved by a budget shortfall.
    OutOfMemory,
}

impl TileDrawInfo {
    pub fn is_ready_to_draw(&self) -> bool {
        !matches!(self, TileDrawInfo::NoResource)
    }

    pub fn has_resource(&self) -> bool {
        matches!(self, TileDrawInfo::Resource { .. })
    }
}

/// Two-phase lifecycle: a released tile with an in-flight raster task
/// lingers as `ReleasedPending` until the next completion drain
/// destroys it. Destroyed tiles leave the registry entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileLifecycle {
    Live,
    ReleasedPending,
}

/// Everything the owning layer provides when creating a tile. The
/// manager assigns the id.
pub struct TileParams {
    pub layer_id: LayerId,
    pub content_rect: TileRect,
    pub enclosing_rect: TileRect,
    pub contents_scale: f32,
    pub raster_source: Arc<dyn RasterSource>,
    pub source_revision: SourceRevision,
    pub priority: TilePriority,
    pub required_for_activation: bool,
    pub required_for_draw: bool,
}

/// One screen-space rectangle of content at a given scale.
pub struct Tile {
    id: TileId,
    layer_id: LayerId,
    content_rect: TileRect,
    enclosing_rect: TileRect,
    contents_scale: f32,
    raster_source: Arc<dyn RasterSource>,
    source_revision: SourceRevision,
    invalidated_rect: TileRect,
    last_rastered_revision: Option<SourceRevision>,
    priority: TilePriority,
    required_for_activation: bool,
    required_for_draw: bool,
    draw_info: TileDrawInfo,
    raster_task: Option<Arc<RasterTask>>,
    lifecycle: TileLifecycle,
    scheduled_priority: Option<u16>,
}

impl Tile {
    pub(crate) fn new(id: TileId, params: TileParams) -> Self {
        assert!(
            !params.content_rect.is_empty(),
            "tile content rect must be non-empty"
        );
        assert!(
            params.enclosing_rect.contains(params.content_rect),
            "tile enclosing rect must contain its content rect"
        );
        assert!(
            params.contents_scale > 0.0,
            "tile contents scale must be positive, got {}",
            params.contents_scale
        );
        Self {
            id,
            layer_id: params.layer_id,
            content_rect: params.content_rect,
            enclosing_rect: params.enclosing_rect,
            contents_scale: params.contents_scale,
            raster_source: params.raster_source,
            source_revision: params.source_revision,
            invalidated_rect: TileRect::default(),
            last_rastered_revision: None,
            priority: params.priority,
            required_for_activation: params.required_for_activation,
            required_for_draw: params.required_for_draw,
            draw_info: TileDrawInfo::NoResource,
            raster_task: None,
            lifecycle: TileLifecycle::Live,
            scheduled_priority: None,
        }
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    pub fn layer_id(&self) -> LayerId {
        self.layer_id
    }

    pub fn content_rect(&self) -> TileRect {
        self.content_rect
    }

    pub fn enclosing_rect(&self) -> TileRect {
        self.enclosing_rect
    }

    pub fn contents_scale(&self) -> f32 {
        self.contents_scale
    }

    pub fn raster_source(&self) -> &Arc<dyn RasterSource> {
        &self.raster_source
    }

    pub fn source_revision(&self) -> SourceRevision {
        self.source_revision
    }

    pub fn invalidated_rect(&self) -> TileRect {
        self.invalidated_rect
    }

    pub fn priority(&self) -> TilePriority {
        self.priority
    }

    pub fn required_for_activation(&self) -> bool {
        self.required_for_activation
    }

    pub fn required_for_draw(&self) -> bool {
        self.required_for_draw
    }

    pub fn draw_info(&self) -> &TileDrawInfo {
        &self.draw_info
    }

    pub fn lifecycle(&self) -> TileLifecycle {
        self.lifecycle
    }

    pub fn has_raster_task(&self) -> bool {
        self.raster_task.is_some()
    }

    /// Selection order this tile was scheduled with in the last pass
    /// it was part of, for observability.
    pub fn scheduled_priority(&self) -> Option<u16> {
        self.scheduled_priority
    }

    /// True when the tile's draw info does not reflect the current
    /// source revision.
    pub fn needs_raster(&self) -> bool {
        match &self.draw_info {
            TileDrawInfo::NoResource | TileDrawInfo::OutOfMemory => true,
            TileDrawInfo::Resource {
                content_revision, ..
            }
            | TileDrawInfo::SolidColor {
                content_revision, ..
            } => *content_revision != self.source_revision,
        }
    }

    /// Revision this tile was last successfully rasterized at. The
    /// pool may still hold a resource tagged with it even after the
    /// tile's own draw info was evicted, enabling partial re-raster.
    pub(crate) fn previous_content_revision(&self) -> Option<SourceRevision> {
        self.last_rastered_revision
    }

    pub(crate) fn set_last_rastered_revision(&mut self, revision: SourceRevision) {
        self.last_rastered_revision = Some(revision);
    }

    pub(crate) fn set_priority(&mut self, priority: TilePriority) {
        self.priority = priority;
    }

    pub(crate) fn set_required_for_activation(&mut self, required: bool) {
        self.required_for_activation = required;
    }

    pub(crate) fn set_required_for_draw(&mut self, required: bool) {
        self.required_for_draw = required;
    }

    pub(crate) fn invalidate_content(&mut self, dirty_rect: TileRect, revision: SourceRevision) {
        assert!(
            revision > self.source_revision,
            "content revision must move forward"
        );
        self.source_revision = revision;
        self.invalidated_rect = self
            .invalidated_rect
            .union(dirty_rect.intersection(self.content_rect));
    }

    pub(crate) fn clear_invalidation(&mut self) {
        self.invalidated_rect = TileRect::default();
    }

    /// Give a canceled task's dirty region back to the tile so the
    /// next task repaints it.
    pub(crate) fn restore_invalidation(&mut self, dirty_rect: TileRect) {
        self.invalidated_rect = self
            .invalidated_rect
            .union(dirty_rect.intersection(self.content_rect));
    }

    pub(crate) fn raster_task(&self) -> Option<&Arc<RasterTask>> {
        self.raster_task.as_ref()
    }

    pub(crate) fn set_raster_task(&mut self, task: Arc<RasterTask>) {
        assert!(
            self.raster_task.is_none(),
            "tile already has an outstanding raster task"
        );
        self.raster_task = Some(task);
    }

    pub(crate) fn take_raster_task(&mut self) -> Option<Arc<RasterTask>> {
        self.scheduled_priority = None;
        self.raster_task.take()
    }

    pub(crate) fn set_scheduled_priority(&mut self, priority: u16) {
        self.scheduled_priority = Some(priority);
    }

    pub(crate) fn set_draw_info(&mut self, draw_info: TileDrawInfo) -> TileDrawInfo {
        std::mem::replace(&mut self.draw_info, draw_info)
    }

    pub(crate) fn mark_released(&mut self) {
        if self.lifecycle == TileLifecycle::ReleasedPending {
            panic!("tile {} released twice", self.id.raw());
        }
        self.lifecycle = TileLifecycle::ReleasedPending;
    }
}
