use std::cmp::Ordering;
use std::collections::VecDeque;

use model::{TileId, TilePriority};

/// Which tiles a raster queue should cover. The scheduling pass always
/// asks for `All`; the narrower kinds exist for clients that want to
/// inspect just the tiles gating activation or draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterQueueKind {
    All,
    RequiredForActivation,
    RequiredForDraw,
}

fn compare_for_raster(
    left: &(usize, TileId, TilePriority),
    right: &(usize, TileId, TilePriority),
) -> Ordering {
    let (left_index, _, left_priority) = left;
    let (right_index, _, right_priority) = right;
    left_priority
        .bin
        .cmp(&right_priority.bin)
        .then(
            left_priority
                .distance_to_visible
                .partial_cmp(&right_priority.distance_to_visible)
                .unwrap_or(Ordering::Equal),
        )
        .then(left_index.cmp(right_index))
}

fn sorted_ids(
    tiles: impl IntoIterator<Item = (TileId, TilePriority)>,
    reversed: bool,
) -> VecDeque<TileId> {
    let mut indexed = tiles
        .into_iter()
        .enumerate()
        .map(|(index, (id, priority))| (index, id, priority))
        .collect::<Vec<_>>();
    indexed.sort_by(|left, right| {
        let ordering = compare_for_raster(left, right);
        if reversed { ordering.reverse() } else { ordering }
    });
    indexed.into_iter().map(|(_, id, _)| id).collect()
}

/// Tiles in decreasing urgency: most urgently needed first. Built
/// fresh by the client for every scheduling pass; ties fall back to
/// the client's supplied order, so traversal is deterministic.
#[derive(Debug, Default)]
pub struct RasterTilePriorityQueue {
    ordered: VecDeque<TileId>,
}

impl RasterTilePriorityQueue {
    pub fn from_prioritized(tiles: impl IntoIterator<Item = (TileId, TilePriority)>) -> Self {
        Self {
            ordered: sorted_ids(tiles, false),
        }
    }

    pub fn pop(&mut self) -> Option<TileId> {
        self.ordered.pop_front()
    }

    pub fn peek(&self) -> Option<TileId> {
        self.ordered.front().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }
}

/// Tiles in increasing urgency: least needed first, for reclaiming
/// memory.
#[derive(Debug, Default)]
pub struct EvictionTilePriorityQueue {
    ordered: VecDeque<TileId>,
}

impl EvictionTilePriorityQueue {
    pub fn from_prioritized(tiles: impl IntoIterator<Item = (TileId, TilePriority)>) -> Self {
        Self {
            ordered: sorted_ids(tiles, true),
        }
    }

    pub fn pop(&mut self) -> Option<TileId> {
        self.ordered.pop_front()
    }

    pub fn peek(&self) -> Option<TileId> {
        self.ordered.front().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }
}
