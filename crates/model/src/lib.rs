use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert;

/// Default edge length of a rasterized tile in pixels. Callers may
/// create tiles of any size; this is only the conventional default.
pub const DEFAULT_TILE_SIZE: i32 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(u64);

impl TileId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Revision number of the content a tile was rasterized from. A
/// pooled resource tagged with the revision it holds can be recognized
/// as still valid for partial re-raster of the same tile. Revisions
/// must identify one content snapshot of one tile: monotonically
/// increasing per tile and never shared across tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceRevision(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TileRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl TileRect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_size(width: i32, height: i32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn is_empty(self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn right(self) -> i32 {
        self.x.checked_add(self.width).expect("rect right overflow")
    }

    pub fn bottom(self) -> i32 {
        self.y
            .checked_add(self.height)
            .expect("rect bottom overflow")
    }

    pub fn area(self) -> i64 {
        if self.is_empty() {
            return 0;
        }
        (self.width as i64) * (self.height as i64)
    }

    pub fn contains(self, other: TileRect) -> bool {
        if other.is_empty() {
            return true;
        }
        !self.is_empty()
            && other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn intersects(self, other: TileRect) -> bool {
        !self.intersection(other).is_empty()
    }

    pub fn intersection(self, other: TileRect) -> TileRect {
        if self.is_empty() || other.is_empty() {
            return TileRect::default();
        }
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return TileRect::default();
        }
        TileRect {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        }
    }

    pub fn union(self, other: TileRect) -> TileRect {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        let left = self.x.min(other.x);
        let top = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        TileRect {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        }
    }
}

/// Coarse urgency class for a tile. Lower sorts first: `Now` is the
/// most urgent and `Never` means the tile should not be rasterized at
/// all under the current policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityBin {
    Now,
    Soon,
    Eventually,
    Never,
}

/// Per-tile scheduling priority: a bin plus a continuous
/// distance-to-visible metric. Comparison is lexicographic; within a
/// bin a smaller distance wins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilePriority {
    pub bin: PriorityBin,
    pub distance_to_visible: f32,
}

impl TilePriority {
    pub fn new(bin: PriorityBin, distance_to_visible: f32) -> Self {
        assert!(
            distance_to_visible >= 0.0,
            "distance_to_visible must be non-negative, got {distance_to_visible}"
        );
        Self {
            bin,
            distance_to_visible,
        }
    }

    pub fn never() -> Self {
        Self {
            bin: PriorityBin::Never,
            distance_to_visible: f32::INFINITY,
        }
    }

    pub fn is_higher_priority_than(&self, other: &TilePriority) -> bool {
        self.bin < other.bin
            || (self.bin == other.bin && self.distance_to_visible < other.distance_to_visible)
    }
}

/// Which tree's priorities dominate when tiles carry priorities for
/// both an active and a pending tree. The scheduler itself only passes
/// this through to queue construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreePriority {
    SamePriorityForBothTrees,
    SmoothnessTakesPriority,
    NewContentTakesPriority,
}

/// Policy gate applied before any memory is assigned to a tile: tiles
/// whose priority bin the policy does not allow are never scheduled,
/// regardless of available budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLimitPolicy {
    AllowNothing,
    AllowAbsoluteMinimum,
    AllowPrefetchOnly,
    AllowAnything,
}

impl MemoryLimitPolicy {
    pub fn allows_bin(self, bin: PriorityBin) -> bool {
        match self {
            MemoryLimitPolicy::AllowNothing => false,
            MemoryLimitPolicy::AllowAbsoluteMinimum => bin == PriorityBin::Now,
            MemoryLimitPolicy::AllowPrefetchOnly => bin <= PriorityBin::Soon,
            MemoryLimitPolicy::AllowAnything => bin != PriorityBin::Never,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceFormat {
    Rgba8888,
    Rgba4444,
}

impl ResourceFormat {
    pub fn bytes_per_pixel(self) -> i64 {
        match self {
            ResourceFormat::Rgba8888 => 4,
            ResourceFormat::Rgba4444 => 2,
        }
    }
}

/// A (bytes, resource-count) pair compared against hard and soft
/// budgets. Subtraction may go transiently negative while an eviction
/// walk projects usage, so bytes are signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryUsage {
    bytes: i64,
    resources: i32,
}

impl MemoryUsage {
    pub fn new(bytes: i64, resources: i32) -> Self {
        Self { bytes, resources }
    }

    pub fn from_dimensions(width: i32, height: i32, format: ResourceFormat) -> Self {
        assert!(
            width > 0 && height > 0,
            "resource dimensions must be positive, got {width}x{height}"
        );
        let bytes = (width as i64)
            .checked_mul(height as i64)
            .and_then(|pixels| pixels.checked_mul(format.bytes_per_pixel()))
            .expect("resource byte size overflow");
        Self {
            bytes,
            resources: 1,
        }
    }

    pub fn bytes(self) -> i64 {
        self.bytes
    }

    pub fn resources(self) -> i32 {
        self.resources
    }

    pub fn exceeds(self, limit: MemoryUsage) -> bool {
        self.bytes > limit.bytes || self.resources > limit.resources
    }
}

impl std::ops::Add for MemoryUsage {
    type Output = MemoryUsage;

    fn add(self, other: MemoryUsage) -> MemoryUsage {
        MemoryUsage {
            bytes: self
                .bytes
                .checked_add(other.bytes)
                .expect("memory usage byte count overflow"),
            resources: self
                .resources
                .checked_add(other.resources)
                .expect("memory usage resource count overflow"),
        }
    }
}

impl std::ops::AddAssign for MemoryUsage {
    fn add_assign(&mut self, other: MemoryUsage) {
        *self = *self + other;
    }
}

impl std::ops::Sub for MemoryUsage {
    type Output = MemoryUsage;

    fn sub(self, other: MemoryUsage) -> MemoryUsage {
        MemoryUsage {
            bytes: self
                .bytes
                .checked_sub(other.bytes)
                .expect("memory usage byte count underflow"),
            resources: self
                .resources
                .checked_sub(other.resources)
                .expect("memory usage resource count underflow"),
        }
    }
}

impl std::ops::SubAssign for MemoryUsage {
    fn sub_assign(&mut self, other: MemoryUsage) {
        *self = *self - other;
    }
}

pub const TASK_SET_COUNT: usize = 3;

// Task-set membership is stored as a bitmask in a u8.
const_assert!(TASK_SET_COUNT <= 8);

/// Named subsets of in-flight raster work whose joint completion
/// triggers one coalesced notification each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskSet {
    RequiredForActivation,
    RequiredForDraw,
    All,
}

impl TaskSet {
    pub const ALL_SETS: [TaskSet; TASK_SET_COUNT] = [
        TaskSet::RequiredForActivation,
        TaskSet::RequiredForDraw,
        TaskSet::All,
    ];

    pub fn index(self) -> usize {
        match self {
            TaskSet::RequiredForActivation => 0,
            TaskSet::RequiredForDraw => 1,
            TaskSet::All => 2,
        }
    }
}

/// Fixed-size set of task sets a raster task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskSetFlags(u8);

impl TaskSetFlags {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn with(mut self, set: TaskSet) -> Self {
        self.insert(set);
        self
    }

    pub fn insert(&mut self, set: TaskSet) {
        self.0 |= 1 << set.index();
    }

    pub fn contains(self, set: TaskSet) -> bool {
        self.0 & (1 << set.index()) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = TaskSet> {
        TaskSet::ALL_SETS
            .into_iter()
            .filter(move |set| self.contains(*set))
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color {
        r: 0,
        g: 0,
        b: 0,
        a: 0,
    };

    pub fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub fn to_rgba_bytes(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_comparison_is_lexicographic_bin_then_distance() {
        let now_far = TilePriority::new(PriorityBin::Now, 100.0);
        let soon_near = TilePriority::new(PriorityBin::Soon, 0.0);
        let now_near = TilePriority::new(PriorityBin::Now, 1.0);

        assert!(now_far.is_higher_priority_than(&soon_near));
        assert!(now_near.is_higher_priority_than(&now_far));
        assert!(!now_far.is_higher_priority_than(&now_far));
    }

    #[test]
    fn memory_policy_gates_priority_bins() {
        assert!(!MemoryLimitPolicy::AllowNothing.allows_bin(PriorityBin::Now));
        assert!(MemoryLimitPolicy::AllowAbsoluteMinimum.allows_bin(PriorityBin::Now));
        assert!(!MemoryLimitPolicy::AllowAbsoluteMinimum.allows_bin(PriorityBin::Soon));
        assert!(MemoryLimitPolicy::AllowPrefetchOnly.allows_bin(PriorityBin::Soon));
        assert!(!MemoryLimitPolicy::AllowPrefetchOnly.allows_bin(PriorityBin::Eventually));
        assert!(MemoryLimitPolicy::AllowAnything.allows_bin(PriorityBin::Eventually));
        assert!(!MemoryLimitPolicy::AllowAnything.allows_bin(PriorityBin::Never));
    }

    #[test]
    fn memory_usage_exceeds_on_either_component() {
        let limit = MemoryUsage::new(1000, 2);
        assert!(!MemoryUsage::new(1000, 2).exceeds(limit));
        assert!(MemoryUsage::new(1001, 1).exceeds(limit));
        assert!(MemoryUsage::new(500, 3).exceeds(limit));
    }

    #[test]
    fn memory_usage_from_dimensions_counts_one_resource() {
        let usage = MemoryUsage::from_dimensions(256, 256, ResourceFormat::Rgba8888);
        assert_eq!(usage.bytes(), 256 * 256 * 4);
        assert_eq!(usage.resources(), 1);

        let half = MemoryUsage::from_dimensions(256, 256, ResourceFormat::Rgba4444);
        assert_eq!(half.bytes(), 256 * 256 * 2);
    }

    #[test]
    fn task_set_flags_round_trip_all_sets() {
        let mut flags = TaskSetFlags::empty();
        assert!(flags.is_empty());

        flags.insert(TaskSet::RequiredForDraw);
        flags.insert(TaskSet::All);
        assert!(!flags.contains(TaskSet::RequiredForActivation));
        assert!(flags.contains(TaskSet::RequiredForDraw));
        assert!(flags.contains(TaskSet::All));

        let collected = flags.iter().collect::<Vec<_>>();
        assert_eq!(collected, vec![TaskSet::RequiredForDraw, TaskSet::All]);
    }

    #[test]
    fn rect_intersection_and_union_behave_on_disjoint_rects() {
        let left = TileRect::new(0, 0, 10, 10);
        let right = TileRect::new(20, 0, 10, 10);

        assert!(left.intersection(right).is_empty());
        assert!(!left.intersects(right));

        let merged = left.union(right);
        assert_eq!(merged, TileRect::new(0, 0, 30, 10));
        assert!(merged.contains(left));
        assert!(merged.contains(right));
    }

    #[test]
    fn empty_rect_is_ignored_by_union_and_contained_by_anything() {
        let rect = TileRect::new(5, 5, 10, 10);
        let empty = TileRect::default();

        assert_eq!(rect.union(empty), rect);
        assert_eq!(empty.union(rect), rect);
        assert!(rect.contains(empty));
    }
}
