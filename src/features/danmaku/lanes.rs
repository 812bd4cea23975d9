//! Lane allocator
//!
//! The surface height is cut into bands of `font_size * line_height` pixels,
//! one partition per comment kind:
//! - Scroll lanes fill the top `display_area` fraction, top to bottom
//! - Top lanes are numbered from the top edge down, within the upper half
//! - Bottom lanes are numbered from the bottom edge up, within the lower half
//!
//! Each lane remembers the clock windows of the comments placed in it. A
//! lane accepts a new comment at time `now` only when
//! `now + collision_margin >= occupied_until`, so two windows in the same
//! lane never overlap by more than the margin.
//!
//! A comment normally holds the one lane it was admitted into. After the
//! band height changes it holds every new lane that overlaps the pixel rows
//! it still covers, until it retires.

use tracing::trace;

use super::types::{CommentId, CommentKind};

/// Identifies one lane within its partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaneRef {
    pub kind: CommentKind,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Occupant {
    id: CommentId,
    until: f64,
}

/// A horizontal band of the surface
#[derive(Debug, Clone, PartialEq)]
pub struct Lane {
    pub index: usize,
    /// Top edge of the band in logical pixels
    pub band: f32,
    pub height: f32,
    occupants: Vec<Occupant>,
    /// Clock time the lane last became free
    idle_since: f64,
}

impl Lane {
    fn new(index: usize, band: f32, height: f32) -> Self {
        Self {
            index,
            band,
            height,
            occupants: Vec::new(),
            idle_since: f64::NEG_INFINITY,
        }
    }

    /// Clock time after which the lane is free
    pub fn occupied_until(&self) -> f64 {
        self.occupants
            .iter()
            .map(|o| o.until)
            .fold(self.idle_since, f64::max)
    }

    pub fn is_occupied(&self) -> bool {
        !self.occupants.is_empty()
    }

    fn overlaps(&self, y: f32, height: f32) -> bool {
        self.band < y + height && y < self.band + self.height
    }

    fn is_eligible(&self, now: f64, margin: f64) -> bool {
        now + margin >= self.occupied_until()
    }

    fn reset(&mut self) {
        self.occupants.clear();
        self.idle_since = f64::NEG_INFINITY;
    }
}

/// Share of the height each fixed partition may use
const FIXED_AREA: f32 = 0.5;

/// Lane geometry inputs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneLayout {
    pub height: f32,
    pub band_height: f32,
    /// Fraction of the height available to scroll lanes
    pub display_area: f32,
}

impl LaneLayout {
    fn lane_count(&self, fraction: f32) -> usize {
        if self.band_height <= 0.0 || self.height <= 0.0 {
            return 0;
        }
        ((self.height * fraction) / self.band_height).floor() as usize
    }
}

/// Assigns comments to non-conflicting lanes
#[derive(Debug, Clone)]
pub struct LaneAllocator {
    layout: LaneLayout,
    scroll: Vec<Lane>,
    top: Vec<Lane>,
    bottom: Vec<Lane>,
}

impl LaneAllocator {
    pub fn new(layout: LaneLayout) -> Self {
        let mut allocator = Self {
            layout,
            scroll: Vec::new(),
            top: Vec::new(),
            bottom: Vec::new(),
        };
        allocator.partition(layout);
        allocator
    }

    pub fn layout(&self) -> LaneLayout {
        self.layout
    }

    /// Rebuild all partitions for a new geometry
    ///
    /// Lanes that still exist keep their occupancy. Returns the comments
    /// whose lane no longer exists.
    pub fn partition(&mut self, layout: LaneLayout) -> Vec<(CommentId, LaneRef)> {
        self.layout = layout;
        let band = layout.band_height;
        let mut orphans = Vec::new();

        let scroll_count = layout.lane_count(layout.display_area.clamp(0.0, 1.0));
        let fixed_count = layout.lane_count(FIXED_AREA);

        for (kind, count) in [
            (CommentKind::Scroll, scroll_count),
            (CommentKind::Top, fixed_count),
            (CommentKind::Bottom, fixed_count),
        ] {
            let lanes = self.lanes_mut(kind);
            for lane in lanes.iter().skip(count) {
                orphans.extend(lane.occupants.iter().map(|o| {
                    (
                        o.id,
                        LaneRef {
                            kind,
                            index: lane.index,
                        },
                    )
                }));
            }
            lanes.truncate(count);
            while lanes.len() < count {
                let index = lanes.len();
                lanes.push(Lane::new(index, 0.0, band));
            }
            for lane in lanes.iter_mut() {
                lane.height = band;
                lane.band = match kind {
                    CommentKind::Scroll | CommentKind::Top => lane.index as f32 * band,
                    CommentKind::Bottom => layout.height - (lane.index + 1) as f32 * band,
                };
            }
        }

        orphans
    }

    fn lanes_mut(&mut self, kind: CommentKind) -> &mut Vec<Lane> {
        match kind {
            CommentKind::Scroll => &mut self.scroll,
            CommentKind::Top => &mut self.top,
            CommentKind::Bottom => &mut self.bottom,
        }
    }

    pub fn lanes(&self, kind: CommentKind) -> &[Lane] {
        match kind {
            CommentKind::Scroll => &self.scroll,
            CommentKind::Top => &self.top,
            CommentKind::Bottom => &self.bottom,
        }
    }

    pub fn lane_count(&self, kind: CommentKind) -> usize {
        self.lanes(kind).len()
    }

    pub fn lane(&self, lane: LaneRef) -> Option<&Lane> {
        self.lanes(lane.kind).get(lane.index)
    }

    /// Top edge of a lane's band
    pub fn band_y(&self, lane: LaneRef) -> Option<f32> {
        self.lane(lane).map(|l| l.band)
    }

    /// Place a comment occupying `[now, now + duration]`
    ///
    /// Among eligible lanes the one with the smallest `occupied_until` wins,
    /// ties going to the lowest index. Returns `None` when no lane is
    /// eligible.
    pub fn admit(
        &mut self,
        id: CommentId,
        kind: CommentKind,
        now: f64,
        duration: f64,
        margin: f64,
    ) -> Option<LaneRef> {
        let lanes = self.lanes_mut(kind);
        let lane = lanes
            .iter_mut()
            .filter(|lane| lane.is_eligible(now, margin))
            .min_by(|a, b| {
                a.occupied_until()
                    .total_cmp(&b.occupied_until())
                    .then(a.index.cmp(&b.index))
            })?;

        // Expired occupants no longer constrain the lane
        let mut idle_since = lane.idle_since;
        lane.occupants.retain(|o| {
            if o.until <= now {
                idle_since = idle_since.max(o.until);
                false
            } else {
                true
            }
        });
        lane.idle_since = idle_since;
        lane.occupants.push(Occupant {
            id,
            until: now + duration.max(0.0),
        });
        trace!("Lane {:?}/{} takes {} until {:.2}", kind, lane.index, id, now + duration);

        Some(LaneRef {
            kind,
            index: lane.index,
        })
    }

    /// Free a comment's holds in its partition
    pub fn release(&mut self, lane: LaneRef, id: CommentId, now: f64) {
        for lane in self.lanes_mut(lane.kind) {
            if let Some(pos) = lane.occupants.iter().position(|o| o.id == id) {
                let occupant = lane.occupants.swap_remove(pos);
                lane.idle_since = lane.idle_since.max(occupant.until.min(now));
            }
        }
    }

    /// Move a comment's window end, e.g. after a speed change
    pub fn reschedule(&mut self, lane: LaneRef, id: CommentId, until: f64) {
        for lane in self.lanes_mut(lane.kind) {
            if let Some(occupant) = lane.occupants.iter_mut().find(|o| o.id == id) {
                occupant.until = until;
            }
        }
    }

    /// Window end of a comment's hold, if it holds any lane of `kind`
    pub fn window_of(&self, kind: CommentKind, id: CommentId) -> Option<f64> {
        self.lanes(kind)
            .iter()
            .flat_map(|l| l.occupants.iter())
            .find(|o| o.id == id)
            .map(|o| o.until)
    }

    /// Hold every lane of `kind` overlapping rows `[y, y + height)` until
    /// `until`, returning the topmost one
    pub fn hold_rows(
        &mut self,
        kind: CommentKind,
        id: CommentId,
        y: f32,
        height: f32,
        until: f64,
    ) -> Option<LaneRef> {
        let mut first: Option<(f32, usize)> = None;
        for lane in self.lanes_mut(kind) {
            if !lane.overlaps(y, height) {
                continue;
            }
            lane.occupants.push(Occupant { id, until });
            if first.is_none_or(|(band, _)| lane.band < band) {
                first = Some((lane.band, lane.index));
            }
        }
        first.map(|(_, index)| LaneRef { kind, index })
    }

    /// Mark every lane free
    pub fn free_all(&mut self) {
        for kind in [CommentKind::Scroll, CommentKind::Top, CommentKind::Bottom] {
            for lane in self.lanes_mut(kind) {
                lane.reset();
            }
        }
    }

    /// Whether no lane holds a comment
    pub fn all_free(&self) -> bool {
        [&self.scroll, &self.top, &self.bottom]
            .iter()
            .all(|lanes| lanes.iter().all(|l| !l.is_occupied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(height: f32) -> LaneLayout {
        LaneLayout {
            height,
            band_height: 30.0,
            display_area: 1.0,
        }
    }

    #[test]
    fn test_partition_counts() {
        let lanes = LaneAllocator::new(layout(100.0));
        assert_eq!(lanes.lane_count(CommentKind::Scroll), 3);
        assert_eq!(lanes.lane_count(CommentKind::Top), 1);
        assert_eq!(
            lanes.band_y(LaneRef { kind: CommentKind::Bottom, index: 0 }),
            Some(70.0)
        );

        let tall = LaneAllocator::new(layout(200.0));
        assert_eq!(tall.lane_count(CommentKind::Top), 3);
        assert_eq!(tall.band_y(LaneRef { kind: CommentKind::Top, index: 1 }), Some(30.0));

        let half = LaneAllocator::new(LaneLayout {
            display_area: 0.5,
            ..layout(120.0)
        });
        assert_eq!(half.lane_count(CommentKind::Scroll), 2);
        assert_eq!(half.lane_count(CommentKind::Bottom), 2);
    }

    #[test]
    fn test_fixed_partitions_do_not_share_rows() {
        let lanes = LaneAllocator::new(layout(300.0));
        let lowest_top = lanes
            .lanes(CommentKind::Top)
            .iter()
            .map(|l| l.band + l.height)
            .fold(0.0, f32::max);
        let highest_bottom = lanes
            .lanes(CommentKind::Bottom)
            .iter()
            .map(|l| l.band)
            .fold(f32::MAX, f32::min);
        assert_eq!(lanes.lane_count(CommentKind::Top), 5);
        assert!(lowest_top <= highest_bottom);
    }

    #[test]
    fn test_distinct_lanes_for_simultaneous_items() {
        let mut lanes = LaneAllocator::new(layout(100.0));
        let a = lanes.admit(CommentId(1), CommentKind::Scroll, 1.0, 8.0, 0.0).unwrap();
        let b = lanes.admit(CommentId(2), CommentKind::Scroll, 1.0, 8.0, 0.0).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.index, 0);
        assert_eq!(b.index, 1);
    }

    #[test]
    fn test_admission_fails_when_full() {
        // Two top lanes
        let mut lanes = LaneAllocator::new(layout(120.0));
        assert!(lanes.admit(CommentId(1), CommentKind::Top, 0.0, 3.0, 0.0).is_some());
        assert!(lanes.admit(CommentId(2), CommentKind::Top, 0.0, 3.0, 0.0).is_some());
        assert!(lanes.admit(CommentId(3), CommentKind::Top, 1.0, 3.0, 0.0).is_none());
        // Window elapsed
        assert!(lanes.admit(CommentId(3), CommentKind::Top, 3.0, 3.0, 0.0).is_some());
    }

    #[test]
    fn test_margin_bounds_overlap() {
        let mut lanes = LaneAllocator::new(layout(30.0));
        let margin = 0.5;
        lanes.admit(CommentId(1), CommentKind::Scroll, 0.0, 4.0, margin).unwrap();
        assert!(lanes.admit(CommentId(2), CommentKind::Scroll, 3.4, 4.0, margin).is_none());
        let lane = lanes.admit(CommentId(2), CommentKind::Scroll, 3.5, 4.0, margin).unwrap();
        // Old window ends at 4.0, new starts at 3.5: overlap == margin
        assert_eq!(lanes.lane(lane).unwrap().occupied_until(), 7.5);
    }

    #[test]
    fn test_prefers_lane_free_longest() {
        let mut lanes = LaneAllocator::new(layout(90.0));
        lanes.admit(CommentId(1), CommentKind::Scroll, 0.0, 5.0, 0.0).unwrap();
        lanes.admit(CommentId(2), CommentKind::Scroll, 0.0, 2.0, 0.0).unwrap();
        lanes.admit(CommentId(3), CommentKind::Scroll, 0.0, 3.0, 0.0).unwrap();
        // At t=6 all are eligible; lane 1 has been free since t=2
        let lane = lanes.admit(CommentId(4), CommentKind::Scroll, 6.0, 5.0, 0.0).unwrap();
        assert_eq!(lane.index, 1);
    }

    #[test]
    fn test_release_frees_lane_early() {
        let mut lanes = LaneAllocator::new(layout(30.0));
        let lane = lanes.admit(CommentId(1), CommentKind::Scroll, 0.0, 8.0, 0.0).unwrap();
        lanes.release(lane, CommentId(1), 2.0);
        assert_eq!(lanes.lane(lane).unwrap().occupied_until(), 2.0);
        assert!(lanes.admit(CommentId(2), CommentKind::Scroll, 2.0, 8.0, 0.0).is_some());
    }

    #[test]
    fn test_reschedule() {
        let mut lanes = LaneAllocator::new(layout(30.0));
        let lane = lanes.admit(CommentId(1), CommentKind::Scroll, 0.0, 8.0, 0.0).unwrap();
        lanes.reschedule(lane, CommentId(1), 4.0);
        assert!(lanes.admit(CommentId(2), CommentKind::Scroll, 4.0, 8.0, 0.0).is_some());
    }

    #[test]
    fn test_hold_rows_blocks_overlapping_lanes() {
        let mut lanes = LaneAllocator::new(layout(90.0));
        // Rows 20..50 straddle lanes 0 and 1
        let first = lanes
            .hold_rows(CommentKind::Scroll, CommentId(1), 20.0, 30.0, 8.0)
            .unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(lanes.window_of(CommentKind::Scroll, CommentId(1)), Some(8.0));

        let lane = lanes.admit(CommentId(2), CommentKind::Scroll, 1.0, 8.0, 0.0).unwrap();
        assert_eq!(lane.index, 2);
        assert!(lanes.admit(CommentId(3), CommentKind::Scroll, 1.0, 8.0, 0.0).is_none());

        // One release frees every row the comment held
        lanes.release(first, CommentId(1), 2.0);
        assert!(!lanes.lane(LaneRef { kind: CommentKind::Scroll, index: 1 }).unwrap().is_occupied());
        assert!(lanes.admit(CommentId(3), CommentKind::Scroll, 2.0, 8.0, 0.0).is_some());
        assert!(lanes.admit(CommentId(4), CommentKind::Scroll, 2.0, 8.0, 0.0).is_some());
    }

    #[test]
    fn test_shrink_reports_orphans() {
        let mut lanes = LaneAllocator::new(layout(90.0));
        for id in 1..=3 {
            lanes.admit(CommentId(id), CommentKind::Scroll, 0.0, 8.0, 0.0).unwrap();
        }
        let orphans = lanes.partition(layout(60.0));
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].0, CommentId(3));
        assert_eq!(lanes.lane_count(CommentKind::Scroll), 2);
        // Surviving lanes keep their occupancy
        assert!(lanes.lane(LaneRef { kind: CommentKind::Scroll, index: 0 }).unwrap().is_occupied());
    }

    #[test]
    fn test_bottom_bands_follow_height() {
        let mut lanes = LaneAllocator::new(layout(90.0));
        let bottom = LaneRef { kind: CommentKind::Bottom, index: 0 };
        assert_eq!(lanes.band_y(bottom), Some(60.0));
        lanes.partition(layout(120.0));
        assert_eq!(lanes.band_y(bottom), Some(90.0));
    }

    #[test]
    fn test_free_all() {
        let mut lanes = LaneAllocator::new(layout(90.0));
        lanes.admit(CommentId(1), CommentKind::Top, 0.0, 3.0, 0.0).unwrap();
        assert!(!lanes.all_free());
        lanes.free_all();
        assert!(lanes.all_free());
    }
}
