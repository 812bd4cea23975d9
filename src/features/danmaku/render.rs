//! Display stage
//!
//! Owns the object pool, the lane allocator and the list of Active displays,
//! and keeps every borrowed `DisplayObject` positioned for the current frame.
//! Every admission borrows exactly one handle and one lane; every retirement
//! returns both.
//!
//! A display keeps the pixel rows it was admitted on. Lane windows are kept
//! in playback clock time, so whenever motion and clock drift apart (pause,
//! speed or rate changes) the windows are recomputed from the remaining
//! motion.

use tracing::{debug, trace};

use super::lanes::{LaneAllocator, LaneLayout, LaneRef};
use super::measure::TextMeasure;
use super::motion::Motion;
use super::pool::{DisplayObject, HandleToken, ObjectPool, PoolStats};
use super::types::{CommentId, CommentItem, CommentKind};
use crate::features::settings::EngineConfig;

/// Why an admission attempt failed; the item stays Pending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionExhausted {
    /// `max_concurrent` handles are already lent out
    Pool,
    /// No lane of the item's kind is eligible
    Lanes,
}

/// An item currently on screen
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveDisplay {
    pub id: CommentId,
    pub token: HandleToken,
    pub lane: LaneRef,
    /// Top edge of the rows the display covers
    pub y: f32,
    /// Band height at admission
    pub height: f32,
    pub motion: Motion,
}

fn layout_for(height: f32, config: &EngineConfig) -> LaneLayout {
    LaneLayout {
        height,
        band_height: config.band_height(),
        display_area: config.display_area,
    }
}

#[derive(Debug)]
pub struct Stage {
    pool: ObjectPool,
    lanes: LaneAllocator,
    active: Vec<ActiveDisplay>,
    width: f32,
    height: f32,
    /// Playback clock seconds per second of motion
    clock_rate: f64,
}

impl Stage {
    pub fn new(width: f32, height: f32, config: &EngineConfig) -> Self {
        let width = width.max(0.0);
        let height = height.max(0.0);
        Self {
            pool: ObjectPool::new(config.max_concurrent, config.pool_capacity),
            lanes: LaneAllocator::new(layout_for(height, config)),
            active: Vec::new(),
            width,
            height,
            clock_rate: 1.0,
        }
    }

    pub fn size(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    pub fn active(&self) -> &[ActiveDisplay] {
        &self.active
    }

    pub fn is_active(&self, id: CommentId) -> bool {
        self.active.iter().any(|a| a.id == id)
    }

    pub fn lanes(&self) -> &LaneAllocator {
        &self.lanes
    }

    pub fn pool(&self) -> &ObjectPool {
        &self.pool
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Put an item on screen at clock time `now`
    ///
    /// The pool is checked before a lane is reserved, so a failed admission
    /// leaves both untouched.
    pub fn admit(
        &mut self,
        item: &CommentItem,
        now: f64,
        config: &EngineConfig,
        speed: f64,
        measure: &dyn TextMeasure,
    ) -> Result<(HandleToken, LaneRef), AdmissionExhausted> {
        if !self.pool.can_acquire() {
            return Err(AdmissionExhausted::Pool);
        }

        let font_size = item.font_size.unwrap_or(config.font_size);
        let item_width = measure.measure(&item.text, font_size);
        let motion = if item.kind.is_fixed() {
            Motion::fixed(config.fixed_duration)
        } else {
            Motion::scroll(self.width, item_width, config.scroll_duration)
        };

        let window = motion.total(speed) * self.clock_rate;
        let lane = self
            .lanes
            .admit(item.id, item.kind, now, window, config.collision_margin)
            .ok_or(AdmissionExhausted::Lanes)?;

        let Some(token) = self.pool.acquire() else {
            self.lanes.release(lane, item.id, now);
            return Err(AdmissionExhausted::Pool);
        };

        let (y, height) = self
            .lanes
            .lane(lane)
            .map_or((0.0, 0.0), |l| (l.band, l.height));
        if let Some(object) = self.pool.get_mut(token) {
            object.bind(item, font_size, item_width);
            object.x = motion.x(self.width, item_width);
            object.y = y;
            object.opacity = config.opacity;
            object.visible = true;
        }

        debug!(
            "Admitted {} into {:?} lane {} ({:.2}s)",
            item.id,
            lane.kind,
            lane.index,
            window
        );
        self.active.push(ActiveDisplay {
            id: item.id,
            token,
            lane,
            y,
            height,
            motion,
        });
        Ok((token, lane))
    }

    /// Advance all motion by `dt` seconds and retire finished displays
    pub fn advance(&mut self, dt: f64, speed: f64, now: f64) -> Vec<CommentId> {
        let mut finished = Vec::new();
        for display in self.active.iter_mut() {
            display.motion.advance(dt, speed);
            if display.motion.is_finished() {
                finished.push(display.id);
            }
        }
        for id in &finished {
            self.retire(*id, now);
        }
        finished
    }

    fn release_display(&mut self, display: &ActiveDisplay, now: f64) {
        self.lanes.release(display.lane, display.id, now);
        self.pool.release(display.token);
    }

    /// Remove one Active display, returning its handle and lane
    pub fn retire(&mut self, id: CommentId, now: f64) -> Option<ActiveDisplay> {
        let pos = self.active.iter().position(|a| a.id == id)?;
        let display = self.active.remove(pos);
        self.release_display(&display, now);
        trace!("Retired {}", id);
        Some(display)
    }

    /// Retire by handle; stale tokens resolve to nothing
    pub fn retire_token(&mut self, token: HandleToken, now: f64) -> Option<CommentId> {
        if !self.pool.is_live(token) {
            return None;
        }
        let id = self.active.iter().find(|a| a.token == token)?.id;
        self.retire(id, now).map(|d| d.id)
    }

    /// Retire everything and free every lane
    pub fn retire_all(&mut self) -> Vec<CommentId> {
        let ids = self.active.drain(..).map(|a| a.id).collect();
        self.pool.release_all();
        self.lanes.free_all();
        ids
    }

    /// Recompute lanes for a new surface size, retiring orphaned displays
    ///
    /// Top-anchored rows stay put; bottom displays follow the bottom edge.
    pub fn resize(
        &mut self,
        width: f32,
        height: f32,
        config: &EngineConfig,
        now: f64,
    ) -> Vec<CommentId> {
        let shift = height.max(0.0) - self.height;
        self.width = width.max(0.0);
        self.height = height.max(0.0);
        let orphans = self.lanes.partition(layout_for(self.height, config));
        let retired: Vec<CommentId> = orphans
            .into_iter()
            .filter_map(|(id, _)| self.retire(id, now).map(|d| d.id))
            .collect();
        for display in self
            .active
            .iter_mut()
            .filter(|a| a.lane.kind == CommentKind::Bottom)
        {
            display.y += shift;
        }
        retired
    }

    /// Recompute lanes after a band height change
    ///
    /// Active displays stay on their rows and hold every new lane those
    /// rows overlap until they retire.
    pub fn repartition(&mut self, config: &EngineConfig) {
        let windows: Vec<_> = self
            .active
            .iter()
            .map(|a| self.lanes.window_of(a.lane.kind, a.id))
            .collect();
        self.lanes.partition(layout_for(self.height, config));
        self.lanes.free_all();

        let mut unplaced = 0;
        for (display, window) in self.active.iter_mut().zip(windows) {
            let Some(until) = window else {
                continue;
            };
            match self.lanes.hold_rows(
                display.lane.kind,
                display.id,
                display.y,
                display.height,
                until,
            ) {
                Some(lane) => display.lane = lane,
                None => unplaced += 1,
            }
        }
        if unplaced > 0 {
            debug!("{} displays lie outside every lane after repartition", unplaced);
        }
    }

    /// Playback clock speed relative to motion time
    pub fn set_clock_rate(&mut self, rate: f64) {
        self.clock_rate = if rate.is_finite() && rate > 0.0 { rate } else { 1.0 };
    }

    /// Reset every Active display's lane window to end when its remaining
    /// motion does, starting at clock time `now`
    pub fn sync_windows(&mut self, now: f64, speed: f64) {
        for display in &self.active {
            let until = now + display.motion.remaining(speed) * self.clock_rate;
            self.lanes.reschedule(display.lane, display.id, until);
        }
    }

    /// Apply pool limits from config
    pub fn apply_limits(&mut self, config: &EngineConfig) {
        self.pool.set_max_concurrent(config.max_concurrent);
        self.pool.set_capacity(config.pool_capacity);
    }

    /// Write the current frame's geometry into every borrowed object
    pub fn refresh(&mut self, opacity: f32, visible: bool) {
        for display in &self.active {
            if let Some(object) = self.pool.get_mut(display.token) {
                object.x = display.motion.x(self.width, object.width);
                object.y = display.y;
                object.opacity = if visible { opacity } else { 0.0 };
                object.visible = visible;
            }
        }
    }

    /// Borrowed objects in admission order
    pub fn render_list(&self) -> impl Iterator<Item = &DisplayObject> + '_ {
        self.active.iter().filter_map(|a| self.pool.get(a.token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::danmaku::measure::EstimatedMeasure;

    fn config() -> EngineConfig {
        EngineConfig {
            font_size: 20.0,
            line_height: 1.5,
            scroll_duration: 8.0,
            max_concurrent: 4,
            pool_capacity: 4,
            ..Default::default()
        }
    }

    fn fixed_width(_: &str, _: f32) -> f32 {
        200.0
    }

    #[test]
    fn test_admit_positions_object() {
        let cfg = config();
        let mut stage = Stage::new(800.0, 90.0, &cfg);
        let item = CommentItem::new("hello", 1.0);
        let (token, lane) = stage.admit(&item, 1.0, &cfg, 1.0, &fixed_width).unwrap();
        assert_eq!(lane.index, 0);
        let object = stage.pool().get(token).unwrap();
        assert_eq!(object.x, 800.0);
        assert_eq!(object.y, 0.0);
        assert_eq!(object.width, 200.0);
        assert_eq!(object.comment, Some(item.id));
        assert!(object.visible);
    }

    #[test]
    fn test_pool_exhaustion_leaves_lanes_untouched() {
        let cfg = EngineConfig {
            max_concurrent: 1,
            ..config()
        };
        let mut stage = Stage::new(800.0, 90.0, &cfg);
        stage
            .admit(&CommentItem::new("a", 0.0), 0.0, &cfg, 1.0, &EstimatedMeasure)
            .unwrap();
        let err = stage
            .admit(&CommentItem::new("b", 0.0), 0.0, &cfg, 1.0, &EstimatedMeasure)
            .unwrap_err();
        assert_eq!(err, AdmissionExhausted::Pool);
        let occupied = stage
            .lanes()
            .lanes(CommentKind::Scroll)
            .iter()
            .filter(|l| l.is_occupied())
            .count();
        assert_eq!(occupied, 1);
    }

    #[test]
    fn test_lane_exhaustion() {
        let cfg = config();
        // One 30px top band in the upper half
        let mut stage = Stage::new(800.0, 60.0, &cfg);
        let top = |t: &str| CommentItem::new(t, 0.0).with_kind(CommentKind::Top);
        stage.admit(&top("a"), 0.0, &cfg, 1.0, &fixed_width).unwrap();
        let err = stage.admit(&top("b"), 0.0, &cfg, 1.0, &fixed_width).unwrap_err();
        assert_eq!(err, AdmissionExhausted::Lanes);
        assert_eq!(stage.pool().borrowed(), 1);
    }

    #[test]
    fn test_advance_retires_finished() {
        let cfg = config();
        let mut stage = Stage::new(800.0, 90.0, &cfg);
        let item = CommentItem::new("top", 0.0).with_kind(CommentKind::Top);
        stage.admit(&item, 0.0, &cfg, 1.0, &fixed_width).unwrap();
        assert!(stage.advance(1.0, 1.0, 1.0).is_empty());
        assert_eq!(stage.advance(2.0, 1.0, 3.0), vec![item.id]);
        assert!(stage.active().is_empty());
        assert!(stage.lanes().all_free());
        assert_eq!(stage.pool().borrowed(), 0);
    }

    #[test]
    fn test_stale_token_after_reuse() {
        let cfg = config();
        let mut stage = Stage::new(800.0, 90.0, &cfg);
        let first = CommentItem::new("first", 0.0);
        let (old, _) = stage.admit(&first, 0.0, &cfg, 1.0, &fixed_width).unwrap();
        stage.retire(first.id, 0.5);

        let second = CommentItem::new("second", 0.5);
        let (new, _) = stage.admit(&second, 0.5, &cfg, 1.0, &fixed_width).unwrap();
        assert_eq!(old.index(), new.index());

        assert_eq!(stage.retire_token(old, 1.0), None);
        assert!(stage.is_active(second.id));
        assert_eq!(stage.retire_token(new, 1.0), Some(second.id));
    }

    #[test]
    fn test_resize_retires_orphans() {
        let cfg = config();
        let mut stage = Stage::new(800.0, 90.0, &cfg);
        let ids: Vec<_> = (0..3)
            .map(|i| {
                let item = CommentItem::new(format!("c{}", i), 0.0);
                stage.admit(&item, 0.0, &cfg, 1.0, &fixed_width).unwrap();
                item.id
            })
            .collect();
        let orphans = stage.resize(800.0, 60.0, &cfg, 1.0);
        assert_eq!(orphans, vec![ids[2]]);
        assert_eq!(stage.active().len(), 2);
        assert_eq!(stage.pool().borrowed(), 2);
    }

    #[test]
    fn test_refresh_hides_objects() {
        let cfg = config();
        let mut stage = Stage::new(800.0, 90.0, &cfg);
        let (token, _) = stage
            .admit(&CommentItem::new("a", 0.0), 0.0, &cfg, 1.0, &fixed_width)
            .unwrap();
        stage.refresh(0.8, false);
        let object = stage.pool().get(token).unwrap();
        assert!(!object.visible);
        assert_eq!(object.opacity, 0.0);
        stage.refresh(0.8, true);
        assert_eq!(stage.pool().get(token).unwrap().opacity, 0.8);
        assert_eq!(stage.render_list().count(), 1);
    }

    fn window(stage: &Stage, id: CommentId) -> f64 {
        let lane = stage.active().iter().find(|a| a.id == id).unwrap().lane;
        stage.lanes().window_of(lane.kind, id).unwrap()
    }

    #[test]
    fn test_sync_windows_follows_speed() {
        let cfg = config();
        // One scroll lane
        let mut stage = Stage::new(800.0, 30.0, &cfg);
        let first = CommentItem::new("a", 0.0);
        stage.admit(&first, 0.0, &cfg, 1.0, &fixed_width).unwrap();
        // 1000px at 100px/s; after 5s, 5s remain at speed 1
        stage.advance(5.0, 1.0, 5.0);
        stage.sync_windows(5.0, 2.0);
        assert!((window(&stage, first.id) - 7.5).abs() < 1e-6);
    }

    #[test]
    fn test_sync_windows_covers_fixed_displays() {
        let cfg = config();
        let mut stage = Stage::new(800.0, 90.0, &cfg);
        let item = CommentItem::new("top", 0.0).with_kind(CommentKind::Top);
        stage.admit(&item, 0.0, &cfg, 1.0, &fixed_width).unwrap();
        stage.advance(1.0, 1.0, 1.0);
        assert!((window(&stage, item.id) - 3.0).abs() < 1e-6);

        // Frozen while the clock ran on to 10
        stage.sync_windows(10.0, 1.0);
        assert!((window(&stage, item.id) - 12.0).abs() < 1e-6);
        let other = CommentItem::new("other", 10.0).with_kind(CommentKind::Top);
        assert_eq!(
            stage.admit(&other, 10.0, &cfg, 1.0, &fixed_width).unwrap_err(),
            AdmissionExhausted::Lanes
        );
    }

    #[test]
    fn test_clock_rate_stretches_windows() {
        let cfg = config();
        let mut stage = Stage::new(800.0, 90.0, &cfg);
        stage.set_clock_rate(2.0);
        let item = CommentItem::new("top", 0.0).with_kind(CommentKind::Top);
        stage.admit(&item, 0.0, &cfg, 2.0, &fixed_width).unwrap();
        // 3s of motion span 6s of playback
        assert!((window(&stage, item.id) - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_repartition_keeps_rows() {
        let cfg = config();
        let mut stage = Stage::new(800.0, 180.0, &cfg);
        let items: Vec<_> = (0..3).map(|i| CommentItem::new(format!("c{}", i), 0.0)).collect();
        for item in &items {
            stage.admit(item, 0.0, &cfg, 1.0, &fixed_width).unwrap();
        }
        stage.refresh(1.0, true);
        let rows = |stage: &Stage| -> Vec<f32> { stage.render_list().map(|o| o.y).collect() };
        assert_eq!(rows(&stage), vec![0.0, 30.0, 60.0]);

        // Bands double to 60px: rows 0..90 cover new lanes 0 and 1
        let wide = EngineConfig {
            font_size: 40.0,
            ..cfg.clone()
        };
        stage.repartition(&wide);
        stage.refresh(1.0, true);
        assert_eq!(rows(&stage), vec![0.0, 30.0, 60.0]);

        let next = CommentItem::new("next", 0.5);
        let (_, lane) = stage.admit(&next, 0.5, &wide, 1.0, &fixed_width).unwrap();
        assert_eq!(lane.index, 2);
        assert_eq!(stage.render_list().last().map(|o| o.y), Some(120.0));

        // Retiring the row holders frees their lanes
        for item in &items {
            stage.retire(item.id, 1.0);
        }
        let freed = CommentItem::new("freed", 1.0);
        let (_, lane) = stage.admit(&freed, 1.0, &wide, 1.0, &fixed_width).unwrap();
        assert_eq!(lane.index, 0);
    }

    #[test]
    fn test_resize_keeps_scroll_position_and_moves_bottom_rows() {
        let cfg = config();
        let mut stage = Stage::new(800.0, 180.0, &cfg);
        let scroll = CommentItem::new("scroll", 0.0);
        let bottom = CommentItem::new("bottom", 0.0).with_kind(CommentKind::Bottom);
        let (scroll_token, _) = stage.admit(&scroll, 0.0, &cfg, 1.0, &fixed_width).unwrap();
        let (bottom_token, _) = stage.admit(&bottom, 0.0, &cfg, 1.0, &fixed_width).unwrap();
        stage.advance(2.5, 1.0, 2.5);
        stage.refresh(1.0, true);
        assert_eq!(stage.pool().get(scroll_token).unwrap().x, 550.0);
        assert_eq!(stage.pool().get(bottom_token).unwrap().y, 150.0);

        stage.resize(1200.0, 240.0, &cfg, 2.5);
        stage.refresh(1.0, true);
        assert_eq!(stage.pool().get(scroll_token).unwrap().x, 550.0);
        assert_eq!(stage.pool().get(scroll_token).unwrap().y, 0.0);
        assert_eq!(stage.pool().get(bottom_token).unwrap().y, 210.0);
        assert_eq!(stage.pool().get(bottom_token).unwrap().x, 500.0);
    }

    #[test]
    fn test_retire_all_frees_everything() {
        let cfg = config();
        let mut stage = Stage::new(800.0, 90.0, &cfg);
        for i in 0..3 {
            stage
                .admit(&CommentItem::new(format!("c{}", i), 0.0), 0.0, &cfg, 1.0, &fixed_width)
                .unwrap();
        }
        assert_eq!(stage.retire_all().len(), 3);
        assert!(stage.lanes().all_free());
        assert_eq!(stage.pool().borrowed(), 0);
        assert!(stage.retire_all().is_empty());
    }
}
