//! Comment manager
//!
//! The public façade of the engine. It owns every component and is the only
//! writer of their state:
//! - direct calls (`add`, `send`, `clear`, setters, player notifications)
//! - `tick`, called once per rendered frame by the host
//!
//! Network work is spawned onto the tokio runtime. Spawned tasks never touch
//! engine state; they report back over a channel that `tick` drains, so a
//! slow backend cannot stall a frame.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::clock::PlaybackClock;
use super::error::{DanmakuError, ValidationError};
use super::events::{
    ConfigChange, DanmakuEvent, DanmakuEventSender, PlayerEvent, PlayerEventReceiver,
    RetireReason,
};
use super::filter::{ContentFilter, FilterVerdict};
use super::measure::{EstimatedMeasure, TextMeasure};
use super::pool::{DisplayObject, HandleToken, PoolStats};
use super::render::{AdmissionExhausted, Stage};
use super::scheduler::ActivationLoop;
use super::store::ItemStore;
use super::types::{Color, CommentId, CommentItem, CommentKind, DisplayStatus, EngineState};
use crate::api::{CommentBackend, CommentRecord, parse_comments};
use crate::features::settings::{self, EngineConfig};

/// Surface size used until the host reports one
const DEFAULT_SURFACE: (f32, f32) = (1280.0, 720.0);

const PLAYBACK_RATE_RANGE: (f64, f64) = (0.1, 16.0);

/// Result of a spawned network task
enum RemoteOutcome {
    Loaded {
        source: String,
        result: Result<Vec<CommentItem>, String>,
    },
    Sent {
        id: CommentId,
        result: Result<(), String>,
    },
}

/// Snapshot of engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub pending: usize,
    pub active: usize,
    pub done: usize,
    pub filtered: usize,
    /// Items whose activation window elapsed without a free lane or handle
    pub dropped: usize,
    pub pool: PoolStats,
}

pub struct CommentManager {
    config: EngineConfig,
    clock: Box<dyn PlaybackClock>,
    events: DanmakuEventSender,
    backend: Option<Arc<dyn CommentBackend>>,
    measure: Box<dyn TextMeasure>,
    store: ItemStore,
    filter: ContentFilter,
    stage: Stage,
    activation: ActivationLoop,
    state: EngineState,
    attached: bool,
    visible: bool,
    playback_rate: f64,
    /// Band height changed; lanes are rebuilt on the next tick
    layout_dirty: bool,
    remote_tx: mpsc::UnboundedSender<RemoteOutcome>,
    remote_rx: mpsc::UnboundedReceiver<RemoteOutcome>,
    remote_tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for CommentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommentManager")
            .field("state", &self.state)
            .field("attached", &self.attached)
            .field("visible", &self.visible)
            .field("items", &self.store.len())
            .field("active", &self.stage.active().len())
            .field("remote_tasks", &self.remote_tasks.len())
            .finish()
    }
}

impl CommentManager {
    pub fn new(
        config: EngineConfig,
        clock: impl PlaybackClock + 'static,
        events: DanmakuEventSender,
    ) -> Self {
        let config = config.clamped();
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        Self {
            filter: ContentFilter::from_rules(&config.filter),
            stage: Stage::new(DEFAULT_SURFACE.0, DEFAULT_SURFACE.1, &config),
            config,
            clock: Box::new(clock),
            events,
            backend: None,
            measure: Box::new(EstimatedMeasure),
            store: ItemStore::new(),
            activation: ActivationLoop::new(),
            state: EngineState::Running,
            attached: true,
            visible: true,
            playback_rate: 1.0,
            layout_dirty: false,
            remote_tx,
            remote_rx,
            remote_tasks: Vec::new(),
        }
    }

    pub fn with_surface(mut self, width: f32, height: f32) -> Self {
        self.stage = Stage::new(width, height, &self.config);
        self
    }

    pub fn with_backend(mut self, backend: impl CommentBackend) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    pub fn with_measure(mut self, measure: impl TextMeasure + 'static) -> Self {
        self.measure = Box::new(measure);
        self
    }

    fn emit(&self, event: DanmakuEvent) {
        // Host may have dropped its receiver
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, new: EngineState) {
        let old = self.state;
        if old == new {
            return;
        }
        self.state = new;
        info!("Danmaku engine {:?} -> {:?}", old, new);
        self.emit(DanmakuEvent::StateChanged { old, new });
    }

    fn ensure_alive(&self) -> Result<(), DanmakuError> {
        if self.state == EngineState::Destroyed {
            Err(DanmakuError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn is_destroyed(&self) -> bool {
        self.state == EngineState::Destroyed
    }

    /// Current playback position, sanitized
    fn playback_time(&self) -> f64 {
        let t = self.clock.current_time();
        if t.is_finite() { t.max(0.0) } else { 0.0 }
    }

    fn effective_speed(&self) -> f64 {
        self.config.speed_multiplier * self.playback_rate
    }

    // ============ Ingestion ============

    fn classify(&mut self, item: &CommentItem) -> DisplayStatus {
        match self.filter.admit(item) {
            FilterVerdict::Allowed => DisplayStatus::Pending,
            FilterVerdict::Rejected(reason) => {
                debug!("Filtered {}: {:?}", item.id, reason);
                DisplayStatus::Filtered
            }
        }
    }

    fn insert_checked(&mut self, item: CommentItem) -> Result<DisplayStatus, DanmakuError> {
        let status = self.classify(&item);
        let id = item.id;
        self.store.insert(item, status)?;
        self.emit(DanmakuEvent::ItemAdded { id, status });
        Ok(status)
    }

    /// Validate, filter and store one item
    ///
    /// Returns the status it entered with (Pending or Filtered). Nothing is
    /// shown until the next activation pass.
    pub fn add(&mut self, item: CommentItem) -> Result<DisplayStatus, DanmakuError> {
        self.ensure_alive()?;
        item.validate()?;
        if self.store.contains(item.id) {
            return Err(ValidationError::DuplicateId(item.id).into());
        }
        self.insert_checked(item)
    }

    /// Add several items; one invalid item rejects the whole batch
    pub fn add_batch(&mut self, items: Vec<CommentItem>) -> Result<usize, DanmakuError> {
        self.ensure_alive()?;
        let mut ids = HashSet::with_capacity(items.len());
        for item in &items {
            item.validate()?;
            if self.store.contains(item.id) || !ids.insert(item.id) {
                return Err(ValidationError::DuplicateId(item.id).into());
            }
        }

        let count = items.len();
        for item in items {
            self.insert_checked(item)?;
        }
        debug!("Added batch of {} comments", count);
        Ok(count)
    }

    /// Post a comment at the current playback time
    ///
    /// The comment is activated immediately, even while paused. When a
    /// send endpoint is configured the write happens in the background;
    /// its failure is reported as `SendFailed` and does not retract the
    /// local display.
    pub fn send(
        &mut self,
        text: impl Into<String>,
        kind: CommentKind,
        color: Color,
    ) -> Result<CommentId, DanmakuError> {
        self.ensure_alive()?;
        let now = self.playback_time();
        let item = CommentItem::new(text, now).with_kind(kind).with_color(color);
        let id = item.id;
        let record = CommentRecord::from(&item);

        if self.add(item)? == DisplayStatus::Pending && self.attached {
            if self.state == EngineState::Paused {
                // Frozen displays still cover their rows
                self.stage.sync_windows(now, self.effective_speed());
            }
            if let Err(e) = self.activate_one(id, now) {
                debug!("Sent comment {} waits for a free {:?}", id, e);
            }
            self.stage.refresh(self.config.opacity, self.visible);
        }

        if let Some(endpoint) = self.config.send_endpoint.clone() {
            self.spawn_send(id, endpoint, record);
        }
        Ok(id)
    }

    // ============ Remote ============

    fn spawn_remote<F>(&mut self, task: F) -> bool
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                self.remote_tasks.push(handle.spawn(task));
                true
            }
            Err(_) => false,
        }
    }

    fn spawn_send(&mut self, id: CommentId, endpoint: String, record: CommentRecord) {
        let Some(backend) = self.backend.clone() else {
            self.fail_send(id, "no comment backend configured".to_string());
            return;
        };
        let tx = self.remote_tx.clone();
        let spawned = self.spawn_remote(async move {
            let result = backend
                .post(&endpoint, record)
                .await
                .map_err(|e| format!("{:#}", e));
            let _ = tx.send(RemoteOutcome::Sent { id, result });
        });
        if !spawned {
            self.fail_send(id, "no async runtime".to_string());
        }
    }

    fn fail_send(&self, id: CommentId, error: String) {
        warn!("Failed to send comment {}: {}", id, error);
        self.emit(DanmakuEvent::SendFailed {
            id,
            error: DanmakuError::RemoteSend(error),
        });
    }

    /// Fetch a remote collection in the background
    ///
    /// The result is applied on a later `tick` (or `flush_remote`) as a
    /// single all-or-nothing batch. Failures leave the store untouched and
    /// emit one `LoadFailed`.
    pub fn load(&mut self, source: impl Into<String>) -> Result<(), DanmakuError> {
        self.ensure_alive()?;
        let source = source.into();
        let Some(backend) = self.backend.clone() else {
            self.fail_load(&source, DanmakuError::Load("no comment backend configured".into()));
            return Ok(());
        };

        info!("Loading comments from {}", source);
        let tx = self.remote_tx.clone();
        let task_source = source.clone();
        let spawned = self.spawn_remote(async move {
            let result = match backend.fetch(&task_source).await {
                Ok(body) => parse_comments(&body).map_err(|e| format!("{:#}", e)),
                Err(e) => Err(format!("{:#}", e)),
            };
            let _ = tx.send(RemoteOutcome::Loaded {
                source: task_source,
                result,
            });
        });
        if !spawned {
            self.fail_load(&source, DanmakuError::Load("no async runtime".into()));
        }
        Ok(())
    }

    /// Ingest a collection body that is already in memory
    pub fn load_from_str(&mut self, source: &str, body: &str) -> Result<usize, DanmakuError> {
        self.ensure_alive()?;
        let parsed = parse_comments(body).map_err(|e| format!("{:#}", e));
        self.apply_loaded(source, parsed)
    }

    fn apply_loaded(
        &mut self,
        source: &str,
        parsed: Result<Vec<CommentItem>, String>,
    ) -> Result<usize, DanmakuError> {
        let result = parsed
            .map_err(DanmakuError::Load)
            .and_then(|items| {
                self.add_batch(items)
                    .map_err(|e| DanmakuError::Load(e.to_string()))
            });
        match &result {
            Ok(count) => {
                info!("Loaded {} comments from {}", count, source);
                self.emit(DanmakuEvent::Loaded {
                    source: source.to_string(),
                    count: *count,
                });
            }
            Err(e) => self.fail_load(source, e.clone()),
        }
        result
    }

    fn fail_load(&self, source: &str, error: DanmakuError) {
        warn!("Failed to load comments from {}: {}", source, error);
        self.emit(DanmakuEvent::LoadFailed {
            source: source.to_string(),
            error,
        });
    }

    fn apply_outcome(&mut self, outcome: RemoteOutcome) {
        match outcome {
            RemoteOutcome::Loaded { source, result } => {
                if self.is_destroyed() {
                    return;
                }
                let _ = self.apply_loaded(&source, result);
            }
            RemoteOutcome::Sent { id, result: Ok(()) } => {
                debug!("Comment {} delivered", id);
                self.emit(DanmakuEvent::Sent { id });
            }
            RemoteOutcome::Sent {
                id,
                result: Err(error),
            } => self.fail_send(id, error),
        }
    }

    /// Apply completed network results without waiting
    fn drain_remote(&mut self) {
        while let Ok(outcome) = self.remote_rx.try_recv() {
            self.apply_outcome(outcome);
        }
        self.remote_tasks.retain(|task| !task.is_finished());
    }

    /// Wait for every outstanding load/send and apply the results
    pub async fn flush_remote(&mut self) {
        let tasks = std::mem::take(&mut self.remote_tasks);
        for result in futures_util::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!("Remote task ended abnormally: {}", e);
            }
        }
        self.drain_remote();
    }

    /// Number of load/send requests still running
    pub fn remote_in_flight(&self) -> usize {
        self.remote_tasks.iter().filter(|t| !t.is_finished()).count()
    }

    // ============ Activation ============

    fn activate_one(&mut self, id: CommentId, now: f64) -> Result<(), AdmissionExhausted> {
        let speed = self.effective_speed();
        let Some(item) = self.store.get(id) else {
            return Ok(());
        };
        let (token, lane) =
            self.stage
                .admit(item, now, &self.config, speed, self.measure.as_ref())?;
        self.store.set_status(id, DisplayStatus::Active);
        self.emit(DanmakuEvent::ItemActivated { id, lane, token });
        Ok(())
    }

    fn activate_due(&mut self, now: f64) {
        let epsilon = self.config.activation_epsilon;
        let dropped = self.store.expire_before(now - epsilon);
        if !dropped.is_empty() {
            debug!("Dropped {} comments whose window elapsed", dropped.len());
        }

        for id in self.store.due(now, epsilon) {
            match self.activate_one(id, now) {
                Ok(()) => {}
                Err(AdmissionExhausted::Pool) => {
                    trace!("Pool exhausted at {:.2}, deferring remaining items", now);
                    break;
                }
                Err(AdmissionExhausted::Lanes) => {
                    trace!("No free lane for {} at {:.2}", id, now);
                }
            }
        }
    }

    fn retire_finished(&mut self, ids: Vec<CommentId>, reason: RetireReason) {
        for id in ids {
            self.store.set_status(id, DisplayStatus::Done);
            self.emit(DanmakuEvent::ItemRetired { id, reason });
        }
    }

    /// Retire everything and recompute statuses from `now`
    fn reposition(&mut self, now: f64, reason: RetireReason) {
        let retired = self.stage.retire_all();
        self.retire_finished(retired, reason);
        self.store
            .reclassify(now, self.config.activation_epsilon);
    }

    /// Run one frame at the current instant
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Run one frame at `now`
    ///
    /// Advances motion by the running time since the previous frame,
    /// retires finished displays, detects backward clock jumps and, when
    /// the rate limit allows, activates due items.
    pub fn tick_at(&mut self, now: Instant) {
        if self.is_destroyed() {
            return;
        }
        self.drain_remote();
        if !self.attached {
            return;
        }

        if self.layout_dirty {
            self.stage.repartition(&self.config);
            self.layout_dirty = false;
        }

        let t = self.playback_time();
        let dt = self.activation.frame_delta(now);
        if dt > 0.0 {
            let finished = self.stage.advance(dt, self.effective_speed(), t);
            self.retire_finished(finished, RetireReason::Completed);
        }

        if self
            .activation
            .observe_clock(t, self.config.activation_epsilon)
        {
            debug!("Playback clock jumped back to {:.2}, treating as seek", t);
            self.reposition(t, RetireReason::Seek);
            self.activation.force_next();
        }

        if self.state == EngineState::Running
            && self
                .activation
                .activation_due(now, self.config.activation_rate())
        {
            self.activate_due(t);
            self.activation.mark_activated(now);
        }

        self.stage.refresh(self.config.opacity, self.visible);
    }

    /// Host renderer reports that a display's animation ended
    ///
    /// Returns `false` for tokens whose borrow already ended.
    pub fn animation_finished(&mut self, token: HandleToken) -> bool {
        let now = self.playback_time();
        match self.stage.retire_token(token, now) {
            Some(id) => {
                self.retire_finished(vec![id], RetireReason::Completed);
                true
            }
            None => {
                debug!("Ignoring stale animation callback for slot {}", token.index());
                false
            }
        }
    }

    // ============ Playback control ============

    /// Empty the store and retire every display; idempotent
    pub fn clear(&mut self) {
        if self.is_destroyed() {
            return;
        }
        let retired = self.stage.retire_all();
        for id in retired {
            self.emit(DanmakuEvent::ItemRetired {
                id,
                reason: RetireReason::Cleared,
            });
        }
        self.store.clear();
        self.filter.forget_all();
        info!("Cleared all comments");
        self.emit(DanmakuEvent::Cleared);
    }

    pub fn pause(&mut self) {
        if self.state == EngineState::Running {
            self.activation.pause();
            self.set_state(EngineState::Paused);
        }
    }

    /// Displays continue from where they froze; their lanes stay held for
    /// the travel they have left
    pub fn resume(&mut self) {
        if self.state == EngineState::Paused {
            self.stage
                .sync_windows(self.playback_time(), self.effective_speed());
            self.activation.resume();
            self.set_state(EngineState::Running);
        }
    }

    /// Playback jumped to `position` seconds
    pub fn seek(&mut self, position: f64) {
        if self.is_destroyed() {
            return;
        }
        let position = if position.is_finite() { position.max(0.0) } else { 0.0 };
        debug!("Seek to {:.2}", position);
        self.reposition(position, RetireReason::Seek);
        self.activation.reset_clock(position);
    }

    /// The video surface changed size
    pub fn resize(&mut self, width: f32, height: f32) {
        if self.is_destroyed() {
            return;
        }
        let now = self.playback_time();
        let orphans = self.stage.resize(width, height, &self.config, now);
        if !orphans.is_empty() {
            debug!("Resize to {}x{} retired {} comments", width, height, orphans.len());
        }
        self.retire_finished(orphans, RetireReason::Resized);
        self.stage.refresh(self.config.opacity, self.visible);
    }

    /// Playback rate multiplier from the host (1.0 = normal)
    pub fn set_playback_rate(&mut self, rate: f64) {
        let rate = if rate.is_finite() {
            rate.clamp(PLAYBACK_RATE_RANGE.0, PLAYBACK_RATE_RANGE.1)
        } else {
            1.0
        };
        self.playback_rate = rate;
        self.stage.set_clock_rate(rate);
        self.stage
            .sync_windows(self.playback_time(), self.effective_speed());
    }

    pub fn handle_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::Play => self.resume(),
            PlayerEvent::Pause => self.pause(),
            PlayerEvent::Seeked(position) => self.seek(position),
            PlayerEvent::Resized { width, height } => self.resize(width, height),
            PlayerEvent::RateChanged(rate) => self.set_playback_rate(rate),
        }
    }

    /// Apply every queued player notification
    pub fn drain_player_events(&mut self, rx: &mut PlayerEventReceiver) -> usize {
        let mut count = 0;
        while let Ok(event) = rx.try_recv() {
            self.handle_player_event(event);
            count += 1;
        }
        count
    }

    // ============ Configuration ============

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Opacity applies to Active displays immediately
    pub fn set_opacity(&mut self, opacity: f32) {
        self.config.opacity = settings::clamp_opacity(opacity);
        self.stage.refresh(self.config.opacity, self.visible);
        self.emit(DanmakuEvent::ConfigChanged(ConfigChange::Opacity(
            self.config.opacity,
        )));
    }

    /// Active scroll displays keep their position and finish their
    /// remaining travel at the new speed
    pub fn set_speed(&mut self, speed: f64) {
        self.config.speed_multiplier = settings::clamp_speed(speed);
        self.stage
            .sync_windows(self.playback_time(), self.effective_speed());
        self.emit(DanmakuEvent::ConfigChanged(ConfigChange::Speed(
            self.config.speed_multiplier,
        )));
    }

    /// Takes effect for items activated from the next tick on
    pub fn set_font_size(&mut self, font_size: f32) {
        self.config.font_size = settings::clamp_font_size(font_size);
        self.layout_dirty = true;
        self.emit(DanmakuEvent::ConfigChanged(ConfigChange::FontSize(
            self.config.font_size,
        )));
    }

    pub fn set_max_concurrent(&mut self, max_concurrent: usize) {
        self.config.max_concurrent = max_concurrent.max(1);
        self.stage.apply_limits(&self.config);
        self.emit(DanmakuEvent::ConfigChanged(ConfigChange::MaxConcurrent(
            self.config.max_concurrent,
        )));
    }

    pub fn set_pool_capacity(&mut self, pool_capacity: usize) {
        self.config.pool_capacity = pool_capacity;
        self.stage.apply_limits(&self.config);
        self.emit(DanmakuEvent::ConfigChanged(ConfigChange::PoolCapacity(
            self.config.pool_capacity,
        )));
    }

    /// Replace the whole configuration
    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config.clamped();
        self.filter.set_rules(&self.config.filter);
        self.stage.apply_limits(&self.config);
        self.stage
            .sync_windows(self.playback_time(), self.effective_speed());
        self.layout_dirty = true;
        self.emit(DanmakuEvent::ConfigChanged(ConfigChange::Replaced));
    }

    /// Access the ingestion filter, e.g. to attach custom predicates
    pub fn filter_mut(&mut self) -> &mut ContentFilter {
        &mut self.filter
    }

    // ============ Rendering ============

    /// Objects to draw this frame; empty while hidden or detached
    pub fn render_list(&self) -> impl Iterator<Item = &DisplayObject> + '_ {
        let visible = self.visible && self.attached;
        self.stage.render_list().filter(move |_| visible)
    }

    /// Keep scheduling but draw nothing
    pub fn hide(&mut self) {
        self.visible = false;
        self.stage.refresh(self.config.opacity, false);
    }

    pub fn show(&mut self) {
        self.visible = true;
        self.stage.refresh(self.config.opacity, true);
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    // ============ Inspection ============

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn status(&self, id: CommentId) -> Option<DisplayStatus> {
        self.store.status(id)
    }

    pub fn get(&self, id: CommentId) -> Option<&CommentItem> {
        self.store.get(id)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn stats(&self) -> EngineStats {
        let counts = self.store.counts();
        EngineStats {
            pending: counts.pending,
            active: counts.active,
            done: counts.done,
            filtered: counts.filtered,
            dropped: self.store.dropped(),
            pool: self.stage.pool_stats(),
        }
    }

    // ============ Lifecycle ============

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Release every display and lane but keep the store
    pub fn detach(&mut self) {
        if self.is_destroyed() || !self.attached {
            return;
        }
        let retired = self.stage.retire_all();
        self.retire_finished(retired, RetireReason::Detached);
        self.attached = false;
        info!("Danmaku engine detached");
    }

    /// Resume displaying after `detach`, from the current playback time
    pub fn reattach(&mut self) {
        if self.is_destroyed() || self.attached {
            return;
        }
        let now = self.playback_time();
        self.store
            .reclassify(now, self.config.activation_epsilon);
        self.activation.reset();
        self.activation.reset_clock(now);
        self.attached = true;
        info!("Danmaku engine attached");
    }

    /// Tear down: retire everything, drop all items, cancel network work
    pub fn destroy(&mut self) {
        if self.is_destroyed() {
            return;
        }
        let retired = self.stage.retire_all();
        for id in retired {
            self.emit(DanmakuEvent::ItemRetired {
                id,
                reason: RetireReason::Detached,
            });
        }
        self.store.clear();
        self.filter.forget_all();
        for task in self.remote_tasks.drain(..) {
            task.abort();
        }
        self.attached = false;
        self.set_state(EngineState::Destroyed);
    }
}

impl Drop for CommentManager {
    fn drop(&mut self) {
        for task in self.remote_tasks.drain(..) {
            task.abort();
        }
    }
}
