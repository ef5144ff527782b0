//! Edit session: the state machine between UI intents and the engine.
//!
//! An [`EditSession`] owns one parameter set, one undo history, one change
//! tracker, the full-resolution source and the preview base derived from it.
//! UI code talks to it through intents:
//!
//! | Intent | History | Delta | Render |
//! |---|---|---|---|
//! | `load_image` | cleared | baseline reset | full chain, preview |
//! | `begin_drag` | | | everything-else-applied drag base |
//! | `update_drag` | | | single filter on the drag base |
//! | `end_drag` | one `SetValue` | one continuous change | full chain, preview |
//! | `set_value` & co. | one operation | one delta | full chain, preview |
//! | `undo` / `redo` | cursor moves | one batch delta | full chain, preview |
//! | `commit` | optional compaction | | full chain, full resolution, worker thread |
//!
//! Interactive renders run synchronously on the caller's thread and publish
//! through a [`PreviewSlot`]. When one fails the session logs a warning and
//! keeps showing the last good preview. Only [`commit`](EditSession::commit)
//! reports render failures to the caller.

use crate::catalog::FilterProperty;
use crate::config::EngineConfig;
use crate::history::OperationHistory;
use crate::imaging::{
    FilterRenderPipeline, PreviewSlot, RenderContext, RenderError, RenderOutput, RenderPlan,
    RenderScale, SkippedStage, render_scale,
};
use crate::operation::FilterOperation;
use crate::params::FilterParameterSet;
use crate::presets::PresetLibrary;
use crate::tracker::{ChangeTracker, Clock, FilterDelta, SystemClock, TrackerStats};
use image::RgbaImage;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No image loaded")]
    NotInitialized,
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Unknown preset '{0}'")]
    UnknownPreset(String),
    #[error("No drag gesture in progress")]
    NotDragging,
    #[error("Cannot {0} while a drag gesture is in progress")]
    DragInProgress(&'static str),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("Failed to start commit worker: {0}")]
    Io(#[from] std::io::Error),
    #[error("Commit worker exited without a result")]
    CommitWorkerLost,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionState {
    Uninitialized,
    Idle,
    Dragging {
        property: FilterProperty,
        start_value: f32,
    },
}

/// A full-resolution render and the parameters it was made from.
#[derive(Debug, Clone)]
pub struct CommittedRender {
    pub image: Arc<RgbaImage>,
    pub params: FilterParameterSet,
    pub fingerprint: String,
    pub skipped: Vec<SkippedStage>,
}

#[derive(Debug, Clone)]
pub enum CommitOutcome {
    Completed(CommittedRender),
    Cancelled,
}

type CommitResult = Result<Option<CommittedRender>, RenderError>;
type CommitCache = Arc<Mutex<Option<CommittedRender>>>;

/// Handle to a commit render running on a worker thread.
#[derive(Debug)]
pub struct CommitHandle {
    cancel: Arc<AtomicBool>,
    cache: CommitCache,
    pending: Option<(Receiver<CommitResult>, JoinHandle<()>)>,
    ready: Option<CommittedRender>,
}

impl CommitHandle {
    fn ready(render: CommittedRender, cache: CommitCache) -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            cache,
            pending: None,
            ready: Some(render),
        }
    }

    /// Ask the worker to stop at the next stage boundary. A render that
    /// finishes anyway is not cached.
    pub fn cancel(&self) {
        // the worker checks the flag under the same lock before caching
        let _cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Block until the worker finishes. A cancelled commit yields
    /// [`CommitOutcome::Cancelled`] even if the render happened to complete.
    pub fn wait(self) -> Result<CommitOutcome, SessionError> {
        let cancelled = || self.cancel.load(Ordering::SeqCst);
        if let Some(render) = self.ready {
            return Ok(if cancelled() {
                CommitOutcome::Cancelled
            } else {
                CommitOutcome::Completed(render)
            });
        }
        let Some((receiver, worker)) = self.pending else {
            return Err(SessionError::CommitWorkerLost);
        };
        let result = receiver.recv();
        if worker.join().is_err() {
            warn!("commit worker panicked");
        }
        match result {
            Ok(Ok(Some(render))) if !cancelled() => Ok(CommitOutcome::Completed(render)),
            Ok(Ok(_)) => Ok(CommitOutcome::Cancelled),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(SessionError::CommitWorkerLost),
        }
    }
}

pub struct EditSession {
    pipeline: FilterRenderPipeline,
    config: EngineConfig,
    presets: PresetLibrary,
    state: SessionState,
    selected: Option<FilterProperty>,
    params: FilterParameterSet,
    history: OperationHistory,
    tracker: ChangeTracker,
    source: Option<Arc<RgbaImage>>,
    preview_base: Option<Arc<RgbaImage>>,
    preview_scale: RenderScale,
    drag_base: Option<RgbaImage>,
    preview: PreviewSlot,
    committed: CommitCache,
    /// Cancel flags of commits whose handles are still alive.
    outstanding: Vec<Weak<AtomicBool>>,
    subscribers: Vec<Sender<FilterDelta>>,
}

impl std::fmt::Debug for EditSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditSession")
            .field("state", &self.state)
            .field("params", &self.params)
            .field("history", &self.history.len())
            .field("source", &self.source.as_ref().map(|s| s.dimensions()))
            .finish_non_exhaustive()
    }
}

impl EditSession {
    /// Session on a shared render context, with the built-in presets and the
    /// system clock.
    pub fn new(context: Arc<RenderContext>, config: EngineConfig) -> Self {
        Self::with_clock(context, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        context: Arc<RenderContext>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tracker = ChangeTracker::new(&config.tracking, clock);
        Self {
            pipeline: FilterRenderPipeline::new(context),
            config,
            presets: PresetLibrary::builtin(),
            state: SessionState::Uninitialized,
            selected: None,
            params: FilterParameterSet::new(),
            history: OperationHistory::new(),
            tracker,
            source: None,
            preview_base: None,
            preview_scale: RenderScale::FULL,
            drag_base: None,
            preview: PreviewSlot::new(),
            committed: CommitCache::default(),
            outstanding: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn with_presets(mut self, presets: PresetLibrary) -> Self {
        self.presets = presets;
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn parameters(&self) -> &FilterParameterSet {
        &self.params
    }

    /// The most recently published preview.
    pub fn preview(&self) -> Option<Arc<RgbaImage>> {
        self.preview.latest_image()
    }

    pub fn preview_base(&self) -> Option<&Arc<RgbaImage>> {
        self.preview_base.as_ref()
    }

    pub fn source(&self) -> Option<&Arc<RgbaImage>> {
        self.source.as_ref()
    }

    pub fn history(&self) -> &OperationHistory {
        &self.history
    }

    pub fn can_undo(&self) -> bool {
        !self.is_dragging() && self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        !self.is_dragging() && self.history.can_redo()
    }

    pub fn presets(&self) -> &PresetLibrary {
        &self.presets
    }

    pub fn tracker_stats(&self) -> TrackerStats {
        self.tracker.stats()
    }

    pub fn last_commit(&self) -> Option<CommittedRender> {
        self.committed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn select_property(&mut self, property: FilterProperty) {
        self.selected = Some(property);
    }

    pub fn selected_property(&self) -> Option<FilterProperty> {
        self.selected
    }

    /// Stream of every delta this session emits from now on.
    pub fn subscribe(&mut self) -> Receiver<FilterDelta> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    // =========================================================================
    // Image lifecycle
    // =========================================================================

    /// Start editing `image`, optionally from saved parameters.
    ///
    /// Loading again discards the previous image, history and commit cache,
    /// and cancels commits of the previous image whose handles are still held.
    pub fn load_image(
        &mut self,
        image: RgbaImage,
        params: Option<FilterParameterSet>,
    ) -> Result<(), SessionError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(SessionError::InvalidImage(format!(
                "{width}x{height} image has no pixels"
            )));
        }

        let base = self
            .pipeline
            .downsample(&image, self.config.preview.max_edge)?;
        self.preview_scale =
            RenderScale::new(render_scale((width, height), base.dimensions()));
        info!(
            width,
            height,
            preview_width = base.width(),
            preview_height = base.height(),
            "image loaded"
        );

        self.source = Some(Arc::new(image));
        self.preview_base = Some(Arc::new(base));
        self.drag_base = None;
        self.params = params.unwrap_or_default();
        self.history.clear();
        self.tracker.reset_baseline(&self.params);
        self.preview.clear();
        self.cancel_outstanding_commits();
        self.state = SessionState::Idle;

        self.refresh_preview();
        Ok(())
    }

    // =========================================================================
    // Drag gestures
    // =========================================================================

    /// Start a continuous edit of `property`. A gesture already in progress
    /// is ended first.
    pub fn begin_drag(&mut self, property: FilterProperty) -> Result<(), SessionError> {
        let base = self.require_preview_base()?;
        if self.is_dragging() {
            self.end_drag()?;
        }

        let plan = RenderPlan::for_parameters(&self.params).without(property);
        self.drag_base = match self.pipeline.apply_plan(&base, &plan, self.preview_scale) {
            Ok(output) => Some(output.into_image()),
            Err(err) => {
                warn!(property = %property, error = %err, "drag base render failed");
                None
            }
        };
        let start_value = self.params.get(property);
        debug!(property = %property, start_value, "drag started");
        self.selected = Some(property);
        self.state = SessionState::Dragging {
            property,
            start_value,
        };
        Ok(())
    }

    /// Move the dragged control to `value`. Returns the quantized value that
    /// was stored.
    pub fn update_drag(&mut self, value: f32) -> Result<f32, SessionError> {
        let SessionState::Dragging { property, .. } = self.state else {
            return Err(SessionError::NotDragging);
        };
        let value = property.info().quantize(value);
        self.params.set(property, value);
        let value = self.params.get(property);

        let ticket = self.preview.begin();
        let rendered = match (&self.drag_base, &self.preview_base) {
            (Some(drag_base), _) => self
                .pipeline
                .apply_single(drag_base, property, value, self.preview_scale)
                .map(|output| output.into_image()),
            (None, Some(base)) => self
                .pipeline
                .apply_chain(base, &self.params, self.preview_scale)
                .map(|output| output.into_image()),
            (None, None) => return Err(SessionError::NotInitialized),
        };
        match rendered {
            Ok(image) => {
                self.preview.publish(ticket, image, self.params);
            }
            Err(err) => warn!(property = %property, error = %err, "drag preview failed"),
        }
        Ok(value)
    }

    /// Finish the gesture: one history entry and one delta covering the
    /// whole drag, then a full-chain preview.
    pub fn end_drag(&mut self) -> Result<Option<FilterDelta>, SessionError> {
        let SessionState::Dragging {
            property,
            start_value,
        } = self.state
        else {
            return Err(SessionError::NotDragging);
        };
        self.state = SessionState::Idle;
        self.drag_base = None;

        let end_value = self.params.get(property);
        let mut delta = None;
        if end_value != start_value {
            self.history.record(FilterOperation::SetValue {
                property,
                new_value: end_value,
                previous_value: start_value,
            });
            delta = self
                .tracker
                .track_continuous_change(property, start_value, end_value);
            if let Some(delta) = &delta {
                self.broadcast(delta);
            }
        }
        debug!(property = %property, start_value, end_value, "drag ended");
        self.render_preview();
        Ok(delta)
    }

    /// Abandon the gesture and restore the value it started from.
    pub fn cancel_drag(&mut self) -> Result<(), SessionError> {
        let SessionState::Dragging {
            property,
            start_value,
        } = self.state
        else {
            return Err(SessionError::NotDragging);
        };
        self.params.set(property, start_value);
        self.state = SessionState::Idle;
        self.drag_base = None;
        debug!(property = %property, "drag cancelled");
        self.render_preview();
        Ok(())
    }

    // =========================================================================
    // Discrete intents
    // =========================================================================

    /// Set one property. Returns the emitted delta, or `None` when nothing
    /// changed.
    pub fn set_value(
        &mut self,
        property: FilterProperty,
        value: f32,
    ) -> Result<Option<FilterDelta>, SessionError> {
        self.require_idle("set a value")?;
        let op = FilterOperation::set_value(&self.params, property, value);
        Ok(self.perform(op))
    }

    pub fn adjust_value(
        &mut self,
        property: FilterProperty,
        delta: f32,
    ) -> Result<Option<FilterDelta>, SessionError> {
        self.require_idle("adjust a value")?;
        let op = FilterOperation::adjust_value(&self.params, property, delta);
        Ok(self.perform(op))
    }

    pub fn reset_property(
        &mut self,
        property: FilterProperty,
    ) -> Result<Option<FilterDelta>, SessionError> {
        self.require_idle("reset a value")?;
        let op = FilterOperation::reset_to_default(&self.params, property);
        Ok(self.perform(op))
    }

    pub fn reset_all(&mut self) -> Result<Option<FilterDelta>, SessionError> {
        self.require_idle("reset")?;
        let op = FilterOperation::reset_all(&self.params);
        Ok(self.perform(op))
    }

    /// Overlay a named preset from the session's library.
    pub fn apply_preset(&mut self, name: &str) -> Result<Option<FilterDelta>, SessionError> {
        self.require_idle("apply a preset")?;
        let preset = self
            .presets
            .get(name)
            .ok_or_else(|| SessionError::UnknownPreset(name.to_string()))?;
        let op = FilterOperation::apply_preset(&self.params, preset.name(), preset.values().clone());
        Ok(self.perform(op))
    }

    // =========================================================================
    // Undo / redo
    // =========================================================================

    /// Revert the last operation. Returns `false` at the start of history,
    /// before an image is loaded, or during a drag.
    pub fn undo(&mut self) -> bool {
        if self.is_dragging() || self.preview_base.is_none() {
            return false;
        }
        let Some(label) = self.history.undo_description() else {
            return false;
        };
        let before = self.params;
        if !self.history.undo(&mut self.params) {
            return false;
        }
        self.after_history_move(&before, format!("Undo: {label}"));
        true
    }

    pub fn redo(&mut self) -> bool {
        if self.is_dragging() || self.preview_base.is_none() {
            return false;
        }
        let Some(label) = self.history.redo_description() else {
            return false;
        };
        let before = self.params;
        if !self.history.redo(&mut self.params) {
            return false;
        }
        self.after_history_move(&before, format!("Redo: {label}"));
        true
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Render the current parameters at full resolution on a worker thread.
    ///
    /// An unchanged parameter fingerprint reuses the last committed render
    /// without starting a worker.
    pub fn commit(&mut self) -> Result<CommitHandle, SessionError> {
        self.require_idle("commit")?;
        let source = self.source.clone().ok_or(SessionError::NotInitialized)?;
        let params = self.params;
        let fingerprint = params.fingerprint();

        if self.config.history.compact_after_commit {
            let removed = self.history.compact();
            if removed > 0 {
                debug!(removed, "history compacted");
            }
        }

        let cached = self
            .committed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|render| render.fingerprint == fingerprint);
        if let Some(render) = cached {
            debug!(fingerprint = %fingerprint, "commit served from cache");
            return Ok(CommitHandle::ready(render, Arc::clone(&self.committed)));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        self.outstanding.retain(|flag| flag.strong_count() > 0);
        self.outstanding.push(Arc::downgrade(&cancel));
        let (tx, rx) = mpsc::channel();
        let pipeline = self.pipeline.clone();
        let cache = Arc::clone(&self.committed);
        let flag = Arc::clone(&cancel);
        info!(
            width = source.width(),
            height = source.height(),
            stages = params.active_properties().len(),
            "commit started"
        );
        let worker = std::thread::Builder::new()
            .name("darkroom-commit".into())
            .spawn(move || {
                let result = pipeline
                    .apply_chain_cancellable(&source, &params, RenderScale::FULL, &flag)
                    .map(|output| {
                        output.map(|RenderOutput { image, skipped }| CommittedRender {
                            image: Arc::new(image.into_owned()),
                            params,
                            fingerprint,
                            skipped,
                        })
                    });
                match &result {
                    Ok(Some(render)) => {
                        let mut cached = cache.lock().unwrap_or_else(PoisonError::into_inner);
                        if flag.load(Ordering::SeqCst) {
                            info!("commit cancelled after the last stage");
                        } else {
                            info!(skipped = render.skipped.len(), "commit finished");
                            *cached = Some(render.clone());
                        }
                    }
                    Ok(None) => info!("commit cancelled"),
                    Err(err) => warn!(error = %err, "commit failed"),
                }
                // the handle may have been dropped
                let _ = tx.send(result);
            })?;

        Ok(CommitHandle {
            cancel,
            cache: Arc::clone(&self.committed),
            pending: Some((rx, worker)),
            ready: None,
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Stop every commit started for the previous image and detach their
    /// results from the cache the next image will use.
    fn cancel_outstanding_commits(&mut self) {
        for flag in self.outstanding.drain(..).filter_map(|weak| weak.upgrade()) {
            flag.store(true, Ordering::SeqCst);
        }
        self.committed = CommitCache::default();
    }

    fn is_dragging(&self) -> bool {
        matches!(self.state, SessionState::Dragging { .. })
    }

    fn require_idle(&self, intent: &'static str) -> Result<(), SessionError> {
        match self.state {
            SessionState::Uninitialized => Err(SessionError::NotInitialized),
            SessionState::Dragging { .. } => Err(SessionError::DragInProgress(intent)),
            SessionState::Idle => Ok(()),
        }
    }

    fn require_preview_base(&self) -> Result<Arc<RgbaImage>, SessionError> {
        self.preview_base
            .clone()
            .ok_or(SessionError::NotInitialized)
    }

    /// Apply, record and announce one discrete operation. No-ops are
    /// dropped without touching history.
    fn perform(&mut self, op: FilterOperation) -> Option<FilterDelta> {
        let before = self.params;
        op.apply(&mut self.params);
        if self.params == before {
            debug!(operation = %op.description(), "operation changed nothing");
            return None;
        }

        let delta = match op.target() {
            Some(property) => self
                .tracker
                .track_single_change(property, self.params.get(property)),
            None => {
                let changes = changed_values(&before, &self.params);
                self.tracker.track_batch_changes(&changes, op.description())
            }
        };
        self.history.record(op);
        if let Some(delta) = &delta {
            self.broadcast(delta);
        }
        self.refresh_preview();
        delta
    }

    fn after_history_move(&mut self, before: &FilterParameterSet, description: String) {
        let changes = changed_values(before, &self.params);
        if let Some(delta) = self.tracker.track_batch_changes(&changes, description) {
            self.broadcast(&delta);
        }
        self.refresh_preview();
    }

    fn broadcast(&mut self, delta: &FilterDelta) {
        self.subscribers.retain(|tx| tx.send(delta.clone()).is_ok());
    }

    /// Full chain on the preview base, unless the shown preview already
    /// matches the current parameters.
    fn refresh_preview(&self) {
        if !self.preview.shows(&self.params) {
            self.render_preview();
        }
    }

    /// Full chain on the preview base. Drag frames apply the dragged filter
    /// last, so a finished gesture always re-renders in chain order.
    fn render_preview(&self) {
        let Some(base) = &self.preview_base else {
            return;
        };
        let ticket = self.preview.begin();
        match self
            .pipeline
            .apply_chain(base, &self.params, self.preview_scale)
        {
            Ok(output) => {
                self.preview
                    .publish(ticket, output.into_image(), self.params);
            }
            Err(err) => warn!(error = %err, "preview render failed, keeping last preview"),
        }
    }
}

fn changed_values(
    before: &FilterParameterSet,
    after: &FilterParameterSet,
) -> BTreeMap<FilterProperty, f32> {
    before
        .diff(after, 0.0)
        .into_iter()
        .map(|change| (change.property, change.new_value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::tracker::ManualClock;
    use FilterProperty::*;
    use image::Rgba;

    fn session_with(backend: MockBackend) -> (EditSession, Arc<MockBackend>) {
        let backend = Arc::new(backend);
        let context = RenderContext::with_backend(Box::new(Arc::clone(&backend)), 1).unwrap();
        let mut config = EngineConfig::default();
        config.preview.max_edge = 10;
        let session = EditSession::with_clock(
            Arc::new(context),
            config,
            Arc::new(ManualClock::new(1_000)),
        );
        (session, backend)
    }

    fn loaded(backend: MockBackend) -> (EditSession, Arc<MockBackend>) {
        let (mut session, backend) = session_with(backend);
        session
            .load_image(RgbaImage::from_pixel(40, 20, Rgba([50, 50, 50, 255])), None)
            .unwrap();
        (session, backend)
    }

    fn apply_count(backend: &MockBackend) -> usize {
        backend
            .get_operations()
            .iter()
            .filter(|op| matches!(op, RecordedOp::Apply { .. }))
            .count()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    #[test]
    fn intents_before_load_are_refused() {
        let (mut session, _) = session_with(MockBackend::new());
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(matches!(
            session.set_value(Brightness, 0.2),
            Err(SessionError::NotInitialized)
        ));
        assert!(matches!(
            session.begin_drag(Brightness),
            Err(SessionError::NotInitialized)
        ));
        assert!(matches!(session.commit(), Err(SessionError::NotInitialized)));
        assert!(!session.undo());
        assert!(session.preview().is_none());
    }

    #[test]
    fn empty_image_is_rejected() {
        let (mut session, _) = session_with(MockBackend::new());
        let result = session.load_image(RgbaImage::new(0, 5), None);
        assert!(matches!(result, Err(SessionError::InvalidImage(_))));
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[test]
    fn load_builds_preview_base_and_renders() {
        let (session, backend) = loaded(MockBackend::new());
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.preview_base().unwrap().dimensions(), (10, 5));
        assert_eq!(session.source().unwrap().dimensions(), (40, 20));
        assert_eq!(session.preview().unwrap().dimensions(), (10, 5));
        assert!(matches!(
            backend.get_operations()[0],
            RecordedOp::Downsample { max_edge: 10 }
        ));
    }

    #[test]
    fn load_with_saved_parameters_renders_them() {
        let (mut session, backend) = session_with(MockBackend::new());
        let saved = FilterParameterSet::new().with(Exposure, 1.0);
        session
            .load_image(RgbaImage::new(40, 20), Some(saved))
            .unwrap();
        assert_eq!(session.parameters(), &saved);
        assert_eq!(backend.applied_properties(), vec![Exposure]);
        assert!(!session.can_undo());
    }

    #[test]
    fn reloading_clears_history() {
        let (mut session, _) = loaded(MockBackend::new());
        session.set_value(Contrast, 1.2).unwrap();
        assert!(session.can_undo());
        session.load_image(RgbaImage::new(8, 8), None).unwrap();
        assert!(!session.can_undo());
        assert!(session.parameters().is_default());
    }

    // =========================================================================
    // Discrete intents and history
    // =========================================================================

    #[test]
    fn undo_and_redo_walk_the_history() {
        let (mut session, _) = loaded(MockBackend::new());
        session.set_value(Brightness, 0.5).unwrap();
        session.set_value(Contrast, 1.5).unwrap();

        assert!(session.undo());
        assert!(session.undo());
        assert!(session.parameters().is_default());
        assert!(!session.undo());

        assert!(session.redo());
        assert!(session.redo());
        assert_eq!(session.parameters().get(Brightness), 0.5);
        assert_eq!(session.parameters().get(Contrast), 1.5);
        assert!(!session.redo());
    }

    #[test]
    fn unchanged_value_records_nothing() {
        let (mut session, _) = loaded(MockBackend::new());
        assert!(session.set_value(Saturation, 1.0).unwrap().is_none());
        assert!(session.reset_all().unwrap().is_none());
        assert!(session.history().is_empty());
    }

    #[test]
    fn set_value_clamps_and_emits_one_delta() {
        let (mut session, _) = loaded(MockBackend::new());
        let delta = session.set_value(Blur, 99.0).unwrap().unwrap();
        assert_eq!(session.parameters().get(Blur), 20.0);
        assert_eq!(delta.len(), 1);
        assert_eq!(delta.changes()[0].new_value, 20.0);
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn one_step_edits_always_emit_a_delta() {
        let (mut session, _) = loaded(MockBackend::new());
        for property in FilterProperty::ALL {
            let info = property.info();
            let value = if info.default + info.step <= info.max {
                info.default + info.step
            } else {
                info.default - info.step
            };
            let delta = session.set_value(property, value).unwrap();
            assert!(delta.is_some(), "{property} step produced no delta");
        }
        assert_eq!(session.history().len(), FilterProperty::COUNT);
    }

    #[test]
    fn adjust_and_reset_property() {
        let (mut session, _) = loaded(MockBackend::new());
        session.adjust_value(Shadows, 0.25).unwrap();
        session.adjust_value(Shadows, 0.25).unwrap();
        assert_eq!(session.parameters().get(Shadows), 0.5);
        session.reset_property(Shadows).unwrap();
        assert_eq!(session.parameters().get(Shadows), 0.0);
        assert_eq!(session.history().len(), 3);
        assert!(session.undo());
        assert_eq!(session.parameters().get(Shadows), 0.5);
    }

    #[test]
    fn preset_is_one_undo_step() {
        let (mut session, _) = loaded(MockBackend::new());
        session.set_value(Temperature, 5000.0).unwrap();
        let delta = session.apply_preset("noir").unwrap().unwrap();
        assert_eq!(delta.description(), "Apply preset 'noir'");
        assert_eq!(session.parameters().get(Saturation), 0.0);
        assert_eq!(session.parameters().get(Temperature), 5000.0);

        assert!(session.undo());
        assert_eq!(
            session.parameters(),
            &FilterParameterSet::new().with(Temperature, 5000.0)
        );
    }

    #[test]
    fn unknown_preset_is_an_error() {
        let (mut session, _) = loaded(MockBackend::new());
        assert!(matches!(
            session.apply_preset("nope"),
            Err(SessionError::UnknownPreset(name)) if name == "nope"
        ));
        assert!(session.history().is_empty());
    }

    #[test]
    fn reset_all_restores_defaults_and_undoes() {
        let (mut session, _) = loaded(MockBackend::new());
        session.set_value(Vignette, 0.4).unwrap();
        session.set_value(Sharpness, 1.0).unwrap();
        let delta = session.reset_all().unwrap().unwrap();
        assert_eq!(delta.len(), 2);
        assert!(session.parameters().is_default());
        assert!(session.undo());
        assert_eq!(session.parameters().get(Vignette), 0.4);
        assert_eq!(session.parameters().get(Sharpness), 1.0);
    }

    #[test]
    fn subscribers_receive_every_delta() {
        let (mut session, _) = loaded(MockBackend::new());
        let rx = session.subscribe();
        session.set_value(Brightness, 0.3).unwrap();
        session.undo();

        let deltas: Vec<FilterDelta> = rx.try_iter().collect();
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].changes()[0].new_value, 0.3);
        assert_eq!(deltas[1].changes()[0].new_value, 0.0);
        assert!(deltas[1].description().starts_with("Undo: "));
    }

    #[test]
    fn dropped_subscriber_is_forgotten() {
        let (mut session, _) = loaded(MockBackend::new());
        drop(session.subscribe());
        session.set_value(Brightness, 0.3).unwrap();
        assert!(session.subscribers.is_empty());
    }

    // =========================================================================
    // Drag gestures
    // =========================================================================

    #[test]
    fn drag_records_one_operation_and_one_delta() {
        let (mut session, _) = loaded(MockBackend::new());
        let rx = session.subscribe();

        session.begin_drag(Exposure).unwrap();
        for value in [0.1, 0.4, 0.9, 1.234] {
            session.update_drag(value).unwrap();
        }
        let delta = session.end_drag().unwrap().unwrap();

        assert_eq!(session.state(), SessionState::Idle);
        assert!((session.parameters().get(Exposure) - 1.23).abs() < 1e-6);
        assert_eq!(session.history().len(), 1);
        assert_eq!(delta.changes()[0].previous_value, 0.0);
        assert!((delta.changes()[0].new_value - 1.23).abs() < 1e-6);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn drag_preview_applies_only_the_dragged_filter() {
        let (mut session, backend) = loaded(MockBackend::new());
        session.set_value(Contrast, 1.2).unwrap();
        session.set_value(Saturation, 0.8).unwrap();

        session.begin_drag(Brightness).unwrap();
        let before = apply_count(&backend);
        session.update_drag(0.2).unwrap();
        session.update_drag(0.3).unwrap();
        assert_eq!(apply_count(&backend) - before, 2);
        assert_eq!(session.selected_property(), Some(Brightness));

        // base pixel 50, two stages in the drag base, one for brightness
        assert_eq!(session.preview().unwrap().get_pixel(0, 0)[0], 53);
    }

    #[test]
    fn end_drag_rerenders_in_chain_order() {
        let (mut session, backend) = loaded(MockBackend::new());
        session.set_value(Contrast, 1.2).unwrap();
        session.begin_drag(Brightness).unwrap();
        session.update_drag(0.4).unwrap();
        session.end_drag().unwrap();

        let applied = backend.applied_properties();
        assert_eq!(applied[applied.len() - 2..], [Brightness, Contrast]);
    }

    #[test]
    fn drag_without_movement_records_nothing() {
        let (mut session, _) = loaded(MockBackend::new());
        session.begin_drag(Blur).unwrap();
        session.update_drag(3.0).unwrap();
        session.update_drag(0.0).unwrap();
        assert!(session.end_drag().unwrap().is_none());
        assert!(session.history().is_empty());
    }

    #[test]
    fn cancel_drag_restores_start_value() {
        let (mut session, _) = loaded(MockBackend::new());
        session.set_value(Temperature, 7000.0).unwrap();
        session.begin_drag(Temperature).unwrap();
        session.update_drag(3000.0).unwrap();
        session.cancel_drag().unwrap();
        assert_eq!(session.parameters().get(Temperature), 7000.0);
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn history_and_discrete_edits_are_refused_while_dragging() {
        let (mut session, _) = loaded(MockBackend::new());
        session.set_value(Blur, 2.0).unwrap();
        session.begin_drag(Blur).unwrap();
        assert!(!session.can_undo());
        assert!(!session.undo());
        assert!(matches!(
            session.set_value(Blur, 1.0),
            Err(SessionError::DragInProgress(_))
        ));
        assert!(matches!(session.commit(), Err(SessionError::DragInProgress(_))));
    }

    #[test]
    fn drag_intents_require_a_gesture() {
        let (mut session, _) = loaded(MockBackend::new());
        assert!(matches!(session.update_drag(0.1), Err(SessionError::NotDragging)));
        assert!(matches!(session.end_drag(), Err(SessionError::NotDragging)));
        assert!(matches!(session.cancel_drag(), Err(SessionError::NotDragging)));
    }

    #[test]
    fn begin_drag_ends_the_previous_gesture() {
        let (mut session, _) = loaded(MockBackend::new());
        session.begin_drag(Brightness).unwrap();
        session.update_drag(0.2).unwrap();
        session.begin_drag(Contrast).unwrap();
        assert_eq!(session.history().len(), 1);
        assert!(matches!(
            session.state(),
            SessionState::Dragging { property: Contrast, .. }
        ));
    }

    #[test]
    fn failed_preview_stage_keeps_session_usable() {
        let (mut session, _) = loaded(MockBackend::failing_on(&[Sharpness]));
        session.set_value(Sharpness, 1.0).unwrap();
        assert_eq!(session.parameters().get(Sharpness), 1.0);
        assert!(session.preview().is_some());
    }

    // =========================================================================
    // Commit
    // =========================================================================

    #[test]
    fn commit_renders_full_resolution() {
        let (mut session, backend) = loaded(MockBackend::new());
        session.set_value(Brightness, 0.2).unwrap();
        let outcome = session.commit().unwrap().wait().unwrap();
        let CommitOutcome::Completed(render) = outcome else {
            panic!("commit was cancelled");
        };
        assert_eq!(render.image.dimensions(), (40, 20));
        assert_eq!(render.image.get_pixel(0, 0)[0], 51);
        assert_eq!(render.params, *session.parameters());
        assert!(backend.get_operations().iter().any(|op| matches!(
            op,
            RecordedOp::Apply { scale, .. } if *scale == 1.0
        )));
    }

    #[test]
    fn unchanged_commit_reuses_the_cached_render() {
        let (mut session, backend) = loaded(MockBackend::new());
        session.set_value(Vignette, 0.5).unwrap();
        session.commit().unwrap().wait().unwrap();
        let applies = apply_count(&backend);

        let outcome = session.commit().unwrap().wait().unwrap();
        assert!(matches!(outcome, CommitOutcome::Completed(_)));
        assert_eq!(apply_count(&backend), applies);

        session.set_value(Vignette, 0.6).unwrap();
        session.commit().unwrap().wait().unwrap();
        assert_eq!(session.last_commit().unwrap().params.get(Vignette), 0.6);
    }

    #[test]
    fn cancelled_commit_surfaces_nothing() {
        let (mut session, backend) = loaded(MockBackend::new());
        session.set_value(Brightness, 0.2).unwrap();
        session.set_value(Contrast, 1.2).unwrap();

        let (release, gate) = mpsc::channel();
        backend.arm_gate(gate);
        let handle = session.commit().unwrap();
        handle.cancel();
        release.send(()).unwrap();

        assert!(matches!(handle.wait().unwrap(), CommitOutcome::Cancelled));
        assert!(session.last_commit().is_none());
    }

    #[test]
    fn commit_cancelled_at_the_last_stage_is_not_cached() {
        let (mut session, backend) = loaded(MockBackend::new());
        session.set_value(Exposure, 0.5).unwrap();

        let (release, gate) = mpsc::channel();
        backend.arm_gate(gate);
        let handle = session.commit().unwrap();
        // the only stage is already running, so the render completes
        std::thread::sleep(std::time::Duration::from_millis(20));
        handle.cancel();
        release.send(()).unwrap();

        assert!(matches!(handle.wait().unwrap(), CommitOutcome::Cancelled));
        assert!(session.last_commit().is_none());
    }

    #[test]
    fn reload_never_serves_the_previous_image_render() {
        let (mut session, backend) = loaded(MockBackend::new());
        session.set_value(Brightness, 0.2).unwrap();
        session.set_value(Contrast, 1.2).unwrap();
        let params = *session.parameters();

        let (release, gate) = mpsc::channel();
        backend.arm_gate(gate);
        let stale = session.commit().unwrap();
        let releaser = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            release.send(()).unwrap();
        });
        session
            .load_image(RgbaImage::from_pixel(8, 8, Rgba([9, 9, 9, 255])), Some(params))
            .unwrap();
        releaser.join().unwrap();
        assert!(matches!(stale.wait().unwrap(), CommitOutcome::Cancelled));
        assert!(session.last_commit().is_none());

        let CommitOutcome::Completed(render) = session.commit().unwrap().wait().unwrap() else {
            panic!("commit was cancelled");
        };
        assert_eq!(render.image.dimensions(), (8, 8));
    }

    #[test]
    fn allocation_failure_fails_the_commit() {
        let (mut session, backend) = loaded(MockBackend::new());
        session.set_value(Blur, 3.0).unwrap();
        backend.fail_allocation.store(true, Ordering::SeqCst);
        let result = session.commit().unwrap().wait();
        assert!(matches!(result, Err(SessionError::Render(_))));
        assert_eq!(session.source().unwrap().dimensions(), (40, 20));
    }

    #[test]
    fn commit_reports_skipped_stages() {
        let (mut session, _) = loaded(MockBackend::failing_on(&[Contrast]));
        session.set_value(Contrast, 1.3).unwrap();
        session.set_value(Brightness, 0.1).unwrap();
        let CommitOutcome::Completed(render) = session.commit().unwrap().wait().unwrap() else {
            panic!("commit was cancelled");
        };
        assert_eq!(render.skipped.len(), 1);
        assert_eq!(render.skipped[0].stage.property, Contrast);
    }

    #[test]
    fn commit_can_compact_history() {
        let backend = Arc::new(MockBackend::new());
        let context = RenderContext::with_backend(Box::new(Arc::clone(&backend)), 1).unwrap();
        let mut config = EngineConfig::default();
        config.history.compact_after_commit = true;
        let mut session = EditSession::new(Arc::new(context), config);
        session.load_image(RgbaImage::new(4, 4), None).unwrap();
        session.set_value(Brightness, 0.1).unwrap();
        session.set_value(Brightness, 0.2).unwrap();
        session.set_value(Brightness, 0.3).unwrap();

        session.commit().unwrap().wait().unwrap();
        assert_eq!(session.history().len(), 1);
        assert!(session.undo());
        assert!(session.parameters().is_default());
    }
}
