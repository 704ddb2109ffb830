use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Weak},
};

use shared::{
    domain::{EngineScanStatus, ScanMode, SessionId},
    protocol::{CleanResult, EngineEvent, ScanProgress, ScanResult, StartScanRequest},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    deletion::{DeleteProgress, ReconcilePolicy},
    engine::ScanEngine,
    error::SessionError,
    result_model::ResultModel,
    selection::{CategorySelection, ExpandedSet, Selection},
    status::{checked_transition, SessionCorrelation, SessionStatus},
};

const DEFAULT_PAGE_SIZE: u64 = 100;
const DEFAULT_EVENT_BUFFER: usize = 256;
const RETIRED_SESSIONS: usize = 16;

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub page_size: u64,
    pub move_to_trash: bool,
    pub reconcile_policy: ReconcilePolicy,
    pub event_buffer: usize,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            move_to_trash: true,
            reconcile_policy: ReconcilePolicy::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub include_hidden: bool,
    pub include_system: bool,
    pub exclude_paths: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StatusChanged(SessionStatus),
    Progress(Arc<ScanProgress>),
    ResultUpdated,
    SelectionChanged { selected: usize },
    DeletionFinished(Arc<CleanResult>),
    PaginationFailed { category: String, message: String },
    Error(String),
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub correlation: SessionCorrelation,
    pub mode: ScanMode,
    pub target_paths: Arc<Vec<String>>,
    pub progress: Option<Arc<ScanProgress>>,
    pub result: Option<Arc<ScanResult>>,
    pub selection: Selection,
    pub expanded: ExpandedSet,
    pub delete_progress: Option<DeleteProgress>,
    pub clean_result: Option<Arc<CleanResult>>,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    pub fn session_id(&self) -> Option<&SessionId> {
        self.correlation.known()
    }

    pub fn selected_size(&self) -> u64 {
        self.result
            .as_ref()
            .map_or(0, |result| self.selection.selected_size(result))
    }
}

#[derive(Default)]
pub(crate) struct SessionState {
    pub(crate) status: SessionStatus,
    pub(crate) correlation: SessionCorrelation,
    pub(crate) mode: ScanMode,
    pub(crate) target_paths: Arc<Vec<String>>,
    /// Bumped by start and reset. Stale async work must not write back.
    pub(crate) generation: u64,
    pub(crate) progress: Option<Arc<ScanProgress>>,
    pub(crate) result: Option<ResultModel>,
    pub(crate) selection: Selection,
    pub(crate) expanded: ExpandedSet,
    pub(crate) delete_progress: Option<DeleteProgress>,
    pub(crate) clean_result: Option<Arc<CleanResult>>,
    pub(crate) last_error: Option<String>,
    pub(crate) held_completion: Option<ScanResult>,
    pub(crate) inflight_pages: HashSet<String>,
    retired: VecDeque<SessionId>,
    listening: bool,
}

impl SessionState {
    fn clear_session_data(&mut self) {
        self.progress = None;
        self.result = None;
        self.selection = Selection::default();
        self.expanded = ExpandedSet::default();
        self.delete_progress = None;
        self.clean_result = None;
        self.last_error = None;
        self.held_completion = None;
        self.inflight_pages.clear();
    }

    fn retire(&mut self, session_id: SessionId) {
        if self.retired.contains(&session_id) {
            return;
        }
        if self.retired.len() == RETIRED_SESSIONS {
            self.retired.pop_front();
        }
        self.retired.push_back(session_id);
    }

    fn is_retired(&self, session_id: Option<&SessionId>) -> bool {
        session_id.is_some_and(|session_id| self.retired.contains(session_id))
    }

    fn detach(&mut self) {
        self.correlation = SessionCorrelation::Detached;
        self.progress = None;
        self.held_completion = None;
        self.inflight_pages.clear();
    }
}

pub struct SessionController {
    pub(crate) engine: Arc<dyn ScanEngine>,
    pub(crate) options: ControllerOptions,
    pub(crate) inner: Mutex<SessionState>,
    pub(crate) events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(engine: Arc<dyn ScanEngine>) -> Arc<Self> {
        Self::with_options(engine, ControllerOptions::default())
    }

    pub fn with_options(engine: Arc<dyn ScanEngine>, options: ControllerOptions) -> Arc<Self> {
        let (events, _) = broadcast::channel(options.event_buffer.max(1));
        Arc::new(Self {
            engine,
            options,
            inner: Mutex::new(SessionState::default()),
            events,
        })
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn report_error(&self, state: &mut SessionState, message: String) {
        state.last_error = Some(message.clone());
        self.emit(SessionEvent::Error(message));
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.lock().await;
        SessionSnapshot {
            status: state.status,
            correlation: state.correlation.clone(),
            mode: state.mode,
            target_paths: Arc::clone(&state.target_paths),
            progress: state.progress.clone(),
            result: state.result.as_ref().map(ResultModel::snapshot),
            selection: state.selection.clone(),
            expanded: state.expanded.clone(),
            delete_progress: state.delete_progress,
            clean_result: state.clean_result.clone(),
            last_error: state.last_error.clone(),
        }
    }

    pub async fn status(&self) -> SessionStatus {
        self.inner.lock().await.status
    }

    pub async fn session_id(&self) -> Option<SessionId> {
        self.inner.lock().await.correlation.known().cloned()
    }

    pub async fn start_scan(
        &self,
        mode: ScanMode,
        target_paths: Vec<String>,
        options: ScanOptions,
    ) -> Result<SessionId, SessionError> {
        let (generation, released) = {
            let mut state = self.inner.lock().await;
            if state.status.is_active() {
                return Err(SessionError::ScanInProgress(state.status));
            }

            let released = state.correlation.known().cloned();
            if let Some(previous) = &released {
                state.retire(previous.clone());
            }
            if state.status != SessionStatus::Idle {
                checked_transition(&mut state.status, SessionStatus::Idle)?;
            }
            state.clear_session_data();
            checked_transition(&mut state.status, SessionStatus::Scanning)?;
            state.correlation = SessionCorrelation::Pending;
            state.mode = mode;
            state.target_paths = Arc::new(target_paths.clone());
            state.generation += 1;
            (state.generation, released)
        };
        self.emit(SessionEvent::StatusChanged(SessionStatus::Scanning));

        if let Some(previous) = released {
            self.release_result(&previous).await;
        }

        info!(
            mode = mode.as_str(),
            paths = target_paths.len(),
            "scan: starting"
        );
        let request = StartScanRequest {
            paths: target_paths,
            mode,
            include_hidden: options.include_hidden,
            include_system: options.include_system,
            exclude_paths: options.exclude_paths,
        };
        let started = self.engine.start(request).await;

        let mut state = self.inner.lock().await;
        let current = state.generation == generation && state.status != SessionStatus::Cancelled;
        match started {
            Ok(session_id) if current && state.correlation == SessionCorrelation::Pending => {
                state.correlation = SessionCorrelation::Known(session_id.clone());
                let foreign_progress = state.progress.as_ref().is_some_and(|progress| {
                    progress
                        .session_id
                        .as_ref()
                        .is_some_and(|tagged| *tagged != session_id)
                });
                if foreign_progress {
                    state.progress = None;
                }
                let completed = match state.held_completion.take() {
                    Some(result) if result.session_id == session_id => {
                        self.complete(&mut state, result)
                    }
                    Some(result) => {
                        debug!(
                            session_id = %result.session_id,
                            "scan: dropping completion for another session"
                        );
                        false
                    }
                    None => false,
                };
                drop(state);
                info!(session_id = %session_id, "scan: started");
                if completed {
                    self.emit(SessionEvent::StatusChanged(SessionStatus::Completed));
                    self.emit(SessionEvent::ResultUpdated);
                }
                Ok(session_id)
            }
            Ok(session_id) => {
                state.retire(session_id.clone());
                drop(state);
                warn!(
                    session_id = %session_id,
                    "scan: start acknowledged after the session was abandoned"
                );
                if let Err(err) = self.engine.cancel(&session_id).await {
                    debug!(session_id = %session_id, "scan: cancelling abandoned session failed: {err:#}");
                }
                Err(SessionError::StartAbandoned)
            }
            Err(err) => {
                let message = format!("{err:#}");
                if current && state.status == SessionStatus::Scanning {
                    checked_transition(&mut state.status, SessionStatus::Failed)?;
                    state.detach();
                    self.report_error(&mut state, message.clone());
                    drop(state);
                    self.emit(SessionEvent::StatusChanged(SessionStatus::Failed));
                }
                warn!("scan: start failed: {message}");
                Err(SessionError::StartFailed(message))
            }
        }
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        self.toggle_pause(SessionStatus::Scanning, SessionStatus::Paused)
            .await
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        self.toggle_pause(SessionStatus::Paused, SessionStatus::Scanning)
            .await?;

        let mut state = self.inner.lock().await;
        if let Some(result) = state.held_completion.take() {
            debug!("scan: applying completion held while paused");
            if self.complete(&mut state, result) {
                drop(state);
                self.emit(SessionEvent::StatusChanged(SessionStatus::Completed));
                self.emit(SessionEvent::ResultUpdated);
            }
        }
        Ok(())
    }

    async fn toggle_pause(&self, from: SessionStatus, to: SessionStatus) -> Result<(), SessionError> {
        let command = if to == SessionStatus::Paused {
            "pause"
        } else {
            "resume"
        };

        let (session_id, generation) = {
            let mut state = self.inner.lock().await;
            let Some(session_id) = state.correlation.known().cloned() else {
                self.report_error(&mut state, SessionError::NoActiveSession.to_string());
                return Err(SessionError::NoActiveSession);
            };
            if state.status != from {
                return Err(SessionError::InvalidTransition {
                    from: state.status,
                    to,
                });
            }
            (session_id, state.generation)
        };

        let outcome = if to == SessionStatus::Paused {
            self.engine.pause(&session_id).await
        } else {
            self.engine.resume(&session_id).await
        };

        let mut state = self.inner.lock().await;
        if let Err(err) = outcome {
            let message = format!("{err:#}");
            warn!(session_id = %session_id, "scan: {command} failed: {message}");
            self.report_error(&mut state, message.clone());
            return Err(SessionError::Command { command, message });
        }

        let still_current = state.generation == generation
            && state.correlation.known() == Some(&session_id)
            && state.status == from;
        if !still_current {
            debug!(session_id = %session_id, "scan: {command} acknowledged for a stale session");
            return Ok(());
        }
        checked_transition(&mut state.status, to)?;
        drop(state);
        info!(session_id = %session_id, "scan: {}", to.as_str());
        self.emit(SessionEvent::StatusChanged(to));
        Ok(())
    }

    pub async fn cancel(&self) -> Result<(), SessionError> {
        let session_id = {
            let mut state = self.inner.lock().await;
            if !state.status.is_active() {
                return Err(SessionError::InvalidTransition {
                    from: state.status,
                    to: SessionStatus::Cancelled,
                });
            }
            let session_id = state.correlation.known().cloned();
            checked_transition(&mut state.status, SessionStatus::Cancelled)?;
            if let Some(session_id) = &session_id {
                state.retire(session_id.clone());
            }
            state.detach();
            session_id
        };
        self.emit(SessionEvent::StatusChanged(SessionStatus::Cancelled));

        let Some(session_id) = session_id else {
            info!("scan: cancelled before the engine issued a session id");
            return Ok(());
        };
        info!(session_id = %session_id, "scan: cancelled");
        if let Err(err) = self.engine.cancel(&session_id).await {
            let message = format!("{err:#}");
            warn!(session_id = %session_id, "scan: cancel command failed: {message}");
            let mut state = self.inner.lock().await;
            self.report_error(&mut state, message);
        }
        Ok(())
    }

    pub async fn reset(&self) -> Result<(), SessionError> {
        let session_id = {
            let mut state = self.inner.lock().await;
            if state.status.is_active() {
                return Err(SessionError::InvalidTransition {
                    from: state.status,
                    to: SessionStatus::Idle,
                });
            }
            let session_id = state.correlation.known().cloned();
            if let Some(session_id) = &session_id {
                state.retire(session_id.clone());
            }
            if state.status != SessionStatus::Idle {
                checked_transition(&mut state.status, SessionStatus::Idle)?;
            }
            state.clear_session_data();
            state.correlation = SessionCorrelation::Detached;
            state.generation += 1;
            session_id
        };
        self.emit(SessionEvent::StatusChanged(SessionStatus::Idle));

        if let Some(session_id) = session_id {
            self.release_result(&session_id).await;
        }
        Ok(())
    }

    async fn release_result(&self, session_id: &SessionId) {
        match self.engine.clear_result(session_id).await {
            Ok(()) => debug!(session_id = %session_id, "scan: released engine result"),
            Err(err) => {
                warn!(session_id = %session_id, "scan: failed to release engine result: {err:#}")
            }
        }
    }

    /// Returns false when the listener is already running.
    pub async fn subscribe(self: &Arc<Self>) -> bool {
        {
            let mut state = self.inner.lock().await;
            if state.listening {
                return false;
            }
            state.listening = true;
        }

        let mut events = self.engine.subscribe_events();
        let controller: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(controller) = controller.upgrade() else {
                            break;
                        };
                        controller.apply_engine_event(event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "scan: engine event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            if let Some(controller) = controller.upgrade() {
                controller.inner.lock().await.listening = false;
            }
            debug!("scan: engine event listener stopped");
        });
        true
    }

    pub async fn apply_engine_event(&self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::Progress(progress) => self.apply_progress(progress).await,
            EngineEvent::Completed(result) => self.apply_completion(result).await,
        }
    }

    async fn apply_progress(&self, progress: ScanProgress) -> bool {
        let mut state = self.inner.lock().await;
        if !state.status.is_active() || progress.status == Some(EngineScanStatus::Idle) {
            return false;
        }
        if state.is_retired(progress.session_id.as_ref())
            || !state.correlation.accepts(progress.session_id.as_ref())
        {
            debug!(
                session_id = ?progress.session_id,
                "scan: dropping progress for another session"
            );
            return false;
        }
        let progress = Arc::new(progress);
        state.progress = Some(Arc::clone(&progress));
        drop(state);
        self.emit(SessionEvent::Progress(progress));
        true
    }

    async fn apply_completion(&self, result: ScanResult) -> bool {
        let mut state = self.inner.lock().await;
        if !state.status.is_active()
            || state.is_retired(Some(&result.session_id))
            || !state.correlation.accepts(Some(&result.session_id))
        {
            debug!(session_id = %result.session_id, "scan: dropping completion for another session");
            return false;
        }
        if state.correlation == SessionCorrelation::Pending {
            debug!(session_id = %result.session_id, "scan: holding completion until start returns");
            state.held_completion = Some(result);
            return false;
        }
        if state.status == SessionStatus::Paused {
            debug!(session_id = %result.session_id, "scan: holding completion until resume");
            state.held_completion = Some(result);
            return false;
        }
        if !self.complete(&mut state, result) {
            return false;
        }
        drop(state);
        self.emit(SessionEvent::StatusChanged(SessionStatus::Completed));
        self.emit(SessionEvent::ResultUpdated);
        true
    }

    fn complete(&self, state: &mut SessionState, result: ScanResult) -> bool {
        if let Err(err) = checked_transition(&mut state.status, SessionStatus::Completed) {
            warn!("scan: ignoring completion: {err}");
            return false;
        }
        info!(
            session_id = %result.session_id,
            files = result.total_files,
            size = result.total_size,
            categories = result.categories.len(),
            "scan: completed"
        );
        state.correlation = SessionCorrelation::Known(result.session_id.clone());
        let model = ResultModel::new(result);
        state.selection.retain_loaded(model.get());
        state.expanded.retain_known(model.get());
        state.result = Some(model);
        true
    }

    pub async fn refresh_progress(&self) -> Result<bool, SessionError> {
        let session_id = self.active_session_id().await?;
        match self.engine.progress(&session_id).await {
            Ok(Some(mut progress)) => {
                if progress.session_id.is_none() {
                    progress.session_id = Some(session_id);
                }
                Ok(self.apply_progress(progress).await)
            }
            Ok(None) => Ok(false),
            Err(err) => Err(self.command_failed("get_progress", err).await),
        }
    }

    pub async fn sync_result(&self) -> Result<bool, SessionError> {
        let session_id = self.active_session_id().await?;
        match self.engine.result(&session_id).await {
            Ok(Some(result)) => Ok(self.apply_completion(result).await),
            Ok(None) => Ok(false),
            Err(err) => Err(self.command_failed("get_result", err).await),
        }
    }

    async fn active_session_id(&self) -> Result<SessionId, SessionError> {
        let state = self.inner.lock().await;
        match state.correlation.known() {
            Some(session_id) if state.status.is_active() => Ok(session_id.clone()),
            _ => Err(SessionError::NoActiveSession),
        }
    }

    async fn command_failed(&self, command: &'static str, err: anyhow::Error) -> SessionError {
        let message = format!("{err:#}");
        warn!("scan: {command} failed: {message}");
        let mut state = self.inner.lock().await;
        self.report_error(&mut state, message.clone());
        SessionError::Command { command, message }
    }

    pub async fn toggle_file(&self, path: &str) -> bool {
        self.update_selection(|selection, result| selection.toggle_file(result, path))
            .await
            .unwrap_or(false)
    }

    pub async fn toggle_category(&self, category_key: &str) -> CategorySelection {
        self.update_selection(|selection, result| selection.toggle_category(result, category_key))
            .await
            .unwrap_or(CategorySelection::None)
    }

    pub async fn select_all(&self) {
        self.update_selection(|selection, result| selection.select_all(result))
            .await;
    }

    pub async fn deselect_all(&self) {
        self.update_selection(|selection, _| selection.deselect_all())
            .await;
    }

    async fn update_selection<T>(
        &self,
        apply: impl FnOnce(&mut Selection, &ScanResult) -> T,
    ) -> Option<T> {
        let mut state = self.inner.lock().await;
        let state = &mut *state;
        let result = state.result.as_ref()?;
        let before = state.selection.clone();
        let outcome = apply(&mut state.selection, result.get());
        let selected = state.selection.len();
        if state.selection != before {
            self.emit(SessionEvent::SelectionChanged { selected });
        }
        Some(outcome)
    }

    pub async fn selected_count(&self) -> usize {
        self.inner.lock().await.selection.len()
    }

    pub async fn selected_size(&self) -> u64 {
        let state = self.inner.lock().await;
        state
            .result
            .as_ref()
            .map_or(0, |result| state.selection.selected_size(result.get()))
    }

    pub async fn category_selection(&self, category_key: &str) -> CategorySelection {
        let state = self.inner.lock().await;
        state
            .result
            .as_ref()
            .map_or(CategorySelection::None, |result| {
                state.selection.category_state(result.get(), category_key)
            })
    }

    pub async fn toggle_expanded(&self, category_key: &str) -> bool {
        let mut state = self.inner.lock().await;
        let state = &mut *state;
        match state.result.as_ref() {
            Some(result) => state.expanded.toggle(result.get(), category_key),
            None => false,
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
