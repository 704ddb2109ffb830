use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{EngineScanStatus, ScanMode, SessionId},
    protocol::{
        Category, CategoryPage, CleanError, CleanResult, EngineEvent, FileEntry, ScanProgress,
        ScanResult, StartScanRequest,
    },
};
use tokio::sync::{broadcast, Mutex, Notify};

use crate::{
    controller::{ControllerOptions, ScanOptions, SessionController},
    engine::ScanEngine,
};

pub(crate) const SESSION: &str = "scan-1";

pub(crate) fn session() -> SessionId {
    SessionId::new(SESSION)
}

pub(crate) fn file(category: &str, path: &str, size: u64) -> FileEntry {
    FileEntry {
        path: path.to_string(),
        name: path.rsplit('/').next().unwrap_or(path).to_string(),
        size,
        modified_time: 1_700_000_000_000,
        category: category.to_string(),
    }
}

pub(crate) fn numbered_files(category: &str, range: std::ops::Range<u64>, size: u64) -> Vec<FileEntry> {
    range
        .map(|n| file(category, &format!("/{category}/{n:04}.tmp"), size))
        .collect()
}

/// Category whose loaded files are a prefix of `file_count` files totalling `total_size`.
pub(crate) fn partial_category(key: &str, files: Vec<FileEntry>, file_count: u64, total_size: u64) -> Category {
    Category {
        key: key.to_string(),
        display_name: key.replace('_', " "),
        description: String::new(),
        has_more: (files.len() as u64) < file_count,
        files,
        file_count,
        total_size,
    }
}

pub(crate) fn full_category(key: &str, files: Vec<FileEntry>) -> Category {
    let file_count = files.len() as u64;
    let total_size = files.iter().map(|file| file.size).sum();
    partial_category(key, files, file_count, total_size)
}

pub(crate) fn scan_result(categories: Vec<Category>) -> ScanResult {
    ScanResult {
        session_id: session(),
        start_time: 1_700_000_000_000,
        end_time: 1_700_000_005_000,
        duration_ms: 5_000,
        total_files: categories.iter().map(|category| category.file_count).sum(),
        total_folders: 4,
        total_size: categories.iter().map(|category| category.total_size).sum(),
        categories,
    }
}

pub(crate) fn progress(session_id: Option<&str>, scanned_files: u64) -> ScanProgress {
    ScanProgress {
        session_id: session_id.map(SessionId::new),
        current_path: format!("/scan/{scanned_files}"),
        scanned_files,
        scanned_size: scanned_files * 10,
        percent: 10.0,
        speed: 100.0,
        status: Some(EngineScanStatus::Scanning),
        ..ScanProgress::default()
    }
}

pub(crate) fn clean_result(cleaned: u64, errors: Vec<(&str, &str)>) -> CleanResult {
    CleanResult {
        session_id: Some(session()),
        total_files: cleaned + errors.len() as u64,
        cleaned_files: cleaned,
        failed_files: errors.len() as u64,
        cleaned_size: cleaned * 10,
        duration_ms: 12,
        errors: errors
            .into_iter()
            .map(|(path, message)| CleanError {
                path: path.to_string(),
                error_code: "E016".to_string(),
                error_message: message.to_string(),
            })
            .collect(),
        ..CleanResult::default()
    }
}

/// In-process engine with scripted answers and recorded calls.
pub(crate) struct ScriptedEngine {
    pub(crate) fail_start: Mutex<Option<String>>,
    pub(crate) failing_commands: Mutex<HashSet<&'static str>>,
    pub(crate) start_gate: Mutex<Option<Arc<Notify>>>,
    pub(crate) start_ids: Mutex<VecDeque<SessionId>>,
    pub(crate) page_gate: Mutex<Option<Arc<Notify>>>,
    pub(crate) pages: Mutex<VecDeque<Result<Option<CategoryPage>, String>>>,
    pub(crate) page_requests: Mutex<Vec<(String, u64, u64)>>,
    pub(crate) delete_outcome: Mutex<Option<Result<CleanResult, String>>>,
    pub(crate) delete_requests: Mutex<Vec<Vec<String>>>,
    pub(crate) stored_progress: Mutex<Option<ScanProgress>>,
    pub(crate) stored_result: Mutex<Option<ScanResult>>,
    pub(crate) calls: Mutex<Vec<String>>,
    events: broadcast::Sender<EngineEvent>,
}

impl ScriptedEngine {
    pub(crate) fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            fail_start: Mutex::new(None),
            failing_commands: Mutex::new(HashSet::new()),
            start_gate: Mutex::new(None),
            start_ids: Mutex::new(VecDeque::new()),
            page_gate: Mutex::new(None),
            pages: Mutex::new(VecDeque::new()),
            page_requests: Mutex::new(Vec::new()),
            delete_outcome: Mutex::new(None),
            delete_requests: Mutex::new(Vec::new()),
            stored_progress: Mutex::new(None),
            stored_result: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            events,
        })
    }

    pub(crate) async fn fail(&self, command: &'static str) {
        self.failing_commands.lock().await.insert(command);
    }

    pub(crate) async fn push_page(&self, page: Result<Option<CategoryPage>, String>) {
        self.pages.lock().await.push_back(page);
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn receiver_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub(crate) async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, command: &'static str) -> Result<()> {
        self.calls.lock().await.push(command.to_string());
        if self.failing_commands.lock().await.contains(command) {
            return Err(anyhow!("engine rejected {command}"));
        }
        Ok(())
    }
}

#[async_trait]
impl ScanEngine for ScriptedEngine {
    async fn start(&self, _request: StartScanRequest) -> Result<SessionId> {
        self.calls.lock().await.push("start".to_string());
        let gate = self.start_gate.lock().await.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(err) = self.fail_start.lock().await.clone() {
            return Err(anyhow!(err));
        }
        Ok(self.start_ids.lock().await.pop_front().unwrap_or_else(session))
    }

    async fn pause(&self, _session_id: &SessionId) -> Result<()> {
        self.record("pause").await
    }

    async fn resume(&self, _session_id: &SessionId) -> Result<()> {
        self.record("resume").await
    }

    async fn cancel(&self, _session_id: &SessionId) -> Result<()> {
        self.record("cancel").await
    }

    async fn progress(&self, _session_id: &SessionId) -> Result<Option<ScanProgress>> {
        self.record("get_progress").await?;
        Ok(self.stored_progress.lock().await.clone())
    }

    async fn result(&self, _session_id: &SessionId) -> Result<Option<ScanResult>> {
        self.record("get_result").await?;
        Ok(self.stored_result.lock().await.clone())
    }

    async fn category_files(
        &self,
        _session_id: &SessionId,
        category_key: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Option<CategoryPage>> {
        self.page_requests
            .lock()
            .await
            .push((category_key.to_string(), offset, limit));
        let gate = self.page_gate.lock().await.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.pages.lock().await.pop_front() {
            Some(Ok(page)) => Ok(page),
            Some(Err(err)) => Err(anyhow!(err)),
            None => Err(anyhow!("no scripted page")),
        }
    }

    async fn delete_all(&self, _session_id: &SessionId, _move_to_trash: bool) -> Result<CleanResult> {
        self.record("delete_all").await?;
        match self.delete_outcome.lock().await.take() {
            Some(Ok(clean)) => Ok(clean),
            Some(Err(err)) => Err(anyhow!(err)),
            None => Ok(CleanResult::default()),
        }
    }

    async fn delete_selected(
        &self,
        _session_id: &SessionId,
        paths: &[String],
        _move_to_trash: bool,
    ) -> Result<CleanResult> {
        self.delete_requests.lock().await.push(paths.to_vec());
        self.record("delete_selected").await?;
        match self.delete_outcome.lock().await.take() {
            Some(Ok(clean)) => Ok(clean),
            Some(Err(err)) => Err(anyhow!(err)),
            None => Ok(clean_result(paths.len() as u64, Vec::new())),
        }
    }

    async fn clear_result(&self, _session_id: &SessionId) -> Result<()> {
        self.record("clear_result").await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

pub(crate) fn controller_for(engine: &Arc<ScriptedEngine>) -> Arc<SessionController> {
    controller_with(engine, ControllerOptions::default())
}

pub(crate) fn controller_with(
    engine: &Arc<ScriptedEngine>,
    options: ControllerOptions,
) -> Arc<SessionController> {
    let engine: Arc<dyn ScanEngine> = engine.clone();
    SessionController::with_options(engine, options)
}

pub(crate) async fn start(controller: &SessionController) {
    controller
        .start_scan(ScanMode::Quick, vec!["/scan".to_string()], ScanOptions::default())
        .await
        .expect("start scan");
}

/// Controller that already finished a scan with `result`.
pub(crate) async fn completed_with(
    engine: &Arc<ScriptedEngine>,
    options: ControllerOptions,
    result: ScanResult,
) -> Arc<SessionController> {
    let controller = controller_with(engine, options);
    start(&controller).await;
    assert!(
        controller
            .apply_engine_event(EngineEvent::Completed(result))
            .await,
        "completion should apply"
    );
    controller
}
