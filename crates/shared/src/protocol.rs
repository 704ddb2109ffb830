use serde::{Deserialize, Serialize};

use crate::domain::{EngineScanStatus, ScanMode, SessionId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartScanRequest {
    pub paths: Vec<String>,
    pub mode: ScanMode,
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub include_system: bool,
    #[serde(default)]
    pub exclude_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartScanResponse {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanProgress {
    /// Absent while the engine has not yet tagged the notification with a session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub current_path: String,
    pub scanned_files: u64,
    pub scanned_size: u64,
    #[serde(default)]
    pub total_files: u64,
    #[serde(default)]
    pub total_size: u64,
    pub percent: f32,
    pub speed: f64,
    /// Absent when the engine does not report its own state on the frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EngineScanStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub modified_time: i64,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    #[serde(alias = "name")]
    pub key: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    /// Loaded prefix of the category; `file_count` is the true total.
    pub files: Vec<FileEntry>,
    pub file_count: u64,
    pub total_size: u64,
    #[serde(default)]
    pub has_more: bool,
}

impl Category {
    pub fn loaded_size(&self) -> u64 {
        self.files.iter().map(|file| file.size).sum()
    }

    pub fn loaded_count(&self) -> u64 {
        self.files.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub session_id: SessionId,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub end_time: i64,
    #[serde(default)]
    pub duration_ms: u64,
    pub total_files: u64,
    #[serde(default)]
    pub total_folders: u64,
    pub total_size: u64,
    pub categories: Vec<Category>,
}

impl ScanResult {
    pub fn empty(session_id: SessionId) -> Self {
        Self {
            session_id,
            start_time: 0,
            end_time: 0,
            duration_ms: 0,
            total_files: 0,
            total_folders: 0,
            total_size: 0,
            categories: Vec::new(),
        }
    }

    pub fn category(&self, key: &str) -> Option<&Category> {
        self.categories.iter().find(|category| category.key == key)
    }

    pub fn loaded_files(&self) -> impl Iterator<Item = &FileEntry> {
        self.categories
            .iter()
            .flat_map(|category| category.files.iter())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryFilesQuery {
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPage {
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub total: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteAllRequest {
    pub move_to_trash: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteSelectedRequest {
    pub paths: Vec<String>,
    pub move_to_trash: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanError {
    pub path: String,
    #[serde(default)]
    pub error_code: String,
    pub error_message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub total_files: u64,
    pub cleaned_files: u64,
    pub failed_files: u64,
    #[serde(default)]
    pub skipped_files: u64,
    #[serde(default)]
    pub total_size: u64,
    pub cleaned_size: u64,
    pub duration_ms: u64,
    #[serde(default)]
    pub errors: Vec<CleanError>,
}

/// Push notifications fanned out by the engine to every subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EngineEvent {
    Progress(ScanProgress),
    Completed(ScanResult),
}
