use std::{collections::HashSet, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use shared::protocol::CleanResult;
use tracing::{info, warn};

use crate::{
    controller::{SessionController, SessionEvent},
    error::SessionError,
    selection::{ExpandedSet, Selection},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePolicy {
    #[default]
    TrustRequest,
    ConfirmedOnly,
}

impl ReconcilePolicy {
    pub fn deleted_paths(self, requested: &[String], outcome: &CleanResult) -> HashSet<String> {
        match self {
            Self::TrustRequest => requested.iter().cloned().collect(),
            Self::ConfirmedOnly => {
                let failed: HashSet<&str> = outcome
                    .errors
                    .iter()
                    .map(|error| error.path.as_str())
                    .collect();
                requested
                    .iter()
                    .filter(|path| !failed.contains(path.as_str()))
                    .cloned()
                    .collect()
            }
        }
    }
}

impl FromStr for ReconcilePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trust_request" | "trust-request" | "requested" => Ok(Self::TrustRequest),
            "confirmed_only" | "confirmed-only" | "confirmed" => Ok(Self::ConfirmedOnly),
            other => Err(format!("unknown reconcile policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeleteProgress {
    pub current: u64,
    pub total: u64,
    pub percent: f32,
}

impl DeleteProgress {
    fn started(total: u64) -> Self {
        Self {
            current: 0,
            total,
            percent: 0.0,
        }
    }
}

impl SessionController {
    /// A partial failure still returns Ok; failed paths are in the `CleanResult`.
    pub async fn delete_selected(&self) -> Result<CleanResult, SessionError> {
        let (session_id, paths, generation) = {
            let mut state = self.inner.lock().await;
            if state.delete_progress.is_some() {
                return Err(SessionError::DeletionInFlight);
            }
            let Some(session_id) = state.correlation.known().cloned() else {
                return Err(SessionError::NoActiveSession);
            };
            if state.selection.is_empty() {
                return Err(SessionError::EmptySelection);
            }
            let paths = state.selection.sorted_paths();
            state.delete_progress = Some(DeleteProgress::started(paths.len() as u64));
            (session_id, paths, state.generation)
        };

        info!(session_id = %session_id, files = paths.len(), "delete: removing selected files");
        let outcome = self
            .engine
            .delete_selected(&session_id, &paths, self.options.move_to_trash)
            .await;

        let mut state = self.inner.lock().await;
        let current = state.generation == generation;
        if current {
            state.delete_progress = None;
        }

        let clean = match outcome {
            Ok(clean) => clean,
            Err(err) => {
                let message = format!("{err:#}");
                warn!(session_id = %session_id, "delete: request failed: {message}");
                if current {
                    self.report_error(&mut state, message.clone());
                }
                return Err(SessionError::Deletion(message));
            }
        };

        if current {
            let deleted = self.options.reconcile_policy.deleted_paths(&paths, &clean);
            let state = &mut *state;
            if let Some(model) = state.result.as_mut() {
                let summary = model.remove_paths(&deleted);
                state.expanded.retain_known(model.get());
                info!(
                    session_id = %session_id,
                    removed = summary.removed_files,
                    size = summary.removed_size,
                    dropped_categories = summary.dropped_categories,
                    failed = clean.failed_files,
                    "delete: reconciled result"
                );
            }
            state.selection = Selection::default();
            state.clean_result = Some(Arc::new(clean.clone()));
        }
        drop(state);

        if current {
            self.emit(SessionEvent::ResultUpdated);
            self.emit(SessionEvent::SelectionChanged { selected: 0 });
        }
        self.emit(SessionEvent::DeletionFinished(Arc::new(clean.clone())));
        Ok(clean)
    }

    pub async fn delete_all(&self) -> Result<CleanResult, SessionError> {
        let (session_id, generation) = {
            let mut state = self.inner.lock().await;
            if state.delete_progress.is_some() {
                return Err(SessionError::DeletionInFlight);
            }
            let Some(session_id) = state.correlation.known().cloned() else {
                return Err(SessionError::NoActiveSession);
            };
            let total = state
                .result
                .as_ref()
                .map_or(0, |model| model.get().total_files);
            state.delete_progress = Some(DeleteProgress::started(total));
            (session_id, state.generation)
        };

        info!(session_id = %session_id, "delete: removing every scanned file");
        let outcome = self
            .engine
            .delete_all(&session_id, self.options.move_to_trash)
            .await;

        let mut state = self.inner.lock().await;
        let current = state.generation == generation;
        if current {
            state.delete_progress = None;
        }

        let clean = match outcome {
            Ok(clean) => clean,
            Err(err) => {
                let message = format!("{err:#}");
                warn!(session_id = %session_id, "delete: request failed: {message}");
                if current {
                    self.report_error(&mut state, message.clone());
                }
                return Err(SessionError::Deletion(message));
            }
        };

        if current {
            if let Some(model) = state.result.as_mut() {
                model.clear_categories();
            }
            state.selection = Selection::default();
            state.expanded = ExpandedSet::default();
            state.clean_result = Some(Arc::new(clean.clone()));
        }
        drop(state);

        if current {
            self.emit(SessionEvent::ResultUpdated);
            self.emit(SessionEvent::SelectionChanged { selected: 0 });
        }
        self.emit(SessionEvent::DeletionFinished(Arc::new(clean.clone())));
        Ok(clean)
    }
}

#[cfg(test)]
#[path = "tests/deletion_tests.rs"]
mod tests;
