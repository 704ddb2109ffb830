use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::SessionId,
    protocol::{CategoryPage, CleanResult, EngineEvent, ScanProgress, ScanResult, StartScanRequest},
};
use tokio::sync::broadcast;

#[async_trait]
pub trait ScanEngine: Send + Sync {
    async fn start(&self, request: StartScanRequest) -> Result<SessionId>;
    async fn pause(&self, session_id: &SessionId) -> Result<()>;
    async fn resume(&self, session_id: &SessionId) -> Result<()>;
    async fn cancel(&self, session_id: &SessionId) -> Result<()>;
    async fn progress(&self, session_id: &SessionId) -> Result<Option<ScanProgress>>;
    async fn result(&self, session_id: &SessionId) -> Result<Option<ScanResult>>;
    async fn category_files(
        &self,
        session_id: &SessionId,
        category_key: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Option<CategoryPage>>;
    async fn delete_all(&self, session_id: &SessionId, move_to_trash: bool)
        -> Result<CleanResult>;
    async fn delete_selected(
        &self,
        session_id: &SessionId,
        paths: &[String],
        move_to_trash: bool,
    ) -> Result<CleanResult>;
    /// Releases server-side result storage for the session.
    async fn clear_result(&self, session_id: &SessionId) -> Result<()>;
    fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent>;
}
