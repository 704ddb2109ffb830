use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::SessionId,
    error::{ApiError, ApiException},
    protocol::{
        CategoryFilesQuery, CategoryPage, CleanResult, DeleteAllRequest, DeleteSelectedRequest,
        EngineEvent, ScanProgress, ScanResult, StartScanRequest, StartScanResponse,
    },
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::engine::ScanEngine;

const DEFAULT_EVENT_BUFFER: usize = 1024;

pub struct HttpScanEngine {
    http: Client,
    base_url: Url,
    events: broadcast::Sender<EngineEvent>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl HttpScanEngine {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_event_buffer(base_url, DEFAULT_EVENT_BUFFER)
    }

    pub fn with_event_buffer(base_url: &str, event_buffer: usize) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("invalid engine url: {base_url}"))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(anyhow!("engine url must start with http:// or https://"));
        }
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("engine url cannot carry a path: {base_url}"));
        }
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Ok(Self {
            http: Client::new(),
            base_url,
            events,
            event_task: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn events_url(&self) -> Result<Url> {
        let mut url = self.endpoint(&["events"]);
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("cannot derive websocket url from {}", self.base_url))?;
        Ok(url)
    }

    /// Replaces an earlier stream.
    pub async fn connect_events(&self) -> Result<()> {
        let ws_url = self.events_url()?;
        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .with_context(|| format!("failed to connect engine event stream: {ws_url}"))?;
        let (_, mut ws_reader) = ws_stream.split();
        info!(url = %ws_url, "engine: event stream connected");

        let events = self.events.clone();
        let task = tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<EngineEvent>(&text) {
                        Ok(event) => {
                            let _ = events.send(event);
                        }
                        Err(err) => warn!("engine: invalid event frame: {err}"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!("engine: event stream error: {err}");
                        break;
                    }
                }
            }
            debug!("engine: event stream closed");
        });

        if let Some(previous) = self.event_task.lock().await.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn post_command(&self, segments: &[&str]) -> Result<()> {
        let url = self.endpoint(segments);
        let res = self
            .http
            .post(url.clone())
            .send()
            .await
            .with_context(|| format!("engine request failed: POST {url}"))?;
        check_status(res).await?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.endpoint(segments);
        let res = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("engine request failed: GET {url}"))?;
        decode(check_status(res).await?).await
    }
}

impl Drop for HttpScanEngine {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.get_mut().take() {
            task.abort();
        }
    }
}

async fn check_status(res: Response) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => Err(ApiException::from(api_error).into()),
        Err(_) if body.is_empty() => Err(anyhow!("engine returned {status}")),
        Err(_) => Err(anyhow!("engine returned {status}: {body}")),
    }
}

async fn decode<T: DeserializeOwned>(res: Response) -> Result<T> {
    res.json::<T>()
        .await
        .context("engine returned an unreadable body")
}

#[async_trait]
impl ScanEngine for HttpScanEngine {
    async fn start(&self, request: StartScanRequest) -> Result<SessionId> {
        let url = self.endpoint(&["scans"]);
        let res = self
            .http
            .post(url.clone())
            .json(&request)
            .send()
            .await
            .with_context(|| format!("engine request failed: POST {url}"))?;
        let body: StartScanResponse = decode(check_status(res).await?).await?;
        Ok(body.session_id)
    }

    async fn pause(&self, session_id: &SessionId) -> Result<()> {
        self.post_command(&["scans", session_id.as_str(), "pause"])
            .await
    }

    async fn resume(&self, session_id: &SessionId) -> Result<()> {
        self.post_command(&["scans", session_id.as_str(), "resume"])
            .await
    }

    async fn cancel(&self, session_id: &SessionId) -> Result<()> {
        self.post_command(&["scans", session_id.as_str(), "cancel"])
            .await
    }

    async fn progress(&self, session_id: &SessionId) -> Result<Option<ScanProgress>> {
        self.get_json(&["scans", session_id.as_str(), "progress"])
            .await
    }

    async fn result(&self, session_id: &SessionId) -> Result<Option<ScanResult>> {
        self.get_json(&["scans", session_id.as_str(), "result"])
            .await
    }

    async fn category_files(
        &self,
        session_id: &SessionId,
        category_key: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Option<CategoryPage>> {
        let url = self.endpoint(&[
            "scans",
            session_id.as_str(),
            "categories",
            category_key,
            "files",
        ]);
        let res = self
            .http
            .get(url.clone())
            .query(&CategoryFilesQuery { offset, limit })
            .send()
            .await
            .with_context(|| format!("engine request failed: GET {url}"))?;
        decode(check_status(res).await?).await
    }

    async fn delete_all(&self, session_id: &SessionId, move_to_trash: bool) -> Result<CleanResult> {
        let url = self.endpoint(&["scans", session_id.as_str(), "delete"]);
        let res = self
            .http
            .post(url.clone())
            .json(&DeleteAllRequest { move_to_trash })
            .send()
            .await
            .with_context(|| format!("engine request failed: POST {url}"))?;
        decode(check_status(res).await?).await
    }

    async fn delete_selected(
        &self,
        session_id: &SessionId,
        paths: &[String],
        move_to_trash: bool,
    ) -> Result<CleanResult> {
        let url = self.endpoint(&["scans", session_id.as_str(), "delete-selected"]);
        let res = self
            .http
            .post(url.clone())
            .json(&DeleteSelectedRequest {
                paths: paths.to_vec(),
                move_to_trash,
            })
            .send()
            .await
            .with_context(|| format!("engine request failed: POST {url}"))?;
        decode(check_status(res).await?).await
    }

    async fn clear_result(&self, session_id: &SessionId) -> Result<()> {
        let url = self.endpoint(&["scans", session_id.as_str()]);
        let res = self
            .http
            .delete(url.clone())
            .send()
            .await
            .with_context(|| format!("engine request failed: DELETE {url}"))?;
        check_status(res).await?;
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
