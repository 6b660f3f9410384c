//! RecorderService implementing the FgpService trait.
//!
//! Replay helpers work on any session. Live recording attaches to one
//! session at a time and runs its event loop on the service runtime.

use anyhow::{Context, Result};
use fgp_daemon::service::MethodInfo;
use fgp_daemon::FgpService;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::browser::{BrowserClient, BrowserSurface};
use crate::config::{service_dir, RecorderConfig};
use crate::geometry::{BoundingBox, Point};
use crate::models::{ActionType, ScrollDirection};
use crate::recording::{run, Recorder, RecordingStateStore, TaskApiClient};

/// Live recording attached to one session.
struct ActiveRecording {
    session_id: Option<String>,
    recorder: Arc<Mutex<Recorder>>,
    shutdown: watch::Sender<bool>,
    events: JoinHandle<()>,
}

/// Task recording and replay service.
pub struct RecorderService {
    runtime: Runtime,
    client: Arc<RwLock<Option<Arc<BrowserClient>>>>,
    recording: Arc<Mutex<Option<ActiveRecording>>>,
    user_data_dir: PathBuf,
    config: RecorderConfig,
}

impl RecorderService {
    /// Create the service with a pre-warmed browser.
    pub fn new(config: RecorderConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Runtime::new().context("Failed to create tokio runtime")?;

        let user_data_dir = service_dir().join("user-data");
        std::fs::create_dir_all(&user_data_dir)?;

        let headless = config.headless;
        let client = runtime.block_on(async {
            tracing::info!("Pre-warming browser...");
            BrowserClient::new(user_data_dir.clone(), headless).await
        })?;
        tracing::info!("Browser pre-warmed and ready");

        let leftover = RecordingStateStore::load(&config.state_path())?;
        if let Some(task_id) = leftover.task_id() {
            tracing::info!(
                "Found unfinished task {}; record.start resumes it",
                task_id
            );
        }

        Ok(Self {
            runtime,
            client: Arc::new(RwLock::new(Some(Arc::new(client)))),
            recording: Arc::new(Mutex::new(None)),
            user_data_dir,
            config,
        })
    }

    /// Extract session_id from params (optional).
    fn get_session_id(params: &HashMap<String, Value>) -> Option<String> {
        params
            .get("session_id")
            .or_else(|| params.get("session"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    fn get_str<'a>(params: &'a HashMap<String, Value>, key: &str) -> Result<&'a str> {
        params
            .get(key)
            .and_then(|v| v.as_str())
            .with_context(|| format!("Missing '{}' parameter", key))
    }

    fn get_f64(params: &HashMap<String, Value>, key: &str) -> Result<f64> {
        params
            .get(key)
            .and_then(|v| v.as_f64())
            .with_context(|| format!("Missing numeric '{}' parameter", key))
    }

    /// `bbox` as `{x, y, width, height}` (or `left`/`top`), optional.
    fn get_bbox(params: &HashMap<String, Value>) -> Result<Option<BoundingBox>> {
        match params.get("bbox") {
            None | Some(Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v.clone())
                .map(Some)
                .context("Invalid 'bbox' parameter"),
        }
    }

    /// Direction and target of a scroll request: either `direction` with an
    /// optional `bbox`, or a scroll `action` name.
    fn get_scroll(params: &HashMap<String, Value>) -> Result<(ScrollDirection, Option<BoundingBox>)> {
        let bbox = Self::get_bbox(params)?;
        if let Some(action) = params.get("action").and_then(|v| v.as_str()) {
            let action: ActionType = action.parse()?;
            let direction = action
                .scroll_direction()
                .with_context(|| format!("{} is not a scroll action", action))?;
            let at_bbox = action == ActionType::scroll(direction, true);
            if at_bbox && bbox.is_none() {
                anyhow::bail!("{} needs a 'bbox' parameter", action);
            }
            return Ok((direction, if at_bbox { bbox } else { None }));
        }
        let direction: ScrollDirection = Self::get_str(params, "direction")?.parse()?;
        Ok((direction, bbox))
    }

    async fn get_or_init_client(
        client: &Arc<RwLock<Option<Arc<BrowserClient>>>>,
        user_data_dir: &Path,
        headless: bool,
    ) -> Result<Arc<BrowserClient>> {
        if let Some(existing) = client.read().await.as_ref() {
            return Ok(Arc::clone(existing));
        }

        let mut client_lock = client.write().await;
        if client_lock.is_none() {
            let new_client = BrowserClient::new(user_data_dir.to_path_buf(), headless).await?;
            *client_lock = Some(Arc::new(new_client));
        }

        client_lock
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| anyhow::anyhow!("Failed to get browser client"))
    }

    /// Run `f` against the browser client on the service runtime.
    fn with_client<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<BrowserClient>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let client = self.client.clone();
        let user_data_dir = self.user_data_dir.clone();
        let headless = self.config.headless;

        self.runtime.block_on(async move {
            let browser_client =
                Self::get_or_init_client(&client, &user_data_dir, headless).await?;
            f(browser_client).await
        })
    }

    // =========================================================================
    // REPLAY HANDLERS
    // =========================================================================

    fn handle_open(&self, params: HashMap<String, Value>) -> Result<Value> {
        let url = Self::get_str(&params, "url")?.to_string();
        let session_id = Self::get_session_id(&params);

        let result = self.with_client(|c| async move {
            c.navigate(&url, session_id.as_deref()).await
        })?;
        Ok(serde_json::to_value(result)?)
    }

    fn handle_screenshot(&self, params: HashMap<String, Value>) -> Result<Value> {
        let session_id = Self::get_session_id(&params);

        let result = self.with_client(|c| async move { c.screenshot(session_id.as_deref()).await })?;
        Ok(serde_json::to_value(result)?)
    }

    fn handle_resolve_point(&self, params: HashMap<String, Value>) -> Result<Value> {
        let x = Self::get_f64(&params, "x")?;
        let y = Self::get_f64(&params, "y")?;
        let session_id = Self::get_session_id(&params);

        let result = self.with_client(|c| async move {
            c.resolve_point(x, y, session_id.as_deref()).await
        })?;
        Ok(serde_json::to_value(result)?)
    }

    fn handle_resolve_region(&self, params: HashMap<String, Value>) -> Result<Value> {
        let from = Point::new(Self::get_f64(&params, "x1")?, Self::get_f64(&params, "y1")?);
        let to = Point::new(Self::get_f64(&params, "x2")?, Self::get_f64(&params, "y2")?);
        let session_id = Self::get_session_id(&params);

        let result = self.with_client(|c| async move {
            c.resolve_region(from, to, session_id.as_deref()).await
        })?;
        Ok(serde_json::to_value(result)?)
    }

    fn handle_scroll_into_view(&self, params: HashMap<String, Value>) -> Result<Value> {
        let selector = Self::get_str(&params, "selector")?.to_string();
        let session_id = Self::get_session_id(&params);

        let result = self.with_client(|c| async move {
            c.scroll_into_view(&selector, session_id.as_deref()).await
        })?;
        Ok(serde_json::to_value(result)?)
    }

    fn handle_click_at_bbox(&self, params: HashMap<String, Value>) -> Result<Value> {
        let bbox = Self::get_bbox(&params)?.context("Missing 'bbox' parameter")?;
        let session_id = Self::get_session_id(&params);

        let result = self.with_client(|c| async move {
            c.click_at_bbox(bbox, session_id.as_deref()).await
        })?;
        Ok(serde_json::to_value(result)?)
    }

    fn handle_keyboard_input(&self, params: HashMap<String, Value>) -> Result<Value> {
        let text = Self::get_str(&params, "text")?.to_string();
        let session_id = Self::get_session_id(&params);

        self.with_client(|c| async move {
            c.keyboard_input(&text, session_id.as_deref()).await
        })?;
        Ok(serde_json::json!({"success": true}))
    }

    fn handle_scroll(&self, params: HashMap<String, Value>) -> Result<Value> {
        let (direction, bbox) = Self::get_scroll(&params)?;
        let session_id = Self::get_session_id(&params);

        self.with_client(|c| async move {
            c.scroll(direction, bbox, session_id.as_deref()).await
        })?;
        Ok(serde_json::json!({
            "success": true,
            "action": ActionType::scroll(direction, bbox.is_some()),
        }))
    }

    fn handle_text_in_bbox(&self, params: HashMap<String, Value>) -> Result<Value> {
        let bbox = Self::get_bbox(&params)?.context("Missing 'bbox' parameter")?;
        let stride = match params.get("stride").and_then(|v| v.as_f64()) {
            Some(s) if s.is_finite() && s >= 1.0 => s,
            Some(s) => anyhow::bail!("Invalid stride {}", s),
            None => self.config.sample_stride,
        };
        let session_id = Self::get_session_id(&params);

        let texts = self.with_client(|c| async move {
            c.text_in_bbox(bbox, stride, session_id.as_deref()).await
        })?;
        Ok(serde_json::json!({ "texts": texts }))
    }

    // =========================================================================
    // RECORDING HANDLERS
    // =========================================================================

    fn handle_record_start(&self, params: HashMap<String, Value>) -> Result<Value> {
        let task_name = params
            .get("task_name")
            .or_else(|| params.get("name"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let session_id = Self::get_session_id(&params);
        let recording = self.recording.clone();
        let config = self.config.clone();

        if config.headless {
            tracing::warn!("Recording in a headless browser; nobody can answer prompts");
        }

        let (task_id, resumed) = self.with_client(|client| async move {
            let mut slot = recording.lock().await;
            if let Some(active) = slot.as_ref() {
                let flags = active.recorder.lock().await.flags();
                anyhow::bail!(
                    "Already recording task {}",
                    flags.task_id.unwrap_or_default()
                );
            }

            let store = RecordingStateStore::load(&config.state_path())?;
            let leftover = store.task_id().map(str::to_string);
            let host = client.host(session_id.as_deref()).await?;
            let sink = TaskApiClient::new(&config.api_url, config.request_timeout())?;
            let mut recorder = Recorder::new(
                Arc::new(host.clone()),
                Arc::new(BrowserSurface::new(host)),
                Arc::new(sink),
                store,
                &config,
            );

            let (task_id, resumed) = match leftover {
                Some(task_id) => {
                    tracing::info!("Resuming unfinished task {}", task_id);
                    (task_id, true)
                }
                None => {
                    let name = task_name.context("Missing 'task_name' parameter")?;
                    (recorder.start(&name).await?, false)
                }
            };

            let events = client.capture_events(session_id.as_deref()).await?;
            let active_now = recorder.flags().recording;
            client
                .set_capture_active(active_now, session_id.as_deref())
                .await?;

            let recorder = Arc::new(Mutex::new(recorder));
            let (shutdown, shutdown_rx) = watch::channel(false);
            let events = tokio::spawn(run(Arc::clone(&recorder), events, shutdown_rx));

            *slot = Some(ActiveRecording {
                session_id,
                recorder,
                shutdown,
                events,
            });
            Ok((task_id, resumed))
        })?;

        Ok(serde_json::json!({
            "success": true,
            "task_id": task_id,
            "resumed": resumed,
        }))
    }

    fn handle_record_pause(&self, _params: HashMap<String, Value>) -> Result<Value> {
        let recording = self.recording.clone();

        let flags = self.with_client(|client| async move {
            let slot = recording.lock().await;
            let active = slot.as_ref().context("Not recording")?;
            let mut recorder = active.recorder.lock().await;
            recorder.pause().await?;
            client
                .set_capture_active(false, active.session_id.as_deref())
                .await?;
            Ok(recorder.flags())
        })?;
        Ok(serde_json::to_value(flags)?)
    }

    fn handle_record_resume(&self, _params: HashMap<String, Value>) -> Result<Value> {
        let recording = self.recording.clone();

        let flags = self.with_client(|client| async move {
            let slot = recording.lock().await;
            let active = slot.as_ref().context("Not recording")?;
            let mut recorder = active.recorder.lock().await;
            recorder.resume().await?;
            client
                .set_capture_active(true, active.session_id.as_deref())
                .await?;
            Ok(recorder.flags())
        })?;
        Ok(serde_json::to_value(flags)?)
    }

    fn handle_record_stop(&self, _params: HashMap<String, Value>) -> Result<Value> {
        let recording = self.recording.clone();

        let task_id = self.with_client(|client| async move {
            let mut slot = recording.lock().await;
            let active = slot.take().context("Not recording")?;

            let stopped = active.recorder.lock().await.stop().await;
            let _ = active.shutdown.send(true);
            if let Err(e) = active.events.await {
                tracing::warn!("Recorder event loop ended abnormally: {}", e);
            }
            if let Err(e) = client
                .set_capture_active(false, active.session_id.as_deref())
                .await
            {
                tracing::warn!("Failed to switch capture off: {:#}", e);
            }
            stopped
        })?;

        Ok(serde_json::json!({
            "success": true,
            "task_id": task_id,
        }))
    }

    fn handle_record_status(&self, _params: HashMap<String, Value>) -> Result<Value> {
        let recording = self.recording.clone();
        let state_path = self.config.state_path();

        let (flags, session_id) = self.runtime.block_on(async move {
            let slot = recording.lock().await;
            match slot.as_ref() {
                Some(active) => Ok::<_, anyhow::Error>((
                    active.recorder.lock().await.flags(),
                    active.session_id.clone(),
                )),
                None => Ok((RecordingStateStore::load(&state_path)?.flags(), None)),
            }
        })?;

        let mut value = serde_json::to_value(flags)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("session_id".to_string(), serde_json::json!(session_id));
        }
        Ok(value)
    }

    fn handle_hover_toggle(&self, params: HashMap<String, Value>) -> Result<Value> {
        let requested = params.get("disabled").and_then(|v| v.as_bool());
        let recording = self.recording.clone();
        let state_path = self.config.state_path();

        let flags = self.runtime.block_on(async move {
            let slot = recording.lock().await;
            match slot.as_ref() {
                Some(active) => {
                    let mut recorder = active.recorder.lock().await;
                    let disabled = requested.unwrap_or(!recorder.flags().hover_disabled);
                    recorder.set_hover_disabled(disabled).await?;
                    Ok::<_, anyhow::Error>(recorder.flags())
                }
                None => {
                    let mut store = RecordingStateStore::load(&state_path)?;
                    let disabled = requested.unwrap_or(!store.hover_disabled());
                    store.set_hover_disabled(disabled)?;
                    Ok(store.flags())
                }
            }
        })?;
        Ok(serde_json::to_value(flags)?)
    }

    fn handle_health(&self, _params: HashMap<String, Value>) -> Result<Value> {
        let client = self.client.clone();
        let recording = self.recording.clone();

        let (healthy, is_recording) = self.runtime.block_on(async {
            let healthy = match client.read().await.as_ref() {
                Some(browser_client) => browser_client.health_check().await.unwrap_or(false),
                None => true,
            };
            (healthy, recording.lock().await.is_some())
        });

        Ok(serde_json::json!({
            "healthy": healthy,
            "service": "recorder",
            "version": env!("CARGO_PKG_VERSION"),
            "recording": is_recording,
            "api_url": self.config.api_url,
        }))
    }

    // =========================================================================
    // SESSION MANAGEMENT HANDLERS
    // =========================================================================

    fn handle_session_new(&self, params: HashMap<String, Value>) -> Result<Value> {
        let session_id = params
            .get("id")
            .or_else(|| params.get("session_id"))
            .and_then(|v| v.as_str())
            .context("Missing 'id' parameter")?
            .to_string();

        let id = self.with_client(|c| async move { c.create_session(&session_id).await })?;

        Ok(serde_json::json!({
            "success": true,
            "session_id": id
        }))
    }

    fn handle_session_list(&self, _params: HashMap<String, Value>) -> Result<Value> {
        let client = self.client.clone();

        let sessions = self.runtime.block_on(async {
            match client.read().await.as_ref() {
                Some(browser_client) => browser_client.list_sessions().await,
                None => vec![],
            }
        });

        Ok(serde_json::json!({
            "sessions": sessions
        }))
    }

    fn handle_session_close(&self, params: HashMap<String, Value>) -> Result<Value> {
        let session_id = params
            .get("id")
            .or_else(|| params.get("session_id"))
            .and_then(|v| v.as_str())
            .context("Missing 'id' parameter")?
            .to_string();

        let client = self.client.clone();
        let recording = self.recording.clone();
        let sid = session_id.clone();

        self.runtime.block_on(async move {
            if let Some(active) = recording.lock().await.as_ref() {
                if active.session_id.as_deref() == Some(sid.as_str()) {
                    anyhow::bail!("Session {} is recording; stop it first", sid);
                }
            }
            match client.read().await.as_ref() {
                Some(browser_client) => browser_client.close_session(&sid).await,
                None => Ok(()),
            }
        })?;

        Ok(serde_json::json!({
            "success": true,
            "session_id": session_id
        }))
    }
}

impl FgpService for RecorderService {
    fn name(&self) -> &str {
        "recorder"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn dispatch(&self, method: &str, params: HashMap<String, Value>) -> Result<Value> {
        match method {
            "health" => self.handle_health(params),
            // Replay
            "recorder.open" | "open" => self.handle_open(params),
            "recorder.screenshot" | "screenshot" => self.handle_screenshot(params),
            "recorder.resolve_point" | "resolve_point" => self.handle_resolve_point(params),
            "recorder.resolve_region" | "resolve_region" => self.handle_resolve_region(params),
            "recorder.scroll_into_view" | "scroll_into_view" => {
                self.handle_scroll_into_view(params)
            }
            "recorder.click_at_bbox" | "click_at_bbox" => self.handle_click_at_bbox(params),
            "recorder.keyboard_input" | "keyboard_input" => self.handle_keyboard_input(params),
            "recorder.scroll" | "scroll" => self.handle_scroll(params),
            "recorder.text_in_bbox" | "text_in_bbox" => self.handle_text_in_bbox(params),
            // Live recording
            "recorder.record.start" | "record.start" => self.handle_record_start(params),
            "recorder.record.pause" | "record.pause" => self.handle_record_pause(params),
            "recorder.record.resume" | "record.resume" => self.handle_record_resume(params),
            "recorder.record.stop" | "record.stop" => self.handle_record_stop(params),
            "recorder.record.status" | "record.status" => self.handle_record_status(params),
            "recorder.hover.toggle" | "hover.toggle" => self.handle_hover_toggle(params),
            // Session management
            "recorder.session.new" | "session.new" => self.handle_session_new(params),
            "recorder.session.list" | "session.list" => self.handle_session_list(params),
            "recorder.session.close" | "session.close" => self.handle_session_close(params),
            _ => Err(anyhow::anyhow!("Unknown method: {}", method)),
        }
    }

    fn method_list(&self) -> Vec<MethodInfo> {
        [
            ("recorder.open", "Navigate to a URL"),
            ("recorder.screenshot", "Viewport screenshot as a PNG data URL"),
            ("recorder.resolve_point", "Topmost element and bbox at a viewport point"),
            ("recorder.resolve_region", "Element best covering a viewport region"),
            (
                "recorder.scroll_into_view",
                "Reveal a (frame >>> element) selector and report scroll geometry",
            ),
            ("recorder.click_at_bbox", "Click the center of a bounding box"),
            ("recorder.keyboard_input", "Type text into the focused element"),
            ("recorder.scroll", "Scroll the page or wheel-scroll at a bounding box"),
            ("recorder.text_in_bbox", "Distinct text painted inside a bounding box"),
            ("recorder.record.start", "Start (or resume) recording a task"),
            ("recorder.record.pause", "Pause recording"),
            ("recorder.record.resume", "Resume a paused recording"),
            ("recorder.record.stop", "Stop recording and save the task"),
            ("recorder.record.status", "Recording flags"),
            ("recorder.hover.toggle", "Enable or disable hover highlighting"),
            (
                "recorder.session.new",
                "Create a new isolated session with its own browser context",
            ),
            ("recorder.session.list", "List all active sessions"),
            ("recorder.session.close", "Close and dispose a session"),
        ]
        .into_iter()
        .map(|(name, description)| MethodInfo {
            name: name.to_string(),
            description: description.to_string(),
            params: vec![],
        })
        .collect()
    }
}
