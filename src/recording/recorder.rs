//! Live recorder: turns captured page events into recorded actions.
//!
//! Events are handled one at a time. Each handler finishes its local work
//! (outline removal, measurement, screenshot) before the action is handed
//! to the sink on a background task, so a slow or failing server never
//! leaves the page decorated.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::api::ActionSink;
use super::highlight::HighlightSession;
use super::state::{RecordingFlags, RecordingStateStore};
use crate::config::RecorderConfig;
use crate::dom::{DomHost, NodeId};
use crate::error::{ResolveError, ResolveResult};
use crate::geometry::{
    describe, element_at_point, normalize, scrollable_ancestor, BoundingBox, FrameContext, Point,
    Rect,
};
use crate::models::{ActionType, RecordedAction, ScrollDirection};

/// Event forwarded by the capture script, in top-viewport coordinates.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PageEvent {
    Mousemove {
        x: f64,
        y: f64,
    },
    Click {
        x: f64,
        y: f64,
    },
    Scroll {
        /// Scrolled element; `None` when the document itself scrolled.
        #[serde(default)]
        target: Option<NodeId>,
        #[serde(default, rename = "deltaY")]
        delta_y: f64,
    },
    Keydown {
        key: String,
    },
}

/// Screen and operator access needed while recording.
#[async_trait]
pub trait RecordingSurface: Send + Sync {
    /// Viewport screenshot as a PNG `data:` URL.
    async fn screenshot(&self) -> Result<String>;

    /// Ask the operator what the last click accomplished.
    async fn ask_instruction(&self) -> Result<Option<String>>;
}

#[derive(Debug)]
struct PendingScroll {
    target: Option<NodeId>,
    delta_y: f64,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct KeyBuffer {
    text: String,
    target: Option<NodeId>,
}

pub struct Recorder {
    host: Arc<dyn DomHost>,
    surface: Arc<dyn RecordingSurface>,
    sink: Arc<dyn ActionSink>,
    state: RecordingStateStore,
    highlight: HighlightSession,
    keys: KeyBuffer,
    pending_scroll: Option<PendingScroll>,
    scroll_debounce: Duration,
    submissions: JoinSet<()>,
}

impl Recorder {
    pub fn new(
        host: Arc<dyn DomHost>,
        surface: Arc<dyn RecordingSurface>,
        sink: Arc<dyn ActionSink>,
        state: RecordingStateStore,
        config: &RecorderConfig,
    ) -> Self {
        Self {
            host,
            surface,
            sink,
            state,
            highlight: HighlightSession::new(config.outline.clone()),
            keys: KeyBuffer::default(),
            pending_scroll: None,
            scroll_debounce: config.scroll_debounce(),
            submissions: JoinSet::new(),
        }
    }

    pub fn flags(&self) -> RecordingFlags {
        self.state.flags()
    }

    pub fn highlighted(&self) -> Option<NodeId> {
        self.highlight.current()
    }

    /// When the pending scroll action becomes due.
    pub fn scroll_deadline(&self) -> Option<Instant> {
        self.pending_scroll.as_ref().map(|p| p.deadline)
    }

    /// Open a task on the server and start recording into it.
    pub async fn start(&mut self, task_name: &str) -> Result<String> {
        if let Some(current) = self.state.task_id() {
            anyhow::bail!("Already recording task {}", current);
        }
        let task_id = self
            .sink
            .start_task(task_name)
            .await
            .context("Failed to start task")?;
        self.state.start(&task_id)?;
        tracing::info!("Recording task {} ({})", task_id, task_name);
        Ok(task_id)
    }

    pub async fn pause(&mut self) -> Result<()> {
        self.state.pause()?;
        self.pending_scroll = None;
        self.highlight.clear(&*self.host).await?;
        tracing::info!("Recording paused");
        Ok(())
    }

    pub async fn resume(&mut self) -> Result<()> {
        self.state.resume()?;
        tracing::info!("Recording resumed");
        Ok(())
    }

    /// Finish pending actions, close the task with a final screenshot and
    /// wait for every submission to settle.
    pub async fn stop(&mut self) -> Result<String> {
        let task_id = self
            .state
            .task_id()
            .map(str::to_string)
            .context("Not recording")?;

        if self.state.is_recording() {
            if let Err(e) = self.flush_scroll().await {
                tracing::warn!("Dropped pending scroll on stop: {:#}", e);
            }
            if let Err(e) = self.flush_keys().await {
                tracing::warn!("Dropped pending keys on stop: {:#}", e);
            }
        }
        self.pending_scroll = None;
        self.keys = KeyBuffer::default();
        self.highlight.clear(&*self.host).await?;
        self.state.stop()?;

        match self.surface.screenshot().await {
            Ok(screenshot) => {
                let sink = Arc::clone(&self.sink);
                let id = task_id.clone();
                self.submissions.spawn(async move {
                    if let Err(e) = sink.save_task(&id, &screenshot).await {
                        tracing::warn!("Failed to save task {}: {:#}", id, e);
                    }
                });
            }
            Err(e) => tracing::warn!("No final screenshot for {}: {:#}", task_id, e),
        }

        self.drain().await;
        tracing::info!("Recording stopped ({})", task_id);
        Ok(task_id)
    }

    pub async fn set_hover_disabled(&mut self, disabled: bool) -> Result<()> {
        self.state.set_hover_disabled(disabled)?;
        if disabled {
            self.highlight.clear(&*self.host).await?;
        }
        Ok(())
    }

    /// Wait for all in-flight submissions.
    pub async fn drain(&mut self) {
        while self.submissions.join_next().await.is_some() {}
    }

    /// Handle one captured event. Returns the action recorded, if any.
    pub async fn handle(&mut self, event: PageEvent) -> Result<Option<ActionType>> {
        if !self.state.is_recording() {
            return Ok(None);
        }
        while self.submissions.try_join_next().is_some() {}

        match event {
            PageEvent::Mousemove { x, y } => {
                self.on_mousemove(Point::new(x, y)).await?;
                Ok(None)
            }
            PageEvent::Click { x, y } => self.on_click(Point::new(x, y)).await,
            PageEvent::Scroll { target, delta_y } => {
                self.on_scroll(target, delta_y);
                Ok(None)
            }
            PageEvent::Keydown { key } => self.on_keydown(&key).await,
        }
    }

    async fn on_mousemove(&mut self, p: Point) -> Result<()> {
        if self.state.hover_disabled() {
            return Ok(());
        }
        match element_at_point(&*self.host, p).await {
            Ok(el) => {
                if self.highlight.update(&*self.host, el.node).await? {
                    tracing::trace!("Highlighting {} {}", el.tag, el.bbox);
                }
                Ok(())
            }
            Err(e) if e.is_resolution_failure() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn on_click(&mut self, p: Point) -> Result<Option<ActionType>> {
        let hit = match element_at_point(&*self.host, p).await {
            Ok(el) => el,
            Err(e) if e.is_resolution_failure() => {
                tracing::debug!("Click ignored: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        // Only clicks inside the highlighted element are recorded. With hover
        // highlighting off, the hit element stands in for the highlight.
        let highlighted = if self.state.hover_disabled() {
            Some(hit.node)
        } else {
            self.highlight.current()
        };
        let target = match highlighted {
            Some(h) if h == hit.node => Some(h),
            Some(h) if self.host.contains(h, hit.node).await? => Some(h),
            _ => None,
        };
        let Some(target) = target else {
            tracing::debug!("Click on unhighlighted {} replayed unrecorded", hit.tag);
            self.host.click(hit.node).await?;
            return Ok(None);
        };

        let prepared = self.prepare_click(target).await;
        if matches!(prepared, Ok(None)) {
            return Ok(None);
        }
        // Replay the swallowed click before any capture error surfaces.
        self.host.click(target).await?;
        let Some((bbox, screenshot)) = prepared? else {
            return Ok(None);
        };
        let instruction = self
            .surface
            .ask_instruction()
            .await?
            .filter(|s| !s.trim().is_empty());

        let with_instruction = instruction.is_some();
        self.submit(
            RecordedAction {
                action: ActionType::ClickAtBbox,
                screenshot,
                bbox,
                task_instruction: instruction,
                key_sequence: None,
            },
            with_instruction,
        );
        Ok(Some(ActionType::ClickAtBbox))
    }

    /// Flush pending keys, clear the highlight and capture the target's box
    /// and a screenshot. `None` when the target vanished.
    async fn prepare_click(&mut self, target: NodeId) -> Result<Option<(BoundingBox, String)>> {
        self.flush_keys().await?;

        self.highlight.clear(&*self.host).await?;
        self.host.next_frame().await?;
        let bbox = match describe(&*self.host, target).await {
            Ok(el) => el.bbox,
            Err(e) if e.is_resolution_failure() => {
                tracing::debug!("Click target vanished: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let screenshot = self.surface.screenshot().await?;
        Ok(Some((bbox, screenshot)))
    }

    fn on_scroll(&mut self, target: Option<NodeId>, delta_y: f64) {
        let deadline = Instant::now() + self.scroll_debounce;
        let pending = self.pending_scroll.get_or_insert(PendingScroll {
            target,
            delta_y: 0.0,
            deadline,
        });
        pending.target = target;
        pending.delta_y += delta_y;
        pending.deadline = deadline;
    }

    async fn on_keydown(&mut self, key: &str) -> Result<Option<ActionType>> {
        match key {
            "Enter" => self.flush_keys().await,
            "Backspace" => {
                self.keys.text.pop();
                Ok(None)
            }
            k if k.chars().count() == 1 => {
                if self.keys.text.is_empty() {
                    self.keys.target = self.host.focused_element().await?;
                }
                self.keys.text.push_str(k);
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Emit the debounced scroll action now.
    pub async fn flush_scroll(&mut self) -> Result<Option<ActionType>> {
        let Some(pending) = self.pending_scroll.take() else {
            return Ok(None);
        };
        if !self.state.is_recording() {
            return Ok(None);
        }

        self.flush_keys().await?;

        self.highlight.clear(&*self.host).await?;
        self.host.next_frame().await?;
        let bbox = match self.scroll_parent_bbox(pending.target).await {
            Ok(bbox) => bbox,
            Err(e) if e.is_resolution_failure() => {
                tracing::debug!("Scroll target vanished: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let screenshot = self.surface.screenshot().await?;
        let action = ActionType::scroll(ScrollDirection::from_delta_y(pending.delta_y), true);
        self.submit(
            RecordedAction {
                action,
                screenshot,
                bbox,
                task_instruction: None,
                key_sequence: None,
            },
            false,
        );
        Ok(Some(action))
    }

    /// Emit the buffered key sequence as one keyboard action.
    pub async fn flush_keys(&mut self) -> Result<Option<ActionType>> {
        if self.keys.text.is_empty() {
            return Ok(None);
        }
        let text = std::mem::take(&mut self.keys.text);
        let target = self.keys.target.take();

        self.highlight.clear(&*self.host).await?;
        self.host.next_frame().await?;
        let bbox = match target {
            Some(node) => match describe(&*self.host, node).await {
                Ok(el) => el.bbox,
                Err(e) if e.is_resolution_failure() => self.viewport_bbox().await?,
                Err(e) => return Err(e.into()),
            },
            None => self.viewport_bbox().await?,
        };

        let screenshot = self.surface.screenshot().await?;
        self.submit(
            RecordedAction {
                action: ActionType::KeyboardInput,
                screenshot,
                bbox,
                task_instruction: None,
                key_sequence: Some(text),
            },
            false,
        );
        Ok(Some(ActionType::KeyboardInput))
    }

    async fn scroll_parent_bbox(&self, target: Option<NodeId>) -> ResolveResult<BoundingBox> {
        let host = &*self.host;
        let node = match target {
            Some(node) => node,
            None => host.body(None).await?.ok_or(ResolveError::Detached)?,
        };
        let scope = host.owner_frame(node).await?;
        let parent = scrollable_ancestor(host, node, scope).await?;
        Ok(describe(host, parent).await?.bbox)
    }

    async fn viewport_bbox(&self) -> Result<BoundingBox> {
        let v = self.host.viewport().await?;
        Ok(normalize(
            Rect::new(0.0, 0.0, v.width, v.height),
            &FrameContext::top(v),
        ))
    }

    fn submit(&mut self, action: RecordedAction, with_instruction: bool) {
        let Some(task_id) = self.state.task_id().map(str::to_string) else {
            return;
        };
        let sink = Arc::clone(&self.sink);
        self.submissions.spawn(async move {
            let kind = action.action;
            let result = if with_instruction {
                sink.add_task_and_action(&task_id, &action).await
            } else {
                sink.add_page_action(&task_id, &action).await
            };
            if let Err(e) = result {
                tracing::warn!("Failed to submit {} for {}: {:#}", kind, task_id, e);
            }
        });
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

/// Feed captured events into `recorder` until the stream ends or
/// `shutdown` flips to true. Debounced scrolls fire from here.
pub async fn run<E>(recorder: Arc<Mutex<Recorder>>, mut events: E, mut shutdown: watch::Receiver<bool>)
where
    E: Stream<Item = PageEvent> + Unpin,
{
    loop {
        let deadline = recorder.lock().await.scroll_deadline();
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            event = events.next() => {
                let Some(event) = event else {
                    tracing::debug!("Capture stream ended");
                    break;
                };
                let mut rec = recorder.lock().await;
                match rec.handle(event).await {
                    Ok(Some(action)) => tracing::info!("Recorded {}", action.label()),
                    Ok(None) => {}
                    Err(e) => tracing::warn!("Failed to handle page event: {:#}", e),
                }
            }
            _ = wait_until(deadline) => {
                let mut rec = recorder.lock().await;
                match rec.flush_scroll().await {
                    Ok(Some(action)) => tracing::info!("Recorded {}", action.label()),
                    Ok(None) => {}
                    Err(e) => tracing::warn!("Failed to record scroll: {:#}", e),
                }
            }
        }
    }
    tracing::info!("Recorder event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::testing::{FakePage, TOP};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct FakeSurface {
        shots: AtomicU32,
        instruction: Option<String>,
        broken_screenshots: bool,
    }

    #[async_trait]
    impl RecordingSurface for FakeSurface {
        async fn screenshot(&self) -> Result<String> {
            if self.broken_screenshots {
                anyhow::bail!("capture failed");
            }
            let n = self.shots.fetch_add(1, Ordering::SeqCst);
            Ok(format!("data:image/png;base64,shot{}", n))
        }

        async fn ask_instruction(&self) -> Result<Option<String>> {
            Ok(self.instruction.clone())
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Start(String),
        TaskAndAction(String, RecordedAction),
        PageAction(String, RecordedAction),
        Save(String, String),
    }

    #[derive(Default)]
    struct MemorySink {
        calls: std::sync::Mutex<Vec<Call>>,
        fail: bool,
    }

    impl MemorySink {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            if self.fail {
                anyhow::bail!("server unavailable");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ActionSink for MemorySink {
        async fn start_task(&self, task_name: &str) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Start(task_name.to_string()));
            Ok("task-1".to_string())
        }

        async fn add_task_and_action(&self, task_id: &str, action: &RecordedAction) -> Result<()> {
            self.record(Call::TaskAndAction(task_id.to_string(), action.clone()))
        }

        async fn add_page_action(&self, task_id: &str, action: &RecordedAction) -> Result<()> {
            self.record(Call::PageAction(task_id.to_string(), action.clone()))
        }

        async fn save_task(&self, task_id: &str, screenshot: &str) -> Result<()> {
            self.record(Call::Save(task_id.to_string(), screenshot.to_string()))
        }
    }

    struct Fixture {
        page: Arc<FakePage>,
        sink: Arc<MemorySink>,
        recorder: Recorder,
    }

    fn fixture(surface: FakeSurface, sink: MemorySink) -> Fixture {
        let page = Arc::new(FakePage::new(800.0, 600.0, 2000.0));
        let sink = Arc::new(sink);
        let config = RecorderConfig {
            scroll_debounce_ms: 50,
            ..RecorderConfig::default()
        };
        let recorder = Recorder::new(
            page.clone(),
            Arc::new(surface),
            sink.clone(),
            RecordingStateStore::new(),
            &config,
        );
        Fixture {
            page,
            sink,
            recorder,
        }
    }

    fn instructed() -> FakeSurface {
        FakeSurface {
            instruction: Some("Open the menu".to_string()),
            ..FakeSurface::default()
        }
    }

    #[tokio::test]
    async fn test_events_are_ignored_unless_recording() {
        let mut f = fixture(instructed(), MemorySink::default());
        let body = f.page.body(TOP);
        let button = f.page.add(body, "button", Rect::new(10.0, 10.0, 100.0, 40.0));

        let out = f
            .recorder
            .handle(PageEvent::Click { x: 20.0, y: 20.0 })
            .await
            .unwrap();
        assert_eq!(out, None);
        assert_eq!(f.page.clicks(button), 0);

        f.recorder.start("Demo").await.unwrap();
        f.recorder.pause().await.unwrap();
        f.recorder
            .handle(PageEvent::Mousemove { x: 20.0, y: 20.0 })
            .await
            .unwrap();
        assert_eq!(f.recorder.highlighted(), None);
    }

    #[tokio::test]
    async fn test_mousemove_swaps_highlight() {
        let mut f = fixture(instructed(), MemorySink::default());
        let body = f.page.body(TOP);
        let a = f.page.add(body, "a", Rect::new(0.0, 0.0, 50.0, 20.0));
        let b = f.page.add(body, "a", Rect::new(100.0, 0.0, 50.0, 20.0));
        f.recorder.start("Demo").await.unwrap();

        f.recorder
            .handle(PageEvent::Mousemove { x: 10.0, y: 10.0 })
            .await
            .unwrap();
        assert_eq!(f.recorder.highlighted(), Some(a));
        assert!(f.page.outline(a).is_some());

        f.recorder
            .handle(PageEvent::Mousemove { x: 110.0, y: 10.0 })
            .await
            .unwrap();
        assert_eq!(f.recorder.highlighted(), Some(b));
        assert_eq!(f.page.outline(a), None);

        f.recorder.set_hover_disabled(true).await.unwrap();
        assert_eq!(f.page.outline(b), None);
        f.recorder
            .handle(PageEvent::Mousemove { x: 10.0, y: 10.0 })
            .await
            .unwrap();
        assert_eq!(f.recorder.highlighted(), None);
        assert!(f.recorder.flags().hover_disabled);
    }

    #[tokio::test]
    async fn test_click_records_highlighted_element() {
        let mut f = fixture(instructed(), MemorySink::default());
        let body = f.page.body(TOP);
        let card = f.page.add(body, "div", Rect::new(10.0, 10.0, 200.0, 80.0));
        let _icon = f.page.add(card, "span", Rect::new(20.0, 20.0, 16.0, 16.0));
        f.recorder.start("Demo").await.unwrap();

        f.recorder
            .handle(PageEvent::Mousemove { x: 100.0, y: 50.0 })
            .await
            .unwrap();
        assert_eq!(f.recorder.highlighted(), Some(card));

        // Clicking the icon inside the highlighted card records the card.
        let out = f
            .recorder
            .handle(PageEvent::Click { x: 25.0, y: 25.0 })
            .await
            .unwrap();
        assert_eq!(out, Some(ActionType::ClickAtBbox));
        assert_eq!(f.page.outline(card), None);
        assert_eq!(f.page.clicks(card), 1);
        assert!(f.page.frames_yielded() >= 1);

        f.recorder.drain().await;
        let calls = f.sink.calls();
        match &calls[1] {
            Call::TaskAndAction(id, action) => {
                assert_eq!(id, "task-1");
                assert_eq!(action.action, ActionType::ClickAtBbox);
                assert_eq!(action.bbox, BoundingBox::new(10, 10, 200, 80));
                assert_eq!(action.task_instruction.as_deref(), Some("Open the menu"));
                assert!(action.screenshot.starts_with("data:image/png;base64,"));
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_click_without_instruction_is_a_page_action() {
        let mut f = fixture(FakeSurface::default(), MemorySink::default());
        let body = f.page.body(TOP);
        f.page.add(body, "button", Rect::new(0.0, 0.0, 50.0, 50.0));
        f.recorder.start("Demo").await.unwrap();

        f.recorder
            .handle(PageEvent::Mousemove { x: 5.0, y: 5.0 })
            .await
            .unwrap();
        f.recorder
            .handle(PageEvent::Click { x: 5.0, y: 5.0 })
            .await
            .unwrap();
        f.recorder.drain().await;
        assert!(matches!(f.sink.calls()[1], Call::PageAction(..)));
    }

    #[tokio::test]
    async fn test_click_outside_highlight_is_replayed_unrecorded() {
        let mut f = fixture(instructed(), MemorySink::default());
        let body = f.page.body(TOP);
        let menu = f.page.add(body, "nav", Rect::new(0.0, 0.0, 100.0, 40.0));
        let link = f.page.add(body, "a", Rect::new(300.0, 300.0, 80.0, 20.0));
        f.recorder.start("Demo").await.unwrap();

        // Nothing highlighted yet.
        let out = f
            .recorder
            .handle(PageEvent::Click { x: 310.0, y: 305.0 })
            .await
            .unwrap();
        assert_eq!(out, None);
        assert_eq!(f.page.clicks(link), 1);

        // Highlight elsewhere, then click the link.
        f.recorder
            .handle(PageEvent::Mousemove { x: 10.0, y: 10.0 })
            .await
            .unwrap();
        assert_eq!(f.recorder.highlighted(), Some(menu));
        let out = f
            .recorder
            .handle(PageEvent::Click { x: 310.0, y: 305.0 })
            .await
            .unwrap();
        assert_eq!(out, None);
        assert_eq!(f.page.clicks(link), 2);
        assert_eq!(f.page.clicks(menu), 0);

        f.recorder.drain().await;
        assert_eq!(f.sink.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_click_with_hover_disabled_records_hit() {
        let mut f = fixture(instructed(), MemorySink::default());
        let body = f.page.body(TOP);
        let button = f.page.add(body, "button", Rect::new(0.0, 0.0, 50.0, 50.0));
        f.recorder.start("Demo").await.unwrap();
        f.recorder.set_hover_disabled(true).await.unwrap();

        let out = f
            .recorder
            .handle(PageEvent::Click { x: 5.0, y: 5.0 })
            .await
            .unwrap();
        assert_eq!(out, Some(ActionType::ClickAtBbox));
        assert_eq!(f.page.clicks(button), 1);
    }

    #[tokio::test]
    async fn test_click_is_replayed_when_screenshot_fails() {
        let surface = FakeSurface {
            broken_screenshots: true,
            ..instructed()
        };
        let mut f = fixture(surface, MemorySink::default());
        let body = f.page.body(TOP);
        let button = f.page.add(body, "button", Rect::new(0.0, 0.0, 50.0, 50.0));
        f.recorder.start("Demo").await.unwrap();

        f.recorder
            .handle(PageEvent::Mousemove { x: 5.0, y: 5.0 })
            .await
            .unwrap();
        let err = f
            .recorder
            .handle(PageEvent::Click { x: 5.0, y: 5.0 })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("capture failed"));
        assert_eq!(f.page.clicks(button), 1);

        f.recorder.drain().await;
        assert_eq!(f.sink.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_click_outside_viewport_records_nothing() {
        let mut f = fixture(instructed(), MemorySink::default());
        f.recorder.start("Demo").await.unwrap();
        let out = f
            .recorder
            .handle(PageEvent::Click { x: 900.0, y: 5.0 })
            .await
            .unwrap();
        assert_eq!(out, None);
        f.recorder.drain().await;
        assert_eq!(f.sink.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_scroll_is_debounced_into_one_action() {
        let mut f = fixture(instructed(), MemorySink::default());
        let body = f.page.body(TOP);
        let list = f.page.add(body, "ul", Rect::new(100.0, 100.0, 300.0, 200.0));
        f.page.make_scrollable(list, 900.0, "auto");
        f.recorder.start("Demo").await.unwrap();

        for _ in 0..3 {
            f.recorder
                .handle(PageEvent::Scroll {
                    target: Some(list),
                    delta_y: -40.0,
                })
                .await
                .unwrap();
        }
        assert!(f.recorder.scroll_deadline().is_some());

        let out = f.recorder.flush_scroll().await.unwrap();
        assert_eq!(out, Some(ActionType::ScrollUpAtBbox));
        assert_eq!(f.recorder.scroll_deadline(), None);
        assert_eq!(f.recorder.flush_scroll().await.unwrap(), None);

        f.recorder.drain().await;
        let calls = f.sink.calls();
        assert_eq!(calls.len(), 2);
        match &calls[1] {
            Call::PageAction(_, action) => {
                assert_eq!(action.bbox, BoundingBox::new(100, 100, 300, 200));
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_document_scroll_uses_viewport_box() {
        let mut f = fixture(instructed(), MemorySink::default());
        f.recorder.start("Demo").await.unwrap();
        f.recorder
            .handle(PageEvent::Scroll {
                target: None,
                delta_y: 300.0,
            })
            .await
            .unwrap();
        assert_eq!(
            f.recorder.flush_scroll().await.unwrap(),
            Some(ActionType::ScrollDownAtBbox)
        );
        f.recorder.drain().await;
        match &f.sink.calls()[1] {
            Call::PageAction(_, action) => {
                assert_eq!(action.bbox, BoundingBox::new(0, 0, 800, 600));
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_keys_are_buffered_until_enter() {
        let mut f = fixture(instructed(), MemorySink::default());
        let body = f.page.body(TOP);
        let input = f.page.add(body, "input", Rect::new(40.0, 40.0, 200.0, 24.0));
        f.page.set_focus(Some(input));
        f.recorder.start("Demo").await.unwrap();

        for key in ["h", "i", "x", "Backspace", "Shift", "!"] {
            let out = f
                .recorder
                .handle(PageEvent::Keydown {
                    key: key.to_string(),
                })
                .await
                .unwrap();
            assert_eq!(out, None);
        }
        let out = f
            .recorder
            .handle(PageEvent::Keydown {
                key: "Enter".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(out, Some(ActionType::KeyboardInput));

        f.recorder.drain().await;
        match &f.sink.calls()[1] {
            Call::PageAction(_, action) => {
                assert_eq!(action.key_sequence.as_deref(), Some("hi!"));
                assert_eq!(action.bbox, BoundingBox::new(40, 40, 200, 24));
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pending_keys_precede_click() {
        let mut f = fixture(instructed(), MemorySink::default());
        let body = f.page.body(TOP);
        f.page.add(body, "button", Rect::new(0.0, 0.0, 50.0, 50.0));
        f.recorder.start("Demo").await.unwrap();

        f.recorder
            .handle(PageEvent::Keydown {
                key: "a".to_string(),
            })
            .await
            .unwrap();
        f.recorder
            .handle(PageEvent::Mousemove { x: 5.0, y: 5.0 })
            .await
            .unwrap();
        f.recorder
            .handle(PageEvent::Click { x: 5.0, y: 5.0 })
            .await
            .unwrap();
        f.recorder.drain().await;

        let kinds: Vec<ActionType> = f
            .sink
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::PageAction(_, a) | Call::TaskAndAction(_, a) => Some(a.action),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![ActionType::KeyboardInput, ActionType::ClickAtBbox]);
    }

    #[tokio::test]
    async fn test_failed_submission_still_cleans_up() {
        let sink = MemorySink {
            fail: true,
            ..MemorySink::default()
        };
        let mut f = fixture(instructed(), sink);
        let body = f.page.body(TOP);
        let button = f.page.add(body, "button", Rect::new(0.0, 0.0, 50.0, 50.0));
        f.recorder.start("Demo").await.unwrap();

        f.recorder
            .handle(PageEvent::Mousemove { x: 5.0, y: 5.0 })
            .await
            .unwrap();
        let out = f
            .recorder
            .handle(PageEvent::Click { x: 5.0, y: 5.0 })
            .await
            .unwrap();
        assert_eq!(out, Some(ActionType::ClickAtBbox));
        f.recorder.drain().await;
        assert_eq!(f.page.outline(button), None);
        assert!(f.recorder.flags().recording);
    }

    #[tokio::test]
    async fn test_stop_flushes_and_saves() {
        let mut f = fixture(instructed(), MemorySink::default());
        f.recorder.start("Demo").await.unwrap();
        f.recorder
            .handle(PageEvent::Keydown {
                key: "q".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(f.recorder.stop().await.unwrap(), "task-1");
        let calls = f.sink.calls();
        assert_eq!(calls.len(), 3);
        assert!(matches!(&calls[1], Call::PageAction(_, a) if a.action == ActionType::KeyboardInput));
        assert!(matches!(&calls[2], Call::Save(id, _) if id == "task-1"));
        assert!(!f.recorder.flags().recording);
        assert!(f.recorder.stop().await.is_err());
    }

    #[tokio::test]
    async fn test_run_loop_processes_stream() {
        let f = fixture(instructed(), MemorySink::default());
        let body = f.page.body(TOP);
        let button = f.page.add(body, "button", Rect::new(0.0, 0.0, 50.0, 50.0));
        let sink = f.sink.clone();
        let recorder = Arc::new(Mutex::new(f.recorder));
        recorder.lock().await.start("Demo").await.unwrap();

        let events = futures::stream::iter(vec![
            PageEvent::Mousemove { x: 5.0, y: 5.0 },
            PageEvent::Click { x: 5.0, y: 5.0 },
        ]);
        let (_tx, rx) = watch::channel(false);
        run(recorder.clone(), events, rx).await;

        recorder.lock().await.drain().await;
        assert_eq!(f.page.clicks(button), 1);
        assert_eq!(sink.calls().len(), 2);
    }

    #[test]
    fn test_page_event_wire_format() {
        let e: PageEvent = serde_json::from_str(r#"{"type":"click","x":3,"y":4.5}"#).unwrap();
        assert_eq!(e, PageEvent::Click { x: 3.0, y: 4.5 });
        let e: PageEvent =
            serde_json::from_str(r#"{"type":"scroll","target":7,"deltaY":-12}"#).unwrap();
        assert_eq!(
            e,
            PageEvent::Scroll {
                target: Some(NodeId(7)),
                delta_y: -12.0
            }
        );
        let e: PageEvent = serde_json::from_str(r#"{"type":"scroll","target":null}"#).unwrap();
        assert_eq!(
            e,
            PageEvent::Scroll {
                target: None,
                delta_y: 0.0
            }
        );
    }
}
