//! Chrome CDP client with isolated sessions, replay helpers and live
//! event capture for recording.
//!
//! Each session has its own browser context (cookies, localStorage, cache).

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, InsertTextParams, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{AddBindingParams, EventBindingCalled};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::host::CdpHost;
use super::scripts;
use crate::dom::DomHost;
use crate::geometry::{
    element_at_point, element_in_corners, text_in_region, BoundingBox, Point, Rect,
    ResolvedElement,
};
use crate::models::{
    ClickResult, NavigationResult, ScreenshotResult, ScrollDirection, ScrollOutcome, SessionInfo,
};
use crate::recording::PageEvent;

/// Wheel notches sent by a scroll at a box, matching a short mouse flick.
const WHEEL_NOTCHES: f64 = 5.0;
const WHEEL_NOTCH_PX: f64 = 100.0;

/// Captured page events of one recording page.
pub type CaptureStream = Pin<Box<dyn Stream<Item = PageEvent> + Send>>;

/// A browser session with isolated context.
pub struct BrowserSession {
    pub id: String,
    pub context_id: Option<BrowserContextId>, // None = default context
    pub page: Page,
    pub recording: bool,
}

/// Chrome browser client with multi-session support.
pub struct BrowserClient {
    browser: Browser,
    sessions: Arc<RwLock<HashMap<String, BrowserSession>>>,
    default_session_id: String,
}

impl BrowserClient {
    /// Launch Chrome and open the default session.
    pub async fn new(user_data_dir: PathBuf, headless: bool) -> Result<Self> {
        tokio::fs::create_dir_all(&user_data_dir).await?;

        let chrome_path = Self::find_chrome_executable(headless)?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .user_data_dir(&user_data_dir)
            .viewport(None)
            .no_sandbox()
            // Operator prompts keep an evaluation pending until answered.
            .request_timeout(Duration::from_secs(600))
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-back-forward-cache")
            .arg("--disable-background-timer-throttling")
            .arg("--disable-breakpad")
            .arg("--disable-component-extensions-with-background-pages")
            .arg("--disable-default-apps")
            .arg("--disable-extensions")
            .arg("--disable-hang-monitor")
            .arg("--disable-ipc-flooding-protection")
            .arg("--disable-prompt-on-repost")
            .arg("--disable-renderer-backgrounding")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--metrics-recording-only")
            .arg("--mute-audio")
            .arg("--no-first-run")
            .arg("--password-store=basic")
            .arg("--disable-features=MediaRouter,OptimizationHints,Translate");

        if headless {
            builder = builder.arg("--headless=old");
        } else {
            builder = builder.with_head();
        }

        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;

        tokio::spawn(async move { while handler.next().await.is_some() {} });

        let default_page = browser
            .new_page("about:blank")
            .await
            .context("Failed to create initial page")?;

        let default_session_id = "default".to_string();
        let mut sessions = HashMap::new();
        sessions.insert(
            default_session_id.clone(),
            BrowserSession {
                id: default_session_id.clone(),
                context_id: None,
                page: default_page,
                recording: false,
            },
        );

        tracing::info!(
            "Browser launched ({})",
            if headless { "headless" } else { "headed" }
        );

        Ok(Self {
            browser,
            sessions: Arc::new(RwLock::new(sessions)),
            default_session_id,
        })
    }

    /// Create a new isolated session with its own browser context.
    pub async fn create_session(&self, session_id: &str) -> Result<String> {
        let mut sessions = self.sessions.write().await;

        if sessions.contains_key(session_id) {
            return Ok(session_id.to_string());
        }

        let context_id = self
            .browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await
            .context("Failed to create browser context")?;

        let page = self
            .browser
            .new_page(
                CreateTargetParams::builder()
                    .url("about:blank")
                    .browser_context_id(context_id.clone())
                    .build()
                    .map_err(|e| anyhow::anyhow!("Failed to build target params: {:?}", e))?,
            )
            .await
            .context("Failed to create page in context")?;

        sessions.insert(
            session_id.to_string(),
            BrowserSession {
                id: session_id.to_string(),
                context_id: Some(context_id),
                page,
                recording: false,
            },
        );
        tracing::info!("Created new session: {}", session_id);

        Ok(session_id.to_string())
    }

    /// Close and dispose a session.
    pub async fn close_session(&self, session_id: &str) -> Result<()> {
        if session_id == self.default_session_id {
            anyhow::bail!("Cannot close default session");
        }

        let mut sessions = self.sessions.write().await;

        if let Some(session) = sessions.get(session_id) {
            if session.recording {
                anyhow::bail!("Session {} is recording; stop it first", session_id);
            }
        }

        if let Some(session) = sessions.remove(session_id) {
            if let Some(context_id) = session.context_id {
                self.browser
                    .dispose_browser_context(context_id)
                    .await
                    .context("Failed to dispose browser context")?;
            }
            tracing::info!("Closed session: {}", session_id);
        }

        Ok(())
    }

    /// List all active sessions with their current URL.
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut out = Vec::with_capacity(sessions.len());
        for session in sessions.values() {
            let url = session.page.url().await.ok().flatten();
            out.push(SessionInfo {
                id: session.id.clone(),
                url,
                recording: session.recording,
            });
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    async fn get_page(&self, session_id: Option<&str>) -> Result<Page> {
        let sessions = self.sessions.read().await;
        let sid = session_id.unwrap_or(&self.default_session_id);

        sessions
            .get(sid)
            .map(|s| s.page.clone())
            .ok_or_else(|| anyhow::anyhow!("Session not found: {}", sid))
    }

    /// Render-tree access for a session page.
    pub async fn host(&self, session_id: Option<&str>) -> Result<CdpHost> {
        Ok(CdpHost::new(self.get_page(session_id).await?))
    }

    /// Navigate to a URL.
    pub async fn navigate(&self, url: &str, session_id: Option<&str>) -> Result<NavigationResult> {
        let page = self.get_page(session_id).await?;

        page.goto(url).await.context("Navigation failed")?;
        page.wait_for_navigation().await.ok();

        let current_url = page.url().await?.unwrap_or_default();
        let title = page.get_title().await?.unwrap_or_default();

        Ok(NavigationResult {
            url: current_url,
            title,
        })
    }

    /// Viewport screenshot as a PNG data URL.
    pub async fn screenshot(&self, session_id: Option<&str>) -> Result<ScreenshotResult> {
        let host = self.host(session_id).await?;
        let viewport = host.viewport().await?;
        let data_url = capture_viewport(host.page()).await?;

        Ok(ScreenshotResult {
            data_url,
            width: viewport.width.max(0.0) as u32,
            height: viewport.height.max(0.0) as u32,
        })
    }

    /// Topmost element at a top-viewport point.
    pub async fn resolve_point(
        &self,
        x: f64,
        y: f64,
        session_id: Option<&str>,
    ) -> Result<ResolvedElement> {
        let host = self.host(session_id).await?;
        Ok(element_at_point(&host, Point::new(x, y)).await?)
    }

    /// Element best covering the rectangle spanned by two corners.
    pub async fn resolve_region(
        &self,
        from: Point,
        to: Point,
        session_id: Option<&str>,
    ) -> Result<ResolvedElement> {
        let host = self.host(session_id).await?;
        Ok(element_in_corners(&host, from, to).await?)
    }

    /// Bring a composite-selector target into view and report how it moved.
    pub async fn scroll_into_view(
        &self,
        selector: &str,
        session_id: Option<&str>,
    ) -> Result<ScrollOutcome> {
        let host = self.host(session_id).await?;
        Ok(crate::geometry::scroll_into_view(&host, selector).await?)
    }

    /// Click the center of `bbox` with real mouse events.
    pub async fn click_at_bbox(
        &self,
        bbox: BoundingBox,
        session_id: Option<&str>,
    ) -> Result<ClickResult> {
        let host = self.host(session_id).await?;
        let center = bbox.center();

        let target = element_at_point(&host, center)
            .await
            .with_context(|| format!("No element at the center of {}", bbox))?;

        for kind in [
            DispatchMouseEventType::MouseMoved,
            DispatchMouseEventType::MousePressed,
            DispatchMouseEventType::MouseReleased,
        ] {
            let mut params = DispatchMouseEventParams::builder()
                .r#type(kind.clone())
                .x(center.x)
                .y(center.y);
            if kind != DispatchMouseEventType::MouseMoved {
                params = params.button(MouseButton::Left).click_count(1);
            }
            host.page()
                .execute(
                    params
                        .build()
                        .map_err(|e| anyhow::anyhow!("Failed to build mouse event: {:?}", e))?,
                )
                .await
                .context("Failed to dispatch mouse event")?;
        }

        tracing::debug!("Clicked <{}> at {}", target.tag, bbox);
        Ok(ClickResult {
            success: true,
            element: target.tag,
            bbox: target.bbox,
        })
    }

    /// Type `text` into the focused element. Newlines press Enter.
    pub async fn keyboard_input(&self, text: &str, session_id: Option<&str>) -> Result<()> {
        let page = self.get_page(session_id).await?;

        let mut lines = text.split('\n').peekable();
        while let Some(line) = lines.next() {
            if !line.is_empty() {
                page.execute(InsertTextParams::new(line))
                    .await
                    .context("Failed to insert text")?;
            }
            if lines.peek().is_some() {
                press(&page, "Enter").await?;
            }
        }
        Ok(())
    }

    /// Scroll the page by half a viewport, or wheel-scroll at the center of
    /// `bbox`.
    pub async fn scroll(
        &self,
        direction: ScrollDirection,
        bbox: Option<BoundingBox>,
        session_id: Option<&str>,
    ) -> Result<()> {
        let host = self.host(session_id).await?;
        let sign = match direction {
            ScrollDirection::Up => -1.0,
            ScrollDirection::Down => 1.0,
        };

        match bbox {
            None => {
                let viewport = host.viewport().await?;
                let dy = sign * (viewport.height / 2.0).floor();
                let _: bool = host
                    .eval(format!("(() => {{ window.scrollBy(0, {}); return true; }})()", dy))
                    .await?;
            }
            Some(bbox) => {
                let center = bbox.center();
                let params = DispatchMouseEventParams::builder()
                    .r#type(DispatchMouseEventType::MouseWheel)
                    .x(center.x)
                    .y(center.y)
                    .delta_x(0.0)
                    .delta_y(sign * WHEEL_NOTCHES * WHEEL_NOTCH_PX)
                    .build()
                    .map_err(|e| anyhow::anyhow!("Failed to build wheel event: {:?}", e))?;
                host.page()
                    .execute(params)
                    .await
                    .context("Failed to dispatch wheel event")?;
            }
        }
        host.next_frame().await?;
        Ok(())
    }

    /// Distinct text painted inside `bbox`.
    pub async fn text_in_bbox(
        &self,
        bbox: BoundingBox,
        stride: f64,
        session_id: Option<&str>,
    ) -> Result<Vec<String>> {
        let host = self.host(session_id).await?;
        Ok(text_in_region(&host, Rect::from(bbox), stride).await?)
    }

    /// Install the capture script on a session page and return the stream
    /// of events it reports.
    pub async fn capture_events(&self, session_id: Option<&str>) -> Result<CaptureStream> {
        let page = self.get_page(session_id).await?;

        page.execute(AddBindingParams::new(scripts::CAPTURE_BINDING))
            .await
            .context("Failed to add capture binding")?;

        let events = page
            .event_listener::<EventBindingCalled>()
            .await
            .context("Failed to listen for binding calls")?;

        let script = scripts::capture_script();
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(script.clone()))
            .await
            .context("Failed to register capture script")?;
        page.evaluate(script)
            .await
            .context("Failed to install capture script")?;

        tracing::debug!("Capture script installed");

        let stream = events.filter_map(|called| async move {
            if called.name != scripts::CAPTURE_BINDING {
                return None;
            }
            match serde_json::from_str::<PageEvent>(&called.payload) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!("Ignoring malformed page event {}: {}", called.payload, e);
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }

    /// Switch event capture on or off in the session's current document.
    pub async fn set_capture_active(&self, active: bool, session_id: Option<&str>) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let sid = session_id.unwrap_or(&self.default_session_id);
        let session = sessions
            .get_mut(sid)
            .ok_or_else(|| anyhow::anyhow!("Session not found: {}", sid))?;

        session
            .page
            .evaluate(scripts::set_capture_active(active))
            .await
            .context("Failed to toggle capture")?;
        session.recording = active;
        Ok(())
    }

    /// Health check - verify browser is responsive.
    pub async fn health_check(&self) -> Result<bool> {
        let _version = self.browser.version().await?;
        Ok(true)
    }

    /// Find Chrome on the system. Headed recording needs a full browser, so
    /// the Playwright headless shell is only considered when headless.
    fn find_chrome_executable(headless: bool) -> Result<PathBuf> {
        if headless {
            if let Some(shell) = Self::find_headless_shell() {
                return Ok(shell);
            }
        }

        let paths = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ];

        for path in &paths {
            let p = PathBuf::from(path);
            if p.exists() {
                tracing::info!("Found Chrome at: {}", path);
                return Ok(p);
            }
        }

        anyhow::bail!("Chrome/Chromium not found. Install Google Chrome or Chromium.")
    }

    fn find_headless_shell() -> Option<PathBuf> {
        let (subdir_name, alt_subdir) = if cfg!(target_os = "macos") {
            if cfg!(target_arch = "aarch64") {
                (
                    "chrome-headless-shell-mac-arm64",
                    "chrome-headless-shell-mac-x64",
                )
            } else {
                (
                    "chrome-headless-shell-mac-x64",
                    "chrome-headless-shell-mac-arm64",
                )
            }
        } else {
            ("chrome-headless-shell-linux", "chrome-headless-shell-linux")
        };

        let home = dirs::home_dir()?;
        let playwright_cache = [
            home.join("Library/Caches/ms-playwright"),
            home.join(".cache/ms-playwright"),
        ]
        .into_iter()
        .find(|p| p.exists())?;

        let mut headless_dirs: Vec<_> = std::fs::read_dir(&playwright_cache)
            .ok()?
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("chromium_headless_shell")
            })
            .collect();
        headless_dirs.sort_by_key(|b| std::cmp::Reverse(b.file_name()));

        for dir in headless_dirs {
            for sub in [subdir_name, alt_subdir] {
                let binary = dir.path().join(sub).join("chrome-headless-shell");
                if binary.exists() {
                    tracing::info!("Using chrome-headless-shell at: {:?}", binary);
                    return Some(binary);
                }
            }
        }
        None
    }
}

/// PNG of the visible viewport as a `data:` URL.
pub async fn capture_viewport(page: &Page) -> Result<String> {
    let png = page
        .screenshot(
            ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .full_page(false)
                .build(),
        )
        .await
        .context("Failed to capture screenshot")?;
    Ok(png_data_url(&png))
}

pub(crate) fn png_data_url(png: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, png)
    )
}

async fn press(page: &Page, key: &str) -> Result<()> {
    for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
        let mut params = DispatchKeyEventParams::builder().r#type(kind.clone()).key(key);
        if key == "Enter" && kind == DispatchKeyEventType::KeyDown {
            params = params.text("\r").code("Enter").windows_virtual_key_code(13);
        }
        page.execute(
            params
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to build key event: {:?}", e))?,
        )
        .await?;
    }
    Ok(())
}
