use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chromiumoxide::browser::HeadlessMode;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CloseTargetParams, EventTargetCreated, TargetId,
};
use chromiumoxide::handler::Handler;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use stackhunt_core::config::{PipelineConfig, SessionMode};
use stackhunt_core::error::AppError;
use stackhunt_core::traits::{
    BrowserPage, BrowserSession, SessionProvider, first_event_or_timeout,
};
use tokio::task::JoinHandle;

use crate::discovery::DebuggerEndpoint;
use crate::script::{
    IdleReport, STEALTH_SCRIPT, decode_json, json_expression, network_idle_script,
};

/// Viewport every tab is emulated at.
pub const VIEWPORT: (i64, i64) = (1350, 850);

const SELECTOR_POLL: Duration = Duration::from_millis(100);

/// Slack on top of the in-page idle timeout for the evaluation round trip.
const IDLE_EVAL_SLACK: Duration = Duration::from_secs(5);

fn browser_err(e: impl std::fmt::Display) -> AppError {
    AppError::BrowserError(e.to_string())
}

/// Quotes `value` as a JavaScript string literal.
fn js_str(value: &str) -> Result<String, AppError> {
    Ok(serde_json::to_string(value)?)
}

/// Chrome flags for a launched browser.
fn launch_args(stealth: bool) -> Vec<&'static str> {
    let mut args = vec![
        "--disable-gpu",
        "--disable-dev-shm-usage",
        "--disable-extensions",
        "--disable-popup-blocking",
        "--disable-translate",
        "--no-first-run",
    ];
    if stealth {
        args.push("--disable-blink-features=AutomationControlled");
    }
    args
}

/// Per-tab behaviour shared by every page a session opens.
#[derive(Debug, Clone, Copy)]
struct PageOptions {
    stealth: bool,
    network_idle: Duration,
}

/// Opens Chrome DevTools sessions, either by launching a local browser or
/// by attaching to one started with `--remote-debugging-port`.
pub struct CdpSessionProvider {
    headless: bool,
    options: PageOptions,
    endpoint: DebuggerEndpoint,
}

impl CdpSessionProvider {
    pub fn new(config: &PipelineConfig, endpoint: DebuggerEndpoint) -> Self {
        Self {
            headless: config.headless,
            options: PageOptions {
                stealth: config.stealth,
                network_idle: config.timings.network_idle,
            },
            endpoint,
        }
    }

    async fn launch(&self) -> Result<CdpSession, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        // The snap wrapper drops unknown flags, so prefer the real binary.
        if let Some(bin) = find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }
        builder = if self.headless {
            builder.headless_mode(HeadlessMode::New)
        } else {
            builder.with_head()
        };

        builder = builder.window_size(VIEWPORT.0 as u32, VIEWPORT.1 as u32);
        for arg in launch_args(self.options.stealth) {
            builder = builder.arg(arg);
        }
        let config = builder
            .build()
            .map_err(|e| AppError::ConfigError(format!("Browser config error: {e}")))?;

        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::LaunchError(format!("Failed to launch browser: {e}")))?;

        tracing::info!(
            headless = self.headless,
            stealth = self.options.stealth,
            "Launched browser"
        );
        Ok(CdpSession::new(browser, handler, SessionMode::Fresh, self.options))
    }

    async fn attach(&self) -> Result<CdpSession, AppError> {
        let ws_url = self.endpoint.websocket_url().await?;
        let (browser, handler) = Browser::connect(ws_url.as_str()).await.map_err(|e| {
            AppError::ConnectionError(format!("Failed to connect to {ws_url}: {e}"))
        })?;

        tracing::info!(%ws_url, "Attached to running browser");
        Ok(CdpSession::new(browser, handler, SessionMode::Attach, self.options))
    }
}

impl SessionProvider for CdpSessionProvider {
    type Session = CdpSession;

    async fn connect(&self, mode: SessionMode) -> Result<CdpSession, AppError> {
        match mode {
            SessionMode::Fresh => self.launch().await,
            SessionMode::Attach => self.attach().await,
        }
    }
}

/// Locates a usable Chrome/Chromium binary.
///
/// `CHROME_BIN` wins when it points at an existing file. Otherwise the
/// real binary inside a snap install is tried before the usual system
/// paths. `None` leaves the lookup to chromiumoxide.
pub fn find_chrome_binary() -> Option<PathBuf> {
    let candidates: &[&str] = &[
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    ];

    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
        tracing::warn!(chrome_bin = %p, "CHROME_BIN does not exist, falling back");
    }

    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}

/// A connected browser plus the task driving its CDP handler.
pub struct CdpSession {
    browser: Arc<Browser>,
    handler_task: JoinHandle<()>,
    mode: SessionMode,
    options: PageOptions,
}

impl CdpSession {
    fn new(
        browser: Browser,
        mut handler: Handler,
        mode: SessionMode,
        options: PageOptions,
    ) -> Self {
        // The CDP handler must be polled continuously for the connection to work.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "Browser CDP handler error");
                }
            }
        });

        Self {
            browser: Arc::new(browser),
            handler_task,
            mode,
            options,
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }
}

impl BrowserSession for CdpSession {
    type Page = CdpPage;

    async fn new_page(&self) -> Result<CdpPage, AppError> {
        let page = self.browser.new_page("about:blank").await.map_err(browser_err)?;

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(VIEWPORT.0)
            .height(VIEWPORT.1)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(AppError::BrowserError)?;
        page.execute(metrics).await.map_err(browser_err)?;

        if self.options.stealth {
            page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
                .await
                .map_err(browser_err)?;
        }

        Ok(CdpPage {
            page,
            browser: Arc::clone(&self.browser),
            network_idle: self.options.network_idle,
        })
    }

    async fn shutdown(self) {
        match self.mode {
            SessionMode::Fresh => match Arc::try_unwrap(self.browser) {
                Ok(mut browser) => {
                    if let Err(e) = browser.close().await {
                        tracing::warn!(error = %e, "Failed to close browser");
                    }
                    if let Err(e) = browser.wait().await {
                        tracing::debug!(error = %e, "Failed to reap browser process");
                    }
                    tracing::info!("Browser closed");
                }
                Err(_) => tracing::warn!("Browser still referenced by open tabs, dropping it"),
            },
            // The user's browser outlives the run; only the connection goes.
            SessionMode::Attach => {
                drop(self.browser);
                tracing::info!("Disconnected from browser");
            }
        }
        self.handler_task.abort();
    }
}

/// One tab of a [`CdpSession`].
pub struct CdpPage {
    page: Page,
    browser: Arc<Browser>,
    network_idle: Duration,
}

impl CdpPage {
    /// Evaluates a synchronous expression and decodes its value.
    async fn eval<T: DeserializeOwned>(&self, expression: String) -> Result<T, AppError> {
        let raw = self
            .page
            .evaluate(json_expression(&expression))
            .await
            .map_err(browser_err)?
            .into_value::<String>()
            .map_err(browser_err)?;
        decode_json(&raw)
    }

    /// Waits for the network to go quiet. Still busy after the timeout
    /// is logged and tolerated.
    async fn wait_for_network_idle(&self, url: &str) -> Result<(), AppError> {
        if self.network_idle.is_zero() {
            return Ok(());
        }
        let evaluation = self.page.evaluate(network_idle_script(self.network_idle));
        let raw = tokio::time::timeout(self.network_idle + IDLE_EVAL_SLACK, evaluation)
            .await
            .map_err(|_| AppError::Timeout(self.network_idle.as_millis() as u64))?
            .map_err(|e| AppError::NavigationError(format!("{url}: {e}")))?
            .into_value::<String>()
            .map_err(browser_err)?;

        let report: IdleReport = decode_json(&raw)?;
        if report.idle {
            tracing::debug!(%url, waited_ms = report.waited_ms, "Network idle");
        } else {
            tracing::warn!(
                %url,
                ready_state = %report.ready_state,
                resources = report.resource_count,
                "Network still busy after {}ms, continuing",
                report.waited_ms
            );
        }
        Ok(())
    }

    async fn exists(&self, selector: &str) -> Result<bool, AppError> {
        self.eval(format!("document.querySelector({}) !== null", js_str(selector)?))
            .await
    }

    /// Waits for a page with `target_id` to become available on the browser.
    async fn page_for_target(&self, target_id: &TargetId) -> Result<Option<Page>, AppError> {
        for _ in 0..20 {
            let pages = self.browser.pages().await.map_err(browser_err)?;
            if let Some(page) = pages.into_iter().find(|p| p.target_id() == target_id) {
                return Ok(Some(page));
            }
            tokio::time::sleep(SELECTOR_POLL).await;
        }
        Ok(None)
    }

    fn wrap(&self, page: Page) -> CdpPage {
        CdpPage {
            page,
            browser: Arc::clone(&self.browser),
            network_idle: self.network_idle,
        }
    }
}

/// Command closing a tab that was never handed out as a page.
fn close_orphan_tab(target_id: TargetId) -> CloseTargetParams {
    CloseTargetParams::new(target_id)
}

impl BrowserPage for CdpPage {
    async fn goto(&self, url: &str) -> Result<(), AppError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| AppError::NavigationError(format!("Failed to navigate to {url}: {e}")))?;
        self.wait_for_network_idle(url).await
    }

    async fn scroll_to_bottom(&self) -> Result<(), AppError> {
        self.page
            .evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await
            .map_err(browser_err)?;
        Ok(())
    }

    async fn content_height(&self) -> Result<u64, AppError> {
        self.eval("document.body.scrollHeight".to_string()).await
    }

    async fn content(&self) -> Result<String, AppError> {
        self.page.content().await.map_err(browser_err)
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), AppError> {
        let started = Instant::now();
        loop {
            if self.exists(selector).await? {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(AppError::Timeout(timeout.as_millis() as u64));
            }
            tokio::time::sleep(SELECTOR_POLL).await;
        }
    }

    async fn click(&self, selector: &str) -> Result<bool, AppError> {
        self.eval(format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; el.click(); return true; }})()",
            js_str(selector)?
        ))
        .await
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), AppError> {
        let element = self.page.find_element(selector).await.map_err(browser_err)?;
        element.click().await.map_err(browser_err)?;
        element.type_str(text).await.map_err(browser_err)?;
        Ok(())
    }

    async fn press_enter(&self, selector: &str) -> Result<(), AppError> {
        let element = self.page.find_element(selector).await.map_err(browser_err)?;
        element.press_key("Enter").await.map_err(browser_err)?;
        Ok(())
    }

    async fn input_value(&self, selector: &str) -> Result<Option<String>, AppError> {
        self.eval(format!(
            "(() => {{ const el = document.querySelector({}); return el ? el.value : null; }})()",
            js_str(selector)?
        ))
        .await
    }

    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>, AppError> {
        self.eval(format!(
            "(() => {{ const el = document.querySelector({}); return el ? el.getAttribute({}) : null; }})()",
            js_str(selector)?,
            js_str(name)?
        ))
        .await
    }

    async fn click_and_capture_tab(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Option<CdpPage>, AppError> {
        // Subscribe before clicking so the creation event cannot be missed.
        let mut created = self
            .browser
            .event_listener::<EventTargetCreated>()
            .await
            .map_err(browser_err)?;
        let opener = self.page.target_id().clone();

        if !self.click(selector).await? {
            return Ok(None);
        }

        let new_tab = async {
            while let Some(event) = created.next().await {
                let info = &event.target_info;
                if info.r#type == "page" && info.opener_id.as_ref().is_none_or(|o| *o == opener) {
                    return Some(info.target_id.clone());
                }
            }
            None
        };
        let Some(Some(target_id)) = first_event_or_timeout(new_tab, timeout).await else {
            return Ok(None);
        };

        match self.page_for_target(&target_id).await? {
            Some(page) => Ok(Some(self.wrap(page))),
            None => {
                tracing::debug!(target = ?target_id, "Captured tab never attached, closing it");
                if let Err(e) = self.browser.execute(close_orphan_tab(target_id)).await {
                    tracing::debug!(error = %e, "Failed to close captured tab");
                }
                Ok(None)
            }
        }
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> Result<(), AppError> {
        match tokio::time::timeout(timeout, self.page.wait_for_navigation()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(AppError::NavigationError(e.to_string())),
            Err(_) => Err(AppError::Timeout(timeout.as_millis() as u64)),
        }
    }

    async fn url(&self) -> Result<Option<String>, AppError> {
        self.page.url().await.map_err(browser_err)
    }

    async fn close(self) -> Result<(), AppError> {
        self.page.close().await.map_err(browser_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stealth_launch_hides_automation_flag() {
        assert!(launch_args(true).contains(&"--disable-blink-features=AutomationControlled"));
        assert!(!launch_args(false).contains(&"--disable-blink-features=AutomationControlled"));
        assert!(launch_args(false).contains(&"--disable-popup-blocking"));
    }

    #[test]
    fn orphan_tab_is_closed_by_target_id() {
        let params = close_orphan_tab(TargetId::new("4B1D7A"));
        assert_eq!(params.target_id, TargetId::new("4B1D7A"));
    }

    #[test]
    fn provider_takes_page_options_from_config() {
        let config = PipelineConfig::default().with_stealth(false);
        let endpoint = DebuggerEndpoint::new("localhost", 9222).unwrap();

        let provider = CdpSessionProvider::new(&config, endpoint);

        assert!(!provider.options.stealth);
        assert_eq!(provider.options.network_idle, config.timings.network_idle);
        assert_eq!(provider.headless, config.headless);
    }
}
