use std::future::Future;
use std::time::Duration;

use crate::config::SessionMode;
use crate::error::AppError;
use crate::models::{Record, Technologies};

/// A single browser tab.
///
/// Every interaction the pipeline performs against a remote document goes
/// through this trait, so stages can be driven by a scripted fake page.
/// Selector arguments are CSS selectors resolved against the current
/// document.
pub trait BrowserPage: Send + Sync + Sized {
    /// Navigates to `url` and waits for network idle before returning.
    fn goto(&self, url: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Scrolls the window to the bottom of the document.
    fn scroll_to_bottom(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Current `document.body.scrollHeight`.
    fn content_height(&self) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// The rendered DOM as HTML.
    fn content(&self) -> impl Future<Output = Result<String, AppError>> + Send;

    /// Waits until an element matching `selector` exists.
    fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Clicks the first matching element. Returns `false` if none exists.
    fn click(&self, selector: &str) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Focuses the matching element and types `text` into it.
    fn type_text(
        &self,
        selector: &str,
        text: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Presses Enter on the matching element.
    fn press_enter(&self, selector: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// The `value` property of the matching input, `None` if it is absent.
    fn input_value(
        &self,
        selector: &str,
    ) -> impl Future<Output = Result<Option<String>, AppError>> + Send;

    /// An attribute of the matching element, `None` if either is absent.
    fn attribute(
        &self,
        selector: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<String>, AppError>> + Send;

    /// Clicks `selector` and captures the tab the click opens.
    ///
    /// Resolves to the first of {tab created, `timeout` elapsed}; a created
    /// tab wins when both are ready. Returns `Ok(None)` on timeout or when
    /// the trigger element is absent.
    fn click_and_capture_tab(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<Self>, AppError>> + Send;

    /// Waits for an in-flight navigation to finish.
    fn wait_for_navigation(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// The tab's current URL.
    fn url(&self) -> impl Future<Output = Result<Option<String>, AppError>> + Send;

    /// Closes the tab.
    fn close(self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A live connection to a browser instance.
pub trait BrowserSession: Send + Sync {
    type Page: BrowserPage;

    /// Opens a blank tab.
    fn new_page(&self) -> impl Future<Output = Result<Self::Page, AppError>> + Send;

    /// Releases the session: a launched browser is closed, an attached one
    /// is only disconnected.
    fn shutdown(self) -> impl Future<Output = ()> + Send;
}

/// Establishes remote sessions.
pub trait SessionProvider: Send + Sync {
    type Session: BrowserSession;

    /// Launches or attaches depending on `mode`. Failure is fatal for the
    /// run: [`AppError::LaunchError`] when launching,
    /// [`AppError::ConnectionError`] when attaching.
    fn connect(
        &self,
        mode: SessionMode,
    ) -> impl Future<Output = Result<Self::Session, AppError>> + Send;
}

/// Pulls listing records out of a rendered listing page.
pub trait RecordExtractor: Send + Sync {
    /// One result per listing entry, in document order. An entry missing a
    /// required element yields [`AppError::ExtractionError`].
    fn extract(&self, html: &str) -> Vec<Result<Record, AppError>>;
}

/// Parses the inspection service's result page.
pub trait TechnologyParser: Send + Sync {
    fn parse(&self, html: &str) -> Result<Technologies, AppError>;
}

/// Waits for the first of {`event`, `timeout`}.
///
/// The event branch is polled first, so it wins when both are ready. The
/// losing future is dropped before this returns, which unregisters any
/// listener it owns.
pub async fn first_event_or_timeout<F>(event: F, timeout: Duration) -> Option<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        value = event => Some(value),
        () = tokio::time::sleep(timeout) => None,
    }
}
