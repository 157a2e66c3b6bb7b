//! Test utilities: scripted fakes for the browser and parser traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::AppError;
use crate::models::{Record, Technologies};
use crate::report::{PipelineEvent, PipelineReporter};
use crate::traits::{BrowserPage, BrowserSession, RecordExtractor, TechnologyParser};

// ---------------------------------------------------------------------------
// MockPage
// ---------------------------------------------------------------------------

type HeightFn = Arc<dyn Fn(u32) -> u64 + Send + Sync>;

struct PageState {
    url: Option<String>,
    html: String,
    goto_error: Option<String>,
    /// Page height as a function of the number of scrolls performed so far.
    height: HeightFn,
    scrolls: u32,
    present: HashSet<String>,
    attributes: HashMap<(String, String), String>,
    /// Values returned by successive `input_value` calls per selector; the
    /// last value repeats once the queue drains.
    input_values: HashMap<String, VecDeque<Option<String>>>,
    typed: HashMap<String, String>,
    /// If set, every typed input reads back this value instead.
    echo_override: Option<String>,
    new_tab: Option<MockPage>,
    clicks: Vec<String>,
    closed: bool,
}

/// Scripted [`BrowserPage`].
#[derive(Clone)]
pub struct MockPage {
    state: Arc<Mutex<PageState>>,
}

impl Default for MockPage {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPage {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PageState {
                url: None,
                html: "<html><body></body></html>".to_string(),
                goto_error: None,
                height: Arc::new(|_| 1000),
                scrolls: 0,
                present: HashSet::new(),
                attributes: HashMap::new(),
                input_values: HashMap::new(),
                typed: HashMap::new(),
                echo_override: None,
                new_tab: None,
                clicks: Vec::new(),
                closed: false,
            })),
        }
    }

    /// A page already showing `url`, e.g. a captured tab.
    pub fn at_url(url: &str) -> Self {
        let page = Self::new();
        page.state.lock().unwrap().url = Some(url.to_string());
        page
    }

    pub fn with_heights(self, height: impl Fn(u32) -> u64 + Send + Sync + 'static) -> Self {
        self.state.lock().unwrap().height = Arc::new(height);
        self
    }

    pub fn with_goto_error(self, message: &str) -> Self {
        self.state.lock().unwrap().goto_error = Some(message.to_string());
        self
    }

    pub fn with_element(self, selector: &str) -> Self {
        self.state.lock().unwrap().present.insert(selector.to_string());
        self
    }

    pub fn with_attribute(self, selector: &str, name: &str, value: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.present.insert(selector.to_string());
            state
                .attributes
                .insert((selector.to_string(), name.to_string()), value.to_string());
        }
        self
    }

    pub fn with_input_values(self, selector: &str, values: Vec<Option<&str>>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.present.insert(selector.to_string());
            state.input_values.insert(
                selector.to_string(),
                values.into_iter().map(|v| v.map(str::to_string)).collect(),
            );
        }
        self
    }

    pub fn with_echo_override(self, value: &str) -> Self {
        self.state.lock().unwrap().echo_override = Some(value.to_string());
        self
    }

    /// Clicking `selector` opens `tab`.
    pub fn with_new_tab(self, selector: &str, tab: MockPage) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.present.insert(selector.to_string());
            state.new_tab = Some(tab);
        }
        self
    }

    pub fn scrolls(&self) -> u32 {
        self.state.lock().unwrap().scrolls
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn typed(&self, selector: &str) -> Option<String> {
        self.state.lock().unwrap().typed.get(selector).cloned()
    }

    pub fn current_url(&self) -> Option<String> {
        self.state.lock().unwrap().url.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

impl BrowserPage for MockPage {
    async fn goto(&self, url: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(msg) = &state.goto_error {
            return Err(AppError::NavigationError(format!("{url}: {msg}")));
        }
        state.url = Some(url.to_string());
        Ok(())
    }

    async fn scroll_to_bottom(&self) -> Result<(), AppError> {
        self.state.lock().unwrap().scrolls += 1;
        Ok(())
    }

    async fn content_height(&self) -> Result<u64, AppError> {
        let state = self.state.lock().unwrap();
        Ok((state.height)(state.scrolls))
    }

    async fn content(&self) -> Result<String, AppError> {
        Ok(self.state.lock().unwrap().html.clone())
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> Result<(), AppError> {
        if self.state.lock().unwrap().present.contains(selector) {
            Ok(())
        } else {
            Err(AppError::Timeout(0))
        }
    }

    async fn click(&self, selector: &str) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        state.clicks.push(selector.to_string());
        Ok(state.present.contains(selector))
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if !state.present.contains(selector) {
            return Err(AppError::BrowserError(format!("No element matches {selector}")));
        }
        state.typed.insert(selector.to_string(), text.to_string());
        Ok(())
    }

    async fn press_enter(&self, selector: &str) -> Result<(), AppError> {
        self.state.lock().unwrap().clicks.push(format!("enter:{selector}"));
        Ok(())
    }

    async fn input_value(&self, selector: &str) -> Result<Option<String>, AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(queue) = state.input_values.get_mut(selector) {
            let value = if queue.len() > 1 {
                queue.pop_front().flatten()
            } else {
                queue.front().cloned().flatten()
            };
            return Ok(value);
        }
        if let Some(typed) = state.typed.get(selector) {
            return Ok(Some(state.echo_override.clone().unwrap_or_else(|| typed.clone())));
        }
        Ok(None)
    }

    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .attributes
            .get(&(selector.to_string(), name.to_string()))
            .cloned())
    }

    async fn click_and_capture_tab(
        &self,
        selector: &str,
        _timeout: Duration,
    ) -> Result<Option<Self>, AppError> {
        let mut state = self.state.lock().unwrap();
        state.clicks.push(selector.to_string());
        if !state.present.contains(selector) {
            return Ok(None);
        }
        Ok(state.new_tab.take())
    }

    async fn wait_for_navigation(&self, _timeout: Duration) -> Result<(), AppError> {
        Ok(())
    }

    async fn url(&self) -> Result<Option<String>, AppError> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn close(self) -> Result<(), AppError> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockSession
// ---------------------------------------------------------------------------

type PageFactory = Arc<dyn Fn(usize) -> Result<MockPage, AppError> + Send + Sync>;

/// Session whose pages come from a factory keyed by open order.
#[derive(Clone)]
pub struct MockSession {
    factory: PageFactory,
    pub opened: Arc<Mutex<Vec<MockPage>>>,
}

impl MockSession {
    pub fn new(factory: impl Fn(usize) -> Result<MockPage, AppError> + Send + Sync + 'static) -> Self {
        Self {
            factory: Arc::new(factory),
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every `new_page` call yields a clone of `page` (shared state).
    pub fn with_page(page: MockPage) -> Self {
        Self::new(move |_| Ok(page.clone()))
    }

    /// Pages are handed out in order; running out is a browser error.
    pub fn with_pages(pages: Vec<MockPage>) -> Self {
        Self::new(move |i| {
            pages
                .get(i)
                .cloned()
                .ok_or_else(|| AppError::BrowserError(format!("No scripted page #{i}")))
        })
    }

    pub fn opened_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }
}

impl BrowserSession for MockSession {
    type Page = MockPage;

    async fn new_page(&self) -> Result<MockPage, AppError> {
        let mut opened = self.opened.lock().unwrap();
        let page = (self.factory)(opened.len())?;
        opened.push(page.clone());
        Ok(page)
    }

    async fn shutdown(self) {}
}

// ---------------------------------------------------------------------------
// MockExtractor / MockParser
// ---------------------------------------------------------------------------

/// Extractor returning a fixed set of per-entry results.
#[derive(Clone)]
pub struct MockExtractor {
    results: Arc<Mutex<Vec<Result<Record, String>>>>,
}

impl MockExtractor {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            results: Arc::new(Mutex::new(records.into_iter().map(Ok).collect())),
        }
    }

    /// Mixes good records with entries that fail extraction.
    pub fn with_results(results: Vec<Result<Record, String>>) -> Self {
        Self {
            results: Arc::new(Mutex::new(results)),
        }
    }
}

impl RecordExtractor for MockExtractor {
    fn extract(&self, _html: &str) -> Vec<Result<Record, AppError>> {
        self.results
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.clone().map_err(AppError::ExtractionError))
            .collect()
    }
}

/// Parser returning queued results; drains to an empty classification.
#[derive(Clone)]
pub struct MockParser {
    responses: Arc<Mutex<VecDeque<Result<Technologies, AppError>>>>,
}

impl MockParser {
    pub fn new(technologies: Technologies) -> Self {
        Self::with_responses(vec![Ok(technologies)])
    }

    pub fn with_responses(responses: Vec<Result<Technologies, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
        }
    }
}

impl TechnologyParser for MockParser {
    fn parse(&self, _html: &str) -> Result<Technologies, AppError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Technologies::default()))
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, label: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == label)
            .count()
    }
}

impl PipelineReporter for MockReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        let label = match &event {
            PipelineEvent::StageStarted { .. } => "StageStarted",
            PipelineEvent::ItemStarted { .. } => "ItemStarted",
            PipelineEvent::ItemSkipped { .. } => "ItemSkipped",
            PipelineEvent::ItemSucceeded { .. } => "ItemSucceeded",
            PipelineEvent::ItemFailed { .. } => "ItemFailed",
            PipelineEvent::StageFinished { .. } => "StageFinished",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Create a freshly extracted record.
pub fn make_test_record(title: &str) -> Record {
    let slug = title.to_lowercase().replace(' ', "-");
    Record {
        title: title.to_string(),
        description: format!("{title} does things"),
        image: Some(format!("https://ph-files.imgix.net/{slug}.png")),
        tags: vec!["Productivity".to_string()],
        comment: "42".to_string(),
        link: format!("/posts/{slug}"),
        website_link: None,
        technologies: None,
    }
}
