use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

/// Run environment. Controls browser visibility and the scroll budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Visible browser, pagination capped.
    #[default]
    Test,
    /// Headless browser, unbounded pagination.
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Test => "test",
            Environment::Production => "production",
        }
    }

    pub fn headless(&self) -> bool {
        matches!(self, Environment::Production)
    }

    /// Scroll budget for the listing page; `None` means unbounded.
    pub fn max_scrolls(&self) -> Option<u32> {
        match self {
            Environment::Test => Some(3),
            Environment::Production => None,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Environment {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(AppError::ConfigError(format!(
                "Unknown environment '{s}': expected 'test' or 'production'"
            ))),
        }
    }
}

/// How a remote session is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Launch a new browser process owned by this run.
    Fresh,
    /// Reconnect to a browser already running with remote debugging.
    Attach,
}

/// What to do with a listing entry that lacks an expected element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractionPolicy {
    /// Log and drop the entry.
    #[default]
    Skip,
    /// Fail the whole extraction.
    Abort,
}

/// Whether records whose resolution already failed (`websiteLink: null`)
/// are attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    #[default]
    RetryUnresolved,
    SkipUnresolved,
}

/// Every wait used by the pipeline stages.
#[derive(Debug, Clone)]
pub struct Timings {
    /// Upper bound on waiting for the network to go quiet after navigating.
    pub network_idle: Duration,
    /// Pause after each scroll before measuring the page height.
    pub scroll_settle: Duration,
    /// How long to wait for the outbound link to open a new tab.
    pub new_tab_timeout: Duration,
    /// How long the captured tab may take to finish navigating.
    pub new_tab_navigation: Duration,
    /// How long to wait for a form field to appear.
    pub selector_timeout: Duration,
    /// Hard wait for inspection-service results after submitting.
    pub classify_settle: Duration,
    /// Navigation timeout for the replay form.
    pub replay_navigation: Duration,
    /// Pause after submitting the replay form.
    pub replay_submit_settle: Duration,
    /// Delay between polls of the generated-link field.
    pub replay_poll_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            network_idle: Duration::from_secs(30),
            scroll_settle: Duration::from_secs(3),
            new_tab_timeout: Duration::from_secs(5),
            new_tab_navigation: Duration::from_secs(10),
            selector_timeout: Duration::from_secs(30),
            classify_settle: Duration::from_secs(5),
            replay_navigation: Duration::from_secs(60),
            replay_submit_settle: Duration::from_secs(1),
            replay_poll_interval: Duration::from_secs(2),
        }
    }
}

impl Timings {
    /// All waits set to zero. Used by tests driving fake pages.
    pub fn instant() -> Self {
        Self {
            network_idle: Duration::ZERO,
            scroll_settle: Duration::ZERO,
            new_tab_timeout: Duration::ZERO,
            new_tab_navigation: Duration::ZERO,
            selector_timeout: Duration::ZERO,
            classify_settle: Duration::ZERO,
            replay_navigation: Duration::ZERO,
            replay_submit_settle: Duration::ZERO,
            replay_poll_interval: Duration::ZERO,
        }
    }
}

pub const DEFAULT_LISTING_BASE_URL: &str = "https://www.producthunt.com";
pub const DEFAULT_INSPECTION_URL: &str = "https://pro.builtwith.com/";
pub const DEFAULT_TRACKING_SUFFIX: &str = "/?ref=producthunt";
pub const DEFAULT_REPLAY_TARGET_URL: &str =
    "https://app.impact.com/secure/mediapartner/home/pview.ihtml";

/// Consecutive no-growth scrolls after which pagination stops.
pub const MAX_IDLE_SCROLLS: u32 = 10;

/// Polls of the generated-link field before giving up.
pub const REPLAY_POLL_ATTEMPTS: u32 = 10;

/// Immutable configuration shared by every pipeline stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub environment: Environment,
    pub max_scrolls: Option<u32>,
    pub headless: bool,
    pub extraction_policy: ExtractionPolicy,
    pub retry_policy: RetryPolicy,
    /// Origin the site-relative record links are joined onto.
    pub listing_base_url: String,
    pub inspection_url: String,
    pub tracking_suffix: String,
    pub replay_target_url: String,
    /// Mask automation fingerprints on every page opened.
    pub stealth: bool,
    pub timings: Timings,
}

impl PipelineConfig {
    pub fn for_environment(environment: Environment) -> Self {
        Self {
            environment,
            max_scrolls: environment.max_scrolls(),
            headless: environment.headless(),
            extraction_policy: ExtractionPolicy::default(),
            retry_policy: RetryPolicy::default(),
            listing_base_url: DEFAULT_LISTING_BASE_URL.to_string(),
            inspection_url: DEFAULT_INSPECTION_URL.to_string(),
            tracking_suffix: DEFAULT_TRACKING_SUFFIX.to_string(),
            replay_target_url: DEFAULT_REPLAY_TARGET_URL.to_string(),
            stealth: true,
            timings: Timings::default(),
        }
    }

    pub fn with_max_scrolls(mut self, max_scrolls: Option<u32>) -> Self {
        self.max_scrolls = max_scrolls;
        self
    }

    pub fn with_extraction_policy(mut self, policy: ExtractionPolicy) -> Self {
        self.extraction_policy = policy;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_listing_base_url(mut self, url: impl Into<String>) -> Self {
        self.listing_base_url = url.into();
        self
    }

    pub fn with_inspection_url(mut self, url: impl Into<String>) -> Self {
        self.inspection_url = url.into();
        self
    }

    pub fn with_tracking_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.tracking_suffix = suffix.into();
        self
    }

    pub fn with_replay_target_url(mut self, url: impl Into<String>) -> Self {
        self.replay_target_url = url.into();
        self
    }

    pub fn with_stealth(mut self, stealth: bool) -> Self {
        self.stealth = stealth;
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::for_environment(Environment::default())
    }
}
