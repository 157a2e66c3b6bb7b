use thiserror::Error;

/// Operator guidance printed when the debugging endpoint cannot be reached.
pub const REMOTE_DEBUGGING_HELP: &str = "\
Please make sure Chrome is running with remote debugging enabled:
  Windows: \"C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe\" --remote-debugging-port=9222
  Mac:     /Applications/Google\\ Chrome.app/Contents/MacOS/Google\\ Chrome --remote-debugging-port=9222
  Linux:   google-chrome --remote-debugging-port=9222";

/// Operator guidance printed when no local browser could be started.
pub const BROWSER_LAUNCH_HELP: &str = "\
Could not start a local Chrome/Chromium:
  Install Google Chrome or Chromium, or point CHROME_BIN at the browser executable.";

/// Application-wide error types for stackhunt.
#[derive(Error, Debug)]
pub enum AppError {
    /// The remote browser session could not be established.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// A local browser process could not be started.
    #[error("Launch error: {0}")]
    LaunchError(String),

    /// A page failed to load or settle.
    #[error("Navigation error: {0}")]
    NavigationError(String),

    /// A bounded wait elapsed.
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// A typed form value did not echo back unchanged.
    #[error("Verification failed: expected {expected:?}, input holds {actual:?}")]
    VerificationError { expected: String, actual: String },

    /// The generated value never appeared in the output field.
    #[error("Generation timed out: no value after {attempts} attempts")]
    GenerationTimeout { attempts: u32 },

    /// A listing entry is missing an expected element.
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// A DevTools command failed.
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// Reading or writing a JSON document failed.
    #[error("Store error: {0}")]
    StoreError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// Returns true if the error must terminate the whole run rather than
    /// just the item being processed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::ConnectionError(_)
                | AppError::LaunchError(_)
                | AppError::StoreError(_)
                | AppError::ConfigError(_)
        )
    }

    /// Remediation text for the operator, if the error has any.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            AppError::ConnectionError(_) => Some(REMOTE_DEBUGGING_HELP),
            AppError::LaunchError(_) => Some(BROWSER_LAUNCH_HELP),
            _ => None,
        }
    }
}
