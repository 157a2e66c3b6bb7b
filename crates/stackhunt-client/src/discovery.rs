use std::time::Duration;

use serde::Deserialize;
use stackhunt_core::error::AppError;

/// Default port Chrome listens on with `--remote-debugging-port`.
pub const DEFAULT_DEBUG_PORT: u16 = 9222;

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "Browser", default)]
    browser: Option<String>,
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: Option<String>,
}

/// The HTTP side of a browser's remote-debugging interface.
///
/// Attached sessions start here: `/json/version` names the WebSocket the
/// CDP connection is opened on.
#[derive(Clone)]
pub struct DebuggerEndpoint {
    client: reqwest::Client,
    host: String,
    port: u16,
}

impl DebuggerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .no_proxy()
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            host: host.into(),
            port,
        })
    }

    pub fn version_url(&self) -> String {
        format!("http://{}:{}/json/version", self.host, self.port)
    }

    /// Looks up the browser-level WebSocket debugger URL.
    ///
    /// Any failure here means no debuggable browser is listening, which is
    /// reported as [`AppError::ConnectionError`].
    pub async fn websocket_url(&self) -> Result<String, AppError> {
        let url = self.version_url();
        let refused =
            |e: &dyn std::fmt::Display| AppError::ConnectionError(format!("{url}: {e}"));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| refused(&e))?;
        if !response.status().is_success() {
            return Err(refused(&format!("HTTP {}", response.status())));
        }
        let body = response.text().await.map_err(|e| refused(&e))?;

        let ws_url = parse_version_info(&body)?;
        tracing::debug!(%ws_url, "Found remote debugging endpoint");
        Ok(ws_url)
    }
}

/// Extracts `webSocketDebuggerUrl` from a `/json/version` body.
pub fn parse_version_info(body: &str) -> Result<String, AppError> {
    let info: VersionInfo = serde_json::from_str(body)
        .map_err(|e| AppError::ConnectionError(format!("Unexpected /json/version payload: {e}")))?;
    if let Some(browser) = &info.browser {
        tracing::info!(%browser, "Remote browser reachable");
    }
    info.web_socket_debugger_url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| {
            AppError::ConnectionError("/json/version has no webSocketDebuggerUrl".to_string())
        })
}
