//! JavaScript evaluated inside remote pages, and decoding of its results.
//!
//! Values cross the DevTools boundary as JSON text: CDP reports a JS `null`
//! as a missing value rather than as JSON `null`, so every expression is
//! wrapped in `JSON.stringify` and decoded on this side.

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use stackhunt_core::error::AppError;

/// Quiet period after which the network counts as idle.
pub const NETWORK_IDLE_QUIET: Duration = Duration::from_millis(500);

/// Installed before any document script runs. Hides the automation
/// markers bot-detection checks first.
pub const STEALTH_SCRIPT: &str = r#"
(() => {
  Object.defineProperty(navigator, 'webdriver', { get: () => undefined, configurable: true });
  Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'], configurable: true });
  Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5], configurable: true });

  window.chrome = window.chrome || {};
  window.chrome.runtime = window.chrome.runtime || {
    connect: () => ({ onDisconnect: { addListener() {} }, postMessage() {} }),
    sendMessage() {},
    onMessage: { addListener() {}, removeListener() {} },
  };

  const query = window.navigator.permissions && window.navigator.permissions.query;
  if (query) {
    window.navigator.permissions.query = (parameters) =>
      parameters.name === 'notifications'
        ? Promise.resolve({ state: Notification.permission })
        : query.call(window.navigator.permissions, parameters);
  }

  const getParameter = WebGLRenderingContext.prototype.getParameter;
  WebGLRenderingContext.prototype.getParameter = function (parameter) {
    if (parameter === 37445) return 'Intel Inc.';
    if (parameter === 37446) return 'Intel Iris OpenGL Engine';
    return getParameter.call(this, parameter);
  };
})();
"#;

/// Wraps a synchronous expression so it evaluates to JSON text.
pub fn json_expression(expression: &str) -> String {
    format!("JSON.stringify((() => {{ const v = ({expression}); return v === undefined ? null : v; }})())")
}

/// Decodes the JSON text produced by [`json_expression`].
pub fn decode_json<T: DeserializeOwned>(raw: &str) -> Result<T, AppError> {
    Ok(serde_json::from_str(raw)?)
}

/// Outcome of [`network_idle_script`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleReport {
    pub idle: bool,
    pub ready_state: String,
    pub resource_count: u64,
    pub waited_ms: u64,
}

/// Resolves once the document is complete and no new resource has been
/// fetched for [`NETWORK_IDLE_QUIET`], or once `timeout` has passed.
/// Evaluates to an [`IdleReport`] as JSON text.
pub fn network_idle_script(timeout: Duration) -> String {
    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    let quiet_ms = NETWORK_IDLE_QUIET.as_millis();
    format!(
        r#"(async () => {{
  const timeoutMs = {timeout_ms};
  const quietMs = {quiet_ms};
  const interval = 100;
  const count = () => {{
    try {{ return performance.getEntriesByType('resource').length; }} catch (_) {{ return 0; }}
  }};
  const start = Date.now();
  let last = count();
  let quiet = 0;
  while (Date.now() - start < timeoutMs) {{
    await new Promise((r) => setTimeout(r, interval));
    const current = count();
    if (document.readyState === 'complete' && current === last) {{
      quiet += interval;
      if (quiet >= quietMs) {{
        return JSON.stringify({{ idle: true, readyState: document.readyState, resourceCount: current, waitedMs: Date.now() - start }});
      }}
    }} else {{
      quiet = 0;
    }}
    last = current;
  }}
  return JSON.stringify({{ idle: false, readyState: document.readyState, resourceCount: last, waitedMs: Date.now() - start }});
}})()"#
    )
}
