/// Smoke-test for `CdpSessionProvider`.
///
/// Launches a headless Chromium, loads <https://example.com>, and exercises
/// the page operations the pipeline stages rely on.
///
/// Run with:
///   cargo run -p stackhunt-client --example browser_smoke --features browser
use std::time::Duration;

use stackhunt_client::{CdpSessionProvider, DebuggerEndpoint};
use stackhunt_core::config::{Environment, PipelineConfig, SessionMode};
use stackhunt_core::traits::{BrowserPage, BrowserSession, SessionProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let endpoint = DebuggerEndpoint::new("localhost", 9222)?;
    let config = PipelineConfig::for_environment(Environment::Production);
    let provider = CdpSessionProvider::new(&config, endpoint);

    println!("Launching headless browser…");
    let session = provider.connect(SessionMode::Fresh).await?;
    let page = session.new_page().await?;

    let url = "https://example.com";
    println!("Loading {url} …");
    page.goto(url).await?;
    page.wait_for_selector("h1", Duration::from_secs(10)).await?;

    let html = page.content().await?;
    assert!(
        html.contains("Example Domain"),
        "Expected heading not found in rendered HTML"
    );

    let height = page.content_height().await?;
    page.scroll_to_bottom().await?;
    let href = page.attribute("a", "href").await?;
    println!("Height {height}px, first link {href:?}");
    assert_eq!(page.attribute("#missing", "href").await?, None);
    assert_eq!(page.input_value("input").await?, None);

    page.close().await?;
    session.shutdown().await;
    println!("OK: got {} bytes of rendered HTML", html.len());
    Ok(())
}
