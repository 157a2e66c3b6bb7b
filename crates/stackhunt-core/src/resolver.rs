use url::Url;

use crate::config::{PipelineConfig, RetryPolicy};
use crate::error::AppError;
use crate::models::{Record, Stage, StageOutput, StageReport};
use crate::report::{PipelineEvent, PipelineReporter};
use crate::store::JsonStore;
use crate::traits::{BrowserPage, BrowserSession};

/// The "Visit website" button on a detail page. Clicking it opens the
/// destination in a new tab.
pub const VISIT_TRIGGER_SELECTOR: &str = ".flex.h-11.flex-row.items-center.gap-2.rounded-full.border-2.border-gray-200.bg-white.px-4.text-16.font-semibold.text-gray-700";

/// Older detail-page markup exposing the destination as a plain link.
pub const VISIT_BUTTON_SELECTOR: &str = r#"[data-test="visit-website-button"]"#;

/// Resolves each record's outbound destination from its detail page.
pub struct LinkResolver {
    config: PipelineConfig,
}

impl LinkResolver {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Whether `record` still needs resolving under the configured
    /// [`RetryPolicy`].
    pub fn should_resolve(&self, record: &Record) -> bool {
        match self.config.retry_policy {
            RetryPolicy::RetryUnresolved => record.resolved_link().is_none(),
            RetryPolicy::SkipUnresolved => record.website_link.is_none(),
        }
    }

    /// Absolute URL of a record's detail page.
    pub fn detail_url(&self, record: &Record) -> Result<String, AppError> {
        self.absolutize(&record.link)
    }

    /// Resolves the destination from an already loaded detail page.
    ///
    /// Tries new-tab interception first and falls back to reading the link
    /// attribute directly. Never fails; `None` means both paths came up
    /// empty.
    pub async fn resolve<P: BrowserPage>(&self, page: &P) -> Option<String> {
        match self.capture_new_tab(page).await {
            Ok(Some(url)) => return Some(url),
            Ok(None) => tracing::warn!("No new tab observed for outbound link"),
            Err(e) => tracing::warn!(error = %e, "Error capturing website URL from new tab"),
        }
        self.direct_href(page).await
    }

    async fn capture_new_tab<P: BrowserPage>(&self, page: &P) -> Result<Option<String>, AppError> {
        let timings = &self.config.timings;
        let Some(tab) = page
            .click_and_capture_tab(VISIT_TRIGGER_SELECTOR, timings.new_tab_timeout)
            .await?
        else {
            return Ok(None);
        };

        // A tab that never reaches idle still carries a usable URL.
        if let Err(e) = tab.wait_for_navigation(timings.new_tab_navigation).await {
            tracing::debug!(error = %e, "New tab did not settle");
        }
        let url = tab.url().await;
        if let Err(e) = tab.close().await {
            tracing::debug!(error = %e, "Failed to close captured tab");
        }

        Ok(url?.filter(|u| !u.is_empty() && u != "about:blank"))
    }

    async fn direct_href<P: BrowserPage>(&self, page: &P) -> Option<String> {
        for selector in [VISIT_BUTTON_SELECTOR, VISIT_TRIGGER_SELECTOR] {
            match page.attribute(selector, "href").await {
                Ok(Some(href)) if !href.trim().is_empty() => match self.absolutize(href.trim()) {
                    Ok(url) => return Some(url),
                    Err(e) => tracing::debug!(%href, error = %e, "Unusable href"),
                },
                Ok(_) => {}
                Err(e) => tracing::debug!(%selector, error = %e, "Failed to read href"),
            }
        }
        None
    }

    fn absolutize(&self, href: &str) -> Result<String, AppError> {
        let base = Url::parse(&self.config.listing_base_url).map_err(|e| {
            AppError::ConfigError(format!(
                "Invalid listing base URL '{}': {e}",
                self.config.listing_base_url
            ))
        })?;
        base.join(href)
            .map(String::from)
            .map_err(|e| AppError::NavigationError(format!("Invalid link '{href}': {e}")))
    }

    /// Resolves every pending record in the listing document, persisting
    /// after each one.
    ///
    /// A record whose resolution fails is marked `websiteLink: null`.
    pub async fn run<S, R>(
        &self,
        session: &S,
        store: &JsonStore<Record>,
        reporter: &R,
    ) -> Result<StageOutput<Record>, AppError>
    where
        S: BrowserSession,
        R: PipelineReporter,
    {
        let mut records = store.load()?;
        let total = records.len();
        reporter.report(PipelineEvent::StageStarted {
            stage: Stage::Resolve,
            total,
        });
        let mut report = StageReport::start(Stage::Resolve, total);

        for index in 0..total {
            if !self.should_resolve(&records[index]) {
                report.record_skip();
                reporter.report(PipelineEvent::ItemSkipped {
                    stage: Stage::Resolve,
                    index,
                    label: &records[index].title,
                    reason: if records[index].is_unresolved() {
                        "previously unresolved"
                    } else {
                        "already resolved"
                    },
                });
                continue;
            }

            reporter.report(PipelineEvent::ItemStarted {
                stage: Stage::Resolve,
                index,
                total,
                label: &records[index].title,
            });

            match self.resolve_record(session, &records[index]).await {
                Ok(Some(link)) => {
                    reporter.report(PipelineEvent::ItemSucceeded {
                        stage: Stage::Resolve,
                        index,
                        label: &records[index].title,
                        detail: &format!("Website link found: {link}"),
                    });
                    records[index].website_link = Some(Some(link));
                    report.record_success();
                }
                Ok(None) => {
                    reporter.report(PipelineEvent::ItemFailed {
                        stage: Stage::Resolve,
                        index,
                        label: &records[index].title,
                        error: "No link found",
                    });
                    records[index].website_link = Some(None);
                    report.record_failure();
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    reporter.report(PipelineEvent::ItemFailed {
                        stage: Stage::Resolve,
                        index,
                        label: &records[index].title,
                        error: &e.to_string(),
                    });
                    records[index].website_link = Some(None);
                    report.record_failure();
                }
            }

            store.save(&records)?;
        }

        let report = report.finish();
        reporter.report(PipelineEvent::StageFinished { report: &report });
        Ok(StageOutput {
            items: records,
            report,
        })
    }

    async fn resolve_record<S: BrowserSession>(
        &self,
        session: &S,
        record: &Record,
    ) -> Result<Option<String>, AppError> {
        let url = self.detail_url(record)?;
        let page = session.new_page().await?;
        let result = async {
            tracing::info!(%url, "Visiting");
            page.goto(&url).await?;
            Ok::<_, AppError>(self.resolve(&page).await)
        }
        .await;
        if let Err(e) = page.close().await {
            tracing::debug!(error = %e, "Failed to close detail tab");
        }
        result
    }
}
