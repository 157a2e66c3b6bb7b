use crate::config::{ExtractionPolicy, MAX_IDLE_SCROLLS, PipelineConfig};
use crate::error::AppError;
use crate::models::{Record, Stage, StageOutput, StageReport};
use crate::report::{PipelineEvent, PipelineReporter};
use crate::store::JsonStore;
use crate::traits::{BrowserPage, BrowserSession, RecordExtractor};

/// Result of the scroll-to-load loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollOutcome {
    /// Scroll actions performed.
    pub attempts: u32,
    /// Scrolls after which the page grew.
    pub scroll_count: u32,
    pub final_height: u64,
}

/// Loads a lazily-paginated listing by scrolling, then extracts one
/// [`Record`] per entry.
pub struct ListingScraper<E: RecordExtractor> {
    extractor: E,
    config: PipelineConfig,
}

impl<E: RecordExtractor> ListingScraper<E> {
    pub fn new(extractor: E, config: PipelineConfig) -> Self {
        Self { extractor, config }
    }

    /// Scrapes `url` and replaces the listing document with the result.
    ///
    /// A page that fails to load or extract yields an empty result and
    /// leaves the document untouched; only store failures propagate.
    pub async fn scrape<S, R>(
        &self,
        session: &S,
        url: &str,
        store: &JsonStore<Record>,
        reporter: &R,
    ) -> Result<StageOutput<Record>, AppError>
    where
        S: BrowserSession,
        R: PipelineReporter,
    {
        reporter.report(PipelineEvent::StageStarted {
            stage: Stage::Scrape,
            total: 1,
        });
        let mut report = StageReport::start(Stage::Scrape, 1);

        let records = match self.scrape_page(session, url).await {
            Ok(records) => {
                store.save(&records)?;
                report.record_success();
                reporter.report(PipelineEvent::ItemSucceeded {
                    stage: Stage::Scrape,
                    index: 0,
                    label: url,
                    detail: &format!(
                        "Saved {} records to {}",
                        records.len(),
                        store.path().display()
                    ),
                });
                records
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                report.record_failure();
                reporter.report(PipelineEvent::ItemFailed {
                    stage: Stage::Scrape,
                    index: 0,
                    label: url,
                    error: &e.to_string(),
                });
                Vec::new()
            }
        };

        let report = report.finish();
        reporter.report(PipelineEvent::StageFinished { report: &report });
        Ok(StageOutput {
            items: records,
            report,
        })
    }

    async fn scrape_page<S: BrowserSession>(
        &self,
        session: &S,
        url: &str,
    ) -> Result<Vec<Record>, AppError> {
        let page = session.new_page().await?;
        let result = async {
            tracing::info!(%url, "Opening listing");
            page.goto(url).await?;
            self.paginate(&page).await?;
            self.extract(&page).await
        }
        .await;
        if let Err(e) = page.close().await {
            tracing::debug!(error = %e, "Failed to close listing tab");
        }
        result
    }

    /// Scrolls until the page stops growing or the scroll budget is spent.
    ///
    /// Growth resets the idle counter; [`MAX_IDLE_SCROLLS`] consecutive
    /// scrolls without growth end the loop.
    pub async fn paginate<P: BrowserPage>(&self, page: &P) -> Result<ScrollOutcome, AppError> {
        let mut previous_height = 0;
        let mut scroll_count = 0;
        let mut idle = 0;
        let mut attempts = 0;

        tracing::info!(max_scrolls = ?self.config.max_scrolls, "Starting scroll process");

        loop {
            page.scroll_to_bottom().await?;
            attempts += 1;
            tokio::time::sleep(self.config.timings.scroll_settle).await;

            let height = page.content_height().await?;
            if height > previous_height {
                tracing::info!(
                    scroll = scroll_count + 1,
                    "Height changed from {previous_height}px to {height}px"
                );
                previous_height = height;
                scroll_count += 1;
                idle = 0;

                if self.config.max_scrolls.is_some_and(|max| scroll_count >= max) {
                    tracing::info!(scroll_count, "Reached maximum number of scrolls");
                    break;
                }
            } else {
                idle += 1;
                tracing::debug!("Scroll attempt {idle}/{MAX_IDLE_SCROLLS}: no height change");
                if idle >= MAX_IDLE_SCROLLS {
                    break;
                }
            }
        }

        tracing::info!(scroll_count, attempts, "Scrolling finished");
        Ok(ScrollOutcome {
            attempts,
            scroll_count,
            final_height: previous_height,
        })
    }

    /// Extracts records from the page as currently rendered, applying the
    /// configured [`ExtractionPolicy`] to malformed entries.
    pub async fn extract<P: BrowserPage>(&self, page: &P) -> Result<Vec<Record>, AppError> {
        let html = page.content().await?;
        let mut records = Vec::new();

        for (index, entry) in self.extractor.extract(&html).into_iter().enumerate() {
            match entry {
                Ok(record) => records.push(record),
                Err(e) => match self.config.extraction_policy {
                    ExtractionPolicy::Abort => return Err(e),
                    ExtractionPolicy::Skip => {
                        tracing::warn!(entry = index + 1, error = %e, "Skipping malformed entry");
                    }
                },
            }
        }

        tracing::info!(count = records.len(), "Extracted records");
        Ok(records)
    }
}
