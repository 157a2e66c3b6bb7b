//! Regenerates tracking links by replaying origin URLs through a web form.
//!
//! Results go to one store and failures to another; entries whose `old`
//! link is already in the output store are never processed again, so a run
//! can be repeated until the failure store stops growing.

use std::collections::HashSet;

use crate::config::{PipelineConfig, REPLAY_POLL_ATTEMPTS};
use crate::error::AppError;
use crate::models::{ReplayEntry, ReplayFailure, ReplayResult, Stage, StageOutput, StageReport};
use crate::report::{PipelineEvent, PipelineReporter};
use crate::store::JsonStore;
use crate::traits::{BrowserPage, BrowserSession};

pub const LANDING_PAGE_INPUT_SELECTOR: &str = "input[placeholder='Landing Page']";
pub const CREATE_BUTTON_SELECTOR: &str = "button.button";
pub const GENERATED_LINK_SELECTOR: &str = "input.inputNotEditing[readonly]";

pub struct ReplayPipeline {
    config: PipelineConfig,
}

impl ReplayPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Entries whose `old` link is not yet in `output`, in source order.
    ///
    /// Creates the output document if it does not exist.
    pub fn pending(
        &self,
        entries: &[ReplayEntry],
        output: &JsonStore<ReplayResult>,
    ) -> Result<Vec<ReplayEntry>, AppError> {
        if output.ensure_exists()? {
            tracing::info!(path = %output.path().display(), "Created empty output document");
        }
        let existing = output.load_or_default()?;
        let done: HashSet<&str> = existing.iter().map(|r| r.old.as_str()).collect();

        let pending: Vec<ReplayEntry> = entries
            .iter()
            .filter(|e| !done.contains(e.old.as_str()))
            .cloned()
            .collect();

        tracing::info!(
            total = entries.len(),
            existing = existing.len(),
            pending = pending.len(),
            "Computed replay work set"
        );
        Ok(pending)
    }

    /// Generates a new link for every pending entry.
    ///
    /// Each success is appended to `output` and each failure to `failures`
    /// as soon as it happens. Returns the results produced by this run.
    pub async fn run<S, R>(
        &self,
        session: &S,
        entries: &[ReplayEntry],
        output: &JsonStore<ReplayResult>,
        failures: &JsonStore<ReplayFailure>,
        reporter: &R,
    ) -> Result<StageOutput<ReplayResult>, AppError>
    where
        S: BrowserSession,
        R: PipelineReporter,
    {
        let pending = self.pending(entries, output)?;
        let total = pending.len();
        reporter.report(PipelineEvent::StageStarted {
            stage: Stage::Replay,
            total,
        });
        let mut report = StageReport::start(Stage::Replay, total);
        report.skipped = entries.len() - total;
        let mut results = Vec::new();

        for (index, entry) in pending.iter().enumerate() {
            reporter.report(PipelineEvent::ItemStarted {
                stage: Stage::Replay,
                index,
                total,
                label: &entry.old,
            });

            match self.replay_entry(session, entry).await {
                Ok(new) => {
                    reporter.report(PipelineEvent::ItemSucceeded {
                        stage: Stage::Replay,
                        index,
                        label: &entry.old,
                        detail: &format!("Confirmed final value: {new}"),
                    });
                    let result = ReplayResult {
                        old: entry.old.clone(),
                        new,
                    };
                    output.append(result.clone())?;
                    results.push(result);
                    report.record_success();
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    let error = e.to_string();
                    reporter.report(PipelineEvent::ItemFailed {
                        stage: Stage::Replay,
                        index,
                        label: &entry.old,
                        error: &error,
                    });
                    failures.append(ReplayFailure {
                        old: entry.old.clone(),
                        origin: entry.origin.clone(),
                        error,
                    })?;
                    report.record_failure();
                }
            }
        }

        let report = report.finish();
        reporter.report(PipelineEvent::StageFinished { report: &report });
        Ok(StageOutput {
            items: results,
            report,
        })
    }

    async fn replay_entry<S: BrowserSession>(
        &self,
        session: &S,
        entry: &ReplayEntry,
    ) -> Result<String, AppError> {
        let page = session.new_page().await?;
        let result = self.generate(&page, &entry.origin).await;
        if let Err(e) = page.close().await {
            tracing::debug!(error = %e, "Failed to close form tab");
        }
        result
    }

    /// Drives the form on an open page and returns the generated link.
    pub async fn generate<P: BrowserPage>(&self, page: &P, origin: &str) -> Result<String, AppError> {
        let timings = &self.config.timings;

        tracing::debug!("Navigating to form");
        tokio::time::timeout(
            timings.replay_navigation,
            page.goto(&self.config.replay_target_url),
        )
        .await
        .map_err(|_| AppError::Timeout(timings.replay_navigation.as_millis() as u64))??;

        page.wait_for_selector(LANDING_PAGE_INPUT_SELECTOR, timings.selector_timeout)
            .await?;
        page.type_text(LANDING_PAGE_INPUT_SELECTOR, origin).await?;

        let typed = page
            .input_value(LANDING_PAGE_INPUT_SELECTOR)
            .await?
            .unwrap_or_default();
        if typed != origin {
            return Err(AppError::VerificationError {
                expected: origin.to_string(),
                actual: typed,
            });
        }

        tracing::debug!("Clicking create button");
        if !page.click(CREATE_BUTTON_SELECTOR).await? {
            return Err(AppError::BrowserError(format!(
                "No element matches {CREATE_BUTTON_SELECTOR}"
            )));
        }
        tokio::time::sleep(timings.replay_submit_settle).await;

        let generated = self.poll_generated(page).await?;
        Ok(with_scheme(&generated))
    }

    async fn poll_generated<P: BrowserPage>(&self, page: &P) -> Result<String, AppError> {
        for attempt in 1..=REPLAY_POLL_ATTEMPTS {
            match page.input_value(GENERATED_LINK_SELECTOR).await {
                Ok(Some(value)) if !value.trim().is_empty() => return Ok(value.trim().to_string()),
                Ok(_) => tracing::debug!("Retry {attempt}/{REPLAY_POLL_ATTEMPTS}: no value yet"),
                Err(e) => {
                    tracing::debug!(error = %e, "Retry {attempt}/{REPLAY_POLL_ATTEMPTS}: element not found");
                }
            }
            if attempt < REPLAY_POLL_ATTEMPTS {
                tokio::time::sleep(self.config.timings.replay_poll_interval).await;
            }
        }
        Err(AppError::GenerationTimeout {
            attempts: REPLAY_POLL_ATTEMPTS,
        })
    }
}

/// The form shows the generated link without a scheme.
fn with_scheme(value: &str) -> String {
    if value.starts_with("https://") || value.starts_with("http://") {
        value.to_string()
    } else {
        format!("https://{value}")
    }
}
