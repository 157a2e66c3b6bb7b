use crate::config::PipelineConfig;
use crate::error::AppError;
use crate::models::{Record, Stage, StageOutput, StageReport, Technologies};
use crate::report::{PipelineEvent, PipelineReporter};
use crate::store::JsonStore;
use crate::traits::{BrowserPage, BrowserSession, TechnologyParser};

/// Search box on the inspection service's landing page.
pub const SEARCH_INPUT_SELECTOR: &str = ".form-control.mr-sm-1.topSB";

/// Classifies each resolved destination through the inspection service.
///
/// Runs against an attached session: the service only returns results to
/// a browser that is already signed in.
pub struct TechnologyClassifier<P: TechnologyParser> {
    parser: P,
    config: PipelineConfig,
}

impl<P: TechnologyParser> TechnologyClassifier<P> {
    pub fn new(parser: P, config: PipelineConfig) -> Self {
        Self { parser, config }
    }

    /// Only resolved, not yet classified records are classified.
    pub fn should_classify(&self, record: &Record) -> bool {
        record.resolved_link().is_some() && record.technologies.is_none()
    }

    /// Removes the listing site's tracking suffix from a destination.
    pub fn strip_tracking_suffix(&self, url: &str) -> String {
        let suffix = self.config.tracking_suffix.as_str();
        if suffix.is_empty() {
            return url.to_string();
        }
        url.replace(suffix, "")
    }

    /// Looks up `destination` on an open page and parses the result list.
    pub async fn classify<Pg: BrowserPage>(
        &self,
        page: &Pg,
        destination: &str,
    ) -> Result<Technologies, AppError> {
        let timings = &self.config.timings;

        page.goto(&self.config.inspection_url).await?;
        page.wait_for_selector(SEARCH_INPUT_SELECTOR, timings.selector_timeout)
            .await?;
        page.type_text(SEARCH_INPUT_SELECTOR, destination).await?;
        page.press_enter(SEARCH_INPUT_SELECTOR).await?;

        // The result page has no completion marker to wait on.
        tokio::time::sleep(timings.classify_settle).await;

        let html = page.content().await?;
        self.parser.parse(&html)
    }

    /// Classifies every eligible record in the listing document, persisting
    /// after each one. A failed lookup stores an empty classification.
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
            stage: Stage::Classify,
            total,
        });
        let mut report = StageReport::start(Stage::Classify, total);

        for index in 0..total {
            let Some(link) = records[index]
                .resolved_link()
                .filter(|_| self.should_classify(&records[index]))
                .map(|l| self.strip_tracking_suffix(l))
            else {
                report.record_skip();
                reporter.report(PipelineEvent::ItemSkipped {
                    stage: Stage::Classify,
                    index,
                    label: &records[index].title,
                    reason: if records[index].technologies.is_some() {
                        "already classified"
                    } else {
                        "missing website link"
                    },
                });
                continue;
            };

            reporter.report(PipelineEvent::ItemStarted {
                stage: Stage::Classify,
                index,
                total,
                label: &link,
            });

            let technologies = match self.classify_link(session, &link).await {
                Ok(technologies) => {
                    reporter.report(PipelineEvent::ItemSucceeded {
                        stage: Stage::Classify,
                        index,
                        label: &records[index].title,
                        detail: &format!(
                            "{} frameworks, {} cms, {} javascript libraries",
                            technologies.frameworks.len(),
                            technologies.cms.len(),
                            technologies.javascript_libraries.len()
                        ),
                    });
                    report.record_success();
                    technologies
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    reporter.report(PipelineEvent::ItemFailed {
                        stage: Stage::Classify,
                        index,
                        label: &link,
                        error: &e.to_string(),
                    });
                    report.record_failure();
                    Technologies::default()
                }
            };

            records[index].technologies = Some(technologies);
            store.save(&records)?;
        }

        let report = report.finish();
        reporter.report(PipelineEvent::StageFinished { report: &report });
        Ok(StageOutput {
            items: records,
            report,
        })
    }

    async fn classify_link<S: BrowserSession>(
        &self,
        session: &S,
        link: &str,
    ) -> Result<Technologies, AppError> {
        let page = session.new_page().await?;
        let result = self.classify(&page, link).await;
        if let Err(e) = page.close().await {
            tracing::debug!(error = %e, "Failed to close inspection tab");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timings;
    use crate::testutil::*;

    fn classifier(parser: MockParser) -> TechnologyClassifier<MockParser> {
        TechnologyClassifier::new(
            parser,
            PipelineConfig::default()
                .with_inspection_url("https://inspect.example/")
                .with_timings(Timings::instant()),
        )
    }

    fn resolved(title: &str, link: Option<&str>) -> Record {
        let mut record = make_test_record(title);
        record.website_link = Some(link.map(str::to_string));
        record
    }

    fn search_page() -> MockPage {
        MockPage::new().with_element(SEARCH_INPUT_SELECTOR)
    }

    #[test]
    fn strips_tracking_suffix() {
        let c = classifier(MockParser::with_responses(vec![]));
        assert_eq!(
            c.strip_tracking_suffix("https://acme.dev/?ref=producthunt"),
            "https://acme.dev"
        );
        assert_eq!(c.strip_tracking_suffix("https://acme.dev/app"), "https://acme.dev/app");
    }

    #[test]
    fn blank_link_is_not_classified() {
        let c = classifier(MockParser::with_responses(vec![]));
        assert!(!c.should_classify(&resolved("Blank", Some(""))));
        assert!(!c.should_classify(&resolved("Spaces", Some("  "))));
        assert!(c.should_classify(&resolved("Acme", Some("https://acme.dev"))));
    }

    #[tokio::test]
    async fn classify_types_destination_and_submits() {
        let expected = Technologies {
            frameworks: vec!["Next.js".into()],
            cms: vec![],
            javascript_libraries: vec!["React".into()],
        };
        let page = search_page();

        let technologies = classifier(MockParser::new(expected.clone()))
            .classify(&page, "https://acme.dev")
            .await
            .unwrap();

        assert_eq!(technologies, expected);
        assert_eq!(page.current_url().as_deref(), Some("https://inspect.example/"));
        assert_eq!(
            page.typed(SEARCH_INPUT_SELECTOR).as_deref(),
            Some("https://acme.dev")
        );
        assert!(page.clicks().contains(&format!("enter:{SEARCH_INPUT_SELECTOR}")));
    }

    #[tokio::test]
    async fn missing_search_field_is_an_error() {
        let err = classifier(MockParser::with_responses(vec![]))
            .classify(&MockPage::new(), "https://acme.dev")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
    }

    #[tokio::test]
    async fn run_keeps_schema_additive() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("data.json"));
        let mut classified = resolved("Classified", Some("https://old.dev"));
        classified.technologies = Some(Technologies {
            frameworks: vec!["Rails".into()],
            ..Default::default()
        });
        store
            .save(&[
                resolved("Alpha", Some("https://alpha.dev/?ref=producthunt")),
                make_test_record("Pending"),
                resolved("Unresolved", None),
                classified,
                resolved("Broken", Some("https://broken.dev")),
            ])
            .unwrap();

        let session = MockSession::with_pages(vec![
            search_page(),
            MockPage::new().with_goto_error("net::ERR_CONNECTION_RESET"),
        ]);
        let parser = MockParser::new(Technologies {
            frameworks: vec!["Next.js".into()],
            ..Default::default()
        });
        let reporter = MockReporter::new();

        let output = classifier(parser).run(&session, &store, &reporter).await.unwrap();
        let saved = store.load().unwrap();
        assert_eq!(saved, output.items);

        for record in &saved {
            assert_eq!(
                record.technologies.is_some(),
                record.resolved_link().is_some(),
                "{}",
                record.title
            );
        }
        assert_eq!(saved[0].technologies.as_ref().unwrap().frameworks, vec!["Next.js"]);
        assert_eq!(saved[3].technologies.as_ref().unwrap().frameworks, vec!["Rails"]);
        assert_eq!(saved[4].technologies, Some(Technologies::default()));
        assert_eq!(
            session.opened.lock().unwrap()[0].typed(SEARCH_INPUT_SELECTOR).as_deref(),
            Some("https://alpha.dev")
        );
        assert_eq!(output.report.succeeded, 1);
        assert_eq!(output.report.failed, 1);
        assert_eq!(output.report.skipped, 3);
        assert_eq!(reporter.count("ItemSkipped"), 3);
    }

    #[tokio::test]
    async fn failure_sentinel_serializes_as_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("data.json"));
        store.save(&[resolved("Broken", Some("https://broken.dev"))]).unwrap();
        let session = MockSession::with_page(MockPage::new());

        classifier(MockParser::with_responses(vec![]))
            .run(&session, &store, &MockReporter::new())
            .await
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(
            raw[0]["technologies"],
            serde_json::json!({"frameworks": [], "cms": [], "javascriptLibraries": []})
        );
    }
}
