pub mod classifier;
pub mod config;
pub mod error;
pub mod listing;
pub mod models;
pub mod replay;
pub mod report;
pub mod resolver;
pub mod store;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use classifier::TechnologyClassifier;
pub use config::{Environment, ExtractionPolicy, PipelineConfig, RetryPolicy, SessionMode, Timings};
pub use error::AppError;
pub use listing::{ListingScraper, ScrollOutcome};
pub use models::{
    Record, ReplayEntry, ReplayFailure, ReplayResult, Stage, StageOutput, StageReport,
    Technologies,
};
pub use replay::ReplayPipeline;
pub use report::{PipelineEvent, PipelineReporter, TracingReporter};
pub use resolver::LinkResolver;
pub use store::JsonStore;
pub use traits::{BrowserPage, BrowserSession, RecordExtractor, SessionProvider, TechnologyParser};
