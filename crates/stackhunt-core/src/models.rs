use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One listing entry, progressively enriched by the resolver and the
/// classifier.
///
/// `website_link` is tri-state: `None` means resolution was never attempted,
/// `Some(None)` means it was attempted and failed (serialized as `null`),
/// `Some(Some(url))` is the resolved destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub comment: String,
    pub link: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_or_null"
    )]
    pub website_link: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "technologies_any_shape"
    )]
    pub technologies: Option<Technologies>,
}

impl Record {
    /// The resolved destination, if resolution succeeded. A blank link left
    /// by earlier runs counts as unresolved.
    pub fn resolved_link(&self) -> Option<&str> {
        self.website_link
            .as_ref()
            .and_then(|l| l.as_deref())
            .filter(|l| !l.trim().is_empty())
    }

    /// True if resolution was attempted and produced nothing.
    pub fn is_unresolved(&self) -> bool {
        self.website_link.is_some() && self.resolved_link().is_none()
    }
}

/// Technology buckets reported by the inspection service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Technologies {
    #[serde(default)]
    pub frameworks: Vec<String>,
    #[serde(default)]
    pub cms: Vec<String>,
    #[serde(default)]
    pub javascript_libraries: Vec<String>,
}

impl Technologies {
    pub fn is_empty(&self) -> bool {
        self.frameworks.is_empty() && self.cms.is_empty() && self.javascript_libraries.is_empty()
    }
}

/// Maps a present key to `Some(..)` so that `null` survives as `Some(None)`.
fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TechnologiesShape {
    Buckets(Technologies),
    // Earlier runs wrote `[]` when classification failed.
    Legacy(Vec<serde_json::Value>),
}

fn technologies_any_shape<'de, D>(deserializer: D) -> Result<Option<Technologies>, D::Error>
where
    D: Deserializer<'de>,
{
    let shape = Option::<TechnologiesShape>::deserialize(deserializer)?;
    Ok(shape.map(|s| match s {
        TechnologiesShape::Buckets(t) => t,
        TechnologiesShape::Legacy(_) => Technologies::default(),
    }))
}

/// Input pair for the replay pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayEntry {
    pub old: String,
    pub origin: String,
}

/// A regenerated tracking link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayResult {
    pub old: String,
    pub new: String,
}

/// A replay entry that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayFailure {
    pub old: String,
    pub origin: String,
    pub error: String,
}

/// Pipeline stage names, used in reports and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Scrape,
    Resolve,
    Classify,
    Replay,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scrape => "scrape",
            Stage::Resolve => "resolve",
            Stage::Classify => "classify",
            Stage::Replay => "replay",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Counters for one stage run.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageReport {
    pub fn start(stage: Stage, total: usize) -> Self {
        Self {
            stage,
            total,
            processed: 0,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record_success(&mut self) {
        self.processed += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self) {
        self.processed += 1;
        self.failed += 1;
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }
}

/// What a stage run hands back: its accumulated items and counters.
#[derive(Debug, Clone)]
pub struct StageOutput<T> {
    pub items: Vec<T>,
    pub report: StageReport,
}
