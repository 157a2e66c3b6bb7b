use crate::models::{Stage, StageReport};

/// Progress events emitted by the pipeline stages.
#[derive(Debug, Clone)]
pub enum PipelineEvent<'a> {
    StageStarted {
        stage: Stage,
        total: usize,
    },
    ItemStarted {
        stage: Stage,
        index: usize,
        total: usize,
        label: &'a str,
    },
    ItemSkipped {
        stage: Stage,
        index: usize,
        label: &'a str,
        reason: &'a str,
    },
    ItemSucceeded {
        stage: Stage,
        index: usize,
        label: &'a str,
        detail: &'a str,
    },
    ItemFailed {
        stage: Stage,
        index: usize,
        label: &'a str,
        error: &'a str,
    },
    StageFinished {
        report: &'a StageReport,
    },
}

/// Receives pipeline events (decoupled logging).
pub trait PipelineReporter: Send + Sync {
    fn report(&self, event: PipelineEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl PipelineReporter for TracingReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        match event {
            PipelineEvent::StageStarted { stage, total } => {
                tracing::info!(%stage, %total, "Stage started");
            }
            PipelineEvent::ItemStarted {
                stage,
                index,
                total,
                label,
            } => {
                tracing::info!(%stage, "Processing {}/{}: {}", index + 1, total, label);
            }
            PipelineEvent::ItemSkipped {
                stage,
                index,
                label,
                reason,
            } => {
                tracing::debug!(%stage, item = index + 1, %label, %reason, "Skipped");
            }
            PipelineEvent::ItemSucceeded {
                stage,
                index,
                label,
                detail,
            } => {
                tracing::info!(%stage, item = index + 1, %label, "{detail}");
            }
            PipelineEvent::ItemFailed {
                stage,
                index,
                label,
                error,
            } => {
                tracing::warn!(%stage, item = index + 1, %label, %error, "Item failed");
            }
            PipelineEvent::StageFinished { report } => {
                tracing::info!(
                    stage = %report.stage,
                    total = report.total,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    skipped = report.skipped,
                    "Stage finished"
                );
            }
        }
    }
}
