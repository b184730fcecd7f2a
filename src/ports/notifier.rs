//! Notifier Port
//!
//! Fans pipeline events out to external channels. Delivery is fire-and-forget
//! from the pipeline's point of view.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::PipelineEvent;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notification rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this notifier cares about an event; defaults to analysis outcomes
    fn wants(&self, event: &PipelineEvent) -> bool {
        matches!(
            event,
            PipelineEvent::AnalysisPassed(_) | PipelineEvent::PipelineError { .. }
        )
    }

    async fn notify(&self, event: &PipelineEvent) -> Result<(), NotifyError>;
}
