use crate::measurement::DeviceId;
use crate::publisher::PublishError;
use crate::store::StoreError;

/// Failure while processing one inbound message. None of these stop the
/// pipeline; the message is dropped.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(anyhow::Error),

    #[error("No reference reading for {device} in the trend window")]
    NoReferenceReading { device: DeviceId },

    #[error("Reference store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("Failed to publish forecast: {0}")]
    PublishFailure(#[from] PublishError),
}

impl PipelineError {
    /// Whether a later message could succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::StoreUnavailable(_) | PipelineError::PublishFailure(_)
        )
    }
}
