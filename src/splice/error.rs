use super::classify::ClassifiedError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpliceError {
    /// The node refused or failed the splice. Expected at runtime.
    #[error(transparent)]
    Backend(#[from] ClassifiedError),

    #[error("invalid splice request: {0}")]
    InvalidRequest(String),

    #[error("channel {0} already has a splice in flight")]
    ChannelBusy(String),
}

impl SpliceError {
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            Self::Backend(err) => Some(err),
            _ => None,
        }
    }
}
