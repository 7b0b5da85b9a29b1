use payday_domain::{Currency, Money, MoneyError, ParticipantId, PaydayStage, SettlementError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("balance of {participant} in {currency} would become {attempted}")]
    NegativeBalance {
        participant: ParticipantId,
        currency: Currency,
        attempted: Money,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<MoneyError> for StoreError {
    fn from(err: MoneyError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaydayError {
    #[error("lock {lock:?} is held by another payday")]
    AlreadyRunning { lock: String },
    #[error(transparent)]
    Settlement(#[from] SettlementError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("stage {stage} failed: {source}")]
    StageFailed {
        stage: PaydayStage,
        source: Box<PaydayError>,
    },
}

impl PaydayError {
    /// The innermost error, past stage wrappers.
    pub fn root(&self) -> &PaydayError {
        match self {
            PaydayError::StageFailed { source, .. } => source.root(),
            other => other,
        }
    }
}
