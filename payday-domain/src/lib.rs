#![warn(clippy::uninlined_format_args)]

pub mod currency;
pub mod model;
pub mod money;
pub mod services;
pub mod snapshot;

pub use currency::Currency;
pub use model::{
    Funding, ModelError, Participant, ParticipantId, ParticipantKind, ParticipantStatus, Payday,
    PaydayId, PaydayStage, PaydayStats, RenewalMode, Take, TakeAmount, TakeId, Tip, TipId,
    Transfer, TransferContext, TransferId, TransferIntent, TransferKey, TransferStatus,
};
pub use money::{ExchangeRates, FuzzyMoney, Money, MoneyBasket, MoneyError};
pub use services::{
    CatchUpPolicy, Flow, ParticipantStats, ResolveError, SettlementError, SettlementOutcome,
    TakeResolutionError, TakeResolver, TipGraphSettler, compute_participant_stats,
    compute_payday_stats, past_team_transfers, resolve_amounts,
};
pub use snapshot::Snapshot;
