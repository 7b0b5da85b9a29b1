pub mod amount_resolver;
pub mod stats;
pub mod take_resolver;
pub mod tip_graph;

pub use amount_resolver::{ResolveError, resolve_amounts};
pub use stats::{
    Flow, ParticipantStats, compute_participant_stats, compute_payday_stats, past_team_transfers,
};
pub use take_resolver::{
    CatchUpPolicy, TakeResolution, TakeResolutionError, TakeResolver, TakeTransfer, TeamTake,
    TeamTip,
};
pub use tip_graph::{DEFAULT_MAX_ITERATIONS, SettlementError, SettlementOutcome, TipGraphSettler};
