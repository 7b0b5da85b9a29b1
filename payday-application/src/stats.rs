use crate::{
    config::PaydayConfig,
    error::PaydayError,
    model::CachedAmounts,
    ports::{CacheStore, SnapshotStore, TransferLedger},
};
use chrono::{DateTime, Utc};
use payday_domain::{
    ExchangeRates, Flow, SettlementError, SettlementOutcome, TipGraphSettler,
    compute_participant_stats, past_team_transfers,
};

/// Recomputes display aggregates. Never writes transfer history.
#[derive(Clone, Copy)]
pub struct StatsService<'a> {
    snapshots: &'a dyn SnapshotStore,
    ledger: &'a dyn TransferLedger,
    cache: &'a dyn CacheStore,
    rates: &'a dyn ExchangeRates,
    config: &'a PaydayConfig,
}

impl<'a> StatsService<'a> {
    pub fn new(
        snapshots: &'a dyn SnapshotStore,
        ledger: &'a dyn TransferLedger,
        cache: &'a dyn CacheStore,
        rates: &'a dyn ExchangeRates,
        config: &'a PaydayConfig,
    ) -> Self {
        Self {
            snapshots,
            ledger,
            cache,
            rates,
            config,
        }
    }

    /// Rebuilds giving, receiving, taking and patron counts from succeeded transfers.
    ///
    /// Returns the number of participants updated.
    pub fn recompute_stats(&self) -> Result<usize, PaydayError> {
        let transfers = self.ledger.all_transfers()?;
        let stats = compute_participant_stats(transfers.iter().filter_map(Flow::from_transfer));
        let updated = stats.len();
        self.cache.store_participant_stats(stats)?;
        tracing::info!(participants = updated, transfers = transfers.len(), "Stats recomputed");
        Ok(updated)
    }

    /// Settles the current snapshot without persisting anything but the cache.
    pub fn update_cached_amounts(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<SettlementOutcome, PaydayError> {
        let transfers = self.ledger.all_transfers()?;
        let past = past_team_transfers(&transfers, None).map_err(SettlementError::from)?;
        let snapshot = self
            .snapshots
            .read_snapshot(cutoff)?
            .with_past_team_transfers(past)
            .keep_convertible(self.rates);

        let outcome = TipGraphSettler::new(self.rates)
            .with_policy(self.config.catch_up)
            .with_max_iterations(self.config.max_iterations)
            .settle(&snapshot)?;

        let amounts = CachedAmounts {
            computed_at: Some(cutoff),
            participants: compute_participant_stats(outcome.intents.iter().map(Flow::from)),
            tips_funded: outcome.funded.clone(),
        };
        tracing::debug!(
            participants = amounts.participants.len(),
            tips = amounts.tips_funded.len(),
            "Cached amounts updated"
        );
        self.cache.store_cached_amounts(amounts)?;
        Ok(outcome)
    }
}
