use crate::{
    error::StoreError,
    model::{CachedAmounts, Notification, PaydayStart, StagedSettlement},
};
use chrono::{DateTime, Utc};
use payday_domain::{
    Money, MoneyBasket, ParticipantId, ParticipantStats, Payday, PaydayId, PaydayStage,
    PaydayStats, Snapshot, TipId, Transfer, TransferId, TransferIntent, TransferKey,
    TransferStatus,
};
use std::collections::BTreeMap;

pub trait SnapshotStore: Send + Sync {
    /// Transactionally consistent view of current records as of `cutoff`.
    fn read_snapshot(&self, cutoff: DateTime<Utc>) -> Result<Snapshot, StoreError>;
}

pub trait TransferLedger: Send + Sync {
    /// Replaces whatever was staged for the same payday.
    fn stage(&self, settlement: StagedSettlement) -> Result<(), StoreError>;

    fn staged(&self, payday: PaydayId) -> Result<Option<StagedSettlement>, StoreError>;

    fn append_transfer(
        &self,
        payday: PaydayId,
        intent: &TransferIntent,
        timestamp: DateTime<Utc>,
        status: TransferStatus,
    ) -> Result<TransferId, StoreError>;

    fn has_succeeded(&self, key: &TransferKey, payday: PaydayId) -> Result<bool, StoreError>;

    fn transfers_for_payday(&self, payday: PaydayId) -> Result<Vec<Transfer>, StoreError>;

    fn all_transfers(&self) -> Result<Vec<Transfer>, StoreError>;
}

/// Guarded increments. Every method fails with [`StoreError::NegativeBalance`]
/// instead of storing a negative result.
pub trait BalanceStore: Send + Sync {
    fn adjust_balance(&self, participant: ParticipantId, delta: Money)
    -> Result<Money, StoreError>;

    fn adjust_tip_advance(&self, tip: TipId, delta: Money) -> Result<Money, StoreError>;

    fn adjust_take_advance(
        &self,
        team: ParticipantId,
        member: ParticipantId,
        delta: Money,
    ) -> Result<Money, StoreError>;
}

/// Runs `work` so that either all of its writes land or none do.
pub trait UnitOfWork: Send + Sync {
    fn atomically(
        &self,
        work: &mut dyn FnMut(&dyn BalanceStore, &dyn TransferLedger) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;
}

pub trait PaydayRepository: Send + Sync {
    /// Returns the most recent unfinished payday, or opens a new one at `now`.
    fn open_or_resume(&self, now: DateTime<Utc>) -> Result<PaydayStart, StoreError>;

    fn set_stage(&self, payday: PaydayId, stage: Option<PaydayStage>) -> Result<(), StoreError>;

    fn finish(
        &self,
        payday: PaydayId,
        ts_end: DateTime<Utc>,
        stats: PaydayStats,
    ) -> Result<(), StoreError>;

    fn get(&self, payday: PaydayId) -> Result<Option<Payday>, StoreError>;
}

/// Denormalized, display-only aggregates.
pub trait CacheStore: Send + Sync {
    fn store_participant_stats(
        &self,
        stats: BTreeMap<ParticipantId, ParticipantStats>,
    ) -> Result<(), StoreError>;

    fn store_cached_amounts(&self, amounts: CachedAmounts) -> Result<(), StoreError>;

    fn store_leftovers(
        &self,
        leftovers: &BTreeMap<ParticipantId, MoneyBasket>,
    ) -> Result<(), StoreError>;
}

pub trait NotificationSink: Send + Sync {
    /// Returns `false` when a notification with the same key was already sent.
    fn notify(&self, notification: Notification) -> Result<bool, StoreError>;
}

/// Non-blocking mutual exclusion across payday instances.
pub trait AdvisoryLock: Send + Sync {
    fn try_acquire(&self, name: &str) -> bool;
    fn release(&self, name: &str);
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
