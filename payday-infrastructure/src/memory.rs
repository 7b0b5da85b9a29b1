//! In-process store implementing every storage port.
//!
//! Authoritative records sit behind one `RwLock`. Readers take the read lock
//! for a whole snapshot, so they never observe a half-applied transfer. A unit
//! of work runs on a private copy of the state and only replaces the shared
//! state when the work succeeds.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use payday_application::{
    BalanceStore, CacheStore, CachedAmounts, PaydayRepository, PaydayStart, SnapshotStore,
    StagedSettlement, StoreError, TransferLedger, UnitOfWork,
};
use payday_domain::{
    Currency, Money, MoneyBasket, Participant, ParticipantId, ParticipantStats, Payday, PaydayId,
    PaydayStage, PaydayStats, Snapshot, Take, Tip, TipId, Transfer, TransferId, TransferIntent,
    TransferKey, TransferStatus,
};
use std::collections::BTreeMap;

use crate::seed::Seed;

/// Authoritative records, comparable as a whole.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoreDump {
    pub participants: BTreeMap<ParticipantId, Participant>,
    pub tips: Vec<Tip>,
    pub takes: Vec<Take>,
    pub transfers: Vec<Transfer>,
    pub paydays: BTreeMap<PaydayId, Payday>,
}

#[derive(Clone, Debug, Default)]
struct State {
    records: StoreDump,
    staged: BTreeMap<PaydayId, StagedSettlement>,
}

fn negative(participant: ParticipantId, attempted: Money) -> StoreError {
    StoreError::NegativeBalance {
        participant,
        currency: attempted.currency(),
        attempted,
    }
}

impl State {
    fn adjust_balance(
        &mut self,
        participant: ParticipantId,
        delta: Money,
    ) -> Result<Money, StoreError> {
        let record = self
            .records
            .participants
            .get_mut(&participant)
            .ok_or_else(|| StoreError::NotFound(format!("participant {participant}")))?;
        let updated = record.balance.get(delta.currency()).checked_add(delta)?;
        if updated.is_negative() {
            return Err(negative(participant, updated));
        }
        record.balance.add_money(delta);
        Ok(updated)
    }

    /// Debits the current row of the tip's (tipper, tippee) pair, which may be
    /// newer than the row `tip` names if the donor edited it after the cutoff.
    fn adjust_tip_advance(&mut self, tip: TipId, delta: Money) -> Result<Money, StoreError> {
        let (tipper, tippee) = self
            .records
            .tips
            .iter()
            .find(|record| record.id == tip)
            .map(|record| (record.tipper, record.tippee))
            .ok_or_else(|| StoreError::NotFound(format!("tip {}", tip.0)))?;
        let record = self
            .records
            .tips
            .iter_mut()
            .filter(|record| record.tipper == tipper && record.tippee == tippee)
            .max_by_key(|record| (record.mtime, record.id))
            .ok_or_else(|| StoreError::NotFound(format!("tip {}", tip.0)))?;
        let updated = record
            .paid_in_advance
            .unwrap_or_else(|| Money::zero(delta.currency()))
            .checked_add(delta)?;
        if updated.is_negative() {
            return Err(negative(record.tipper, updated));
        }
        record.paid_in_advance = Some(updated);
        Ok(updated)
    }

    fn adjust_take_advance(
        &mut self,
        team: ParticipantId,
        member: ParticipantId,
        delta: Money,
    ) -> Result<Money, StoreError> {
        let record = self
            .records
            .takes
            .iter_mut()
            .filter(|record| record.team == team && record.member == member)
            .max_by_key(|record| (record.mtime, record.id))
            .ok_or_else(|| StoreError::NotFound(format!("take of {member} in {team}")))?;
        let updated = record
            .paid_in_advance
            .unwrap_or_else(|| Money::zero(delta.currency()))
            .checked_add(delta)?;
        if updated.is_negative() {
            return Err(negative(member, updated));
        }
        record.paid_in_advance = Some(updated);
        Ok(updated)
    }

    fn append_transfer(
        &mut self,
        payday: PaydayId,
        intent: &TransferIntent,
        timestamp: DateTime<Utc>,
        status: TransferStatus,
    ) -> TransferId {
        let id = TransferId(self.records.transfers.len() as u64 + 1);
        self.records.transfers.push(Transfer {
            id,
            payday,
            tipper: intent.tipper,
            tippee: intent.tippee,
            amount: intent.amount,
            context: intent.context,
            team: intent.team,
            timestamp,
            status,
        });
        id
    }

    fn has_succeeded(&self, key: &TransferKey, payday: PaydayId) -> bool {
        self.records.transfers.iter().any(|transfer| {
            transfer.payday == payday
                && transfer.status == TransferStatus::Succeeded
                && transfer.key() == *key
        })
    }

    fn transfers_for_payday(&self, payday: PaydayId) -> Vec<Transfer> {
        self.records
            .transfers
            .iter()
            .filter(|transfer| transfer.payday == payday)
            .cloned()
            .collect()
    }
}

/// In-memory implementation of the storage ports.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    participant_stats: DashMap<ParticipantId, ParticipantStats>,
    cached_amounts: RwLock<CachedAmounts>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: Seed) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.write();
            state.records.participants = seed
                .participants
                .into_iter()
                .map(|participant| (participant.id, participant))
                .collect();
            state.records.tips = seed.tips;
            state.records.takes = seed.takes;
            state.records.transfers = seed.transfers;
        }
        store
    }

    pub fn insert_participant(&self, participant: Participant) {
        self.state
            .write()
            .records
            .participants
            .insert(participant.id, participant);
    }

    pub fn insert_tip(&self, tip: Tip) {
        self.state.write().records.tips.push(tip);
    }

    pub fn insert_take(&self, take: Take) {
        self.state.write().records.takes.push(take);
    }

    /// Adds a transfer of an earlier cycle to the history.
    pub fn insert_transfer(&self, transfer: Transfer) {
        self.state.write().records.transfers.push(transfer);
    }

    pub fn participant(&self, id: ParticipantId) -> Option<Participant> {
        self.state.read().records.participants.get(&id).cloned()
    }

    pub fn balance(&self, id: ParticipantId, currency: Currency) -> Money {
        self.participant(id)
            .map_or(Money::zero(currency), |participant| {
                participant.balance.get(currency)
            })
    }

    pub fn tip(&self, id: TipId) -> Option<Tip> {
        self.state
            .read()
            .records
            .tips
            .iter()
            .find(|tip| tip.id == id)
            .cloned()
    }

    /// Latest row of the (tipper, tippee) relationship.
    pub fn current_tip(&self, tipper: ParticipantId, tippee: ParticipantId) -> Option<Tip> {
        self.state
            .read()
            .records
            .tips
            .iter()
            .filter(|tip| tip.tipper == tipper && tip.tippee == tippee)
            .max_by_key(|tip| (tip.mtime, tip.id))
            .cloned()
    }

    pub fn take(&self, team: ParticipantId, member: ParticipantId) -> Option<Take> {
        self.state
            .read()
            .records
            .takes
            .iter()
            .filter(|take| take.team == team && take.member == member)
            .max_by_key(|take| (take.mtime, take.id))
            .cloned()
    }

    pub fn participant_stats(&self, id: ParticipantId) -> Option<ParticipantStats> {
        self.participant_stats.get(&id).map(|entry| entry.clone())
    }

    pub fn cached_amounts(&self) -> CachedAmounts {
        self.cached_amounts.read().clone()
    }

    pub fn dump(&self) -> StoreDump {
        self.state.read().records.clone()
    }
}

impl SnapshotStore for InMemoryStore {
    fn read_snapshot(&self, cutoff: DateTime<Utc>) -> Result<Snapshot, StoreError> {
        let state = self.state.read();
        Ok(Snapshot::prepare(
            cutoff,
            state.records.participants.values().cloned(),
            state.records.tips.iter().cloned(),
            state.records.takes.iter().cloned(),
        ))
    }
}

impl BalanceStore for InMemoryStore {
    fn adjust_balance(
        &self,
        participant: ParticipantId,
        delta: Money,
    ) -> Result<Money, StoreError> {
        self.state.write().adjust_balance(participant, delta)
    }

    fn adjust_tip_advance(&self, tip: TipId, delta: Money) -> Result<Money, StoreError> {
        self.state.write().adjust_tip_advance(tip, delta)
    }

    fn adjust_take_advance(
        &self,
        team: ParticipantId,
        member: ParticipantId,
        delta: Money,
    ) -> Result<Money, StoreError> {
        self.state.write().adjust_take_advance(team, member, delta)
    }
}

impl TransferLedger for InMemoryStore {
    fn stage(&self, settlement: StagedSettlement) -> Result<(), StoreError> {
        self.state.write().staged.insert(settlement.payday, settlement);
        Ok(())
    }

    fn staged(&self, payday: PaydayId) -> Result<Option<StagedSettlement>, StoreError> {
        Ok(self.state.read().staged.get(&payday).cloned())
    }

    fn append_transfer(
        &self,
        payday: PaydayId,
        intent: &TransferIntent,
        timestamp: DateTime<Utc>,
        status: TransferStatus,
    ) -> Result<TransferId, StoreError> {
        Ok(self
            .state
            .write()
            .append_transfer(payday, intent, timestamp, status))
    }

    fn has_succeeded(&self, key: &TransferKey, payday: PaydayId) -> Result<bool, StoreError> {
        Ok(self.state.read().has_succeeded(key, payday))
    }

    fn transfers_for_payday(&self, payday: PaydayId) -> Result<Vec<Transfer>, StoreError> {
        Ok(self.state.read().transfers_for_payday(payday))
    }

    fn all_transfers(&self) -> Result<Vec<Transfer>, StoreError> {
        Ok(self.state.read().records.transfers.clone())
    }
}

/// Private copy of the state a unit of work writes to.
struct Tx {
    state: Mutex<State>,
}

impl BalanceStore for Tx {
    fn adjust_balance(
        &self,
        participant: ParticipantId,
        delta: Money,
    ) -> Result<Money, StoreError> {
        self.state.lock().adjust_balance(participant, delta)
    }

    fn adjust_tip_advance(&self, tip: TipId, delta: Money) -> Result<Money, StoreError> {
        self.state.lock().adjust_tip_advance(tip, delta)
    }

    fn adjust_take_advance(
        &self,
        team: ParticipantId,
        member: ParticipantId,
        delta: Money,
    ) -> Result<Money, StoreError> {
        self.state.lock().adjust_take_advance(team, member, delta)
    }
}

impl TransferLedger for Tx {
    fn stage(&self, settlement: StagedSettlement) -> Result<(), StoreError> {
        self.state.lock().staged.insert(settlement.payday, settlement);
        Ok(())
    }

    fn staged(&self, payday: PaydayId) -> Result<Option<StagedSettlement>, StoreError> {
        Ok(self.state.lock().staged.get(&payday).cloned())
    }

    fn append_transfer(
        &self,
        payday: PaydayId,
        intent: &TransferIntent,
        timestamp: DateTime<Utc>,
        status: TransferStatus,
    ) -> Result<TransferId, StoreError> {
        Ok(self
            .state
            .lock()
            .append_transfer(payday, intent, timestamp, status))
    }

    fn has_succeeded(&self, key: &TransferKey, payday: PaydayId) -> Result<bool, StoreError> {
        Ok(self.state.lock().has_succeeded(key, payday))
    }

    fn transfers_for_payday(&self, payday: PaydayId) -> Result<Vec<Transfer>, StoreError> {
        Ok(self.state.lock().transfers_for_payday(payday))
    }

    fn all_transfers(&self) -> Result<Vec<Transfer>, StoreError> {
        Ok(self.state.lock().records.transfers.clone())
    }
}

impl UnitOfWork for InMemoryStore {
    fn atomically(
        &self,
        work: &mut dyn FnMut(&dyn BalanceStore, &dyn TransferLedger) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let tx = Tx {
            state: Mutex::new(state.clone()),
        };
        work(&tx, &tx)?;
        *state = tx.state.into_inner();
        Ok(())
    }
}

impl PaydayRepository for InMemoryStore {
    fn open_or_resume(&self, now: DateTime<Utc>) -> Result<PaydayStart, StoreError> {
        let mut state = self.state.write();
        let paydays = &mut state.records.paydays;
        if let Some(unfinished) = paydays.values().rev().find(|payday| !payday.is_finished()) {
            return Ok(PaydayStart::Resumed(unfinished.clone()));
        }
        let id = PaydayId(paydays.keys().next_back().map_or(1, |last| last.0 + 1));
        let payday = Payday {
            id,
            ts_start: now,
            ts_end: None,
            stage: Some(PaydayStage::Settle),
            stats: None,
        };
        paydays.insert(id, payday.clone());
        Ok(PaydayStart::Started(payday))
    }

    fn set_stage(&self, payday: PaydayId, stage: Option<PaydayStage>) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let record = state
            .records
            .paydays
            .get_mut(&payday)
            .ok_or_else(|| StoreError::NotFound(format!("payday {payday}")))?;
        record.stage = stage;
        Ok(())
    }

    fn finish(
        &self,
        payday: PaydayId,
        ts_end: DateTime<Utc>,
        stats: PaydayStats,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let record = state
            .records
            .paydays
            .get_mut(&payday)
            .ok_or_else(|| StoreError::NotFound(format!("payday {payday}")))?;
        record.ts_end = Some(ts_end);
        record.stage = None;
        record.stats = Some(stats);
        Ok(())
    }

    fn get(&self, payday: PaydayId) -> Result<Option<Payday>, StoreError> {
        Ok(self.state.read().records.paydays.get(&payday).cloned())
    }
}

impl CacheStore for InMemoryStore {
    fn store_participant_stats(
        &self,
        stats: BTreeMap<ParticipantId, ParticipantStats>,
    ) -> Result<(), StoreError> {
        self.participant_stats
            .retain(|participant, _| stats.contains_key(participant));
        for (participant, entry) in stats {
            self.participant_stats.insert(participant, entry);
        }
        Ok(())
    }

    fn store_cached_amounts(&self, amounts: CachedAmounts) -> Result<(), StoreError> {
        *self.cached_amounts.write() = amounts;
        Ok(())
    }

    fn store_leftovers(
        &self,
        leftovers: &BTreeMap<ParticipantId, MoneyBasket>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        for team in state
            .records
            .participants
            .values_mut()
            .filter(|participant| participant.is_team())
        {
            team.leftover = leftovers.get(&team.id).cloned().unwrap_or_default();
        }
        Ok(())
    }
}
