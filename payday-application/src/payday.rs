//! The payday state machine.
//!
//! A run walks the persisted stage checkpoint from wherever the last run left
//! it. Every stage can be executed again after a crash without changing the
//! outcome: stage 1 re-derives the same staged set from the same snapshot,
//! stage 2 skips transfers already committed for the payday, and stages 3 to 5
//! rely on the notification sink dropping duplicate keys.

use crate::{
    config::PaydayConfig,
    error::{PaydayError, StoreError},
    model::{
        Notification, NotificationEvent, PaydayReport, PaydayStart, StagedSettlement,
        StagedTransfer,
    },
    ports::{
        AdvisoryLock, BalanceStore, CacheStore, Clock, NotificationSink, PaydayRepository,
        SnapshotStore, TransferLedger, UnitOfWork,
    },
    stats::StatsService,
};
use chrono::{DateTime, Utc};
use payday_domain::{
    ExchangeRates, Flow, MoneyBasket, ParticipantId, Payday, PaydayId, PaydayStage, PaydayStats,
    RenewalMode, SettlementError, TipGraphSettler, TransferIntent, TransferStatus,
    compute_payday_stats, past_team_transfers,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// External collaborators of a payday run.
#[derive(Clone, Copy)]
pub struct PaydayPorts<'a> {
    pub snapshots: &'a dyn SnapshotStore,
    pub ledger: &'a dyn TransferLedger,
    pub unit_of_work: &'a dyn UnitOfWork,
    pub paydays: &'a dyn PaydayRepository,
    pub cache: &'a dyn CacheStore,
    pub notifier: &'a dyn NotificationSink,
    pub lock: &'a dyn AdvisoryLock,
    pub clock: &'a dyn Clock,
    pub rates: &'a dyn ExchangeRates,
}

/// Holds the advisory lock until dropped, including on early returns.
struct LockGuard<'a> {
    lock: &'a dyn AdvisoryLock,
    name: &'a str,
}

impl<'a> LockGuard<'a> {
    fn acquire(lock: &'a dyn AdvisoryLock, name: &'a str) -> Result<Self, PaydayError> {
        if !lock.try_acquire(name) {
            return Err(PaydayError::AlreadyRunning {
                lock: name.to_owned(),
            });
        }
        Ok(Self { lock, name })
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(self.name);
    }
}

pub struct PaydayRunner<'a> {
    ports: PaydayPorts<'a>,
    config: &'a PaydayConfig,
}

impl<'a> PaydayRunner<'a> {
    pub fn new(ports: PaydayPorts<'a>, config: &'a PaydayConfig) -> Self {
        Self { ports, config }
    }

    pub fn stats(&self) -> StatsService<'a> {
        StatsService::new(
            self.ports.snapshots,
            self.ports.ledger,
            self.ports.cache,
            self.ports.rates,
            self.config,
        )
    }

    /// Starts a payday or resumes the unfinished one, and runs it to the end.
    ///
    /// Fails fast with [`PaydayError::AlreadyRunning`] when another run holds
    /// the lock. A failing stage leaves the checkpoint on that stage.
    pub fn run(&self) -> Result<PaydayReport, PaydayError> {
        let _guard = LockGuard::acquire(self.ports.lock, &self.config.lock_name)?;

        let mut report = PaydayReport::default();
        let mut payday = match self.ports.paydays.open_or_resume(self.ports.clock.now())? {
            PaydayStart::Started(payday) => {
                tracing::info!(payday = %payday.id, ts_start = %payday.ts_start, "Payday started");
                payday
            }
            PaydayStart::Resumed(payday) => {
                tracing::info!(
                    payday = %payday.id,
                    stage = ?payday.stage.map(PaydayStage::number),
                    "Resuming payday"
                );
                report.resumed = true;
                report.resumed_from = payday.stage;
                payday
            }
        };
        report.payday = payday.id;

        while let Some(stage) = payday.stage {
            self.run_stage(&payday, stage, &mut report)
                .map_err(|source| PaydayError::StageFailed {
                    stage,
                    source: Box::new(source),
                })?;
            let next = stage.next();
            self.ports.paydays.set_stage(payday.id, next)?;
            payday.stage = next;
            tracing::info!(payday = %payday.id, stage = %stage, "Stage completed");
        }

        report.stats = self.end(&payday)?;
        Ok(report)
    }

    fn run_stage(
        &self,
        payday: &Payday,
        stage: PaydayStage,
        report: &mut PaydayReport,
    ) -> Result<(), PaydayError> {
        match stage {
            PaydayStage::Settle => self.settle(payday, report),
            PaydayStage::Commit => self.commit_transfers(payday, report),
            PaydayStage::IncomeNotifications => self.notify_income(payday, report),
            PaydayStage::RenewalReminders => self.remind_renewals(payday, report),
            PaydayStage::AccountReminders => self.remind_payout_accounts(payday, report),
        }
    }

    /// Stage 1: snapshot as of the payday start, run the fixed point, stage the intents.
    fn settle(&self, payday: &Payday, report: &mut PaydayReport) -> Result<(), PaydayError> {
        let history = self.ports.ledger.all_transfers()?;
        let past = past_team_transfers(&history, Some(payday.id)).map_err(SettlementError::from)?;
        let snapshot = self
            .ports
            .snapshots
            .read_snapshot(payday.ts_start)?
            .with_past_team_transfers(past)
            .keep_convertible(self.ports.rates);

        let outcome = TipGraphSettler::new(self.ports.rates)
            .with_policy(self.config.catch_up)
            .with_max_iterations(self.config.max_iterations)
            .settle(&snapshot)?;

        report.settlement_iterations = outcome.iterations;
        report.staged = outcome.intents.len();
        let transfers = outcome
            .intents
            .into_iter()
            .zip(1..)
            .map(|(intent, seq)| StagedTransfer { seq, intent })
            .collect();
        self.ports.ledger.stage(StagedSettlement {
            payday: payday.id,
            transfers,
            funded: outcome.funded,
            leftovers: outcome.team_leftovers,
        })?;
        Ok(())
    }

    /// Stage 2: commit every staged transfer not yet recorded for this payday.
    fn commit_transfers(
        &self,
        payday: &Payday,
        report: &mut PaydayReport,
    ) -> Result<(), PaydayError> {
        let staged = self.ports.ledger.staged(payday.id)?.ok_or_else(|| {
            StoreError::NotFound(format!("staged transfers of payday {}", payday.id))
        })?;
        let now = self.ports.clock.now();

        for staged_transfer in &staged.transfers {
            let intent = &staged_transfer.intent;
            let mut duplicate = false;
            let result = self.ports.unit_of_work.atomically(&mut |balances, ledger| {
                duplicate = ledger.has_succeeded(&intent.key(), payday.id)?;
                if duplicate {
                    return Ok(());
                }
                apply_intent(payday.id, intent, now, balances, ledger)
            });
            match result {
                Ok(()) if duplicate => report.already_committed += 1,
                Ok(()) => report.committed += 1,
                Err(StoreError::NegativeBalance {
                    participant,
                    currency,
                    attempted,
                }) => {
                    tracing::warn!(
                        payday = %payday.id,
                        seq = staged_transfer.seq,
                        tipper = %intent.tipper,
                        tippee = %intent.tippee,
                        context = %intent.context,
                        participant = %participant,
                        currency = %currency,
                        attempted = %attempted,
                        "Skipping transfer that would overdraw a balance"
                    );
                    report.skipped += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
        tracing::info!(
            payday = %payday.id,
            committed = report.committed,
            already_committed = report.already_committed,
            skipped = report.skipped,
            "Transfers committed"
        );
        Ok(())
    }

    /// Stage 3: tell recipients what they received this payday.
    fn notify_income(&self, payday: &Payday, report: &mut PaydayReport) -> Result<(), PaydayError> {
        let mut income: BTreeMap<ParticipantId, MoneyBasket> = BTreeMap::new();
        for transfer in self.ports.ledger.transfers_for_payday(payday.id)? {
            if transfer.status == TransferStatus::Succeeded {
                income
                    .entry(transfer.tippee)
                    .or_default()
                    .add_money(transfer.amount);
            }
        }
        for (participant, amounts) in income {
            self.send(
                Notification {
                    payday: payday.id,
                    participant,
                    event: NotificationEvent::Income,
                    subject: None,
                    amounts,
                },
                report,
            )?;
        }
        Ok(())
    }

    /// Stage 4: remind donors whose advance runs out within the notice period.
    fn remind_renewals(
        &self,
        payday: &Payday,
        report: &mut PaydayReport,
    ) -> Result<(), PaydayError> {
        let snapshot = self.ports.snapshots.read_snapshot(payday.ts_start)?;
        let weeks = Decimal::from(self.config.renewal_notice_weeks);
        for tip in &snapshot.tips {
            let event = match tip.renewal_mode {
                RenewalMode::Disabled => continue,
                RenewalMode::Manual => NotificationEvent::DonateReminder,
                RenewalMode::Automatic => NotificationEvent::UpcomingDebit,
            };
            // Never paid for, so nothing to renew.
            if tip.paid_in_advance.is_none() {
                continue;
            }
            let remaining = tip.usable_advance();
            let threshold = tip.amount.checked_mul(weeks).map_err(SettlementError::from)?;
            if remaining >= threshold {
                continue;
            }
            self.send(
                Notification {
                    payday: payday.id,
                    participant: tip.tipper,
                    event,
                    subject: Some(tip.tippee),
                    amounts: remaining.into(),
                },
                report,
            )?;
        }
        Ok(())
    }

    /// Stage 5: ask recipients held back for lack of a payout method to add one.
    fn remind_payout_accounts(
        &self,
        payday: &Payday,
        report: &mut PaydayReport,
    ) -> Result<(), PaydayError> {
        let snapshot = self.ports.snapshots.read_snapshot(payday.ts_start)?;
        for participant in &snapshot.awaiting_payout {
            self.send(
                Notification {
                    payday: payday.id,
                    participant: *participant,
                    event: NotificationEvent::PayoutAccountRequired,
                    subject: None,
                    amounts: MoneyBasket::new(),
                },
                report,
            )?;
        }
        Ok(())
    }

    fn send(&self, notification: Notification, report: &mut PaydayReport) -> Result<(), PaydayError> {
        let key = notification.key();
        if self.ports.notifier.notify(notification)? {
            report.notifications += 1;
        } else {
            tracing::debug!(
                participant = %key.participant,
                event = %key.event,
                "Notification already sent"
            );
        }
        Ok(())
    }

    /// Housekeeping after the last stage, then `ts_end`.
    fn end(&self, payday: &Payday) -> Result<PaydayStats, PaydayError> {
        let leftovers = self
            .ports
            .ledger
            .staged(payday.id)?
            .map(|staged| staged.leftovers)
            .unwrap_or_default();
        self.ports.cache.store_leftovers(&leftovers)?;

        let now = self.ports.clock.now();
        let stats_service = self.stats();
        if self.config.recompute_stats {
            stats_service.recompute_stats()?;
        }
        if self.config.update_cached_amounts {
            stats_service.update_cached_amounts(now)?;
        }

        let transfers = self.ports.ledger.transfers_for_payday(payday.id)?;
        let stats = compute_payday_stats(
            transfers.iter().filter_map(Flow::from_transfer),
            leftovers.values(),
        );
        self.ports.paydays.finish(payday.id, now, stats.clone())?;
        tracing::info!(
            payday = %payday.id,
            transfers = stats.ntransfers,
            participants = stats.nparticipants,
            "Payday finished"
        );
        Ok(stats)
    }
}

/// Applies the deltas settlement computed for one intent and records it.
fn apply_intent(
    payday: PaydayId,
    intent: &TransferIntent,
    timestamp: DateTime<Utc>,
    balances: &dyn BalanceStore,
    ledger: &dyn TransferLedger,
) -> Result<(), StoreError> {
    for funding in &intent.funding {
        if funding.from_advance.is_positive() {
            balances.adjust_tip_advance(funding.tip, -funding.from_advance)?;
        }
        if funding.from_balance.is_positive() {
            balances.adjust_balance(intent.tipper, -funding.from_balance)?;
        }
        if let (Some(team), Some(advance)) = (intent.team, funding.take_advance) {
            if advance.is_positive() {
                balances.adjust_take_advance(team, intent.tippee, -advance)?;
            }
        }
    }
    balances.adjust_balance(intent.tippee, intent.amount)?;
    ledger.append_transfer(payday, intent, timestamp, TransferStatus::Succeeded)?;
    Ok(())
}
