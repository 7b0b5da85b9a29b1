//! Fixed-point funding of the donor → recipient graph.
//!
//! A team's income depends on which tips into it are funded, and a member's
//! onward tips may only become fundable once their takes are credited. Passes
//! are repeated until no new tip becomes funded.

use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use super::{
    amount_resolver::ResolveError,
    take_resolver::{CatchUpPolicy, TakeResolutionError, TakeResolver, TeamTake, TeamTip},
};
use crate::{
    currency::Currency,
    model::{
        Funding, ParticipantId, Take, Tip, TipId, TransferContext, TransferIntent, TransferKey,
    },
    money::{ExchangeRates, Money, MoneyBasket, MoneyError},
    snapshot::Snapshot,
};

pub const DEFAULT_MAX_ITERATIONS: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SettlementError {
    #[error("tip graph did not reach a fixed point after {iterations} passes")]
    NonConvergence { iterations: usize },
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("resolving takes of team {team} failed: {source}")]
    TakeResolution {
        team: ParticipantId,
        #[source]
        source: TakeResolutionError,
    },
    #[error(transparent)]
    Money(#[from] MoneyError),
}

/// Result of settling a snapshot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SettlementOutcome {
    /// Merged per dedup key, in the order they were first produced.
    pub intents: Vec<TransferIntent>,
    /// Whether each current tip was fully funded.
    pub funded: BTreeMap<TipId, bool>,
    /// Funded team income that no take absorbed.
    pub team_leftovers: BTreeMap<ParticipantId, MoneyBasket>,
    /// Passes needed to reach the fixed point.
    pub iterations: usize,
}

impl SettlementOutcome {
    pub fn total_by_context(&self, context: TransferContext) -> MoneyBasket {
        self.intents
            .iter()
            .filter(|intent| intent.context == context)
            .map(|intent| intent.amount)
            .collect()
    }
}

/// Working state of one settlement run.
struct Ledger {
    balances: BTreeMap<ParticipantId, MoneyBasket>,
    tip_advances: BTreeMap<TipId, Money>,
    take_advances: BTreeMap<(ParticipantId, ParticipantId), Money>,
    take_received: BTreeMap<(ParticipantId, ParticipantId), Money>,
    funded: BTreeSet<TipId>,
    intents: Vec<TransferIntent>,
    leftovers: BTreeMap<ParticipantId, MoneyBasket>,
}

impl Ledger {
    fn new(snapshot: &Snapshot) -> Self {
        let balances = snapshot
            .participants
            .values()
            .map(|participant| (participant.id, participant.balance.clone()))
            .collect();
        let tip_advances = snapshot
            .tips
            .iter()
            .map(|tip| (tip.id, tip.usable_advance()))
            .collect();
        let take_advances = snapshot
            .takes
            .iter()
            .map(|take| {
                let fallback = snapshot
                    .participant(take.team)
                    .map_or(Currency::EUR, |team| team.main_currency);
                ((take.team, take.member), take_advance(take, fallback))
            })
            .collect();
        Self {
            balances,
            tip_advances,
            take_advances,
            take_received: BTreeMap::new(),
            funded: BTreeSet::new(),
            intents: Vec::new(),
            leftovers: BTreeMap::new(),
        }
    }

    fn tip_advance(&self, tip: &Tip) -> Money {
        self.tip_advances
            .get(&tip.id)
            .copied()
            .unwrap_or(Money::zero(tip.amount.currency()))
    }

    /// Remaining advance plus the tipper's balance in the tip currency.
    fn spendable(&self, tip: &Tip) -> Result<Money, MoneyError> {
        let currency = tip.amount.currency();
        let balance = self
            .balances
            .get(&tip.tipper)
            .map_or(Money::zero(currency), |basket| basket.get(currency))
            .floor_zero();
        self.tip_advance(tip).checked_add(balance)
    }

    /// Consumes the tip advance first, then the tipper's balance.
    fn spend(&mut self, tip: &Tip, amount: Money) -> Result<Funding, MoneyError> {
        let advance = self.tip_advance(tip);
        let from_advance = advance.try_min(amount)?;
        let from_balance = amount.checked_sub(from_advance)?;
        self.tip_advances
            .insert(tip.id, advance.checked_sub(from_advance)?);
        if from_balance.is_positive() {
            self.balances
                .entry(tip.tipper)
                .or_default()
                .sub_money(from_balance);
        }
        Ok(Funding {
            tip: tip.id,
            from_advance,
            from_balance,
            take_advance: None,
        })
    }

    fn credit(&mut self, participant: ParticipantId, amount: Money) {
        self.balances.entry(participant).or_default().add_money(amount);
    }
}

fn take_advance(take: &Take, fallback: Currency) -> Money {
    match (take.paid_in_advance, take.amount) {
        (Some(advance), _) => advance,
        (None, Some(amount)) => Money::zero(amount.currency()),
        (None, None) => Money::zero(fallback),
    }
}

/// Fixed-point settlement service.
pub struct TipGraphSettler<'a> {
    rates: &'a dyn ExchangeRates,
    policy: CatchUpPolicy,
    max_iterations: usize,
}

impl<'a> TipGraphSettler<'a> {
    pub fn new(rates: &'a dyn ExchangeRates) -> Self {
        Self {
            rates,
            policy: CatchUpPolicy::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_policy(mut self, policy: CatchUpPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Settles `snapshot` into transfer intents.
    ///
    /// Tips and teams are visited in ascending id order, so the same snapshot
    /// always yields the same intents.
    pub fn settle(&self, snapshot: &Snapshot) -> Result<SettlementOutcome, SettlementError> {
        let mut ledger = Ledger::new(snapshot);
        let teams: BTreeSet<ParticipantId> = snapshot
            .tips
            .iter()
            .map(|tip| tip.tippee)
            .filter(|tippee| snapshot.is_team(*tippee))
            .collect();

        let mut iterations = 0;
        loop {
            if iterations == self.max_iterations {
                return Err(SettlementError::NonConvergence { iterations });
            }
            iterations += 1;
            let before = ledger.funded.len();
            self.fund_individual_tips(snapshot, &mut ledger)?;
            for team in &teams {
                self.fund_team_tips(snapshot, &mut ledger, *team)?;
            }
            let newly_funded = ledger.funded.len() - before;
            tracing::debug!(pass = iterations, newly_funded, "Settlement pass");
            if newly_funded == 0 {
                break;
            }
        }

        self.settle_partial_tips(snapshot, &mut ledger)?;
        for team in &teams {
            self.settle_partial_takes(snapshot, &mut ledger, *team)?;
        }

        let intents = merge_intents(ledger.intents)?;
        let funded = snapshot
            .tips
            .iter()
            .map(|tip| (tip.id, ledger.funded.contains(&tip.id)))
            .collect();
        tracing::info!(
            iterations,
            intents = intents.len(),
            tips = snapshot.tips.len(),
            "Tip graph settled"
        );
        Ok(SettlementOutcome {
            intents,
            funded,
            team_leftovers: ledger.leftovers,
            iterations,
        })
    }

    fn fund_individual_tips(
        &self,
        snapshot: &Snapshot,
        ledger: &mut Ledger,
    ) -> Result<(), SettlementError> {
        for tip in &snapshot.tips {
            if ledger.funded.contains(&tip.id) || snapshot.is_team(tip.tippee) {
                continue;
            }
            if ledger.spendable(tip)? < tip.amount {
                continue;
            }
            let funding = ledger.spend(tip, tip.amount)?;
            ledger.credit(tip.tippee, tip.amount);
            ledger.funded.insert(tip.id);
            ledger.intents.push(TransferIntent {
                tipper: tip.tipper,
                tippee: tip.tippee,
                amount: tip.amount,
                context: TransferContext::Tip,
                team: None,
                funding: vec![funding],
            });
        }
        Ok(())
    }

    fn team_takes(
        &self,
        snapshot: &Snapshot,
        ledger: &Ledger,
        team: ParticipantId,
        currency: Currency,
    ) -> Vec<TeamTake> {
        snapshot
            .takes_of(team)
            .map(|take| {
                let key = (take.team, take.member);
                let member = snapshot.participant(take.member);
                TeamTake {
                    member: take.member,
                    nominal: take.nominal(),
                    paid_in_advance: ledger
                        .take_advances
                        .get(&key)
                        .copied()
                        .unwrap_or(Money::zero(currency)),
                    received: ledger
                        .take_received
                        .get(&key)
                        .copied()
                        .unwrap_or(Money::zero(currency)),
                    main_currency: member.map_or(currency, |member| member.main_currency),
                    accepted_currencies: member
                        .map(|member| member.accepted_currencies.clone())
                        .unwrap_or_default(),
                }
            })
            .collect()
    }

    fn fund_team_tips(
        &self,
        snapshot: &Snapshot,
        ledger: &mut Ledger,
        team: ParticipantId,
    ) -> Result<(), SettlementError> {
        let mut fundable: Vec<&Tip> = Vec::new();
        for tip in snapshot.tips_to(team) {
            if !ledger.funded.contains(&tip.id) && ledger.spendable(tip)? >= tip.amount {
                fundable.push(tip);
            }
        }
        if fundable.is_empty() {
            return Ok(());
        }
        let team_tips: Vec<TeamTip> = fundable
            .iter()
            .map(|tip| TeamTip {
                id: tip.id,
                tipper: tip.tipper,
                full_amount: tip.amount,
                spendable: tip.amount,
                past_transfers: snapshot.past_transfers(tip.tipper, team),
            })
            .collect();
        for tip in &fundable {
            ledger.funded.insert(tip.id);
        }
        self.apply_resolution(snapshot, ledger, team, &fundable, &team_tips, false)
    }

    fn settle_partial_tips(
        &self,
        snapshot: &Snapshot,
        ledger: &mut Ledger,
    ) -> Result<(), SettlementError> {
        for tip in &snapshot.tips {
            if ledger.funded.contains(&tip.id) || snapshot.is_team(tip.tippee) {
                continue;
            }
            let advance = ledger.tip_advance(tip);
            if !advance.is_positive() {
                continue;
            }
            let funding = ledger.spend(tip, advance)?;
            ledger.credit(tip.tippee, advance);
            ledger.intents.push(TransferIntent {
                tipper: tip.tipper,
                tippee: tip.tippee,
                amount: advance,
                context: TransferContext::PartialTip,
                team: None,
                funding: vec![funding],
            });
        }
        Ok(())
    }

    fn settle_partial_takes(
        &self,
        snapshot: &Snapshot,
        ledger: &mut Ledger,
        team: ParticipantId,
    ) -> Result<(), SettlementError> {
        let partial: Vec<&Tip> = snapshot
            .tips_to(team)
            .filter(|tip| !ledger.funded.contains(&tip.id) && ledger.tip_advance(tip).is_positive())
            .collect();
        if partial.is_empty() {
            return Ok(());
        }
        let team_tips: Vec<TeamTip> = partial
            .iter()
            .map(|tip| {
                let advance = ledger.tip_advance(tip);
                TeamTip {
                    id: tip.id,
                    tipper: tip.tipper,
                    full_amount: advance,
                    spendable: advance,
                    past_transfers: snapshot.past_transfers(tip.tipper, team),
                }
            })
            .collect();
        self.apply_resolution(snapshot, ledger, team, &partial, &team_tips, true)
    }

    fn apply_resolution(
        &self,
        snapshot: &Snapshot,
        ledger: &mut Ledger,
        team: ParticipantId,
        tips: &[&Tip],
        team_tips: &[TeamTip],
        partial: bool,
    ) -> Result<(), SettlementError> {
        let currency = snapshot
            .participant(team)
            .map_or(Currency::EUR, |team| team.main_currency);
        let takes = self.team_takes(snapshot, ledger, team, currency);
        let resolution = TakeResolver::new(self.rates, self.policy)
            .resolve_takes(team, currency, team_tips, &takes)
            .map_err(|source| SettlementError::TakeResolution { team, source })?;

        for transfer in &resolution.transfers {
            let Some(tip) = tips.iter().find(|tip| tip.id == transfer.tip) else {
                continue;
            };
            let mut funding = ledger.spend(tip, transfer.amount)?;
            funding.take_advance = Some(transfer.take_advance);
            ledger.credit(transfer.member, transfer.amount);

            let key = (team, transfer.member);
            if let Some(advance) = ledger.take_advances.get_mut(&key) {
                *advance = advance.checked_sub(transfer.take_advance)?;
            }
            let received = transfer.amount.convert(currency, self.rates)?;
            let total = ledger
                .take_received
                .get(&key)
                .copied()
                .unwrap_or(Money::zero(currency))
                .checked_add(received)?;
            ledger.take_received.insert(key, total);

            let context = match (transfer.context, partial) {
                (TransferContext::Take, true) => TransferContext::PartialTake,
                (context, _) => context,
            };
            ledger.intents.push(TransferIntent {
                tipper: transfer.tipper,
                tippee: transfer.member,
                amount: transfer.amount,
                context,
                team: Some(team),
                funding: vec![funding],
            });
        }
        if !resolution.leftover.is_zero() {
            *ledger.leftovers.entry(team).or_default() += &resolution.leftover;
        }
        Ok(())
    }
}

/// Merges intents sharing a dedup key, keeping first-seen order.
fn merge_intents(intents: Vec<TransferIntent>) -> Result<Vec<TransferIntent>, MoneyError> {
    let mut merged: IndexMap<TransferKey, TransferIntent> = IndexMap::new();
    for intent in intents {
        match merged.get_mut(&intent.key()) {
            Some(existing) => {
                existing.amount = existing.amount.checked_add(intent.amount)?;
                existing.funding.extend(intent.funding);
            }
            None => {
                merged.insert(intent.key(), intent);
            }
        }
    }
    Ok(merged.into_values().collect())
}
