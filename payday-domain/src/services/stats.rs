//! Aggregates derived from transfer history.

use fxhash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;

use crate::{
    model::{
        ParticipantId, PaydayId, PaydayStats, Transfer, TransferContext, TransferIntent,
        TransferStatus,
    },
    money::{Money, MoneyBasket, MoneyError},
};

/// One movement of money, settled or expected.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Flow {
    pub tipper: ParticipantId,
    pub tippee: ParticipantId,
    pub team: Option<ParticipantId>,
    pub amount: Money,
    pub context: TransferContext,
}

impl Flow {
    /// Failed transfers moved nothing.
    pub fn from_transfer(transfer: &Transfer) -> Option<Self> {
        (transfer.status == TransferStatus::Succeeded).then_some(Self {
            tipper: transfer.tipper,
            tippee: transfer.tippee,
            team: transfer.team,
            amount: transfer.amount,
            context: transfer.context,
        })
    }
}

impl From<&TransferIntent> for Flow {
    fn from(intent: &TransferIntent) -> Self {
        Self {
            tipper: intent.tipper,
            tippee: intent.tippee,
            team: intent.team,
            amount: intent.amount,
            context: intent.context,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParticipantStats {
    pub giving: MoneyBasket,
    /// Direct donations, or for a team, everything paid out through it.
    pub receiving: MoneyBasket,
    /// Income from team takes.
    pub taking: MoneyBasket,
    pub npatrons: usize,
    /// Donors reaching this member through a team.
    pub nteampatrons: usize,
}

/// Recomputes per-participant aggregates from scratch.
///
/// The result only depends on `flows`, so running it again over the same
/// history always gives the same values.
pub fn compute_participant_stats<I>(flows: I) -> BTreeMap<ParticipantId, ParticipantStats>
where
    I: IntoIterator<Item = Flow>,
{
    let mut stats: BTreeMap<ParticipantId, ParticipantStats> = BTreeMap::new();
    let mut patrons: FxHashMap<ParticipantId, FxHashSet<ParticipantId>> = FxHashMap::default();
    let mut team_patrons: FxHashMap<ParticipantId, FxHashSet<ParticipantId>> =
        FxHashMap::default();

    for flow in flows {
        stats.entry(flow.tipper).or_default().giving.add_money(flow.amount);
        if flow.context.is_take() {
            stats.entry(flow.tippee).or_default().taking.add_money(flow.amount);
            team_patrons
                .entry(flow.tippee)
                .or_default()
                .insert(flow.tipper);
            if let Some(team) = flow.team {
                stats.entry(team).or_default().receiving.add_money(flow.amount);
                patrons.entry(team).or_default().insert(flow.tipper);
            }
        } else {
            stats
                .entry(flow.tippee)
                .or_default()
                .receiving
                .add_money(flow.amount);
            patrons.entry(flow.tippee).or_default().insert(flow.tipper);
        }
    }

    for (id, entry) in stats.iter_mut() {
        entry.npatrons = patrons.get(id).map_or(0, FxHashSet::len);
        entry.nteampatrons = team_patrons.get(id).map_or(0, FxHashSet::len);
    }
    stats
}

/// Succeeded transfers into each team per (tipper, team), skipping `exclude`.
///
/// Feeds the catch-up between donors with unequal history.
pub fn past_team_transfers<'a, I>(
    transfers: I,
    exclude: Option<PaydayId>,
) -> Result<BTreeMap<(ParticipantId, ParticipantId), Money>, MoneyError>
where
    I: IntoIterator<Item = &'a Transfer>,
{
    let mut totals: BTreeMap<(ParticipantId, ParticipantId), Money> = BTreeMap::new();
    for transfer in transfers {
        let Some(team) = transfer.team else {
            continue;
        };
        if transfer.status != TransferStatus::Succeeded || Some(transfer.payday) == exclude {
            continue;
        }
        let key = (transfer.tipper, team);
        let total = match totals.get(&key) {
            Some(total) if total.currency() == transfer.amount.currency() => {
                total.checked_add(transfer.amount)?
            }
            // A tip currency change restarts the history.
            _ => transfer.amount,
        };
        totals.insert(key, total);
    }
    Ok(totals)
}

/// Aggregates recorded on a finished payday.
pub fn compute_payday_stats<'a, I, L>(flows: I, leftovers: L) -> PaydayStats
where
    I: IntoIterator<Item = Flow>,
    L: IntoIterator<Item = &'a MoneyBasket>,
{
    let mut tippers = FxHashSet::default();
    let mut tippees = FxHashSet::default();
    let mut stats = PaydayStats::default();
    for flow in flows {
        tippers.insert(flow.tipper);
        tippees.insert(flow.tippee);
        stats.ntransfers += 1;
        if flow.context.is_take() {
            stats.take_volume.add_money(flow.amount);
        } else {
            stats.transfer_volume.add_money(flow.amount);
        }
    }
    for leftover in leftovers {
        stats.leftover_volume += leftover;
    }
    stats.ntippers = tippers.len();
    stats.ntippees = tippees.len();
    stats.nparticipants = tippers.union(&tippees).count();
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::Currency;
    use rust_decimal::Decimal;

    fn eur(cents: i64) -> Money {
        Money::new(Decimal::new(cents, 2), Currency::EUR)
    }

    fn flow(tipper: u64, tippee: u64, team: Option<u64>, cents: i64, context: TransferContext) -> Flow {
        Flow {
            tipper: ParticipantId(tipper),
            tippee: ParticipantId(tippee),
            team: team.map(ParticipantId),
            amount: eur(cents),
            context,
        }
    }

    fn history() -> Vec<Flow> {
        vec![
            flow(1, 2, None, 600, TransferContext::Tip),
            flow(3, 2, None, 100, TransferContext::PartialTip),
            flow(1, 4, Some(10), 50, TransferContext::Take),
            flow(3, 4, Some(10), 25, TransferContext::LeftoverTake),
            flow(3, 5, Some(10), 25, TransferContext::Take),
        ]
    }

    #[test]
    fn participant_aggregates() {
        let stats = compute_participant_stats(history());
        let donor = &stats[&ParticipantId(1)];
        assert_eq!(donor.giving.get(Currency::EUR), eur(650));
        assert!(donor.receiving.is_zero());

        let recipient = &stats[&ParticipantId(2)];
        assert_eq!(recipient.receiving.get(Currency::EUR), eur(700));
        assert_eq!(recipient.npatrons, 2);

        let member = &stats[&ParticipantId(4)];
        assert_eq!(member.taking.get(Currency::EUR), eur(75));
        assert_eq!(member.nteampatrons, 2);
        assert_eq!(member.npatrons, 0);

        let team = &stats[&ParticipantId(10)];
        assert_eq!(team.receiving.get(Currency::EUR), eur(100));
        assert_eq!(team.npatrons, 2);
    }

    #[test]
    fn recomputing_converges_to_the_same_values() {
        let first = compute_participant_stats(history());
        let second = compute_participant_stats(history());
        assert_eq!(first, second);
    }

    #[test]
    fn payday_aggregates() {
        let leftover: MoneyBasket = eur(150).into();
        let stats = compute_payday_stats(history(), [&leftover]);
        assert_eq!(stats.ntransfers, 5);
        assert_eq!(stats.ntippers, 2);
        assert_eq!(stats.ntippees, 3);
        assert_eq!(stats.nparticipants, 5);
        assert_eq!(stats.transfer_volume.get(Currency::EUR), eur(700));
        assert_eq!(stats.take_volume.get(Currency::EUR), eur(100));
        assert_eq!(stats.leftover_volume.get(Currency::EUR), eur(150));
    }

    fn transfer(id: u64, payday: u64, tippee: u64, team: Option<u64>, cents: i64) -> Transfer {
        use crate::model::TransferId;
        use chrono::{TimeZone, Utc};
        Transfer {
            id: TransferId(id),
            payday: PaydayId(payday),
            tipper: ParticipantId(1),
            tippee: ParticipantId(tippee),
            amount: eur(cents),
            context: if team.is_some() {
                TransferContext::Take
            } else {
                TransferContext::Tip
            },
            team: team.map(ParticipantId),
            timestamp: Utc.timestamp_opt(0, 0).single().expect("valid timestamp"),
            status: TransferStatus::Succeeded,
        }
    }

    #[test]
    fn failed_transfers_are_ignored() {
        let mut transfer = transfer(1, 1, 2, None, 100);
        assert!(Flow::from_transfer(&transfer).is_some());
        transfer.status = TransferStatus::Failed;
        assert!(Flow::from_transfer(&transfer).is_none());
    }

    #[test]
    fn team_history_sums_past_paydays_only() {
        let mut failed = transfer(4, 1, 3, Some(10), 999);
        failed.status = TransferStatus::Failed;
        let history = vec![
            transfer(1, 1, 2, Some(10), 100),
            transfer(2, 2, 3, Some(10), 50),
            transfer(3, 3, 2, Some(10), 70),
            transfer(5, 1, 2, None, 500),
            failed,
        ];
        let past = past_team_transfers(&history, Some(PaydayId(3))).expect("single currency");
        assert_eq!(past.len(), 1);
        assert_eq!(past[&(ParticipantId(1), ParticipantId(10))], eur(150));
    }
}
