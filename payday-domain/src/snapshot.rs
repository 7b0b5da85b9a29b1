//! Consistent view of participants, tips and takes as of a cutoff.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    currency::Currency,
    model::{Participant, ParticipantId, Take, Tip},
    money::{ExchangeRates, Money},
};

/// Input of one settlement run.
///
/// Built with [`Snapshot::prepare`], which keeps only the current record of each
/// relationship and only records whose parties can take part in a payday.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub cutoff: Option<DateTime<Utc>>,
    pub participants: BTreeMap<ParticipantId, Participant>,
    /// Current tips, ordered by id.
    pub tips: Vec<Tip>,
    /// Current takes, ordered by (team, member).
    pub takes: Vec<Take>,
    /// Succeeded transfers of past cycles from a donor into a team, per (tipper, team).
    pub past_team_transfers: BTreeMap<(ParticipantId, ParticipantId), Money>,
    /// Recipients with pending donations and no way to be paid out.
    pub awaiting_payout: BTreeSet<ParticipantId>,
}

impl Snapshot {
    /// Selects current records from append-only history.
    ///
    /// The current tip of a (tipper, tippee) pair is the one with the latest
    /// `mtime` not after `cutoff`, ties going to the highest id. Takes are
    /// selected the same way per (team, member). Malformed records are logged
    /// and dropped. Tips and takes whose recipient lacks a payout method are
    /// held back, and the recipient is listed in `awaiting_payout`.
    pub fn prepare<P, T, K>(
        cutoff: DateTime<Utc>,
        participants: P,
        tip_history: T,
        take_history: K,
    ) -> Self
    where
        P: IntoIterator<Item = Participant>,
        T: IntoIterator<Item = Tip>,
        K: IntoIterator<Item = Take>,
    {
        let participants: BTreeMap<ParticipantId, Participant> = participants
            .into_iter()
            .map(|participant| (participant.id, participant))
            .collect();

        let mut current_tips: BTreeMap<(ParticipantId, ParticipantId), Tip> = BTreeMap::new();
        for tip in tip_history {
            if tip.mtime > cutoff {
                continue;
            }
            let key = (tip.tipper, tip.tippee);
            let newer = current_tips
                .get(&key)
                .is_none_or(|held| (tip.mtime, tip.id) > (held.mtime, held.id));
            if newer {
                current_tips.insert(key, tip);
            }
        }

        let mut current_takes: BTreeMap<(ParticipantId, ParticipantId), Take> = BTreeMap::new();
        for take in take_history {
            if take.mtime > cutoff {
                continue;
            }
            let key = (take.team, take.member);
            let newer = current_takes
                .get(&key)
                .is_none_or(|held| (take.mtime, take.id) > (held.mtime, held.id));
            if newer {
                current_takes.insert(key, take);
            }
        }

        let eligible = |id: &ParticipantId| {
            participants
                .get(id)
                .is_some_and(Participant::is_eligible)
        };

        let can_receive = |id: &ParticipantId| {
            participants
                .get(id)
                .is_some_and(|participant| participant.is_team() || participant.has_payout_method)
        };
        let mut awaiting_payout = BTreeSet::new();

        let mut tips: Vec<Tip> = current_tips
            .into_values()
            .filter(|tip| {
                if let Err(error) = tip.validate() {
                    tracing::warn!(tip = tip.id.0, error = %error, "Skipping malformed tip");
                    return false;
                }
                if !(eligible(&tip.tipper) && eligible(&tip.tippee)) {
                    return false;
                }
                if !can_receive(&tip.tippee) {
                    awaiting_payout.insert(tip.tippee);
                    return false;
                }
                true
            })
            .collect();
        tips.sort_by_key(|tip| tip.id);

        let takes: Vec<Take> = current_takes
            .into_values()
            .filter(|take| {
                if let Err(error) = take.validate() {
                    tracing::warn!(
                        team = %take.team,
                        member = %take.member,
                        error = %error,
                        "Skipping malformed take"
                    );
                    return false;
                }
                let is_team = participants
                    .get(&take.team)
                    .is_some_and(|team| team.is_team() && team.is_eligible());
                if !(is_team && eligible(&take.member)) {
                    return false;
                }
                if !can_receive(&take.member) {
                    awaiting_payout.insert(take.member);
                    return false;
                }
                true
            })
            .collect();

        Self {
            cutoff: Some(cutoff),
            participants,
            tips,
            takes,
            past_team_transfers: BTreeMap::new(),
            awaiting_payout,
        }
    }

    pub fn with_past_team_transfers(
        mut self,
        past: BTreeMap<(ParticipantId, ParticipantId), Money>,
    ) -> Self {
        self.past_team_transfers = past;
        self
    }

    /// Drops team tips and takes whose amounts `rates` cannot convert to and
    /// from the team's currency.
    pub fn keep_convertible(mut self, rates: &dyn ExchangeRates) -> Self {
        let participants = &self.participants;
        let team_currency = |id: ParticipantId| {
            participants
                .get(&id)
                .filter(|participant| participant.is_team())
                .map(|team| team.main_currency)
        };
        let convertible = |money: Money, team: Currency| {
            let currency = money.currency();
            currency == team
                || (rates.rate(currency, team).is_some() && rates.rate(team, currency).is_some())
        };

        self.tips.retain(|tip| {
            let Some(currency) = team_currency(tip.tippee) else {
                return true;
            };
            if convertible(tip.amount, currency) {
                return true;
            }
            tracing::warn!(
                tip = tip.id.0,
                team = %tip.tippee,
                currency = %tip.amount.currency(),
                "Skipping tip without exchange rate to the team currency"
            );
            false
        });
        self.takes.retain(|take| {
            let Some(currency) = team_currency(take.team) else {
                return true;
            };
            let ok = take
                .amount
                .iter()
                .chain(take.paid_in_advance.iter())
                .all(|money| convertible(*money, currency));
            if !ok {
                tracing::warn!(
                    team = %take.team,
                    member = %take.member,
                    "Skipping take without exchange rate to the team currency"
                );
            }
            ok
        });
        self
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn is_team(&self, id: ParticipantId) -> bool {
        self.participant(id).is_some_and(Participant::is_team)
    }

    pub fn takes_of(&self, team: ParticipantId) -> impl Iterator<Item = &Take> + '_ {
        self.takes.iter().filter(move |take| take.team == team)
    }

    pub fn tips_to(&self, tippee: ParticipantId) -> impl Iterator<Item = &Tip> + '_ {
        self.tips.iter().filter(move |tip| tip.tippee == tippee)
    }

    pub fn past_transfers(&self, tipper: ParticipantId, team: ParticipantId) -> Option<Money> {
        self.past_team_transfers.get(&(tipper, team)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        currency::Currency,
        model::{ParticipantKind, ParticipantStatus, TakeId, TipId},
    };
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use std::collections::HashMap;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    fn eur(cents: i64) -> Money {
        Money::new(Decimal::new(cents, 2), Currency::EUR)
    }

    fn person(id: u64) -> Participant {
        Participant::new(ParticipantId(id), ParticipantKind::Individual, Currency::EUR)
    }

    fn tip(id: u64, tipper: u64, tippee: u64, cents: i64, mtime: i64) -> Tip {
        Tip {
            id: TipId(id),
            tipper: ParticipantId(tipper),
            tippee: ParticipantId(tippee),
            amount: eur(cents),
            paid_in_advance: None,
            renewal_mode: Default::default(),
            mtime: at(mtime),
        }
    }

    #[test]
    fn latest_tip_per_pair_wins() {
        let snapshot = Snapshot::prepare(
            at(100),
            [person(1), person(2)],
            [tip(1, 1, 2, 100, 10), tip(2, 1, 2, 200, 20), tip(3, 1, 2, 300, 200)],
            Vec::<Take>::new(),
        );
        assert_eq!(snapshot.tips.len(), 1);
        assert_eq!(snapshot.tips[0].amount, eur(200));
    }

    #[test]
    fn ties_on_mtime_go_to_highest_id() {
        let snapshot = Snapshot::prepare(
            at(100),
            [person(1), person(2)],
            [tip(7, 1, 2, 700, 10), tip(4, 1, 2, 400, 10)],
            Vec::<Take>::new(),
        );
        assert_eq!(snapshot.tips[0].id, TipId(7));
    }

    #[test]
    fn drops_suspended_parties_and_malformed_records() {
        let mut suspended = person(3);
        suspended.is_suspended = true;
        let mut closed = person(4);
        closed.status = ParticipantStatus::Closed;
        let snapshot = Snapshot::prepare(
            at(100),
            [person(1), person(2), suspended, closed],
            [
                tip(1, 1, 2, 100, 10),
                tip(2, 1, 3, 100, 10),
                tip(3, 4, 2, 100, 10),
                tip(4, 2, 2, 100, 10),
            ],
            Vec::<Take>::new(),
        );
        let ids: Vec<_> = snapshot.tips.iter().map(|tip| tip.id).collect();
        assert_eq!(ids, vec![TipId(1)]);
    }

    #[test]
    fn recipients_without_payout_method_are_held_back() {
        let mut unpaid = person(2);
        unpaid.has_payout_method = false;
        let snapshot = Snapshot::prepare(
            at(100),
            [person(1), unpaid, person(3)],
            [tip(1, 1, 2, 100, 10), tip(2, 1, 3, 100, 10)],
            Vec::<Take>::new(),
        );
        let ids: Vec<_> = snapshot.tips.iter().map(|tip| tip.id).collect();
        assert_eq!(ids, vec![TipId(2)]);
        assert!(snapshot.awaiting_payout.contains(&ParticipantId(2)));
    }

    #[test]
    fn takes_require_a_team() {
        let team = Participant::new(ParticipantId(10), ParticipantKind::Group, Currency::EUR);
        let take = |id: u64, team: u64, member: u64| Take {
            id: TakeId(id),
            team: ParticipantId(team),
            member: ParticipantId(member),
            amount: Some(eur(100)),
            paid_in_advance: None,
            mtime: at(1),
        };
        let snapshot = Snapshot::prepare(
            at(100),
            [person(1), person(2), team],
            Vec::<Tip>::new(),
            [take(1, 10, 1), take(2, 2, 1)],
        );
        assert_eq!(snapshot.takes.len(), 1);
        assert_eq!(snapshot.takes_of(ParticipantId(10)).count(), 1);
    }

    #[test]
    fn sub_cent_records_are_skipped() {
        let team = Participant::new(ParticipantId(10), ParticipantKind::Group, Currency::EUR);
        let take = Take {
            id: TakeId(1),
            team: ParticipantId(10),
            member: ParticipantId(2),
            amount: Some(Money::new(Decimal::new(125, 3), Currency::EUR)),
            paid_in_advance: Some(eur(100)),
            mtime: at(1),
        };
        let mut sub_cent_tip = tip(2, 1, 10, 26, 1);
        sub_cent_tip.amount = Money::new(Decimal::new(265, 3), Currency::EUR);
        let snapshot = Snapshot::prepare(
            at(100),
            [person(1), person(2), team],
            [tip(1, 1, 2, 26, 1), sub_cent_tip],
            [take],
        );
        let ids: Vec<_> = snapshot.tips.iter().map(|tip| tip.id).collect();
        assert_eq!(ids, vec![TipId(1)]);
        assert!(snapshot.takes.is_empty());
    }

    #[test]
    fn records_without_rate_to_the_team_currency_are_skipped() {
        let rates: HashMap<(Currency, Currency), Decimal> =
            HashMap::from([((Currency::EUR, Currency::USD), Decimal::new(125, 2))]);
        let team = Participant::new(ParticipantId(10), ParticipantKind::Group, Currency::EUR);
        let in_currency = |id: u64, tipper: u64, currency: Currency| Tip {
            amount: Money::new(Decimal::ONE, currency),
            ..tip(id, tipper, 10, 0, 1)
        };
        let take = |id: u64, member: u64, currency: Currency| Take {
            id: TakeId(id),
            team: ParticipantId(10),
            member: ParticipantId(member),
            amount: Some(Money::new(Decimal::ONE, currency)),
            paid_in_advance: Some(Money::new(Decimal::ONE, currency)),
            mtime: at(1),
        };
        let snapshot = Snapshot::prepare(
            at(100),
            [person(1), person(2), person(3), team],
            [
                in_currency(1, 1, Currency::USD),
                in_currency(2, 2, Currency::GBP),
                tip(3, 1, 2, 100, 1),
            ],
            [take(1, 2, Currency::EUR), take(2, 3, Currency::CHF)],
        )
        .keep_convertible(&rates);

        let ids: Vec<_> = snapshot.tips.iter().map(|tip| tip.id).collect();
        assert_eq!(ids, vec![TipId(1), TipId(3)]);
        let members: Vec<_> = snapshot.takes.iter().map(|take| take.member).collect();
        assert_eq!(members, vec![ParticipantId(2)]);
    }
}
