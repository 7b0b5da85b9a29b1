//! How much each member of a team actually receives in one cycle.

use rust_decimal::{Decimal, MathematicalOps};
use std::collections::BTreeMap;
use thiserror::Error;

use super::amount_resolver::{ResolveError, resolve_amounts};
use crate::{
    currency::Currency,
    model::{ParticipantId, TakeAmount, TipId, TransferContext},
    money::{ExchangeRates, Money, MoneyBasket, MoneyError},
};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TakeResolutionError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Money(#[from] MoneyError),
}

/// Tuning of the catch-up between donors with unequal payment history.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CatchUpPolicy {
    /// Share of its ratio-scaled amount a donor always pays.
    pub min_tip_ratio_factor: Decimal,
    /// Dampens negative weeks of history.
    pub negative_weeks_exponent: Decimal,
}

impl Default for CatchUpPolicy {
    fn default() -> Self {
        Self {
            min_tip_ratio_factor: Decimal::new(1, 1),
            negative_weeks_exponent: Decimal::new(7, 1),
        }
    }
}

/// A donation into the team.
#[derive(Clone, Debug, PartialEq)]
pub struct TeamTip {
    pub id: TipId,
    pub tipper: ParticipantId,
    pub full_amount: Money,
    /// What the donor can spend on this tip this cycle.
    pub spendable: Money,
    /// Paid into this team in past cycles.
    pub past_transfers: Option<Money>,
}

impl TeamTip {
    pub fn funded(&self) -> Result<Money, MoneyError> {
        self.full_amount.try_min(self.spendable.floor_zero())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TeamTake {
    pub member: ParticipantId,
    pub nominal: TakeAmount,
    /// Remaining advance of the take, in its own currency.
    pub paid_in_advance: Money,
    /// Already received this cycle, in the team currency.
    pub received: Money,
    pub main_currency: Currency,
    pub accepted_currencies: Vec<Currency>,
}

impl TeamTake {
    fn preference(&self, currency: Currency) -> u8 {
        if self.main_currency == currency {
            0
        } else if self.accepted_currencies.contains(&currency) {
            1
        } else {
            2
        }
    }
}

/// Money moved from a donor to a member on behalf of the team.
#[derive(Clone, Debug, PartialEq)]
pub struct TakeTransfer {
    pub tip: TipId,
    pub tipper: ParticipantId,
    pub member: ParticipantId,
    /// In the tip currency.
    pub amount: Money,
    /// Take advance consumed, in the advance currency.
    pub take_advance: Money,
    pub context: TransferContext,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TakeResolution {
    /// Funded income, summed in the team currency.
    pub income: Money,
    /// Resolved take of each active member, in the team currency.
    pub takes: BTreeMap<ParticipantId, Money>,
    pub tips_ratio: Decimal,
    /// What each donor pays toward the takes, before leftover distribution.
    pub tip_amounts: BTreeMap<TipId, Money>,
    pub transfers: Vec<TakeTransfer>,
    /// Funded income nobody took.
    pub leftover: MoneyBasket,
}

impl TakeResolution {
    fn empty(currency: Currency) -> Self {
        Self {
            income: Money::zero(currency),
            takes: BTreeMap::new(),
            tips_ratio: Decimal::ZERO,
            tip_amounts: BTreeMap::new(),
            transfers: Vec::new(),
            leftover: MoneyBasket::new(),
        }
    }

    pub fn transferred(&self) -> MoneyBasket {
        self.transfers.iter().map(|transfer| transfer.amount).collect()
    }
}

struct TipCursor {
    id: TipId,
    tipper: ParticipantId,
    left: Money,
}

struct TakeCursor<'t> {
    take: &'t TeamTake,
    /// Team currency.
    left: Money,
    /// Advance currency.
    advance: Money,
}

/// Team take resolution service.
pub struct TakeResolver<'a> {
    rates: &'a dyn ExchangeRates,
    policy: CatchUpPolicy,
}

impl<'a> TakeResolver<'a> {
    pub fn new(rates: &'a dyn ExchangeRates, policy: CatchUpPolicy) -> Self {
        Self { rates, policy }
    }

    /// Resolves the takes of `team` against its funded incoming tips.
    ///
    /// Tips are matched to takes in ascending tip id order. A member never
    /// receives more than `min(nominal take, take advance)`, and a donor never
    /// pays a take of their own.
    pub fn resolve_takes(
        &self,
        team: ParticipantId,
        currency: Currency,
        tips: &[TeamTip],
        takes: &[TeamTake],
    ) -> Result<TakeResolution, TakeResolutionError> {
        let mut funded: Vec<(&TeamTip, Money)> = Vec::with_capacity(tips.len());
        for tip in tips {
            let amount = tip.funded()?;
            if amount.is_positive() {
                funded.push((tip, amount));
            }
        }
        funded.sort_by_key(|(tip, _)| tip.id);
        let income_basket: MoneyBasket = funded.iter().map(|(_, amount)| *amount).collect();
        if income_basket.is_zero() {
            return Ok(TakeResolution::empty(currency));
        }
        let income = income_basket.fuzzy_sum(currency, self.rates)?.approximate();

        let mut active = Vec::new();
        let mut leftover_only = Vec::new();
        for take in takes {
            if take.paid_in_advance.is_negative() {
                continue;
            }
            match take.nominal {
                TakeAmount::Fixed(amount) if amount.is_zero() => {
                    if take.paid_in_advance.is_positive() {
                        leftover_only.push(take);
                    }
                }
                _ if take.paid_in_advance.is_zero() => {}
                _ => active.push(take),
            }
        }

        let mut manual_sum = Money::zero(currency);
        let mut auto_count = 0u32;
        let mut fixed: BTreeMap<ParticipantId, Money> = BTreeMap::new();
        for take in &active {
            match take.nominal {
                TakeAmount::Fixed(amount) => {
                    let remaining = amount
                        .convert(currency, self.rates)?
                        .checked_sub(take.received)?
                        .floor_zero();
                    manual_sum = manual_sum.checked_add(remaining)?;
                    fixed.insert(take.member, remaining);
                }
                TakeAmount::Auto => auto_count += 1,
            }
        }
        let auto_take = if auto_count == 0 {
            Money::zero(currency)
        } else {
            income
                .checked_sub(manual_sum)?
                .floor_zero()
                .checked_div(Decimal::from(auto_count))?
                .round_down()
        };

        let mut base = BTreeMap::new();
        let mut maximum = BTreeMap::new();
        for take in &active {
            let nominal = fixed.get(&take.member).copied().unwrap_or(auto_take);
            let advance = take.paid_in_advance.convert(currency, self.rates)?;
            base.insert(take.member, nominal);
            maximum.insert(take.member, nominal.try_min(advance)?);
        }
        let capacity = Money::sum(maximum.values().copied(), currency)?;
        let resolved = resolve_amounts(income.try_min(capacity)?, &base, None, Some(&maximum))?;
        let takes_sum = Money::sum(resolved.values().copied(), currency)?;
        let tips_ratio = if income.is_positive() {
            takes_sum.ratio(income)?.min(Decimal::ONE)
        } else {
            Decimal::ZERO
        };

        let tip_amounts = self.tip_amounts(currency, &funded, takes_sum, tips_ratio)?;

        let mut tip_cursors: Vec<TipCursor> = funded
            .iter()
            .map(|(tip, amount)| TipCursor {
                id: tip.id,
                tipper: tip.tipper,
                left: tip_amounts.get(&tip.id).copied().unwrap_or(Money::zero(amount.currency())),
            })
            .collect();
        let mut take_cursors: Vec<TakeCursor<'_>> = active
            .iter()
            .filter_map(|take| {
                resolved.get(&take.member).map(|amount| TakeCursor {
                    take: *take,
                    left: *amount,
                    advance: take.paid_in_advance,
                })
            })
            .collect();
        let mut transfers = self.match_transfers(
            currency,
            &mut tip_cursors,
            &mut take_cursors,
            TransferContext::Take,
        )?;

        // Whatever the takes did not absorb goes to members who only collect leftovers.
        let mut residual: Vec<TipCursor> = Vec::with_capacity(funded.len());
        for (tip, amount) in &funded {
            let paid = transfers
                .iter()
                .filter(|transfer| transfer.tip == tip.id)
                .try_fold(Money::zero(amount.currency()), |acc, transfer| {
                    acc.checked_add(transfer.amount)
                })?;
            residual.push(TipCursor {
                id: tip.id,
                tipper: tip.tipper,
                left: amount.checked_sub(paid)?,
            });
        }
        if !leftover_only.is_empty() {
            let residual_basket: MoneyBasket = residual.iter().map(|tip| tip.left).collect();
            let residual_sum = residual_basket.fuzzy_sum(currency, self.rates)?.approximate();
            let mut advances = BTreeMap::new();
            for take in &leftover_only {
                advances.insert(take.member, take.paid_in_advance.convert(currency, self.rates)?);
            }
            let capacity = Money::sum(advances.values().copied(), currency)?;
            let shares = resolve_amounts(
                residual_sum.try_min(capacity)?,
                &advances,
                None,
                Some(&advances),
            )?;
            let mut leftover_cursors: Vec<TakeCursor<'_>> = leftover_only
                .iter()
                .filter_map(|take| {
                    shares.get(&take.member).map(|amount| TakeCursor {
                        take: *take,
                        left: *amount,
                        advance: take.paid_in_advance,
                    })
                })
                .collect();
            transfers.extend(self.match_transfers(
                currency,
                &mut residual,
                &mut leftover_cursors,
                TransferContext::LeftoverTake,
            )?);
        }
        let leftover: MoneyBasket = residual.iter().map(|tip| tip.left).collect();

        tracing::debug!(
            team = %team,
            income = %income,
            takes_sum = %takes_sum,
            tips_ratio = %tips_ratio,
            leftover = %leftover,
            "Resolved team takes"
        );

        Ok(TakeResolution {
            income,
            takes: resolved,
            tips_ratio,
            tip_amounts,
            transfers,
            leftover,
        })
    }

    /// Scales funded tips down to what the takes absorb, adjusted for donor history.
    fn tip_amounts(
        &self,
        currency: Currency,
        funded: &[(&TeamTip, Money)],
        takes_sum: Money,
        tips_ratio: Decimal,
    ) -> Result<BTreeMap<TipId, Money>, TakeResolutionError> {
        if tips_ratio == Decimal::ONE {
            return Ok(funded.iter().map(|(tip, amount)| (tip.id, *amount)).collect());
        }
        if takes_sum.is_zero() {
            return Ok(BTreeMap::new());
        }

        let mut funded_ref = BTreeMap::new();
        for (tip, amount) in funded {
            funded_ref.insert(tip.id, amount.convert(currency, self.rates)?);
        }
        let capacity = Money::sum(funded_ref.values().copied(), currency)?;
        let naive = resolve_amounts(
            takes_sum.try_min(capacity)?,
            &funded_ref,
            None,
            Some(&funded_ref),
        )?;
        let adjusted = self.catch_up(currency, funded, &funded_ref, naive)?;

        let mut amounts = BTreeMap::new();
        for (tip, amount) in funded {
            let (Some(target), Some(reference)) = (adjusted.get(&tip.id), funded_ref.get(&tip.id))
            else {
                continue;
            };
            if !reference.is_positive() {
                continue;
            }
            let paid = if amount.currency() == currency {
                target.try_min(*amount)?
            } else {
                let ratio = target.ratio(*reference)?;
                amount.checked_mul(ratio)?.round_up().try_min(*amount)?
            };
            if paid.is_positive() {
                amounts.insert(tip.id, paid);
            }
        }
        Ok(amounts)
    }

    /// Shifts part of the naive amounts from donors ahead in history to donors behind.
    fn catch_up(
        &self,
        currency: Currency,
        funded: &[(&TeamTip, Money)],
        funded_ref: &BTreeMap<TipId, Money>,
        naive: BTreeMap<TipId, Money>,
    ) -> Result<BTreeMap<TipId, Money>, TakeResolutionError> {
        let mut weeks: BTreeMap<TipId, Decimal> = BTreeMap::new();
        for (tip, _) in funded {
            let past = match tip.past_transfers {
                Some(past) => past.convert(tip.full_amount.currency(), self.rates)?,
                None => Money::zero(tip.full_amount.currency()),
            };
            let mut count = past.ratio(tip.full_amount)?.ceil();
            if count.is_sign_negative() && !count.is_zero() {
                count = -count.abs().powd(self.policy.negative_weeks_exponent);
            }
            weeks.insert(tip.id, count);
        }
        let (Some(min_weeks), Some(max_weeks)) =
            (weeks.values().min().copied(), weeks.values().max().copied())
        else {
            return Ok(naive);
        };
        let span = max_weeks - min_weeks;
        if span.is_zero() {
            return Ok(naive);
        }

        let naive_total = Money::sum(naive.values().copied(), currency)?;
        if !naive_total.is_positive() {
            return Ok(naive);
        }
        let mut weighted = Decimal::ZERO;
        for (id, amount) in &naive {
            weighted += weeks.get(id).copied().unwrap_or(Decimal::ZERO) * amount.amount();
        }
        let mean = weighted / naive_total.amount();

        let mut down = BTreeMap::new();
        let mut up = BTreeMap::new();
        for (id, count) in &weeks {
            let naive_amount = naive.get(id).copied().unwrap_or(Money::zero(currency));
            if *count > mean {
                let floor = naive_amount.checked_mul(self.policy.min_tip_ratio_factor)?;
                let factor = ((*count - mean) / span).min(Decimal::ONE);
                let leeway = naive_amount.checked_sub(floor)?.checked_mul(factor)?.round_down();
                down.insert(*id, leeway.floor_zero());
            } else if *count < mean {
                let ceiling = funded_ref.get(id).copied().unwrap_or(Money::zero(currency));
                let factor = ((mean - *count) / span).min(Decimal::ONE);
                let leeway = ceiling.checked_sub(naive_amount)?.checked_mul(factor)?.round_down();
                up.insert(*id, leeway.floor_zero());
            }
        }
        let shift = Money::sum(down.values().copied(), currency)?
            .try_min(Money::sum(up.values().copied(), currency)?)?;
        if !shift.is_positive() {
            return Ok(naive);
        }

        let lowered = resolve_amounts(shift, &down, None, Some(&down))?;
        let raised = resolve_amounts(shift, &up, None, Some(&up))?;
        let mut adjusted = naive;
        for (id, amount) in lowered {
            let entry = adjusted.entry(id).or_insert(Money::zero(currency));
            *entry = entry.checked_sub(amount)?;
        }
        for (id, amount) in raised {
            let entry = adjusted.entry(id).or_insert(Money::zero(currency));
            *entry = entry.checked_add(amount)?;
        }
        Ok(adjusted)
    }

    fn match_transfers(
        &self,
        currency: Currency,
        tips: &mut [TipCursor],
        takes: &mut [TakeCursor<'_>],
        context: TransferContext,
    ) -> Result<Vec<TakeTransfer>, MoneyError> {
        let mut transfers = Vec::new();
        for tip in tips.iter_mut() {
            let tip_currency = tip.left.currency();
            let mut order: Vec<usize> = (0..takes.len()).collect();
            order.sort_by_key(|&index| {
                let take = takes[index].take;
                (take.preference(tip_currency), take.member)
            });
            for index in order {
                if !tip.left.is_positive() {
                    break;
                }
                let cursor = &mut takes[index];
                if cursor.take.member == tip.tipper
                    || !cursor.left.is_positive()
                    || !cursor.advance.is_positive()
                {
                    continue;
                }
                let take_room = cursor.left.convert(tip_currency, self.rates)?;
                let advance_room = cursor.advance.convert(tip_currency, self.rates)?;
                let amount = tip.left.try_min(take_room)?.try_min(advance_room)?;
                if !amount.is_positive() {
                    continue;
                }
                tip.left = tip.left.checked_sub(amount)?;
                cursor.left = cursor
                    .left
                    .checked_sub(amount.convert(currency, self.rates)?)?
                    .floor_zero();
                let advance_used = amount
                    .convert(cursor.advance.currency(), self.rates)?
                    .try_min(cursor.advance)?;
                cursor.advance = cursor.advance.checked_sub(advance_used)?;
                transfers.push(TakeTransfer {
                    tip: tip.id,
                    tipper: tip.tipper,
                    member: cursor.take.member,
                    amount,
                    take_advance: advance_used,
                    context,
                });
            }
        }
        Ok(transfers)
    }
}
