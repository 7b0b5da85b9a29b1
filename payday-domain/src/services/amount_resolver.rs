//! Exact proportional splitting of a pool of money.
//!
//! [`resolve_amounts`] splits `available` between keys in proportion to their
//! base amounts so that the parts add up to `available` to the last minimum
//! unit. The flooring remainder is handed out one unit at a time to the keys
//! that are furthest below their ideal share.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::{
    currency::Currency,
    money::{Money, MoneyError},
};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Money(#[from] MoneyError),
    #[error("cannot distribute a negative amount ({0})")]
    NegativeAvailable(Money),
    #[error("{0} is not a whole number of minimum units")]
    NotQuantized(Money),
    #[error("no key can receive any of {0}")]
    NothingToAllocate(Money),
    #[error("maximum amounts leave {left} undistributed")]
    InsufficientCapacity { left: Money },
    #[error("resolved amounts add up to {actual} instead of {expected}")]
    SumMismatch { expected: Money, actual: Money },
}

fn check_currency<'a, K: 'a>(
    currency: Currency,
    amounts: impl IntoIterator<Item = (&'a K, &'a Money)>,
) -> Result<(), MoneyError> {
    for (_, money) in amounts {
        if money.currency() != currency {
            return Err(MoneyError::CurrencyMismatch {
                left: currency,
                right: money.currency(),
            });
        }
    }
    Ok(())
}

fn floor_to_unit(value: Decimal, unit: Decimal) -> Decimal {
    (value / unit).floor() * unit
}

/// Splits `available` between the keys of `base`.
///
/// * Only keys with a positive base take part; keys that end up with nothing
///   are absent from the result.
/// * `convergence` amounts are paid first when they fit in `available`. When
///   they add up to exactly `available` they are returned unchanged; when they
///   exceed it they replace `base` as the proportions to split by.
/// * `maximum` caps what each key may receive. Keys missing from it are uncapped.
///
/// Identical inputs always produce identical outputs.
pub fn resolve_amounts<K>(
    available: Money,
    base: &BTreeMap<K, Money>,
    convergence: Option<&BTreeMap<K, Money>>,
    maximum: Option<&BTreeMap<K, Money>>,
) -> Result<BTreeMap<K, Money>, ResolveError>
where
    K: Ord + Clone,
{
    let currency = available.currency();
    check_currency(currency, base)?;
    if let Some(convergence) = convergence {
        check_currency(currency, convergence)?;
    }
    if let Some(maximum) = maximum {
        check_currency(currency, maximum)?;
    }
    if available.is_negative() {
        return Err(ResolveError::NegativeAvailable(available));
    }
    if !available.is_quantized() {
        return Err(ResolveError::NotQuantized(available));
    }
    if available.is_zero() {
        return Ok(BTreeMap::new());
    }

    let unit = currency.minimum_unit();
    let mut left = available.amount();
    let mut current: BTreeMap<K, Decimal> = BTreeMap::new();
    let mut weights: BTreeMap<K, Decimal> = base
        .iter()
        .filter(|(_, money)| money.is_positive())
        .map(|(key, money)| (key.clone(), money.amount()))
        .collect();

    if let Some(convergence) = convergence {
        let targets: BTreeMap<K, Decimal> = convergence
            .iter()
            .filter(|(_, money)| money.is_positive())
            .map(|(key, money)| (key.clone(), money.amount()))
            .collect();
        let total: Decimal = targets.values().sum();
        if total == available.amount() {
            return Ok(targets
                .into_iter()
                .map(|(key, amount)| (key, Money::new(amount, currency)))
                .collect());
        }
        if total < available.amount() {
            left -= total;
            current = targets;
        } else {
            weights = targets;
        }
    }

    if weights.is_empty() {
        return Err(ResolveError::NothingToAllocate(available));
    }

    let cap = |key: &K| -> Option<Decimal> {
        maximum
            .and_then(|maximum| maximum.get(key))
            .map(|money| money.amount().max(Decimal::ZERO))
    };
    let headroom = |key: &K, current: &BTreeMap<K, Decimal>| -> Option<Decimal> {
        let received = current.get(key).copied().unwrap_or(Decimal::ZERO);
        cap(key).map(|cap| (cap - received).max(Decimal::ZERO))
    };

    // Proportional step, repeated while caps push money back into the pool.
    let distributable = left;
    let upfront = current.clone();
    loop {
        let open: Vec<(&K, Decimal)> = weights
            .iter()
            .filter(|(key, _)| headroom(key, &current).is_none_or(|room| room >= unit))
            .map(|(key, weight)| (key, *weight))
            .collect();
        if open.is_empty() || left < unit {
            break;
        }
        let weight_sum: Decimal = open.iter().map(|(_, weight)| *weight).sum();
        let ratio = left / weight_sum;
        let mut given = Decimal::ZERO;
        let mut capped = false;
        for (key, weight) in open {
            let mut share = floor_to_unit(weight * ratio, unit);
            if let Some(room) = headroom(key, &current) {
                let room = floor_to_unit(room, unit);
                if share >= room {
                    share = room;
                    capped = true;
                }
            }
            share = share.min(left - given);
            if share.is_zero() {
                continue;
            }
            *current.entry(key.clone()).or_insert(Decimal::ZERO) += share;
            given += share;
        }
        left -= given;
        if !capped || given.is_zero() {
            break;
        }
    }

    // Remainder, one minimum unit at a time.
    if left > Decimal::ZERO {
        let weight_sum: Decimal = weights.values().sum();
        let ideals: BTreeMap<&K, Decimal> = weights
            .iter()
            .map(|(key, weight)| {
                let upfront = upfront.get(key).copied().unwrap_or(Decimal::ZERO);
                (key, upfront + weight * distributable / weight_sum)
            })
            .collect();
        while left >= unit {
            let candidate = weights
                .keys()
                .filter(|key| headroom(key, &current).is_none_or(|room| room >= unit))
                .map(|key| {
                    let ideal = ideals[key];
                    let received = current.get(key).copied().unwrap_or(Decimal::ZERO);
                    let shortfall = (received - ideal) / ideal;
                    (shortfall, key)
                })
                .min_by(|(a, _), (b, _)| a.cmp(b));
            let Some((_, key)) = candidate else {
                return Err(ResolveError::InsufficientCapacity {
                    left: Money::new(left, currency),
                });
            };
            *current.entry(key.clone()).or_insert(Decimal::ZERO) += unit;
            left -= unit;
        }
    }

    let resolved: BTreeMap<K, Money> = current
        .into_iter()
        .filter(|(_, amount)| !amount.is_zero())
        .map(|(key, amount)| (key, Money::new(amount, currency)))
        .collect();
    let actual = Money::new(resolved.values().map(|money| money.amount()).sum(), currency);
    if actual != available {
        return Err(ResolveError::SumMismatch {
            expected: available,
            actual,
        });
    }
    Ok(resolved)
}
