//! Currency-tagged amounts.
//!
//! Arithmetic between two [`Money`] values of different currencies is rejected
//! with [`MoneyError::CurrencyMismatch`]. The only operation allowed to cross
//! currencies silently is [`MoneyBasket::fuzzy_sum`], whose result is a
//! [`FuzzyMoney`] that cannot be stored as an authoritative amount.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    fmt,
    ops::{Add, AddAssign, Neg, Sub, SubAssign},
};
use thiserror::Error;

use crate::currency::Currency;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("cannot combine {left} with {right}")]
    CurrencyMismatch { left: Currency, right: Currency },
    #[error("division by zero")]
    DivisionByZero,
    #[error("no exchange rate from {from} to {to}")]
    MissingRate { from: Currency, to: Currency },
    #[error("decimal overflow")]
    Overflow,
    #[error("invalid currency code {0:?}")]
    InvalidCurrency(String),
}

/// Point-in-time exchange-rate oracle.
pub trait ExchangeRates: Send + Sync {
    /// Units of `to` per unit of `from`.
    fn rate(&self, from: Currency, to: Currency) -> Option<Decimal>;
}

impl ExchangeRates for HashMap<(Currency, Currency), Decimal> {
    fn rate(&self, from: Currency, to: Currency) -> Option<Decimal> {
        if from == to {
            return Some(Decimal::ONE);
        }
        self.get(&(from, to)).copied().or_else(|| {
            self.get(&(to, from))
                .filter(|rate| !rate.is_zero())
                .map(|rate| Decimal::ONE / *rate)
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(Decimal::ZERO, currency)
    }

    /// Smallest positive amount representable in `currency`.
    pub fn minimum(currency: Currency) -> Self {
        Self::new(currency.minimum_unit(), currency)
    }

    pub fn amount(self) -> Decimal {
        self.amount
    }

    pub fn currency(self) -> Currency {
        self.currency
    }

    pub fn is_zero(self) -> bool {
        self.amount.is_zero()
    }

    pub fn is_positive(self) -> bool {
        self.amount > Decimal::ZERO
    }

    pub fn is_negative(self) -> bool {
        self.amount < Decimal::ZERO
    }

    pub fn abs(self) -> Self {
        Self::new(self.amount.abs(), self.currency)
    }

    fn same_currency(self, other: Money) -> Result<(), MoneyError> {
        if self.currency == other.currency {
            Ok(())
        } else {
            Err(MoneyError::CurrencyMismatch {
                left: self.currency,
                right: other.currency,
            })
        }
    }

    pub fn checked_add(self, rhs: Money) -> Result<Money, MoneyError> {
        self.same_currency(rhs)?;
        let amount = self
            .amount
            .checked_add(rhs.amount)
            .ok_or(MoneyError::Overflow)?;
        Ok(Self::new(amount, self.currency))
    }

    pub fn checked_sub(self, rhs: Money) -> Result<Money, MoneyError> {
        self.same_currency(rhs)?;
        let amount = self
            .amount
            .checked_sub(rhs.amount)
            .ok_or(MoneyError::Overflow)?;
        Ok(Self::new(amount, self.currency))
    }

    /// Scalar multiplication. Multiplying two amounts has no meaning and is not offered.
    pub fn checked_mul(self, factor: Decimal) -> Result<Money, MoneyError> {
        let amount = self
            .amount
            .checked_mul(factor)
            .ok_or(MoneyError::Overflow)?;
        Ok(Self::new(amount, self.currency))
    }

    /// Scalar division, `Money / scalar -> Money`.
    pub fn checked_div(self, divisor: Decimal) -> Result<Money, MoneyError> {
        if divisor.is_zero() {
            return Err(MoneyError::DivisionByZero);
        }
        let amount = self
            .amount
            .checked_div(divisor)
            .ok_or(MoneyError::Overflow)?;
        Ok(Self::new(amount, self.currency))
    }

    /// Dimensionless ratio, `Money / Money -> scalar`.
    pub fn ratio(self, denominator: Money) -> Result<Decimal, MoneyError> {
        self.same_currency(denominator)?;
        if denominator.is_zero() {
            return Err(MoneyError::DivisionByZero);
        }
        self.amount
            .checked_div(denominator.amount)
            .ok_or(MoneyError::Overflow)
    }

    pub fn try_cmp(self, other: Money) -> Result<Ordering, MoneyError> {
        if self.currency != other.currency && (self.is_zero() || other.is_zero()) {
            return Ok(self.amount.cmp(&other.amount));
        }
        self.same_currency(other)?;
        Ok(self.amount.cmp(&other.amount))
    }

    pub fn try_min(self, other: Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        Ok(if other.amount < self.amount {
            other
        } else {
            self
        })
    }

    pub fn try_max(self, other: Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        Ok(if other.amount > self.amount {
            other
        } else {
            self
        })
    }

    /// Clamps negative amounts to zero.
    pub fn floor_zero(self) -> Money {
        if self.is_negative() {
            Self::zero(self.currency)
        } else {
            self
        }
    }

    fn round_with(self, strategy: RoundingStrategy) -> Money {
        Self::new(
            self.amount
                .round_dp_with_strategy(self.currency.exponent(), strategy),
            self.currency,
        )
    }

    /// Rounds half away from zero to the minimum unit.
    pub fn round(self) -> Money {
        self.round_with(RoundingStrategy::MidpointAwayFromZero)
    }

    pub fn round_up(self) -> Money {
        self.round_with(RoundingStrategy::ToPositiveInfinity)
    }

    pub fn round_down(self) -> Money {
        self.round_with(RoundingStrategy::ToNegativeInfinity)
    }

    /// True when the amount is a whole number of minimum units.
    pub fn is_quantized(self) -> bool {
        self.round_down().amount == self.amount
    }

    pub fn convert(self, target: Currency, rates: &dyn ExchangeRates) -> Result<Money, MoneyError> {
        if self.currency == target {
            return Ok(self);
        }
        let rate = rates
            .rate(self.currency, target)
            .ok_or(MoneyError::MissingRate {
                from: self.currency,
                to: target,
            })?;
        let amount = self
            .amount
            .checked_mul(rate)
            .ok_or(MoneyError::Overflow)?;
        Ok(Self::new(amount, target).round())
    }

    pub fn sum<I>(values: I, currency: Currency) -> Result<Money, MoneyError>
    where
        I: IntoIterator<Item = Money>,
    {
        values
            .into_iter()
            .try_fold(Self::zero(currency), |acc, value| acc.checked_add(value))
    }
}

impl PartialOrd for Money {
    /// Amounts of different currencies are unordered, except against zero.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.try_cmp(*other).ok()
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Self::Output {
        Self::new(-self.amount, self.currency)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// Result of a cross-currency sum. Only suitable for proportional-splitting decisions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FuzzyMoney {
    approximate: Money,
    fuzzy: bool,
}

impl FuzzyMoney {
    pub fn approximate(self) -> Money {
        self.approximate
    }

    /// True when at least one conversion went into the sum.
    pub fn is_fuzzy(self) -> bool {
        self.fuzzy
    }
}

/// Amounts in several currencies, zero entries pruned.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MoneyBasket(BTreeMap<Currency, Decimal>);

impl MoneyBasket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_money(&mut self, money: Money) {
        let entry = self.0.entry(money.currency).or_insert(Decimal::ZERO);
        *entry += money.amount;
        if entry.is_zero() {
            self.0.remove(&money.currency);
        }
    }

    pub fn sub_money(&mut self, money: Money) {
        self.add_money(-money);
    }

    pub fn get(&self, currency: Currency) -> Money {
        Money::new(
            self.0.get(&currency).copied().unwrap_or(Decimal::ZERO),
            currency,
        )
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_negative(&self) -> bool {
        self.0.values().any(|amount| *amount < Decimal::ZERO)
    }

    pub fn currencies(&self) -> impl Iterator<Item = Currency> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = Money> + '_ {
        self.0
            .iter()
            .map(|(currency, amount)| Money::new(*amount, *currency))
    }

    /// Converts every entry into `target` and adds them up.
    ///
    /// Fails only when the rate table lacks a needed rate.
    pub fn fuzzy_sum(
        &self,
        target: Currency,
        rates: &dyn ExchangeRates,
    ) -> Result<FuzzyMoney, MoneyError> {
        let mut total = Decimal::ZERO;
        let mut fuzzy = false;
        for money in self.iter() {
            if money.currency == target {
                total += money.amount;
                continue;
            }
            let rate = rates
                .rate(money.currency, target)
                .ok_or(MoneyError::MissingRate {
                    from: money.currency,
                    to: target,
                })?;
            total += money
                .amount
                .checked_mul(rate)
                .ok_or(MoneyError::Overflow)?;
            fuzzy = true;
        }
        Ok(FuzzyMoney {
            approximate: Money::new(total, target).round(),
            fuzzy,
        })
    }
}

impl FromIterator<Money> for MoneyBasket {
    fn from_iter<T: IntoIterator<Item = Money>>(iter: T) -> Self {
        let mut basket = Self::new();
        for money in iter {
            basket.add_money(money);
        }
        basket
    }
}

impl From<Money> for MoneyBasket {
    fn from(value: Money) -> Self {
        std::iter::once(value).collect()
    }
}

impl AddAssign<&MoneyBasket> for MoneyBasket {
    fn add_assign(&mut self, rhs: &MoneyBasket) {
        for money in rhs.iter() {
            self.add_money(money);
        }
    }
}

impl SubAssign<&MoneyBasket> for MoneyBasket {
    fn sub_assign(&mut self, rhs: &MoneyBasket) {
        for money in rhs.iter() {
            self.sub_money(money);
        }
    }
}

impl Add<&MoneyBasket> for MoneyBasket {
    type Output = MoneyBasket;

    fn add(mut self, rhs: &MoneyBasket) -> Self::Output {
        self += rhs;
        self
    }
}

impl Sub<&MoneyBasket> for MoneyBasket {
    type Output = MoneyBasket;

    fn sub(mut self, rhs: &MoneyBasket) -> Self::Output {
        self -= rhs;
        self
    }
}

impl fmt::Display for MoneyBasket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("0");
        }
        let mut first = true;
        for money in self.iter() {
            if !first {
                f.write_str(" + ")?;
            }
            write!(f, "{money}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use std::str::FromStr;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).expect("valid decimal")
    }

    fn eur(value: &str) -> Money {
        Money::new(dec(value), Currency::EUR)
    }

    fn usd(value: &str) -> Money {
        Money::new(dec(value), Currency::USD)
    }

    #[fixture]
    fn rates() -> HashMap<(Currency, Currency), Decimal> {
        HashMap::from([
            ((Currency::EUR, Currency::USD), dec("1.25")),
            ((Currency::EUR, Currency::JPY), dec("160")),
        ])
    }

    #[rstest]
    #[case::half_up("0.125", "0.13", "0.13", "0.12")]
    #[case::below_half("0.124", "0.12", "0.13", "0.12")]
    #[case::exact("0.10", "0.10", "0.10", "0.10")]
    #[case::negative("-0.125", "-0.13", "-0.12", "-0.13")]
    fn rounding_modes(
        #[case] value: &str,
        #[case] half_up: &str,
        #[case] up: &str,
        #[case] down: &str,
    ) {
        let money = eur(value);
        assert_eq!(money.round(), eur(half_up));
        assert_eq!(money.round_up(), eur(up));
        assert_eq!(money.round_down(), eur(down));
    }

    #[test]
    fn undividable_currency_rounds_to_whole_units() {
        let yen = Money::new(dec("150.5"), Currency::JPY);
        assert_eq!(yen.round().amount(), dec("151"));
        assert_eq!(yen.round_down().amount(), dec("150"));
        assert!(!yen.is_quantized());
        assert!(yen.round().is_quantized());
    }

    #[test]
    fn mixed_currency_arithmetic_is_rejected() {
        let expected = MoneyError::CurrencyMismatch {
            left: Currency::EUR,
            right: Currency::USD,
        };
        assert_eq!(eur("1.00").checked_add(usd("1.00")), Err(expected.clone()));
        assert_eq!(eur("1.00").checked_sub(usd("1.00")), Err(expected.clone()));
        assert_eq!(eur("1.00").ratio(usd("1.00")), Err(expected.clone()));
        assert_eq!(eur("1.00").try_cmp(usd("2.00")), Err(expected));
        assert_eq!(eur("1.00").partial_cmp(&usd("2.00")), None);
    }

    #[test]
    fn comparison_with_zero_crosses_currencies() {
        assert_eq!(
            eur("1.00").try_cmp(Money::zero(Currency::USD)),
            Ok(Ordering::Greater)
        );
        assert!(Money::zero(Currency::JPY) < eur("0.01"));
    }

    #[test]
    fn scalar_operations() {
        assert_eq!(eur("1.50").checked_mul(dec("2")), Ok(eur("3.00")));
        assert_eq!(eur("3.00").checked_div(dec("4")), Ok(eur("0.75")));
        assert_eq!(eur("3.00").ratio(eur("1.50")), Ok(dec("2")));
        assert_eq!(
            eur("3.00").checked_div(Decimal::ZERO),
            Err(MoneyError::DivisionByZero)
        );
    }

    #[rstest]
    fn convert_uses_direct_and_inverse_rates(rates: HashMap<(Currency, Currency), Decimal>) {
        assert_eq!(eur("2.00").convert(Currency::USD, &rates), Ok(usd("2.50")));
        assert_eq!(usd("2.50").convert(Currency::EUR, &rates), Ok(eur("2.00")));
        assert_eq!(
            eur("1.00").convert(Currency::GBP, &rates),
            Err(MoneyError::MissingRate {
                from: Currency::EUR,
                to: Currency::GBP,
            })
        );
    }

    #[test]
    fn basket_prunes_zero_entries() {
        let mut basket: MoneyBasket = [eur("1.00"), usd("2.00")].into_iter().collect();
        basket.sub_money(usd("2.00"));
        assert_eq!(basket.currencies().collect::<Vec<_>>(), vec![Currency::EUR]);
        basket.sub_money(eur("1.00"));
        assert!(basket.is_zero());
        assert_eq!(basket, MoneyBasket::new());
    }

    #[test]
    fn basket_arithmetic() {
        let a: MoneyBasket = [eur("1.00"), usd("2.00")].into_iter().collect();
        let b: MoneyBasket = [eur("0.50")].into_iter().collect();
        let sum = a.clone() + &b;
        assert_eq!(sum.get(Currency::EUR), eur("1.50"));
        assert_eq!(sum.get(Currency::USD), usd("2.00"));
        let diff = a - &b;
        assert_eq!(diff.get(Currency::EUR), eur("0.50"));
        assert!(!diff.has_negative());
    }

    #[rstest]
    fn fuzzy_sum_marks_conversions(rates: HashMap<(Currency, Currency), Decimal>) {
        let single: MoneyBasket = [eur("1.00"), eur("2.00")].into_iter().collect();
        let exact = single.fuzzy_sum(Currency::EUR, &rates).expect("rates");
        assert_eq!(exact.approximate(), eur("3.00"));
        assert!(!exact.is_fuzzy());

        let mixed: MoneyBasket = [eur("1.00"), usd("2.50")].into_iter().collect();
        let fuzzy = mixed.fuzzy_sum(Currency::EUR, &rates).expect("rates");
        assert_eq!(fuzzy.approximate(), eur("3.00"));
        assert!(fuzzy.is_fuzzy());
    }

    #[test]
    fn serde_keeps_amount_and_currency() {
        let money = eur("6.00");
        let json = serde_json::to_string(&money).expect("serialize");
        assert_eq!(json, r#"{"amount":"6.00","currency":"EUR"}"#);
        let basket: MoneyBasket = serde_json::from_str(r#"{"EUR":"1.50","USD":"2"}"#).expect("deserialize");
        assert_eq!(basket.get(Currency::USD), usd("2"));
    }
}
