use fxhash::FxHashMap;
use payday_domain::{Currency, ExchangeRates};
use rust_decimal::Decimal;

/// Fixed rates quoted against one pivot currency.
///
/// The rate between two non-pivot currencies is derived through the pivot.
#[derive(Clone, Debug)]
pub struct StaticRateTable {
    pivot: Currency,
    per_pivot: FxHashMap<Currency, Decimal>,
}

impl StaticRateTable {
    pub fn new(pivot: Currency) -> Self {
        Self {
            pivot,
            per_pivot: FxHashMap::default(),
        }
    }

    /// `rate` units of `currency` buy one unit of the pivot.
    pub fn with_rate(mut self, currency: Currency, rate: Decimal) -> Self {
        if currency != self.pivot && rate.is_sign_positive() && !rate.is_zero() {
            self.per_pivot.insert(currency, rate);
        } else if currency != self.pivot {
            tracing::warn!(currency = %currency, rate = %rate, "Ignoring non-positive exchange rate");
        }
        self
    }

    fn per_pivot(&self, currency: Currency) -> Option<Decimal> {
        if currency == self.pivot {
            Some(Decimal::ONE)
        } else {
            self.per_pivot.get(&currency).copied()
        }
    }
}

impl ExchangeRates for StaticRateTable {
    fn rate(&self, from: Currency, to: Currency) -> Option<Decimal> {
        if from == to {
            return Some(Decimal::ONE);
        }
        self.per_pivot(to)?.checked_div(self.per_pivot(from)?)
    }
}
