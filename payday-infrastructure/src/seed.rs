//! JSON seed files for the in-memory store.

use payday_domain::{Currency, Participant, Take, Tip, Transfer};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::{fs, path::Path};
use thiserror::Error;

use crate::rates::StaticRateTable;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("cannot read seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed seed file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Units of `currency` per unit of the pivot currency.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RateEntry {
    pub currency: Currency,
    pub rate: Decimal,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Seed {
    #[serde(default = "default_pivot")]
    pub pivot: Currency,
    #[serde(default)]
    pub rates: Vec<RateEntry>,
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub tips: Vec<Tip>,
    #[serde(default)]
    pub takes: Vec<Take>,
    /// History of earlier cycles.
    #[serde(default)]
    pub transfers: Vec<Transfer>,
}

fn default_pivot() -> Currency {
    Currency::EUR
}

impl Seed {
    pub fn from_json(json: &str) -> Result<Self, SeedError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn rate_table(&self) -> StaticRateTable {
        self.rates
            .iter()
            .fold(StaticRateTable::new(self.pivot), |table, entry| {
                table.with_rate(entry.currency, entry.rate)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payday_domain::{ExchangeRates, Money, ParticipantId, TipId};

    const SEED: &str = r#"{
        "rates": [{ "currency": "USD", "rate": "1.25" }],
        "participants": [
            { "id": 1, "kind": "individual", "main_currency": "EUR",
              "balance": { "EUR": "3.00" } },
            { "id": 2, "kind": "individual", "main_currency": "EUR" }
        ],
        "tips": [
            { "id": 1, "tipper": 1, "tippee": 2,
              "amount": { "amount": "6.00", "currency": "EUR" },
              "paid_in_advance": { "amount": "6.00", "currency": "EUR" },
              "mtime": "2026-01-01T00:00:00Z" }
        ]
    }"#;

    #[test]
    fn parses_a_minimal_seed() {
        let seed = Seed::from_json(SEED).expect("valid seed");
        assert_eq!(seed.participants.len(), 2);
        assert!(seed.participants[1].has_payout_method);
        assert_eq!(
            seed.participants[0].balance.get(Currency::EUR),
            Money::new(Decimal::new(300, 2), Currency::EUR)
        );
        assert_eq!(seed.tips[0].id, TipId(1));
        assert_eq!(seed.tips[0].tippee, ParticipantId(2));
        assert!(seed.takes.is_empty());
        assert_eq!(
            seed.rate_table().rate(Currency::EUR, Currency::USD),
            Some(Decimal::new(125, 2))
        );
    }

    #[test]
    fn demo_seed_is_well_formed() {
        let seed = Seed::from_json(include_str!("../../demos/busy_cycle.json")).expect("valid seed");
        assert_eq!(seed.participants.len(), 9);
        assert!(seed.participants.iter().any(|p| p.is_team()));
        assert!(seed.tips.iter().all(|tip| tip.validate().is_ok()));
        assert_eq!(seed.takes.len(), 2);
    }

    #[test]
    fn rejects_unknown_currency_codes() {
        let json = SEED.replace("\"main_currency\": \"EUR\" }", "\"main_currency\": \"eur\" }");
        assert!(matches!(Seed::from_json(&json), Err(SeedError::Json(_))));
    }
}
