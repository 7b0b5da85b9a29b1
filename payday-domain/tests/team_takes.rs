use payday_domain::{
    CatchUpPolicy, Currency, Money, MoneyBasket, MoneyError, ParticipantId, TakeAmount,
    TakeResolver, TipId, TransferContext,
    services::{TeamTake, TeamTip},
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashMap;

fn eur(cents: i64) -> Money {
    Money::new(Decimal::new(cents, 2), Currency::EUR)
}

fn rates() -> HashMap<(Currency, Currency), Decimal> {
    HashMap::from([
        ((Currency::EUR, Currency::USD), Decimal::new(125, 2)),
        ((Currency::EUR, Currency::JPY), Decimal::new(160, 0)),
        ((Currency::USD, Currency::JPY), Decimal::new(128, 0)),
    ])
}

fn team_tips(tips: &[(i64, i64, i64)]) -> Vec<TeamTip> {
    tips.iter()
        .enumerate()
        .map(|(idx, (full, spendable, past))| TeamTip {
            id: TipId(idx as u64 + 1),
            tipper: ParticipantId(idx as u64 + 1),
            full_amount: eur(*full),
            spendable: eur(*spendable),
            past_transfers: Some(eur(*past)),
        })
        .collect()
}

fn team_takes(takes: &[(Option<i64>, i64)]) -> Vec<TeamTake> {
    takes
        .iter()
        .enumerate()
        .map(|(idx, (nominal, advance))| TeamTake {
            // Members never overlap with donors.
            member: ParticipantId(idx as u64 + 1_000),
            nominal: nominal.map_or(TakeAmount::Auto, |cents| TakeAmount::Fixed(eur(cents))),
            paid_in_advance: eur(*advance),
            received: eur(0),
            main_currency: Currency::EUR,
            accepted_currencies: vec![Currency::EUR],
        })
        .collect()
}

proptest! {
    #[test]
    fn funded_income_is_conserved(
        tips in prop::collection::vec((1i64..=2_000, 0i64..=3_000, 0i64..=20_000), 0..=6),
        takes in prop::collection::vec((prop::option::of(0i64..=2_000), -100i64..=3_000), 0..=6),
    ) {
        let rates = rates();
        let resolver = TakeResolver::new(&rates, CatchUpPolicy::default());
        let tips = team_tips(&tips);
        let takes = team_takes(&takes);
        let resolution = resolver
            .resolve_takes(ParticipantId(1), Currency::EUR, &tips, &takes)
            .expect("resolvable");

        let funded: MoneyBasket = tips.iter().map(|tip| tip.funded().expect("eur")).collect();
        let accounted = resolution.transferred() + &resolution.leftover;
        prop_assert_eq!(accounted, funded);
        prop_assert!(!resolution.leftover.has_negative());

        for tip in &tips {
            let paid = Money::sum(
                resolution
                    .transfers
                    .iter()
                    .filter(|transfer| transfer.tip == tip.id)
                    .map(|transfer| transfer.amount),
                Currency::EUR,
            )
            .expect("eur");
            prop_assert!(paid <= tip.funded().expect("eur"));
        }
    }
}

proptest! {
    #[test]
    fn takes_stay_under_nominal_and_advance(
        tips in prop::collection::vec((1i64..=2_000, 0i64..=3_000, 0i64..=20_000), 1..=6),
        takes in prop::collection::vec((prop::option::of(1i64..=2_000), 0i64..=3_000), 1..=6),
    ) {
        let rates = rates();
        let resolver = TakeResolver::new(&rates, CatchUpPolicy::default());
        let tips = team_tips(&tips);
        let takes = team_takes(&takes);
        let resolution = resolver
            .resolve_takes(ParticipantId(1), Currency::EUR, &tips, &takes)
            .expect("resolvable");

        for take in &takes {
            let paid = Money::sum(
                resolution
                    .transfers
                    .iter()
                    .filter(|transfer| {
                        transfer.member == take.member && transfer.context == TransferContext::Take
                    })
                    .map(|transfer| transfer.amount),
                Currency::EUR,
            )
            .expect("eur");
            prop_assert!(paid <= take.paid_in_advance);
            if let TakeAmount::Fixed(nominal) = take.nominal {
                prop_assert!(paid <= nominal);
            }
            if let Some(resolved) = resolution.takes.get(&take.member) {
                prop_assert!(paid <= *resolved);
            }
        }
    }
}

proptest! {
    #[test]
    fn cross_currency_arithmetic_always_fails(
        left in -1_000_000i64..=1_000_000,
        right in -1_000_000i64..=1_000_000,
    ) {
        let euros = eur(left);
        let dollars = Money::new(Decimal::new(right, 2), Currency::USD);
        let mismatch = MoneyError::CurrencyMismatch { left: Currency::EUR, right: Currency::USD };
        prop_assert_eq!(euros.checked_add(dollars), Err(mismatch.clone()));
        prop_assert_eq!(euros.checked_sub(dollars), Err(mismatch.clone()));
        if left != 0 && right != 0 {
            prop_assert_eq!(euros.try_cmp(dollars), Err(mismatch));
        }
    }
}

proptest! {
    #[test]
    fn fuzzy_sum_accepts_any_currency_mix(
        amounts in prop::collection::vec((0usize..3, -100_000i64..=100_000), 0..=10),
        target in 0usize..3,
    ) {
        let currencies = [Currency::EUR, Currency::USD, Currency::JPY];
        let basket: MoneyBasket = amounts
            .iter()
            .map(|(idx, value)| {
                let currency = currencies[*idx];
                Money::new(Decimal::new(*value, currency.exponent()), currency)
            })
            .collect();
        let rates = rates();
        let sum = basket.fuzzy_sum(currencies[target], &rates);
        prop_assert!(sum.is_ok());
        let sum = sum.expect("checked above");
        prop_assert!(sum.approximate().is_quantized());
    }
}
