use payday_domain::{Currency, Money, resolve_amounts};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

fn cents(value: u64, currency: Currency) -> Money {
    Money::new(Decimal::new(value as i64, currency.exponent()), currency)
}

fn total(amounts: &BTreeMap<usize, Money>, currency: Currency) -> Money {
    Money::sum(amounts.values().copied(), currency).expect("single currency")
}

proptest! {
    #[test]
    fn resolved_amounts_add_up_exactly(
        available in 0u64..=1_000_000,
        bases in prop::collection::vec(1u64..=100_000, 1..=12),
        undividable in any::<bool>(),
    ) {
        let currency = if undividable { Currency::JPY } else { Currency::EUR };
        let base: BTreeMap<usize, Money> = bases
            .iter()
            .enumerate()
            .map(|(idx, value)| (idx, cents(*value, currency)))
            .collect();
        let available = cents(available, currency);

        let resolved = resolve_amounts(available, &base, None, None).expect("resolvable");
        prop_assert_eq!(total(&resolved, currency), available);
        prop_assert!(resolved.values().all(|amount| amount.is_positive() && amount.is_quantized()));
        prop_assert!(resolved.keys().all(|key| base.contains_key(key)));
    }
}

proptest! {
    #[test]
    fn maximum_amounts_are_respected(
        bases in prop::collection::vec((1u64..=10_000, 0u64..=10_000), 1..=10),
        fraction in 0u64..=100,
    ) {
        let currency = Currency::EUR;
        let base: BTreeMap<usize, Money> = bases
            .iter()
            .enumerate()
            .map(|(idx, (value, _))| (idx, cents(*value, currency)))
            .collect();
        let maximum: BTreeMap<usize, Money> = bases
            .iter()
            .enumerate()
            .map(|(idx, (_, cap))| (idx, cents(*cap, currency)))
            .collect();
        let capacity: u64 = bases.iter().map(|(_, cap)| cap).sum();
        let available = cents(capacity * fraction / 100, currency);

        let resolved = resolve_amounts(available, &base, None, Some(&maximum))
            .expect("capacity covers available");
        prop_assert_eq!(total(&resolved, currency), available);
        for (key, amount) in &resolved {
            prop_assert!(*amount <= maximum[key]);
        }
    }
}

proptest! {
    #[test]
    fn convergence_never_breaks_exactness(
        bases in prop::collection::vec((1u64..=10_000, 0u64..=10_000), 1..=8),
        available in 0u64..=50_000,
    ) {
        let currency = Currency::USD;
        let base: BTreeMap<usize, Money> = bases
            .iter()
            .enumerate()
            .map(|(idx, (value, _))| (idx, cents(*value, currency)))
            .collect();
        let convergence: BTreeMap<usize, Money> = bases
            .iter()
            .enumerate()
            .map(|(idx, (_, target))| (idx, cents(*target, currency)))
            .collect();
        let available = cents(available, currency);

        let resolved = resolve_amounts(available, &base, Some(&convergence), None)
            .expect("resolvable");
        prop_assert_eq!(total(&resolved, currency), available);
    }
}

#[test]
fn same_input_same_output() {
    let base: BTreeMap<&str, Money> = [
        ("b", cents(333, Currency::EUR)),
        ("a", cents(333, Currency::EUR)),
        ("c", cents(334, Currency::EUR)),
    ]
    .into_iter()
    .collect();
    let available = cents(1001, Currency::EUR);
    let first = resolve_amounts(available, &base, None, None).expect("resolvable");
    let second = resolve_amounts(available, &base, None, None).expect("resolvable");
    assert_eq!(first, second);
}
