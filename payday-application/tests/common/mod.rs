#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use payday_application::{
    PaydayConfig, PaydayError, PaydayPorts, PaydayReport, PaydayRepository, PaydayRunner,
    PaydayStart, StoreError,
};
use payday_domain::{
    Currency, Money, Participant, ParticipantId, ParticipantKind, Payday, PaydayId, PaydayStage,
    PaydayStats, RenewalMode, Take, TakeId, Tip, TipId,
};
use payday_infrastructure::{
    FixedClock, InMemoryStore, LockRegistry, RecordingNotifier, StaticRateTable,
};
use rust_decimal::Decimal;

pub const ALICE: ParticipantId = ParticipantId(1);
pub const BOB: ParticipantId = ParticipantId(2);
pub const CAROL: ParticipantId = ParticipantId(3);
pub const DAN: ParticipantId = ParticipantId(4);
pub const EVE: ParticipantId = ParticipantId(5);
pub const FRANK: ParticipantId = ParticipantId(6);
pub const GINA: ParticipantId = ParticipantId(7);
pub const HANK: ParticipantId = ParticipantId(8);
pub const TEAM: ParticipantId = ParticipantId(10);

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
}

pub fn eur(value: &str) -> Money {
    Money::new(value.parse::<Decimal>().expect("decimal literal"), Currency::EUR)
}

pub fn person(id: ParticipantId) -> Participant {
    Participant::new(id, ParticipantKind::Individual, Currency::EUR)
}

pub fn team(id: ParticipantId) -> Participant {
    Participant::new(id, ParticipantKind::Group, Currency::EUR)
}

pub fn tip(
    id: u64,
    tipper: ParticipantId,
    tippee: ParticipantId,
    amount: &str,
    advance: Option<&str>,
) -> Tip {
    Tip {
        id: TipId(id),
        tipper,
        tippee,
        amount: eur(amount),
        paid_in_advance: advance.map(eur),
        renewal_mode: RenewalMode::Manual,
        mtime: at(0),
    }
}

pub fn take(
    id: u64,
    team: ParticipantId,
    member: ParticipantId,
    amount: &str,
    advance: &str,
) -> Take {
    Take {
        id: TakeId(id),
        team,
        member,
        amount: Some(eur(amount)),
        paid_in_advance: Some(eur(advance)),
        mtime: at(0),
    }
}

/// Everything a payday run talks to, in memory.
pub struct World {
    pub store: InMemoryStore,
    pub notifier: RecordingNotifier,
    pub lock: LockRegistry,
    pub clock: FixedClock,
    pub rates: StaticRateTable,
    pub config: PaydayConfig,
}

impl World {
    pub fn new() -> Self {
        Self {
            store: InMemoryStore::new(),
            notifier: RecordingNotifier::new(),
            lock: LockRegistry::new(),
            clock: FixedClock::new(at(1_000)),
            rates: StaticRateTable::new(Currency::EUR)
                .with_rate(Currency::USD, Decimal::new(125, 2)),
            config: PaydayConfig::default(),
        }
    }

    pub fn ports(&self) -> PaydayPorts<'_> {
        PaydayPorts {
            snapshots: &self.store,
            ledger: &self.store,
            unit_of_work: &self.store,
            paydays: &self.store,
            cache: &self.store,
            notifier: &self.notifier,
            lock: &self.lock,
            clock: &self.clock,
            rates: &self.rates,
        }
    }

    pub fn run(&self) -> Result<PaydayReport, PaydayError> {
        PaydayRunner::new(self.ports(), &self.config).run()
    }

    pub fn run_with(&self, paydays: &dyn PaydayRepository) -> Result<PaydayReport, PaydayError> {
        let mut ports = self.ports();
        ports.paydays = paydays;
        PaydayRunner::new(ports, &self.config).run()
    }

    pub fn balance(&self, participant: ParticipantId) -> Money {
        self.store.balance(participant, Currency::EUR)
    }
}

/// Single donor, single recipient, prepaid for exactly one week.
pub fn one_tip_world() -> World {
    let world = World::new();
    world.store.insert_participant(person(ALICE));
    world.store.insert_participant(person(BOB));
    world.store.insert_tip(tip(1, ALICE, BOB, "6.00", Some("6.00")));
    world
}

/// Direct tips, a team, income funding an onward tip, a partial tip, and a
/// recipient without payout method.
pub fn busy_world() -> World {
    let world = World::new();
    for id in [ALICE, BOB, CAROL, DAN, EVE, FRANK, GINA] {
        world.store.insert_participant(person(id));
    }
    let mut hank = person(HANK);
    hank.has_payout_method = false;
    world.store.insert_participant(hank);
    world.store.insert_participant(team(TEAM));

    world.store.insert_tip(tip(1, ALICE, BOB, "6.00", Some("6.00")));
    world.store.insert_tip(
        tip(2, CAROL, TEAM, "0.26", Some("0.26")).with_renewal_mode(RenewalMode::Automatic),
    );
    world.store.insert_tip(tip(3, DAN, FRANK, "0.10", None));
    world.store.insert_tip(tip(4, GINA, BOB, "5.00", Some("2.00")));
    world.store.insert_tip(tip(5, ALICE, HANK, "1.00", Some("1.00")));

    world.store.insert_take(take(1, TEAM, DAN, "1.00", "1.00"));
    world.store.insert_take(take(2, TEAM, EVE, "1.00", "1.00"));
    world
}

/// Fails right after the checkpoint following `stage` is (or is not) saved.
pub struct CrashingRepository<'a> {
    pub inner: &'a InMemoryStore,
    pub after: PaydayStage,
    pub checkpoint_saved: bool,
}

impl PaydayRepository for CrashingRepository<'_> {
    fn open_or_resume(&self, now: DateTime<Utc>) -> Result<PaydayStart, StoreError> {
        self.inner.open_or_resume(now)
    }

    fn set_stage(&self, payday: PaydayId, stage: Option<PaydayStage>) -> Result<(), StoreError> {
        if stage != self.after.next() {
            return self.inner.set_stage(payday, stage);
        }
        if self.checkpoint_saved {
            self.inner.set_stage(payday, stage)?;
        }
        Err(StoreError::Unavailable(format!(
            "crashed after stage {}",
            self.after
        )))
    }

    fn finish(
        &self,
        payday: PaydayId,
        ts_end: DateTime<Utc>,
        stats: PaydayStats,
    ) -> Result<(), StoreError> {
        self.inner.finish(payday, ts_end, stats)
    }

    fn get(&self, payday: PaydayId) -> Result<Option<Payday>, StoreError> {
        self.inner.get(payday)
    }
}
