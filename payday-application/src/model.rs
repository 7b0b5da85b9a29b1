use chrono::{DateTime, Utc};
use payday_domain::{
    MoneyBasket, ParticipantId, ParticipantStats, Payday, PaydayId, PaydayStage, PaydayStats,
    TipId, TransferIntent,
};
use std::{collections::BTreeMap, fmt};

/// A transfer intent waiting for stage 2, numbered in commit order.
#[derive(Clone, Debug, PartialEq)]
pub struct StagedTransfer {
    pub seq: u64,
    pub intent: TransferIntent,
}

/// Output of stage 1, persisted so a resumed run commits exactly the same set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StagedSettlement {
    pub payday: PaydayId,
    pub transfers: Vec<StagedTransfer>,
    pub funded: BTreeMap<TipId, bool>,
    pub leftovers: BTreeMap<ParticipantId, MoneyBasket>,
}

/// How `open_or_resume` found the payday row.
#[derive(Clone, Debug, PartialEq)]
pub enum PaydayStart {
    Started(Payday),
    Resumed(Payday),
}

impl PaydayStart {
    pub fn payday(&self) -> &Payday {
        match self {
            PaydayStart::Started(payday) | PaydayStart::Resumed(payday) => payday,
        }
    }

    pub fn into_payday(self) -> Payday {
        match self {
            PaydayStart::Started(payday) | PaydayStart::Resumed(payday) => payday,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NotificationEvent {
    Income,
    DonateReminder,
    UpcomingDebit,
    PayoutAccountRequired,
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NotificationEvent::Income => "income",
            NotificationEvent::DonateReminder => "donate_reminder",
            NotificationEvent::UpcomingDebit => "upcoming_debit",
            NotificationEvent::PayoutAccountRequired => "payout_account_required",
        };
        f.write_str(name)
    }
}

/// Sinks deliver at most one notification per key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NotificationKey {
    pub payday: PaydayId,
    pub participant: ParticipantId,
    pub event: NotificationEvent,
    pub subject: Option<ParticipantId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub payday: PaydayId,
    pub participant: ParticipantId,
    pub event: NotificationEvent,
    /// The other party, when the event is about one relationship.
    pub subject: Option<ParticipantId>,
    pub amounts: MoneyBasket,
}

impl Notification {
    pub fn key(&self) -> NotificationKey {
        NotificationKey {
            payday: self.payday,
            participant: self.participant,
            event: self.event,
            subject: self.subject,
        }
    }
}

/// Expected amounts for the next cycle, derived without touching history.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CachedAmounts {
    pub computed_at: Option<DateTime<Utc>>,
    pub participants: BTreeMap<ParticipantId, ParticipantStats>,
    pub tips_funded: BTreeMap<TipId, bool>,
}

/// Summary of one `PaydayRunner::run` invocation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PaydayReport {
    pub payday: PaydayId,
    /// Stage the run picked up from, when it resumed an unfinished payday.
    pub resumed_from: Option<PaydayStage>,
    pub resumed: bool,
    pub settlement_iterations: usize,
    pub staged: usize,
    pub committed: usize,
    pub already_committed: usize,
    pub skipped: usize,
    pub notifications: usize,
    pub stats: PaydayStats,
}

impl fmt::Display for PaydayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "payday {}", self.payday)?;
        if self.resumed {
            match self.resumed_from {
                Some(stage) => writeln!(f, "  resumed at stage {stage}")?,
                None => writeln!(f, "  resumed after the last stage")?,
            }
        }
        writeln!(
            f,
            "  transfers: {} staged, {} committed, {} already committed, {} skipped",
            self.staged, self.committed, self.already_committed, self.skipped
        )?;
        writeln!(f, "  notifications: {}", self.notifications)?;
        writeln!(
            f,
            "  participants: {} ({} tippers, {} tippees)",
            self.stats.nparticipants, self.stats.ntippers, self.stats.ntippees
        )?;
        writeln!(f, "  tips: {}", self.stats.transfer_volume)?;
        writeln!(f, "  takes: {}", self.stats.take_volume)?;
        write!(f, "  leftover: {}", self.stats.leftover_volume)
    }
}
