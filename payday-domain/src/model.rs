use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::{
    currency::Currency,
    money::{Money, MoneyBasket, MoneyError},
};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "~{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TipId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TakeId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub u64);

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct PaydayId(pub u64);

impl fmt::Display for PaydayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    Individual,
    Organization,
    Group,
    Community,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Stub,
    #[default]
    Active,
    Closed,
}

/// Participant as seen by the engine at the snapshot cutoff.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub kind: ParticipantKind,
    pub main_currency: Currency,
    #[serde(default)]
    pub accepted_currencies: Vec<Currency>,
    #[serde(default)]
    pub balance: MoneyBasket,
    #[serde(default)]
    pub is_suspended: bool,
    #[serde(default)]
    pub status: ParticipantStatus,
    #[serde(default = "default_true")]
    pub has_payout_method: bool,
    /// Undistributed team income of the previous cycle. Teams only.
    #[serde(default)]
    pub leftover: MoneyBasket,
}

fn default_true() -> bool {
    true
}

impl Participant {
    pub fn new(id: ParticipantId, kind: ParticipantKind, main_currency: Currency) -> Self {
        Self {
            id,
            kind,
            main_currency,
            accepted_currencies: vec![main_currency],
            balance: MoneyBasket::new(),
            is_suspended: false,
            status: ParticipantStatus::Active,
            has_payout_method: true,
            leftover: MoneyBasket::new(),
        }
    }

    pub fn is_team(&self) -> bool {
        self.kind == ParticipantKind::Group
    }

    pub fn is_eligible(&self) -> bool {
        !self.is_suspended && self.status == ParticipantStatus::Active
    }

    pub fn accepts(&self, currency: Currency) -> bool {
        self.main_currency == currency || self.accepted_currencies.contains(&currency)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RenewalMode {
    Disabled,
    #[default]
    Manual,
    Automatic,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("{0} cannot tip themselves")]
    SelfTip(ParticipantId),
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Money),
    #[error("{0} is not a whole number of minimum units")]
    NotQuantized(Money),
    #[error(transparent)]
    Money(#[from] MoneyError),
}

/// Latest version of a donor's recurring pledge to a recipient.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tip {
    pub id: TipId,
    pub tipper: ParticipantId,
    pub tippee: ParticipantId,
    pub amount: Money,
    pub paid_in_advance: Option<Money>,
    #[serde(default)]
    pub renewal_mode: RenewalMode,
    pub mtime: DateTime<Utc>,
}

impl Tip {
    pub fn new(
        id: TipId,
        tipper: ParticipantId,
        tippee: ParticipantId,
        amount: Money,
        paid_in_advance: Option<Money>,
        mtime: DateTime<Utc>,
    ) -> Result<Self, ModelError> {
        let tip = Self {
            id,
            tipper,
            tippee,
            amount,
            paid_in_advance,
            renewal_mode: RenewalMode::default(),
            mtime,
        };
        tip.validate()?;
        Ok(tip)
    }

    pub fn with_renewal_mode(mut self, renewal_mode: RenewalMode) -> Self {
        self.renewal_mode = renewal_mode;
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.tipper == self.tippee {
            return Err(ModelError::SelfTip(self.tipper));
        }
        if !self.amount.is_positive() {
            return Err(ModelError::NonPositiveAmount(self.amount));
        }
        if let Some(advance) = self.paid_in_advance {
            if advance.currency() != self.amount.currency() {
                return Err(MoneyError::CurrencyMismatch {
                    left: self.amount.currency(),
                    right: advance.currency(),
                }
                .into());
            }
        }
        quantized(self.amount)?;
        self.paid_in_advance.map_or(Ok(()), quantized)
    }

    /// Prepaid credit usable this cycle. A negative advance funds nothing.
    pub fn usable_advance(&self) -> Money {
        self.paid_in_advance
            .unwrap_or_else(|| Money::zero(self.amount.currency()))
            .floor_zero()
    }
}

/// Nominal take of a member, as set by the member.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TakeAmount {
    /// Pro-rata share of whatever the fixed takes leave.
    Auto,
    Fixed(Money),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Take {
    pub id: TakeId,
    pub team: ParticipantId,
    pub member: ParticipantId,
    /// `None` or a negative amount means automatic.
    pub amount: Option<Money>,
    pub paid_in_advance: Option<Money>,
    pub mtime: DateTime<Utc>,
}

impl Take {
    pub fn nominal(&self) -> TakeAmount {
        match self.amount {
            Some(amount) if !amount.is_negative() => TakeAmount::Fixed(amount),
            _ => TakeAmount::Auto,
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if let (Some(amount), Some(advance)) = (self.amount, self.paid_in_advance) {
            if !amount.is_negative() && amount.currency() != advance.currency() {
                return Err(MoneyError::CurrencyMismatch {
                    left: amount.currency(),
                    right: advance.currency(),
                }
                .into());
            }
        }
        self.amount
            .filter(|amount| !amount.is_negative())
            .map_or(Ok(()), quantized)?;
        self.paid_in_advance.map_or(Ok(()), quantized)
    }
}

fn quantized(money: Money) -> Result<(), ModelError> {
    if money.is_quantized() {
        Ok(())
    } else {
        Err(ModelError::NotQuantized(money))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferContext {
    Tip,
    Take,
    PartialTip,
    PartialTake,
    LeftoverTake,
}

impl TransferContext {
    pub fn is_take(self) -> bool {
        matches!(
            self,
            TransferContext::Take | TransferContext::PartialTake | TransferContext::LeftoverTake
        )
    }
}

impl fmt::Display for TransferContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferContext::Tip => "tip",
            TransferContext::Take => "take",
            TransferContext::PartialTip => "partial-tip",
            TransferContext::PartialTake => "partial-take",
            TransferContext::LeftoverTake => "leftover-take",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Succeeded,
    Failed,
}

/// Identity of a transfer within one payday, used to skip already-committed work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransferKey {
    pub tipper: ParticipantId,
    pub tippee: ParticipantId,
    pub context: TransferContext,
    pub team: Option<ParticipantId>,
}

/// Where the money of a staged transfer comes from.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Funding {
    pub tip: TipId,
    pub from_advance: Money,
    pub from_balance: Money,
    /// Take advance consumed, in the take's currency.
    pub take_advance: Option<Money>,
}

/// A transfer computed by settlement, not yet committed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferIntent {
    pub tipper: ParticipantId,
    pub tippee: ParticipantId,
    pub amount: Money,
    pub context: TransferContext,
    pub team: Option<ParticipantId>,
    pub funding: Vec<Funding>,
}

impl TransferIntent {
    pub fn key(&self) -> TransferKey {
        TransferKey {
            tipper: self.tipper,
            tippee: self.tippee,
            context: self.context,
            team: self.team,
        }
    }
}

/// Authoritative ledger entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub payday: PaydayId,
    pub tipper: ParticipantId,
    pub tippee: ParticipantId,
    pub amount: Money,
    pub context: TransferContext,
    pub team: Option<ParticipantId>,
    pub timestamp: DateTime<Utc>,
    pub status: TransferStatus,
}

impl Transfer {
    pub fn key(&self) -> TransferKey {
        TransferKey {
            tipper: self.tipper,
            tippee: self.tippee,
            context: self.context,
            team: self.team,
        }
    }
}

/// Progress checkpoint of a running payday.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PaydayStage {
    Settle = 1,
    Commit = 2,
    IncomeNotifications = 3,
    RenewalReminders = 4,
    AccountReminders = 5,
}

impl PaydayStage {
    pub const ALL: [PaydayStage; 5] = [
        PaydayStage::Settle,
        PaydayStage::Commit,
        PaydayStage::IncomeNotifications,
        PaydayStage::RenewalReminders,
        PaydayStage::AccountReminders,
    ];

    /// `None` once the last stage is done.
    pub fn next(self) -> Option<PaydayStage> {
        match self {
            PaydayStage::Settle => Some(PaydayStage::Commit),
            PaydayStage::Commit => Some(PaydayStage::IncomeNotifications),
            PaydayStage::IncomeNotifications => Some(PaydayStage::RenewalReminders),
            PaydayStage::RenewalReminders => Some(PaydayStage::AccountReminders),
            PaydayStage::AccountReminders => None,
        }
    }

    pub fn number(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for PaydayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaydayStage::Settle => "settle",
            PaydayStage::Commit => "commit",
            PaydayStage::IncomeNotifications => "income-notifications",
            PaydayStage::RenewalReminders => "renewal-reminders",
            PaydayStage::AccountReminders => "account-reminders",
        };
        write!(f, "{} ({name})", self.number())
    }
}

impl TryFrom<u8> for PaydayStage {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.number() == value)
            .ok_or(value)
    }
}

/// Aggregates recorded on a finished payday.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PaydayStats {
    pub nparticipants: usize,
    pub ntippers: usize,
    pub ntippees: usize,
    pub ntransfers: usize,
    pub transfer_volume: MoneyBasket,
    pub take_volume: MoneyBasket,
    pub leftover_volume: MoneyBasket,
}

/// One settlement cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payday {
    pub id: PaydayId,
    pub ts_start: DateTime<Utc>,
    pub ts_end: Option<DateTime<Utc>>,
    /// `None` when idle or finished.
    pub stage: Option<PaydayStage>,
    pub stats: Option<PaydayStats>,
}

impl Payday {
    pub fn is_finished(&self) -> bool {
        self.ts_end.is_some()
    }
}
