#![warn(clippy::uninlined_format_args)]

pub mod config;
pub mod error;
pub mod model;
pub mod payday;
pub mod ports;
pub mod stats;

pub use config::PaydayConfig;
pub use error::{PaydayError, StoreError};
pub use model::{
    CachedAmounts, Notification, NotificationEvent, NotificationKey, PaydayReport, PaydayStart,
    StagedSettlement, StagedTransfer,
};
pub use payday::{PaydayPorts, PaydayRunner};
pub use ports::{
    AdvisoryLock, BalanceStore, CacheStore, Clock, NotificationSink, PaydayRepository,
    SnapshotStore, TransferLedger, UnitOfWork,
};
pub use stats::StatsService;
