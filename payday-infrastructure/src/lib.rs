#![warn(clippy::uninlined_format_args)]

pub mod clock;
pub mod lock;
pub mod memory;
pub mod notifications;
pub mod rates;
pub mod seed;

pub use clock::{FixedClock, SystemClock};
pub use lock::LockRegistry;
pub use memory::{InMemoryStore, StoreDump};
pub use notifications::{LoggingNotifier, RecordingNotifier};
pub use rates::StaticRateTable;
pub use seed::{RateEntry, Seed, SeedError};
