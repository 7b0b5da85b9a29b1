use payday_application::{PaydayConfig, PaydayError, PaydayPorts, PaydayRunner};
use payday_infrastructure::{InMemoryStore, LockRegistry, LoggingNotifier, Seed, SystemClock};
use std::{env, path::PathBuf, str::FromStr};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("usage: payday <seed.json>")]
    MissingSeedPath,
}

/// Application configuration
pub struct AppConfig {
    pub payday: PaydayConfig,
    pub seed_path: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let payday = payday_config(|name| env::var(name).ok())?;
        let seed_path = env::args_os()
            .nth(1)
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingSeedPath)?;
        Ok(Self { payday, seed_path })
    }
}

/// Defaults overridden by `PAYDAY_*` variables.
fn payday_config(lookup: impl Fn(&str) -> Option<String>) -> Result<PaydayConfig, ConfigError> {
    let mut config = PaydayConfig::default();
    if let Some(name) = lookup("PAYDAY_LOCK_NAME") {
        config.lock_name = name;
    }
    if let Some(max) = parse(&lookup, "PAYDAY_MAX_ITERATIONS")? {
        config.max_iterations = max;
    }
    if let Some(ratio) = parse(&lookup, "PAYDAY_MIN_TIP_RATIO")? {
        config.catch_up.min_tip_ratio_factor = ratio;
    }
    if let Some(exponent) = parse(&lookup, "PAYDAY_NEGATIVE_WEEKS_EXPONENT")? {
        config.catch_up.negative_weeks_exponent = exponent;
    }
    if let Some(weeks) = parse(&lookup, "PAYDAY_RENEWAL_NOTICE_WEEKS")? {
        config.renewal_notice_weeks = weeks;
    }
    Ok(config)
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(value) = lookup(name) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Invalid { name, value })
}

/// Initialize logging and tracing
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Run one payday over the seeded store and print its report
pub fn run() {
    init_logging();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let seed = match Seed::from_path(&config.seed_path) {
        Ok(seed) => seed,
        Err(e) => {
            tracing::error!(path = %config.seed_path.display(), "Failed to load seed: {e}");
            std::process::exit(1);
        }
    };
    let rates = seed.rate_table();
    let store = InMemoryStore::from_seed(seed);
    let notifier = LoggingNotifier::new();

    let ports = PaydayPorts {
        snapshots: &store,
        ledger: &store,
        unit_of_work: &store,
        paydays: &store,
        cache: &store,
        notifier: &notifier,
        lock: LockRegistry::global(),
        clock: &SystemClock,
        rates: &rates,
    };

    match PaydayRunner::new(ports, &config.payday).run() {
        Ok(report) => println!("{report}"),
        Err(PaydayError::AlreadyRunning { lock }) => {
            tracing::info!(lock = %lock, "Another payday holds the lock, nothing to do");
        }
        Err(e) => {
            tracing::error!("Payday failed: {e}");
            std::process::exit(1);
        }
    }
}
