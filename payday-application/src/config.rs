use payday_domain::{CatchUpPolicy, services::DEFAULT_MAX_ITERATIONS};

#[derive(Clone, Debug, PartialEq)]
pub struct PaydayConfig {
    pub lock_name: String,
    /// Passes of the tip graph fixed point before giving up.
    pub max_iterations: usize,
    pub catch_up: CatchUpPolicy,
    /// Donors whose advance covers fewer weeks than this get a renewal reminder.
    pub renewal_notice_weeks: u32,
    pub recompute_stats: bool,
    pub update_cached_amounts: bool,
}

impl Default for PaydayConfig {
    fn default() -> Self {
        Self {
            lock_name: "payday".to_owned(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            catch_up: CatchUpPolicy::default(),
            renewal_notice_weeks: 2,
            recompute_stats: true,
            update_cached_amounts: true,
        }
    }
}
