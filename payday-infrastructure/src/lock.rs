use dashmap::DashSet;
use payday_application::AdvisoryLock;
use std::sync::OnceLock;

/// Named locks shared by everything in the process.
#[derive(Debug, Default)]
pub struct LockRegistry {
    held: DashSet<String>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static LockRegistry {
        static REGISTRY: OnceLock<LockRegistry> = OnceLock::new();
        REGISTRY.get_or_init(LockRegistry::new)
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held.contains(name)
    }
}

impl AdvisoryLock for LockRegistry {
    fn try_acquire(&self, name: &str) -> bool {
        let acquired = self.held.insert(name.to_owned());
        if !acquired {
            tracing::debug!(lock = name, "Lock already held");
        }
        acquired
    }

    fn release(&self, name: &str) {
        self.held.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn only_one_contender_wins() {
        let registry = Arc::new(LockRegistry::new());
        let winners: usize = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.try_acquire("payday"))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().expect("thread finished"))
            .filter(|acquired| *acquired)
            .count();
        assert_eq!(winners, 1);
        assert!(registry.is_held("payday"));

        registry.release("payday");
        assert!(!registry.is_held("payday"));
        assert!(registry.try_acquire("payday"));
    }
}
