//! C7 Rate Limiter: in-memory sliding window per `(category, key)`,
//! grounded on the pack's `LoginRateLimiter` (per-key `Mutex<HashMap<String,
//! Vec<Instant>>>`, bounded key count, periodic prune-on-access),
//! generalized to the six categories of spec §4.7.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Registration,
    Checkin,
    Reports,
    AdminTokenGen,
    AdminOps,
    Public,
}

impl Category {
    fn default_rule(&self) -> Rule {
        match self {
            // Registration attempts are the most abuse-prone key, hence
            // the tightest hard cap (spec §4.7: registration <= 10/min).
            Category::Registration => Rule { requests: 10, window: Duration::from_secs(60), enabled: true },
            Category::Checkin => Rule { requests: 120, window: Duration::from_secs(60), enabled: true },
            Category::Reports => Rule { requests: 60, window: Duration::from_secs(60), enabled: true },
            Category::AdminTokenGen => Rule { requests: 20, window: Duration::from_secs(60), enabled: true },
            Category::AdminOps => Rule { requests: 200, window: Duration::from_secs(60), enabled: true },
            Category::Public => Rule { requests: 300, window: Duration::from_secs(60), enabled: true },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub requests: u32,
    pub window: Duration,
    pub enabled: bool,
}

impl Rule {
    /// Runtime tuning is bounds-checked the same way registration-token
    /// and command-timeout inputs are elsewhere in this crate.
    pub fn validate(requests: u32, window: Duration) -> Result<(), AppError> {
        if requests == 0 || requests > 1000 {
            return Err(AppError::InvalidArgument("requests must be in 1..=1000".to_string()));
        }
        if window > Duration::from_secs(24 * 3600) {
            return Err(AppError::InvalidArgument("window must be <= 24h".to_string()));
        }
        Ok(())
    }
}

pub struct Decision {
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
}

struct CategoryState {
    rule: RwLock<Rule>,
    buckets: Mutex<HashMap<String, Vec<Instant>>>,
}

/// Keys whose newest timestamp exceeds this age are stale and reclaimed
/// eagerly rather than waiting on a fixed-size cap (spec §4.7, §5).
const RECLAIM_AGE: Duration = Duration::from_secs(3600);
const MAX_KEYS_PER_CATEGORY: usize = 50_000;

pub struct RateLimiter {
    categories: HashMap<Category, CategoryState>,
}

impl RateLimiter {
    pub fn new() -> Self {
        let mut categories = HashMap::new();
        for category in [
            Category::Registration,
            Category::Checkin,
            Category::Reports,
            Category::AdminTokenGen,
            Category::AdminOps,
            Category::Public,
        ] {
            categories.insert(
                category,
                CategoryState { rule: RwLock::new(category.default_rule()), buckets: Mutex::new(HashMap::new()) },
            );
        }
        Self { categories }
    }

    pub fn set_rule(&self, category: Category, requests: u32, window: Duration, enabled: bool) -> Result<(), AppError> {
        Rule::validate(requests, window)?;
        let state = self.categories.get(&category).expect("all categories registered at construction");
        let mut rule = state.rule.write().unwrap_or_else(|e| e.into_inner());
        *rule = Rule { requests, window, enabled };
        Ok(())
    }

    /// Admission check for one `(category, key)`. Returns the resulting
    /// quota snapshot on success, or `AppError::RateLimited` with a
    /// `Retry-After` derived from the oldest timestamp in the window.
    pub fn check(&self, category: Category, key: &str) -> Result<Decision, AppError> {
        let state = self.categories.get(&category).expect("all categories registered at construction");
        let rule = *state.rule.read().unwrap_or_else(|e| e.into_inner());

        if !rule.enabled {
            return Ok(Decision { limit: rule.requests, remaining: rule.requests, reset_secs: 0 });
        }

        let mut buckets = state.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        if buckets.len() > MAX_KEYS_PER_CATEGORY / 2 {
            buckets.retain(|_, timestamps| {
                timestamps.retain(|t| now.duration_since(*t) < RECLAIM_AGE);
                !timestamps.is_empty()
            });
        }

        if buckets.len() >= MAX_KEYS_PER_CATEGORY && !buckets.contains_key(key) {
            return Err(AppError::RateLimited { retry_after_secs: rule.window.as_secs() });
        }

        let entry = buckets.entry(key.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < rule.window);

        if entry.len() as u32 >= rule.requests {
            let oldest = entry.first().copied().unwrap_or(now);
            let retry_after = rule.window.saturating_sub(now.duration_since(oldest));
            return Err(AppError::RateLimited { retry_after_secs: retry_after.as_secs().max(1) });
        }

        entry.push(now);
        let remaining = rule.requests.saturating_sub(entry.len() as u32);
        Ok(Decision { limit: rule.requests, remaining, reset_secs: rule.window.as_secs() })
    }

    /// Clears tracked attempts for a key, e.g. after a successful
    /// registration so a legitimate retry isn't penalized by a prior miss.
    pub fn clear(&self, category: Category, key: &str) {
        if let Some(state) = self.categories.get(&category) {
            let mut buckets = state.buckets.lock().unwrap_or_else(|e| e.into_inner());
            buckets.remove(key);
        }
    }

    /// Periodic reclaim task (§5): prunes stale keys across every
    /// category without holding more than one category's lock at a time.
    pub fn reclaim(&self) {
        let now = Instant::now();
        for state in self.categories.values() {
            let mut buckets = state.buckets.lock().unwrap_or_else(|e| e.into_inner());
            buckets.retain(|_, timestamps| {
                timestamps.retain(|t| now.duration_since(*t) < RECLAIM_AGE);
                !timestamps.is_empty()
            });
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_then_blocks() {
        let limiter = RateLimiter::new();
        limiter.set_rule(Category::Registration, 3, Duration::from_secs(60), true).unwrap();

        for _ in 0..3 {
            assert!(limiter.check(Category::Registration, "1.2.3.4").is_ok());
        }
        let err = limiter.check(Category::Registration, "1.2.3.4");
        assert!(matches!(err, Err(AppError::RateLimited { .. })));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new();
        limiter.set_rule(Category::Checkin, 1, Duration::from_secs(60), true).unwrap();

        assert!(limiter.check(Category::Checkin, "agent-a").is_ok());
        assert!(limiter.check(Category::Checkin, "agent-b").is_ok());
        assert!(limiter.check(Category::Checkin, "agent-a").is_err());
    }

    #[test]
    fn disabled_category_never_blocks() {
        let limiter = RateLimiter::new();
        limiter.set_rule(Category::Public, 1, Duration::from_secs(60), false).unwrap();

        for _ in 0..10 {
            assert!(limiter.check(Category::Public, "shared").is_ok());
        }
    }

    #[test]
    fn rejects_out_of_bounds_rules() {
        let limiter = RateLimiter::new();
        assert!(limiter.set_rule(Category::Public, 0, Duration::from_secs(60), true).is_err());
        assert!(limiter.set_rule(Category::Public, 2000, Duration::from_secs(60), true).is_err());
        assert!(limiter.set_rule(Category::Public, 10, Duration::from_secs(25 * 3600), true).is_err());
    }
}
