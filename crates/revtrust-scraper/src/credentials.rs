//! Round-robin pool of marketplace session credentials with cooldowns.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use revtrust_core::CredentialConfig;

/// One session identity. The cookie payload never appears in `Debug` output.
#[derive(Clone)]
pub struct Credential {
    pub index: usize,
    pub label: Option<String>,
    cookies: String,
}

impl Credential {
    #[must_use]
    pub fn cookie_header(&self) -> &str {
        &self.cookies
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("label", &self.label)
            .field("cookies", &"[redacted]")
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
struct SlotState {
    cooldown_until: Option<DateTime<Utc>>,
    last_used: Option<DateTime<Utc>>,
    last_reason: Option<String>,
}

impl SlotState {
    fn is_cooling(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }
}

#[derive(Debug)]
struct PoolState {
    cursor: usize,
    slots: Vec<SlotState>,
}

/// Health of one credential as reported on the egress endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialHealth {
    pub index: usize,
    pub label: Option<String>,
    pub healthy: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub last_reason: Option<String>,
}

/// Shared credential rotation state.
///
/// All access goes through short critical sections; the lock is never held
/// across a network call.
#[derive(Debug)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
    state: Mutex<PoolState>,
}

impl CredentialPool {
    #[must_use]
    pub fn new(configs: &[CredentialConfig]) -> Self {
        let credentials: Vec<Credential> = configs
            .iter()
            .enumerate()
            .map(|(index, c)| Credential {
                index,
                label: c.label.clone(),
                cookies: c.cookies.clone(),
            })
            .collect();
        let slots = vec![SlotState::default(); credentials.len()];
        Self {
            credentials,
            state: Mutex::new(PoolState { cursor: 0, slots }),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Next credential in rotation. `None` only when the pool is empty.
    #[must_use]
    pub fn next(&self) -> Option<Credential> {
        self.next_at(Utc::now())
    }

    /// Like [`next`](Self::next) with an explicit clock.
    ///
    /// Skips cooling-down credentials. When every credential is cooling down
    /// the next one in line is returned anyway and a warning is logged.
    #[must_use]
    pub fn next_at(&self, now: DateTime<Utc>) -> Option<Credential> {
        let count = self.credentials.len();
        if count == 0 {
            return None;
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let start = state.cursor % count;
        let healthy = (0..count)
            .map(|offset| (start + offset) % count)
            .find(|&idx| !state.slots[idx].is_cooling(now));

        let chosen = if let Some(idx) = healthy {
            idx
        } else {
            tracing::warn!(
                credential = start,
                pool_size = count,
                "all credentials cooling down, using next in line (degraded)"
            );
            start
        };

        state.cursor = (chosen + 1) % count;
        state.slots[chosen].last_used = Some(now);
        Some(self.credentials[chosen].clone())
    }

    /// Benches credential `index` for `cooldown_minutes`.
    pub fn mark_unhealthy(&self, index: usize, reason: &str, cooldown_minutes: i64) {
        self.mark_unhealthy_at(index, reason, cooldown_minutes, Utc::now());
    }

    pub fn mark_unhealthy_at(
        &self,
        index: usize,
        reason: &str,
        cooldown_minutes: i64,
        now: DateTime<Utc>,
    ) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = state.slots.get_mut(index) else {
            tracing::warn!(credential = index, "mark_unhealthy for unknown credential");
            return;
        };
        let until = now + Duration::minutes(cooldown_minutes.max(0));
        slot.cooldown_until = Some(until);
        slot.last_reason = Some(reason.to_string());
        tracing::warn!(
            credential = index,
            reason,
            cooldown_minutes,
            "credential marked unhealthy"
        );
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<CredentialHealth> {
        self.snapshot_at(Utc::now())
    }

    #[must_use]
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> Vec<CredentialHealth> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.credentials
            .iter()
            .zip(state.slots.iter())
            .map(|(cred, slot)| CredentialHealth {
                index: cred.index,
                label: cred.label.clone(),
                healthy: !slot.is_cooling(now),
                cooldown_until: slot.cooldown_until.filter(|until| *until > now),
                last_used: slot.last_used,
                last_reason: slot.last_reason.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn pool(n: usize) -> CredentialPool {
        let configs: Vec<CredentialConfig> = (0..n)
            .map(|i| CredentialConfig {
                cookies: format!("session-id={i}"),
                label: Some(format!("acct-{i}")),
            })
            .collect();
        CredentialPool::new(&configs)
    }

    #[test]
    fn empty_pool_yields_none() {
        assert!(pool(0).next().is_none());
    }

    #[test]
    fn round_robin_visits_each_credential_once() {
        for n in 1..=10 {
            let p = pool(n);
            let seen: HashSet<usize> = (0..n).filter_map(|_| p.next()).map(|c| c.index).collect();
            assert_eq!(seen.len(), n);
        }
    }

    #[test]
    fn cooling_credential_is_skipped_until_expiry() {
        let p = pool(3);
        let now = Utc::now();
        p.mark_unhealthy_at(1, "captcha", 30, now);

        for _ in 0..9 {
            let c = p.next_at(now + Duration::minutes(10)).unwrap();
            assert_ne!(c.index, 1);
        }

        let after: HashSet<usize> = (0..3)
            .filter_map(|_| p.next_at(now + Duration::minutes(31)))
            .map(|c| c.index)
            .collect();
        assert!(after.contains(&1));
    }

    #[test]
    fn all_cooling_falls_back_to_next_in_line() {
        let p = pool(2);
        let now = Utc::now();
        p.mark_unhealthy_at(0, "blocked", 30, now);
        p.mark_unhealthy_at(1, "blocked", 30, now);

        let first = p.next_at(now).unwrap();
        let second = p.next_at(now).unwrap();
        assert_ne!(first.index, second.index);
    }

    #[test]
    fn cooling_credential_never_returned_under_concurrency() {
        let p = Arc::new(pool(4));
        p.mark_unhealthy(2, "captcha", 30);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let p = Arc::clone(&p);
                std::thread::spawn(move || {
                    (0..100)
                        .filter_map(|_| p.next())
                        .all(|c| c.index != 2)
                })
            })
            .collect();

        for h in handles {
            assert!(h.join().unwrap());
        }
    }

    #[test]
    fn snapshot_reports_health_and_hides_cookies() {
        let p = pool(2);
        p.mark_unhealthy(0, "login redirect", 15);
        let snap = p.snapshot();

        assert!(!snap[0].healthy);
        assert_eq!(snap[0].last_reason.as_deref(), Some("login redirect"));
        assert!(snap[1].healthy);
        let debug = format!("{:?}", p.next().unwrap());
        assert!(!debug.contains("session-id"));
    }
}
