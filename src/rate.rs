//! Abuse control: a global sliding-window rate limiter plus per-sender
//! cooldowns.
//!
//! The global check is silent by design (rejecting a flood with replies
//! would amplify it); the cooldown check is per-user friction and is
//! surfaced with a remaining-time hint.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outcome of a cooldown check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownDecision {
    pub allowed: bool,
    /// Time until the sender may issue the next command. Zero when allowed.
    pub remaining: Duration,
}

struct RateWindow {
    count: u32,
    started: Instant,
}

/// Global rate window plus per-sender cooldown tracker.
pub struct RateGuard {
    ceiling: u32,
    window: Duration,
    cooldown: Duration,
    global: Mutex<RateWindow>,
    senders: Mutex<HashMap<String, Instant>>,
}

impl RateGuard {
    pub fn new(ceiling: u32, window: Duration, cooldown: Duration) -> Self {
        Self {
            ceiling,
            window,
            cooldown,
            global: Mutex::new(RateWindow {
                count: 0,
                started: Instant::now(),
            }),
            senders: Mutex::new(HashMap::new()),
        }
    }

    /// Count one command against the global window. False means the caller
    /// must drop the command silently.
    pub fn check_global(&self) -> bool {
        self.check_global_at(Instant::now())
    }

    fn check_global_at(&self, now: Instant) -> bool {
        let mut window = self.global.lock().unwrap_or_else(|e| e.into_inner());
        if now.duration_since(window.started) > self.window {
            window.count = 0;
            window.started = now;
        }
        if window.count >= self.ceiling {
            return false;
        }
        window.count += 1;
        true
    }

    /// Check-and-set the sender's cooldown in one critical section, so two
    /// commands from the same sender in one processing tick cannot both pass.
    pub fn check_cooldown(&self, sender_id: &str) -> CooldownDecision {
        self.check_cooldown_at(sender_id, Instant::now())
    }

    fn check_cooldown_at(&self, sender_id: &str, now: Instant) -> CooldownDecision {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&last) = senders.get(sender_id) {
            let since = now.duration_since(last);
            if since < self.cooldown {
                return CooldownDecision {
                    allowed: false,
                    remaining: self.cooldown - since,
                };
            }
        }
        senders.insert(sender_id.to_string(), now);
        CooldownDecision {
            allowed: true,
            remaining: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(ceiling: u32) -> RateGuard {
        RateGuard::new(ceiling, Duration::from_secs(60), Duration::from_secs(5))
    }

    #[test]
    fn ceiling_bounds_the_window() {
        let g = guard(3);
        let now = Instant::now();
        assert!(g.check_global_at(now));
        assert!(g.check_global_at(now));
        assert!(g.check_global_at(now));
        assert!(!g.check_global_at(now));
        assert!(!g.check_global_at(now + Duration::from_secs(59)));
    }

    #[test]
    fn window_resets_after_expiry() {
        let g = guard(1);
        let now = Instant::now();
        assert!(g.check_global_at(now));
        assert!(!g.check_global_at(now + Duration::from_secs(30)));
        assert!(g.check_global_at(now + Duration::from_secs(61)));
    }

    #[test]
    fn first_command_from_a_sender_is_allowed() {
        let g = guard(10);
        let decision = g.check_cooldown_at("a@s.whatsapp.net", Instant::now());
        assert!(decision.allowed);
        assert_eq!(decision.remaining, Duration::ZERO);
    }

    #[test]
    fn second_command_inside_cooldown_is_rejected_with_positive_remaining() {
        let g = guard(10);
        let now = Instant::now();
        assert!(g.check_cooldown_at("a@s.whatsapp.net", now).allowed);

        let decision = g.check_cooldown_at("a@s.whatsapp.net", now + Duration::from_secs(2));
        assert!(!decision.allowed);
        assert!(decision.remaining > Duration::ZERO);
        assert_eq!(decision.remaining, Duration::from_secs(3));
    }

    #[test]
    fn rejection_does_not_refresh_the_cooldown() {
        let g = guard(10);
        let now = Instant::now();
        g.check_cooldown_at("a@s.whatsapp.net", now);
        g.check_cooldown_at("a@s.whatsapp.net", now + Duration::from_secs(4));
        // measured from the accepted command, not the rejected one
        assert!(g.check_cooldown_at("a@s.whatsapp.net", now + Duration::from_secs(6)).allowed);
    }

    #[test]
    fn cooldowns_are_per_sender() {
        let g = guard(10);
        let now = Instant::now();
        assert!(g.check_cooldown_at("a@s.whatsapp.net", now).allowed);
        assert!(g.check_cooldown_at("b@s.whatsapp.net", now).allowed);
    }
}
