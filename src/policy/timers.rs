//! Wall-clock gates: cooldown, inactivity, escalation.
//!
//! All three compare `now_ms` values passed in by the caller, never tick counts, so
//! skipped or delayed ticks do not distort them.

use std::collections::HashMap;

use crate::Severity;

/// Last fire time per severity.
#[derive(Clone, Debug, Default)]
pub struct CooldownTracker {
    last_fired: HashMap<Severity, u64>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cooling(&self, severity: Severity, now_ms: u64, cooldown_ms: u64) -> bool {
        if cooldown_ms == 0 {
            return false;
        }
        match self.last_fired.get(&severity) {
            Some(&last) => now_ms.saturating_sub(last) < cooldown_ms,
            None => false,
        }
    }

    /// Record a fire if the severity is not cooling. Returns whether it fired.
    pub fn try_fire(&mut self, severity: Severity, now_ms: u64, cooldown_ms: u64) -> bool {
        if self.is_cooling(severity, now_ms, cooldown_ms) {
            return false;
        }
        self.last_fired.insert(severity, now_ms);
        true
    }

    pub fn last_fired(&self, severity: Severity) -> Option<u64> {
        self.last_fired.get(&severity).copied()
    }

    pub fn reset(&mut self) {
        self.last_fired.clear();
    }
}

/// Time since the last above-threshold activity. Fires once per idle period.
#[derive(Clone, Debug)]
pub struct InactivityMonitor {
    last_activity_ms: u64,
    alerted: bool,
}

impl InactivityMonitor {
    pub fn new(now_ms: u64) -> Self {
        Self {
            last_activity_ms: now_ms,
            alerted: false,
        }
    }

    /// Activity re-arms the alert.
    pub fn record_activity(&mut self, now_ms: u64) {
        self.last_activity_ms = self.last_activity_ms.max(now_ms);
        self.alerted = false;
    }

    pub fn idle_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_activity_ms)
    }

    /// True exactly once when idle time first exceeds `threshold_ms`.
    pub fn check(&mut self, now_ms: u64, threshold_ms: u64) -> bool {
        if self.alerted || self.idle_ms(now_ms) <= threshold_ms {
            return false;
        }
        self.alerted = true;
        true
    }

    pub fn reset(&mut self, now_ms: u64) {
        *self = Self::new(now_ms);
    }
}

/// Tracks an unresolved high/critical condition toward emergency mode.
#[derive(Clone, Debug, Default)]
pub struct EscalationTracker {
    pending_since: Option<u64>,
    escalated: bool,
}

impl EscalationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the clock if it is not already running.
    pub fn note(&mut self, now_ms: u64) {
        if self.pending_since.is_none() {
            self.pending_since = Some(now_ms);
        }
    }

    pub fn pending_since(&self) -> Option<u64> {
        self.pending_since
    }

    /// True exactly once when the condition has been open for `delay_ms`.
    pub fn due(&mut self, now_ms: u64, delay_ms: u64) -> bool {
        match self.pending_since {
            Some(since) if !self.escalated && now_ms.saturating_sub(since) >= delay_ms => {
                self.escalated = true;
                true
            }
            _ => false,
        }
    }

    /// Emergency mode stays on until the condition is resolved.
    pub fn emergency_active(&self) -> bool {
        self.escalated
    }

    pub fn resolve(&mut self) {
        self.pending_since = None;
        self.escalated = false;
    }
}
