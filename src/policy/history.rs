use std::collections::VecDeque;

use super::Alert;

pub const ALERT_HISTORY_CAP: usize = 100;

/// Bounded alert history, oldest evicted first.
#[derive(Clone, Debug)]
pub struct AlertHistory {
    cap: usize,
    alerts: VecDeque<Alert>,
}

impl AlertHistory {
    pub fn new() -> Self {
        Self::with_cap(ALERT_HISTORY_CAP)
    }

    pub fn with_cap(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            alerts: VecDeque::with_capacity(cap),
        }
    }

    pub fn push(&mut self, alert: Alert) {
        if self.alerts.len() == self.cap {
            self.alerts.pop_front();
        }
        self.alerts.push_back(alert);
    }

    pub fn get(&self, id: &str) -> Option<&Alert> {
        self.alerts.iter().find(|a| a.id == id)
    }

    /// Mark acknowledged. Returns the alert if it was found.
    pub fn acknowledge(&mut self, id: &str) -> Option<&Alert> {
        let alert = self.alerts.iter_mut().find(|a| a.id == id)?;
        alert.acknowledged = true;
        Some(alert)
    }

    pub fn acknowledge_all(&mut self) -> usize {
        let mut count = 0;
        for alert in self.alerts.iter_mut().filter(|a| !a.acknowledged) {
            alert.acknowledged = true;
            count += 1;
        }
        count
    }

    pub fn unacknowledged(&self) -> Vec<&Alert> {
        self.alerts.iter().filter(|a| !a.acknowledged).collect()
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<&Alert> {
        self.alerts.iter().rev().take(limit).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn clear(&mut self) {
        self.alerts.clear();
    }
}

impl Default for AlertHistory {
    fn default() -> Self {
        Self::new()
    }
}
