use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::detect::result::DetectionResult;
use crate::frame::InferenceView;

use super::backend::DetectorBackend;

/// Per-backend counters, reported in the daemon health log.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BackendHealth {
    pub name: &'static str,
    pub ready: bool,
    pub calls: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

struct Slot {
    backend: Box<dyn DetectorBackend>,
    health: BackendHealth,
}

impl Slot {
    fn record_failure(&mut self, err: &anyhow::Error) {
        self.health.failures += 1;
        self.health.consecutive_failures = self.health.consecutive_failures.saturating_add(1);
        self.health.last_error = Some(err.to_string());
    }
}

/// Ordered detector chain owned by one monitor session.
///
/// The preferred backend runs first; when it is not ready or fails, the next ready
/// backend in registration order is tried. The chain fails only when every backend
/// does, and the session treats that as "no classification this tick".
#[derive(Default)]
pub struct BackendRegistry {
    slots: Vec<Slot>,
    preferred: usize,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a backend. The first one registered is preferred.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name();
        log::info!("detector backend registered: {}", name);
        self.slots.push(Slot {
            health: BackendHealth {
                name,
                ready: backend.is_ready(),
                ..BackendHealth::default()
            },
            backend: Box::new(backend),
        });
    }

    pub fn prefer(&mut self, name: &str) -> Result<()> {
        let idx = self
            .slots
            .iter()
            .position(|s| s.health.name == name)
            .ok_or_else(|| anyhow!("backend '{}' not registered", name))?;
        self.preferred = idx;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.slots.iter().map(|s| s.health.name).collect()
    }

    pub fn health(&self) -> Vec<BackendHealth> {
        self.slots.iter().map(|s| s.health.clone()).collect()
    }

    /// Warm every backend. Returns how many are ready afterwards.
    pub fn warm_up(&mut self) -> usize {
        for slot in self.slots.iter_mut() {
            if let Err(err) = slot.backend.warm_up() {
                log::warn!("detector {} failed to warm up: {}", slot.health.name, err);
                slot.record_failure(&err);
            }
            slot.health.ready = slot.backend.is_ready();
        }
        self.slots.iter().filter(|s| s.health.ready).count()
    }

    /// Run the chain on one frame view.
    pub fn detect_objects(&mut self, view: &InferenceView<'_>) -> Result<DetectionResult> {
        if self.slots.is_empty() {
            return Err(anyhow!("no detector backend registered"));
        }
        let preferred = self.preferred;
        let order = std::iter::once(preferred)
            .chain((0..self.slots.len()).filter(move |&i| i != preferred));

        let mut last_error = None;
        for idx in order {
            let slot = &mut self.slots[idx];
            slot.health.ready = slot.backend.is_ready();
            if !slot.health.ready {
                continue;
            }
            slot.health.calls += 1;
            match view.run_detector(slot.backend.as_mut()) {
                Ok(result) => {
                    slot.health.consecutive_failures = 0;
                    return Ok(result);
                }
                Err(err) => {
                    log::debug!("detector {} failed: {}", slot.health.name, err);
                    slot.record_failure(&err);
                    last_error = Some(format!("{}: {}", slot.health.name, err));
                }
            }
        }
        Err(match last_error {
            Some(err) => anyhow!("all detector backends failed (last {})", err),
            None => anyhow!("no detector backend is ready"),
        })
    }
}
