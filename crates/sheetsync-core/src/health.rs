//! Health tracking for the store, cache and writer components.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Component names tracked by [`HealthCheck`].
pub mod component {
    /// Remote table store connectivity
    pub const STORE: &str = "store";
    /// Snapshot reads
    pub const CACHE: &str = "cache";
    /// Batch and immediate flushes
    pub const WRITER: &str = "writer";

    pub const ALL: [&str; 3] = [STORE, CACHE, WRITER];
}

/// Health status of a component.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ComponentStatus {
    Healthy,
    /// Operational, but the last operation failed
    Degraded(String),
    Unhealthy(String),
    /// No operation has reported yet
    Unknown,
}

/// Overall system health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Point-in-time health summary.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub ready: bool,
    pub components: BTreeMap<String, ComponentStatus>,
}

/// Tracks component health and whether operations are being accepted.
pub struct HealthCheck {
    components: RwLock<BTreeMap<String, ComponentStatus>>,
    ready: AtomicBool,
}

impl HealthCheck {
    /// Create a health check with every component registered as unknown.
    pub fn new() -> Self {
        let health = Self {
            components: RwLock::new(BTreeMap::new()),
            ready: AtomicBool::new(false),
        };
        for name in component::ALL {
            health.register_component(name);
        }
        health
    }

    /// Register a component to track.
    pub fn register_component(&self, name: &str) {
        self.components
            .write()
            .insert(name.to_string(), ComponentStatus::Unknown);
    }

    pub fn mark_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy);
    }

    pub fn mark_degraded(&self, name: &str, reason: &str) {
        self.set(name, ComponentStatus::Degraded(reason.to_string()));
    }

    pub fn mark_unhealthy(&self, name: &str, reason: &str) {
        self.set(name, ComponentStatus::Unhealthy(reason.to_string()));
    }

    fn set(&self, name: &str, status: ComponentStatus) {
        self.components.write().insert(name.to_string(), status);
    }

    /// Get the status of a specific component.
    pub fn get_component_status(&self, name: &str) -> Option<ComponentStatus> {
        self.components.read().get(name).cloned()
    }

    /// Get overall system health status.
    pub fn overall_status(&self) -> HealthStatus {
        let components = self.components.read();

        let mut has_degraded = false;
        for status in components.values() {
            match status {
                ComponentStatus::Unhealthy(_) => return HealthStatus::Unhealthy,
                ComponentStatus::Degraded(_) => has_degraded = true,
                _ => {}
            }
        }

        if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Check if the system is operational (healthy or degraded).
    pub fn is_operational(&self) -> bool {
        self.overall_status() != HealthStatus::Unhealthy
    }

    /// Mark whether operations are accepted.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Whether operations are accepted and the system is operational.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && self.is_operational()
    }

    /// Summarize current health.
    pub fn report(&self) -> HealthReport {
        HealthReport {
            status: self.overall_status(),
            ready: self.is_ready(),
            components: self.components.read().clone(),
        }
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}
