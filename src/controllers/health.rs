//! # Health reports.
//!
//! A [`HealthReport`] always carries the controller identity and lifecycle state;
//! a controller's own health step only adjusts `healthy`, `degraded`, `message`
//! and `details`. [`SystemHealth`] rolls reports up:
//!
//! - any report unhealthy → [`HealthStatus::Unhealthy`]
//! - else any report degraded → [`HealthStatus::Degraded`]
//! - else (including no reports) → [`HealthStatus::Healthy`]

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use super::context::ControllerId;
use crate::core::LifecycleState;

/// Coarse health classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health of one controller.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    /// Working, with reduced capability (e.g. running on simulated hardware).
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
    pub message: String,
    pub controller: String,
    pub id: ControllerId,
    pub state: LifecycleState,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl HealthReport {
    pub(crate) fn new(
        id: ControllerId,
        controller: impl Into<String>,
        state: LifecycleState,
        healthy: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            healthy,
            degraded: false,
            message: message.into(),
            controller: controller.into(),
            id,
            state,
            details: BTreeMap::new(),
        }
    }

    /// Marks the report healthy with `message`.
    pub fn healthy(mut self, message: impl Into<String>) -> Self {
        self.healthy = true;
        self.message = message.into();
        self
    }

    /// Marks the report unhealthy with `message`.
    pub fn unhealthy(mut self, message: impl Into<String>) -> Self {
        self.healthy = false;
        self.message = message.into();
        self
    }

    /// Marks the report degraded with `message` (still counted as healthy).
    pub fn degraded(mut self, message: impl Into<String>) -> Self {
        self.healthy = true;
        self.degraded = true;
        self.message = message.into();
        self
    }

    /// Adds or replaces one detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }

    pub fn status(&self) -> HealthStatus {
        match (self.healthy, self.degraded) {
            (false, _) => HealthStatus::Unhealthy,
            (true, true) => HealthStatus::Degraded,
            (true, false) => HealthStatus::Healthy,
        }
    }
}

/// Aggregated health of every registered controller.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub uptime_ms: u64,
    pub controllers: Vec<HealthReport>,
}

impl SystemHealth {
    pub fn from_reports(controllers: Vec<HealthReport>, uptime: Duration) -> Self {
        let status = controllers
            .iter()
            .map(HealthReport::status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self {
            status,
            uptime_ms: uptime.as_millis().min(u128::from(u64::MAX)) as u64,
            controllers,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Names of controllers reporting unhealthy.
    pub fn unhealthy(&self) -> impl Iterator<Item = &str> {
        self.controllers
            .iter()
            .filter(|r| !r.healthy)
            .map(|r| r.controller.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(name: &str) -> HealthReport {
        HealthReport::new(ControllerId::next(), name, LifecycleState::Running, true, "running")
    }

    #[test]
    fn worst_status_wins() {
        let sys = SystemHealth::from_reports(
            vec![report("a"), report("b").degraded("simulated gpio")],
            Duration::from_secs(1),
        );
        assert_eq!(sys.status, HealthStatus::Degraded);

        let sys = SystemHealth::from_reports(
            vec![report("a").degraded("simulated"), report("b").unhealthy("stalled")],
            Duration::ZERO,
        );
        assert_eq!(sys.status, HealthStatus::Unhealthy);
        assert_eq!(sys.unhealthy().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn no_controllers_is_healthy() {
        let sys = SystemHealth::from_reports(Vec::new(), Duration::from_millis(1500));
        assert!(sys.is_healthy());
        assert_eq!(sys.uptime_ms, 1500);
    }

    #[test]
    fn report_serializes_identity_and_details() {
        let r = report("pump").with_detail("iterations", 3);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["controller"], "pump");
        assert_eq!(json["state"], "running");
        assert_eq!(json["details"]["iterations"], "3");
        assert!(json.get("degraded").is_none());
    }
}
