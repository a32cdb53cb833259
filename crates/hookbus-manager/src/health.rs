//! Health reporting and the periodic health monitor.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hookbus_hooks::EngineStats;
use hookbus_loader::LoaderStats;

use crate::manager::HookManager;

/// Highest failure rate a healthy bus may report.
pub const MAX_FAILURE_RATE: f64 = 0.1;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub checked_at: DateTime<Utc>,
    /// Failed executions over all executions; zero before the first one.
    pub failure_rate: f64,
    pub max_failure_rate: f64,
    /// Conditions that make the report unhealthy.
    pub issues: Vec<String>,
    /// Discovery problems that do not affect health.
    pub warnings: Vec<String>,
    pub failed_hooks: BTreeMap<String, String>,
    pub engine: EngineStats,
    pub loader: LoaderStats,
}

impl HealthReport {
    pub fn evaluate(
        engine: EngineStats,
        loader: LoaderStats,
        failed_hooks: BTreeMap<String, String>,
        hooks_enabled: bool,
    ) -> Self {
        let failure_rate = if engine.executed == 0 {
            0.0
        } else {
            engine.failed as f64 / engine.executed as f64
        };

        let mut issues = Vec::new();
        if failure_rate >= MAX_FAILURE_RATE {
            issues.push(format!(
                "failure rate {:.1}% is at or above {:.0}%",
                failure_rate * 100.0,
                MAX_FAILURE_RATE * 100.0
            ));
        }
        if hooks_enabled && !engine.enabled {
            issues.push("engine is disabled".to_string());
        }
        for (name, error) in &failed_hooks {
            issues.push(format!("hook '{name}' failed to load: {error}"));
        }

        Self {
            healthy: issues.is_empty(),
            checked_at: Utc::now(),
            failure_rate,
            max_failure_rate: MAX_FAILURE_RATE,
            issues,
            warnings: loader.errors.clone(),
            failed_hooks,
            engine,
            loader,
        }
    }
}

impl HookManager {
    /// Aggregate engine, loader and per-hook state into a pass/fail report.
    pub async fn health_check(&self) -> HealthReport {
        let hooks_enabled = self.config().await.enabled;
        HealthReport::evaluate(
            self.engine().get_statistics().await,
            self.loader_stats(),
            self.failed_hooks().await,
            hooks_enabled,
        )
    }

    /// Run [`Self::health_check`] every `health_check_interval` seconds
    /// until `cancel` fires, logging unhealthy reports.
    pub fn spawn_health_monitor(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let secs = manager.config().await.health_check_interval.max(1);
            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let report = manager.health_check().await;
                if report.healthy {
                    tracing::debug!(failure_rate = report.failure_rate, "Hook health check passed");
                } else {
                    tracing::warn!(
                        failure_rate = report.failure_rate,
                        issues = ?report.issues,
                        "Hook health check failed"
                    );
                }
            }
            tracing::debug!("Health monitor stopped");
        })
    }
}
