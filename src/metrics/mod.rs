//! Prometheus metrics for the watcher.
//!
//! Tracks, per chain:
//! - when the upgrade plan was last checked
//! - fetch/dispatch/store failures
//! - notifications delivered, by kind
//! - target height of the tracked plan

pub mod server;

use crate::notifier::NotificationKind;
use prometheus::{Encoder, GaugeVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

const NAMESPACE: &str = "cosmos_upgrade_watcher";

/// Metric families registered on a private [`Registry`].
pub struct Metrics {
    registry: Registry,
    last_checked: GaugeVec,
    errors: IntCounterVec,
    notifications: IntCounterVec,
    upgrade_height: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let last_checked = GaugeVec::new(
            Opts::new("last_checked", "Last time an upgrade was fetched (unix seconds)")
                .namespace(NAMESPACE),
            &["chain"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("errors", "Errors encountered while watching for upgrades")
                .namespace(NAMESPACE),
            &["chain"],
        )?;
        let notifications = IntCounterVec::new(
            Opts::new("notifications", "Upgrade notifications delivered").namespace(NAMESPACE),
            &["chain", "kind"],
        )?;
        let upgrade_height = IntGaugeVec::new(
            Opts::new("upgrade_height", "Target height of the tracked upgrade plan, 0 if none")
                .namespace(NAMESPACE),
            &["chain"],
        )?;

        registry.register(Box::new(last_checked.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(notifications.clone()))?;
        registry.register(Box::new(upgrade_height.clone()))?;

        Ok(Self {
            registry,
            last_checked,
            errors,
            notifications,
            upgrade_height,
        })
    }

    /// Create the chain's series at zero so they show up before the first tick.
    pub fn register_chain(&self, chain_id: &str) {
        self.last_checked.with_label_values(&[chain_id]);
        self.errors.with_label_values(&[chain_id]);
        self.upgrade_height.with_label_values(&[chain_id]);
        for kind in [NotificationKind::NewUpgrade, NotificationKind::Reminder] {
            self.notifications.with_label_values(&[chain_id, kind.as_str()]);
        }
    }

    pub fn mark_checked(&self, chain_id: &str) {
        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        self.last_checked.with_label_values(&[chain_id]).set(now);
    }

    pub fn inc_error(&self, chain_id: &str) {
        self.errors.with_label_values(&[chain_id]).inc();
    }

    pub fn inc_notification(&self, chain_id: &str, kind: NotificationKind) {
        self.notifications
            .with_label_values(&[chain_id, kind.as_str()])
            .inc();
    }

    pub fn set_upgrade_height(&self, chain_id: &str, height: Option<u64>) {
        let height = height.map_or(0, |h| i64::try_from(h).unwrap_or(i64::MAX));
        self.upgrade_height.with_label_values(&[chain_id]).set(height);
    }

    pub fn errors(&self, chain_id: &str) -> u64 {
        self.errors.with_label_values(&[chain_id]).get()
    }

    pub fn notifications(&self, chain_id: &str, kind: NotificationKind) -> u64 {
        self.notifications
            .with_label_values(&[chain_id, kind.as_str()])
            .get()
    }

    pub fn last_checked(&self, chain_id: &str) -> f64 {
        self.last_checked.with_label_values(&[chain_id]).get()
    }

    /// Prometheus text exposition of every family.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_chain_series() {
        let metrics = Metrics::new().unwrap();
        metrics.register_chain("chain-a");
        metrics.mark_checked("chain-a");
        metrics.inc_error("chain-a");
        metrics.inc_error("chain-a");
        metrics.inc_notification("chain-a", NotificationKind::Reminder);
        metrics.set_upgrade_height("chain-a", Some(1000));

        let text = metrics.render().unwrap();
        assert!(text.contains("# TYPE cosmos_upgrade_watcher_last_checked gauge"));
        assert!(text.contains("# TYPE cosmos_upgrade_watcher_errors counter"));
        assert!(text.contains(r#"cosmos_upgrade_watcher_errors{chain="chain-a"} 2"#));
        assert!(text.contains(
            r#"cosmos_upgrade_watcher_notifications{chain="chain-a",kind="new_upgrade"} 0"#
        ));
        assert!(text.contains(
            r#"cosmos_upgrade_watcher_notifications{chain="chain-a",kind="reminder"} 1"#
        ));
        assert!(text.contains(r#"cosmos_upgrade_watcher_upgrade_height{chain="chain-a"} 1000"#));

        assert!(metrics.last_checked("chain-a") > 0.0);
        assert_eq!(metrics.errors("chain-a"), 2);
    }

    #[test]
    fn test_chains_are_independent() {
        let metrics = Metrics::new().unwrap();
        metrics.register_chain("chain-a");
        metrics.register_chain("chain-b");
        metrics.inc_error("chain-b");

        assert_eq!(metrics.errors("chain-a"), 0);
        assert_eq!(metrics.errors("chain-b"), 1);
        metrics.set_upgrade_height("chain-b", None);
        assert!(metrics
            .render()
            .unwrap()
            .contains(r#"cosmos_upgrade_watcher_upgrade_height{chain="chain-b"} 0"#));
    }
}
