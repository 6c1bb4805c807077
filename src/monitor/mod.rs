//! Per-chain upgrade watcher.
//!
//! Each tick:
//! 1. fetch the current plan (and the chain height when a plan exists)
//! 2. compare against the stored record
//! 3. alert and persist the new record state
//!
//! Fetch and dispatch failures are counted and logged, never fatal. Store
//! failures abandon the tick. Nothing here is shared with other chains except
//! the store directory and the metric families, both keyed by chain id.

use crate::chain::{FetchError, PlanSource, UpgradePlan};
use crate::config::ChainConfig;
use crate::metrics::Metrics;
use crate::notifier::{NotificationKind, Notifier};
use crate::store::{NotificationState, StoreError, UpgradeRecord, UpgradeStore};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum TickError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("store failed: {0}")]
    Store(#[from] StoreError),
}

/// What a tick should do given the stored record and what the chain reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// No plan, nothing stored.
    Idle,
    /// Plan gone (executed or cancelled), drop the record.
    Clear,
    /// First sighting of this plan. `superseded` when it replaces another.
    Announce { superseded: bool },
    /// Reminder threshold crossed.
    Remind,
    /// Target height reached after the reminder went out.
    MarkExecuted,
    /// Already alerted for this stage.
    Unchanged,
}

/// Decide the tick's action. `observed` is the fetched plan with the chain's
/// current height, `None` when no upgrade is scheduled.
pub fn decide(
    record: Option<&UpgradeRecord>,
    observed: Option<(&UpgradePlan, u64)>,
    remind_diff_blocks: u64,
) -> Action {
    let (record, (plan, current_height)) = match (record, observed) {
        (None, None) => return Action::Idle,
        (Some(_), None) => return Action::Clear,
        (None, Some(_)) => return Action::Announce { superseded: false },
        (Some(record), Some(observed)) => (record, observed),
    };

    if !record.tracks(plan) {
        return Action::Announce { superseded: true };
    }

    let remind_at = plan.height.saturating_sub(remind_diff_blocks);
    if record.state.awaiting_reminder() && current_height >= remind_at {
        return Action::Remind;
    }
    if record.state == NotificationState::Reminded && current_height >= plan.height {
        return Action::MarkExecuted;
    }
    Action::Unchanged
}

/// Result of one successful tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Cleared,
    Announced { delivered: bool },
    Reminded { delivered: bool },
    Executed,
    Unchanged,
    /// Shutdown arrived while fetching; nothing was written.
    Cancelled,
}

/// Watches one chain.
pub struct ChainMonitor<S, N> {
    config: ChainConfig,
    source: S,
    notifier: N,
    store: Arc<UpgradeStore>,
    metrics: Arc<Metrics>,
}

impl<S, N> ChainMonitor<S, N>
where
    S: PlanSource + 'static,
    N: Notifier + 'static,
{
    pub fn new(
        config: ChainConfig,
        source: S,
        notifier: N,
        store: Arc<UpgradeStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        metrics.register_chain(&config.chain_id);
        Self {
            config,
            source,
            notifier,
            store,
            metrics,
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.config.chain_id
    }

    /// Start the monitor in a background task. Returns immediately.
    pub fn start(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    /// Tick on the configured interval until `shutdown` fires. Shutdown
    /// abandons an in-flight fetch; alert dispatch and record writes are
    /// always finished.
    pub async fn run(self, shutdown: CancellationToken) {
        let chain = self.chain_id().to_string();
        info!(
            chain = %chain,
            interval_secs = self.config.interval.as_secs(),
            remind_diff_blocks = self.config.remind_diff_blocks,
            "starting watcher loop"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.poll(&shutdown).await {
                Ok(outcome) => debug!(chain = %chain, outcome = ?outcome, "tick complete"),
                Err(TickError::Fetch(e)) => {
                    warn!(chain = %chain, kind = e.kind(), error = %e, "upgrade check failed");
                }
                Err(TickError::Store(e)) => {
                    error!(chain = %chain, error = %e, "upgrade store failed, skipping tick");
                }
            }
        }

        info!(chain = %chain, "watcher loop stopped");
    }

    /// One poll of the chain. Errors have already been counted in metrics.
    pub async fn tick(&self) -> Result<TickOutcome, TickError> {
        self.poll(&CancellationToken::new()).await
    }

    async fn poll(&self, shutdown: &CancellationToken) -> Result<TickOutcome, TickError> {
        self.metrics.mark_checked(self.chain_id());
        let result = self.check(shutdown).await;
        if result.is_err() {
            self.metrics.inc_error(self.chain_id());
        }
        result
    }

    /// Current plan plus the chain height when a plan is scheduled.
    async fn fetch(&self) -> Result<Option<(UpgradePlan, u64)>, FetchError> {
        debug!(chain = %self.chain_id(), "fetching upgrade plan");
        match self.source.current_plan().await? {
            Some(plan) => {
                let height = self.source.latest_height().await?;
                Ok(Some((plan, height)))
            }
            None => Ok(None),
        }
    }

    async fn check(&self, shutdown: &CancellationToken) -> Result<TickOutcome, TickError> {
        let chain = self.chain_id();

        // Fetching writes nothing, so it is the only stage shutdown may cut short
        let observed = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!(chain = %chain, "shutdown during fetch");
                return Ok(TickOutcome::Cancelled);
            }
            fetched = self.fetch() => fetched?,
        };

        let record = self.store.get(chain).await?;
        let action = decide(
            record.as_ref(),
            observed.as_ref().map(|(plan, height)| (plan, *height)),
            self.config.remind_diff_blocks,
        );

        let (record, (plan, current_height)) = match (action, record, observed) {
            (Action::Idle, _, _) => {
                debug!(chain = %chain, "no current upgrade plan");
                self.metrics.set_upgrade_height(chain, None);
                return Ok(TickOutcome::Idle);
            }
            (Action::Clear, Some(record), _) => {
                self.store.clear(chain).await?;
                self.metrics.set_upgrade_height(chain, None);
                info!(
                    chain = %chain,
                    upgrade = %record.name,
                    height = record.height,
                    state = %record.state,
                    "upgrade plan no longer scheduled, record cleared"
                );
                return Ok(TickOutcome::Cleared);
            }
            (_, record, Some(observed)) => (record, observed),
            // decide() only clears with a record and only acts on a plan when one was observed
            (action, _, None) => {
                debug!(chain = %chain, action = ?action, "nothing to act on");
                return Ok(TickOutcome::Unchanged);
            }
        };

        self.metrics.set_upgrade_height(chain, Some(plan.height));

        match action {
            Action::Announce { superseded } => {
                if let Some(old) = record.as_ref().filter(|_| superseded) {
                    info!(
                        chain = %chain,
                        old_upgrade = %old.name,
                        old_height = old.height,
                        upgrade = %plan.name,
                        height = plan.height,
                        "upgrade plan replaced"
                    );
                } else {
                    info!(
                        chain = %chain,
                        upgrade = %plan.name,
                        height = plan.height,
                        "new upgrade plan"
                    );
                }

                let delivered = self
                    .dispatch(NotificationKind::NewUpgrade, &plan, current_height)
                    .await;
                let state = if delivered {
                    NotificationState::Notified
                } else {
                    NotificationState::None
                };
                self.store
                    .put(chain, &UpgradeRecord::new(chain, &plan, state))
                    .await?;
                Ok(TickOutcome::Announced { delivered })
            }
            Action::Remind => {
                info!(
                    chain = %chain,
                    upgrade = %plan.name,
                    height = plan.height,
                    current_height = current_height,
                    remind_diff_blocks = self.config.remind_diff_blocks,
                    "upgrade within reminder threshold"
                );
                let delivered = self
                    .dispatch(NotificationKind::Reminder, &plan, current_height)
                    .await;
                // Reminder is spent either way; the next alert is the next state change
                if let Some(record) = record {
                    self.store
                        .put(chain, &record.with_state(NotificationState::Reminded))
                        .await?;
                }
                Ok(TickOutcome::Reminded { delivered })
            }
            Action::MarkExecuted => {
                if let Some(record) = record {
                    self.store
                        .put(chain, &record.with_state(NotificationState::Executed))
                        .await?;
                }
                info!(
                    chain = %chain,
                    upgrade = %plan.name,
                    height = plan.height,
                    current_height = current_height,
                    "upgrade height reached"
                );
                Ok(TickOutcome::Executed)
            }
            Action::Idle | Action::Clear | Action::Unchanged => {
                debug!(chain = %chain, upgrade = %plan.name, "no new upgrade plan");
                Ok(TickOutcome::Unchanged)
            }
        }
    }

    /// Send one alert. Failures are logged and counted, never retried here.
    async fn dispatch(
        &self,
        kind: NotificationKind,
        plan: &UpgradePlan,
        current_height: u64,
    ) -> bool {
        let chain = self.chain_id();
        match self.notifier.notify(chain, kind, plan, current_height).await {
            Ok(()) => {
                self.metrics.inc_notification(chain, kind);
                info!(chain = %chain, kind = %kind, upgrade = %plan.name, "notification sent");
                true
            }
            Err(e) => {
                self.metrics.inc_error(chain);
                error!(chain = %chain, kind = %kind, error = %e, "failed to send notification");
                false
            }
        }
    }
}
