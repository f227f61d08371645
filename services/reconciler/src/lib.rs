//! Reconciler Service
//!
//! Bounds the lifetime of UNKNOWN and stuck intents. On a fixed interval it
//! re-queries the ledger for every intent that has been SUBMITTED or UNKNOWN
//! beyond a grace period and applies whatever the ledger actually decided,
//! out-of-band through the orchestrator. Intents the ledger has no record of
//! after a long grace period are conservatively FAILED and their holds
//! released — operators are notified through the event stream, never
//! silently.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use intent_store::IntentStore;
use ledger_gateway::{LedgerGateway, OperationStatus};
use settlement::SettlementOrchestrator;
use types::clock;
use types::intent::Intent;

/// Reconciliation cadence and patience thresholds.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Time between audit passes.
    pub interval: Duration,
    /// Leave intents younger than this alone; the live settlement path is
    /// still working on them.
    pub grace: Duration,
    /// An intent the ledger has no record of after this long is FAILED and
    /// its holds released.
    pub abandon_after: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            grace: Duration::from_secs(120),
            abandon_after: Duration::from_secs(900),
        }
    }
}

impl ReconcilerConfig {
    /// Defaults overridden by `RECONCILER_*` environment variables where set.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval: env_millis("RECONCILER_INTERVAL_MS").unwrap_or(defaults.interval),
            grace: env_millis("RECONCILER_GRACE_MS").unwrap_or(defaults.grace),
            abandon_after: env_millis("RECONCILER_ABANDON_AFTER_MS")
                .unwrap_or(defaults.abandon_after),
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()?
        .parse()
        .ok()
        .map(Duration::from_millis)
}

/// What one audit pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Ledger showed finalized success; effects applied out-of-band.
    pub resolved_confirmed: usize,
    /// Ledger showed finalized failure; holds released out-of-band.
    pub resolved_failed: usize,
    /// Stale PENDING intents whose submission was found on the ledger.
    pub adopted: usize,
    /// Intents FAILED after the ledger had no record past the long grace.
    pub abandoned: usize,
    /// Intents still awaiting resolution after this pass.
    pub still_unresolved: usize,
}

/// Background process comparing local intent state against ledger truth.
pub struct Reconciler {
    orchestrator: Arc<SettlementOrchestrator>,
    intents: Arc<IntentStore>,
    gateway: Arc<LedgerGateway>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        orchestrator: Arc<SettlementOrchestrator>,
        intents: Arc<IntentStore>,
        gateway: Arc<LedgerGateway>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            orchestrator,
            intents,
            gateway,
            config,
        }
    }

    /// Spawn the periodic audit loop.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            loop {
                ticker.tick().await;
                let report = self.tick().await;
                if report != ReconcileReport::default() {
                    info!(?report, "reconciliation pass complete");
                }
            }
        })
    }

    /// One audit pass. Errors on individual intents are logged and skipped;
    /// the next pass retries them.
    pub async fn tick(&self) -> ReconcileReport {
        let now = clock::now_nanos();
        let grace = self.config.grace.as_nanos() as i64;
        let mut report = ReconcileReport::default();

        for intent in self.intents.stuck(now, grace) {
            self.reconcile_stuck(&intent, now, &mut report).await;
        }
        for intent in self.intents.stale_pending(now, grace) {
            self.reconcile_stale_pending(&intent, now, &mut report).await;
        }
        report
    }

    /// SUBMITTED or UNKNOWN beyond grace: ask the ledger what it decided.
    async fn reconcile_stuck(&self, intent: &Intent, now: i64, report: &mut ReconcileReport) {
        let intent_id = intent.intent_id;
        let Some(tx_ref) = intent.ledger_tx_ref.clone() else {
            // SUBMITTED without a reference cannot happen via the store's
            // transitions; leave it for operators rather than guessing.
            warn!(%intent_id, "stuck intent has no ledger reference");
            report.still_unresolved += 1;
            return;
        };

        match self.gateway.probe(&tx_ref).await {
            Ok(OperationStatus::FinalizedSuccess) => {
                match self.orchestrator.resolve_out_of_band(intent_id, true).await {
                    Ok(()) => report.resolved_confirmed += 1,
                    Err(e) => {
                        warn!(%intent_id, error = %e, "failed applying confirmed outcome");
                        report.still_unresolved += 1;
                    }
                }
            }
            Ok(OperationStatus::FinalizedFailure { reason }) => {
                debug!(%intent_id, %reason, "ledger finalized failure");
                match self.orchestrator.resolve_out_of_band(intent_id, false).await {
                    Ok(()) => report.resolved_failed += 1,
                    Err(e) => {
                        warn!(%intent_id, error = %e, "failed applying failed outcome");
                        report.still_unresolved += 1;
                    }
                }
            }
            Ok(OperationStatus::Pending) => {
                // The ledger knows the operation and is still working;
                // patience, not abandonment.
                report.still_unresolved += 1;
            }
            Ok(OperationStatus::Unknown) => {
                self.maybe_abandon(intent, now, report).await;
            }
            Err(e) => {
                debug!(%intent_id, error = %e, "probe failed, will retry next pass");
                report.still_unresolved += 1;
            }
        }
    }

    /// PENDING beyond grace: a crash landed between the durable intent write
    /// and the submission. The idempotency id tells us whether the ledger
    /// ever saw it.
    async fn reconcile_stale_pending(
        &self,
        intent: &Intent,
        now: i64,
        report: &mut ReconcileReport,
    ) {
        let intent_id = intent.intent_id;
        match self.gateway.lookup(intent_id).await {
            Ok(Some(tx_ref)) => {
                info!(%intent_id, %tx_ref, "adopting submission found on ledger");
                match self.orchestrator.note_submitted(intent_id, tx_ref) {
                    Ok(()) => report.adopted += 1,
                    Err(e) => {
                        warn!(%intent_id, error = %e, "failed adopting submission");
                        report.still_unresolved += 1;
                    }
                }
            }
            Ok(None) => {
                self.maybe_abandon(intent, now, report).await;
            }
            Err(e) => {
                debug!(%intent_id, error = %e, "lookup failed, will retry next pass");
                report.still_unresolved += 1;
            }
        }
    }

    async fn maybe_abandon(&self, intent: &Intent, now: i64, report: &mut ReconcileReport) {
        let abandon_after = self.config.abandon_after.as_nanos() as i64;
        if intent.idle_nanos(now) < abandon_after {
            report.still_unresolved += 1;
            return;
        }
        match self.orchestrator.abandon(intent.intent_id).await {
            Ok(()) => report.abandoned += 1,
            Err(e) => {
                warn!(intent_id = %intent.intent_id, error = %e, "failed abandoning intent");
                report.still_unresolved += 1;
            }
        }
    }
}
