//! Periodic maintenance: expired completed-result entries, stale job
//! records, and aged output files. A missed tick is harmless; registry
//! lookups evict lazily and the next tick catches the rest.

use std::sync::Arc;
use std::time::Duration;

use crate::state::AppState;

const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub fn spawn_sweeper(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        // The first tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let expired = state.registry.sweep_expired();
            let reaped = state.broker.reap_stale();
            let aged = state.store.sweep_aged().await;
            if expired + reaped + aged > 0 {
                log::debug!(
                    "sweep: {expired} expired results, {reaped} stale jobs, {aged} aged files"
                );
            }
        }
    });
}
