//! Background re-polling of accounts confirmed absent.

use std::time::Duration;

use log::{debug, info};
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use super::WeakCache;
use crate::source::AccountSource;

/// Re-fetches every missing key each `period` until the cache is closed or
/// dropped. Newly existing keys get promoted to watched by the fetch itself.
pub(crate) fn spawn_missing_poller<T, S>(cache: WeakCache<T, S>, period: Duration) -> JoinHandle<()>
where
    T: Send + Sync + 'static,
    S: AccountSource,
{
    tokio::spawn(async move {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let Some(cache) = cache.upgrade() else {
                break;
            };
            if cache.is_closed() {
                break;
            }

            let missing = cache.missing_keys();
            if missing.is_empty() {
                continue;
            }
            debug!("🔁 [POLL] re-fetching {} missing accounts", missing.len());
            let found = cache.requery_missing(&missing).await;
            if found > 0 {
                info!("✅ [POLL] {} of {} missing accounts now exist", found, missing.len());
            }
        }
        debug!("[POLL] missing-account poller stopped");
    })
}
