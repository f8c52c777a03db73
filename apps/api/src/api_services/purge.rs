use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use vapi_application::KeyValueStore;

/// Periodically drops expired entries from a store without native expiry.
pub fn spawn_store_purge_loop(store: Arc<dyn KeyValueStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => debug!(purged, "purged expired store entries"),
                Err(error) => warn!(error = %error, "failed to purge expired store entries"),
            }
        }
    })
}
