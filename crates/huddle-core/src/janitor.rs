use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::task::JoinHandle;

use crate::latent::LatentStore;
use crate::registry::RoomRegistry;

/// Spawn the periodic sweep that evicts both abandoned ad-hoc rooms and
/// expired pre-created rooms in one pass (spec.md §4.5). Grounded on the
/// `spawn_retention_task` shape in the pack's `local-agent-chat::retention`
/// module: a short initial stagger so the janitor doesn't compete with
/// startup, then a steady `interval` loop for the process lifetime.
///
/// Rewrites the latent store whenever a sweep evicts anything, since an
/// expired pre-created room removed here must also disappear from disk
/// (spec.md §4.2) rather than wait for the next connection close to
/// trigger a rewrite.
pub fn spawn_room_cleanup(
    registry: Arc<RoomRegistry>,
    latent_store: Arc<LatentStore>,
    interval: StdDuration,
    room_max_age: Duration,
    latent_max_age: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(StdDuration::from_secs(5)).await;
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let evicted = registry.cleanup_abandoned_rooms(Some(room_max_age), Some(latent_max_age));
            if evicted > 0 {
                tracing::info!(evicted, "janitor swept abandoned rooms");
                latent_store.persist(registry.latent_rooms()).await;
            }
        }
    })
}
