use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::store::Store;

/// Start a background thread that periodically writes the table to the
/// snapshot file. Encoding happens under the store lock; file I/O does not.
pub fn start_checkpoint_thread(
    store: Arc<Store>,
    snapshot_path: PathBuf,
    checkpoint_secs: u64,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    let check_interval = Duration::from_secs(checkpoint_secs);

    std::thread::Builder::new()
        .name("snapfs-checkpoint".to_string())
        .spawn(move || {
            debug!("Checkpoint thread started, checkpoint_secs={}", checkpoint_secs);
            while !shutdown.load(Ordering::Relaxed) {
                // Sleep in 1-second ticks so we notice the shutdown flag promptly.
                let mut remaining = check_interval;
                let tick = Duration::from_secs(1);
                while remaining > Duration::ZERO {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    let sleep_time = remaining.min(tick);
                    std::thread::sleep(sleep_time);
                    remaining = remaining.saturating_sub(sleep_time);
                }
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                match store.save_to(&snapshot_path) {
                    Ok(count) => debug!(
                        "Checkpoint of {} entries written to {}",
                        count,
                        snapshot_path.display()
                    ),
                    Err(e) => warn!("Checkpoint to {} failed: {}", snapshot_path.display(), e),
                }
            }
            debug!("Checkpoint thread shutting down");
        })
}
