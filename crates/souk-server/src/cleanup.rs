use std::time::Duration;

use tracing::{debug, info, warn};

use souk_api::AppState;

/// Background task that keeps listings tidy.
///
/// Each tick clears VIP windows that have ended, deactivates approved ads
/// nobody has touched for `retention_days`, and drops expired referral
/// cache entries.
pub async fn run_sweep_loop(state: AppState, interval_secs: u64, retention_days: i64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match sweep(&state, retention_days).await {
            Ok((vip, stale)) => {
                if vip > 0 || stale > 0 {
                    info!("Sweep: {} VIP windows ended, {} stale ads deactivated", vip, stale);
                }
            }
            Err(e) => {
                warn!("Sweep error: {}", e);
            }
        }

        let purged = state.referral_cache.purge_expired();
        if purged > 0 {
            debug!("Sweep: purged {} referral cache entries", purged);
        }
    }
}

async fn sweep(state: &AppState, retention_days: i64) -> Result<(usize, usize), souk_api::error::ApiError> {
    let now = state.clock.now();
    let cutoff = now - chrono::Duration::days(retention_days);

    state
        .db(move |db| {
            let vip = db.clear_lapsed_vip(now)?;
            let stale = db.deactivate_stale_ads(cutoff, now)?;
            Ok((vip, stale))
        })
        .await
}
