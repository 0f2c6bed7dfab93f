use std::sync::Arc;

use chrono::Duration;
use tracing::error;

use souk_db::Database;
use souk_gateway::dispatcher::Dispatcher;

use crate::cache::TtlCache;
use crate::clock::Clock;
use crate::error::ApiError;
use crate::storage::Storage;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub dispatcher: Dispatcher,
    pub storage: Storage,
    /// Prefix joined with a stored file name to build its public URL.
    pub media_url: String,
    /// Normalized referral code -> whether it belongs to an active referrer.
    pub referral_cache: TtlCache<String, bool>,
    pub clock: Arc<dyn Clock>,
}

impl AppStateInner {
    /// Runs a database call on the blocking pool.
    pub async fn db<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal
            })?
            .map_err(ApiError::from)
    }

    pub fn media_url_for(&self, name: &str) -> String {
        format!("{}/{}", self.media_url.trim_end_matches('/'), name)
    }
}
