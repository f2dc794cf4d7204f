use std::sync::Arc;

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;

use concord_db::Database;
use concord_gateway::relay::Relay;
use concord_gateway::store::SqliteMessageStore;
use concord_store::{MessageBus, SessionStore};

use crate::password::PasswordHasher;
use crate::service::AuthService;
use crate::tokens::TokenService;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub auth: AuthService,
    pub relay: Relay,
}

impl AppStateInner {
    pub fn new(
        db: Arc<Database>,
        sessions: Arc<dyn SessionStore>,
        bus: Arc<dyn MessageBus>,
        tokens: TokenService,
        hasher: PasswordHasher,
        shutdown: CancellationToken,
    ) -> AppState {
        let messages = Arc::new(SqliteMessageStore::new(db.clone()));
        Arc::new(Self {
            auth: AuthService::new(db.clone(), sessions, tokens, hasher),
            relay: Relay::new(bus, messages, shutdown),
            db,
        })
    }

    /// Runs a blocking database call on the blocking pool.
    pub async fn with_db<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {e}"))?
    }
}
