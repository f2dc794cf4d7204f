use std::sync::Arc;

use argon2::Params;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use concord_db::Database;
use concord_store::MemoryStore;

use crate::password::PasswordHasher;
use crate::service::AuthService;
use crate::state::{AppState, AppStateInner};
use crate::tokens::TokenService;

pub const TEST_SECRET: &str = "concord_test_secret_that_is_definitely_long_enough";

/// Application state over a throwaway SQLite file and an in-process store.
pub struct TestApp {
    pub state: AppState,
    pub auth: AuthService,
    pub store: Arc<MemoryStore>,
    _dir: TempDir,
}

pub fn test_app() -> TestApp {
    let dir = TempDir::new().expect("temp dir");
    let db = Arc::new(Database::open(&dir.path().join("concord.db")).expect("open db"));
    let store = Arc::new(MemoryStore::new());
    let tokens = TokenService::new(TEST_SECRET).expect("token service");
    let hasher = PasswordHasher::new(Params::MIN_M_COST, 1).expect("hasher");

    let state = AppStateInner::new(
        db,
        store.clone(),
        store.clone(),
        tokens,
        hasher,
        CancellationToken::new(),
    );

    TestApp {
        auth: state.auth.clone(),
        state,
        store,
        _dir: dir,
    }
}
