use std::sync::Arc;

use axum::extract::FromRef;

use crate::auth::Authenticator;
use crate::clock::Clock;
use crate::lifecycle::LifecycleManager;
use crate::mailer::Mailer;
use crate::store::JsonStore;

// Shared by every handler; cheap to clone
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JsonStore>,
    pub lifecycle: Arc<LifecycleManager>,
    pub auth: Arc<Authenticator>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        store: Arc<JsonStore>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
        auth: Arc<Authenticator>,
    ) -> Self {
        let lifecycle = Arc::new(LifecycleManager::new(
            store.clone(),
            store.clone(),
            mailer,
            clock.clone(),
        ));
        Self {
            store,
            lifecycle,
            auth,
            clock,
        }
    }
}

impl FromRef<AppState> for Arc<Authenticator> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}
