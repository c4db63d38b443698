use crate::identity::IdentityProvider;
use crate::session::SessionCoordinator;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The coordinator driving the (single) streaming session
    pub coordinator: Arc<SessionCoordinator>,

    /// Identity lookup used when a start request names no user
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    pub fn new(coordinator: Arc<SessionCoordinator>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            coordinator,
            identity,
        }
    }
}
