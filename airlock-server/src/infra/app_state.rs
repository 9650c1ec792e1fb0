use std::sync::Arc;

use airlock_core::RequestController;

use crate::infra::config::Config;
use crate::infra::identity::IdentityResolver;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<RequestController>,
    pub identity: Arc<IdentityResolver>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        controller: Arc<RequestController>,
        identity: Arc<IdentityResolver>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            controller,
            identity,
            config,
        }
    }
}
