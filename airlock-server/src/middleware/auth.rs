//! Principal extraction for handlers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use airlock_core::Principal;

use crate::infra::app_state::AppState;
use crate::infra::errors::AppError;

/// Extractor wrapper: `AuthPrincipal(principal)` in a handler signature
/// resolves the caller through the configured [`IdentityResolver`] and
/// rejects unauthenticated requests before the handler body runs.
///
/// [`IdentityResolver`]: crate::infra::identity::IdentityResolver
#[derive(Debug, Clone)]
pub struct AuthPrincipal(pub Principal);

impl FromRequestParts<AppState> for AuthPrincipal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        state.identity.resolve(&parts.headers).map(AuthPrincipal)
    }
}
