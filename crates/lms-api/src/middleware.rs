use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;

use lms_types::RequestContext;
use lms_types::api::Claims;

use crate::auth::AppState;
use crate::error::ApiError;

/// Validate the bearer JWT and attach the caller's `RequestContext` to the
/// request.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) =
        bearer.ok_or(ApiError::Unauthorized("Authentication required"))?;

    let token_data = decode::<Claims>(
        bearer.token(),
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        debug!("Rejected token: {}", e);
        ApiError::Unauthorized("Invalid or expired session")
    })?;

    let claims = token_data.claims;
    req.extensions_mut()
        .insert(RequestContext::new(claims.sub, claims.library_id, claims.role));
    Ok(next.run(req).await)
}
