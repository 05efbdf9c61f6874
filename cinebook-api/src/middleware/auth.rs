use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OwnerClaims {
    /// Owner id of every hold and booking made with this token.
    pub sub: String,
    pub exp: usize,
}

/// The verified caller, available to handlers as an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub Uuid);

// ============================================================================
// Bearer Authentication Middleware
// ============================================================================

pub async fn require_owner(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::AuthenticationError("Missing bearer token".to_string()))?;

    let token_data = decode::<OwnerClaims>(
        token,
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::AuthenticationError(format!("Invalid token: {}", e)))?;

    let owner_id = Uuid::parse_str(&token_data.claims.sub)
        .map_err(|_| AppError::AuthenticationError("Token subject is not a user id".to_string()))?;

    req.extensions_mut().insert(AuthenticatedUser(owner_id));

    Ok(next.run(req).await)
}
