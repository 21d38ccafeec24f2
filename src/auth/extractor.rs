use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::state::SharedState;

/// Caller allowed to use the operator API.
///
/// When `VIDQUEUE_API_TOKEN` is unset every caller is an operator.
#[derive(Debug, Clone, Copy)]
pub struct Operator;

impl FromRequestParts<SharedState> for Operator {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.api_token.as_deref() else {
            return Ok(Operator);
        };

        let auth_str = parts
            .headers
            .get("authorization")
            .ok_or_else(|| AppError::Unauthorized("Missing authorization header".to_string()))?
            .to_str()
            .map_err(|_| AppError::Unauthorized("Invalid authorization header".to_string()))?;

        let token = auth_str
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("Expected a bearer token".to_string()))?;

        if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) {
            Ok(Operator)
        } else {
            Err(AppError::Unauthorized("Invalid token".to_string()))
        }
    }
}
