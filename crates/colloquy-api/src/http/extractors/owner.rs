//! Caller identity extractor.
//!
//! The owner is an opaque id supplied by an upstream identity provider in
//! the `X-Owner-Id` header and trusted as-is.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::http::error::AppError;

pub const OWNER_HEADER: &str = "x-owner-id";

/// Owner id of the calling user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(OWNER_HEADER)
            .ok_or_else(|| AppError::Unauthorized("Missing X-Owner-Id header".to_string()))?;
        let owner = value
            .to_str()
            .map_err(|_| AppError::Unauthorized("Invalid X-Owner-Id header encoding".to_string()))?
            .trim();
        if owner.is_empty() {
            return Err(AppError::Unauthorized("Empty X-Owner-Id header".to_string()));
        }
        Ok(Owner(owner.to_string()))
    }
}
