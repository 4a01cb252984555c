//! HTTP/REST API layer for Colloquy.
//!
//! Axum-based REST API at `/api/v1/` with caller identity from the
//! `X-Owner-Id` header, envelope response format, SSE response streams and
//! CORS support.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;
