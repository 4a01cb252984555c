//! Span names and attribute keys shared by the HTTP and CLI surfaces.
//!
//! Span naming convention: `"colloquy.{operation}"`. Attribute keys are
//! dotted so they map one-to-one onto OpenTelemetry attributes.

/// Service name reported to OpenTelemetry.
pub const SERVICE_NAME: &str = "colloquy";

// --- Span names ---

pub const SPAN_SEND_MESSAGE: &str = "colloquy.send_message";
pub const SPAN_RETRY: &str = "colloquy.retry";
pub const SPAN_EDIT_AND_RESEND: &str = "colloquy.edit_and_resend";
pub const SPAN_SSE_RELAY: &str = "colloquy.sse_relay";

// --- Attribute keys ---

/// Chat session identifier.
pub const SESSION_ID: &str = "colloquy.session.id";

/// Message the stream writes into.
pub const MESSAGE_ID: &str = "colloquy.message.id";

/// Opaque owner identifier taken from the request.
pub const OWNER_ID: &str = "colloquy.owner.id";

/// Model requested for the generation.
pub const REQUEST_MODEL: &str = "gen_ai.request.model";

/// How the stream ended ("completed", "failed", "cancelled").
pub const STREAM_OUTCOME: &str = "colloquy.stream.outcome";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_names_share_prefix() {
        for name in [SPAN_SEND_MESSAGE, SPAN_RETRY, SPAN_EDIT_AND_RESEND, SPAN_SSE_RELAY] {
            assert!(name.starts_with("colloquy."), "{name}");
        }
    }
}
