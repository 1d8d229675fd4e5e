//! HTTP and WebSocket request handlers
//!
//! - `api` - Liveness and upstream health endpoints
//! - `ws` - WebSocket real-time transcription relay

pub mod api;
pub mod ws;

// Re-export commonly used handlers for convenient access
pub use ws::voice_transcribe_handler;
