//! # WebSocket Transcription Handler Module
//!
//! This module exposes the real-time transcription relay at `/voice/transcribe`.
//!
//! ## WebSocket API
//!
//! ### Connection Flow
//! 1. Client connects to `/voice/transcribe?token=<jwt>`
//! 2. The token is validated and the per-user rate limit applied before the
//!    session exists; a rejected client receives a close frame only
//!    (`4001` unauthenticated, `4008` rate limited)
//! 3. Client sends one control message selecting the language
//! 4. Client streams binary audio frames; the server streams back transcripts
//! 5. Either side closes; the server always finishes with a close frame
//!
//! ### Message Types
//!
//! **Incoming Messages:**
//! - `{"language": "en-US"}` - Language hint; `{}` selects auto-detection
//! - **Binary messages** - Raw audio chunks, forwarded verbatim
//!
//! **Outgoing Messages:**
//! - `{"type": "partial", "text": "...", "language": "en"}` - Transcript that may still change
//! - `{"type": "final", "text": "...", "language": "en"}` - Transcript that will not change
//! - `{"type": "error", "code": "...", "message": "..."}` - Error occurred
//!
//! ### Close Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 1000 | Normal close |
//! | 1001 | Server shutting down |
//! | 1002 | Too many malformed messages |
//! | 1011 | Transcription service unavailable or failed |
//! | 4001 | Unauthenticated |
//! | 4008 | Rate limited |
//! | 4009 | Inactivity timeout |
//! | 4010 | Client too slow to read transcripts |
//!
//! ## JavaScript Client Example
//!
//! ```javascript
//! const ws = new WebSocket(`wss://relay.example.com/voice/transcribe?token=${jwt}`);
//! ws.binaryType = 'arraybuffer';
//!
//! ws.onopen = () => {
//!   ws.send(JSON.stringify({ language: 'en-US' }));
//!   recorder.ondata = (pcm) => ws.send(pcm);
//! };
//!
//! ws.onmessage = (event) => {
//!   const message = JSON.parse(event.data);
//!   switch (message.type) {
//!     case 'partial':
//!       showDraft(message.text);
//!       break;
//!     case 'final':
//!       commit(message.text);
//!       break;
//!     case 'error':
//!       console.error(message.code, message.message);
//!       break;
//!   }
//! };
//!
//! ws.onclose = (event) => {
//!   if (event.code === 4001) relogin();
//!   if (event.code === 4008) showBusy();
//! };
//! ```

pub mod frames;
pub mod handler;


pub use frames::{client_frame, outbound_message};
pub use handler::{TranscribeParams, voice_transcribe_handler};
