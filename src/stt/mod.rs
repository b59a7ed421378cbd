//! # Speech-To-Text Module
//!
//! Manages the upstream streaming transcription session. One
//! [`DeepgramClient`](deepgram::DeepgramClient) exists per relay session and
//! owns the WebSocket connection to the Deepgram streaming API: audio frames
//! go up, transcript events come back asynchronously through a registered
//! callback.
//!
//! ## Session Lifecycle:
//! 1. **Created**: client constructed with language and sample rate
//! 2. **Connecting**: `connect()` dials the upstream endpoint
//! 3. **Streaming**: a background reader decodes transcript events while
//!    `send()` forwards audio
//! 4. **Closed**: `close()` (idempotent) ends the stream and stops the reader

pub mod deepgram;

pub use deepgram::{DeepgramClient, ResultCallback, SttError};
