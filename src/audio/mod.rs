//! Audio handling for relayed sessions
//!
//! Audio is never decoded beyond sample conversion: frames are batched on
//! the way to the client and passed through untouched on the way in.

pub mod pcm;
mod relay_buffer;

pub use pcm::{f32le_to_pcm16, pcm16_duration_ms, pcm16_to_f32le};
pub use relay_buffer::RelayBuffer;

/// Minimum outbound frame size in bytes of PCM16 mono.
pub const DEFAULT_MIN_FLUSH_BYTES: usize = 9600;

/// Sample rate of audio produced by the backend.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Sample rate the backend expects from clients.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
