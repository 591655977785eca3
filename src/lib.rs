//! pcm-deck Library
//!
//! Decodes audio files into 16-bit PCM and plays them through a realtime output stream.

pub mod audio;
pub mod decode;
pub mod engine;
