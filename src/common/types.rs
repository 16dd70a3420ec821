// Common type definitions and constants

use std::fmt;
use std::time::Duration;
use serde::Deserialize;

/// Phase reported to progress observers, in the order they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Compressing,
    Sending,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Compressing => write!(f, "Compressing"),
            Phase::Sending => write!(f, "Sending"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Compressing,
    Connecting,
    SendingHeader,
    SendingPayload,
    SendingFileName,
    Complete,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Failed)
    }
}

/// Framing of the deflate stream carried as payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeflateFormat {
    /// RFC 1950 stream (2-byte header, Adler-32 trailer).
    Zlib,
    /// Bare RFC 1951 blocks.
    Raw,
}

impl Default for DeflateFormat {
    fn default() -> Self {
        DeflateFormat::Zlib
    }
}

// Constants
pub const DEFAULT_PORT: u16 = 4299;
pub const HEADER_LEN: usize = 16;
pub const PROTOCOL_MAX_VERSION: u8 = 0;
pub const PROTOCOL_MIN_VERSION: u8 = 5;
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024; // 8KB
pub const MIN_CHUNK_SIZE: usize = 1024; // 1KB
pub const MAX_CHUNK_SIZE: usize = 128 * 1024; // 128KB
pub const READ_BUFFER_SIZE: usize = 8 * 1024;
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);
/// Sources larger than this compress into a temporary file instead of memory.
pub const DEFAULT_SPILL_THRESHOLD: u64 = 256 * 1024 * 1024; // 256MB
