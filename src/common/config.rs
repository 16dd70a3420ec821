// Configuration types and parsing

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use crate::common::error::{Error, Result};
use crate::common::types::*;
use crate::protocol::Magic;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub port: u16,
    pub magic: Magic,
    pub chunk_size: usize,
    pub compression_level: u32,
    pub format: DeflateFormat,
    pub connect_timeout: Duration,
    pub write_timeout: Option<Duration>,
    pub spill_threshold: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            magic: Magic::HAXX,
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            format: DeflateFormat::Zlib,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
        }
    }
}

impl ClientConfig {
    pub fn new(port: u16, magic: Magic) -> Self {
        Self {
            port,
            magic,
            ..Default::default()
        }
    }

    /// Load a JSON config file; keys that are absent keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: ClientConfigFile = serde_json::from_str(json)?;
        file.apply(Self::default())
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_magic(mut self, magic: Magic) -> Self {
        self.magic = magic;
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Result<Self> {
        if size < MIN_CHUNK_SIZE || size > MAX_CHUNK_SIZE {
            return Err(Error::ConfigError(format!(
                "Chunk size must be between {} and {}",
                MIN_CHUNK_SIZE,
                MAX_CHUNK_SIZE
            )));
        }
        self.chunk_size = size;
        Ok(self)
    }

    pub fn with_compression_level(mut self, level: u32) -> Result<Self> {
        if level > 9 {
            return Err(Error::ConfigError(format!(
                "Compression level must be between 0 and 9, got {}",
                level
            )));
        }
        self.compression_level = level;
        Ok(self)
    }

    pub fn with_format(mut self, format: DeflateFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(Error::ConfigError("Connect timeout must be non-zero".to_string()));
        }
        self.connect_timeout = timeout;
        Ok(self)
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn with_spill_threshold(mut self, threshold: u64) -> Self {
        self.spill_threshold = threshold;
        self
    }
}

/// On-disk shape of [`ClientConfig`]. Timeouts are whole seconds; a write
/// timeout of 0 disables it.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ClientConfigFile {
    port: Option<u16>,
    magic: Option<Magic>,
    chunk_size: Option<usize>,
    compression_level: Option<u32>,
    format: Option<DeflateFormat>,
    connect_timeout_secs: Option<u64>,
    write_timeout_secs: Option<u64>,
    spill_threshold: Option<u64>,
}

impl ClientConfigFile {
    fn apply(self, mut config: ClientConfig) -> Result<ClientConfig> {
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(magic) = self.magic {
            config = config.with_magic(magic);
        }
        if let Some(size) = self.chunk_size {
            config = config.with_chunk_size(size)?;
        }
        if let Some(level) = self.compression_level {
            config = config.with_compression_level(level)?;
        }
        if let Some(format) = self.format {
            config = config.with_format(format);
        }
        if let Some(secs) = self.connect_timeout_secs {
            config = config.with_connect_timeout(Duration::from_secs(secs))?;
        }
        if let Some(secs) = self.write_timeout_secs {
            config = config.with_write_timeout(Some(Duration::from_secs(secs)));
        }
        if let Some(threshold) = self.spill_threshold {
            config = config.with_spill_threshold(threshold);
        }
        Ok(config)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub magic: Magic,
    pub format: DeflateFormat,
    pub output_dir: PathBuf,
    pub read_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            magic: Magic::HAXX,
            format: DeflateFormat::Zlib,
            output_dir: PathBuf::from("./received"),
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr, output_dir: PathBuf) -> Self {
        Self {
            bind_addr,
            output_dir,
            ..Default::default()
        }
    }

    pub fn with_magic(mut self, magic: Magic) -> Self {
        self.magic = magic;
        self
    }

    pub fn with_format(mut self, format: DeflateFormat) -> Self {
        self.format = format;
        self
    }
}
