// Streaming deflate over a whole source
use std::io::{self, ErrorKind, Read, Write};
use flate2::write::{DeflateEncoder, ZlibEncoder};
use flate2::Compression;
use log::debug;
use crate::common::config::ClientConfig;
use crate::common::error::{Error, Result};
use crate::common::types::*;
use crate::source::SourceStream;
use super::payload::{CompressedPayload, PayloadWriter};

/// Deflate compressor producing a fully materialized payload.
///
/// The header carries the compressed length ahead of the payload, so the
/// whole source is compressed before anything touches the network.
#[derive(Debug, Clone)]
pub struct Compressor {
    level: u32,
    format: DeflateFormat,
    spill_threshold: u64,
}

impl Compressor {
    /// `level` follows zlib: 0 stores, 9 compresses hardest.
    pub fn new(level: u32, format: DeflateFormat) -> Result<Self> {
        if level > 9 {
            return Err(Error::ConfigError(format!(
                "Compression level must be between 0 and 9, got {}",
                level
            )));
        }
        Ok(Self {
            level,
            format,
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self::new(config.compression_level, config.format)?
            .with_spill_threshold(config.spill_threshold))
    }

    /// Sources strictly larger than `threshold` bytes compress into a temp file.
    pub fn with_spill_threshold(mut self, threshold: u64) -> Self {
        self.spill_threshold = threshold;
        self
    }

    pub fn format(&self) -> DeflateFormat {
        self.format
    }

    /// Compress `source` to completion.
    ///
    /// `on_progress` receives the share of source bytes consumed, in percent.
    /// Values never decrease and the last one is always 100. The source is
    /// dropped (and its handle closed) before this returns, on every path.
    pub fn compress<F>(&self, mut source: Box<dyn SourceStream>, mut on_progress: F) -> Result<CompressedPayload>
    where
        F: FnMut(u8),
    {
        let size = source.size();
        if size > u32::MAX as u64 {
            return Err(Error::PayloadTooLarge {
                field: "original length",
                length: size,
            });
        }

        let writer = if size > self.spill_threshold {
            debug!("Compressor: spilling payload of {} byte source to disk", size);
            PayloadWriter::spill()?
        } else {
            PayloadWriter::memory()
        };
        let mut encoder = Encoder::new(writer, self.format, Compression::new(self.level));

        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let mut bytes_read: u64 = 0;
        let mut last_percent: Option<u8> = None;

        loop {
            let n = match source.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(Error::CompressionError(format!(
                        "source read failed after {} of {} bytes: {}",
                        bytes_read, size, e
                    )))
                }
            };

            bytes_read += n as u64;
            if bytes_read > size {
                return Err(Error::SourceUnavailable(format!(
                    "source grew while reading: expected {} bytes",
                    size
                )));
            }

            encoder
                .write_all(&buffer[..n])
                .map_err(|e| Error::CompressionError(format!("deflate failed: {}", e)))?;

            let percent = percent_of(bytes_read, size);
            if last_percent != Some(percent) {
                on_progress(percent);
                last_percent = Some(percent);
            }
        }
        drop(source);

        if bytes_read != size {
            return Err(Error::SourceUnavailable(format!(
                "source ended after {} of {} bytes",
                bytes_read, size
            )));
        }

        let writer = encoder
            .finish()
            .map_err(|e| Error::CompressionError(format!("deflate flush failed: {}", e)))?;

        if writer.len() > u32::MAX as u64 {
            return Err(Error::PayloadTooLarge {
                field: "compressed length",
                length: writer.len(),
            });
        }
        if last_percent != Some(100) {
            on_progress(100);
        }

        debug!(
            "Compressor: {} -> {} bytes ({:?}, level {})",
            bytes_read,
            writer.len(),
            self.format,
            self.level
        );
        Ok(CompressedPayload::new(writer, bytes_read))
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self {
            level: DEFAULT_COMPRESSION_LEVEL,
            format: DeflateFormat::Zlib,
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
        }
    }
}

fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

enum Encoder<W: Write> {
    Zlib(ZlibEncoder<W>),
    Raw(DeflateEncoder<W>),
}

impl<W: Write> Encoder<W> {
    fn new(writer: W, format: DeflateFormat, level: Compression) -> Self {
        match format {
            DeflateFormat::Zlib => Encoder::Zlib(ZlibEncoder::new(writer, level)),
            DeflateFormat::Raw => Encoder::Raw(DeflateEncoder::new(writer, level)),
        }
    }

    fn finish(self) -> io::Result<W> {
        match self {
            Encoder::Zlib(encoder) => encoder.finish(),
            Encoder::Raw(encoder) => encoder.finish(),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Zlib(encoder) => encoder.write(buf),
            Encoder::Raw(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Zlib(encoder) => encoder.flush(),
            Encoder::Raw(encoder) => encoder.flush(),
        }
    }
}
