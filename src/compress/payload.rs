// Compressed payload storage: in memory, or spilled to an anonymous temp file
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use bytes::Bytes;
use crate::common::error::{Error, Result};

/// Output of one compression run. Consumed by exactly one transfer.
#[derive(Debug)]
pub struct CompressedPayload {
    body: PayloadBody,
    original_length: u64,
    compressed_length: u64,
}

#[derive(Debug)]
enum PayloadBody {
    Memory(Bytes),
    Spilled(File),
}

impl CompressedPayload {
    pub(crate) fn new(writer: PayloadWriter, original_length: u64) -> Self {
        let compressed_length = writer.len();
        let body = match writer {
            PayloadWriter::Memory(data) => PayloadBody::Memory(Bytes::from(data)),
            PayloadWriter::Spill { file, .. } => PayloadBody::Spilled(file),
        };
        Self {
            body,
            original_length,
            compressed_length,
        }
    }

    pub fn original_length(&self) -> u64 {
        self.original_length
    }

    pub fn compressed_length(&self) -> u64 {
        self.compressed_length
    }

    pub fn is_spilled(&self) -> bool {
        matches!(self.body, PayloadBody::Spilled(_))
    }

    /// Sequential reader over the compressed bytes, from the first byte.
    pub fn reader(&self) -> Result<Box<dyn Read + '_>> {
        match &self.body {
            PayloadBody::Memory(data) => Ok(Box::new(Cursor::new(data.as_ref()))),
            PayloadBody::Spilled(file) => {
                let mut file = file;
                file.seek(SeekFrom::Start(0))?;
                Ok(Box::new(file.take(self.compressed_length)))
            }
        }
    }

    /// Whole payload as one buffer.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.compressed_length as usize);
        self.reader()?.read_to_end(&mut out)?;
        Ok(out)
    }

    /// BLAKE3 digest of the compressed bytes, hex encoded. Only used for
    /// logging and reports; the wire format carries no checksum.
    pub fn fingerprint(&self) -> Result<String> {
        let mut hasher = blake3::Hasher::new();
        io::copy(&mut self.reader()?, &mut hasher)?;
        Ok(hex::encode(hasher.finalize().as_bytes()))
    }
}

/// Destination of the deflate encoder while compression runs.
pub(crate) enum PayloadWriter {
    Memory(Vec<u8>),
    Spill { file: File, len: u64 },
}

impl PayloadWriter {
    pub(crate) fn memory() -> Self {
        PayloadWriter::Memory(Vec::new())
    }

    pub(crate) fn spill() -> Result<Self> {
        let file = tempfile::tempfile().map_err(|e| {
            Error::CompressionError(format!("cannot create spill file: {}", e))
        })?;
        Ok(PayloadWriter::Spill { file, len: 0 })
    }

    pub(crate) fn len(&self) -> u64 {
        match self {
            PayloadWriter::Memory(data) => data.len() as u64,
            PayloadWriter::Spill { len, .. } => *len,
        }
    }
}

impl Write for PayloadWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            PayloadWriter::Memory(data) => data.write(buf),
            PayloadWriter::Spill { file, len } => {
                let written = file.write(buf)?;
                *len += written as u64;
                Ok(written)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            PayloadWriter::Memory(_) => Ok(()),
            PayloadWriter::Spill { file, .. } => file.flush(),
        }
    }
}
