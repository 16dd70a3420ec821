// HAXX loader header: fixed 16-byte, big-endian record preceding the payload
//
//   0  magic              4 bytes ASCII
//   4  max version        1 byte
//   5  min version        1 byte
//   6  args length        u16  (file name bytes + NUL)
//   8  compressed length  u32
//  12  original length    u32

use std::fmt;
use std::str::FromStr;
use bytes::{Buf, BufMut};
use serde::Deserialize;
use crate::common::error::{Error, Result};
use crate::common::types::{HEADER_LEN, PROTOCOL_MAX_VERSION, PROTOCOL_MIN_VERSION};

/// Four ASCII bytes identifying the loader protocol.
///
/// Two values are known in deployed loaders, so the magic is configuration
/// rather than a literal baked into the framer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct Magic([u8; 4]);

impl Magic {
    pub const HAXX: Magic = Magic(*b"HAXX");
    pub const LEGACY: Magic = Magic(*b"1027");

    pub fn new(bytes: [u8; 4]) -> Result<Self> {
        if !bytes.iter().all(|b| b.is_ascii_graphic()) {
            return Err(Error::ConfigError(format!(
                "Magic must be 4 printable ASCII bytes, got {:?}",
                bytes
            )));
        }
        Ok(Magic(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl Default for Magic {
    fn default() -> Self {
        Magic::HAXX
    }
}

impl fmt::Display for Magic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Constructors only admit ASCII.
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl FromStr for Magic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes: [u8; 4] = s.as_bytes().try_into().map_err(|_| {
            Error::ConfigError(format!("Magic must be exactly 4 bytes, got {:?}", s))
        })?;
        Magic::new(bytes)
    }
}

impl TryFrom<String> for Magic {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolHeader {
    pub magic: Magic,
    pub max_version: u8,
    pub min_version: u8,
    pub args_length: u16,
    pub compressed_length: u32,
    pub original_length: u32,
}

impl ProtocolHeader {
    /// Derive the header for a payload of the given lengths.
    ///
    /// The file name travels after the payload with a trailing NUL, which is
    /// why `args_length` is one more than its byte length.
    pub fn new(
        magic: Magic,
        file_name: &str,
        original_length: u64,
        compressed_length: u64,
    ) -> Result<Self> {
        let args_length = args_length(file_name)?;
        let original_length = u32::try_from(original_length).map_err(|_| Error::PayloadTooLarge {
            field: "original length",
            length: original_length,
        })?;
        let compressed_length =
            u32::try_from(compressed_length).map_err(|_| Error::PayloadTooLarge {
                field: "compressed length",
                length: compressed_length,
            })?;

        Ok(Self {
            magic,
            max_version: PROTOCOL_MAX_VERSION,
            min_version: PROTOCOL_MIN_VERSION,
            args_length,
            compressed_length,
            original_length,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let mut buf = &mut out[..];
        buf.put_slice(self.magic.as_bytes());
        buf.put_u8(self.max_version);
        buf.put_u8(self.min_version);
        buf.put_u16(self.args_length);
        buf.put_u32(self.compressed_length);
        buf.put_u32(self.original_length);
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::Protocol(format!(
                "Header needs {} bytes, got {}",
                HEADER_LEN,
                data.len()
            )));
        }

        let mut buf = &data[..HEADER_LEN];
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        let magic = Magic::new(magic)
            .map_err(|_| Error::Protocol(format!("Bad magic bytes {:02x?}", magic)))?;

        let header = Self {
            magic,
            max_version: buf.get_u8(),
            min_version: buf.get_u8(),
            args_length: buf.get_u16(),
            compressed_length: buf.get_u32(),
            original_length: buf.get_u32(),
        };

        if header.max_version != PROTOCOL_MAX_VERSION || header.min_version != PROTOCOL_MIN_VERSION {
            return Err(Error::Protocol(format!(
                "Unsupported protocol version {}.{}, expected {}.{}",
                header.max_version, header.min_version, PROTOCOL_MAX_VERSION, PROTOCOL_MIN_VERSION
            )));
        }
        if header.args_length == 0 {
            return Err(Error::Protocol("Args length must include the NUL terminator".into()));
        }
        Ok(header)
    }
}

/// Build the 16 header bytes for one transfer.
pub fn build_header(
    magic: Magic,
    file_name: &str,
    original_length: u64,
    compressed_length: u64,
) -> Result<[u8; HEADER_LEN]> {
    ProtocolHeader::new(magic, file_name, original_length, compressed_length)
        .map(|header| header.to_bytes())
}

/// The trailing field: file name bytes plus one NUL.
pub fn filename_field(file_name: &str) -> Result<Vec<u8>> {
    let len = args_length(file_name)? as usize;
    let mut field = Vec::with_capacity(len);
    field.put_slice(file_name.as_bytes());
    field.put_u8(0);
    Ok(field)
}

fn args_length(file_name: &str) -> Result<u16> {
    if file_name.is_empty() {
        return Err(Error::EmptyFileName);
    }
    if file_name.as_bytes().contains(&0) {
        return Err(Error::InvalidFileName(format!("{:?} contains a NUL byte", file_name)));
    }
    u16::try_from(file_name.len() + 1).map_err(|_| Error::FileNameTooLong(file_name.len()))
}
