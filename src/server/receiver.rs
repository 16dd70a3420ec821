// Single-shot HAXX listener: accepts one push, inflates it and stores the file

use std::fs;
use std::io::Read;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use flate2::read::{DeflateDecoder, ZlibDecoder};
use log::{debug, info};
use crate::common::config::ServerConfig;
use crate::common::error::{Error, Result};
use crate::common::types::{DeflateFormat, HEADER_LEN};
use crate::protocol::{Magic, ProtocolHeader};

/// One transfer as it arrived on the wire, payload already inflated.
#[derive(Debug, Clone)]
pub struct DecodedTransfer {
    pub header: ProtocolHeader,
    pub file_name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub file_name: String,
    pub path: PathBuf,
    pub peer: SocketAddr,
    pub original_length: u64,
    pub compressed_length: u64,
}

/// Read one complete transfer from `reader`.
pub fn decode_transfer<R: Read>(reader: &mut R, magic: Magic, format: DeflateFormat) -> Result<DecodedTransfer> {
    let mut header_bytes = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header_bytes)
        .map_err(|e| Error::Protocol(format!("short header: {}", e)))?;
    let header = ProtocolHeader::parse(&header_bytes)?;
    if header.magic != magic {
        return Err(Error::Protocol(format!(
            "unexpected magic {:?}, expected {:?}",
            header.magic.to_string(),
            magic.to_string()
        )));
    }
    debug!("Receiver: {:?}", header);

    let compressed = read_field(reader, header.compressed_length as u64, "payload")?;
    let args = read_field(reader, header.args_length as u64, "file name")?;

    let (name, terminator) = args.split_at(args.len() - 1);
    if terminator != [0] {
        return Err(Error::Protocol("file name is not NUL terminated".into()));
    }
    let file_name = String::from_utf8(name.to_vec())
        .map_err(|_| Error::Protocol("file name is not valid UTF-8".into()))?;

    let data = inflate(&compressed, format, header.original_length as u64)?;
    Ok(DecodedTransfer {
        header,
        file_name,
        data,
    })
}

fn read_field<R: Read>(reader: &mut R, len: u64, what: &str) -> Result<Vec<u8>> {
    let mut field = Vec::new();
    reader.take(len).read_to_end(&mut field)?;
    if field.len() as u64 != len {
        return Err(Error::Protocol(format!(
            "{} truncated: got {} of {} bytes",
            what,
            field.len(),
            len
        )));
    }
    Ok(field)
}

fn inflate(compressed: &[u8], format: DeflateFormat, expected: u64) -> Result<Vec<u8>> {
    // One byte past the declared size is enough to detect an overrun.
    let limit = expected + 1;
    let mut data = Vec::new();
    let result = match format {
        DeflateFormat::Zlib => ZlibDecoder::new(compressed).take(limit).read_to_end(&mut data),
        DeflateFormat::Raw => DeflateDecoder::new(compressed).take(limit).read_to_end(&mut data),
    };
    result.map_err(|e| Error::Protocol(format!("payload does not inflate: {}", e)))?;

    if data.len() as u64 != expected {
        return Err(Error::Protocol(format!(
            "payload inflated to {} bytes, header says {}",
            data.len(),
            expected
        )));
    }
    Ok(data)
}

/// Strip any directory part a sender put in the name.
fn safe_file_name(name: &str) -> Result<&str> {
    let base = name.rsplit(&['/', '\\'][..]).next().unwrap_or("");
    if base.is_empty() || base == "." || base == ".." {
        return Err(Error::Protocol(format!("unusable file name {:?}", name)));
    }
    Ok(base)
}

pub struct FileReceiver {
    listener: TcpListener,
    config: ServerConfig,
}

impl FileReceiver {
    pub fn bind(config: ServerConfig) -> Result<Self> {
        fs::create_dir_all(&config.output_dir)?;
        let listener = TcpListener::bind(config.bind_addr)?;
        info!(
            "Receiver: listening on {} (magic {})",
            listener.local_addr()?,
            config.magic
        );
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one connection and store the file it carries.
    pub fn accept_one(&self) -> Result<ReceivedFile> {
        let (mut stream, peer) = self.listener.accept()?;
        stream.set_read_timeout(self.config.read_timeout)?;
        info!("Receiver: connection from {}", peer);

        let transfer = decode_transfer(&mut stream, self.config.magic, self.config.format)?;
        let name = safe_file_name(&transfer.file_name)?;
        let path = self.config.output_dir.join(name);
        fs::write(&path, &transfer.data)?;

        info!(
            "Receiver: stored {} ({} bytes, {} compressed) at {}",
            name,
            transfer.data.len(),
            transfer.header.compressed_length,
            path.display()
        );
        Ok(ReceivedFile {
            file_name: transfer.file_name,
            path,
            peer,
            original_length: transfer.header.original_length as u64,
            compressed_length: transfer.header.compressed_length as u64,
        })
    }
}
