// Payload compression

mod deflate;
mod payload;

pub use deflate::Compressor;
pub use payload::CompressedPayload;

#[cfg(test)]
pub(crate) use payload::PayloadWriter;
