// Read access to the file being pushed

mod file;

pub use file::{FileSource, MemorySource};

use std::io::Read;
use crate::common::error::Result;

/// An opened source: a sequential reader whose total length is known before
/// the first read. Dropping it releases the underlying resource.
pub trait SourceStream: Read + Send {
    fn size(&self) -> u64;
}

/// Something that can be opened into a [`SourceStream`].
pub trait SourceHandle: Send {
    /// Open a fresh reader positioned at offset 0.
    fn open(&self) -> Result<Box<dyn SourceStream>>;

    /// Human readable origin, for log lines.
    fn describe(&self) -> String;
}
