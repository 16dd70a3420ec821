// File and in-memory sources
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use bytes::Bytes;
use crate::common::error::{Error, Result};
use super::{SourceHandle, SourceStream};

/// A file on the local filesystem
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last path component, which is what the loader receives as the name.
    pub fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }
}

impl SourceHandle for FileSource {
    fn open(&self) -> Result<Box<dyn SourceStream>> {
        let file = File::open(&self.path).map_err(|e| {
            Error::SourceUnavailable(format!("cannot open {}: {}", self.path.display(), e))
        })?;
        let metadata = file.metadata().map_err(|e| {
            Error::SourceUnavailable(format!("cannot stat {}: {}", self.path.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(Error::SourceUnavailable(format!(
                "{} is not a regular file",
                self.path.display()
            )));
        }

        Ok(Box::new(FileStream {
            file,
            size: metadata.len(),
        }))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

struct FileStream {
    file: File,
    size: u64,
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl SourceStream for FileStream {
    fn size(&self) -> u64 {
        self.size
    }
}

/// A buffer already held in memory
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl SourceHandle for MemorySource {
    fn open(&self) -> Result<Box<dyn SourceStream>> {
        Ok(Box::new(MemoryStream {
            size: self.data.len() as u64,
            cursor: Cursor::new(self.data.clone()),
        }))
    }

    fn describe(&self) -> String {
        format!("<memory: {} bytes>", self.data.len())
    }
}

struct MemoryStream {
    cursor: Cursor<Bytes>,
    size: u64,
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl SourceStream for MemoryStream {
    fn size(&self) -> u64 {
        self.size
    }
}
