//! Byte sources read by decoder plugins.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use reel_core::{Error, Result, Song, Tag};
use tracing::debug;

/// A blocking byte stream with optional seek support.
pub trait InputStream: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn seekable(&self) -> bool;

    /// Total size in bytes, when known.
    fn size(&self) -> Option<u64>;

    /// Current read position.
    fn offset(&self) -> u64;

    fn seek(&mut self, pos: u64) -> io::Result<()>;

    fn mime(&self) -> Option<&str> {
        None
    }

    /// Metadata carried by the stream itself (e.g. a radio station name).
    fn tag(&mut self) -> Option<Tag> {
        None
    }
}

/// A local file.
#[derive(Debug)]
pub struct FileInput {
    file: File,
    path: PathBuf,
    size: u64,
    offset: u64,
}

impl FileInput {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::Source(format!("Failed to open {}: {e}", path.display())))?;
        let size = file
            .metadata()
            .map_err(|e| Error::Source(format!("Failed to stat {}: {e}", path.display())))?
            .len();
        debug!("Opened {} ({size} bytes)", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
            size,
            offset: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl InputStream for FileInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }

    fn seekable(&self) -> bool {
        true
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.offset = self.file.seek(SeekFrom::Start(pos))?;
        Ok(())
    }
}

/// An in-memory stream.
#[derive(Debug, Clone, Default)]
pub struct MemoryInput {
    data: Bytes,
    position: usize,
    mime: Option<String>,
    tag: Option<Tag>,
}

impl MemoryInput {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// Attach stream metadata, handed out once by [`InputStream::tag`].
    #[must_use]
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = Some(tag);
        self
    }
}

impl InputStream for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.position.min(self.data.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.position += n;
        Ok(n)
    }

    fn seekable(&self) -> bool {
        true
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn offset(&self) -> u64 {
        self.position as u64
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        if pos > self.data.len() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek past end of stream",
            ));
        }
        self.position = pos as usize;
        Ok(())
    }

    fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    fn tag(&mut self) -> Option<Tag> {
        self.tag.take()
    }
}

/// Open the byte stream behind `song`. Only local files are supported.
pub fn open_input(song: &Song) -> Result<Box<dyn InputStream>> {
    let path = song
        .local_path()
        .ok_or_else(|| Error::Source(format!("No input plugin for {song}")))?;
    Ok(Box::new(FileInput::open(&path)?))
}
