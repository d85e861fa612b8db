//! Input units for detection and extraction.
//!
//! A [`FileHandle`] wraps whatever the caller has: a path on disk, bytes in
//! memory, or a one-shot reader. Detection peeks at it repeatedly, so every
//! read is repeatable: paths are re-opened, and a reader is drained exactly
//! once into a cached buffer.

use std::borrow::Cow;
use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::sniff;

/// A file to classify and possibly extract.
pub struct FileHandle {
    path: Option<PathBuf>,
    name: Option<String>,
    contents: OnceCell<Vec<u8>>,
    stream: RefCell<Option<Box<dyn Read + Send>>>,
    magic: OnceCell<Option<String>>,
}

impl FileHandle {
    fn empty() -> Self {
        Self {
            path: None,
            name: None,
            contents: OnceCell::new(),
            stream: RefCell::new(None),
            magic: OnceCell::new(),
        }
    }

    /// A file that already exists on disk. The declared name defaults to the
    /// path's final component. The path is never deleted by this crate.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        Self {
            path: Some(path),
            name,
            ..Self::empty()
        }
    }

    /// In-memory content.
    pub fn from_bytes<B: Into<Vec<u8>>>(bytes: B) -> Self {
        let handle = Self::empty();
        let _ = handle.contents.set(bytes.into());
        handle
    }

    /// A one-shot stream. It is drained into memory the first time content
    /// is needed.
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self {
            stream: RefCell::new(Some(Box::new(reader))),
            ..Self::empty()
        }
    }

    /// Set the declared filename used for extension matching.
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Supply a pre-computed magic description. Skips built-in sniffing.
    pub fn with_magic<S: Into<String>>(self, magic: S) -> Self {
        let _ = self.magic.set(Some(magic.into()));
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Full content, read once and cached.
    pub fn contents(&self) -> Result<&[u8], Error> {
        if let Some(data) = self.contents.get() {
            return Ok(data);
        }

        let data = if let Some(mut stream) = self.stream.borrow_mut().take() {
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf)?;
            buf
        } else if let Some(path) = &self.path {
            fs::read(path)?
        } else {
            return Err(Error::EmptyHandle);
        };

        Ok(self.contents.get_or_init(|| data))
    }

    /// Up to `len` leading bytes. Does not consume anything: on-disk files
    /// are re-opened and streams are buffered in full.
    pub fn head(&self, len: usize) -> Result<Cow<'_, [u8]>, Error> {
        if self.contents.get().is_none() {
            if let (Some(path), None) = (&self.path, self.stream.borrow().as_ref()) {
                let mut buf = Vec::with_capacity(len.min(64 * 1024));
                fs::File::open(path)?
                    .take(len as u64)
                    .read_to_end(&mut buf)?;
                return Ok(Cow::Owned(buf));
            }
        }

        let data = self.contents()?;
        Ok(Cow::Borrowed(&data[..data.len().min(len)]))
    }

    /// Up to `len` trailing bytes.
    pub fn tail(&self, len: usize) -> Result<Cow<'_, [u8]>, Error> {
        if self.contents.get().is_none() {
            if let (Some(path), None) = (&self.path, self.stream.borrow().as_ref()) {
                let mut file = fs::File::open(path)?;
                let size = file.metadata()?.len();
                let start = size.saturating_sub(len as u64);
                file.seek(SeekFrom::Start(start))?;
                let mut buf = Vec::with_capacity((size - start) as usize);
                file.read_to_end(&mut buf)?;
                return Ok(Cow::Owned(buf));
            }
        }

        let data = self.contents()?;
        Ok(Cow::Borrowed(&data[data.len().saturating_sub(len)..]))
    }

    /// Descriptive magic string, caller-supplied or sniffed once.
    pub fn magic(&self) -> Result<Option<&str>, Error> {
        if let Some(magic) = self.magic.get() {
            return Ok(magic.as_deref());
        }
        let sniffed = sniff::describe(self)?;
        Ok(self.magic.get_or_init(|| sniffed).as_deref())
    }

    /// Whether the content is already held in memory.
    pub fn is_buffered(&self) -> bool {
        self.contents.get().is_some()
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("buffered", &self.contents.get().map(Vec::len))
            .field("magic", &self.magic.get())
            .finish()
    }
}
