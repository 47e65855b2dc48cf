//! Readable sources a video can be acquired from.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::AcquireError;
use crate::AcquireResult;

/// Something that can be opened for a sequential read.
///
/// `open` is called once per copy attempt, so sources that can be reopened
/// get a fresh reader on every retry.
pub trait SourceProvider: Send + Sync {
    /// Open the source for reading from the start.
    fn open(&self) -> AcquireResult<Box<dyn Read + Send>>;

    /// Human readable description for logs and status messages.
    fn describe(&self) -> String;
}

/// A file on the local filesystem.
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
}

impl SourceProvider for FileSource {
    fn open(&self) -> AcquireResult<Box<dyn Read + Send>> {
        let file = File::open(&self.path).map_err(|source| AcquireError::Io {
            bytes_copied: 0,
            source,
        })?;
        Ok(Box::new(file))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A reader that can only be consumed once, such as stdin or a pipe.
pub struct OnceSource {
    label: String,
    reader: Mutex<Option<Box<dyn Read + Send>>>,
}

impl OnceSource {
    pub fn new(label: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self {
            label: label.into(),
            reader: Mutex::new(Some(Box::new(reader))),
        }
    }
}

impl SourceProvider for OnceSource {
    fn open(&self) -> AcquireResult<Box<dyn Read + Send>> {
        self.reader.lock().take().ok_or_else(|| {
            AcquireError::SourceUnavailable(format!("{} can only be read once", self.label))
        })
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
