//! Access to module images on disk and their PE container.
//!
//! - [`File`] memory-maps an image for the duration of parsing
//! - [`pe::PeImage`] owns the image bytes and knows the PE layout: sections, alignments and
//!   the CLI header, and assembles rewritten images
//! - [`io`] and [`parser`] provide the bounds-checked little-endian primitives everything else
//!   reads and writes with
//!
//! The mapping must not outlive the parse: persistence rewrites the same path in place, and a live mapping of a truncated
//! file faults on access. [`crate::metadata::module::Module::from_file`] therefore drops the
//! mapping as soon as the owned metadata graph has been built.

pub mod io;
pub mod parser;
pub mod pe;

use std::{
    fs,
    path::{Path, PathBuf},
};

use memmap2::Mmap;

use crate::{Error, Result};

/// A read-only, memory-mapped module image.
#[derive(Debug)]
pub struct File {
    data: Mmap,
    path: PathBuf,
}

impl File {
    /// Map the file at `path` into memory.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if the file cannot be opened, [`Error::Empty`] if it has
    /// no content, or [`Error::Error`] if the mapping fails.
    pub fn from_path(path: impl AsRef<Path>) -> Result<File> {
        let path = path.as_ref();
        let file = fs::File::open(path)?;

        if file.metadata()?.len() == 0 {
            return Err(Error::Empty);
        }

        // The mapping is read-only and dropped before anything writes to this path.
        let data = unsafe { Mmap::map(&file) }.map_err(|error| Error::Error(error.to_string()))?;

        Ok(File {
            data,
            path: path.to_path_buf(),
        })
    }

    /// The mapped bytes
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// Size of the mapped file in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the mapping is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The path this file was mapped from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn maps_file() {
        let mut temp = tempfile::NamedTempFile::new().unwrap();
        temp.write_all(b"MZ\x90\x00\x03\x00").unwrap();

        let file = File::from_path(temp.path()).unwrap();
        assert_eq!(file.len(), 6);
        assert_eq!(&file.data()[..2], b"MZ");
        assert_eq!(file.path(), temp.path());
    }

    #[test]
    fn empty_file() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(File::from_path(temp.path()), Err(Error::Empty)));
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            File::from_path(dir.path().join("missing.dll")),
            Err(Error::FileError(_))
        ));
    }
}
