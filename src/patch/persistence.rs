//! Writing patched modules back to their files with rollback.
//!
//! [`write_module`] captures the full original bytes of the module's file in a
//! [`BackupGuard`] before anything is serialized. If serialization or the write fails, the
//! guard writes the original bytes back when it is dropped, so the file is never left
//! half-written. A successful write releases the guard and nothing is kept.
//!
//! Rollback covers one file. Files written earlier in the same batch stay patched.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use crate::{metadata::module::Module, Error, Result};

/// Original contents of a file, written back on drop unless released
pub struct BackupGuard {
    path: PathBuf,
    original: Vec<u8>,
    released: bool,
}

impl BackupGuard {
    /// Read and keep the current contents of `path`.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if the file cannot be read.
    pub fn capture(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let original = std::fs::read(&path)?;
        Ok(BackupGuard {
            path,
            original,
            released: false,
        })
    }

    /// The backed up file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The bytes that will be restored
    #[must_use]
    pub fn original(&self) -> &[u8] {
        &self.original
    }

    /// Drop the backup without restoring it
    pub fn release(mut self) {
        self.released = true;
    }

    /// Write the backup back immediately.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if the file cannot be rewritten.
    pub fn restore(mut self) -> Result<()> {
        self.released = true;
        overwrite(&self.path, &self.original)
    }
}

impl Drop for BackupGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        match overwrite(&self.path, &self.original) {
            Ok(()) => log::debug!("Restored original contents of {}", self.path.display()),
            Err(error) => log::error!(
                "Failed to restore original contents of {} - {}",
                self.path.display(),
                error
            ),
        }
    }
}

/// Truncate `path` and write `data` to it, flushing to disk
fn overwrite(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

/// Replace the contents of `path` with the bytes `produce` returns, restoring the original
/// contents if `produce` or the write fails.
///
/// `produce` runs after the backup is captured and may touch the file itself.
///
/// # Errors
/// Returns [`Error::FileError`] if the original cannot be read, and [`Error::WriteFailed`]
/// wrapping the cause if producing or writing the new contents failed. In the latter case
/// the file holds its original bytes again.
pub fn commit_with<F>(path: impl AsRef<Path>, produce: F) -> Result<()>
where
    F: FnOnce() -> Result<Vec<u8>>,
{
    let path = path.as_ref();
    let backup = BackupGuard::capture(path)?;

    match produce().and_then(|data| overwrite(path, &data)) {
        Ok(()) => {
            backup.release();
            Ok(())
        }
        Err(error) => {
            drop(backup);
            Err(Error::WriteFailed {
                path: path.to_path_buf(),
                source: Box::new(error),
            })
        }
    }
}

/// Serialize `module` over its backing file.
///
/// # Errors
/// Returns [`Error::MissingBackingFile`] if the module was not loaded from a file, otherwise
/// as [`commit_with`].
pub fn write_module(module: &Module) -> Result<()> {
    let path = module.path().ok_or(Error::MissingBackingFile)?;
    commit_with(path, || module.to_bytes())?;
    log::info!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::builders::TypeDefBuilder;

    fn sample() -> Module {
        let mut module = Module::new("Sample.dll");
        TypeDefBuilder::new()
            .namespace("NS")
            .name("T")
            .build(&mut module)
            .unwrap();
        module
    }

    #[test]
    fn write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Sample.dll");
        std::fs::write(&path, sample().to_bytes().unwrap()).unwrap();

        let mut loaded = Module::from_file(&path).unwrap();
        TypeDefBuilder::new()
            .namespace("NS")
            .name("Added")
            .build(&mut loaded)
            .unwrap();
        write_module(&loaded).unwrap();

        let reloaded = Module::from_file(&path).unwrap();
        assert!(reloaded.top_level_type("NS", "Added").is_some());
        assert_eq!(std::fs::read(&path).unwrap(), loaded.to_bytes().unwrap());
    }

    #[test]
    fn failed_produce_restores_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Sample.dll");
        let original = sample().to_bytes().unwrap();
        std::fs::write(&path, &original).unwrap();

        let result = commit_with(&path, || {
            // a serializer that dies halfway through its output
            std::fs::write(&path, &original[..original.len() / 2])?;
            Err(Error::Error("serializer crashed".to_string()))
        });

        assert!(matches!(result, Err(Error::WriteFailed { .. })));
        assert_eq!(std::fs::read(&path).unwrap(), original);
    }

    #[test]
    fn guard_restores_on_drop_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.bin");
        std::fs::write(&path, b"before").unwrap();

        let guard = BackupGuard::capture(&path).unwrap();
        assert_eq!(guard.original(), b"before");
        std::fs::write(&path, b"after").unwrap();
        drop(guard);
        assert_eq!(std::fs::read(&path).unwrap(), b"before");

        let guard = BackupGuard::capture(&path).unwrap();
        std::fs::write(&path, b"after").unwrap();
        guard.release();
        assert_eq!(std::fs::read(&path).unwrap(), b"after");
    }

    #[test]
    fn module_without_file() {
        assert!(matches!(
            write_module(&sample()),
            Err(Error::MissingBackingFile)
        ));
    }
}
