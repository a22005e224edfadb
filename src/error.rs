use std::path::PathBuf;

use thiserror::Error;

use crate::metadata::token::Token;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

/// The generic Error type, which covers every failure this library can report.
///
/// Note that a *resolution miss* (a type, method, attribute or parameter that a patch
/// definition names but the module does not contain) is not an error: it is reported as a
/// [`crate::patch::ResolutionMiss`] inside an operation outcome, and the batch continues.
/// The variants here are reserved for malformed input, I/O and serialization failures.
///
/// # Error Categories
///
/// ## Image Parsing Errors
/// - [`Error::GoblinErr`] - The PE/COFF container is damaged
/// - [`Error::Malformed`] - Corrupted or invalid image structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond the data boundaries
/// - [`Error::NotSupported`] - Unsupported format version or feature
/// - [`Error::Empty`] - Empty input provided
/// - [`Error::InvalidToken`] - A token references a row that does not exist
/// - [`Error::RecursionLimit`] - Signature nesting exceeded the decoder limit
///
/// ## I/O and Persistence Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::MissingBackingFile`] - A module without a file path was asked to persist
///
/// ## Modification Errors
/// - [`Error::ModificationInvalid`] - A builder or importer was handed inconsistent input
///
/// ## Definition Errors
/// - [`Error::InvalidDefinition`] - A patch definition has an invalid shape
/// - [`Error::Json`] - The patch definition document is not valid JSON
///
/// # Examples
///
/// ```rust,no_run
/// use dotpatch::{Error, metadata::module::Module};
/// use std::path::Path;
///
/// match Module::from_file(Path::new("UnityEngine.dll")) {
///     Ok(module) => println!("Loaded {}", module.name()),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed image: {} ({}:{})", message, file, line);
///     }
///     Err(Error::FileError(io_err)) => eprintln!("I/O error: {}", io_err),
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The image is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the data.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This format version or feature is not supported.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// The PE container could not be parsed.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// A token points at a table row that does not exist in the module.
    #[error("Invalid token - {0}")]
    InvalidToken(Token),

    /// Signature decoding exceeded the maximum nesting depth.
    #[error("Reached the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// A builder or the type importer received inconsistent input.
    #[error("Invalid modification: {0}")]
    ModificationInvalid(String),

    /// The module has no backing file, so it cannot be persisted in place.
    #[error("Module has no backing file path")]
    MissingBackingFile,

    /// The write of a module failed; the original bytes were restored before this
    /// error was returned.
    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        /// The file that was being written
        path: PathBuf,
        /// The underlying failure
        source: Box<Error>,
    },

    /// A patch definition has an invalid shape (e.g. a type path with a single element).
    #[error("Invalid patch definition: {0}")]
    InvalidDefinition(String),

    /// The patch definition document could not be decoded.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}
