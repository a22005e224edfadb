// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
//#![deny(unsafe_code)]
// - 'file/mod.rs' uses mmap to map a file into memory

//! # dotpatch
//!
//! In-place patching of compiled .NET modules. `dotpatch` locates types and members inside
//! a module's metadata by name and signature, applies a declared set of structural edits and
//! writes the module back with rollback on failure:
//!
//! - add a custom attribute to a method or to named parameters
//! - replace every use of a type inside a method body (locals, type operands and member
//!   references) with another type
//! - clone type definitions a module lacks from a support module, reusing the module's own
//!   types wherever they already exist
//!
//! Every edit is idempotent: patching an already patched module changes nothing, and the
//! written image is byte-identical.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dotpatch::prelude::*;
//!
//! let definitions = load_definitions("patches.json")?;
//! let support = Module::from_file("EmbeddedTypes.dll")?;
//!
//! let mut session = PatchSession::new(definitions).with_support(&support);
//! let report = session.run([
//!     "Managed/UnityEngine.CoreModule.dll",
//!     "Managed/UnityEditor.CoreModule.dll",
//! ])?;
//! for module in &report.modules {
//!     println!("{}: {} change(s)", module.path.display(), module.changes());
//! }
//! # Ok::<(), dotpatch::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`metadata`] - the module model, signatures, references and the binary image format
//! - [`assembly`] - CIL opcodes, instructions and method bodies
//! - [`patch`] - locator, operations, rewriter, importer, persistence and the batch driver
//! - [`prelude`] - re-exports of the commonly used types
//! - [`Error`] and [`Result`] - error handling
//!
//! ## Image Format
//!
//! Modules are read from and written to ECMA-335 PE images (IL-only `.dll` and `.exe`
//! files). Loading decodes the CLI header, the metadata root, every table and heap and every
//! method body. Writing keeps the original PE container and places the re-encoded bodies,
//! field data and metadata in a `.meta` section, so the native parts of the image survive
//! untouched. See [`metadata::image`] for the layout.
//!
//! ## Error Handling
//!
//! Malformed input, I/O and write failures are [`Error`]s. Something a patch names but the
//! module does not contain is not an error; it is reported per operation as a
//! [`patch::ResolutionMiss`] and the batch continues.
//!
//! ```rust,no_run
//! use dotpatch::{metadata::module::Module, Error};
//!
//! match Module::from_file("UnityEngine.CoreModule.dll") {
//!     Ok(module) => println!("Loaded {}", module.name()),
//!     Err(Error::NotSupported) => println!("Not a module image"),
//!     Err(Error::Malformed { message, .. }) => println!("Malformed image: {}", message),
//!     Err(e) => println!("Error: {}", e),
//! }
//! ```

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Convenient re-exports of the most commonly used types.
///
/// ```rust,no_run
/// use dotpatch::prelude::*;
///
/// let module = Module::from_file("UnityEngine.CoreModule.dll")?;
/// for type_def in module.top_level_types() {
///     println!("{}", module.type_def_full_name(type_def));
/// }
/// # Ok::<(), dotpatch::Error>(())
/// ```
pub mod prelude;

/// CIL opcodes, instructions and method bodies.
///
/// Instructions carry typed operands: type, method and field operands are handles into the
/// owning module, so rewriting an operand is a plain value substitution and never changes
/// an instruction's encoded size.
pub mod assembly;

/// The module model and its on-disk image format.
///
/// A [`metadata::module::Module`] owns every row of one module in arenas indexed by typed
/// ids. Row order is identity: appending entities never changes the tokens of existing
/// ones, and writing the same module twice produces the same bytes.
pub mod metadata;

/// The patch engine
pub mod patch;

/// `dotpatch` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotpatch` Error type
///
/// Covers malformed images, I/O, write failures and invalid patch definitions.
pub use error::Error;

/// Main entry point for loading and saving modules.
pub use metadata::module::Module;

/// Low-level parsing utilities and the memory-mapped file.
pub use file::{parser::Parser, File};
