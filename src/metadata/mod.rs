//! Metadata model, image format and signature codec for managed modules.
//!
//! This module holds everything needed to load an ECMA-335 module from its PE file, inspect
//! and mutate its metadata tables and write it back out. Loading decodes every table into an
//! owned, arena based [`module::Module`]; nothing borrows from the file once loading returns,
//! so the file can be rewritten in place.
//!
//! # Architecture
//!
//! The layers mirror the on-disk structure of a module, outermost first:
//!
//! - **PE container**: sections, data directories and RVA mapping live in the crate's file
//!   layer; a module keeps the image it was read from and rewrites only what it owns
//! - **CLI header**: [`cor20header`] locates the metadata root and carries the runtime flags
//!   and the entry point token
//! - **Metadata root**: [`root`] parses the `BSJB` signature, the runtime version string and
//!   the stream headers, and assembles a new root when writing
//! - **Tables and heaps**: [`tables`] knows the schema of every table, the coded index tags
//!   and the size of each column; [`streams`] reads and interns the `#Strings`, `#US`,
//!   `#GUID` and `#Blob` heaps
//! - **Model**: [`module`] turns rows into typed entities whose cross references are typed
//!   [`handles`] instead of raw tokens; [`image`] drives the conversion in both directions
//!
//! Row identity is arena position. Appending entities never changes the token of an existing
//! one, and writing a module read from a written image reproduces that image.
//!
//! # Key Components
//!
//! ## Model
//!
//! - [`module::Module`] - one loaded module: arenas per table plus naming queries
//! - [`handles`] - typed row ids and coded references between rows
//! - [`token`] - metadata tokens and table ids
//! - [`flags`] - type, method, field and parameter attribute flags
//!
//! ## Editing
//!
//! - [`builders`] - builders for new type, member, parameter and assembly reference rows
//! - [`references`] - deduplicating creation of assembly, type and member references
//! - [`signatures`] - type, method, field, property, local and method-spec signatures
//! - [`attributes`] - custom attribute value blobs
//!
//! ## Image format
//!
//! - [`image`] - reading and writing the tables of a PE image
//! - [`root`], [`cor20header`], [`tables`], [`streams`] - the binary structures above
//!
//! # Usage Examples
//!
//! ## Listing the types of a module
//!
//! ```rust,no_run
//! use dotpatch::metadata::module::Module;
//!
//! let module = Module::from_file("Library.dll")?;
//! println!("{} ({})", module.name(), module.runtime_version());
//! for id in module.top_level_types() {
//!     println!("{}", module.type_def_full_name(id));
//! }
//! # Ok::<(), dotpatch::Error>(())
//! ```
//!
//! ## Adding a type and writing the image
//!
//! ```rust
//! use dotpatch::metadata::{builders::TypeDefBuilder, module::Module};
//!
//! let mut module = Module::new("Library.dll");
//! let widget = TypeDefBuilder::new()
//!     .namespace("Demo")
//!     .name("Widget")
//!     .build(&mut module)?;
//!
//! let bytes = module.to_bytes()?;
//! assert_eq!(&bytes[..2], b"MZ");
//!
//! let reloaded = Module::from_bytes(&bytes)?;
//! assert_eq!(reloaded.top_level_type("Demo", "Widget"), Some(widget));
//! # Ok::<(), dotpatch::Error>(())
//! ```

/// Custom attribute value blobs
pub mod attributes;
/// Builders for new metadata rows
pub mod builders;
/// The CLI header
pub mod cor20header;
/// Flag sets of types, methods, fields and parameters
pub mod flags;
/// Typed row handles and coded references
pub mod handles;
/// The binary module image format
pub mod image;
/// The in-memory module model
pub mod module;
/// Reference importing with deduplication
pub mod references;
/// The metadata root and stream headers
pub mod root;
/// Method and type signatures
pub mod signatures;
/// Metadata heaps
pub mod streams;
/// Table schema, coded indices and row encoding
pub mod tables;
/// Commonly used metadata token type
pub mod token;
