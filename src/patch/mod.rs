//! The patch engine.
//!
//! A patch is declared, not coded: a [`PatchDefinition`] names one type by its path and lists
//! the operations to run on it. A [`PatchSession`] applies a list of definitions to a batch
//! of module files, imports support types the modules lack and rewrites each changed file
//! exactly once. Every step is idempotent, so running the same session over its own output
//! reports no changes and leaves every file byte-identical.
//!
//! # Architecture
//!
//! The pieces, from the leaves up:
//!
//! - [`locator`] finds types, methods, parameters and assembly references by name and
//!   canonical signature text
//! - [`operation`] holds the patch operations, each reporting its own
//!   [`OperationOutcome`]; something missing from the module is a [`ResolutionMiss`], not an
//!   error
//! - [`rewriter`] substitutes a type throughout one method body: locals, type operands and
//!   the parents of member references
//! - [`importer`] clones the support types a module lacks, together with their members,
//!   generic parameters, interfaces, properties, events and attributes, reusing the
//!   module's own types wherever they already exist
//! - [`persistence`] writes a module back to its file, restoring the original on failure
//! - [`definition`] reads definitions from JSON; [`session`] runs them over module files and
//!   [`report`] describes what happened
//!
//! # Processing Model
//!
//! For each module file the session loads the module, resolves every definition's path and
//! runs its operations in order. Support types are imported once, the first time a
//! definition resolves. A definition whose path does not resolve is reported and skipped;
//! a failed operation is reported and does not stop its siblings. Only a failure to load,
//! import or write is an [`crate::Error`], and a failed write stops the batch with the
//! file restored.
//!
//! # Usage Examples
//!
//! ## Patching files
//!
//! ```rust,no_run
//! use dotpatch::prelude::*;
//!
//! let definitions = load_definitions("patches.json")?;
//! let support = Module::from_file("EmbeddedTypes.dll")?;
//!
//! let mut session = PatchSession::new(definitions)
//!     .with_support(&support)
//!     .with_config(PatchConfig::default().dry_run(true));
//! let report = session.run(["Managed/UnityEngine.CoreModule.dll"])?;
//! println!("{} file(s) would be written", report.modules.iter().filter(|m| m.is_patched()).count());
//! # Ok::<(), dotpatch::Error>(())
//! ```
//!
//! ## Patching a module in memory
//!
//! ```rust
//! use dotpatch::prelude::*;
//!
//! let mut module = Module::new("UnityEngine.CoreModule.dll");
//! TypeDefBuilder::new()
//!     .namespace("UnityEngine")
//!     .name("Object")
//!     .build(&mut module)?;
//!
//! let definition = PatchDefinition::new(TypePath::new("UnityEngine", "Object")).with(
//!     AddAttributeOnMethod {
//!         method: "Foo".into(),
//!         signature: "System.Void Foo()".into(),
//!         attribute: TypeName::new("NS", "Attr"),
//!     },
//! );
//!
//! let report = PatchSession::new(vec![definition]).patch_module(&mut module)?;
//! assert!(report.definitions[0].resolved);
//! assert_eq!(report.failure_count(), 1);
//! assert!(!report.is_patched());
//! # Ok::<(), dotpatch::Error>(())
//! ```

pub mod definition;
pub mod importer;
pub mod locator;
pub mod operation;
pub mod persistence;
pub mod report;
pub mod rewriter;
pub mod session;

pub use definition::{definitions_from_json, load_definitions, PatchDefinition, TypeName, TypePath};
pub use importer::{
    ImportSummary, PreferExisting, ReferenceRedirect, TypeImporter, DEFAULT_EXPORT_MARKER,
};
pub use locator::TypeLocation;
pub use operation::{
    AddAttributeOnMethod, AddAttributeOnParameters, OperationOutcome, PatchOperation,
    ReplaceTypeReferenceInBody, ResolutionMiss,
};
pub use persistence::{commit_with, write_module, BackupGuard};
pub use report::{BatchReport, DefinitionReport, ModuleReport, OperationReport, OperationStatus};
pub use rewriter::{RewritePlan, TypeReferenceRewriter};
pub use session::{PatchConfig, PatchSession};
