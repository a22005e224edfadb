//! The batch driver.
//!
//! A [`PatchSession`] owns a list of [`PatchDefinition`]s and an optional support module and
//! applies them to module files one at a time: load, patch in memory, write once if anything
//! changed. A write failure restores that file and stops the batch; files written before it
//! stay patched.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use crate::{
    metadata::module::Module,
    patch::{
        definition::PatchDefinition,
        importer::{TypeImporter, DEFAULT_EXPORT_MARKER},
        locator::resolve_type_path,
        operation::OperationOutcome,
        persistence::write_module,
        report::{BatchReport, DefinitionReport, ModuleReport, OperationReport},
    },
    Result,
};

/// Session settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchConfig {
    /// Name of the module attribute that marks exported support types
    pub export_marker: String,
    /// Patch in memory only, never write files
    pub dry_run: bool,
}

impl Default for PatchConfig {
    fn default() -> Self {
        PatchConfig {
            export_marker: DEFAULT_EXPORT_MARKER.to_string(),
            dry_run: false,
        }
    }
}

impl PatchConfig {
    /// Set the export marker attribute name
    #[must_use]
    pub fn export_marker(mut self, marker: impl Into<String>) -> Self {
        self.export_marker = marker.into();
        self
    }

    /// Enable or disable dry runs
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Applies a batch of definitions to module files.
///
/// # Examples
///
/// ```rust,no_run
/// use dotpatch::prelude::*;
///
/// let definitions = load_definitions("patches.json")?;
/// let support = Module::from_file("Support.dll")?;
///
/// let mut session = PatchSession::new(definitions).with_support(&support);
/// let report = session.run(["Managed/UnityEngine.CoreModule.dll"])?;
/// println!("{} file(s) written", report.written());
/// # Ok::<(), dotpatch::Error>(())
/// ```
pub struct PatchSession<'a> {
    definitions: Vec<PatchDefinition>,
    support: Option<&'a Module>,
    config: PatchConfig,
    edited: HashSet<PathBuf>,
}

impl<'a> PatchSession<'a> {
    /// A session without support module and with the default configuration
    #[must_use]
    pub fn new(definitions: Vec<PatchDefinition>) -> Self {
        PatchSession {
            definitions,
            support: None,
            config: PatchConfig::default(),
            edited: HashSet::new(),
        }
    }

    /// Import exported types from `support` into every module a definition resolves in
    #[must_use]
    pub fn with_support(mut self, support: &'a Module) -> Self {
        self.support = Some(support);
        self
    }

    /// Replace the configuration
    #[must_use]
    pub fn with_config(mut self, config: PatchConfig) -> Self {
        self.config = config;
        self
    }

    /// The configuration
    #[must_use]
    pub fn config(&self) -> &PatchConfig {
        &self.config
    }

    /// The definitions
    #[must_use]
    pub fn definitions(&self) -> &[PatchDefinition] {
        &self.definitions
    }

    /// Apply every definition to an in-memory module.
    ///
    /// Support types are imported once, when the first definition resolves. Definitions whose
    /// path does not resolve are reported and skipped; failed operations are reported and do
    /// not stop their siblings.
    ///
    /// # Errors
    /// Returns an error only if importing from the support module fails.
    pub fn patch_module(&self, module: &mut Module) -> Result<ModuleReport> {
        let mut report = ModuleReport {
            path: module.path().map(Path::to_path_buf).unwrap_or_default(),
            ..ModuleReport::default()
        };
        let mut imported = false;

        for definition in &self.definitions {
            let path = definition.path.to_string();
            let Some(type_def) = resolve_type_path(module, &definition.path) else {
                log::debug!("{} not found in {}", path, module.name());
                report.definitions.push(DefinitionReport {
                    path,
                    resolved: false,
                    operations: Vec::new(),
                });
                continue;
            };

            if !imported {
                imported = true;
                if let Some(support) = self.support {
                    let summary = TypeImporter::new(support)
                        .with_marker(self.config.export_marker.as_str())
                        .import_into(module)?;
                    if !summary.is_empty() {
                        log::info!(
                            "Imported {} type(s) from {} into {}",
                            summary.cloned_types,
                            support.name(),
                            module.name()
                        );
                    }
                    report.imported = summary.imported;
                }
            }

            let mut operations = Vec::with_capacity(definition.patches.len());
            for operation in &definition.patches {
                let outcome = operation.apply(module, type_def);
                match &outcome {
                    OperationOutcome::Failed(miss) => log::warn!(
                        "{} failed on {}::{} - {}",
                        operation.name(),
                        path,
                        operation.method(),
                        miss
                    ),
                    OperationOutcome::Applied(changes) => log::debug!(
                        "{} on {}::{} made {} change(s)",
                        operation.name(),
                        path,
                        operation.method(),
                        changes
                    ),
                    OperationOutcome::Unchanged => log::debug!(
                        "{} on {}::{} already applied",
                        operation.name(),
                        path,
                        operation.method()
                    ),
                }
                operations.push(OperationReport::new(
                    operation.name(),
                    operation.method(),
                    &outcome,
                ));
            }

            report.definitions.push(DefinitionReport {
                path,
                resolved: true,
                operations,
            });
        }

        Ok(report)
    }

    /// Load, patch and, if anything changed, rewrite one module file.
    ///
    /// A file already written by this session is skipped.
    ///
    /// # Errors
    /// Returns an error if the file cannot be loaded, the import fails or the write fails. A
    /// failed write leaves the original file contents in place.
    pub fn patch_file(&mut self, path: impl AsRef<Path>) -> Result<ModuleReport> {
        let path = path.as_ref();
        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if self.edited.contains(&key) {
            log::debug!("{} was already patched in this session", path.display());
            return Ok(ModuleReport {
                path: path.to_path_buf(),
                skipped: true,
                ..ModuleReport::default()
            });
        }

        let mut module = Module::from_file(path)?;
        let mut report = self.patch_module(&mut module)?;
        report.path = path.to_path_buf();

        if !report.is_patched() {
            log::debug!("{} needs no changes", path.display());
            return Ok(report);
        }

        if self.config.dry_run {
            log::info!(
                "Would patch {} ({} change(s))",
                path.display(),
                report.changes()
            );
        } else {
            log::info!("Patching {}", path.display());
            write_module(&module)?;
            report.written = true;
        }
        self.edited.insert(key);

        Ok(report)
    }

    /// Patch every file in order, stopping at the first error.
    ///
    /// # Errors
    /// See [`PatchSession::patch_file`]. Files patched before the failing one stay written.
    pub fn run<I, P>(&mut self, paths: I) -> Result<BatchReport>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut batch = BatchReport::default();
        for path in paths {
            batch.modules.push(self.patch_file(path)?);
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::builders::{MethodDefBuilder, TypeDefBuilder},
        patch::{
            definition::{TypeName, TypePath},
            operation::AddAttributeOnMethod,
        },
    };

    fn target() -> Module {
        let mut module = Module::new("Target.dll");
        let attr = TypeDefBuilder::new()
            .namespace("NS")
            .name("Attr")
            .build(&mut module)
            .unwrap();
        MethodDefBuilder::new()
            .constructor()
            .owner(attr)
            .build(&mut module)
            .unwrap();
        let t = TypeDefBuilder::new()
            .namespace("NS")
            .name("T")
            .build(&mut module)
            .unwrap();
        MethodDefBuilder::new()
            .name("Foo")
            .owner(t)
            .build(&mut module)
            .unwrap();
        module
    }

    fn definitions() -> Vec<PatchDefinition> {
        vec![
            PatchDefinition::new(TypePath::new("NS", "Missing")),
            PatchDefinition::new(TypePath::new("NS", "T")).with(AddAttributeOnMethod {
                method: "Foo".into(),
                signature: "System.Void Foo()".into(),
                attribute: TypeName::new("NS", "Attr"),
            }),
        ]
    }

    #[test]
    fn unresolved_definitions_are_reported() {
        let session = PatchSession::new(definitions());
        let mut module = target();
        let report = session.patch_module(&mut module).unwrap();

        assert!(!report.definitions[0].resolved);
        assert!(report.definitions[1].resolved);
        assert_eq!(report.changes(), 1);

        let again = session.patch_module(&mut module).unwrap();
        assert!(!again.is_patched());
    }

    #[test]
    fn dry_run_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Target.dll");
        let original = target().to_bytes().unwrap();
        std::fs::write(&path, &original).unwrap();

        let mut session =
            PatchSession::new(definitions()).with_config(PatchConfig::default().dry_run(true));
        let report = session.patch_file(&path).unwrap();
        assert!(report.is_patched());
        assert!(!report.written);
        assert_eq!(std::fs::read(&path).unwrap(), original);
    }

    #[test]
    fn files_are_written_once_per_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Target.dll");
        std::fs::write(&path, target().to_bytes().unwrap()).unwrap();

        let mut session = PatchSession::new(definitions());
        let batch = session.run([&path, &path]).unwrap();
        assert_eq!(batch.written(), 1);
        assert!(batch.modules[1].skipped);
    }
}
