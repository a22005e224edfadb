//! What a patch run did, per module, definition and operation.
//!
//! Reports are plain data and serialize to JSON for callers that want an audit trail of the
//! changes made to a binary.

use std::path::PathBuf;

use serde::Serialize;

use crate::patch::operation::OperationOutcome;

/// Outcome class of one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// The module was changed
    Applied,
    /// Nothing to do
    Unchanged,
    /// A required input was missing
    Failed,
}

/// One operation run against one type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationReport {
    /// The operation's `$type`
    pub operation: String,
    /// The method it targeted
    pub method: String,
    /// Outcome class
    pub status: OperationStatus,
    /// Attributes added or operands substituted
    pub changes: usize,
    /// Why the operation failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationReport {
    /// Describe an outcome
    #[must_use]
    pub fn new(operation: &str, method: &str, outcome: &OperationOutcome) -> Self {
        let (status, error) = match outcome {
            OperationOutcome::Applied(_) => (OperationStatus::Applied, None),
            OperationOutcome::Unchanged => (OperationStatus::Unchanged, None),
            OperationOutcome::Failed(miss) => (OperationStatus::Failed, Some(miss.to_string())),
        };
        OperationReport {
            operation: operation.to_string(),
            method: method.to_string(),
            status,
            changes: outcome.changes(),
            error,
        }
    }
}

/// One definition run against one module
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefinitionReport {
    /// The type path, e.g. `UnityEngine.Object+Nested`
    pub path: String,
    /// False if the path did not resolve; the operations were then not run
    pub resolved: bool,
    /// One entry per operation, in order
    pub operations: Vec<OperationReport>,
}

impl DefinitionReport {
    /// Total changes over all operations
    #[must_use]
    pub fn changes(&self) -> usize {
        self.operations.iter().map(|op| op.changes).sum()
    }

    /// True if at least one operation changed the module; a definition that ran without
    /// changes was only processed
    #[must_use]
    pub fn is_patched(&self) -> bool {
        self.changes() > 0
    }

    /// Operations that failed
    pub fn failures(&self) -> impl Iterator<Item = &OperationReport> {
        self.operations
            .iter()
            .filter(|op| op.status == OperationStatus::Failed)
    }
}

/// Everything done to one module file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleReport {
    /// The module file
    pub path: PathBuf,
    /// The file was already written earlier in the session and was not touched again
    pub skipped: bool,
    /// Types cloned from the support module
    pub imported: Vec<String>,
    /// Definitions in input order
    pub definitions: Vec<DefinitionReport>,
    /// The file was rewritten
    pub written: bool,
}

impl ModuleReport {
    /// Types cloned plus changes made by operations
    #[must_use]
    pub fn changes(&self) -> usize {
        self.imported.len() + self.definitions.iter().map(DefinitionReport::changes).sum::<usize>()
    }

    /// True if anything in the module changed
    #[must_use]
    pub fn is_patched(&self) -> bool {
        self.changes() > 0
    }

    /// Number of failed operations
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.definitions
            .iter()
            .map(|definition| definition.failures().count())
            .sum()
    }
}

/// A full session run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// One entry per module path, in input order
    pub modules: Vec<ModuleReport>,
}

impl BatchReport {
    /// Number of files rewritten
    #[must_use]
    pub fn written(&self) -> usize {
        self.modules.iter().filter(|module| module.written).count()
    }

    /// Number of failed operations over all modules
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.modules.iter().map(ModuleReport::failure_count).sum()
    }
}
