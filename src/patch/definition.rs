//! Patch definitions and their JSON form.
//!
//! A definition names one type by path and lists the operations to run on it:
//!
//! ```json
//! [{ "path": ["UnityEngine", "Object"],
//!    "patches": [{ "$type": "AddAttributeOnMethod", "method": "Foo",
//!                  "signature": "System.Void Foo()", "attribute": ["NS", "Attr"] }] }]
//! ```

use std::{fmt, path::Path};

use serde::{Deserialize, Serialize};

use crate::{patch::operation::PatchOperation, Error, Result};

/// Path to a possibly nested type: namespace and name of the top-level type, then the names
/// of the nested types from outermost to innermost.
///
/// In JSON a path is an array `[namespace, name, nested...]` whose namespace may be `null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<Option<String>>", into = "Vec<Option<String>>")]
pub struct TypePath {
    /// Namespace of the top-level type, empty for the global namespace
    pub namespace: String,
    /// Name of the top-level type
    pub name: String,
    /// Nested type names, outermost first
    pub nested: Vec<String>,
}

impl TypePath {
    /// Path to a top-level type
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypePath {
            namespace: namespace.into(),
            name: name.into(),
            nested: Vec::new(),
        }
    }

    /// Extend the path by one nesting level
    #[must_use]
    pub fn nested(mut self, name: impl Into<String>) -> Self {
        self.nested.push(name.into());
        self
    }
}

impl TryFrom<Vec<Option<String>>> for TypePath {
    type Error = Error;

    fn try_from(segments: Vec<Option<String>>) -> Result<Self> {
        if segments.len() < 2 {
            return Err(Error::InvalidDefinition(format!(
                "Type path needs a namespace and a name, got {} element(s)",
                segments.len()
            )));
        }

        let mut segments = segments.into_iter();
        let namespace = segments.next().flatten().unwrap_or_default();
        let mut names = Vec::with_capacity(segments.len());
        for segment in segments {
            match segment {
                Some(name) if !name.is_empty() => names.push(name),
                _ => {
                    return Err(Error::InvalidDefinition(
                        "Type path contains an empty type name".to_string(),
                    ))
                }
            }
        }

        let name = names.remove(0);
        Ok(TypePath {
            namespace,
            name,
            nested: names,
        })
    }
}

impl From<TypePath> for Vec<Option<String>> {
    fn from(path: TypePath) -> Self {
        let namespace = (!path.namespace.is_empty()).then_some(path.namespace);
        let mut segments = vec![namespace, Some(path.name)];
        segments.extend(path.nested.into_iter().map(Some));
        segments
    }
}

impl fmt::Display for TypePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.namespace.is_empty() {
            write!(f, "{}.", self.namespace)?;
        }
        write!(f, "{}", self.name)?;
        for nested in &self.nested {
            write!(f, "+{nested}")?;
        }
        Ok(())
    }
}

/// A type named by namespace and name, optionally scoped to an assembly reference.
///
/// In JSON: `[namespace, name]` or `[assembly, namespace, name]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<Option<String>>", into = "Vec<Option<String>>")]
pub struct TypeName {
    /// Assembly reference the type must be resolved through
    pub assembly: Option<String>,
    /// Namespace, empty for the global namespace
    pub namespace: String,
    /// Simple name
    pub name: String,
}

impl TypeName {
    /// A type resolved through the module, its existing references or the core library
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeName {
            assembly: None,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// A type resolved through the named assembly reference
    #[must_use]
    pub fn in_assembly(
        assembly: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        TypeName {
            assembly: Some(assembly.into()),
            ..Self::new(namespace, name)
        }
    }
}

impl TryFrom<Vec<Option<String>>> for TypeName {
    type Error = Error;

    fn try_from(segments: Vec<Option<String>>) -> Result<Self> {
        match <[Option<String>; 3]>::try_from(segments) {
            Ok([Some(assembly), namespace, Some(name)]) => Ok(TypeName {
                assembly: Some(assembly),
                namespace: namespace.unwrap_or_default(),
                name,
            }),
            Ok(_) => Err(Error::InvalidDefinition(
                "Type name is missing its assembly or name".to_string(),
            )),
            Err(segments) => match <[Option<String>; 2]>::try_from(segments) {
                Ok([namespace, Some(name)]) => Ok(TypeName {
                    assembly: None,
                    namespace: namespace.unwrap_or_default(),
                    name,
                }),
                Ok(_) => Err(Error::InvalidDefinition("Type name is missing its name".to_string())),
                Err(segments) => Err(Error::InvalidDefinition(format!(
                    "Type name needs 2 or 3 elements, got {}",
                    segments.len()
                ))),
            },
        }
    }
}

impl From<TypeName> for Vec<Option<String>> {
    fn from(type_name: TypeName) -> Self {
        let namespace = (!type_name.namespace.is_empty()).then_some(type_name.namespace);
        match type_name.assembly {
            Some(assembly) => vec![Some(assembly), namespace, Some(type_name.name)],
            None => vec![namespace, Some(type_name.name)],
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(assembly) = &self.assembly {
            write!(f, "[{assembly}]")?;
        }
        if !self.namespace.is_empty() {
            write!(f, "{}.", self.namespace)?;
        }
        write!(f, "{}", self.name)
    }
}

/// A target type and the ordered operations to apply to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchDefinition {
    /// The type the operations run against
    pub path: TypePath,
    /// Operations in application order
    #[serde(default)]
    pub patches: Vec<PatchOperation>,
}

impl PatchDefinition {
    /// A definition with no operations yet
    #[must_use]
    pub fn new(path: TypePath) -> Self {
        PatchDefinition {
            path,
            patches: Vec::new(),
        }
    }

    /// Append an operation
    #[must_use]
    pub fn with(mut self, operation: impl Into<PatchOperation>) -> Self {
        self.patches.push(operation.into());
        self
    }
}

/// Parse a JSON array of patch definitions.
///
/// # Errors
/// Returns [`Error::Json`] for malformed JSON, unknown `$type` discriminators and invalid
/// paths or type names.
pub fn definitions_from_json(json: &str) -> Result<Vec<PatchDefinition>> {
    Ok(serde_json::from_str(json)?)
}

/// Load a JSON array of patch definitions from `path`.
///
/// # Errors
/// Returns [`Error::FileError`] if the file cannot be read, otherwise as
/// [`definitions_from_json`].
pub fn load_definitions(path: impl AsRef<Path>) -> Result<Vec<PatchDefinition>> {
    let json = std::fs::read_to_string(path)?;
    definitions_from_json(&json)
}
