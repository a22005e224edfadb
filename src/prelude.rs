//! # dotpatch Prelude
//!
//! The types most callers need to load modules, describe patches and run them.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotpatch operations
pub use crate::Error;

/// The result type used throughout dotpatch
pub use crate::Result;

// ================================================================================================
// Metadata
// ================================================================================================

/// The module model and its row entities
pub use crate::metadata::module::{
    AssemblyDef, AssemblyRef, AssemblyVersion, ClassLayout, Constant, CustomAttribute,
    DeclSecurity, Event, Field, FieldData, GenericParam, GenericParamConstraint, InterfaceImpl,
    MemberRef, Method, MethodOverride, MethodSemantic, MethodSpec, Module, ModuleRef,
    PInvokeMap, Param, Property, TypeDef, TypeRef,
};

/// Typed row ids and coded handles
pub use crate::metadata::handles::{
    AssemblyRefId, AttributeConstructor, AttributeParent, EventId, FieldId, FieldRef,
    GenericParamId, GenericParamOwner, InterfaceImplId, MemberRefId, MemberRefParent, MethodId,
    MethodRef, MethodSpecId, ModuleRefId, ParamId, PropertyId, ResolutionScope, SecurityParent,
    StandAloneSigId, TypeDefId, TypeDefOrRef, TypeRefId, TypeSpecId,
};

/// Metadata tokens
pub use crate::metadata::token::{TableId, Token};

/// Signatures
pub use crate::metadata::signatures::{MemberSig, MethodSig, PropertySig, StandAloneSig, TypeSig};

/// Entity flags
pub use crate::metadata::flags::{
    FieldAttributes, MethodAttributes, ParamAttributes, TypeAttributes,
};

/// Builders for new entities
pub use crate::metadata::builders::{
    AssemblyRefBuilder, FieldBuilder, MethodDefBuilder, ParamBuilder, TypeDefBuilder,
};

// ================================================================================================
// Instructions
// ================================================================================================

/// Instructions and method bodies
pub use crate::assembly::{
    ExceptionHandler, HandlerKind, Instruction, MethodBody, OpCode, Operand, TokenRef,
};

// ================================================================================================
// Patch Engine
// ================================================================================================

/// Definitions and their JSON loader
pub use crate::patch::{
    definitions_from_json, load_definitions, PatchDefinition, TypeName, TypePath,
};

/// Operations and their outcomes
pub use crate::patch::{
    AddAttributeOnMethod, AddAttributeOnParameters, OperationOutcome, PatchOperation,
    ReplaceTypeReferenceInBody, ResolutionMiss,
};

/// Lookups
pub use crate::patch::locator::{
    find_assembly_reference_by_name, find_attribute_type, find_method, find_method_by_name,
    find_parameter, find_type, resolve_type_path,
};

/// Body rewriting, type import and persistence
pub use crate::patch::{
    write_module, ImportSummary, PreferExisting, ReferenceRedirect, TypeImporter,
    TypeReferenceRewriter,
};

/// Batch driver and reports
pub use crate::patch::{BatchReport, ModuleReport, PatchConfig, PatchSession};
