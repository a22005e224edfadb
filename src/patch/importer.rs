//! Cloning type definitions from a support module into a target module.
//!
//! A support module lists the types it offers through module-level export markers: attributes
//! named `ExportEmbeddedTypeAttribute` (namespace ignored) whose single `System.Type` argument
//! names the exported type. [`TypeImporter::import_into`] clones every exported type that the
//! target module does not already define, together with its nested types and everything they
//! declare: fields (with constants, marshalling, explicit offsets and initial data), methods
//! (with P/Invoke maps and bodies), parameters, properties, events, generic parameters and
//! their constraints, implemented interfaces, method overrides, class layouts, declarative
//! security and the custom attributes on all of these.
//!
//! Every handle in the cloned graph is translated into the target module:
//!
//! - a source type that is being cloned maps to its clone
//! - a source type for which [`ReferenceRedirect`] names an existing equivalent maps to that
//!   equivalent; the default [`PreferExisting`] matches top-level types by namespace and name
//! - any other source type is cloned as well
//! - type, member and assembly references are re-created through the target's deduplicating
//!   [`crate::metadata::references::ReferenceImporter`]
//!
//! Running an import twice is a no-op the second time, because every exported type then has
//! an equivalent in the target.

use std::{
    collections::{HashMap, VecDeque},
    path::Path,
};

use crate::{
    assembly::{ExceptionHandler, HandlerKind, Instruction, MethodBody, Operand, TokenRef},
    metadata::{
        attributes::{decode_type_argument, split_type_name, strip_assembly_qualifier},
        handles::{
            AttributeConstructor, AttributeParent, FieldId, FieldRef, GenericParamOwner,
            MemberRefParent, MethodId, MethodRef, ParamId, ResolutionScope, SecurityParent,
            StandAloneSigId, TypeDefId, TypeDefOrRef, TypeRefId,
        },
        module::{
            DeclSecurity, Event, Field, FieldData, GenericParam, Method, MethodOverride,
            MethodSemantic, Module, PInvokeMap, Param, Property, TypeDef,
        },
        signatures::{MemberSig, MethodSig, PropertySig, StandAloneSig, TypeSig},
    },
    Error, Result,
};

/// Name of the module-level attribute that marks an exported type
pub const DEFAULT_EXPORT_MARKER: &str = "ExportEmbeddedTypeAttribute";

/// Decides whether a source type already has an equivalent in the destination module.
///
/// Called once per referenced source type while cloning; returning `Some` makes the clone
/// point at the existing type instead of cloning the source type.
pub trait ReferenceRedirect {
    /// The destination equivalent of the top-level source type `type_def`, if there is one
    fn redirect(&self, destination: &Module, source: &Module, type_def: TypeDefId)
        -> Option<TypeDefId>;
}

/// Redirects to a destination top-level type with the same namespace and name
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferExisting;

impl ReferenceRedirect for PreferExisting {
    fn redirect(
        &self,
        destination: &Module,
        source: &Module,
        type_def: TypeDefId,
    ) -> Option<TypeDefId> {
        let source_type = source.type_def(type_def)?;
        if source_type.enclosing.is_some() {
            return None;
        }
        destination.top_level_type(&source_type.namespace, &source_type.name)
    }
}

/// What an import did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Full names of the top-level types cloned into the destination
    pub imported: Vec<String>,
    /// Full names of exported types the destination already defined
    pub skipped: Vec<String>,
    /// Number of type definitions cloned, nested types included
    pub cloned_types: usize,
}

impl ImportSummary {
    /// Returns true if nothing was cloned
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cloned_types == 0
    }
}

/// Imports exported types of a support module into target modules
pub struct TypeImporter<'a, R = PreferExisting> {
    source: &'a Module,
    redirect: R,
    marker: String,
}

impl<'a> TypeImporter<'a> {
    /// An importer for the types `source` exports, redirecting to existing top-level types
    #[must_use]
    pub fn new(source: &'a Module) -> Self {
        TypeImporter {
            source,
            redirect: PreferExisting,
            marker: DEFAULT_EXPORT_MARKER.to_string(),
        }
    }
}

impl<'a, R: ReferenceRedirect> TypeImporter<'a, R> {
    /// Use a different redirect strategy
    #[must_use]
    pub fn with_redirect<S: ReferenceRedirect>(self, redirect: S) -> TypeImporter<'a, S> {
        TypeImporter {
            source: self.source,
            redirect,
            marker: self.marker,
        }
    }

    /// Use a different export marker attribute name
    #[must_use]
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    /// The support module
    #[must_use]
    pub fn source(&self) -> &'a Module {
        self.source
    }

    /// Top-level types named by the source module's export markers, in marker order.
    ///
    /// Markers that cannot be decoded or name a type the source does not define are skipped
    /// with a warning. A marker naming a nested type exports its top-level type.
    #[must_use]
    pub fn exported_types(&self) -> Vec<TypeDefId> {
        let mut exported = Vec::new();
        for attribute in self.source.custom_attributes_of(AttributeParent::Module) {
            let is_marker = self
                .source
                .attribute_type(attribute)
                .and_then(|handle| self.source.type_namespace_and_name(handle))
                .is_some_and(|(_, name)| name == self.marker);
            if !is_marker {
                continue;
            }

            let type_name = match decode_type_argument(&attribute.value) {
                Ok(Some(type_name)) => type_name,
                Ok(None) => {
                    log::warn!(
                        "Export marker in {} has a null type argument",
                        self.source.name()
                    );
                    continue;
                }
                Err(error) => {
                    log::warn!(
                        "Skipping undecodable export marker in {} - {}",
                        self.source.name(),
                        error
                    );
                    continue;
                }
            };

            match self.resolve_exported(&type_name) {
                Some(id) => {
                    let top_level = self.source.top_level_of(id);
                    if !exported.contains(&top_level) {
                        exported.push(top_level);
                    }
                }
                None => log::warn!(
                    "Export marker names {} which {} does not define",
                    type_name,
                    self.source.name()
                ),
            }
        }
        exported
    }

    fn resolve_exported(&self, type_name: &str) -> Option<TypeDefId> {
        let (namespace, name) = split_type_name(strip_assembly_qualifier(type_name));
        let mut segments = name.split('+');
        let mut current = self.source.top_level_type(namespace, segments.next()?)?;
        for nested in segments {
            current = self.source.nested_type(current, nested)?;
        }
        Some(current)
    }

    /// Clone every exported type `destination` lacks.
    ///
    /// # Errors
    /// Returns [`Error::ModificationInvalid`] if the source module is inconsistent or a
    /// cloned member needs a nested type that the redirected destination type lacks.
    pub fn import_into(&self, destination: &mut Module) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        let mut context = CloneContext::new(self.source, destination, &self.redirect);

        for exported in self.exported_types() {
            if context.types.contains_key(&exported) {
                continue;
            }

            let full_name = self.source.type_def_full_name(exported);
            if context.redirected(exported).is_some() {
                log::debug!(
                    "{} already defines {}, not importing",
                    context.destination.name(),
                    full_name
                );
                summary.skipped.push(full_name);
                continue;
            }

            context.clone_type(exported)?;
        }
        context.drain()?;

        summary.cloned_types = context.types.len();
        summary.imported = context
            .roots
            .iter()
            .map(|root| context.destination.type_def_full_name(*root))
            .collect();
        for name in &summary.imported {
            log::debug!("Imported {} into {}", name, context.destination.name());
        }
        Ok(summary)
    }
}

/// Deferred cloning work, processed after the member lists of all types exist
enum Pending {
    Body(MethodId, MethodId),
    Attributes(AttributeParent, AttributeParent),
    Overrides(TypeDefId, TypeDefId),
}

struct CloneContext<'s, 'd, R> {
    source: &'s Module,
    destination: &'d mut Module,
    redirect: &'s R,
    types: HashMap<TypeDefId, TypeDefId>,
    fields: HashMap<FieldId, FieldId>,
    methods: HashMap<MethodId, MethodId>,
    params: HashMap<ParamId, ParamId>,
    signatures: HashMap<StandAloneSigId, StandAloneSigId>,
    roots: Vec<TypeDefId>,
    pending: VecDeque<Pending>,
}

fn missing(what: &str, token: impl std::fmt::Display) -> Error {
    Error::ModificationInvalid(format!("Support module has no {what} {token}"))
}

impl<'s, 'd, R: ReferenceRedirect> CloneContext<'s, 'd, R> {
    fn new(source: &'s Module, destination: &'d mut Module, redirect: &'s R) -> Self {
        CloneContext {
            source,
            destination,
            redirect,
            types: HashMap::new(),
            fields: HashMap::new(),
            methods: HashMap::new(),
            params: HashMap::new(),
            signatures: HashMap::new(),
            roots: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    /// The existing destination equivalent of a source type, nested types included
    fn redirected(&self, id: TypeDefId) -> Option<TypeDefId> {
        let source_type = self.source.type_def(id)?;
        match source_type.enclosing {
            None => self.redirect.redirect(&*self.destination, self.source, id),
            Some(enclosing) => {
                let enclosing = self.redirected(enclosing)?;
                self.destination.nested_type(enclosing, &source_type.name)
            }
        }
    }

    /// A module without a manifest falls back to its file name
    fn is_destination_assembly(&self, assembly: &str) -> bool {
        match self.destination.assembly() {
            Some(manifest) => manifest.name.eq_ignore_ascii_case(assembly),
            None => Path::new(self.destination.name())
                .file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(|stem| stem.eq_ignore_ascii_case(assembly)),
        }
    }

    /// Clone a top-level source type with all of its nested types and members
    fn clone_type(&mut self, top_level: TypeDefId) -> Result<TypeDefId> {
        let mut allocated = Vec::new();
        let root = self.allocate(top_level, None, &mut allocated)?;
        self.roots.push(root);
        for (source, destination) in allocated {
            self.clone_members(source, destination)?;
        }
        Ok(root)
    }

    fn allocate(
        &mut self,
        id: TypeDefId,
        enclosing: Option<TypeDefId>,
        allocated: &mut Vec<(TypeDefId, TypeDefId)>,
    ) -> Result<TypeDefId> {
        let source = self.source;
        let source_type = source.type_def(id).ok_or_else(|| missing("type", id.token()))?;

        let mut type_def = TypeDef::new(
            source_type.flags,
            source_type.namespace.clone(),
            source_type.name.clone(),
        );
        type_def.enclosing = enclosing;
        type_def.layout = source_type.layout;
        let clone = self.destination.push_type_def(type_def);
        self.types.insert(id, clone);
        allocated.push((id, clone));

        for nested in &source_type.nested {
            self.allocate(*nested, Some(clone), allocated)?;
        }
        Ok(clone)
    }

    fn clone_members(&mut self, id: TypeDefId, clone: TypeDefId) -> Result<()> {
        let source = self.source;
        let source_type = source.type_def(id).ok_or_else(|| missing("type", id.token()))?;
        self.pending.push_back(Pending::Attributes(
            AttributeParent::TypeDef(id),
            AttributeParent::TypeDef(clone),
        ));

        let extends = source_type
            .extends
            .map(|base| self.map_type(base))
            .transpose()?;
        if let Some(type_def) = self.destination.type_def_mut(clone) {
            type_def.extends = extends;
        }

        self.clone_generic_params(GenericParamOwner::Type(id), GenericParamOwner::Type(clone))?;
        for (interface_id, item) in source.interface_impls().filter(|(_, item)| item.class == id) {
            let interface = self.map_type(item.interface)?;
            let new_interface = self.destination.add_interface_impl(clone, interface);
            self.pending.push_back(Pending::Attributes(
                AttributeParent::InterfaceImpl(interface_id),
                AttributeParent::InterfaceImpl(new_interface),
            ));
        }
        self.clone_security(SecurityParent::TypeDef(id), SecurityParent::TypeDef(clone));

        for field_id in &source_type.fields {
            let field = source
                .field(*field_id)
                .ok_or_else(|| missing("field", field_id.token()))?;
            let signature = self.map_sig(&field.signature)?;
            let mut new_field = Field::new(clone, field.flags, field.name.clone(), signature);
            new_field.offset = field.offset;
            new_field.constant = field.constant.clone();
            new_field.marshal = field.marshal.clone();
            if field.initial_value.is_some() {
                let data = source.field_data(*field_id).ok_or_else(|| {
                    Error::ModificationInvalid(format!(
                        "Initial data of {}::{} cannot be read",
                        source.type_def_full_name(id),
                        field.name
                    ))
                })?;
                new_field.initial_value = Some(FieldData::Bytes(data.to_vec()));
            }

            let new_field = self.destination.push_field(new_field);
            self.fields.insert(*field_id, new_field);
            self.pending.push_back(Pending::Attributes(
                AttributeParent::Field(*field_id),
                AttributeParent::Field(new_field),
            ));
        }

        for method_id in &source_type.methods {
            let method = source
                .method(*method_id)
                .ok_or_else(|| missing("method", method_id.token()))?;
            let signature = self.map_method_sig(&method.signature)?;
            let mut new_method = Method::new(clone, method.flags, method.name.clone(), signature);
            new_method.impl_flags = method.impl_flags;
            if let Some(pinvoke) = &method.pinvoke {
                let scope = source
                    .module_ref(pinvoke.scope)
                    .ok_or_else(|| missing("module reference", pinvoke.scope.token()))?;
                new_method.pinvoke = Some(PInvokeMap {
                    flags: pinvoke.flags,
                    import_name: pinvoke.import_name.clone(),
                    scope: self.destination.references().module_ref(&scope.name),
                });
            }
            let new_method = self.destination.push_method(new_method);
            self.methods.insert(*method_id, new_method);

            self.clone_generic_params(
                GenericParamOwner::Method(*method_id),
                GenericParamOwner::Method(new_method),
            )?;
            self.clone_security(
                SecurityParent::Method(*method_id),
                SecurityParent::Method(new_method),
            );

            for param_id in &method.params {
                let param = source
                    .param(*param_id)
                    .ok_or_else(|| missing("parameter", param_id.token()))?;
                let new_param = self.destination.push_param(Param {
                    owner: new_method,
                    flags: param.flags,
                    sequence: param.sequence,
                    name: param.name.clone(),
                    constant: param.constant.clone(),
                    marshal: param.marshal.clone(),
                });
                self.params.insert(*param_id, new_param);
                self.pending.push_back(Pending::Attributes(
                    AttributeParent::Param(*param_id),
                    AttributeParent::Param(new_param),
                ));
            }

            if method.body.is_some() {
                self.pending
                    .push_back(Pending::Body(*method_id, new_method));
            }
            self.pending.push_back(Pending::Attributes(
                AttributeParent::Method(*method_id),
                AttributeParent::Method(new_method),
            ));
        }

        for property_id in &source_type.properties {
            let property = source
                .property(*property_id)
                .ok_or_else(|| missing("property", property_id.token()))?;
            let signature = self.map_property_sig(&property.signature)?;
            let semantics = self.map_semantics(&property.semantics)?;
            let new_property = self.destination.push_property(Property {
                owner: clone,
                flags: property.flags,
                name: property.name.clone(),
                signature,
                constant: property.constant.clone(),
                semantics,
            });
            self.pending.push_back(Pending::Attributes(
                AttributeParent::Property(*property_id),
                AttributeParent::Property(new_property),
            ));
        }

        for event_id in &source_type.events {
            let event = source
                .event(*event_id)
                .ok_or_else(|| missing("event", event_id.token()))?;
            let event_type = event
                .event_type
                .map(|handle| self.map_type(handle))
                .transpose()?;
            let semantics = self.map_semantics(&event.semantics)?;
            let new_event = self.destination.push_event(Event {
                owner: clone,
                flags: event.flags,
                name: event.name.clone(),
                event_type,
                semantics,
            });
            self.pending.push_back(Pending::Attributes(
                AttributeParent::Event(*event_id),
                AttributeParent::Event(new_event),
            ));
        }

        if !source_type.overrides.is_empty() {
            self.pending.push_back(Pending::Overrides(id, clone));
        }
        Ok(())
    }

    fn clone_generic_params(
        &mut self,
        owner: GenericParamOwner,
        clone: GenericParamOwner,
    ) -> Result<()> {
        let source = self.source;
        for param_id in source.generic_params_of(owner) {
            let param = source
                .generic_param(param_id)
                .ok_or_else(|| missing("generic parameter", param_id.token()))?;
            let new_param = self.destination.add_generic_param(GenericParam {
                owner: clone,
                number: param.number,
                flags: param.flags,
                name: param.name.clone(),
            });
            self.pending.push_back(Pending::Attributes(
                AttributeParent::GenericParam(param_id),
                AttributeParent::GenericParam(new_param),
            ));

            for (constraint_id, constraint) in source
                .generic_param_constraints()
                .filter(|(_, constraint)| constraint.owner == param_id)
            {
                let mapped = self.map_type(constraint.constraint)?;
                let new_constraint = self.destination.add_generic_param_constraint(new_param, mapped);
                self.pending.push_back(Pending::Attributes(
                    AttributeParent::GenericParamConstraint(constraint_id),
                    AttributeParent::GenericParamConstraint(new_constraint),
                ));
            }
        }
        Ok(())
    }

    fn clone_security(&mut self, parent: SecurityParent, clone: SecurityParent) {
        let source = self.source;
        for (security_id, security) in source
            .decl_securities()
            .filter(|(_, security)| security.parent == parent)
        {
            let new_security = self.destination.add_decl_security(DeclSecurity {
                parent: clone,
                action: security.action,
                permission_set: security.permission_set.clone(),
            });
            self.pending.push_back(Pending::Attributes(
                AttributeParent::DeclSecurity(security_id),
                AttributeParent::DeclSecurity(new_security),
            ));
        }
    }

    /// Accessors belong to the declaring type, whose methods are cloned first
    fn map_semantics(&self, semantics: &[MethodSemantic]) -> Result<Vec<MethodSemantic>> {
        semantics
            .iter()
            .map(|semantic| {
                let method = self.methods.get(&semantic.method).copied().ok_or_else(|| {
                    Error::ModificationInvalid(format!(
                        "Accessor {} is not declared by the type that uses it",
                        semantic.method.token()
                    ))
                })?;
                Ok(MethodSemantic {
                    attributes: semantic.attributes,
                    method,
                })
            })
            .collect()
    }

    fn clone_overrides(&mut self, id: TypeDefId, clone: TypeDefId) -> Result<()> {
        let source = self.source;
        let source_type = source.type_def(id).ok_or_else(|| missing("type", id.token()))?;
        for item in &source_type.overrides {
            let body = self.map_method(item.body)?;
            let declaration = self.map_method(item.declaration)?;
            if let Some(type_def) = self.destination.type_def_mut(clone) {
                type_def.overrides.push(MethodOverride { body, declaration });
            }
        }
        Ok(())
    }

    /// Process deferred bodies and attributes; types discovered here are cloned on the spot
    /// and queue their own work
    fn drain(&mut self) -> Result<()> {
        while let Some(work) = self.pending.pop_front() {
            match work {
                Pending::Body(source, clone) => self.clone_body(source, clone)?,
                Pending::Attributes(source, clone) => self.clone_attributes(source, clone)?,
                Pending::Overrides(source, clone) => self.clone_overrides(source, clone)?,
            }
        }
        Ok(())
    }

    fn map_type_def(&mut self, id: TypeDefId) -> Result<TypeDefId> {
        if let Some(clone) = self.types.get(&id) {
            return Ok(*clone);
        }
        if let Some(existing) = self.redirected(id) {
            return Ok(existing);
        }

        let top_level = self.source.top_level_of(id);
        if top_level != id && self.redirected(top_level).is_some() {
            return Err(Error::ModificationInvalid(format!(
                "{} defines {} but not its nested type {}",
                self.destination.name(),
                self.source.type_def_full_name(top_level),
                self.source.type_def_full_name(id)
            )));
        }

        self.clone_type(top_level)?;
        self.types
            .get(&id)
            .copied()
            .ok_or_else(|| missing("type", id.token()))
    }

    fn map_type(&mut self, handle: TypeDefOrRef) -> Result<TypeDefOrRef> {
        match handle {
            TypeDefOrRef::Def(id) => Ok(TypeDefOrRef::Def(self.map_type_def(id)?)),
            TypeDefOrRef::Ref(id) => self.map_type_ref(id),
            TypeDefOrRef::Spec(id) => {
                let source = self.source;
                let sig = source
                    .type_spec(id)
                    .ok_or_else(|| missing("type spec", id.token()))?;
                let sig = self.map_sig(sig)?;
                Ok(TypeDefOrRef::Spec(self.destination.references().type_spec(sig)))
            }
        }
    }

    fn map_type_ref(&mut self, id: TypeRefId) -> Result<TypeDefOrRef> {
        let source = self.source;
        let type_ref = source
            .type_ref(id)
            .ok_or_else(|| missing("type reference", id.token()))?;

        let scope = match type_ref.scope {
            ResolutionScope::AssemblyRef(assembly) => {
                let assembly_ref = source
                    .assembly_ref(assembly)
                    .ok_or_else(|| missing("assembly reference", assembly.token()))?;
                if self.is_destination_assembly(&assembly_ref.name) {
                    if let Some(local) = self
                        .destination
                        .top_level_type(&type_ref.namespace, &type_ref.name)
                    {
                        return Ok(TypeDefOrRef::Def(local));
                    }
                }
                ResolutionScope::AssemblyRef(self.destination.references().assembly_ref(assembly_ref))
            }
            ResolutionScope::TypeRef(enclosing) => match self.map_type_ref(enclosing)? {
                TypeDefOrRef::Ref(enclosing) => ResolutionScope::TypeRef(enclosing),
                TypeDefOrRef::Def(enclosing) => {
                    return self
                        .destination
                        .nested_type(enclosing, &type_ref.name)
                        .map(TypeDefOrRef::Def)
                        .ok_or_else(|| {
                            Error::ModificationInvalid(format!(
                                "{} has no nested type {}",
                                self.destination.type_def_full_name(enclosing),
                                type_ref.name
                            ))
                        });
                }
                TypeDefOrRef::Spec(_) => {
                    return Err(Error::ModificationInvalid(format!(
                        "Type reference {} is nested in a type specification",
                        id.token()
                    )))
                }
            },
            ResolutionScope::Module => {
                let local = source
                    .top_level_type(&type_ref.namespace, &type_ref.name)
                    .ok_or_else(|| missing("type", source.type_ref_full_name(id)))?;
                return Ok(TypeDefOrRef::Def(self.map_type_def(local)?));
            }
            ResolutionScope::None => ResolutionScope::None,
        };

        Ok(TypeDefOrRef::Ref(self.destination.references().type_ref(
            scope,
            &type_ref.namespace,
            &type_ref.name,
        )))
    }

    fn map_sig(&mut self, sig: &TypeSig) -> Result<TypeSig> {
        sig.try_map_types(&mut |handle| self.map_type(handle))
    }

    fn map_method_sig(&mut self, sig: &MethodSig) -> Result<MethodSig> {
        sig.try_map_types(&mut |handle| self.map_type(handle))
    }

    fn map_member_sig(&mut self, sig: &MemberSig) -> Result<MemberSig> {
        sig.try_map_types(&mut |handle| self.map_type(handle))
    }

    fn map_property_sig(&mut self, sig: &PropertySig) -> Result<PropertySig> {
        sig.try_map_types(&mut |handle| self.map_type(handle))
    }

    fn map_member_parent(&mut self, parent: MemberRefParent) -> Result<MemberRefParent> {
        match parent {
            MemberRefParent::Type(handle) => Ok(MemberRefParent::Type(self.map_type(handle)?)),
            MemberRefParent::ModuleRef(id) => {
                let source = self.source;
                let module_ref = source
                    .module_ref(id)
                    .ok_or_else(|| missing("module reference", id.token()))?;
                Ok(MemberRefParent::ModuleRef(
                    self.destination.references().module_ref(&module_ref.name),
                ))
            }
            MemberRefParent::Method(id) => match self.map_method(MethodRef::Def(id))? {
                MethodRef::Def(id) => Ok(MemberRefParent::Method(id)),
                other => Err(Error::ModificationInvalid(format!(
                    "Call site signature parent mapped to {}",
                    other.token()
                ))),
            },
        }
    }

    fn map_method(&mut self, method: MethodRef) -> Result<MethodRef> {
        let source = self.source;
        match method {
            MethodRef::Def(id) => {
                if let Some(clone) = self.methods.get(&id) {
                    return Ok(MethodRef::Def(*clone));
                }
                let source_method = source
                    .method(id)
                    .ok_or_else(|| missing("method", id.token()))?;
                let owner = self.map_type_def(source_method.owner)?;
                if let Some(clone) = self.methods.get(&id) {
                    return Ok(MethodRef::Def(*clone));
                }

                // the owner was redirected to an existing type
                let signature = self.map_method_sig(&source_method.signature)?;
                let existing = self.destination.type_def(owner).and_then(|owner| {
                    owner.methods.iter().copied().find(|candidate| {
                        self.destination.method(*candidate).is_some_and(|candidate| {
                            candidate.name == source_method.name && candidate.signature == signature
                        })
                    })
                });
                match existing {
                    Some(existing) => Ok(MethodRef::Def(existing)),
                    None => Ok(MethodRef::Ref(self.destination.references().member_ref(
                        TypeDefOrRef::Def(owner),
                        &source_method.name,
                        MemberSig::Method(signature),
                    ))),
                }
            }
            MethodRef::Ref(id) => {
                let member_ref = source
                    .member_ref(id)
                    .ok_or_else(|| missing("member reference", id.token()))?;
                let parent = self.map_member_parent(member_ref.parent)?;
                let signature = self.map_member_sig(&member_ref.signature)?;
                Ok(MethodRef::Ref(self.destination.references().member_ref(
                    parent,
                    &member_ref.name,
                    signature,
                )))
            }
            MethodRef::Spec(id) => {
                let spec = source
                    .method_spec(id)
                    .ok_or_else(|| missing("method spec", id.token()))?;
                let generic = self.map_method(spec.method)?;
                let instantiation = spec
                    .instantiation
                    .iter()
                    .map(|arg| self.map_sig(arg))
                    .collect::<Result<Vec<_>>>()?;
                Ok(MethodRef::Spec(
                    self.destination.references().method_spec(generic, instantiation),
                ))
            }
        }
    }

    fn map_field(&mut self, field: FieldRef) -> Result<FieldRef> {
        let source = self.source;
        match field {
            FieldRef::Def(id) => {
                if let Some(clone) = self.fields.get(&id) {
                    return Ok(FieldRef::Def(*clone));
                }
                let source_field = source
                    .field(id)
                    .ok_or_else(|| missing("field", id.token()))?;
                let owner = self.map_type_def(source_field.owner)?;
                if let Some(clone) = self.fields.get(&id) {
                    return Ok(FieldRef::Def(*clone));
                }

                let signature = self.map_sig(&source_field.signature)?;
                let existing = self.destination.type_def(owner).and_then(|owner| {
                    owner.fields.iter().copied().find(|candidate| {
                        self.destination
                            .field(*candidate)
                            .is_some_and(|candidate| candidate.name == source_field.name)
                    })
                });
                match existing {
                    Some(existing) => Ok(FieldRef::Def(existing)),
                    None => Ok(FieldRef::Ref(self.destination.references().member_ref(
                        TypeDefOrRef::Def(owner),
                        &source_field.name,
                        MemberSig::Field(signature),
                    ))),
                }
            }
            FieldRef::Ref(id) => {
                let member_ref = source
                    .member_ref(id)
                    .ok_or_else(|| missing("member reference", id.token()))?;
                let parent = self.map_member_parent(member_ref.parent)?;
                let signature = self.map_member_sig(&member_ref.signature)?;
                Ok(FieldRef::Ref(self.destination.references().member_ref(
                    parent,
                    &member_ref.name,
                    signature,
                )))
            }
        }
    }

    fn map_standalone_sig(&mut self, id: StandAloneSigId) -> Result<StandAloneSigId> {
        if let Some(clone) = self.signatures.get(&id) {
            return Ok(*clone);
        }

        let source = self.source;
        let sig = match source
            .standalone_sig(id)
            .ok_or_else(|| missing("signature", id.token()))?
        {
            StandAloneSig::Locals(locals) => StandAloneSig::Locals(
                locals
                    .iter()
                    .map(|local| self.map_sig(local))
                    .collect::<Result<Vec<_>>>()?,
            ),
            StandAloneSig::Method(method) => StandAloneSig::Method(self.map_method_sig(method)?),
        };

        let clone = self.destination.push_standalone_sig(sig);
        self.signatures.insert(id, clone);
        Ok(clone)
    }

    fn map_operand(&mut self, operand: &Operand) -> Result<Operand> {
        Ok(match operand {
            Operand::Type(handle) => Operand::Type(self.map_type(*handle)?),
            Operand::Method(method) => Operand::Method(self.map_method(*method)?),
            Operand::Field(field) => Operand::Field(self.map_field(*field)?),
            Operand::Token(TokenRef::Type(handle)) => {
                Operand::Token(TokenRef::Type(self.map_type(*handle)?))
            }
            Operand::Token(TokenRef::Method(method)) => {
                Operand::Token(TokenRef::Method(self.map_method(*method)?))
            }
            Operand::Token(TokenRef::Field(field)) => {
                Operand::Token(TokenRef::Field(self.map_field(*field)?))
            }
            Operand::Signature(sig) => Operand::Signature(self.map_standalone_sig(*sig)?),
            other => other.clone(),
        })
    }

    fn clone_body(&mut self, id: MethodId, clone: MethodId) -> Result<()> {
        let source = self.source;
        let Some(body) = source.method(id).and_then(|method| method.body.as_ref()) else {
            return Ok(());
        };

        let local_sig = body
            .local_sig
            .map(|sig| self.map_standalone_sig(sig))
            .transpose()?;

        let mut instructions = Vec::with_capacity(body.instructions.len());
        for instruction in &body.instructions {
            instructions.push(Instruction {
                offset: instruction.offset,
                opcode: instruction.opcode,
                operand: self.map_operand(&instruction.operand)?,
            });
        }

        let mut exception_handlers = Vec::with_capacity(body.exception_handlers.len());
        for handler in &body.exception_handlers {
            let kind = match handler.kind {
                HandlerKind::Catch(handle) => HandlerKind::Catch(self.map_type(handle)?),
                other => other,
            };
            exception_handlers.push(ExceptionHandler { kind, ..*handler });
        }

        if let Some(method) = self.destination.method_mut(clone) {
            method.body = Some(MethodBody {
                max_stack: body.max_stack,
                init_locals: body.init_locals,
                local_sig,
                instructions,
                exception_handlers,
            });
        }
        Ok(())
    }

    fn clone_attributes(&mut self, parent: AttributeParent, clone: AttributeParent) -> Result<()> {
        let source = self.source;
        for attribute in source.custom_attributes_of(parent) {
            let constructor = match attribute.constructor {
                AttributeConstructor::Def(id) => match self.map_method(MethodRef::Def(id))? {
                    MethodRef::Def(id) => AttributeConstructor::Def(id),
                    MethodRef::Ref(id) => AttributeConstructor::Ref(id),
                    MethodRef::Spec(id) => {
                        return Err(Error::ModificationInvalid(format!(
                            "Attribute constructor mapped to method spec {}",
                            id.token()
                        )))
                    }
                },
                AttributeConstructor::Ref(id) => match self.map_method(MethodRef::Ref(id))? {
                    MethodRef::Ref(id) => AttributeConstructor::Ref(id),
                    other => {
                        return Err(Error::ModificationInvalid(format!(
                            "Attribute constructor mapped to {}",
                            other.token()
                        )))
                    }
                },
            };
            self.destination
                .add_custom_attribute(clone, constructor, attribute.value.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::OpCode,
        metadata::{
            attributes::{encode_type_argument, parameterless_value},
            builders::{AssemblyRefBuilder, FieldBuilder, MethodDefBuilder, TypeDefBuilder},
        },
    };

    /// A support module exporting `NS.A` and `NS.B`, where `A` has a field of type `B`
    fn support() -> Module {
        let mut module = Module::new("Support.dll");
        let corlib = AssemblyRefBuilder::new()
            .name("System.Runtime")
            .build(&mut module)
            .unwrap();
        let attribute = module.references().type_ref(
            ResolutionScope::AssemblyRef(corlib),
            "System",
            "Attribute",
        );

        let a = TypeDefBuilder::new()
            .namespace("NS")
            .name("A")
            .extends(TypeDefOrRef::Ref(attribute))
            .build(&mut module)
            .unwrap();
        let b = TypeDefBuilder::new()
            .namespace("NS")
            .name("B")
            .build(&mut module)
            .unwrap();
        let helper = TypeDefBuilder::new()
            .name("Helper")
            .nested_in(a)
            .build(&mut module)
            .unwrap();
        FieldBuilder::new()
            .name("other")
            .owner(a)
            .signature(TypeSig::Class(TypeDefOrRef::Def(b)))
            .build(&mut module)
            .unwrap();
        FieldBuilder::new()
            .name("back")
            .owner(b)
            .signature(TypeSig::Class(TypeDefOrRef::Def(a)))
            .build(&mut module)
            .unwrap();

        let helper_ctor = MethodDefBuilder::new()
            .constructor()
            .owner(helper)
            .build(&mut module)
            .unwrap();
        let base_ctor = module.references().member_ref(
            TypeDefOrRef::Ref(attribute),
            ".ctor",
            MemberSig::Method(MethodSig::parameterless_constructor()),
        );
        let op = |mnemonic: &str| OpCode::by_mnemonic(mnemonic).unwrap();
        MethodDefBuilder::new()
            .constructor()
            .owner(a)
            .body(MethodBody::new(vec![
                Instruction::new(op("ldarg.0"), Operand::None),
                Instruction::new(op("call"), Operand::Method(MethodRef::Ref(base_ctor))),
                Instruction::new(op("newobj"), Operand::Method(MethodRef::Def(helper_ctor))),
                Instruction::new(op("pop"), Operand::None),
                Instruction::new(op("ret"), Operand::None),
            ]))
            .build(&mut module)
            .unwrap();

        let tag = TypeDefBuilder::new()
            .namespace("NS")
            .name("TagAttribute")
            .extends(TypeDefOrRef::Ref(attribute))
            .build(&mut module)
            .unwrap();
        let tag_ctor = MethodDefBuilder::new()
            .constructor()
            .owner(tag)
            .build(&mut module)
            .unwrap();
        module.add_custom_attribute(
            AttributeParent::TypeDef(a),
            AttributeConstructor::Def(tag_ctor),
            parameterless_value(),
        );

        let marker = TypeDefBuilder::new()
            .namespace("Support")
            .name(DEFAULT_EXPORT_MARKER)
            .build(&mut module)
            .unwrap();
        let marker_ctor = MethodDefBuilder::new()
            .constructor()
            .owner(marker)
            .build(&mut module)
            .unwrap();
        for exported in ["NS.A", "NS.B, Support, Version=1.0.0.0", "NS.Missing"] {
            module.add_custom_attribute(
                AttributeParent::Module,
                AttributeConstructor::Def(marker_ctor),
                encode_type_argument(exported),
            );
        }
        module.add_custom_attribute(
            AttributeParent::Module,
            AttributeConstructor::Def(marker_ctor),
            vec![0xFF],
        );
        module
    }

    fn target() -> Module {
        let mut module = Module::new("UnityEngine.dll");
        AssemblyRefBuilder::new()
            .name("System.Runtime")
            .build(&mut module)
            .unwrap();
        TypeDefBuilder::new()
            .namespace("UnityEngine")
            .name("Object")
            .build(&mut module)
            .unwrap();
        module
    }

    #[test]
    fn exported_types_skip_bad_markers() {
        let support = support();
        let importer = TypeImporter::new(&support);
        let names: Vec<String> = importer
            .exported_types()
            .into_iter()
            .map(|id| support.type_def_full_name(id))
            .collect();
        assert_eq!(names, vec!["NS.A", "NS.B"]);

        assert!(importer.with_marker("OtherMarker").exported_types().is_empty());
    }

    #[test]
    fn clones_missing_types() {
        let support = support();
        let mut target = target();
        let summary = TypeImporter::new(&support).import_into(&mut target).unwrap();

        // the attribute on `A` drags its type along
        assert_eq!(summary.imported, vec!["NS.A", "NS.B", "NS.TagAttribute"]);
        assert!(summary.skipped.is_empty());
        assert_eq!(summary.cloned_types, 4);

        let a = target.top_level_type("NS", "A").unwrap();
        let b = target.top_level_type("NS", "B").unwrap();
        let helper = target.nested_type(a, "Helper").unwrap();
        assert_eq!(target.type_def_full_name(helper), "NS.A+Helper");

        let field = target.type_def(a).unwrap().fields[0];
        assert_eq!(
            target.field(field).unwrap().signature,
            TypeSig::Class(TypeDefOrRef::Def(b))
        );

        let a_ctor = target.type_def(a).unwrap().methods[0];
        let helper_ctor = target.type_def(helper).unwrap().methods[0];
        let body = target.method(a_ctor).unwrap().body.as_ref().unwrap();
        assert_eq!(
            body.instructions[2].operand,
            Operand::Method(MethodRef::Def(helper_ctor))
        );
        let Operand::Method(MethodRef::Ref(base_ctor)) = body.instructions[1].operand else {
            panic!("base constructor call was not translated");
        };
        assert_eq!(
            target.type_full_name(target.member_ref(base_ctor).unwrap().parent.type_handle().unwrap()),
            "System.Attribute"
        );
        // the corlib reference is reused, not duplicated
        assert_eq!(target.assembly_refs().count(), 1);

        let tag = target.top_level_type("NS", "TagAttribute").unwrap();
        assert!(target.has_custom_attribute(AttributeParent::TypeDef(a), "NS", "TagAttribute"));
        assert!(target.type_def(tag).unwrap().extends.is_some());
        assert!(target.top_level_type("Support", DEFAULT_EXPORT_MARKER).is_none());

        let bytes = target.to_bytes().unwrap();
        assert!(Module::from_bytes(&bytes).is_ok());
    }

    #[test]
    fn existing_types_are_reused() {
        let support = support();
        let mut target = target();
        let existing_b = TypeDefBuilder::new()
            .namespace("NS")
            .name("B")
            .build(&mut target)
            .unwrap();

        let summary = TypeImporter::new(&support).import_into(&mut target).unwrap();
        assert_eq!(summary.skipped, vec!["NS.B"]);
        assert_eq!(summary.imported.first().map(String::as_str), Some("NS.A"));

        let b_count = target
            .type_defs()
            .filter(|(_, t)| t.enclosing.is_none() && t.namespace == "NS" && t.name == "B")
            .count();
        assert_eq!(b_count, 1);

        let a = target.top_level_type("NS", "A").unwrap();
        let field = target.type_def(a).unwrap().fields[0];
        assert_eq!(
            target.field(field).unwrap().signature,
            TypeSig::Class(TypeDefOrRef::Def(existing_b))
        );
    }

    #[test]
    fn second_import_is_a_no_op() {
        let support = support();
        let mut target = target();
        let importer = TypeImporter::new(&support);
        importer.import_into(&mut target).unwrap();
        let once = target.to_bytes().unwrap();

        let summary = importer.import_into(&mut target).unwrap();
        assert!(summary.is_empty());
        assert_eq!(summary.skipped, vec!["NS.A", "NS.B"]);
        assert_eq!(target.to_bytes().unwrap(), once);
    }

    struct NeverRedirect;

    impl ReferenceRedirect for NeverRedirect {
        fn redirect(&self, _: &Module, _: &Module, _: TypeDefId) -> Option<TypeDefId> {
            None
        }
    }

    #[test]
    fn custom_redirect_strategy() {
        let support = support();
        let mut target = target();
        TypeDefBuilder::new()
            .namespace("NS")
            .name("B")
            .build(&mut target)
            .unwrap();

        let summary = TypeImporter::new(&support)
            .with_redirect(NeverRedirect)
            .import_into(&mut target)
            .unwrap();
        assert!(summary.skipped.is_empty());
        assert!(summary.imported.contains(&"NS.B".to_string()));
    }
}
