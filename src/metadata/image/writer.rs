//! Image serialization.
//!
//! The new `.meta` section holds, in order: method bodies (4-aligned), initial field data
//! (8-aligned) and the metadata root. Bodies are encoded first because `ldstr` operands
//! fill the `#US` heap. Rows are collected per table while the other heaps are interned,
//! then the tables stream is sized from the final row counts and heap lengths and every
//! table is written in table order.
//!
//! When the previous `.meta` section can be dropped, its slot is reused. Field data that
//! lived in that slot is copied into the new content, which needs the size of the field's
//! type; if any such size is unknown the section is appended after the old one instead.

use std::ops::Range;

use strum::{EnumCount, IntoEnumIterator};

use crate::{
    assembly::encode_method_body,
    file::{io::write_le, pe::PeImage},
    metadata::{
        handles::{AttributeParent, TypeDefOrRef},
        image::{TABLES_MAJOR_VERSION, TABLES_MINOR_VERSION},
        module::{FieldData, Module},
        root::Root,
        signatures::{
            encode_field_sig, encode_member_sig, encode_method_sig, encode_method_spec,
            encode_property_sig, encode_standalone_sig, encode_type_sig,
        },
        streams::{BlobHeapBuilder, GuidHeapBuilder, StringHeapBuilder, UserStringHeapBuilder},
        tables::{
            CodedIndexType, Row, TableInfo, HEAP_LARGE_BLOB, HEAP_LARGE_GUID,
            HEAP_LARGE_STRINGS, SORTED_TABLES,
        },
        token::{TableId, Token},
    },
    Error, Result,
};

/// Serialize `module` into a PE image.
///
/// A module read from disk is written into its own container; a module built in memory
/// gets a minimal IL-only skeleton.
///
/// # Errors
/// Returns a malformed error if a member list disagrees with the entities' owners or a
/// body cannot be encoded, and an out-of-bounds error if a table or heap outgrows its
/// index width.
pub(crate) fn write_image(module: &Module) -> Result<Vec<u8>> {
    let skeleton;
    let base = match module.image() {
        Some(image) => image,
        None => {
            skeleton = PeImage::skeleton(is_executable(module.name()));
            &skeleton
        }
    };

    let reusable = base
        .replaceable_section()
        .filter(|range| fields_relocatable(module, base, range));
    let placement = base.place_section(reusable.is_some());
    log::debug!(
        "Writing {} at {:#x} ({} the previous metadata section)",
        module.name(),
        placement.virtual_address,
        if placement.reuse { "replacing" } else { "keeping" }
    );

    let mut content = Vec::new();
    let mut user_strings = UserStringHeapBuilder::new();
    let mut method_rvas = Vec::with_capacity(module.methods.len());
    for method in &module.methods {
        let Some(body) = &method.body else {
            method_rvas.push(0);
            continue;
        };
        pad_to(&mut content, 4);
        method_rvas.push(content_rva(placement.virtual_address, content.len())?);
        let encoded = encode_method_body(body, &mut user_strings)
            .map_err(|error| malformed_error!("Cannot encode body of {} - {}", method.name, error))?;
        content.extend_from_slice(&encoded);
    }

    let mut field_rvas = Vec::with_capacity(module.fields.len());
    for field in &module.fields {
        let data = match &field.initial_value {
            None => {
                field_rvas.push(None);
                continue;
            }
            Some(FieldData::Rva(rva)) => match &reusable {
                Some(range) if range.contains(rva) => {
                    let size = module.field_data_size(field).ok_or(Error::NotSupported)?;
                    base.slice_at_rva(*rva, size)?
                }
                _ => {
                    field_rvas.push(Some(*rva));
                    continue;
                }
            },
            Some(FieldData::Bytes(bytes)) => bytes.as_slice(),
        };
        pad_to(&mut content, 8);
        field_rvas.push(Some(content_rva(placement.virtual_address, content.len())?));
        content.extend_from_slice(data);
    }

    let metadata = build_metadata(module, &method_rvas, &field_rvas, user_strings)?;
    pad_to(&mut content, 4);
    let metadata_rva = content_rva(placement.virtual_address, content.len())?;
    let metadata_size = u32::try_from(metadata.len()).map_err(|_| Error::OutOfBounds)?;
    content.extend_from_slice(&metadata);

    base.assemble(placement, &content, metadata_rva, metadata_size)
}

fn is_executable(name: &str) -> bool {
    std::path::Path::new(name)
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("exe"))
}

fn pad_to(out: &mut Vec<u8>, alignment: usize) {
    out.resize(out.len().next_multiple_of(alignment), 0);
}

fn content_rva(section: u32, offset: usize) -> Result<u32> {
    u32::try_from(offset)
        .ok()
        .and_then(|offset| section.checked_add(offset))
        .ok_or(Error::OutOfBounds)
}

/// Every mapped field inside `range` can be copied out of the old image
fn fields_relocatable(module: &Module, image: &PeImage, range: &Range<u32>) -> bool {
    module.fields.iter().all(|field| match field.initial_value {
        Some(FieldData::Rva(rva)) if range.contains(&rva) => module.field_data_size(field)
            .is_some_and(|size| image.slice_at_rva(rva, size).is_ok()),
        _ => true,
    })
}

fn row_number(index: usize) -> Result<u32> {
    u32::try_from(index + 1).map_err(|_| Error::OutOfBounds)
}

fn coded(token: Token, kind: CodedIndexType) -> Result<u32> {
    TableInfo::default().encode_coded_index(token, kind)
}

/// Rows collected per table before the stream is sized
struct TableRows(Vec<Vec<Row>>);

impl TableRows {
    fn new() -> Self {
        TableRows(vec![Vec::new(); TableId::COUNT])
    }

    fn push(&mut self, table: TableId, values: &[u32]) {
        let mut row = Row::default();
        row[..values.len()].copy_from_slice(values);
        self.0[table as usize].push(row);
    }

    fn get(&self, table: TableId) -> &[Row] {
        &self.0[table as usize]
    }
}

/// Where the members of each owner start, and the logical order when it is not the
/// physical one
#[derive(Debug, PartialEq, Eq)]
struct MemberLists {
    starts: Vec<u32>,
    indirection: Option<Vec<u32>>,
}

/// Lay out the lists of one member table.
///
/// `lists` pairs each owner with the member rows it lists, `declared` holds the owner each
/// member row names itself. Every row must be listed exactly once, by its own owner.
fn member_lists(lists: &[(usize, Vec<usize>)], declared: &[usize], table: TableId) -> Result<MemberLists> {
    let mut listed = vec![false; declared.len()];
    let mut logical = Vec::with_capacity(declared.len());
    let mut starts = Vec::with_capacity(lists.len());

    for (owner, members) in lists {
        starts.push(row_number(logical.len())?);
        for member in members.iter().copied() {
            match declared.get(member) {
                Some(declared_owner) if declared_owner == owner => {}
                Some(_) => {
                    return Err(malformed_error!(
                        "{} row {} is listed by an owner it does not belong to",
                        table,
                        member + 1
                    ))
                }
                None => return Err(Error::InvalidToken(Token::from_parts(table, row_number(member)?))),
            }
            if std::mem::replace(&mut listed[member], true) {
                return Err(malformed_error!("{} row {} is listed more than once", table, member + 1));
            }
            logical.push(member);
        }
    }

    if let Some(missing) = listed.iter().position(|listed| !listed) {
        return Err(malformed_error!("{} row {} is not listed by its owner", table, missing + 1));
    }

    let indirection = if logical.iter().enumerate().all(|(row, member)| row == *member) {
        None
    } else {
        Some(logical.into_iter().map(row_number).collect::<Result<_>>()?)
    };
    Ok(MemberLists { starts, indirection })
}

/// Row order of a sorted table and the new 1-based row of each arena entry
fn sorted_order<K: Ord>(keys: &[K]) -> Result<(Vec<usize>, Vec<u32>)> {
    let mut order: Vec<usize> = (0..keys.len()).collect();
    order.sort_by(|a, b| keys[*a].cmp(&keys[*b]));

    let mut rows = vec![0; keys.len()];
    for (position, index) in order.iter().enumerate() {
        rows[*index] = row_number(position)?;
    }
    Ok((order, rows))
}

fn remapped(rows: &[u32], table: TableId, index: usize) -> Result<Token> {
    match rows.get(index) {
        Some(row) => Ok(Token::from_parts(table, *row)),
        None => Err(Error::InvalidToken(Token::from_parts(table, row_number(index)?))),
    }
}

#[allow(clippy::too_many_lines)]
fn build_metadata(
    module: &Module,
    method_rvas: &[u32],
    field_rvas: &[Option<u32>],
    user_strings: UserStringHeapBuilder,
) -> Result<Vec<u8>> {
    let mut strings = StringHeapBuilder::new();
    let mut blobs = BlobHeapBuilder::new();
    let mut guids = GuidHeapBuilder::new();
    let mut rows = TableRows::new();

    rows.push(
        TableId::Module,
        &[0, strings.add(module.name()), guids.add(module.mvid()), 0, 0],
    );

    for type_ref in &module.type_refs {
        rows.push(
            TableId::TypeRef,
            &[
                coded(type_ref.scope.token(), CodedIndexType::ResolutionScope)?,
                strings.add(&type_ref.name),
                strings.add(&type_ref.namespace),
            ],
        );
    }

    let field_lists: Vec<(usize, Vec<usize>)> = module
        .type_defs
        .iter()
        .enumerate()
        .map(|(owner, type_def)| (owner, type_def.fields.iter().map(|id| id.index()).collect()))
        .collect();
    let declared: Vec<usize> = module.fields.iter().map(|field| field.owner.index()).collect();
    let fields = member_lists(&field_lists, &declared, TableId::Field)?;

    let method_lists: Vec<(usize, Vec<usize>)> = module
        .type_defs
        .iter()
        .enumerate()
        .map(|(owner, type_def)| (owner, type_def.methods.iter().map(|id| id.index()).collect()))
        .collect();
    let declared: Vec<usize> = module.methods.iter().map(|method| method.owner.index()).collect();
    let methods = member_lists(&method_lists, &declared, TableId::MethodDef)?;

    let param_lists: Vec<(usize, Vec<usize>)> = module
        .methods
        .iter()
        .enumerate()
        .map(|(owner, method)| (owner, method.params.iter().map(|id| id.index()).collect()))
        .collect();
    let declared: Vec<usize> = module.params.iter().map(|param| param.owner.index()).collect();
    let params = member_lists(&param_lists, &declared, TableId::Param)?;

    let property_lists: Vec<(usize, Vec<usize>)> = module
        .type_defs
        .iter()
        .enumerate()
        .filter(|(_, type_def)| !type_def.properties.is_empty())
        .map(|(owner, type_def)| (owner, type_def.properties.iter().map(|id| id.index()).collect()))
        .collect();
    let declared: Vec<usize> = module.properties.iter().map(|property| property.owner.index()).collect();
    let properties = member_lists(&property_lists, &declared, TableId::Property)?;

    let event_lists: Vec<(usize, Vec<usize>)> = module
        .type_defs
        .iter()
        .enumerate()
        .filter(|(_, type_def)| !type_def.events.is_empty())
        .map(|(owner, type_def)| (owner, type_def.events.iter().map(|id| id.index()).collect()))
        .collect();
    let declared: Vec<usize> = module.events.iter().map(|event| event.owner.index()).collect();
    let events = member_lists(&event_lists, &declared, TableId::Event)?;

    for (index, type_def) in module.type_defs.iter().enumerate() {
        let extends = type_def.extends.map_or(Token::default(), TypeDefOrRef::token);
        rows.push(
            TableId::TypeDef,
            &[
                type_def.flags.bits(),
                strings.add(&type_def.name),
                strings.add(&type_def.namespace),
                coded(extends, CodedIndexType::TypeDefOrRef)?,
                fields.starts[index],
                methods.starts[index],
            ],
        );
    }

    for (ptr, table, lists) in [
        (TableId::FieldPtr, TableId::Field, &fields),
        (TableId::MethodPtr, TableId::MethodDef, &methods),
        (TableId::ParamPtr, TableId::Param, &params),
        (TableId::PropertyPtr, TableId::Property, &properties),
        (TableId::EventPtr, TableId::Event, &events),
    ] {
        if let Some(logical) = &lists.indirection {
            log::debug!("{} lists are not in row order, writing {}", table, ptr);
            for row in logical {
                rows.push(ptr, &[*row]);
            }
        }
    }

    let mut constants = Vec::new();
    let mut marshals = Vec::new();

    for (index, field) in module.fields.iter().enumerate() {
        let token = Token::from_parts(TableId::Field, row_number(index)?);
        rows.push(
            TableId::Field,
            &[
                u32::from(field.flags.bits()),
                strings.add(&field.name),
                blobs.add(&encode_field_sig(&field.signature)),
            ],
        );
        if let Some(offset) = field.offset {
            rows.push(TableId::FieldLayout, &[offset, token.row()]);
        }
        if let Some(rva) = field_rvas.get(index).copied().flatten() {
            rows.push(TableId::FieldRVA, &[rva, token.row()]);
        }
        if let Some(constant) = &field.constant {
            constants.push((token, constant));
        }
        if let Some(descriptor) = &field.marshal {
            marshals.push((token, descriptor));
        }
    }

    for (index, method) in module.methods.iter().enumerate() {
        let token = Token::from_parts(TableId::MethodDef, row_number(index)?);
        rows.push(
            TableId::MethodDef,
            &[
                method_rvas.get(index).copied().unwrap_or(0),
                u32::from(method.impl_flags),
                u32::from(method.flags.bits()),
                strings.add(&method.name),
                blobs.add(&encode_method_sig(&method.signature)),
                params.starts[index],
            ],
        );
        if let Some(pinvoke) = &method.pinvoke {
            rows.push(
                TableId::ImplMap,
                &[
                    u32::from(pinvoke.flags),
                    coded(token, CodedIndexType::MemberForwarded)?,
                    strings.add(&pinvoke.import_name),
                    pinvoke.scope.token().row(),
                ],
            );
        }
    }

    for (index, param) in module.params.iter().enumerate() {
        let token = Token::from_parts(TableId::Param, row_number(index)?);
        rows.push(
            TableId::Param,
            &[
                u32::from(param.flags.bits()),
                u32::from(param.sequence),
                strings.add(&param.name),
            ],
        );
        if let Some(constant) = &param.constant {
            constants.push((token, constant));
        }
        if let Some(descriptor) = &param.marshal {
            marshals.push((token, descriptor));
        }
    }

    let keys: Vec<usize> = module.interface_impls.iter().map(|item| item.class.index()).collect();
    let (order, interface_rows) = sorted_order(&keys)?;
    for index in order {
        let item = &module.interface_impls[index];
        rows.push(
            TableId::InterfaceImpl,
            &[
                item.class.token().row(),
                coded(item.interface.token(), CodedIndexType::TypeDefOrRef)?,
            ],
        );
    }

    for member_ref in &module.member_refs {
        rows.push(
            TableId::MemberRef,
            &[
                coded(member_ref.parent.token(), CodedIndexType::MemberRefParent)?,
                strings.add(&member_ref.name),
                blobs.add(&encode_member_sig(&member_ref.signature)),
            ],
        );
    }

    let mut semantics = Vec::new();
    for (index, property) in module.properties.iter().enumerate() {
        let token = Token::from_parts(TableId::Property, row_number(index)?);
        rows.push(
            TableId::Property,
            &[
                u32::from(property.flags),
                strings.add(&property.name),
                blobs.add(&encode_property_sig(&property.signature)),
            ],
        );
        if let Some(constant) = &property.constant {
            constants.push((token, constant));
        }
        semantics.extend(property.semantics.iter().map(|semantic| (token, semantic)));
    }
    for (index, event) in module.events.iter().enumerate() {
        let token = Token::from_parts(TableId::Event, row_number(index)?);
        let event_type = event.event_type.map_or(Token::default(), TypeDefOrRef::token);
        rows.push(
            TableId::Event,
            &[
                u32::from(event.flags),
                strings.add(&event.name),
                coded(event_type, CodedIndexType::TypeDefOrRef)?,
            ],
        );
        semantics.extend(event.semantics.iter().map(|semantic| (token, semantic)));
    }
    for ((owner, _), start) in property_lists.iter().zip(&properties.starts) {
        rows.push(TableId::PropertyMap, &[row_number(*owner)?, *start]);
    }
    for ((owner, _), start) in event_lists.iter().zip(&events.starts) {
        rows.push(TableId::EventMap, &[row_number(*owner)?, *start]);
    }

    let mut keyed = constants
        .into_iter()
        .map(|(parent, constant)| {
            Ok((
                coded(parent, CodedIndexType::HasConstant)?,
                [
                    u32::from(constant.element_type),
                    coded(parent, CodedIndexType::HasConstant)?,
                    blobs.add(&constant.value),
                ],
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    keyed.sort_by_key(|(key, _)| *key);
    for (_, row) in keyed {
        rows.push(TableId::Constant, &row);
    }

    let mut keyed = marshals
        .into_iter()
        .map(|(parent, descriptor)| {
            let parent = coded(parent, CodedIndexType::HasFieldMarshal)?;
            Ok((parent, [parent, blobs.add(descriptor)]))
        })
        .collect::<Result<Vec<_>>>()?;
    keyed.sort_by_key(|(key, _)| *key);
    for (_, row) in keyed {
        rows.push(TableId::FieldMarshal, &row);
    }

    let mut keyed = semantics
        .into_iter()
        .map(|(association, semantic)| {
            let association = coded(association, CodedIndexType::HasSemantics)?;
            Ok((
                association,
                [
                    u32::from(semantic.attributes),
                    semantic.method.token().row(),
                    association,
                ],
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    keyed.sort_by_key(|(key, _)| *key);
    for (_, row) in keyed {
        rows.push(TableId::MethodSemantics, &row);
    }

    let keys = module
        .decl_security
        .iter()
        .map(|item| coded(item.parent.token(), CodedIndexType::HasDeclSecurity))
        .collect::<Result<Vec<_>>>()?;
    let (order, security_rows) = sorted_order(&keys)?;
    for index in order {
        let item = &module.decl_security[index];
        rows.push(
            TableId::DeclSecurity,
            &[
                u32::from(item.action),
                keys[index],
                blobs.add(&item.permission_set),
            ],
        );
    }

    for (index, type_def) in module.type_defs.iter().enumerate() {
        let row = row_number(index)?;
        if let Some(layout) = type_def.layout {
            rows.push(
                TableId::ClassLayout,
                &[u32::from(layout.packing_size), layout.class_size, row],
            );
        }
        for item in &type_def.overrides {
            rows.push(
                TableId::MethodImpl,
                &[
                    row,
                    coded(item.body.token(), CodedIndexType::MethodDefOrRef)?,
                    coded(item.declaration.token(), CodedIndexType::MethodDefOrRef)?,
                ],
            );
        }
        if let Some(enclosing) = type_def.enclosing {
            rows.push(TableId::NestedClass, &[row, enclosing.token().row()]);
        }
    }

    for sig in &module.standalone_sigs {
        rows.push(TableId::StandAloneSig, &[blobs.add(&encode_standalone_sig(sig))]);
    }
    for module_ref in &module.module_refs {
        rows.push(TableId::ModuleRef, &[strings.add(&module_ref.name)]);
    }
    for sig in &module.type_specs {
        rows.push(TableId::TypeSpec, &[blobs.add(&encode_type_sig(sig))]);
    }

    if let Some(assembly) = module.assembly() {
        let version = assembly.version;
        rows.push(
            TableId::Assembly,
            &[
                assembly.hash_algorithm,
                u32::from(version.major),
                u32::from(version.minor),
                u32::from(version.build),
                u32::from(version.revision),
                assembly.flags,
                blobs.add(&assembly.public_key),
                strings.add(&assembly.name),
                strings.add(&assembly.culture),
            ],
        );
    }

    for assembly_ref in &module.assembly_refs {
        let version = assembly_ref.version;
        rows.push(
            TableId::AssemblyRef,
            &[
                u32::from(version.major),
                u32::from(version.minor),
                u32::from(version.build),
                u32::from(version.revision),
                assembly_ref.flags,
                blobs.add(&assembly_ref.public_key_token),
                strings.add(&assembly_ref.name),
                strings.add(&assembly_ref.culture),
                blobs.add(&assembly_ref.hash_value),
            ],
        );
    }

    for file in &module.files {
        rows.push(
            TableId::File,
            &[file.flags, strings.add(&file.name), blobs.add(&file.hash_value)],
        );
    }
    for exported in &module.exported_types {
        let implementation = exported.implementation.map_or(Token::default(), |item| item.token());
        rows.push(
            TableId::ExportedType,
            &[
                exported.flags,
                exported.type_def_hint,
                strings.add(&exported.name),
                strings.add(&exported.namespace),
                coded(implementation, CodedIndexType::Implementation)?,
            ],
        );
    }
    for resource in &module.manifest_resources {
        let implementation = resource.implementation.map_or(Token::default(), |item| item.token());
        rows.push(
            TableId::ManifestResource,
            &[
                resource.offset,
                resource.flags,
                strings.add(&resource.name),
                coded(implementation, CodedIndexType::Implementation)?,
            ],
        );
    }

    let keys = module
        .generic_params
        .iter()
        .map(|param| {
            Ok((
                coded(param.owner.token(), CodedIndexType::TypeOrMethodDef)?,
                param.number,
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    let (order, generic_param_rows) = sorted_order(&keys)?;
    for index in order {
        let param = &module.generic_params[index];
        rows.push(
            TableId::GenericParam,
            &[
                u32::from(param.number),
                u32::from(param.flags),
                keys[index].0,
                strings.add(&param.name),
            ],
        );
    }

    let keys = module
        .generic_param_constraints
        .iter()
        .map(|item| Ok(remapped(&generic_param_rows, TableId::GenericParam, item.owner.index())?.row()))
        .collect::<Result<Vec<_>>>()?;
    let (order, constraint_rows) = sorted_order(&keys)?;
    for index in order {
        let item = &module.generic_param_constraints[index];
        rows.push(
            TableId::GenericParamConstraint,
            &[
                keys[index],
                coded(item.constraint.token(), CodedIndexType::TypeDefOrRef)?,
            ],
        );
    }

    for spec in &module.method_specs {
        rows.push(
            TableId::MethodSpec,
            &[
                coded(spec.method.token(), CodedIndexType::MethodDefOrRef)?,
                blobs.add(&encode_method_spec(&spec.instantiation)),
            ],
        );
    }

    let mut keyed = Vec::with_capacity(module.custom_attributes.len());
    for attribute in &module.custom_attributes {
        let parent = match attribute.parent {
            AttributeParent::InterfaceImpl(id) => {
                remapped(&interface_rows, TableId::InterfaceImpl, id.index())?
            }
            AttributeParent::DeclSecurity(id) => {
                remapped(&security_rows, TableId::DeclSecurity, id.index())?
            }
            AttributeParent::GenericParam(id) => {
                remapped(&generic_param_rows, TableId::GenericParam, id.index())?
            }
            AttributeParent::GenericParamConstraint(id) => {
                remapped(&constraint_rows, TableId::GenericParamConstraint, id.index())?
            }
            other => other.token(),
        };
        let parent = coded(parent, CodedIndexType::HasCustomAttribute)?;
        keyed.push((
            parent,
            [
                parent,
                coded(attribute.constructor.token(), CodedIndexType::CustomAttributeType)?,
                blobs.add(&attribute.value),
            ],
        ));
    }
    keyed.sort_by_key(|(key, _)| *key);
    for (_, row) in keyed {
        rows.push(TableId::CustomAttribute, &row);
    }

    let strings = strings.into_bytes();
    let blobs = blobs.into_bytes();
    let guids = guids.into_bytes();
    let user_strings = user_strings.into_bytes();

    let mut heap_sizes = 0;
    if strings.len() > 0xFFFF {
        heap_sizes |= HEAP_LARGE_STRINGS;
    }
    if guids.len() / 16 > 0xFFFF {
        heap_sizes |= HEAP_LARGE_GUID;
    }
    if blobs.len() > 0xFFFF {
        heap_sizes |= HEAP_LARGE_BLOB;
    }

    let mut counts = [0_u32; TableId::COUNT];
    for table in TableId::iter() {
        counts[table as usize] = u32::try_from(rows.get(table).len()).map_err(|_| Error::OutOfBounds)?;
    }
    let info = TableInfo::new(counts, heap_sizes);

    let mut tables = Vec::new();
    write_le(&mut tables, 0_u32);
    write_le(&mut tables, TABLES_MAJOR_VERSION);
    write_le(&mut tables, TABLES_MINOR_VERSION);
    write_le(&mut tables, heap_sizes);
    write_le(&mut tables, 1_u8);
    write_le(&mut tables, info.valid());
    write_le(&mut tables, SORTED_TABLES);
    for table in TableId::iter() {
        if info.rows(table) > 0 {
            write_le(&mut tables, info.rows(table));
        }
    }
    for table in TableId::iter() {
        for row in rows.get(table) {
            info.write_row(&mut tables, table, row)?;
        }
    }

    let uses_indirection = [
        &fields.indirection,
        &methods.indirection,
        &params.indirection,
        &properties.indirection,
        &events.indirection,
    ]
    .iter()
    .any(|indirection| indirection.is_some());
    let tables_name = if uses_indirection { "#-" } else { "#~" };

    Ok(Root::assemble(
        &module.runtime_version,
        &[
            (tables_name, tables.as_slice()),
            ("#Strings", strings.as_slice()),
            ("#US", user_strings.as_slice()),
            ("#GUID", guids.as_slice()),
            ("#Blob", blobs.as_slice()),
        ],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_lists_need_no_indirection() {
        let lists = vec![(0, vec![]), (1, vec![0, 1]), (2, vec![2])];
        let layout = member_lists(&lists, &[1, 1, 2], TableId::Field).unwrap();
        assert_eq!(layout.starts, vec![1, 1, 3]);
        assert_eq!(layout.indirection, None);
    }

    #[test]
    fn appended_members_get_an_indirection_order() {
        let lists = vec![(0, vec![0, 2]), (1, vec![1])];
        let layout = member_lists(&lists, &[0, 1, 0], TableId::MethodDef).unwrap();
        assert_eq!(layout.starts, vec![1, 3]);
        assert_eq!(layout.indirection, Some(vec![1, 3, 2]));
    }

    #[test]
    fn member_lists_must_match_owners() {
        let wrong_owner = vec![(0, vec![0]), (1, vec![])];
        assert!(member_lists(&wrong_owner, &[1], TableId::Field).is_err());

        let unlisted = vec![(0, vec![0])];
        assert!(member_lists(&unlisted, &[0, 0], TableId::Field).is_err());

        let out_of_range = vec![(0, vec![3])];
        assert!(matches!(
            member_lists(&out_of_range, &[0], TableId::Field),
            Err(Error::InvalidToken(_))
        ));
    }

    #[test]
    fn sorted_order_is_stable() {
        let (order, rows) = sorted_order(&[3, 1, 3, 0]).unwrap();
        assert_eq!(order, vec![3, 1, 0, 2]);
        assert_eq!(rows, vec![3, 2, 4, 1]);
    }

    #[test]
    fn executable_names() {
        assert!(is_executable("Tool.EXE"));
        assert!(!is_executable("Library.dll"));
        assert!(!is_executable("exe"));
    }
}
