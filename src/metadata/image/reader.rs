//! Image parsing.
//!
//! The PE container and the metadata root are located first. The tables header gives every
//! row count, so each index and coded index can be checked against the table it names while
//! rows are decoded. Rows are read into raw column arrays, then turned into entities in an
//! order where every owner exists before the rows that attach to it. Method bodies are
//! decoded last because their operands need the `MemberRef` table to tell field references
//! from method references.

use std::sync::Arc;

use strum::{EnumCount, IntoEnumIterator};

use crate::{
    assembly::{decode_method_body, OperandContext},
    file::{parser::Parser, pe::PeImage},
    metadata::{
        flags::{FieldAttributes, MethodAttributes, ParamAttributes, TypeAttributes},
        handles::{
            AttributeConstructor, AttributeParent, EventId, FieldId, GenericParamId,
            GenericParamOwner, Implementation, MemberRefParent, MethodId, MethodRef, ModuleRefId,
            ParamId, PropertyId, ResolutionScope, SecurityParent, TypeDefId, TypeDefOrRef,
        },
        image::TABLES_MAJOR_VERSION,
        module::{
            AssemblyDef, AssemblyRef, AssemblyVersion, ClassLayout, Constant, CustomAttribute,
            DeclSecurity, Event, ExportedType, Field, FieldData, FileRef, GenericParam,
            GenericParamConstraint, InterfaceImpl, ManifestResource, MemberRef, Method,
            MethodOverride, MethodSemantic, MethodSpec, Module, ModuleRef, PInvokeMap, Param,
            Property, TypeDef, TypeRef,
        },
        root::Root,
        signatures::{
            parse_field_sig, parse_member_sig, parse_method_sig, parse_method_spec,
            parse_property_sig, parse_standalone_sig, parse_type_sig, MemberSig, TypeSig,
        },
        streams::{Blob, Guids, Strings, UserStrings},
        tables::{CodedIndexType, Row, TableInfo, HEAP_EXTRA_DATA},
        token::{TableId, Token},
    },
    Error, Result,
};

const EMPTY_HEAP: &[u8] = &[0];

// MethodImplAttributes code type mask; 0 is IL
const CODE_TYPE_MASK: u16 = 0x0003;

const IGNORED_TABLES: [TableId; 6] = [
    TableId::EncLog,
    TableId::EncMap,
    TableId::AssemblyProcessor,
    TableId::AssemblyOS,
    TableId::AssemblyRefProcessor,
    TableId::AssemblyRefOS,
];

/// Parse a managed PE image into a module that keeps the image.
///
/// # Errors
/// Returns [`Error::NotSupported`] for images that are not IL-only, and a malformed, token
/// or out-of-bounds error if any header, row, signature or body is inconsistent.
pub(crate) fn read_image(data: Vec<u8>) -> Result<Module> {
    let image = PeImage::parse(data)?;
    let mut module = read_metadata(&image)?;
    module.image = Some(Arc::new(image));
    Ok(module)
}

fn read_metadata(image: &PeImage) -> Result<Module> {
    let metadata = image.metadata()?;
    let root = Root::read(metadata)?;
    let stream = root
        .stream(metadata, "#~")
        .or_else(|| root.stream(metadata, "#-"))
        .ok_or_else(|| malformed_error!("Metadata has no tables stream"))?;

    let strings = Strings::from(root.stream(metadata, "#Strings").unwrap_or(EMPTY_HEAP))?;
    let blobs = Blob::from(root.stream(metadata, "#Blob").unwrap_or(EMPTY_HEAP))?;
    let guids = Guids::from(root.stream(metadata, "#GUID").unwrap_or(&[]))?;
    let user_strings = UserStrings::from(root.stream(metadata, "#US").unwrap_or(EMPTY_HEAP))?;

    let (info, rows) = read_tables(stream)?;
    let tables = Tables {
        info,
        rows,
        strings,
        blobs,
        guids,
    };

    for table in IGNORED_TABLES {
        if tables.info.rows(table) > 0 {
            log::debug!("Ignoring {} rows of {}", tables.info.rows(table), table);
        }
    }

    let module_rows = tables.rows(TableId::Module);
    let [module_row] = module_rows else {
        return Err(malformed_error!(
            "Image must contain exactly one Module row - found {}",
            module_rows.len()
        ));
    };
    let mut module = Module::blank(tables.string(module_row[1])?);
    module.set_mvid(tables.guids.get(module_row[2] as usize)?);
    module.runtime_version = root.version.clone();

    read_references(&tables, &mut module)?;
    let rvas = read_definitions(&tables, &mut module)?;
    read_attachments(&tables, &mut module)?;
    read_manifest(&tables, &mut module)?;

    validate_signatures(&module, &tables.info)?;

    let context = ImageContext {
        info: &tables.info,
        member_refs: &module.member_refs,
        user_strings,
    };
    let mut bodies = Vec::with_capacity(rvas.len());
    for (index, rva) in rvas.iter().copied().enumerate() {
        let method = &module.methods[index];
        if rva == 0 {
            bodies.push(None);
            continue;
        }
        if method.impl_flags & CODE_TYPE_MASK != 0 {
            return Err(Error::NotSupported);
        }

        let token = MethodId::from_index(index).token();
        let body = image
            .data_from_rva(rva)
            .and_then(|data| decode_method_body(data, &context))
            .map_err(|error| malformed_error!("Method {} has an invalid body - {}", token, error))?;
        bodies.push(Some(body));
    }
    for (method, body) in module.methods.iter_mut().zip(bodies) {
        method.body = body;
    }

    Ok(module)
}

/// Parse the tables stream header and every row
fn read_tables(data: &[u8]) -> Result<(TableInfo, Vec<Vec<Row>>)> {
    let mut parser = Parser::new(data);
    let _reserved = parser.read_le::<u32>()?;
    let major = parser.read_le::<u8>()?;
    let _minor = parser.read_le::<u8>()?;
    if major != TABLES_MAJOR_VERSION && major != 1 {
        return Err(Error::NotSupported);
    }
    let heap_sizes = parser.read_le::<u8>()?;
    let _reserved = parser.read_le::<u8>()?;
    let valid = parser.read_le::<u64>()?;
    let _sorted = parser.read_le::<u64>()?;

    if valid >> TableId::COUNT != 0 {
        return Err(malformed_error!("Unknown metadata table in valid mask - {:#x}", valid));
    }

    let mut counts = [0_u32; TableId::COUNT];
    for table in TableId::iter() {
        if valid & (1_u64 << table as u8) != 0 {
            counts[table as usize] = parser.read_le::<u32>()?;
        }
    }
    if heap_sizes & HEAP_EXTRA_DATA != 0 {
        parser.advance_by(4)?;
    }

    let info = TableInfo::new(counts, heap_sizes);
    let mut rows = Vec::with_capacity(TableId::COUNT);
    for table in TableId::iter() {
        let count = info.rows(table) as usize;
        let needed = count
            .checked_mul(info.row_size(table))
            .ok_or(Error::OutOfBounds)?;
        if needed > parser.len() - parser.pos() {
            return Err(out_of_bounds_error!());
        }

        let mut table_rows = Vec::with_capacity(count);
        for _ in 0..count {
            table_rows.push(info.read_row(&mut parser, table)?);
        }
        rows.push(table_rows);
    }

    Ok((info, rows))
}

/// Raw rows of all tables with heap and index lookups
struct Tables<'a> {
    info: TableInfo,
    rows: Vec<Vec<Row>>,
    strings: Strings<'a>,
    blobs: Blob<'a>,
    guids: Guids<'a>,
}

impl<'a> Tables<'a> {
    fn rows(&self, table: TableId) -> &[Row] {
        &self.rows[table as usize]
    }

    fn string(&self, index: u32) -> Result<String> {
        Ok(self.strings.get(index as usize)?.to_string())
    }

    fn blob(&self, index: u32) -> Result<&'a [u8]> {
        self.blobs.get(index as usize)
    }

    /// A 1-based row column of `table`, returned as a 0-based index
    fn index(&self, table: TableId, value: u32) -> Result<usize> {
        let token = Token::from_parts(table, value);
        if self.info.contains(token) {
            Ok(value as usize - 1)
        } else {
            Err(Error::InvalidToken(token))
        }
    }

    /// A coded index column; a zero row yields the null token
    fn coded(&self, value: u32, kind: CodedIndexType) -> Result<Token> {
        let token = self.info.decode_coded_index(value, kind)?;
        if token.row() == 0 {
            Ok(Token::default())
        } else if self.info.contains(token) {
            Ok(token)
        } else {
            Err(Error::InvalidToken(token))
        }
    }

    fn type_handle(&self, value: u32) -> Result<Option<TypeDefOrRef>> {
        let token = self.coded(value, CodedIndexType::TypeDefOrRef)?;
        if token.is_null() {
            Ok(None)
        } else {
            TypeDefOrRef::from_token(token).map(Some)
        }
    }

    fn required_type_handle(&self, value: u32) -> Result<TypeDefOrRef> {
        let token = self.coded(value, CodedIndexType::TypeDefOrRef)?;
        TypeDefOrRef::from_token(token)
    }

    fn method_ref(&self, value: u32) -> Result<MethodRef> {
        MethodRef::from_token(self.coded(value, CodedIndexType::MethodDefOrRef)?)
    }

    fn version(row: &Row, first: usize) -> AssemblyVersion {
        AssemblyVersion::new(
            short(row[first]),
            short(row[first + 1]),
            short(row[first + 2]),
            short(row[first + 3]),
        )
    }

    /// Resolve the member lists of a run of owners.
    ///
    /// `starts` holds each owner's 1-based list start into `table`, read through `ptr` when
    /// that indirection table has rows. Returns the members of each owner in list order and
    /// the owner of each member row.
    fn member_lists(
        &self,
        starts: &[u32],
        table: TableId,
        ptr: TableId,
    ) -> Result<(Vec<Vec<usize>>, Vec<Option<usize>>)> {
        let logical: Vec<usize> = if self.rows(ptr).is_empty() {
            (0..self.rows(table).len()).collect()
        } else {
            self.rows(ptr)
                .iter()
                .map(|row| self.index(table, row[0]))
                .collect::<Result<_>>()?
        };

        let end_of_list = logical.len() + 1;
        let mut lists = Vec::with_capacity(starts.len());
        let mut owners = vec![None; self.rows(table).len()];
        for (owner, start) in starts.iter().copied().enumerate() {
            let start = start as usize;
            let end = starts
                .get(owner + 1)
                .map_or(end_of_list, |next| *next as usize);
            if start == 0 || start > end || end > end_of_list {
                return Err(malformed_error!(
                    "Invalid {} list of row {} - {}..{}",
                    table,
                    owner + 1,
                    start,
                    end
                ));
            }

            let members = logical[start - 1..end - 1].to_vec();
            for member in &members {
                if owners[*member].replace(owner).is_some() {
                    return Err(malformed_error!(
                        "{} row {} is listed by more than one owner",
                        table,
                        member + 1
                    ));
                }
            }
            lists.push(members);
        }
        Ok((lists, owners))
    }
}

#[allow(clippy::cast_possible_truncation)]
fn short(value: u32) -> u16 {
    value as u16
}

fn owner_of(owners: &[Option<usize>], table: TableId, row: usize) -> Result<usize> {
    owners
        .get(row)
        .copied()
        .flatten()
        .ok_or_else(|| malformed_error!("{} row {} has no owner", table, row + 1))
}

fn read_references(tables: &Tables, module: &mut Module) -> Result<()> {
    for row in tables.rows(TableId::AssemblyRef) {
        module.assembly_refs.push(AssemblyRef {
            version: Tables::version(row, 0),
            flags: row[4],
            public_key_token: tables.blob(row[5])?.to_vec(),
            name: tables.string(row[6])?,
            culture: tables.string(row[7])?,
            hash_value: tables.blob(row[8])?.to_vec(),
        });
    }

    for row in tables.rows(TableId::ModuleRef) {
        module.module_refs.push(ModuleRef {
            name: tables.string(row[0])?,
        });
    }

    for row in tables.rows(TableId::TypeRef) {
        let scope = tables.coded(row[0], CodedIndexType::ResolutionScope)?;
        module.type_refs.push(TypeRef {
            scope: ResolutionScope::from_token(scope)?,
            name: tables.string(row[1])?,
            namespace: tables.string(row[2])?,
        });
    }

    for row in tables.rows(TableId::TypeSpec) {
        module.type_specs.push(parse_type_sig(tables.blob(row[0])?)?);
    }

    for row in tables.rows(TableId::StandAloneSig) {
        module
            .standalone_sigs
            .push(parse_standalone_sig(tables.blob(row[0])?)?);
    }

    for row in tables.rows(TableId::MemberRef) {
        let parent = tables.coded(row[0], CodedIndexType::MemberRefParent)?;
        module.member_refs.push(MemberRef {
            parent: MemberRefParent::from_token(parent)?,
            name: tables.string(row[1])?,
            signature: parse_member_sig(tables.blob(row[2])?)?,
        });
    }

    for row in tables.rows(TableId::MethodSpec) {
        module.method_specs.push(MethodSpec {
            method: tables.method_ref(row[0])?,
            instantiation: parse_method_spec(tables.blob(row[1])?)?,
        });
    }

    Ok(())
}

/// Types, members, properties and events. Returns the body RVA of every method.
fn read_definitions(tables: &Tables, module: &mut Module) -> Result<Vec<u32>> {
    let type_rows = tables.rows(TableId::TypeDef);
    for row in type_rows {
        let mut type_def = TypeDef::new(
            TypeAttributes::from_bits_retain(row[0]),
            tables.string(row[2])?,
            tables.string(row[1])?,
        );
        type_def.extends = tables.type_handle(row[3])?;
        module.type_defs.push(type_def);
    }

    let field_starts: Vec<u32> = type_rows.iter().map(|row| row[4]).collect();
    let (field_lists, field_owners) =
        tables.member_lists(&field_starts, TableId::Field, TableId::FieldPtr)?;
    for (index, row) in tables.rows(TableId::Field).iter().enumerate() {
        let owner = owner_of(&field_owners, TableId::Field, index)?;
        module.fields.push(Field::new(
            TypeDefId::from_index(owner),
            FieldAttributes::from_bits_retain(short(row[0])),
            tables.string(row[1])?,
            parse_field_sig(tables.blob(row[2])?)?,
        ));
    }

    let method_starts: Vec<u32> = type_rows.iter().map(|row| row[5]).collect();
    let (method_lists, method_owners) =
        tables.member_lists(&method_starts, TableId::MethodDef, TableId::MethodPtr)?;
    let method_rows = tables.rows(TableId::MethodDef);
    let mut rvas = Vec::with_capacity(method_rows.len());
    for (index, row) in method_rows.iter().enumerate() {
        let owner = owner_of(&method_owners, TableId::MethodDef, index)?;
        let mut method = Method::new(
            TypeDefId::from_index(owner),
            MethodAttributes::from_bits_retain(short(row[2])),
            tables.string(row[3])?,
            parse_method_sig(tables.blob(row[4])?)?,
        );
        method.impl_flags = short(row[1]);
        module.methods.push(method);
        rvas.push(row[0]);
    }

    for (type_def, (fields, methods)) in module
        .type_defs
        .iter_mut()
        .zip(field_lists.into_iter().zip(method_lists))
    {
        type_def.fields = fields.into_iter().map(FieldId::from_index).collect();
        type_def.methods = methods.into_iter().map(MethodId::from_index).collect();
    }

    let param_starts: Vec<u32> = method_rows.iter().map(|row| row[5]).collect();
    let (param_lists, param_owners) =
        tables.member_lists(&param_starts, TableId::Param, TableId::ParamPtr)?;
    for (index, row) in tables.rows(TableId::Param).iter().enumerate() {
        let owner = owner_of(&param_owners, TableId::Param, index)?;
        module.params.push(Param {
            owner: MethodId::from_index(owner),
            flags: ParamAttributes::from_bits_retain(short(row[0])),
            sequence: short(row[1]),
            name: tables.string(row[2])?,
            constant: None,
            marshal: None,
        });
    }
    for (method, params) in module.methods.iter_mut().zip(param_lists) {
        method.params = params.into_iter().map(ParamId::from_index).collect();
    }

    let map_rows = tables.rows(TableId::PropertyMap);
    let starts: Vec<u32> = map_rows.iter().map(|row| row[1]).collect();
    let (lists, owners) = tables.member_lists(&starts, TableId::Property, TableId::PropertyPtr)?;
    let parents: Vec<usize> = map_rows
        .iter()
        .map(|row| tables.index(TableId::TypeDef, row[0]))
        .collect::<Result<_>>()?;
    for (index, row) in tables.rows(TableId::Property).iter().enumerate() {
        let owner = parents[owner_of(&owners, TableId::Property, index)?];
        module.properties.push(Property {
            owner: TypeDefId::from_index(owner),
            flags: short(row[0]),
            name: tables.string(row[1])?,
            signature: parse_property_sig(tables.blob(row[2])?)?,
            constant: None,
            semantics: Vec::new(),
        });
    }
    for (parent, list) in parents.iter().zip(lists) {
        module.type_defs[*parent]
            .properties
            .extend(list.into_iter().map(PropertyId::from_index));
    }

    let map_rows = tables.rows(TableId::EventMap);
    let starts: Vec<u32> = map_rows.iter().map(|row| row[1]).collect();
    let (lists, owners) = tables.member_lists(&starts, TableId::Event, TableId::EventPtr)?;
    let parents: Vec<usize> = map_rows
        .iter()
        .map(|row| tables.index(TableId::TypeDef, row[0]))
        .collect::<Result<_>>()?;
    for (index, row) in tables.rows(TableId::Event).iter().enumerate() {
        let owner = parents[owner_of(&owners, TableId::Event, index)?];
        module.events.push(Event {
            owner: TypeDefId::from_index(owner),
            flags: short(row[0]),
            name: tables.string(row[1])?,
            event_type: tables.type_handle(row[2])?,
            semantics: Vec::new(),
        });
    }
    for (parent, list) in parents.iter().zip(lists) {
        module.type_defs[*parent]
            .events
            .extend(list.into_iter().map(EventId::from_index));
    }

    for row in tables.rows(TableId::NestedClass) {
        let nested = TypeDefId::from_index(tables.index(TableId::TypeDef, row[0])?);
        let enclosing = TypeDefId::from_index(tables.index(TableId::TypeDef, row[1])?);
        link_nested(module, nested, enclosing)?;
    }

    for row in tables.rows(TableId::GenericParam) {
        let owner = tables.coded(row[2], CodedIndexType::TypeOrMethodDef)?;
        module.generic_params.push(GenericParam {
            number: short(row[0]),
            flags: short(row[1]),
            owner: GenericParamOwner::from_token(owner)?,
            name: tables.string(row[3])?,
        });
    }

    for row in tables.rows(TableId::GenericParamConstraint) {
        module.generic_param_constraints.push(GenericParamConstraint {
            owner: GenericParamId::from_index(tables.index(TableId::GenericParam, row[0])?),
            constraint: tables.required_type_handle(row[1])?,
        });
    }

    for row in tables.rows(TableId::InterfaceImpl) {
        module.interface_impls.push(InterfaceImpl {
            class: TypeDefId::from_index(tables.index(TableId::TypeDef, row[0])?),
            interface: tables.required_type_handle(row[1])?,
        });
    }

    Ok(rvas)
}

/// Rows that attach extra information to types, members and parameters
fn read_attachments(tables: &Tables, module: &mut Module) -> Result<()> {
    for row in tables.rows(TableId::Constant) {
        let parent = tables.coded(row[1], CodedIndexType::HasConstant)?;
        let constant = Constant {
            element_type: short(row[0]).to_le_bytes()[0],
            value: tables.blob(row[2])?.to_vec(),
        };
        let slot = match parent.table_id() {
            Some(TableId::Field) => &mut module.fields[FieldId::from_token(parent)?.index()].constant,
            Some(TableId::Param) => &mut module.params[ParamId::from_token(parent)?.index()].constant,
            Some(TableId::Property) => {
                &mut module.properties[PropertyId::from_token(parent)?.index()].constant
            }
            _ => return Err(Error::InvalidToken(parent)),
        };
        *slot = Some(constant);
    }

    for row in tables.rows(TableId::FieldMarshal) {
        let parent = tables.coded(row[0], CodedIndexType::HasFieldMarshal)?;
        let descriptor = tables.blob(row[1])?.to_vec();
        let slot = match parent.table_id() {
            Some(TableId::Field) => &mut module.fields[FieldId::from_token(parent)?.index()].marshal,
            Some(TableId::Param) => &mut module.params[ParamId::from_token(parent)?.index()].marshal,
            _ => return Err(Error::InvalidToken(parent)),
        };
        *slot = Some(descriptor);
    }

    for row in tables.rows(TableId::ClassLayout) {
        let parent = tables.index(TableId::TypeDef, row[2])?;
        module.type_defs[parent].layout = Some(ClassLayout {
            packing_size: short(row[0]),
            class_size: row[1],
        });
    }

    for row in tables.rows(TableId::FieldLayout) {
        let field = tables.index(TableId::Field, row[1])?;
        module.fields[field].offset = Some(row[0]);
    }

    for row in tables.rows(TableId::FieldRVA) {
        let field = tables.index(TableId::Field, row[1])?;
        module.fields[field].initial_value = Some(FieldData::Rva(row[0]));
    }

    for row in tables.rows(TableId::MethodSemantics) {
        let semantic = MethodSemantic {
            attributes: short(row[0]),
            method: MethodId::from_index(tables.index(TableId::MethodDef, row[1])?),
        };
        let association = tables.coded(row[2], CodedIndexType::HasSemantics)?;
        match association.table_id() {
            Some(TableId::Event) => module.events[EventId::from_token(association)?.index()]
                .semantics
                .push(semantic),
            Some(TableId::Property) => module.properties
                [PropertyId::from_token(association)?.index()]
            .semantics
            .push(semantic),
            _ => return Err(Error::InvalidToken(association)),
        }
    }

    for row in tables.rows(TableId::MethodImpl) {
        let class = tables.index(TableId::TypeDef, row[0])?;
        module.type_defs[class].overrides.push(MethodOverride {
            body: tables.method_ref(row[1])?,
            declaration: tables.method_ref(row[2])?,
        });
    }

    for row in tables.rows(TableId::ImplMap) {
        let member = tables.coded(row[1], CodedIndexType::MemberForwarded)?;
        if member.table_id() != Some(TableId::MethodDef) {
            return Err(Error::NotSupported);
        }
        module.methods[MethodId::from_token(member)?.index()].pinvoke = Some(PInvokeMap {
            flags: short(row[0]),
            import_name: tables.string(row[2])?,
            scope: ModuleRefId::from_index(tables.index(TableId::ModuleRef, row[3])?),
        });
    }

    for row in tables.rows(TableId::DeclSecurity) {
        let parent = tables.coded(row[1], CodedIndexType::HasDeclSecurity)?;
        module.decl_security.push(DeclSecurity {
            action: short(row[0]),
            parent: SecurityParent::from_token(parent)?,
            permission_set: tables.blob(row[2])?.to_vec(),
        });
    }

    for row in tables.rows(TableId::CustomAttribute) {
        let parent = tables.coded(row[0], CodedIndexType::HasCustomAttribute)?;
        let constructor = tables.coded(row[1], CodedIndexType::CustomAttributeType)?;
        module.custom_attributes.push(CustomAttribute {
            parent: AttributeParent::from_token(parent)?,
            constructor: AttributeConstructor::from_token(constructor)?,
            value: tables.blob(row[2])?.to_vec(),
        });
    }

    Ok(())
}

fn read_manifest(tables: &Tables, module: &mut Module) -> Result<()> {
    match tables.rows(TableId::Assembly) {
        [] => {}
        [row] => {
            module.assembly = Some(AssemblyDef {
                hash_algorithm: row[0],
                version: Tables::version(row, 1),
                flags: row[5],
                public_key: tables.blob(row[6])?.to_vec(),
                name: tables.string(row[7])?,
                culture: tables.string(row[8])?,
            });
        }
        rows => {
            return Err(malformed_error!(
                "Image has {} Assembly rows",
                rows.len()
            ))
        }
    }

    for row in tables.rows(TableId::File) {
        module.files.push(FileRef {
            flags: row[0],
            name: tables.string(row[1])?,
            hash_value: tables.blob(row[2])?.to_vec(),
        });
    }

    for row in tables.rows(TableId::ExportedType) {
        let implementation = tables.coded(row[4], CodedIndexType::Implementation)?;
        module.exported_types.push(ExportedType {
            flags: row[0],
            type_def_hint: row[1],
            name: tables.string(row[2])?,
            namespace: tables.string(row[3])?,
            implementation: Implementation::from_token(implementation)?,
        });
    }

    for row in tables.rows(TableId::ManifestResource) {
        let implementation = tables.coded(row[3], CodedIndexType::Implementation)?;
        module.manifest_resources.push(ManifestResource {
            offset: row[0],
            flags: row[1],
            name: tables.string(row[2])?,
            implementation: Implementation::from_token(implementation)?,
        });
    }

    Ok(())
}

fn link_nested(module: &mut Module, nested: TypeDefId, enclosing: TypeDefId) -> Result<()> {
    if nested == enclosing {
        return Err(malformed_error!("Type {} is nested in itself", nested.token()));
    }
    if module.type_defs[nested.index()].enclosing.is_some() {
        return Err(malformed_error!(
            "Type {} has more than one enclosing type",
            nested.token()
        ));
    }

    let mut current = Some(enclosing);
    let mut steps = 0;
    while let Some(ancestor) = current {
        if ancestor == nested || steps > module.type_defs.len() {
            return Err(malformed_error!(
                "Nesting cycle through type {}",
                nested.token()
            ));
        }
        current = module.type_defs[ancestor.index()].enclosing;
        steps += 1;
    }

    module.type_defs[nested.index()].enclosing = Some(enclosing);
    module.type_defs[enclosing.index()].nested.push(nested);
    Ok(())
}

/// Check that every type handle inside a signature names an existing row
fn validate_signatures(module: &Module, info: &TableInfo) -> Result<()> {
    let mut invalid = None;
    let mut check = |handle: TypeDefOrRef| {
        if invalid.is_none() && !info.contains(handle.token()) {
            invalid = Some(handle.token());
        }
    };

    for field in &module.fields {
        field.signature.for_each_type(&mut check);
    }
    for method in &module.methods {
        method.signature.for_each_type(&mut check);
    }
    for property in &module.properties {
        property.signature.for_each_type(&mut check);
    }
    for member_ref in &module.member_refs {
        member_ref.signature.for_each_type(&mut check);
    }
    for sig in &module.standalone_sigs {
        sig.for_each_type(&mut check);
    }
    for sig in &module.type_specs {
        sig.for_each_type(&mut check);
    }
    for spec in &module.method_specs {
        spec.instantiation
            .iter()
            .for_each(|arg: &TypeSig| arg.for_each_type(&mut check));
    }

    match invalid {
        Some(token) => Err(Error::InvalidToken(token)),
        None => Ok(()),
    }
}

/// Operand resolution for bodies inside an image
struct ImageContext<'a> {
    info: &'a TableInfo,
    member_refs: &'a [MemberRef],
    user_strings: UserStrings<'a>,
}

impl OperandContext for ImageContext<'_> {
    fn contains(&self, token: Token) -> bool {
        self.info.contains(token)
    }

    fn is_field_reference(&self, token: Token) -> bool {
        token.table_id() == Some(TableId::MemberRef)
            && token.row() >= 1
            && self
                .member_refs
                .get(token.row() as usize - 1)
                .is_some_and(|member_ref| matches!(member_ref.signature, MemberSig::Field(_)))
    }

    fn user_string(&self, index: u32) -> Result<String> {
        self.user_strings.get(index as usize)
    }
}
