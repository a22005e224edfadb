//! The PE/COFF container of a managed module.
//!
//! [`PeImage`] owns the raw bytes of an image together with the parts of its layout the
//! metadata reader and writer need: the sections, the alignments, the CLI header and where it
//! lives. Parsing goes through `goblin`; everything goblin does not model (the CLI header, the
//! metadata root) is read from the owned bytes.
//!
//! # Writing
//!
//! A patched module is written by keeping every original section byte-identical and appending
//! one section, `.meta`, that holds the re-encoded method bodies, new field initial data and
//! the new metadata. Because no existing RVA moves, resources, relocations, imports and native
//! stubs stay valid. The CLI header is rewritten in place to point at the new metadata, and
//! the optional header is fixed up (section count, image size, initialized data size,
//! checksum). The certificate and debug directories are cleared since the signature and the
//! PDB no longer match.
//!
//! When the image already ends with a `.meta` section produced by an earlier write, and
//! nothing but the replaced content points into it, that section is dropped and its slot is
//! reused. Writing a module that was read from a written image therefore reproduces that
//! image byte for byte.
//!
//! ```text
//! +-----------------+  headers (DOS, PE, optional header, section table)
//! | .text / .rsrc.. |  original sections, unchanged
//! +-----------------+
//! | .meta           |  bodies (4-aligned) | field data (8-aligned) | metadata root
//! +-----------------+
//! ```

use std::{fmt, ops::Range};

use goblin::pe::PE;

use crate::{
    file::io::{read_le, write_le},
    metadata::cor20header::{Cor20Header, COR20_HEADER_SIZE, FLAG_STRONG_NAME_SIGNED},
    Error::{self, OutOfBounds},
    Result,
};

/// Name of the section the writer appends
pub const META_SECTION_NAME: &str = ".meta";
/// `IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ`
pub const META_SECTION_CHARACTERISTICS: u32 = 0x4000_0040;

const SECTION_HEADER_SIZE: usize = 40;
const DIRECTORY_CERTIFICATE: usize = 4;
const DIRECTORY_DEBUG: usize = 6;
const DIRECTORY_CLR: usize = 14;
// COMIMAGE_FLAGS_IL_LIBRARY, set on ReadyToRun images
const FLAG_IL_LIBRARY: u32 = 0x0000_0004;

const DOS_STUB: [u8; 14] = [
    0x0E, 0x1F, 0xBA, 0x0E, 0x00, 0xB4, 0x09, 0xCD, 0x21, 0xB8, 0x01, 0x4C, 0xCD, 0x21,
];
const DOS_MESSAGE: &[u8] = b"This program cannot be run in DOS mode.\r\r\n$";

/// One entry of the section table.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Section {
    pub name: String,
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub pointer_to_raw_data: u32,
    pub size_of_raw_data: u32,
    pub characteristics: u32,
}

impl Section {
    fn contains_rva(&self, rva: u32) -> bool {
        let extent = self.virtual_size.max(self.size_of_raw_data);
        rva >= self.virtual_address && rva - self.virtual_address < extent
    }
}

/// Where the writer places the `.meta` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionPlacement {
    /// RVA of the section's first byte
    pub virtual_address: u32,
    /// The previous `.meta` section is dropped and its slot reused
    pub reuse: bool,
}

/// A parsed managed PE image that owns its bytes.
#[derive(Clone)]
pub struct PeImage {
    data: Vec<u8>,
    pe_offset: usize,
    is_pe32_plus: bool,
    section_alignment: u32,
    file_alignment: u32,
    size_of_headers: u32,
    sections: Vec<Section>,
    clr_rva: u32,
    cor20: Cor20Header,
}

impl fmt::Debug for PeImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeImage")
            .field("len", &self.data.len())
            .field("is_pe32_plus", &self.is_pe32_plus)
            .field("sections", &self.sections)
            .field("cor20", &self.cor20)
            .finish_non_exhaustive()
    }
}

fn align(value: u32, alignment: u32) -> u32 {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

fn patch_u16(data: &mut [u8], offset: usize, value: u16) -> Result<()> {
    let slot = data.get_mut(offset..offset + 2).ok_or(OutOfBounds)?;
    slot.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

fn patch_u32(data: &mut [u8], offset: usize, value: u32) -> Result<()> {
    let slot = data.get_mut(offset..offset + 4).ok_or(OutOfBounds)?;
    slot.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

impl PeImage {
    /// Parse a managed PE image.
    ///
    /// # Errors
    /// Returns [`Error::GoblinErr`] if the PE structure is damaged, [`Error::NotSupported`]
    /// for images without a CLI header or with native code, and an out-of-bounds error if a
    /// section or the metadata lies beyond the end of the data.
    pub fn parse(data: Vec<u8>) -> Result<PeImage> {
        let (pe_offset, is_pe32_plus, section_alignment, file_alignment, size_of_headers, clr, sections) = {
            let pe = PE::parse(&data)?;
            let Some(optional) = pe.header.optional_header else {
                return Err(Error::NotSupported);
            };
            let Some(clr) = optional.data_directories.get_clr_runtime_header().copied() else {
                return Err(Error::NotSupported);
            };

            let sections: Vec<Section> = pe
                .sections
                .iter()
                .map(|section| Section {
                    name: section.name().map(str::to_string).unwrap_or_default(),
                    virtual_address: section.virtual_address,
                    virtual_size: section.virtual_size,
                    pointer_to_raw_data: section.pointer_to_raw_data,
                    size_of_raw_data: section.size_of_raw_data,
                    characteristics: section.characteristics,
                })
                .collect();

            (
                pe.header.dos_header.pe_pointer as usize,
                optional.standard_fields.magic == goblin::pe::optional_header::MAGIC_64,
                optional.windows_fields.section_alignment,
                optional.windows_fields.file_alignment,
                optional.windows_fields.size_of_headers,
                clr,
                sections,
            )
        };

        for section in &sections {
            let end = u64::from(section.pointer_to_raw_data) + u64::from(section.size_of_raw_data);
            if section.size_of_raw_data > 0 && end > data.len() as u64 {
                return Err(OutOfBounds);
            }
        }

        let mut image = PeImage {
            data,
            pe_offset,
            is_pe32_plus,
            section_alignment,
            file_alignment,
            size_of_headers,
            sections,
            clr_rva: clr.virtual_address,
            cor20: Cor20Header::new(),
        };

        image.cor20 = Cor20Header::read(image.slice_at_rva(clr.virtual_address, COR20_HEADER_SIZE)?)?;
        if !image.cor20.is_il_only() {
            return Err(Error::NotSupported);
        }
        image.metadata()?;

        Ok(image)
    }

    /// A minimal IL-only PE32 image with one `.text` section holding the CLI header.
    ///
    /// Modules created in memory are written on top of this container.
    #[must_use]
    pub fn skeleton(is_exe: bool) -> PeImage {
        const PE_OFFSET: usize = 0x80;
        const SECTION_ALIGNMENT: u32 = 0x2000;
        const FILE_ALIGNMENT: u32 = 0x200;
        const TEXT_RVA: u32 = 0x2000;

        let mut data = Vec::with_capacity(0x400);
        write_le(&mut data, 0x5A4D_u16);
        for value in [0x90_u16, 3, 0, 4, 0, 0xFFFF, 0, 0xB8, 0, 0, 0, 0x40, 0] {
            write_le(&mut data, value);
        }
        data.resize(0x3C, 0);
        #[allow(clippy::cast_possible_truncation)]
        write_le(&mut data, PE_OFFSET as u32);
        data.extend_from_slice(&DOS_STUB);
        data.extend_from_slice(DOS_MESSAGE);
        data.resize(PE_OFFSET, 0);

        // PE signature and COFF header
        data.extend_from_slice(b"PE\0\0");
        write_le(&mut data, 0x014C_u16);
        write_le(&mut data, 1_u16);
        write_le(&mut data, 0_u32);
        write_le(&mut data, 0_u32);
        write_le(&mut data, 0_u32);
        write_le(&mut data, 0xE0_u16);
        write_le(&mut data, if is_exe { 0x0102_u16 } else { 0x2102 });

        // PE32 optional header
        write_le(&mut data, 0x010B_u16);
        data.extend_from_slice(&[0x30, 0x00]);
        write_le(&mut data, FILE_ALIGNMENT);
        write_le(&mut data, 0_u32);
        write_le(&mut data, 0_u32);
        write_le(&mut data, 0_u32);
        write_le(&mut data, TEXT_RVA);
        write_le(&mut data, 0_u32);
        write_le(&mut data, if is_exe { 0x0040_0000_u32 } else { 0x1000_0000 });
        write_le(&mut data, SECTION_ALIGNMENT);
        write_le(&mut data, FILE_ALIGNMENT);
        for version in [4_u16, 0, 0, 0, 4, 0] {
            write_le(&mut data, version);
        }
        write_le(&mut data, 0_u32);
        write_le(&mut data, TEXT_RVA + SECTION_ALIGNMENT);
        write_le(&mut data, FILE_ALIGNMENT);
        write_le(&mut data, 0_u32);
        write_le(&mut data, 3_u16);
        write_le(&mut data, 0x8540_u16);
        for size in [0x0010_0000_u32, 0x1000, 0x0010_0000, 0x1000, 0, 16] {
            write_le(&mut data, size);
        }
        for directory in 0..16 {
            if directory == DIRECTORY_CLR {
                write_le(&mut data, TEXT_RVA);
                #[allow(clippy::cast_possible_truncation)]
                write_le(&mut data, COR20_HEADER_SIZE as u32);
            } else {
                write_le(&mut data, 0_u64);
            }
        }

        data.extend_from_slice(b".text\0\0\0");
        #[allow(clippy::cast_possible_truncation)]
        write_le(&mut data, COR20_HEADER_SIZE as u32);
        write_le(&mut data, TEXT_RVA);
        write_le(&mut data, FILE_ALIGNMENT);
        write_le(&mut data, FILE_ALIGNMENT);
        write_le(&mut data, 0_u64);
        write_le(&mut data, 0_u32);
        write_le(&mut data, 0x6000_0020_u32);
        data.resize(FILE_ALIGNMENT as usize, 0);

        let cor20 = Cor20Header::new();
        data.extend_from_slice(&cor20.to_bytes());
        data.resize(2 * FILE_ALIGNMENT as usize, 0);

        PeImage {
            data,
            pe_offset: PE_OFFSET,
            is_pe32_plus: false,
            section_alignment: SECTION_ALIGNMENT,
            file_alignment: FILE_ALIGNMENT,
            size_of_headers: FILE_ALIGNMENT,
            sections: vec![Section {
                name: ".text".to_string(),
                virtual_address: TEXT_RVA,
                #[allow(clippy::cast_possible_truncation)]
                virtual_size: COR20_HEADER_SIZE as u32,
                pointer_to_raw_data: FILE_ALIGNMENT,
                size_of_raw_data: FILE_ALIGNMENT,
                characteristics: 0x6000_0020,
            }],
            clr_rva: TEXT_RVA,
            cor20,
        }
    }

    /// The raw image bytes
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The section table
    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// The CLI header
    #[must_use]
    pub fn cor20(&self) -> &Cor20Header {
        &self.cor20
    }

    /// Returns true for a PE32+ (64-bit) optional header
    #[must_use]
    pub fn is_pe32_plus(&self) -> bool {
        self.is_pe32_plus
    }

    /// Translate an RVA into a file offset
    #[must_use]
    pub fn rva_to_offset(&self, rva: u32) -> Option<usize> {
        if rva < self.size_of_headers {
            return Some(rva as usize);
        }

        let section = self.sections.iter().find(|section| section.contains_rva(rva))?;
        let delta = rva - section.virtual_address;
        if delta >= section.size_of_raw_data {
            return None;
        }
        Some(section.pointer_to_raw_data as usize + delta as usize)
    }

    /// The file bytes from `rva` to the end of its section's raw data.
    ///
    /// # Errors
    /// Returns an out-of-bounds error if `rva` is not backed by file data.
    pub fn data_from_rva(&self, rva: u32) -> Result<&[u8]> {
        let offset = self.rva_to_offset(rva).ok_or(OutOfBounds)?;
        let end = self
            .sections
            .iter()
            .find(|section| section.contains_rva(rva))
            .map_or(self.size_of_headers as usize, |section| {
                section.pointer_to_raw_data as usize + section.size_of_raw_data as usize
            });
        self.data.get(offset..end.min(self.data.len())).ok_or(OutOfBounds)
    }

    /// `len` bytes starting at `rva`.
    ///
    /// # Errors
    /// Returns an out-of-bounds error if the range is not backed by file data.
    pub fn slice_at_rva(&self, rva: u32, len: usize) -> Result<&[u8]> {
        self.data_from_rva(rva)?.get(..len).ok_or(OutOfBounds)
    }

    /// The metadata block the CLI header points at.
    ///
    /// # Errors
    /// Returns an out-of-bounds error if it is not backed by file data.
    pub fn metadata(&self) -> Result<&[u8]> {
        self.slice_at_rva(self.cor20.meta_data_rva, self.cor20.meta_data_size as usize)
    }

    fn optional_header_offset(&self) -> usize {
        self.pe_offset + 24
    }

    fn directory_offset(&self, index: usize) -> usize {
        self.optional_header_offset() + if self.is_pe32_plus { 112 } else { 96 } + index * 8
    }

    fn section_table_offset(&self) -> Result<usize> {
        let size = read_le::<u16>(self.data.get(self.pe_offset + 20..).ok_or(OutOfBounds)?)?;
        Ok(self.optional_header_offset() + size as usize)
    }

    fn directory(&self, index: usize) -> Result<(u32, u32)> {
        let offset = self.directory_offset(index);
        let bytes = self.data.get(offset..offset + 8).ok_or(OutOfBounds)?;
        Ok((read_le::<u32>(bytes)?, read_le::<u32>(&bytes[4..])?))
    }

    /// The RVA range of a trailing `.meta` section that a new write may replace.
    ///
    /// The section qualifies if it is the last one, holds the current metadata and nothing
    /// else in the headers points into it.
    #[must_use]
    pub fn replaceable_section(&self) -> Option<Range<u32>> {
        let last = self.sections.last()?;
        if last.name != META_SECTION_NAME || self.sections.len() < 2 {
            return None;
        }
        let range = last.virtual_address..last.virtual_address + last.virtual_size.max(last.size_of_raw_data);
        if !range.contains(&self.cor20.meta_data_rva) {
            return None;
        }

        let cor20 = &self.cor20;
        let pointers = [
            self.clr_rva,
            cor20.resource_rva,
            cor20.strong_name_signature_rva,
            cor20.vtable_fixups_rva,
            cor20.export_address_table_jmp_rva,
            cor20.managed_native_header_rva,
        ];
        if pointers.iter().any(|rva| range.contains(rva)) {
            return None;
        }
        for index in (0..16).filter(|index| *index != DIRECTORY_CERTIFICATE) {
            match self.directory(index) {
                Ok((rva, _)) if !range.contains(&rva) => {}
                _ => return None,
            }
        }
        Some(range)
    }

    /// Decide where the `.meta` section of the next write goes
    #[must_use]
    pub fn place_section(&self, reuse: bool) -> SectionPlacement {
        if reuse {
            if let Some(range) = self.replaceable_section() {
                return SectionPlacement {
                    virtual_address: range.start,
                    reuse: true,
                };
            }
        }

        let end = self
            .sections
            .iter()
            .map(|section| section.virtual_address + section.virtual_size.max(section.size_of_raw_data))
            .max()
            .unwrap_or(self.size_of_headers);
        SectionPlacement {
            virtual_address: align(end, self.section_alignment),
            reuse: false,
        }
    }

    /// Produce the final image: the kept original bytes plus a `.meta` section with
    /// `content`, with the CLI and optional headers updated to point at the metadata at
    /// `metadata_rva`.
    ///
    /// # Errors
    /// Returns [`Error::NotSupported`] if the headers have no room for another section
    /// entry, and an out-of-bounds error if the header fields lie outside the image.
    pub fn assemble(
        &self,
        placement: SectionPlacement,
        content: &[u8],
        metadata_rva: u32,
        metadata_size: u32,
    ) -> Result<Vec<u8>> {
        let mut sections = self.sections.clone();
        let mut out = self.data.clone();
        let mut initialized_data = read_le::<u32>(out.get(self.optional_header_offset() + 8..).ok_or(OutOfBounds)?)?;

        if placement.reuse {
            if let Some(old) = sections.pop() {
                out.truncate(old.pointer_to_raw_data as usize);
                initialized_data = initialized_data.wrapping_sub(old.size_of_raw_data);
            }
        } else {
            let (certificate, _) = self.directory(DIRECTORY_CERTIFICATE)?;
            let sections_end = sections
                .iter()
                .map(|section| section.pointer_to_raw_data as usize + section.size_of_raw_data as usize)
                .max()
                .unwrap_or(0);
            if certificate != 0 && certificate as usize >= sections_end && (certificate as usize) < out.len() {
                out.truncate(certificate as usize);
            }
        }

        let table = self.section_table_offset()?;
        let entry = table + sections.len() * SECTION_HEADER_SIZE;
        let first_raw = sections
            .iter()
            .filter(|section| section.size_of_raw_data > 0)
            .map(|section| section.pointer_to_raw_data)
            .min()
            .unwrap_or(u32::MAX);
        let mut size_of_headers = self.size_of_headers;
        if (entry + SECTION_HEADER_SIZE) as u64 > u64::from(size_of_headers.min(first_raw)) {
            let grown = size_of_headers + self.file_alignment;
            let first_va = sections.iter().map(|s| s.virtual_address).min().unwrap_or(u32::MAX);
            if (entry + SECTION_HEADER_SIZE) as u64 > u64::from(grown) || grown > first_va {
                return Err(Error::NotSupported);
            }

            let insert_at = (size_of_headers as usize).min(out.len());
            out.splice(insert_at..insert_at, vec![0; self.file_alignment as usize]);
            for (index, section) in sections.iter_mut().enumerate() {
                if section.pointer_to_raw_data != 0 {
                    section.pointer_to_raw_data += self.file_alignment;
                    patch_u32(&mut out, table + index * SECTION_HEADER_SIZE + 20, section.pointer_to_raw_data)?;
                }
            }
            size_of_headers = grown;
        }

        #[allow(clippy::cast_possible_truncation)]
        let raw_pointer = align(out.len() as u32, self.file_alignment);
        out.resize(raw_pointer as usize, 0);
        out.extend_from_slice(content);
        #[allow(clippy::cast_possible_truncation)]
        let virtual_size = content.len() as u32;
        let raw_size = align(virtual_size, self.file_alignment);
        out.resize((raw_pointer + raw_size) as usize, 0);

        let mut header = Vec::with_capacity(SECTION_HEADER_SIZE);
        let mut name = [0_u8; 8];
        name[..META_SECTION_NAME.len()].copy_from_slice(META_SECTION_NAME.as_bytes());
        header.extend_from_slice(&name);
        write_le(&mut header, virtual_size);
        write_le(&mut header, placement.virtual_address);
        write_le(&mut header, raw_size);
        write_le(&mut header, raw_pointer);
        write_le(&mut header, 0_u64);
        write_le(&mut header, 0_u32);
        write_le(&mut header, META_SECTION_CHARACTERISTICS);
        out.get_mut(entry..entry + SECTION_HEADER_SIZE)
            .ok_or(OutOfBounds)?
            .copy_from_slice(&header);

        let optional = self.optional_header_offset();
        #[allow(clippy::cast_possible_truncation)]
        patch_u16(&mut out, self.pe_offset + 6, (sections.len() + 1) as u16)?;
        patch_u32(&mut out, optional + 8, initialized_data.wrapping_add(raw_size))?;
        patch_u32(
            &mut out,
            optional + 56,
            align(placement.virtual_address + virtual_size, self.section_alignment),
        )?;
        patch_u32(&mut out, optional + 60, size_of_headers)?;
        for index in [DIRECTORY_CERTIFICATE, DIRECTORY_DEBUG] {
            patch_u32(&mut out, self.directory_offset(index), 0)?;
            patch_u32(&mut out, self.directory_offset(index) + 4, 0)?;
        }

        let mut cor20 = self.cor20;
        cor20.meta_data_rva = metadata_rva;
        cor20.meta_data_size = metadata_size;
        cor20.flags &= !(FLAG_STRONG_NAME_SIGNED | FLAG_IL_LIBRARY);
        cor20.strong_name_signature_rva = 0;
        cor20.strong_name_signature_size = 0;
        cor20.managed_native_header_rva = 0;
        cor20.managed_native_header_size = 0;
        // the CLI header lives in a kept section, whose file offset may have moved
        let shift = size_of_headers - self.size_of_headers;
        let clr_offset = self.rva_to_offset(self.clr_rva).ok_or(OutOfBounds)?;
        let clr_offset = if clr_offset >= self.size_of_headers as usize {
            clr_offset + shift as usize
        } else {
            clr_offset
        };
        out.get_mut(clr_offset..clr_offset + COR20_HEADER_SIZE)
            .ok_or(OutOfBounds)?
            .copy_from_slice(&cor20.to_bytes());

        patch_u32(&mut out, optional + 64, 0)?;
        let checksum = pe_checksum(&out, optional + 64);
        patch_u32(&mut out, optional + 64, checksum)?;
        Ok(out)
    }
}

/// The PE checksum: a 16-bit one's complement style sum of all words, skipping the checksum
/// field, plus the file length.
#[must_use]
pub fn pe_checksum(data: &[u8], checksum_offset: usize) -> u32 {
    let mut sum: u64 = 0;
    for (index, chunk) in data.chunks(2).enumerate() {
        let offset = index * 2;
        if offset == checksum_offset || offset == checksum_offset + 2 {
            continue;
        }
        let word = match chunk {
            [low, high] => u16::from_le_bytes([*low, *high]),
            [low] => u16::from(*low),
            _ => 0,
        };
        sum += u64::from(word);
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum = (sum & 0xFFFF) + (sum >> 16);

    #[allow(clippy::cast_possible_truncation)]
    let length = data.len() as u32;
    (sum as u32).wrapping_add(length)
}
