//! The CLI header (`IMAGE_COR20_HEADER`, ECMA-335 II.25.3.3).
//!
//! The header sits in the data directory entry 14 of the PE optional header. It points at the
//! metadata root and the managed resources, carries the entry point token and the runtime
//! flags. The writer rewrites it in place: only the metadata location, the strong-name
//! signature and its flag change.

use crate::{
    file::{io::write_le, parser::Parser},
    Error::OutOfBounds,
    Result,
};

/// Size of the header in bytes
pub const COR20_HEADER_SIZE: usize = 72;

/// `COMIMAGE_FLAGS_ILONLY`
pub const FLAG_IL_ONLY: u32 = 0x0000_0001;
/// `COMIMAGE_FLAGS_STRONGNAMESIGNED`
pub const FLAG_STRONG_NAME_SIGNED: u32 = 0x0000_0008;
/// `COMIMAGE_FLAGS_NATIVE_ENTRYPOINT`
pub const FLAG_NATIVE_ENTRYPOINT: u32 = 0x0000_0010;

/// The CLI header of a managed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Cor20Header {
    pub cb: u32,
    pub major_runtime_version: u16,
    pub minor_runtime_version: u16,
    pub meta_data_rva: u32,
    pub meta_data_size: u32,
    pub flags: u32,
    /// `MethodDef` or `File` token, or a native RVA with [`FLAG_NATIVE_ENTRYPOINT`]
    pub entry_point_token: u32,
    pub resource_rva: u32,
    pub resource_size: u32,
    pub strong_name_signature_rva: u32,
    pub strong_name_signature_size: u32,
    pub code_manager_table_rva: u32,
    pub code_manager_table_size: u32,
    pub vtable_fixups_rva: u32,
    pub vtable_fixups_size: u32,
    pub export_address_table_jmp_rva: u32,
    pub export_address_table_jmp_size: u32,
    pub managed_native_header_rva: u32,
    pub managed_native_header_size: u32,
}

impl Cor20Header {
    /// The header of a freshly generated IL-only image, runtime 2.5
    #[must_use]
    pub fn new() -> Self {
        Cor20Header {
            cb: COR20_HEADER_SIZE as u32,
            major_runtime_version: 2,
            minor_runtime_version: 5,
            meta_data_rva: 0,
            meta_data_size: 0,
            flags: FLAG_IL_ONLY,
            entry_point_token: 0,
            resource_rva: 0,
            resource_size: 0,
            strong_name_signature_rva: 0,
            strong_name_signature_size: 0,
            code_manager_table_rva: 0,
            code_manager_table_size: 0,
            vtable_fixups_rva: 0,
            vtable_fixups_size: 0,
            export_address_table_jmp_rva: 0,
            export_address_table_jmp_size: 0,
            managed_native_header_rva: 0,
            managed_native_header_size: 0,
        }
    }

    /// Parse the header from the start of `data`.
    ///
    /// # Errors
    /// Returns an out-of-bounds error for short input and a malformed error if the size
    /// field, the runtime version or the metadata location is invalid.
    pub fn read(data: &[u8]) -> Result<Cor20Header> {
        if data.len() < COR20_HEADER_SIZE {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(data);
        let cb = parser.read_le::<u32>()?;
        if cb as usize != COR20_HEADER_SIZE {
            return Err(malformed_error!(
                "Invalid CLR header size: expected 72, got {}",
                cb
            ));
        }

        let major_runtime_version = parser.read_le::<u16>()?;
        let minor_runtime_version = parser.read_le::<u16>()?;
        if major_runtime_version == 0 || major_runtime_version > 10 {
            return Err(malformed_error!(
                "Invalid major runtime version: {}",
                major_runtime_version
            ));
        }

        let meta_data_rva = parser.read_le::<u32>()?;
        let meta_data_size = parser.read_le::<u32>()?;
        if meta_data_rva == 0 || meta_data_size == 0 {
            return Err(malformed_error!("CLR header has no metadata"));
        }
        if meta_data_size > 0x1000_0000 {
            return Err(malformed_error!(
                "Metadata size {} exceeds reasonable limit (256MB)",
                meta_data_size
            ));
        }

        Ok(Cor20Header {
            cb,
            major_runtime_version,
            minor_runtime_version,
            meta_data_rva,
            meta_data_size,
            flags: parser.read_le::<u32>()?,
            entry_point_token: parser.read_le::<u32>()?,
            resource_rva: parser.read_le::<u32>()?,
            resource_size: parser.read_le::<u32>()?,
            strong_name_signature_rva: parser.read_le::<u32>()?,
            strong_name_signature_size: parser.read_le::<u32>()?,
            code_manager_table_rva: parser.read_le::<u32>()?,
            code_manager_table_size: parser.read_le::<u32>()?,
            vtable_fixups_rva: parser.read_le::<u32>()?,
            vtable_fixups_size: parser.read_le::<u32>()?,
            export_address_table_jmp_rva: parser.read_le::<u32>()?,
            export_address_table_jmp_size: parser.read_le::<u32>()?,
            managed_native_header_rva: parser.read_le::<u32>()?,
            managed_native_header_size: parser.read_le::<u32>()?,
        })
    }

    /// Returns true if the image contains only IL (no native code besides stubs)
    #[must_use]
    pub fn is_il_only(&self) -> bool {
        self.flags & FLAG_IL_ONLY != 0
    }

    /// The header bytes
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(COR20_HEADER_SIZE);
        write_le(&mut out, self.cb);
        write_le(&mut out, self.major_runtime_version);
        write_le(&mut out, self.minor_runtime_version);
        for value in [
            self.meta_data_rva,
            self.meta_data_size,
            self.flags,
            self.entry_point_token,
            self.resource_rva,
            self.resource_size,
            self.strong_name_signature_rva,
            self.strong_name_signature_size,
            self.code_manager_table_rva,
            self.code_manager_table_size,
            self.vtable_fixups_rva,
            self.vtable_fixups_size,
            self.export_address_table_jmp_rva,
            self.export_address_table_jmp_size,
            self.managed_native_header_rva,
            self.managed_native_header_size,
        ] {
            write_le(&mut out, value);
        }
        out
    }
}

impl Default for Cor20Header {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let header_bytes = [
            0x48, 0x00, 0x00, 0x00,
            0x02, 0x00, 0x05, 0x00,
            0x6C, 0x20, 0x00, 0x00,
            0x44, 0x0B, 0x00, 0x00,
            0x09, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x06,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0xB0, 0x2B, 0x00, 0x00,
            0x80, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ];

        let header = Cor20Header::read(&header_bytes).unwrap();
        assert_eq!(header.meta_data_rva, 0x206C);
        assert_eq!(header.meta_data_size, 0x0B44);
        assert_eq!(header.flags, FLAG_IL_ONLY | FLAG_STRONG_NAME_SIGNED);
        assert_eq!(header.entry_point_token, 0x0600_0001);
        assert_eq!(header.strong_name_signature_rva, 0x2BB0);
        assert!(header.is_il_only());
        assert_eq!(header.to_bytes(), header_bytes.to_vec());
    }

    #[test]
    fn rejects_bad_headers() {
        assert!(Cor20Header::read(&[0x48; 40]).is_err());

        let mut bytes = Cor20Header::new().to_bytes();
        // no metadata directory
        assert!(Cor20Header::read(&bytes).is_err());
        bytes[0] = 0x40;
        assert!(Cor20Header::read(&bytes).is_err());
    }
}
