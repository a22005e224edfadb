//! The metadata root (`BSJB` header) and its stream headers (ECMA-335 II.24.2.1 - II.24.2.2).
//!
//! The root starts with the signature, a length-prefixed version string padded to four bytes
//! and the stream count. Each stream header gives an offset relative to the root, a size and a
//! NUL-terminated name padded to four bytes.

use crate::{
    file::{io::write_le, parser::Parser},
    Error::OutOfBounds,
    Result,
};

/// Metadata root signature, `BSJB`
pub const CIL_HEADER_MAGIC: u32 = 0x424A_5342;

/// The version string written into generated images
pub const DEFAULT_VERSION: &str = "v4.0.30319";

const STREAM_NAMES: [&str; 6] = ["#~", "#-", "#Strings", "#US", "#GUID", "#Blob"];

/// A stream header: a named byte range relative to the metadata root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    /// Offset from the start of the metadata root
    pub offset: u32,
    /// Size in bytes, a multiple of four
    pub size: u32,
    /// Stream name, e.g. `#Strings`
    pub name: String,
}

/// The metadata root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root {
    /// Runtime version the metadata was built against, e.g. `v4.0.30319`
    pub version: String,
    /// The stream headers in file order
    pub stream_headers: Vec<StreamHeader>,
}

impl Root {
    /// Parse the root at the start of `data` (the whole metadata block).
    ///
    /// # Errors
    /// Returns an error if the signature is wrong, a header is truncated, a stream name is
    /// unknown or duplicated, or a stream lies outside `data`.
    pub fn read(data: &[u8]) -> Result<Root> {
        if data.len() < 20 {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(data);
        let signature = parser.read_le::<u32>()?;
        if signature != CIL_HEADER_MAGIC {
            return Err(malformed_error!(
                "CIL_HEADER_MAGIC does not match - {:#x}",
                signature
            ));
        }
        // major, minor, reserved
        parser.advance_by(8)?;

        let length = parser.read_le::<u32>()? as usize;
        if length > 255 || length % 4 != 0 {
            return Err(malformed_error!("Invalid version string length - {}", length));
        }
        let raw = parser.read_bytes(length)?;
        let end = raw.iter().position(|byte| *byte == 0).unwrap_or(raw.len());
        let version = String::from_utf8_lossy(&raw[..end]).into_owned();

        let _flags = parser.read_le::<u16>()?;
        let count = parser.read_le::<u16>()?;
        if count == 0 || count as usize > STREAM_NAMES.len() {
            return Err(malformed_error!("Invalid stream count - {}", count));
        }

        let mut stream_headers: Vec<StreamHeader> = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let offset = parser.read_le::<u32>()?;
            let size = parser.read_le::<u32>()?;

            let start = parser.pos();
            let name = parser.read_string_utf8()?.to_string();
            if name.len() > 31 {
                return Err(malformed_error!("Stream name too long - {}", name));
            }
            parser.seek(start + ((name.len() + 1 + 3) & !3))?;

            if !STREAM_NAMES.contains(&name.as_str()) {
                return Err(malformed_error!("Invalid stream header name - {}", name));
            }
            if stream_headers.iter().any(|existing| existing.name == name) {
                return Err(malformed_error!("Duplicate stream - {}", name));
            }
            match offset.checked_add(size) {
                Some(end) if end as usize <= data.len() => {}
                _ => return Err(OutOfBounds),
            }

            stream_headers.push(StreamHeader { offset, size, name });
        }

        Ok(Root {
            version,
            stream_headers,
        })
    }

    /// The bytes of stream `name` within `data`, if present
    #[must_use]
    pub fn stream<'a>(&self, data: &'a [u8], name: &str) -> Option<&'a [u8]> {
        self.stream_headers
            .iter()
            .find(|header| header.name == name)
            .and_then(|header| data.get(header.offset as usize..(header.offset + header.size) as usize))
    }

    /// Assemble a metadata block from named streams in the given order.
    ///
    /// Each stream is padded to four bytes; its header records the padded size.
    #[must_use]
    pub fn assemble(version: &str, streams: &[(&str, &[u8])]) -> Vec<u8> {
        let mut version_bytes = version.as_bytes().to_vec();
        version_bytes.push(0);
        while version_bytes.len() % 4 != 0 {
            version_bytes.push(0);
        }

        let padded = |len: usize| (len + 3) & !3;
        let headers_size: usize = streams
            .iter()
            .map(|(name, _)| 8 + padded(name.len() + 1))
            .sum();
        let mut offset = 20 + version_bytes.len() + headers_size;

        let mut out = Vec::with_capacity(offset + streams.iter().map(|(_, s)| padded(s.len())).sum::<usize>());
        write_le(&mut out, CIL_HEADER_MAGIC);
        write_le(&mut out, 1_u16);
        write_le(&mut out, 1_u16);
        write_le(&mut out, 0_u32);
        #[allow(clippy::cast_possible_truncation)]
        write_le(&mut out, version_bytes.len() as u32);
        out.extend_from_slice(&version_bytes);
        write_le(&mut out, 0_u16);
        #[allow(clippy::cast_possible_truncation)]
        write_le(&mut out, streams.len() as u16);

        for (name, data) in streams {
            let size = padded(data.len());
            #[allow(clippy::cast_possible_truncation)]
            {
                write_le(&mut out, offset as u32);
                write_le(&mut out, size as u32);
            }
            out.extend_from_slice(name.as_bytes());
            out.push(0);
            while out.len() % 4 != 0 {
                out.push(0);
            }
            offset += size;
        }

        for (_, data) in streams {
            out.extend_from_slice(data);
            while out.len() % 4 != 0 {
                out.push(0);
            }
        }
        out
    }
}
