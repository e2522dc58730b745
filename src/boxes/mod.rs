//! ISOBMFF box model and the box catalog.
//!
//! Every box is a length-prefixed record: 32-bit size, 4-byte type,
//! optionally a 64-bit `largesize` (when the 32-bit field is 1) and a 16-byte
//! uuid (when the type is `uuid`). A full box adds a version byte and 24-bit
//! flags. Sizes are computed post hoc: serialization writes a zero size,
//! appends the payload and patches the size field once the byte length is
//! known. See ISO 14496-12:2015 § 4.2

use crate::bitstream::BitStream;
use crate::fourcc::FourCC;
use crate::{Error, Result};

pub mod codecbox;
pub mod fragments;
pub mod ftyp;
pub mod grid;
pub mod iinf;
pub mod iloc;
pub mod iprp;
pub mod iref;
pub mod meta;
pub mod moov;
pub mod omaf;
pub mod properties;
pub mod sampleentry;

/// Common first fields of every box.
#[derive(Debug, Clone)]
pub struct BoxHeader {
    box_type: FourCC,
    user_type: Option<[u8; 16]>,
    large_size: bool,
    /// Byte size including the header; meaningful after `parse`.
    size: u64,
}

impl BoxHeader {
    pub fn new(box_type: &[u8; 4]) -> Self {
        Self {
            box_type: FourCC::new(box_type),
            user_type: None,
            large_size: false,
            size: 0,
        }
    }

    /// A `uuid` box with the given extended type.
    pub fn with_user_type(user_type: [u8; 16]) -> Self {
        Self {
            box_type: FourCC::new(b"uuid"),
            user_type: Some(user_type),
            large_size: false,
            size: 0,
        }
    }

    pub fn box_type(&self) -> FourCC {
        self.box_type
    }

    pub fn user_type(&self) -> Option<&[u8; 16]> {
        self.user_type.as_ref()
    }

    /// Use the 64-bit size field. Must be requested before serialization.
    pub fn set_large_size(&mut self) {
        self.large_size = true;
    }

    pub fn large_size(&self) -> bool {
        self.large_size
    }

    /// Parsed byte size of the whole box.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Serialized header length in bytes.
    pub fn header_size(&self) -> u64 {
        let mut size = 8;
        if self.large_size {
            size += 8;
        }
        if self.user_type.is_some() {
            size += 16;
        }
        size
    }

    /// Write the header with a placeholder size and remember where it went.
    pub fn start_box(&self, w: &mut BitStream) -> BoxMarker {
        let start = w.size();
        if self.large_size {
            w.write_u32(1);
            w.write_u32(self.box_type.value());
            w.write_u64(0);
        } else {
            w.write_u32(0);
            w.write_u32(self.box_type.value());
        }
        if let Some(user_type) = &self.user_type {
            w.write_bytes(user_type);
        }
        BoxMarker {
            start,
            box_type: self.box_type,
            large_size: self.large_size,
        }
    }

    pub fn parse(&mut self, r: &mut BitStream) -> Result<()> {
        let start = r.position();
        let size32 = r.read_u32()?;
        self.box_type = FourCC::from(r.read_u32()?);
        if size32 == 1 {
            self.large_size = true;
            self.size = r.read_u64()?;
        } else {
            self.large_size = false;
            self.size = u64::from(size32);
        }
        if self.box_type == b"uuid" {
            let uuid: [u8; 16] = r
                .read_bytes(16)?
                .try_into()
                .expect("slice length was just checked");
            self.user_type = Some(uuid);
        }
        if self.size < self.header_size() {
            return Err(Error::parse(start, "box size smaller than its header"));
        }
        Ok(())
    }
}

/// Records where a box header was serialized so its size can be patched.
#[must_use = "the size field stays zero until update_size is called"]
pub struct BoxMarker {
    start: u64,
    box_type: FourCC,
    large_size: bool,
}

impl BoxMarker {
    /// Patch the size field now that the payload has been appended.
    pub fn update_size(self, w: &mut BitStream) -> Result<()> {
        let size = w.size() - self.start;
        if self.large_size {
            w.patch_u64(self.start + 8, size);
        } else {
            if size > u64::from(u32::MAX) {
                return Err(Error::BoxTooLarge(self.box_type));
            }
            w.patch_u32(self.start, size as u32);
        }
        Ok(())
    }
}

/// Box with a version byte and 24-bit flags. See ISO 14496-12:2015 § 4.2
#[derive(Debug, Clone)]
pub struct FullBoxHeader {
    header: BoxHeader,
    version: u8,
    flags: u32,
}

impl FullBoxHeader {
    pub fn new(box_type: &[u8; 4], version: u8, flags: u32) -> Self {
        Self {
            header: BoxHeader::new(box_type),
            version,
            flags,
        }
    }

    pub fn box_type(&self) -> FourCC {
        self.header.box_type()
    }

    pub fn size(&self) -> u64 {
        self.header.size()
    }

    pub fn set_large_size(&mut self) {
        self.header.set_large_size();
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn set_version(&mut self, version: u8) {
        self.version = version;
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    pub fn set_flag_bit(&mut self, bit: u32, value: bool) {
        if value {
            self.flags |= 1 << bit;
        } else {
            self.flags &= !(1 << bit);
        }
    }

    pub fn start_box(&self, w: &mut BitStream) -> BoxMarker {
        let marker = self.header.start_box(w);
        w.write_u8(self.version);
        w.write_u24(self.flags);
        marker
    }

    pub fn parse(&mut self, r: &mut BitStream) -> Result<()> {
        self.header.parse(r)?;
        self.version = r.read_u8()?;
        self.flags = r.read_u24()?;
        Ok(())
    }
}

/// A box this writer does not understand, preserved byte for byte so it can
/// be passed through when recomposing streams.
#[derive(Debug, Clone)]
pub struct RawBox {
    header: BoxHeader,
    bytes: Vec<u8>,
}

impl RawBox {
    pub fn box_type(&self) -> FourCC {
        self.header.box_type()
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        w.write_bytes(&self.bytes);
        Ok(())
    }

    /// Swallow a whole box, header included.
    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"    ");
        header.parse(r)?;
        warn!("passing through unknown box '{}'", header.box_type());
        r.set_position(0);
        let bytes = r.read_bytes(header.size())?;
        Ok(Self { header, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_equals_serialized_length() {
        let mut w = BitStream::new();
        let header = BoxHeader::new(b"free");
        let marker = header.start_box(&mut w);
        w.write_bytes(&[0u8; 13]);
        marker.update_size(&mut w).unwrap();
        assert_eq!(w.size(), 8 + 13);
        w.reset();
        assert_eq!(w.read_u32().unwrap(), 8 + 13);
    }

    #[test]
    fn large_size_uses_64_bit_field() {
        let mut w = BitStream::new();
        let mut header = BoxHeader::new(b"mdat");
        header.set_large_size();
        let marker = header.start_box(&mut w);
        w.write_bytes(&[0xaa; 4]);
        marker.update_size(&mut w).unwrap();
        w.reset();
        assert_eq!(w.read_u32().unwrap(), 1);
        assert_eq!(FourCC::from(w.read_u32().unwrap()), b"mdat");
        assert_eq!(w.read_u64().unwrap(), 20);
    }

    #[test]
    fn full_box_header_round_trip() {
        let mut w = BitStream::new();
        let full = FullBoxHeader::new(b"meta", 0, 0x00_00_07);
        let marker = full.start_box(&mut w);
        marker.update_size(&mut w).unwrap();
        w.reset();
        let mut parsed = FullBoxHeader::new(b"    ", 0, 0);
        parsed.parse(&mut w).unwrap();
        assert_eq!(parsed.box_type(), b"meta");
        assert_eq!(parsed.version(), 0);
        assert_eq!(parsed.flags(), 7);
        assert_eq!(parsed.size(), 12);
    }

    #[test]
    fn uuid_box_header_carries_user_type() {
        let mut w = BitStream::new();
        let header = BoxHeader::with_user_type([7; 16]);
        let marker = header.start_box(&mut w);
        marker.update_size(&mut w).unwrap();
        w.reset();
        let mut parsed = BoxHeader::new(b"    ");
        parsed.parse(&mut w).unwrap();
        assert_eq!(parsed.box_type(), b"uuid");
        assert_eq!(parsed.user_type(), Some(&[7u8; 16]));
        assert_eq!(parsed.size(), 24);
    }
}
