//! Item location box. See ISO 14496-12:2015 § 8.11.3
//!
//! The version and the field widths are not fixed: they are chosen while
//! serializing, based on the largest offset/length/item ID present and on
//! whether any item needs a construction method other than file offsets.

use crate::bitstream::BitStream;
use crate::boxes::FullBoxHeader;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructionMethod {
    /// Offsets into the file as a whole.
    FileOffset,
    /// Offsets into the payload of the `idat` box inside `meta`.
    IdatOffset,
    /// Offsets into another item's data (not produced by this writer).
    ItemOffset,
}

impl ConstructionMethod {
    fn to_u8(self) -> u8 {
        match self {
            Self::FileOffset => 0,
            Self::IdatOffset => 1,
            Self::ItemOffset => 2,
        }
    }

    fn from_u16(value: u16) -> Result<Self> {
        match value {
            0 => Ok(Self::FileOffset),
            1 => Ok(Self::IdatOffset),
            2 => Ok(Self::ItemOffset),
            _ => Err(Error::malformed(
                "construction_method is taken from the set 0, 1 or 2 per ISO 14496-12:2015 § 8.11.3.3",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ItemLocationExtent {
    pub extent_offset: u64,
    pub extent_length: u64,
}

#[derive(Debug, Clone)]
pub struct ItemLocation {
    pub item_id: u32,
    pub construction_method: ConstructionMethod,
    /// 0 means "this file"; external data references are not produced.
    pub data_reference_index: u16,
    pub base_offset: u64,
    pub extents: Vec<ItemLocationExtent>,
}

impl ItemLocation {
    pub fn new(item_id: u32, construction_method: ConstructionMethod) -> Self {
        Self {
            item_id,
            construction_method,
            data_reference_index: 0,
            base_offset: 0,
            extents: Vec::new(),
        }
    }

    pub fn add_extent(&mut self, extent_offset: u64, extent_length: u64) {
        self.extents.push(ItemLocationExtent {
            extent_offset,
            extent_length,
        });
    }
}

#[derive(Debug, Clone, Default)]
pub struct ItemLocationBox {
    items: Vec<ItemLocation>,
}

/// Field widths in bytes as four-bit codes; only 0, 4 and 8 are legal.
fn width_for(max_value: u64) -> u64 {
    if max_value > u64::from(u32::MAX) {
        8
    } else {
        4
    }
}

impl ItemLocationBox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&mut self, item: ItemLocation) {
        self.items.push(item);
    }

    pub fn items(&self) -> &[ItemLocation] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [ItemLocation] {
        &mut self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn pick_version(&self) -> u8 {
        if self.items.iter().any(|i| i.item_id > u32::from(u16::MAX)) {
            2
        } else if self
            .items
            .iter()
            .any(|i| i.construction_method != ConstructionMethod::FileOffset)
        {
            1
        } else {
            0
        }
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let version = self.pick_version();
        let offset_size = width_for(
            self.items
                .iter()
                .flat_map(|i| i.extents.iter().map(|e| e.extent_offset))
                .max()
                .unwrap_or(0),
        );
        let length_size = width_for(
            self.items
                .iter()
                .flat_map(|i| i.extents.iter().map(|e| e.extent_length))
                .max()
                .unwrap_or(0),
        );
        let max_base = self.items.iter().map(|i| i.base_offset).max().unwrap_or(0);
        let base_offset_size = if max_base == 0 { 0 } else { width_for(max_base) };

        let marker = FullBoxHeader::new(b"iloc", version, 0).start_box(w);
        w.write_bits(offset_size, 4);
        w.write_bits(length_size, 4);
        w.write_bits(base_offset_size, 4);
        w.write_bits(0, 4); // index_size in v1/2, reserved in v0
        if version == 2 {
            w.write_u32(self.items.len() as u32);
        } else {
            w.write_u16(self.items.len() as u16);
        }
        for item in &self.items {
            if version == 2 {
                w.write_u32(item.item_id);
            } else {
                w.write_u16(item.item_id as u16);
            }
            if version > 0 {
                w.write_bits(0, 12); // reserved
                w.write_bits(u64::from(item.construction_method.to_u8()), 4);
            }
            w.write_u16(item.data_reference_index);
            if base_offset_size > 0 {
                w.write_bits(item.base_offset, base_offset_size as u32 * 8);
            }
            w.write_u16(item.extents.len() as u16);
            for extent in &item.extents {
                w.write_bits(extent.extent_offset, offset_size as u32 * 8);
                w.write_bits(extent.extent_length, length_size as u32 * 8);
            }
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"iloc", 0, 0);
        full_box.parse(r)?;
        let version = full_box.version();
        if version > 2 {
            return Err(Error::parse(r.position(), "unsupported version in 'iloc' box"));
        }
        let offset_size = r.read_bits(4)?;
        let length_size = r.read_bits(4)?;
        let base_offset_size = r.read_bits(4)?;
        let index_size = if version > 0 { r.read_bits(4)? } else { r.read_bits(4).map(|_| 0)? };
        for width in [offset_size, length_size, base_offset_size, index_size] {
            if width != 0 && width != 4 && width != 8 {
                return Err(Error::parse(r.position(), "iloc field width must be 0, 4 or 8"));
            }
        }
        let item_count = if version == 2 {
            r.read_u32()?
        } else {
            u32::from(r.read_u16()?)
        };
        let mut iloc = Self::new();
        for _ in 0..item_count {
            let item_id = if version == 2 {
                r.read_u32()?
            } else {
                u32::from(r.read_u16()?)
            };
            let construction_method = if version > 0 {
                r.read_bits(12)?; // reserved
                ConstructionMethod::from_u16(r.read_bits(4)? as u16)?
            } else {
                ConstructionMethod::FileOffset
            };
            let data_reference_index = r.read_u16()?;
            let base_offset = read_sized(r, base_offset_size)?;
            let extent_count = r.read_u16()?;
            let mut item = ItemLocation {
                item_id,
                construction_method,
                data_reference_index,
                base_offset,
                extents: Vec::with_capacity(usize::from(extent_count)),
            };
            for _ in 0..extent_count {
                if index_size > 0 {
                    read_sized(r, index_size)?; // extent_index, unused
                }
                let extent_offset = read_sized(r, offset_size)?;
                let extent_length = read_sized(r, length_size)?;
                item.extents.push(ItemLocationExtent {
                    extent_offset,
                    extent_length,
                });
            }
            iloc.add_item(item);
        }
        Ok(iloc)
    }
}

fn read_sized(r: &mut BitStream, byte_width: u32) -> Result<u64> {
    match byte_width {
        0 => Ok(0),
        4 => Ok(u64::from(r.read_u32()?)),
        8 => r.read_u64(),
        _ => Err(Error::malformed("iloc field width must be 0, 4 or 8")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(iloc: &ItemLocationBox) -> ItemLocationBox {
        let mut w = BitStream::new();
        iloc.write_box(&mut w).unwrap();
        w.reset();
        let (mut sub, tag) = w.read_sub_box_stream().unwrap();
        assert_eq!(tag, b"iloc");
        ItemLocationBox::parse_box(&mut sub).unwrap()
    }

    #[test]
    fn file_offsets_only_stays_version_zero() {
        let mut iloc = ItemLocationBox::new();
        let mut item = ItemLocation::new(1, ConstructionMethod::FileOffset);
        item.add_extent(4242, 1000);
        iloc.add_item(item);
        assert_eq!(iloc.pick_version(), 0);
        let parsed = round_trip(&iloc);
        assert_eq!(parsed.items()[0].extents[0].extent_offset, 4242);
        assert_eq!(parsed.items()[0].extents[0].extent_length, 1000);
    }

    #[test]
    fn idat_construction_promotes_to_version_one() {
        let mut iloc = ItemLocationBox::new();
        let mut item = ItemLocation::new(5, ConstructionMethod::IdatOffset);
        item.add_extent(0, 8);
        iloc.add_item(item);
        assert_eq!(iloc.pick_version(), 1);
        let parsed = round_trip(&iloc);
        assert_eq!(
            parsed.items()[0].construction_method,
            ConstructionMethod::IdatOffset
        );
    }

    #[test]
    fn wide_item_id_promotes_to_version_two() {
        let mut iloc = ItemLocationBox::new();
        iloc.add_item(ItemLocation::new(0x12345, ConstructionMethod::FileOffset));
        assert_eq!(iloc.pick_version(), 2);
        let parsed = round_trip(&iloc);
        assert_eq!(parsed.items()[0].item_id, 0x12345);
    }

    #[test]
    fn offsets_beyond_u32_use_eight_byte_fields() {
        let mut iloc = ItemLocationBox::new();
        let mut item = ItemLocation::new(1, ConstructionMethod::FileOffset);
        item.add_extent(u64::from(u32::MAX) + 10, 77);
        iloc.add_item(item);
        let parsed = round_trip(&iloc);
        assert_eq!(
            parsed.items()[0].extents[0].extent_offset,
            u64::from(u32::MAX) + 10
        );
    }
}
