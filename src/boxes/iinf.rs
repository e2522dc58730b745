//! Item information box and its entries. See ISO 14496-12:2015 § 8.11.6

use crate::bitstream::BitStream;
use crate::boxes::FullBoxHeader;
use crate::fourcc::FourCC;
use crate::{Error, Result};

/// `infe`, versions 2 and 3. Version 3 is used when the item ID does not fit
/// in 16 bits. Flag bit 0 marks a hidden item.
#[derive(Debug, Clone)]
pub struct ItemInfoEntry {
    full_box: FullBoxHeader,
    pub item_id: u32,
    pub item_protection_index: u16,
    pub item_type: FourCC,
    pub item_name: String,
    /// Only meaningful for `mime` items.
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    /// Only meaningful for `uri ` items.
    pub item_uri_type: Option<String>,
}

impl ItemInfoEntry {
    pub fn new(item_id: u32, item_type: FourCC) -> Self {
        let version = if item_id > u32::from(u16::MAX) { 3 } else { 2 };
        Self {
            full_box: FullBoxHeader::new(b"infe", version, 0),
            item_id,
            item_protection_index: 0,
            item_type,
            item_name: String::new(),
            content_type: None,
            content_encoding: None,
            item_uri_type: None,
        }
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.full_box.set_flag_bit(0, hidden);
    }

    pub fn is_hidden(&self) -> bool {
        self.full_box.flags() & 1 != 0
    }

    pub fn flags(&self) -> u32 {
        self.full_box.flags()
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = self.full_box.start_box(w);
        match self.full_box.version() {
            2 => w.write_u16(self.item_id as u16),
            3 => w.write_u32(self.item_id),
            _ => return Err(Error::Inconsistent("infe version must be 2 or 3")),
        }
        w.write_u16(self.item_protection_index);
        w.write_u32(self.item_type.value());
        w.write_zero_terminated_string(&self.item_name);
        if self.item_type == b"mime" {
            w.write_zero_terminated_string(self.content_type.as_deref().unwrap_or(""));
            if let Some(encoding) = &self.content_encoding {
                w.write_zero_terminated_string(encoding);
            }
        } else if self.item_type == b"uri " {
            w.write_zero_terminated_string(self.item_uri_type.as_deref().unwrap_or(""));
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"infe", 0, 0);
        full_box.parse(r)?;
        let item_id = match full_box.version() {
            2 => u32::from(r.read_u16()?),
            3 => r.read_u32()?,
            _ => {
                return Err(Error::parse(
                    r.position(),
                    "unsupported version in 'infe' box",
                ))
            }
        };
        let item_protection_index = r.read_u16()?;
        let item_type = FourCC::from(r.read_u32()?);
        let item_name = r.read_zero_terminated_string()?;
        let mut entry = Self {
            full_box,
            item_id,
            item_protection_index,
            item_type,
            item_name,
            content_type: None,
            content_encoding: None,
            item_uri_type: None,
        };
        if item_type == b"mime" {
            entry.content_type = Some(r.read_zero_terminated_string()?);
            if r.num_bytes_left() > 0 {
                entry.content_encoding = Some(r.read_zero_terminated_string()?);
            }
        } else if item_type == b"uri " {
            entry.item_uri_type = Some(r.read_zero_terminated_string()?);
        }
        Ok(entry)
    }
}

/// `iinf`: the list of `infe` children.
#[derive(Debug, Clone, Default)]
pub struct ItemInfoBox {
    entries: Vec<ItemInfoEntry>,
}

impl ItemInfoBox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&mut self, entry: ItemInfoEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ItemInfoEntry] {
        &self.entries
    }

    pub fn entry_by_id(&self, item_id: u32) -> Option<&ItemInfoEntry> {
        self.entries.iter().find(|e| e.item_id == item_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let version = if self.entries.len() > usize::from(u16::MAX) {
            1
        } else {
            0
        };
        let marker = FullBoxHeader::new(b"iinf", version, 0).start_box(w);
        if version == 0 {
            w.write_u16(self.entries.len() as u16);
        } else {
            w.write_u32(self.entries.len() as u32);
        }
        for entry in &self.entries {
            entry.write_box(w)?;
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"iinf", 0, 0);
        full_box.parse(r)?;
        let entry_count = match full_box.version() {
            0 => u64::from(r.read_u16()?),
            1 => u64::from(r.read_u32()?),
            _ => {
                return Err(Error::parse(
                    r.position(),
                    "unsupported version in 'iinf' box",
                ))
            }
        };
        let mut iinf = Self::new();
        for _ in 0..entry_count {
            let (mut sub, tag) = r.read_sub_box_stream()?;
            if tag != b"infe" {
                return Err(Error::parse(
                    r.position(),
                    "iinf box should contain only infe boxes",
                ));
            }
            iinf.add_entry(ItemInfoEntry::parse_box(&mut sub)?);
        }
        Ok(iinf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infe_version_follows_item_id_width() {
        assert_eq!(ItemInfoEntry::new(1, FourCC::new(b"hvc1")).full_box.version(), 2);
        assert_eq!(
            ItemInfoEntry::new(0x1_0000, FourCC::new(b"hvc1")).full_box.version(),
            3
        );
    }

    #[test]
    fn mime_entry_round_trip() {
        let mut entry = ItemInfoEntry::new(7, FourCC::new(b"mime"));
        entry.item_name = "xml metadata".into();
        entry.content_type = Some("application/xml".into());
        entry.set_hidden(true);

        let mut iinf = ItemInfoBox::new();
        iinf.add_entry(entry);
        let mut w = BitStream::new();
        iinf.write_box(&mut w).unwrap();
        w.reset();
        let (mut sub, _) = w.read_sub_box_stream().unwrap();
        let parsed = ItemInfoBox::parse_box(&mut sub).unwrap();
        let entry = parsed.entry_by_id(7).unwrap();
        assert!(entry.is_hidden());
        assert_eq!(entry.item_type, b"mime");
        assert_eq!(entry.content_type.as_deref(), Some("application/xml"));
        assert_eq!(entry.item_name, "xml metadata");
    }
}
